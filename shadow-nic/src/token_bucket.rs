/// A rate-limiting primitive: a byte counter refilled at a configured rate
/// up to a cap, debited by each transmission (GLOSSARY "Token bucket").
#[derive(Debug, Clone)]
pub struct TokenBucket {
    rate_bytes_per_sec: u64,
    /// Burst cap, equal to one refill quantum at the configured batch
    /// interval (spec.md §4.3: "capped at a burst equal to one refill
    /// quantum").
    capacity_bytes: u64,
    tokens_bytes: f64,
}

impl TokenBucket {
    pub fn new(rate_bytes_per_sec: u64, batch_interval_ns: u64) -> Self {
        let capacity_bytes = Self::quantum(rate_bytes_per_sec, batch_interval_ns);
        TokenBucket {
            rate_bytes_per_sec,
            capacity_bytes,
            tokens_bytes: capacity_bytes as f64,
        }
    }

    fn quantum(rate_bytes_per_sec: u64, interval_ns: u64) -> u64 {
        ((rate_bytes_per_sec as u128 * interval_ns as u128) / 1_000_000_000u128) as u64
    }

    /// Refill by `bandwidth * interval` for the elapsed nanoseconds, capped
    /// at the burst quantum (spec.md §4.3: "On every tick ... each
    /// direction's token bucket is refilled by `bandwidth * interval`,
    /// capped at a burst equal to one refill quantum.").
    pub fn refill(&mut self, elapsed_ns: u64) {
        let added = (self.rate_bytes_per_sec as f64 * elapsed_ns as f64) / 1_000_000_000.0;
        self.tokens_bytes = (self.tokens_bytes + added).min(self.capacity_bytes as f64);
    }

    /// Attempt to debit `bytes`. Returns `true` and consumes the tokens on
    /// success; leaves the bucket untouched and returns `false` otherwise.
    pub fn try_consume(&mut self, bytes: u32) -> bool {
        if self.tokens_bytes >= bytes as f64 {
            self.tokens_bytes -= bytes as f64;
            true
        } else {
            false
        }
    }

    pub fn available_bytes(&self) -> u64 {
        self.tokens_bytes as u64
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refills_up_to_capacity() {
        let mut bucket = TokenBucket::new(1_000_000, 10_000_000); // 1 MB/s, 10ms batch
        assert_eq!(bucket.capacity_bytes(), 10_000);
        bucket.tokens_bytes = 0.0;
        bucket.refill(10_000_000);
        assert_eq!(bucket.available_bytes(), 10_000);
        bucket.refill(10_000_000);
        assert_eq!(bucket.available_bytes(), 10_000); // capped, no overflow
    }

    #[test]
    fn consume_fails_when_insufficient() {
        let mut bucket = TokenBucket::new(1_000, 10_000_000);
        assert!(!bucket.try_consume(1_000_000));
        assert_eq!(bucket.available_bytes(), bucket.capacity_bytes());
    }

    #[test]
    fn consume_debits_tokens() {
        let mut bucket = TokenBucket::new(1_000_000, 10_000_000);
        let before = bucket.available_bytes();
        assert!(bucket.try_consume(100));
        assert_eq!(bucket.available_bytes(), before - 100);
    }

    #[test]
    fn sustained_rate_matches_bandwidth_over_window() {
        // Invariant 6: bytes transmitted over a window W >= batch interval
        // must not exceed bandwidth * W + burst.
        let rate = 500_000u64;
        let batch_ns = 10_000_000u64;
        let mut bucket = TokenBucket::new(rate, batch_ns);
        let burst = bucket.capacity_bytes();
        let mut sent = 0u64;
        let ticks = 100;
        for _ in 0..ticks {
            bucket.refill(batch_ns);
            while bucket.try_consume(200) {
                sent += 200;
            }
        }
        let window_ns = ticks as u64 * batch_ns;
        let allowance = (rate as u128 * window_ns as u128 / 1_000_000_000u128) as u64 + burst;
        assert!(sent <= allowance);
    }
}
