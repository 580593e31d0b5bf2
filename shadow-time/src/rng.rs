use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha12Rng;

use crate::event::HostId;

/// A host's private random source.
///
/// Seeded deterministically from `(global_seed, host_id)` so that the same
/// seed and topology always produce the same per-host draw sequence,
/// regardless of worker count or thread scheduling (spec.md §5
/// Determinism). `ChaCha12Rng` is used instead of `rand::rngs::StdRng`
/// because `StdRng`'s underlying algorithm is explicitly *not* guaranteed
/// stable across `rand` releases, which would silently break invariant 4
/// (bitwise-identical runs) on a dependency bump.
pub struct HostRng {
    inner: ChaCha12Rng,
}

impl HostRng {
    /// Derive a host's RNG from the engine's global seed and the host's id.
    ///
    /// The mixing function only needs to avoid trivially-correlated streams
    /// across adjacent host ids; it does not need to be cryptographically
    /// strong. SplitMix64's finalizer is used purely as a cheap, well-
    /// distributed 64-bit mix.
    pub fn seeded(global_seed: u64, host_id: HostId) -> Self {
        let mixed = splitmix64(global_seed ^ splitmix64(host_id.as_u32() as u64 + 1));
        HostRng {
            inner: ChaCha12Rng::seed_from_u64(mixed),
        }
    }

    /// Uniform `f64` in `[0, 1)`, used for loss-probability draws.
    pub fn next_f64(&mut self) -> f64 {
        (self.inner.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Uniform `u64` in `[0, bound)`. Returns 0 if `bound` is 0.
    pub fn next_u64_below(&mut self, bound: u64) -> u64 {
        if bound == 0 {
            return 0;
        }
        self.inner.next_u64() % bound
    }

    /// Raw 64-bit draw, for callers building their own distributions.
    pub fn next_u64(&mut self) -> u64 {
        self.inner.next_u64()
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_host_same_stream() {
        let mut a = HostRng::seeded(1, HostId(3));
        let mut b = HostRng::seeded(1, HostId(3));
        for _ in 0..16 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn different_hosts_diverge() {
        let mut a = HostRng::seeded(1, HostId(3));
        let mut b = HostRng::seeded(1, HostId(4));
        let seq_a: Vec<u64> = (0..8).map(|_| a.next_u64()).collect();
        let seq_b: Vec<u64> = (0..8).map(|_| b.next_u64()).collect();
        assert_ne!(seq_a, seq_b);
    }

    #[test]
    fn f64_in_unit_interval() {
        let mut r = HostRng::seeded(42, HostId(0));
        for _ in 0..1000 {
            let v = r.next_f64();
            assert!((0.0..1.0).contains(&v));
        }
    }

    // Property tests over random seeds and host ids (spec.md §8: randomized
    // seeds must satisfy invariant 4, bitwise-identical reproduction).
    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn same_seed_same_host_always_reproduces(global_seed in any::<u64>(), host_id in any::<u32>()) {
                let mut a = HostRng::seeded(global_seed, HostId(host_id));
                let mut b = HostRng::seeded(global_seed, HostId(host_id));
                for _ in 0..32 {
                    prop_assert_eq!(a.next_u64(), b.next_u64());
                }
            }

            #[test]
            fn f64_always_in_unit_interval(global_seed in any::<u64>(), host_id in any::<u32>()) {
                let mut r = HostRng::seeded(global_seed, HostId(host_id));
                for _ in 0..32 {
                    let v = r.next_f64();
                    prop_assert!((0.0..1.0).contains(&v));
                }
            }

            #[test]
            fn next_u64_below_never_reaches_bound(global_seed in any::<u64>(), host_id in any::<u32>(), bound in 1u64..1_000_000_000) {
                let mut r = HostRng::seeded(global_seed, HostId(host_id));
                for _ in 0..32 {
                    prop_assert!(r.next_u64_below(bound) < bound);
                }
            }
        }
    }
}
