use shadow_time::HostRng;

use crate::error::TopoError;

/// A piecewise-linear cumulative distribution function over non-negative
/// `u64` values (nanoseconds), used for jitter and latency-quantile
/// sampling (spec.md §4.2: "Jitter distributions are sampled from a CDF
/// (piecewise-linear interpolation between tabulated points)").
///
/// Points are `(cumulative_probability, value)` pairs sorted by ascending
/// probability, with the first point's probability implicitly treated as
/// the floor and the last point's probability treated as 1.0 for sampling
/// purposes (a table need not literally end at 1.0; values above the last
/// tabulated probability return the last value).
#[derive(Debug, Clone)]
pub struct Cdf {
    points: Vec<(f64, u64)>,
}

impl Cdf {
    /// Build a CDF from tabulated `(cumulative_probability, value_ns)`
    /// points. Rejects empty tables or tables not sorted by ascending
    /// probability.
    pub fn from_points(points: Vec<(f64, u64)>) -> Result<Self, TopoError> {
        if points.is_empty() {
            return Err(TopoError::InvalidCdf);
        }
        if !points.windows(2).all(|w| w[0].0 <= w[1].0) {
            return Err(TopoError::InvalidCdf);
        }
        if points.iter().any(|(p, _)| !(0.0..=1.0).contains(p)) {
            return Err(TopoError::InvalidCdf);
        }
        Ok(Cdf { points })
    }

    /// A degenerate CDF that always returns `value` (used when a link has
    /// no configured jitter distribution).
    pub fn constant(value: u64) -> Self {
        Cdf {
            points: vec![(1.0, value)],
        }
    }

    /// Draw a value from the distribution using `rng`'s uniform sampler,
    /// interpolating linearly between the two tabulated points that bracket
    /// the draw.
    pub fn sample(&self, rng: &mut HostRng) -> u64 {
        let u = rng.next_f64();
        self.interpolate(u)
    }

    /// Deterministic interpolation at a given cumulative-probability point,
    /// exposed separately from `sample` so tests can check interpolation
    /// behavior without going through the RNG.
    pub fn interpolate(&self, u: f64) -> u64 {
        if self.points.len() == 1 {
            return self.points[0].1;
        }

        if u <= self.points[0].0 {
            return self.points[0].1;
        }
        if u >= self.points[self.points.len() - 1].0 {
            return self.points[self.points.len() - 1].1;
        }

        for pair in self.points.windows(2) {
            let (p0, v0) = pair[0];
            let (p1, v1) = pair[1];
            if u >= p0 && u <= p1 {
                if p1 == p0 {
                    return v1;
                }
                let frac = (u - p0) / (p1 - p0);
                let v0 = v0 as f64;
                let v1 = v1 as f64;
                return (v0 + frac * (v1 - v0)).round() as u64;
            }
        }

        self.points[self.points.len() - 1].1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shadow_time::HostRng;

    fn rng() -> HostRng {
        HostRng::seeded(1, shadow_time::HostId::new(0))
    }

    #[test]
    fn constant_always_returns_value() {
        let cdf = Cdf::constant(500);
        let mut r = rng();
        for _ in 0..20 {
            assert_eq!(cdf.sample(&mut r), 500);
        }
    }

    #[test]
    fn interpolates_linearly_between_points() {
        let cdf = Cdf::from_points(vec![(0.0, 0), (1.0, 100)]).unwrap();
        assert_eq!(cdf.interpolate(0.0), 0);
        assert_eq!(cdf.interpolate(0.5), 50);
        assert_eq!(cdf.interpolate(1.0), 100);
    }

    #[test]
    fn clamps_outside_table_range() {
        let cdf = Cdf::from_points(vec![(0.2, 10), (0.8, 90)]).unwrap();
        assert_eq!(cdf.interpolate(0.0), 10);
        assert_eq!(cdf.interpolate(1.0), 90);
    }

    #[test]
    fn rejects_empty_or_unsorted() {
        assert!(Cdf::from_points(vec![]).is_err());
        assert!(Cdf::from_points(vec![(0.5, 10), (0.2, 20)]).is_err());
        assert!(Cdf::from_points(vec![(-0.1, 10)]).is_err());
    }

    #[test]
    fn sample_stays_in_range() {
        let cdf = Cdf::from_points(vec![(0.0, 5), (1.0, 15)]).unwrap();
        let mut r = rng();
        for _ in 0..200 {
            let v = cdf.sample(&mut r);
            assert!((5..=15).contains(&v));
        }
    }
}
