//! Retransmission scheduling (RFC 3315 Section 14)
//!
//! RT = IRT + RAND*IRT for the first transmission, then
//! RT = 2*RT_prev + RAND*RT_prev, clamped to MRT + RAND*MRT once it
//! exceeds MRT. RAND is uniform in [-0.1, 0.1].

use rand::Rng;

#[derive(Debug, Default)]
pub struct Retransmit {
    tries: u32,
    rt: f64,
}

fn rand_factor() -> f64 {
    rand::thread_rng().gen_range(-0.1..=0.1)
}

/// Uniform delay in [0, max] seconds, used for the initial Solicit,
/// Confirm, and Inform waits.
pub fn uniform_delay(max: f64) -> f64 {
    rand::thread_rng().gen_range(0.0..=max)
}

impl Retransmit {
    pub fn new() -> Retransmit {
        Retransmit::default()
    }

    /// Reset on entering a state.
    pub fn clear(&mut self) {
        self.tries = 0;
        self.rt = 0.0;
    }

    /// Transmissions attempted so far in this exchange.
    pub fn tries(&self) -> u32 {
        self.tries
    }

    /// Account for the next transmission and return the wait (seconds)
    /// before the one after it. An `mrt` of 0 means unclamped.
    pub fn next(&mut self, irt: f64, mrt: f64) -> f64 {
        self.tries += 1;
        self.rt = if self.tries == 1 {
            irt + rand_factor() * irt
        } else {
            let rt = 2.0 * self.rt + rand_factor() * self.rt;
            if mrt > 0.0 && rt > mrt {
                mrt + rand_factor() * mrt
            } else {
                rt
            }
        };
        self.rt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IRT: f64 = 1.0;
    const MRT: f64 = 120.0;

    #[test]
    fn test_first_wait_bounds() {
        for _ in 0..50 {
            let mut r = Retransmit::new();
            let rt = r.next(IRT, MRT);
            assert!((0.9 * IRT..=1.1 * IRT).contains(&rt), "rt={rt}");
            assert_eq!(r.tries(), 1);
        }
    }

    #[test]
    fn test_doubling_bounds() {
        for _ in 0..50 {
            let mut r = Retransmit::new();
            let mut prev = r.next(IRT, MRT);
            for _ in 0..5 {
                let rt = r.next(IRT, MRT);
                if rt < MRT * 0.9 {
                    assert!(
                        (1.9 * prev..=2.1 * prev).contains(&rt),
                        "rt={rt} prev={prev}"
                    );
                }
                prev = rt;
            }
        }
    }

    #[test]
    fn test_clamped_to_mrt() {
        for _ in 0..20 {
            let mut r = Retransmit::new();
            for _ in 0..12 {
                r.next(IRT, MRT);
            }
            // well past the clamp point by now
            let rt = r.next(IRT, MRT);
            assert!((0.9 * MRT..=1.1 * MRT).contains(&rt), "rt={rt}");
        }
    }

    #[test]
    fn test_zero_mrt_never_clamps() {
        let mut r = Retransmit::new();
        let mut prev = r.next(1.0, 0.0);
        for _ in 0..8 {
            let rt = r.next(1.0, 0.0);
            assert!(rt > prev);
            prev = rt;
        }
    }

    #[test]
    fn test_clear_resets() {
        let mut r = Retransmit::new();
        r.next(IRT, MRT);
        r.next(IRT, MRT);
        r.clear();
        assert_eq!(r.tries(), 0);
        let rt = r.next(IRT, MRT);
        assert!((0.9 * IRT..=1.1 * IRT).contains(&rt));
    }

    #[test]
    fn test_uniform_delay_bounds() {
        for _ in 0..100 {
            let d = uniform_delay(1.0);
            assert!((0.0..=1.0).contains(&d));
        }
    }
}
