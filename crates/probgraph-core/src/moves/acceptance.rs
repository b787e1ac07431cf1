//! Metropolis-Hastings acceptance arithmetic.

use rand::{Rng, RngCore};

use crate::engine::errors::ModelError;

/// Whether a log ratio can take part in the acceptance test.
///
/// `-inf` is computable (it always rejects); `NaN` and `+inf` are not.
pub fn is_computable(ln_ratio: f64) -> bool {
    ln_ratio.is_finite() || ln_ratio == f64::NEG_INFINITY
}

/// Accepts iff `ln_acceptance >= ln(u)` with `u ~ U(0, 1)`.
///
/// Non-computable ratios and `-inf` reject without consuming randomness;
/// non-negative ratios accept without consuming randomness.
pub fn metropolis_hastings_accepts(ln_acceptance: f64, rng: &mut dyn RngCore) -> bool {
    if !is_computable(ln_acceptance) || ln_acceptance == f64::NEG_INFINITY {
        return false;
    }
    if ln_acceptance >= 0.0 {
        return true;
    }
    let u: f64 = rng.gen();
    u.ln() <= ln_acceptance
}

/// Tempering exponents applied to the prior, likelihood and posterior ratios.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Heats {
    pub prior: f64,
    pub likelihood: f64,
    pub posterior: f64,
}

impl Default for Heats {
    fn default() -> Self {
        Self {
            prior: 1.0,
            likelihood: 1.0,
            posterior: 1.0,
        }
    }
}

impl Heats {
    pub fn validate(self) -> Result<Self, ModelError> {
        for (label, heat) in [
            ("prior", self.prior),
            ("likelihood", self.likelihood),
            ("posterior", self.posterior),
        ] {
            if !heat.is_finite() || heat < 0.0 {
                return Err(ModelError::Validation(format!(
                    "heats: {} heat must be finite and >= 0, got {}",
                    label, heat
                )));
            }
        }
        Ok(self)
    }
}

/// Log ratios produced by one performed move.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MoveRatios {
    /// Sum over unclamped nodes of new minus committed log-probability.
    pub ln_prior_ratio: f64,
    /// Sum over clamped nodes of new minus committed log-probability.
    pub ln_likelihood_ratio: f64,
    /// `ln(q(old | new) / q(new | old))`.
    pub ln_hastings_ratio: f64,
}

impl MoveRatios {
    /// Heated log posterior ratio, without the Hastings term.
    pub fn ln_posterior_ratio(&self, heats: &Heats) -> f64 {
        heats.posterior
            * (heats.likelihood * self.ln_likelihood_ratio + heats.prior * self.ln_prior_ratio)
    }

    /// Heated log acceptance ratio.
    pub fn ln_acceptance(&self, heats: &Heats) -> f64 {
        self.ln_posterior_ratio(heats) + self.ln_hastings_ratio
    }

    pub fn is_computable(&self) -> bool {
        is_computable(self.ln_prior_ratio)
            && is_computable(self.ln_likelihood_ratio)
            && is_computable(self.ln_hastings_ratio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn special_values_never_accept() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(!metropolis_hastings_accepts(f64::NAN, &mut rng));
        assert!(!metropolis_hastings_accepts(f64::INFINITY, &mut rng));
        assert!(!metropolis_hastings_accepts(f64::NEG_INFINITY, &mut rng));
        assert!(metropolis_hastings_accepts(0.0, &mut rng));
        assert!(metropolis_hastings_accepts(12.5, &mut rng));
    }

    #[test]
    fn acceptance_frequency_tracks_ratio() {
        let mut rng = StdRng::seed_from_u64(99);
        let trials = 20_000;
        let accepted = (0..trials)
            .filter(|_| metropolis_hastings_accepts(0.25_f64.ln(), &mut rng))
            .count();
        let rate = accepted as f64 / trials as f64;
        assert!((rate - 0.25).abs() < 0.02, "rate {}", rate);
    }

    #[test]
    fn heats_scale_ratio_components() {
        let ratios = MoveRatios {
            ln_prior_ratio: -1.0,
            ln_likelihood_ratio: -2.0,
            ln_hastings_ratio: 0.5,
        };
        assert_eq!(ratios.ln_acceptance(&Heats::default()), -2.5);
        let heats = Heats {
            prior: 1.0,
            likelihood: 0.5,
            posterior: 2.0,
        };
        assert_eq!(ratios.ln_posterior_ratio(&heats), -4.0);
        assert!(Heats { prior: -1.0, ..Heats::default() }.validate().is_err());
        assert!(!MoveRatios { ln_prior_ratio: f64::NAN, ..ratios }.is_computable());
    }
}
