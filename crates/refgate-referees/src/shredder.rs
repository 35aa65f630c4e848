//! Permutation shredder: guards against relationships that are pure luck.
//!
//! Shuffles the driver series to build a null distribution of the Pearson
//! correlation and reports the fraction of shuffles at least as extreme as
//! the observed value.

use rand::seq::SliceRandom;
use refgate_core::{Metadata, Referee, RefereeResult};
use serde::{Deserialize, Serialize};

use crate::stats::{pearson, rng_from};
use crate::insufficient;

pub const NAME: &str = "Permutation_Shredder";

/// Permutation test settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShredderConfig {
    pub iterations: usize,
    /// Two-tailed significance threshold.
    pub alpha: f64,
    /// Fixed seed for reproducible permutations.
    pub seed: Option<u64>,
}

impl Default for ShredderConfig {
    fn default() -> Self {
        Self {
            iterations: 2500,
            alpha: 0.001,
            seed: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Shredder {
    config: ShredderConfig,
}

impl Shredder {
    pub fn new(config: ShredderConfig) -> Self {
        let defaults = ShredderConfig::default();
        let config = ShredderConfig {
            iterations: if config.iterations == 0 {
                defaults.iterations
            } else {
                config.iterations
            },
            alpha: if config.alpha > 0.0 && config.alpha < 1.0 {
                config.alpha
            } else {
                defaults.alpha
            },
            seed: config.seed,
        };
        Self { config }
    }

    pub fn config(&self) -> &ShredderConfig {
        &self.config
    }

    fn failure_reason(&self, p: f64) -> String {
        if p >= 0.5 {
            format!(
                "CRITICAL: No statistical relationship detected (p={p:.6}). \
                 The data behaves like noise and does not support the hypothesis."
            )
        } else if p >= 0.05 {
            format!(
                "WEAK SIGNAL: Some relationship but no statistical rigor (p={p:.6}). \
                 May be noise, a small sample or a weak effect. Need p<{} for causal confidence.",
                self.config.alpha
            )
        } else {
            format!(
                "INSUFFICIENT PRECISION: Significant at conventional levels but p={p:.6} \
                 misses the p<{} standard. More data or a stronger effect is required.",
                self.config.alpha
            )
        }
    }
}

impl Default for Shredder {
    fn default() -> Self {
        Self::new(ShredderConfig::default())
    }
}

impl Referee for Shredder {
    fn name(&self) -> &str {
        NAME
    }

    fn execute(&self, x: &[f64], y: &[f64], _metadata: &Metadata) -> RefereeResult {
        if let Err(err) = refgate_core::validate_data(x, y) {
            return insufficient(NAME, err);
        }

        let observed = pearson(x, y);
        let mut rng = rng_from(self.config.seed);
        let mut shuffled = x.to_vec();
        let mut extreme = 0usize;
        for _ in 0..self.config.iterations {
            shuffled.shuffle(&mut rng);
            if pearson(&shuffled, y).abs() >= observed.abs() {
                extreme += 1;
            }
        }
        let p = extreme as f64 / self.config.iterations as f64;
        let passed = p <= self.config.alpha;

        RefereeResult {
            gate_name: NAME.to_string(),
            passed,
            statistic: observed,
            p_value: Some(p),
            e_value: None,
            standard_used: format!(
                "Two-tailed permutation (N={}) with p <= {:.3} ({:.1}% confidence)",
                self.config.iterations,
                self.config.alpha,
                (1.0 - self.config.alpha) * 100.0
            ),
            failure_reason: if passed { String::new() } else { self.failure_reason(p) },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{linear_with_noise, noise_pair};

    fn seeded(iterations: usize) -> Shredder {
        Shredder::new(ShredderConfig {
            iterations,
            seed: Some(42),
            ..ShredderConfig::default()
        })
    }

    #[test]
    fn strong_linear_relationship_passes() {
        let (x, y) = linear_with_noise(200, 1);
        let result = seeded(2500).execute(&x, &y, &Metadata::new());
        assert!(result.passed, "{}", result.failure_reason);
        assert!(result.p_value.unwrap() < 0.001);
        assert!(result.statistic > 0.9);
        assert!(result.failure_reason.is_empty());
    }

    #[test]
    fn independent_noise_fails() {
        let (x, y) = noise_pair(200, 3);
        let result = seeded(500).execute(&x, &y, &Metadata::new());
        assert!(!result.passed);
        assert!(result.p_value.unwrap() > 0.01);
        assert!(!result.failure_reason.is_empty());
    }

    #[test]
    fn seed_makes_runs_reproducible() {
        let (x, y) = noise_pair(50, 9);
        let a = seeded(300).execute(&x, &y, &Metadata::new());
        let b = seeded(300).execute(&x, &y, &Metadata::new());
        assert_eq!(a.p_value, b.p_value);
    }

    #[test]
    fn too_few_points() {
        let result = Shredder::default().execute(&[1.0; 5], &[2.0; 5], &Metadata::new());
        assert!(!result.passed);
        assert!(result.p_value.is_none());
        assert!(result.failure_reason.contains("insufficient data points"));
    }

    #[test]
    fn invalid_config_falls_back() {
        let s = Shredder::new(ShredderConfig {
            iterations: 0,
            alpha: 2.0,
            seed: None,
        });
        assert_eq!(s.config().iterations, 2500);
        assert_eq!(s.config().alpha, 0.001);
    }

    #[test]
    fn failure_tiers() {
        let s = Shredder::default();
        assert!(s.failure_reason(0.7).starts_with("CRITICAL"));
        assert!(s.failure_reason(0.1).starts_with("WEAK SIGNAL"));
        assert!(s.failure_reason(0.01).starts_with("INSUFFICIENT PRECISION"));
    }
}
