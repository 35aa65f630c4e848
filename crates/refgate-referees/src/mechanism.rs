//! Isotonic mechanism check: is the effect monotone in the driver?
//!
//! Computes Spearman's rho over the whole sample (normal approximation for
//! the p-value) and within quartile bins of `x`, counting how often the bin
//! direction flips.

use refgate_core::{Metadata, Referee, RefereeResult};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

use crate::insufficient;
use crate::stats::spearman;

pub const NAME: &str = "Isotonic_Mechanism_Check";

/// Points a quantile bin needs before its direction counts.
const MIN_BIN: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MechanismConfig {
    /// Minimum |rho| over the whole sample.
    pub spearman_minimum: f64,
    /// Direction changes allowed between adjacent bins.
    pub max_sign_flips: usize,
    pub alpha: f64,
    /// Bin boundaries as quantiles of `x`.
    pub quantiles: Vec<f64>,
}

impl Default for MechanismConfig {
    fn default() -> Self {
        Self {
            spearman_minimum: 0.90,
            max_sign_flips: 1,
            alpha: 0.01,
            quantiles: vec![0.25, 0.5, 0.75],
        }
    }
}

#[derive(Debug, Clone)]
pub struct IsotonicMechanismCheck {
    config: MechanismConfig,
}

impl IsotonicMechanismCheck {
    pub fn new(mut config: MechanismConfig) -> Self {
        let defaults = MechanismConfig::default();
        if !(0.0..=1.0).contains(&config.spearman_minimum) {
            config.spearman_minimum = defaults.spearman_minimum;
        }
        if !(config.alpha > 0.0 && config.alpha < 1.0) {
            config.alpha = defaults.alpha;
        }
        config.quantiles.retain(|q| *q > 0.0 && *q < 1.0);
        config.quantiles.sort_by(f64::total_cmp);
        config.quantiles.dedup();
        Self { config }
    }

    pub fn config(&self) -> &MechanismConfig {
        &self.config
    }

    /// Spearman rho of each quantile bin with enough points, in `x` order.
    pub fn bin_correlations(&self, x: &[f64], y: &[f64]) -> Vec<f64> {
        let mut points: Vec<(f64, f64)> = x.iter().copied().zip(y.iter().copied()).collect();
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        let n = points.len();

        let mut edges = vec![0.0];
        edges.extend(&self.config.quantiles);
        edges.push(1.0);

        edges
            .windows(2)
            .filter_map(|w| {
                let start = (n as f64 * w[0]) as usize;
                let end = ((n as f64 * w[1]) as usize).min(n);
                if end <= start || end - start < MIN_BIN {
                    return None;
                }
                let (bx, by): (Vec<f64>, Vec<f64>) = points[start..end].iter().copied().unzip();
                Some(spearman(&bx, &by))
            })
            .collect()
    }
}

impl Default for IsotonicMechanismCheck {
    fn default() -> Self {
        Self::new(MechanismConfig::default())
    }
}

/// Adjacent bins whose directions disagree. Flat bins are ignored.
pub fn sign_flips(correlations: &[f64]) -> usize {
    let signs: Vec<f64> = correlations
        .iter()
        .filter(|r| r.abs() > 1e-12)
        .map(|r| r.signum())
        .collect();
    signs.windows(2).filter(|w| w[0] != w[1]).count()
}

/// Two-sided p-value for rho under independence, z = rho * sqrt(n - 1).
pub fn spearman_p_value(rho: f64, n: usize) -> f64 {
    if n < 3 {
        return 1.0;
    }
    let z = rho.abs() * ((n - 1) as f64).sqrt();
    match Normal::new(0.0, 1.0) {
        Ok(normal) => (2.0 * normal.sf(z)).min(1.0),
        Err(_) => 1.0,
    }
}

impl Referee for IsotonicMechanismCheck {
    fn name(&self) -> &str {
        NAME
    }

    fn execute(&self, x: &[f64], y: &[f64], _metadata: &Metadata) -> RefereeResult {
        if let Err(err) = refgate_core::validate_data(x, y) {
            return insufficient(NAME, err);
        }

        let rho = spearman(x, y);
        let p = spearman_p_value(rho, x.len());
        let bins = self.bin_correlations(x, y);
        let flips = sign_flips(&bins);

        let cfg = &self.config;
        let monotone = rho.abs() >= cfg.spearman_minimum;
        let passed = monotone && p < cfg.alpha && flips <= cfg.max_sign_flips;

        let failure_reason = if passed {
            String::new()
        } else if flips > cfg.max_sign_flips {
            format!(
                "NON-MONOTONIC RELATIONSHIP: direction reverses {flips} times across x quartiles \
                 (max {}). The effect may be U-shaped or piecewise.",
                cfg.max_sign_flips
            )
        } else if !monotone {
            format!(
                "WEAK DIRECTIONALITY: |rho|={:.3} below {:.2}. The relationship lacks a clear \
                 monotonic pattern.",
                rho.abs(),
                cfg.spearman_minimum
            )
        } else {
            format!(
                "INSUFFICIENT MONOTONICITY CONFIDENCE: p={p:.4} not below {}. A larger sample \
                 may confirm the pattern.",
                cfg.alpha
            )
        };

        RefereeResult {
            gate_name: NAME.to_string(),
            passed,
            statistic: rho,
            p_value: Some(p),
            e_value: None,
            standard_used: format!(
                "Isotonic consistency (<= {} sign flips, |rho| >= {:.2})",
                cfg.max_sign_flips, cfg.spearman_minimum
            ),
            failure_reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::noise_pair;

    #[test]
    fn monotone_curve_passes() {
        let x: Vec<f64> = (1..=80).map(f64::from).collect();
        let y: Vec<f64> = x.iter().map(|v| v.ln() + v * 0.01).collect();
        let result = IsotonicMechanismCheck::default().execute(&x, &y, &Metadata::new());
        assert!(result.passed, "{}", result.failure_reason);
        assert!((result.statistic - 1.0).abs() < 1e-12);
    }

    #[test]
    fn u_shape_fails_on_flips_or_rho() {
        let x: Vec<f64> = (0..80).map(|i| f64::from(i) - 40.0).collect();
        let y: Vec<f64> = x.iter().map(|v| v * v).collect();
        let result = IsotonicMechanismCheck::default().execute(&x, &y, &Metadata::new());
        assert!(!result.passed);
        assert!(result.statistic.abs() < 0.9);
    }

    #[test]
    fn noise_is_weak() {
        let (x, y) = noise_pair(100, 11);
        let result = IsotonicMechanismCheck::default().execute(&x, &y, &Metadata::new());
        assert!(!result.passed);
    }

    #[test]
    fn flip_counting() {
        assert_eq!(sign_flips(&[0.5, 0.7, 0.9]), 0);
        assert_eq!(sign_flips(&[0.5, -0.7, 0.9]), 2);
        assert_eq!(sign_flips(&[0.5, 0.0, -0.2]), 1);
        assert_eq!(sign_flips(&[]), 0);
    }

    #[test]
    fn bins_need_ten_points() {
        let check = IsotonicMechanismCheck::default();
        let x: Vec<f64> = (0..30).map(f64::from).collect();
        assert!(check.bin_correlations(&x, &x).is_empty());
        let x: Vec<f64> = (0..40).map(f64::from).collect();
        assert_eq!(check.bin_correlations(&x, &x).len(), 4);
    }

    #[test]
    fn p_value_shrinks_with_n() {
        assert!(spearman_p_value(0.5, 100) < spearman_p_value(0.5, 20));
        assert!((spearman_p_value(0.0, 50) - 1.0).abs() < 1e-12);
        assert_eq!(spearman_p_value(0.9, 2), 1.0);
    }

    #[test]
    fn bad_quantiles_are_dropped() {
        let check = IsotonicMechanismCheck::new(MechanismConfig {
            quantiles: vec![0.5, 1.5, -0.1, 0.5],
            ..MechanismConfig::default()
        });
        assert_eq!(check.config().quantiles, vec![0.5]);
    }
}
