//! Chow structural-stability test.
//!
//! Scans every admissible breakpoint (supremum Wald) and fails when the
//! largest Chow F-statistic shows the fitted line changes across the split.
//! If the metadata carries a `time_variable` array of matching length the
//! observations are ordered by it first.

use refgate_core::{Metadata, Referee, RefereeResult};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, FisherSnedecor};

use crate::insufficient;
use crate::stats::rss;

pub const NAME: &str = "Chow_Stability_Test";

/// Smallest segment a breakpoint may leave on either side.
const MIN_SEGMENT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChowConfig {
    /// Critical F value; a larger supremum F means instability.
    pub f_critical: f64,
    pub alpha_critical: f64,
    /// Fraction trimmed from each end before scanning breakpoints.
    pub trim_fraction: f64,
}

impl Default for ChowConfig {
    fn default() -> Self {
        Self {
            f_critical: 6.91,
            alpha_critical: 0.001,
            trim_fraction: 0.15,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChowStabilityTest {
    config: ChowConfig,
}

impl ChowStabilityTest {
    pub fn new(config: ChowConfig) -> Self {
        let defaults = ChowConfig::default();
        Self {
            config: ChowConfig {
                f_critical: if config.f_critical > 0.0 {
                    config.f_critical
                } else {
                    defaults.f_critical
                },
                alpha_critical: if config.alpha_critical > 0.0 && config.alpha_critical < 1.0 {
                    config.alpha_critical
                } else {
                    defaults.alpha_critical
                },
                trim_fraction: if config.trim_fraction > 0.0 && config.trim_fraction < 0.5 {
                    config.trim_fraction
                } else {
                    defaults.trim_fraction
                },
            },
        }
    }

    pub fn config(&self) -> &ChowConfig {
        &self.config
    }
}

impl Default for ChowStabilityTest {
    fn default() -> Self {
        Self::new(ChowConfig::default())
    }
}

/// Chow F-statistic for a split at `k`.
pub fn chow_statistic(x: &[f64], y: &[f64], k: usize) -> f64 {
    let n = x.len();
    if k < MIN_SEGMENT || n - k < MIN_SEGMENT {
        return 0.0;
    }
    let pooled = rss(x, y);
    let split = rss(&x[..k], &y[..k]) + rss(&x[k..], &y[k..]);
    let numerator = ((pooled - split) / 2.0).max(0.0);
    let denominator = split / (n as f64 - 4.0);
    if denominator <= f64::EPSILON {
        return if numerator <= f64::EPSILON { 0.0 } else { f64::INFINITY };
    }
    numerator / denominator
}

fn time_ordered(x: &[f64], y: &[f64], metadata: &Metadata) -> Option<(Vec<f64>, Vec<f64>)> {
    let time: Vec<f64> = metadata
        .get("time_variable")?
        .as_array()?
        .iter()
        .map(|v| v.as_f64())
        .collect::<Option<_>>()?;
    if time.len() != x.len() {
        log::debug!("ignoring time_variable of length {} for {} points", time.len(), x.len());
        return None;
    }
    let mut order: Vec<usize> = (0..x.len()).collect();
    order.sort_by(|&a, &b| time[a].total_cmp(&time[b]));
    Some((
        order.iter().map(|&i| x[i]).collect(),
        order.iter().map(|&i| y[i]).collect(),
    ))
}

impl Referee for ChowStabilityTest {
    fn name(&self) -> &str {
        NAME
    }

    fn execute(&self, x: &[f64], y: &[f64], metadata: &Metadata) -> RefereeResult {
        if let Err(err) = refgate_core::validate_data(x, y) {
            return insufficient(NAME, err);
        }
        let ordered = time_ordered(x, y, metadata);
        let (x, y) = match &ordered {
            Some((tx, ty)) => (tx.as_slice(), ty.as_slice()),
            None => (x, y),
        };

        let n = x.len();
        let trim = (n as f64 * self.config.trim_fraction) as usize;
        let max_f = (trim..n.saturating_sub(trim))
            .map(|k| chow_statistic(x, y, k))
            .fold(0.0_f64, f64::max);

        let p = match FisherSnedecor::new(2.0, (n as f64 - 4.0).max(1.0)) {
            Ok(dist) if max_f.is_finite() => dist.sf(max_f),
            Ok(_) => 0.0,
            Err(_) => 1.0,
        };
        let f_critical = self.config.f_critical;
        let passed = max_f < f_critical;

        let failure_reason = if passed {
            String::new()
        } else if max_f > f_critical * 2.0 {
            format!(
                "CRITICAL INSTABILITY: Relationship changes sharply across the sample \
                 (F={max_f:.3} >> {f_critical:.2}). The effect is period-dependent."
            )
        } else {
            format!(
                "MODERATE INSTABILITY: Relationship shows some variation across the sample \
                 (F={max_f:.3} > {f_critical:.2}). The effect may be context-specific."
            )
        };

        RefereeResult {
            gate_name: NAME.to_string(),
            passed,
            statistic: max_f,
            p_value: Some(p),
            e_value: None,
            standard_used: format!(
                "Supremum Wald F < {f_critical:.2} (alpha={:.3}, trim={:.0}%)",
                self.config.alpha_critical,
                self.config.trim_fraction * 100.0
            ),
            failure_reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_line_passes() {
        let x: Vec<f64> = (0..120).map(f64::from).collect();
        let y: Vec<f64> = x.iter().map(|v| 2.0 * v + 1.0 + (v * 1.7).sin()).collect();
        let result = ChowStabilityTest::default().execute(&x, &y, &Metadata::new());
        assert!(result.passed, "F={}", result.statistic);
        assert!(result.p_value.unwrap() > 0.001);
    }

    #[test]
    fn regime_change_fails() {
        let x: Vec<f64> = (0..100).map(f64::from).collect();
        let y: Vec<f64> = x
            .iter()
            .enumerate()
            .map(|(i, v)| if i < 50 { 2.0 * v } else { 200.0 - 3.0 * v } + (i % 3) as f64 * 0.1)
            .collect();
        let result = ChowStabilityTest::default().execute(&x, &y, &Metadata::new());
        assert!(!result.passed);
        assert!(result.failure_reason.starts_with("CRITICAL INSTABILITY"));
        assert!(result.p_value.unwrap() < 0.001);
    }

    #[test]
    fn exact_line_is_stable() {
        let x: Vec<f64> = (0..40).map(f64::from).collect();
        let y: Vec<f64> = x.iter().map(|v| 4.0 * v + 1.0).collect();
        let result = ChowStabilityTest::default().execute(&x, &y, &Metadata::new());
        assert!(result.passed);
        assert_eq!(result.statistic, 0.0);
    }

    #[test]
    fn short_segments_score_zero() {
        let x: Vec<f64> = (0..12).map(f64::from).collect();
        let y = x.clone();
        assert_eq!(chow_statistic(&x, &y, 3), 0.0);
        assert_eq!(chow_statistic(&x, &y, 9), 0.0);
    }

    #[test]
    fn time_variable_reorders() {
        // Regime change hidden by index order, revealed by time.
        let n = 60;
        let x: Vec<f64> = (0..n).map(|i| (i % 30) as f64).collect();
        let y: Vec<f64> = (0..n)
            .map(|i| if i % 2 == 0 { 2.0 * x[i] } else { 100.0 - 2.0 * x[i] })
            .collect();
        let time: Vec<f64> = (0..n).map(|i| if i % 2 == 0 { i as f64 } else { (n + i) as f64 }).collect();
        let mut metadata = Metadata::new();
        metadata.insert("time_variable".into(), time.into());

        let (tx, ty) = time_ordered(&x, &y, &metadata).unwrap();
        assert_eq!(tx.len(), n);
        assert_eq!(ty[0], 0.0);
        assert_eq!(ty[n / 2], 100.0 - 2.0 * x[1]);

        let result = ChowStabilityTest::default().execute(&x, &y, &metadata);
        assert!(!result.passed);
    }

    #[test]
    fn mismatched_time_variable_ignored() {
        let mut metadata = Metadata::new();
        metadata.insert("time_variable".into(), vec![1.0, 2.0].into());
        assert!(time_ordered(&[1.0; 10], &[1.0; 10], &metadata).is_none());
    }
}
