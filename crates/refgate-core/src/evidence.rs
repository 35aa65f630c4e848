//! Evidence calibration: p-values and q-values to E-values, correlated
//! combination, dynamic thresholds and verdicts.
//!
//! All tuning constants live in [`CalibrationConfig`]; historical calibration
//! records are injected at construction. Bootstrap resampling uses a seeded
//! [`StdRng`] so intervals are reproducible.

use std::time::SystemTime;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::CalibrationConfig;
use crate::referee::RefereeResult;

// ═══════════════════════════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════════════════════════

/// Final decision on a hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Accepted,
    Rejected,
    EarlyStop,
    Inconclusive,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accepted => write!(f, "ACCEPTED"),
            Self::Rejected => write!(f, "REJECTED"),
            Self::EarlyStop => write!(f, "EARLY_STOP"),
            Self::Inconclusive => write!(f, "INCONCLUSIVE"),
        }
    }
}

/// Evidence strength on the normalized 0-1 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HypothesisQuality {
    VeryWeak,
    Weak,
    Moderate,
    Strong,
    VeryStrong,
}

impl HypothesisQuality {
    pub fn from_normalized(normalized: f64) -> Self {
        match normalized {
            n if n >= 0.8 => Self::VeryStrong,
            n if n >= 0.6 => Self::Strong,
            n if n >= 0.4 => Self::Moderate,
            n if n >= 0.2 => Self::Weak,
            _ => Self::VeryWeak,
        }
    }
}

impl std::fmt::Display for HypothesisQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::VeryWeak => write!(f, "Very Weak"),
            Self::Weak => write!(f, "Weak"),
            Self::Moderate => write!(f, "Moderate"),
            Self::Strong => write!(f, "Strong"),
            Self::VeryStrong => write!(f, "Very Strong"),
        }
    }
}

/// A calibrated E-value with its uncertainty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EValue {
    pub value: f64,
    /// `value` mapped onto 0-1.
    pub normalized: f64,
    pub confidence: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub test_type: String,
    pub calculated_at: SystemTime,
}

/// Several E-values folded into one decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceCombination {
    /// Combined E-value divided by the test-count baseline.
    pub combined_e_value: f64,
    /// Correlation-discounted product before baseline normalization.
    pub raw_e_value: f64,
    /// `combined_e_value` mapped onto 0-1.
    pub normalized_e_value: f64,
    pub quality: HypothesisQuality,
    pub test_count: usize,
    pub correlation_factor: f64,
    pub confidence: f64,
    pub early_stop_eligible: bool,
    pub verdict: Verdict,
    pub individual_results: Vec<EValue>,
}

/// Historical record used to calibrate conversions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationDatum {
    pub test_type: String,
    pub p_value: f64,
    pub e_value: f64,
    pub q_value: f64,
    pub true_positive: bool,
    pub reliability: f64,
    pub sample_size: usize,
}

impl CalibrationDatum {
    fn new(test_type: &str, p: f64, e: f64, q: f64, tp: bool, reliability: f64, n: usize) -> Self {
        Self {
            test_type: test_type.to_string(),
            p_value: p,
            e_value: e,
            q_value: q,
            true_positive: tp,
            reliability,
            sample_size: n,
        }
    }
}

/// Seed records used when no history is supplied.
pub fn default_history() -> Vec<CalibrationDatum> {
    vec![
        CalibrationDatum::new("permutation_shredder", 0.001, 100.0, 0.001, true, 0.85, 500),
        CalibrationDatum::new("correlation_pearson", 0.05, 20.0, 0.08, true, 0.78, 200),
        CalibrationDatum::new("chisquare_test", 0.01, 100.0, 0.02, true, 0.82, 1000),
        CalibrationDatum::new("transfer_entropy", 0.02, 50.0, 0.03, true, 0.75, 300),
        CalibrationDatum::new("permutation_shredder", 0.5, 2.0, 0.6, false, 0.85, 100),
        CalibrationDatum::new("correlation_pearson", 0.8, 1.25, 0.9, false, 0.78, 50),
    ]
}

/// Multiple-testing context of the workspace a hypothesis came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceState {
    pub hypotheses_generated: usize,
    /// Fraction of the global alpha budget already spent.
    pub global_alpha_spent: f64,
}

impl WorkspaceState {
    /// E-value threshold after the multiple-testing penalty.
    pub fn threshold(&self) -> f64 {
        let mut threshold = 8.0 * (1.0 + self.hypotheses_generated as f64 / 20.0);
        if self.global_alpha_spent > 0.8 {
            threshold *= 1.5;
        }
        threshold
    }
}

/// Sigmoid of ln E: E=1 → 0.5, E=10 → ~0.91, E=0.1 → ~0.09.
pub fn normalize_to_unit(e_value: f64) -> f64 {
    if e_value <= 0.0 || e_value.is_nan() {
        return 0.0;
    }
    let normalized = 1.0 / (1.0 + (-e_value.ln()).exp());
    normalized.clamp(0.0, 1.0)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Calibrator
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Copy, PartialEq, Eq)]
enum TestFamily {
    Permutation,
    Correlation,
    ChiSquare,
    TTest,
    General,
}

impl TestFamily {
    fn of(test_type: &str) -> Self {
        match test_type {
            "permutation_shredder" | "shredder" => Self::Permutation,
            "correlation_pearson" | "correlation_spearman" => Self::Correlation,
            "chisquare_test" => Self::ChiSquare,
            "ttest_two_sample" => Self::TTest,
            _ => Self::General,
        }
    }
}

/// Converts and combines evidence.
#[derive(Debug, Clone)]
pub struct EvidenceCalibrator {
    config: CalibrationConfig,
    history: Vec<CalibrationDatum>,
}

impl Default for EvidenceCalibrator {
    fn default() -> Self {
        Self::new(CalibrationConfig::default(), default_history())
    }
}

impl EvidenceCalibrator {
    pub fn new(config: CalibrationConfig, history: Vec<CalibrationDatum>) -> Self {
        Self { config, history }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    // ---------------------------------------------------------------------------
    // Conversion
    // ---------------------------------------------------------------------------

    /// Convert a p-value to a calibrated E-value. Non-increasing in `p` for a
    /// fixed test type.
    pub fn convert_p_value_to_e_value(&self, p: f64, test_type: &str, two_tailed: bool) -> EValue {
        let test_type = test_type.trim().to_ascii_lowercase();
        let raw = self.raw_from_p(p, TestFamily::of(&test_type), two_tailed);
        let value = raw * self.calibration_factor(&test_type);
        let (lower, upper) = self
            .bootstrap_bounds(&test_type, self.config.history_min_records)
            .unwrap_or((value * 0.5, value * 2.0));
        self.build(value, lower, upper, test_type)
    }

    fn raw_from_p(&self, p: f64, family: TestFamily, two_tailed: bool) -> f64 {
        let c = &self.config;
        if p.is_nan() || p >= 1.0 {
            return c.min_e_value;
        }
        if p <= 0.0 {
            return c.max_e_value;
        }
        let raw = match family {
            TestFamily::Permutation => c.permutation_scale / p,
            TestFamily::ChiSquare => 1.0 / p,
            TestFamily::Correlation | TestFamily::TTest | TestFamily::General => {
                if two_tailed && p > c.two_tailed_threshold {
                    1.0 / (2.0 * p)
                } else {
                    1.0 / p
                }
            }
        };
        raw.min(c.max_e_value)
    }

    /// Convert an FDR q-value (with its raw p-value for context) to an
    /// E-value. Bounds depend on sample size when history is thin.
    pub fn convert_q_value_to_e_value(
        &self,
        q: f64,
        p: f64,
        test_type: &str,
        sample_size: usize,
    ) -> EValue {
        let test_type = test_type.trim().to_ascii_lowercase();
        let raw = self.raw_from_q(q, p, TestFamily::of(&test_type));
        let value = raw * self.calibration_factor(&test_type);
        let (lower, upper) = self
            .bootstrap_bounds(&test_type, self.config.q_history_min_records)
            .unwrap_or_else(|| {
                let width = if sample_size > 1000 {
                    0.3
                } else if sample_size < 100 {
                    0.8
                } else {
                    0.5
                };
                (value * (1.0 - width), value * (1.0 + width))
            });
        self.build(value, lower, upper, test_type)
    }

    fn raw_from_q(&self, q: f64, p: f64, family: TestFamily) -> f64 {
        let c = &self.config;
        if q.is_nan() || q >= 1.0 {
            return c.min_e_value;
        }
        if q <= 0.0 {
            return c.max_e_value;
        }
        let mut raw = 1.0 / q;
        match family {
            // q-values are already corrected; strong signals are discounted.
            TestFamily::Permutation => {
                raw *= if q < 0.01 { 0.8 } else { c.permutation_scale };
            }
            TestFamily::Correlation => {
                if p / q > 10.0 {
                    raw *= 0.7;
                }
            }
            TestFamily::TTest => {
                if p < q * 2.0 {
                    raw *= 0.9;
                }
            }
            TestFamily::General => {
                if q < 0.05 && p > 0.01 {
                    raw *= 0.8;
                }
            }
            TestFamily::ChiSquare => {}
        }
        raw.min(c.max_e_value)
    }

    /// E-value for a referee outcome: the referee's own E-value when it
    /// reports one, otherwise the two-tailed conversion of its p-value keyed
    /// by gate name. A result without a p-value counts as minimal evidence.
    pub fn e_value_for_result(&self, result: &RefereeResult) -> EValue {
        let test_type = result.gate_name.trim().to_ascii_lowercase();
        match (result.e_value, result.p_value) {
            (Some(e), _) if e.is_finite() && e >= 0.0 => {
                let e = e.min(self.config.max_e_value);
                self.build(e, e * 0.5, e * 2.0, test_type)
            }
            (_, Some(p)) => self.convert_p_value_to_e_value(p, &test_type, true),
            _ => {
                let e = self.config.min_e_value;
                self.build(e, e * 0.5, e * 2.0, test_type)
            }
        }
    }

    fn build(&self, value: f64, lower: f64, upper: f64, test_type: String) -> EValue {
        EValue {
            value,
            normalized: normalize_to_unit(value),
            confidence: confidence_from_bounds(value, lower, upper),
            lower_bound: lower,
            upper_bound: upper,
            test_type,
            calculated_at: SystemTime::now(),
        }
    }

    // ---------------------------------------------------------------------------
    // History
    // ---------------------------------------------------------------------------

    fn history_for(&self, test_type: &str) -> Vec<&CalibrationDatum> {
        self.history
            .iter()
            .filter(|d| d.test_type == test_type)
            .collect()
    }

    /// Factor applied to raw E-values from how well past positive calls of
    /// this test type held up.
    pub fn calibration_factor(&self, test_type: &str) -> f64 {
        let data = self.history_for(test_type);
        if data.len() < self.config.history_min_records {
            return 1.0;
        }
        let positives: Vec<_> = data
            .iter()
            .filter(|d| d.e_value >= self.config.positive_call_e_value)
            .collect();
        if positives.is_empty() {
            return 1.0;
        }
        let tp_rate =
            positives.iter().filter(|d| d.true_positive).count() as f64 / positives.len() as f64;
        if tp_rate > 0.8 {
            0.9
        } else if tp_rate < 0.6 {
            1.1
        } else {
            1.0
        }
    }

    /// 95% percentile interval of bootstrap medians of historical E-values.
    /// `None` when the type has fewer than `min_records` records.
    fn bootstrap_bounds(&self, test_type: &str, min_records: usize) -> Option<(f64, f64)> {
        let data: Vec<f64> = self.history_for(test_type).iter().map(|d| d.e_value).collect();
        if data.len() < min_records || data.is_empty() {
            return None;
        }
        let mut rng = StdRng::seed_from_u64(self.config.bootstrap_seed);
        let resamples = self.config.bootstrap_resamples.max(1);
        let mut medians = Vec::with_capacity(resamples);
        let mut sample = vec![0.0; data.len()];
        for _ in 0..resamples {
            for slot in sample.iter_mut() {
                *slot = data[rng.random_range(0..data.len())];
            }
            sample.sort_by(f64::total_cmp);
            medians.push(sample[sample.len() / 2]);
        }
        medians.sort_by(f64::total_cmp);
        let at = |q: f64| medians[((q * resamples as f64) as usize).min(resamples - 1)];
        Some((at(0.025), at(0.975)))
    }

    // ---------------------------------------------------------------------------
    // Combination and decisions
    // ---------------------------------------------------------------------------

    /// Correlation between two test types; the table is read in both
    /// directions.
    pub fn correlation(&self, a: &str, b: &str) -> f64 {
        let lookup = |x: &str, y: &str| self.config.correlations.get(x).and_then(|row| row.get(y)).copied();
        lookup(a, b)
            .or_else(|| lookup(b, a))
            .unwrap_or(self.config.default_correlation)
    }

    /// Fold E-values with correlation discounting between neighbours, then
    /// normalize by the expected baseline for `test_count` tests.
    pub fn combine_evidence(&self, e_values: &[EValue], test_count: usize) -> EvidenceCombination {
        if e_values.is_empty() {
            return EvidenceCombination {
                combined_e_value: 1.0,
                raw_e_value: 1.0,
                normalized_e_value: normalize_to_unit(1.0),
                quality: HypothesisQuality::from_normalized(normalize_to_unit(1.0)),
                test_count: 0,
                correlation_factor: 1.0,
                confidence: 0.0,
                early_stop_eligible: false,
                verdict: Verdict::Inconclusive,
                individual_results: Vec::new(),
            };
        }

        let mut combined = e_values[0].value;
        let mut correlation_factor = 1.0;
        for pair in e_values.windows(2) {
            let corr = self.correlation(&pair[0].test_type, &pair[1].test_type);
            combined *= pair[1].value.powf((1.0 - corr).sqrt());
            correlation_factor *= 1.0 - corr;
        }

        let confidence = combined_confidence(e_values);
        let normalized_e = combined / self.config.baselines.for_test_count(test_count);
        let unit = normalize_to_unit(normalized_e);

        EvidenceCombination {
            combined_e_value: normalized_e,
            raw_e_value: combined,
            normalized_e_value: unit,
            quality: HypothesisQuality::from_normalized(unit),
            test_count: e_values.len(),
            correlation_factor,
            confidence,
            early_stop_eligible: self.check_early_stop_eligibility(normalized_e, e_values.len()),
            verdict: self.determine_verdict(normalized_e, test_count, confidence),
            individual_results: e_values.to_vec(),
        }
    }

    /// Baseline for `test_count`, scaled by confidence.
    pub fn dynamic_threshold(&self, test_count: usize, confidence: f64) -> f64 {
        let multiplier = if confidence >= 0.9 {
            0.8
        } else if confidence >= 0.7 {
            0.9
        } else if confidence < 0.5 {
            1.2
        } else {
            1.0
        };
        self.config.baselines.for_test_count(test_count) * multiplier
    }

    pub fn determine_verdict(&self, e: f64, test_count: usize, confidence: f64) -> Verdict {
        let threshold = self.dynamic_threshold(test_count, confidence);
        if e >= threshold * 2.0 {
            Verdict::Accepted
        } else if e <= 1.0 / threshold {
            Verdict::Rejected
        } else if confidence >= 0.8 && e >= threshold * 0.5 {
            Verdict::EarlyStop
        } else {
            Verdict::Inconclusive
        }
    }

    /// Very strong or very weak evidence may stop at once; otherwise a
    /// minimum number of tests must have run.
    pub fn check_early_stop_eligibility(&self, e: f64, tests_run: usize) -> bool {
        e >= self.config.early_stop_upper
            || e <= self.config.early_stop_lower
            || tests_run >= self.config.min_tests_for_early_stop
    }

    /// Verdict against the workspace's multiple-testing threshold.
    pub fn apply_workspace_threshold(
        &self,
        evidence: &EvidenceCombination,
        workspace: &WorkspaceState,
    ) -> Verdict {
        let mut multiplier = 1.0;
        if workspace.hypotheses_generated > 50 {
            multiplier = 1.2;
        }
        if workspace.global_alpha_spent > 0.5 {
            multiplier = 1.3;
        }
        let effective = workspace.threshold() * multiplier;
        let e = evidence.combined_e_value;

        if e >= effective * 2.0 {
            Verdict::Accepted
        } else if e <= 1.0 / effective {
            Verdict::Rejected
        } else if evidence.early_stop_eligible && e >= effective * 0.7 {
            Verdict::EarlyStop
        } else {
            Verdict::Inconclusive
        }
    }
}

fn confidence_from_bounds(value: f64, lower: f64, upper: f64) -> f64 {
    if upper <= lower || value <= 0.0 {
        return 0.0;
    }
    (1.0 - (upper - lower) / value).clamp(0.0, 1.0)
}

fn combined_confidence(e_values: &[EValue]) -> f64 {
    if e_values.is_empty() {
        return 0.0;
    }
    let avg = e_values.iter().map(|e| e.confidence).sum::<f64>() / e_values.len() as f64;
    avg * consistency_penalty(e_values)
}

// Coefficient of variation across values; disagreement lowers confidence.
fn consistency_penalty(e_values: &[EValue]) -> f64 {
    if e_values.len() <= 1 {
        return 1.0;
    }
    let n = e_values.len() as f64;
    let mean = e_values.iter().map(|e| e.value).sum::<f64>() / n;
    if mean == 0.0 {
        return 0.5;
    }
    let variance = e_values.iter().map(|e| (e.value - mean).powi(2)).sum::<f64>() / n;
    (1.0 - variance.sqrt() / mean).max(0.5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn calibrator() -> EvidenceCalibrator {
        EvidenceCalibrator::default()
    }

    fn ev(value: f64, test_type: &str, confidence: f64) -> EValue {
        EValue {
            value,
            normalized: normalize_to_unit(value),
            confidence,
            lower_bound: value * 0.5,
            upper_bound: value * 2.0,
            test_type: test_type.into(),
            calculated_at: SystemTime::now(),
        }
    }

    // ---------------------------------------------------------------------------
    // Conversion
    // ---------------------------------------------------------------------------

    #[test]
    fn sentinels() {
        let c = calibrator();
        assert_eq!(c.convert_p_value_to_e_value(0.0, "anything", true).value, 1000.0);
        assert_eq!(c.convert_p_value_to_e_value(-1.0, "shredder", false).value, 1000.0);
        assert_eq!(c.convert_p_value_to_e_value(1.0, "correlation_pearson", true).value, 0.001);
        assert_eq!(c.convert_p_value_to_e_value(f64::NAN, "x", true).value, 0.001);
    }

    #[test]
    fn family_rules() {
        let c = calibrator();
        let close = |a: f64, b: f64| (a - b).abs() < 1e-9;
        assert!(close(c.convert_p_value_to_e_value(0.01, "permutation_shredder", true).value, 100.0));
        assert!(close(c.convert_p_value_to_e_value(0.0001, "shredder", true).value, 1000.0));
        assert!(close(c.convert_p_value_to_e_value(0.5, "correlation_pearson", true).value, 1.0));
        assert!(close(c.convert_p_value_to_e_value(0.5, "correlation_pearson", false).value, 2.0));
        assert!(close(c.convert_p_value_to_e_value(0.5, "chisquare_test", true).value, 2.0));
        assert!(close(c.convert_p_value_to_e_value(0.4, "ttest_two_sample", true).value, 1.25));
        assert!(close(c.convert_p_value_to_e_value(0.1, "Wavelet_Coherence", true).value, 10.0));
    }

    #[test]
    fn monotone_in_p() {
        let c = calibrator();
        for test_type in [
            "permutation_shredder",
            "correlation_pearson",
            "chisquare_test",
            "ttest_two_sample",
            "transfer_entropy",
        ] {
            for two_tailed in [true, false] {
                let mut prev = f64::INFINITY;
                let mut p = 0.0005;
                while p < 1.0 {
                    let e = c.convert_p_value_to_e_value(p, test_type, two_tailed).value;
                    assert!(e <= prev + 1e-12, "{test_type} p={p}: {e} > {prev}");
                    prev = e;
                    p += 0.0037;
                }
            }
        }
    }

    #[test]
    fn thin_history_gives_conservative_bounds() {
        let c = calibrator();
        let e = c.convert_p_value_to_e_value(0.01, "permutation_shredder", true);
        assert_eq!(e.lower_bound, e.value * 0.5);
        assert_eq!(e.upper_bound, e.value * 2.0);
        assert_eq!(e.confidence, 0.0);
        assert!(e.normalized > 0.9);
    }

    fn rich_history(tp_rate: f64) -> Vec<CalibrationDatum> {
        (0..20)
            .map(|i| {
                let tp = (i as f64) < tp_rate * 20.0;
                CalibrationDatum::new("correlation_pearson", 0.01, 10.0 + i as f64, 0.02, tp, 0.8, 200)
            })
            .collect()
    }

    #[test]
    fn history_adjusts_factor() {
        let config = CalibrationConfig::default();
        let strict = EvidenceCalibrator::new(config.clone(), rich_history(0.9));
        assert_eq!(strict.calibration_factor("correlation_pearson"), 0.9);
        let loose = EvidenceCalibrator::new(config.clone(), rich_history(0.5));
        assert_eq!(loose.calibration_factor("correlation_pearson"), 1.1);
        let neutral = EvidenceCalibrator::new(config, rich_history(0.7));
        assert_eq!(neutral.calibration_factor("correlation_pearson"), 1.0);
    }

    #[test]
    fn bootstrap_bounds_are_reproducible() {
        let c = EvidenceCalibrator::new(CalibrationConfig::default(), rich_history(0.7));
        let a = c.convert_p_value_to_e_value(0.01, "correlation_pearson", true);
        let b = c.convert_p_value_to_e_value(0.01, "correlation_pearson", true);
        assert_eq!((a.lower_bound, a.upper_bound), (b.lower_bound, b.upper_bound));
        assert!(a.lower_bound <= a.upper_bound);
        assert!(a.lower_bound >= 10.0 && a.upper_bound <= 29.0);
    }

    #[test]
    fn q_value_rules() {
        let c = calibrator();
        let close = |a: f64, b: f64| (a - b).abs() < 1e-9;
        assert!(close(c.convert_q_value_to_e_value(0.005, 0.001, "shredder", 500).value, 160.0));
        assert!(close(c.convert_q_value_to_e_value(0.02, 0.5, "correlation_pearson", 500).value, 35.0));
        assert!(close(c.convert_q_value_to_e_value(0.1, 0.15, "ttest_two_sample", 500).value, 9.0));
        assert!(close(c.convert_q_value_to_e_value(0.04, 0.02, "other", 500).value, 20.0));
        assert_eq!(c.convert_q_value_to_e_value(0.0, 0.0, "other", 500).value, 1000.0);
        assert_eq!(c.convert_q_value_to_e_value(1.0, 1.0, "other", 500).value, 0.001);
    }

    #[test]
    fn q_value_bounds_scale_with_sample_size() {
        let c = calibrator();
        let big = c.convert_q_value_to_e_value(0.1, 0.1, "chisquare_test", 5000);
        assert!((big.lower_bound - 7.0).abs() < 1e-9 && (big.upper_bound - 13.0).abs() < 1e-9);
        let small = c.convert_q_value_to_e_value(0.1, 0.1, "chisquare_test", 50);
        assert!((small.lower_bound - 2.0).abs() < 1e-9);
        assert!(big.confidence > small.confidence);
    }

    #[test]
    fn result_e_value_preferred() {
        let c = calibrator();
        let mut r = RefereeResult::failed("Permutation_Shredder", "x");
        assert_eq!(c.e_value_for_result(&r).value, 0.001);
        r.p_value = Some(0.01);
        assert!((c.e_value_for_result(&r).value - 100.0).abs() < 1e-9);
        r.e_value = Some(0.05);
        assert_eq!(c.e_value_for_result(&r).value, 0.05);
    }

    #[test]
    fn normalize_and_quality() {
        assert_eq!(normalize_to_unit(0.0), 0.0);
        assert!((normalize_to_unit(1.0) - 0.5).abs() < 1e-12);
        assert!(normalize_to_unit(100.0) > 0.99);
        assert_eq!(HypothesisQuality::from_normalized(0.85), HypothesisQuality::VeryStrong);
        assert_eq!(HypothesisQuality::from_normalized(0.45), HypothesisQuality::Moderate);
        assert_eq!(HypothesisQuality::from_normalized(0.1), HypothesisQuality::VeryWeak);
        assert_eq!(HypothesisQuality::VeryStrong.to_string(), "Very Strong");
    }

    // ---------------------------------------------------------------------------
    // Combination
    // ---------------------------------------------------------------------------

    #[test]
    fn empty_combination() {
        let r = calibrator().combine_evidence(&[], 0);
        assert_eq!(r.combined_e_value, 1.0);
        assert_eq!(r.verdict, Verdict::Inconclusive);
        assert_eq!(r.test_count, 0);
    }

    #[test]
    fn fully_correlated_pair_reduces_to_first() {
        let mut config = CalibrationConfig::default();
        config.correlations = BTreeMap::from([(
            "a".to_string(),
            BTreeMap::from([("b".to_string(), 1.0)]),
        )]);
        let c = EvidenceCalibrator::new(config, Vec::new());
        let r = c.combine_evidence(&[ev(12.0, "a", 0.5), ev(40.0, "b", 0.5)], 2);
        assert!((r.raw_e_value - 12.0).abs() < 1e-12);
        assert_eq!(r.correlation_factor, 0.0);
        assert!((r.combined_e_value - 12.0 / 8.0).abs() < 1e-12);
    }

    #[test]
    fn correlation_lookup_is_symmetric() {
        let c = calibrator();
        assert_eq!(c.correlation("correlation_spearman", "correlation_pearson"), 0.8);
        assert_eq!(c.correlation("correlation_pearson", "correlation_spearman"), 0.8);
        assert_eq!(c.correlation("x", "y"), 0.1);
    }

    #[test]
    fn default_correlation_discounts() {
        let c = calibrator();
        let r = c.combine_evidence(&[ev(10.0, "x", 1.0), ev(10.0, "y", 1.0)], 2);
        let expected = 10.0 * 10f64.powf(0.9f64.sqrt());
        assert!((r.raw_e_value - expected).abs() < 1e-9);
        assert!((r.correlation_factor - 0.9).abs() < 1e-12);
        // Identical values: no consistency penalty.
        assert!((r.confidence - 1.0).abs() < 1e-12);
        assert!(r.early_stop_eligible);
    }

    #[test]
    fn consistency_penalty_floor() {
        let c = calibrator();
        let r = c.combine_evidence(&[ev(0.01, "x", 1.0), ev(100.0, "y", 1.0)], 2);
        assert!((r.confidence - 0.5).abs() < 1e-12);
    }

    #[test]
    fn verdict_thresholds() {
        let c = calibrator();
        // One test, confidence 0.95: threshold 20 * 0.8 = 16.
        assert_eq!(c.determine_verdict(33.0, 1, 0.95), Verdict::Accepted);
        assert_eq!(c.determine_verdict(0.05, 1, 0.95), Verdict::Rejected);
        assert_eq!(c.determine_verdict(9.0, 1, 0.95), Verdict::EarlyStop);
        assert_eq!(c.determine_verdict(8.0, 1, 0.3), Verdict::Inconclusive);
        assert!((c.dynamic_threshold(5, 0.6) - 4.0).abs() < 1e-12);
        assert!((c.dynamic_threshold(2, 0.75) - 7.2).abs() < 1e-12);
    }

    #[test]
    fn early_stop_rules() {
        let c = calibrator();
        assert!(c.check_early_stop_eligibility(15.0, 1));
        assert!(c.check_early_stop_eligibility(0.1, 1));
        assert!(!c.check_early_stop_eligibility(1.0, 1));
        assert!(c.check_early_stop_eligibility(1.0, 2));
    }

    // ---------------------------------------------------------------------------
    // Workspace
    // ---------------------------------------------------------------------------

    #[test]
    fn workspace_threshold_grows() {
        assert_eq!(WorkspaceState::default().threshold(), 8.0);
        let ws = WorkspaceState {
            hypotheses_generated: 20,
            global_alpha_spent: 0.9,
        };
        assert!((ws.threshold() - 24.0).abs() < 1e-12);
    }

    #[test]
    fn workspace_verdicts() {
        let c = calibrator();
        let mut combo = c.combine_evidence(&[ev(10.0, "x", 1.0)], 1);
        let fresh = WorkspaceState::default();

        combo.combined_e_value = 16.0;
        assert_eq!(c.apply_workspace_threshold(&combo, &fresh), Verdict::Accepted);
        combo.combined_e_value = 0.1;
        assert_eq!(c.apply_workspace_threshold(&combo, &fresh), Verdict::Rejected);
        combo.combined_e_value = 6.0;
        combo.early_stop_eligible = true;
        assert_eq!(c.apply_workspace_threshold(&combo, &fresh), Verdict::EarlyStop);
        combo.early_stop_eligible = false;
        assert_eq!(c.apply_workspace_threshold(&combo, &fresh), Verdict::Inconclusive);

        // 60 hypotheses and alpha 0.6: 8 * 4 * 1.3 = 41.6.
        let busy = WorkspaceState {
            hypotheses_generated: 60,
            global_alpha_spent: 0.6,
        };
        combo.combined_e_value = 80.0;
        assert_eq!(c.apply_workspace_threshold(&combo, &busy), Verdict::Inconclusive);
        combo.combined_e_value = 84.0;
        assert_eq!(c.apply_workspace_threshold(&combo, &busy), Verdict::Accepted);
    }
}
