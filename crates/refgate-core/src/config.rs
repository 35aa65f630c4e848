//! Immutable configuration for the engine, calibrator and stability selector.
//!
//! Every struct has a `Default` matching the production constants and
//! deserializes with `#[serde(default)]`, so a JSON file only needs the
//! fields it overrides. Durations are written as seconds.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

fn check_positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { field, value })
    }
}

fn check_unit(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfUnitRange { field, value })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Engine
// ═══════════════════════════════════════════════════════════════════════════════

/// Phase engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub integrity_capacity: usize,
    pub causality_capacity: usize,
    pub complexity_capacity: usize,
    /// Buffered jobs per phase queue.
    pub queue_capacity: usize,
    #[serde(with = "duration_secs")]
    pub phase_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub shutdown_timeout: Duration,
    /// Minimum combined integrity E-value to continue past phase 0.
    pub integrity_gate: f64,
    /// Weights of the integrity, causality and complexity phases in the
    /// overall E-value.
    pub phase_weights: [f64; 3],
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            integrity_capacity: 10,
            causality_capacity: 5,
            complexity_capacity: 2,
            queue_capacity: 100,
            phase_timeout: Duration::from_secs(5 * 60),
            shutdown_timeout: Duration::from_secs(30),
            integrity_gate: 0.1,
            phase_weights: [0.5, 0.3, 0.2],
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_positive("integrity_capacity", self.integrity_capacity as f64)?;
        check_positive("causality_capacity", self.causality_capacity as f64)?;
        check_positive("complexity_capacity", self.complexity_capacity as f64)?;
        check_positive("queue_capacity", self.queue_capacity as f64)?;
        check_positive("phase_timeout", self.phase_timeout.as_secs_f64())?;
        if self.phase_weights.iter().any(|w| *w < 0.0) {
            return Err(ConfigError::NegativeWeight);
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Calibration
// ═══════════════════════════════════════════════════════════════════════════════

/// Expected E-value of an uninformative battery, by number of tests.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Baselines {
    /// One test.
    pub single: f64,
    /// Two or three tests.
    pub few: f64,
    /// Four to six tests.
    pub several: f64,
    /// More than six tests.
    pub many: f64,
}

impl Default for Baselines {
    fn default() -> Self {
        Self {
            single: 20.0,
            few: 8.0,
            several: 4.0,
            many: 2.5,
        }
    }
}

impl Baselines {
    pub fn for_test_count(&self, test_count: usize) -> f64 {
        match test_count {
            0 | 1 => self.single,
            2..=3 => self.few,
            4..=6 => self.several,
            _ => self.many,
        }
    }
}

/// Evidence calibrator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Two-tailed p-values above this are converted conservatively.
    pub two_tailed_threshold: f64,
    pub permutation_scale: f64,
    /// E-value for p <= 0 and the cap on every raw conversion.
    pub max_e_value: f64,
    /// E-value for p >= 1 and for results without a p-value.
    pub min_e_value: f64,
    /// Pairwise correlation between test types. Looked up in both directions.
    pub correlations: BTreeMap<String, BTreeMap<String, f64>>,
    pub default_correlation: f64,
    pub baselines: Baselines,
    /// Combined E-value at or above which a decision may stop early.
    pub early_stop_upper: f64,
    /// Combined E-value at or below which a decision may stop early.
    pub early_stop_lower: f64,
    pub min_tests_for_early_stop: usize,
    /// Records needed before history adjusts an E-value.
    pub history_min_records: usize,
    /// Records needed before q-value bounds use the bootstrap.
    pub q_history_min_records: usize,
    /// History E-value counted as a positive call.
    pub positive_call_e_value: f64,
    pub bootstrap_resamples: usize,
    pub bootstrap_seed: u64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            two_tailed_threshold: 0.25,
            permutation_scale: 1.0,
            max_e_value: 1000.0,
            min_e_value: 0.001,
            correlations: default_correlations(),
            default_correlation: 0.1,
            baselines: Baselines::default(),
            early_stop_upper: 15.0,
            early_stop_lower: 0.15,
            min_tests_for_early_stop: 2,
            history_min_records: 10,
            q_history_min_records: 5,
            positive_call_e_value: 5.0,
            bootstrap_resamples: 1000,
            bootstrap_seed: 0x5EED_CA1B,
        }
    }
}

fn default_correlations() -> BTreeMap<String, BTreeMap<String, f64>> {
    let table: [(&str, &[(&str, f64)]); 3] = [
        (
            "permutation_shredder",
            &[
                ("shredder", 0.9),
                ("bootstrap_validation", 0.7),
                ("correlation_pearson", 0.2),
            ],
        ),
        (
            "correlation_pearson",
            &[("correlation_spearman", 0.8), ("transfer_entropy", 0.4)],
        ),
        (
            "transfer_entropy",
            &[("directional_causality", 0.9), ("ccm", 0.6)],
        ),
    ];
    table
        .iter()
        .map(|(from, row)| {
            let row = row.iter().map(|(to, c)| (to.to_string(), *c)).collect();
            (from.to_string(), row)
        })
        .collect()
}

impl CalibrationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_positive("max_e_value", self.max_e_value)?;
        check_positive("min_e_value", self.min_e_value)?;
        check_positive("permutation_scale", self.permutation_scale)?;
        check_unit("two_tailed_threshold", self.two_tailed_threshold)?;
        check_positive("bootstrap_resamples", self.bootstrap_resamples as f64)?;
        for row in self.correlations.values() {
            for c in row.values() {
                if !(0.0..=1.0).contains(c) {
                    return Err(ConfigError::OutOfUnitRange {
                        field: "correlations",
                        value: *c,
                    });
                }
            }
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Stability
// ═══════════════════════════════════════════════════════════════════════════════

/// Stability selector settings. Invalid values fall back to the defaults
/// when the selector is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    pub subsample_count: usize,
    /// Subsample size as a fraction of the input length.
    pub subsample_fraction: f64,
    /// Pass rate a referee needs to count as stable.
    pub stability_threshold: f64,
    /// Fixed RNG seed; OS entropy when absent.
    pub seed: Option<u64>,
    /// Capacity of the selector's private executor.
    pub executor_capacity: usize,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            subsample_count: 10,
            subsample_fraction: 0.8,
            stability_threshold: 0.8,
            seed: None,
            executor_capacity: 50,
        }
    }
}

impl StabilityConfig {
    /// Replace out-of-range values with defaults.
    pub fn resolved(&self) -> Self {
        let d = Self::default();
        Self {
            subsample_count: if self.subsample_count == 0 {
                d.subsample_count
            } else {
                self.subsample_count
            },
            subsample_fraction: if check_unit("subsample_fraction", self.subsample_fraction).is_ok() {
                self.subsample_fraction
            } else {
                d.subsample_fraction
            },
            stability_threshold: if check_unit("stability_threshold", self.stability_threshold)
                .is_ok()
            {
                self.stability_threshold
            } else {
                d.stability_threshold
            },
            seed: self.seed,
            executor_capacity: if self.executor_capacity == 0 {
                d.executor_capacity
            } else {
                self.executor_capacity
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// File format
// ═══════════════════════════════════════════════════════════════════════════════

/// All settings in one document, as read from a JSON config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefgateConfig {
    pub engine: EngineConfig,
    pub calibration: CalibrationConfig,
    pub stability: StabilityConfig,
}

impl RefgateConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(text: &str) -> Result<Self, crate::RefgateError> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| crate::RefgateError::InvalidData(format!("config: {e}")))?;
        config.engine.validate()?;
        config.calibration.validate()?;
        Ok(config)
    }
}

pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
