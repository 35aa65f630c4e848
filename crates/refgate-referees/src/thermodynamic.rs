//! Algorithmic complexity: does knowing `x` make `y` cheaper to describe?
//!
//! `y` and the residuals of the linear fit on `x` are quantised on the same
//! grid and zlib-compressed. A real law leaves small residuals that compress
//! far better than `y` itself. Significance comes from re-running the
//! comparison with `x` shuffled.

use std::io::Write;

use flate2::Compression;
use flate2::write::ZlibEncoder;
use rand::seq::SliceRandom;
use refgate_core::{Metadata, Referee, RefereeResult};
use serde::{Deserialize, Serialize};

use crate::insufficient;
use crate::stats::{linear_fit, rng_from};

pub const NAME: &str = "Algorithmic_Complexity";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplexityConfig {
    /// Minimum fractional reduction in compressed size.
    pub compression_gain: f64,
    /// Quantisation levels spanning the range of `y`.
    pub levels: usize,
    pub null_shuffles: usize,
    pub alpha: f64,
    pub seed: Option<u64>,
}

impl Default for ComplexityConfig {
    fn default() -> Self {
        Self {
            compression_gain: 0.20,
            levels: 256,
            null_shuffles: 99,
            alpha: 0.05,
            seed: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AlgorithmicComplexity {
    config: ComplexityConfig,
}

impl AlgorithmicComplexity {
    pub fn new(config: ComplexityConfig) -> Self {
        let defaults = ComplexityConfig::default();
        Self {
            config: ComplexityConfig {
                compression_gain: if config.compression_gain > 0.0 && config.compression_gain < 1.0 {
                    config.compression_gain
                } else {
                    defaults.compression_gain
                },
                levels: config.levels.clamp(2, 256),
                null_shuffles: if config.null_shuffles == 0 {
                    defaults.null_shuffles
                } else {
                    config.null_shuffles
                },
                alpha: if config.alpha > 0.0 && config.alpha < 1.0 {
                    config.alpha
                } else {
                    defaults.alpha
                },
                seed: config.seed,
            },
        }
    }

    pub fn config(&self) -> &ComplexityConfig {
        &self.config
    }

    /// Fractional size reduction of the residuals relative to `y`.
    pub fn compression_gain(&self, x: &[f64], y: &[f64]) -> f64 {
        let (lo, hi) = y
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let span = hi - lo;
        if !span.is_finite() || span <= 0.0 {
            return 0.0;
        }
        let width = span / self.config.levels as f64;

        let (slope, intercept) = linear_fit(x, y);
        let residuals: Vec<f64> = x
            .iter()
            .zip(y)
            .map(|(a, b)| b - (slope * a + intercept))
            .collect();

        let base = compressed_len(&quantise(y, width));
        let explained = compressed_len(&quantise(&residuals, width));
        if base == 0 {
            return 0.0;
        }
        1.0 - explained as f64 / base as f64
    }
}

impl Default for AlgorithmicComplexity {
    fn default() -> Self {
        Self::new(ComplexityConfig::default())
    }
}

fn quantise(values: &[f64], width: f64) -> Vec<u8> {
    let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
    values
        .iter()
        .map(|v| ((v - lo) / width).floor().clamp(0.0, 255.0) as u8)
        .collect()
}

fn compressed_len(bytes: &[u8]) -> usize {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    if let Err(err) = encoder.write_all(bytes) {
        log::warn!("compression failed: {err}");
        return bytes.len();
    }
    match encoder.finish() {
        Ok(out) => out.len(),
        Err(err) => {
            log::warn!("compression failed: {err}");
            bytes.len()
        }
    }
}

impl Referee for AlgorithmicComplexity {
    fn name(&self) -> &str {
        NAME
    }

    fn execute(&self, x: &[f64], y: &[f64], _metadata: &Metadata) -> RefereeResult {
        if let Err(err) = refgate_core::validate_data(x, y) {
            return insufficient(NAME, err);
        }

        let observed = self.compression_gain(x, y);
        let mut rng = rng_from(self.config.seed);
        let mut shuffled = x.to_vec();
        let mut as_good = 0usize;
        for _ in 0..self.config.null_shuffles {
            shuffled.shuffle(&mut rng);
            if self.compression_gain(&shuffled, y) >= observed {
                as_good += 1;
            }
        }
        let p = (as_good + 1) as f64 / (self.config.null_shuffles + 1) as f64;

        let required = self.config.compression_gain;
        let passed = observed >= required && p <= self.config.alpha;
        let failure_reason = if passed {
            String::new()
        } else if observed < required {
            format!(
                "NO COMPRESSION: knowing x shortens y by {:.1}% (need {:.0}%). \
                 The relationship does not describe the data better than noise.",
                observed * 100.0,
                required * 100.0
            )
        } else {
            format!(
                "UNSTABLE COMPRESSION: gain {:.1}% is matched by shuffled data (p={p:.3}).",
                observed * 100.0
            )
        };

        RefereeResult {
            gate_name: NAME.to_string(),
            passed,
            statistic: observed,
            p_value: Some(p),
            e_value: None,
            standard_used: format!(
                "zlib compression gain >= {:.0}% ({} levels, {} shuffles)",
                required * 100.0,
                self.config.levels,
                self.config.null_shuffles
            ),
            failure_reason,
        }
    }
}
