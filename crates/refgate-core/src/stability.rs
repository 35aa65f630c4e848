//! Stability selection.
//!
//! Re-runs a referee battery on bootstrap subsamples and reports how often
//! each referee passes. A referee whose verdict flips with the sample is not
//! trusted even if it passed on the full data.
//!
//! Subsamples are drawn with replacement from one seeded [`StdRng`] before
//! any trial runs; the trials then execute concurrently through a private
//! [`ConcurrentRefereeExecutor`]. A subsample never has fewer than
//! [`MIN_OBSERVATIONS`] points, so small inputs still reach the referees.

use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::StabilityConfig;
use crate::data::{DataPair, MIN_OBSERVATIONS, validate_data};
use crate::error::{RefgateError, Result};
use crate::executor::{ConcurrentRefereeExecutor, panic_message};
use crate::referee::RefereeResult;
use crate::registry::RefereeRegistry;

/// Per-referee pass rate across subsamples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefereeStability {
    pub referee_name: String,
    /// Fraction of subsamples on which the referee passed.
    pub stability_score: f64,
    pub pass_count: usize,
    pub is_stable: bool,
}

/// Outcome of a stability run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityResult {
    pub subsample_count: usize,
    /// One entry per referee, in input order.
    pub referee_stability: Vec<RefereeStability>,
    /// Fraction of referees that are stable.
    pub overall_stability: f64,
    pub stable_referees: Vec<String>,
    pub unstable_referees: Vec<String>,
    pub referee_names: Vec<String>,
    /// Raw results of every trial, `subsample_results[trial][referee]`.
    pub subsample_results: Vec<Vec<RefereeResult>>,
    pub stability_threshold: f64,
    pub min_stable_subsamples: usize,
}

/// Runs batteries on bootstrap subsamples.
pub struct StabilitySelector {
    executor: Arc<ConcurrentRefereeExecutor>,
    config: StabilityConfig,
}

impl StabilitySelector {
    /// Out-of-range settings are replaced with defaults here, once.
    pub fn new(registry: Arc<RefereeRegistry>, config: StabilityConfig) -> Self {
        let config = config.resolved();
        Self {
            executor: Arc::new(ConcurrentRefereeExecutor::new(
                registry,
                config.executor_capacity,
            )),
            config,
        }
    }

    pub fn config(&self) -> &StabilityConfig {
        &self.config
    }

    pub async fn validate_with_stability<S: AsRef<str>>(
        &self,
        names: &[S],
        data: &DataPair,
    ) -> Result<StabilityResult> {
        validate_data(&data.x, &data.y)?;

        let names: Vec<String> = names.iter().map(|n| n.as_ref().to_string()).collect();
        let count = self.config.subsample_count;
        let size = subsample_size(data.len(), self.config.subsample_fraction);

        let mut rng = self.rng();
        let subsamples: Vec<DataPair> = (0..count)
            .map(|_| draw_subsample(data, size, &mut rng))
            .collect();

        log::info!(
            "stability selection: {} referees x {count} subsamples of {size}",
            names.len()
        );

        // Trials still queued when this future is dropped never start.
        let cancel = CancellationToken::new();
        let _cancel_trials = cancel.clone().drop_guard();

        let mut trials = JoinSet::new();
        let mut trial_of = HashMap::new();
        for (trial, subsample) in subsamples.into_iter().enumerate() {
            let executor = Arc::clone(&self.executor);
            let names = names.clone();
            let cancel = cancel.clone();
            let handle = trials.spawn(async move {
                let results = executor
                    .execute_referees(&names[..], Arc::new(subsample), &cancel)
                    .await;
                (trial, results)
            });
            trial_of.insert(handle.id(), trial);
        }

        let mut subsample_results: Vec<Vec<RefereeResult>> = vec![Vec::new(); count];
        while let Some(joined) = trials.join_next().await {
            match joined {
                Ok((trial, Ok(results))) => subsample_results[trial] = results,
                Ok((trial, Err(err))) => {
                    return Err(RefgateError::TrialFailed {
                        trial,
                        reason: err.to_string(),
                    });
                }
                Err(err) => {
                    let trial = trial_of.get(&err.id()).copied().unwrap_or_default();
                    let reason = if err.is_panic() {
                        panic_message(err.into_panic())
                    } else {
                        err.to_string()
                    };
                    return Err(RefgateError::TrialFailed { trial, reason });
                }
            }
        }

        Ok(self.aggregate(names, subsample_results))
    }

    fn aggregate(&self, names: Vec<String>, subsample_results: Vec<Vec<RefereeResult>>) -> StabilityResult {
        let count = subsample_results.len();
        let threshold = self.config.stability_threshold;

        let referee_stability: Vec<RefereeStability> = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let pass_count = subsample_results
                    .iter()
                    .filter(|trial| trial.get(i).is_some_and(|r| r.passed))
                    .count();
                let stability_score = if count == 0 {
                    0.0
                } else {
                    pass_count as f64 / count as f64
                };
                RefereeStability {
                    referee_name: name.clone(),
                    stability_score,
                    pass_count,
                    is_stable: stability_score >= threshold,
                }
            })
            .collect();

        let (stable_referees, unstable_referees): (Vec<String>, Vec<String>) = {
            let (stable, unstable): (Vec<_>, Vec<_>) =
                referee_stability.iter().partition(|r| r.is_stable);
            (
                stable.into_iter().map(|r| r.referee_name.clone()).collect(),
                unstable.into_iter().map(|r| r.referee_name.clone()).collect(),
            )
        };
        let overall_stability = if referee_stability.is_empty() {
            0.0
        } else {
            stable_referees.len() as f64 / referee_stability.len() as f64
        };

        StabilityResult {
            subsample_count: count,
            overall_stability,
            stable_referees,
            unstable_referees,
            referee_stability,
            referee_names: names,
            subsample_results,
            stability_threshold: threshold,
            min_stable_subsamples: (count as f64 * threshold) as usize,
        }
    }

    fn rng(&self) -> StdRng {
        if let Some(seed) = self.config.seed {
            return StdRng::seed_from_u64(seed);
        }
        let mut seed = [0u8; 32];
        match getrandom::fill(&mut seed) {
            Ok(()) => StdRng::from_seed(seed),
            Err(err) => {
                log::warn!("getrandom failed ({err}); seeding from thread rng");
                StdRng::from_rng(&mut rand::rng())
            }
        }
    }
}

/// `floor(n * fraction)`, raised to [`MIN_OBSERVATIONS`].
fn subsample_size(n: usize, fraction: f64) -> usize {
    ((n as f64 * fraction) as usize).max(MIN_OBSERVATIONS)
}

/// Draw `size` index pairs uniformly with replacement.
fn draw_subsample(data: &DataPair, size: usize, rng: &mut StdRng) -> DataPair {
    let n = data.len();
    let mut x = Vec::with_capacity(size);
    let mut y = Vec::with_capacity(size);
    for _ in 0..size {
        let i = rng.random_range(0..n);
        x.push(data.x[i]);
        y.push(data.y[i]);
    }
    DataPair { x, y }
}
