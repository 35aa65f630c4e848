//! # refgate-core
//!
//! **Every hypothesis has to get past the referees.**
//!
//! `refgate-core` orchestrates independent falsification tests ("referees")
//! against candidate relationships between two numeric series, then turns
//! their p-values into calibrated E-values and a verdict.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use refgate_core::{
//!     CancellationToken, DataPair, EngineConfig, EvidenceCalibrator, LogBroadcaster,
//!     PhaseValidationEngine, RefereeCategory, RefereeRegistry, SelectedTest,
//! };
//!
//! # async fn run(registry: RefereeRegistry) -> refgate_core::Result<()> {
//! let engine = PhaseValidationEngine::new(
//!     EngineConfig::default(),
//!     Arc::new(registry),
//!     Arc::new(EvidenceCalibrator::default()),
//!     Arc::new(LogBroadcaster),
//! );
//! engine.start();
//!
//! let x: Vec<f64> = (0..100).map(f64::from).collect();
//! let y = x.iter().map(|v| 2.0 * v + 1.0).collect();
//! let battery = [SelectedTest::new("Permutation_Shredder", RefereeCategory::StatisticalIntegrity)];
//! let summary = engine
//!     .execute_adaptive_validation(
//!         "h-1",
//!         &battery,
//!         &DataPair::new(x, y)?,
//!         "session",
//!         &CancellationToken::new(),
//!     )
//!     .await?;
//! println!("overall E = {:.2} ({})", summary.overall_e_value, summary.evidence.verdict);
//! engine.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! Battery → phase queues → weighted capacity pools → referees → E-values → verdict
//!
//! - [`WeightedCapacityPool`]: async semaphore where each job charges its cost.
//! - [`RefereeRegistry`]: name → factory plus cost, timeout and category.
//! - [`ConcurrentRefereeExecutor`]: runs a battery concurrently, one result
//!   per name, in input order. Panics and timeouts become failed results.
//! - [`StabilitySelector`]: repeats a battery on bootstrap subsamples and
//!   keeps the referees that pass often enough.
//! - [`PhaseValidationEngine`]: integrity, then causality, then complexity,
//!   stopping early when integrity evidence is too weak.
//! - [`EvidenceCalibrator`]: p/q → E conversion, correlation-aware
//!   combination and verdicts.

pub mod broadcast;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod evidence;
pub mod executor;
pub mod pool;
pub mod referee;
pub mod registry;
pub mod stability;

pub use broadcast::{LogBroadcaster, NoopBroadcaster, UiBroadcaster};
pub use config::{Baselines, CalibrationConfig, EngineConfig, RefgateConfig, StabilityConfig};
pub use data::{DataPair, MIN_OBSERVATIONS, validate_data};
pub use engine::{
    HypothesisOutcome, HypothesisRequest, Job, JobTicket, PhaseResult, PhaseValidationEngine,
    SelectedTest, TestResult, ValidationSummary,
};
pub use error::{
    BroadcastError, ConfigError, EngineError, PoolError, RefgateError, RegistryError, Result,
};
pub use evidence::{
    CalibrationDatum, EValue, EvidenceCalibrator, EvidenceCombination, HypothesisQuality,
    Verdict, WorkspaceState, default_history, normalize_to_unit,
};
pub use executor::{ConcurrentRefereeExecutor, RefereeRun, RunLimits, run_referee};
pub use pool::{CapacityPermit, WeightedCapacityPool};
pub use referee::{
    DiscoveryEvidence, Metadata, Phase, Referee, RefereeCategory, RefereeResult, TriGateResult,
    default_audit_evidence, evaluate_tri_gate,
};
pub use registry::{RefereeDescriptor, RefereeFactory, RefereeRegistry};
pub use stability::{RefereeStability, StabilityResult, StabilitySelector};
pub use tokio_util::sync::CancellationToken;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
