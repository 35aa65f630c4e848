//! Phase-gated validation engine.
//!
//! Architecture:
//! 1. Each phase (integrity, causality, complexity) owns a bounded job queue,
//!    a dispatcher task and a weighted capacity pool
//! 2. Jobs are routed to their phase queue when submitted
//! 3. The dispatcher spawns one worker per job; the pool limits how many run
//! 4. Workers answer on the job's ticket and report to a single aggregator
//!    that tracks active jobs
//! 5. `execute_adaptive_validation` drives the phases in order and stops
//!    after integrity if its combined E-value misses the gate
//! 6. Every submission carries a cancellation token: a cancelled or dropped
//!    validation stops its queued jobs before they reach the pool

use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::broadcast::UiBroadcaster;
use crate::config::{EngineConfig, duration_secs};
use crate::data::{DataPair, validate_data};
use crate::error::{EngineError, Result};
use crate::evidence::{EValue, EvidenceCalibrator, EvidenceCombination};
use crate::executor::{RunLimits, log_run, panic_message, run_referee};
use crate::pool::WeightedCapacityPool;
use crate::referee::{Metadata, Phase, RefereeCategory, RefereeResult};
use crate::registry::RefereeRegistry;

// ═══════════════════════════════════════════════════════════════════════════════
// Data model
// ═══════════════════════════════════════════════════════════════════════════════

/// One entry of a validation battery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedTest {
    pub referee_name: String,
    pub category: RefereeCategory,
}

impl SelectedTest {
    pub fn new(referee_name: impl Into<String>, category: RefereeCategory) -> Self {
        Self {
            referee_name: referee_name.into(),
            category,
        }
    }

    pub fn phase(&self) -> Phase {
        self.category.phase()
    }
}

/// A single referee execution request. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub hypothesis_id: String,
    pub session_id: String,
    pub test_name: String,
    pub phase: Phase,
    /// Capacity units charged while running (at least 1).
    pub compute_weight: usize,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    pub created_at: SystemTime,
}

impl Job {
    /// Build a job whose weight and timeout come from the registry.
    pub fn for_test(
        registry: &RefereeRegistry,
        hypothesis_id: &str,
        session_id: &str,
        test: &SelectedTest,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            hypothesis_id: hypothesis_id.to_string(),
            session_id: session_id.to_string(),
            test_name: test.referee_name.clone(),
            phase: test.phase(),
            compute_weight: registry.cost_of(&test.referee_name).max(1),
            timeout: registry.timeout_of(&test.referee_name),
            created_at: SystemTime::now(),
        }
    }
}

/// Outcome of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub job: Job,
    pub result: RefereeResult,
    pub e_value: EValue,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    /// Set when the job never produced a referee verdict.
    pub error: Option<String>,
    pub started_at: SystemTime,
    pub ended_at: SystemTime,
}

/// All results of one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase: Phase,
    /// In submission order.
    pub test_results: Vec<TestResult>,
    /// Arithmetic mean of the per-test E-values.
    pub combined_e_value: f64,
    pub evidence: EvidenceCombination,
    pub started_at: SystemTime,
    pub completed_at: SystemTime,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
}

/// Result of validating one hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub hypothesis_id: String,
    pub session_id: String,
    pub phase_results: BTreeMap<Phase, PhaseResult>,
    /// Phase-weighted sum of the executed phases' combined E-values.
    pub overall_e_value: f64,
    /// Calibrated combination across every executed test.
    pub evidence: EvidenceCombination,
    pub early_termination: bool,
    pub termination_reason: Option<String>,
    pub started_at: SystemTime,
    pub completed_at: SystemTime,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
}

impl ValidationSummary {
    /// Every test result, phase by phase.
    pub fn test_results(&self) -> impl Iterator<Item = &TestResult> {
        self.phase_results.values().flat_map(|p| p.test_results.iter())
    }
}

/// Handle to a submitted job's result.
#[derive(Debug)]
pub struct JobTicket {
    pub job_id: Uuid,
    receiver: oneshot::Receiver<TestResult>,
}

impl JobTicket {
    /// Wait for the result. Fails if the engine stopped first.
    pub async fn wait(self) -> std::result::Result<TestResult, EngineError> {
        self.receiver.await.map_err(|_| EngineError::Cancelled)
    }
}

/// Input for batch validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HypothesisRequest {
    pub hypothesis_id: String,
    pub session_id: String,
    pub battery: Vec<SelectedTest>,
    pub data: DataPair,
}

/// Per-hypothesis outcome of a batch.
#[derive(Debug, Clone, Serialize)]
pub enum HypothesisOutcome {
    Completed(Box<ValidationSummary>),
    Failed { hypothesis_id: String, reason: String },
}

// ═══════════════════════════════════════════════════════════════════════════════
// Engine internals
// ═══════════════════════════════════════════════════════════════════════════════

struct Submission {
    job: Job,
    data: Arc<DataPair>,
    cancel: CancellationToken,
    reply: oneshot::Sender<TestResult>,
}

struct Completion {
    job_id: Uuid,
    test_name: String,
    passed: bool,
    duration: Duration,
}

struct Shared {
    registry: Arc<RefereeRegistry>,
    calibrator: Arc<EvidenceCalibrator>,
    broadcaster: Arc<dyn UiBroadcaster>,
    active: Mutex<HashMap<Uuid, Job>>,
}

impl Shared {
    fn active(&self) -> MutexGuard<'_, HashMap<Uuid, Job>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Best effort: failures and panics in the broadcaster never reach the job.
    fn broadcast(&self, job: &Job, passed: bool, completed: bool) {
        let short = self.registry.short_name_of(&job.test_name);
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
            self.broadcaster.broadcast_test_status_update(
                &job.session_id,
                &job.hypothesis_id,
                &job.test_name,
                &short,
                passed,
                completed,
            )
        }));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => log::warn!("status update for {} dropped: {err}", job.test_name),
            Err(payload) => log::warn!(
                "status update for {} panicked: {}",
                job.test_name,
                panic_message(payload)
            ),
        }
    }
}

struct Running {
    queues: Vec<mpsc::Sender<Submission>>,
    pools: Vec<WeightedCapacityPool>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn dispatch(
    phase: Phase,
    shared: Arc<Shared>,
    pool: WeightedCapacityPool,
    mut queue: mpsc::Receiver<Submission>,
    done: mpsc::UnboundedSender<Completion>,
    mut shutdown: watch::Receiver<bool>,
) {
    log::debug!("{phase} dispatcher started (capacity {})", pool.capacity());
    let mut workers = JoinSet::new();
    loop {
        tokio::select! {
            biased;
            _ = shutdown_signalled(&mut shutdown) => break,
            next = queue.recv() => match next {
                Some(submission) => {
                    workers.spawn(run_job(
                        Arc::clone(&shared),
                        pool.clone(),
                        submission,
                        done.clone(),
                    ));
                }
                None => break,
            },
            Some(joined) = workers.join_next(), if !workers.is_empty() => {
                if let Err(err) = joined {
                    log::warn!("{phase} worker ended abnormally: {err}");
                }
            }
        }
    }
    workers.shutdown().await;
    log::debug!("{phase} dispatcher stopped");
}

async fn run_job(
    shared: Arc<Shared>,
    pool: WeightedCapacityPool,
    submission: Submission,
    done: mpsc::UnboundedSender<Completion>,
) {
    let Submission {
        job,
        data,
        cancel,
        reply,
    } = submission;
    if cancel.is_cancelled() {
        log::debug!("job {} ({}) cancelled before start", job.id, job.test_name);
        let _ = done.send(Completion {
            job_id: job.id,
            test_name: job.test_name,
            passed: false,
            duration: Duration::ZERO,
        });
        return;
    }
    let started_at = SystemTime::now();
    let started = Instant::now();
    shared.broadcast(&job, false, false);

    let mut metadata = Metadata::new();
    metadata.insert("hypothesis_id".into(), job.hypothesis_id.clone().into());
    metadata.insert("session_id".into(), job.session_id.clone().into());
    metadata.insert("phase".into(), job.phase.to_string().into());
    let limits = RunLimits {
        capacity_wait: job.timeout,
        execution: job.timeout,
    };

    let run = match run_referee(
        &shared.registry,
        &pool,
        &job.test_name,
        data,
        Arc::new(metadata),
        limits,
        &cancel,
    )
    .await
    {
        Ok(run) => run,
        Err(err) => {
            // The ticket resolves to `Cancelled` once `reply` is dropped.
            log::debug!("job {} ({}): {err}", job.id, job.test_name);
            shared.broadcast(&job, false, true);
            let _ = done.send(Completion {
                job_id: job.id,
                test_name: job.test_name,
                passed: false,
                duration: started.elapsed(),
            });
            return;
        }
    };
    log_run(&run);

    let e_value = shared.calibrator.e_value_for_result(&run.result);
    shared.broadcast(&job, run.result.passed, true);

    let _ = done.send(Completion {
        job_id: job.id,
        test_name: job.test_name.clone(),
        passed: run.result.passed,
        duration: started.elapsed(),
    });
    let _ = reply.send(TestResult {
        job,
        result: run.result,
        e_value,
        duration: started.elapsed(),
        error: run.error,
        started_at,
        ended_at: SystemTime::now(),
    });
}

async fn aggregate(shared: Arc<Shared>, mut done: mpsc::UnboundedReceiver<Completion>) {
    while let Some(c) = done.recv().await {
        shared.active().remove(&c.job_id);
        log::debug!(
            "job {} ({}) {} in {:.1} ms",
            c.job_id,
            c.test_name,
            if c.passed { "passed" } else { "failed" },
            c.duration.as_secs_f64() * 1000.0
        );
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Engine
// ═══════════════════════════════════════════════════════════════════════════════

/// Runs referee batteries phase by phase with per-phase capacity limits.
pub struct PhaseValidationEngine {
    config: EngineConfig,
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

impl PhaseValidationEngine {
    pub fn new(
        config: EngineConfig,
        registry: Arc<RefereeRegistry>,
        calibrator: Arc<EvidenceCalibrator>,
        broadcaster: Arc<dyn UiBroadcaster>,
    ) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                registry,
                calibrator,
                broadcaster,
                active: Mutex::new(HashMap::new()),
            }),
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<RefereeRegistry> {
        &self.shared.registry
    }

    fn running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.running().is_some()
    }

    /// Jobs submitted but not yet aggregated.
    pub fn active_jobs(&self) -> usize {
        self.shared.active().len()
    }

    /// Capacity in use for a phase, or `None` when stopped.
    pub fn capacity_used(&self, phase: Phase) -> Option<usize> {
        self.running()
            .as_ref()
            .map(|r| r.pools[phase.index()].used())
    }

    fn capacity_for(&self, phase: Phase) -> usize {
        match phase {
            Phase::Integrity => self.config.integrity_capacity,
            Phase::Causality => self.config.causality_capacity,
            Phase::Complexity => self.config.complexity_capacity,
        }
    }

    /// Spawn the dispatchers and the aggregator. Must be called inside a
    /// tokio runtime. A second call while running does nothing.
    pub fn start(&self) {
        let mut running = self.running();
        if running.is_some() {
            log::debug!("engine already running");
            return;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let mut queues = Vec::with_capacity(Phase::ALL.len());
        let mut pools = Vec::with_capacity(Phase::ALL.len());
        let mut tasks = Vec::with_capacity(Phase::ALL.len() + 1);

        for phase in Phase::ALL {
            let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
            let pool = WeightedCapacityPool::new(self.capacity_for(phase));
            tasks.push(tokio::spawn(dispatch(
                phase,
                Arc::clone(&self.shared),
                pool.clone(),
                rx,
                done_tx.clone(),
                shutdown_rx.clone(),
            )));
            queues.push(tx);
            pools.push(pool);
        }
        drop(done_tx);
        tasks.push(tokio::spawn(aggregate(Arc::clone(&self.shared), done_rx)));

        log::info!(
            "validation engine started (capacity {}/{}/{})",
            self.config.integrity_capacity,
            self.config.causality_capacity,
            self.config.complexity_capacity
        );
        *running = Some(Running {
            queues,
            pools,
            shutdown,
            tasks,
        });
    }

    /// Signal shutdown and wait for the background tasks, at most
    /// `shutdown_timeout`. Safe to call when not running.
    pub async fn stop(&self) {
        let Some(running) = self.running().take() else {
            return;
        };
        let Running {
            queues,
            pools,
            shutdown,
            tasks,
        } = running;

        let _ = shutdown.send(true);
        drop(queues);
        for pool in &pools {
            pool.close();
        }

        let join_all = async {
            for task in tasks {
                if let Err(err) = task.await {
                    log::warn!("engine task ended abnormally: {err}");
                }
            }
        };
        if tokio::time::timeout(self.config.shutdown_timeout, join_all)
            .await
            .is_err()
        {
            log::warn!(
                "engine shutdown timed out after {:?}",
                self.config.shutdown_timeout
            );
        }
        self.shared.active().clear();
        log::info!("validation engine stopped");
    }

    /// Queue a job on its phase without blocking. A job whose token fires
    /// before it is admitted to the pool never runs.
    pub fn submit_job(
        &self,
        job: Job,
        data: Arc<DataPair>,
        cancel: CancellationToken,
    ) -> std::result::Result<JobTicket, EngineError> {
        let running = self.running();
        let Some(running) = running.as_ref() else {
            return Err(EngineError::NotRunning);
        };

        let (reply, receiver) = oneshot::channel();
        let job_id = job.id;
        let phase = job.phase;
        self.shared.active().insert(job_id, job.clone());
        log::debug!("routing {} to {phase} queue", job.test_name);

        let submission = Submission {
            job,
            data,
            cancel,
            reply,
        };
        match running.queues[phase.index()].try_send(submission) {
            Ok(()) => Ok(JobTicket { job_id, receiver }),
            Err(err) => {
                self.shared.active().remove(&job_id);
                Err(match err {
                    mpsc::error::TrySendError::Full(_) => EngineError::QueueFull { phase },
                    mpsc::error::TrySendError::Closed(_) => EngineError::NotRunning,
                })
            }
        }
    }

    fn shutdown_receiver(&self) -> Option<watch::Receiver<bool>> {
        self.running().as_ref().map(|r| r.shutdown.subscribe())
    }

    /// Validate one hypothesis: run the battery phase by phase, stop after
    /// integrity if its combined E-value misses the gate.
    ///
    /// Fails with [`EngineError::Cancelled`] when `cancel` fires or the
    /// engine stops. Jobs still queued at that point, or when this future is
    /// dropped, never start.
    pub async fn execute_adaptive_validation(
        &self,
        hypothesis_id: &str,
        battery: &[SelectedTest],
        data: &DataPair,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ValidationSummary> {
        validate_data(&data.x, &data.y)?;
        let mut shutdown = self.shutdown_receiver().ok_or(EngineError::NotRunning)?;
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled.into());
        }
        // Fires on every exit path, so abandoned jobs are dropped from the queues.
        let jobs = cancel.child_token();
        let _cancel_jobs = jobs.clone().drop_guard();
        let data = Arc::new(data.clone());
        let started_at = SystemTime::now();
        let started = Instant::now();

        log::info!(
            "validating {hypothesis_id} with {} tests (session {session_id})",
            battery.len()
        );

        let mut phase_results = BTreeMap::new();
        let mut all_e_values = Vec::new();
        let mut termination_reason = None;

        for phase in Phase::ALL {
            let tests: Vec<&SelectedTest> = battery.iter().filter(|t| t.phase() == phase).collect();
            if tests.is_empty() {
                continue;
            }

            let phase_started_at = SystemTime::now();
            let phase_started = Instant::now();
            let mut tickets = Vec::with_capacity(tests.len());
            for test in tests {
                let job = Job::for_test(&self.shared.registry, hypothesis_id, session_id, test);
                tickets.push(self.submit_job(job, Arc::clone(&data), jobs.clone())?);
            }

            let collect = async {
                let mut results = Vec::with_capacity(tickets.len());
                for ticket in tickets {
                    results.push(ticket.wait().await?);
                }
                Ok::<_, EngineError>(results)
            };

            let test_results = tokio::select! {
                outcome = tokio::time::timeout(self.config.phase_timeout, collect) => match outcome {
                    Ok(results) => results?,
                    Err(_) => {
                        return Err(EngineError::PhaseTimeout {
                            phase,
                            timeout: self.config.phase_timeout,
                        }
                        .into());
                    }
                },
                _ = shutdown_signalled(&mut shutdown) => return Err(EngineError::Cancelled.into()),
                _ = cancel.cancelled() => {
                    log::info!("{hypothesis_id}: cancelled during {phase} phase");
                    return Err(EngineError::Cancelled.into());
                }
            };

            let e_values: Vec<EValue> = test_results.iter().map(|t| t.e_value.clone()).collect();
            let combined_e_value =
                e_values.iter().map(|e| e.value).sum::<f64>() / e_values.len() as f64;
            let evidence = self
                .shared
                .calibrator
                .combine_evidence(&e_values, e_values.len());
            all_e_values.extend(e_values);

            log::info!(
                "{hypothesis_id}: {phase} phase combined E={combined_e_value:.4} ({} tests)",
                test_results.len()
            );
            phase_results.insert(
                phase,
                PhaseResult {
                    phase,
                    test_results,
                    combined_e_value,
                    evidence,
                    started_at: phase_started_at,
                    completed_at: SystemTime::now(),
                    duration: phase_started.elapsed(),
                },
            );

            if phase == Phase::Integrity && combined_e_value < self.config.integrity_gate {
                let reason = format!(
                    "failed integrity gate (E={combined_e_value:.4} < {})",
                    self.config.integrity_gate
                );
                log::warn!("{hypothesis_id}: {reason}");
                termination_reason = Some(reason);
                break;
            }
        }

        let overall_e_value: f64 = phase_results
            .values()
            .map(|p| self.config.phase_weights[p.phase.index()] * p.combined_e_value)
            .sum();
        let evidence = self
            .shared
            .calibrator
            .combine_evidence(&all_e_values, all_e_values.len());

        Ok(ValidationSummary {
            hypothesis_id: hypothesis_id.to_string(),
            session_id: session_id.to_string(),
            phase_results,
            overall_e_value,
            evidence,
            early_termination: termination_reason.is_some(),
            termination_reason,
            started_at,
            completed_at: SystemTime::now(),
            duration: started.elapsed(),
        })
    }

    /// Validate several hypotheses one after another. A failure or panic in
    /// one is recorded and the rest still run; after `cancel` fires the
    /// remaining hypotheses are recorded as cancelled.
    pub async fn validate_hypotheses(
        self: &Arc<Self>,
        requests: Vec<HypothesisRequest>,
        cancel: &CancellationToken,
    ) -> Vec<HypothesisOutcome> {
        let batch = cancel.child_token();
        let _cancel_batch = batch.clone().drop_guard();
        let mut outcomes = Vec::with_capacity(requests.len());
        for request in requests {
            let engine = Arc::clone(self);
            let hypothesis_id = request.hypothesis_id.clone();
            let cancel = batch.clone();
            let joined = tokio::spawn(async move {
                engine
                    .execute_adaptive_validation(
                        &request.hypothesis_id,
                        &request.battery,
                        &request.data,
                        &request.session_id,
                        &cancel,
                    )
                    .await
            })
            .await;
            outcomes.push(outcome_from_join(hypothesis_id, joined));
        }
        outcomes
    }
}

fn outcome_from_join(
    hypothesis_id: String,
    joined: std::result::Result<Result<ValidationSummary>, tokio::task::JoinError>,
) -> HypothesisOutcome {
    match joined {
        Ok(Ok(summary)) => HypothesisOutcome::Completed(Box::new(summary)),
        Ok(Err(err)) => {
            log::warn!("{hypothesis_id}: validation failed: {err}");
            HypothesisOutcome::Failed {
                hypothesis_id,
                reason: err.to_string(),
            }
        }
        Err(err) => {
            let reason = if err.is_panic() {
                format!("Panic during validation: {}", panic_message(err.into_panic()))
            } else {
                format!("Validation task cancelled: {err}")
            };
            log::error!("{hypothesis_id}: {reason}");
            HypothesisOutcome::Failed {
                hypothesis_id,
                reason,
            }
        }
    }
}

impl Drop for PhaseValidationEngine {
    fn drop(&mut self) {
        if let Some(running) = self.running().take() {
            let _ = running.shutdown.send(true);
            for pool in &running.pools {
                pool.close();
            }
        }
    }
}
