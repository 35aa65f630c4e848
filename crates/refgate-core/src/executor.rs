//! Concurrent referee executor.
//!
//! Runs a batch of referees against one data pair. Every referee gets its
//! own task in a [`JoinSet`] that:
//! 1. resolves the referee's factory (unknown names fail without waiting)
//! 2. acquires its registry cost from the shared pool (bounded wait)
//! 3. constructs a fresh referee and executes it on the blocking pool,
//!    bounded by the registry timeout
//! 4. releases capacity when the computation ends
//!
//! Results come back in input order. Any per-referee failure degrades into a
//! failed [`RefereeResult`] for that slot. Only cancellation fails the batch:
//! queued referees never start once the token fires, and dropping the batch
//! future aborts its tasks.

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::data::DataPair;
use crate::error::EngineError;
use crate::pool::WeightedCapacityPool;
use crate::referee::{Metadata, RefereeResult};
use crate::registry::RefereeRegistry;

/// Default bound on waiting for pool capacity.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(5 * 60);

/// A single referee run with its bookkeeping.
#[derive(Debug, Clone)]
pub struct RefereeRun {
    pub result: RefereeResult,
    pub duration: Duration,
    pub cost: usize,
    /// Set when the run never produced a referee verdict.
    pub error: Option<String>,
}

impl RefereeRun {
    fn failed(name: &str, reason: String, cost: usize, started: Instant) -> Self {
        Self {
            result: RefereeResult::failed(name, reason.clone()),
            duration: started.elapsed(),
            cost,
            error: Some(reason),
        }
    }
}

/// Limits applied to one referee run.
#[derive(Debug, Clone, Copy)]
pub struct RunLimits {
    /// Longest wait for capacity.
    pub capacity_wait: Duration,
    /// Longest execution once admitted.
    pub execution: Duration,
}

/// Resolve, admit, construct and execute one referee.
///
/// Shared by the batch executor and the phase engine's workers. Returns
/// [`EngineError::Cancelled`] when `cancel` fires first; a referee already
/// on the blocking pool keeps its capacity until it finishes.
pub async fn run_referee(
    registry: &RefereeRegistry,
    pool: &WeightedCapacityPool,
    name: &str,
    data: Arc<DataPair>,
    metadata: Arc<Metadata>,
    limits: RunLimits,
    cancel: &CancellationToken,
) -> Result<RefereeRun, EngineError> {
    let started = Instant::now();
    let cost = registry.cost_of(name);

    let factory = match registry.factory(name) {
        Ok(f) => f,
        Err(err) => {
            return Ok(RefereeRun::failed(
                name,
                format!("Referee creation failed: {err}"),
                cost,
                started,
            ));
        }
    };

    let admission = tokio::time::timeout(limits.capacity_wait, pool.acquire(cost));
    let permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(EngineError::Cancelled),
        admitted = admission => match admitted {
            Ok(Ok(permit)) => permit,
            Ok(Err(err)) => {
                return Ok(RefereeRun::failed(
                    name,
                    format!("Computational capacity unavailable: {err}"),
                    cost,
                    started,
                ));
            }
            Err(_) => {
                return Ok(RefereeRun::failed(
                    name,
                    format!(
                        "Computational capacity unavailable: timed out after {:?} waiting for {cost} units",
                        limits.capacity_wait
                    ),
                    cost,
                    started,
                ));
            }
        },
    };

    // The permit travels with the computation: capacity is returned only
    // when the referee actually stops running, even after a timeout.
    let handle = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        let referee = factory();
        referee.execute(&data.x, &data.y, &metadata)
    });

    let finished = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(EngineError::Cancelled),
        finished = tokio::time::timeout(limits.execution, handle) => finished,
    };
    Ok(match finished {
        Ok(Ok(result)) => RefereeRun {
            result,
            duration: started.elapsed(),
            cost,
            error: None,
        },
        Ok(Err(join_err)) => {
            let reason = if join_err.is_panic() {
                format!("Referee panicked: {}", panic_message(join_err.into_panic()))
            } else {
                "Referee task was cancelled".to_string()
            };
            RefereeRun::failed(name, reason, cost, started)
        }
        Err(_) => RefereeRun::failed(
            name,
            format!("Referee timed out after {:?}", limits.execution),
            cost,
            started,
        ),
    })
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

pub(crate) fn log_run(run: &RefereeRun) {
    if run.result.passed {
        log::info!(
            "{} passed (cost {}, {:.1} ms)",
            run.result.gate_name,
            run.cost,
            run.duration.as_secs_f64() * 1000.0
        );
    } else {
        log::warn!(
            "{} failed (cost {}, {:.1} ms): {}",
            run.result.gate_name,
            run.cost,
            run.duration.as_secs_f64() * 1000.0,
            run.result.failure_reason
        );
    }
}

/// Runs referee batches concurrently under a weighted capacity limit.
pub struct ConcurrentRefereeExecutor {
    registry: Arc<RefereeRegistry>,
    pool: WeightedCapacityPool,
    max_wait: Duration,
}

impl ConcurrentRefereeExecutor {
    pub fn new(registry: Arc<RefereeRegistry>, capacity: usize) -> Self {
        Self {
            registry,
            pool: WeightedCapacityPool::new(capacity),
            max_wait: DEFAULT_MAX_WAIT,
        }
    }

    /// Override the capacity wait bound.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn pool(&self) -> &WeightedCapacityPool {
        &self.pool
    }

    pub fn registry(&self) -> &Arc<RefereeRegistry> {
        &self.registry
    }

    /// Run every named referee and return one result per name, in order.
    pub async fn execute_referees<S: AsRef<str>>(
        &self,
        names: &[S],
        data: Arc<DataPair>,
        cancel: &CancellationToken,
    ) -> Result<Vec<RefereeResult>, EngineError> {
        let runs = self
            .execute_runs(names, data, Arc::new(Metadata::new()), cancel)
            .await?;
        Ok(runs.into_iter().map(|run| run.result).collect())
    }

    /// Like [`execute_referees`](Self::execute_referees) but keeps timing,
    /// cost and error bookkeeping.
    pub async fn execute_runs<S: AsRef<str>>(
        &self,
        names: &[S],
        data: Arc<DataPair>,
        metadata: Arc<Metadata>,
        cancel: &CancellationToken,
    ) -> Result<Vec<RefereeRun>, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let mut tasks = JoinSet::new();
        for (index, name) in names.iter().enumerate() {
            let name = name.as_ref().to_string();
            let registry = Arc::clone(&self.registry);
            let pool = self.pool.clone();
            let data = Arc::clone(&data);
            let metadata = Arc::clone(&metadata);
            let cancel = cancel.clone();
            let limits = RunLimits {
                capacity_wait: self.max_wait,
                execution: self.registry.timeout_of(&name),
            };
            tasks.spawn(async move {
                let run = run_referee(&registry, &pool, &name, data, metadata, limits, &cancel).await;
                (index, run)
            });
        }

        let mut slots: Vec<Option<RefereeRun>> = (0..names.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(run))) => {
                    log_run(&run);
                    slots[index] = Some(run);
                }
                // Dropping the set aborts whatever is still queued.
                Ok((_, Err(err))) => return Err(err),
                Err(err) => log::warn!("referee task ended abnormally: {err}"),
            }
        }

        Ok(slots
            .into_iter()
            .zip(names)
            .map(|(slot, name)| {
                slot.unwrap_or_else(|| {
                    RefereeRun::failed(
                        name.as_ref(),
                        "Referee task ended without reporting".to_string(),
                        self.registry.cost_of(name.as_ref()),
                        Instant::now(),
                    )
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::referee::{Referee, RefereeCategory};
    use crate::registry::RefereeDescriptor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // ---------------------------------------------------------------------------
    // Fakes
    // ---------------------------------------------------------------------------

    struct Sleeper {
        name: String,
        millis: u64,
        passed: bool,
    }

    impl Referee for Sleeper {
        fn name(&self) -> &str {
            &self.name
        }
        fn execute(&self, _x: &[f64], _y: &[f64], _m: &Metadata) -> RefereeResult {
            std::thread::sleep(Duration::from_millis(self.millis));
            RefereeResult {
                gate_name: self.name.clone(),
                passed: self.passed,
                statistic: self.millis as f64,
                p_value: Some(if self.passed { 0.001 } else { 0.5 }),
                e_value: None,
                standard_used: "sleep".into(),
                failure_reason: if self.passed { String::new() } else { "slow".into() },
            }
        }
    }

    struct Panicker;

    impl Referee for Panicker {
        fn name(&self) -> &str {
            "Panicker"
        }
        fn execute(&self, _x: &[f64], _y: &[f64], _m: &Metadata) -> RefereeResult {
            panic!("referee exploded");
        }
    }

    fn add_sleeper(r: &mut RefereeRegistry, name: &str, millis: u64, cost: usize, passed: bool) {
        let owned = name.to_string();
        r.register(
            RefereeDescriptor::new(name, RefereeCategory::Invariance).cost(cost),
            move || {
                Box::new(Sleeper {
                    name: owned.clone(),
                    millis,
                    passed,
                })
            },
        )
        .unwrap();
    }

    fn data() -> Arc<DataPair> {
        let x: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let y = x.iter().map(|v| v * 2.0).collect();
        Arc::new(DataPair { x, y })
    }

    async fn execute<S: AsRef<str>>(exec: &ConcurrentRefereeExecutor, names: &[S]) -> Vec<RefereeResult> {
        exec.execute_referees(names, data(), &CancellationToken::new())
            .await
            .unwrap()
    }

    // ---------------------------------------------------------------------------
    // Tests
    // ---------------------------------------------------------------------------

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn results_keep_input_order() {
        let mut r = RefereeRegistry::new();
        add_sleeper(&mut r, "Slow", 120, 1, true);
        add_sleeper(&mut r, "Medium", 60, 1, false);
        add_sleeper(&mut r, "Fast", 5, 1, true);
        let exec = ConcurrentRefereeExecutor::new(Arc::new(r), 10);

        let names = ["Slow", "Medium", "Fast", "Unknown_Gate", "Fast"];
        let results = execute(&exec, &names[..]).await;

        assert_eq!(results.len(), names.len());
        for (result, name) in results.iter().zip(names) {
            assert_eq!(result.gate_name, name);
        }
        assert!(results[0].passed);
        assert!(!results[1].passed);
        assert!(results[3].failure_reason.starts_with("Referee creation failed"));
        assert!(results[3].p_value.is_none());
        assert_eq!(exec.pool().used(), 0);
    }

    #[tokio::test]
    async fn empty_batch() {
        let exec = ConcurrentRefereeExecutor::new(Arc::new(RefereeRegistry::new()), 4);
        let names: [&str; 0] = [];
        assert!(execute(&exec, &names[..]).await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn execution_timeout_degrades() {
        let mut r = RefereeRegistry::new();
        r.register(
            RefereeDescriptor::new("Stuck", RefereeCategory::Mechanism)
                .timeout(Duration::from_millis(50)),
            || {
                Box::new(Sleeper {
                    name: "Stuck".into(),
                    millis: 500,
                    passed: true,
                })
            },
        )
        .unwrap();
        let exec = ConcurrentRefereeExecutor::new(Arc::new(r), 4);
        let results = execute(&exec, &["Stuck"]).await;
        assert!(!results[0].passed);
        assert!(results[0].failure_reason.contains("timed out"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn capacity_timeout_degrades() {
        let mut r = RefereeRegistry::new();
        add_sleeper(&mut r, "Heavy", 10, 4, true);
        let exec =
            ConcurrentRefereeExecutor::new(Arc::new(r), 4).with_max_wait(Duration::from_millis(30));
        let _hog = exec.pool().try_acquire(4).unwrap();

        let results = execute(&exec, &["Heavy"]).await;
        assert!(!results[0].passed);
        assert!(results[0].failure_reason.contains("capacity unavailable"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panic_degrades_to_failed_result() {
        let mut r = RefereeRegistry::new();
        r.register(
            RefereeDescriptor::new("Panicker", RefereeCategory::Topological),
            || Box::new(Panicker),
        )
        .unwrap();
        add_sleeper(&mut r, "Fine", 1, 1, true);
        let exec = ConcurrentRefereeExecutor::new(Arc::new(r), 4);

        let results = execute(&exec, &["Panicker", "Fine"]).await;
        assert!(!results[0].passed);
        assert!(results[0].failure_reason.contains("referee exploded"));
        assert!(results[1].passed);
        assert_eq!(exec.pool().used(), 0);
    }

    struct Gauge {
        pool: WeightedCapacityPool,
        peak: Arc<AtomicUsize>,
    }

    impl Referee for Gauge {
        fn name(&self) -> &str {
            "Gauge"
        }
        fn execute(&self, _x: &[f64], _y: &[f64], _m: &Metadata) -> RefereeResult {
            self.peak.fetch_max(self.pool.used(), Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(10));
            RefereeResult::failed("Gauge", "measured")
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn pool_bounds_concurrent_cost() {
        let peak = Arc::new(AtomicUsize::new(0));
        // Registry is built after the executor so the fake can observe its pool.
        let mut exec = ConcurrentRefereeExecutor::new(Arc::new(RefereeRegistry::new()), 6);
        let pool = exec.pool().clone();
        let mut r = RefereeRegistry::new();
        {
            let peak = Arc::clone(&peak);
            let pool = pool.clone();
            r.register(
                RefereeDescriptor::new("Gauge", RefereeCategory::Sensitivity).cost(4),
                move || {
                    Box::new(Gauge {
                        pool: pool.clone(),
                        peak: Arc::clone(&peak),
                    })
                },
            )
            .unwrap();
        }
        exec.registry = Arc::new(r);

        let names = vec!["Gauge"; 8];
        let results = execute(&exec, names.as_slice()).await;
        assert_eq!(results.len(), 8);
        // Cost 4 in a pool of 6: never two at once.
        assert_eq!(peak.load(Ordering::SeqCst), 4);
        assert_eq!(pool.used(), 0);
    }

    // ---------------------------------------------------------------------------
    // Cancellation and admission order
    // ---------------------------------------------------------------------------

    /// Counts executions so tests can see which queued referees started.
    struct Counted {
        calls: Arc<AtomicUsize>,
        millis: u64,
    }

    impl Referee for Counted {
        fn name(&self) -> &str {
            "Counted"
        }
        fn execute(&self, _x: &[f64], _y: &[f64], _m: &Metadata) -> RefereeResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(self.millis));
            RefereeResult::failed("Counted", "counted")
        }
    }

    /// Capacity 1 and four 100 ms referees of cost 1: they run one at a time.
    fn serial_executor() -> (ConcurrentRefereeExecutor, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut r = RefereeRegistry::new();
        let counter = Arc::clone(&calls);
        r.register(
            RefereeDescriptor::new("Counted", RefereeCategory::Mechanism).cost(1),
            move || {
                Box::new(Counted {
                    calls: Arc::clone(&counter),
                    millis: 100,
                })
            },
        )
        .unwrap();
        (ConcurrentRefereeExecutor::new(Arc::new(r), 1), calls)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn cancel_stops_queued_referees() {
        let (exec, calls) = serial_executor();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let names = vec!["Counted"; 4];
        let err = exec
            .execute_referees(names.as_slice(), data(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::Cancelled);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(exec.pool().used(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn dropped_batch_aborts_queued_referees() {
        let (exec, calls) = serial_executor();
        let names = vec!["Counted"; 4];
        let abandoned = tokio::time::timeout(
            Duration::from_millis(30),
            exec.execute_referees(names.as_slice(), data(), &CancellationToken::new()),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(exec.pool().used(), 0);
    }

    #[tokio::test]
    async fn cancelled_token_runs_nothing() {
        let (exec, calls) = serial_executor();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = exec
            .execute_referees(&["Counted"], data(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unknown_referee_fails_without_waiting_for_capacity() {
        let mut r = RefereeRegistry::new();
        add_sleeper(&mut r, "Known", 1, 4, true);
        let exec = ConcurrentRefereeExecutor::new(Arc::new(r), 4);
        let _hog = exec.pool().try_acquire(4).unwrap();

        let started = Instant::now();
        let results = tokio::time::timeout(Duration::from_secs(2), execute(&exec, &["Ghost"]))
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(results[0].failure_reason.starts_with("Referee creation failed"));
        assert_eq!(exec.pool().used(), 4);
    }
}
