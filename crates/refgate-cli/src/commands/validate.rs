use std::path::Path;
use std::sync::Arc;

use refgate_core::{
    CancellationToken, DataPair, HypothesisOutcome, HypothesisRequest, LogBroadcaster, PhaseValidationEngine,
    RefereeRegistry, ValidationSummary, Verdict, WorkspaceState,
};
use serde::{Deserialize, Serialize};

use super::{Settings, battery, cancel_on_ctrl_c, fail, load_data, resolve_names, write_json};

pub struct ValidateCommandConfig<'a> {
    pub input: Option<&'a Path>,
    pub batch: Option<&'a Path>,
    pub referees: Option<&'a str>,
    pub hypothesis_id: &'a str,
    pub session_id: Option<&'a str>,
    pub hypotheses_generated: usize,
    pub alpha_spent: f64,
    pub output_path: Option<&'a Path>,
}

/// One hypothesis in a batch file. An empty `referees` list uses the
/// command-line selection.
#[derive(Debug, Deserialize)]
pub struct BatchEntry {
    pub hypothesis_id: String,
    #[serde(default)]
    pub referees: Vec<String>,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

#[derive(Serialize)]
struct ValidationReport<'a> {
    summary: &'a ValidationSummary,
    workspace: WorkspaceState,
    workspace_verdict: Verdict,
}

pub fn run(rt: &tokio::runtime::Runtime, settings: &Settings, cfg: ValidateCommandConfig<'_>) {
    let registry = super::shared_registry(settings);
    let default_names = resolve_names(&registry, cfg.referees).unwrap_or_else(|e| fail(e));
    let session_id = cfg
        .session_id
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let engine = Arc::new(PhaseValidationEngine::new(
        settings.core.engine.clone(),
        Arc::clone(&registry),
        Arc::new(settings.calibrator()),
        Arc::new(LogBroadcaster),
    ));
    let cancel = CancellationToken::new();

    if let Some(path) = cfg.batch {
        let requests = load_batch(path, &registry, &default_names, &session_id)
            .unwrap_or_else(|e| fail(e));
        println!(
            "Validating {} hypotheses (session {session_id})...\n",
            requests.len()
        );
        let outcomes = rt.block_on(async {
            engine.start();
            let interrupt = tokio::spawn(cancel_on_ctrl_c(cancel.clone()));
            let outcomes = engine.validate_hypotheses(requests, &cancel).await;
            interrupt.abort();
            engine.stop().await;
            outcomes
        });
        print_batch(&outcomes);
        if let Some(path) = cfg.output_path {
            match write_json(path, &outcomes) {
                Ok(()) => println!("\nResults written to {}", path.display()),
                Err(e) => eprintln!("\nFailed to write results: {e}"),
            }
        }
        return;
    }

    let Some(input) = cfg.input else {
        fail("either --input or --batch is required");
    };
    let data = load_data(input).unwrap_or_else(|e| fail(e));
    let tests = battery(&registry, &default_names).unwrap_or_else(|e| fail(e));

    println!(
        "Validating {} with {} referee(s) on {} observations (session {session_id})...\n",
        cfg.hypothesis_id,
        tests.len(),
        data.len()
    );
    let outcome = rt.block_on(async {
        engine.start();
        let interrupt = tokio::spawn(cancel_on_ctrl_c(cancel.clone()));
        let outcome = engine
            .execute_adaptive_validation(cfg.hypothesis_id, &tests, &data, &session_id, &cancel)
            .await;
        interrupt.abort();
        engine.stop().await;
        outcome
    });
    let summary = outcome.unwrap_or_else(|e| fail(e));

    let workspace = WorkspaceState {
        hypotheses_generated: cfg.hypotheses_generated,
        global_alpha_spent: cfg.alpha_spent,
    };
    let workspace_verdict = settings
        .calibrator()
        .apply_workspace_threshold(&summary.evidence, &workspace);

    print_summary(&summary);
    println!(
        "  Workspace verdict:  {workspace_verdict} (threshold {:.1} after {} hypotheses)",
        workspace.threshold(),
        workspace.hypotheses_generated
    );

    if let Some(path) = cfg.output_path {
        let report = ValidationReport {
            summary: &summary,
            workspace,
            workspace_verdict,
        };
        match write_json(path, &report) {
            Ok(()) => println!("\nResults written to {}", path.display()),
            Err(e) => eprintln!("\nFailed to write results: {e}"),
        }
    }
}

/// Read a batch file into engine requests, resolving each entry's referees.
pub fn load_batch(
    path: &Path,
    registry: &RefereeRegistry,
    default_names: &[String],
    session_id: &str,
) -> Result<Vec<HypothesisRequest>, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    let entries: Vec<BatchEntry> = serde_json::from_str(&text)
        .map_err(|e| format!("cannot parse {}: {e}", path.display()))?;

    entries
        .into_iter()
        .map(|entry| {
            let names = if entry.referees.is_empty() {
                default_names.to_vec()
            } else {
                resolve_names(registry, Some(&entry.referees.join(",")))?
            };
            Ok(HypothesisRequest {
                hypothesis_id: entry.hypothesis_id,
                session_id: session_id.to_string(),
                battery: battery(registry, &names)?,
                // Length checks happen per hypothesis inside the engine.
                data: DataPair {
                    x: entry.x,
                    y: entry.y,
                },
            })
        })
        .collect()
}

fn print_summary(summary: &ValidationSummary) {
    for (phase, result) in &summary.phase_results {
        println!(
            "  Phase {:<11} E={:>9.3}  [{} test(s), {:.1} ms]",
            phase.to_string(),
            result.combined_e_value,
            result.test_results.len(),
            result.duration.as_secs_f64() * 1000.0
        );
        for test in &result.test_results {
            let mark = if test.result.passed { "PASS" } else { "FAIL" };
            let p = test
                .result
                .p_value
                .map_or_else(|| "-".to_string(), |p| format!("{p:.4}"));
            println!(
                "    {mark}  {:<28} p={p:<8} E={:>9.3}",
                test.job.test_name, test.e_value.value
            );
            if !test.result.passed && !test.result.failure_reason.is_empty() {
                println!("          {}", test.result.failure_reason);
            }
        }
    }

    let evidence = &summary.evidence;
    println!();
    println!("  Overall E:          {:.3}", summary.overall_e_value);
    println!(
        "  Combined E:         {:.3} (normalized {:.3}, {})",
        evidence.combined_e_value, evidence.normalized_e_value, evidence.quality
    );
    println!("  Verdict:            {}", evidence.verdict);
    if let Some(reason) = &summary.termination_reason {
        println!("  Stopped early:      {reason}");
    }
}

fn print_batch(outcomes: &[HypothesisOutcome]) {
    println!("  {:<24} {:>10} {:>14}  Notes", "Hypothesis", "Overall E", "Verdict");
    println!("  {}", "-".repeat(64));
    for outcome in outcomes {
        match outcome {
            HypothesisOutcome::Completed(summary) => println!(
                "  {:<24} {:>10.3} {:>14}  {}",
                summary.hypothesis_id,
                summary.overall_e_value,
                summary.evidence.verdict.to_string(),
                summary.termination_reason.as_deref().unwrap_or("")
            ),
            HypothesisOutcome::Failed {
                hypothesis_id,
                reason,
            } => println!("  {hypothesis_id:<24} {:>10} {:>14}  {reason}", "-", "FAILED"),
        }
    }
}
