use std::path::Path;
use std::sync::Arc;

use refgate_core::{
    CancellationToken, ConcurrentRefereeExecutor, TriGateResult, evaluate_tri_gate,
};

use super::{Settings, cancel_on_ctrl_c, fail, load_data, resolve_names, write_json};

pub struct TriGateCommandConfig<'a> {
    pub input: &'a Path,
    pub referees: &'a str,
    pub output_path: Option<&'a Path>,
}

pub fn run(rt: &tokio::runtime::Runtime, settings: &Settings, cfg: TriGateCommandConfig<'_>) {
    let registry = super::shared_registry(settings);
    let names = resolve_names(&registry, Some(cfg.referees)).unwrap_or_else(|e| fail(e));
    let selected: Vec<&str> = names.iter().map(String::as_str).collect();
    registry
        .validate_compatibility(&selected)
        .unwrap_or_else(|e| fail(e));
    let data = load_data(cfg.input).unwrap_or_else(|e| fail(e));

    // Room for all three at once.
    let capacity = names.iter().map(|n| registry.cost_of(n)).sum();
    let executor = ConcurrentRefereeExecutor::new(Arc::clone(&registry), capacity);
    println!(
        "Tri-gate: {} on {} observations...\n",
        names.join(", "),
        data.len()
    );

    let cancel = CancellationToken::new();
    let results = rt
        .block_on(async {
            let interrupt = tokio::spawn(cancel_on_ctrl_c(cancel.clone()));
            let results = executor
                .execute_referees(&names[..], data.shared(), &cancel)
                .await;
            interrupt.abort();
            results
        })
        .unwrap_or_else(|e| fail(e));

    let gate = evaluate_tri_gate(results);
    print_gate(&gate);

    if let Some(path) = cfg.output_path {
        match write_json(path, &gate) {
            Ok(()) => println!("\nResults written to {}", path.display()),
            Err(e) => eprintln!("\nFailed to write results: {e}"),
        }
    }
}

fn print_gate(gate: &TriGateResult) {
    for result in &gate.referee_results {
        let mark = if result.passed { "PASS" } else { "FAIL" };
        let p = result
            .p_value
            .map_or_else(|| "-".to_string(), |p| format!("{p:.4}"));
        println!("  {mark}  {:<28} p={p}", result.gate_name);
        if !result.passed && !result.failure_reason.is_empty() {
            println!("        {}", result.failure_reason);
        }
    }
    println!();
    println!(
        "  Gate:        {} (confidence {:.2}, {})",
        if gate.overall_passed { "PASSED" } else { "FAILED" },
        gate.confidence,
        gate.quality
    );
    println!("  Rationale:   {}", gate.rationale);
}
