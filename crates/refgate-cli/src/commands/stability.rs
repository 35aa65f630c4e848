use std::path::Path;

use refgate_core::{StabilityConfig, StabilityResult, StabilitySelector};

use super::{Settings, fail, load_data, resolve_names, write_json};

pub struct StabilityCommandConfig<'a> {
    pub input: &'a Path,
    pub referees: Option<&'a str>,
    pub subsamples: Option<usize>,
    pub fraction: Option<f64>,
    pub threshold: Option<f64>,
    pub seed: Option<u64>,
    pub output_path: Option<&'a Path>,
}

impl StabilityCommandConfig<'_> {
    /// Command-line overrides on top of the config file.
    pub fn apply(&self, base: &StabilityConfig) -> StabilityConfig {
        StabilityConfig {
            subsample_count: self.subsamples.unwrap_or(base.subsample_count),
            subsample_fraction: self.fraction.unwrap_or(base.subsample_fraction),
            stability_threshold: self.threshold.unwrap_or(base.stability_threshold),
            seed: self.seed.or(base.seed),
            executor_capacity: base.executor_capacity,
        }
    }
}

pub fn run(rt: &tokio::runtime::Runtime, settings: &Settings, cfg: StabilityCommandConfig<'_>) {
    let registry = super::shared_registry(settings);
    let names = resolve_names(&registry, cfg.referees).unwrap_or_else(|e| fail(e));
    let data = load_data(cfg.input).unwrap_or_else(|e| fail(e));

    let selector = StabilitySelector::new(registry, cfg.apply(&settings.core.stability));
    let resolved = selector.config();
    println!(
        "Stability selection: {} referee(s), {} subsamples of {:.0}% (threshold {:.0}%)...\n",
        names.len(),
        resolved.subsample_count,
        resolved.subsample_fraction * 100.0,
        resolved.stability_threshold * 100.0
    );

    let result = rt
        .block_on(selector.validate_with_stability(&names[..], &data))
        .unwrap_or_else(|e| fail(e));
    print_result(&result);

    if let Some(path) = cfg.output_path {
        match write_json(path, &result) {
            Ok(()) => println!("\nResults written to {}", path.display()),
            Err(e) => eprintln!("\nFailed to write results: {e}"),
        }
    }
}

fn print_result(result: &StabilityResult) {
    println!("  {:<28} {:>8} {:>8}  Stable", "Referee", "Passes", "Score");
    println!("  {}", "-".repeat(56));
    for s in &result.referee_stability {
        println!(
            "  {:<28} {:>4}/{:<3} {:>8.2}  {}",
            s.referee_name,
            s.pass_count,
            result.subsample_count,
            s.stability_score,
            if s.is_stable { "yes" } else { "no" }
        );
    }
    println!();
    println!(
        "  Overall stability: {:.2} ({} of {} stable, {} passes needed)",
        result.overall_stability,
        result.stable_referees.len(),
        result.referee_names.len(),
        result.min_stable_subsamples
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_only_what_is_given() {
        let cfg = StabilityCommandConfig {
            input: Path::new("data.json"),
            referees: None,
            subsamples: Some(25),
            fraction: None,
            threshold: Some(0.6),
            seed: None,
            output_path: None,
        };
        let base = StabilityConfig {
            seed: Some(7),
            ..StabilityConfig::default()
        };
        let merged = cfg.apply(&base);
        assert_eq!(merged.subsample_count, 25);
        assert_eq!(merged.subsample_fraction, 0.8);
        assert_eq!(merged.stability_threshold, 0.6);
        assert_eq!(merged.seed, Some(7));
    }
}
