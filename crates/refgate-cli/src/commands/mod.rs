pub mod calibrate;
pub mod referees;
pub mod stability;
pub mod trigate;
pub mod validate;

use std::fmt::Display;
use std::path::Path;
use std::sync::Arc;

use refgate_core::{
    CancellationToken, DataPair, EvidenceCalibrator, RefereeRegistry, RefgateConfig, SelectedTest,
    default_history,
};
use refgate_referees::{RefereesConfig, register_builtin_with};
use serde::{Deserialize, Serialize};

/// Everything a config file can set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    pub core: RefgateConfig,
    pub referees: RefereesConfig,
}

impl Settings {
    pub fn registry(&self) -> Result<RefereeRegistry, String> {
        let mut registry = RefereeRegistry::new();
        register_builtin_with(&mut registry, &self.referees).map_err(|e| e.to_string())?;
        Ok(registry)
    }

    pub fn calibrator(&self) -> EvidenceCalibrator {
        EvidenceCalibrator::new(self.core.calibration.clone(), default_history())
    }
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct RefereesSection {
    referees: RefereesConfig,
}

/// Print the error and exit with status 1.
pub fn fail(msg: impl Display) -> ! {
    eprintln!("Error: {msg}");
    std::process::exit(1)
}

/// Read settings from a JSON config file, or defaults when none is given.
/// Core sections are validated; a `referees` section configures built-ins.
pub fn load_settings(path: Option<&Path>) -> Result<Settings, String> {
    let Some(path) = path else {
        return Ok(Settings::default());
    };
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    let core = RefgateConfig::from_json(&text).map_err(|e| format!("{}: {e}", path.display()))?;
    let section: RefereesSection = serde_json::from_str(&text)
        .map_err(|e| format!("{}: referees: {e}", path.display()))?;
    log::info!("loaded config from {}", path.display());
    Ok(Settings {
        core,
        referees: section.referees,
    })
}

/// Read and validate a `{"x": [...], "y": [...]}` data file.
pub fn load_data(path: &Path) -> Result<DataPair, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    let data: DataPair = serde_json::from_str(&text)
        .map_err(|e| format!("cannot parse {}: {e}", path.display()))?;
    refgate_core::validate_data(&data.x, &data.y)
        .map_err(|e| format!("{}: {e}", path.display()))?;
    Ok(data)
}

/// Resolve a comma-separated list of names or aliases to canonical referee
/// names. An absent or empty list selects every registered referee.
pub fn resolve_names(registry: &RefereeRegistry, list: Option<&str>) -> Result<Vec<String>, String> {
    let requested: Vec<&str> = list
        .map(|l| l.split(',').map(str::trim).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();
    if requested.is_empty() {
        let mut all: Vec<_> = registry.descriptors().collect();
        all.sort_by_key(|d| d.category.phase());
        return Ok(all.into_iter().map(|d| d.name.clone()).collect());
    }
    requested
        .into_iter()
        .map(|name| {
            registry
                .descriptor(name)
                .map(|d| d.name.clone())
                .ok_or_else(|| format!("unknown referee: {name}"))
        })
        .collect()
}

/// Pair each resolved name with its registered category.
pub fn battery(registry: &RefereeRegistry, names: &[String]) -> Result<Vec<SelectedTest>, String> {
    names
        .iter()
        .map(|name| {
            registry
                .category_of(name)
                .map(|category| SelectedTest::new(name.as_str(), category))
                .ok_or_else(|| format!("unknown referee: {name}"))
        })
        .collect()
}

/// Write `value` as pretty JSON.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), String> {
    let json = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    std::fs::write(path, json).map_err(|e| format!("cannot write {}: {e}", path.display()))
}

pub fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|e| fail(format!("cannot start async runtime: {e}")))
}

pub fn shared_registry(settings: &Settings) -> Arc<RefereeRegistry> {
    Arc::new(settings.registry().unwrap_or_else(|e| fail(e)))
}

/// Cancel `cancel` on Ctrl-C so queued referees are dropped instead of run.
pub async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => {
                eprintln!("\nInterrupted: cancelling queued referees...");
                cancel.cancel();
            }
            Err(err) => log::warn!("cannot listen for Ctrl-C: {err}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refgate_core::RefereeCategory;
    use std::io::Write;

    fn temp_json(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    // -------------------------------------------------------------------
    // Settings
    // -------------------------------------------------------------------

    #[test]
    fn no_config_means_defaults() {
        assert_eq!(load_settings(None).unwrap(), Settings::default());
    }

    #[test]
    fn config_sets_core_and_referees() {
        let file = temp_json(
            r#"{
                "engine": { "integrity_capacity": 6 },
                "referees": { "shredder": { "iterations": 400 } }
            }"#,
        );
        let settings = load_settings(Some(file.path())).unwrap();
        assert_eq!(settings.core.engine.integrity_capacity, 6);
        assert_eq!(settings.referees.shredder.iterations, 400);
        assert_eq!(settings.registry().unwrap().len(), 4);
    }

    #[test]
    fn invalid_config_is_reported() {
        let file = temp_json(r#"{"engine": {"complexity_capacity": 0}}"#);
        let err = load_settings(Some(file.path())).unwrap_err();
        assert!(err.contains("complexity_capacity"), "{err}");
    }

    // -------------------------------------------------------------------
    // Data files
    // -------------------------------------------------------------------

    #[test]
    fn data_file_loads() {
        let x: Vec<f64> = (0..12).map(f64::from).collect();
        let file = temp_json(&serde_json::json!({ "x": x, "y": x }).to_string());
        let data = load_data(file.path()).unwrap();
        assert_eq!(data.len(), 12);
    }

    #[test]
    fn short_data_file_is_rejected() {
        let file = temp_json(r#"{"x": [1, 2, 3], "y": [1, 2, 3]}"#);
        let err = load_data(file.path()).unwrap_err();
        assert!(err.contains("insufficient data points"), "{err}");
    }

    #[test]
    fn malformed_data_file_is_rejected() {
        let file = temp_json(r#"{"x": [1, 2, 3]"#);
        assert!(load_data(file.path()).unwrap_err().starts_with("cannot parse"));
    }

    // -------------------------------------------------------------------
    // Referee selection
    // -------------------------------------------------------------------

    #[test]
    fn default_selection_is_phase_ordered() {
        let registry = Settings::default().registry().unwrap();
        let names = resolve_names(&registry, None).unwrap();
        assert_eq!(names.len(), 4);
        assert_eq!(names[0], "Permutation_Shredder");
        assert_eq!(names[3], "Algorithmic_Complexity");
    }

    #[test]
    fn aliases_resolve_to_canonical_names() {
        let registry = Settings::default().registry().unwrap();
        let names = resolve_names(&registry, Some("shredder, invariance,")).unwrap();
        assert_eq!(names, vec!["Permutation_Shredder", "Chow_Stability_Test"]);

        let tests = battery(&registry, &names).unwrap();
        assert_eq!(tests[1].category, RefereeCategory::Invariance);
    }

    #[test]
    fn unknown_referee_is_an_error() {
        let registry = Settings::default().registry().unwrap();
        let err = resolve_names(&registry, Some("shredder,astrology")).unwrap_err();
        assert_eq!(err, "unknown referee: astrology");
    }

    // -------------------------------------------------------------------
    // Interrupts
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn interrupt_watcher_ends_with_its_token() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), cancel_on_ctrl_c(cancel))
            .await
            .unwrap();
    }
}
