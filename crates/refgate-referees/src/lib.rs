//! Built-in falsification referees.
//!
//! Four referees, one per concern, each behind the
//! [`Referee`](refgate_core::Referee) trait:
//!
//! | Name | Category | Cost | Timeout |
//! |---|---|---|---|
//! | `Permutation_Shredder` | statistical-integrity | 2 | 30 s |
//! | `Chow_Stability_Test` | invariance | 4 | 45 s |
//! | `Isotonic_Mechanism_Check` | mechanism | 4 | 60 s |
//! | `Algorithmic_Complexity` | thermodynamic | 8 | 180 s |
//!
//! Register them with [`register_builtin`] or start from
//! [`builtin_registry`].

use std::time::Duration;

use refgate_core::{
    RefereeCategory, RefereeDescriptor, RefereeRegistry, RefereeResult, RefgateError,
    RegistryError,
};
use serde::{Deserialize, Serialize};

pub mod invariance;
pub mod mechanism;
pub mod shredder;
pub mod stats;
pub mod thermodynamic;

pub use invariance::{ChowConfig, ChowStabilityTest};
pub use mechanism::{IsotonicMechanismCheck, MechanismConfig};
pub use shredder::{Shredder, ShredderConfig};
pub use thermodynamic::{AlgorithmicComplexity, ComplexityConfig};

/// Failed result for input the referee cannot run on.
fn insufficient(name: &str, err: RefgateError) -> RefereeResult {
    RefereeResult {
        standard_used: "input validation".to_string(),
        ..RefereeResult::failed(name, err.to_string())
    }
}

/// Settings for every built-in referee.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefereesConfig {
    pub shredder: ShredderConfig,
    pub chow: ChowConfig,
    pub mechanism: MechanismConfig,
    pub complexity: ComplexityConfig,
}

/// Register the built-in referees with default settings.
pub fn register_builtin(registry: &mut RefereeRegistry) -> Result<(), RegistryError> {
    register_builtin_with(registry, &RefereesConfig::default())
}

/// Register the built-in referees with the given settings.
pub fn register_builtin_with(
    registry: &mut RefereeRegistry,
    config: &RefereesConfig,
) -> Result<(), RegistryError> {
    let shredder_config = config.shredder;
    registry.register(
        RefereeDescriptor::new(shredder::NAME, RefereeCategory::StatisticalIntegrity)
            .cost(2)
            .timeout(Duration::from_secs(30))
            .short_name("Shredder")
            .description("Permutation test of the Pearson correlation against shuffled drivers")
            .alias("permutation_shuffling")
            .alias("shredder")
            .alias("statistical_integrity"),
        move || Box::new(Shredder::new(shredder_config)),
    )?;

    let chow_config = config.chow;
    registry.register(
        RefereeDescriptor::new(invariance::NAME, RefereeCategory::Invariance)
            .cost(4)
            .timeout(Duration::from_secs(45))
            .short_name("Stability")
            .description("Supremum Chow F-test for a structural break in the fitted line")
            .alias("invariance")
            .alias("structural_stability"),
        move || Box::new(ChowStabilityTest::new(chow_config)),
    )?;

    let mechanism_config = config.mechanism.clone();
    registry.register(
        RefereeDescriptor::new(mechanism::NAME, RefereeCategory::Mechanism)
            .cost(4)
            .timeout(Duration::from_secs(60))
            .short_name("Mechanism")
            .description("Spearman monotonicity overall and across x quartiles")
            .alias("monotonicity_stress_test")
            .alias("isotonic_mechanism"),
        move || Box::new(IsotonicMechanismCheck::new(mechanism_config.clone())),
    )?;

    let complexity_config = config.complexity;
    registry.register(
        RefereeDescriptor::new(thermodynamic::NAME, RefereeCategory::Thermodynamic)
            .cost(8)
            .timeout(Duration::from_secs(180))
            .short_name("Thermo")
            .description("Compression gain of y once x is known, against shuffled drivers")
            .alias("compression_complexity"),
        move || Box::new(AlgorithmicComplexity::new(complexity_config)),
    )?;

    log::debug!("{} referees registered", registry.len());
    Ok(())
}

/// A registry holding only the built-in referees.
pub fn builtin_registry() -> RefereeRegistry {
    let mut registry = RefereeRegistry::new();
    // Names and aliases are fixed and distinct, so this cannot collide.
    if let Err(err) = register_builtin(&mut registry) {
        log::error!("built-in referee registration failed: {err}");
    }
    registry
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use refgate_core::{Metadata, Phase};

    /// `y = 2x + noise` with `x = 0..n` and noise roughly N(0, 1).
    pub(crate) fn linear_with_noise(n: usize, seed: u64) -> (Vec<f64>, Vec<f64>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let x: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let y = x.iter().map(|v| 2.0 * v + gaussian(&mut rng)).collect();
        (x, y)
    }

    /// Two independent noise series.
    pub(crate) fn noise_pair(n: usize, seed: u64) -> (Vec<f64>, Vec<f64>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let x = (0..n).map(|_| gaussian(&mut rng)).collect();
        let y = (0..n).map(|_| gaussian(&mut rng)).collect();
        (x, y)
    }

    // Irwin-Hall approximation: sum of 12 uniforms minus 6.
    fn gaussian(rng: &mut StdRng) -> f64 {
        (0..12).map(|_| rng.random::<f64>()).sum::<f64>() - 6.0
    }

    #[test]
    fn builtin_registry_contents() {
        let registry = builtin_registry();
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.cost_of("Permutation_Shredder"), 2);
        assert_eq!(registry.cost_of("Algorithmic_Complexity"), 8);
        assert_eq!(registry.timeout_of("Chow_Stability_Test"), Duration::from_secs(45));
        assert_eq!(registry.short_name_of("Isotonic_Mechanism_Check"), "Mechanism");
        assert_eq!(
            registry.category_of("Algorithmic_Complexity").map(|c| c.phase()),
            Some(Phase::Complexity)
        );
    }

    #[test]
    fn aliases_resolve() {
        let registry = builtin_registry();
        for alias in ["shredder", "PERMUTATION_SHUFFLING", " statistical_integrity "] {
            assert_eq!(registry.get_referee_factory(alias).unwrap().name(), shredder::NAME);
        }
        assert_eq!(
            registry.get_referee_factory("structural_stability").unwrap().name(),
            invariance::NAME
        );
        assert_eq!(
            registry.get_referee_factory("isotonic_mechanism").unwrap().name(),
            mechanism::NAME
        );
        assert_eq!(
            registry.get_referee_factory("compression_complexity").unwrap().name(),
            thermodynamic::NAME
        );
    }

    #[test]
    fn registering_twice_fails() {
        let mut registry = builtin_registry();
        assert!(matches!(
            register_builtin(&mut registry),
            Err(RegistryError::Duplicate(_))
        ));
    }

    #[test]
    fn builtin_tri_gate_is_compatible() {
        let registry = builtin_registry();
        assert!(
            registry
                .validate_compatibility(&[shredder::NAME, invariance::NAME, mechanism::NAME])
                .is_ok()
        );
    }

    #[test]
    fn config_reaches_factories() {
        let mut registry = RefereeRegistry::new();
        let config = RefereesConfig {
            shredder: ShredderConfig {
                iterations: 100,
                alpha: 0.5,
                seed: Some(1),
            },
            ..RefereesConfig::default()
        };
        register_builtin_with(&mut registry, &config).unwrap();
        let (x, y) = noise_pair(30, 8);
        let result = registry
            .get_referee_factory(shredder::NAME)
            .unwrap()
            .execute(&x, &y, &Metadata::new());
        assert!(result.standard_used.contains("N=100"));
    }

    #[test]
    fn config_parses_partial_json() {
        let config: RefereesConfig =
            serde_json::from_str(r#"{"shredder": {"iterations": 500}}"#).unwrap();
        assert_eq!(config.shredder.iterations, 500);
        assert_eq!(config.shredder.alpha, 0.001);
        assert_eq!(config.chow, ChowConfig::default());
    }

    #[test]
    fn insufficient_carries_validation_message() {
        let err = refgate_core::validate_data(&[1.0; 3], &[1.0; 3]).unwrap_err();
        let result = insufficient("X", err);
        assert!(!result.passed);
        assert_eq!(result.standard_used, "input validation");
        assert!(result.failure_reason.contains("minimum 10"));
    }
}
