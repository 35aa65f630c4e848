//! The referee contract and the result types that flow through the engine.
//!
//! Every statistical test implements [`Referee`]. The core never looks inside
//! a referee: it constructs one through the registry, hands it the data pair
//! and reads back a [`RefereeResult`].

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::evidence::HypothesisQuality;

/// Free-form per-call parameters handed to a referee.
pub type Metadata = HashMap<String, serde_json::Value>;

/// Family of statistical validation a referee belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefereeCategory {
    /// Permutation and resampling tests against chance.
    StatisticalIntegrity,
    /// Direction of information flow.
    Directional,
    /// Confounder removal.
    AntiConfounder,
    /// Structural stability across regimes.
    Invariance,
    /// Functional form of the relationship.
    Mechanism,
    /// Sensitivity to individual observations.
    Sensitivity,
    /// Shape of the joint point cloud.
    Topological,
    /// Compression and complexity arguments.
    Thermodynamic,
    /// Synthetic interventions.
    Counterfactual,
    /// Frequency-domain coherence.
    Spectral,
}

impl RefereeCategory {
    /// All categories in declaration order.
    pub const ALL: [RefereeCategory; 10] = [
        Self::StatisticalIntegrity,
        Self::Directional,
        Self::AntiConfounder,
        Self::Invariance,
        Self::Mechanism,
        Self::Sensitivity,
        Self::Topological,
        Self::Thermodynamic,
        Self::Counterfactual,
        Self::Spectral,
    ];

    /// Validation phase tests of this category run in.
    pub fn phase(self) -> Phase {
        match self {
            Self::StatisticalIntegrity => Phase::Integrity,
            Self::Directional | Self::AntiConfounder => Phase::Causality,
            Self::Invariance
            | Self::Mechanism
            | Self::Sensitivity
            | Self::Topological
            | Self::Thermodynamic
            | Self::Counterfactual
            | Self::Spectral => Phase::Complexity,
        }
    }
}

impl std::fmt::Display for RefereeCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StatisticalIntegrity => write!(f, "statistical-integrity"),
            Self::Directional => write!(f, "directional"),
            Self::AntiConfounder => write!(f, "anti-confounder"),
            Self::Invariance => write!(f, "invariance"),
            Self::Mechanism => write!(f, "mechanism"),
            Self::Sensitivity => write!(f, "sensitivity"),
            Self::Topological => write!(f, "topological"),
            Self::Thermodynamic => write!(f, "thermodynamic"),
            Self::Counterfactual => write!(f, "counterfactual"),
            Self::Spectral => write!(f, "spectral"),
        }
    }
}

impl FromStr for RefereeCategory {
    type Err = RegistryError;

    /// Accepts the display names as well as the legacy upper-case spellings
    /// (`SHREDDER`, `ANTI_CONFOUNDER`, ...). Case and `-`/`_` are ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase().replace('-', "_");
        match key.as_str() {
            "statistical_integrity" | "shredder" => Ok(Self::StatisticalIntegrity),
            "directional" => Ok(Self::Directional),
            "anti_confounder" => Ok(Self::AntiConfounder),
            "invariance" => Ok(Self::Invariance),
            "mechanism" => Ok(Self::Mechanism),
            "sensitivity" => Ok(Self::Sensitivity),
            "topological" => Ok(Self::Topological),
            "thermodynamic" => Ok(Self::Thermodynamic),
            "counterfactual" => Ok(Self::Counterfactual),
            "spectral" => Ok(Self::Spectral),
            _ => Err(RegistryError::UnknownCategory(s.to_string())),
        }
    }
}

/// Validation tier. Phases run strictly in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Integrity,
    Causality,
    Complexity,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Integrity, Phase::Causality, Phase::Complexity];

    /// Position of the phase in the pipeline (0, 1, 2).
    pub fn index(self) -> usize {
        match self {
            Self::Integrity => 0,
            Self::Causality => 1,
            Self::Complexity => 2,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integrity => write!(f, "integrity"),
            Self::Causality => write!(f, "causality"),
            Self::Complexity => write!(f, "complexity"),
        }
    }
}

/// Outcome of a single referee run.
///
/// `failure_reason` is empty exactly when `passed` is true. `p_value` is
/// `None` when the referee never produced a statistic (construction failure,
/// capacity timeout, insufficient data).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefereeResult {
    pub gate_name: String,
    pub passed: bool,
    pub statistic: f64,
    pub p_value: Option<f64>,
    /// E-value reported by the referee itself, if it computes one.
    #[serde(default)]
    pub e_value: Option<f64>,
    pub standard_used: String,
    pub failure_reason: String,
}

impl RefereeResult {
    /// A failed result that carries no statistic.
    pub fn failed(gate_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            gate_name: gate_name.into(),
            passed: false,
            statistic: 0.0,
            p_value: None,
            e_value: None,
            standard_used: String::new(),
            failure_reason: reason.into(),
        }
    }
}

/// Statistical evidence carried over from the discovery stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryEvidence {
    pub cause_key: String,
    pub effect_key: String,
    pub test_type: String,
    pub p_value: f64,
    /// FDR-corrected q-value.
    pub q_value: f64,
    pub sample_size: usize,
    pub total_comparisons: usize,
    pub fdr_method: String,
}

/// The contract all referees satisfy.
///
/// Implementations must be safe to run concurrently with other referees; a
/// fresh instance is constructed for every job.
pub trait Referee: Send + Sync {
    /// Gate name reported in results.
    fn name(&self) -> &str;

    /// Run the test from scratch on the paired series.
    fn execute(&self, x: &[f64], y: &[f64], metadata: &Metadata) -> RefereeResult;

    /// Audit evidence from the discovery stage instead of recomputing it.
    fn audit_evidence(
        &self,
        evidence: &DiscoveryEvidence,
        _validation_data: &[f64],
        _metadata: &Metadata,
    ) -> RefereeResult {
        default_audit_evidence(self.name(), evidence)
    }
}

/// Conservative audit used by referees without their own audit logic:
/// passes when q ≤ 0.01 and reports E = 1/q.
pub fn default_audit_evidence(gate_name: &str, evidence: &DiscoveryEvidence) -> RefereeResult {
    let q = evidence.q_value;
    let e_value = if q > 0.0 { 1.0 / q } else { f64::INFINITY };
    let passed = q <= 0.01;
    let failure_reason = if passed {
        String::new()
    } else {
        format!("Evidence audit failed (q={q:.4}). Referee {gate_name} requires q<=0.01 for validation.")
    };
    RefereeResult {
        gate_name: gate_name.to_string(),
        passed,
        statistic: e_value,
        p_value: Some(q),
        e_value: Some(e_value),
        standard_used: "Evidence audit (q <= 0.01) with E-value calibration".to_string(),
        failure_reason,
    }
}

/// Outcome of a three-referee gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriGateResult {
    pub referee_results: Vec<RefereeResult>,
    pub overall_passed: bool,
    pub confidence: f64,
    pub quality: HypothesisQuality,
    pub rationale: String,
}

/// All three referees must pass; confidence is the pass fraction.
pub fn evaluate_tri_gate(results: Vec<RefereeResult>) -> TriGateResult {
    if results.len() != 3 {
        let rationale = format!(
            "Invalid number of referees (expected 3, got {})",
            results.len()
        );
        return TriGateResult {
            referee_results: results,
            overall_passed: false,
            confidence: 0.0,
            quality: HypothesisQuality::VeryWeak,
            rationale,
        };
    }

    let failed: Vec<&str> = results
        .iter()
        .filter(|r| !r.passed)
        .map(|r| r.gate_name.as_str())
        .collect();
    let passed_count = results.len() - failed.len();
    let confidence = passed_count as f64 / 3.0;
    let overall_passed = failed.is_empty();
    let rationale = if overall_passed {
        "All three referees passed validation".to_string()
    } else {
        format!(
            "Hypothesis failed validation at {} referee(s): {}",
            failed.len(),
            failed.join(", ")
        )
    };

    TriGateResult {
        quality: HypothesisQuality::from_normalized(confidence),
        referee_results: results,
        overall_passed,
        confidence,
        rationale,
    }
}
