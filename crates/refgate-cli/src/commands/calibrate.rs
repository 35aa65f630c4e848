use refgate_core::{EValue, EvidenceCalibrator};

use super::{Settings, fail};

pub struct CalibrateCommandConfig<'a> {
    pub p: f64,
    pub test_type: &'a str,
    pub two_tailed: bool,
    pub q: Option<f64>,
    pub sample_size: usize,
}

pub fn run(settings: &Settings, cfg: CalibrateCommandConfig<'_>) {
    let e = convert(&settings.calibrator(), &cfg);
    match serde_json::to_string_pretty(&e) {
        Ok(text) => println!("{text}"),
        Err(err) => fail(err),
    }
}

/// q-value conversion when a q-value is given, p-value conversion otherwise.
pub fn convert(calibrator: &EvidenceCalibrator, cfg: &CalibrateCommandConfig<'_>) -> EValue {
    match cfg.q {
        Some(q) => calibrator.convert_q_value_to_e_value(q, cfg.p, cfg.test_type, cfg.sample_size),
        None => calibrator.convert_p_value_to_e_value(cfg.p, cfg.test_type, cfg.two_tailed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(p: f64, q: Option<f64>) -> CalibrateCommandConfig<'static> {
        CalibrateCommandConfig {
            p,
            test_type: "correlation_pearson",
            two_tailed: true,
            q,
            sample_size: 100,
        }
    }

    #[test]
    fn p_value_path() {
        let calibrator = EvidenceCalibrator::default();
        let e = convert(&calibrator, &cfg(0.02, None));
        assert!((e.value - 50.0).abs() < 1e-9);
        assert_eq!(e.test_type, "correlation_pearson");
    }

    #[test]
    fn q_value_path_differs_from_p_path() {
        let calibrator = EvidenceCalibrator::default();
        let by_q = convert(&calibrator, &cfg(0.02, Some(0.2)));
        let by_p = convert(&calibrator, &cfg(0.02, None));
        assert!(by_q.value < by_p.value);
    }
}
