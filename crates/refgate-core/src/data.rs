//! Paired input series and the validation every entry point runs first.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{RefgateError, Result};

/// Minimum number of paired observations any referee is given.
pub const MIN_OBSERVATIONS: usize = 10;

/// Cause (`x`) and effect (`y`) series of equal length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPair {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

impl DataPair {
    /// Build a pair, checking it with [`validate_data`].
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> Result<Self> {
        validate_data(&x, &y)?;
        Ok(Self { x, y })
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Wrap in an `Arc` for sharing across tasks.
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

/// Reject mismatched or too-short series.
pub fn validate_data(x: &[f64], y: &[f64]) -> Result<()> {
    if x.len() != y.len() {
        return Err(RefgateError::InvalidData(format!(
            "x and y must have same length (x={}, y={})",
            x.len(),
            y.len()
        )));
    }
    if x.len() < MIN_OBSERVATIONS {
        return Err(RefgateError::InvalidData(format!(
            "insufficient data points (minimum {MIN_OBSERVATIONS} required, got {})",
            x.len()
        )));
    }
    Ok(())
}
