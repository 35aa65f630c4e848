//! Progress notifications for whatever is watching a validation run.
//!
//! The engine calls the broadcaster when a test starts and when it finishes.
//! Delivery is best effort: a failing broadcaster is logged and ignored.

use crate::error::BroadcastError;

/// Sink for per-test status updates.
pub trait UiBroadcaster: Send + Sync {
    fn broadcast_test_status_update(
        &self,
        session_id: &str,
        hypothesis_id: &str,
        test_name: &str,
        short_name: &str,
        passed: bool,
        completed: bool,
    ) -> Result<(), BroadcastError>;
}

/// Discards every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBroadcaster;

impl UiBroadcaster for NoopBroadcaster {
    fn broadcast_test_status_update(
        &self,
        _session_id: &str,
        _hypothesis_id: &str,
        _test_name: &str,
        _short_name: &str,
        _passed: bool,
        _completed: bool,
    ) -> Result<(), BroadcastError> {
        Ok(())
    }
}

/// Writes updates to the `log` facade at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogBroadcaster;

impl UiBroadcaster for LogBroadcaster {
    fn broadcast_test_status_update(
        &self,
        session_id: &str,
        hypothesis_id: &str,
        test_name: &str,
        short_name: &str,
        passed: bool,
        completed: bool,
    ) -> Result<(), BroadcastError> {
        let status = match (completed, passed) {
            (false, _) => "running",
            (true, true) => "passed",
            (true, false) => "failed",
        };
        log::debug!("[{session_id}] {hypothesis_id}: {test_name} ({short_name}) {status}");
        Ok(())
    }
}
