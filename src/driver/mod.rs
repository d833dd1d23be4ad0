pub mod osascript;

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

use crate::poll::{Clock, PollPolicy, poll_until};
use crate::remote;

pub use osascript::{OsaScriptDriver, WindowGeometry};

/// Opaque handle to one isolated browser session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    id: String,
}

impl SessionHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("session open failed: {0}")]
    Open(String),
    #[error("script evaluation failed: {0}")]
    Script(String),
    #[error("native input failed: {0}")]
    NativeInput(String),
    #[error("`{operation}` timed out after {seconds}s")]
    Timeout {
        operation: &'static str,
        seconds: u64,
    },
}

/// The only two capabilities the pipeline has against the remote application:
/// evaluate a script in the page, and replay native input for the file chooser.
#[async_trait]
pub trait SessionDriver: Send + Sync {
    async fn open(&self, target_url: &str) -> Result<SessionHandle, DriverError>;

    /// Runs `script` against the active document and returns its string result.
    async fn evaluate(&self, handle: &SessionHandle, script: &str) -> Result<String, DriverError>;

    /// Selects `path` in the page's native file chooser.
    async fn upload_file(&self, handle: &SessionHandle, path: &Path) -> Result<(), DriverError>;

    /// Idempotent; failures are logged, never returned.
    async fn close(&self, handle: &SessionHandle);
}

/// Polls `document.readyState` until the page reports `complete`.
///
/// Returns `false` if readiness was never observed; callers proceed anyway.
pub async fn await_ready(
    driver: &dyn SessionDriver,
    handle: &SessionHandle,
    clock: &dyn Clock,
    policy: PollPolicy,
) -> bool {
    let script = remote::document_ready();
    let script = script.as_str();
    let (ready, checks) = poll_until(clock, policy, move || async move {
        match driver.evaluate(handle, script).await {
            Ok(state) if state.trim() == "complete" => Some(()),
            Ok(state) => {
                debug!(target = "stager.driver", state = %state.trim(), "page_not_ready");
                None
            }
            Err(err) => {
                debug!(target = "stager.driver", error = %err, "ready_check_failed");
                None
            }
        }
    })
    .await;
    crate::metrics::poll_checks("readiness", checks);
    if ready.is_none() {
        warn!(target = "stager.driver", session = %handle.id(), checks, "page_ready_not_observed");
    }
    ready.is_some()
}
