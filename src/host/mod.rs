//! Seams onto the hosting platform: hosted-worker management and the small
//! windows used to prompt for camera permission.

pub mod local;

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::bus::WindowId;

pub use local::LocalHost;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(pub Uuid);

impl WorkerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerReason {
    UserMedia,
}

/// Identity and justification the host needs to create the detection worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    pub entry: String,
    pub reasons: Vec<WorkerReason>,
    pub justification: String,
}

impl Default for WorkerSpec {
    fn default() -> Self {
        Self {
            entry: "offscreen/offscreen.html".into(),
            reasons: vec![WorkerReason::UserMedia],
            justification: "Access camera for blink detection".into(),
        }
    }
}

/// How a worker close ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The worker handled the stop and exited on its own.
    Stopped,
    /// The worker missed the close deadline and was killed; any events it
    /// owed were never sent.
    Aborted,
}

/// Hosted-worker management. The host allows at most one worker; creating a
/// second one while the first is live fails.
#[async_trait]
pub trait WorkerHost: Send + Sync {
    /// Workers currently alive for `entry`. This is the source of truth; any
    /// cached handle is only a hint.
    async fn live_workers(&self, entry: &str) -> Result<Vec<WorkerId>>;

    async fn create_worker(&self, spec: &WorkerSpec) -> Result<WorkerId>;

    async fn close_worker(&self) -> Result<WorkerExit>;
}

#[async_trait]
pub trait WindowHost: Send + Sync {
    /// Open the status surface in permission mode.
    async fn open_permission_window(&self) -> Result<WindowId>;

    async fn close_window(&self, id: WindowId) -> Result<()>;
}
