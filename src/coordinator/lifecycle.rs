use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::{self, Duration, Instant};

use crate::{
    error::ErrorKind,
    host::{WorkerExit, WorkerHost, WorkerId, WorkerSpec},
};

use super::state::{CoordinatorState, WorkerHandle};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Outcome of [`WorkerLifecycle::ensure_worker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnsuredWorker {
    pub handle: WorkerHandle,
    /// The worker was created by this call, so it has not seen any command
    /// yet and will consult the session flag itself.
    pub created: bool,
}

/// Creates, finds and tears down the single detection worker, treating the
/// host's live-worker query as the source of truth.
#[derive(Clone)]
pub struct WorkerLifecycle {
    host: Arc<dyn WorkerHost>,
    spec: WorkerSpec,
    state: Arc<Mutex<CoordinatorState>>,
}

impl WorkerLifecycle {
    pub fn new(
        host: Arc<dyn WorkerHost>,
        spec: WorkerSpec,
        state: Arc<Mutex<CoordinatorState>>,
    ) -> Self {
        Self { host, spec, state }
    }

    async fn find_live(&self) -> Option<WorkerId> {
        match self.host.live_workers(&self.spec.entry).await {
            Ok(live) => live.into_iter().next(),
            Err(err) => {
                log_warn!("live worker query failed: {err:#}");
                None
            }
        }
    }

    /// Return the live worker, creating one if the host has none. Safe to
    /// race: a losing create re-queries and adopts the winner.
    pub async fn ensure_worker(&self) -> Result<EnsuredWorker, ErrorKind> {
        if let Some(id) = self.find_live().await {
            return Ok(self.adopt(id).await);
        }

        {
            let mut state = self.state.lock().await;
            if let Some(stale) = state.forget_worker() {
                log_warn!("cached worker {} is gone; creating a new one", stale.id);
            }
        }

        match self.host.create_worker(&self.spec).await {
            Ok(id) => {
                let handle = WorkerHandle { id };
                self.state.lock().await.record_worker(handle);
                log_info!("detection worker {id} created");
                Ok(EnsuredWorker {
                    handle,
                    created: true,
                })
            }
            Err(err) => {
                if let Some(id) = self.find_live().await {
                    log_debug!("worker create lost a race ({err:#}); adopting {id}");
                    return Ok(self.adopt(id).await);
                }
                log_error!("failed to create detection worker: {err:#}");
                Err(ErrorKind::WorkerCreationFailed)
            }
        }
    }

    async fn adopt(&self, id: WorkerId) -> EnsuredWorker {
        let handle = WorkerHandle { id };
        let mut state = self.state.lock().await;
        if state.worker != Some(handle) {
            // Not created through this cache (e.g. the coordinator restarted),
            // so its readiness announcement happened before we were listening.
            log_info!("adopting live detection worker {id}");
            state.mark_ready();
        }
        state.record_worker(handle);
        EnsuredWorker {
            handle,
            created: false,
        }
    }

    /// Poll the readiness flag until it is set or `max_wait` elapses.
    pub async fn wait_for_ready(&self, max_wait: Duration, poll_interval: Duration) -> bool {
        let deadline = Instant::now() + max_wait;
        loop {
            if self.state.lock().await.worker_ready {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            time::sleep(poll_interval).await;
        }
    }

    /// Ask the host to destroy the worker. The cached handle is cleared first
    /// and stays cleared even if the host call fails. Returns `true` when the
    /// worker did not shut down cleanly, so a punishment it held may never
    /// have been lifted.
    pub async fn teardown_worker(&self) -> bool {
        let cached = self.state.lock().await.forget_worker();
        let live = self.find_live().await;

        if cached.is_none() && live.is_none() {
            log_debug!("teardown requested with no worker alive");
            return false;
        }

        match self.host.close_worker().await {
            Ok(WorkerExit::Stopped) => {
                log_info!("detection worker closed");
                false
            }
            Ok(WorkerExit::Aborted) => {
                log_warn!("detection worker aborted during close");
                true
            }
            Err(err) => {
                log_error!("failed to close detection worker; handle dropped: {err:#}");
                true
            }
        }
    }
}
