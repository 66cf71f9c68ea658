use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex as StdMutex, PoisonError,
    },
    time::Duration,
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::{
    sync::{mpsc, watch, Mutex},
    task::JoinHandle,
    time,
};

use crate::{
    bus::WindowId,
    detection::{DetectionWorker, DetectorStatus, WorkerDeps},
    messages::Message,
    surfaces::{StatusMode, StatusSurface, SurfaceContext},
};

use super::{WindowHost, WorkerExit, WorkerHost, WorkerId, WorkerSpec};

struct LiveWorker {
    id: WorkerId,
    entry: String,
    handle: JoinHandle<()>,
    status: watch::Receiver<DetectorStatus>,
}

impl LiveWorker {
    fn is_live(&self) -> bool {
        !self.handle.is_finished()
    }
}

#[derive(Default)]
struct WindowRegistry {
    next_id: WindowId,
    open: BTreeMap<WindowId, StatusSurface>,
}

/// In-process host: workers are tokio tasks and windows are status surfaces.
pub struct LocalHost {
    deps: WorkerDeps,
    close_timeout: Duration,
    worker: Mutex<Option<LiveWorker>>,
    windows: Arc<StdMutex<WindowRegistry>>,
    workers_created: AtomicUsize,
    windows_opened: AtomicUsize,
}

impl LocalHost {
    pub fn new(deps: WorkerDeps, close_timeout: Duration) -> Self {
        Self {
            deps,
            close_timeout,
            worker: Mutex::new(None),
            windows: Arc::new(StdMutex::new(WindowRegistry::default())),
            workers_created: AtomicUsize::new(0),
            windows_opened: AtomicUsize::new(0),
        }
    }

    pub fn workers_created(&self) -> usize {
        self.workers_created.load(Ordering::SeqCst)
    }

    pub fn windows_opened(&self) -> usize {
        self.windows_opened.load(Ordering::SeqCst)
    }

    /// Status of the live worker, if any.
    pub async fn worker_status(&self) -> Option<watch::Receiver<DetectorStatus>> {
        let guard = self.worker.lock().await;
        guard
            .as_ref()
            .filter(|worker| worker.is_live())
            .map(|worker| worker.status.clone())
    }

    pub fn permission_window(&self, id: WindowId) -> Option<StatusSurface> {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .open
            .get(&id)
            .cloned()
    }

    pub fn open_windows(&self) -> Vec<WindowId> {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .open
            .keys()
            .copied()
            .collect()
    }

    pub fn surface_context(&self) -> SurfaceContext {
        SurfaceContext {
            bus: self.deps.bus.clone(),
            session: self.deps.session.clone(),
            camera: self.deps.camera.clone(),
            constraints: self.deps.constraints.clone(),
        }
    }
}

#[async_trait]
impl WorkerHost for LocalHost {
    async fn live_workers(&self, entry: &str) -> Result<Vec<WorkerId>> {
        let guard = self.worker.lock().await;
        Ok(guard
            .iter()
            .filter(|worker| worker.is_live() && worker.entry == entry)
            .map(|worker| worker.id)
            .collect())
    }

    async fn create_worker(&self, spec: &WorkerSpec) -> Result<WorkerId> {
        let mut guard = self.worker.lock().await;
        if let Some(existing) = guard.as_ref().filter(|worker| worker.is_live()) {
            bail!("only a single detection worker may exist (live: {})", existing.id);
        }

        let (tx, inbox) = mpsc::unbounded_channel();
        self.deps.bus.attach_worker(tx);

        let worker = DetectionWorker::new(self.deps.clone());
        let status = worker.status();
        let handle = tokio::spawn(worker.run(inbox));

        let id = WorkerId::new();
        info!("created detection worker {id} for {} ({})", spec.entry, spec.justification);
        *guard = Some(LiveWorker {
            id,
            entry: spec.entry.clone(),
            handle,
            status,
        });
        self.workers_created.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    /// Deliver a stop, detach the inbox so the worker drains and exits, and
    /// wait a bounded time before aborting it.
    async fn close_worker(&self) -> Result<WorkerExit> {
        let Some(mut worker) = self.worker.lock().await.take() else {
            bail!("no detection worker to close");
        };

        if let Err(err) = self.deps.bus.send_to_worker(Message::StopDetection) {
            debug!("worker {} already gone: {err}", worker.id);
        }
        self.deps.bus.detach_worker();

        if time::timeout(self.close_timeout, &mut worker.handle).await.is_err() {
            warn!("worker {} did not stop within {:?}; aborting", worker.id, self.close_timeout);
            worker.handle.abort();
            return Ok(WorkerExit::Aborted);
        }
        info!("closed detection worker {}", worker.id);
        Ok(WorkerExit::Stopped)
    }
}

#[async_trait]
impl WindowHost for LocalHost {
    async fn open_permission_window(&self) -> Result<WindowId> {
        let surface = StatusSurface::open(self.surface_context(), StatusMode::Permission);

        let id = {
            let mut registry = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
            registry.next_id += 1;
            let id = registry.next_id;
            registry.open.insert(id, surface.clone());
            id
        };
        self.windows_opened.fetch_add(1, Ordering::SeqCst);

        let windows = self.windows.clone();
        let bus = self.deps.bus.clone();
        tokio::spawn(async move {
            surface.closed().await;
            windows
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .open
                .remove(&id);
            bus.notify_window_closed(id);
        });

        info!("opened permission window {id}");
        Ok(id)
    }

    async fn close_window(&self, id: WindowId) -> Result<()> {
        let surface = self
            .windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .open
            .remove(&id);

        match surface {
            Some(surface) => {
                surface.close();
                Ok(())
            }
            None => bail!("window {id} is not open"),
        }
    }
}
