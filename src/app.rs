use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{
    bus::{MessageBus, PageId},
    config::Config,
    coordinator::Coordinator,
    detection::{Camera, PipelineLoader, WorkerDeps},
    error::BusError,
    host::LocalHost,
    messages::{Message, Reply},
    session::SessionStore,
    surfaces::{PageRenderer, PageRequest, PageSurface, StatusMode, StatusSurface},
};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// A running page surface.
pub struct PageHandle<R> {
    pub id: PageId,
    requests: mpsc::UnboundedSender<PageRequest>,
    task: JoinHandle<R>,
}

impl<R> PageHandle<R> {
    /// Post a request as the page's own script would.
    pub fn post(&self, request: PageRequest) -> Result<()> {
        self.requests
            .send(request)
            .map_err(|_| anyhow::anyhow!("page {} has unloaded", self.id))
    }

    /// Unload the page and get its renderer back.
    pub async fn close(self) -> Result<R> {
        drop(self.requests);
        self.task
            .await
            .with_context(|| format!("page {} task failed", self.id))
    }
}

/// All contexts wired together over one in-process bus.
pub struct App {
    config: Config,
    bus: Arc<MessageBus>,
    session: SessionStore,
    host: Arc<LocalHost>,
    coordinator: Coordinator,
    coordinator_task: JoinHandle<()>,
}

impl App {
    /// Build the bus, start the coordinator and bring up the worker. The
    /// worker resumes detection on its own if the session asks for it.
    pub async fn start(
        config: Config,
        camera: Arc<dyn Camera>,
        pipelines: Arc<dyn PipelineLoader>,
    ) -> Result<Self> {
        let (bus, inbox) = MessageBus::new();

        let session = match &config.session_file {
            Some(path) => SessionStore::open(path.clone())?,
            None => SessionStore::in_memory(),
        };

        let deps = WorkerDeps {
            bus: bus.clone(),
            session: session.clone(),
            camera,
            pipelines,
            detection: config.detection.clone(),
            constraints: config.camera.clone(),
        };
        let host = Arc::new(LocalHost::new(
            deps,
            config.coordinator.worker_close_timeout(),
        ));

        let coordinator = Coordinator::new(
            bus.clone(),
            session.clone(),
            host.clone(),
            host.clone(),
            config.coordinator.clone(),
        );
        let coordinator_task = coordinator.clone().spawn(inbox);
        coordinator.startup().await;

        log_info!(
            "blink-or-die running (threshold {}, timeout {} ms, resume: {})",
            config.detection.blink_threshold,
            config.detection.punish_timeout_ms,
            session.should_detect()
        );

        Ok(Self {
            config,
            bus,
            session,
            host,
            coordinator,
            coordinator_task,
        })
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn host(&self) -> &Arc<LocalHost> {
        &self.host
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn open_page<R: PageRenderer>(&self, renderer: R) -> PageHandle<R> {
        let (surface, inbox) = PageSurface::open(self.bus.clone(), renderer, &self.config.page);
        let id = surface.id();
        let (requests, request_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(surface.run(inbox, request_rx));
        PageHandle { id, requests, task }
    }

    pub fn open_status(&self) -> StatusSurface {
        StatusSurface::open(self.host.surface_context(), StatusMode::Normal)
    }

    pub async fn request(&self, message: Message) -> Result<Reply, BusError> {
        self.bus.request(message).await
    }

    /// Stop the worker and the coordinator. The session flag is left as is
    /// so the next start resumes where this one ended.
    pub async fn shutdown(self) {
        self.coordinator_task.abort();
        if let Err(err) = self.coordinator_task.await {
            if !err.is_cancelled() {
                log_warn!("coordinator task failed: {err}");
            }
        }
        self.coordinator.lifecycle().teardown_worker().await;
        log_info!("blink-or-die stopped");
    }
}
