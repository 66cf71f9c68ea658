//! The always-available router: owns the worker lifecycle and the permission
//! gate, and fans every worker event out to the surfaces.

pub mod lifecycle;
pub mod state;

use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::{
    bus::{CoordinatorInbox, Inbound, MessageBus, WindowId},
    config::CoordinatorConfig,
    error::ErrorKind,
    host::{WindowHost, WorkerHost, WorkerSpec},
    messages::{ErrorPayload, Message, Reply},
    session::SessionStore,
};

pub use lifecycle::{EnsuredWorker, WorkerLifecycle};
pub use state::{CoordinatorSnapshot, CoordinatorState, PermissionWindow, WorkerHandle};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

pub type Responder = oneshot::Sender<Reply>;

#[derive(Clone)]
pub struct Coordinator {
    bus: Arc<MessageBus>,
    session: SessionStore,
    windows: Arc<dyn WindowHost>,
    lifecycle: WorkerLifecycle,
    state: Arc<Mutex<CoordinatorState>>,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(
        bus: Arc<MessageBus>,
        session: SessionStore,
        workers: Arc<dyn WorkerHost>,
        windows: Arc<dyn WindowHost>,
        config: CoordinatorConfig,
    ) -> Self {
        let state = Arc::new(Mutex::new(CoordinatorState::default()));
        Self {
            bus,
            session,
            windows,
            lifecycle: WorkerLifecycle::new(workers, WorkerSpec::default(), state.clone()),
            state,
            config,
        }
    }

    pub fn lifecycle(&self) -> &WorkerLifecycle {
        &self.lifecycle
    }

    pub async fn snapshot(&self) -> CoordinatorSnapshot {
        self.state.lock().await.snapshot()
    }

    /// Bring the worker up at process start. The worker itself decides
    /// whether to resume detection from the session flag.
    pub async fn startup(&self) {
        if let Err(kind) = self.lifecycle.ensure_worker().await {
            log_error!("startup could not create the detection worker: {kind}");
        }
    }

    pub fn spawn(self, inbox: CoordinatorInbox) -> JoinHandle<()> {
        tokio::spawn(self.run(inbox))
    }

    /// Drain the inbox in arrival order.
    pub async fn run(self, mut inbox: CoordinatorInbox) {
        while let Some(inbound) = inbox.recv().await {
            match inbound {
                Inbound::Message { message, reply } => {
                    self.on_command(message, reply).await;
                }
                Inbound::WindowClosed(id) => self.on_window_closed(id).await,
            }
        }
        log_info!("coordinator inbox closed");
    }

    /// Handle one message. Returns `true` when the reply (if any) will be
    /// sent later from a spawned task, `false` when it was settled here.
    /// Never waits on worker readiness.
    pub async fn on_command(&self, message: Message, reply: Option<Responder>) -> bool {
        log_debug!("coordinator received {}", message.kind());

        match message {
            Message::StartDetection => {
                if self.state.lock().await.detection_blocked {
                    log_warn!("camera permission is blocked; ignoring START_DETECTION");
                    self.bus.fan_out(&Message::DetectionError(ErrorPayload::from_kind(
                        ErrorKind::PermissionDenied,
                    )));
                    respond(reply, Reply::failed("detection_blocked"));
                    return false;
                }
                self.spawn_start(reply);
                true
            }
            Message::StopDetection => {
                self.session.record_should_detect(false);
                if self.lifecycle.teardown_worker().await {
                    // The worker never got to restore; do it on its behalf.
                    self.bus.fan_out(&Message::RestoreVision);
                }
                respond(reply, Reply::ok());
                false
            }
            Message::RequestPermission => {
                self.request_permission().await;
                respond(reply, Reply::ok());
                false
            }
            Message::PermissionGranted => {
                let window = {
                    let mut state = self.state.lock().await;
                    state.unblock();
                    state.take_permission_window()
                };
                log_info!("camera permission granted; lifting block");
                if let Some(id) = window {
                    self.close_window(id).await;
                }
                respond(reply, Reply::ok());
                self.spawn_start(None);
                false
            }
            Message::DetectionStarted => {
                self.session.record_should_detect(true);
                self.fan_out(message, reply)
            }
            Message::DetectionStopped => {
                self.session.record_should_detect(false);
                self.fan_out(message, reply)
            }
            Message::DetectionError(ref payload) => {
                if payload.name.blocks_detection() {
                    log_warn!("camera permission denied; blocking further starts");
                    self.state.lock().await.block();
                }
                self.fan_out(message, reply)
            }
            Message::PunishMode | Message::RestoreVision | Message::BlinkDetected => {
                self.fan_out(message, reply)
            }
            Message::OffscreenReady => {
                self.state.lock().await.mark_ready();
                log_info!("detection worker reported ready");
                respond(reply, Reply::ok());
                false
            }
        }
    }

    pub async fn on_window_closed(&self, id: WindowId) {
        if self.state.lock().await.window_closed(id) {
            log_info!("permission window {id} closed");
        }
    }

    fn fan_out(&self, message: Message, reply: Option<Responder>) -> bool {
        let pages = self.bus.fan_out(&message);
        log_debug!("{} delivered to {pages} page(s)", message.kind());
        respond(reply, Reply::ok());
        false
    }

    /// Persist the intent, make sure a worker exists, give it a bounded time
    /// to become ready, then forward the start either way. A worker created
    /// here already resumes from the session flag, so it gets no second START.
    fn spawn_start(&self, reply: Option<Responder>) {
        self.session.record_should_detect(true);
        let this = self.clone();

        tokio::spawn(async move {
            let outcome = match this.lifecycle.ensure_worker().await {
                Ok(EnsuredWorker { handle, created }) => {
                    let ready = this
                        .lifecycle
                        .wait_for_ready(this.config.ready_wait(), this.config.ready_poll())
                        .await;
                    if !ready {
                        log_warn!("worker {} not ready in time", handle.id);
                    }

                    if created && this.session.should_detect() {
                        log_info!("worker {} resumes from the session by itself", handle.id);
                    } else {
                        log_info!("forwarding START_DETECTION to worker {}", handle.id);
                        if let Err(err) = this.bus.send_to_worker(Message::StartDetection) {
                            log_warn!("START_DETECTION not delivered: {err}");
                        }
                    }
                    Reply::ok()
                }
                Err(kind) => {
                    log_error!("cannot start detection: {kind}");
                    Reply::failed("create_worker_failed")
                }
            };
            respond(reply, outcome);
        });
    }

    async fn request_permission(&self) {
        if !self.state.lock().await.begin_permission_request() {
            log_info!("permission window already open");
            return;
        }

        let this = self.clone();
        tokio::spawn(async move {
            match this.windows.open_permission_window().await {
                Ok(id) => {
                    let wanted = this.state.lock().await.finish_permission_request(id);
                    if wanted {
                        log_info!("permission window {id} opened");
                    } else {
                        this.close_window(id).await;
                    }
                }
                Err(err) => {
                    log_error!("failed to open permission window: {err:#}");
                    this.state.lock().await.abandon_permission_request();
                }
            }
        });
    }

    async fn close_window(&self, id: WindowId) {
        if let Err(err) = self.windows.close_window(id).await {
            log_debug!("window {id} already closed: {err:#}");
        }
    }
}

fn respond(reply: Option<Responder>, value: Reply) {
    if let Some(tx) = reply {
        // The caller may have stopped listening.
        let _ = tx.send(value);
    }
}
