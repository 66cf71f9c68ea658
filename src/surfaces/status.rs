use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::{
    bus::MessageBus,
    config::CameraConstraints,
    detection::Camera,
    error::{BusError, CameraError},
    messages::{ErrorPayload, Message, Reply},
    session::{SessionState, SessionStore},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusMode {
    Normal,
    /// Opened by the coordinator to surface the camera permission prompt.
    Permission,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PunishmentView {
    Unknown,
    Normal,
    Punished,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "state", content = "message")]
pub enum PermissionPrompt {
    NotRequested,
    Pending,
    Granted,
    Denied(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub detecting: bool,
    pub punishment: PunishmentView,
    pub last_blink_at: Option<DateTime<Utc>>,
    pub last_error: Option<ErrorPayload>,
    pub permission: PermissionPrompt,
}

impl StatusView {
    fn fresh(session: SessionState) -> Self {
        Self {
            detecting: session.should_detect,
            punishment: PunishmentView::Unknown,
            last_blink_at: None,
            last_error: None,
            permission: PermissionPrompt::NotRequested,
        }
    }

    pub fn detection_label(&self) -> &'static str {
        if self.detecting {
            "running"
        } else {
            "stopped"
        }
    }

    pub fn punishment_label(&self) -> &'static str {
        match self.punishment {
            PunishmentView::Unknown => "unknown",
            PunishmentView::Normal => "normal",
            PunishmentView::Punished => "punished",
        }
    }

    pub fn last_blink_label(&self, now: DateTime<Utc>) -> String {
        let Some(at) = self.last_blink_at else {
            return "not detected".into();
        };
        let seconds = (now - at).num_seconds().max(0);
        if seconds < 60 {
            format!("{seconds} seconds ago")
        } else {
            format!("{} minutes ago", seconds / 60)
        }
    }

    fn apply(&mut self, message: &Message) {
        match message {
            Message::BlinkDetected => self.last_blink_at = Some(Utc::now()),
            Message::PunishMode => self.punishment = PunishmentView::Punished,
            Message::RestoreVision => self.punishment = PunishmentView::Normal,
            Message::DetectionError(payload) => self.last_error = Some(payload.clone()),
            _ => {}
        }
    }
}

/// Everything a surface needs from its environment.
#[derive(Clone)]
pub struct SurfaceContext {
    pub bus: Arc<MessageBus>,
    pub session: SessionStore,
    pub camera: Arc<dyn Camera>,
    pub constraints: CameraConstraints,
}

/// The user-opened status popup. Cheap to clone; all clones share one view.
#[derive(Clone)]
pub struct StatusSurface {
    inner: Arc<Inner>,
}

struct Inner {
    ctx: SurfaceContext,
    mode: StatusMode,
    view: watch::Sender<StatusView>,
    closed: CancellationToken,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

impl StatusSurface {
    /// Open the surface: read the session state once, then follow session
    /// changes and broadcast events until closed. Earlier events are not
    /// replayed, so punishment starts out unknown.
    pub fn open(ctx: SurfaceContext, mode: StatusMode) -> Self {
        let session_rx = ctx.session.subscribe();
        let events = ctx.bus.subscribe();
        let (view, _) = watch::channel(StatusView::fresh(*session_rx.borrow()));

        let surface = Self {
            inner: Arc::new(Inner {
                ctx,
                mode,
                view,
                closed: CancellationToken::new(),
            }),
        };

        tokio::spawn(listen(surface.clone(), session_rx, events));
        surface
    }

    pub fn mode(&self) -> StatusMode {
        self.inner.mode
    }

    pub fn view(&self) -> StatusView {
        self.inner.view.borrow().clone()
    }

    pub fn subscribe_view(&self) -> watch::Receiver<StatusView> {
        self.inner.view.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Resolves once the surface has closed, by itself or via [`close`](Self::close).
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await
    }

    pub fn close(&self) {
        self.inner.closed.cancel();
    }

    /// Start from the popup. The camera is requested here first so a
    /// previously denied session can be unblocked from the Start button;
    /// a refusal is shown in the view and no START is sent.
    pub async fn start_detection(&self) -> Result<Reply, BusError> {
        if self.probe().await.is_err() {
            return Ok(Reply::failed("camera_unavailable"));
        }
        self.report_grant();
        self.inner.ctx.bus.request(Message::StartDetection).await
    }

    pub async fn stop_detection(&self) -> Result<Reply, BusError> {
        self.inner.ctx.bus.request(Message::StopDetection).await
    }

    pub fn request_permission(&self) -> Result<(), BusError> {
        self.inner.ctx.bus.send_command(Message::RequestPermission)
    }

    /// Ask for camera access directly, only to trigger the permission prompt.
    /// On grant the coordinator is told and a permission-mode surface closes
    /// itself; on denial the surface stays open for another try.
    pub async fn grant_permission(&self) -> bool {
        if self.probe().await.is_err() {
            return false;
        }
        self.report_grant();
        if self.inner.mode == StatusMode::Permission {
            self.close();
        }
        true
    }

    async fn probe(&self) -> Result<(), CameraError> {
        self.inner
            .update(|view| view.permission = PermissionPrompt::Pending);

        match probe_camera(&self.inner.ctx).await {
            Ok(()) => {
                info!("camera permission granted");
                self.inner
                    .update(|view| view.permission = PermissionPrompt::Granted);
                Ok(())
            }
            Err(err) => {
                warn!("camera permission request failed: {err}");
                let message = format!("Camera access is required: {}", err.user_message());
                let payload = ErrorPayload {
                    name: err.kind(),
                    message: message.clone(),
                };
                self.inner.update(|view| {
                    view.permission = PermissionPrompt::Denied(message);
                    view.last_error = Some(payload);
                });
                Err(err)
            }
        }
    }

    fn report_grant(&self) {
        if let Err(err) = self.inner.ctx.bus.send_command(Message::PermissionGranted) {
            warn!("could not report permission grant: {err}");
        }
    }
}

impl Inner {
    fn update(&self, change: impl FnOnce(&mut StatusView)) {
        self.view.send_modify(change);
    }
}

async fn probe_camera(ctx: &SurfaceContext) -> Result<(), CameraError> {
    let mut stream = ctx.camera.acquire(&ctx.constraints).await?;
    stream.release();
    Ok(())
}

async fn listen(
    surface: StatusSurface,
    mut session_rx: watch::Receiver<SessionState>,
    mut events: broadcast::Receiver<Message>,
) {
    let closed = surface.inner.closed.clone();
    let _guard = closed.clone().drop_guard();

    if surface.mode() == StatusMode::Permission && surface.grant_permission().await {
        return;
    }

    // Hold only a weak reference from here so dropping every handle closes
    // the surface.
    let weak = Arc::downgrade(&surface.inner);
    drop(surface);

    loop {
        tokio::select! {
            _ = closed.cancelled() => break,
            changed = session_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let detecting = session_rx.borrow_and_update().should_detect;
                let Some(inner) = weak.upgrade() else { break };
                inner.update(|view| view.detecting = detecting);
            }
            event = events.recv() => {
                let message = match event {
                    Ok(message) => message,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("status surface lagged; skipped {skipped} events");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(inner) = weak.upgrade() else { break };
                inner.update(|view| view.apply(&message));
            }
        }
    }
}
