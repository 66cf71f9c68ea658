use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    bus::MessageBus,
    config::{CameraConstraints, DetectionConfig},
    error::ErrorKind,
    messages::Message,
    session::SessionStore,
};

use super::{
    camera::Camera,
    pipeline::PipelineLoader,
    sampler::{sampling_loop, SamplerOutput, SamplerParts},
    state::{DetectorStatus, EyeState},
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Everything a worker needs from its host. The camera and pipeline loader
/// are reachable only from here.
#[derive(Clone)]
pub struct WorkerDeps {
    pub bus: Arc<MessageBus>,
    pub session: SessionStore,
    pub camera: Arc<dyn Camera>,
    pub pipelines: Arc<dyn PipelineLoader>,
    pub detection: DetectionConfig,
    pub constraints: CameraConstraints,
}

struct Sampler {
    handle: JoinHandle<SamplerOutput>,
    cancel_token: CancellationToken,
}

/// The hosted worker: owns the camera stream and the vision pipeline while
/// detecting, and reports everything else as events to the coordinator.
pub struct DetectionWorker {
    deps: WorkerDeps,
    status: Arc<watch::Sender<DetectorStatus>>,
    sampler: Option<Sampler>,
}

impl DetectionWorker {
    pub fn new(deps: WorkerDeps) -> Self {
        let (status, _) = watch::channel(DetectorStatus::Idle);
        Self {
            deps,
            status: Arc::new(status),
            sampler: None,
        }
    }

    pub fn status(&self) -> watch::Receiver<DetectorStatus> {
        self.status.subscribe()
    }

    /// Announce readiness, resume if the session says detection should be on,
    /// then serve commands until the inbox closes.
    pub async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Message>) {
        self.emit(Message::OffscreenReady);
        log_info!("detection worker ready");

        if self.deps.session.should_detect() {
            log_info!("session wants detection; resuming");
            self.start_detection().await;
        }

        while let Some(message) = inbox.recv().await {
            match message {
                Message::StartDetection => self.start_detection().await,
                Message::StopDetection => self.stop_detection().await,
                other => log_debug!("worker ignoring {}", other.kind()),
            }
        }

        if self.current_status() != DetectorStatus::Idle {
            self.stop_detection().await;
        }
        log_info!("detection worker exiting");
    }

    fn current_status(&self) -> DetectorStatus {
        *self.status.borrow()
    }

    pub async fn start_detection(&mut self) {
        match self.current_status() {
            DetectorStatus::AcquiringCamera
            | DetectorStatus::Detecting
            | DetectorStatus::Punishing => {
                log_debug!("start ignored; detection already active");
                return;
            }
            DetectorStatus::Idle | DetectorStatus::Error => {}
        }

        self.status.send_replace(DetectorStatus::AcquiringCamera);

        let mut stream = match self.deps.camera.acquire(&self.deps.constraints).await {
            Ok(stream) => stream,
            Err(err) => {
                log_error!("camera acquisition failed: {err}");
                self.fail(err.kind(), err.user_message());
                return;
            }
        };

        let pipeline = match self.deps.pipelines.init(&self.deps.detection.model_path).await {
            Ok(pipeline) => pipeline,
            Err(err) => {
                log_error!("vision pipeline init failed: {err:#}");
                stream.release();
                self.fail(
                    ErrorKind::PipelineInitFailed,
                    format!("{}: {err}", ErrorKind::PipelineInitFailed.user_message()),
                );
                return;
            }
        };

        let mut eye = EyeState::new(&self.deps.detection);
        eye.reset(0);

        self.status.send_replace(DetectorStatus::Detecting);
        self.emit(Message::DetectionStarted);
        log_info!("blink detection started");

        let cancel_token = CancellationToken::new();
        let parts = SamplerParts {
            stream,
            pipeline,
            eye,
            interval: self.deps.detection.sample_interval(),
            started: Instant::now(),
        };
        let handle = tokio::spawn(sampling_loop(
            self.deps.bus.clone(),
            self.status.clone(),
            parts,
            cancel_token.clone(),
        ));

        self.sampler = Some(Sampler {
            handle,
            cancel_token,
        });
    }

    /// Stop sampling and release the camera. A punished consumer is always
    /// restored before `DETECTION_STOPPED` goes out.
    pub async fn stop_detection(&mut self) {
        if self.current_status() == DetectorStatus::Idle {
            return;
        }

        if let Some(sampler) = self.sampler.take() {
            sampler.cancel_token.cancel();
            match sampler.handle.await {
                Ok(mut output) => {
                    output.stream.release();
                    if output.eye.is_punishing() {
                        self.emit(Message::RestoreVision);
                    }
                }
                Err(err) => {
                    // Punishment state died with the task.
                    log_error!("sampling loop failed to join: {err}");
                    self.emit(Message::RestoreVision);
                }
            }
        }

        self.status.send_replace(DetectorStatus::Idle);
        self.emit(Message::DetectionStopped);
        log_info!("blink detection stopped");
    }

    fn fail(&mut self, kind: ErrorKind, message: String) {
        self.status.send_replace(DetectorStatus::Error);
        self.emit(Message::detection_error(kind, message));
    }

    fn emit(&self, message: Message) {
        if let Err(err) = self.deps.bus.send_command(message) {
            log_warn!("worker event dropped: {err}");
        }
    }
}
