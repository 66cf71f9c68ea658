#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::broadcast;

use blink_or_die_lib::{
    bus::MessageBus,
    config::{CameraConstraints, Config},
    detection::{Camera, CameraStream, Detection, Face, Frame, PipelineLoader, VisionPipeline},
    error::CameraError,
    host::{WorkerExit, WorkerHost, WorkerId, WorkerSpec},
    messages::Message,
    sim::{synthetic_face, SimulatedCamera},
    surfaces::{PageNotice, PageRenderer},
    App,
};

pub const OPEN_EAR: f64 = 0.35;
pub const CLOSED_EAR: f64 = 0.18;

/// Shared handle on what the fake landmark model "sees".
#[derive(Clone)]
pub struct Eyes {
    ear: Arc<Mutex<Option<f64>>>,
    failures: Arc<AtomicUsize>,
}

impl Eyes {
    pub fn open(&self) {
        *self.ear.lock().unwrap() = Some(OPEN_EAR);
    }

    pub fn close(&self) {
        *self.ear.lock().unwrap() = Some(CLOSED_EAR);
    }

    pub fn hide_face(&self) {
        *self.ear.lock().unwrap() = None;
    }

    /// Make the next `ticks` detect calls fail.
    pub fn fail_next(&self, ticks: usize) {
        self.failures.store(ticks, Ordering::SeqCst);
    }
}

pub struct ScriptedLoader {
    eyes: Eyes,
    pub fail_init: AtomicBool,
    pub inits: AtomicUsize,
}

impl ScriptedLoader {
    pub fn new() -> (Arc<Self>, Eyes) {
        let eyes = Eyes {
            ear: Arc::new(Mutex::new(Some(OPEN_EAR))),
            failures: Arc::new(AtomicUsize::new(0)),
        };
        let loader = Arc::new(Self {
            eyes: eyes.clone(),
            fail_init: AtomicBool::new(false),
            inits: AtomicUsize::new(0),
        });
        (loader, eyes)
    }
}

#[async_trait]
impl PipelineLoader for ScriptedLoader {
    async fn init(&self, _model_path: &str) -> Result<Box<dyn VisionPipeline>> {
        if self.fail_init.load(Ordering::SeqCst) {
            bail!("model file unavailable");
        }
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedPipeline {
            eyes: self.eyes.clone(),
        }))
    }
}

struct ScriptedPipeline {
    eyes: Eyes,
}

impl VisionPipeline for ScriptedPipeline {
    fn detect(&mut self, _frame: &Frame, timestamp_ms: u64) -> Result<Detection> {
        let failing = self
            .eyes
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            bail!("landmark model crashed at {timestamp_ms}ms");
        }

        let ear = *self.eyes.ear.lock().unwrap();
        Ok(Detection {
            faces: ear
                .map(|ear| Face {
                    landmarks: synthetic_face(ear),
                })
                .into_iter()
                .collect(),
        })
    }
}

/// Page renderer that writes down every call.
#[derive(Clone, Default)]
pub struct Recorder {
    calls: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == call).count()
    }

    fn push(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

impl PageRenderer for Recorder {
    fn apply_degradation(&mut self) {
        self.push("degrade");
    }

    fn remove_degradation(&mut self) {
        self.push("restore");
    }

    fn show_reminder(&mut self) {
        self.push("show_reminder");
    }

    fn hide_reminder(&mut self) {
        self.push("hide_reminder");
    }

    fn post_notice(&mut self, notice: PageNotice) {
        let name = match notice {
            PageNotice::Pong => "pong".to_string(),
            PageNotice::BlinkDetected => "blink".to_string(),
            PageNotice::DetectionStarted => "started".to_string(),
            PageNotice::DetectionStopped => "stopped".to_string(),
            PageNotice::Error(payload) => format!("error:{:?}", payload.name),
        };
        self.push(name);
    }
}

/// Reads the runtime broadcast, which sees every fanned-out event in order.
pub struct Events {
    rx: broadcast::Receiver<Message>,
}

impl Events {
    pub fn new(bus: &MessageBus) -> Self {
        Self { rx: bus.subscribe() }
    }

    pub async fn next(&mut self) -> Message {
        tokio::time::timeout(Duration::from_secs(60), self.rx.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("event channel closed")
    }

    /// Every event up to and including the first one named `kind`.
    pub async fn until(&mut self, kind: &str) -> Vec<Message> {
        let mut seen = Vec::new();
        loop {
            let event = self.next().await;
            let done = event.kind() == kind;
            seen.push(event);
            if done {
                return seen;
            }
        }
    }

    pub fn drain(&mut self) -> Vec<Message> {
        let mut seen = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            seen.push(event);
        }
        seen
    }
}

pub fn kinds(events: &[Message]) -> Vec<&'static str> {
    events.iter().map(Message::kind).collect()
}

pub struct Harness {
    pub app: App,
    pub camera: Arc<SimulatedCamera>,
    pub loader: Arc<ScriptedLoader>,
    pub eyes: Eyes,
}

impl Harness {
    pub async fn start(config: Config, camera_allowed: bool) -> Self {
        let camera = SimulatedCamera::new(camera_allowed);
        let (loader, eyes) = ScriptedLoader::new();
        let app = App::start(config, camera.clone(), loader.clone())
            .await
            .unwrap();
        Self {
            app,
            camera,
            loader,
            eyes,
        }
    }

    pub async fn running() -> Self {
        Self::start(Config::default(), true).await
    }
}

/// Let every task run until the runtime is idle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Camera whose acquire never completes, leaving its worker stuck.
pub struct HangingCamera;

#[async_trait]
impl Camera for HangingCamera {
    async fn acquire(
        &self,
        _constraints: &CameraConstraints,
    ) -> Result<Box<dyn CameraStream>, CameraError> {
        std::future::pending().await
    }
}

/// Wraps a host and refuses every create.
pub struct RefusingHost<H> {
    pub inner: Arc<H>,
    pub attempts: AtomicUsize,
}

impl<H> RefusingHost<H> {
    pub fn new(inner: Arc<H>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            attempts: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl<H: WorkerHost> WorkerHost for RefusingHost<H> {
    async fn live_workers(&self, entry: &str) -> Result<Vec<WorkerId>> {
        self.inner.live_workers(entry).await
    }

    async fn create_worker(&self, _spec: &WorkerSpec) -> Result<WorkerId> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        bail!("offscreen documents are disabled")
    }

    async fn close_worker(&self) -> Result<WorkerExit> {
        self.inner.close_worker().await
    }
}
