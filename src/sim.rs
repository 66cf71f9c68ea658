//! Synthetic camera and landmark pipeline, for running without hardware.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use anyhow::Result;
use async_trait::async_trait;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    config::CameraConstraints,
    detection::{
        ear::{Landmark, FACE_MESH_POINTS, LEFT_EYE, RIGHT_EYE},
        Camera, CameraStream, Detection, Face, Frame, PipelineLoader, VisionPipeline,
    },
    error::CameraError,
};

/// A 468-point mesh whose eyes both measure `ear`.
pub fn synthetic_face(ear: f64) -> Vec<Landmark> {
    let mut mesh = vec![Landmark::new(0.5, 0.5); FACE_MESH_POINTS];
    place_eye(&mut mesh, &LEFT_EYE, 0.30, ear);
    place_eye(&mut mesh, &RIGHT_EYE, 0.60, ear);
    mesh
}

fn place_eye(mesh: &mut [Landmark], indices: &[usize; 6], left_x: f64, ear: f64) {
    const WIDTH: f64 = 0.1;
    const CENTER_Y: f64 = 0.4;
    let half_gap = ear * WIDTH / 2.0;
    let [p1, p2, p3, p4, p5, p6] = *indices;

    mesh[p1] = Landmark::new(left_x, CENTER_Y);
    mesh[p4] = Landmark::new(left_x + WIDTH, CENTER_Y);
    mesh[p2] = Landmark::new(left_x + WIDTH / 3.0, CENTER_Y - half_gap);
    mesh[p6] = Landmark::new(left_x + WIDTH / 3.0, CENTER_Y + half_gap);
    mesh[p3] = Landmark::new(left_x + 2.0 * WIDTH / 3.0, CENTER_Y - half_gap);
    mesh[p5] = Landmark::new(left_x + 2.0 * WIDTH / 3.0, CENTER_Y + half_gap);
}

/// Camera that hands out blank frames. Permission can be toggled at runtime.
pub struct SimulatedCamera {
    allowed: AtomicBool,
    attempts: AtomicUsize,
    acquisitions: AtomicUsize,
}

impl SimulatedCamera {
    pub fn new(allowed: bool) -> Arc<Self> {
        Arc::new(Self {
            allowed: AtomicBool::new(allowed),
            attempts: AtomicUsize::new(0),
            acquisitions: AtomicUsize::new(0),
        })
    }

    pub fn set_allowed(&self, allowed: bool) {
        self.allowed.store(allowed, Ordering::SeqCst);
    }

    /// Every acquire call, granted or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Acquire calls that handed out a stream.
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Camera for SimulatedCamera {
    async fn acquire(
        &self,
        constraints: &CameraConstraints,
    ) -> Result<Box<dyn CameraStream>, CameraError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.allowed.load(Ordering::SeqCst) {
            return Err(CameraError::NotAllowed);
        }
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimulatedStream {
            width: constraints.width.max(1),
            height: constraints.height.max(1),
            live: true,
        }))
    }
}

struct SimulatedStream {
    width: u32,
    height: u32,
    live: bool,
}

impl CameraStream for SimulatedStream {
    fn next_frame(&mut self) -> Option<Frame> {
        self.live.then(|| Frame::blank(self.width, self.height))
    }

    fn release(&mut self) {
        self.live = false;
    }
}

/// Pipeline that blinks at random: each open-eye tick closes the eyes with
/// `blink_chance`, and a blink lasts `blink_ticks` samples.
pub struct SimulatedPipelineLoader {
    pub blink_chance: f64,
    pub blink_ticks: u32,
}

impl Default for SimulatedPipelineLoader {
    fn default() -> Self {
        Self {
            blink_chance: 0.01,
            blink_ticks: 2,
        }
    }
}

#[async_trait]
impl PipelineLoader for SimulatedPipelineLoader {
    async fn init(&self, model_path: &str) -> Result<Box<dyn VisionPipeline>> {
        log::info!("simulated landmark model loaded in place of {model_path}");
        Ok(Box::new(SimulatedPipeline {
            rng: StdRng::from_entropy(),
            blink_chance: self.blink_chance.clamp(0.0, 1.0),
            blink_ticks: self.blink_ticks.max(1),
            closed_for: 0,
        }))
    }
}

struct SimulatedPipeline {
    rng: StdRng,
    blink_chance: f64,
    blink_ticks: u32,
    closed_for: u32,
}

impl VisionPipeline for SimulatedPipeline {
    fn detect(&mut self, _frame: &Frame, _timestamp_ms: u64) -> Result<Detection> {
        if self.closed_for == 0 && self.rng.gen_bool(self.blink_chance) {
            self.closed_for = self.blink_ticks;
        }

        let ear = if self.closed_for > 0 {
            self.closed_for -= 1;
            self.rng.gen_range(0.12..0.22)
        } else {
            self.rng.gen_range(0.32..0.40)
        };

        Ok(Detection {
            faces: vec![Face {
                landmarks: synthetic_face(ear),
            }],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::ear::mean_ear;

    #[test]
    fn synthetic_face_measures_requested_ear() {
        for ear in [0.18, 0.3, 0.37] {
            let measured = mean_ear(&synthetic_face(ear)).unwrap();
            assert!((measured - ear).abs() < 1e-9, "{measured} != {ear}");
        }
    }

    #[tokio::test]
    async fn denied_camera_reports_not_allowed() {
        let camera = SimulatedCamera::new(false);
        let err = camera
            .acquire(&CameraConstraints::default())
            .await
            .err()
            .unwrap();
        assert_eq!(err, CameraError::NotAllowed);
        assert_eq!(camera.attempts(), 1);
        assert_eq!(camera.acquisitions(), 0);

        camera.set_allowed(true);
        let mut stream = camera.acquire(&CameraConstraints::default()).await.unwrap();
        assert!(stream.next_frame().is_some());
        stream.release();
        assert!(stream.next_frame().is_none());
    }
}
