pub mod camera;
pub mod ear;
pub mod pipeline;
pub mod sampler;
pub mod state;
pub mod worker;

pub use camera::{Camera, CameraStream, Frame};
pub use pipeline::{Detection, Face, PipelineLoader, VisionPipeline};
pub use state::{DetectorStatus, EyeState};
pub use worker::{DetectionWorker, WorkerDeps};
