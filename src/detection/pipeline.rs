use anyhow::Result;
use async_trait::async_trait;

use super::{camera::Frame, ear::Landmark};

#[derive(Debug, Clone, Default)]
pub struct Face {
    pub landmarks: Vec<Landmark>,
}

#[derive(Debug, Clone, Default)]
pub struct Detection {
    pub faces: Vec<Face>,
}

impl Detection {
    pub fn first_face(&self) -> Option<&[Landmark]> {
        self.faces.first().map(|face| face.landmarks.as_slice())
    }
}

/// Loads the face-landmark model. Loading is slow, so it happens once per
/// detection start, after the camera is acquired.
#[async_trait]
pub trait PipelineLoader: Send + Sync {
    async fn init(&self, model_path: &str) -> Result<Box<dyn VisionPipeline>>;
}

pub trait VisionPipeline: Send {
    fn detect(&mut self, frame: &Frame, timestamp_ms: u64) -> Result<Detection>;
}
