use async_trait::async_trait;
use image::RgbImage;

use crate::{config::CameraConstraints, error::CameraError};

/// A captured video frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
}

impl Frame {
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            image: RgbImage::new(width, height),
        }
    }
}

/// Camera access. Acquisition doubles as the permission prompt, so the status
/// surface probes it directly and the detection worker holds the stream.
#[async_trait]
pub trait Camera: Send + Sync {
    async fn acquire(&self, constraints: &CameraConstraints)
        -> Result<Box<dyn CameraStream>, CameraError>;
}

/// A live stream. Dropping it without `release` leaks the device on some
/// platforms, so owners release explicitly.
pub trait CameraStream: Send {
    /// Latest frame, or `None` when nothing is ready yet.
    fn next_frame(&mut self) -> Option<Frame>;

    fn release(&mut self);
}
