use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure kinds that can end a detection attempt.
///
/// The serialized names are what travels in a `DETECTION_ERROR` payload, so
/// the camera kinds keep the names the capture layer reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Error)]
pub enum ErrorKind {
    #[serde(rename = "NotAllowedError")]
    #[error("camera permission denied")]
    PermissionDenied,

    #[serde(rename = "NotFoundError")]
    #[error("camera device not found")]
    DeviceNotFound,

    #[serde(rename = "NotReadableError")]
    #[error("camera device busy")]
    DeviceBusy,

    #[serde(rename = "PipelineInitFailed")]
    #[error("vision pipeline failed to initialise")]
    PipelineInitFailed,

    #[serde(rename = "WorkerCreationFailed")]
    #[error("detection worker could not be created")]
    WorkerCreationFailed,

    #[serde(rename = "UnknownError", other)]
    #[error("unknown error")]
    Unknown,
}

impl ErrorKind {
    /// Message shown to the user when this kind ends a detection attempt.
    pub fn user_message(self) -> &'static str {
        match self {
            ErrorKind::PermissionDenied => {
                "Camera permission was denied; allow camera access in the browser settings"
            }
            ErrorKind::DeviceNotFound => "No camera found; make sure a camera is connected",
            ErrorKind::DeviceBusy => {
                "The camera is in use by another program; close other applications using it"
            }
            ErrorKind::PipelineInitFailed => "Face landmark model failed to load",
            ErrorKind::WorkerCreationFailed => "Detection worker could not be started",
            ErrorKind::Unknown => "Detection failed to start",
        }
    }

    /// Only a denied permission has a lasting effect on the coordinator.
    pub fn blocks_detection(self) -> bool {
        matches!(self, ErrorKind::PermissionDenied)
    }
}

/// Errors raised by a camera acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CameraError {
    #[error("NotAllowedError: permission to use the camera was denied")]
    NotAllowed,

    #[error("NotFoundError: no camera matching the constraints")]
    NotFound,

    #[error("NotReadableError: the camera could not be opened")]
    NotReadable,

    #[error("{name}: {message}")]
    Other { name: String, message: String },
}

impl CameraError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CameraError::NotAllowed => ErrorKind::PermissionDenied,
            CameraError::NotFound => ErrorKind::DeviceNotFound,
            CameraError::NotReadable => ErrorKind::DeviceBusy,
            CameraError::Other { .. } => ErrorKind::Unknown,
        }
    }

    /// Human-readable message: the fixed text for known kinds, the capture
    /// layer's own message otherwise.
    pub fn user_message(&self) -> String {
        match self {
            CameraError::Other { message, .. } if !message.is_empty() => message.clone(),
            other => other.kind().user_message().to_string(),
        }
    }
}

/// Delivery failures on the message bus. Callers treat these as best-effort
/// misses and log them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("no receiver attached for {0}")]
    NoReceiver(&'static str),

    #[error("{0} channel closed")]
    Closed(&'static str),
}
