use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Every command and event that crosses a context boundary.
///
/// On the wire this is `{ "type": "START_DETECTION" }` or, for errors,
/// `{ "type": "DETECTION_ERROR", "payload": { "name": ..., "message": ... } }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    StartDetection,
    StopDetection,
    OffscreenReady,
    DetectionStarted,
    DetectionStopped,
    BlinkDetected,
    PunishMode,
    RestoreVision,
    DetectionError(ErrorPayload),
    RequestPermission,
    PermissionGranted,
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::StartDetection => "START_DETECTION",
            Message::StopDetection => "STOP_DETECTION",
            Message::OffscreenReady => "OFFSCREEN_READY",
            Message::DetectionStarted => "DETECTION_STARTED",
            Message::DetectionStopped => "DETECTION_STOPPED",
            Message::BlinkDetected => "BLINK_DETECTED",
            Message::PunishMode => "PUNISH_MODE",
            Message::RestoreVision => "RESTORE_VISION",
            Message::DetectionError(_) => "DETECTION_ERROR",
            Message::RequestPermission => "REQUEST_PERMISSION",
            Message::PermissionGranted => "PERMISSION_GRANTED",
        }
    }

    pub fn detection_error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Message::DetectionError(ErrorPayload {
            name: kind,
            message: message.into(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub name: ErrorKind,
    pub message: String,
}

impl ErrorPayload {
    pub fn from_kind(kind: ErrorKind) -> Self {
        Self {
            name: kind,
            message: kind.user_message().to_string(),
        }
    }
}

/// Reply to a request sent to the coordinator. `ok` reflects only whether the
/// command could be dispatched; outcomes arrive later as events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Reply {
    pub fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}
