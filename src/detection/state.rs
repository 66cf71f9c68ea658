use serde::Serialize;

use crate::{config::DetectionConfig, messages::Message};

/// Lifecycle of the detection worker.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum DetectorStatus {
    #[default]
    Idle,
    AcquiringCamera,
    Detecting,
    Punishing,
    Error,
}

/// Blink debounce and punishment timer, advanced once per sampling tick.
///
/// Time is milliseconds since detection started; the caller owns the clock so
/// the machine can be driven deterministically.
#[derive(Debug, Clone)]
pub struct EyeState {
    last_blink_ms: u64,
    is_punishing: bool,
    consecutive_low_ear_frames: u32,
    blink_threshold: f64,
    required_frames: u32,
    punish_timeout_ms: u64,
}

impl EyeState {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            last_blink_ms: 0,
            is_punishing: false,
            consecutive_low_ear_frames: 0,
            blink_threshold: config.blink_threshold,
            required_frames: config.consecutive_frames.max(1),
            punish_timeout_ms: config.punish_timeout_ms,
        }
    }

    /// Treat `now_ms` as the last blink, clearing any debounce progress.
    pub fn reset(&mut self, now_ms: u64) {
        self.last_blink_ms = now_ms;
        self.is_punishing = false;
        self.consecutive_low_ear_frames = 0;
    }

    pub fn is_punishing(&self) -> bool {
        self.is_punishing
    }

    pub fn last_blink_ms(&self) -> u64 {
        self.last_blink_ms
    }

    pub fn ms_since_blink(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_blink_ms)
    }

    /// Advance one tick. `ear` is `None` when no face was found, which skips
    /// the blink check but still runs the punishment timer.
    ///
    /// Returned events are in emission order.
    pub fn sample(&mut self, now_ms: u64, ear: Option<f64>) -> Vec<Message> {
        let mut events = Vec::new();

        if let Some(ear) = ear {
            if ear < self.blink_threshold {
                self.consecutive_low_ear_frames += 1;
                if self.consecutive_low_ear_frames >= self.required_frames {
                    self.consecutive_low_ear_frames = 0;
                    self.register_blink(now_ms, &mut events);
                }
            } else {
                self.consecutive_low_ear_frames = 0;
            }
        }

        if !self.is_punishing && self.ms_since_blink(now_ms) > self.punish_timeout_ms {
            self.is_punishing = true;
            events.push(Message::PunishMode);
        }

        events
    }

    fn register_blink(&mut self, now_ms: u64, events: &mut Vec<Message>) {
        self.last_blink_ms = now_ms;
        if self.is_punishing {
            self.is_punishing = false;
            events.push(Message::RestoreVision);
        }
        events.push(Message::BlinkDetected);
    }
}
