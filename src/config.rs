use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf, time::Duration};

/// Tunables for the sampling loop and blink/punishment state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Mean EAR below this counts as a closed-eye sample.
    pub blink_threshold: f64,

    /// Consecutive closed-eye samples needed to register a blink.
    pub consecutive_frames: u32,

    /// Time without a blink before punishment starts.
    pub punish_timeout_ms: u64,

    pub sample_interval_ms: u64,
    pub model_path: String,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            blink_threshold: 0.3,
            consecutive_frames: 1,
            punish_timeout_ms: 8_000,
            sample_interval_ms: 100,
            model_path: "models/face_landmarker.task".into(),
        }
    }
}

impl DetectionConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConstraints {
    pub width: u32,
    pub height: u32,
    pub facing_mode: String,
}

impl Default for CameraConstraints {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            facing_mode: "user".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Upper bound on waiting for a fresh worker's READY before forwarding a start.
    pub ready_wait_ms: u64,
    pub ready_poll_ms: u64,
    /// Grace period for a closing worker to finish its stop sequence.
    pub worker_close_timeout_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            ready_wait_ms: 3_000,
            ready_poll_ms: 100,
            worker_close_timeout_ms: 1_000,
        }
    }
}

impl CoordinatorConfig {
    pub fn ready_wait(&self) -> Duration {
        Duration::from_millis(self.ready_wait_ms)
    }

    pub fn ready_poll(&self) -> Duration {
        Duration::from_millis(self.ready_poll_ms.max(1))
    }

    pub fn worker_close_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_close_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageConfig {
    /// How often the blink reminder is re-pulsed while a page is punished.
    pub reminder_pulse_ms: u64,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            reminder_pulse_ms: 1_000,
        }
    }
}

impl PageConfig {
    pub fn reminder_pulse(&self) -> Duration {
        Duration::from_millis(self.reminder_pulse_ms.max(1))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub detection: DetectionConfig,
    pub camera: CameraConstraints,
    pub coordinator: CoordinatorConfig,
    pub page: PageConfig,
    /// Mirror the session store to this file so a restarted coordinator can
    /// read it back. In-memory only when unset.
    pub session_file: Option<PathBuf>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config at {}", path.display()))
    }

    /// Load from `BLINK_CONFIG` if set, falling back to defaults.
    pub fn from_env() -> Self {
        let Some(path) = std::env::var_os("BLINK_CONFIG").map(PathBuf::from) else {
            return Self::default();
        };

        match Self::load(&path) {
            Ok(config) => config,
            Err(err) => {
                warn!("{err:#}; using default configuration");
                Self::default()
            }
        }
    }
}
