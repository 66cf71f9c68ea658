use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{bus::MessageBus, messages::Message};

use super::{
    camera::CameraStream,
    ear::mean_ear,
    pipeline::VisionPipeline,
    state::{DetectorStatus, EyeState},
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// What the loop hands back when it is cancelled, so the owner can release
/// the camera and settle any outstanding punishment.
pub struct SamplerOutput {
    pub stream: Box<dyn CameraStream>,
    pub eye: EyeState,
}

pub struct SamplerParts {
    pub stream: Box<dyn CameraStream>,
    pub pipeline: Box<dyn VisionPipeline>,
    pub eye: EyeState,
    pub interval: Duration,
    pub started: Instant,
}

pub async fn sampling_loop(
    bus: Arc<MessageBus>,
    status: Arc<watch::Sender<DetectorStatus>>,
    parts: SamplerParts,
    cancel_token: CancellationToken,
) -> SamplerOutput {
    let SamplerParts {
        mut stream,
        mut pipeline,
        mut eye,
        interval,
        started,
    } = parts;

    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_info!("sampling loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                let now_ms = started.elapsed().as_millis() as u64;
                let ear = sample_ear(&mut *stream, &mut *pipeline, now_ms);

                for event in eye.sample(now_ms, ear) {
                    match event {
                        Message::PunishMode => {
                            log_info!("no blink for {}ms; punishing", eye.ms_since_blink(now_ms));
                            status.send_replace(DetectorStatus::Punishing);
                        }
                        Message::RestoreVision => {
                            status.send_replace(DetectorStatus::Detecting);
                        }
                        _ => {}
                    }
                    if let Err(err) = bus.send_command(event) {
                        log_warn!("dropping sampler event: {err}");
                    }
                }
            }
        }
    }

    SamplerOutput { stream, eye }
}

/// Mean EAR for the current frame, or `None` when there is no frame, no face,
/// or the detector failed this tick.
fn sample_ear(
    stream: &mut dyn CameraStream,
    pipeline: &mut dyn VisionPipeline,
    now_ms: u64,
) -> Option<f64> {
    let frame = stream.next_frame()?;

    let detection = match pipeline.detect(&frame, now_ms) {
        Ok(detection) => detection,
        Err(err) => {
            log_warn!("landmark detection failed at {now_ms}ms: {err:#}");
            return None;
        }
    };

    let Some(landmarks) = detection.first_face() else {
        log_debug!("no face at {now_ms}ms");
        return None;
    };

    mean_ear(landmarks)
}
