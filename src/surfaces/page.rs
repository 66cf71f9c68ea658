use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{self, Duration, Interval, MissedTickBehavior};

use crate::{
    bus::{MessageBus, PageId},
    config::PageConfig,
    messages::{ErrorPayload, Message},
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Requests the hosted page can post to its surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PageRequest {
    #[serde(rename = "BOD_PING")]
    Ping,
    #[serde(rename = "BOD_START_DETECTION")]
    StartDetection,
    #[serde(rename = "BOD_STOP_DETECTION")]
    StopDetection,
    #[serde(rename = "BOD_REQUEST_PERMISSION")]
    RequestPermission,
}

/// Notices posted back into the hosted page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum PageNotice {
    #[serde(rename = "BOD_PONG")]
    Pong,
    #[serde(rename = "BOD_BLINK_DETECTED")]
    BlinkDetected,
    #[serde(rename = "BOD_DETECTION_STARTED")]
    DetectionStarted,
    #[serde(rename = "BOD_DETECTION_STOPPED")]
    DetectionStopped,
    #[serde(rename = "BOD_ERROR")]
    Error(ErrorPayload),
}

/// Drawing side of a page: the degradation filter, the blink reminder and the
/// page's own message channel.
pub trait PageRenderer: Send + 'static {
    fn apply_degradation(&mut self);
    fn remove_degradation(&mut self);
    fn show_reminder(&mut self);
    fn hide_reminder(&mut self);

    /// Periodic nudge while the reminder is up.
    fn pulse_reminder(&mut self) {}

    fn post_notice(&mut self, notice: PageNotice);
}

/// One open page. Reacts to punishment events and relays page requests to
/// the coordinator.
pub struct PageSurface<R: PageRenderer> {
    id: PageId,
    bus: Arc<MessageBus>,
    renderer: R,
    punished: bool,
    pulse_every: Duration,
    reminder_pulse: Option<Interval>,
}

impl<R: PageRenderer> PageSurface<R> {
    /// Register the page on the bus. The returned inbox feeds [`run`](Self::run).
    pub fn open(
        bus: Arc<MessageBus>,
        renderer: R,
        config: &PageConfig,
    ) -> (Self, mpsc::UnboundedReceiver<Message>) {
        let endpoint = bus.open_page();
        let surface = Self {
            id: endpoint.id,
            bus,
            renderer,
            punished: false,
            pulse_every: config.reminder_pulse(),
            reminder_pulse: None,
        };
        (surface, endpoint.inbox)
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn is_punished(&self) -> bool {
        self.punished
    }

    pub fn has_pending_timers(&self) -> bool {
        self.reminder_pulse.is_some()
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn handle_message(&mut self, message: Message) {
        match message {
            Message::PunishMode => self.apply_punishment(),
            Message::RestoreVision => self.restore_vision(),
            Message::BlinkDetected => self.renderer.post_notice(PageNotice::BlinkDetected),
            Message::DetectionStarted => self.renderer.post_notice(PageNotice::DetectionStarted),
            Message::DetectionStopped => self.renderer.post_notice(PageNotice::DetectionStopped),
            Message::DetectionError(payload) => {
                self.renderer.post_notice(PageNotice::Error(payload))
            }
            other => log_debug!("page {} ignoring {}", self.id, other.kind()),
        }
    }

    pub fn handle_request(&mut self, request: PageRequest) {
        let command = match request {
            PageRequest::Ping => {
                self.renderer.post_notice(PageNotice::Pong);
                return;
            }
            PageRequest::StartDetection => Message::StartDetection,
            PageRequest::StopDetection => Message::StopDetection,
            PageRequest::RequestPermission => Message::RequestPermission,
        };

        if let Err(err) = self.bus.send_command(command) {
            log_warn!("page {} could not relay request: {err}", self.id);
        }
    }

    fn apply_punishment(&mut self) {
        if self.punished {
            return;
        }
        self.punished = true;
        self.renderer.apply_degradation();
        self.renderer.show_reminder();

        let start = time::Instant::now() + self.pulse_every;
        let mut pulse = time::interval_at(start, self.pulse_every);
        pulse.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.reminder_pulse = Some(pulse);
        log_info!("page {} punished", self.id);
    }

    fn restore_vision(&mut self) {
        if !self.punished {
            return;
        }
        self.punished = false;
        self.reminder_pulse = None;
        self.renderer.remove_degradation();
        self.renderer.hide_reminder();
        log_info!("page {} restored", self.id);
    }

    /// Serve the page until it unloads (the request channel closes), then
    /// unregister from the bus and hand back the renderer.
    pub async fn run(
        mut self,
        mut inbox: mpsc::UnboundedReceiver<Message>,
        mut requests: mpsc::UnboundedReceiver<PageRequest>,
    ) -> R {
        loop {
            tokio::select! {
                message = inbox.recv() => match message {
                    Some(message) => self.handle_message(message),
                    None => break,
                },
                request = requests.recv() => match request {
                    Some(request) => self.handle_request(request),
                    None => break,
                },
                _ = next_pulse(&mut self.reminder_pulse) => self.renderer.pulse_reminder(),
            }
        }

        self.restore_vision();
        self.bus.close_page(self.id);
        self.renderer
    }
}

async fn next_pulse(pulse: &mut Option<Interval>) {
    match pulse {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        effects: Vec<&'static str>,
        notices: Vec<PageNotice>,
        pulses: usize,
    }

    impl PageRenderer for Recorder {
        fn apply_degradation(&mut self) {
            self.effects.push("degrade");
        }
        fn remove_degradation(&mut self) {
            self.effects.push("undegrade");
        }
        fn show_reminder(&mut self) {
            self.effects.push("show");
        }
        fn hide_reminder(&mut self) {
            self.effects.push("hide");
        }
        fn pulse_reminder(&mut self) {
            self.pulses += 1;
        }
        fn post_notice(&mut self, notice: PageNotice) {
            self.notices.push(notice);
        }
    }

    #[tokio::test]
    async fn punishment_and_restore_are_idempotent() {
        let (bus, _inbox) = MessageBus::new();
        let (mut page, _page_inbox) =
            PageSurface::open(bus, Recorder::default(), &PageConfig::default());

        page.handle_message(Message::PunishMode);
        page.handle_message(Message::PunishMode);
        assert!(page.is_punished());
        assert!(page.has_pending_timers());

        page.handle_message(Message::RestoreVision);
        page.handle_message(Message::RestoreVision);
        assert!(!page.is_punished());
        assert!(!page.has_pending_timers());

        assert_eq!(
            page.renderer().effects,
            vec!["degrade", "show", "undegrade", "hide"]
        );
    }

    #[tokio::test]
    async fn ping_is_answered_locally_and_commands_are_relayed() {
        let (bus, mut coordinator) = MessageBus::new();
        let (mut page, _page_inbox) =
            PageSurface::open(bus, Recorder::default(), &PageConfig::default());

        page.handle_request(PageRequest::Ping);
        page.handle_request(PageRequest::StartDetection);
        page.handle_request(PageRequest::RequestPermission);

        assert_eq!(page.renderer().notices, vec![PageNotice::Pong]);
        for expected in [Message::StartDetection, Message::RequestPermission] {
            match coordinator.recv().await {
                Some(crate::bus::Inbound::Message { message, reply }) => {
                    assert_eq!(message, expected);
                    assert!(reply.is_none());
                }
                other => panic!("unexpected inbound {other:?}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reminder_pulses_only_while_punished() {
        let (bus, _inbox) = MessageBus::new();
        let (page, page_inbox) =
            PageSurface::open(bus.clone(), Recorder::default(), &PageConfig::default());
        let (requests_tx, requests) = mpsc::unbounded_channel();
        let task = tokio::spawn(page.run(page_inbox, requests));

        bus.fan_out(&Message::PunishMode);
        time::sleep(Duration::from_millis(3_500)).await;
        bus.fan_out(&Message::RestoreVision);
        time::sleep(Duration::from_millis(5_000)).await;

        drop(requests_tx);
        let renderer = task.await.unwrap();
        assert_eq!(renderer.pulses, 3);
        assert_eq!(renderer.effects, vec!["degrade", "show", "undegrade", "hide"]);
    }

    #[test]
    fn page_messages_use_bod_names() {
        let request: PageRequest =
            serde_json::from_str(r#"{"type":"BOD_STOP_DETECTION"}"#).unwrap();
        assert_eq!(request, PageRequest::StopDetection);

        let notice = serde_json::to_value(PageNotice::Pong).unwrap();
        assert_eq!(notice, serde_json::json!({ "type": "BOD_PONG" }));
    }
}
