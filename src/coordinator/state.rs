use serde::Serialize;

use crate::{bus::WindowId, host::WorkerId};

/// Cached knowledge about the live worker. The host stays authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerHandle {
    pub id: WorkerId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionWindow {
    /// A window was requested and the host has not returned its id yet.
    /// Closes reported in the meantime are remembered here.
    Opening { closed_early: Vec<WindowId> },
    Open(WindowId),
}

/// All coordinator-local state, changed only through the methods below.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatorState {
    pub worker: Option<WorkerHandle>,
    pub worker_ready: bool,
    pub detection_blocked: bool,
    pub permission_window: Option<PermissionWindow>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorSnapshot {
    pub has_worker: bool,
    pub worker_ready: bool,
    pub detection_blocked: bool,
    pub permission_window_id: Option<WindowId>,
    pub permission_pending: bool,
}

impl CoordinatorState {
    pub fn snapshot(&self) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            has_worker: self.worker.is_some(),
            worker_ready: self.worker_ready,
            detection_blocked: self.detection_blocked,
            permission_window_id: match self.permission_window {
                Some(PermissionWindow::Open(id)) => Some(id),
                _ => None,
            },
            permission_pending: self.permission_window.is_some(),
        }
    }

    pub fn mark_ready(&mut self) {
        self.worker_ready = true;
    }

    pub fn record_worker(&mut self, handle: WorkerHandle) {
        self.worker = Some(handle);
    }

    /// Drop the cached handle and its readiness.
    pub fn forget_worker(&mut self) -> Option<WorkerHandle> {
        self.worker_ready = false;
        self.worker.take()
    }

    pub fn block(&mut self) {
        self.detection_blocked = true;
    }

    pub fn unblock(&mut self) {
        self.detection_blocked = false;
    }

    /// Claim the single permission prompt. `false` when one is already open
    /// or opening.
    pub fn begin_permission_request(&mut self) -> bool {
        if self.permission_window.is_some() {
            return false;
        }
        self.permission_window = Some(PermissionWindow::Opening {
            closed_early: Vec::new(),
        });
        true
    }

    /// Record the id of the window that was opened. Returns `false` when the
    /// request is no longer wanted (granted already, or the window closed
    /// before its id arrived); the caller should close it.
    pub fn finish_permission_request(&mut self, id: WindowId) -> bool {
        match &self.permission_window {
            Some(PermissionWindow::Opening { closed_early }) if !closed_early.contains(&id) => {
                self.permission_window = Some(PermissionWindow::Open(id));
                true
            }
            Some(PermissionWindow::Opening { .. }) => {
                self.permission_window = None;
                false
            }
            _ => false,
        }
    }

    pub fn abandon_permission_request(&mut self) {
        if matches!(self.permission_window, Some(PermissionWindow::Opening { .. })) {
            self.permission_window = None;
        }
    }

    /// Clear the pending request, returning the window to close if one is open.
    pub fn take_permission_window(&mut self) -> Option<WindowId> {
        match self.permission_window.take() {
            Some(PermissionWindow::Open(id)) => Some(id),
            _ => None,
        }
    }

    /// The host reports `id` closed. Returns whether it was the tracked window.
    pub fn window_closed(&mut self, id: WindowId) -> bool {
        match &mut self.permission_window {
            Some(PermissionWindow::Open(open)) if *open == id => {
                self.permission_window = None;
                true
            }
            Some(PermissionWindow::Opening { closed_early }) => {
                closed_early.push(id);
                false
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_permission_request_is_refused_while_first_is_pending() {
        let mut state = CoordinatorState::default();
        assert!(state.begin_permission_request());
        assert!(!state.begin_permission_request());

        assert!(state.finish_permission_request(7));
        assert!(!state.begin_permission_request());
        assert_eq!(state.snapshot().permission_window_id, Some(7));
    }

    #[test]
    fn closing_the_tracked_window_frees_the_slot() {
        let mut state = CoordinatorState::default();
        state.begin_permission_request();
        state.finish_permission_request(3);

        assert!(!state.window_closed(4));
        assert!(state.window_closed(3));
        assert!(state.begin_permission_request());
    }

    #[test]
    fn grant_before_window_id_arrives_discards_the_window() {
        let mut state = CoordinatorState::default();
        state.begin_permission_request();

        assert_eq!(state.take_permission_window(), None);
        assert!(!state.finish_permission_request(9));
        assert_eq!(state.permission_window, None);
    }

    #[test]
    fn window_closed_before_id_arrives_is_not_recorded() {
        let mut state = CoordinatorState::default();
        state.begin_permission_request();

        assert!(!state.window_closed(5));
        assert!(!state.finish_permission_request(5));
        assert_eq!(state.permission_window, None);
    }

    #[test]
    fn forgetting_worker_clears_readiness() {
        let mut state = CoordinatorState::default();
        state.record_worker(WorkerHandle { id: WorkerId::new() });
        state.mark_ready();

        assert!(state.forget_worker().is_some());
        assert!(!state.worker_ready);
        assert!(state.forget_worker().is_none());
    }
}
