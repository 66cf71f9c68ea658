use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, sync::Arc};
use tokio::sync::watch;

/// Session-scoped state that must survive worker and coordinator restarts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub should_detect: bool,
}

/// Subscribable store for [`SessionState`], optionally mirrored to a JSON file.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Inner>,
}

struct Inner {
    path: Option<PathBuf>,
    tx: watch::Sender<SessionState>,
}

impl SessionStore {
    pub fn in_memory() -> Self {
        Self::with_state(None, SessionState::default())
    }

    /// Open a file-backed store, reading any state a previous process left.
    pub fn open(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read session state from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            SessionState::default()
        };

        Ok(Self::with_state(Some(path), state))
    }

    fn with_state(path: Option<PathBuf>, state: SessionState) -> Self {
        let (tx, _rx) = watch::channel(state);
        Self {
            inner: Arc::new(Inner { path, tx }),
        }
    }

    pub fn get(&self) -> SessionState {
        *self.inner.tx.borrow()
    }

    pub fn should_detect(&self) -> bool {
        self.get().should_detect
    }

    /// Update `should_detect`. Subscribers are notified only on an actual
    /// change. A failed file write is reported but the in-memory value stands.
    pub fn set_should_detect(&self, should_detect: bool) -> Result<()> {
        let changed = self.inner.tx.send_if_modified(|state| {
            if state.should_detect == should_detect {
                return false;
            }
            state.should_detect = should_detect;
            true
        });

        if changed {
            self.persist(&self.get())?;
        }
        Ok(())
    }

    /// Best-effort variant used on message paths, where a storage failure
    /// must not interrupt routing.
    pub fn record_should_detect(&self, should_detect: bool) {
        if let Err(err) = self.set_should_detect(should_detect) {
            warn!("failed to persist shouldDetect={should_detect}: {err:#}");
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.tx.subscribe()
    }

    fn persist(&self, state: &SessionState) -> Result<()> {
        let Some(path) = &self.inner.path else {
            return Ok(());
        };
        let serialized = serde_json::to_string_pretty(state)?;
        fs::write(path, serialized)
            .with_context(|| format!("Failed to write session state to {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_backed_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let store = SessionStore::open(path.clone()).unwrap();
        assert!(!store.should_detect());
        store.set_should_detect(true).unwrap();

        let reopened = SessionStore::open(path).unwrap();
        assert!(reopened.should_detect());
    }

    #[test]
    fn corrupt_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, "{ broken").unwrap();

        let store = SessionStore::open(path).unwrap();
        assert_eq!(store.get(), SessionState::default());
    }

    #[tokio::test]
    async fn subscribers_see_changes_only() {
        let store = SessionStore::in_memory();
        let mut rx = store.subscribe();

        store.set_should_detect(false).unwrap();
        assert!(!rx.has_changed().unwrap());

        store.set_should_detect(true).unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().should_detect);
    }

    #[test]
    fn persisted_shape_uses_camel_case() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let store = SessionStore::open(path.clone()).unwrap();
        store.set_should_detect(true).unwrap();

        let raw = fs::read_to_string(path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["shouldDetect"], serde_json::Value::Bool(true));
    }
}
