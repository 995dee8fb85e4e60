use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::app::models::AppStateStorage;

/// Save requests arriving within this window are coalesced into one write.
pub const SAVE_DEBOUNCE: Duration = Duration::from_millis(30);

/// Writes state snapshots in the background, keeping only the newest of a burst.
pub struct StateSaver {
    tx: mpsc::UnboundedSender<AppStateStorage>,
    task: JoinHandle<()>,
}

impl StateSaver {
    /// Must be called from within a tokio runtime.
    pub fn spawn(path: PathBuf) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_state_saver(path, rx));
        Self { tx, task }
    }

    pub fn request_save(&self, state: AppStateStorage) {
        if self.tx.send(state).is_err() {
            error!("state saver has stopped, state not saved");
        }
    }

    /// Writes any pending state and stops.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.task.await {
            error!("state saver task failed: {e}");
        }
    }
}

async fn run_state_saver(path: PathBuf, mut rx: mpsc::UnboundedReceiver<AppStateStorage>) {
    while let Some(mut latest) = rx.recv().await {
        tokio::time::sleep(SAVE_DEBOUNCE).await;
        while let Ok(newer) = rx.try_recv() {
            latest = newer;
        }
        match latest.save_to_path(&path) {
            Ok(()) => debug!(path = %path.display(), "state saved"),
            Err(e) => error!(path = %path.display(), "saving state failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::models::{AppStateStorage, StateFile};

    fn state(version: u32) -> AppStateStorage {
        let mut state: AppStateStorage = serde_json::from_str("{}").unwrap();
        state.version = version;
        state
    }

    #[tokio::test]
    async fn burst_is_coalesced_and_flushed_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let saver = StateSaver::spawn(path.clone());
        for v in 10..20 {
            saver.request_save(state(v));
        }
        saver.shutdown().await;

        let StateFile::Loaded(saved) = AppStateStorage::read(&path) else {
            panic!("state should have been written");
        };
        assert_eq!(saved.version, 19);
    }
}
