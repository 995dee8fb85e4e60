use std::collections::HashMap;
use std::time::Duration;

use os_api::ProcessEntry;
use tokio::sync::mpsc;
use tracing::debug;

use crate::app::EngineEvent;

pub const PROCESS_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessChange {
    Created(ProcessEntry),
    Exited(u32),
}

impl From<ProcessChange> for EngineEvent {
    fn from(change: ProcessChange) -> Self {
        match change {
            ProcessChange::Created(entry) => EngineEvent::ProcessCreated(entry),
            ProcessChange::Exited(pid) => EngineEvent::ProcessExited(pid),
        }
    }
}

/// Turns successive process listings into created/exited events.
#[derive(Debug, Default)]
pub struct ProcessTable {
    known: HashMap<u32, ProcessEntry>,
}

impl ProcessTable {
    /// Exits come first so a reused pid is reported as exit then creation.
    ///
    /// A process is identified by pid and image path. Its name can change while it runs.
    pub fn diff(&mut self, current: Vec<ProcessEntry>) -> Vec<ProcessChange> {
        let mut created = Vec::new();
        let mut exited = Vec::new();
        let mut next = HashMap::with_capacity(current.len());

        for entry in current {
            match self.known.remove(&entry.pid) {
                Some(old) if old.image_path == entry.image_path => {}
                Some(_) => {
                    exited.push(entry.pid);
                    created.push(entry.clone());
                }
                None => created.push(entry.clone()),
            }
            next.insert(entry.pid, entry);
        }
        exited.extend(self.known.keys().copied());
        exited.sort_unstable();
        created.sort_by_key(|e| e.pid);
        self.known = next;

        exited
            .into_iter()
            .map(ProcessChange::Exited)
            .chain(created.into_iter().map(ProcessChange::Created))
            .collect()
    }
}

/// Polls the process list and reports changes to the engine.
///
/// The first poll reports every process already running. Stops once the engine is gone.
pub async fn run_process_monitor<F>(events: mpsc::UnboundedSender<EngineEvent>, period: Duration, list_processes: F)
where
    F: Fn() -> Vec<ProcessEntry> + Send + 'static,
{
    let mut table = ProcessTable::default();
    let mut interval = tokio::time::interval(period);

    loop {
        interval.tick().await;
        if events.is_closed() {
            debug!("engine stopped, process monitor exiting");
            return;
        }

        for change in table.diff(list_processes()) {
            if events.send(change.into()).is_err() {
                debug!("engine stopped, process monitor exiting");
                return;
            }
        }
    }
}
