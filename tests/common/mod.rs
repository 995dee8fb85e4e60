#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use cpu_affinity_rules::app::models::{
    AffinityApplier, CpuTopology, EngineContext, ForegroundProcess, LogSink, PathRules, ProcessHandle,
    RuleApplicationCoordinator, RuleStore,
};
use os_api::{OsError, OsErrorKind};

pub type Calls = Arc<Mutex<Vec<(u32, Option<Vec<u32>>)>>>;

/// Records every affinity change instead of touching real processes.
#[derive(Default)]
pub struct RecordingApplier {
    pub calls: Calls,
    pub deny: Mutex<HashSet<u32>>,
}

impl RecordingApplier {
    pub fn calls(&self) -> Vec<(u32, Option<Vec<u32>>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, pid: u32) -> Vec<Option<Vec<u32>>> {
        self.calls().into_iter().filter(|(p, _)| *p == pid).map(|(_, ids)| ids).collect()
    }
}

struct RecordingHandle {
    pid: u32,
    calls: Calls,
}

impl ProcessHandle for RecordingHandle {
    fn apply(&mut self, processor_ids: Option<&[u32]>) -> Result<(), OsError> {
        self.calls.lock().unwrap().push((self.pid, processor_ids.map(<[u32]>::to_vec)));
        Ok(())
    }
}

impl AffinityApplier for RecordingApplier {
    fn open(&self, pid: u32) -> Result<Box<dyn ProcessHandle>, OsError> {
        if self.deny.lock().unwrap().contains(&pid) {
            return Err(OsError::new(OsErrorKind::PermissionDenied, "Access is denied."));
        }
        Ok(Box::new(RecordingHandle {
            pid,
            calls: self.calls.clone(),
        }))
    }
}

#[derive(Default)]
pub struct Lines(pub Mutex<Vec<String>>);

impl Lines {
    pub fn lines(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl LogSink for Lines {
    fn write(&self, line: &str) {
        self.0.lock().unwrap().push(line.to_string());
    }
}

/// Foreground window owner that tests can switch.
#[derive(Default)]
pub struct Foreground(pub Mutex<Option<u32>>);

impl ForegroundProcess for Foreground {
    fn foreground_pid(&self) -> Option<u32> {
        *self.0.lock().unwrap()
    }
}

pub fn coordinator(processors: usize) -> (RuleApplicationCoordinator, Arc<RecordingApplier>, Arc<Lines>) {
    let ctx = EngineContext::new(
        CpuTopology::uniform("Test CPU", processors),
        RuleStore::new(processors, PathRules::POSIX),
    )
    .unwrap();
    let applier = Arc::new(RecordingApplier::default());
    let lines = Arc::new(Lines::default());
    let coordinator = RuleApplicationCoordinator::new(ctx, applier.clone(), lines.clone());
    (coordinator, applier, lines)
}

pub fn bits(count: usize, selected: &[usize]) -> Vec<bool> {
    (0..count).map(|i| selected.contains(&i)).collect()
}
