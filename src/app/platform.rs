//! Engine interfaces implemented on top of `os_api`.

use std::sync::Arc;

use os_api::{OsError, ProcessAffinityHandle, OS};

use crate::app::models::{
    AffinityApplier, CpuTopology, CpuTopologyProvider, EngineError, ForegroundProcess, ProcessHandle,
};

pub struct OsAffinityApplier {
    /// Platform ids of every processor, the set a cleared process may run on.
    all_processors: Arc<[u32]>,
}

impl OsAffinityApplier {
    pub fn new(topology: &CpuTopology) -> Self {
        Self {
            all_processors: topology.processors().iter().filter_map(|p| p.platform_id).collect(),
        }
    }
}

impl AffinityApplier for OsAffinityApplier {
    fn open(&self, pid: u32) -> Result<Box<dyn ProcessHandle>, OsError> {
        let handle = OS::open_process_for_affinity(pid)?;
        Ok(Box::new(OsProcessHandle {
            handle,
            all_processors: self.all_processors.clone(),
        }))
    }
}

struct OsProcessHandle {
    handle: ProcessAffinityHandle,
    all_processors: Arc<[u32]>,
}

impl ProcessHandle for OsProcessHandle {
    fn apply(&mut self, processor_ids: Option<&[u32]>) -> Result<(), OsError> {
        match processor_ids {
            Some(ids) => self.handle.set_affinity(ids),
            None => self.handle.set_affinity(&self.all_processors),
        }
    }
}

pub struct OsForegroundProcess;

impl ForegroundProcess for OsForegroundProcess {
    fn foreground_pid(&self) -> Option<u32> {
        OS::get_foreground_pid()
    }
}

pub struct OsTopologyProvider;

impl CpuTopologyProvider for OsTopologyProvider {
    /// Fails with `TopologyUnsupported` for layouts a single mask cannot describe.
    fn read_topology(&self) -> Result<CpuTopology, EngineError> {
        let topology = CpuTopology::from_raw(OS::read_topology()?);
        topology.ensure_supported()?;
        Ok(topology)
    }
}
