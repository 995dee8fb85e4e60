use os_api::OsError;

use crate::app::models::{CpuTopology, EngineError};

/// Opens processes for affinity changes.
pub trait AffinityApplier: Send + Sync {
    fn open(&self, pid: u32) -> Result<Box<dyn ProcessHandle>, OsError>;
}

/// An opened process. Dropping it releases the native handle.
pub trait ProcessHandle: Send {
    /// Restricts the process to the given platform processor ids, or lifts any restriction
    /// when `None`.
    fn apply(&mut self, processor_ids: Option<&[u32]>) -> Result<(), OsError>;
}

/// Process owning the window that currently has input focus.
pub trait ForegroundProcess: Send + Sync {
    fn foreground_pid(&self) -> Option<u32>;
}

/// Source of the processor layout the engine is built for.
pub trait CpuTopologyProvider {
    fn read_topology(&self) -> Result<CpuTopology, EngineError>;
}
