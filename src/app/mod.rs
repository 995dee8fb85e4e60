pub mod models;

mod engine;
mod monitor;
mod platform;
mod usage;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use os_api::{ProcessEntry, OS};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use models::{
    AppStateStorage, CpuTopology, CpuTopologyProvider, EngineContext, EngineError, LogManager,
    PathRules, ProcessSnapshot, RuleApplicationCoordinator, StateSaver, APP_VERSION,
};

pub use engine::{EngineCommand, EngineEvent, EngineHandle, EngineLoop};
pub use monitor::{run_process_monitor, ProcessChange, ProcessTable, PROCESS_POLL_INTERVAL};
pub use platform::{OsAffinityApplier, OsForegroundProcess, OsTopologyProvider};
pub use usage::{run_usage_sampler, CpuUsageTracker, UsageTable, USAGE_SAMPLE_INTERVAL, USAGE_WINDOW};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub state_path: PathBuf,
    pub poll_interval: Duration,
    pub usage_interval: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            state_path: AppStateStorage::state_path(),
            poll_interval: PROCESS_POLL_INTERVAL,
            usage_interval: USAGE_SAMPLE_INTERVAL,
        }
    }
}

/// Another process started from the same executable, if any.
fn find_other_instance(processes: &[ProcessEntry], own_pid: u32, exe: &str, rules: PathRules) -> Option<u32> {
    processes
        .iter()
        .find(|p| p.pid != own_pid && !p.image_path.is_empty() && rules.paths_equal(&p.image_path, exe))
        .map(|p| p.pid)
}

/// The running engine together with its process monitor and usage sampler.
pub struct App {
    handle: EngineHandle,
    log: LogManager,
    snapshots: watch::Receiver<Arc<[ProcessSnapshot]>>,
    usage: UsageTable,
    topology: CpuTopology,
    engine: JoinHandle<RuleApplicationCoordinator>,
    background: Vec<JoinHandle<()>>,
}

impl App {
    /// Reads the CPU topology, loads the state file and starts every background task.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start(config: AppConfig) -> Result<Self, EngineError> {
        let log = LogManager::new();
        log.add_entry(format!("Starting cpu-affinity-rules v{APP_VERSION}"));

        if let Ok(exe) = std::env::current_exe() {
            let exe = exe.to_string_lossy();
            if let Some(pid) = find_other_instance(&OS::get_all_processes(), std::process::id(), &exe, PathRules::native()) {
                return Err(EngineError::AlreadyRunning(pid));
            }
        }

        let topology = OsTopologyProvider.read_topology()?;
        let available = num_cpus::get();
        if available < topology.processor_count() {
            warn!(
                available,
                total = topology.processor_count(),
                "this process is itself restricted to a subset of processors"
            );
        }
        info!(model = topology.model(), processors = topology.processor_count(), "cpu topology");

        let loaded = AppStateStorage::load_or_initialize(&config.state_path, &topology, PathRules::native(), &log);
        let ctx = EngineContext::new(topology.clone(), loaded.store)?;

        let elevated = OS::is_elevated();
        if !elevated {
            log.add_entry("Not running elevated, some processes may refuse mask changes".to_string());
        }

        let coordinator = RuleApplicationCoordinator::new(
            ctx,
            Arc::new(OsAffinityApplier::new(&topology)),
            Arc::new(log.clone()),
        )
        .with_elevation(elevated);
        let snapshots = coordinator.subscribe();

        let saver = StateSaver::spawn(config.state_path.clone());
        let (engine, handle) = EngineLoop::new(coordinator, Arc::new(OsForegroundProcess), Some(saver), loaded.needs_save);
        let engine = tokio::spawn(engine.run());

        let usage = UsageTable::default();
        let background = vec![
            tokio::spawn(run_process_monitor(handle.events(), config.poll_interval, OS::get_all_processes)),
            tokio::spawn(run_usage_sampler(
                snapshots.clone(),
                usage.clone(),
                config.usage_interval,
                topology.processor_count(),
                OS::get_process_cpu_time,
            )),
        ];

        Ok(Self {
            handle,
            log,
            snapshots,
            usage,
            topology,
            engine,
            background,
        })
    }

    pub fn handle(&self) -> &EngineHandle {
        &self.handle
    }

    pub fn log(&self) -> &LogManager {
        &self.log
    }

    pub fn topology(&self) -> &CpuTopology {
        &self.topology
    }

    /// Latest published view of the tracked processes.
    pub fn processes(&self) -> Arc<[ProcessSnapshot]> {
        self.snapshots.borrow().clone()
    }

    pub fn cpu_usage(&self) -> UsageTable {
        self.usage.clone()
    }

    /// Stops the engine, clearing masks first if configured, and waits for the last save.
    pub async fn shutdown(self) {
        if let Err(e) = self.handle.shutdown().await {
            error!("engine shutdown failed: {e}");
        }
        drop(self.handle);
        if let Err(e) = self.engine.await {
            error!("engine task failed: {e}");
        }
        for task in self.background {
            task.abort();
        }
        info!("stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(pid: u32, path: &str) -> ProcessEntry {
        ProcessEntry {
            pid,
            name: String::new(),
            image_path: path.to_string(),
        }
    }

    #[test]
    fn other_instance_is_found_by_path() {
        let processes = [entry(1, "C:/Tools/rules.exe"), entry(2, r"c:\tools\RULES.exe"), entry(3, "")];
        assert_eq!(find_other_instance(&processes, 1, "C:/Tools/rules.exe", PathRules::WINDOWS), Some(2));
        assert_eq!(find_other_instance(&processes[..1], 1, "C:/Tools/rules.exe", PathRules::WINDOWS), None);
        assert_eq!(find_other_instance(&processes, 1, "", PathRules::WINDOWS), None);
    }
}
