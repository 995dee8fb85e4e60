use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, RwLock};
use tracing::debug;

use crate::app::models::ProcessSnapshot;

pub const USAGE_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);
pub const USAGE_WINDOW: Duration = Duration::from_secs(30);

/// Average CPU usage per pid, as a fraction of the whole machine.
pub type UsageTable = Arc<RwLock<HashMap<u32, f64>>>;

/// Moving average of process CPU usage over a fixed window.
#[derive(Debug)]
pub struct CpuUsageTracker {
    processor_count: usize,
    window: Duration,
    samples: HashMap<u32, VecDeque<(Instant, Duration)>>,
}

impl CpuUsageTracker {
    pub fn new(processor_count: usize, window: Duration) -> Self {
        Self {
            processor_count: processor_count.max(1),
            window,
            samples: HashMap::new(),
        }
    }

    /// Records the cumulative CPU time of a process. Returns the average usage since the oldest
    /// sample still inside the window, `None` until two samples exist.
    pub fn record(&mut self, pid: u32, at: Instant, cpu_time: Duration) -> Option<f64> {
        let samples = self.samples.entry(pid).or_default();
        samples.push_back((at, cpu_time));
        // Keep one sample at or beyond the window edge as the baseline
        while samples.len() > 2 && at.duration_since(samples[1].0) >= self.window {
            samples.pop_front();
        }

        let &(start, start_cpu) = samples.front()?;
        let elapsed = at.duration_since(start);
        if elapsed.is_zero() {
            return None;
        }
        let used = cpu_time.saturating_sub(start_cpu);
        let usage = used.as_secs_f64() / elapsed.as_secs_f64() / self.processor_count as f64;
        Some(usage.clamp(0.0, 1.0))
    }

    pub fn retain(&mut self, live: &HashSet<u32>) {
        self.samples.retain(|pid, _| live.contains(pid));
    }
}

/// Samples CPU time of every tracked process and publishes the averages into `usage`.
///
/// Only reads the published process snapshots. Stops when the engine drops its snapshot sender.
pub async fn run_usage_sampler<F>(
    mut snapshots: watch::Receiver<Arc<[ProcessSnapshot]>>,
    usage: UsageTable,
    period: Duration,
    processor_count: usize,
    cpu_time: F,
) where
    F: Fn(u32) -> Option<Duration> + Send + 'static,
{
    let mut tracker = CpuUsageTracker::new(processor_count, USAGE_WINDOW);
    let mut interval = tokio::time::interval(period);

    loop {
        interval.tick().await;
        if snapshots.has_changed().is_err() {
            debug!("engine stopped, usage sampler exiting");
            return;
        }

        let pids: HashSet<u32> = snapshots.borrow_and_update().iter().map(|p| p.pid).collect();
        let now = Instant::now();
        let averages: HashMap<u32, f64> = pids
            .iter()
            .filter_map(|&pid| {
                let time = cpu_time(pid)?;
                tracker.record(pid, now, time).map(|avg| (pid, avg))
            })
            .collect();
        tracker.retain(&pids);

        // Readers holding the lock just see the previous averages for another second
        if let Ok(mut table) = usage.try_write() {
            *table = averages;
        }
    }
}
