// linux_process_ops.rs

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use nix::errno::Errno;
use nix::sched::{CpuSet, sched_setaffinity};
use nix::sys::signal::kill;
use nix::unistd::{Pid, geteuid};

use crate::{OsError, OsErrorKind, ProcessEntry, RawCache, RawProcessor, RawTopology};

const SYSFS_CPU: &str = "/sys/devices/system/cpu";

pub struct OS;

/// Affinity handle for one process. Linux needs no kernel handle, only a pid that still exists.
///
/// Affinity is per thread on Linux, so every change is applied to each thread of the process.
#[derive(Debug)]
pub struct ProcessAffinityHandle {
    pid: Pid,
}

fn errno_to_os_error(e: Errno, context: &str) -> OsError {
    let kind = match e {
        Errno::EPERM | Errno::EACCES => OsErrorKind::PermissionDenied,
        Errno::ESRCH => OsErrorKind::NotFound,
        _ => OsErrorKind::Other,
    };
    OsError {
        code: Some(e as i32),
        kind,
        message: format!("{context}: {}", e.desc()),
    }
}

impl ProcessAffinityHandle {
    pub fn pid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    /// Restricts every thread of the process to the given processor ids. To lift a
    /// restriction, pass every online processor.
    pub fn set_affinity(&mut self, processor_ids: &[u32]) -> Result<(), OsError> {
        let cpu_set = OS::cpuset_from_ids(processor_ids)?;
        let mut applied = 0;
        for tid in OS::thread_ids(self.pid)? {
            match sched_setaffinity(tid, &cpu_set) {
                Ok(()) => applied += 1,
                // Thread exited since the task list was read
                Err(Errno::ESRCH) => {}
                Err(e) => return Err(errno_to_os_error(e, &format!("sched_setaffinity({tid}) failed"))),
            }
        }
        if applied == 0 {
            return Err(errno_to_os_error(Errno::ESRCH, &format!("process {} has exited", self.pid)));
        }
        Ok(())
    }
}

impl OS {
    // ---- helpers ----
    fn cpuset_from_ids(ids: &[u32]) -> Result<CpuSet, OsError> {
        if ids.is_empty() {
            return Err(OsError::new(OsErrorKind::Other, "affinity set is empty"));
        }
        let mut cpu_set = CpuSet::new();
        for &id in ids {
            cpu_set
                .set(id as usize)
                .map_err(|e| errno_to_os_error(e, &format!("processor {id} out of range")))?;
        }
        Ok(cpu_set)
    }

    fn thread_ids(pid: Pid) -> Result<Vec<Pid>, OsError> {
        let tasks = fs::read_dir(format!("/proc/{pid}/task"))?;
        Ok(tasks
            .flatten()
            .filter_map(|t| t.file_name().to_string_lossy().parse::<i32>().ok())
            .map(Pid::from_raw)
            .collect())
    }

    fn read_trimmed(path: impl AsRef<Path>) -> Option<String> {
        fs::read_to_string(path).ok().map(|s| s.trim().to_string())
    }

    fn read_cpulist(path: impl AsRef<Path>) -> Option<Vec<usize>> {
        let text = Self::read_trimmed(path)?;
        if text.is_empty() {
            return Some(Vec::new());
        }
        cpulist::parse(&text)
            .ok()
            .map(|ids| ids.into_iter().map(|id| id as usize).collect())
    }

    /// Parses sysfs cache sizes such as `32768K`.
    fn parse_cache_size(text: &str) -> Option<u64> {
        let text = text.trim();
        let (digits, multiplier) = match text.chars().last()? {
            'K' => (&text[..text.len() - 1], 1024),
            'M' => (&text[..text.len() - 1], 1024 * 1024),
            'G' => (&text[..text.len() - 1], 1024 * 1024 * 1024),
            _ => (text, 1),
        };
        u64::from_str(digits).ok().map(|n| n * multiplier)
    }

    /// Opens a process for affinity changes.
    ///
    /// Fails with `PermissionDenied` for processes of other users unless running as root, the
    /// same rule the kernel applies to `sched_setaffinity`.
    pub fn open_process_for_affinity(pid: u32) -> Result<ProcessAffinityHandle, OsError> {
        let pid = Pid::from_raw(pid as i32);
        // Signal 0 only checks existence and permission
        kill(pid, None).map_err(|e| errno_to_os_error(e, &format!("cannot open process {pid}")))?;
        Ok(ProcessAffinityHandle { pid })
    }

    /// Returns every process with its name and image path.
    pub fn get_all_processes() -> Vec<ProcessEntry> {
        let mut results = Vec::new();
        let Ok(entries) = fs::read_dir("/proc") else {
            return results;
        };
        for entry in entries.flatten() {
            let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() else {
                continue;
            };
            // /proc/PID/comm is the short name, exe the full image path (unreadable for other users' processes)
            let Some(name) = Self::read_trimmed(entry.path().join("comm")) else {
                continue;
            };
            let image_path = fs::read_link(entry.path().join("exe"))
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default();
            results.push(ProcessEntry {
                pid,
                name,
                image_path,
            });
        }
        results
    }

    /// Checks if a process with a given PID is still running.
    pub fn is_pid_live(pid: u32) -> bool {
        fs::metadata(format!("/proc/{pid}"))
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Total user + kernel time the process has consumed.
    pub fn get_process_cpu_time(pid: u32) -> Option<Duration> {
        let stat = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
        // The command name may contain spaces, so count fields from the closing parenthesis
        let after_paren = &stat[stat.rfind(')')? + 1..];
        let fields: Vec<&str> = after_paren.split_whitespace().collect();
        let utime = u64::from_str(fields.get(11)?).ok()?;
        let stime = u64::from_str(fields.get(12)?).ok()?;

        let ticks_per_second = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        if ticks_per_second <= 0 {
            return None;
        }
        let ticks = utime + stime;
        Some(Duration::from_secs_f64(ticks as f64 / ticks_per_second as f64))
    }

    /// There is no portable notion of a foreground window on Linux.
    pub fn get_foreground_pid() -> Option<u32> {
        None
    }

    pub fn is_elevated() -> bool {
        geteuid().is_root()
    }

    pub fn get_cpu_model() -> String {
        std::fs::read_to_string("/proc/cpuinfo")
            .ok()
            .and_then(|content| {
                content
                    .lines()
                    .find(|line| line.starts_with("model name"))
                    .and_then(|line| line.split(':').nth(1))
                    .map(|s| s.trim().to_string())
            })
            .unwrap_or_else(|| "Unknown CPU".to_string())
    }

    /// Reads the processor layout from sysfs.
    ///
    /// Dies are taken from `die_id` when the package reports more than one, otherwise from the
    /// L3 cache domains, which is how multi-CCD parts show up on Linux.
    pub fn read_topology() -> Result<RawTopology, OsError> {
        let online = Self::read_cpulist(format!("{SYSFS_CPU}/online"))
            .ok_or_else(|| OsError::new(OsErrorKind::NotFound, "cannot read online processors"))?;

        // Hybrid Intel parts expose the performance cores under cpu_core
        let performance_cpus = Self::read_cpulist("/sys/devices/cpu_core/cpus");
        let is_hybrid = Self::read_cpulist("/sys/devices/cpu_atom/cpus").is_some();

        let mut core_numbers: HashMap<(String, String), usize> = HashMap::new();
        let mut die_ids: HashMap<(String, String), usize> = HashMap::new();
        let mut processors = Vec::with_capacity(online.len());
        let mut l3_by_cpus: HashMap<Vec<usize>, u64> = HashMap::new();

        for (index, &cpu) in online.iter().enumerate() {
            let topo = format!("{SYSFS_CPU}/cpu{cpu}/topology");
            let package = Self::read_trimmed(format!("{topo}/physical_package_id")).unwrap_or_default();
            let core_id = Self::read_trimmed(format!("{topo}/core_id")).unwrap_or_else(|| cpu.to_string());
            let die_id = Self::read_trimmed(format!("{topo}/die_id")).unwrap_or_default();

            let next_core = core_numbers.len();
            let core = *core_numbers.entry((package.clone(), core_id)).or_insert(next_core);
            let next_die = die_ids.len();
            let die = *die_ids.entry((package, die_id)).or_insert(next_die);

            let efficiency_class = match (&performance_cpus, is_hybrid) {
                (Some(p_cpus), true) if p_cpus.contains(&cpu) => 1,
                _ => 0,
            };

            processors.push(RawProcessor {
                index,
                platform_id: cpu as u32,
                core,
                die: Some(die),
                efficiency_class,
            });

            if let Ok(caches) = fs::read_dir(format!("{SYSFS_CPU}/cpu{cpu}/cache")) {
                for cache in caches.flatten() {
                    let dir = cache.path();
                    if Self::read_trimmed(dir.join("level")).as_deref() != Some("3") {
                        continue;
                    }
                    let size = Self::read_trimmed(dir.join("size"))
                        .and_then(|s| Self::parse_cache_size(&s));
                    let shared = Self::read_cpulist(dir.join("shared_cpu_list"));
                    if let (Some(size), Some(shared)) = (size, shared) {
                        l3_by_cpus.entry(shared).or_insert(size);
                    }
                }
            }
        }

        // Translate cache domains from OS cpu numbers to mask indices
        let index_of: HashMap<usize, usize> =
            online.iter().enumerate().map(|(i, &cpu)| (cpu, i)).collect();
        let mut l3_caches: Vec<RawCache> = l3_by_cpus
            .into_iter()
            .map(|(cpus, size_bytes)| RawCache {
                size_bytes,
                processors: cpus.iter().filter_map(|c| index_of.get(c).copied()).collect(),
            })
            .collect();
        l3_caches.sort_by_key(|c| c.processors.first().copied().unwrap_or(usize::MAX));

        if die_ids.len() < 2 && l3_caches.len() >= 2 {
            for processor in processors.iter_mut() {
                processor.die = l3_caches
                    .iter()
                    .position(|c| c.processors.contains(&processor.index));
            }
        }

        Ok(RawTopology {
            model: Self::get_cpu_model(),
            processor_groups: 1,
            processors,
            l3_caches,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sysfs_cache_sizes() {
        assert_eq!(OS::parse_cache_size("32768K"), Some(32 * 1024 * 1024));
        assert_eq!(OS::parse_cache_size("96M"), Some(96 * 1024 * 1024));
        assert_eq!(OS::parse_cache_size("512"), Some(512));
        assert_eq!(OS::parse_cache_size("abc"), None);
    }

    #[test]
    fn empty_id_list_is_rejected() {
        assert!(OS::cpuset_from_ids(&[]).is_err());
        assert!(OS::cpuset_from_ids(&[0]).is_ok());
    }

    #[test]
    fn own_process_is_visible() {
        let me = std::process::id();
        assert!(OS::is_pid_live(me));
        assert!(OS::get_all_processes().iter().any(|p| p.pid == me));
        assert!(OS::open_process_for_affinity(me).is_ok());
    }

    fn allowed_cpus(tid: i32) -> Vec<u32> {
        let status = fs::read_to_string(format!("/proc/self/task/{tid}/status")).unwrap();
        let list = status
            .lines()
            .find_map(|l| l.strip_prefix("Cpus_allowed_list:"))
            .unwrap()
            .trim()
            .to_string();
        cpulist::parse(&list).unwrap()
    }

    #[test]
    fn affinity_reaches_threads_that_already_exist() {
        use std::sync::mpsc;

        let me = std::process::id();
        let original = allowed_cpus(me as i32);
        let (tid_tx, tid_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let worker = std::thread::spawn(move || {
            tid_tx.send(unsafe { libc::gettid() }).unwrap();
            let _ = done_rx.recv();
        });
        let tid = tid_rx.recv().unwrap();

        let mut handle = OS::open_process_for_affinity(me).unwrap();
        handle.set_affinity(&original[..1]).unwrap();
        let narrowed = allowed_cpus(tid);
        handle.set_affinity(&original).unwrap();
        done_tx.send(()).unwrap();
        worker.join().unwrap();

        assert_eq!(narrowed, original[..1].to_vec());
        assert_eq!(allowed_cpus(me as i32), original);
    }

    #[test]
    fn other_users_processes_are_refused_without_root() {
        // pid 1 belongs to root
        if OS::is_elevated() || !OS::is_pid_live(1) {
            return;
        }
        let err = OS::open_process_for_affinity(1).unwrap_err();
        assert!(err.is_permission_denied());
    }

    #[test]
    fn missing_process_cannot_be_opened() {
        let err = OS::open_process_for_affinity(u32::MAX - 1).unwrap_err();
        assert_eq!(err.kind, OsErrorKind::NotFound);
    }
}
