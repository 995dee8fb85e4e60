use std::collections::HashMap;
use std::mem::size_of;
use std::time::Duration;

use windows::Win32::Foundation::{
    CloseHandle, ERROR_ACCESS_DENIED, ERROR_INSUFFICIENT_BUFFER, ERROR_INVALID_PARAMETER,
    FILETIME, HANDLE,
};
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, PROCESSENTRY32W, Process32FirstW, Process32NextW, TH32CS_SNAPPROCESS,
};
use windows::Win32::System::SystemInformation::{
    CacheUnified, GetLogicalProcessorInformationEx, LOGICAL_PROCESSOR_RELATIONSHIP,
    RelationCache, RelationProcessorCore, RelationProcessorDie,
    SYSTEM_LOGICAL_PROCESSOR_INFORMATION_EX,
};
use windows::Win32::System::Threading::{
    GetActiveProcessorGroupCount, GetProcessTimes, OpenProcess, PROCESS_ACCESS_RIGHTS,
    PROCESS_NAME_WIN32, PROCESS_QUERY_LIMITED_INFORMATION, PROCESS_SET_INFORMATION,
    QueryFullProcessImageNameW, SetProcessAffinityMask,
};
use windows::Win32::UI::Shell::IsUserAnAdmin;
use windows::Win32::UI::WindowsAndMessaging::{GetForegroundWindow, GetWindowThreadProcessId};
use windows::core::PWSTR;

use winreg::RegKey;
use winreg::enums::*;

use crate::{OsError, OsErrorKind, ProcessEntry, RawCache, RawProcessor, RawTopology};

fn win_to_os_error(e: windows::core::Error, context: &str) -> OsError {
    let code = e.code();
    let kind = if code == ERROR_ACCESS_DENIED.to_hresult() {
        OsErrorKind::PermissionDenied
    } else if code == ERROR_INVALID_PARAMETER.to_hresult() {
        // OpenProcess reports a pid that no longer exists as an invalid parameter
        OsErrorKind::NotFound
    } else {
        OsErrorKind::Other
    };
    OsError {
        code: Some(code.0),
        kind,
        message: format!("{context}: {}", e.message()),
    }
}

// ---- tiny RAII helper ----
struct HandleGuard(HANDLE);
impl Drop for HandleGuard {
    fn drop(&mut self) {
        unsafe {
            if !self.0.is_invalid() {
                let _ = CloseHandle(self.0);
            }
        }
    }
}

pub struct OS;

/// Open process handle with `PROCESS_SET_INFORMATION` access. Closed on drop.
pub struct ProcessAffinityHandle {
    pid: u32,
    handle: HandleGuard,
}

impl std::fmt::Debug for ProcessAffinityHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessAffinityHandle")
            .field("pid", &self.pid)
            .finish()
    }
}

// The handle is only a kernel object reference; it may be used from any thread.
unsafe impl Send for ProcessAffinityHandle {}

impl ProcessAffinityHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Restricts the process to the given processor ids (bit indices of the affinity mask). To
    /// lift a restriction, pass every processor.
    pub fn set_affinity(&mut self, processor_ids: &[u32]) -> Result<(), OsError> {
        let mut mask = 0usize;
        for &id in processor_ids {
            let bit = 1usize.checked_shl(id).ok_or_else(|| {
                OsError::new(
                    OsErrorKind::Other,
                    format!("processor {id} out of range for affinity mask"),
                )
            })?;
            mask |= bit;
        }
        if mask == 0 {
            return Err(OsError::new(OsErrorKind::Other, "affinity set is empty"));
        }
        unsafe { SetProcessAffinityMask(self.handle.0, mask) }
            .map_err(|e| win_to_os_error(e, "SetProcessAffinityMask failed"))
    }
}

impl OS {
    // ---- helpers ----

    fn open_process(pid: u32, access: PROCESS_ACCESS_RIGHTS) -> Result<HANDLE, OsError> {
        unsafe { OpenProcess(access, false, pid) }
            .map_err(|e| win_to_os_error(e, &format!("OpenProcess({pid}) failed")))
    }

    fn filetime_to_duration(ft: FILETIME) -> Duration {
        let ticks = ((ft.dwHighDateTime as u64) << 32) | ft.dwLowDateTime as u64;
        // FILETIME counts 100ns intervals
        Duration::from_nanos(ticks * 100)
    }

    fn get_process_image_path(pid: u32) -> Option<String> {
        let handle = Self::open_process(pid, PROCESS_QUERY_LIMITED_INFORMATION).ok()?;
        let _hg = HandleGuard(handle);

        let mut buffer = [0u16; 1024];
        let mut size = buffer.len() as u32;
        unsafe {
            QueryFullProcessImageNameW(
                handle,
                PROCESS_NAME_WIN32,
                PWSTR(buffer.as_mut_ptr()),
                &mut size,
            )
        }
        .ok()?;
        Some(String::from_utf16_lossy(&buffer[..size as usize]))
    }

    /// Calls `GetLogicalProcessorInformationEx` and returns the raw buffer for one relationship.
    fn logical_processor_information(
        relationship: LOGICAL_PROCESSOR_RELATIONSHIP,
    ) -> Result<Vec<u8>, OsError> {
        let mut length = 0u32;
        unsafe {
            if let Err(e) = GetLogicalProcessorInformationEx(relationship, None, &mut length) {
                if e.code() != ERROR_INSUFFICIENT_BUFFER.to_hresult() {
                    return Err(win_to_os_error(e, "GetLogicalProcessorInformationEx failed"));
                }
            }
            let mut buffer = vec![0u8; length as usize];
            GetLogicalProcessorInformationEx(
                relationship,
                Some(buffer.as_mut_ptr() as *mut SYSTEM_LOGICAL_PROCESSOR_INFORMATION_EX),
                &mut length,
            )
            .map_err(|e| win_to_os_error(e, "GetLogicalProcessorInformationEx failed"))?;
            buffer.truncate(length as usize);
            Ok(buffer)
        }
    }

    /// Walks the variable-length records of a processor information buffer.
    fn for_each_record(buffer: &[u8], mut f: impl FnMut(&SYSTEM_LOGICAL_PROCESSOR_INFORMATION_EX)) {
        let mut offset = 0usize;
        while offset + size_of::<u32>() * 2 <= buffer.len() {
            let item = unsafe {
                &*(buffer.as_ptr().add(offset) as *const SYSTEM_LOGICAL_PROCESSOR_INFORMATION_EX)
            };
            if item.Size == 0 {
                break;
            }
            f(item);
            offset += item.Size as usize;
        }
    }

    fn mask_to_indices(mask: usize) -> Vec<usize> {
        (0..usize::BITS as usize)
            .filter(|i| mask & (1usize << i) != 0)
            .collect()
    }

    // ---- public API ----

    /// Opens a process for affinity changes.
    pub fn open_process_for_affinity(pid: u32) -> Result<ProcessAffinityHandle, OsError> {
        let handle = Self::open_process(pid, PROCESS_SET_INFORMATION)?;
        Ok(ProcessAffinityHandle {
            pid,
            handle: HandleGuard(handle),
        })
    }

    /// Returns every process with its name and image path.
    pub fn get_all_processes() -> Vec<ProcessEntry> {
        let mut results = Vec::new();
        unsafe {
            let snap = match CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) {
                Ok(s) => s,
                Err(_) => return results,
            };
            let _hg = HandleGuard(snap);

            let mut pe: PROCESSENTRY32W = std::mem::zeroed();
            pe.dwSize = size_of::<PROCESSENTRY32W>() as u32;

            if Process32FirstW(snap, &mut pe).is_err() {
                return results;
            }

            loop {
                let len = pe
                    .szExeFile
                    .iter()
                    .position(|&c| c == 0)
                    .unwrap_or(pe.szExeFile.len());
                let name = String::from_utf16_lossy(&pe.szExeFile[..len]);
                let pid = pe.th32ProcessID;

                if pid != 0 {
                    results.push(ProcessEntry {
                        pid,
                        name,
                        image_path: Self::get_process_image_path(pid).unwrap_or_default(),
                    });
                }

                if Process32NextW(snap, &mut pe).is_err() {
                    break;
                }
            }
        }
        results
    }

    /// Total user + kernel time the process has consumed.
    pub fn get_process_cpu_time(pid: u32) -> Option<Duration> {
        let handle = Self::open_process(pid, PROCESS_QUERY_LIMITED_INFORMATION).ok()?;
        let _hg = HandleGuard(handle);

        let mut creation = FILETIME::default();
        let mut exit = FILETIME::default();
        let mut kernel = FILETIME::default();
        let mut user = FILETIME::default();
        unsafe { GetProcessTimes(handle, &mut creation, &mut exit, &mut kernel, &mut user) }.ok()?;
        Some(Self::filetime_to_duration(kernel) + Self::filetime_to_duration(user))
    }

    /// Pid of the process owning the current foreground window.
    pub fn get_foreground_pid() -> Option<u32> {
        unsafe {
            let hwnd = GetForegroundWindow();
            if hwnd.is_invalid() {
                return None;
            }
            let mut pid = 0u32;
            GetWindowThreadProcessId(hwnd, Some(&mut pid));
            (pid != 0).then_some(pid)
        }
    }

    pub fn is_elevated() -> bool {
        unsafe { IsUserAnAdmin().as_bool() }
    }

    pub fn get_cpu_model() -> String {
        let hklm = RegKey::predef(HKEY_LOCAL_MACHINE);
        hklm.open_subkey(r"HARDWARE\DESCRIPTION\System\CentralProcessor\0")
            .and_then(|key| {
                let s: String = key.get_value("ProcessorNameString")?;
                Ok(s.trim_matches(|c: char| c.is_whitespace() || c == '\0')
                    .to_string())
            })
            .unwrap_or_else(|_| "Unknown CPU".to_string())
    }

    /// Reads cores, dies and L3 caches of processor group 0.
    pub fn read_topology() -> Result<RawTopology, OsError> {
        let processor_groups = unsafe { GetActiveProcessorGroupCount() } as usize;

        // (affinity mask, efficiency class) per physical core
        let mut cores: Vec<(usize, u8)> = Vec::new();
        let buffer = Self::logical_processor_information(RelationProcessorCore)?;
        Self::for_each_record(&buffer, |item| unsafe {
            let processor = &item.Anonymous.Processor;
            cores.push((processor.GroupMask[0].Mask, processor.EfficiencyClass));
        });

        let mut die_masks: Vec<usize> = Vec::new();
        if let Ok(buffer) = Self::logical_processor_information(RelationProcessorDie) {
            Self::for_each_record(&buffer, |item| unsafe {
                die_masks.push(item.Anonymous.Processor.GroupMask[0].Mask);
            });
        }

        let mut l3_by_mask: HashMap<usize, u64> = HashMap::new();
        let buffer = Self::logical_processor_information(RelationCache)?;
        Self::for_each_record(&buffer, |item| unsafe {
            let cache = &item.Anonymous.Cache;
            if cache.Level == 3 && cache.Type == CacheUnified {
                *l3_by_mask.entry(cache.Anonymous.GroupMask.Mask).or_default() +=
                    cache.CacheSize as u64;
            }
        });

        let mut processors = Vec::new();
        for index in 0..usize::BITS as usize {
            let bit = 1usize << index;
            let Some(core) = cores.iter().position(|(mask, _)| mask & bit != 0) else {
                break;
            };
            processors.push(RawProcessor {
                index,
                platform_id: index as u32,
                core,
                die: die_masks.iter().position(|mask| mask & bit != 0),
                efficiency_class: cores[core].1,
            });
        }

        let mut l3_caches: Vec<RawCache> = l3_by_mask
            .into_iter()
            .map(|(mask, size_bytes)| RawCache {
                size_bytes,
                processors: Self::mask_to_indices(mask),
            })
            .collect();
        l3_caches.sort_by_key(|c| c.processors.first().copied().unwrap_or(usize::MAX));

        Ok(RawTopology {
            model: Self::get_cpu_model(),
            processor_groups,
            processors,
            l3_caches,
        })
    }
}
