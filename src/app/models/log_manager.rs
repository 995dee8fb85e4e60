use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Number of entries kept before the oldest are dropped.
pub const MAX_LOG_ENTRIES: usize = 1000;

/// Destination for the user-facing log lines the engine writes.
pub trait LogSink: Send + Sync {
    fn write(&self, line: &str);
}

/// Manages application log entries with timestamps.
///
/// Cloning shares the same entries, so the engine and whatever displays the log can each hold
/// one. Every entry is also forwarded to `tracing`.
#[derive(Clone, Default)]
pub struct LogManager {
    entries: Arc<Mutex<VecDeque<String>>>,
}

impl LogManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn timestamp() -> String {
        // Get current time since UNIX epoch
        let duration = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();

        // Format time as [HH:MM:SS] using simple time calculations
        let secs = duration.as_secs();
        format!(
            "[{:02}:{:02}:{:02}]",
            (secs % 86400) / 3600, // hours
            (secs % 3600) / 60,    // minutes
            secs % 60              // seconds
        )
    }

    /// Adds a new log entry with a timestamp in the format [HH:MM:SS].
    ///
    /// # Example
    ///
    /// ```
    /// use cpu_affinity_rules::app::models::LogManager;
    ///
    /// let log_manager = LogManager::new();
    /// log_manager.add_entry("Application started".to_string());
    /// // Adds an entry like "[12:34:56] :: Application started"
    /// assert!(log_manager.entries()[0].ends_with(":: Application started"));
    /// ```
    pub fn add_entry(&self, message: String) {
        if message.starts_with("ERROR") {
            tracing::error!("{message}");
        } else if message.starts_with("WARNING") {
            tracing::warn!("{message}");
        } else {
            tracing::info!("{message}");
        }

        let entry = format!("{} :: {message}", Self::timestamp());
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() == MAX_LOG_ENTRIES {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl LogSink for LogManager {
    fn write(&self, line: &str) {
        self.add_entry(line.to_string());
    }
}
