pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// File the state is persisted to, next to the executable.
pub const STATE_FILE_NAME: &str = "state.json";

/// Overrides the state file location.
pub const STATE_PATH_ENV: &str = "CPU_AFFINITY_RULES_STATE";
