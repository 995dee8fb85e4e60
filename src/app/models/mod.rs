//! The models module contains the rule engine: masks, rule templates and program rules, how
//! they resolve for a program path, and how the result is applied to live processes.

/// Native operations the engine needs from the platform
mod affinity_applier;
/// Persistent state storage
mod app_state_storage;
/// Applies masks as processes start and rules change
mod coordinator;
/// CPU schema presets for popular processors
pub mod cpu_presets;
/// Engine state owned by the coordinator
mod engine_context;
mod error;
/// Hotkey combination tracking
mod hotkey;
/// Log management functionality
mod log_manager;
mod mask;
mod meta;
/// Path comparison and glob matching
mod path_match;
/// Live process tracking
mod process_binding;
mod program_rule;
/// Effective mask resolution
pub mod resolver;
/// Mask, template and rule storage with validation
mod rule_store;
mod rule_template;
/// Debounced background saving
mod state_saver;
/// CPU topology and default masks
mod topology;

// Public re-exports of key structures for use in other modules
pub use affinity_applier::{AffinityApplier, CpuTopologyProvider, ForegroundProcess, ProcessHandle};
pub use app_state_storage::{
    AppStateStorage, LoadedState, MaskRecord, ProgramRuleRecord, RuleTemplateRecord, StateFile,
    CURRENT_APP_STATE_VERSION,
};
pub use coordinator::RuleApplicationCoordinator;
pub use engine_context::EngineContext;
pub use error::{EngineError, InUseError, StorageError, ValidationError};
pub use hotkey::{HotkeyBinding, HotkeyMatcher, KeyEvent};
pub use log_manager::{LogManager, LogSink, MAX_LOG_ENTRIES};
pub use mask::{KeyCode, LogicalProcessorMask, MaskId, NO_MASK_NAME};
pub use meta::{APP_VERSION, STATE_FILE_NAME, STATE_PATH_ENV};
pub use path_match::{GlobPattern, PathRules};
pub use process_binding::{ApplyOutcome, BindingState, ProcessBinding, ProcessSnapshot};
pub use program_rule::ProgramRule;
pub use rule_store::{EngineSettings, RuleStore};
pub use rule_template::{RuleTemplate, TemplateId};
pub use state_saver::{StateSaver, SAVE_DEBOUNCE};
pub use topology::{CpuTopology, Die, LogicalProcessor, Manufacturer};
