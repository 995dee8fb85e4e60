use thiserror::Error;

use crate::app::models::{MaskId, TemplateId};

/// Rejected user input. Nothing was changed when one of these is returned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("mask name cannot be empty")]
    EmptyMaskName,

    #[error("'{0}' is a reserved mask name")]
    ReservedMaskName(String),

    #[error("a mask named '{0}' already exists")]
    DuplicateMaskName(String),

    #[error("mask '{name}' covers {actual} processors, this system has {expected}")]
    BitLengthMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("mask '{0}' must select at least one processor")]
    EmptySelection(String),

    #[error("invalid glob '{pattern}': {problem}")]
    InvalidGlob { pattern: String, problem: String },

    #[error("unknown mask {0:?}")]
    UnknownMask(MaskId),

    #[error("unknown rule template {0:?}")]
    UnknownTemplate(TemplateId),

    #[error("no program rule exists for '{0}'")]
    UnknownProgramRule(String),

    #[error("no process with pid {0} is being tracked")]
    UnknownProcess(u32),

    #[error("the built-in no mask cannot be renamed, edited or removed")]
    NoMaskImmutable,

    #[error("rule template position {0} is out of range")]
    TemplatePosition(usize),

    #[error("program path cannot be empty")]
    EmptyPath,
}

/// A mask cannot be removed while rules or templates still reference it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("mask '{mask_name}' is used by {program_rules} program rule(s) and {rule_templates} rule template(s)")]
pub struct InUseError {
    pub mask_name: String,
    pub program_rules: usize,
    pub rule_templates: usize,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("state file i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("state file is not valid: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(
        "unsupported CPU topology: {processors} logical processor(s) in {groups} processor group(s); \
         only systems with a single group of 1 to 64 processors are supported"
    )]
    TopologyUnsupported { processors: usize, groups: usize },

    #[error("cannot read CPU topology: {0}")]
    Topology(#[from] os_api::OsError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    InUse(#[from] InUseError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("another instance is already running (pid {0})")]
    AlreadyRunning(u32),

    #[error("the rule engine has stopped")]
    EngineStopped,
}
