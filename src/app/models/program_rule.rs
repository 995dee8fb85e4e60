use std::collections::BTreeSet;

use crate::app::models::{MaskId, TemplateId};

/// A mask bound to one program path.
///
/// Rules are created explicitly by the user, or materialized from a matching rule template
/// the first time a process with the path is seen.
#[derive(Debug, Clone)]
pub struct ProgramRule {
    path: String,
    mask: MaskId,
    matching_template: Option<TemplateId>,
    live_pids: BTreeSet<u32>,
}

impl ProgramRule {
    pub(crate) fn new(path: String, mask: MaskId, matching_template: Option<TemplateId>) -> Self {
        Self {
            path,
            mask,
            matching_template,
            live_pids: BTreeSet::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn mask(&self) -> MaskId {
        self.mask
    }

    /// First template in priority order whose glob matches the path.
    pub fn matching_template(&self) -> Option<TemplateId> {
        self.matching_template
    }

    pub fn live_pids(&self) -> &BTreeSet<u32> {
        &self.live_pids
    }

    pub fn has_live_processes(&self) -> bool {
        !self.live_pids.is_empty()
    }

    /// Nothing is lost by dropping the rule: it selects no mask, no template speaks for the
    /// path, and no running process is attributed to it.
    pub fn is_redundant(&self) -> bool {
        self.mask.is_no_mask() && self.matching_template.is_none() && self.live_pids.is_empty()
    }

    pub(crate) fn set_mask(&mut self, mask: MaskId) {
        self.mask = mask;
    }

    pub(crate) fn set_matching_template(&mut self, template: Option<TemplateId>) {
        self.matching_template = template;
    }

    pub(crate) fn attach_pid(&mut self, pid: u32) {
        self.live_pids.insert(pid);
    }

    pub(crate) fn detach_pid(&mut self, pid: u32) -> bool {
        self.live_pids.remove(&pid)
    }

    pub(crate) fn clear_live_pids(&mut self) {
        self.live_pids.clear();
    }
}
