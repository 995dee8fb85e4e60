use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::app::models::{
    EngineError, GlobPattern, HotkeyBinding, InUseError, KeyCode, LogicalProcessorMask, MaskId, PathRules,
    ProgramRule, RuleTemplate, TemplateId, ValidationError, NO_MASK_NAME,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Look program rules up by full path; when off only the file name is compared.
    pub match_whole_path: bool,
    /// Reset every process to the no mask when the engine shuts down.
    pub clear_masks_on_close: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            match_whole_path: true,
            clear_masks_on_close: false,
        }
    }
}

/// Masks, rule templates and program rules, with their validation.
///
/// The no mask is always the first mask. Every mutation bumps [`RuleStore::revision`], which is
/// what decides whether the state needs to be saved.
#[derive(Debug, Clone)]
pub struct RuleStore {
    processor_count: usize,
    path_rules: PathRules,
    masks: Vec<LogicalProcessorMask>,
    templates: Vec<RuleTemplate>,
    rules: Vec<ProgramRule>,
    settings: EngineSettings,
    next_id: u64,
    revision: u64,
}

impl RuleStore {
    pub fn new(processor_count: usize, path_rules: PathRules) -> Self {
        Self {
            processor_count,
            path_rules,
            masks: vec![LogicalProcessorMask::no_mask(BTreeSet::new())],
            templates: Vec::new(),
            rules: Vec::new(),
            settings: EngineSettings::default(),
            next_id: 1,
            revision: 0,
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn processor_count(&self) -> usize {
        self.processor_count
    }

    pub fn path_rules(&self) -> PathRules {
        self.path_rules
    }

    // ---- settings ----

    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    /// Returns whether the setting changed.
    pub fn set_match_whole_path(&mut self, enabled: bool) -> bool {
        if self.settings.match_whole_path == enabled {
            return false;
        }
        self.settings.match_whole_path = enabled;
        self.touch();
        true
    }

    pub fn set_clear_masks_on_close(&mut self, enabled: bool) {
        if self.settings.clear_masks_on_close != enabled {
            self.settings.clear_masks_on_close = enabled;
            self.touch();
        }
    }

    // ---- masks ----

    pub fn masks(&self) -> &[LogicalProcessorMask] {
        &self.masks
    }

    pub fn no_mask(&self) -> &LogicalProcessorMask {
        &self.masks[0]
    }

    pub fn mask(&self, id: MaskId) -> Option<&LogicalProcessorMask> {
        self.masks.iter().find(|m| m.id() == id)
    }

    fn mask_mut(&mut self, id: MaskId) -> Result<&mut LogicalProcessorMask, ValidationError> {
        self.masks
            .iter_mut()
            .find(|m| m.id() == id)
            .ok_or(ValidationError::UnknownMask(id))
    }

    /// Empty and the reserved name both refer to the no mask.
    pub fn mask_by_name(&self, name: &str) -> Option<&LogicalProcessorMask> {
        if name.is_empty() {
            return Some(self.no_mask());
        }
        self.masks.iter().find(|m| m.name() == name)
    }

    fn validate_mask_name(&self, name: &str, renaming: Option<MaskId>) -> Result<String, ValidationError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyMaskName);
        }
        if name == NO_MASK_NAME {
            return Err(ValidationError::ReservedMaskName(name.to_string()));
        }
        if self
            .masks
            .iter()
            .any(|m| m.name() == name && Some(m.id()) != renaming)
        {
            return Err(ValidationError::DuplicateMaskName(name.to_string()));
        }
        Ok(name.to_string())
    }

    fn validate_bits(&self, name: &str, bits: &[bool]) -> Result<(), ValidationError> {
        if bits.len() != self.processor_count {
            return Err(ValidationError::BitLengthMismatch {
                name: name.to_string(),
                expected: self.processor_count,
                actual: bits.len(),
            });
        }
        if !bits.contains(&true) {
            return Err(ValidationError::EmptySelection(name.to_string()));
        }
        Ok(())
    }

    pub fn create_mask(
        &mut self,
        name: &str,
        bits: Vec<bool>,
        hotkey: BTreeSet<KeyCode>,
    ) -> Result<MaskId, ValidationError> {
        let name = self.validate_mask_name(name, None)?;
        self.validate_bits(&name, &bits)?;
        let id = MaskId(self.allocate_id());
        self.masks.push(LogicalProcessorMask::new(id, name, bits, hotkey));
        self.touch();
        Ok(id)
    }

    pub fn rename_mask(&mut self, id: MaskId, name: &str) -> Result<(), ValidationError> {
        if id.is_no_mask() {
            return Err(ValidationError::NoMaskImmutable);
        }
        let name = self.validate_mask_name(name, Some(id))?;
        self.mask_mut(id)?.set_name(name);
        self.touch();
        Ok(())
    }

    pub fn set_mask_bits(&mut self, id: MaskId, bits: Vec<bool>) -> Result<(), ValidationError> {
        if id.is_no_mask() {
            return Err(ValidationError::NoMaskImmutable);
        }
        let name = self.mask(id).ok_or(ValidationError::UnknownMask(id))?.name().to_string();
        self.validate_bits(&name, &bits)?;
        self.mask_mut(id)?.set_bits(bits);
        self.touch();
        Ok(())
    }

    /// The no mask may carry a hotkey too.
    pub fn set_mask_hotkey(&mut self, id: MaskId, hotkey: BTreeSet<KeyCode>) -> Result<(), ValidationError> {
        self.mask_mut(id)?.set_hotkey(hotkey);
        self.touch();
        Ok(())
    }

    /// (program rules, rule templates) referencing the mask.
    pub fn mask_usage(&self, id: MaskId) -> (usize, usize) {
        (
            self.rules.iter().filter(|r| r.mask() == id).count(),
            self.templates.iter().filter(|t| t.mask() == id).count(),
        )
    }

    pub fn remove_mask(&mut self, id: MaskId) -> Result<LogicalProcessorMask, EngineError> {
        if id.is_no_mask() {
            return Err(ValidationError::NoMaskImmutable.into());
        }
        let index = self
            .masks
            .iter()
            .position(|m| m.id() == id)
            .ok_or(ValidationError::UnknownMask(id))?;
        let (program_rules, rule_templates) = self.mask_usage(id);
        if program_rules > 0 || rule_templates > 0 {
            return Err(InUseError {
                mask_name: self.masks[index].name().to_string(),
                program_rules,
                rule_templates,
            }
            .into());
        }
        let removed = self.masks.remove(index);
        self.touch();
        Ok(removed)
    }

    /// Drops every template and program rule using the mask. Returns the paths of the removed rules.
    pub fn remove_rules_using_mask(&mut self, id: MaskId) -> Vec<String> {
        let before = (self.templates.len(), self.rules.len());
        self.templates.retain(|t| t.mask() != id);
        let (removed, kept): (Vec<ProgramRule>, Vec<ProgramRule>) =
            std::mem::take(&mut self.rules).into_iter().partition(|r| r.mask() == id);
        self.rules = kept;
        if before != (self.templates.len(), self.rules.len()) {
            self.touch();
        }
        removed.into_iter().map(|r| r.path().to_string()).collect()
    }

    pub fn hotkey_bindings(&self) -> impl Iterator<Item = HotkeyBinding<'_>> {
        self.masks
            .iter()
            .filter(|m| !m.hotkey().is_empty())
            .map(|m| HotkeyBinding {
                mask: m.id(),
                keys: m.hotkey(),
                allow_repeats: false,
            })
    }

    // ---- program rules ----

    pub fn program_rules(&self) -> &[ProgramRule] {
        &self.rules
    }

    pub(crate) fn program_rules_mut(&mut self) -> &mut [ProgramRule] {
        &mut self.rules
    }

    /// Whether a rule stored under `rule_path` applies to a process running from `path`.
    pub fn rule_applies_to(&self, rule_path: &str, path: &str) -> bool {
        let whole = self.settings.match_whole_path;
        self.path_rules.rule_key(rule_path, whole) == self.path_rules.rule_key(path, whole)
    }

    fn find_program_rule_index(&self, path: &str) -> Option<usize> {
        if path.is_empty() {
            return None;
        }
        let key = self.path_rules.rule_key(path, self.settings.match_whole_path);
        self.rules
            .iter()
            .position(|r| self.path_rules.rule_key(r.path(), self.settings.match_whole_path) == key)
    }

    pub fn find_program_rule(&self, path: &str) -> Option<&ProgramRule> {
        self.find_program_rule_index(path).map(|i| &self.rules[i])
    }

    pub(crate) fn find_program_rule_mut(&mut self, path: &str) -> Option<&mut ProgramRule> {
        self.find_program_rule_index(path).map(move |i| &mut self.rules[i])
    }

    /// Adds a rule for a path that has none yet.
    pub(crate) fn insert_program_rule(
        &mut self,
        path: &str,
        mask: MaskId,
        matching_template: Option<TemplateId>,
    ) -> Result<(), ValidationError> {
        if path.is_empty() {
            return Err(ValidationError::EmptyPath);
        }
        if self.mask(mask).is_none() {
            return Err(ValidationError::UnknownMask(mask));
        }
        debug_assert!(self.find_program_rule(path).is_none());
        self.rules
            .push(ProgramRule::new(path.to_string(), mask, matching_template));
        self.touch();
        Ok(())
    }

    /// Creates or updates the rule for `path`.
    pub fn set_program_rule_mask(&mut self, path: &str, mask: MaskId) -> Result<(), ValidationError> {
        if path.is_empty() {
            return Err(ValidationError::EmptyPath);
        }
        if self.mask(mask).is_none() {
            return Err(ValidationError::UnknownMask(mask));
        }
        match self.find_program_rule_mut(path) {
            Some(rule) if rule.mask() == mask => {}
            Some(rule) => {
                rule.set_mask(mask);
                self.touch();
            }
            None => {
                let template = self.find_matching_template(path).map(|t| t.id());
                self.insert_program_rule(path, mask, template)?;
            }
        }
        Ok(())
    }

    pub fn remove_program_rule(&mut self, path: &str) -> Option<ProgramRule> {
        let index = self.find_program_rule_index(path)?;
        self.touch();
        Some(self.rules.remove(index))
    }

    /// Removes rules that no longer carry information. Returns their paths.
    pub fn prune_redundant_rules(&mut self) -> Vec<String> {
        let (removed, kept): (Vec<ProgramRule>, Vec<ProgramRule>) =
            std::mem::take(&mut self.rules).into_iter().partition(|r| r.is_redundant());
        self.rules = kept;
        if !removed.is_empty() {
            self.touch();
        }
        removed.into_iter().map(|r| r.path().to_string()).collect()
    }

    /// Live process tracking does not count as a change worth saving.
    pub(crate) fn attach_pid(&mut self, path: &str, pid: u32) -> bool {
        match self.find_program_rule_mut(path) {
            Some(rule) => {
                rule.attach_pid(pid);
                true
            }
            None => false,
        }
    }

    pub(crate) fn detach_pid(&mut self, pid: u32) {
        for rule in self.rules.iter_mut() {
            rule.detach_pid(pid);
        }
    }

    pub(crate) fn reset_live_pids(&mut self) {
        for rule in self.rules.iter_mut() {
            rule.clear_live_pids();
        }
    }

    // ---- rule templates ----

    pub fn rule_templates(&self) -> &[RuleTemplate] {
        &self.templates
    }

    pub fn rule_template(&self, id: TemplateId) -> Option<&RuleTemplate> {
        self.templates.iter().find(|t| t.id() == id)
    }

    fn template_index(&self, id: TemplateId) -> Result<usize, ValidationError> {
        self.templates
            .iter()
            .position(|t| t.id() == id)
            .ok_or(ValidationError::UnknownTemplate(id))
    }

    /// First template, in priority order, whose glob matches.
    pub fn find_matching_template(&self, path: &str) -> Option<&RuleTemplate> {
        self.templates.iter().find(|t| t.matches(path))
    }

    /// Compiles a glob for a template. Patterns that could never match are rejected.
    pub fn compile_glob(&self, pattern: &str) -> Result<GlobPattern, ValidationError> {
        let glob = GlobPattern::new(pattern, self.path_rules)?;
        if !glob.is_anchored() {
            return Err(ValidationError::InvalidGlob {
                pattern: pattern.to_string(),
                problem: "must start with a root, '**' or '*/'".to_string(),
            });
        }
        Ok(glob)
    }

    /// Appends a template at the lowest priority.
    pub fn add_rule_template(&mut self, pattern: &str, mask: MaskId) -> Result<TemplateId, ValidationError> {
        let glob = self.compile_glob(pattern)?;
        if self.mask(mask).is_none() {
            return Err(ValidationError::UnknownMask(mask));
        }
        let id = TemplateId(self.allocate_id());
        self.templates.push(RuleTemplate::new(id, glob, mask));
        self.touch();
        Ok(id)
    }

    pub fn remove_rule_template(&mut self, id: TemplateId) -> Result<RuleTemplate, ValidationError> {
        let index = self.template_index(id)?;
        self.touch();
        Ok(self.templates.remove(index))
    }

    pub fn set_rule_template_glob(&mut self, id: TemplateId, pattern: &str) -> Result<(), ValidationError> {
        let index = self.template_index(id)?;
        let glob = self.compile_glob(pattern)?;
        self.templates[index].set_glob(glob);
        self.touch();
        Ok(())
    }

    /// Returns the mask the template had before.
    pub fn set_rule_template_mask(&mut self, id: TemplateId, mask: MaskId) -> Result<MaskId, ValidationError> {
        let index = self.template_index(id)?;
        if self.mask(mask).is_none() {
            return Err(ValidationError::UnknownMask(mask));
        }
        let old = self.templates[index].mask();
        self.templates[index].set_mask(mask);
        self.touch();
        Ok(old)
    }

    /// Moves a template to another priority position.
    pub fn move_rule_template(&mut self, id: TemplateId, position: usize) -> Result<(), ValidationError> {
        let index = self.template_index(id)?;
        if position >= self.templates.len() {
            return Err(ValidationError::TemplatePosition(position));
        }
        let template = self.templates.remove(index);
        self.templates.insert(position, template);
        self.touch();
        Ok(())
    }
}
