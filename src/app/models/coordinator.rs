use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use crate::app::models::resolver::{self, apply_rule_change, plan_rule_change};
use crate::app::models::{
    AffinityApplier, AppStateStorage, ApplyOutcome, EngineContext, EngineError, KeyCode, LogSink, MaskId,
    ProcessBinding, ProcessSnapshot, RuleStore, TemplateId, ValidationError,
};

/// Applies masks to processes as processes come and go and as the rules are edited.
///
/// Owns the engine state; callers drive it from a single task. Every operation that changes
/// what processes look like republishes the process snapshots.
pub struct RuleApplicationCoordinator {
    ctx: EngineContext,
    applier: Arc<dyn AffinityApplier>,
    log: Arc<dyn LogSink>,
    elevated: bool,
    applying_paths: HashSet<String>,
    snapshots: watch::Sender<Arc<[ProcessSnapshot]>>,
}

impl RuleApplicationCoordinator {
    pub fn new(ctx: EngineContext, applier: Arc<dyn AffinityApplier>, log: Arc<dyn LogSink>) -> Self {
        let (snapshots, _) = watch::channel(Arc::from(Vec::new()));
        Self {
            ctx,
            applier,
            log,
            elevated: false,
            applying_paths: HashSet::new(),
            snapshots,
        }
    }

    /// Whether the engine runs with administrator rights; only changes the advice given on
    /// access denied errors.
    pub fn with_elevation(mut self, elevated: bool) -> Self {
        self.elevated = elevated;
        self
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn store(&self) -> &RuleStore {
        &self.ctx.store
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<[ProcessSnapshot]>> {
        self.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> Arc<[ProcessSnapshot]> {
        self.snapshots.borrow().clone()
    }

    fn publish(&self) {
        let store = &self.ctx.store;
        let snapshot: Vec<ProcessSnapshot> = self
            .ctx
            .bindings
            .values()
            .map(|b| {
                let name = store.mask(b.mask()).map(|m| m.display_name()).unwrap_or_default();
                b.snapshot(name)
            })
            .collect();
        self.snapshots.send_replace(snapshot.into());
    }

    // ---- applying ----

    fn apply_to_process(&mut self, pid: u32, mask_id: MaskId, force: bool) -> bool {
        let Some(mask) = self.ctx.store.mask(mask_id) else {
            return false;
        };
        let mask_name = mask.name().to_string();
        let (ids, missing) = if mask.is_no_mask() {
            (None, Vec::new())
        } else {
            let (ids, missing) = self.ctx.topology.core_id_set(mask.bits());
            (Some(ids), missing)
        };

        let Some(binding) = self.ctx.bindings.get_mut(&pid) else {
            return false;
        };
        let outcome = binding.apply(mask_id, ids.as_deref(), self.applier.as_ref(), force);
        let process_name = binding.name().to_string();

        self.log_outcome(&process_name, mask_id, &mask_name, &missing, &outcome);
        outcome.is_success()
    }

    fn log_outcome(&self, process: &str, mask_id: MaskId, mask: &str, missing: &[usize], outcome: &ApplyOutcome) {
        let line = match outcome {
            ApplyOutcome::Skipped { .. } => return,
            ApplyOutcome::Restricted => {
                let names = self.ctx.topology.processor_names();
                for &index in missing {
                    let processor = names.get(index).map(String::as_str).unwrap_or("?");
                    self.log.write(&format!(
                        "WARNING: Unable to include '{processor}' in mask '{mask}'. It has no platform processor id"
                    ));
                }
                format!("Applied mask '{mask}' to '{process}'")
            }
            ApplyOutcome::Cleared => format!("Cleared mask of '{process}'"),
            ApplyOutcome::OpenFailed(e) => {
                let mut line = format!("ERROR: Could not open process '{process}': {e}");
                if e.is_permission_denied() && !self.elevated {
                    line.push_str(" Try restarting as administrator");
                }
                line
            }
            ApplyOutcome::ApplyFailed(e) => {
                let mut line = if mask_id.is_no_mask() {
                    format!("ERROR: Could not clear mask of '{process}': {e}")
                } else {
                    format!("ERROR: Could not apply mask '{mask}' to '{process}': {e}")
                };
                // Without elevation the refusal is most likely ours; with it, something guards the process
                if e.is_permission_denied() {
                    line.push_str(if self.elevated {
                        " Likely due to anti-cheat"
                    } else {
                        " Try restarting as administrator"
                    });
                }
                line
            }
        };
        self.log.write(&line);
    }

    /// Applies the effective mask of `path` to every live process the rule for it covers.
    fn apply_rules_to_path(&mut self, path: &str) -> bool {
        if path.is_empty() {
            return true;
        }
        let key = self.ctx.store.path_rules().normalize(path);
        if !self.applying_paths.insert(key.clone()) {
            debug!(path, "apply already in progress for path");
            return true;
        }

        let mask = resolver::get_or_create_program_rule(&mut self.ctx.store, path)
            .map(|r| r.mask())
            .unwrap_or(MaskId::NO_MASK);
        let store = &self.ctx.store;
        let pids: Vec<u32> = self
            .ctx
            .bindings
            .values()
            .filter(|b| !b.image_path().is_empty() && store.rule_applies_to(path, b.image_path()))
            .map(ProcessBinding::pid)
            .collect();

        let mut success = true;
        for pid in pids {
            self.ctx.store.attach_pid(path, pid);
            success &= self.apply_to_process(pid, mask, false);
        }

        self.applying_paths.remove(&key);
        success
    }

    /// Re-resolves every live process, then relinks rules to templates and drops rules that no
    /// longer carry anything.
    pub fn refresh_all_rules(&mut self) -> bool {
        self.ctx.store.reset_live_pids();
        let processes: Vec<(u32, String)> = self
            .ctx
            .bindings
            .values()
            .map(|b| (b.pid(), b.image_path().to_string()))
            .collect();

        let mut success = true;
        for (pid, path) in processes {
            let mask = resolver::get_or_create_program_rule(&mut self.ctx.store, &path)
                .map(|r| r.mask())
                .unwrap_or(MaskId::NO_MASK);
            self.ctx.store.attach_pid(&path, pid);
            success &= self.apply_to_process(pid, mask, false);
        }

        resolver::refresh_template_links(&mut self.ctx.store);
        self.ctx.store.prune_redundant_rules();
        self.publish();
        success
    }

    fn reset_processes_using(&mut self, mask: MaskId) -> bool {
        let pids: Vec<u32> = self
            .ctx
            .bindings
            .values()
            .filter(|b| b.mask() == mask)
            .map(ProcessBinding::pid)
            .collect();
        pids.into_iter()
            .fold(true, |ok, pid| self.apply_to_process(pid, MaskId::NO_MASK, false) && ok)
    }

    // ---- process events ----

    /// Starts tracking a process and applies its effective mask. `None` if the pid was
    /// already tracked.
    pub fn on_process_created(&mut self, pid: u32, name: String, image_path: String) -> Option<bool> {
        if self.ctx.bindings.contains_key(&pid) {
            debug!(pid, "process already tracked");
            return None;
        }
        self.ctx
            .bindings
            .insert(pid, ProcessBinding::new(pid, name, image_path.clone()));

        let mask = resolver::get_or_create_program_rule(&mut self.ctx.store, &image_path)
            .map(|r| r.mask())
            .unwrap_or(MaskId::NO_MASK);
        self.ctx.store.attach_pid(&image_path, pid);
        let success = self.apply_to_process(pid, mask, false);
        self.publish();
        Some(success)
    }

    /// Stops tracking a process. Nothing is applied to it anymore.
    pub fn on_process_exited(&mut self, pid: u32) -> bool {
        if self.ctx.bindings.remove(&pid).is_none() {
            return false;
        }
        self.ctx.store.detach_pid(pid);
        self.ctx.store.prune_redundant_rules();
        self.publish();
        true
    }

    /// Applies a mask selected by hotkey to the foreground process, remembering it as a
    /// program rule like any other choice. `None` if there is no tracked foreground process.
    pub fn apply_hotkey(&mut self, mask: MaskId, foreground_pid: Option<u32>) -> Option<bool> {
        let pid = foreground_pid?;
        if !self.ctx.bindings.contains_key(&pid) {
            debug!(pid, "foreground process is not tracked");
            return None;
        }
        self.set_process_mask(pid, mask).ok()
    }

    // ---- user operations ----

    /// Chooses a mask for a process. The choice is stored as a program rule for its path and
    /// applied to every process running from that path.
    pub fn set_process_mask(&mut self, pid: u32, mask: MaskId) -> Result<bool, ValidationError> {
        if self.ctx.store.mask(mask).is_none() {
            return Err(ValidationError::UnknownMask(mask));
        }
        let path = self
            .ctx
            .bindings
            .get(&pid)
            .ok_or(ValidationError::UnknownProcess(pid))?
            .image_path()
            .to_string();

        let success = if path.is_empty() {
            // Nothing to key a rule on
            self.apply_to_process(pid, mask, false)
        } else {
            let change = plan_rule_change(&self.ctx.store, &path, mask);
            apply_rule_change(&mut self.ctx.store, &change)?;
            self.apply_rules_to_path(&path)
        };
        self.publish();
        Ok(success)
    }

    /// Deletes a program rule. A rule whose path a template still matches and whose program is
    /// running falls back to the template's mask instead.
    pub fn remove_program_rule(&mut self, path: &str) -> Result<bool, ValidationError> {
        let rule = self
            .ctx
            .store
            .find_program_rule(path)
            .ok_or_else(|| ValidationError::UnknownProgramRule(path.to_string()))?;
        let rule_path = rule.path().to_string();
        let live = rule.has_live_processes();
        let template_mask = self.ctx.store.find_matching_template(&rule_path).map(|t| t.mask());

        match template_mask {
            Some(mask) if live => self.ctx.store.set_program_rule_mask(&rule_path, mask)?,
            _ => {
                self.ctx.store.remove_program_rule(&rule_path);
            }
        }

        let success = if live { self.apply_rules_to_path(&rule_path) } else { true };
        self.publish();
        Ok(success)
    }

    pub fn add_rule_template(&mut self, glob: &str, mask: MaskId) -> Result<TemplateId, ValidationError> {
        let id = self.ctx.store.add_rule_template(glob, mask)?;
        self.refresh_all_rules();
        Ok(id)
    }

    pub fn remove_rule_template(&mut self, id: TemplateId) -> Result<bool, ValidationError> {
        self.ctx.store.remove_rule_template(id)?;
        Ok(self.refresh_all_rules())
    }

    pub fn set_rule_template_glob(&mut self, id: TemplateId, glob: &str) -> Result<bool, ValidationError> {
        self.ctx.store.set_rule_template_glob(id, glob)?;
        Ok(self.refresh_all_rules())
    }

    /// Rules materialized from the template that still carry its old mask follow it to the new
    /// one; rules the user changed keep their mask.
    pub fn set_rule_template_mask(&mut self, id: TemplateId, mask: MaskId) -> Result<bool, ValidationError> {
        let old = self.ctx.store.set_rule_template_mask(id, mask)?;
        let followers: Vec<String> = self
            .ctx
            .store
            .program_rules()
            .iter()
            .filter(|r| r.matching_template() == Some(id) && r.mask() == old)
            .map(|r| r.path().to_string())
            .collect();

        let mut success = true;
        for path in followers {
            self.ctx.store.set_program_rule_mask(&path, mask)?;
            success &= self.apply_rules_to_path(&path);
        }
        Ok(self.refresh_all_rules() && success)
    }

    pub fn move_rule_template(&mut self, id: TemplateId, position: usize) -> Result<bool, ValidationError> {
        self.ctx.store.move_rule_template(id, position)?;
        Ok(self.refresh_all_rules())
    }

    /// Resets every program rule the template matches to the template's mask.
    pub fn reapply_rule_template(&mut self, id: TemplateId) -> Result<bool, ValidationError> {
        let mask = self
            .ctx
            .store
            .rule_template(id)
            .ok_or(ValidationError::UnknownTemplate(id))?
            .mask();
        let store = &self.ctx.store;
        let paths: Vec<String> = store
            .program_rules()
            .iter()
            .filter(|r| store.find_matching_template(r.path()).map(|t| t.id()) == Some(id))
            .map(|r| r.path().to_string())
            .collect();

        let mut success = true;
        for path in paths {
            self.ctx.store.set_program_rule_mask(&path, mask)?;
            success &= self.apply_rules_to_path(&path);
        }
        Ok(self.refresh_all_rules() && success)
    }

    pub fn create_mask(
        &mut self,
        name: &str,
        bits: Vec<bool>,
        hotkey: BTreeSet<KeyCode>,
    ) -> Result<MaskId, ValidationError> {
        self.ctx.store.create_mask(name, bits, hotkey)
    }

    pub fn rename_mask(&mut self, id: MaskId, name: &str) -> Result<(), ValidationError> {
        self.ctx.store.rename_mask(id, name)?;
        self.publish();
        Ok(())
    }

    pub fn set_mask_hotkey(&mut self, id: MaskId, hotkey: BTreeSet<KeyCode>) -> Result<(), ValidationError> {
        self.ctx.store.set_mask_hotkey(id, hotkey)
    }

    /// Changes which processors a mask selects and re-applies it to every process using it.
    pub fn update_mask_bits(&mut self, id: MaskId, bits: Vec<bool>) -> Result<bool, ValidationError> {
        self.ctx.store.set_mask_bits(id, bits)?;
        let pids: Vec<u32> = self
            .ctx
            .bindings
            .values()
            .filter(|b| b.mask() == id)
            .map(ProcessBinding::pid)
            .collect();
        let success = pids
            .into_iter()
            .fold(true, |ok, pid| self.apply_to_process(pid, id, true) && ok);
        self.publish();
        Ok(success)
    }

    /// Removes a mask no rule or template uses. Processes still running with it are reset.
    pub fn remove_mask(&mut self, id: MaskId) -> Result<bool, EngineError> {
        let removed = self.ctx.store.remove_mask(id)?;
        debug!(mask = removed.name(), "mask removed");
        let success = self.reset_processes_using(id);
        self.publish();
        Ok(success)
    }

    /// Removes a mask together with every rule and template using it. Affected processes
    /// fall back to whatever else resolves for their path.
    pub fn remove_mask_cascade(&mut self, id: MaskId) -> Result<bool, EngineError> {
        if id.is_no_mask() {
            return Err(ValidationError::NoMaskImmutable.into());
        }
        if self.ctx.store.mask(id).is_none() {
            return Err(ValidationError::UnknownMask(id).into());
        }

        let paths = self.ctx.store.remove_rules_using_mask(id);
        resolver::refresh_template_links(&mut self.ctx.store);
        let mut success = true;
        for path in paths {
            success &= self.apply_rules_to_path(&path);
        }
        success &= self.reset_processes_using(id);
        self.ctx.store.remove_mask(id)?;
        self.publish();
        Ok(success)
    }

    pub fn set_match_whole_path(&mut self, enabled: bool) -> bool {
        if self.ctx.store.set_match_whole_path(enabled) {
            self.refresh_all_rules()
        } else {
            true
        }
    }

    pub fn set_clear_masks_on_close(&mut self, enabled: bool) {
        self.ctx.store.set_clear_masks_on_close(enabled);
    }

    /// Lifts the restriction on every process that has a mask.
    pub fn clear_all_masks(&mut self) -> bool {
        let success = self.reset_processes_using_any();
        self.publish();
        success
    }

    fn reset_processes_using_any(&mut self) -> bool {
        let pids: Vec<u32> = self
            .ctx
            .bindings
            .values()
            .filter(|b| !b.mask().is_no_mask())
            .map(ProcessBinding::pid)
            .collect();
        pids.into_iter()
            .fold(true, |ok, pid| self.apply_to_process(pid, MaskId::NO_MASK, false) && ok)
    }

    pub fn export_state(&self) -> AppStateStorage {
        AppStateStorage::from_store(&self.ctx.store)
    }
}
