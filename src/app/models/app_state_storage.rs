use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::app::models::meta::{STATE_FILE_NAME, STATE_PATH_ENV};
use crate::app::models::resolver::refresh_template_links;
use crate::app::models::{
    CpuTopology, EngineSettings, KeyCode, LogSink, MaskId, PathRules, RuleStore, StorageError,
};

/// Current version of the application state schema
pub const CURRENT_APP_STATE_VERSION: u32 = 2;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MaskRecord {
    pub name: String,
    pub bits: Vec<bool>,
    #[serde(default)]
    pub hotkey: Vec<KeyCode>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RuleTemplateRecord {
    pub glob: String,
    /// Empty for the no mask.
    pub mask_name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ProgramRuleRecord {
    pub path: String,
    /// Empty for the no mask.
    pub mask_name: String,
}

/// Storage for persistent application state that can be serialized to and deserialized from JSON.
///
/// Masks are referenced by name. Live processes and template links are not stored; they are
/// rebuilt after loading.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AppStateStorage {
    /// Version of the application state schema
    /// Used for migrations between different versions
    #[serde(default = "legacy_version")]
    pub version: u32,
    #[serde(default)]
    pub no_mask_hotkey: Vec<KeyCode>,
    /// User masks in display order, without the no mask
    #[serde(default)]
    pub masks: Vec<MaskRecord>,
    /// Rule templates in priority order
    #[serde(default)]
    pub rule_templates: Vec<RuleTemplateRecord>,
    #[serde(default)]
    pub program_rules: Vec<ProgramRuleRecord>,
    #[serde(default)]
    pub settings: EngineSettings,
}

fn legacy_version() -> u32 {
    1
}

/// Result of reading the state file.
#[derive(Debug)]
pub enum StateFile {
    Missing,
    Loaded(AppStateStorage),
    Corrupt(String),
}

/// A store ready for the engine, and whether it differs from what is on disk.
#[derive(Debug)]
pub struct LoadedState {
    pub store: RuleStore,
    pub needs_save: bool,
}

impl AppStateStorage {
    /// State for a first run: the masks that suit this CPU and nothing else.
    pub fn defaults(topology: &CpuTopology) -> Self {
        Self {
            version: CURRENT_APP_STATE_VERSION,
            no_mask_hotkey: Vec::new(),
            masks: topology
                .default_masks()
                .into_iter()
                .map(|(name, bits)| MaskRecord {
                    name,
                    bits,
                    hotkey: Vec::new(),
                })
                .collect(),
            rule_templates: Vec::new(),
            program_rules: Vec::new(),
            settings: EngineSettings::default(),
        }
    }

    pub fn from_store(store: &RuleStore) -> Self {
        let mask_name = |id: MaskId| -> String {
            store
                .mask(id)
                .map(|m| m.display_name().to_string())
                .unwrap_or_default()
        };
        Self {
            version: CURRENT_APP_STATE_VERSION,
            no_mask_hotkey: store.no_mask().hotkey().iter().copied().collect(),
            masks: store
                .masks()
                .iter()
                .filter(|m| !m.is_no_mask())
                .map(|m| MaskRecord {
                    name: m.name().to_string(),
                    bits: m.bits().to_vec(),
                    hotkey: m.hotkey().iter().copied().collect(),
                })
                .collect(),
            rule_templates: store
                .rule_templates()
                .iter()
                .map(|t| RuleTemplateRecord {
                    glob: t.glob().as_str().to_string(),
                    mask_name: mask_name(t.mask()),
                })
                .collect(),
            program_rules: store
                .program_rules()
                .iter()
                .map(|r| ProgramRuleRecord {
                    path: r.path().to_string(),
                    mask_name: mask_name(r.mask()),
                })
                .collect(),
            settings: store.settings(),
        }
    }

    /// `state.json` next to the executable, unless overridden by the environment.
    pub fn state_path() -> PathBuf {
        if let Some(path) = std::env::var_os(STATE_PATH_ENV).filter(|p| !p.is_empty()) {
            return PathBuf::from(path);
        }
        std::env::current_exe()
            .map(|mut p| {
                p.set_file_name(STATE_FILE_NAME);
                p
            })
            .unwrap_or_else(|_| STATE_FILE_NAME.into())
    }

    pub fn read(path: &Path) -> StateFile {
        match fs::read_to_string(path) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StateFile::Missing,
            Err(e) => StateFile::Corrupt(e.to_string()),
            Ok(data) => match serde_json::from_str::<AppStateStorage>(&data) {
                Ok(state) => StateFile::Loaded(state),
                Err(e) => StateFile::Corrupt(e.to_string()),
            },
        }
    }

    /// Writes to a sibling file first and renames it over the old state, so a crash mid-write
    /// leaves the previous state intact.
    pub fn save_to_path(&self, path: &Path) -> Result<(), StorageError> {
        let json = serde_json::to_string_pretty(self)?;
        let temp = Self::sibling(path, "_new");
        fs::write(&temp, json)?;
        fs::rename(&temp, path)?;
        Ok(())
    }

    fn sibling(path: &Path, suffix: &str) -> PathBuf {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "state".to_string());
        path.with_file_name(format!("{stem}{suffix}.json"))
    }

    /// Copies the state file to the first free `<stem>_backup<N>.json`.
    pub fn backup(path: &Path) -> Result<PathBuf, StorageError> {
        let mut i = 0;
        loop {
            let candidate = Self::sibling(path, &format!("_backup{i}"));
            if !candidate.exists() {
                fs::copy(path, &candidate)?;
                return Ok(candidate);
            }
            i += 1;
        }
    }

    /// Brings an older state up to the current version. Returns whether anything changed.
    pub fn migrate(&mut self, topology: &CpuTopology) -> bool {
        if self.version >= CURRENT_APP_STATE_VERSION {
            return false;
        }
        // Version 1 predates default masks for hybrid and multi-die CPUs
        if self.version < 2 {
            for (name, bits) in topology.default_masks() {
                if !self.masks.iter().any(|m| m.name == name) {
                    self.masks.push(MaskRecord {
                        name,
                        bits,
                        hotkey: Vec::new(),
                    });
                }
            }
        }
        self.version = CURRENT_APP_STATE_VERSION;
        true
    }

    /// Builds a store, dropping whatever does not validate. Returns one warning per dropped item.
    pub fn build_store(&self, topology: &CpuTopology, path_rules: PathRules) -> (RuleStore, Vec<String>) {
        let mut store = RuleStore::new(topology.processor_count(), path_rules);
        let mut warnings = Vec::new();

        let no_mask_hotkey: BTreeSet<KeyCode> = self.no_mask_hotkey.iter().copied().collect();
        if let Err(e) = store.set_mask_hotkey(MaskId::NO_MASK, no_mask_hotkey) {
            warnings.push(format!("Dropped the no mask hotkey: {e}"));
        }

        for record in &self.masks {
            let hotkey = record.hotkey.iter().copied().collect();
            if let Err(e) = store.create_mask(&record.name, record.bits.clone(), hotkey) {
                warnings.push(format!("Dropped mask '{}': {e}", record.name));
            }
        }

        for record in &self.rule_templates {
            let Some(mask) = store.mask_by_name(&record.mask_name).map(|m| m.id()) else {
                warnings.push(format!(
                    "Dropped rule template '{}': mask '{}' does not exist",
                    record.glob, record.mask_name
                ));
                continue;
            };
            if let Err(e) = store.add_rule_template(&record.glob, mask) {
                warnings.push(format!("Dropped rule template '{}': {e}", record.glob));
            }
        }

        for record in &self.program_rules {
            let Some(mask) = store.mask_by_name(&record.mask_name).map(|m| m.id()) else {
                warnings.push(format!(
                    "Dropped program rule '{}': mask '{}' does not exist",
                    record.path, record.mask_name
                ));
                continue;
            };
            if store.find_program_rule(&record.path).is_some() {
                warnings.push(format!("Dropped duplicate program rule '{}'", record.path));
                continue;
            }
            if let Err(e) = store.set_program_rule_mask(&record.path, mask) {
                warnings.push(format!("Dropped program rule '{}': {e}", record.path));
            }
        }

        // Settings last, so file-name matching cannot merge rules stored by full path
        store.set_match_whole_path(self.settings.match_whole_path);
        store.set_clear_masks_on_close(self.settings.clear_masks_on_close);
        refresh_template_links(&mut store);

        (store, warnings)
    }

    /// Loads the state file, falling back to defaults.
    ///
    /// A state file that cannot be parsed, or that had entries dropped, is backed up before it
    /// gets overwritten.
    pub fn load_or_initialize(
        path: &Path,
        topology: &CpuTopology,
        path_rules: PathRules,
        log: &dyn LogSink,
    ) -> LoadedState {
        let backup = |reason: &str| match Self::backup(path) {
            Ok(to) => log.write(&format!("WARNING: {reason}, backed up '{}' to '{}'", path.display(), to.display())),
            Err(e) => log.write(&format!("ERROR: {reason}, and backing up '{}' failed: {e}", path.display())),
        };

        match Self::read(path) {
            StateFile::Missing => {
                let (store, _) = Self::defaults(topology).build_store(topology, path_rules);
                log.write(&format!("Created new state with {} default mask(s)", store.masks().len() - 1));
                LoadedState { store, needs_save: true }
            }
            StateFile::Corrupt(problem) => {
                log.write(&format!("ERROR: Could not read state '{}': {problem}", path.display()));
                backup("State file is unreadable");
                let (store, _) = Self::defaults(topology).build_store(topology, path_rules);
                LoadedState { store, needs_save: true }
            }
            StateFile::Loaded(mut state) => {
                let migrated = state.migrate(topology);
                if migrated {
                    log.write(&format!("Migrated state to version {CURRENT_APP_STATE_VERSION}"));
                }
                let (store, warnings) = state.build_store(topology, path_rules);
                for warning in &warnings {
                    log.write(&format!("WARNING: {warning}"));
                }
                if !warnings.is_empty() {
                    backup("State file had invalid entries");
                }
                LoadedState {
                    store,
                    needs_save: migrated || !warnings.is_empty(),
                }
            }
        }
    }
}
