use std::collections::BTreeMap;

use crate::app::models::{CpuTopology, EngineError, ProcessBinding, RuleStore, ValidationError};

/// Everything the engine knows: the CPU, the rules and the live processes.
#[derive(Debug)]
pub struct EngineContext {
    pub(crate) topology: CpuTopology,
    pub(crate) store: RuleStore,
    pub(crate) bindings: BTreeMap<u32, ProcessBinding>,
}

impl EngineContext {
    pub fn new(topology: CpuTopology, store: RuleStore) -> Result<Self, EngineError> {
        topology.ensure_supported()?;
        if store.processor_count() != topology.processor_count() {
            return Err(ValidationError::BitLengthMismatch {
                name: "rule store".to_string(),
                expected: topology.processor_count(),
                actual: store.processor_count(),
            }
            .into());
        }
        Ok(Self {
            topology,
            store,
            bindings: BTreeMap::new(),
        })
    }

    pub fn topology(&self) -> &CpuTopology {
        &self.topology
    }

    pub fn store(&self) -> &RuleStore {
        &self.store
    }

    pub fn bindings(&self) -> impl Iterator<Item = &ProcessBinding> {
        self.bindings.values()
    }

    pub fn binding(&self, pid: u32) -> Option<&ProcessBinding> {
        self.bindings.get(&pid)
    }
}
