use std::collections::BTreeMap;

use os_api::RawTopology;
use serde::{Deserialize, Serialize};

use crate::app::models::cpu_presets::get_preset_masks;
use crate::app::models::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Manufacturer {
    Intel,
    Amd,
    Other,
}

impl Manufacturer {
    pub fn from_model(model: &str) -> Self {
        let model = model.to_lowercase();
        if model.contains("amd") {
            Manufacturer::Amd
        } else if model.contains("intel") {
            Manufacturer::Intel
        } else {
            Manufacturer::Other
        }
    }
}

/// One logical processor in mask bit order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalProcessor {
    pub index: usize,
    /// Id the OS expects when restricting a process; `None` if the platform did not report one.
    pub platform_id: Option<u32>,
    pub core: usize,
    pub die: Option<usize>,
    pub efficiency_class: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Die {
    pub processors: Vec<usize>,
    pub l3_bytes: u64,
}

/// Immutable description of the processors this engine manages.
#[derive(Debug, Clone)]
pub struct CpuTopology {
    model: String,
    manufacturer: Manufacturer,
    processor_groups: usize,
    processors: Vec<LogicalProcessor>,
    names: Vec<String>,
    dies: Vec<Die>,
}

impl CpuTopology {
    pub const MAX_PROCESSORS: usize = 64;

    pub fn new(model: String, processor_groups: usize, processors: Vec<LogicalProcessor>, dies: Vec<Die>) -> Self {
        let manufacturer = Manufacturer::from_model(&model);
        let names = Self::processor_names_for(manufacturer, &processors);
        Self {
            model,
            manufacturer,
            processor_groups,
            processors,
            names,
            dies,
        }
    }

    /// A topology of `count` single-threaded cores on one die.
    pub fn uniform(model: &str, count: usize) -> Self {
        let processors = (0..count)
            .map(|index| LogicalProcessor {
                index,
                platform_id: Some(index as u32),
                core: index,
                die: None,
                efficiency_class: 0,
            })
            .collect();
        Self::new(model.to_string(), 1, processors, Vec::new())
    }

    pub fn from_raw(raw: RawTopology) -> Self {
        let processors: Vec<LogicalProcessor> = raw
            .processors
            .iter()
            .map(|p| LogicalProcessor {
                index: p.index,
                platform_id: Some(p.platform_id),
                core: p.core,
                die: p.die,
                efficiency_class: p.efficiency_class,
            })
            .collect();

        let mut by_die: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for p in &processors {
            if let Some(die) = p.die {
                by_die.entry(die).or_default().push(p.index);
            }
        }
        let dies = by_die
            .into_values()
            .map(|members| {
                // Caches entirely inside the die belong to it
                let l3_bytes = raw
                    .l3_caches
                    .iter()
                    .filter(|c| !c.processors.is_empty() && c.processors.iter().all(|i| members.contains(i)))
                    .map(|c| c.size_bytes)
                    .sum();
                Die {
                    processors: members,
                    l3_bytes,
                }
            })
            .collect();

        Self::new(raw.model, raw.processor_groups, processors, dies)
    }

    fn has_efficiency_classes(processors: &[LogicalProcessor]) -> bool {
        processors.iter().any(|p| p.efficiency_class >= 1)
    }

    /// `Core N`, prefixed with `P-`/`E-` on Intel hybrid parts and suffixed with ` Tn` on SMT cores.
    fn processor_names_for(manufacturer: Manufacturer, processors: &[LogicalProcessor]) -> Vec<String> {
        let hybrid = manufacturer == Manufacturer::Intel && Self::has_efficiency_classes(processors);
        processors
            .iter()
            .enumerate()
            .map(|(position, p)| {
                let prefix = match (hybrid, p.efficiency_class >= 1) {
                    (false, _) => "",
                    (true, true) => "P-",
                    (true, false) => "E-",
                };
                let siblings = processors.iter().filter(|o| o.core == p.core).count();
                let suffix = if siblings > 1 {
                    let thread = processors[..position].iter().filter(|o| o.core == p.core).count();
                    format!(" T{thread}")
                } else {
                    String::new()
                };
                format!("{prefix}Core {}{suffix}", p.core)
            })
            .collect()
    }

    pub fn ensure_supported(&self) -> Result<(), EngineError> {
        let processors = self.processor_count();
        if processors == 0 || processors > Self::MAX_PROCESSORS || self.processor_groups != 1 {
            return Err(EngineError::TopologyUnsupported {
                processors,
                groups: self.processor_groups,
            });
        }
        Ok(())
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn manufacturer(&self) -> Manufacturer {
        self.manufacturer
    }

    pub fn processor_count(&self) -> usize {
        self.processors.len()
    }

    pub fn processors(&self) -> &[LogicalProcessor] {
        &self.processors
    }

    pub fn processor_names(&self) -> &[String] {
        &self.names
    }

    pub fn dies(&self) -> &[Die] {
        &self.dies
    }

    pub fn is_intel_hybrid(&self) -> bool {
        self.manufacturer == Manufacturer::Intel && Self::has_efficiency_classes(&self.processors)
    }

    /// Platform ids for the selected bits, plus the indices that were selected but have no id.
    pub fn core_id_set(&self, bits: &[bool]) -> (Vec<u32>, Vec<usize>) {
        let mut ids = Vec::new();
        let mut missing = Vec::new();
        for (p, _) in self.processors.iter().zip(bits).filter(|(_, selected)| **selected) {
            match p.platform_id {
                Some(id) => ids.push(id),
                None => missing.push(p.index),
            }
        }
        (ids, missing)
    }

    fn bits_of(&self, selected: impl Fn(&LogicalProcessor) -> bool) -> Vec<bool> {
        self.processors.iter().map(selected).collect()
    }

    /// Masks offered on first run: P/E split, then one mask per die, then a known-model preset
    /// when neither applies.
    pub fn default_masks(&self) -> Vec<(String, Vec<bool>)> {
        let mut masks = Vec::new();

        if self.is_intel_hybrid() {
            masks.push(("P-Cores".to_string(), self.bits_of(|p| p.efficiency_class >= 1)));
            masks.push(("E-Cores".to_string(), self.bits_of(|p| p.efficiency_class == 0)));
        }

        if self.dies.len() >= 2 {
            let min_l3 = self.dies.iter().map(|d| d.l3_bytes).min().unwrap_or(0);
            let (cache_dies, other_dies): (Vec<&Die>, Vec<&Die>) =
                self.dies.iter().partition(|d| d.l3_bytes > min_l3 * 2);
            let other_label = if cache_dies.is_empty() { "CCD" } else { "Freq" };

            for (label, dies) in [("Cache", &cache_dies), (other_label, &other_dies)] {
                for (i, die) in dies.iter().enumerate() {
                    let name = if dies.len() >= 2 { format!("{label}{i}") } else { label.to_string() };
                    masks.push((name, self.bits_of(|p| die.processors.contains(&p.index))));
                }
            }
        }

        if masks.is_empty() {
            masks = get_preset_masks(&self.model, self.processor_count());
        }
        masks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use os_api::{RawCache, RawProcessor};

    fn raw_processor(index: usize, core: usize, die: usize, efficiency_class: u8) -> RawProcessor {
        RawProcessor {
            index,
            platform_id: index as u32,
            core,
            die: Some(die),
            efficiency_class,
        }
    }

    #[test]
    fn intel_hybrid_names_and_masks() {
        // Two SMT P-cores followed by two E-cores
        let raw = RawTopology {
            model: "13th Gen Intel(R) Core(TM) i5-13400".into(),
            processor_groups: 1,
            processors: vec![
                raw_processor(0, 0, 0, 1),
                raw_processor(1, 0, 0, 1),
                raw_processor(2, 1, 0, 1),
                raw_processor(3, 1, 0, 1),
                raw_processor(4, 2, 0, 0),
                raw_processor(5, 3, 0, 0),
            ],
            l3_caches: vec![],
        };
        let topo = CpuTopology::from_raw(raw);
        assert_eq!(topo.processor_names()[1], "P-Core 0 T1");
        assert_eq!(topo.processor_names()[4], "E-Core 2");

        let masks = topo.default_masks();
        assert_eq!(masks[0].0, "P-Cores");
        assert_eq!(masks[0].1, vec![true, true, true, true, false, false]);
        assert_eq!(masks[1].0, "E-Cores");
        assert_eq!(masks[1].1, vec![false, false, false, false, true, true]);
    }

    #[test]
    fn x3d_dies_split_into_cache_and_freq() {
        let processors = (0..4).map(|i| raw_processor(i, i, i / 2, 0)).collect();
        let raw = RawTopology {
            model: "AMD Ryzen 9 7950X3D 16-Core Processor".into(),
            processor_groups: 1,
            processors,
            l3_caches: vec![
                RawCache { size_bytes: 96 << 20, processors: vec![0, 1] },
                RawCache { size_bytes: 32 << 20, processors: vec![2, 3] },
            ],
        };
        let topo = CpuTopology::from_raw(raw);
        assert_eq!(topo.processor_names()[0], "Core 0");
        let masks = topo.default_masks();
        assert_eq!(masks.len(), 2);
        assert_eq!(masks[0], ("Cache".to_string(), vec![true, true, false, false]));
        assert_eq!(masks[1], ("Freq".to_string(), vec![false, false, true, true]));
    }

    #[test]
    fn equal_dies_are_numbered_ccds() {
        let processors = (0..4).map(|i| raw_processor(i, i, i / 2, 0)).collect();
        let raw = RawTopology {
            model: "AMD Ryzen 9 5950X".into(),
            processor_groups: 1,
            processors,
            l3_caches: vec![
                RawCache { size_bytes: 32 << 20, processors: vec![0, 1] },
                RawCache { size_bytes: 32 << 20, processors: vec![2, 3] },
            ],
        };
        let names: Vec<String> = CpuTopology::from_raw(raw).default_masks().into_iter().map(|m| m.0).collect();
        assert_eq!(names, vec!["CCD0", "CCD1"]);
    }

    #[test]
    fn unsupported_topologies() {
        assert!(CpuTopology::uniform("x", 8).ensure_supported().is_ok());
        assert!(CpuTopology::uniform("x", 0).ensure_supported().is_err());
        assert!(CpuTopology::uniform("x", 65).ensure_supported().is_err());

        let mut raw = RawTopology {
            model: "x".into(),
            processor_groups: 2,
            processors: vec![raw_processor(0, 0, 0, 0)],
            l3_caches: vec![],
        };
        assert!(matches!(
            CpuTopology::from_raw(raw.clone()).ensure_supported(),
            Err(EngineError::TopologyUnsupported { processors: 1, groups: 2 })
        ));
        raw.processor_groups = 1;
        assert!(CpuTopology::from_raw(raw).ensure_supported().is_ok());
    }

    #[test]
    fn core_id_set_reports_missing_ids() {
        let mut processors: Vec<LogicalProcessor> = CpuTopology::uniform("x", 4).processors().to_vec();
        processors[2].platform_id = None;
        let topo = CpuTopology::new("x".into(), 1, processors, Vec::new());
        let (ids, missing) = topo.core_id_set(&[true, false, true, true]);
        assert_eq!(ids, vec![0, 3]);
        assert_eq!(missing, vec![2]);
    }
}
