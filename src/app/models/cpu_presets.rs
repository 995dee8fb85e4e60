use once_cell::sync::Lazy;
use serde::Deserialize;

#[derive(Deserialize)]
struct SchemesRoot {
    schemes: Vec<SchemeConfig>,
}

#[derive(Deserialize)]
struct SchemeConfig {
    name: String,
    #[serde(rename = "match")]
    match_config: MatchConfig,
    layout: Vec<LayoutEntry>,
}

#[derive(Deserialize)]
struct MatchConfig {
    keywords: Vec<String>,
    total_threads: Option<usize>,
}

#[derive(Deserialize)]
struct LayoutEntry {
    #[serde(default = "default_threads_per_core")]
    threads_per_core: usize,

    // Single mask
    mask_name: Option<String>,
    cores: Option<usize>,

    // Repeated masks, `{i}` in the pattern is the repetition number
    #[serde(default = "default_repeat")]
    repeat: usize,
    mask_name_pattern: Option<String>,
    cores_per_group: Option<usize>,
}

fn default_threads_per_core() -> usize {
    1
}
fn default_repeat() -> usize {
    1
}

const PRESETS_JSON: &str = include_str!("../../../assets/cpu_presets.json");

static PRESETS: Lazy<SchemesRoot> = Lazy::new(|| {
    serde_json::from_str(PRESETS_JSON).expect("Failed to parse embedded cpu_presets.json")
});

/// Default masks for CPUs whose die layout cannot be read from the OS.
///
/// Layout entries consume logical processors in order, `threads_per_core` at a time.
/// Returns no masks when no scheme matches the model and thread count.
pub fn get_preset_masks(model: &str, total_threads: usize) -> Vec<(String, Vec<bool>)> {
    let model_lower = model.to_lowercase();
    let model_trimmed = model_lower.trim();
    let root = &*PRESETS;

    let Some(scheme) = root.schemes.iter().find(|scheme| {
        let threads_match = scheme
            .match_config
            .total_threads
            .is_none_or(|t| t == total_threads);
        let keywords_match = scheme
            .match_config
            .keywords
            .iter()
            .all(|kw| model_trimmed.contains(kw.to_lowercase().trim()));
        threads_match && keywords_match
    }) else {
        return Vec::new();
    };
    tracing::debug!(scheme = %scheme.name, "using cpu preset");

    let mut masks = Vec::new();
    let mut current_thread_idx = 0;
    for entry in &scheme.layout {
        let cores_in_group = entry.cores.or(entry.cores_per_group).unwrap_or(0);
        for r in 0..entry.repeat {
            let mask_name = match &entry.mask_name_pattern {
                Some(pattern) => pattern.replace("{i}", &r.to_string()),
                None => entry.mask_name.clone().unwrap_or_default(),
            };

            let mut bits = vec![false; total_threads];
            for _ in 0..cores_in_group * entry.threads_per_core {
                if let Some(bit) = bits.get_mut(current_thread_idx) {
                    *bit = true;
                }
                current_thread_idx += 1;
            }
            if !mask_name.is_empty() && bits.contains(&true) {
                masks.push((mask_name, bits));
            }
        }
    }
    masks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_parsing() {
        assert!(!PRESETS.schemes.is_empty(), "Presets should not be empty");
        assert!(PRESETS.schemes.iter().all(|s| !s.layout.is_empty()));
    }

    #[test]
    fn test_intel_i9_matching() {
        let model = "13th Gen Intel(R) Core(TM) i9-13900K";
        let masks = get_preset_masks(model, 32);
        assert_eq!(masks.len(), 2, "Should match i9-13900K");
    }

    #[test]
    fn test_intel_i5_14600_matching() {
        let model = "Intel(R) Core(TM) i5-14600KF";
        let masks = get_preset_masks(model, 20);
        assert_eq!(masks.len(), 2, "Should match i5-14600KF");
        assert_eq!(masks[0].0, "P-Cores");
        assert_eq!(masks[1].0, "E-Cores");
        // 6 P-cores * 2 threads = 12 threads in first mask
        assert_eq!(masks[0].1.iter().filter(|b| **b).count(), 12);
        // 8 E-cores * 1 thread = 8 threads in second mask
        assert_eq!(masks[1].1.iter().filter(|b| **b).count(), 8);
        assert!(masks[1].1[12..].iter().all(|b| *b));
    }

    #[test]
    fn test_amd_dual_ccd_matching() {
        let masks = get_preset_masks("AMD Ryzen 9 7950X3D 16-Core Processor", 32);
        let names: Vec<&str> = masks.iter().map(|m| m.0.as_str()).collect();
        assert_eq!(names, vec!["Cache", "Freq"]);
        assert!(masks[0].1[..16].iter().all(|b| *b));
    }

    #[test]
    fn test_thread_count_mismatch() {
        assert!(get_preset_masks("Intel(R) Core(TM) i5-14600KF", 16).is_empty());
        assert!(get_preset_masks("Unknown CPU", 8).is_empty());
    }
}
