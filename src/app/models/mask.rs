use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Name the built-in "no mask" entry is known by. User masks may not take it.
pub const NO_MASK_NAME: &str = "<no mask>";

/// Identity of a mask. Two masks with identical bits are still different masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MaskId(pub(crate) u64);

impl MaskId {
    pub const NO_MASK: MaskId = MaskId(0);

    pub fn is_no_mask(self) -> bool {
        self == Self::NO_MASK
    }
}

/// Platform virtual key code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyCode(pub u16);

/// A named selection of logical processors.
///
/// `bits[i]` selects logical processor `i` in topology order. The no mask sentinel has no
/// bits at all and means "no restriction".
#[derive(Debug, Clone)]
pub struct LogicalProcessorMask {
    id: MaskId,
    name: String,
    bits: Vec<bool>,
    hotkey: BTreeSet<KeyCode>,
}

impl LogicalProcessorMask {
    pub(crate) fn no_mask(hotkey: BTreeSet<KeyCode>) -> Self {
        Self {
            id: MaskId::NO_MASK,
            name: NO_MASK_NAME.to_string(),
            bits: Vec::new(),
            hotkey,
        }
    }

    pub(crate) fn new(id: MaskId, name: String, bits: Vec<bool>, hotkey: BTreeSet<KeyCode>) -> Self {
        Self {
            id,
            name,
            bits,
            hotkey,
        }
    }

    pub fn id(&self) -> MaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name to show next to a process; empty for the no mask.
    pub fn display_name(&self) -> &str {
        if self.is_no_mask() { "" } else { &self.name }
    }

    pub fn bits(&self) -> &[bool] {
        &self.bits
    }

    pub fn hotkey(&self) -> &BTreeSet<KeyCode> {
        &self.hotkey
    }

    pub fn is_no_mask(&self) -> bool {
        self.id.is_no_mask()
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }

    pub(crate) fn set_bits(&mut self, bits: Vec<bool>) {
        self.bits = bits;
    }

    pub(crate) fn set_hotkey(&mut self, hotkey: BTreeSet<KeyCode>) {
        self.hotkey = hotkey;
    }
}

impl PartialEq for LogicalProcessorMask {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for LogicalProcessorMask {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_by_identity() {
        let a = LogicalProcessorMask::new(MaskId(1), "Half".into(), vec![true, false], BTreeSet::new());
        let b = LogicalProcessorMask::new(MaskId(2), "Half".into(), vec![true, false], BTreeSet::new());
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn no_mask_has_empty_display_name() {
        let none = LogicalProcessorMask::no_mask(BTreeSet::new());
        assert!(none.is_no_mask());
        assert_eq!(none.display_name(), "");
        assert_eq!(none.name(), NO_MASK_NAME);
    }
}
