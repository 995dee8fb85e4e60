use std::collections::BTreeSet;

use crate::app::models::{KeyCode, MaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: KeyCode,
    pub down: bool,
}

impl KeyEvent {
    pub fn down(key: u16) -> Self {
        Self {
            key: KeyCode(key),
            down: true,
        }
    }

    pub fn up(key: u16) -> Self {
        Self {
            key: KeyCode(key),
            down: false,
        }
    }
}

/// A key combination and the mask it selects.
#[derive(Debug, Clone, Copy)]
pub struct HotkeyBinding<'a> {
    pub mask: MaskId,
    pub keys: &'a BTreeSet<KeyCode>,
    pub allow_repeats: bool,
}

/// Tracks pressed keys and reports which combinations just became exactly pressed.
#[derive(Debug)]
pub struct HotkeyMatcher {
    pressed: BTreeSet<KeyCode>,
    enabled: bool,
}

impl Default for HotkeyMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HotkeyMatcher {
    pub fn new() -> Self {
        Self {
            pressed: BTreeSet::new(),
            enabled: true,
        }
    }

    /// Disabled while a hotkey is being recorded, so recording does not trigger masks.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn pressed(&self) -> &BTreeSet<KeyCode> {
        &self.pressed
    }

    /// Feeds one key event and returns the masks whose combination fired.
    ///
    /// The pressed set is tracked even while disabled. A key-down for a key that is already
    /// held is an auto-repeat and only fires bindings that allow repeats.
    pub fn on_key<'a>(
        &mut self,
        event: KeyEvent,
        bindings: impl IntoIterator<Item = HotkeyBinding<'a>>,
    ) -> Vec<MaskId> {
        if !event.down {
            self.pressed.remove(&event.key);
            return Vec::new();
        }

        let is_repeat = !self.pressed.insert(event.key);
        if !self.enabled {
            return Vec::new();
        }

        bindings
            .into_iter()
            .filter(|b| !b.keys.is_empty() && *b.keys == self.pressed)
            .filter(|b| !is_repeat || b.allow_repeats)
            .map(|b| b.mask)
            .collect()
    }
}
