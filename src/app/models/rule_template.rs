use serde::{Deserialize, Serialize};

use crate::app::models::{GlobPattern, MaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TemplateId(pub(crate) u64);

/// A glob over program paths with the mask newly seen matching programs start with.
/// Templates are ordered; the first match wins.
#[derive(Debug, Clone)]
pub struct RuleTemplate {
    id: TemplateId,
    glob: GlobPattern,
    mask: MaskId,
}

impl RuleTemplate {
    pub(crate) fn new(id: TemplateId, glob: GlobPattern, mask: MaskId) -> Self {
        Self { id, glob, mask }
    }

    pub fn id(&self) -> TemplateId {
        self.id
    }

    pub fn glob(&self) -> &GlobPattern {
        &self.glob
    }

    pub fn mask(&self) -> MaskId {
        self.mask
    }

    pub fn matches(&self, path: &str) -> bool {
        self.glob.matches(path)
    }

    pub(crate) fn set_glob(&mut self, glob: GlobPattern) {
        self.glob = glob;
    }

    pub(crate) fn set_mask(&mut self, mask: MaskId) {
        self.mask = mask;
    }
}
