//! Which mask a program path gets, and how rules change when the user picks one.
//!
//! Precedence: an explicit program rule, then the first matching rule template, then the no mask.

use crate::app::models::{MaskId, ProgramRule, RuleStore, TemplateId, ValidationError};

pub fn resolve_effective_mask(store: &RuleStore, path: &str) -> MaskId {
    if let Some(rule) = store.find_program_rule(path) {
        return rule.mask();
    }
    store
        .find_matching_template(path)
        .map(|t| t.mask())
        .unwrap_or(MaskId::NO_MASK)
}

/// Returns the rule for `path`, materializing one from the first matching template if needed.
/// `None` when neither exists.
pub fn get_or_create_program_rule<'a>(store: &'a mut RuleStore, path: &str) -> Option<&'a ProgramRule> {
    if path.is_empty() {
        return None;
    }
    if store.find_program_rule(path).is_none() {
        let (template, mask) = store
            .find_matching_template(path)
            .map(|t| (t.id(), t.mask()))?;
        store.insert_program_rule(path, mask, Some(template)).ok()?;
    }
    store.find_program_rule(path)
}

/// Recomputes which template each program rule matches, after templates were added, removed,
/// reordered or edited.
pub fn refresh_template_links(store: &mut RuleStore) {
    let links: Vec<Option<TemplateId>> = store
        .program_rules()
        .iter()
        .map(|r| store.find_matching_template(r.path()).map(|t| t.id()))
        .collect();
    for (rule, link) in store.program_rules_mut().iter_mut().zip(links) {
        rule.set_matching_template(link);
    }
}

/// What a mask choice for one path does to the program rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleChange {
    Unchanged,
    Create { path: String, mask: MaskId },
    Update { path: String, mask: MaskId },
    Remove { path: String },
}

/// Choosing the no mask where no template (or a no mask template) covers the path needs no rule
/// at all, so an existing rule is removed instead of being set to the no mask.
pub fn plan_rule_change(store: &RuleStore, path: &str, mask: MaskId) -> RuleChange {
    if path.is_empty() {
        return RuleChange::Unchanged;
    }
    let existing = store.find_program_rule(path);
    let template_mask = store.find_matching_template(path).map(|t| t.mask());

    if mask.is_no_mask() && template_mask.is_none_or(MaskId::is_no_mask) {
        return match existing {
            Some(rule) => RuleChange::Remove {
                path: rule.path().to_string(),
            },
            None => RuleChange::Unchanged,
        };
    }

    match existing {
        Some(rule) if rule.mask() == mask => RuleChange::Unchanged,
        Some(rule) => RuleChange::Update {
            path: rule.path().to_string(),
            mask,
        },
        None => RuleChange::Create {
            path: path.to_string(),
            mask,
        },
    }
}

pub fn apply_rule_change(store: &mut RuleStore, change: &RuleChange) -> Result<(), ValidationError> {
    match change {
        RuleChange::Unchanged => Ok(()),
        RuleChange::Create { path, mask } | RuleChange::Update { path, mask } => {
            store.set_program_rule_mask(path, *mask)
        }
        RuleChange::Remove { path } => store
            .remove_program_rule(path)
            .map(|_| ())
            .ok_or_else(|| ValidationError::UnknownProgramRule(path.clone())),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::app::models::PathRules;

    fn setup() -> (RuleStore, MaskId, MaskId) {
        let mut store = RuleStore::new(4, PathRules::WINDOWS);
        let a = store.create_mask("A", vec![true, true, false, false], BTreeSet::new()).unwrap();
        let b = store.create_mask("B", vec![false, false, true, true], BTreeSet::new()).unwrap();
        (store, a, b)
    }

    #[test]
    fn program_rule_beats_template() {
        let (mut store, a, b) = setup();
        store.add_rule_template("**", a).unwrap();
        assert_eq!(resolve_effective_mask(&store, "C:/x.exe"), a);

        store.set_program_rule_mask("C:/x.exe", b).unwrap();
        assert_eq!(resolve_effective_mask(&store, "C:/x.exe"), b);
        assert_eq!(resolve_effective_mask(&store, "C:/y.exe"), a);
        assert_eq!(resolve_effective_mask(&store, ""), MaskId::NO_MASK);
    }

    #[test]
    fn template_precedence_is_by_order() {
        let (mut store, a, b) = setup();
        store.add_rule_template("*/steam/*.exe", a).unwrap();
        store.add_rule_template("**", b).unwrap();
        assert_eq!(resolve_effective_mask(&store, "D:/steam/game.exe"), a);
        assert_eq!(resolve_effective_mask(&store, "D:/other/game.exe"), b);
    }

    #[test]
    fn rules_are_materialized_from_templates() {
        let (mut store, a, _) = setup();
        let t = store.add_rule_template("C:/Games/**", a).unwrap();

        let rule = get_or_create_program_rule(&mut store, "C:/Games/x/game.exe").unwrap();
        assert_eq!(rule.mask(), a);
        assert_eq!(rule.matching_template(), Some(t));
        assert_eq!(store.program_rules().len(), 1);

        assert!(get_or_create_program_rule(&mut store, "D:/elsewhere.exe").is_none());
        assert_eq!(store.program_rules().len(), 1);
    }

    #[test]
    fn template_links_follow_template_edits() {
        let (mut store, a, _) = setup();
        let t = store.add_rule_template("C:/Games/**", a).unwrap();
        get_or_create_program_rule(&mut store, "C:/Games/game.exe");

        store.set_rule_template_glob(t, "D:/**").unwrap();
        refresh_template_links(&mut store);
        assert_eq!(store.program_rules()[0].matching_template(), None);
        // The rule keeps its mask
        assert_eq!(store.program_rules()[0].mask(), a);
    }

    #[test]
    fn no_mask_choice_removes_unneeded_rules() {
        let (mut store, a, _) = setup();
        store.set_program_rule_mask("C:/x.exe", a).unwrap();

        let change = plan_rule_change(&store, "C:/x.exe", MaskId::NO_MASK);
        assert_eq!(change, RuleChange::Remove { path: "C:/x.exe".into() });
        apply_rule_change(&mut store, &change).unwrap();
        assert!(store.program_rules().is_empty());

        assert_eq!(plan_rule_change(&store, "C:/x.exe", MaskId::NO_MASK), RuleChange::Unchanged);
    }

    #[test]
    fn no_mask_override_of_a_template_is_kept() {
        let (mut store, a, _) = setup();
        store.add_rule_template("**", a).unwrap();
        let change = plan_rule_change(&store, "C:/x.exe", MaskId::NO_MASK);
        assert_eq!(
            change,
            RuleChange::Create {
                path: "C:/x.exe".into(),
                mask: MaskId::NO_MASK
            }
        );
        apply_rule_change(&mut store, &change).unwrap();
        assert_eq!(resolve_effective_mask(&store, "C:/x.exe"), MaskId::NO_MASK);
    }
}
