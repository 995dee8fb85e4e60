mod common;

use std::collections::BTreeSet;

use common::{bits, coordinator};
use cpu_affinity_rules::app::models::{
    AppStateStorage, CpuTopology, EngineError, KeyCode, LogManager, MaskId, PathRules, ValidationError,
};

#[test]
fn hotkey_mask_follows_the_process_until_it_exits() {
    let (mut c, applier, _) = coordinator(8);
    let half = c
        .create_mask("Half", bits(8, &[0, 1, 2, 3]), BTreeSet::from([KeyCode(17), KeyCode(49)]))
        .unwrap();

    c.on_process_created(10, "game".into(), "/games/game".into());
    assert!(applier.calls().is_empty());

    assert_eq!(c.apply_hotkey(half, Some(10)), Some(true));
    assert_eq!(applier.calls(), vec![(10, Some(vec![0, 1, 2, 3]))]);
    assert_eq!(c.store().find_program_rule("/games/game").unwrap().mask(), half);

    assert!(c.on_process_exited(10));
    c.update_mask_bits(half, bits(8, &[4, 5, 6, 7])).unwrap();
    assert_eq!(applier.calls().len(), 1);

    // The rule outlives the process and applies to its next start
    c.on_process_created(11, "game".into(), "/games/game".into());
    assert_eq!(applier.calls_for(11), vec![Some(vec![4, 5, 6, 7])]);
}

#[test]
fn hotkey_without_tracked_foreground_does_nothing() {
    let (mut c, applier, _) = coordinator(4);
    let half = c.create_mask("Half", bits(4, &[0, 1]), BTreeSet::new()).unwrap();
    assert_eq!(c.apply_hotkey(half, None), None);
    assert_eq!(c.apply_hotkey(half, Some(99)), None);
    assert!(applier.calls().is_empty());
}

#[test]
fn cascade_delete_clears_each_process_once() {
    let (mut c, applier, lines) = coordinator(8);
    let half = c.create_mask("Half", bits(8, &[0, 1, 2, 3]), BTreeSet::new()).unwrap();
    c.add_rule_template("/g/**", half).unwrap();
    c.on_process_created(1, "a".into(), "/bin/a".into());
    c.on_process_created(2, "a".into(), "/bin/a".into());
    c.on_process_created(3, "game".into(), "/g/game".into());
    c.set_process_mask(1, half).unwrap();
    assert_eq!(c.store().program_rules().len(), 2);

    assert!(matches!(c.remove_mask(half), Err(EngineError::InUse(_))));
    assert_eq!(c.remove_mask_cascade(half).unwrap(), true);

    for pid in [1, 2, 3] {
        assert_eq!(applier.calls_for(pid), vec![Some(vec![0, 1, 2, 3]), None]);
    }
    assert!(c.store().mask(half).is_none());
    assert!(c.store().program_rules().is_empty());
    assert!(c.store().rule_templates().is_empty());
    assert!(lines.lines().contains(&"Cleared mask of 'a'".to_string()));
    assert!(lines.lines().contains(&"Cleared mask of 'game'".to_string()));
}

#[test]
fn no_mask_cannot_be_removed() {
    let (mut c, _, _) = coordinator(4);
    assert!(matches!(
        c.remove_mask_cascade(MaskId::NO_MASK),
        Err(EngineError::Validation(ValidationError::NoMaskImmutable))
    ));
}

#[test]
fn first_matching_template_wins() {
    let (mut c, applier, _) = coordinator(4);
    let games = c.create_mask("Games", bits(4, &[0, 1]), BTreeSet::new()).unwrap();
    let rest = c.create_mask("Rest", bits(4, &[2, 3]), BTreeSet::new()).unwrap();
    c.add_rule_template("/games/**", games).unwrap();
    let catch_all = c.add_rule_template("/**", rest).unwrap();

    c.on_process_created(1, "x".into(), "/games/x".into());
    c.on_process_created(2, "y".into(), "/usr/bin/y".into());
    assert_eq!(applier.calls_for(1), vec![Some(vec![0, 1])]);
    assert_eq!(applier.calls_for(2), vec![Some(vec![2, 3])]);

    c.move_rule_template(catch_all, 0).unwrap();
    c.on_process_created(3, "z".into(), "/games/z".into());
    assert_eq!(applier.calls_for(3), vec![Some(vec![2, 3])]);
    // Already materialized rules keep their mask
    assert_eq!(applier.calls_for(1), vec![Some(vec![0, 1])]);
}

#[test]
fn explicit_rule_beats_template() {
    let (mut c, applier, _) = coordinator(4);
    let games = c.create_mask("Games", bits(4, &[0, 1]), BTreeSet::new()).unwrap();
    let solo = c.create_mask("Solo", bits(4, &[3]), BTreeSet::new()).unwrap();
    c.add_rule_template("/games/**", games).unwrap();

    c.on_process_created(1, "x".into(), "/games/x".into());
    c.set_process_mask(1, solo).unwrap();
    assert_eq!(applier.calls_for(1), vec![Some(vec![0, 1]), Some(vec![3])]);

    // Reapplying the template discards the deviation
    c.reapply_rule_template(c.store().rule_templates()[0].id()).unwrap();
    assert_eq!(applier.calls_for(1).last(), Some(&Some(vec![0, 1])));
}

#[test]
fn applying_the_same_mask_twice_is_a_no_op() {
    let (mut c, applier, _) = coordinator(4);
    let half = c.create_mask("Half", bits(4, &[0, 1]), BTreeSet::new()).unwrap();
    c.on_process_created(1, "a".into(), "/bin/a".into());

    c.set_process_mask(1, half).unwrap();
    c.set_process_mask(1, half).unwrap();
    c.refresh_all_rules();
    assert_eq!(applier.calls().len(), 1);
}

#[test]
fn unanchored_templates_are_rejected() {
    let (mut c, _, _) = coordinator(4);
    let half = c.create_mask("Half", bits(4, &[0, 1]), BTreeSet::new()).unwrap();
    assert!(matches!(
        c.add_rule_template("games/*.exe", half),
        Err(ValidationError::InvalidGlob { .. })
    ));
    assert!(c.store().rule_templates().is_empty());
}

#[test]
fn state_survives_a_save_and_load() {
    let (mut c, _, _) = coordinator(4);
    let half = c
        .create_mask("Half", bits(4, &[0, 1]), BTreeSet::from([KeyCode(112)]))
        .unwrap();
    c.add_rule_template("/games/**", half).unwrap();
    c.on_process_created(1, "a".into(), "/bin/a".into());
    c.set_process_mask(1, half).unwrap();
    c.set_clear_masks_on_close(true);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let exported = c.export_state();
    exported.save_to_path(&path).unwrap();

    let log = LogManager::new();
    let loaded = AppStateStorage::load_or_initialize(&path, &CpuTopology::uniform("Test CPU", 4), PathRules::POSIX, &log);
    assert!(!loaded.needs_save);
    assert_eq!(AppStateStorage::from_store(&loaded.store), exported);
    assert!(loaded.store.settings().clear_masks_on_close);
    assert_eq!(
        loaded.store.find_program_rule("/bin/a").map(|r| loaded.store.mask(r.mask()).unwrap().name()),
        Some("Half")
    );
}
