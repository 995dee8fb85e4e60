mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use common::{bits, coordinator, Foreground};
use cpu_affinity_rules::app::models::{AppStateStorage, KeyCode, KeyEvent, StateFile, StateSaver};
use cpu_affinity_rules::app::{EngineEvent, EngineLoop};
use os_api::ProcessEntry;

fn entry(pid: u32, path: &str) -> ProcessEntry {
    ProcessEntry {
        pid,
        name: path.rsplit('/').next().unwrap_or(path).to_string(),
        image_path: path.to_string(),
    }
}

#[tokio::test]
async fn hotkey_applies_to_foreground_and_is_saved() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let (c, applier, _) = coordinator(8);
    let foreground = Arc::new(Foreground::default());
    let (engine, handle) = EngineLoop::new(c, foreground.clone(), Some(StateSaver::spawn(path.clone())), true);
    let task = tokio::spawn(engine.run());

    let half = handle
        .create_mask("Half".into(), bits(8, &[0, 1, 2, 3]), BTreeSet::from([KeyCode(17), KeyCode(72)]))
        .await
        .unwrap();
    handle.events().send(EngineEvent::ProcessCreated(entry(10, "/games/game"))).unwrap();
    *foreground.0.lock().unwrap() = Some(10);

    handle.key(KeyEvent::down(17)).unwrap();
    handle.key(KeyEvent::down(72)).unwrap();
    handle.key(KeyEvent::up(72)).unwrap();
    handle.key(KeyEvent::up(17)).unwrap();

    let snapshot = handle.call(|c| c.snapshot()).await.unwrap();
    assert_eq!(snapshot[0].mask, half);
    assert_eq!(applier.calls(), vec![(10, Some(vec![0, 1, 2, 3]))]);

    handle.events().send(EngineEvent::ProcessExited(10)).unwrap();
    handle.update_mask_bits(half, bits(8, &[7])).await.unwrap();
    assert_eq!(applier.calls().len(), 1);

    handle.shutdown().await.unwrap();
    task.await.unwrap();

    let StateFile::Loaded(state) = AppStateStorage::read(&path) else {
        panic!("state was not saved");
    };
    assert_eq!(state.masks[0].name, "Half");
    assert_eq!(state.masks[0].bits, bits(8, &[7]));
    assert_eq!(state.program_rules.len(), 1);
    assert_eq!(state.program_rules[0].mask_name, "Half");
}

#[tokio::test]
async fn disabled_hotkeys_do_not_fire() {
    let (c, applier, _) = coordinator(4);
    let foreground = Arc::new(Foreground(std::sync::Mutex::new(Some(1))));
    let (engine, handle) = EngineLoop::new(c, foreground, None, false);
    let task = tokio::spawn(engine.run());

    handle
        .create_mask("Half".into(), bits(4, &[0, 1]), BTreeSet::from([KeyCode(17)]))
        .await
        .unwrap();
    handle.events().send(EngineEvent::ProcessCreated(entry(1, "/bin/a"))).unwrap();
    handle.set_hotkeys_enabled(false).await.unwrap();
    handle.key(KeyEvent::down(17)).unwrap();
    handle.key(KeyEvent::up(17)).unwrap();
    handle.call(|_| ()).await.unwrap();
    assert!(applier.calls().is_empty());

    handle.set_hotkeys_enabled(true).await.unwrap();
    handle.key(KeyEvent::down(17)).unwrap();
    handle.call(|_| ()).await.unwrap();
    assert_eq!(applier.calls(), vec![(1, Some(vec![0, 1]))]);

    drop(handle);
    let coordinator = task.await.unwrap();
    assert_eq!(coordinator.snapshot().len(), 1);
}

#[tokio::test]
async fn clear_on_close_resets_masked_processes() {
    let (c, applier, _) = coordinator(4);
    let (engine, handle) = EngineLoop::new(c, Arc::new(Foreground::default()), None, false);
    let task = tokio::spawn(engine.run());

    let half = handle.create_mask("Half".into(), bits(4, &[0, 1]), BTreeSet::new()).await.unwrap();
    handle.events().send(EngineEvent::ProcessCreated(entry(1, "/bin/a"))).unwrap();
    handle.set_process_mask(1, half).await.unwrap();
    handle.set_clear_masks_on_close(true).await.unwrap();

    handle.shutdown().await.unwrap();
    task.await.unwrap();
    assert_eq!(applier.calls_for(1), vec![Some(vec![0, 1]), None]);
    assert!(handle.clear_all_masks().await.is_err());
}
