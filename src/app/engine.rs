use std::collections::BTreeSet;
use std::sync::Arc;

use os_api::ProcessEntry;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::app::models::{
    AppStateStorage, EngineError, ForegroundProcess, HotkeyMatcher, KeyCode, KeyEvent, MaskId,
    RuleApplicationCoordinator, StateSaver, TemplateId,
};

type CommandFn = Box<dyn FnOnce(&mut RuleApplicationCoordinator, &mut HotkeyMatcher) + Send>;

/// Work to run on the engine task with exclusive access to the engine state.
pub struct EngineCommand(CommandFn);

impl EngineCommand {
    pub fn new(f: impl FnOnce(&mut RuleApplicationCoordinator, &mut HotkeyMatcher) + Send + 'static) -> Self {
        Self(Box::new(f))
    }
}

pub enum EngineEvent {
    ProcessCreated(ProcessEntry),
    ProcessExited(u32),
    Key(KeyEvent),
    Command(EngineCommand),
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable access to a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl EngineHandle {
    /// Sender for event producers such as the process monitor.
    pub fn events(&self) -> mpsc::UnboundedSender<EngineEvent> {
        self.tx.clone()
    }

    pub fn send(&self, event: EngineEvent) -> Result<(), EngineError> {
        self.tx.send(event).map_err(|_| EngineError::EngineStopped)
    }

    pub fn key(&self, event: KeyEvent) -> Result<(), EngineError> {
        self.send(EngineEvent::Key(event))
    }

    async fn run<T, F>(&self, f: F) -> Result<T, EngineError>
    where
        T: Send + 'static,
        F: FnOnce(&mut RuleApplicationCoordinator, &mut HotkeyMatcher) -> T + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let command = EngineCommand::new(move |coordinator, hotkeys| {
            let _ = reply_tx.send(f(coordinator, hotkeys));
        });
        self.send(EngineEvent::Command(command))?;
        reply_rx.await.map_err(|_| EngineError::EngineStopped)
    }

    /// Runs `f` against the coordinator on the engine task and returns its result.
    pub async fn call<T, F>(&self, f: F) -> Result<T, EngineError>
    where
        T: Send + 'static,
        F: FnOnce(&mut RuleApplicationCoordinator) -> T + Send + 'static,
    {
        self.run(move |coordinator, _| f(coordinator)).await
    }

    /// Turn hotkeys off while a text field captures keys.
    pub async fn set_hotkeys_enabled(&self, enabled: bool) -> Result<(), EngineError> {
        self.run(move |_, hotkeys| hotkeys.set_enabled(enabled)).await
    }

    pub async fn set_process_mask(&self, pid: u32, mask: MaskId) -> Result<bool, EngineError> {
        Ok(self.call(move |c| c.set_process_mask(pid, mask)).await??)
    }

    pub async fn remove_program_rule(&self, path: String) -> Result<bool, EngineError> {
        Ok(self.call(move |c| c.remove_program_rule(&path)).await??)
    }

    pub async fn create_mask(
        &self,
        name: String,
        bits: Vec<bool>,
        hotkey: BTreeSet<KeyCode>,
    ) -> Result<MaskId, EngineError> {
        Ok(self.call(move |c| c.create_mask(&name, bits, hotkey)).await??)
    }

    pub async fn rename_mask(&self, id: MaskId, name: String) -> Result<(), EngineError> {
        Ok(self.call(move |c| c.rename_mask(id, &name)).await??)
    }

    pub async fn set_mask_hotkey(&self, id: MaskId, hotkey: BTreeSet<KeyCode>) -> Result<(), EngineError> {
        Ok(self.call(move |c| c.set_mask_hotkey(id, hotkey)).await??)
    }

    pub async fn update_mask_bits(&self, id: MaskId, bits: Vec<bool>) -> Result<bool, EngineError> {
        Ok(self.call(move |c| c.update_mask_bits(id, bits)).await??)
    }

    pub async fn remove_mask(&self, id: MaskId) -> Result<bool, EngineError> {
        self.call(move |c| c.remove_mask(id)).await?
    }

    pub async fn remove_mask_cascade(&self, id: MaskId) -> Result<bool, EngineError> {
        self.call(move |c| c.remove_mask_cascade(id)).await?
    }

    pub async fn add_rule_template(&self, glob: String, mask: MaskId) -> Result<TemplateId, EngineError> {
        Ok(self.call(move |c| c.add_rule_template(&glob, mask)).await??)
    }

    pub async fn remove_rule_template(&self, id: TemplateId) -> Result<bool, EngineError> {
        Ok(self.call(move |c| c.remove_rule_template(id)).await??)
    }

    pub async fn set_rule_template_glob(&self, id: TemplateId, glob: String) -> Result<bool, EngineError> {
        Ok(self.call(move |c| c.set_rule_template_glob(id, &glob)).await??)
    }

    pub async fn set_rule_template_mask(&self, id: TemplateId, mask: MaskId) -> Result<bool, EngineError> {
        Ok(self.call(move |c| c.set_rule_template_mask(id, mask)).await??)
    }

    pub async fn move_rule_template(&self, id: TemplateId, position: usize) -> Result<bool, EngineError> {
        Ok(self.call(move |c| c.move_rule_template(id, position)).await??)
    }

    pub async fn reapply_rule_template(&self, id: TemplateId) -> Result<bool, EngineError> {
        Ok(self.call(move |c| c.reapply_rule_template(id)).await??)
    }

    pub async fn set_match_whole_path(&self, enabled: bool) -> Result<bool, EngineError> {
        self.call(move |c| c.set_match_whole_path(enabled)).await
    }

    pub async fn set_clear_masks_on_close(&self, enabled: bool) -> Result<(), EngineError> {
        self.call(move |c| c.set_clear_masks_on_close(enabled)).await
    }

    pub async fn clear_all_masks(&self) -> Result<bool, EngineError> {
        self.call(|c| c.clear_all_masks()).await
    }

    pub async fn export_state(&self) -> Result<AppStateStorage, EngineError> {
        self.call(|c| c.export_state()).await
    }

    /// Stops the engine after clearing masks (if configured) and flushing the state.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send(EngineEvent::Shutdown(tx))?;
        rx.await.map_err(|_| EngineError::EngineStopped)
    }
}

/// The single task that owns the coordinator. All events and commands are handled in arrival
/// order, so engine state is never touched concurrently.
pub struct EngineLoop {
    coordinator: RuleApplicationCoordinator,
    hotkeys: HotkeyMatcher,
    foreground: Arc<dyn ForegroundProcess>,
    saver: Option<StateSaver>,
    saved_revision: Option<u64>,
    rx: mpsc::UnboundedReceiver<EngineEvent>,
}

impl EngineLoop {
    /// `needs_save` forces a save once the loop starts, e.g. after defaults were generated.
    pub fn new(
        coordinator: RuleApplicationCoordinator,
        foreground: Arc<dyn ForegroundProcess>,
        saver: Option<StateSaver>,
        needs_save: bool,
    ) -> (Self, EngineHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let saved_revision = (!needs_save).then(|| coordinator.store().revision());
        let engine = Self {
            coordinator,
            hotkeys: HotkeyMatcher::new(),
            foreground,
            saver,
            saved_revision,
            rx,
        };
        (engine, EngineHandle { tx })
    }

    /// Runs until shut down or until every handle is dropped. Returns the coordinator.
    pub async fn run(mut self) -> RuleApplicationCoordinator {
        self.save_if_changed();

        while let Some(event) = self.rx.recv().await {
            match event {
                EngineEvent::ProcessCreated(entry) => {
                    self.coordinator
                        .on_process_created(entry.pid, entry.name, entry.image_path);
                }
                EngineEvent::ProcessExited(pid) => {
                    self.coordinator.on_process_exited(pid);
                }
                EngineEvent::Key(event) => self.on_key(event),
                EngineEvent::Command(EngineCommand(command)) => {
                    command(&mut self.coordinator, &mut self.hotkeys);
                }
                EngineEvent::Shutdown(done) => {
                    self.close().await;
                    let _ = done.send(());
                    return self.coordinator;
                }
            }
            self.save_if_changed();
        }

        self.close().await;
        self.coordinator
    }

    fn on_key(&mut self, event: KeyEvent) {
        let fired = self
            .hotkeys
            .on_key(event, self.coordinator.store().hotkey_bindings());
        for mask in fired {
            let pid = self.foreground.foreground_pid();
            debug!(?mask, ?pid, "hotkey pressed");
            self.coordinator.apply_hotkey(mask, pid);
        }
    }

    fn save_if_changed(&mut self) {
        let Some(saver) = &self.saver else {
            return;
        };
        let revision = self.coordinator.store().revision();
        if self.saved_revision != Some(revision) {
            saver.request_save(self.coordinator.export_state());
            self.saved_revision = Some(revision);
        }
    }

    async fn close(&mut self) {
        if self.coordinator.store().settings().clear_masks_on_close {
            info!("clearing masks before exit");
            self.coordinator.clear_all_masks();
        }
        self.save_if_changed();
        if let Some(saver) = self.saver.take() {
            saver.shutdown().await;
        }
    }
}
