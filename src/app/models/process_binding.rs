use os_api::OsError;
use serde::Serialize;

use crate::app::models::{AffinityApplier, MaskId, ProcessHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BindingState {
    Unopened,
    Opened,
    Applied,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The mask was already the last one attempted, nothing was done.
    Skipped { success: bool },
    Restricted,
    Cleared,
    OpenFailed(OsError),
    ApplyFailed(OsError),
}

impl ApplyOutcome {
    pub fn is_success(&self) -> bool {
        match self {
            ApplyOutcome::Skipped { success } => *success,
            ApplyOutcome::Restricted | ApplyOutcome::Cleared => true,
            ApplyOutcome::OpenFailed(_) | ApplyOutcome::ApplyFailed(_) => false,
        }
    }
}

/// A live process and the mask applied to it.
///
/// The OS handle is opened on the first apply and held until the binding is dropped.
pub struct ProcessBinding {
    pid: u32,
    name: String,
    image_path: String,
    mask: MaskId,
    last_attempted: MaskId,
    state: BindingState,
    handle: Option<Box<dyn ProcessHandle>>,
}

impl std::fmt::Debug for ProcessBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessBinding")
            .field("pid", &self.pid)
            .field("name", &self.name)
            .field("image_path", &self.image_path)
            .field("mask", &self.mask)
            .field("state", &self.state)
            .finish()
    }
}

impl ProcessBinding {
    pub fn new(pid: u32, name: String, image_path: String) -> Self {
        Self {
            pid,
            name,
            image_path,
            mask: MaskId::NO_MASK,
            last_attempted: MaskId::NO_MASK,
            state: BindingState::Unopened,
            handle: None,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Empty when the image path could not be read.
    pub fn image_path(&self) -> &str {
        &self.image_path
    }

    pub fn mask(&self) -> MaskId {
        self.mask
    }

    pub fn state(&self) -> BindingState {
        self.state
    }

    pub fn has_failed(&self) -> bool {
        self.state == BindingState::Failed
    }

    /// Applies `mask`, given as platform processor ids (`None` clears the restriction).
    ///
    /// Re-applying the mask that was last attempted is a no-op reporting the previous result,
    /// so a failing process is retried only when a different mask is chosen. `force` bypasses
    /// this for masks whose bits were edited.
    pub(crate) fn apply(
        &mut self,
        mask: MaskId,
        processor_ids: Option<&[u32]>,
        applier: &dyn AffinityApplier,
        force: bool,
    ) -> ApplyOutcome {
        if !force && mask == self.last_attempted {
            return ApplyOutcome::Skipped {
                success: !self.has_failed(),
            };
        }
        self.last_attempted = mask;
        self.mask = mask;

        let handle = match self.handle.take() {
            Some(handle) => handle,
            None => match applier.open(self.pid) {
                Ok(handle) => {
                    self.state = BindingState::Opened;
                    handle
                }
                Err(e) => {
                    self.state = BindingState::Failed;
                    return ApplyOutcome::OpenFailed(e);
                }
            },
        };
        let handle = self.handle.insert(handle);

        match handle.apply(processor_ids) {
            Ok(()) => {
                self.state = BindingState::Applied;
                if processor_ids.is_some() {
                    ApplyOutcome::Restricted
                } else {
                    ApplyOutcome::Cleared
                }
            }
            Err(e) => {
                self.state = BindingState::Failed;
                ApplyOutcome::ApplyFailed(e)
            }
        }
    }

    pub fn snapshot(&self, mask_name: &str) -> ProcessSnapshot {
        ProcessSnapshot {
            pid: self.pid,
            name: self.name.clone(),
            image_path: self.image_path.clone(),
            mask: self.mask,
            mask_name: mask_name.to_string(),
            state: self.state,
        }
    }
}

/// Read-only view of a binding, published to observers after every change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessSnapshot {
    pub pid: u32,
    pub name: String,
    pub image_path: String,
    pub mask: MaskId,
    pub mask_name: String,
    pub state: BindingState,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use os_api::OsErrorKind;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        opens: AtomicUsize,
        fail_open: bool,
        fail_apply: bool,
        calls: Arc<Mutex<Vec<Option<Vec<u32>>>>>,
    }

    struct RecordingHandle {
        fail: bool,
        calls: Arc<Mutex<Vec<Option<Vec<u32>>>>>,
    }

    impl ProcessHandle for RecordingHandle {
        fn apply(&mut self, ids: Option<&[u32]>) -> Result<(), OsError> {
            self.calls.lock().unwrap().push(ids.map(<[u32]>::to_vec));
            if self.fail {
                Err(OsError::new(OsErrorKind::PermissionDenied, "Access is denied."))
            } else {
                Ok(())
            }
        }
    }

    impl AffinityApplier for Recorder {
        fn open(&self, _pid: u32) -> Result<Box<dyn ProcessHandle>, OsError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.fail_open {
                return Err(OsError::new(OsErrorKind::PermissionDenied, "Access is denied."));
            }
            Ok(Box::new(RecordingHandle {
                fail: self.fail_apply,
                calls: self.calls.clone(),
            }))
        }
    }

    #[test]
    fn same_mask_is_applied_once() {
        let applier = Recorder::default();
        let mut b = ProcessBinding::new(1, "game".into(), "/games/game".into());
        let mask = MaskId(5);

        assert_eq!(b.apply(mask, Some(&[0, 1]), &applier, false), ApplyOutcome::Restricted);
        assert_eq!(b.apply(mask, Some(&[0, 1]), &applier, false), ApplyOutcome::Skipped { success: true });
        assert_eq!(applier.calls.lock().unwrap().len(), 1);
        assert_eq!(applier.opens.load(Ordering::SeqCst), 1);
        assert_eq!(b.state(), BindingState::Applied);

        // Forced re-apply after the bits were edited
        assert_eq!(b.apply(mask, Some(&[2]), &applier, true), ApplyOutcome::Restricted);
        assert_eq!(applier.calls.lock().unwrap().last().unwrap(), &Some(vec![2]));
    }

    #[test]
    fn initial_no_mask_is_not_applied() {
        let applier = Recorder::default();
        let mut b = ProcessBinding::new(1, "game".into(), "/games/game".into());
        assert!(b.apply(MaskId::NO_MASK, None, &applier, false).is_success());
        assert_eq!(applier.opens.load(Ordering::SeqCst), 0);
        assert_eq!(b.state(), BindingState::Unopened);
    }

    #[test]
    fn open_failure_is_retried_only_for_a_new_mask() {
        let applier = Recorder {
            fail_open: true,
            ..Default::default()
        };
        let mut b = ProcessBinding::new(1, "svc".into(), "/usr/bin/svc".into());

        assert!(matches!(b.apply(MaskId(2), Some(&[0]), &applier, false), ApplyOutcome::OpenFailed(_)));
        assert_eq!(b.apply(MaskId(2), Some(&[0]), &applier, false), ApplyOutcome::Skipped { success: false });
        assert_eq!(applier.opens.load(Ordering::SeqCst), 1);

        assert!(matches!(b.apply(MaskId(3), Some(&[1]), &applier, false), ApplyOutcome::OpenFailed(_)));
        assert_eq!(applier.opens.load(Ordering::SeqCst), 2);
        assert!(b.has_failed());
        assert_eq!(b.mask(), MaskId(3));
    }

    #[test]
    fn apply_failure_keeps_the_handle() {
        let applier = Recorder {
            fail_apply: true,
            ..Default::default()
        };
        let mut b = ProcessBinding::new(1, "game".into(), "/games/game".into());
        assert!(matches!(b.apply(MaskId(2), Some(&[0]), &applier, false), ApplyOutcome::ApplyFailed(_)));
        assert!(matches!(b.apply(MaskId::NO_MASK, None, &applier, false), ApplyOutcome::ApplyFailed(_)));
        assert_eq!(applier.opens.load(Ordering::SeqCst), 1);
        assert_eq!(applier.calls.lock().unwrap().len(), 2);
    }
}
