use crate::error::{ScriptError, TaskResult};
use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::time::Instant;

pub type AnimationFrameCallback = Box<dyn FnOnce(Instant) -> TaskResult>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AnimationFrameId(u32);

impl AnimationFrameId {
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Callbacks waiting for the beginning of the next frame.
#[derive(Default)]
pub struct AnimationFrameQueue {
    last_id: Cell<u32>,
    callbacks: RefCell<FxHashMap<AnimationFrameId, AnimationFrameCallback>>,
}

impl AnimationFrameQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn give(&self, callback: AnimationFrameCallback) -> AnimationFrameId {
        let id = AnimationFrameId(self.last_id.get().wrapping_add(1));
        self.last_id.set(id.0);
        self.callbacks.borrow_mut().insert(id, callback);
        id
    }

    pub fn cancel(&self, id: AnimationFrameId) {
        let removed = self.callbacks.borrow_mut().remove(&id);
        drop(removed);
    }

    pub fn len(&self) -> usize {
        self.callbacks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.borrow().is_empty()
    }

    /// Runs every callback requested before this call, oldest first.
    /// Callbacks requested while these run are left for the next frame.
    pub fn did_begin_frame(&self, time: Instant) -> Vec<ScriptError> {
        let mut callbacks: Vec<_> = self.callbacks.borrow_mut().drain().collect();
        callbacks.sort_unstable_by_key(|(id, _)| *id);

        let mut errors = Vec::new();
        for (id, callback) in callbacks {
            if let Err(error) = callback(time) {
                tracing::debug!(frame_callback = id.0, %error, "animation frame callback failed");
                errors.push(error);
            }
        }
        errors
    }
}
