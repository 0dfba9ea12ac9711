/// Deferred destruction of replaced bottom-level sets.
///
/// A set swapped out this frame may still be referenced by the top-level
/// structure of the previous ring slot, so its resources are parked here and
/// released only after a full ring rotation.

use std::sync::Mutex;

use crate::rt_trace;

use super::blas_set::BlasSet;

pub struct DeletionQueue {
    retired: Mutex<Vec<BlasSet>>,
}

impl DeletionQueue {
    pub fn new() -> Self {
        Self {
            retired: Mutex::new(Vec::new()),
        }
    }

    /// Park a replaced set until the next process() call
    pub fn queue_delete(&self, set: BlasSet) {
        self.retired.lock().unwrap().push(set);
    }

    /// Release everything queued before this frame's new retirements
    pub fn process(&self) {
        let retired = std::mem::take(&mut *self.retired.lock().unwrap());
        if !retired.is_empty() {
            rt_trace!("astra::accel", "Releasing {} retired bottom-level set(s)", retired.len());
        }
    }

    pub fn len(&self) -> usize {
        self.retired.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.retired.lock().unwrap().is_empty()
    }
}

impl Default for DeletionQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "deletion_queue_tests.rs"]
mod tests;
