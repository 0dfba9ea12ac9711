/// Frame-facing owner of the whole spatial-index pipeline.
///
/// One call per frame drives everything: deferred deletion, acquisition of
/// a finished background rebuild, rebuild triggering, ring rotation, and the
/// per-frame top-level build. The accessors below are only meaningful after
/// that call, which the debug assertions enforce.

use std::sync::Arc;

use crate::device::{AccelerationStructure, GpuDevice, Semaphore};
use crate::error::Result;
use crate::scene::SceneDescription;
use crate::tasks::TaskScheduler;
use crate::{rt_info, rt_warn};

use super::blas_set::{BlasSet, BlasSetBuilder};
use super::deletion_queue::DeletionQueue;
use super::tlas::{TlasBuilder, TlasSlot, TLAS_RING_SIZE};

pub struct AccelerationStructureManager {
    current: BlasSet,
    builder: BlasSetBuilder,
    deletion_queue: DeletionQueue,
    tlas: TlasBuilder,
    slots: Vec<TlasSlot>,
    slot_index: usize,
    frame_index: u64,
    /// Guards the accessors: set by update(), consulted in debug builds
    updated: bool,
}

impl AccelerationStructureManager {
    pub fn new(device: Arc<dyn GpuDevice>, scheduler: Arc<dyn TaskScheduler>) -> Result<Self> {
        let mut slots = Vec::with_capacity(TLAS_RING_SIZE);
        for _ in 0..TLAS_RING_SIZE {
            slots.push(TlasSlot::new(device.as_ref())?);
        }
        rt_info!(
            "astra::accel",
            "Acceleration structure manager ready ({} top-level ring slots)",
            TLAS_RING_SIZE
        );
        Ok(Self {
            current: BlasSet::empty(),
            builder: BlasSetBuilder::new(Arc::clone(&device), scheduler),
            deletion_queue: DeletionQueue::new(),
            tlas: TlasBuilder::new(device),
            slots,
            slot_index: 0,
            frame_index: 0,
            updated: false,
        })
    }

    /// Drive one frame of the pipeline. Call exactly once per frame, before
    /// reading the accessors.
    pub fn update(&mut self, scene: &dyn SceneDescription) -> Result<()> {
        self.frame_index += 1;

        // (1) Sets retired one full frame ago are safe to release now.
        self.deletion_queue.process();

        // (2) Swap in a finished background rebuild, parking the old set.
        if let Some(set) = self.builder.take_finished() {
            let old = std::mem::replace(&mut self.current, set);
            if !old.is_empty() || old.storage().is_some() {
                self.deletion_queue.queue_delete(old);
            }
        } else if self.builder.reclaim_failed() {
            rt_warn!(
                "astra::accel",
                "Bottom-level rebuild failed; keeping previous set (frame {})",
                self.frame_index
            );
        }

        // (3) Trigger at most one rebuild when the ready-mesh population
        //     drifted from the current set. The top-level build below still
        //     uses the current set, so new meshes appear a few frames late.
        if self.builder.must_rebuild(scene, &self.current) {
            self.builder.rebuild_async(scene);
        }

        // (4) Rotate to the slot the GPU is no longer reading.
        self.slot_index = (self.slot_index + 1) % TLAS_RING_SIZE;

        // (5) Rebuild the top level for this frame.
        let instances = self.tlas.build_instances(scene, &self.current);
        self.tlas.build(&mut self.slots[self.slot_index], &instances)?;

        self.updated = true;
        Ok(())
    }

    /// This frame's top-level structure, or None when no instances were
    /// drawable (a valid frame; the caller skips tracing).
    pub fn acceleration_structure(&self) -> Option<&Arc<dyn AccelerationStructure>> {
        debug_assert!(self.updated, "update() must run before acceleration_structure()");
        self.slots[self.slot_index].acceleration_structure()
    }

    /// Semaphore the renderer waits on before tracing against this frame's
    /// structure
    pub fn build_completion_semaphore(&self) -> &Arc<dyn Semaphore> {
        debug_assert!(self.updated, "update() must run before build_completion_semaphore()");
        self.slots[self.slot_index].build_semaphore()
    }

    /// Meshes covered by the bottom-level set currently in use
    pub fn resident_mesh_count(&self) -> usize {
        self.current.len()
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }
}

impl Drop for AccelerationStructureManager {
    fn drop(&mut self) {
        // An in-flight rebuild owns GPU resources; hand their release to a
        // task ordered after the build instead of blocking here.
        self.builder.schedule_teardown();
        self.deletion_queue.process();
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
