/// Bottom-level set: per-mesh acceleration structures in one shared buffer.
///
/// The set is rebuilt in the background whenever the population of ready,
/// unique meshes referenced by the draw list changes, then compacted and
/// handed back to the frame thread through a release/acquire flag. The live
/// set is replaced wholesale; it is never mutated after publication.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rustc_hash::{FxHashMap, FxHashSet};

use crate::device::{
    AccelerationStructure, AccelerationStructureDesc, AccelerationStructureKind,
    BottomLevelBuild, BufferDesc, BufferRange, BufferUsage, BuildFlags,
    CompactionCopy, DeviceBuffer, GpuDevice, MeshGeometry,
};
use crate::error::Result;
use crate::scene::{MeshRef, SceneDescription};
use crate::tasks::{TaskScheduler, TaskToken};
use crate::{rt_debug, rt_error, rt_info};

/// Round `value` up to the next multiple of `alignment` (a power of two)
fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

// ============================================================================
// BlasSet
// ============================================================================

/// One bottom-level entry: an opaque structure handle plus its slice of the
/// shared backing buffer
pub struct BlasEntry {
    pub handle: Arc<dyn AccelerationStructure>,
    pub range: BufferRange,
}

/// The bottom-level set, with the mesh → entry mapping read by the top-level
/// pipeline each frame
pub struct BlasSet {
    entries: Vec<BlasEntry>,
    /// Shared backing buffer holding every entry (None for the empty set)
    storage: Option<Arc<dyn DeviceBuffer>>,
    map: FxHashMap<MeshRef, usize>,
}

impl BlasSet {
    /// The empty set created at manager startup
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            storage: None,
            map: FxHashMap::default(),
        }
    }

    /// Entry for a mesh, if the mesh was part of the set's snapshot
    pub fn entry_for(&self, mesh: MeshRef) -> Option<&BlasEntry> {
        self.map.get(&mesh).map(|&index| &self.entries[index])
    }

    pub fn contains(&self, mesh: MeshRef) -> bool {
        self.map.contains_key(&mesh)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the set covers exactly this mesh population (membership, not
    /// just count)
    pub fn matches(&self, meshes: &FxHashSet<MeshRef>) -> bool {
        self.map.len() == meshes.len() && meshes.iter().all(|mesh| self.map.contains_key(mesh))
    }
}

// ============================================================================
// Background rebuild
// ============================================================================

/// Handoff slot between the background task and the frame thread.
///
/// The task writes `result` first, then sets `done` with release ordering;
/// the frame thread reads `done` with acquire ordering before touching
/// `result`. No lock is ever held across a GPU wait.
struct PendingRebuild {
    done: AtomicBool,
    result: Mutex<Option<BlasSet>>,
}

/// Builds replacement bottom-level sets off the per-frame path
pub struct BlasSetBuilder {
    device: Arc<dyn GpuDevice>,
    scheduler: Arc<dyn TaskScheduler>,
    pending: Arc<PendingRebuild>,
    build_token: Option<TaskToken>,
    flags: BuildFlags,
}

impl BlasSetBuilder {
    pub fn new(device: Arc<dyn GpuDevice>, scheduler: Arc<dyn TaskScheduler>) -> Self {
        Self {
            device,
            scheduler,
            pending: Arc::new(PendingRebuild {
                done: AtomicBool::new(false),
                result: Mutex::new(None),
            }),
            build_token: None,
            flags: BuildFlags::PREFER_FAST_TRACE | BuildFlags::ALLOW_COMPACTION,
        }
    }

    /// Token of the in-flight rebuild, if any
    pub fn build_token(&self) -> Option<TaskToken> {
        self.build_token
    }

    /// Set of unique meshes that are both drawn and ready
    fn ready_mesh_set(scene: &dyn SceneDescription) -> FxHashSet<MeshRef> {
        scene
            .draws()
            .iter()
            .map(|draw| draw.mesh)
            .filter(|&mesh| scene.is_mesh_ready(mesh))
            .collect()
    }

    /// Whether a rebuild must be triggered this frame
    ///
    /// True only if no rebuild is outstanding and the ready-mesh population
    /// differs from what `current` covers.
    pub fn must_rebuild(&self, scene: &dyn SceneDescription, current: &BlasSet) -> bool {
        if self.build_token.is_some() {
            return false;
        }
        !current.matches(&Self::ready_mesh_set(scene))
    }

    /// Snapshot the ready meshes and schedule a background rebuild.
    ///
    /// The snapshot is taken on the frame thread because the scene object is
    /// not thread-safe; the task only sees owned data.
    pub fn rebuild_async(&mut self, scene: &dyn SceneDescription) -> TaskToken {
        debug_assert!(self.build_token.is_none(), "rebuild already outstanding");

        let meshes: Vec<(MeshRef, MeshGeometry)> = Self::ready_mesh_set(scene)
            .into_iter()
            .filter_map(|mesh| scene.mesh_geometry(mesh).map(|geometry| (mesh, geometry)))
            .collect();

        rt_debug!("astra::blas", "Scheduling bottom-level rebuild: {} meshes", meshes.len());

        let device = Arc::clone(&self.device);
        let pending = Arc::clone(&self.pending);
        let flags = self.flags;
        let token = self.scheduler.schedule(
            Box::new(move || match build_blas_set(device.as_ref(), &meshes, flags) {
                Ok(set) => {
                    *pending.result.lock().unwrap() = Some(set);
                    pending.done.store(true, Ordering::Release);
                }
                Err(error) => {
                    // Publish nothing: the manager keeps the previous set
                    rt_error!("astra::blas", "Bottom-level rebuild abandoned: {}", error);
                }
            }),
            &[],
        );
        self.build_token = Some(token);
        token
    }

    /// Take a finished replacement set, clearing the done flag and the token.
    ///
    /// Acquire side of the handoff; called once per frame by the manager.
    pub fn take_finished(&mut self) -> Option<BlasSet> {
        if !self.pending.done.load(Ordering::Acquire) {
            return None;
        }
        let set = self.pending.result.lock().unwrap().take();
        self.pending.done.store(false, Ordering::Relaxed);
        self.build_token = None;
        set
    }

    /// Clear the token of a rebuild that completed without publishing a
    /// result (allocation failure). Returns true if a failed rebuild was
    /// reclaimed, so a later frame may schedule a retry.
    pub fn reclaim_failed(&mut self) -> bool {
        match self.build_token {
            Some(token)
                if !self.pending.done.load(Ordering::Acquire)
                    && self.scheduler.is_complete(token) =>
            {
                self.build_token = None;
                true
            }
            _ => false,
        }
    }

    /// At manager teardown: if a rebuild is still in flight, schedule a
    /// cleanup job dependent on its token so the pending result is dropped
    /// only after the build task has finished with it.
    pub fn schedule_teardown(&mut self) {
        if let Some(token) = self.build_token.take() {
            let pending = Arc::clone(&self.pending);
            self.scheduler.schedule(
                Box::new(move || {
                    let retired = pending.result.lock().unwrap().take();
                    pending.done.store(false, Ordering::Relaxed);
                    drop(retired);
                    rt_debug!("astra::blas", "In-flight rebuild torn down after completion");
                }),
                &[token],
            );
        }
    }
}

/// The six-step build-and-compact sequence run by the background task.
///
/// Synchronous GPU waits are legitimate here: compacted sizes must be read
/// back before the compacted storage can be allocated.
fn build_blas_set(
    device: &dyn GpuDevice,
    meshes: &[(MeshRef, MeshGeometry)],
    flags: BuildFlags,
) -> Result<BlasSet> {
    if meshes.is_empty() {
        return Ok(BlasSet::empty());
    }

    let structure_alignment = device.acceleration_structure_offset_alignment();
    let scratch_alignment = device.scratch_offset_alignment();

    // (1)+(2): per-mesh size queries, concatenated with aligned offsets
    let mut layouts = Vec::with_capacity(meshes.len());
    let mut storage_total = 0u64;
    let mut scratch_total = 0u64;
    for (_, geometry) in meshes {
        let sizes = device.bottom_level_build_sizes(geometry, flags)?;
        let offset = align_up(storage_total, structure_alignment);
        let scratch_offset = align_up(scratch_total, scratch_alignment);
        storage_total = offset + sizes.acceleration_structure_size;
        scratch_total = scratch_offset + sizes.build_scratch_size;
        layouts.push((offset, sizes.acceleration_structure_size, scratch_offset));
    }

    // (3): one shared buffer, one handle per entry inside it
    let storage = device.create_buffer(&BufferDesc {
        size: storage_total,
        usage: BufferUsage::AccelerationStructureStorage,
    })?;
    let scratch = device.create_buffer(&BufferDesc {
        size: scratch_total,
        usage: BufferUsage::Scratch,
    })?;
    let mut built = Vec::with_capacity(meshes.len());
    for &(offset, size, _) in &layouts {
        built.push(device.create_acceleration_structure(&AccelerationStructureDesc {
            kind: AccelerationStructureKind::BottomLevel,
            buffer: &storage,
            range: BufferRange { offset, size },
        })?);
    }

    // (4): single synchronous build batch + compacted-size query per entry
    let builds: Vec<BottomLevelBuild> = meshes
        .iter()
        .zip(built.iter().zip(layouts.iter()))
        .map(|((_, geometry), (destination, &(_, _, scratch_offset)))| BottomLevelBuild {
            geometry,
            destination,
            scratch: &scratch,
            scratch_offset,
            flags,
        })
        .collect();
    let compacted_sizes = device.build_bottom_level_sync(&builds)?;
    drop(builds);

    // (5): smaller shared buffer, compacted handles, one copy per entry
    let mut compacted_layouts = Vec::with_capacity(meshes.len());
    let mut compacted_total = 0u64;
    for &size in &compacted_sizes {
        if size == 0 {
            crate::rt_bail!("astra::blas", "Compacted-size query returned 0; aborting rebuild");
        }
        let offset = align_up(compacted_total, structure_alignment);
        compacted_total = offset + size;
        compacted_layouts.push((offset, size));
    }
    let compacted_storage = device.create_buffer(&BufferDesc {
        size: compacted_total,
        usage: BufferUsage::AccelerationStructureStorage,
    })?;
    let mut entries = Vec::with_capacity(meshes.len());
    for &(offset, size) in &compacted_layouts {
        let handle = device.create_acceleration_structure(&AccelerationStructureDesc {
            kind: AccelerationStructureKind::BottomLevel,
            buffer: &compacted_storage,
            range: BufferRange { offset, size },
        })?;
        entries.push(BlasEntry {
            handle,
            range: BufferRange { offset, size },
        });
    }
    let copies: Vec<CompactionCopy> = built
        .iter()
        .zip(entries.iter())
        .map(|(source, entry)| CompactionCopy {
            source,
            destination: &entry.handle,
        })
        .collect();
    device.compact_bottom_level_sync(&copies)?;
    drop(copies);

    // (6): free the uncompacted structures, their buffer, and the scratch
    drop(built);
    drop(storage);
    drop(scratch);

    let map = meshes
        .iter()
        .enumerate()
        .map(|(index, (mesh, _))| (*mesh, index))
        .collect();

    rt_info!(
        "astra::blas",
        "Bottom-level set built: {} entries, {} bytes compacted (from {})",
        meshes.len(),
        compacted_total,
        storage_total
    );

    Ok(BlasSet {
        entries,
        storage: Some(compacted_storage),
        map,
    })
}

impl BlasSet {
    /// Shared backing buffer, if the set is non-empty
    pub fn storage(&self) -> Option<&Arc<dyn DeviceBuffer>> {
        self.storage.as_ref()
    }
}

#[cfg(test)]
#[path = "blas_set_tests.rs"]
mod tests;
