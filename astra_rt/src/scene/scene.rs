/// Scene: a minimal concrete SceneDescription backed by a SlotMap mesh store.
///
/// Uses a SlotMap for O(1) insert/remove with stable keys. The full
/// entity-component store and asset pipeline live outside this crate; this
/// type covers wiring and tests.

use glam::Mat4;
use slotmap::SlotMap;

use crate::device::MeshGeometry;
use super::description::{Draw, MeshRef, SceneDescription};

struct MeshAsset {
    geometry: MeshGeometry,
    ready: bool,
}

/// A scene: a mesh store with per-mesh readiness plus a draw list
pub struct Scene {
    meshes: SlotMap<MeshRef, MeshAsset>,
    draws: Vec<Draw>,
}

impl Scene {
    /// Create a new empty scene
    pub fn new() -> Self {
        Self {
            meshes: SlotMap::with_key(),
            draws: Vec::new(),
        }
    }

    /// Register a mesh. It starts out not ready.
    ///
    /// Returns a stable key that remains valid until the mesh is removed.
    pub fn add_mesh(&mut self, geometry: MeshGeometry) -> MeshRef {
        self.meshes.insert(MeshAsset {
            geometry,
            ready: false,
        })
    }

    /// Mark a mesh ready (uploaded and traceable). Returns false if the key
    /// is invalid.
    pub fn set_mesh_ready(&mut self, mesh: MeshRef, ready: bool) -> bool {
        if let Some(asset) = self.meshes.get_mut(mesh) {
            asset.ready = ready;
            true
        } else {
            false
        }
    }

    /// Remove a mesh and every draw referencing it. Returns false if the key
    /// is invalid.
    pub fn remove_mesh(&mut self, mesh: MeshRef) -> bool {
        if self.meshes.remove(mesh).is_some() {
            self.draws.retain(|draw| draw.mesh != mesh);
            true
        } else {
            false
        }
    }

    /// Append one draw to the current frame's draw list
    pub fn push_draw(&mut self, mesh: MeshRef, transform: Mat4, draw_index: u32) {
        self.draws.push(Draw {
            mesh,
            transform,
            draw_index,
        });
    }

    /// Clear the draw list (typically once per frame)
    pub fn clear_draws(&mut self) {
        self.draws.clear();
    }

    /// Number of registered meshes
    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneDescription for Scene {
    fn draws(&self) -> &[Draw] {
        &self.draws
    }

    fn is_mesh_ready(&self, mesh: MeshRef) -> bool {
        self.meshes.get(mesh).map(|asset| asset.ready).unwrap_or(false)
    }

    fn mesh_geometry(&self, mesh: MeshRef) -> Option<MeshGeometry> {
        self.meshes
            .get(mesh)
            .filter(|asset| asset.ready)
            .map(|asset| asset.geometry.clone())
    }
}

#[cfg(test)]
#[path = "scene_tests.rs"]
mod tests;
