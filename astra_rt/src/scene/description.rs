/// Scene Description collaborator - draw list and mesh readiness

use glam::Mat4;
use slotmap::new_key_type;

use crate::device::MeshGeometry;

new_key_type! {
    /// Opaque reference to a loaded geometry asset.
    ///
    /// Owned by an external asset store; only read here. Comparable and
    /// hashable, so it can key the bottom-level mesh → entry map.
    pub struct MeshRef;
}

/// One draw submitted by the scene: a mesh placed in the world
#[derive(Debug, Clone, Copy)]
pub struct Draw {
    /// Mesh to trace against
    pub mesh: MeshRef,
    /// World transform
    pub transform: Mat4,
    /// Caller-visible index recovered by shaders to look up per-draw
    /// shading data (24 bits)
    pub draw_index: u32,
}

/// Scene description consumed by the acceleration-structure manager
///
/// Implementations are not required to be thread-safe: the manager snapshots
/// everything it needs on the frame thread before handing work to the
/// background builder.
pub trait SceneDescription {
    /// Draw list for the current frame
    fn draws(&self) -> &[Draw];

    /// Whether the mesh's geometry has finished loading and resides on the GPU
    fn is_mesh_ready(&self, mesh: MeshRef) -> bool;

    /// Triangle-geometry view for a ready mesh
    ///
    /// Returns None for unknown or not-yet-ready meshes.
    fn mesh_geometry(&self, mesh: MeshRef) -> Option<MeshGeometry>;
}
