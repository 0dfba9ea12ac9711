/// Scene module - draw list, mesh references, and readiness queries

pub mod description;
pub mod scene;

pub use description::*;
pub use scene::Scene;
