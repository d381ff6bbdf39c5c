//! Strata core - scene model for the voxel path tracer.
//!
//! This crate provides:
//!
//! - **Voxel storage**: the solid/water [`octree`] pair with packed and
//!   node-based variants, finalization, and DDA ray traversal
//! - **Materials**: the [`palette`] id space and [`material`] property sheets
//! - **Entities**: triangle-mesh [`entity`] geometry behind a [`bvh`]
//! - **Lighting**: [`sun`], [`sky`], and the [`emitter_grid`]
//! - **Render state**: the [`scene`] container, its state machine, the
//!   [`sample_buffer`], and the [`sdf`] scene description

pub mod bvh;
pub mod camera;
pub mod emitter_grid;
pub mod entity;
pub mod material;
pub mod octree;
pub mod palette;
pub mod primitive;
pub mod ray;
pub mod rng;
pub mod sample_buffer;
pub mod scene;
pub mod sdf;
pub mod sky;
pub mod sun;
pub mod texture;

// Re-export commonly used types
pub use bvh::Bvh;
pub use camera::{Camera, ProjectionMode};
pub use emitter_grid::{EmitterGrid, EmitterPosition};
pub use entity::{Entity, EntityShape, Mesh};
pub use material::Material;
pub use octree::{Implementation, Octree, OctreeError, Region, ANY_TYPE};
pub use palette::{Palette, AIR_ID, WATER_ID};
pub use primitive::{Primitive, Quad, Triangle};
pub use ray::TraceRay;
pub use sample_buffer::{PreviewBuffer, SampleBuffer};
pub use scene::{
    EmitterSamplingStrategy, OutputMode, Postprocess, RenderState, ResetReason, Scene,
};
pub use sdf::{SceneDescription, SDF_VERSION};
pub use sky::Sky;
pub use sun::Sun;
pub use texture::{Texture, WorldTexture};
