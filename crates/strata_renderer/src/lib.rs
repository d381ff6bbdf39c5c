//! Strata renderer - CPU path tracing and render scheduling.
//!
//! The render pipeline: the [`manager`] worker pool produces one sample per
//! pixel per pass via the [`path_tracer`], accumulating into the scene's
//! sample buffer; [`post`] finalizes frames into the preview buffer;
//! [`persist`] and [`dump`] handle the on-disk render state; [`writers`]
//! encode PNG/TIFF/PFM output.

pub mod dump;
pub mod manager;
pub mod path_tracer;
pub mod persist;
pub mod post;
pub mod preview;
pub mod writers;

pub use dump::{DumpError, RenderDump};
pub use manager::{DefaultSnapshotControl, RenderManager, RenderOptions, SnapshotControl};
pub use persist::{PersistError, SceneDirectory};
pub use writers::WriteError;

use rand::RngCore;
use strata_core::Scene;
use strata_math::{DVec3, Ray};

/// Generate a camera ray for image-plane coordinates and shift it into
/// octree space.
pub fn camera_ray(scene: &Scene, x: f64, y: f64, rng: &mut dyn RngCore) -> Ray {
    let mut ray = scene.camera.view_ray(x, y, rng);
    let origin = scene.origin();
    ray.origin -= DVec3::new(origin[0] as f64, origin[1] as f64, origin[2] as f64);
    ray
}
