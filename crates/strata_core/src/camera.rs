//! Camera and view-ray projections.
//!
//! The camera owns plain value state only; scene refresh happens at the
//! mutation boundary in [`crate::scene::Scene`], not through parent
//! back-references.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use strata_math::{DMat3, DVec3, Ray};

use crate::rng::random_in_unit_disk;

/// How image-plane coordinates map to view rays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectionMode {
    Pinhole,
    ThinLens,
    Fisheye,
    Panoramic,
    Stereoscopic,
}

/// Pinhole/thin-lens camera with orientation given by yaw, pitch, roll.
///
/// View-ray coordinates follow the canvas convention: `x` ranges over
/// `[-halfWidth, halfWidth]` (halfWidth = width / (2 * height)) and `y`
/// over `[-0.5, 0.5]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub position: DVec3,
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
    /// Vertical field of view in degrees.
    pub fov: f64,
    /// Depth of field; infinity means a pinhole aperture.
    pub dof: f64,
    /// Distance to the plane of perfect focus.
    pub subject_distance: f64,
    pub projection: ProjectionMode,

    /// Cached rotation, rebuilt by `update_transform`.
    transform: DMat3,
}

impl Default for Camera {
    fn default() -> Self {
        Self::new()
    }
}

impl Camera {
    pub fn new() -> Self {
        let mut camera = Self {
            position: DVec3::new(0.0, 128.0, 0.0),
            yaw: 0.0,
            pitch: -std::f64::consts::FRAC_PI_2,
            roll: 0.0,
            fov: 70.0,
            dof: f64::INFINITY,
            subject_distance: 2.0,
            projection: ProjectionMode::Pinhole,
            transform: DMat3::IDENTITY,
        };
        camera.update_transform();
        camera
    }

    /// Rebuild the cached rotation matrix. Must be called after mutating
    /// yaw/pitch/roll directly.
    ///
    /// View space looks along +z; pitch 0 is horizontal, positive pitch
    /// looks up, yaw rotates about the world up axis.
    pub fn update_transform(&mut self) {
        let roll = DMat3::from_rotation_z(self.roll);
        let pitch = DMat3::from_rotation_x(-self.pitch);
        let yaw = DMat3::from_rotation_y(self.yaw);
        self.transform = yaw * pitch * roll;
    }

    pub fn set_view(&mut self, yaw: f64, pitch: f64, roll: f64) {
        self.yaw = yaw;
        self.pitch = pitch;
        self.roll = roll;
        self.update_transform();
    }

    pub fn set_fov(&mut self, fov: f64) {
        self.fov = fov.clamp(1.0, 179.0);
    }

    /// Enable depth of field; pinhole when `dof` is infinite.
    pub fn set_dof(&mut self, dof: f64) {
        self.dof = dof.max(0.0);
    }

    pub fn set_subject_distance(&mut self, distance: f64) {
        self.subject_distance = distance.max(1e-3);
    }

    fn aperture_radius(&self) -> f64 {
        if self.dof.is_infinite() || self.dof <= 0.0 {
            0.0
        } else {
            (self.subject_distance / self.dof).max(0.0)
        }
    }

    /// Generate the view ray for image-plane point (x, y).
    ///
    /// The RNG drives aperture sampling; pinhole projections ignore it.
    pub fn view_ray(&self, x: f64, y: f64, rng: &mut dyn RngCore) -> Ray {
        let fov_tan = (0.5 * self.fov.to_radians()).tan();

        let (mut origin, mut direction) = match self.projection {
            ProjectionMode::Pinhole => (DVec3::ZERO, DVec3::new(fov_tan * x, fov_tan * y, 1.0)),
            ProjectionMode::ThinLens => {
                let target = DVec3::new(fov_tan * x, fov_tan * y, 1.0) * self.subject_distance;
                let aperture = self.aperture_radius() * random_in_unit_disk(rng);
                (aperture, target - aperture)
            }
            ProjectionMode::Fisheye => {
                // Angular fisheye: radius on the image plane is the angle
                // from the view axis.
                let ang_x = x * self.fov.to_radians();
                let ang_y = y * self.fov.to_radians();
                let r = (ang_x * ang_x + ang_y * ang_y).sqrt();
                if r > std::f64::consts::PI {
                    // Outside the projection disk.
                    (DVec3::ZERO, DVec3::ZERO)
                } else if r < 1e-12 {
                    (DVec3::ZERO, DVec3::Z)
                } else {
                    let (sin_r, cos_r) = r.sin_cos();
                    (
                        DVec3::ZERO,
                        DVec3::new(ang_x / r * sin_r, ang_y / r * sin_r, cos_r),
                    )
                }
            }
            ProjectionMode::Panoramic => {
                // Equirectangular: x is longitude, y is latitude.
                let theta = x * self.fov.to_radians();
                let phi = (y * self.fov.to_radians()).clamp(
                    -std::f64::consts::FRAC_PI_2,
                    std::f64::consts::FRAC_PI_2,
                );
                (
                    DVec3::ZERO,
                    DVec3::new(
                        theta.sin() * phi.cos(),
                        phi.sin(),
                        theta.cos() * phi.cos(),
                    ),
                )
            }
            ProjectionMode::Stereoscopic => {
                // Top-bottom omni-directional stereo: the upper half of the
                // canvas is the left eye, the lower half the right eye.
                let eye = if y < 0.0 { -1.0 } else { 1.0 };
                let y2 = y * 2.0 - eye * 0.5;
                let theta = x * 2.0 * std::f64::consts::PI;
                let phi = (y2 * std::f64::consts::PI).clamp(
                    -std::f64::consts::FRAC_PI_2,
                    std::f64::consts::FRAC_PI_2,
                );
                let dir = DVec3::new(
                    theta.sin() * phi.cos(),
                    phi.sin(),
                    theta.cos() * phi.cos(),
                );
                // Half interpupillary offset along the view tangent.
                let offset = DVec3::new(theta.cos(), 0.0, -theta.sin()) * (eye * 0.032);
                (offset, dir)
            }
        };

        if direction == DVec3::ZERO {
            // Degenerate projection sample; the tracer discards it.
            return Ray::new(self.position, DVec3::ZERO);
        }

        direction = self.transform * direction;
        origin = self.transform * origin + self.position;
        Ray::new(origin, direction.normalize())
    }

    /// Copy render-affecting state from another camera.
    pub fn set(&mut self, other: &Camera) {
        *self = other.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn forward_camera() -> Camera {
        let mut camera = Camera::new();
        camera.position = DVec3::ZERO;
        camera.set_view(0.0, -std::f64::consts::FRAC_PI_2, 0.0);
        camera
    }

    #[test]
    fn test_center_ray_is_forward() {
        let camera = forward_camera();
        let mut rng = StdRng::seed_from_u64(42);
        let ray = camera.view_ray(0.0, 0.0, &mut rng);
        // The default orientation looks along -y (straight down).
        assert!((ray.direction.length() - 1.0).abs() < 1e-9);
        assert!(ray.direction.y < -0.99, "direction = {}", ray.direction);
    }

    #[test]
    fn test_off_axis_ray_deviates() {
        let camera = forward_camera();
        let mut rng = StdRng::seed_from_u64(42);
        let center = camera.view_ray(0.0, 0.0, &mut rng);
        let off = camera.view_ray(0.4, 0.0, &mut rng);
        assert!(center.direction.dot(off.direction) < 0.9999);
    }

    #[test]
    fn test_pinhole_is_deterministic() {
        let camera = forward_camera();
        let mut rng_a = StdRng::seed_from_u64(1);
        let mut rng_b = StdRng::seed_from_u64(2);
        let a = camera.view_ray(0.2, -0.1, &mut rng_a);
        let b = camera.view_ray(0.2, -0.1, &mut rng_b);
        assert_eq!(a, b);
    }

    #[test]
    fn test_thin_lens_jitters_origin() {
        let mut camera = forward_camera();
        camera.projection = ProjectionMode::ThinLens;
        camera.set_dof(5.0);
        camera.set_subject_distance(10.0);
        let mut rng = StdRng::seed_from_u64(3);
        let a = camera.view_ray(0.0, 0.0, &mut rng);
        let b = camera.view_ray(0.0, 0.0, &mut rng);
        assert_ne!(a.origin, b.origin);
    }

    #[test]
    fn test_panoramic_wraps() {
        let mut camera = forward_camera();
        camera.projection = ProjectionMode::Panoramic;
        camera.set_fov(179.0);
        let mut rng = StdRng::seed_from_u64(4);
        let left = camera.view_ray(-0.5, 0.0, &mut rng);
        let right = camera.view_ray(0.5, 0.0, &mut rng);
        // Opposite longitudes point roughly opposite ways.
        assert!(left.direction.dot(right.direction) < 0.0);
    }
}
