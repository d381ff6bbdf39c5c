//! Sun model: direction, radiance, and disk sampling for direct light.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use strata_math::DVec3;

use crate::rng::{build_tangent_basis, gen_f64};

/// Apparent angular radius of the sun disk, in radians.
pub const SUN_RADIUS: f64 = 0.03;

const SUN_RADIUS_COS: f64 = 0.9995500337489875; // cos(SUN_RADIUS)

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Sun {
    /// Horizontal angle, radians; 0 points along +x.
    pub azimuth: f64,
    /// Elevation above the horizon, radians.
    pub altitude: f64,
    pub intensity: f64,
    pub color: [f64; 3],
}

impl Default for Sun {
    fn default() -> Self {
        Self {
            azimuth: std::f64::consts::FRAC_PI_4,
            altitude: std::f64::consts::FRAC_PI_3,
            intensity: 1.25,
            color: [1.0, 0.98, 0.92],
        }
    }
}

impl Sun {
    /// Unit vector from the scene toward the sun.
    pub fn direction(&self) -> DVec3 {
        DVec3::new(
            self.azimuth.cos() * self.altitude.cos(),
            self.altitude.sin(),
            self.azimuth.sin() * self.altitude.cos(),
        )
    }

    pub fn radiance(&self) -> DVec3 {
        DVec3::from(self.color) * self.intensity
    }

    /// Emitted radiance when a sky ray happens to hit the disk directly.
    pub fn disk_radiance(&self, direction: DVec3) -> DVec3 {
        if self.contains(direction) {
            // The disk is much brighter than its averaged direct-light
            // contribution.
            self.radiance() * 10.0
        } else {
            DVec3::ZERO
        }
    }

    /// True if the direction points into the sun disk.
    pub fn contains(&self, direction: DVec3) -> bool {
        direction.dot(self.direction()) >= SUN_RADIUS_COS
    }

    /// Sample a direction toward the sun disk (uniform over the cone).
    pub fn sample_direction(&self, rng: &mut dyn RngCore) -> DVec3 {
        let axis = self.direction();
        let (tangent, bitangent) = build_tangent_basis(axis);

        let cos_max = SUN_RADIUS_COS;
        let cos_theta = 1.0 - gen_f64(rng) * (1.0 - cos_max);
        let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();
        let phi = 2.0 * std::f64::consts::PI * gen_f64(rng);

        (axis * cos_theta
            + tangent * (sin_theta * phi.cos())
            + bitangent * (sin_theta * phi.sin()))
        .normalize()
    }

    pub fn set(&mut self, other: &Sun) {
        *self = other.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_direction_is_unit() {
        let sun = Sun::default();
        assert!((sun.direction().length() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_sampled_directions_stay_in_disk() {
        let sun = Sun::default();
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..500 {
            let d = sun.sample_direction(&mut rng);
            assert!(sun.contains(d), "sample left the sun cone: {d}");
        }
    }

    #[test]
    fn test_disk_radiance_outside_is_zero() {
        let sun = Sun::default();
        assert_eq!(sun.disk_radiance(-sun.direction()), DVec3::ZERO);
        assert!(sun.disk_radiance(sun.direction()).x > 0.0);
    }

    #[test]
    fn test_altitude_zero_is_horizontal() {
        let sun = Sun {
            altitude: 0.0,
            ..Sun::default()
        };
        assert!(sun.direction().y.abs() < 1e-12);
    }
}
