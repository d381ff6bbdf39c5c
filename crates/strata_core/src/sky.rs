//! Gradient sky model.

use serde::{Deserialize, Serialize};
use strata_math::DVec3;

use crate::sun::Sun;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Sky {
    /// Overall sky brightness multiplier.
    pub sky_light: f64,
    pub ground_color: [f64; 3],
    pub horizon_color: [f64; 3],
    pub zenith_color: [f64; 3],
    /// Shifts the horizon blend upward, in [0, 1].
    pub horizon_offset: f64,
}

impl Default for Sky {
    fn default() -> Self {
        Self {
            sky_light: 1.0,
            ground_color: [0.15, 0.13, 0.12],
            horizon_color: [1.0, 1.0, 1.0],
            zenith_color: [0.5, 0.7, 1.0],
            horizon_offset: 0.1,
        }
    }
}

impl Sky {
    /// Sky radiance for a ray direction; draws the sun disk when asked.
    pub fn radiance(&self, direction: DVec3, sun: &Sun, draw_sun: bool) -> DVec3 {
        let base = if direction.y < 0.0 {
            DVec3::from(self.ground_color)
        } else {
            // Blend from horizon to zenith with elevation.
            let a = ((direction.y + self.horizon_offset) / (1.0 + self.horizon_offset))
                .clamp(0.0, 1.0);
            DVec3::from(self.horizon_color) * (1.0 - a) + DVec3::from(self.zenith_color) * a
        };
        let mut color = base * self.sky_light;
        if draw_sun {
            color += sun.disk_radiance(direction);
        }
        color
    }

    pub fn set(&mut self, other: &Sky) {
        *self = other.clone();
    }
}
