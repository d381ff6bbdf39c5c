use crate::DVec3;

/// Minimum distance between two distinct ray events, in world units.
pub const EPSILON: f64 = 1e-4;

/// A ray in 3D space with origin and direction.
///
/// Rays represent a half-line starting at `origin` and traveling in
/// `direction`. The direction is not required to be normalized; octree
/// traversal normalizes it once on entry.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Ray {
    pub origin: DVec3,
    pub direction: DVec3,
}

impl Ray {
    /// Create a new ray.
    pub fn new(origin: DVec3, direction: DVec3) -> Self {
        Self { origin, direction }
    }

    /// Get the point along the ray at parameter t.
    ///
    /// Returns: origin + t * direction
    #[inline]
    pub fn at(&self, t: f64) -> DVec3 {
        self.origin + self.direction * t
    }

    /// True if the ray is unusable for tracing: zero-length direction or a
    /// non-finite origin.
    pub fn is_degenerate(&self) -> bool {
        self.direction.length_squared() < 1e-24
            || !self.origin.is_finite()
            || !self.direction.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ray_creation() {
        let origin = DVec3::new(1.0, 2.0, 3.0);
        let direction = DVec3::new(0.0, 1.0, 0.0);
        let ray = Ray::new(origin, direction);

        assert_eq!(ray.origin, origin);
        assert_eq!(ray.direction, direction);
    }

    #[test]
    fn test_ray_at() {
        let ray = Ray::new(DVec3::ZERO, DVec3::X);

        assert_eq!(ray.at(0.0), DVec3::ZERO);
        assert_eq!(ray.at(1.0), DVec3::X);
        assert_eq!(ray.at(2.0), DVec3::new(2.0, 0.0, 0.0));
        assert_eq!(ray.at(-1.0), DVec3::new(-1.0, 0.0, 0.0));
    }

    #[test]
    fn test_ray_degenerate() {
        assert!(Ray::new(DVec3::ZERO, DVec3::ZERO).is_degenerate());
        assert!(Ray::new(DVec3::new(f64::NAN, 0.0, 0.0), DVec3::X).is_degenerate());
        assert!(!Ray::new(DVec3::ZERO, DVec3::X).is_degenerate());
    }
}
