//! Mutable ray state threaded through scene intersection.

use strata_math::{DVec3, Ray, EPSILON};

use crate::palette::AIR_ID;

/// A ray plus everything the tracer learns about its current hit.
///
/// The octree traversal and the BVH both write their closest hit into this
/// struct; [`crate::scene::Scene::intersect`] keeps whichever is nearer. The
/// origin is advanced to the hit point between path segments, while
/// `distance` accumulates the total path length.
#[derive(Debug, Clone)]
pub struct TraceRay {
    pub ray: Ray,

    /// Total distance traveled over all segments.
    pub distance: f64,

    /// Distance from the current origin to the current hit.
    pub t: f64,

    /// Hit normal, oriented against the ray direction.
    pub normal: DVec3,

    /// Texture coordinate at the hit.
    pub u: f64,
    pub v: f64,

    /// Surface color at the hit.
    pub color: DVec3,

    /// Opacity of the surface event (used by the water tint).
    pub opacity: f64,

    /// Palette id of the medium the ray was traveling through.
    pub prev_material: u32,

    /// Palette id of the material at the hit.
    pub current_material: u32,
}

impl TraceRay {
    pub fn new(ray: Ray) -> Self {
        Self {
            ray,
            distance: 0.0,
            t: f64::INFINITY,
            normal: DVec3::Y,
            u: 0.0,
            v: 0.0,
            color: DVec3::ZERO,
            opacity: 0.0,
            prev_material: AIR_ID,
            current_material: AIR_ID,
        }
    }

    /// Reuse this state for a new segment starting at `origin` toward
    /// `direction`, keeping the traveled distance and the current medium.
    pub fn redirect(&mut self, origin: DVec3, direction: DVec3) {
        self.ray = Ray::new(origin, direction.normalize_or_zero());
        self.t = f64::INFINITY;
    }

    /// The hit position for the current segment.
    pub fn hit_position(&self) -> DVec3 {
        self.ray.at(self.t)
    }

    /// Move the origin to the current hit and account the distance.
    pub fn advance(&mut self) {
        self.ray.origin = self.ray.at(self.t);
        self.distance += self.t;
        self.t = f64::INFINITY;
    }

    /// Nudge the origin off the surface along `offset` to avoid
    /// self-intersection on the next segment.
    pub fn nudge(&mut self, offset: DVec3) {
        self.ray.origin += offset * EPSILON;
    }

    /// Flip the normal so it faces the incoming ray.
    pub fn orient_normal(&mut self) {
        if self.normal.dot(self.ray.direction) > 0.0 {
            self.normal = -self.normal;
        }
    }

    /// Record a hit closer than the current one.
    pub fn record_hit(
        &mut self,
        t: f64,
        normal: DVec3,
        u: f64,
        v: f64,
        color: DVec3,
        material: u32,
    ) {
        self.t = t;
        self.normal = normal;
        self.u = u;
        self.v = v;
        self.color = color;
        self.current_material = material;
        self.opacity = 1.0;
    }
}

impl Default for TraceRay {
    fn default() -> Self {
        Self::new(Ray::new(DVec3::ZERO, DVec3::NEG_Z))
    }
}
