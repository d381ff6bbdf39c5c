//! Geometric primitives for mesh entities.
//!
//! Uses the Möller-Trumbore algorithm for ray-triangle intersection. The
//! tracer only needs intersection and bounds, so primitives are a closed
//! enum rather than trait objects.

use strata_math::{Aabb, DVec2, DVec3, Ray};

/// Result of a primitive intersection.
#[derive(Debug, Clone, Copy)]
pub struct PrimitiveHit {
    pub t: f64,
    pub normal: DVec3,
    pub u: f64,
    pub v: f64,
    pub material: u32,
}

#[derive(Debug, Clone)]
pub enum Primitive {
    Triangle(Triangle),
    Quad(Quad),
}

impl Primitive {
    pub fn intersect(&self, ray: &Ray, t_min: f64, t_max: f64) -> Option<PrimitiveHit> {
        match self {
            Primitive::Triangle(t) => t.intersect(ray, t_min, t_max),
            Primitive::Quad(q) => q.intersect(ray, t_min, t_max),
        }
    }

    pub fn bounding_box(&self) -> Aabb {
        match self {
            Primitive::Triangle(t) => t.bbox,
            Primitive::Quad(q) => q.bbox,
        }
    }

    pub fn material(&self) -> u32 {
        match self {
            Primitive::Triangle(t) => t.material,
            Primitive::Quad(q) => q.material,
        }
    }
}

/// A triangle with per-vertex texture coordinates.
#[derive(Debug, Clone)]
pub struct Triangle {
    v0: DVec3,
    v1: DVec3,
    v2: DVec3,
    /// Pre-computed face normal (unit length).
    normal: DVec3,
    uv0: DVec2,
    uv1: DVec2,
    uv2: DVec2,
    pub material: u32,
    bbox: Aabb,
}

impl Triangle {
    pub fn new(v0: DVec3, v1: DVec3, v2: DVec3, material: u32) -> Self {
        Self::with_uvs(
            v0,
            v1,
            v2,
            DVec2::ZERO,
            DVec2::X,
            DVec2::Y,
            material,
        )
    }

    pub fn with_uvs(
        v0: DVec3,
        v1: DVec3,
        v2: DVec3,
        uv0: DVec2,
        uv1: DVec2,
        uv2: DVec2,
        material: u32,
    ) -> Self {
        let edge1 = v1 - v0;
        let edge2 = v2 - v0;
        let normal = edge1.cross(edge2).normalize_or_zero();

        let min = v0.min(v1).min(v2);
        let max = v0.max(v1).max(v2);
        let bbox = Aabb::from_points(min, max);

        Self {
            v0,
            v1,
            v2,
            normal,
            uv0,
            uv1,
            uv2,
            material,
            bbox,
        }
    }

    /// Möller-Trumbore ray-triangle intersection.
    pub fn intersect(&self, ray: &Ray, t_min: f64, t_max: f64) -> Option<PrimitiveHit> {
        let edge1 = self.v1 - self.v0;
        let edge2 = self.v2 - self.v0;

        let h = ray.direction.cross(edge2);
        let a = edge1.dot(h);

        // Ray is parallel to the triangle plane.
        if a.abs() < 1e-12 {
            return None;
        }

        let f = 1.0 / a;
        let s = ray.origin - self.v0;
        let u = f * s.dot(h);
        if !(0.0..=1.0).contains(&u) {
            return None;
        }

        let q = s.cross(edge1);
        let v = f * ray.direction.dot(q);
        if v < 0.0 || u + v > 1.0 {
            return None;
        }

        let t = f * edge2.dot(q);
        if t < t_min || t > t_max {
            return None;
        }

        let uv = self.uv0 * (1.0 - u - v) + self.uv1 * u + self.uv2 * v;
        Some(PrimitiveHit {
            t,
            normal: self.normal,
            u: uv.x,
            v: uv.y,
            material: self.material,
        })
    }
}

/// A parallelogram patch spanned by two edges.
#[derive(Debug, Clone)]
pub struct Quad {
    origin: DVec3,
    edge_u: DVec3,
    edge_v: DVec3,
    normal: DVec3,
    /// 1 / (n . n) before normalization, used to project hit coordinates.
    w: DVec3,
    pub material: u32,
    bbox: Aabb,
}

impl Quad {
    pub fn new(origin: DVec3, edge_u: DVec3, edge_v: DVec3, material: u32) -> Self {
        let n = edge_u.cross(edge_v);
        let normal = n.normalize_or_zero();
        let w = n / n.dot(n).max(1e-12);

        let corners = [
            origin,
            origin + edge_u,
            origin + edge_v,
            origin + edge_u + edge_v,
        ];
        let mut min = corners[0];
        let mut max = corners[0];
        for c in &corners[1..] {
            min = min.min(*c);
            max = max.max(*c);
        }

        Self {
            origin,
            edge_u,
            edge_v,
            normal,
            w,
            material,
            bbox: Aabb::from_points(min, max),
        }
    }

    pub fn intersect(&self, ray: &Ray, t_min: f64, t_max: f64) -> Option<PrimitiveHit> {
        let denom = self.normal.dot(ray.direction);
        if denom.abs() < 1e-12 {
            return None;
        }
        let t = self.normal.dot(self.origin - ray.origin) / denom;
        if t < t_min || t > t_max {
            return None;
        }

        let p = ray.at(t) - self.origin;
        let u = self.w.dot(p.cross(self.edge_v));
        let v = self.w.dot(self.edge_u.cross(p));
        if !(0.0..=1.0).contains(&u) || !(0.0..=1.0).contains(&v) {
            return None;
        }

        Some(PrimitiveHit {
            t,
            normal: self.normal,
            u,
            v,
            material: self.material,
        })
    }
}
