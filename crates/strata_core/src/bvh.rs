//! Bounding Volume Hierarchy over mesh-entity primitives.
//!
//! Binary tree of AABBs, built once at scene load with a surface-area
//! weighted midpoint split. Queries visit children ordered by ray entry
//! time and prune against the current best hit.

use strata_math::{Aabb, Interval, EPSILON};

use crate::palette::Palette;
use crate::primitive::{Primitive, PrimitiveHit};
use crate::ray::TraceRay;

/// Maximum primitives per leaf node before splitting.
const LEAF_MAX_SIZE: usize = 4;

enum BvhNode {
    Branch {
        left: Box<BvhNode>,
        right: Box<BvhNode>,
        bbox: Aabb,
    },
    Leaf {
        primitives: Vec<Primitive>,
        bbox: Aabb,
    },
    Empty,
}

pub struct Bvh {
    root: BvhNode,
}

impl Default for Bvh {
    fn default() -> Self {
        Self::empty()
    }
}

impl Bvh {
    pub fn empty() -> Self {
        Self {
            root: BvhNode::Empty,
        }
    }

    /// Build a BVH from a list of primitives.
    pub fn new(primitives: Vec<Primitive>) -> Self {
        if primitives.is_empty() {
            return Self::empty();
        }
        Self {
            root: Self::build(primitives),
        }
    }

    fn build(mut primitives: Vec<Primitive>) -> BvhNode {
        let bounds = primitives
            .iter()
            .map(Primitive::bounding_box)
            .fold(Aabb::EMPTY, |acc, b| Aabb::surrounding(&acc, &b));

        if primitives.len() <= LEAF_MAX_SIZE {
            return BvhNode::Leaf {
                primitives,
                bbox: bounds,
            };
        }

        let centroid_bounds = primitives
            .iter()
            .map(|p| p.bounding_box().centroid())
            .fold(Aabb::EMPTY, |acc, c| {
                Aabb::surrounding(&acc, &Aabb::from_points(c, c))
            });
        let axis = centroid_bounds.longest_axis();
        let mid = centroid_bounds.axis_interval(axis);

        // Surface-area weighted midpoint: bias the split plane toward the
        // heavier half of the centroid distribution.
        let weight: f64 = {
            let mut total = 0.0;
            let mut weighted = 0.0;
            for p in &primitives {
                let b = p.bounding_box();
                total += b.surface_area();
                weighted += b.surface_area() * b.centroid()[axis];
            }
            if total > 0.0 {
                weighted / total
            } else {
                (mid.min + mid.max) * 0.5
            }
        };
        let split = 0.5 * (weight + (mid.min + mid.max) * 0.5);

        let (left, right): (Vec<_>, Vec<_>) = primitives
            .drain(..)
            .partition(|p| p.bounding_box().centroid()[axis] < split);

        // Degenerate split (all centroids on one side): fall back to a
        // median split so recursion always terminates.
        let (left, right) = if left.is_empty() || right.is_empty() {
            let mut all: Vec<_> = left.into_iter().chain(right).collect();
            all.sort_unstable_by(|a, b| {
                let ka = a.bounding_box().centroid()[axis];
                let kb = b.bounding_box().centroid()[axis];
                ka.partial_cmp(&kb).unwrap_or(std::cmp::Ordering::Equal)
            });
            let half = all.len() / 2;
            let right = all.split_off(half);
            (all, right)
        } else {
            (left, right)
        };

        BvhNode::Branch {
            left: Box::new(Self::build(left)),
            right: Box::new(Self::build(right)),
            bbox: bounds,
        }
    }

    /// Find the closest primitive intersection nearer than the ray's
    /// current hit, writing it into the trace state.
    pub fn closest_intersection(&self, tr: &mut TraceRay, palette: &Palette) -> bool {
        let mut best = tr.t;
        let hit = Self::intersect_node(&self.root, tr, &mut best);
        if let Some(hit) = hit {
            let material = palette.get(hit.material);
            let color = material.color_at(hit.u, hit.v);
            tr.record_hit(hit.t, hit.normal, hit.u, hit.v, color, hit.material);
            tr.orient_normal();
            true
        } else {
            false
        }
    }

    fn intersect_node(node: &BvhNode, tr: &TraceRay, best: &mut f64) -> Option<PrimitiveHit> {
        match node {
            BvhNode::Empty => None,
            BvhNode::Leaf { primitives, bbox } => {
                bbox.hit(&tr.ray, Interval::new(EPSILON, *best))?;
                let mut closest = None;
                for prim in primitives {
                    if let Some(hit) = prim.intersect(&tr.ray, EPSILON, *best) {
                        *best = hit.t;
                        closest = Some(hit);
                    }
                }
                closest
            }
            BvhNode::Branch { left, right, bbox } => {
                bbox.hit(&tr.ray, Interval::new(EPSILON, *best))?;

                // Visit the nearer child first so the far child can be
                // pruned by the tightened interval.
                let t_left = Self::node_entry(left, tr, *best);
                let t_right = Self::node_entry(right, tr, *best);
                let (first, second, t_second) = if t_left <= t_right {
                    (left, right, t_right)
                } else {
                    (right, left, t_left)
                };

                let mut closest = Self::intersect_node(first, tr, best);
                if t_second < *best {
                    if let Some(hit) = Self::intersect_node(second, tr, best) {
                        closest = Some(hit);
                    }
                }
                closest
            }
        }
    }

    fn node_entry(node: &BvhNode, tr: &TraceRay, best: f64) -> f64 {
        let bbox = match node {
            BvhNode::Empty => return f64::INFINITY,
            BvhNode::Leaf { bbox, .. } => bbox,
            BvhNode::Branch { bbox, .. } => bbox,
        };
        bbox.hit(&tr.ray, Interval::new(EPSILON, best))
            .unwrap_or(f64::INFINITY)
    }

    /// Closest hit over a plain linear scan; test oracle for the tree.
    pub fn brute_force(primitives: &[Primitive], tr: &TraceRay) -> Option<PrimitiveHit> {
        let mut best = tr.t;
        let mut closest = None;
        for prim in primitives {
            if let Some(hit) = prim.intersect(&tr.ray, EPSILON, best) {
                best = hit.t;
                closest = Some(hit);
            }
        }
        closest
    }

    /// Occlusion query: is anything within `distance` along the ray?
    pub fn occluded(&self, tr: &TraceRay, distance: f64) -> bool {
        let mut best = distance;
        Self::intersect_node(&self.root, tr, &mut best).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitive::Triangle;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use strata_math::{DVec3, Ray};

    fn random_triangles(rng: &mut StdRng, n: usize) -> Vec<Primitive> {
        (0..n)
            .map(|i| {
                let base = DVec3::new(
                    rng.gen_range(-10.0..10.0),
                    rng.gen_range(-10.0..10.0),
                    rng.gen_range(-10.0..10.0),
                );
                let e1 = DVec3::new(rng.gen_range(0.1..1.5), rng.gen_range(-0.5..0.5), 0.0);
                let e2 = DVec3::new(0.0, rng.gen_range(0.1..1.5), rng.gen_range(-0.5..0.5));
                Primitive::Triangle(Triangle::new(base, base + e1, base + e2, i as u32))
            })
            .collect()
    }

    #[test]
    fn test_bvh_empty() {
        let bvh = Bvh::new(vec![]);
        let palette = Palette::new();
        let mut tr = TraceRay::new(Ray::new(DVec3::ZERO, DVec3::X));
        assert!(!bvh.closest_intersection(&mut tr, &palette));
    }

    #[test]
    fn test_bvh_single_triangle() {
        let tri = Primitive::Triangle(Triangle::new(
            DVec3::new(-1.0, -1.0, -1.0),
            DVec3::new(1.0, -1.0, -1.0),
            DVec3::new(0.0, 1.0, -1.0),
            0,
        ));
        let bvh = Bvh::new(vec![tri]);
        let palette = Palette::new();

        let mut tr = TraceRay::new(Ray::new(DVec3::ZERO, DVec3::new(0.0, 0.0, -1.0)));
        assert!(bvh.closest_intersection(&mut tr, &palette));
        assert!((tr.t - 1.0).abs() < 1e-9);
        // Normal faces the incoming ray.
        assert!(tr.normal.dot(tr.ray.direction) < 0.0);
    }

    #[test]
    fn test_bvh_agrees_with_brute_force() {
        let mut rng = StdRng::seed_from_u64(7);
        let primitives = random_triangles(&mut rng, 200);
        let bvh = Bvh::new(primitives.clone());
        let palette = Palette::new();

        for _ in 0..500 {
            let origin = DVec3::new(
                rng.gen_range(-15.0..15.0),
                rng.gen_range(-15.0..15.0),
                rng.gen_range(-15.0..15.0),
            );
            let dir = DVec3::new(
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
            );
            if dir.length_squared() < 1e-6 {
                continue;
            }
            let ray = Ray::new(origin, dir.normalize());

            let mut tr = TraceRay::new(ray);
            let tree_hit = bvh.closest_intersection(&mut tr, &palette);
            let brute = Bvh::brute_force(&primitives, &TraceRay::new(ray));

            assert_eq!(tree_hit, brute.is_some());
            if let Some(brute) = brute {
                assert!(
                    (tr.t - brute.t).abs() < 1e-6,
                    "tree t {} vs brute t {}",
                    tr.t,
                    brute.t
                );
                assert_eq!(tr.current_material, brute.material);
            }
        }
    }

    #[test]
    fn test_bvh_prunes_to_closest() {
        // Two triangles stacked along -z; only the nearer one must win.
        let near = Primitive::Triangle(Triangle::new(
            DVec3::new(-1.0, -1.0, -1.0),
            DVec3::new(1.0, -1.0, -1.0),
            DVec3::new(0.0, 1.0, -1.0),
            1,
        ));
        let far = Primitive::Triangle(Triangle::new(
            DVec3::new(-1.0, -1.0, -2.0),
            DVec3::new(1.0, -1.0, -2.0),
            DVec3::new(0.0, 1.0, -2.0),
            2,
        ));
        let bvh = Bvh::new(vec![far, near]);
        let palette = Palette::new();

        let mut tr = TraceRay::new(Ray::new(DVec3::ZERO, DVec3::new(0.0, 0.0, -1.0)));
        assert!(bvh.closest_intersection(&mut tr, &palette));
        assert_eq!(tr.current_material, 1);
    }

    #[test]
    fn test_bvh_occlusion() {
        let tri = Primitive::Triangle(Triangle::new(
            DVec3::new(-1.0, -1.0, -1.0),
            DVec3::new(1.0, -1.0, -1.0),
            DVec3::new(0.0, 1.0, -1.0),
            0,
        ));
        let bvh = Bvh::new(vec![tri]);
        let tr = TraceRay::new(Ray::new(DVec3::ZERO, DVec3::new(0.0, 0.0, -1.0)));
        assert!(bvh.occluded(&tr, 2.0));
        assert!(!bvh.occluded(&tr, 0.5));
    }
}
