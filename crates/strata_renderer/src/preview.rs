//! One-bounce preview tracer for live feedback.

use strata_core::{Scene, TraceRay, AIR_ID, WATER_ID};
use strata_math::{DVec3, Ray};

/// Shade a preview ray: surface color modulated by sun-facing, or sky.
pub fn trace_preview(scene: &Scene, ray: Ray) -> DVec3 {
    let mut tr = TraceRay::new(ray);
    if tr.ray.is_degenerate() {
        return DVec3::ZERO;
    }
    tr.current_material = if scene.is_in_water(tr.ray.origin) {
        WATER_ID
    } else {
        AIR_ID
    };

    if scene.intersect(&mut tr) {
        let sun_dir = scene.sun.direction();
        let facing = tr.normal.dot(sun_dir).max(0.0);
        tr.color * (0.25 + 0.75 * facing)
    } else {
        scene
            .sky
            .radiance(tr.ray.direction, &scene.sun, scene.sun_enabled)
    }
}

/// Sky occlusion for the alpha channel: 1.0 where geometry blocks the sky.
pub fn sky_occlusion(scene: &Scene, ray: Ray) -> f64 {
    let mut tr = TraceRay::new(ray);
    if tr.ray.is_degenerate() {
        return 0.0;
    }
    tr.current_material = if scene.is_in_water(tr.ray.origin) {
        WATER_ID
    } else {
        AIR_ID
    };
    if scene.intersect(&mut tr) {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::material::Material;
    use strata_core::{Implementation, Octree, Palette, Region};

    fn floor_scene() -> Scene {
        let mut scene = Scene::new("preview");
        let mut palette = Palette::new();
        let stone = palette.push(Material::block("stone", DVec3::splat(0.8)));
        let mut solid = Octree::new(Implementation::Packed, 4);
        let water = Octree::new(Implementation::Packed, 4);
        for x in 0..16 {
            for z in 0..16 {
                solid.set(stone, x, 0, z).unwrap();
            }
        }
        scene.set_geometry(
            palette,
            solid,
            water,
            [0; 3],
            Some(Region::new([0, 0, 0], [16, 16, 16])),
        );
        scene
    }

    #[test]
    fn test_hit_shades_with_sun_factor() {
        let scene = floor_scene();
        let ray = Ray::new(DVec3::new(8.0, 4.0, 8.0), DVec3::new(0.0, -1.0, 0.0));
        let color = trace_preview(&scene, ray);
        // Between ambient floor (0.25) and full sun times albedo.
        assert!(color.x >= 0.25 * 0.8 - 1e-9);
        assert!(color.x <= 0.8 + 1e-9);
    }

    #[test]
    fn test_miss_returns_sky() {
        let scene = floor_scene();
        let ray = Ray::new(DVec3::new(8.0, 4.0, 8.0), DVec3::Y);
        let sky = scene.sky.radiance(DVec3::Y, &scene.sun, true);
        assert_eq!(trace_preview(&scene, ray), sky);
    }

    #[test]
    fn test_sky_occlusion() {
        let scene = floor_scene();
        let down = Ray::new(DVec3::new(8.0, 4.0, 8.0), DVec3::new(0.0, -1.0, 0.0));
        let up = Ray::new(DVec3::new(8.0, 4.0, 8.0), DVec3::Y);
        assert_eq!(sky_occlusion(&scene, down), 1.0);
        assert_eq!(sky_occlusion(&scene, up), 0.0);
    }
}
