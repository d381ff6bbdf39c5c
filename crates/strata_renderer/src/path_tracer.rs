//! Path-tracing integrator.
//!
//! For each pixel sample: generate a primary ray through the camera
//! projection, then bounce through the scene accumulating radiance until
//! the path escapes to the sky, is absorbed, or Russian roulette ends it.

use rand::RngCore;
use strata_core::rng::{
    cosine_weighted_hemisphere, gen_f64, random_unit_vector, reflect, refract,
    schlick_reflectance,
};
use strata_core::{EmitterSamplingStrategy, Scene, TraceRay, AIR_ID, WATER_ID};
use strata_math::{DVec3, Ray, EPSILON};

/// Absolute bounce cap, above the Russian-roulette depth.
const MAX_BOUNCES: u32 = 96;

/// Isotropic phase function.
const PHASE_ISO: f64 = 1.0 / (4.0 * std::f64::consts::PI);

/// Trace one full path and return its radiance estimate.
///
/// Total for any input: degenerate rays return zero (consuming the sample),
/// and any traversal failure falls back to a sky sample.
pub fn trace_path(scene: &Scene, ray: Ray, rng: &mut dyn RngCore) -> DVec3 {
    let mut tr = TraceRay::new(ray);
    if tr.ray.is_degenerate() {
        return DVec3::ZERO;
    }
    tr.current_material = if scene.is_in_water(tr.ray.origin) {
        WATER_ID
    } else {
        AIR_ID
    };

    let mut radiance = DVec3::ZERO;
    let mut throughput = DVec3::ONE;
    // Emitter hits count only after specular-like events when next-event
    // estimation covers the diffuse paths.
    let mut count_emission = true;

    for depth in 0..MAX_BOUNCES {
        let in_water = scene.palette().get(tr.current_material).water;
        let segment_start = tr.distance;
        let hit = scene.intersect(&mut tr);
        let segment = tr.distance - segment_start;

        if in_water && hit {
            throughput *= water_attenuation(scene, segment);
        }

        // Volumetric fog along finite segments; misses get the sky fog
        // blend instead.
        if scene.fog_enabled() && !in_water && hit {
            if let Some(scatter) = fog_event(scene, &tr, segment, throughput, rng) {
                radiance += scatter;
                if !scene.fast_fog {
                    // True scattering: redirect the path at the scatter
                    // point instead of continuing to the surface.
                    let dir = random_unit_vector(rng);
                    tr.redirect(tr.ray.origin, dir);
                    continue;
                }
            }
        }

        if !hit {
            radiance += throughput * sky_radiance(scene, tr.ray.direction);
            break;
        }

        let material = scene.palette().get(tr.current_material).clone();

        if material.is_emitter() && scene.emitters_enabled && count_emission {
            radiance += throughput
                * tr.color
                * material.emittance as f64
                * scene.emitter_intensity;
        }

        // Transparent boundary (water surface, glass, or exiting water
        // into air): Fresnel-select reflection or transmission.
        let boundary_ior = transparent_boundary(scene, &tr, &material);
        if let Some((n1, n2)) = boundary_ior {
            let entered = refract_event(&mut tr, n1, n2, rng);
            if !entered {
                // Reflected: stay in the previous medium.
                tr.current_material = tr.prev_material;
            }
            count_emission = true;
            if russian_roulette(scene, depth, &mut throughput, rng) {
                break;
            }
            continue;
        }

        // Opaque surface: choose specular or diffuse by the material's
        // specular coefficient.
        let specular = material.specular as f64;
        if specular > 0.0 && gen_f64(rng) < specular {
            let mut dir = reflect(tr.ray.direction, tr.normal);
            if material.roughness > 0.0 {
                dir = (dir + material.roughness as f64 * random_unit_vector(rng))
                    .normalize_or_zero();
            }
            if dir.dot(tr.normal) <= 0.0 || dir == DVec3::ZERO {
                break; // Absorbed into the surface.
            }
            throughput *= tr.color;
            tr.nudge(tr.normal);
            tr.redirect(tr.ray.origin, dir);
            tr.current_material = tr.prev_material;
            count_emission = true;
        } else {
            throughput *= tr.color;

            radiance += throughput * direct_sun(scene, &tr, rng);
            if scene.emitters_enabled
                && scene.emitter_sampling != EmitterSamplingStrategy::None
            {
                radiance += throughput * direct_emitters(scene, &tr, rng);
                count_emission = false;
            } else {
                count_emission = true;
            }

            let dir = cosine_weighted_hemisphere(tr.normal, rng);
            tr.nudge(tr.normal);
            tr.redirect(tr.ray.origin, dir);
            tr.current_material = tr.prev_material;
        }

        if russian_roulette(scene, depth, &mut throughput, rng) {
            break;
        }
    }

    radiance
}

/// Sky radiance with the horizon fog blend applied.
fn sky_radiance(scene: &Scene, direction: DVec3) -> DVec3 {
    let sky = scene
        .sky
        .radiance(direction, &scene.sun, scene.sun_enabled);
    if !scene.fog_enabled() {
        return sky;
    }
    let fog = (scene.sky_fog_density * (1.0 - direction.y.max(0.0))).clamp(0.0, 1.0);
    sky * (1.0 - fog) + scene.fog_color * fog
}

/// Beer-Lambert attenuation through water over a path segment.
fn water_attenuation(scene: &Scene, segment: f64) -> DVec3 {
    let color = scene.water_color;
    (-scene.water_opacity * segment * color).exp()
}

/// Sample a fog free-flight distance; when it lands inside the segment,
/// return the single-scatter inscatter estimate.
fn fog_event(
    scene: &Scene,
    tr: &TraceRay,
    segment: f64,
    throughput: DVec3,
    rng: &mut dyn RngCore,
) -> Option<DVec3> {
    let xi = gen_f64(rng).max(1e-12);
    let s = -xi.ln() / scene.fog_density;
    if s >= segment {
        return None;
    }

    // Scatter point along the segment; the ray origin already advanced to
    // the hit, so step back.
    let scatter_origin = tr.ray.origin - tr.ray.direction * (segment - s);

    // Direct sun estimate at the scatter point.
    let mut inscatter = DVec3::ZERO;
    if scene.sun_enabled {
        let sun_dir = scene.sun.sample_direction(rng);
        if !occluded(scene, scatter_origin, sun_dir, f64::MAX) {
            inscatter = scene.sun.radiance() * PHASE_ISO;
        }
    }
    Some(throughput * scene.fog_color * inscatter)
}

/// Transparent boundary relative IORs, or None for opaque interactions.
fn transparent_boundary(
    scene: &Scene,
    tr: &TraceRay,
    material: &strata_core::Material,
) -> Option<(f64, f64)> {
    let prev = scene.palette().get(tr.prev_material);
    if material.water {
        // Entering water.
        return Some((prev.ior as f64, material.ior as f64));
    }
    if tr.current_material == AIR_ID && prev.water {
        // Leaving water into air.
        return Some((prev.ior as f64, 1.0));
    }
    if !material.opaque && material.ior as f64 != 1.0 && !material.water {
        return Some((prev.ior as f64, material.ior as f64));
    }
    None
}

/// Fresnel-select reflection or refraction at a boundary. Returns true if
/// the ray was transmitted into the new medium.
fn refract_event(tr: &mut TraceRay, n1: f64, n2: f64, rng: &mut dyn RngCore) -> bool {
    let ratio = n1 / n2;
    let unit = tr.ray.direction;
    let cos_theta = (-unit).dot(tr.normal).min(1.0);

    let reflectance = schlick_reflectance(cos_theta, ratio);
    let refracted = refract(unit, tr.normal, ratio);

    match refracted {
        Some(transmitted) if gen_f64(rng) >= reflectance => {
            tr.nudge(-tr.normal);
            tr.redirect(tr.ray.origin, transmitted);
            true
        }
        _ => {
            let reflected = reflect(unit, tr.normal);
            tr.nudge(tr.normal);
            tr.redirect(tr.ray.origin, reflected);
            false
        }
    }
}

/// Direct light from the sun disk (next-event estimation).
fn direct_sun(scene: &Scene, tr: &TraceRay, rng: &mut dyn RngCore) -> DVec3 {
    if !scene.sun_enabled {
        return DVec3::ZERO;
    }
    let dir = scene.sun.sample_direction(rng);
    let cos = dir.dot(tr.normal);
    if cos <= 0.0 {
        return DVec3::ZERO;
    }
    let origin = tr.ray.origin + tr.normal * EPSILON;
    if occluded(scene, origin, dir, f64::MAX) {
        return DVec3::ZERO;
    }
    scene.sun.radiance() * cos
}

/// Direct light from gridded emitters.
fn direct_emitters(scene: &Scene, tr: &TraceRay, rng: &mut dyn RngCore) -> DVec3 {
    let Some(grid) = scene.emitter_grid() else {
        return DVec3::ZERO;
    };
    let origin = tr.ray.origin + tr.normal * EPSILON;

    let estimate = |target: DVec3| -> DVec3 {
        let offset = target - origin;
        let dist2 = offset.length_squared();
        if dist2 < EPSILON {
            return DVec3::ZERO;
        }
        let dist = dist2.sqrt();
        let dir = offset / dist;
        let cos = dir.dot(tr.normal);
        if cos <= 0.0 {
            return DVec3::ZERO;
        }
        if occluded(scene, origin, dir, dist - 0.6) {
            return DVec3::ZERO;
        }
        let p = target.floor();
        let ty = scene
            .solid_octree()
            .get_type(p.x as i32, p.y as i32, p.z as i32);
        let material = scene.palette().get(ty);
        if !material.is_emitter() {
            return DVec3::ZERO;
        }
        material.base_color * material.emittance as f64 * scene.emitter_intensity * cos
            / dist2.max(1.0)
    };

    match scene.emitter_sampling {
        EmitterSamplingStrategy::None => DVec3::ZERO,
        EmitterSamplingStrategy::One => grid
            .sample(tr.ray.origin, rng)
            .map(|e| estimate(e.pos()))
            .unwrap_or(DVec3::ZERO),
        EmitterSamplingStrategy::All => {
            let emitters = grid.emitters_near(tr.ray.origin);
            if emitters.is_empty() {
                return DVec3::ZERO;
            }
            let sum: DVec3 = emitters.iter().map(|e| estimate(e.pos())).sum();
            sum / emitters.len() as f64
        }
    }
}

/// Shadow query: does anything block the ray within `max_dist`?
fn occluded(scene: &Scene, origin: DVec3, dir: DVec3, max_dist: f64) -> bool {
    let mut shadow = TraceRay::new(Ray::new(origin, dir));
    shadow.current_material = AIR_ID;
    scene.intersect(&mut shadow) && shadow.distance < max_dist
}

/// Kill the path with probability 0.5 once past the configured depth; the
/// survivors carry double weight.
fn russian_roulette(
    scene: &Scene,
    depth: u32,
    throughput: &mut DVec3,
    rng: &mut dyn RngCore,
) -> bool {
    if depth + 1 >= scene.ray_depth {
        if gen_f64(rng) < 0.5 {
            return true;
        }
        *throughput *= 2.0;
    }
    false
}
