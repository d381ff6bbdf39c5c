//! Frame finalization: exposure, tone mapping, preview bytes, alpha.

use strata_core::sample_buffer::argb;
use strata_core::{Postprocess, RenderState, Scene};
use strata_math::DVec3;

use crate::camera_ray;
use crate::preview::sky_occlusion;

/// Gamma used by the gamma-correction operators.
const GAMMA: f64 = 2.2;

/// Post-process one pixel: exposure, then the scene's tone-mapping
/// operator. Preview mode always uses the cheap sqrt response.
pub fn post_process_pixel(scene: &Scene, x: u32, y: u32) -> DVec3 {
    let mut c = scene.sample_buffer().mean(x, y) * scene.exposure;

    if scene.mode() == RenderState::Preview {
        return DVec3::new(c.x.max(0.0).sqrt(), c.y.max(0.0).sqrt(), c.z.max(0.0).sqrt());
    }

    match scene.postprocess {
        Postprocess::None => {}
        Postprocess::Gamma => {
            c = powv(c, 1.0 / GAMMA);
        }
        Postprocess::Tonemap1 => {
            // http://filmicworlds.com/blog/filmic-tonemapping-operators/
            c = mapv(c, |v| {
                let v = (v - 0.004).max(0.0);
                (v * (6.2 * v + 0.5)) / (v * (6.2 * v + 1.7) + 0.06)
            });
        }
        Postprocess::Tonemap2 => {
            // https://knarkowicz.wordpress.com/2016/01/06/aces-filmic-tone-mapping-curve/
            c = mapv(c, |v| {
                ((v * (2.51 * v + 0.03)) / (v * (2.43 * v + 0.59) + 0.14)).clamp(0.0, 1.0)
            });
            c = powv(c, 1.0 / GAMMA);
        }
        Postprocess::Tonemap3 => {
            // Hable's Uncharted 2 operator. The 16x exposure bump brings it
            // in line with the other operators.
            const A: f64 = 0.15;
            const B: f64 = 0.50;
            const C: f64 = 0.10;
            const D: f64 = 0.20;
            const E: f64 = 0.02;
            const F: f64 = 0.30;
            const W: f64 = 11.2;
            let hable =
                |v: f64| ((v * (A * v + C * B) + D * E) / (v * (A * v + B) + D * F)) - E / F;
            let white_scale = 1.0 / hable(W);
            c = mapv(c * 16.0, |v| hable(v) * white_scale);
        }
    }
    c
}

fn mapv(c: DVec3, f: impl Fn(f64) -> f64) -> DVec3 {
    DVec3::new(f(c.x), f(c.y), f(c.z))
}

fn powv(c: DVec3, e: f64) -> DVec3 {
    DVec3::new(c.x.max(0.0).powf(e), c.y.max(0.0).powf(e), c.z.max(0.0).powf(e))
}

/// Post-process every pixel into the preview back buffer and flip it.
pub fn finalize_frame(scene: &mut Scene) {
    let width = scene.width();
    let height = scene.height();
    let mut pixels = Vec::with_capacity((width * height) as usize);
    for y in 0..height {
        for x in 0..width {
            let c = post_process_pixel(scene, x, y);
            pixels.push(argb(c.x.min(1.0), c.y.min(1.0), c.z.min(1.0)));
        }
    }
    scene.preview_mut().back_mut().copy_from_slice(&pixels);
    scene.preview_mut().swap();
}

/// Compute the alpha channel from sky visibility with 4-tap rotated-grid
/// supersampling. Only meaningful for transparent-sky PNG output.
pub fn compute_alpha(scene: &mut Scene) {
    if !scene.transparent_sky {
        return;
    }
    let width = scene.width();
    let height = scene.height();
    let half_width = width as f64 / (2.0 * height as f64);
    let inv_height = 1.0 / height as f64;

    // Rotated-grid tap offsets in pixels.
    const TAPS: [(f64, f64); 4] = [
        (-3.0 / 8.0, 1.0 / 8.0),
        (1.0 / 8.0, 3.0 / 8.0),
        (-1.0 / 8.0, -3.0 / 8.0),
        (3.0 / 8.0, -1.0 / 8.0),
    ];

    let mut rng = rand::rngs::mock::StepRng::new(0, 0);
    let mut alpha = vec![0u8; (width * height) as usize];
    for y in 0..height {
        for x in 0..width {
            let mut occlusion = 0.0;
            for (dx, dy) in TAPS {
                let u = -half_width + (x as f64 + dx) * inv_height;
                let v = -0.5 + (y as f64 + dy) * inv_height;
                let ray = camera_ray(scene, u, v, &mut rng);
                occlusion += sky_occlusion(scene, ray);
            }
            alpha[(y * width + x) as usize] = (255.0 * occlusion * 0.25 + 0.5) as u8;
        }
    }
    scene.alpha_channel_mut().copy_from_slice(&alpha);
}
