//! Simple voxel render example.
//!
//! Builds a small terraced scene, renders it headless, and saves a PNG.

use std::fs::File;
use std::io::BufWriter;

use strata_core::material::Material;
use strata_core::{Implementation, Octree, Palette, Region, Scene};
use strata_math::DVec3;
use strata_renderer::writers::write_png;
use strata_renderer::{RenderManager, RenderOptions};

fn main() {
    println!("Strata - simple render example");
    println!("==============================");

    let start = std::time::Instant::now();
    let scene = build_scene();
    println!("Scene built in {:?}", start.elapsed());

    let mut manager = RenderManager::new(
        scene,
        RenderOptions {
            threads: 0,
            seed: 0,
            scene_directory: None,
        },
    );

    let start = std::time::Instant::now();
    manager.start();
    manager.start_render();
    manager.join();
    println!("Rendered in {:?}", start.elapsed());

    manager.with_scene_mut(|scene| {
        let file = File::create("simple_render.png").expect("create output file");
        let mut out = BufWriter::new(file);
        strata_renderer::post::finalize_frame(scene);
        write_png(&mut out, scene).expect("encode PNG");
    });
    println!("Saved simple_render.png");

    manager.shutdown();
}

fn build_scene() -> Scene {
    let mut scene = Scene::new("simple");
    scene.set_canvas_size(400, 300);
    scene.spp_target = 32;
    scene.ray_depth = 4;

    let mut palette = Palette::new();
    let grass = palette.push(Material::block("grass", DVec3::new(0.35, 0.6, 0.25)));
    let stone = palette.push(Material::block("stone", DVec3::splat(0.55)));
    let mut glow = Material::block("lamp", DVec3::new(1.0, 0.9, 0.7));
    glow.emittance = 1.0;
    let glow = palette.push(glow);

    let mut solid = Octree::new(Implementation::Packed, 6);
    let water = Octree::new(Implementation::Packed, 6);
    for x in 0..64 {
        for z in 0..64 {
            let h = 4 + ((x / 8 + z / 8) % 3);
            for y in 0..h {
                let ty = if y + 1 == h { grass } else { stone };
                solid.set(ty, x, y, z).expect("octree set");
            }
        }
    }
    solid.set(glow, 32, 8, 32).expect("octree set");

    scene.set_geometry(
        palette,
        solid,
        water,
        [0; 3],
        Some(Region::new([0, 0, 0], [64, 64, 64])),
    );
    scene.finalize_octrees().expect("finalize octrees");
    scene.emitters_enabled = true;

    scene.camera.position = DVec3::new(32.0, 14.0, 4.0);
    scene.camera.set_view(0.0, -0.35, 0.0);
    scene.apply_reset();
    scene
}
