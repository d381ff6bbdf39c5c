//! Scene container and render-state machine.
//!
//! The scene exclusively owns the palette, the solid/water octree pair, the
//! entity BVH, textures, the sample buffer, and the preview framebuffer.
//! Workers borrow it read-only for the duration of one sample pass; every
//! public mutator is called with the scene lock held by the render manager.

use serde::{Deserialize, Serialize};
use strata_math::{DVec3, EPSILON};

use crate::bvh::Bvh;
use crate::camera::Camera;
use crate::emitter_grid::{EmitterGrid, EmitterPosition};
use crate::entity::Entity;
use crate::octree::{self, Implementation, Octree, OctreeError, Region};
use crate::palette::{self, Palette, AIR_ID};
use crate::ray::TraceRay;
use crate::sample_buffer::{PreviewBuffer, SampleBuffer};
use crate::sky::Sky;
use crate::sun::Sun;
use crate::texture::WorldTexture;

/// Minimum canvas width.
pub const MIN_CANVAS_WIDTH: u32 = 20;
/// Minimum canvas height.
pub const MIN_CANVAS_HEIGHT: u32 = 20;
/// Minimum exposure.
pub const MIN_EXPOSURE: f64 = 0.001;
/// Maximum exposure.
pub const MAX_EXPOSURE: f64 = 1000.0;

pub const DEFAULT_DUMP_FREQUENCY: u32 = 500;
/// Gamma for the gamma-correction post process.
pub const DEFAULT_GAMMA: f64 = 2.2;
pub const DEFAULT_SPP_TARGET: u32 = 1000;
pub const DEFAULT_RAY_DEPTH: u32 = 5;

/// Biome-less fallback water tint.
pub const DEFAULT_WATER_COLOR: [f64; 3] = [0.03, 0.13, 0.16];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    Preview,
    Rendering,
    Paused,
}

/// Why the current accumulation must be discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetReason {
    None,
    SettingsChanged,
    MaterialsChanged,
    ModeChange,
    SceneLoaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmitterSamplingStrategy {
    None,
    One,
    All,
}

/// Tone-mapping operator applied when finalizing render-mode frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Postprocess {
    None,
    Gamma,
    /// Filmic operator (Jim Hejl / Richard Burgess-Dawson).
    Tonemap1,
    /// ACES filmic approximation.
    Tonemap2,
    /// Hable (Uncharted 2) operator.
    Tonemap3,
}

impl Default for Postprocess {
    fn default() -> Self {
        Postprocess::Gamma
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputMode {
    #[serde(rename = "PNG")]
    Png,
    #[serde(rename = "TIFF_32")]
    Tiff32,
    #[serde(rename = "PFM")]
    Pfm,
}

impl Default for OutputMode {
    fn default() -> Self {
        OutputMode::Png
    }
}

impl OutputMode {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputMode::Png => ".png",
            OutputMode::Tiff32 => ".tiff",
            OutputMode::Pfm => ".pfm",
        }
    }
}

/// Encapsulates scene and render state.
pub struct Scene {
    pub name: String,

    width: u32,
    height: u32,

    // Render progress.
    pub spp: u32,
    pub render_time_ms: u64,
    mode: RenderState,
    reset_reason: ResetReason,
    force_reset: bool,

    // Render parameters.
    pub exposure: f64,
    pub postprocess: Postprocess,
    pub output_mode: OutputMode,
    pub spp_target: u32,
    pub ray_depth: u32,
    pub dump_frequency: u32,
    pub save_snapshots: bool,

    // Emitters.
    pub emitters_enabled: bool,
    pub emitter_intensity: f64,
    pub emitter_sampling: EmitterSamplingStrategy,
    pub emitter_grid_size: i32,

    // Sun and sky.
    pub sun_enabled: bool,
    pub transparent_sky: bool,
    pub camera: Camera,
    pub sun: Sun,
    pub sky: Sky,

    // Water.
    pub still_water: bool,
    pub water_opacity: f64,
    pub water_visibility: f64,
    pub use_custom_water_color: bool,
    pub water_color: DVec3,
    pub water_height: i32,

    // Fog.
    pub fog_density: f64,
    pub sky_fog_density: f64,
    pub fog_color: DVec3,
    pub fast_fog: bool,

    // Geometry.
    pub octree_implementation: Implementation,
    palette: Palette,
    solid_octree: Octree,
    water_octree: Octree,
    loaded_region: Option<Region>,
    origin: [i32; 3],
    entities: Vec<Entity>,
    bvh: Bvh,
    emitter_grid: Option<EmitterGrid>,

    // Biome tint maps.
    pub grass_texture: WorldTexture,
    pub foliage_texture: WorldTexture,
    pub water_texture: WorldTexture,

    /// Chunk columns included in the scene, plain (x, z) values.
    pub chunks: Vec<(i32, i32)>,

    // Buffers.
    sample_buffer: SampleBuffer,
    preview: PreviewBuffer,
    alpha: Vec<u8>,
}

impl Scene {
    /// A scene with all default settings and minimal buffers.
    pub fn new(name: impl Into<String>) -> Self {
        let width = 400;
        let height = 300;
        Self {
            name: name.into(),
            width,
            height,
            spp: 0,
            render_time_ms: 0,
            mode: RenderState::Preview,
            reset_reason: ResetReason::None,
            force_reset: false,
            exposure: 1.0,
            postprocess: Postprocess::default(),
            output_mode: OutputMode::default(),
            spp_target: DEFAULT_SPP_TARGET,
            ray_depth: DEFAULT_RAY_DEPTH,
            dump_frequency: DEFAULT_DUMP_FREQUENCY,
            save_snapshots: false,
            emitters_enabled: false,
            emitter_intensity: 13.0,
            emitter_sampling: EmitterSamplingStrategy::None,
            emitter_grid_size: 10,
            sun_enabled: true,
            transparent_sky: false,
            camera: Camera::new(),
            sun: Sun::default(),
            sky: Sky::default(),
            still_water: false,
            water_opacity: 0.42,
            water_visibility: 9.0,
            use_custom_water_color: false,
            water_color: DVec3::from(DEFAULT_WATER_COLOR),
            water_height: 0,
            fog_density: 0.0,
            sky_fog_density: 1.0,
            fog_color: DVec3::new(1.0, 1.0, 1.0),
            fast_fog: true,
            octree_implementation: Implementation::Packed,
            palette: Palette::new(),
            solid_octree: Octree::new(Implementation::Packed, 1),
            water_octree: Octree::new(Implementation::Packed, 1),
            loaded_region: None,
            origin: [0; 3],
            entities: Vec::new(),
            bvh: Bvh::empty(),
            emitter_grid: None,
            grass_texture: WorldTexture::new(),
            foliage_texture: WorldTexture::new(),
            water_texture: WorldTexture::new(),
            chunks: Vec::new(),
            sample_buffer: SampleBuffer::new(width, height),
            preview: PreviewBuffer::new(width, height),
            alpha: vec![0; (width * height) as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn sample_buffer(&self) -> &SampleBuffer {
        &self.sample_buffer
    }

    pub fn preview(&self) -> &PreviewBuffer {
        &self.preview
    }

    pub fn preview_mut(&mut self) -> &mut PreviewBuffer {
        &mut self.preview
    }

    pub fn alpha_channel(&self) -> &[u8] {
        &self.alpha
    }

    pub fn alpha_channel_mut(&mut self) -> &mut [u8] {
        &mut self.alpha
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    pub fn palette_mut(&mut self) -> &mut Palette {
        &mut self.palette
    }

    pub fn solid_octree(&self) -> &Octree {
        &self.solid_octree
    }

    pub fn water_octree(&self) -> &Octree {
        &self.water_octree
    }

    pub fn emitter_grid(&self) -> Option<&EmitterGrid> {
        self.emitter_grid.as_ref()
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn origin(&self) -> [i32; 3] {
        self.origin
    }

    pub fn mode(&self) -> RenderState {
        self.mode
    }

    pub fn reset_reason(&self) -> ResetReason {
        self.reset_reason
    }

    pub fn force_reset(&self) -> bool {
        self.force_reset
    }

    /// True if the render accumulation must be restarted.
    pub fn should_refresh(&self) -> bool {
        self.reset_reason != ResetReason::None
    }

    pub fn fog_enabled(&self) -> bool {
        self.fog_density > 0.0
    }

    pub fn should_save_dumps(&self) -> bool {
        self.dump_frequency > 0
    }

    // ------------------------------------------------------------------
    // State machine

    /// Start rendering: resumes from pause, or refreshes into a fresh
    /// accumulation from preview.
    pub fn start_render(&mut self) {
        match self.mode {
            RenderState::Paused => {
                self.mode = RenderState::Rendering;
            }
            RenderState::Rendering => {}
            RenderState::Preview => {
                self.mode = RenderState::Rendering;
                self.refresh(ResetReason::ModeChange);
            }
        }
    }

    pub fn pause_render(&mut self) {
        if self.mode == RenderState::Rendering {
            self.mode = RenderState::Paused;
        }
    }

    /// Halt rendering and return to preview, forcing a reset.
    pub fn stop_render(&mut self) {
        if self.mode != RenderState::Preview {
            self.mode = RenderState::Preview;
            self.force_reset = true;
            self.set_reset_reason(ResetReason::ModeChange);
        }
    }

    /// Internal transition when the SPP target is reached.
    pub fn target_reached(&mut self) {
        if self.mode == RenderState::Rendering {
            self.mode = RenderState::Paused;
        }
    }

    pub fn set_mode(&mut self, mode: RenderState) {
        self.mode = mode;
    }

    /// Raise a reset. `SceneLoaded` is sticky until consumed.
    pub fn set_reset_reason(&mut self, reason: ResetReason) {
        if self.reset_reason != ResetReason::SceneLoaded {
            self.reset_reason = reason;
        }
    }

    /// Record that a render-affecting parameter changed.
    pub fn refresh(&mut self, reason: ResetReason) {
        if self.mode == RenderState::Paused {
            self.mode = RenderState::Rendering;
        }
        self.set_reset_reason(reason);
    }

    /// Consume the reset: zero progress and the sample buffer. Called by
    /// the render manager between passes.
    pub fn apply_reset(&mut self) {
        self.spp = 0;
        self.render_time_ms = 0;
        self.sample_buffer.clear();
        self.reset_reason = ResetReason::None;
        self.force_reset = false;
    }

    // ------------------------------------------------------------------
    // Mutators (each records the appropriate reset reason)

    pub fn set_canvas_size(&mut self, width: u32, height: u32) {
        let width = width.max(MIN_CANVAS_WIDTH);
        let height = height.max(MIN_CANVAS_HEIGHT);
        if width != self.width || height != self.height {
            self.width = width;
            self.height = height;
            self.init_buffers();
            self.refresh(ResetReason::SettingsChanged);
        }
    }

    /// Reallocate the sample and preview buffers for the current canvas.
    pub fn init_buffers(&mut self) {
        self.sample_buffer = SampleBuffer::new(self.width, self.height);
        self.preview = PreviewBuffer::new(self.width, self.height);
        self.alpha = vec![0; (self.width * self.height) as usize];
    }

    pub fn set_exposure(&mut self, exposure: f64) {
        self.exposure = exposure.clamp(MIN_EXPOSURE, MAX_EXPOSURE);
        if self.mode == RenderState::Preview {
            self.refresh(ResetReason::SettingsChanged);
        }
    }

    pub fn set_ray_depth(&mut self, depth: u32) {
        let depth = depth.max(1);
        if depth != self.ray_depth {
            self.ray_depth = depth;
            self.refresh(ResetReason::SettingsChanged);
        }
    }

    pub fn set_fov(&mut self, fov: f64) {
        self.camera.set_fov(fov);
        self.refresh(ResetReason::SettingsChanged);
    }

    pub fn set_fog_density(&mut self, density: f64) {
        if density != self.fog_density {
            self.fog_density = density.max(0.0);
            self.refresh(ResetReason::SettingsChanged);
        }
    }

    pub fn set_emitters_enabled(&mut self, enabled: bool) {
        if enabled != self.emitters_enabled {
            self.emitters_enabled = enabled;
            self.refresh(ResetReason::SettingsChanged);
        }
    }

    pub fn set_sun_enabled(&mut self, enabled: bool) {
        if enabled != self.sun_enabled {
            self.sun_enabled = enabled;
            self.refresh(ResetReason::SettingsChanged);
        }
    }

    /// Modify one material property across all palette entries with the
    /// given name.
    pub fn set_material_property<F: FnMut(&mut crate::material::Material)>(
        &mut self,
        name: &str,
        apply: F,
    ) {
        self.palette.update_properties(name, apply);
        self.refresh(ResetReason::MaterialsChanged);
    }

    // ------------------------------------------------------------------
    // Geometry loading

    /// Install freshly loaded octrees and palette.
    pub fn set_geometry(
        &mut self,
        palette: Palette,
        solid: Octree,
        water: Octree,
        origin: [i32; 3],
        region: Option<Region>,
    ) {
        self.octree_implementation = solid.implementation();
        self.palette = palette;
        self.solid_octree = solid;
        self.water_octree = water;
        self.origin = origin;
        self.loaded_region = region;
        self.rebuild_bvh();
        self.set_reset_reason(ResetReason::SceneLoaded);
    }

    pub fn set_entities(&mut self, entities: Vec<Entity>) {
        self.entities = entities;
        self.rebuild_bvh();
        self.refresh(ResetReason::SettingsChanged);
    }

    /// Rebuild the entity BVH from current entities.
    pub fn rebuild_bvh(&mut self) {
        let offset = DVec3::new(
            -self.origin[0] as f64,
            -self.origin[1] as f64,
            -self.origin[2] as f64,
        );
        let primitives = self
            .entities
            .iter()
            .flat_map(|e| e.primitives(offset))
            .collect();
        self.bvh = Bvh::new(primitives);
    }

    /// Run octree finalization over the loaded region and rebuild the
    /// emitter grid.
    pub fn finalize_octrees(&mut self) -> Result<(), OctreeError> {
        if let Some(region) = self.loaded_region {
            octree::finalize_region(
                &mut self.solid_octree,
                &mut self.water_octree,
                &mut self.palette,
                region,
            )?;
        }
        if self.emitter_sampling != EmitterSamplingStrategy::None {
            self.rebuild_emitter_grid();
        }
        Ok(())
    }

    /// Scan the solid octree for emitter voxels and grid them.
    pub fn rebuild_emitter_grid(&mut self) {
        let Some(region) = self.loaded_region else {
            self.emitter_grid = None;
            return;
        };
        let mut grid = EmitterGrid::new(self.emitter_grid_size, self.solid_octree.side());
        for y in region.min[1]..region.max[1] {
            for z in region.min[2]..region.max[2] {
                for x in region.min[0]..region.max[0] {
                    let ty = self.solid_octree.get_type(x, y, z);
                    if self.palette.get(ty).is_emitter() {
                        grid.add_emitter(EmitterPosition {
                            x: x as f32 + 0.5,
                            y: y as f32 + 0.5,
                            z: z as f32 + 0.5,
                        });
                    }
                }
            }
        }
        grid.prepare();
        self.emitter_grid = Some(grid);
    }

    pub fn set_emitter_grid(&mut self, grid: Option<EmitterGrid>) {
        self.emitter_grid = grid;
    }

    pub fn set_loaded_region(&mut self, region: Option<Region>) {
        self.loaded_region = region;
    }

    pub fn loaded_region(&self) -> Option<Region> {
        self.loaded_region
    }

    // ------------------------------------------------------------------
    // Tracing

    /// Find the closest intersection between the ray and the scene. On a
    /// hit, the ray origin advances to the hit point and the traveled
    /// distance is accounted.
    pub fn intersect(&self, tr: &mut TraceRay) -> bool {
        let medium = tr.current_material;
        tr.t = f64::INFINITY;

        let mut hit = false;
        if self.bvh.closest_intersection(tr, &self.palette) {
            hit = true;
        }
        if self.intersect_octrees(tr, medium) {
            hit = true;
        }
        if !hit {
            return false;
        }

        tr.prev_material = medium;
        tr.orient_normal();
        tr.advance();
        self.update_water_tint(tr);
        true
    }

    /// Octree pair intersection: solid first, then water in enter or exit
    /// mode depending on the current medium. An octree hit only displaces
    /// an earlier hit when it is closer by more than EPSILON, so entity
    /// surfaces coincident with voxel faces stay visible.
    fn intersect_octrees(&self, tr: &mut TraceRay, medium: u32) -> bool {
        let mut hit = false;

        let mut r = TraceRay::new(tr.ray);
        r.current_material = medium;
        if self.solid_octree.enter_block(&mut r, &self.palette) && r.t + EPSILON < tr.t {
            take_hit(tr, &r);
            hit = true;
        }

        if self.palette.get(medium).water {
            let mut r = TraceRay::new(tr.ray);
            r.current_material = medium;
            if self.water_octree.exit_water(&mut r, &self.palette) && r.t + EPSILON < tr.t {
                take_hit(tr, &r);
                hit = true;
            }
        } else {
            let mut r = TraceRay::new(tr.ray);
            r.current_material = medium;
            if self.water_octree.enter_block(&mut r, &self.palette) && r.t + EPSILON < tr.t {
                take_hit(tr, &r);
                hit = true;
            }
        }
        hit
    }

    /// Apply the water tint to surface events entering or leaving water.
    fn update_water_tint(&self, tr: &mut TraceRay) {
        let current = self.palette.get(tr.current_material);
        let prev = self.palette.get(tr.prev_material);
        if current.water || (tr.current_material == AIR_ID && prev.water) {
            if self.use_custom_water_color {
                tr.color = self.water_color;
            } else {
                let p = tr.ray.origin;
                let tint = self.water_texture.get(
                    p.x.floor() as i32,
                    p.z.floor() as i32,
                    [
                        DEFAULT_WATER_COLOR[0] as f32,
                        DEFAULT_WATER_COLOR[1] as f32,
                        DEFAULT_WATER_COLOR[2] as f32,
                    ],
                );
                tr.color = DVec3::new(tint[0] as f64, tint[1] as f64, tint[2] as f64);
            }
            tr.opacity = self.water_opacity;
        }
    }

    /// Is this point inside a water volume (octree water or the global
    /// ocean plane)?
    pub fn is_in_water(&self, p: DVec3) -> bool {
        if self.water_height > 0 && p.y < self.water_height as f64 - 0.125 {
            return true;
        }
        if self.water_octree.is_inside(p) {
            let x = p.x.floor() as i32;
            let y = p.y.floor() as i32;
            let z = p.z.floor() as i32;
            let ty = self.water_octree.get_type(x, y, z);
            let material = self.palette.get(ty);
            return material.water
                && ((p.y - y as f64) < 0.875 || palette::is_full_fluid(material.data));
        }
        false
    }

    /// Grass tint at an octree-space column.
    pub fn grass_color(&self, x: i32, z: i32) -> [f32; 3] {
        self.grass_texture.get(x, z, [0.37, 0.62, 0.24])
    }

    /// Foliage tint at an octree-space column.
    pub fn foliage_color(&self, x: i32, z: i32) -> [f32; 3] {
        self.foliage_texture.get(x, z, [0.28, 0.65, 0.2])
    }

    // ------------------------------------------------------------------
    // State copying

    /// Import render-affecting state from another scene. Buffers are
    /// deep-copied; the two scenes never alias storage.
    pub fn copy_state(&mut self, other: &Scene) {
        self.exposure = other.exposure;
        self.still_water = other.still_water;
        self.water_opacity = other.water_opacity;
        self.water_visibility = other.water_visibility;
        self.use_custom_water_color = other.use_custom_water_color;
        self.water_color = other.water_color;
        self.water_height = other.water_height;
        self.fog_color = other.fog_color;
        self.fog_density = other.fog_density;
        self.sky_fog_density = other.sky_fog_density;
        self.fast_fog = other.fast_fog;
        self.sun_enabled = other.sun_enabled;
        self.transparent_sky = other.transparent_sky;
        self.emitters_enabled = other.emitters_enabled;
        self.emitter_intensity = other.emitter_intensity;
        self.emitter_sampling = other.emitter_sampling;
        self.emitter_grid_size = other.emitter_grid_size;
        self.camera.set(&other.camera);
        self.sun.set(&other.sun);
        self.sky.set(&other.sky);

        self.palette = other.palette.clone();
        self.solid_octree = other.solid_octree.clone();
        self.water_octree = other.water_octree.clone();
        self.loaded_region = other.loaded_region;
        self.origin = other.origin;
        self.entities = other.entities.clone();
        self.emitter_grid = other.emitter_grid.clone();
        self.grass_texture = other.grass_texture.clone();
        self.foliage_texture = other.foliage_texture.clone();
        self.water_texture = other.water_texture.clone();
        self.chunks = other.chunks.clone();
        self.octree_implementation = other.octree_implementation;
        self.rebuild_bvh();

        self.spp = other.spp;
        self.render_time_ms = other.render_time_ms;
        self.reset_reason = other.reset_reason;

        if self.width != other.width || self.height != other.height {
            self.width = other.width;
            self.height = other.height;
            self.init_buffers();
        }
        // Deep-copy buffer contents; never share storage between scenes.
        let data = other.sample_buffer.to_f64_vec();
        for y in 0..self.height {
            for x in 0..self.width {
                let i = ((y * self.width + x) * 3) as usize;
                self.sample_buffer.set_pixel(
                    x,
                    y,
                    DVec3::new(data[i], data[i + 1], data[i + 2]),
                    other.sample_buffer.spp_at(x, y),
                );
            }
        }
    }

    /// Copy scene state that does not require a render restart.
    pub fn copy_transients(&mut self, other: &Scene) {
        self.name = other.name.clone();
        self.postprocess = other.postprocess;
        self.exposure = other.exposure;
        self.dump_frequency = other.dump_frequency;
        self.save_snapshots = other.save_snapshots;
        self.spp_target = other.spp_target;
        self.ray_depth = other.ray_depth;
        self.mode = other.mode;
        self.output_mode = other.output_mode;
    }
}

/// Copy the closest-hit fields from a traversal scratch ray.
fn take_hit(tr: &mut TraceRay, r: &TraceRay) {
    tr.t = r.t;
    tr.normal = r.normal;
    tr.u = r.u;
    tr.v = r.v;
    tr.color = r.color;
    tr.opacity = r.opacity;
    tr.current_material = r.current_material;
}
