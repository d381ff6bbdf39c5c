//! Scene Description Format: the JSON subset that round-trips render state.
//!
//! Only the fields needed to restore a render are modeled; everything else
//! in a foreign scene file is ignored on load and absent on save.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strata_math::DVec3;

use crate::camera::{Camera, ProjectionMode};
use crate::entity::{Entity, EntityShape, Mesh};
use crate::octree::Implementation;
use crate::scene::{
    EmitterSamplingStrategy, OutputMode, Postprocess, RenderState, ResetReason, Scene,
};
use crate::sky::Sky;
use crate::sun::Sun;

/// The current Scene Description Format version.
pub const SDF_VERSION: i32 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorDescription {
    pub red: f64,
    pub green: f64,
    pub blue: f64,
}

impl From<DVec3> for ColorDescription {
    fn from(v: DVec3) -> Self {
        Self {
            red: v.x,
            green: v.y,
            blue: v.z,
        }
    }
}

impl From<ColorDescription> for DVec3 {
    fn from(c: ColorDescription) -> Self {
        DVec3::new(c.red, c.green, c.blue)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CameraDescription {
    pub position: [f64; 3],
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
    pub fov: f64,
    /// Depth of field; `None` means pinhole.
    pub dof: Option<f64>,
    pub subject_distance: f64,
    pub projection: ProjectionMode,
}

impl Default for CameraDescription {
    fn default() -> Self {
        Self::from_camera(&Camera::new())
    }
}

impl CameraDescription {
    pub fn from_camera(camera: &Camera) -> Self {
        Self {
            position: camera.position.into(),
            yaw: camera.yaw,
            pitch: camera.pitch,
            roll: camera.roll,
            fov: camera.fov,
            dof: if camera.dof.is_finite() {
                Some(camera.dof)
            } else {
                None
            },
            subject_distance: camera.subject_distance,
            projection: camera.projection,
        }
    }

    pub fn apply(&self, camera: &mut Camera) {
        camera.position = self.position.into();
        camera.set_view(self.yaw, self.pitch, self.roll);
        camera.set_fov(self.fov);
        camera.set_dof(self.dof.unwrap_or(f64::INFINITY));
        camera.set_subject_distance(self.subject_distance);
        camera.projection = self.projection;
    }
}

/// Per-material property overrides keyed by material name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterialOverride {
    pub emittance: Option<f32>,
    pub specular: Option<f32>,
    pub ior: Option<f32>,
    pub roughness: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityGeometry {
    Box { size: [f64; 3] },
    Mesh {
        positions: Vec<[f64; 3]>,
        indices: Vec<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        uvs: Option<Vec<[f64; 2]>>,
    },
    /// A flat parallelogram panel spanned by two edges from the entity
    /// position.
    #[serde(rename_all = "camelCase")]
    Panel {
        edge_u: [f64; 3],
        edge_v: [f64; 3],
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDescription {
    pub name: String,
    pub position: [f64; 3],
    /// Material name resolved against the palette at load time.
    pub material: String,
    pub geometry: EntityGeometry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SceneDescription {
    pub sdf_version: i32,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub exposure: f64,
    pub postprocess: Postprocess,
    pub output_mode: OutputMode,
    pub render_time: u64,
    pub spp: u32,
    pub spp_target: u32,
    pub ray_depth: u32,
    pub path_trace: bool,
    pub dump_frequency: u32,
    pub save_snapshots: bool,
    pub emitters_enabled: bool,
    pub emitter_intensity: f64,
    pub emitter_sampling_strategy: EmitterSamplingStrategy,
    pub sun_enabled: bool,
    pub still_water: bool,
    pub water_opacity: f64,
    pub water_visibility: f64,
    pub use_custom_water_color: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub water_color: Option<ColorDescription>,
    pub fog_color: ColorDescription,
    pub fast_fog: bool,
    pub transparent_sky: bool,
    pub fog_density: f64,
    pub sky_fog_density: f64,
    pub water_height: i32,
    pub camera: CameraDescription,
    pub sun: Sun,
    pub sky: Sky,
    pub chunk_list: Vec<[i32; 2]>,
    pub materials: BTreeMap<String, MaterialOverride>,
    pub octree_implementation: String,
    pub entities: Vec<EntityDescription>,
}

impl Default for SceneDescription {
    fn default() -> Self {
        Self::from_scene(&Scene::new("untitled"))
    }
}

impl SceneDescription {
    pub fn from_scene(scene: &Scene) -> Self {
        Self {
            sdf_version: SDF_VERSION,
            name: scene.name.clone(),
            width: scene.width(),
            height: scene.height(),
            exposure: scene.exposure,
            postprocess: scene.postprocess,
            output_mode: scene.output_mode,
            render_time: scene.render_time_ms,
            spp: scene.spp,
            spp_target: scene.spp_target,
            ray_depth: scene.ray_depth,
            path_trace: scene.mode() != RenderState::Preview,
            dump_frequency: scene.dump_frequency,
            save_snapshots: scene.save_snapshots,
            emitters_enabled: scene.emitters_enabled,
            emitter_intensity: scene.emitter_intensity,
            emitter_sampling_strategy: scene.emitter_sampling,
            sun_enabled: scene.sun_enabled,
            still_water: scene.still_water,
            water_opacity: scene.water_opacity,
            water_visibility: scene.water_visibility,
            use_custom_water_color: scene.use_custom_water_color,
            water_color: scene
                .use_custom_water_color
                .then(|| scene.water_color.into()),
            fog_color: scene.fog_color.into(),
            fast_fog: scene.fast_fog,
            transparent_sky: scene.transparent_sky,
            fog_density: scene.fog_density,
            sky_fog_density: scene.sky_fog_density,
            water_height: scene.water_height,
            camera: CameraDescription::from_camera(&scene.camera),
            sun: scene.sun.clone(),
            sky: scene.sky.clone(),
            chunk_list: scene.chunks.iter().map(|&(x, z)| [x, z]).collect(),
            materials: BTreeMap::new(),
            octree_implementation: scene.octree_implementation.name().to_string(),
            entities: scene
                .entities()
                .iter()
                .map(|e| describe_entity(e, scene))
                .collect(),
        }
    }

    /// Apply this description to a scene. Reinitializes the sample buffers
    /// when the canvas size changes and raises the sticky `SceneLoaded`
    /// reset.
    pub fn apply(&self, scene: &mut Scene) {
        if self.sdf_version < SDF_VERSION {
            log::warn!("old scene version {}; some settings may not load", self.sdf_version);
        } else if self.sdf_version > SDF_VERSION {
            log::warn!(
                "scene version {} is newer than supported ({SDF_VERSION})",
                self.sdf_version
            );
        }

        scene.name = self.name.clone();
        scene.set_canvas_size(self.width, self.height);
        scene.exposure = self.exposure;
        scene.postprocess = self.postprocess;
        scene.output_mode = self.output_mode;
        scene.spp_target = self.spp_target;
        scene.ray_depth = self.ray_depth.max(1);
        scene.dump_frequency = self.dump_frequency;
        scene.save_snapshots = self.save_snapshots;
        scene.emitters_enabled = self.emitters_enabled;
        scene.emitter_intensity = self.emitter_intensity;
        scene.emitter_sampling = self.emitter_sampling_strategy;
        scene.sun_enabled = self.sun_enabled;
        scene.still_water = self.still_water;
        scene.water_opacity = self.water_opacity;
        scene.water_visibility = self.water_visibility;
        scene.use_custom_water_color = self.use_custom_water_color;
        if let Some(color) = self.water_color {
            scene.water_color = color.into();
        }
        scene.fog_color = self.fog_color.into();
        scene.fast_fog = self.fast_fog;
        scene.transparent_sky = self.transparent_sky;
        scene.fog_density = self.fog_density;
        scene.sky_fog_density = self.sky_fog_density;
        scene.water_height = self.water_height;
        self.camera.apply(&mut scene.camera);
        scene.sun = self.sun.clone();
        scene.sky = self.sky.clone();
        scene.chunks = self.chunk_list.iter().map(|c| (c[0], c[1])).collect();
        if let Some(imp) = Implementation::from_name(&self.octree_implementation) {
            scene.octree_implementation = imp;
        } else {
            log::warn!(
                "unknown octree implementation {:?}; keeping {}",
                self.octree_implementation,
                scene.octree_implementation.name()
            );
        }

        for (name, properties) in &self.materials {
            scene.set_material_property(name, |m| {
                if let Some(v) = properties.emittance {
                    m.emittance = v;
                }
                if let Some(v) = properties.specular {
                    m.specular = v;
                }
                if let Some(v) = properties.ior {
                    m.ior = v;
                }
                if let Some(v) = properties.roughness {
                    m.roughness = v;
                }
            });
        }

        let entities: Vec<Entity> = self
            .entities
            .iter()
            .map(|d| build_entity(d, scene))
            .collect();
        scene.set_entities(entities);

        // Progress is restored last; the mutators above reset it.
        scene.spp = self.spp;
        scene.render_time_ms = self.render_time;
        scene.set_mode(if self.spp == 0 {
            RenderState::Preview
        } else if self.path_trace {
            RenderState::Paused
        } else {
            RenderState::Preview
        });
        scene.set_reset_reason(ResetReason::SceneLoaded);
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

fn describe_entity(entity: &Entity, scene: &Scene) -> EntityDescription {
    let geometry = match &entity.shape {
        EntityShape::Mesh(mesh) => EntityGeometry::Mesh {
            positions: mesh.positions.iter().map(|&p| p.into()).collect(),
            indices: mesh.indices.clone(),
            uvs: mesh
                .uvs
                .as_ref()
                .map(|uvs| uvs.iter().map(|&uv| uv.into()).collect()),
        },
        EntityShape::Panel { edge_u, edge_v, .. } => EntityGeometry::Panel {
            edge_u: (*edge_u).into(),
            edge_v: (*edge_v).into(),
        },
    };
    EntityDescription {
        name: entity.name.clone(),
        position: entity.position.into(),
        material: scene.palette().get(entity.material()).name.clone(),
        geometry,
    }
}

fn build_entity(description: &EntityDescription, scene: &Scene) -> Entity {
    let material = scene
        .palette()
        .id_of(&description.material)
        .unwrap_or_else(|| {
            log::warn!(
                "entity {}: unknown material {:?}",
                description.name,
                description.material
            );
            crate::palette::AIR_ID
        });
    match &description.geometry {
        EntityGeometry::Box { size } => Entity::boxed(
            description.name.clone(),
            description.position.into(),
            (*size).into(),
            material,
        ),
        EntityGeometry::Mesh {
            positions,
            indices,
            uvs,
        } => {
            let mut mesh = Mesh::new(
                positions.iter().map(|&p| p.into()).collect(),
                indices.clone(),
                material,
            );
            mesh.uvs = uvs
                .as_ref()
                .map(|uvs| uvs.iter().map(|&uv| uv.into()).collect());
            Entity::new(description.name.clone(), description.position.into(), mesh)
        }
        EntityGeometry::Panel { edge_u, edge_v } => Entity::panel(
            description.name.clone(),
            description.position.into(),
            (*edge_u).into(),
            (*edge_v).into(),
            material,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_roundtrip() {
        let mut scene = Scene::new("roundtrip");
        scene.set_canvas_size(200, 100);
        scene.exposure = 2.5;
        scene.postprocess = Postprocess::Tonemap2;
        scene.output_mode = OutputMode::Pfm;
        scene.spp = 17;
        scene.render_time_ms = 12_345;
        scene.set_mode(RenderState::Paused);
        scene.fog_density = 0.25;
        scene.chunks = vec![(0, 0), (-3, 7)];

        let description = SceneDescription::from_scene(&scene);
        let json = description.to_json().unwrap();
        let parsed = SceneDescription::from_json(&json).unwrap();

        assert_eq!(parsed.sdf_version, SDF_VERSION);
        assert_eq!(parsed.width, 200);
        assert_eq!(parsed.exposure, 2.5);
        assert_eq!(parsed.postprocess, Postprocess::Tonemap2);
        assert_eq!(parsed.output_mode, OutputMode::Pfm);
        assert_eq!(parsed.spp, 17);
        assert!(parsed.path_trace);
        assert_eq!(parsed.chunk_list, vec![[0, 0], [-3, 7]]);
    }

    #[test]
    fn test_apply_restores_render_state() {
        let mut source = Scene::new("src");
        source.set_canvas_size(128, 96);
        source.spp = 42;
        source.render_time_ms = 1000;
        source.set_mode(RenderState::Rendering);
        let description = SceneDescription::from_scene(&source);

        let mut target = Scene::new("dst");
        description.apply(&mut target);

        assert_eq!(target.width(), 128);
        assert_eq!(target.spp, 42);
        assert_eq!(target.render_time_ms, 1000);
        // A paused render, resumable by the user.
        assert_eq!(target.mode(), RenderState::Paused);
        assert_eq!(target.reset_reason(), ResetReason::SceneLoaded);
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let json = r#"{
            "sdfVersion": 9,
            "name": "minimal",
            "width": 64,
            "height": 48,
            "futureFeature": {"nested": true}
        }"#;
        let parsed = SceneDescription::from_json(json).unwrap();
        assert_eq!(parsed.name, "minimal");
        assert_eq!(parsed.width, 64);
    }

    #[test]
    fn test_panel_entity_roundtrip_and_intersect() {
        use crate::material::Material;
        use crate::ray::TraceRay;
        use strata_math::Ray;

        let mut scene = Scene::new("panel");
        let board = scene
            .palette_mut()
            .push(Material::block("board", DVec3::splat(0.6)));
        scene.set_entities(vec![Entity::panel(
            "sign",
            DVec3::new(2.0, 2.0, 5.0),
            DVec3::X * 2.0,
            DVec3::Y * 2.0,
            board,
        )]);

        let description = SceneDescription::from_scene(&scene);
        let json = description.to_json().unwrap();
        let parsed = SceneDescription::from_json(&json).unwrap();

        let mut restored = Scene::new("panel");
        restored
            .palette_mut()
            .push(Material::block("board", DVec3::splat(0.6)));
        parsed.apply(&mut restored);
        assert!(matches!(
            restored.entities()[0].shape,
            EntityShape::Panel { .. }
        ));

        // The panel survives the round trip and is hit through the BVH.
        let mut tr = TraceRay::new(Ray::new(DVec3::new(3.0, 3.0, 0.0), DVec3::Z));
        assert!(restored.intersect(&mut tr));
        assert_eq!(tr.current_material, board);
        assert!((tr.distance - 5.0).abs() < 1e-6, "distance {}", tr.distance);
    }

    #[test]
    fn test_material_override_applies() {
        use crate::material::Material;
        let mut scene = Scene::new("mat");
        scene
            .palette_mut()
            .push(Material::block("torch", DVec3::ONE));

        let mut description = SceneDescription::from_scene(&scene);
        description.materials.insert(
            "torch".to_string(),
            MaterialOverride {
                emittance: Some(3.0),
                ..MaterialOverride::default()
            },
        );
        description.apply(&mut scene);

        let id = scene.palette().id_of("torch").unwrap();
        assert_eq!(scene.palette().get(id).emittance, 3.0);
    }
}
