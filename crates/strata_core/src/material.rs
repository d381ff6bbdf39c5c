//! Material property sheet for palette entries and entity surfaces.

use std::sync::Arc;

use strata_math::DVec3;

use crate::texture::Texture;

/// Surface and volume properties of one palette entry.
///
/// Fluids (water, lava) additionally carry a packed data word with the fluid
/// level and corner heights, see [`crate::palette`] for the bit layout.
#[derive(Debug, Clone)]
pub struct Material {
    pub name: String,

    /// Flat base color, used when no texture is attached.
    pub base_color: DVec3,

    /// Per-texel color (optional).
    pub texture: Option<Arc<Texture>>,

    /// Fully light-blocking; hidden-voxel culling relies on this.
    pub opaque: bool,

    /// Participates in the water medium.
    pub water: bool,

    /// Carries a fluid level and corner heights in `data` (water, lava).
    pub fluid: bool,

    /// Terminates octree traversal when hit.
    pub solid: bool,

    pub emittance: f32,
    pub specular: f32,
    pub roughness: f32,
    pub ior: f32,

    /// Packed fluid data word; zero for non-fluid materials.
    pub data: u32,
}

impl Material {
    /// A non-solid, invisible material (the air sentinel).
    pub fn air() -> Self {
        Self {
            name: "air".to_string(),
            base_color: DVec3::ZERO,
            texture: None,
            opaque: false,
            water: false,
            fluid: false,
            solid: false,
            emittance: 0.0,
            specular: 0.0,
            roughness: 0.0,
            ior: 1.0,
            data: 0,
        }
    }

    /// Still-water source material (the water sentinel).
    pub fn water() -> Self {
        Self {
            name: "water".to_string(),
            base_color: DVec3::new(0.25, 0.35, 0.5),
            texture: None,
            opaque: false,
            water: true,
            fluid: true,
            solid: false,
            emittance: 0.0,
            specular: 0.12,
            roughness: 0.0,
            ior: 1.333,
            data: 0,
        }
    }

    /// Lava source material: an emissive fluid.
    pub fn lava() -> Self {
        Self {
            name: "lava".to_string(),
            base_color: DVec3::new(0.85, 0.35, 0.05),
            texture: None,
            opaque: true,
            water: false,
            fluid: true,
            solid: true,
            emittance: 1.0,
            specular: 0.0,
            roughness: 1.0,
            ior: 1.0,
            data: 0,
        }
    }

    /// An opaque diffuse block with a flat color.
    pub fn block(name: impl Into<String>, color: DVec3) -> Self {
        Self {
            name: name.into(),
            base_color: color,
            texture: None,
            opaque: true,
            water: false,
            fluid: false,
            solid: true,
            emittance: 0.0,
            specular: 0.0,
            roughness: 1.0,
            ior: 1.0,
            data: 0,
        }
    }

    /// Stand-in for `ANY_TYPE` voxels. A ray should never reach one; if it
    /// does, the tracer shades it as a neutral opaque block.
    pub fn hidden() -> Self {
        Self::block("hidden", DVec3::splat(0.5))
    }

    pub fn is_emitter(&self) -> bool {
        self.emittance > 1e-4
    }

    /// Surface color at the given texture coordinate.
    pub fn color_at(&self, u: f64, v: f64) -> DVec3 {
        match &self.texture {
            Some(tex) => tex.sample(u, v),
            None => self.base_color,
        }
    }
}
