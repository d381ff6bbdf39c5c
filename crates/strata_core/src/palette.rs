//! The block palette: integer ids to material lookup.
//!
//! The octrees store small integer ids; the palette maps them to material
//! property sheets. Fluid blocks with distinct level/corner-height data are
//! interned as separate palette entries so the octree never needs a second
//! data word per voxel.

use std::collections::HashMap;
use std::io::{self, Read, Write};

use strata_math::DVec3;

use crate::material::Material;

/// Palette id of the air sentinel.
pub const AIR_ID: u32 = 0;
/// Palette id of the still-water sentinel.
pub const WATER_ID: u32 = 1;

// Fluid data word layout:
//   bits 0..=3    level (0 = source, 7 = minimum)
//   bits 4..=6    corner 0 height
//   bits 7..=9    corner 1 height
//   bits 10..=12  corner 2 height
//   bits 13..=15  corner 3 height
//   bit 16        full block
pub const FLUID_LEVEL_MASK: u32 = 0xf;
pub const FLUID_CORNER_SHIFT: [u32; 4] = [4, 7, 10, 13];
pub const FLUID_FULL_BLOCK: u32 = 1 << 16;

/// Pack a fluid data word from level and four corner heights.
pub fn fluid_data(level: u8, corners: [u8; 4]) -> u32 {
    let mut data = (level as u32) & FLUID_LEVEL_MASK;
    for (i, c) in corners.iter().enumerate() {
        data |= ((*c as u32) & 0x7) << FLUID_CORNER_SHIFT[i];
    }
    data
}

pub fn fluid_level(data: u32) -> u8 {
    (data & FLUID_LEVEL_MASK) as u8
}

pub fn fluid_corner(data: u32, corner: usize) -> u8 {
    ((data >> FLUID_CORNER_SHIFT[corner]) & 0x7) as u8
}

pub fn is_full_fluid(data: u32) -> bool {
    data & FLUID_FULL_BLOCK != 0
}

/// Indexed collection of materials.
///
/// Ids `AIR_ID` and `WATER_ID` are always present. Ids are stable for the
/// lifetime of the palette and across serialization.
#[derive(Debug, Clone)]
pub struct Palette {
    materials: Vec<Material>,
    by_name: HashMap<String, u32>,
    /// Interned fluid variants keyed by (base id, data word).
    fluid_variants: HashMap<(u32, u32), u32>,
    hidden: Material,
}

impl Default for Palette {
    fn default() -> Self {
        Self::new()
    }
}

impl Palette {
    pub fn new() -> Self {
        let mut palette = Self {
            materials: Vec::new(),
            by_name: HashMap::new(),
            fluid_variants: HashMap::new(),
            hidden: Material::hidden(),
        };
        let air = palette.push(Material::air());
        let water = palette.push(Material::water());
        debug_assert_eq!(air, AIR_ID);
        debug_assert_eq!(water, WATER_ID);
        palette
    }

    pub fn len(&self) -> u32 {
        self.materials.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    /// Append a material and return its id.
    pub fn push(&mut self, material: Material) -> u32 {
        let id = self.materials.len() as u32;
        self.by_name.entry(material.name.clone()).or_insert(id);
        self.materials.push(material);
        id
    }

    /// Material for an id. Out-of-range ids and `ANY_TYPE` resolve to the
    /// hidden-block stand-in so tracing stays total.
    pub fn get(&self, id: u32) -> &Material {
        self.materials
            .get(id as usize)
            .unwrap_or(&self.hidden)
    }

    pub fn id_of(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    /// Intern a fluid variant of `base` with the given data word.
    ///
    /// Equal (base, data) pairs return the same id. A data word of zero is
    /// the base material itself.
    pub fn fluid_id(&mut self, base: u32, data: u32) -> u32 {
        if data == 0 {
            return base;
        }
        if let Some(&id) = self.fluid_variants.get(&(base, data)) {
            return id;
        }
        let mut material = self.get(base).clone();
        material.data = data;
        let id = self.materials.len() as u32;
        self.materials.push(material);
        self.fluid_variants.insert((base, data), id);
        id
    }

    /// Intern a water variant; `level` is folded into the data word.
    pub fn water_id(&mut self, level: u8, data: u32) -> u32 {
        self.fluid_id(WATER_ID, data | (level as u32 & FLUID_LEVEL_MASK))
    }

    /// Apply a mutation to every material with the given name.
    pub fn update_properties<F: FnMut(&mut Material)>(&mut self, name: &str, mut apply: F) {
        for material in &mut self.materials {
            if material.name == name {
                apply(material);
            }
        }
    }

    /// Serialize the palette as a big-endian record stream.
    ///
    /// Textures are reduced to their average color; full texture data comes
    /// from the texture pack, which is outside the renderer core.
    pub fn store<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(&(self.materials.len() as u32).to_be_bytes())?;
        for material in &self.materials {
            let name = material.name.as_bytes();
            out.write_all(&(name.len() as u32).to_be_bytes())?;
            out.write_all(name)?;
            let color = match &material.texture {
                Some(tex) => tex.avg_color(),
                None => material.base_color,
            };
            for channel in [color.x, color.y, color.z] {
                out.write_all(&channel.to_be_bytes())?;
            }
            let flags = (material.opaque as u8)
                | (material.water as u8) << 1
                | (material.solid as u8) << 2
                | (material.fluid as u8) << 3;
            out.write_all(&[flags])?;
            out.write_all(&material.emittance.to_be_bytes())?;
            out.write_all(&material.specular.to_be_bytes())?;
            out.write_all(&material.roughness.to_be_bytes())?;
            out.write_all(&material.ior.to_be_bytes())?;
            out.write_all(&material.data.to_be_bytes())?;
        }
        Ok(())
    }

    pub fn load<R: Read>(input: &mut R) -> io::Result<Self> {
        let mut buf4 = [0u8; 4];
        let mut buf8 = [0u8; 8];
        input.read_exact(&mut buf4)?;
        let count = u32::from_be_bytes(buf4);

        let mut materials = Vec::with_capacity(count as usize);
        for _ in 0..count {
            input.read_exact(&mut buf4)?;
            let name_len = u32::from_be_bytes(buf4) as usize;
            let mut name = vec![0u8; name_len];
            input.read_exact(&mut name)?;
            let name = String::from_utf8(name)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

            let mut color = DVec3::ZERO;
            for channel in [&mut color.x, &mut color.y, &mut color.z] {
                input.read_exact(&mut buf8)?;
                *channel = f64::from_be_bytes(buf8);
            }
            let mut flags = [0u8; 1];
            input.read_exact(&mut flags)?;
            let mut floats = [0f32; 4];
            for f in &mut floats {
                input.read_exact(&mut buf4)?;
                *f = f32::from_be_bytes(buf4);
            }
            input.read_exact(&mut buf4)?;
            let data = u32::from_be_bytes(buf4);

            materials.push(Material {
                name,
                base_color: color,
                texture: None,
                opaque: flags[0] & 1 != 0,
                water: flags[0] & 2 != 0,
                solid: flags[0] & 4 != 0,
                fluid: flags[0] & 8 != 0,
                emittance: floats[0],
                specular: floats[1],
                roughness: floats[2],
                ior: floats[3],
                data,
            });
        }

        let mut by_name = HashMap::new();
        let mut fluid_variants = HashMap::new();
        for (i, material) in materials.iter().enumerate() {
            by_name.entry(material.name.clone()).or_insert(i as u32);
            if material.data != 0 {
                let base = by_name[&material.name];
                fluid_variants.insert((base, material.data), i as u32);
            }
        }

        Ok(Self {
            materials,
            by_name,
            fluid_variants,
            hidden: Material::hidden(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_ids() {
        let palette = Palette::new();
        assert!(!palette.get(AIR_ID).solid);
        assert!(palette.get(WATER_ID).water);
    }

    #[test]
    fn test_fluid_data_packing() {
        let data = fluid_data(3, [7, 6, 5, 4]);
        assert_eq!(fluid_level(data), 3);
        assert_eq!(fluid_corner(data, 0), 7);
        assert_eq!(fluid_corner(data, 1), 6);
        assert_eq!(fluid_corner(data, 2), 5);
        assert_eq!(fluid_corner(data, 3), 4);
        assert!(!is_full_fluid(data));
        assert!(is_full_fluid(data | FLUID_FULL_BLOCK));
    }

    #[test]
    fn test_fluid_interning() {
        let mut palette = Palette::new();
        let a = palette.water_id(2, FLUID_FULL_BLOCK);
        let b = palette.water_id(2, FLUID_FULL_BLOCK);
        let c = palette.water_id(3, 0);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(palette.get(a).water);
        assert_eq!(fluid_level(palette.get(c).data), 3);
    }

    #[test]
    fn test_out_of_range_id_is_hidden() {
        let palette = Palette::new();
        let m = palette.get(0xFFFF_0000);
        assert!(m.solid);
        assert_eq!(m.name, "hidden");
    }

    #[test]
    fn test_palette_roundtrip() {
        let mut palette = Palette::new();
        let mut glow = Material::block("glowstone", DVec3::new(0.9, 0.7, 0.3));
        glow.emittance = 1.0;
        let stone = palette.push(Material::block("stone", DVec3::splat(0.5)));
        let glow = palette.push(glow);
        let wet = palette.water_id(4, fluid_data(4, [1, 2, 3, 4]));

        let mut bytes = Vec::new();
        palette.store(&mut bytes).unwrap();
        let loaded = Palette::load(&mut bytes.as_slice()).unwrap();

        assert_eq!(loaded.len(), palette.len());
        assert_eq!(loaded.get(stone).name, "stone");
        assert!(loaded.get(glow).is_emitter());
        assert_eq!(fluid_level(loaded.get(wet).data), 4);
        assert_eq!(loaded.id_of("stone"), Some(stone));
    }
}
