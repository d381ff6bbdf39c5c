//! Block textures and world-keyed color maps.

use std::collections::HashMap;
use std::io::{self, Read, Write};

use strata_math::DVec3;

/// A small RGB texture sampled by block-face UV coordinates.
#[derive(Debug, Clone)]
pub struct Texture {
    width: u32,
    height: u32,
    /// Row-major RGB triples, linear color.
    pixels: Vec<f32>,
    avg: DVec3,
}

impl Texture {
    pub fn new(width: u32, height: u32, pixels: Vec<f32>) -> Self {
        assert_eq!(pixels.len(), (width * height * 3) as usize);
        let n = (width * height) as f64;
        let mut avg = DVec3::ZERO;
        for px in pixels.chunks_exact(3) {
            avg += DVec3::new(px[0] as f64, px[1] as f64, px[2] as f64);
        }
        Self {
            width,
            height,
            pixels,
            avg: avg / n.max(1.0),
        }
    }

    /// A 1x1 texture with a flat color.
    pub fn solid(color: DVec3) -> Self {
        Self::new(1, 1, vec![color.x as f32, color.y as f32, color.z as f32])
    }

    /// Nearest-texel sample. Coordinates wrap.
    pub fn sample(&self, u: f64, v: f64) -> DVec3 {
        let x = ((u.rem_euclid(1.0) * self.width as f64) as u32).min(self.width - 1);
        let y = ((v.rem_euclid(1.0) * self.height as f64) as u32).min(self.height - 1);
        let i = ((y * self.width + x) * 3) as usize;
        DVec3::new(
            self.pixels[i] as f64,
            self.pixels[i + 1] as f64,
            self.pixels[i + 2] as f64,
        )
    }

    /// Average color over all texels.
    pub fn avg_color(&self) -> DVec3 {
        self.avg
    }
}

/// A sparse 2D color map keyed by world column (x, z).
///
/// Used for biome tint maps (grass, foliage, water). Columns that were never
/// set return the given fallback.
#[derive(Debug, Clone, Default)]
pub struct WorldTexture {
    columns: HashMap<(i32, i32), [f32; 3]>,
}

impl WorldTexture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, x: i32, z: i32, color: [f32; 3]) {
        self.columns.insert((x, z), color);
    }

    pub fn contains(&self, x: i32, z: i32) -> bool {
        self.columns.contains_key(&(x, z))
    }

    pub fn get(&self, x: i32, z: i32, fallback: [f32; 3]) -> [f32; 3] {
        self.columns.get(&(x, z)).copied().unwrap_or(fallback)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Serialize as a big-endian entry list.
    pub fn store<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(&(self.columns.len() as u32).to_be_bytes())?;
        // Deterministic output order.
        let mut keys: Vec<_> = self.columns.keys().copied().collect();
        keys.sort_unstable();
        for (x, z) in keys {
            let c = self.columns[&(x, z)];
            out.write_all(&x.to_be_bytes())?;
            out.write_all(&z.to_be_bytes())?;
            for channel in c {
                out.write_all(&channel.to_be_bytes())?;
            }
        }
        Ok(())
    }

    pub fn load<R: Read>(input: &mut R) -> io::Result<Self> {
        let mut buf4 = [0u8; 4];
        input.read_exact(&mut buf4)?;
        let count = u32::from_be_bytes(buf4);
        let mut columns = HashMap::with_capacity(count as usize);
        for _ in 0..count {
            input.read_exact(&mut buf4)?;
            let x = i32::from_be_bytes(buf4);
            input.read_exact(&mut buf4)?;
            let z = i32::from_be_bytes(buf4);
            let mut color = [0f32; 3];
            for channel in &mut color {
                input.read_exact(&mut buf4)?;
                *channel = f32::from_be_bytes(buf4);
            }
            columns.insert((x, z), color);
        }
        Ok(Self { columns })
    }
}
