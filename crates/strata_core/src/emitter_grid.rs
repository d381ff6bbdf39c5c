//! Coarse occupancy grid for importance-sampling surface emitters.

use std::io::{self, Read, Write};

use rand::RngCore;
use strata_math::DVec3;

use crate::rng::gen_f64;

/// Serialization version for the emitter grid stream.
const GRID_STREAM_VERSION: u32 = 1;

/// Position of one emitter voxel center, in octree space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmitterPosition {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl EmitterPosition {
    pub fn pos(&self) -> DVec3 {
        DVec3::new(self.x as f64, self.y as f64, self.z as f64)
    }
}

/// Cubic grid of emitter lists.
///
/// Each cell gathers, after [`EmitterGrid::prepare`], the emitters of its
/// 3x3x3 neighborhood; sampling from a point considers exactly that
/// neighborhood, weighted by how many emitters each cell holds.
#[derive(Debug, Clone)]
pub struct EmitterGrid {
    cell_size: i32,
    /// Cells per axis.
    size: i32,
    cells: Vec<Vec<EmitterPosition>>,
    /// Per-cell gathered neighborhoods, built by `prepare`.
    gathered: Vec<Vec<EmitterPosition>>,
}

impl EmitterGrid {
    pub fn new(cell_size: i32, world_size: i32) -> Self {
        let cell_size = cell_size.max(1);
        let size = (world_size + cell_size - 1) / cell_size;
        let size = size.max(1);
        let n = (size * size * size) as usize;
        Self {
            cell_size,
            size,
            cells: vec![Vec::new(); n],
            gathered: Vec::new(),
        }
    }

    pub fn cell_size(&self) -> i32 {
        self.cell_size
    }

    pub fn emitter_count(&self) -> usize {
        self.cells.iter().map(Vec::len).sum()
    }

    fn cell_index(&self, cx: i32, cy: i32, cz: i32) -> Option<usize> {
        if cx < 0 || cy < 0 || cz < 0 || cx >= self.size || cy >= self.size || cz >= self.size {
            return None;
        }
        Some(((cy * self.size + cz) * self.size + cx) as usize)
    }

    pub fn add_emitter(&mut self, position: EmitterPosition) {
        let cx = (position.x as i32) / self.cell_size;
        let cy = (position.y as i32) / self.cell_size;
        let cz = (position.z as i32) / self.cell_size;
        if let Some(i) = self.cell_index(cx, cy, cz) {
            self.cells[i].push(position);
        }
    }

    /// Build the per-cell gathered neighbor lists. Must run before
    /// [`EmitterGrid::sample`].
    pub fn prepare(&mut self) {
        let mut gathered = vec![Vec::new(); self.cells.len()];
        for cy in 0..self.size {
            for cz in 0..self.size {
                for cx in 0..self.size {
                    let Some(here) = self.cell_index(cx, cy, cz) else {
                        continue;
                    };
                    for dy in -1..=1 {
                        for dz in -1..=1 {
                            for dx in -1..=1 {
                                if let Some(n) = self.cell_index(cx + dx, cy + dy, cz + dz) {
                                    gathered[here].extend(self.cells[n].iter().copied());
                                }
                            }
                        }
                    }
                }
            }
        }
        self.gathered = gathered;
    }

    /// Pick one emitter near `pos`, uniformly over the gathered
    /// neighborhood (cells with more emitters weigh proportionally more).
    pub fn sample(&self, pos: DVec3, rng: &mut dyn RngCore) -> Option<&EmitterPosition> {
        if self.gathered.is_empty() {
            return None;
        }
        let cx = (pos.x as i32) / self.cell_size;
        let cy = (pos.y as i32) / self.cell_size;
        let cz = (pos.z as i32) / self.cell_size;
        let candidates = &self.gathered[self.cell_index(cx, cy, cz)?];
        if candidates.is_empty() {
            return None;
        }
        let i = (gen_f64(rng) * candidates.len() as f64) as usize;
        candidates.get(i.min(candidates.len() - 1))
    }

    /// All emitters near `pos` (for the sample-all strategy).
    pub fn emitters_near(&self, pos: DVec3) -> &[EmitterPosition] {
        if self.gathered.is_empty() {
            return &[];
        }
        let cx = (pos.x as i32) / self.cell_size;
        let cy = (pos.y as i32) / self.cell_size;
        let cz = (pos.z as i32) / self.cell_size;
        match self.cell_index(cx, cy, cz) {
            Some(i) => &self.gathered[i],
            None => &[],
        }
    }

    pub fn store<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(&GRID_STREAM_VERSION.to_be_bytes())?;
        out.write_all(&(self.cell_size as u32).to_be_bytes())?;
        out.write_all(&(self.size as u32).to_be_bytes())?;
        for cell in &self.cells {
            out.write_all(&(cell.len() as u32).to_be_bytes())?;
            for e in cell {
                out.write_all(&e.x.to_be_bytes())?;
                out.write_all(&e.y.to_be_bytes())?;
                out.write_all(&e.z.to_be_bytes())?;
            }
        }
        Ok(())
    }

    pub fn load<R: Read>(input: &mut R) -> io::Result<Self> {
        let mut buf = [0u8; 4];
        input.read_exact(&mut buf)?;
        let version = u32::from_be_bytes(buf);
        if version != GRID_STREAM_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported emitter grid version {version}"),
            ));
        }
        input.read_exact(&mut buf)?;
        let cell_size = u32::from_be_bytes(buf) as i32;
        input.read_exact(&mut buf)?;
        let size = u32::from_be_bytes(buf) as i32;
        if cell_size < 1 || size < 1 || size > 4096 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "unreasonable emitter grid dimensions",
            ));
        }

        let n = (size * size * size) as usize;
        let mut cells = Vec::with_capacity(n);
        for _ in 0..n {
            input.read_exact(&mut buf)?;
            let count = u32::from_be_bytes(buf);
            let mut cell = Vec::with_capacity(count.min(1 << 20) as usize);
            for _ in 0..count {
                let mut coords = [0f32; 3];
                for c in &mut coords {
                    input.read_exact(&mut buf)?;
                    *c = f32::from_be_bytes(buf);
                }
                cell.push(EmitterPosition {
                    x: coords[0],
                    y: coords[1],
                    z: coords[2],
                });
            }
            cells.push(cell);
        }
        let mut grid = Self {
            cell_size,
            size,
            cells,
            gathered: Vec::new(),
        };
        grid.prepare();
        Ok(grid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_sample_finds_nearby_emitter() {
        let mut grid = EmitterGrid::new(8, 64);
        grid.add_emitter(EmitterPosition {
            x: 10.5,
            y: 10.5,
            z: 10.5,
        });
        grid.prepare();

        let mut rng = StdRng::seed_from_u64(1);
        let near = grid.sample(DVec3::new(12.0, 12.0, 12.0), &mut rng);
        assert!(near.is_some());
        // Far away cell has no gathered emitters.
        let far = grid.sample(DVec3::new(60.0, 60.0, 60.0), &mut rng);
        assert!(far.is_none());
    }

    #[test]
    fn test_roundtrip() {
        let mut grid = EmitterGrid::new(4, 32);
        for i in 0..10 {
            grid.add_emitter(EmitterPosition {
                x: i as f32 * 3.0 + 0.5,
                y: 5.5,
                z: 5.5,
            });
        }
        grid.prepare();

        let mut bytes = Vec::new();
        grid.store(&mut bytes).unwrap();
        let loaded = EmitterGrid::load(&mut bytes.as_slice()).unwrap();

        assert_eq!(loaded.cell_size(), 4);
        assert_eq!(loaded.emitter_count(), 10);
        assert_eq!(
            loaded.emitters_near(DVec3::new(5.0, 5.0, 5.0)).len(),
            grid.emitters_near(DVec3::new(5.0, 5.0, 5.0)).len()
        );
    }
}
