//! Sparse voxel octrees for the solid world and the water volume.
//!
//! Two storage variants are selectable at scene-load time: the packed
//! array-backed tree (compact, limited id space) and the boxed-node tree
//! (fallback). Ray traversal runs a 3D-DDA over the implicit voxel grid,
//! skipping across uniform cells reported by `get`.

mod node;
mod packed;

pub use node::NodeOctree;
pub use packed::{PackedOctree, MAX_PACKED_TYPE};

use std::io::{Read, Write};

use strata_math::{DVec3, EPSILON};
use thiserror::Error;

use crate::palette::{
    fluid_corner, fluid_data, fluid_level, is_full_fluid, Palette, AIR_ID, FLUID_FULL_BLOCK,
    WATER_ID,
};
use crate::ray::TraceRay;

/// Sentinel type for interior voxels that are fully occluded by opaque
/// neighbors. Never produced by traversal under normal operation.
pub const ANY_TYPE: u32 = 0x7FFF_FFFE;

/// Serialization version for the octree node stream.
const OCTREE_STREAM_VERSION: u32 = 2;

#[derive(Debug, Error)]
pub enum OctreeError {
    #[error("octree is too big for the packed implementation")]
    TooBig,
    #[error("corrupt octree stream: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Which storage layout backs an octree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Implementation {
    Packed,
    Node,
}

impl Implementation {
    pub fn name(&self) -> &'static str {
        match self {
            Implementation::Packed => "PACKED",
            Implementation::Node => "NODE",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "PACKED" => Some(Implementation::Packed),
            "NODE" => Some(Implementation::Node),
            _ => None,
        }
    }
}

/// Child slot for a voxel at the given subdivision level.
#[inline]
fn child_index(x: i32, y: i32, z: i32, level: u32) -> usize {
    (((x >> level) & 1) << 2 | ((y >> level) & 1) << 1 | ((z >> level) & 1)) as usize
}

#[derive(Debug, Clone)]
pub enum Octree {
    Packed(PackedOctree),
    Node(NodeOctree),
}

/// An axis-aligned voxel region, max-exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub min: [i32; 3],
    pub max: [i32; 3],
}

impl Region {
    pub fn new(min: [i32; 3], max: [i32; 3]) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, x: i32, y: i32, z: i32) -> bool {
        x >= self.min[0]
            && x < self.max[0]
            && y >= self.min[1]
            && y < self.max[1]
            && z >= self.min[2]
            && z < self.max[2]
    }

    /// True when the voxel touches the region boundary; such voxels are
    /// skipped by finalization because their neighbors are unknown.
    pub fn on_edge(&self, x: i32, y: i32, z: i32) -> bool {
        x == self.min[0]
            || x == self.max[0] - 1
            || y == self.min[1]
            || y == self.max[1] - 1
            || z == self.min[2]
            || z == self.max[2] - 1
    }
}

impl Octree {
    pub fn new(implementation: Implementation, depth: u32) -> Self {
        match implementation {
            Implementation::Packed => Octree::Packed(PackedOctree::new(depth)),
            Implementation::Node => Octree::Node(NodeOctree::new(depth)),
        }
    }

    pub fn implementation(&self) -> Implementation {
        match self {
            Octree::Packed(_) => Implementation::Packed,
            Octree::Node(_) => Implementation::Node,
        }
    }

    pub fn depth(&self) -> u32 {
        match self {
            Octree::Packed(t) => t.depth(),
            Octree::Node(t) => t.depth(),
        }
    }

    /// Side length of the root cube in voxels.
    pub fn side(&self) -> i32 {
        1 << self.depth()
    }

    /// Store a leaf value at a unit voxel. Never silently drops a write:
    /// the packed variant reports `TooBig` instead.
    pub fn set(&mut self, ty: u32, x: i32, y: i32, z: i32) -> Result<(), OctreeError> {
        debug_assert!(self.contains_voxel(x, y, z));
        match self {
            Octree::Packed(t) => t.set(ty, x, y, z),
            Octree::Node(t) => t.set(ty, x, y, z),
        }
    }

    /// Type and uniform-cell level at a voxel. Out-of-bounds queries are air.
    pub fn get(&self, x: i32, y: i32, z: i32) -> (u32, u32) {
        if !self.contains_voxel(x, y, z) {
            return (AIR_ID, 0);
        }
        match self {
            Octree::Packed(t) => t.get(x, y, z),
            Octree::Node(t) => t.get(x, y, z),
        }
    }

    pub fn get_type(&self, x: i32, y: i32, z: i32) -> u32 {
        self.get(x, y, z).0
    }

    pub fn contains_voxel(&self, x: i32, y: i32, z: i32) -> bool {
        let side = self.side();
        x >= 0 && x < side && y >= 0 && y < side && z >= 0 && z < side
    }

    pub fn is_inside(&self, p: DVec3) -> bool {
        let side = self.side() as f64;
        p.x >= 0.0 && p.x < side && p.y >= 0.0 && p.y < side && p.z >= 0.0 && p.z < side
    }

    /// Serialize depth and the pre-order node stream.
    pub fn store<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        out.write_all(&OCTREE_STREAM_VERSION.to_be_bytes())?;
        out.write_all(&self.depth().to_be_bytes())?;
        match self {
            Octree::Packed(t) => t.store_nodes(out),
            Octree::Node(t) => t.store_nodes(out),
        }
    }

    /// Deserialize into the requested implementation. The packed builder
    /// reports `TooBig` when a stored type exceeds its id space.
    pub fn load<R: Read>(input: &mut R, implementation: Implementation) -> Result<Self, OctreeError> {
        let mut buf = [0u8; 4];
        input.read_exact(&mut buf)?;
        let version = u32::from_be_bytes(buf);
        if version != OCTREE_STREAM_VERSION {
            return Err(OctreeError::Corrupt(format!(
                "unsupported octree stream version {version}"
            )));
        }
        input.read_exact(&mut buf)?;
        let depth = u32::from_be_bytes(buf);
        if depth > 31 {
            return Err(OctreeError::Corrupt(format!("unreasonable depth {depth}")));
        }
        match implementation {
            Implementation::Packed => Ok(Octree::Packed(PackedOctree::load_nodes(input, depth)?)),
            Implementation::Node => Ok(Octree::Node(NodeOctree::load_nodes(input, depth)?)),
        }
    }

    /// Advance the ray to the first voxel whose material terminates
    /// traversal (anything that is not air). Returns false when the ray
    /// leaves the root cube without a hit.
    pub fn enter_block(&self, tr: &mut TraceRay, palette: &Palette) -> bool {
        self.march(tr, palette, TraversalMode::EnterBlock)
    }

    /// Advance the ray through water until the first non-water voxel.
    pub fn exit_water(&self, tr: &mut TraceRay, palette: &Palette) -> bool {
        self.march(tr, palette, TraversalMode::ExitWater)
    }

    fn march(&self, tr: &mut TraceRay, palette: &Palette, mode: TraversalMode) -> bool {
        let dir = tr.ray.direction;
        if tr.ray.is_degenerate() {
            return false;
        }
        let side = self.side() as f64;
        let origin = tr.ray.origin;

        // Distance to the root cube, plus the normal of the entry face.
        let (mut t, mut face) = if self.is_inside(origin) {
            (0.0, DVec3::ZERO)
        } else {
            match cube_entry(origin, dir, side) {
                Some(entry) => entry,
                None => return false,
            }
        };

        // Worst case is one step per voxel along each axis plus slack for
        // partial fluid cells.
        let max_steps = 4 * self.side() as usize + 16;
        for _ in 0..max_steps {
            let probe = tr.ray.at(t + EPSILON);
            if !self.is_inside(probe) {
                return false;
            }
            let ix = probe.x.floor() as i32;
            let iy = probe.y.floor() as i32;
            let iz = probe.z.floor() as i32;
            let (ty, level) = self.get(ix, iy, iz);
            let material = palette.get(ty);

            let terminal = match mode {
                TraversalMode::EnterBlock => ty != AIR_ID,
                TraversalMode::ExitWater => !material.water,
            };

            if terminal {
                // Partial-height fluid cells only register when the ray
                // actually reaches the fluid surface.
                if mode == TraversalMode::EnterBlock
                    && material.fluid
                    && !is_full_fluid(material.data)
                {
                    let height = fluid_surface_height(material.data);
                    if let Some((t_hit, normal)) =
                        fluid_cell_hit(tr, t, face, height, ix, iy, iz)
                    {
                        record_voxel_hit(tr, t_hit, normal, ty, palette);
                        return true;
                    }
                } else {
                    record_voxel_hit(tr, t.max(0.0), pick_face(face, dir, t), ty, palette);
                    return true;
                }
            }

            // Step to the exit of the uniform cell at this level.
            let (t_next, next_face) = cell_exit(origin, dir, ix, iy, iz, level, t);
            if t_next <= t {
                // Numerical stall; bail out rather than loop forever.
                return false;
            }
            t = t_next;
            face = next_face;
        }
        // Escaped the loop bound without leaving the cube: treat as a miss
        // and let the shader fall back to the sky.
        debug_assert!(false, "octree traversal exceeded step bound");
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TraversalMode {
    EnterBlock,
    ExitWater,
}

/// Entry distance and face normal of the root cube, if hit.
fn cube_entry(origin: DVec3, dir: DVec3, side: f64) -> Option<(f64, DVec3)> {
    let mut t_min = 0.0f64;
    let mut t_max = f64::INFINITY;
    let mut axis = 3usize;
    for a in 0..3 {
        let o = origin[a];
        let d = dir[a];
        if d.abs() < 1e-12 {
            if o < 0.0 || o >= side {
                return None;
            }
            continue;
        }
        let inv = 1.0 / d;
        let mut t0 = (0.0 - o) * inv;
        let mut t1 = (side - o) * inv;
        if inv < 0.0 {
            std::mem::swap(&mut t0, &mut t1);
        }
        if t0 > t_min {
            t_min = t0;
            axis = a;
        }
        t_max = t_max.min(t1);
        if t_max <= t_min {
            return None;
        }
    }
    let mut face = DVec3::ZERO;
    if axis < 3 {
        face[axis] = -dir[axis].signum();
    }
    Some((t_min, face))
}

/// Exit distance of the uniform cell covering the voxel, and the normal of
/// the face being crossed into the neighboring cell.
fn cell_exit(
    origin: DVec3,
    dir: DVec3,
    ix: i32,
    iy: i32,
    iz: i32,
    level: u32,
    t: f64,
) -> (f64, DVec3) {
    let size = 1i32 << level;
    let base = [
        (ix >> level) << level,
        (iy >> level) << level,
        (iz >> level) << level,
    ];
    let mut t_exit = f64::INFINITY;
    let mut axis = 0usize;
    for a in 0..3 {
        let d = dir[a];
        if d.abs() < 1e-12 {
            continue;
        }
        let boundary = if d > 0.0 {
            (base[a] + size) as f64
        } else {
            base[a] as f64
        };
        let ta = (boundary - origin[a]) / d;
        if ta < t_exit {
            t_exit = ta;
            axis = a;
        }
    }
    let mut face = DVec3::ZERO;
    face[axis] = -dir[axis].signum();
    // Make sure we always make forward progress past the boundary.
    (t_exit.max(t + EPSILON), face)
}

/// Resolve the hit face: the tracked crossing face, or a ray-opposed
/// fallback when the ray started inside the cell (t == 0).
fn pick_face(face: DVec3, dir: DVec3, t: f64) -> DVec3 {
    if face != DVec3::ZERO && t > 0.0 {
        return face;
    }
    // Ray origin inside the voxel: pick the dominant axis.
    let a = dir.abs();
    let mut n = DVec3::ZERO;
    if a.x >= a.y && a.x >= a.z {
        n.x = -dir.x.signum();
    } else if a.y >= a.z {
        n.y = -dir.y.signum();
    } else {
        n.z = -dir.z.signum();
    }
    n
}

/// Top-surface height fraction for a partial fluid cell.
///
/// Corner values follow the level convention: 0 is full, 7 is minimum. A
/// full-level surface sits at 8/9 of the cell.
fn fluid_surface_height(data: u32) -> f64 {
    let corners: u32 = (0..4).map(|i| fluid_corner(data, i) as u32).sum();
    let v = if corners > 0 {
        corners as f64 / 4.0
    } else {
        fluid_level(data) as f64
    };
    (8.0 - v) / 9.0
}

/// Hit test against a partial-height fluid cell; returns (t, normal).
fn fluid_cell_hit(
    tr: &TraceRay,
    t_entry: f64,
    entry_face: DVec3,
    height: f64,
    ix: i32,
    iy: i32,
    iz: i32,
) -> Option<(f64, DVec3)> {
    let dir = tr.ray.direction;
    let entry = tr.ray.at(t_entry + EPSILON);
    let surface = iy as f64 + height;

    if entry.y <= surface {
        // Entered below the fluid surface.
        return Some((t_entry.max(0.0), pick_face(entry_face, dir, t_entry)));
    }
    if dir.y >= 0.0 {
        return None;
    }
    // Descending onto the surface plane.
    let t_plane = (surface - tr.ray.origin.y) / dir.y;
    let (t_exit, _) = cell_exit(tr.ray.origin, dir, ix, iy, iz, 0, t_entry);
    if t_plane >= t_entry && t_plane <= t_exit {
        Some((t_plane, DVec3::Y))
    } else {
        None
    }
}

/// Fill in the trace state for a voxel hit.
fn record_voxel_hit(tr: &mut TraceRay, t: f64, normal: DVec3, ty: u32, palette: &Palette) {
    let p = tr.ray.at(t);
    let (u, v) = face_uv(p, normal);
    let material = palette.get(ty);
    let color = material.color_at(u, v);
    tr.record_hit(t, normal, u, v, color, ty);
}

/// Texture coordinate on an axis-aligned voxel face.
fn face_uv(p: DVec3, normal: DVec3) -> (f64, f64) {
    if normal.x != 0.0 {
        (p.z.rem_euclid(1.0), p.y.rem_euclid(1.0))
    } else if normal.y != 0.0 {
        (p.x.rem_euclid(1.0), p.z.rem_euclid(1.0))
    } else {
        (p.x.rem_euclid(1.0), p.y.rem_euclid(1.0))
    }
}

/// Fluid level contribution from a neighbor voxel, following the corner
/// averaging rule: full fluid counts 8, partial fluid counts its inverted
/// level, solid walls repeat the center level, everything else counts 0.
fn fluid_level_at(
    fluids: &Octree,
    solids: &Octree,
    palette: &Palette,
    x: i32,
    y: i32,
    z: i32,
    level0: i32,
) -> i32 {
    let ty = fluids.get_type(x, y, z);
    let material = palette.get(ty);
    if material.fluid {
        let above = palette.get(fluids.get_type(x, y + 1, z));
        if above.fluid {
            return 8;
        }
        return 8 - fluid_level(material.data) as i32;
    }
    if palette.get(solids.get_type(x, y, z)).solid {
        level0
    } else {
        0
    }
}

/// Finalization pass over a loaded region.
///
/// Resolves water/lava corner heights (water in the water octree, lava in
/// the solid octree) and replaces fully hidden solid voxels with
/// `ANY_TYPE`. Callers bracket this with `start`/`end` finalization on both
/// octrees; no readers may run concurrently.
pub fn finalize_region(
    solid: &mut Octree,
    water: &mut Octree,
    palette: &mut Palette,
    region: Region,
) -> Result<(), OctreeError> {
    for y in region.min[1]..region.max[1] {
        for z in region.min[2]..region.max[2] {
            for x in region.min[0]..region.max[0] {
                if region.on_edge(x, y, z) {
                    continue;
                }
                if let Some(id) = fluid_update(water, solid, palette, x, y, z, true) {
                    water.set(id, x, y, z)?;
                }
                if let Some(id) = fluid_update(solid, solid, palette, x, y, z, false) {
                    solid.set(id, x, y, z)?;
                }
                finalize_hidden(solid, palette, x, y, z)?;
            }
        }
    }
    Ok(())
}

/// Compute the finalized palette id for a fluid voxel, or None when the
/// voxel needs no update. Reads only; the caller applies the write.
fn fluid_update(
    fluids: &Octree,
    solids: &Octree,
    palette: &mut Palette,
    x: i32,
    y: i32,
    z: i32,
    water_tree: bool,
) -> Option<u32> {
    let ty = fluids.get_type(x, y, z);
    let material = palette.get(ty);
    if !material.fluid || material.water != water_tree {
        return None;
    }
    let data = material.data;
    if is_full_fluid(data) || data >> 4 != 0 {
        // Already finalized.
        return None;
    }
    let level = fluid_level(data);
    let base = if material.water {
        WATER_ID
    } else {
        ty_base(palette, ty)
    };

    if palette.get(fluids.get_type(x, y + 1, z)).fluid {
        return Some(palette.fluid_id(base, level as u32 | FLUID_FULL_BLOCK));
    }

    let level0 = 8 - level as i32;
    let mut corners = [level0; 4];

    // Corner layout (looking down, +x right, +z up):
    //   corner 0: (x-1, z+1) side, corner 1: (x+1, z+1) side,
    //   corner 2: (x+1, z-1) side, corner 3: (x-1, z-1) side.
    let lv = |dx: i32, dz: i32| fluid_level_at(fluids, solids, palette, x + dx, y, z + dz, level0);

    let west = lv(-1, 0);
    corners[3] += west;
    corners[0] += west;
    corners[0] += lv(-1, 1);
    let south = lv(0, 1);
    corners[0] += south;
    corners[1] += south;
    corners[1] += lv(1, 1);
    let east = lv(1, 0);
    corners[1] += east;
    corners[2] += east;
    corners[2] += lv(1, -1);
    let north = lv(0, -1);
    corners[2] += north;
    corners[3] += north;
    corners[3] += lv(-1, -1);

    let heights = corners.map(|c| (8 - c / 4).clamp(0, 7) as u8);
    Some(palette.fluid_id(base, fluid_data(level, heights)))
}

/// Base palette id for a fluid variant (the first entry with its name).
fn ty_base(palette: &Palette, ty: u32) -> u32 {
    palette.id_of(&palette.get(ty).name).unwrap_or(ty)
}

fn finalize_hidden(
    solid: &mut Octree,
    palette: &Palette,
    x: i32,
    y: i32,
    z: i32,
) -> Result<(), OctreeError> {
    let ty = solid.get_type(x, y, z);
    if ty == ANY_TYPE || !palette.get(ty).opaque {
        return Ok(());
    }
    let hidden = [
        (x + 1, y, z),
        (x - 1, y, z),
        (x, y + 1, z),
        (x, y - 1, z),
        (x, y, z + 1),
        (x, y, z - 1),
    ]
    .iter()
    .all(|&(nx, ny, nz)| {
        let n = solid.get_type(nx, ny, nz);
        n == ANY_TYPE || palette.get(n).opaque
    });
    if hidden {
        solid.set(ANY_TYPE, x, y, z)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::Material;
    use strata_math::Ray;

    fn stone_palette() -> (Palette, u32) {
        let mut palette = Palette::new();
        let stone = palette.push(Material::block("stone", DVec3::splat(0.5)));
        (palette, stone)
    }

    #[test]
    fn test_serialize_roundtrip_both_variants() {
        for imp in [Implementation::Packed, Implementation::Node] {
            let mut octree = Octree::new(imp, 3);
            for (i, &(x, y, z)) in [(0, 0, 0), (7, 7, 7), (3, 1, 4), (4, 4, 4)].iter().enumerate() {
                octree.set(i as u32 + 2, x, y, z).unwrap();
            }
            let mut bytes = Vec::new();
            octree.store(&mut bytes).unwrap();

            for load_imp in [Implementation::Packed, Implementation::Node] {
                let loaded = Octree::load(&mut bytes.as_slice(), load_imp).unwrap();
                assert_eq!(loaded.depth(), 3);
                for (i, &(x, y, z)) in
                    [(0, 0, 0), (7, 7, 7), (3, 1, 4), (4, 4, 4)].iter().enumerate()
                {
                    assert_eq!(loaded.get_type(x, y, z), i as u32 + 2, "{imp:?}->{load_imp:?}");
                }
            }
        }
    }

    #[test]
    fn test_load_packed_too_big_falls_to_node() {
        let mut octree = Octree::new(Implementation::Node, 2);
        octree.set(MAX_PACKED_TYPE + 10, 1, 1, 1).unwrap();
        let mut bytes = Vec::new();
        octree.store(&mut bytes).unwrap();

        assert!(matches!(
            Octree::load(&mut bytes.as_slice(), Implementation::Packed),
            Err(OctreeError::TooBig)
        ));
        let fallback = Octree::load(&mut bytes.as_slice(), Implementation::Node).unwrap();
        assert_eq!(fallback.get_type(1, 1, 1), MAX_PACKED_TYPE + 10);
    }

    #[test]
    fn test_enter_block_hits_face() {
        let (palette, stone) = stone_palette();
        let mut octree = Octree::new(Implementation::Packed, 4);
        octree.set(stone, 8, 8, 8).unwrap();

        let mut tr = TraceRay::new(Ray::new(DVec3::new(0.5, 8.5, 8.5), DVec3::X));
        assert!(octree.enter_block(&mut tr, &palette));
        assert!((tr.t - 7.5).abs() < 1e-3, "t = {}", tr.t);
        assert_eq!(tr.normal, DVec3::new(-1.0, 0.0, 0.0));
        assert_eq!(tr.current_material, stone);
    }

    #[test]
    fn test_enter_block_miss_leaves_cube() {
        let (palette, _) = stone_palette();
        let octree = Octree::new(Implementation::Packed, 4);
        let mut tr = TraceRay::new(Ray::new(DVec3::new(0.5, 0.5, 0.5), DVec3::X));
        assert!(!octree.enter_block(&mut tr, &palette));
    }

    #[test]
    fn test_enter_block_from_outside() {
        let (palette, stone) = stone_palette();
        let mut octree = Octree::new(Implementation::Packed, 3);
        octree.set(stone, 0, 4, 4).unwrap();
        let mut tr = TraceRay::new(Ray::new(DVec3::new(-3.0, 4.5, 4.5), DVec3::X));
        assert!(octree.enter_block(&mut tr, &palette));
        assert!((tr.t - 3.0).abs() < 1e-3);
    }

    #[test]
    fn test_exit_water_reports_boundary() {
        let mut palette = Palette::new();
        let full = palette.water_id(0, FLUID_FULL_BLOCK);
        let mut octree = Octree::new(Implementation::Packed, 3);
        for x in 0..4 {
            octree.set(full, x, 2, 2).unwrap();
        }
        let mut tr = TraceRay::new(Ray::new(DVec3::new(0.5, 2.5, 2.5), DVec3::X));
        tr.prev_material = full;
        tr.current_material = full;
        assert!(octree.exit_water(&mut tr, &palette));
        assert!((tr.t - 3.5).abs() < 1e-3, "t = {}", tr.t);
        assert_eq!(tr.current_material, AIR_ID);
    }

    #[test]
    fn test_partial_water_surface_hit() {
        let mut palette = Palette::new();
        let data = fluid_data(4, [4, 4, 4, 4]);
        let id = palette.water_id(4, data);
        let mut octree = Octree::new(Implementation::Packed, 3);
        octree.set(id, 2, 2, 2).unwrap();

        // Descend from above: should hit the corner-height surface plane.
        let mut tr = TraceRay::new(Ray::new(
            DVec3::new(2.5, 6.0, 2.5),
            DVec3::new(0.0, -1.0, 0.0),
        ));
        assert!(octree.enter_block(&mut tr, &palette));
        let hit_y = tr.ray.at(tr.t).y;
        let expected = 2.0 + (8.0 - 4.0) / 9.0;
        assert!((hit_y - expected).abs() < 1e-3, "hit_y = {hit_y}");
        assert_eq!(tr.normal, DVec3::Y);
    }

    #[test]
    fn test_finalize_full_block_under_water() {
        let mut palette = Palette::new();
        let mut solid = Octree::new(Implementation::Packed, 4);
        let mut water = Octree::new(Implementation::Packed, 4);
        // A 3x3 pool of level-2 flowing water, two deep.
        let flowing = palette.water_id(2, 0);
        for x in 4..7 {
            for z in 4..7 {
                for y in 4..6 {
                    water.set(flowing, x, y, z).unwrap();
                }
            }
        }
        let region = Region::new([3, 3, 3], [8, 8, 8]);
        finalize_region(&mut solid, &mut water, &mut palette, region).unwrap();

        // The lower center voxel has water above: full block form.
        let below = palette.get(water.get_type(5, 4, 5));
        assert!(is_full_fluid(below.data));
        // The surface voxel got corner heights instead.
        let surface = palette.get(water.get_type(5, 5, 5));
        assert!(!is_full_fluid(surface.data));
        assert!(surface.data >> 4 != 0);
        assert_eq!(fluid_corner(surface.data, 0), 2);
        assert_eq!(fluid_level(surface.data), 2);
    }

    #[test]
    fn test_finalize_hides_enclosed_voxel() {
        let (mut palette, stone) = stone_palette();
        let mut solid = Octree::new(Implementation::Packed, 4);
        let mut water = Octree::new(Implementation::Packed, 4);
        for x in 4..7 {
            for y in 4..7 {
                for z in 4..7 {
                    solid.set(stone, x, y, z).unwrap();
                }
            }
        }
        let region = Region::new([3, 3, 3], [8, 8, 8]);
        finalize_region(&mut solid, &mut water, &mut palette, region).unwrap();

        assert_eq!(solid.get_type(5, 5, 5), ANY_TYPE);
        // Shell voxels stay visible.
        assert_eq!(solid.get_type(4, 5, 5), stone);
    }
}
