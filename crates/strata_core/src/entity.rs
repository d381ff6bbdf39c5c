//! Mesh and panel entities layered on top of the voxel field.

use strata_math::{DVec2, DVec3};

use crate::primitive::{Primitive, Quad, Triangle};

/// Mesh geometry for one entity: positions, optional UVs, triangle indices.
#[derive(Debug, Clone)]
pub struct Mesh {
    /// Vertex positions (one DVec3 per vertex).
    pub positions: Vec<DVec3>,

    /// UV coordinates (optional - one DVec2 per vertex).
    pub uvs: Option<Vec<DVec2>>,

    /// Triangle indices (every 3 indices form a triangle).
    pub indices: Vec<u32>,

    /// Palette id of the surface material.
    pub material: u32,
}

impl Mesh {
    pub fn new(positions: Vec<DVec3>, indices: Vec<u32>, material: u32) -> Self {
        Self {
            positions,
            uvs: None,
            indices,
            material,
        }
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// Geometry of one entity.
#[derive(Debug, Clone)]
pub enum EntityShape {
    Mesh(Mesh),
    /// A flat parallelogram panel (e.g. a painting or sign board),
    /// spanned by two edges from the entity position.
    Panel {
        edge_u: DVec3,
        edge_v: DVec3,
        material: u32,
    },
}

/// A placed entity: geometry at a world position.
#[derive(Debug, Clone)]
pub struct Entity {
    pub name: String,
    pub position: DVec3,
    pub shape: EntityShape,
}

impl Entity {
    pub fn new(name: impl Into<String>, position: DVec3, mesh: Mesh) -> Self {
        Self {
            name: name.into(),
            position,
            shape: EntityShape::Mesh(mesh),
        }
    }

    /// An axis-aligned box entity (6 quads).
    pub fn boxed(
        name: impl Into<String>,
        position: DVec3,
        size: DVec3,
        material: u32,
    ) -> Self {
        // Encoded as a mesh with 8 corners and 12 triangles so that boxes
        // and loaded meshes share one path.
        let corners: Vec<DVec3> = (0..8)
            .map(|i| {
                DVec3::new(
                    if i & 1 != 0 { size.x } else { 0.0 },
                    if i & 2 != 0 { size.y } else { 0.0 },
                    if i & 4 != 0 { size.z } else { 0.0 },
                )
            })
            .collect();
        #[rustfmt::skip]
        let indices = vec![
            0, 2, 1, 1, 2, 3, // -z
            4, 5, 6, 5, 7, 6, // +z
            0, 1, 4, 1, 5, 4, // -y
            2, 6, 3, 3, 6, 7, // +y
            0, 4, 2, 2, 4, 6, // -x
            1, 3, 5, 3, 7, 5, // +x
        ];
        Self::new(name, position, Mesh::new(corners, indices, material))
    }

    /// A flat panel entity.
    pub fn panel(
        name: impl Into<String>,
        position: DVec3,
        edge_u: DVec3,
        edge_v: DVec3,
        material: u32,
    ) -> Self {
        Self {
            name: name.into(),
            position,
            shape: EntityShape::Panel {
                edge_u,
                edge_v,
                material,
            },
        }
    }

    /// Palette id of the entity's surface material.
    pub fn material(&self) -> u32 {
        match &self.shape {
            EntityShape::Mesh(mesh) => mesh.material,
            EntityShape::Panel { material, .. } => *material,
        }
    }

    /// Emit world-space primitives, translated by `offset` (the octree
    /// origin shift).
    pub fn primitives(&self, offset: DVec3) -> Vec<Primitive> {
        let base = self.position + offset;
        match &self.shape {
            EntityShape::Mesh(mesh) => mesh_primitives(&self.name, mesh, base),
            EntityShape::Panel {
                edge_u,
                edge_v,
                material,
            } => vec![Primitive::Quad(Quad::new(base, *edge_u, *edge_v, *material))],
        }
    }
}

fn mesh_primitives(name: &str, mesh: &Mesh, base: DVec3) -> Vec<Primitive> {
    let mut out = Vec::with_capacity(mesh.triangle_count());
    for face in mesh.indices.chunks_exact(3) {
        let (i0, i1, i2) = (face[0] as usize, face[1] as usize, face[2] as usize);
        if i0 >= mesh.positions.len()
            || i1 >= mesh.positions.len()
            || i2 >= mesh.positions.len()
        {
            log::warn!("entity {name}: triangle index out of range");
            continue;
        }
        let v0 = base + mesh.positions[i0];
        let v1 = base + mesh.positions[i1];
        let v2 = base + mesh.positions[i2];
        let tri = match &mesh.uvs {
            Some(uvs) if uvs.len() == mesh.positions.len() => Triangle::with_uvs(
                v0,
                v1,
                v2,
                uvs[i0],
                uvs[i1],
                uvs[i2],
                mesh.material,
            ),
            _ => Triangle::new(v0, v1, v2, mesh.material),
        };
        out.push(Primitive::Triangle(tri));
    }
    out
}
