use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

/// A polygon face; generators emit quads for ribbons and grids and
/// triangles for clipped patches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Face {
    Tri([u32; 3]),
    Quad([u32; 4]),
}

impl Face {
    pub fn indices(&self) -> &[u32] {
        match self {
            Face::Tri(idx) => idx,
            Face::Quad(idx) => idx,
        }
    }
}

/// Host-ready mesh buffers produced by the geometry generators.
///
/// `uvs` is parallel to `positions` (empty when a generator emits no
/// texture coordinates), `material_indices` is parallel to `faces` and
/// indexes into `materials`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MeshBuffer {
    pub positions: Vec<Vec3>,
    pub uvs: Vec<Vec2>,
    pub faces: Vec<Face>,
    pub material_indices: Vec<u32>,
    pub materials: Vec<String>,
}

impl MeshBuffer {
    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Appends a vertex with its UV, returning the new index.
    pub fn push_vertex(&mut self, pos: Vec3, uv: Vec2) -> u32 {
        let idx = self.positions.len() as u32;
        self.positions.push(pos);
        self.uvs.push(uv);
        idx
    }

    pub fn push_tri(&mut self, indices: [u32; 3], material: u32) {
        self.faces.push(Face::Tri(indices));
        self.material_indices.push(material);
    }

    pub fn push_quad(&mut self, indices: [u32; 4], material: u32) {
        self.faces.push(Face::Quad(indices));
        self.material_indices.push(material);
    }

    /// Merges another buffer into this one, remapping face indices and
    /// unifying material slots by name.
    pub fn append(&mut self, other: &MeshBuffer) {
        let base = self.positions.len() as u32;
        self.positions.extend_from_slice(&other.positions);
        self.uvs.extend_from_slice(&other.uvs);

        let slot_map: Vec<u32> = other
            .materials
            .iter()
            .map(|name| {
                if let Some(i) = self.materials.iter().position(|m| m == name) {
                    i as u32
                } else {
                    self.materials.push(name.clone());
                    self.materials.len() as u32 - 1
                }
            })
            .collect();

        for (face, &mat) in other.faces.iter().zip(&other.material_indices) {
            let remapped = slot_map.get(mat as usize).copied().unwrap_or(mat);
            match face {
                Face::Tri([a, b, c]) => self.push_tri([a + base, b + base, c + base], remapped),
                Face::Quad([a, b, c, d]) => {
                    self.push_quad([a + base, b + base, c + base, d + base], remapped)
                }
            }
        }
    }

    /// Total triangle count after fan-splitting quads.
    pub fn triangle_count(&self) -> usize {
        self.faces
            .iter()
            .map(|f| match f {
                Face::Tri(_) => 1,
                Face::Quad(_) => 2,
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triangle_count_splits_quads() {
        let mut mesh = MeshBuffer::default();
        let a = mesh.push_vertex(Vec3::ZERO, Vec2::ZERO);
        let b = mesh.push_vertex(Vec3::X, Vec2::X);
        let c = mesh.push_vertex(Vec3::Y, Vec2::Y);
        let d = mesh.push_vertex(Vec3::ONE, Vec2::ONE);
        mesh.push_quad([a, b, d, c], 0);
        mesh.push_tri([a, b, c], 0);
        assert_eq!(mesh.triangle_count(), 3);
        assert_eq!(mesh.material_indices.len(), mesh.faces.len());
    }

    #[test]
    fn append_remaps_indices_and_materials() {
        let mut a = MeshBuffer::default();
        a.push_vertex(Vec3::ZERO, Vec2::ZERO);
        a.push_vertex(Vec3::X, Vec2::X);
        a.push_vertex(Vec3::Y, Vec2::Y);
        a.push_tri([0, 1, 2], 0);
        a.materials.push("dirt".to_string());

        let mut b = MeshBuffer::default();
        b.push_vertex(Vec3::Z, Vec2::ZERO);
        b.push_vertex(Vec3::ONE, Vec2::X);
        b.push_vertex(Vec3::NEG_ONE, Vec2::Y);
        b.push_tri([0, 1, 2], 0);
        b.materials.push("grass".to_string());

        a.append(&b);
        assert_eq!(a.positions.len(), 6);
        assert_eq!(a.faces[1], Face::Tri([3, 4, 5]));
        assert_eq!(a.materials, vec!["dirt".to_string(), "grass".to_string()]);
        assert_eq!(a.material_indices[1], 1);

        // Appending the same material again reuses the slot.
        a.append(&b);
        assert_eq!(a.materials.len(), 2);
        assert_eq!(a.material_indices[2], 1);
    }
}
