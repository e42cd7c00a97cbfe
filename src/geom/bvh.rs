//! Triangle BVH raycasting over generated scene geometry.
//!
//! Draped geometry (roads, rivers, decals) samples the scene with rays;
//! the scene at that point is whatever meshes have been generated so
//! far, wrapped in one [`SceneRaycaster`].  Terrain is registered first
//! so ground queries prefer it.

use glam::Vec3;

use crate::mesh::MeshBuffer;

const EPSILON: f32 = 1e-7;
const LEAF_SIZE: usize = 4;

#[derive(Debug, Clone, Copy)]
struct Triangle {
    a: Vec3,
    b: Vec3,
    c: Vec3,
    centroid: Vec3,
}

impl Triangle {
    fn new(a: Vec3, b: Vec3, c: Vec3) -> Self {
        Self {
            a,
            b,
            c,
            centroid: (a + b + c) / 3.0,
        }
    }

    fn normal(&self) -> Vec3 {
        (self.b - self.a).cross(self.c - self.a).normalize_or_zero()
    }

    /// Moller-Trumbore, both-sided.
    fn intersect(&self, origin: Vec3, dir: Vec3, max_dist: f32) -> Option<f32> {
        let edge1 = self.b - self.a;
        let edge2 = self.c - self.a;
        let h = dir.cross(edge2);
        let det = edge1.dot(h);
        if det.abs() < EPSILON {
            return None;
        }
        let inv_det = 1.0 / det;
        let s = origin - self.a;
        let u = s.dot(h) * inv_det;
        if !(0.0..=1.0).contains(&u) {
            return None;
        }
        let q = s.cross(edge1);
        let v = dir.dot(q) * inv_det;
        if v < 0.0 || u + v > 1.0 {
            return None;
        }
        let t = edge2.dot(q) * inv_det;
        if t > EPSILON && t < max_dist {
            Some(t)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Aabb {
    min: Vec3,
    max: Vec3,
}

impl Aabb {
    const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    fn grow(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    fn grow_triangle(&mut self, tri: &Triangle) {
        self.grow(tri.a);
        self.grow(tri.b);
        self.grow(tri.c);
    }

    /// Slab test; returns entry distance or `None`.
    fn intersect(&self, origin: Vec3, inv_dir: Vec3, max_dist: f32) -> Option<f32> {
        let t1 = (self.min - origin) * inv_dir;
        let t2 = (self.max - origin) * inv_dir;
        let t_near = t1.min(t2).max_element();
        let t_far = t1.max(t2).min_element();
        if t_near <= t_far && t_far > 0.0 && t_near < max_dist {
            Some(t_near.max(0.0))
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct BvhNode {
    aabb: Aabb,
    /// Leaf: first index into `tri_order`.  Interior: left child index.
    left_first: u32,
    tri_count: u32,
    right: u32,
}

/// Static triangle BVH over one mesh.
pub struct Bvh {
    nodes: Vec<BvhNode>,
    tris: Vec<Triangle>,
    tri_order: Vec<u32>,
}

/// A ray intersection in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub position: Vec3,
    pub normal: Vec3,
    pub distance: f32,
}

impl Bvh {
    pub fn from_mesh(mesh: &MeshBuffer) -> Option<Self> {
        let mut tris = Vec::new();
        for face in &mesh.faces {
            let idx = face.indices();
            let p = |i: usize| mesh.positions[idx[i] as usize];
            match idx.len() {
                3 => tris.push(Triangle::new(p(0), p(1), p(2))),
                4 => {
                    tris.push(Triangle::new(p(0), p(1), p(2)));
                    tris.push(Triangle::new(p(0), p(2), p(3)));
                }
                _ => {}
            }
        }
        Self::from_triangles(tris)
    }

    fn from_triangles(tris: Vec<Triangle>) -> Option<Self> {
        if tris.is_empty() {
            return None;
        }
        let mut bvh = Self {
            nodes: Vec::with_capacity(tris.len() * 2),
            tri_order: (0..tris.len() as u32).collect(),
            tris,
        };
        let count = bvh.tri_order.len();
        bvh.build(0, count);
        Some(bvh)
    }

    /// Recursive midpoint split on the widest centroid axis.  Returns the
    /// node index.
    fn build(&mut self, first: usize, count: usize) -> u32 {
        let mut aabb = Aabb::EMPTY;
        let mut centroid_box = Aabb::EMPTY;
        for &t in &self.tri_order[first..first + count] {
            aabb.grow_triangle(&self.tris[t as usize]);
            centroid_box.grow(self.tris[t as usize].centroid);
        }
        let node_index = self.nodes.len() as u32;
        self.nodes.push(BvhNode {
            aabb,
            left_first: first as u32,
            tri_count: count as u32,
            right: 0,
        });
        if count <= LEAF_SIZE {
            return node_index;
        }

        let extent = centroid_box.max - centroid_box.min;
        let axis = if extent.x >= extent.y && extent.x >= extent.z {
            0
        } else if extent.y >= extent.z {
            1
        } else {
            2
        };
        let split = (centroid_box.min[axis] + centroid_box.max[axis]) * 0.5;

        let mut mid = first;
        for i in first..first + count {
            if self.tris[self.tri_order[i] as usize].centroid[axis] < split {
                self.tri_order.swap(i, mid);
                mid += 1;
            }
        }
        // Degenerate split, keep the leaf.
        if mid == first || mid == first + count {
            return node_index;
        }

        let left = self.build(first, mid - first);
        let right = self.build(mid, first + count - mid);
        self.nodes[node_index as usize].tri_count = 0;
        self.nodes[node_index as usize].left_first = left;
        self.nodes[node_index as usize].right = right;
        node_index
    }

    pub fn raycast(&self, origin: Vec3, dir: Vec3, max_dist: f32) -> Option<RayHit> {
        let dir = dir.normalize_or_zero();
        if dir == Vec3::ZERO {
            return None;
        }
        let inv_dir = dir.recip();
        let mut best: Option<(f32, &Triangle)> = None;
        let mut limit = max_dist;
        let mut stack = vec![0u32];
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index as usize];
            if node.aabb.intersect(origin, inv_dir, limit).is_none() {
                continue;
            }
            if node.tri_count > 0 {
                let first = node.left_first as usize;
                for &t in &self.tri_order[first..first + node.tri_count as usize] {
                    let tri = &self.tris[t as usize];
                    if let Some(dist) = tri.intersect(origin, dir, limit) {
                        limit = dist;
                        best = Some((dist, tri));
                    }
                }
            } else {
                stack.push(node.left_first);
                stack.push(node.right);
            }
        }
        best.map(|(dist, tri)| RayHit {
            position: origin + dir * dist,
            normal: tri.normal(),
            distance: dist,
        })
    }
}

/// Raycast target order matters: terrain meshes are tried first and win
/// ties for downward ground queries.
pub struct SceneRaycaster {
    terrain: Vec<Bvh>,
    objects: Vec<Bvh>,
}

impl Default for SceneRaycaster {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneRaycaster {
    pub fn new() -> Self {
        Self {
            terrain: Vec::new(),
            objects: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.terrain.is_empty() && self.objects.is_empty()
    }

    pub fn has_terrain(&self) -> bool {
        !self.terrain.is_empty()
    }

    pub fn add_terrain(&mut self, mesh: &MeshBuffer) {
        if let Some(bvh) = Bvh::from_mesh(mesh) {
            self.terrain.push(bvh);
        }
    }

    pub fn add_mesh(&mut self, mesh: &MeshBuffer) {
        if let Some(bvh) = Bvh::from_mesh(mesh) {
            self.objects.push(bvh);
        }
    }

    fn targets(&self) -> impl Iterator<Item = &Bvh> {
        self.terrain.iter().chain(self.objects.iter())
    }

    /// Nearest hit over all targets.
    pub fn raycast(&self, origin: Vec3, dir: Vec3, max_dist: f32) -> Option<RayHit> {
        let mut best: Option<RayHit> = None;
        let mut limit = max_dist;
        for bvh in self.targets() {
            if let Some(hit) = bvh.raycast(origin, dir, limit) {
                limit = hit.distance;
                best = Some(hit);
            }
        }
        best
    }

    /// Casts straight down and returns the highest surface under the
    /// origin, if any.  With `include_objects` false only terrain
    /// meshes are sampled.
    pub fn ground_height(&self, origin: Vec3, max_down: f32, include_objects: bool) -> Option<f32> {
        let mut best: Option<f32> = None;
        let empty = [];
        let objects = if include_objects {
            self.objects.as_slice()
        } else {
            &empty
        };
        for bvh in self.terrain.iter().chain(objects) {
            if let Some(hit) = bvh.raycast(origin, Vec3::NEG_Z, max_down) {
                if best.is_none_or(|z| hit.position.z > z) {
                    best = Some(hit.position.z);
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::Face;

    fn quad_at_z(z: f32, half: f32) -> MeshBuffer {
        MeshBuffer {
            positions: vec![
                Vec3::new(-half, -half, z),
                Vec3::new(half, -half, z),
                Vec3::new(half, half, z),
                Vec3::new(-half, half, z),
            ],
            uvs: vec![glam::Vec2::ZERO; 4],
            faces: vec![Face::Quad([0, 1, 2, 3])],
            material_indices: vec![0],
            materials: vec!["m".to_string()],
        }
    }

    #[test]
    fn downward_ray_hits_plane() {
        let mut scene = SceneRaycaster::new();
        scene.add_terrain(&quad_at_z(2.0, 10.0));
        let hit = scene
            .raycast(Vec3::new(0.5, 0.5, 50.0), Vec3::NEG_Z, 100.0)
            .unwrap();
        assert!((hit.position.z - 2.0).abs() < 1e-4);
        assert!((hit.distance - 48.0).abs() < 1e-3);
    }

    #[test]
    fn ground_height_prefers_highest_surface() {
        let mut scene = SceneRaycaster::new();
        scene.add_terrain(&quad_at_z(0.0, 10.0));
        scene.add_mesh(&quad_at_z(3.0, 10.0));
        let z = scene
            .ground_height(Vec3::new(0.0, 0.0, 50.0), 100.0, true)
            .unwrap();
        assert!((z - 3.0).abs() < 1e-4);
        // Terrain-only queries ignore the higher object mesh.
        let z = scene
            .ground_height(Vec3::new(0.0, 0.0, 50.0), 100.0, false)
            .unwrap();
        assert!(z.abs() < 1e-4);
    }

    #[test]
    fn miss_outside_geometry() {
        let mut scene = SceneRaycaster::new();
        scene.add_terrain(&quad_at_z(0.0, 1.0));
        assert!(scene.raycast(Vec3::new(5.0, 5.0, 10.0), Vec3::NEG_Z, 100.0).is_none());
        assert!(scene
            .ground_height(Vec3::new(5.0, 5.0, 10.0), 100.0, true)
            .is_none());
    }

    #[test]
    fn range_limit_is_respected() {
        let mut scene = SceneRaycaster::new();
        scene.add_terrain(&quad_at_z(0.0, 10.0));
        assert!(scene.raycast(Vec3::new(0.0, 0.0, 50.0), Vec3::NEG_Z, 10.0).is_none());
    }
}
