use crate::cache::entry::LocalId;
use glam::{Mat4, Vec3, Vec4};
use std::collections::HashMap;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Aabb {
            min: min.min(max),
            max: min.max(max),
        }
    }

    pub fn from_center_half_extents(center: Vec3, half_extents: Vec3) -> Self {
        Aabb::new(center - half_extents.abs(), center + half_extents.abs())
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    pub fn translated(&self, offset: Vec3) -> Aabb {
        Aabb {
            min: self.min + offset,
            max: self.max + offset,
        }
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn clamped(&self, limit: f32) -> Aabb {
        let limit = Vec3::splat(limit);
        Aabb {
            min: self.min.clamp(-limit, limit),
            max: self.max.clamp(-limit, limit),
        }
    }

    pub fn contains(&self, other: &Aabb) -> bool {
        self.min.cmple(other.min).all() && self.max.cmpge(other.max).all()
    }

    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        let closest = center.clamp(self.min, self.max);
        closest.distance_squared(center) <= radius * radius
    }

    /// The eight octants, indexed by the x/y/z bits of the octant number.
    fn octants(&self) -> [Aabb; 8] {
        let center = self.center();
        std::array::from_fn(|i| {
            let pick = |bit: usize, lo: f32, mid: f32, hi: f32| if i & bit == 0 { (lo, mid) } else { (mid, hi) };
            let (x0, x1) = pick(1, self.min.x, center.x, self.max.x);
            let (y0, y1) = pick(2, self.min.y, center.y, self.max.y);
            let (z0, z1) = pick(4, self.min.z, center.z, self.max.z);
            Aabb {
                min: Vec3::new(x0, y0, z0),
                max: Vec3::new(x1, y1, z1),
            }
        })
    }
}

/// Six inward facing planes `(normal, distance)`; a point is inside when `dot(n, p) + d >= 0` for all of them.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Frustum {
    planes: [Vec4; 6],
}

impl Frustum {
    /// Zero normal, positive distance: every point passes every plane.
    pub const INFINITE: Frustum = Frustum {
        planes: [Vec4::W; 6],
    };

    /// Extracts the planes of a right handed view projection with a 0..1 depth range.
    pub fn from_view_projection(view_projection: &Mat4) -> Self {
        let row0 = view_projection.row(0);
        let row1 = view_projection.row(1);
        let row2 = view_projection.row(2);
        let row3 = view_projection.row(3);

        let planes = [row3 + row0, row3 - row0, row3 + row1, row3 - row1, row2, row3 - row2].map(|plane| {
            let length = plane.truncate().length();
            if length > f32::EPSILON { plane / length } else { plane }
        });

        Frustum { planes }
    }

    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        self.planes.iter().all(|plane| {
            let normal = plane.truncate();
            // the corner furthest along the normal
            let positive = Vec3::select(normal.cmpge(Vec3::ZERO), aabb.max, aabb.min);
            normal.dot(positive) + plane.w >= 0.0
        })
    }

    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.truncate().dot(center) + plane.w >= -radius)
    }
}

/// Contract of the index over cached but inactive entries. The scheduler only ever talks to this trait;
/// how the space is partitioned is up to the implementation.
pub trait SpatialIndex {
    fn insert(&mut self, id: LocalId, bounds: Aabb);

    /// Returns whether the id was present.
    fn remove(&mut self, id: LocalId) -> bool;

    fn contains(&self, id: LocalId) -> bool;

    fn update(&mut self, id: LocalId, bounds: Aabb) {
        self.remove(id);
        self.insert(id, bounds);
    }

    /// Appends every id whose bounds intersect the frustum.
    fn query_frustum(&self, frustum: &Frustum, results: &mut Vec<LocalId>);

    /// Appends every id whose bounds intersect the sphere.
    fn query_sphere(&self, center: Vec3, radius: f32, results: &mut Vec<LocalId>);

    fn ids(&self) -> Vec<LocalId>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&mut self);
}

const MAX_ELEMENTS_PER_NODE: usize = 8;
const MAX_DEPTH: u8 = 8;

struct OctreeNode {
    bounds: Aabb,
    depth: u8,
    elements: Vec<(LocalId, Aabb)>,
    children: Option<[usize; 8]>,
}

/// A loose octree over a fixed world box. Elements are stored in the deepest node that fully contains them;
/// elements outside of the world box stay in the root, which is never culled as a whole.
pub struct Octree {
    nodes: Vec<OctreeNode>,
    locations: HashMap<LocalId, usize>,
}

impl Octree {
    pub fn new(world: Aabb) -> Self {
        Octree {
            nodes: vec![OctreeNode {
                bounds: world,
                depth: 0,
                elements: vec![],
                children: None,
            }],
            locations: HashMap::new(),
        }
    }

    /// A region: 256m wide and tall enough for anything that is built in it.
    pub fn for_region(width: f32) -> Self {
        Octree::new(Aabb::new(Vec3::new(0.0, 0.0, -256.0), Vec3::new(width, width, 4096.0)))
    }

    fn find_node(&self, bounds: &Aabb) -> usize {
        let mut index = 0;
        while let Some(children) = self.nodes[index].children {
            match children.iter().find(|&&child| self.nodes[child].bounds.contains(bounds)) {
                Some(&child) => index = child,
                None => break,
            }
        }
        index
    }

    fn split(&mut self, index: usize) {
        let octants = self.nodes[index].bounds.octants();
        let depth = self.nodes[index].depth + 1;
        let first = self.nodes.len();
        self.nodes.extend(octants.into_iter().map(|bounds| OctreeNode {
            bounds,
            depth,
            elements: vec![],
            children: None,
        }));
        let children: [usize; 8] = std::array::from_fn(|i| first + i);
        self.nodes[index].children = Some(children);

        let elements = std::mem::take(&mut self.nodes[index].elements);
        for (id, bounds) in elements {
            let target = children
                .iter()
                .copied()
                .find(|&child| self.nodes[child].bounds.contains(&bounds))
                .unwrap_or(index);
            self.nodes[target].elements.push((id, bounds));
            self.locations.insert(id, target);
        }
    }

    fn query<F: Fn(&Aabb) -> bool>(&self, test: F, results: &mut Vec<LocalId>) {
        let mut stack = vec![0];
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            // the root may hold elements outside of its bounds
            if index != 0 && !test(&node.bounds) {
                continue;
            }
            results.extend(
                node.elements
                    .iter()
                    .filter(|(_, bounds)| test(bounds))
                    .map(|(id, _)| *id),
            );
            if let Some(children) = node.children {
                stack.extend(children);
            }
        }
    }
}

impl SpatialIndex for Octree {
    fn insert(&mut self, id: LocalId, bounds: Aabb) {
        if self.locations.contains_key(&id) {
            self.remove(id);
        }

        let index = self.find_node(&bounds);
        self.nodes[index].elements.push((id, bounds));
        self.locations.insert(id, index);

        let node = &self.nodes[index];
        if node.children.is_none() && node.elements.len() > MAX_ELEMENTS_PER_NODE && node.depth < MAX_DEPTH {
            self.split(index);
        }
    }

    fn remove(&mut self, id: LocalId) -> bool {
        let Some(index) = self.locations.remove(&id) else {
            return false;
        };
        let elements = &mut self.nodes[index].elements;
        if let Some(position) = elements.iter().position(|(element, _)| *element == id) {
            elements.swap_remove(position);
        }
        true
    }

    fn contains(&self, id: LocalId) -> bool {
        self.locations.contains_key(&id)
    }

    fn query_frustum(&self, frustum: &Frustum, results: &mut Vec<LocalId>) {
        self.query(|bounds| frustum.intersects_aabb(bounds), results);
    }

    fn query_sphere(&self, center: Vec3, radius: f32, results: &mut Vec<LocalId>) {
        self.query(|bounds| bounds.intersects_sphere(center, radius), results);
    }

    fn ids(&self) -> Vec<LocalId> {
        self.locations.keys().copied().collect()
    }

    fn len(&self) -> usize {
        self.locations.len()
    }

    fn clear(&mut self) {
        self.nodes.truncate(1);
        self.nodes[0].elements.clear();
        self.nodes[0].children = None;
        self.locations.clear();
    }
}
