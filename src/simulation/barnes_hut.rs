//! # Barnes–Hut Octree (3D)
//!
//! Approximates gravitational acceleration by treating distant groups of
//! bodies as a single pseudo-body at their center of mass, replacing the
//! `O(N²)` all-pairs sum with an approximate `O(N log N)` traversal.
//!
//! - Space is recursively subdivided into 8 octants.
//! - Leaves hold one body, except at `MAX_DEPTH` where coincident bodies
//!   share a leaf instead of subdividing forever.
//! - Each node stores total mass, center of mass and its bounding box.
//!
//! The tree is built over every body (passive ones included) because all
//! bodies act as sources; callers only query it for active bodies.

use crate::simulation::states::NVec3;

/// Subdivision stops here; deeper bodies share the leaf
const MAX_DEPTH: usize = 48;

/// A single octree node.
///
/// Each node represents a cubic region of space that is either
/// - empty,
/// - a leaf holding its bodies in `bodies`, or
/// - an internal node with children.
pub struct BarnesHutNode3 {
    pub mass: f64,
    pub com: NVec3,
    pub bbox_min: NVec3,
    pub bbox_max: NVec3,
    pub children: [Option<usize>; 8], // indices into BarnesHutTree3::nodes
    pub bodies: Vec<usize>, // leaf contents
}

impl BarnesHutNode3 {
    fn empty(bbox_min: NVec3, bbox_max: NVec3) -> Self {
        Self {
            mass: 0.0,
            com: NVec3::zeros(),
            bbox_min,
            bbox_max,
            children: [None; 8],
            bodies: Vec::new(),
        }
    }

    fn is_leaf(&self) -> bool {
        self.children.iter().all(|c| c.is_none())
    }
}

/// A complete octree over a set of positions and masses.
pub struct BarnesHutTree3 {
    pub nodes: Vec<BarnesHutNode3>,
    pub root: usize,
}

impl BarnesHutTree3 {
    /// Build the octree.
    ///
    /// 1. Computes a cubic bounding box enclosing all bodies.
    /// 2. Inserts each body, subdividing nodes as needed.
    /// 3. Computes total mass and center of mass for every node (bottom-up).
    pub fn build(x: &[NVec3], m: &[f64]) -> Self {
        let (bbox_min, bbox_max) = compute_global_bbox(x);
        let root = 0;
        let mut tree = BarnesHutTree3 {
            nodes: vec![BarnesHutNode3::empty(bbox_min, bbox_max)],
            root,
        };

        for i in 0..x.len() {
            tree.insert_body(root, i, x, 0);
        }
        tree.compute_mass_and_com(x, m, root);
        tree
    }

    /// Net acceleration on body `i` from every other body, using the tree.
    ///
    /// Nodes whose size over distance is below `theta` are treated as a single
    /// mass at their center of mass; closer nodes are opened.
    pub fn force_on_body(&self, i: usize, x: &[NVec3], m: &[f64], g: f64, eps2: f64, theta: f64) -> NVec3 {
        let mut acc = NVec3::zeros();
        self.traverse_node(self.root, i, x[i], x, m, g, eps2, theta, &mut acc);
        acc
    }

    // helpers ==============================================================================

    /// Insert body `body_idx` into the subtree rooted at `node_idx`.
    ///
    /// - Empty leaf: the body is stored there.
    /// - Occupied leaf: subdivided and the previous occupant reinserted,
    ///   unless the depth limit is reached, in which case the leaf keeps both.
    /// - Internal node: forwarded into the child octant containing the body.
    fn insert_body(&mut self, node_idx: usize, body_idx: usize, x: &[NVec3], depth: usize) {
        let bbox_min = self.nodes[node_idx].bbox_min;
        let bbox_max = self.nodes[node_idx].bbox_max;

        if self.nodes[node_idx].is_leaf() {
            if self.nodes[node_idx].bodies.is_empty() || depth >= MAX_DEPTH {
                self.nodes[node_idx].bodies.push(body_idx);
                return;
            }
            // occupied leaf: push the occupants one level down
            let occupants = std::mem::take(&mut self.nodes[node_idx].bodies);
            self.subdivide(node_idx, bbox_min, bbox_max);
            for existing in occupants {
                self.insert_body(node_idx, existing, x, depth);
            }
        }

        let child_idx = child_index_for_point(&x[body_idx], &bbox_min, &bbox_max);
        let child_node_idx = match self.nodes[node_idx].children[child_idx] {
            Some(idx) => idx,
            None => {
                let (cmin, cmax) = child_bbox(&bbox_min, &bbox_max, child_idx);
                let new_idx = self.nodes.len();
                self.nodes.push(BarnesHutNode3::empty(cmin, cmax));
                self.nodes[node_idx].children[child_idx] = Some(new_idx);
                new_idx
            }
        };
        self.insert_body(child_node_idx, body_idx, x, depth + 1);
    }

    /// Split a node into 8 empty children covering its bounding box.
    fn subdivide(&mut self, node_idx: usize, bbox_min: NVec3, bbox_max: NVec3) {
        for child_idx in 0..8 {
            let (cmin, cmax) = child_bbox(&bbox_min, &bbox_max, child_idx);
            let new_node_idx = self.nodes.len();
            self.nodes.push(BarnesHutNode3::empty(cmin, cmax));
            self.nodes[node_idx].children[child_idx] = Some(new_node_idx);
        }
    }

    /// Bottom-up pass filling `mass` and `com` for the subtree at `node_idx`.
    fn compute_mass_and_com(&mut self, x: &[NVec3], m: &[f64], node_idx: usize) {
        let mut mass = 0.0;
        let mut com = NVec3::zeros();

        for &b in &self.nodes[node_idx].bodies {
            mass += m[b];
            com += x[b] * m[b];
        }

        let children = self.nodes[node_idx].children;
        for child_idx in children.iter().flatten().copied() {
            self.compute_mass_and_com(x, m, child_idx);
            let cn = &self.nodes[child_idx];
            if cn.mass > 0.0 {
                mass += cn.mass;
                com += cn.com * cn.mass;
            }
        }

        if mass > 0.0 {
            com /= mass;
        }

        let node = &mut self.nodes[node_idx];
        node.mass = mass;
        node.com = com;
    }

    /// Accumulate into `acc` the acceleration at `pos_i` due to the subtree.
    ///
    /// - Empty node: no contribution.
    /// - Leaf: exact softened interaction with each stored body except `body_idx`.
    /// - Internal node: approximated as one mass if `size / dist < theta`,
    ///   otherwise the children are visited.
    #[allow(clippy::too_many_arguments)]
    fn traverse_node(
        &self,
        node_idx: usize,
        body_idx: usize,
        pos_i: NVec3,
        x: &[NVec3],
        m: &[f64],
        g: f64,
        eps2: f64,
        theta: f64,
        acc: &mut NVec3,
    ) {
        let node = &self.nodes[node_idx];
        if node.mass == 0.0 {
            return;
        }

        if node.is_leaf() {
            for &b in &node.bodies {
                if b == body_idx {
                    continue; // no self-interaction
                }
                *acc += pull(x[b] - pos_i, m[b], g, eps2);
            }
            return;
        }

        let size_vec = node.bbox_max - node.bbox_min;
        let size = size_vec.x.max(size_vec.y).max(size_vec.z);
        let r = node.com - pos_i;
        let dist = r.norm();

        if dist > 0.0 && size / dist < theta {
            *acc += pull(r, node.mass, g, eps2);
        } else {
            for child_idx in node.children.iter().flatten().copied() {
                self.traverse_node(child_idx, body_idx, pos_i, x, m, g, eps2, theta, acc);
            }
        }
    }
}

/// Softened acceleration towards a mass `mass` at offset `r`
#[inline]
fn pull(r: NVec3, mass: f64, g: f64, eps2: f64) -> NVec3 {
    let d2 = r.dot(&r) + eps2;
    let inv_r = d2.sqrt().recip();
    g * mass * inv_r * inv_r * inv_r * r
}

// helpers ===========================================================================

/// Cubic bounding box enclosing every position.
///
/// The axis-aligned box is grown into a cube around its center so that node
/// size in the opening criterion is a single number.
fn compute_global_bbox(x: &[NVec3]) -> (NVec3, NVec3) {
    let mut min = NVec3::repeat(f64::INFINITY);
    let mut max = NVec3::repeat(f64::NEG_INFINITY);

    for p in x {
        min = min.inf(p);
        max = max.sup(p);
    }
    if x.is_empty() {
        return (NVec3::zeros(), NVec3::zeros());
    }

    let center = (min + max) * 0.5;
    let half = (max - min) * 0.5;
    let max_half = half.x.max(half.y).max(half.z);
    let half = NVec3::repeat(max_half);

    (center - half, center + half)
}

/// Octant index of `p` inside `[bbox_min, bbox_max]`.
///
/// Bit 0 selects the upper x half, bit 1 the upper y half, bit 2 the upper z
/// half; this matches the layout of `children[0..8]`.
fn child_index_for_point(p: &NVec3, bbox_min: &NVec3, bbox_max: &NVec3) -> usize {
    let center = (bbox_min + bbox_max) * 0.5;
    let mut idx = 0;

    if p.x >= center.x { idx |= 1; }
    if p.y >= center.y { idx |= 2; }
    if p.z >= center.z { idx |= 4; }

    idx
}

/// Bounding box of child octant `child_idx` (same bit encoding as above).
fn child_bbox(parent_min: &NVec3, parent_max: &NVec3, child_idx: usize) -> (NVec3, NVec3) {
    let center = (parent_min + parent_max) * 0.5;
    let mut min = *parent_min;
    let mut max = *parent_max;

    for axis in 0..3 {
        if child_idx & (1 << axis) == 0 {
            max[axis] = center[axis];
        } else {
            min[axis] = center[axis];
        }
    }

    (min, max)
}
