//! Spatial partition over drawable leaves.

use glam::Vec3;

use super::isect::{Bounds3, VolumeCull, VolumeIsect};

/// Hierarchy of bounds whose leaves are drawables, addressed by index.
pub trait SpaceTree {
    fn num_leaves(&self) -> usize;
    fn leaf_bounds(&self, leaf: i16) -> Bounds3;

    /// Appends every leaf `isect` does not cull.
    fn harvest_leaves(&self, isect: &dyn VolumeIsect, out: &mut Vec<i16>);

    /// Like [`SpaceTree::harvest_leaves`], restricted to `enabled`.
    fn harvest_enabled_leaves(
        &self,
        isect: &dyn VolumeIsect,
        enabled: &[i16],
        out: &mut Vec<i16>,
    ) {
        out.extend(
            enabled
                .iter()
                .copied()
                .filter(|&leaf| isect.test(&self.leaf_bounds(leaf)) != VolumeCull::Culled),
        );
    }

    /// Appends every leaf.
    fn all_leaves(&self, out: &mut Vec<i16>) {
        out.extend(0..self.num_leaves() as i16);
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf(i16),
    Inner { left: usize, right: usize },
}

/// Bounding volume hierarchy built by median splits on the longest axis.
#[derive(Debug, Clone, Default)]
pub struct LeafTree {
    leaves: Vec<Bounds3>,
    nodes: Vec<(Bounds3, Node)>,
    root: Option<usize>,
}

impl LeafTree {
    /// # Panics
    /// With more leaves than an `i16` can index.
    pub fn new(leaves: Vec<Bounds3>) -> Self {
        assert!(
            leaves.len() <= i16::MAX as usize,
            "Too many leaves for a space tree: {}",
            leaves.len()
        );
        let mut tree = Self {
            leaves,
            nodes: Vec::new(),
            root: None,
        };
        let mut order: Vec<i16> = (0..tree.leaves.len() as i16).collect();
        if !order.is_empty() {
            tree.root = Some(tree.build(&mut order));
        }
        tree
    }

    fn build(&mut self, order: &mut [i16]) -> usize {
        let bounds = order
            .iter()
            .map(|&l| self.leaves[l as usize])
            .reduce(|a, b| a.union(&b))
            .unwrap_or(Bounds3::new(Vec3::ZERO, Vec3::ZERO));

        if let [leaf] = order {
            self.nodes.push((bounds, Node::Leaf(*leaf)));
            return self.nodes.len() - 1;
        }

        let size = bounds.max - bounds.min;
        let axis = if size.x >= size.y && size.x >= size.z {
            0
        } else if size.y >= size.z {
            1
        } else {
            2
        };
        order.sort_by(|a, b| {
            let ca = self.leaves[*a as usize].center()[axis];
            let cb = self.leaves[*b as usize].center()[axis];
            ca.total_cmp(&cb)
        });

        let (lo, hi) = order.split_at_mut(order.len() / 2);
        let left = self.build(lo);
        let right = self.build(hi);
        self.nodes.push((bounds, Node::Inner { left, right }));
        self.nodes.len() - 1
    }

    fn gather(&self, node: usize, out: &mut Vec<i16>) {
        match self.nodes[node].1 {
            Node::Leaf(l) => out.push(l),
            Node::Inner { left, right } => {
                self.gather(left, out);
                self.gather(right, out);
            }
        }
    }
}

impl SpaceTree for LeafTree {
    fn num_leaves(&self) -> usize {
        self.leaves.len()
    }

    fn leaf_bounds(&self, leaf: i16) -> Bounds3 {
        self.leaves[leaf as usize]
    }

    fn harvest_leaves(&self, isect: &dyn VolumeIsect, out: &mut Vec<i16>) {
        let Some(root) = self.root else {
            return;
        };
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            let (bounds, kind) = &self.nodes[node];
            match isect.test(bounds) {
                VolumeCull::Culled => {}
                VolumeCull::Clear => self.gather(node, out),
                VolumeCull::Split => match kind {
                    Node::Leaf(l) => out.push(*l),
                    Node::Inner { left, right } => {
                        stack.push(*right);
                        stack.push(*left);
                    }
                },
            }
        }
    }
}
