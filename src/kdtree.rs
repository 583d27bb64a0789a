//! Spatial partitioners for the container's packed trees.
//!
//! Two deliberately distinct algorithms live here. The generic
//! [`KdTree`] splits at the median along a round-robin axis and is what
//! the brake-wall section uses. The collision mesh instead splits at the
//! mean along the longest spatial axis ([`partition_at_mean`]); the two
//! produce different tree shapes and the container format mandates both,
//! so they are not unified.

use cgmath::Vector3;

/// Binary space partition over opaque payloads.
///
/// Nodes own their children exclusively; the tree is immutable once
/// built.
#[derive(Clone, Debug, PartialEq)]
pub enum KdNode<P> {
    Split {
        left: Box<KdNode<P>>,
        right: Box<KdNode<P>>,
    },
    Leaf(Vec<P>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct KdTree<P> {
    pub root: KdNode<P>,
}

impl<P> KdTree<P> {
    /// Build by recursive median splitting over `(position, payload)`
    /// pairs in `K` dimensions.
    ///
    /// At depth `d` the split axis is `d % K`; the point set is stably
    /// sorted by that coordinate (ties keep input order, which makes the
    /// build deterministic) and cut at the halfway index. Recursion stops
    /// at `max_children` points, and a cut that would leave one side
    /// empty terminates as a leaf instead of recursing on nothing.
    pub fn build_median<const K: usize>(
        points: Vec<([f32; K], P)>,
        max_children: usize,
    ) -> Self {
        let max_children = max_children.max(1);
        Self {
            root: build_median_node(points, 0, max_children),
        }
    }
}

fn build_median_node<const K: usize, P>(
    mut points: Vec<([f32; K], P)>,
    depth: usize,
    max_children: usize,
) -> KdNode<P> {
    if points.len() <= max_children {
        return KdNode::Leaf(points.into_iter().map(|(_, payload)| payload).collect());
    }

    let axis = depth % K;
    points.sort_by(|a, b| a.0[axis].total_cmp(&b.0[axis]));
    let upper = points.split_off(points.len() / 2);
    if points.is_empty() || upper.is_empty() {
        let rest = if points.is_empty() { upper } else { points };
        return KdNode::Leaf(rest.into_iter().map(|(_, payload)| payload).collect());
    }

    KdNode::Split {
        left: Box::new(build_median_node(points, depth + 1, max_children)),
        right: Box::new(build_median_node(upper, depth + 1, max_children)),
    }
}

/// Outcome of one mean split attempt.
#[derive(Debug)]
pub enum MeanSplit<T> {
    Split {
        left: Vec<(Vector3<f32>, T)>,
        right: Vec<(Vector3<f32>, T)>,
    },
    /// Every point landed on one side; the set cannot be partitioned
    /// geometrically and the caller decides whether it becomes a leaf.
    Unsplit(Vec<(Vector3<f32>, T)>),
}

/// One step of the collision-mesh partitioner: min/max per axis over the
/// point set, the axis with the largest extent is chosen, and the cut
/// threshold is the arithmetic mean of the coordinates along it.
/// `<= mean` goes left.
///
/// Termination is payload-dependent (unique-vertex ceiling for subtree
/// grouping, triangle capacity for leaves), so the caller drives the
/// recursion.
pub fn partition_at_mean<T>(items: Vec<(Vector3<f32>, T)>) -> MeanSplit<T> {
    if items.len() < 2 {
        return MeanSplit::Unsplit(items);
    }

    let mut min = items[0].0;
    let mut max = items[0].0;
    let mut sum = Vector3::new(0.0f64, 0.0, 0.0);
    for (position, _) in &items {
        for axis in 0..3 {
            if position[axis] < min[axis] {
                min[axis] = position[axis];
            }
            if position[axis] > max[axis] {
                max[axis] = position[axis];
            }
            sum[axis] += f64::from(position[axis]);
        }
    }

    let mut axis = 0;
    for candidate in 1..3 {
        if max[candidate] - min[candidate] > max[axis] - min[axis] {
            axis = candidate;
        }
    }
    let mean = (sum[axis] / items.len() as f64) as f32;

    let mut left = Vec::new();
    let mut right = Vec::new();
    for item in items {
        if item.0[axis] <= mean {
            left.push(item);
        } else {
            right.push(item);
        }
    }

    if left.is_empty() || right.is_empty() {
        let rest = if left.is_empty() { right } else { left };
        return MeanSplit::Unsplit(rest);
    }
    MeanSplit::Split { left, right }
}
