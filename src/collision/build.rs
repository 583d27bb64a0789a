use std::collections::{HashMap, HashSet};

use cgmath::Vector3;
use log::debug;

use crate::kdtree::{partition_at_mean, MeanSplit};
use crate::spatial::Aabb3;
use crate::traversal::{BranchTraversal, Step};

use super::{
    CollisionBuildError, CollisionMesh, CollisionTree, RootNode, Subtree, SurfaceNode,
    SurfaceTriangle, LEAF_TRIANGLE_CAPACITY, SUBTREE_VERTEX_CEILING,
};

/// Triangle centroid paired with its index into the source mesh.
type TriangleItem = (Vector3<f32>, usize);

impl CollisionTree {
    /// Partition a mesh into the two-level tree.
    ///
    /// The outer recursion splits triangle centroids at the mean along
    /// the longest axis until each group references fewer than
    /// [`SUBTREE_VERTEX_CEILING`] unique vertices, with a forced minimum
    /// of one split — the game rejects a root tree without a branch.
    /// Link nodes take sequential subtree indices in traversal order.
    pub fn build(mesh: &CollisionMesh) -> Result<Self, CollisionBuildError> {
        if mesh.triangles.is_empty() {
            return Err(CollisionBuildError::EmptyMesh);
        }
        for (triangle, t) in mesh.triangles.iter().enumerate() {
            for &index in &t.indices {
                if index as usize >= mesh.vertices.len() {
                    return Err(CollisionBuildError::TriangleIndexOutOfRange {
                        triangle,
                        index,
                        vertex_count: mesh.vertices.len(),
                    });
                }
            }
        }

        let items: Vec<TriangleItem> = mesh
            .triangles
            .iter()
            .enumerate()
            .map(|(index, t)| (centroid(mesh, t.indices), index))
            .collect();

        let mut subtrees = Vec::new();
        let root = build_root_node(
            mesh,
            items,
            true,
            &BranchTraversal::new(),
            &mut subtrees,
        )?;
        debug!(
            "collision build: {} triangles into {} subtrees",
            mesh.triangles.len(),
            subtrees.len()
        );
        Ok(Self { root, subtrees })
    }
}

fn centroid(mesh: &CollisionMesh, indices: [u32; 3]) -> Vector3<f32> {
    let sum = mesh.vertices[indices[0] as usize]
        + mesh.vertices[indices[1] as usize]
        + mesh.vertices[indices[2] as usize];
    sum / 3.0
}

fn unique_vertex_count(mesh: &CollisionMesh, items: &[TriangleItem]) -> usize {
    let mut seen = HashSet::new();
    for &(_, triangle) in items {
        for index in mesh.triangles[triangle].indices {
            seen.insert(index);
        }
    }
    seen.len()
}

fn build_root_node(
    mesh: &CollisionMesh,
    items: Vec<TriangleItem>,
    force_split: bool,
    path: &BranchTraversal,
    subtrees: &mut Vec<Subtree>,
) -> Result<RootNode, CollisionBuildError> {
    if !force_split && unique_vertex_count(mesh, &items) < SUBTREE_VERTEX_CEILING {
        let triangle_count = items.len() as u32;
        let subtree = build_subtree(mesh, &items, path.clone());
        let bounds =
            Aabb3::from_points(subtree.vertices.iter().copied()).unwrap_or(Aabb3::ZERO);
        let index = subtrees.len();
        subtrees.push(subtree);
        return Ok(RootNode::Link {
            bounds,
            subtree: index,
            triangle_count,
        });
    }

    // Geometric split first; when every centroid coincides, fall back to
    // index halves — the vertex ceiling is a hard format constraint and
    // must come down regardless.
    let (left_items, right_items) = match partition_at_mean(items) {
        MeanSplit::Split { left, right } => (left, Some(right)),
        MeanSplit::Unsplit(mut rest) => {
            let upper = rest.split_off(rest.len().div_ceil(2));
            let upper = if upper.is_empty() { None } else { Some(upper) };
            (rest, upper)
        }
    };

    let left = build_root_node(mesh, left_items, false, &path.child(Step::Left)?, subtrees)?;
    let right = match right_items {
        Some(items) => Some(build_root_node(
            mesh,
            items,
            false,
            &path.child(Step::Right)?,
            subtrees,
        )?),
        None => None,
    };

    let bounds = match &right {
        Some(right) => left.bounds().union(right.bounds()),
        None => left.bounds(),
    };
    Ok(RootNode::Split {
        bounds,
        left: Some(Box::new(left)),
        right: right.map(Box::new),
    })
}

/// Gather a group's unique vertices in first-use order, remap its
/// triangles to local `u16` indices and build the inner tree.
fn build_subtree(mesh: &CollisionMesh, items: &[TriangleItem], traversal: BranchTraversal) -> Subtree {
    let mut remap: HashMap<u32, u16> = HashMap::new();
    let mut vertices: Vec<Vector3<f32>> = Vec::new();
    let mut triangles: Vec<(Vector3<f32>, SurfaceTriangle)> = Vec::with_capacity(items.len());

    for &(position, triangle) in items {
        let source = &mesh.triangles[triangle];
        let mut local = [0u16; 3];
        for (slot, &global) in source.indices.iter().enumerate() {
            local[slot] = *remap.entry(global).or_insert_with(|| {
                debug_assert!(vertices.len() < SUBTREE_VERTEX_CEILING);
                vertices.push(mesh.vertices[global as usize]);
                (vertices.len() - 1) as u16
            });
        }
        triangles.push((
            position,
            SurfaceTriangle {
                indices: local,
                attributes: source.attributes,
            },
        ));
    }

    let node = build_surface_node(&vertices, triangles);
    let root = match node {
        // A single-leaf subtree still serializes as a descriptor pair, so
        // build it in that shape.
        leaf @ SurfaceNode::Leaf { .. } => SurfaceNode::Split {
            bounds: leaf.bounds(),
            left: Some(Box::new(leaf)),
            right: None,
        },
        split => split,
    };

    Subtree {
        traversal,
        vertices,
        root,
    }
}

fn build_surface_node(
    vertices: &[Vector3<f32>],
    items: Vec<(Vector3<f32>, SurfaceTriangle)>,
) -> SurfaceNode {
    if items.len() <= LEAF_TRIANGLE_CAPACITY {
        let bounds = leaf_bounds(vertices, &items);
        return SurfaceNode::Leaf {
            bounds,
            triangles: items.into_iter().map(|(_, triangle)| triangle).collect(),
        };
    }

    // As above: identical centroids cannot stay together past the leaf
    // capacity, so an unsplittable set falls back to index halves.
    let (left_items, right_items) = match partition_at_mean(items) {
        MeanSplit::Split { left, right } => (left, right),
        MeanSplit::Unsplit(mut rest) => {
            let upper = rest.split_off(rest.len().div_ceil(2));
            (rest, upper)
        }
    };

    let left = build_surface_node(vertices, left_items);
    let right = build_surface_node(vertices, right_items);
    let bounds = left.bounds().union(right.bounds());
    SurfaceNode::Split {
        bounds,
        left: Some(Box::new(left)),
        right: Some(Box::new(right)),
    }
}

fn leaf_bounds(vertices: &[Vector3<f32>], items: &[(Vector3<f32>, SurfaceTriangle)]) -> Aabb3 {
    Aabb3::from_points(
        items
            .iter()
            .flat_map(|(_, t)| t.indices.iter().map(|&i| vertices[i as usize])),
    )
    .unwrap_or(Aabb3::ZERO)
}
