//! Two-level collision tree: a root tree of link nodes over subtrees of
//! packed triangle leaves.
//!
//! The root tree groups the mesh so every subtree references fewer than
//! [`SUBTREE_VERTEX_CEILING`] unique vertices and its triangle indices fit
//! `u16`. Each subtree is its own binary tree whose leaves carry at most
//! [`LEAF_TRIANGLE_CAPACITY`] triangles with quantized, bit-packed
//! attributes. Link nodes address subtrees through an offset table and
//! subtrees carry their branch traversal back to the link, so the packed
//! file needs no absolute pointers between the two levels.

use std::fmt;

use cgmath::Vector3;
use serde::{Deserialize, Serialize};

use crate::binary::BinaryError;
use crate::spatial::Aabb3;
use crate::traversal::{BranchTraversal, TraversalError};

mod build;
mod codec;

pub use codec::{dequantize_unorm, quantize_unorm};

/// Magic bytes at offset 0 of a collision container.
pub const COLLISION_MAGIC: &[u8; 4] = b"OC7R";

/// A subtree must reference fewer unique vertices than this so its
/// triangle indices fit a 16-bit index space.
pub const SUBTREE_VERTEX_CEILING: usize = 65536;

/// Maximum triangles per subtree leaf.
pub const LEAF_TRIANGLE_CAPACITY: usize = 12;

/// Encoder input: the mesh-extraction collaborator's hand-off.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CollisionMesh {
    pub vertices: Vec<Vector3<f32>>,
    pub triangles: Vec<MeshTriangle>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeshTriangle {
    pub indices: [u32; 3],
    pub attributes: TriangleAttributes,
}

/// Per-triangle surface attributes, as floats in [0, 1].
///
/// Encoding is lossy: blending and shading quantize to 5 bits per vertex,
/// UVs to 4 bits per axis. Inputs are clamped to [0, 1] before
/// quantizing, never rejected. `uvs` is `[material][vertex][axis]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TriangleAttributes {
    pub blending: [f32; 3],
    pub shading: [f32; 3],
    pub no_auto_spawn: bool,
    pub no_auto_spawn_flipped: bool,
    pub materials: [u8; 2],
    pub uvs: [[[f32; 2]; 3]; 2],
}

impl Default for TriangleAttributes {
    fn default() -> Self {
        Self {
            blending: [0.0; 3],
            shading: [0.0; 3],
            no_auto_spawn: false,
            no_auto_spawn_flipped: false,
            materials: [0; 2],
            uvs: [[[0.0; 2]; 3]; 2],
        }
    }
}

impl TriangleAttributes {
    /// The attributes as they survive an encode/decode round trip:
    /// every float pushed through the same clamp-and-round quantizer the
    /// codec uses.
    pub fn requantized(&self) -> Self {
        let q5 = |v: f32| dequantize_unorm(quantize_unorm(v, 31), 31);
        let q4 = |v: f32| dequantize_unorm(quantize_unorm(v, 15), 15);
        Self {
            blending: self.blending.map(q5),
            shading: self.shading.map(q5),
            no_auto_spawn: self.no_auto_spawn,
            no_auto_spawn_flipped: self.no_auto_spawn_flipped,
            materials: self.materials,
            uvs: self.uvs.map(|material| material.map(|uv| uv.map(q4))),
        }
    }
}

/// A triangle inside a subtree leaf: local 16-bit vertex indices plus
/// attributes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SurfaceTriangle {
    pub indices: [u16; 3],
    pub attributes: TriangleAttributes,
}

impl SurfaceTriangle {
    pub fn requantized(&self) -> Self {
        Self {
            indices: self.indices,
            attributes: self.attributes.requantized(),
        }
    }
}

/// The in-memory collision container.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollisionTree {
    pub root: RootNode,
    pub subtrees: Vec<Subtree>,
}

/// Root-tree node. The root itself is always a `Split` — the game
/// rejects a container whose root tree has no branch — and a side may be
/// absent when a forced split could not fill both halves.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RootNode {
    Split {
        bounds: Aabb3,
        left: Option<Box<RootNode>>,
        right: Option<Box<RootNode>>,
    },
    /// Leaf of the root tree: points at a subtree instead of holding
    /// triangles.
    Link {
        bounds: Aabb3,
        subtree: usize,
        triangle_count: u32,
    },
}

impl RootNode {
    pub fn bounds(&self) -> Aabb3 {
        match self {
            Self::Split { bounds, .. } | Self::Link { bounds, .. } => *bounds,
        }
    }
}

/// An independently addressed second-level tree with its own vertex pool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Subtree {
    /// Path from the root tree's root to this subtree's link node.
    pub traversal: BranchTraversal,
    pub vertices: Vec<Vector3<f32>>,
    pub root: SurfaceNode,
}

impl Subtree {
    pub fn triangle_count(&self) -> u32 {
        fn count(node: &SurfaceNode) -> u32 {
            match node {
                SurfaceNode::Split { left, right, .. } => {
                    left.as_deref().map_or(0, count) + right.as_deref().map_or(0, count)
                }
                SurfaceNode::Leaf { triangles, .. } => triangles.len() as u32,
            }
        }
        count(&self.root)
    }
}

/// Subtree-internal node. A subtree small enough to be a single leaf is
/// still built as `Split { left: leaf, right: None }` so every serialized
/// tree body is a run of left/right descriptor pairs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SurfaceNode {
    Split {
        bounds: Aabb3,
        left: Option<Box<SurfaceNode>>,
        right: Option<Box<SurfaceNode>>,
    },
    Leaf {
        bounds: Aabb3,
        triangles: Vec<SurfaceTriangle>,
    },
}

impl SurfaceNode {
    pub fn bounds(&self) -> Aabb3 {
        match self {
            Self::Split { bounds, .. } | Self::Leaf { bounds, .. } => *bounds,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollisionBuildError {
    /// The format cannot express a link node with zero triangles.
    EmptyMesh,
    TriangleIndexOutOfRange {
        triangle: usize,
        index: u32,
        vertex_count: usize,
    },
    Traversal(TraversalError),
}

impl fmt::Display for CollisionBuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMesh => write!(f, "collision mesh has no triangles"),
            Self::TriangleIndexOutOfRange {
                triangle,
                index,
                vertex_count,
            } => write!(
                f,
                "triangle {triangle} references vertex {index} of {vertex_count}"
            ),
            Self::Traversal(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for CollisionBuildError {}

impl From<TraversalError> for CollisionBuildError {
    fn from(err: TraversalError) -> Self {
        Self::Traversal(err)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollisionCodecError {
    BadMagic { found: [u8; 4] },
    /// Expected and observed positions diverged; `section` names the
    /// structural context ("subtree 3 vertex section").
    OffsetMismatch {
        expected: u32,
        actual: u32,
        section: String,
    },
    SubtreeVertexOverflow { subtree: usize, vertex_count: u32 },
    LeafTriangleOverflow { count: u32 },
    /// A link node's table offset is unaligned or out of range.
    BadSubtreeSlot { offset: u32, subtree_count: u32 },
    /// Link nodes must receive subtree indices sequentially in traversal
    /// order.
    SubtreeOrderMismatch { expected: usize, found: usize },
    VertexIndexOutOfRange {
        subtree: usize,
        index: u16,
        vertex_count: u32,
    },
    CountMismatch {
        section: String,
        expected: u32,
        actual: u32,
    },
    /// A subtree's recorded traversal disagrees with the link node that
    /// addresses it.
    TraversalMismatch { subtree: usize },
    /// The root tree is a bare link with no split, which the game rejects.
    DegenerateRoot,
    Traversal(TraversalError),
    Binary(BinaryError),
}

impl fmt::Display for CollisionCodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic { found } => {
                write!(f, "bad collision magic {found:02x?}, expected \"OC7R\"")
            }
            Self::OffsetMismatch {
                expected,
                actual,
                section,
            } => write!(
                f,
                "{section}: expected offset {expected:#x}, found {actual:#x}"
            ),
            Self::SubtreeVertexOverflow {
                subtree,
                vertex_count,
            } => write!(
                f,
                "subtree {subtree} has {vertex_count} vertices, limit is {SUBTREE_VERTEX_CEILING}"
            ),
            Self::LeafTriangleOverflow { count } => write!(
                f,
                "leaf holds {count} triangles, limit is {LEAF_TRIANGLE_CAPACITY}"
            ),
            Self::BadSubtreeSlot {
                offset,
                subtree_count,
            } => write!(
                f,
                "link node table offset {offset:#x} invalid for {subtree_count} subtrees"
            ),
            Self::SubtreeOrderMismatch { expected, found } => write!(
                f,
                "link node addresses subtree {found}, expected {expected} in traversal order"
            ),
            Self::VertexIndexOutOfRange {
                subtree,
                index,
                vertex_count,
            } => write!(
                f,
                "subtree {subtree}: triangle references vertex {index} of {vertex_count}"
            ),
            Self::CountMismatch {
                section,
                expected,
                actual,
            } => write!(f, "{section}: expected count {expected}, found {actual}"),
            Self::TraversalMismatch { subtree } => write!(
                f,
                "subtree {subtree} traversal disagrees with its link node path"
            ),
            Self::DegenerateRoot => write!(f, "root tree must contain at least one split"),
            Self::Traversal(err) => write!(f, "{err}"),
            Self::Binary(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for CollisionCodecError {}

impl From<BinaryError> for CollisionCodecError {
    fn from(err: BinaryError) -> Self {
        Self::Binary(err)
    }
}

impl From<TraversalError> for CollisionCodecError {
    fn from(err: TraversalError) -> Self {
        Self::Traversal(err)
    }
}

#[cfg(test)]
mod tests;
