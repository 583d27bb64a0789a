//! Brake-wall section: a single-level 2-D tree over wall point pairs.
//!
//! The wall is a wound loop of inner/outer point pairs bounding the
//! drivable surface. The builder closes the loop, carves the closed
//! index range into overlap-extended chunks and hangs each chunk off a
//! generic median KD tree; leaves serialize the pair indices with the
//! rally-school and auto-respawn flags packed into the same 16-bit
//! entries.

use std::fmt;

use cgmath::Vector2;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::binary::BinaryError;
use crate::kdtree::{KdNode, KdTree};
use crate::spatial::Aabb2;

mod codec;

/// Targeted members per chunk before overlap extension.
pub const CHUNK_TARGET_SIZE: usize = 7;

/// Hard cap on the closed pair count: an index is stored shifted left by
/// one with flags in bits 14 and 15, leaving 13 bits of index space.
pub const PAIR_INDEX_LIMIT: usize = 8192;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BrakeWallPair {
    pub inner: Vector2<f32>,
    pub outer: Vector2<f32>,
    pub rally_school: bool,
    pub auto_respawn: bool,
}

impl BrakeWallPair {
    pub fn points(&self) -> [Vector2<f32>; 2] {
        [self.inner, self.outer]
    }
}

/// A wound wall loop, closed by duplicating the first pair.
///
/// The input must already be wound consistently (clockwise or
/// anticlockwise) around the track centerline — construction does not
/// re-sort, and a mis-wound list builds a tree with broken spatial
/// locality and an in-game wall gap.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BrakeWall {
    pairs: Vec<BrakeWallPair>,
}

impl BrakeWall {
    /// Store the wound list, appending a duplicate of the first pair to
    /// close the loop (unless the list is empty).
    pub fn from_pairs(mut pairs: Vec<BrakeWallPair>) -> Self {
        if let Some(&first) = pairs.first() {
            pairs.push(first);
        }
        Self { pairs }
    }

    /// The closed pair list, duplicate included.
    pub fn pairs(&self) -> &[BrakeWallPair] {
        &self.pairs
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Brake-wall tree node. Leaves hold pair indices; the flags live on the
/// pairs and are packed into the leaf entries at encode time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum BrakeNode {
    Split {
        bounds: Aabb2,
        left: Option<Box<BrakeNode>>,
        right: Option<Box<BrakeNode>>,
    },
    Leaf {
        bounds: Aabb2,
        members: Vec<u16>,
    },
}

impl BrakeNode {
    pub fn bounds(&self) -> Aabb2 {
        match self {
            Self::Split { bounds, .. } | Self::Leaf { bounds, .. } => *bounds,
        }
    }
}

/// The in-memory brake-wall section: the closed pair list plus its tree
/// (`None` when the wall is empty).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BrakeWallSection {
    pub pairs: Vec<BrakeWallPair>,
    pub root: Option<BrakeNode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrakeWallBuildError {
    /// The closed list has more pairs than the 13-bit index space holds.
    PairIndexOverflow { pair_count: usize },
}

impl fmt::Display for BrakeWallBuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PairIndexOverflow { pair_count } => write!(
                f,
                "brake wall has {pair_count} point pairs, limit is {PAIR_INDEX_LIMIT}"
            ),
        }
    }
}

impl std::error::Error for BrakeWallBuildError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrakeWallCodecError {
    OffsetMismatch {
        expected: u32,
        actual: u32,
        section: String,
    },
    /// A leaf entry references a pair past the serialized array.
    PairIndexOutOfRange { index: u16, pair_count: u32 },
    /// A leaf entry has its low bit set; indices are stored shifted left
    /// by one, so bit 0 is always clear in a well-formed file.
    MalformedLeafEntry { entry: u16 },
    /// A member index does not fit the shifted-with-flags encoding.
    PairIndexOverflow { index: u16 },
    /// The pair list and the tree disagree about the wall being empty.
    TreeMismatch { pair_count: u32, has_tree: bool },
    Binary(BinaryError),
}

impl fmt::Display for BrakeWallCodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OffsetMismatch {
                expected,
                actual,
                section,
            } => write!(
                f,
                "{section}: expected offset {expected:#x}, found {actual:#x}"
            ),
            Self::PairIndexOutOfRange { index, pair_count } => {
                write!(f, "leaf references pair {index} of {pair_count}")
            }
            Self::MalformedLeafEntry { entry } => {
                write!(f, "leaf entry {entry:#06x} has its low bit set")
            }
            Self::PairIndexOverflow { index } => {
                write!(f, "pair index {index} does not fit the 13-bit entry encoding")
            }
            Self::TreeMismatch {
                pair_count,
                has_tree,
            } => write!(
                f,
                "section has {pair_count} pairs but has_tree = {has_tree}"
            ),
            Self::Binary(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for BrakeWallCodecError {}

impl From<BinaryError> for BrakeWallCodecError {
    fn from(err: BinaryError) -> Self {
        Self::Binary(err)
    }
}

/// Overlap-extended chunk: contiguous pair indices plus the first index
/// of the next chunk.
struct BrakeChunk {
    bounds: Aabb2,
    members: Vec<u16>,
}

impl BrakeWallSection {
    /// Chunk the closed loop and build the tree.
    ///
    /// The index range splits into `ceil(n / 7)` contiguous chunks, each
    /// extended with the first index of the next chunk (wrapping to 0 for
    /// the last) so adjacent leaves overlap and a vehicle cannot slip
    /// through a seam. Each chunk becomes one leaf of a 2-D median KD
    /// tree keyed by the chunk's bbox center.
    pub fn build(wall: &BrakeWall) -> Result<Self, BrakeWallBuildError> {
        let pairs = wall.pairs().to_vec();
        let n = pairs.len();
        if n == 0 {
            return Ok(Self { pairs, root: None });
        }
        if n > PAIR_INDEX_LIMIT {
            return Err(BrakeWallBuildError::PairIndexOverflow { pair_count: n });
        }

        let chunk_count = n.div_ceil(CHUNK_TARGET_SIZE);
        let mut keyed = Vec::with_capacity(chunk_count);
        for chunk in 0..chunk_count {
            let start = chunk * CHUNK_TARGET_SIZE;
            let end = (start + CHUNK_TARGET_SIZE).min(n);
            let mut members: Vec<u16> = (start..end).map(|i| i as u16).collect();
            let extension = if end == n { 0u16 } else { end as u16 };
            if !members.contains(&extension) {
                members.push(extension);
            }
            let bounds = Aabb2::from_points(
                members
                    .iter()
                    .flat_map(|&index| pairs[index as usize].points()),
            )
            .unwrap_or(Aabb2::ZERO);
            let center = bounds.center();
            keyed.push(([center.x, center.y], BrakeChunk { bounds, members }));
        }

        let tree = KdTree::build_median(keyed, 1);
        let node = convert_node(tree.root);
        let root = match node {
            // A single-chunk wall still serializes as a descriptor pair.
            leaf @ BrakeNode::Leaf { .. } => BrakeNode::Split {
                bounds: leaf.bounds(),
                left: Some(Box::new(leaf)),
                right: None,
            },
            split => split,
        };
        debug!("brake wall build: {n} pairs into {chunk_count} chunks");
        Ok(Self {
            pairs,
            root: Some(root),
        })
    }
}

fn convert_node(node: KdNode<BrakeChunk>) -> BrakeNode {
    match node {
        KdNode::Split { left, right } => {
            let left = convert_node(*left);
            let right = convert_node(*right);
            let bounds = left.bounds().union(right.bounds());
            BrakeNode::Split {
                bounds,
                left: Some(Box::new(left)),
                right: Some(Box::new(right)),
            }
        }
        KdNode::Leaf(mut chunks) => {
            // max_children = 1 puts exactly one chunk in each leaf.
            debug_assert_eq!(chunks.len(), 1);
            let chunk = chunks.remove(0);
            BrakeNode::Leaf {
                bounds: chunk.bounds,
                members: chunk.members,
            }
        }
    }
}

#[cfg(test)]
mod tests;
