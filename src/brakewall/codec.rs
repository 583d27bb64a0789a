//! Brake-wall section codec.
//!
//! Layout: `u32` closed pair count, the pair positions, then (when the
//! wall is non-empty) the tree body — 24-byte left/right descriptor
//! pairs with offsets relative to the tree start, leaves holding the
//! pair indices shifted left by one with the rally-school flag in bit 14
//! and auto-respawn in bit 15.

use cgmath::Vector2;

use crate::binary::{BinaryError, BinaryReader, BinaryWriter, Reservation};
use crate::spatial::Aabb2;

use super::{BrakeNode, BrakeWallCodecError, BrakeWallPair, BrakeWallSection, PAIR_INDEX_LIMIT};

/// Node descriptor: Aabb2 (16 bytes) + count + offset.
const NODE_DESC_SIZE: usize = 24;

const RALLY_SCHOOL_BIT: u16 = 1 << 14;
const AUTO_RESPAWN_BIT: u16 = 1 << 15;

fn write_node_desc(w: &mut BinaryWriter, bounds: Aabb2, count: u32, offset: u32) {
    bounds.write(w);
    w.write_u32(count);
    w.write_u32(offset);
}

struct NodeDesc {
    bounds: Aabb2,
    count: u32,
    offset: u32,
}

impl NodeDesc {
    fn read(r: &mut BinaryReader<'_>) -> Result<Self, BinaryError> {
        Ok(Self {
            bounds: Aabb2::read(r)?,
            count: r.read_u32()?,
            offset: r.read_u32()?,
        })
    }

    fn is_absent(&self) -> bool {
        self.count == 0 && self.offset == 0
    }
}

/// Flags collected from leaf entries while decoding, applied to the pair
/// array once the tree walk is done.
struct FlagRecord {
    index: u16,
    rally_school: bool,
    auto_respawn: bool,
}

impl BrakeWallSection {
    pub fn encode(&self) -> Result<Vec<u8>, BrakeWallCodecError> {
        if self.pairs.is_empty() != self.root.is_none() {
            return Err(BrakeWallCodecError::TreeMismatch {
                pair_count: self.pairs.len() as u32,
                has_tree: self.root.is_some(),
            });
        }

        let mut w = BinaryWriter::new();
        w.write_len_prefixed(&self.pairs, 1, |w, pair| {
            w.write_f32(pair.inner.x);
            w.write_f32(pair.inner.y);
            w.write_f32(pair.outer.x);
            w.write_f32(pair.outer.y);
        });

        if let Some(BrakeNode::Split { left, right, .. }) = &self.root {
            let tree_start = w.position();
            self.encode_pair(&mut w, tree_start, left.as_deref(), right.as_deref())?;
        } else if let Some(BrakeNode::Leaf { .. }) = &self.root {
            // Build always wraps a lone leaf into a descriptor pair.
            return Err(BrakeWallCodecError::TreeMismatch {
                pair_count: self.pairs.len() as u32,
                has_tree: true,
            });
        }
        Ok(w.into_bytes())
    }

    fn encode_pair(
        &self,
        w: &mut BinaryWriter,
        tree_start: usize,
        left: Option<&BrakeNode>,
        right: Option<&BrakeNode>,
    ) -> Result<(), BrakeWallCodecError> {
        let left_desc = w.reserve(NODE_DESC_SIZE);
        let right_desc = w.reserve(NODE_DESC_SIZE);
        self.encode_side(w, tree_start, left, left_desc)?;
        self.encode_side(w, tree_start, right, right_desc)?;
        Ok(())
    }

    fn encode_side(
        &self,
        w: &mut BinaryWriter,
        tree_start: usize,
        node: Option<&BrakeNode>,
        desc: Reservation,
    ) -> Result<(), BrakeWallCodecError> {
        match node {
            None => {
                w.finalize(desc, |w| write_node_desc(w, Aabb2::ZERO, 0, 0))?;
            }
            Some(BrakeNode::Leaf { bounds, members }) => {
                let offset = (w.position() - tree_start) as u32;
                for &index in members {
                    if usize::from(index) >= self.pairs.len() {
                        return Err(BrakeWallCodecError::PairIndexOutOfRange {
                            index,
                            pair_count: self.pairs.len() as u32,
                        });
                    }
                    if usize::from(index) >= PAIR_INDEX_LIMIT {
                        return Err(BrakeWallCodecError::PairIndexOverflow { index });
                    }
                    let pair = &self.pairs[usize::from(index)];
                    let mut entry = index << 1;
                    if pair.rally_school {
                        entry |= RALLY_SCHOOL_BIT;
                    }
                    if pair.auto_respawn {
                        entry |= AUTO_RESPAWN_BIT;
                    }
                    w.write_u16(entry);
                }
                w.pad_to(4);
                w.finalize(desc, |w| {
                    write_node_desc(w, *bounds, members.len() as u32, offset)
                })?;
            }
            Some(BrakeNode::Split {
                bounds,
                left,
                right,
            }) => {
                let offset = (w.position() - tree_start) as u32;
                self.encode_pair(w, tree_start, left.as_deref(), right.as_deref())?;
                w.finalize(desc, |w| write_node_desc(w, *bounds, 0, offset))?;
            }
        }
        Ok(())
    }

    pub fn decode(data: &[u8]) -> Result<Self, BrakeWallCodecError> {
        let mut r = BinaryReader::new(data);
        Self::decode_from(&mut r)
    }

    /// Decode from a reader positioned on the pair count, bounded by the
    /// end of the section.
    pub fn decode_from(r: &mut BinaryReader<'_>) -> Result<Self, BrakeWallCodecError> {
        let mut pairs = r.read_len_prefixed(1, |r| {
            let inner_x = r.read_f32()?;
            let inner_y = r.read_f32()?;
            let outer_x = r.read_f32()?;
            let outer_y = r.read_f32()?;
            Ok(BrakeWallPair {
                inner: Vector2::new(inner_x, inner_y),
                outer: Vector2::new(outer_x, outer_y),
                rally_school: false,
                auto_respawn: false,
            })
        })?;

        let root = if pairs.is_empty() {
            None
        } else {
            let tree_start = r.position();
            let mut flags = Vec::new();
            let (left, right) =
                decode_tree_pair(r, tree_start, pairs.len() as u32, &mut flags)?;
            let bounds = match (&left, &right) {
                (Some(l), Some(r)) => l.bounds().union(r.bounds()),
                (Some(l), None) => l.bounds(),
                (None, Some(r)) => r.bounds(),
                (None, None) => Aabb2::ZERO,
            };
            for record in flags {
                let pair = &mut pairs[usize::from(record.index)];
                pair.rally_school = record.rally_school;
                pair.auto_respawn = record.auto_respawn;
            }
            Some(BrakeNode::Split {
                bounds,
                left,
                right,
            })
        };

        if r.position() != r.limit() {
            return Err(BrakeWallCodecError::OffsetMismatch {
                expected: r.limit() as u32,
                actual: r.position() as u32,
                section: "section end".to_string(),
            });
        }
        Ok(Self { pairs, root })
    }
}

type BrakeChildren = (Option<Box<BrakeNode>>, Option<Box<BrakeNode>>);

fn decode_tree_pair(
    r: &mut BinaryReader<'_>,
    tree_start: usize,
    pair_count: u32,
    flags: &mut Vec<FlagRecord>,
) -> Result<BrakeChildren, BrakeWallCodecError> {
    let left_desc = NodeDesc::read(r)?;
    let right_desc = NodeDesc::read(r)?;
    let left = decode_side(r, tree_start, &left_desc, pair_count, flags)?;
    let right = decode_side(r, tree_start, &right_desc, pair_count, flags)?;
    Ok((left.map(Box::new), right.map(Box::new)))
}

fn decode_side(
    r: &mut BinaryReader<'_>,
    tree_start: usize,
    desc: &NodeDesc,
    pair_count: u32,
    flags: &mut Vec<FlagRecord>,
) -> Result<Option<BrakeNode>, BrakeWallCodecError> {
    if desc.is_absent() {
        return Ok(None);
    }
    let actual = (r.position() - tree_start) as u32;
    if desc.offset != actual {
        return Err(BrakeWallCodecError::OffsetMismatch {
            expected: desc.offset,
            actual,
            section: if desc.count == 0 {
                "brake wall node".to_string()
            } else {
                "brake wall leaf".to_string()
            },
        });
    }

    if desc.count == 0 {
        let (left, right) = decode_tree_pair(r, tree_start, pair_count, flags)?;
        return Ok(Some(BrakeNode::Split {
            bounds: desc.bounds,
            left,
            right,
        }));
    }

    // Fail on an absurd descriptor count before allocating for it.
    let entry_bytes = desc.count as usize * 2;
    if entry_bytes > r.remaining() {
        return Err(BrakeWallCodecError::Binary(BinaryError::Overflow {
            offset: r.position(),
            requested: entry_bytes,
            limit: r.limit(),
        }));
    }
    let mut members = Vec::with_capacity(desc.count as usize);
    for _ in 0..desc.count {
        let entry = r.read_u16()?;
        if entry & 1 != 0 {
            return Err(BrakeWallCodecError::MalformedLeafEntry { entry });
        }
        let index = (entry & !(RALLY_SCHOOL_BIT | AUTO_RESPAWN_BIT)) >> 1;
        if u32::from(index) >= pair_count {
            return Err(BrakeWallCodecError::PairIndexOutOfRange { index, pair_count });
        }
        flags.push(FlagRecord {
            index,
            rally_school: entry & RALLY_SCHOOL_BIT != 0,
            auto_respawn: entry & AUTO_RESPAWN_BIT != 0,
        });
        members.push(index);
    }
    r.skip_padding(4)?;

    Ok(Some(BrakeNode::Leaf {
        bounds: desc.bounds,
        members,
    }))
}
