//! The `OC7R` container codec.
//!
//! Every tree body is a run of 32-byte left/right node descriptors
//! (bbox + count + offset) followed by the child bodies, written through
//! reserve/finalize so the descriptors carry real offsets once the body
//! layout is known. Subtrees live behind a table of 32-bit absolute
//! offsets, reserved as zeros and backpatched one by one.
//!
//! The decoder re-derives every offset it can and treats any divergence
//! from the recorded value as fatal: a wrong offset means either a
//! corrupt file or a format misunderstanding, and continuing would read
//! unrelated bytes as geometry.

use cgmath::Vector3;

use crate::binary::{BinaryError, BinaryReader, BinaryWriter, Reservation, COUNT_SANITY_CEILING};
use crate::spatial::Aabb3;
use crate::traversal::{BranchTraversal, Step};

use super::{
    CollisionCodecError, CollisionTree, RootNode, Subtree, SurfaceNode, SurfaceTriangle,
    TriangleAttributes, COLLISION_MAGIC, LEAF_TRIANGLE_CAPACITY, SUBTREE_VERTEX_CEILING,
};

/// Node descriptor: Aabb3 (24 bytes) + count + offset.
const NODE_DESC_SIZE: usize = 32;
/// Subtree descriptor: traversal (3) + pad (1) + vertex count + two
/// offsets.
const SUBTREE_DESC_SIZE: usize = 16;

/// `round(clamp(v, 0, 1) * max)` — the format's only quantizer.
pub fn quantize_unorm(v: f32, max: u16) -> u16 {
    (v.clamp(0.0, 1.0) * f32::from(max)).round() as u16
}

pub fn dequantize_unorm(q: u16, max: u16) -> f32 {
    f32::from(q) / f32::from(max)
}

/// Three 5-bit values and a flag in one u16: flag in bit 15, then the
/// third, second and first vertex descending.
fn pack_weights(values: [f32; 3], flag: bool) -> u16 {
    let a = quantize_unorm(values[0], 31);
    let b = quantize_unorm(values[1], 31);
    let c = quantize_unorm(values[2], 31);
    u16::from(flag) << 15 | c << 10 | b << 5 | a
}

fn unpack_weights(packed: u16) -> ([f32; 3], bool) {
    let a = packed & 0x1F;
    let b = packed >> 5 & 0x1F;
    let c = packed >> 10 & 0x1F;
    debug_assert!(a <= 31 && b <= 31 && c <= 31);
    (
        [
            dequantize_unorm(a, 31),
            dequantize_unorm(b, 31),
            dequantize_unorm(c, 31),
        ],
        packed & 0x8000 != 0,
    )
}

/// 12-byte attribute record: packed blending, packed shading, two
/// material ids, six UV bytes (material-major, `u << 4 | v`).
fn write_attributes(w: &mut BinaryWriter, attributes: &TriangleAttributes) {
    w.write_u16(pack_weights(attributes.blending, attributes.no_auto_spawn));
    w.write_u16(pack_weights(attributes.shading, attributes.no_auto_spawn_flipped));
    w.write_u8(attributes.materials[0]);
    w.write_u8(attributes.materials[1]);
    for material in &attributes.uvs {
        for uv in material {
            let u = quantize_unorm(uv[0], 15) as u8;
            let v = quantize_unorm(uv[1], 15) as u8;
            w.write_u8(u << 4 | v);
        }
    }
}

fn read_attributes(r: &mut BinaryReader<'_>) -> Result<TriangleAttributes, BinaryError> {
    let (blending, no_auto_spawn) = unpack_weights(r.read_u16()?);
    let (shading, no_auto_spawn_flipped) = unpack_weights(r.read_u16()?);
    let materials = [r.read_u8()?, r.read_u8()?];
    let mut uvs = [[[0.0f32; 2]; 3]; 2];
    for material in &mut uvs {
        for uv in material {
            let byte = r.read_u8()?;
            uv[0] = dequantize_unorm(u16::from(byte >> 4), 15);
            uv[1] = dequantize_unorm(u16::from(byte & 0x0F), 15);
        }
    }
    Ok(TriangleAttributes {
        blending,
        shading,
        no_auto_spawn,
        no_auto_spawn_flipped,
        materials,
        uvs,
    })
}

fn write_node_desc(w: &mut BinaryWriter, bounds: Aabb3, count: u32, offset: u32) {
    bounds.write(w);
    w.write_u32(count);
    w.write_u32(offset);
}

struct NodeDesc {
    bounds: Aabb3,
    count: u32,
    offset: u32,
}

impl NodeDesc {
    fn read(r: &mut BinaryReader<'_>) -> Result<Self, BinaryError> {
        Ok(Self {
            bounds: Aabb3::read(r)?,
            count: r.read_u32()?,
            offset: r.read_u32()?,
        })
    }

    fn is_absent(&self) -> bool {
        self.count == 0 && self.offset == 0
    }
}

fn path_label(path: &BranchTraversal) -> String {
    if path.is_empty() {
        return "root".to_string();
    }
    path.steps()
        .iter()
        .map(|step| match step {
            Step::Left => 'L',
            Step::Right => 'R',
        })
        .collect()
}

/// Record of a link node met while walking the root tree, used to
/// cross-check the subtree that claims its slot.
struct LinkInfo {
    path: BranchTraversal,
    triangle_count: u32,
}

impl CollisionTree {
    pub fn encode(&self) -> Result<Vec<u8>, CollisionCodecError> {
        let mut w = BinaryWriter::new();
        w.write_bytes(COLLISION_MAGIC);
        w.write_u32(self.subtrees.len() as u32);
        let table_slot = w.reserve(4);
        let tree_start = w.position();

        let RootNode::Split { left, right, .. } = &self.root else {
            return Err(CollisionCodecError::DegenerateRoot);
        };
        self.encode_root_pair(&mut w, tree_start, left.as_deref(), right.as_deref())?;

        let table_offset = w.position() as u32;
        w.finalize(table_slot, |w| w.write_u32(table_offset))?;
        let table_base = w.position();
        for _ in &self.subtrees {
            w.write_u32(0);
        }
        for (index, subtree) in self.subtrees.iter().enumerate() {
            w.pad_to(4);
            let subtree_start = w.position();
            w.write_u32_at(table_base + index * 4, subtree_start as u32);
            encode_subtree(&mut w, index, subtree)?;
        }
        Ok(w.into_bytes())
    }

    fn encode_root_pair(
        &self,
        w: &mut BinaryWriter,
        tree_start: usize,
        left: Option<&RootNode>,
        right: Option<&RootNode>,
    ) -> Result<(), CollisionCodecError> {
        let left_desc = w.reserve(NODE_DESC_SIZE);
        let right_desc = w.reserve(NODE_DESC_SIZE);
        self.encode_root_side(w, tree_start, left, left_desc)?;
        self.encode_root_side(w, tree_start, right, right_desc)?;
        Ok(())
    }

    fn encode_root_side(
        &self,
        w: &mut BinaryWriter,
        tree_start: usize,
        node: Option<&RootNode>,
        desc: Reservation,
    ) -> Result<(), CollisionCodecError> {
        match node {
            None => {
                w.finalize(desc, |w| write_node_desc(w, Aabb3::ZERO, 0, 0))?;
            }
            Some(RootNode::Link {
                bounds,
                subtree,
                triangle_count,
            }) => {
                let Some(target) = self.subtrees.get(*subtree) else {
                    return Err(CollisionCodecError::BadSubtreeSlot {
                        offset: *subtree as u32 * 4,
                        subtree_count: self.subtrees.len() as u32,
                    });
                };
                let actual = target.triangle_count();
                if actual != *triangle_count {
                    return Err(CollisionCodecError::CountMismatch {
                        section: format!("link node for subtree {subtree}"),
                        expected: *triangle_count,
                        actual,
                    });
                }
                w.finalize(desc, |w| {
                    write_node_desc(w, *bounds, *triangle_count, *subtree as u32 * 4)
                })?;
            }
            Some(RootNode::Split {
                bounds,
                left,
                right,
            }) => {
                let body = (w.position() - tree_start) as u32;
                self.encode_root_pair(w, tree_start, left.as_deref(), right.as_deref())?;
                w.finalize(desc, |w| write_node_desc(w, *bounds, 0, body))?;
            }
        }
        Ok(())
    }

    pub fn decode(data: &[u8]) -> Result<Self, CollisionCodecError> {
        let mut r = BinaryReader::new(data);
        Self::decode_from(&mut r)
    }

    /// Decode from a reader whose position sits on the magic bytes and
    /// whose overflow boundary is the end of the container.
    pub fn decode_from(r: &mut BinaryReader<'_>) -> Result<Self, CollisionCodecError> {
        let origin = r.position();
        let magic_bytes = r.read_bytes(4)?;
        let magic = [magic_bytes[0], magic_bytes[1], magic_bytes[2], magic_bytes[3]];
        if &magic != COLLISION_MAGIC {
            return Err(CollisionCodecError::BadMagic { found: magic });
        }
        let count_offset = r.position();
        let subtree_count = r.read_u32()?;
        if subtree_count > COUNT_SANITY_CEILING {
            return Err(CollisionCodecError::Binary(BinaryError::SuspiciousCount {
                offset: count_offset,
                count: subtree_count,
            }));
        }
        let table_offset = r.read_u32()?;
        let tree_start = r.position();

        let mut links = Vec::new();
        let (left, right) = decode_root_pair(
            r,
            tree_start,
            &BranchTraversal::new(),
            subtree_count,
            &mut links,
        )?;
        let bounds = union_of_sides(
            left.as_deref().map(RootNode::bounds),
            right.as_deref().map(RootNode::bounds),
        );
        let root = RootNode::Split {
            bounds,
            left,
            right,
        };
        if links.len() != subtree_count as usize {
            return Err(CollisionCodecError::CountMismatch {
                section: "link node count".to_string(),
                expected: subtree_count,
                actual: links.len() as u32,
            });
        }

        let actual_table = (r.position() - origin) as u32;
        if actual_table != table_offset {
            return Err(CollisionCodecError::OffsetMismatch {
                expected: table_offset,
                actual: actual_table,
                section: "subtree table".to_string(),
            });
        }
        let mut table = Vec::with_capacity(subtree_count as usize);
        for _ in 0..subtree_count {
            table.push(r.read_u32()?);
        }

        let mut subtrees = Vec::with_capacity(table.len());
        for (index, &slot) in table.iter().enumerate() {
            r.skip_padding(4)?;
            let actual = (r.position() - origin) as u32;
            if actual != slot {
                return Err(CollisionCodecError::OffsetMismatch {
                    expected: slot,
                    actual,
                    section: format!("subtree {index} descriptor"),
                });
            }
            subtrees.push(decode_subtree(r, index, &links[index])?);
        }

        if r.position() != r.limit() {
            return Err(CollisionCodecError::OffsetMismatch {
                expected: r.limit() as u32,
                actual: r.position() as u32,
                section: "container end".to_string(),
            });
        }
        Ok(Self { root, subtrees })
    }
}

fn encode_subtree(
    w: &mut BinaryWriter,
    index: usize,
    subtree: &Subtree,
) -> Result<(), CollisionCodecError> {
    if subtree.vertices.len() >= SUBTREE_VERTEX_CEILING {
        return Err(CollisionCodecError::SubtreeVertexOverflow {
            subtree: index,
            vertex_count: subtree.vertices.len() as u32,
        });
    }
    let subtree_start = w.position();
    let desc = w.reserve(SUBTREE_DESC_SIZE);

    let vertices_offset = (w.position() - subtree_start) as u32;
    for vertex in &subtree.vertices {
        w.write_f32(vertex.x);
        w.write_f32(vertex.y);
        w.write_f32(vertex.z);
    }
    let tree_offset = (w.position() - subtree_start) as u32;

    let SurfaceNode::Split { left, right, .. } = &subtree.root else {
        return Err(CollisionCodecError::DegenerateRoot);
    };
    encode_surface_pair(
        w,
        index,
        subtree_start,
        subtree.vertices.len() as u32,
        left.as_deref(),
        right.as_deref(),
    )?;

    let traversal = subtree.traversal.to_bytes();
    let vertex_count = subtree.vertices.len() as u32;
    w.finalize(desc, |w| {
        w.write_bytes(&traversal);
        w.write_u8(0);
        w.write_u32(vertex_count);
        w.write_u32(vertices_offset);
        w.write_u32(tree_offset);
    })?;
    Ok(())
}

fn encode_surface_pair(
    w: &mut BinaryWriter,
    index: usize,
    base: usize,
    vertex_count: u32,
    left: Option<&SurfaceNode>,
    right: Option<&SurfaceNode>,
) -> Result<(), CollisionCodecError> {
    let left_desc = w.reserve(NODE_DESC_SIZE);
    let right_desc = w.reserve(NODE_DESC_SIZE);
    encode_surface_side(w, index, base, vertex_count, left, left_desc)?;
    encode_surface_side(w, index, base, vertex_count, right, right_desc)?;
    Ok(())
}

fn encode_surface_side(
    w: &mut BinaryWriter,
    index: usize,
    base: usize,
    vertex_count: u32,
    node: Option<&SurfaceNode>,
    desc: Reservation,
) -> Result<(), CollisionCodecError> {
    match node {
        None => {
            w.finalize(desc, |w| write_node_desc(w, Aabb3::ZERO, 0, 0))?;
        }
        Some(SurfaceNode::Leaf { bounds, triangles }) => {
            if triangles.len() > LEAF_TRIANGLE_CAPACITY {
                return Err(CollisionCodecError::LeafTriangleOverflow {
                    count: triangles.len() as u32,
                });
            }
            for triangle in triangles {
                for &vertex in &triangle.indices {
                    if u32::from(vertex) >= vertex_count {
                        return Err(CollisionCodecError::VertexIndexOutOfRange {
                            subtree: index,
                            index: vertex,
                            vertex_count,
                        });
                    }
                }
            }
            let offset = (w.position() - base) as u32;
            // Index triples are counted as flattened scalars on disk.
            w.write_len_prefixed(triangles, 3, |w, triangle| {
                for &vertex in &triangle.indices {
                    w.write_u16(vertex);
                }
            });
            for triangle in triangles {
                write_attributes(w, &triangle.attributes);
            }
            w.pad_to(4);
            w.finalize(desc, |w| {
                write_node_desc(w, *bounds, triangles.len() as u32, offset)
            })?;
        }
        Some(SurfaceNode::Split {
            bounds,
            left,
            right,
        }) => {
            let offset = (w.position() - base) as u32;
            encode_surface_pair(w, index, base, vertex_count, left.as_deref(), right.as_deref())?;
            w.finalize(desc, |w| write_node_desc(w, *bounds, 0, offset))?;
        }
    }
    Ok(())
}

fn union_of_sides(left: Option<Aabb3>, right: Option<Aabb3>) -> Aabb3 {
    match (left, right) {
        (Some(l), Some(r)) => l.union(r),
        (Some(l), None) => l,
        (None, Some(r)) => r,
        (None, None) => Aabb3::ZERO,
    }
}

type RootChildren = (Option<Box<RootNode>>, Option<Box<RootNode>>);

fn decode_root_pair(
    r: &mut BinaryReader<'_>,
    tree_start: usize,
    path: &BranchTraversal,
    subtree_count: u32,
    links: &mut Vec<LinkInfo>,
) -> Result<RootChildren, CollisionCodecError> {
    let left_desc = NodeDesc::read(r)?;
    let right_desc = NodeDesc::read(r)?;
    let left = decode_root_side(
        r,
        tree_start,
        &left_desc,
        path.child(Step::Left)?,
        subtree_count,
        links,
    )?;
    let right = decode_root_side(
        r,
        tree_start,
        &right_desc,
        path.child(Step::Right)?,
        subtree_count,
        links,
    )?;
    Ok((left.map(Box::new), right.map(Box::new)))
}

fn decode_root_side(
    r: &mut BinaryReader<'_>,
    tree_start: usize,
    desc: &NodeDesc,
    path: BranchTraversal,
    subtree_count: u32,
    links: &mut Vec<LinkInfo>,
) -> Result<Option<RootNode>, CollisionCodecError> {
    if desc.is_absent() {
        return Ok(None);
    }
    if desc.count == 0 {
        let actual = (r.position() - tree_start) as u32;
        if desc.offset != actual {
            return Err(CollisionCodecError::OffsetMismatch {
                expected: desc.offset,
                actual,
                section: format!("root tree node {}", path_label(&path)),
            });
        }
        let (left, right) = decode_root_pair(r, tree_start, &path, subtree_count, links)?;
        return Ok(Some(RootNode::Split {
            bounds: desc.bounds,
            left,
            right,
        }));
    }

    // Link node: the offset indexes the subtree table.
    if desc.offset % 4 != 0 || desc.offset / 4 >= subtree_count {
        return Err(CollisionCodecError::BadSubtreeSlot {
            offset: desc.offset,
            subtree_count,
        });
    }
    let index = (desc.offset / 4) as usize;
    if index != links.len() {
        return Err(CollisionCodecError::SubtreeOrderMismatch {
            expected: links.len(),
            found: index,
        });
    }
    links.push(LinkInfo {
        path,
        triangle_count: desc.count,
    });
    Ok(Some(RootNode::Link {
        bounds: desc.bounds,
        subtree: index,
        triangle_count: desc.count,
    }))
}

fn decode_subtree(
    r: &mut BinaryReader<'_>,
    index: usize,
    link: &LinkInfo,
) -> Result<Subtree, CollisionCodecError> {
    let subtree_start = r.position();
    let raw_traversal = r.read_bytes(3)?;
    let traversal_bytes = [raw_traversal[0], raw_traversal[1], raw_traversal[2]];
    let pad_offset = r.position();
    let pad = r.read_u8()?;
    if pad != 0 {
        return Err(CollisionCodecError::Binary(BinaryError::NonZeroPadding {
            offset: pad_offset,
            value: pad,
        }));
    }
    let vertex_count = r.read_u32()?;
    if vertex_count as usize >= SUBTREE_VERTEX_CEILING {
        return Err(CollisionCodecError::SubtreeVertexOverflow {
            subtree: index,
            vertex_count,
        });
    }
    let vertices_offset = r.read_u32()?;
    let tree_offset = r.read_u32()?;

    let actual = (r.position() - subtree_start) as u32;
    if vertices_offset != actual {
        return Err(CollisionCodecError::OffsetMismatch {
            expected: vertices_offset,
            actual,
            section: format!("subtree {index} vertex section"),
        });
    }
    let mut vertices = Vec::with_capacity(vertex_count as usize);
    for _ in 0..vertex_count {
        let x = r.read_f32()?;
        let y = r.read_f32()?;
        let z = r.read_f32()?;
        vertices.push(Vector3::new(x, y, z));
    }

    let actual = (r.position() - subtree_start) as u32;
    if tree_offset != actual {
        return Err(CollisionCodecError::OffsetMismatch {
            expected: tree_offset,
            actual,
            section: format!("subtree {index} tree section"),
        });
    }
    let (left, right) = decode_surface_pair(r, index, subtree_start, vertex_count)?;
    let bounds = union_of_sides(
        left.as_deref().map(SurfaceNode::bounds),
        right.as_deref().map(SurfaceNode::bounds),
    );
    let root = SurfaceNode::Split {
        bounds,
        left,
        right,
    };

    let traversal = BranchTraversal::from_bytes(traversal_bytes).truncated(link.path.len())?;
    if traversal != link.path {
        return Err(CollisionCodecError::TraversalMismatch { subtree: index });
    }

    let subtree = Subtree {
        traversal,
        vertices,
        root,
    };
    let actual_triangles = subtree.triangle_count();
    if actual_triangles != link.triangle_count {
        return Err(CollisionCodecError::CountMismatch {
            section: format!("subtree {index} triangle count"),
            expected: link.triangle_count,
            actual: actual_triangles,
        });
    }
    Ok(subtree)
}

type SurfaceChildren = (Option<Box<SurfaceNode>>, Option<Box<SurfaceNode>>);

fn decode_surface_pair(
    r: &mut BinaryReader<'_>,
    index: usize,
    base: usize,
    vertex_count: u32,
) -> Result<SurfaceChildren, CollisionCodecError> {
    let left_desc = NodeDesc::read(r)?;
    let right_desc = NodeDesc::read(r)?;
    let left = decode_surface_side(r, index, base, vertex_count, &left_desc)?;
    let right = decode_surface_side(r, index, base, vertex_count, &right_desc)?;
    Ok((left.map(Box::new), right.map(Box::new)))
}

fn decode_surface_side(
    r: &mut BinaryReader<'_>,
    index: usize,
    base: usize,
    vertex_count: u32,
    desc: &NodeDesc,
) -> Result<Option<SurfaceNode>, CollisionCodecError> {
    if desc.is_absent() {
        return Ok(None);
    }
    let actual = (r.position() - base) as u32;
    if desc.offset != actual {
        return Err(CollisionCodecError::OffsetMismatch {
            expected: desc.offset,
            actual,
            section: format!("subtree {index} node"),
        });
    }

    if desc.count == 0 {
        let (left, right) = decode_surface_pair(r, index, base, vertex_count)?;
        return Ok(Some(SurfaceNode::Split {
            bounds: desc.bounds,
            left,
            right,
        }));
    }

    if desc.count as usize > LEAF_TRIANGLE_CAPACITY {
        return Err(CollisionCodecError::LeafTriangleOverflow { count: desc.count });
    }
    let triples = r.read_len_prefixed(3, |r| {
        Ok([r.read_u16()?, r.read_u16()?, r.read_u16()?])
    })?;
    if triples.len() as u32 != desc.count {
        return Err(CollisionCodecError::CountMismatch {
            section: format!("subtree {index} leaf"),
            expected: desc.count,
            actual: triples.len() as u32,
        });
    }
    for indices in &triples {
        for &vertex in indices {
            if u32::from(vertex) >= vertex_count {
                return Err(CollisionCodecError::VertexIndexOutOfRange {
                    subtree: index,
                    index: vertex,
                    vertex_count,
                });
            }
        }
    }
    let mut triangles = Vec::with_capacity(triples.len());
    for indices in triples {
        triangles.push(SurfaceTriangle {
            indices,
            attributes: read_attributes(r)?,
        });
    }
    r.skip_padding(4)?;

    Ok(Some(SurfaceNode::Leaf {
        bounds: desc.bounds,
        triangles,
    }))
}
