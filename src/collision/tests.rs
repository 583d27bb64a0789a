use super::*;
use crate::binary::{BinaryError, BinaryReader};
use crate::traversal::Step;

#[derive(Clone, Copy)]
struct TestRng {
    state: u64,
}

impl TestRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u32(&mut self) -> u32 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.state >> 32) as u32
    }

    fn next_bool(&mut self) -> bool {
        self.next_u32() & 1 == 1
    }
}

/// Attribute floats sitting exactly on the quantization lattice, so an
/// encode/decode round trip reproduces them bit-for-bit.
fn lattice_attributes(rng: &mut TestRng) -> TriangleAttributes {
    let q5 = |rng: &mut TestRng| (rng.next_u32() % 32) as f32 / 31.0;
    let q4 = |rng: &mut TestRng| (rng.next_u32() % 16) as f32 / 15.0;
    TriangleAttributes {
        blending: [q5(rng), q5(rng), q5(rng)],
        shading: [q5(rng), q5(rng), q5(rng)],
        no_auto_spawn: rng.next_bool(),
        no_auto_spawn_flipped: rng.next_bool(),
        materials: [(rng.next_u32() % 4) as u8, (rng.next_u32() % 4) as u8],
        uvs: [
            [[q4(rng), q4(rng)], [q4(rng), q4(rng)], [q4(rng), q4(rng)]],
            [[q4(rng), q4(rng)], [q4(rng), q4(rng)], [q4(rng), q4(rng)]],
        ],
    }
}

/// Height-varied grid of quads, two triangles per cell.
fn grid_mesh(cols: u32, rows: u32, rng: &mut TestRng) -> CollisionMesh {
    let mut vertices = Vec::new();
    for j in 0..=rows {
        for i in 0..=cols {
            let height = ((i * 7 + j * 13) % 5) as f32 * 0.25;
            vertices.push(cgmath::Vector3::new(i as f32, height, j as f32));
        }
    }
    let vertex = |i: u32, j: u32| j * (cols + 1) + i;
    let mut triangles = Vec::new();
    for j in 0..rows {
        for i in 0..cols {
            let (v00, v10) = (vertex(i, j), vertex(i + 1, j));
            let (v01, v11) = (vertex(i, j + 1), vertex(i + 1, j + 1));
            triangles.push(MeshTriangle {
                indices: [v00, v10, v11],
                attributes: lattice_attributes(rng),
            });
            triangles.push(MeshTriangle {
                indices: [v00, v11, v01],
                attributes: lattice_attributes(rng),
            });
        }
    }
    CollisionMesh {
        vertices,
        triangles,
    }
}

fn single_triangle_mesh() -> CollisionMesh {
    CollisionMesh {
        vertices: vec![
            cgmath::Vector3::new(0.0, 0.0, 0.0),
            cgmath::Vector3::new(1.0, 0.0, 0.0),
            cgmath::Vector3::new(0.0, 0.0, 1.0),
        ],
        triangles: vec![MeshTriangle {
            indices: [0, 1, 2],
            attributes: TriangleAttributes {
                blending: [0.0, 0.5, 1.0],
                shading: [1.0, 0.5, 0.0],
                no_auto_spawn: true,
                no_auto_spawn_flipped: false,
                materials: [3, 9],
                uvs: [
                    [[0.0, 1.0], [0.5, 0.5], [1.0, 0.0]],
                    [[1.0, 1.0], [0.0, 0.0], [0.5, 1.0]],
                ],
            },
        }],
    }
}

fn walk_surface_leaves<'a>(node: &'a SurfaceNode, out: &mut Vec<&'a [SurfaceTriangle]>) {
    match node {
        SurfaceNode::Split { left, right, .. } => {
            for side in [left, right].into_iter().flatten() {
                walk_surface_leaves(side, out);
            }
        }
        SurfaceNode::Leaf { triangles, .. } => out.push(triangles),
    }
}

fn walk_links<'a>(node: &'a RootNode, depth: usize, out: &mut Vec<(&'a RootNode, usize)>) {
    match node {
        RootNode::Split { left, right, .. } => {
            for side in [left, right].into_iter().flatten() {
                walk_links(side, depth + 1, out);
            }
        }
        RootNode::Link { .. } => out.push((node, depth)),
    }
}

#[test]
fn empty_mesh_is_rejected() {
    let mesh = CollisionMesh::default();
    assert_eq!(
        CollisionTree::build(&mesh),
        Err(CollisionBuildError::EmptyMesh)
    );
}

#[test]
fn out_of_range_triangle_index_is_rejected() {
    let mut mesh = single_triangle_mesh();
    mesh.triangles[0].indices = [0, 1, 9];
    assert_eq!(
        CollisionTree::build(&mesh),
        Err(CollisionBuildError::TriangleIndexOutOfRange {
            triangle: 0,
            index: 9,
            vertex_count: 3,
        })
    );
}

#[test]
fn single_triangle_still_gets_a_root_split() {
    let tree = CollisionTree::build(&single_triangle_mesh()).expect("valid mesh");

    // The forced minimum split leaves the lone subtree on the left.
    let RootNode::Split { left, right, .. } = &tree.root else {
        panic!("root must be a split");
    };
    assert!(right.is_none());
    let Some(link) = left.as_deref() else {
        panic!("left side must hold the link");
    };
    assert_eq!(
        *link,
        RootNode::Link {
            bounds: link.bounds(),
            subtree: 0,
            triangle_count: 1,
        }
    );

    assert_eq!(tree.subtrees.len(), 1);
    let subtree = &tree.subtrees[0];
    assert_eq!(subtree.traversal.steps(), &[Step::Left]);
    assert_eq!(subtree.vertices.len(), 3);

    // A single-leaf subtree is built in serialized shape: leaf on the
    // left, nothing on the right.
    let SurfaceNode::Split { left, right, .. } = &subtree.root else {
        panic!("subtree root must be a descriptor pair");
    };
    assert!(matches!(left.as_deref(), Some(SurfaceNode::Leaf { .. })));
    assert!(right.is_none());
}

#[test]
fn quantizer_hits_the_documented_boundaries() {
    assert_eq!(quantize_unorm(0.0, 31), 0);
    assert_eq!(quantize_unorm(1.0, 31), 31);
    assert_eq!(quantize_unorm(0.5, 31), 16);
    assert_eq!(quantize_unorm(-2.0, 31), 0);
    assert_eq!(quantize_unorm(7.5, 31), 31);
    assert_eq!(quantize_unorm(1.0, 15), 15);
    assert_eq!(quantize_unorm(0.5, 15), 8);
}

#[test]
fn attributes_survive_a_round_trip_up_to_quantization() {
    let tree = CollisionTree::build(&single_triangle_mesh()).expect("valid mesh");
    let bytes = tree.encode().expect("encodable tree");
    let decoded = CollisionTree::decode(&bytes).expect("decodable buffer");

    let mut built = Vec::new();
    walk_surface_leaves(&tree.subtrees[0].root, &mut built);
    let mut round_tripped = Vec::new();
    walk_surface_leaves(&decoded.subtrees[0].root, &mut round_tripped);

    assert_eq!(round_tripped.len(), 1);
    assert_eq!(round_tripped[0][0], built[0][0].requantized());
    assert!(round_tripped[0][0].attributes.no_auto_spawn);
    assert!(!round_tripped[0][0].attributes.no_auto_spawn_flipped);
}

#[test]
fn grid_mesh_round_trips_exactly_on_the_quantization_lattice() {
    let mut rng = TestRng::new(0xC0_11_1D_E5);
    let mesh = grid_mesh(20, 20, &mut rng);
    let tree = CollisionTree::build(&mesh).expect("valid mesh");
    let bytes = tree.encode().expect("encodable tree");
    let decoded = CollisionTree::decode(&bytes).expect("decodable buffer");
    assert_eq!(decoded, tree);
}

#[test]
fn built_trees_respect_the_leaf_and_vertex_ceilings() {
    let mut rng = TestRng::new(0x7EE5_0002);
    let mesh = grid_mesh(40, 25, &mut rng);
    let tree = CollisionTree::build(&mesh).expect("valid mesh");

    let mut links = Vec::new();
    walk_links(&tree.root, 0, &mut links);
    let mut linked_triangles = 0;
    for (link, depth) in &links {
        let RootNode::Link {
            subtree,
            triangle_count,
            ..
        } = link
        else {
            unreachable!()
        };
        assert!(*depth >= 1, "root tree must have at least one split");
        let subtree = &tree.subtrees[*subtree];
        assert!(subtree.vertices.len() < SUBTREE_VERTEX_CEILING);
        assert_eq!(subtree.triangle_count(), *triangle_count);
        assert_eq!(subtree.traversal.len(), *depth);
        linked_triangles += *triangle_count;

        let mut leaves = Vec::new();
        walk_surface_leaves(&subtree.root, &mut leaves);
        for leaf in leaves {
            assert!(!leaf.is_empty());
            assert!(leaf.len() <= LEAF_TRIANGLE_CAPACITY);
        }
    }
    assert_eq!(links.len(), tree.subtrees.len());
    assert_eq!(linked_triangles as usize, mesh.triangles.len());
}

#[test]
fn oversized_meshes_split_into_multiple_subtrees() {
    let mut rng = TestRng::new(0xB16_0003);
    // 261 * 261 = 68121 unique vertices, above the per-subtree ceiling.
    let mesh = grid_mesh(260, 260, &mut rng);
    assert!(mesh.vertices.len() >= SUBTREE_VERTEX_CEILING);

    let tree = CollisionTree::build(&mesh).expect("valid mesh");
    assert!(tree.subtrees.len() >= 2);
    let mut total = 0u32;
    for (index, subtree) in tree.subtrees.iter().enumerate() {
        assert!(
            subtree.vertices.len() < SUBTREE_VERTEX_CEILING,
            "subtree {index} exceeds the vertex ceiling"
        );
        total += subtree.triangle_count();
    }
    assert_eq!(total as usize, mesh.triangles.len());

    // Links and subtrees agree on paths and counts after a round trip.
    let bytes = tree.encode().expect("encodable tree");
    let decoded = CollisionTree::decode(&bytes).expect("decodable buffer");
    assert_eq!(decoded, tree);
}

#[test]
fn decode_rejects_a_bad_magic() {
    let tree = CollisionTree::build(&single_triangle_mesh()).expect("valid mesh");
    let mut bytes = tree.encode().expect("encodable tree");
    bytes[0] = b'X';
    assert!(matches!(
        CollisionTree::decode(&bytes),
        Err(CollisionCodecError::BadMagic { found }) if &found == b"XC7R"
    ));
}

#[test]
fn corrupted_node_offset_is_an_offset_mismatch() {
    let tree = CollisionTree::build(&single_triangle_mesh()).expect("valid mesh");
    let mut bytes = tree.encode().expect("encodable tree");
    // Layout for this mesh: header 12, root descs 64, table offset slot at
    // 8 → table at 76, subtree at 80. Inside the subtree: descriptor 16,
    // 3 vertices (36), then the leaf descriptor whose offset field sits
    // at subtree + 16 + 36 + 28 = byte 160.
    bytes[160] ^= 0x01;
    assert!(matches!(
        CollisionTree::decode(&bytes),
        Err(CollisionCodecError::OffsetMismatch { section, .. })
            if section == "subtree 0 node"
    ));
}

#[test]
fn corrupted_link_slot_is_a_bad_subtree_slot() {
    let tree = CollisionTree::build(&single_triangle_mesh()).expect("valid mesh");
    let mut bytes = tree.encode().expect("encodable tree");
    // The left root descriptor's offset field (bytes 40..44) holds the
    // link's table offset; 1 is unaligned.
    bytes[40] = 1;
    assert!(matches!(
        CollisionTree::decode(&bytes),
        Err(CollisionCodecError::BadSubtreeSlot { offset: 1, .. })
    ));
}

#[test]
fn truncated_buffer_fails_with_overflow() {
    let tree = CollisionTree::build(&single_triangle_mesh()).expect("valid mesh");
    let bytes = tree.encode().expect("encodable tree");
    let err = CollisionTree::decode(&bytes[..bytes.len() - 1]).expect_err("truncated container");
    assert!(matches!(
        err,
        CollisionCodecError::Binary(BinaryError::Overflow { .. })
    ));
}

#[test]
fn embedded_sections_decode_behind_a_narrowed_limit() {
    let tree = CollisionTree::build(&single_triangle_mesh()).expect("valid mesh");
    let section = tree.encode().expect("encodable tree");

    let mut embedded = section.clone();
    embedded.extend_from_slice(&[0xAB; 32]);

    // Without the boundary the trailing bytes look like corruption.
    assert!(matches!(
        CollisionTree::decode(&embedded),
        Err(CollisionCodecError::OffsetMismatch { section, .. }) if section == "container end"
    ));

    let mut r = BinaryReader::new(&embedded);
    r.set_limit(section.len()).expect("limit within buffer");
    let decoded = CollisionTree::decode_from(&mut r).expect("bounded section decodes");
    assert_eq!(decoded, tree);
    assert_eq!(r.position(), section.len());
}

#[test]
fn subtree_table_offsets_are_aligned_and_ascending() {
    let mut rng = TestRng::new(0x0FF5_E7);
    let mesh = grid_mesh(12, 9, &mut rng);
    let tree = CollisionTree::build(&mesh).expect("valid mesh");
    let bytes = tree.encode().expect("encodable tree");

    let mut r = BinaryReader::new(&bytes);
    r.seek(4).unwrap();
    let subtree_count = r.read_u32().unwrap();
    let table_offset = r.read_u32().unwrap() as usize;
    r.seek(table_offset).unwrap();
    let mut previous = table_offset;
    for _ in 0..subtree_count {
        let slot = r.read_u32().unwrap() as usize;
        assert_eq!(slot % 4, 0);
        assert!(slot > previous);
        assert!(slot < bytes.len());
        previous = slot;
    }
}
