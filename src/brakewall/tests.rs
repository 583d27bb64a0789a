use super::*;
use crate::binary::{BinaryError, BinaryReader};

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

/// Pairs wound anticlockwise around a circular track centerline.
fn circular_wall(count: usize, rng: &mut TestRng) -> BrakeWall {
    let pairs = (0..count)
        .map(|i| {
            let angle = i as f32 / count as f32 * std::f32::consts::TAU;
            let (sin, cos) = angle.sin_cos();
            BrakeWallPair {
                inner: Vector2::new(cos * 40.0, sin * 40.0),
                outer: Vector2::new(cos * 46.0, sin * 46.0),
                rally_school: rng.next_bool(),
                auto_respawn: rng.next_bool(),
            }
        })
        .collect();
    BrakeWall::from_pairs(pairs)
}

fn flat_pair(x: f32) -> BrakeWallPair {
    BrakeWallPair {
        inner: Vector2::new(x, 0.0),
        outer: Vector2::new(x, 2.0),
        rally_school: false,
        auto_respawn: false,
    }
}

fn collect_leaves<'a>(node: &'a BrakeNode, out: &mut Vec<&'a BrakeNode>) {
    match node {
        BrakeNode::Split { left, right, .. } => {
            for side in [left, right].into_iter().flatten() {
                collect_leaves(side, out);
            }
        }
        BrakeNode::Leaf { .. } => out.push(node),
    }
}

#[test]
fn from_pairs_closes_the_loop() {
    let wall = BrakeWall::from_pairs(vec![flat_pair(0.0), flat_pair(1.0), flat_pair(2.0)]);
    assert_eq!(wall.pairs().len(), 4);
    assert_eq!(wall.pairs()[3], wall.pairs()[0]);

    assert!(BrakeWall::from_pairs(Vec::new()).is_empty());
}

#[test]
fn empty_wall_is_a_bare_header() {
    let section = BrakeWallSection::build(&BrakeWall::from_pairs(Vec::new())).unwrap();
    assert!(section.root.is_none());

    let bytes = section.encode().expect("encodable section");
    assert_eq!(bytes, vec![0, 0, 0, 0]);

    let decoded = BrakeWallSection::decode(&bytes).expect("decodable section");
    assert_eq!(decoded, section);
}

#[test]
fn chunking_extends_each_chunk_into_the_next() {
    // 14 input pairs close to 15; ceil(15 / 7) = 3 chunks.
    let wall = BrakeWall::from_pairs((0..14).map(|i| flat_pair(i as f32)).collect());
    assert_eq!(wall.pairs().len(), 15);

    let section = BrakeWallSection::build(&wall).unwrap();
    let mut leaves = Vec::new();
    collect_leaves(section.root.as_ref().unwrap(), &mut leaves);

    let mut members: Vec<Vec<u16>> = leaves
        .iter()
        .map(|leaf| match leaf {
            BrakeNode::Leaf { members, .. } => members.clone(),
            BrakeNode::Split { .. } => unreachable!(),
        })
        .collect();
    members.sort_by_key(|m| m[0]);
    assert_eq!(
        members,
        vec![
            vec![0, 1, 2, 3, 4, 5, 6, 7],
            vec![7, 8, 9, 10, 11, 12, 13, 14],
            // Last chunk wraps its extension to index 0.
            vec![14, 0],
        ]
    );
}

#[test]
fn single_chunk_walls_wrap_the_leaf_in_a_descriptor_pair() {
    let wall = BrakeWall::from_pairs(vec![flat_pair(0.0), flat_pair(1.0), flat_pair(2.0)]);
    let section = BrakeWallSection::build(&wall).unwrap();

    let Some(BrakeNode::Split { left, right, .. }) = &section.root else {
        panic!("root must be a descriptor pair");
    };
    assert!(right.is_none());
    let Some(BrakeNode::Leaf { members, .. }) = left.as_deref() else {
        panic!("left side must be the lone leaf");
    };
    // The wrap-to-0 extension is already a member of the only chunk.
    assert_eq!(*members, vec![0u16, 1, 2, 3]);
}

#[test]
fn flags_round_trip_byte_exactly() {
    let mut pairs: Vec<BrakeWallPair> = (0..10).map(|i| flat_pair(i as f32)).collect();
    pairs[2].rally_school = true;
    pairs[5].auto_respawn = true;
    pairs[7].rally_school = true;
    pairs[7].auto_respawn = true;
    let section = BrakeWallSection::build(&BrakeWall::from_pairs(pairs)).unwrap();

    let bytes = section.encode().expect("encodable section");
    let decoded = BrakeWallSection::decode(&bytes).expect("decodable section");
    assert_eq!(decoded, section);
    assert!(decoded.pairs[2].rally_school && !decoded.pairs[2].auto_respawn);
    assert!(!decoded.pairs[5].rally_school && decoded.pairs[5].auto_respawn);
    assert!(decoded.pairs[7].rally_school && decoded.pairs[7].auto_respawn);

    // Re-encoding the decoded section reproduces the bytes exactly.
    assert_eq!(decoded.encode().unwrap(), bytes);
}

#[test]
fn random_walls_round_trip() {
    let mut rng = TestRng::new(0x11A1_5EED);
    for &count in &[1usize, 2, 6, 7, 8, 13, 21, 49, 64] {
        let wall = circular_wall(count, &mut rng);
        let section = BrakeWallSection::build(&wall).unwrap();

        let mut leaves = Vec::new();
        collect_leaves(section.root.as_ref().unwrap(), &mut leaves);
        let mut covered = vec![false; wall.pairs().len()];
        for leaf in &leaves {
            let BrakeNode::Leaf { members, .. } = leaf else {
                unreachable!()
            };
            assert!(members.len() <= CHUNK_TARGET_SIZE + 1);
            for &index in members {
                covered[usize::from(index)] = true;
            }
        }
        assert!(covered.iter().all(|&c| c), "every pair belongs to a leaf");

        let bytes = section.encode().expect("encodable section");
        let decoded = BrakeWallSection::decode(&bytes).expect("decodable section");
        assert_eq!(decoded, section);
    }
}

#[test]
fn too_many_pairs_overflow_the_index_encoding() {
    let wall = BrakeWall::from_pairs((0..PAIR_INDEX_LIMIT).map(|i| flat_pair(i as f32)).collect());
    assert_eq!(
        BrakeWallSection::build(&wall),
        Err(BrakeWallBuildError::PairIndexOverflow {
            pair_count: PAIR_INDEX_LIMIT + 1,
        })
    );
}

#[test]
fn leaf_entry_with_the_low_bit_set_is_malformed() {
    let wall = BrakeWall::from_pairs(vec![flat_pair(0.0), flat_pair(1.0), flat_pair(2.0)]);
    let section = BrakeWallSection::build(&wall).unwrap();
    let mut bytes = section.encode().unwrap();
    // Layout: count 4, pairs 4 * 16 = 64 → tree at 68, two descriptors
    // (48) → leaf entries at 116. Entry 0 encodes pair 0, so its low
    // byte is 0.
    assert_eq!(bytes[116], 0);
    bytes[116] |= 1;
    assert_eq!(
        BrakeWallSection::decode(&bytes),
        Err(BrakeWallCodecError::MalformedLeafEntry { entry: 1 })
    );
}

#[test]
fn leaf_entry_past_the_pair_array_is_rejected() {
    let wall = BrakeWall::from_pairs(vec![flat_pair(0.0), flat_pair(1.0), flat_pair(2.0)]);
    let section = BrakeWallSection::build(&wall).unwrap();
    let mut bytes = section.encode().unwrap();
    // Overwrite the first leaf entry with index 9 (entry 9 << 1).
    bytes[116] = 9 << 1;
    bytes[117] = 0;
    assert_eq!(
        BrakeWallSection::decode(&bytes),
        Err(BrakeWallCodecError::PairIndexOutOfRange {
            index: 9,
            pair_count: 4,
        })
    );
}

#[test]
fn truncated_section_overflows() {
    let wall = BrakeWall::from_pairs(vec![flat_pair(0.0), flat_pair(1.0), flat_pair(2.0)]);
    let bytes = BrakeWallSection::build(&wall).unwrap().encode().unwrap();
    let err = BrakeWallSection::decode(&bytes[..bytes.len() - 3]).expect_err("truncated section");
    assert!(matches!(
        err,
        BrakeWallCodecError::Binary(BinaryError::Overflow { .. })
    ));
}

#[test]
fn trailing_bytes_are_detected_unless_the_limit_is_narrowed() {
    let wall = BrakeWall::from_pairs(vec![flat_pair(0.0), flat_pair(1.0)]);
    let section = BrakeWallSection::build(&wall).unwrap();
    let bytes = section.encode().unwrap();

    let mut embedded = bytes.clone();
    embedded.extend_from_slice(&[0xEE; 8]);
    assert!(matches!(
        BrakeWallSection::decode(&embedded),
        Err(BrakeWallCodecError::OffsetMismatch { section, .. }) if section == "section end"
    ));

    let mut r = BinaryReader::new(&embedded);
    r.set_limit(bytes.len()).unwrap();
    let decoded = BrakeWallSection::decode_from(&mut r).expect("bounded section decodes");
    assert_eq!(decoded, section);
}
