//! Binary codec and spatial-tree builder for rally-track collision
//! containers.
//!
//! The crate covers the reverse-engineered on-disk side of a track
//! export pipeline: the `OC7R` collision container (a root tree of
//! link nodes over 16-bit-indexed triangle subtrees) and the brake-wall
//! section (a 2-D tree over wound point pairs). Mesh extraction, file
//! I/O and batch orchestration are the caller's business — everything
//! here transforms between in-memory trees and already-loaded byte
//! buffers, synchronously and without shared state.
//!
//! # Layers
//!
//! - [`binary`]: bounded little-endian cursors with overflow boundaries,
//!   alignment padding and reserve/finalize header backpatching.
//! - [`traversal`]: 24-step left/right tree paths packed into 3 bytes.
//! - [`kdtree`]: the two spatial partitioners (median/round-robin and
//!   mean/longest-axis — distinct by format mandate).
//! - [`collision`]: the two-level collision tree, its builder and codec.
//! - [`brakewall`]: the brake-wall chunker, tree and codec.
//!
//! Every error is a structured per-module enum; any failure aborts the
//! whole encode or decode call — a half-written container is not a
//! valid intermediate state for this format.

pub mod binary;
pub mod brakewall;
pub mod collision;
pub mod kdtree;
pub mod spatial;
pub mod traversal;

pub use binary::{BinaryError, BinaryReader, BinaryWriter};
pub use brakewall::{BrakeWall, BrakeWallPair, BrakeWallSection};
pub use collision::{CollisionMesh, CollisionTree, MeshTriangle, TriangleAttributes};
pub use spatial::{Aabb2, Aabb3};
pub use traversal::{BranchTraversal, Step};
