//! Bounded little-endian cursors over byte buffers.
//!
//! The writer owns a growable buffer and never truncates; the reader
//! borrows a fixed buffer and checks every access against an explicit
//! overflow boundary, which callers narrow when parsing a known-size
//! embedded section so a mis-parsed offset fails at the section edge
//! instead of silently reading a neighbour's bytes.

use std::fmt;

mod reader;
mod writer;

pub use reader::BinaryReader;
pub use writer::{BinaryWriter, Reservation};

/// Counts above this are treated as parser bugs, not data.
pub const COUNT_SANITY_CEILING: u32 = 10_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinaryError {
    /// A read or seek would cross the declared overflow boundary.
    Overflow {
        offset: usize,
        requested: usize,
        limit: usize,
    },
    /// A length prefix exceeds [`COUNT_SANITY_CEILING`]; failed before any
    /// allocation was attempted.
    SuspiciousCount { offset: usize, count: u32 },
    /// A length prefix is not divisible by the declared unit divisor.
    MisalignedCount {
        offset: usize,
        count: u32,
        divisor: u32,
    },
    /// An alignment padding byte was not zero.
    NonZeroPadding { offset: usize, value: u8 },
    /// A finalized header did not re-encode to its reserved size.
    HeaderSizeMismatch {
        offset: usize,
        reserved: usize,
        written: usize,
    },
}

impl fmt::Display for BinaryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overflow {
                offset,
                requested,
                limit,
            } => write!(
                f,
                "read of {requested} bytes at offset {offset} crosses overflow boundary {limit}"
            ),
            Self::SuspiciousCount { offset, count } => write!(
                f,
                "length prefix {count} at offset {offset} exceeds sanity ceiling {COUNT_SANITY_CEILING}"
            ),
            Self::MisalignedCount {
                offset,
                count,
                divisor,
            } => write!(
                f,
                "length prefix {count} at offset {offset} is not divisible by {divisor}"
            ),
            Self::NonZeroPadding { offset, value } => write!(
                f,
                "padding byte at offset {offset} is {value:#04x}, expected zero"
            ),
            Self::HeaderSizeMismatch {
                offset,
                reserved,
                written,
            } => write!(
                f,
                "header at offset {offset} reserved {reserved} bytes but re-encoded to {written}"
            ),
        }
    }
}

impl std::error::Error for BinaryError {}
