//! Branch traversals: left/right tree paths packed into three bytes.
//!
//! The container addresses a node inside a packed binary tree by the path
//! from the root instead of an absolute pointer. The path is capped at 24
//! steps and padded with `Left` (a format quirk — the pad value is the
//! `Left` direction, not a free zero) so it always occupies exactly three
//! bytes on disk.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum number of steps a packed traversal can carry.
pub const MAX_TRAVERSAL_DEPTH: usize = 24;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Step {
    Left,
    Right,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BranchTraversal {
    steps: Vec<Step>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalError {
    /// The path cannot grow past [`MAX_TRAVERSAL_DEPTH`] steps; the
    /// vertex-count ceilings bound real trees well below this, so hitting
    /// it is a precondition violation, not an input problem.
    DepthExceeded { depth: usize },
    /// A decoded path carried a `Right` step beyond the known tree depth,
    /// where only `Left` padding is legal.
    NonLeftPadding { position: usize },
}

impl fmt::Display for TraversalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DepthExceeded { depth } => write!(
                f,
                "branch traversal depth {depth} exceeds the {MAX_TRAVERSAL_DEPTH}-step format limit"
            ),
            Self::NonLeftPadding { position } => write!(
                f,
                "branch traversal has a Right step at padded position {position}"
            ),
        }
    }
}

impl std::error::Error for TraversalError {}

impl BranchTraversal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_steps<I>(steps: I) -> Result<Self, TraversalError>
    where
        I: IntoIterator<Item = Step>,
    {
        let mut out = Self::new();
        for step in steps {
            out.push(step)?;
        }
        Ok(out)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn push(&mut self, step: Step) -> Result<(), TraversalError> {
        if self.steps.len() == MAX_TRAVERSAL_DEPTH {
            return Err(TraversalError::DepthExceeded {
                depth: MAX_TRAVERSAL_DEPTH + 1,
            });
        }
        self.steps.push(step);
        Ok(())
    }

    /// Copy of this path with one more step — the shape tree builders use
    /// while descending.
    pub fn child(&self, step: Step) -> Result<Self, TraversalError> {
        let mut out = self.clone();
        out.push(step)?;
        Ok(out)
    }

    /// Pack into three bytes: pad with `Left` to 24 steps, then for each
    /// group of 8 steps set bit `i` of the group byte iff step `i` is
    /// `Right`.
    pub fn to_bytes(&self) -> [u8; 3] {
        let mut out = [0u8; 3];
        for (index, step) in self.steps.iter().enumerate() {
            if *step == Step::Right {
                out[index / 8] |= 1 << (index % 8);
            }
        }
        out
    }

    /// Unpack three bytes into the full 24-step padded path. Callers
    /// truncate back to the known tree depth with [`truncated`].
    ///
    /// [`truncated`]: BranchTraversal::truncated
    pub fn from_bytes(bytes: [u8; 3]) -> Self {
        let mut steps = Vec::with_capacity(MAX_TRAVERSAL_DEPTH);
        for index in 0..MAX_TRAVERSAL_DEPTH {
            let bit = bytes[index / 8] >> (index % 8) & 1;
            steps.push(if bit == 1 { Step::Right } else { Step::Left });
        }
        Self { steps }
    }

    /// Cut a decoded path back to the tree's actual depth.
    ///
    /// The suffix being discarded must be pure `Left` padding; a `Right`
    /// out there means the file disagrees with the tree structure and is
    /// reported instead of silently dropped.
    pub fn truncated(&self, depth: usize) -> Result<Self, TraversalError> {
        if depth > self.steps.len() {
            return Err(TraversalError::DepthExceeded { depth });
        }
        if let Some(position) = self.steps[depth..]
            .iter()
            .position(|step| *step == Step::Right)
        {
            return Err(TraversalError::NonLeftPadding {
                position: depth + position,
            });
        }
        Ok(Self {
            steps: self.steps[..depth].to_vec(),
        })
    }
}
