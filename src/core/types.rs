use serde::{Deserialize, Serialize};

/// A bit position names a single item slot; it is the unit of set-membership
/// in vectors. Positions are dense, assigned in insertion order, and reused
/// only via compaction.
pub type BitPosition = u32;

/// Storage form of a vector, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compression {
    /// Every logical word is backed by a literal word.
    None,
    /// Word-Aligned Hybrid: literal words interleaved with run-length fills.
    Compressed,
    /// WAH plus the packed-position extension: a lone set bit following a
    /// zero run is folded into the run word's spare bits.
    CompressedWithPackedPosition,
}

impl Compression {
    pub fn is_compressed(&self) -> bool {
        !matches!(self, Compression::None)
    }

    pub fn is_packed_position_enabled(&self) -> bool {
        matches!(self, Compression::CompressedWithPackedPosition)
    }
}
