use crate::bitmap::vector::Vector;

/// One distinct key's posting vector plus its compaction scratch.
#[derive(Debug)]
pub struct CatalogEntry {
    pub(crate) vector: Vector,
    pub(crate) optimized: EntryOptimization,
}

/// Compaction state held on an entry between the read and write phases.
#[derive(Debug)]
pub(crate) enum EntryOptimization {
    /// No compaction in flight.
    Idle,
    /// The read phase produced a remapped vector awaiting install.
    Ready(Vector),
    /// Every bit of the entry was deleted; the write phase drops it.
    Dead,
}

impl CatalogEntry {
    pub(crate) fn new(vector: Vector) -> Self {
        CatalogEntry { vector, optimized: EntryOptimization::Idle }
    }

    pub fn vector(&self) -> &Vector {
        &self.vector
    }
}
