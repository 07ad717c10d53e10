use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use rayon::prelude::*;

use crate::bitmap::vector::Vector;
use crate::catalog::entry::{CatalogEntry, EntryOptimization};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{BitPosition, Compression};

/// Inverted index over one attribute: each distinct key value maps to a
/// vector of the bit positions carrying it. The ordered key space drives
/// range filters and sort enumeration without re-sorting per call.
pub struct Catalog<K> {
    name: String,
    allow_unsafe: bool,
    compression: Compression,
    entries: BTreeMap<K, CatalogEntry>,
}

impl<K: Ord + Clone> Catalog<K> {
    pub fn new(name: &str, allow_unsafe: bool, compression: Compression) -> Catalog<K> {
        Catalog {
            name: name.to_string(),
            allow_unsafe,
            compression,
            entries: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    pub fn entry(&self, key: &K) -> Option<&CatalogEntry> {
        self.entries.get(key)
    }

    /// Record `value` at `position` under `key`, creating the entry on
    /// first sight of the key.
    pub fn set(&mut self, key: K, position: BitPosition, value: bool) -> Result<()> {
        let entry = match self.entries.entry(key) {
            Entry::Occupied(occupied) => occupied.into_mut(),
            Entry::Vacant(vacant) => vacant.insert(CatalogEntry::new(Vector::new(
                self.allow_unsafe,
                self.compression,
            )?)),
        };
        entry.vector.set_bit(position, value)
    }

    /// Record `value` at `position` under every key in `keys`.
    pub fn set_each(
        &mut self,
        keys: impl IntoIterator<Item = K>,
        position: BitPosition,
        value: bool,
    ) -> Result<()> {
        for key in keys {
            self.set(key, position, value)?;
        }
        Ok(())
    }

    /// AND-intersect `target` with the entry for `key`. A missing key
    /// clears the target.
    pub fn filter_exact(&self, target: &mut Vector, key: &K) -> Result<()> {
        match self.entries.get(key) {
            Some(entry) => target.and_in_place(&entry.vector),
            None => {
                target.clear();
                Ok(())
            }
        }
    }

    /// AND-intersect `target` with the union of the entries for `keys`.
    /// Keys are deduplicated; missing keys are skipped. If none resolve,
    /// the target clears.
    pub fn filter_any_of(
        &self,
        target: &mut Vector,
        keys: impl IntoIterator<Item = K>,
    ) -> Result<()> {
        let distinct: BTreeSet<K> = keys.into_iter().collect();
        let vectors: Vec<&Vector> = distinct
            .iter()
            .filter_map(|key| self.entries.get(key))
            .map(|entry| &entry.vector)
            .collect();
        self.filter_union(target, vectors)
    }

    /// AND-intersect `target` with the union of all entries whose key lies
    /// in `[min, max]`. A missing bound defaults to the catalog's own
    /// minimum or maximum; at least one bound must be given.
    pub fn filter_range(
        &self,
        target: &mut Vector,
        min: Option<&K>,
        max: Option<&K>,
    ) -> Result<()> {
        if min.is_none() && max.is_none() {
            return Err(Error::new(
                ErrorKind::ArgumentRequired,
                format!("range filter on catalog '{}' needs at least one bound", self.name),
            ));
        }
        if let (Some(lo), Some(hi)) = (min, max) {
            if lo > hi {
                return Err(Error::new(
                    ErrorKind::ArgumentOutOfRange,
                    format!("range filter on catalog '{}' has min > max", self.name),
                ));
            }
        }
        let lower = min.map_or(Bound::Unbounded, Bound::Included);
        let upper = max.map_or(Bound::Unbounded, Bound::Included);
        let vectors: Vec<&Vector> = self
            .entries
            .range((lower, upper))
            .map(|(_, entry)| &entry.vector)
            .collect();
        self.filter_union(target, vectors)
    }

    fn filter_union(&self, target: &mut Vector, vectors: Vec<&Vector>) -> Result<()> {
        match vectors.len() {
            0 => {
                target.clear();
                Ok(())
            }
            1 => target.and_in_place(vectors[0]),
            _ => {
                // union entry vectors into a fresh uncompressed vector so
                // the AND never sees two compressed operands
                let union = Vector::or_out_of_place(&vectors)?;
                target.and_in_place(&union)
            }
        }
    }

    /// Distinct-value counts over the candidate set. Output is unordered
    /// and drops zero counts. `short_circuit_counting` reports 1 for any
    /// matching key instead of the exact count. Entries are scanned in
    /// parallel unless `disable_parallel` is set.
    pub fn facet(
        &self,
        candidate: &Vector,
        disable_parallel: bool,
        short_circuit_counting: bool,
    ) -> Result<Vec<(K, u32)>>
    where
        K: Send + Sync,
    {
        let count = |entry: &CatalogEntry| -> Result<u32> {
            if short_circuit_counting {
                Ok(candidate.and_population_any(&entry.vector)? as u32)
            } else {
                candidate.and_population(&entry.vector)
            }
        };
        if disable_parallel {
            let mut counts = Vec::with_capacity(self.entries.len());
            for (key, entry) in &self.entries {
                let population = count(entry)?;
                if population > 0 {
                    counts.push((key.clone(), population));
                }
            }
            return Ok(counts);
        }
        let entries: Vec<(&K, &CatalogEntry)> = self.entries.iter().collect();
        let counts: Result<Vec<Option<(K, u32)>>> = entries
            .par_iter()
            .map(|(key, entry)| {
                let population = count(entry)?;
                Ok((population > 0).then(|| ((*key).clone(), population)))
            })
            .collect();
        Ok(counts?.into_iter().flatten().collect())
    }

    /// Lazy enumeration of `(key, positions of candidate AND entry)` in key
    /// order, skipping keys whose intersection is empty.
    pub fn sort_bit_positions<'a>(
        &'a self,
        candidate: &'a Vector,
        value: bool,
        ascending: bool,
    ) -> impl Iterator<Item = Result<(&'a K, Vec<BitPosition>)>> + 'a {
        let entries: Box<dyn Iterator<Item = (&'a K, &'a CatalogEntry)> + 'a> = if ascending {
            Box::new(self.entries.iter())
        } else {
            Box::new(self.entries.iter().rev())
        };
        entries.filter_map(move |(key, entry)| {
            let positions = candidate
                .and_out_of_place(&entry.vector, Compression::None)
                .and_then(|and| Ok(and.bit_positions(value)?.collect::<Vec<_>>()));
            match positions {
                Ok(positions) if positions.is_empty() => None,
                Ok(positions) => Some(Ok((key, positions))),
                Err(error) => Some(Err(error)),
            }
        })
    }

    /// Compaction phase 1: remap every entry against the shift table into
    /// per-entry scratch. Reads only live vectors; commits nothing.
    pub fn optimize_read_phase(&mut self, bit_position_shifts: &[i32]) -> Result<()> {
        for entry in self.entries.values_mut() {
            entry.optimized = match entry.vector.optimize(bit_position_shifts)? {
                Some(vector) => EntryOptimization::Ready(vector),
                None => EntryOptimization::Dead,
            };
        }
        Ok(())
    }

    /// Compaction phase 2: install the scratch vectors and drop entries
    /// whose bits were all deleted.
    pub fn optimize_write_phase(&mut self) {
        self.entries.retain(|_, entry| {
            match std::mem::replace(&mut entry.optimized, EntryOptimization::Idle) {
                EntryOptimization::Ready(vector) => {
                    entry.vector = vector;
                    true
                }
                EntryOptimization::Dead => false,
                EntryOptimization::Idle => true,
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog(compression: Compression) -> Catalog<&'static str> {
        let mut catalog = Catalog::new("color", false, compression);
        // items: 0 red, 1 red, 2 green, 3 blue, 4 green, 5 red
        for (position, color) in ["red", "red", "green", "blue", "green", "red"]
            .into_iter()
            .enumerate()
        {
            catalog.set(color, position as u32, true).unwrap();
        }
        catalog
    }

    fn universe(len: u32) -> Vector {
        let mut universe = Vector::new(false, Compression::None).unwrap();
        for position in 0..len {
            universe.set_bit(position, true).unwrap();
        }
        universe
    }

    fn positions(vector: &Vector) -> Vec<u32> {
        vector.bit_positions(true).unwrap().collect()
    }

    #[test]
    fn filter_exact_intersects() {
        for compression in [Compression::Compressed, Compression::None] {
            let catalog = catalog(compression);
            let mut target = universe(6);
            catalog.filter_exact(&mut target, &"red").unwrap();
            assert_eq!(positions(&target), vec![0, 1, 5]);

            let mut target = universe(6);
            catalog.filter_exact(&mut target, &"purple").unwrap();
            assert_eq!(target.population(), 0);
        }
    }

    #[test]
    fn filter_any_of_unions_and_dedupes() {
        let catalog = catalog(Compression::Compressed);
        let mut target = universe(6);
        catalog
            .filter_any_of(&mut target, ["green", "blue", "green", "missing"])
            .unwrap();
        assert_eq!(positions(&target), vec![2, 3, 4]);

        let mut target = universe(6);
        catalog.filter_any_of(&mut target, ["missing", "absent"]).unwrap();
        assert_eq!(target.population(), 0);
    }

    #[test]
    fn filter_range_bounds() {
        let mut catalog: Catalog<i32> = Catalog::new("price", false, Compression::Compressed);
        for (position, price) in [10, 20, 30, 40, 50].iter().enumerate() {
            catalog.set(*price, position as u32, true).unwrap();
        }

        let mut target = universe(5);
        catalog.filter_range(&mut target, Some(&20), Some(&40)).unwrap();
        assert_eq!(positions(&target), vec![1, 2, 3]);

        let mut target = universe(5);
        catalog.filter_range(&mut target, None, Some(&30)).unwrap();
        assert_eq!(positions(&target), vec![0, 1, 2]);

        let mut target = universe(5);
        catalog.filter_range(&mut target, Some(&40), None).unwrap();
        assert_eq!(positions(&target), vec![3, 4]);

        let mut target = universe(5);
        let err = catalog.filter_range(&mut target, None, None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ArgumentRequired);
        let err = catalog.filter_range(&mut target, Some(&40), Some(&20)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ArgumentOutOfRange);
    }

    #[test]
    fn facet_counts_match_populations() {
        let catalog = catalog(Compression::Compressed);
        let mut candidate = universe(6);
        candidate.set_bit(5, false).unwrap();

        for disable_parallel in [false, true] {
            let mut counts = catalog.facet(&candidate, disable_parallel, false).unwrap();
            counts.sort();
            assert_eq!(counts, vec![("blue", 1), ("green", 2), ("red", 2)]);

            for (key, count) in counts {
                let entry = catalog.entry(&key).unwrap();
                assert_eq!(candidate.and_population(entry.vector()).unwrap(), count);
            }
        }
    }

    #[test]
    fn facet_short_circuit_reports_presence() {
        let catalog = catalog(Compression::Compressed);
        let candidate = universe(6);
        let mut counts = catalog.facet(&candidate, false, true).unwrap();
        counts.sort();
        assert_eq!(counts, vec![("blue", 1), ("green", 1), ("red", 1)]);
    }

    #[test]
    fn facet_drops_empty_keys() {
        let catalog = catalog(Compression::Compressed);
        let mut candidate = universe(6);
        catalog.filter_exact(&mut candidate, &"blue").unwrap();
        let counts = catalog.facet(&candidate, true, false).unwrap();
        assert_eq!(counts, vec![("blue", 1)]);
    }

    #[test]
    fn sort_bit_positions_walks_keys_in_order() {
        let catalog = catalog(Compression::Compressed);
        let candidate = universe(6);

        let ascending: Vec<(&&str, Vec<u32>)> = catalog
            .sort_bit_positions(&candidate, true, true)
            .map(|group| group.unwrap())
            .collect();
        assert_eq!(
            ascending,
            vec![(&"blue", vec![3]), (&"green", vec![2, 4]), (&"red", vec![0, 1, 5])]
        );

        let descending: Vec<&&str> = catalog
            .sort_bit_positions(&candidate, true, false)
            .map(|group| group.unwrap().0)
            .collect();
        assert_eq!(descending, vec![&"red", &"green", &"blue"]);
    }

    #[test]
    fn sort_bit_positions_skips_empty_intersections() {
        let catalog = catalog(Compression::Compressed);
        let mut candidate = universe(6);
        catalog.filter_exact(&mut candidate, &"red").unwrap();
        let keys: Vec<&&str> = catalog
            .sort_bit_positions(&candidate, true, true)
            .map(|group| group.unwrap().0)
            .collect();
        assert_eq!(keys, vec![&"red"]);
    }

    #[test]
    fn optimize_phases_remap_and_retire() {
        let mut catalog = catalog(Compression::Compressed);
        // delete positions 2 and 4 (both green)
        let shifts: Vec<i32> = vec![0, 0, -1, 1, -1, 2];
        catalog.optimize_read_phase(&shifts).unwrap();
        catalog.optimize_write_phase();

        assert_eq!(catalog.key_count(), 2);
        assert!(catalog.entry(&"green").is_none());
        assert_eq!(positions(catalog.entry(&"red").unwrap().vector()), vec![0, 1, 3]);
        assert_eq!(positions(catalog.entry(&"blue").unwrap().vector()), vec![2]);
    }

    #[test]
    fn optimize_identity_keeps_entries() {
        let mut catalog = catalog(Compression::CompressedWithPackedPosition);
        let before = positions(catalog.entry(&"red").unwrap().vector());
        catalog.optimize_read_phase(&[0; 6]).unwrap();
        catalog.optimize_write_phase();
        assert_eq!(catalog.key_count(), 3);
        assert_eq!(positions(catalog.entry(&"red").unwrap().vector()), before);
    }
}
