use std::any::Any;
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use rayon::prelude::*;
use tracing::debug;

use crate::bitmap::vector::Vector;
use crate::catalog::catalog::Catalog;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::stats::EngineStats;
use crate::core::types::{BitPosition, Compression};
use crate::engine::handle::CatalogHandle;
use crate::query::filter::FilterClause;
use crate::query::query::Query;
use crate::query::results::FacetCount;

/// A catalog slot as the engine sees it: key extraction, facet counting,
/// and the two compaction phases, with the typed catalog reachable behind
/// `as_any` for filter and sort parameters to downcast.
pub(crate) trait EngineCatalog<I>: Send + Sync {
    fn is_one_to_one(&self) -> bool;
    fn set_item(&mut self, item: &I, position: BitPosition) -> Result<()>;
    fn as_any(&self) -> &dyn Any;
    fn facet(
        &self,
        candidate: &Vector,
        disable_parallel: bool,
        short_circuit_counting: bool,
    ) -> Result<Vec<FacetCount>>;
    fn optimize_read_phase(&mut self, bit_position_shifts: &[i32]) -> Result<()>;
    fn optimize_write_phase(&mut self);
}

enum KeyExtractor<I, K> {
    Single(Box<dyn Fn(&I) -> K + Send + Sync>),
    Multiple(Box<dyn Fn(&I) -> Vec<K> + Send + Sync>),
}

struct CatalogSlot<I, K> {
    catalog: Catalog<K>,
    extractor: KeyExtractor<I, K>,
}

impl<I, K> EngineCatalog<I> for CatalogSlot<I, K>
where
    K: Ord + Clone + Display + Send + Sync + 'static,
{
    fn is_one_to_one(&self) -> bool {
        matches!(self.extractor, KeyExtractor::Single(_))
    }

    fn set_item(&mut self, item: &I, position: BitPosition) -> Result<()> {
        match &self.extractor {
            KeyExtractor::Single(extract) => self.catalog.set(extract(item), position, true),
            KeyExtractor::Multiple(extract) => {
                self.catalog.set_each(extract(item), position, true)
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        &self.catalog
    }

    fn facet(
        &self,
        candidate: &Vector,
        disable_parallel: bool,
        short_circuit_counting: bool,
    ) -> Result<Vec<FacetCount>> {
        let counts = self
            .catalog
            .facet(candidate, disable_parallel, short_circuit_counting)?;
        Ok(counts
            .into_iter()
            .map(|(key, count)| FacetCount { key: key.to_string(), count })
            .collect())
    }

    fn optimize_read_phase(&mut self, bit_position_shifts: &[i32]) -> Result<()> {
        self.catalog.optimize_read_phase(bit_position_shifts)
    }

    fn optimize_write_phase(&mut self) {
        self.catalog.optimize_write_phase()
    }
}

/// Aggregates catalogs over one item type, allocates bit positions, and
/// executes queries.
///
/// Structural mutations (`add_catalog`, `add`, `remove`, `update`,
/// `compact`) take `&mut self`; queries take `&self`, so any number of
/// them may run concurrently once the caller stops writing.
pub struct Engine<I, PK> {
    allow_unsafe: bool,
    catalogs: Vec<Box<dyn EngineCatalog<I>>>,
    catalog_index: HashMap<String, usize>,
    primary_key_to_position: HashMap<PK, BitPosition>,
    position_to_primary_key: Vec<Option<PK>>,
    /// Uncompressed vector of live positions: the query universe. Keeps
    /// tombstoned positions out of candidates between remove and compact.
    active: Vector,
    tombstone_count: u32,
    query_count: AtomicU64,
    started_at: Instant,
}

impl<I, PK> Engine<I, PK>
where
    I: 'static,
    PK: Eq + Hash + Ord + Clone,
{
    pub fn new(allow_unsafe: bool) -> Result<Engine<I, PK>> {
        Ok(Engine {
            allow_unsafe,
            catalogs: Vec::new(),
            catalog_index: HashMap::new(),
            primary_key_to_position: HashMap::new(),
            position_to_primary_key: Vec::new(),
            active: Vector::new(allow_unsafe, Compression::None)?,
            tombstone_count: 0,
            query_count: AtomicU64::new(0),
            started_at: Instant::now(),
        })
    }

    /// Register a one-to-one catalog: `extract` yields the single key an
    /// item carries for this attribute.
    pub fn add_catalog<K, F>(
        &mut self,
        name: &str,
        compression: Compression,
        extract: F,
    ) -> Result<CatalogHandle<K>>
    where
        K: Ord + Clone + Display + Send + Sync + 'static,
        F: Fn(&I) -> K + Send + Sync + 'static,
    {
        self.register(name, compression, KeyExtractor::Single(Box::new(extract)))
    }

    /// Register a one-to-many catalog: `extract` yields every key an item
    /// carries for this attribute.
    pub fn add_catalog_multi<K, F>(
        &mut self,
        name: &str,
        compression: Compression,
        extract: F,
    ) -> Result<CatalogHandle<K>>
    where
        K: Ord + Clone + Display + Send + Sync + 'static,
        F: Fn(&I) -> Vec<K> + Send + Sync + 'static,
    {
        self.register(name, compression, KeyExtractor::Multiple(Box::new(extract)))
    }

    fn register<K>(
        &mut self,
        name: &str,
        compression: Compression,
        extractor: KeyExtractor<I, K>,
    ) -> Result<CatalogHandle<K>>
    where
        K: Ord + Clone + Display + Send + Sync + 'static,
    {
        if self.catalog_index.contains_key(name) {
            return Err(Error::new(
                ErrorKind::DuplicateParameter,
                format!("catalog '{}' is already registered", name),
            ));
        }
        if !self.position_to_primary_key.is_empty() {
            return Err(Error::new(
                ErrorKind::Unsupported,
                "catalogs must be registered before items are added".to_string(),
            ));
        }
        let one_to_one = matches!(extractor, KeyExtractor::Single(_));
        let catalog = Catalog::new(name, self.allow_unsafe, compression);
        self.catalog_index.insert(name.to_string(), self.catalogs.len());
        self.catalogs.push(Box::new(CatalogSlot { catalog, extractor }));
        debug!(name, ?compression, one_to_one, "catalog registered");
        Ok(CatalogHandle::new(name.to_string(), one_to_one))
    }

    /// Index an item: allocate the next bit position and run every
    /// catalog's extractor against it.
    pub fn add(&mut self, item: &I, primary_key: PK) -> Result<()> {
        if self.primary_key_to_position.contains_key(&primary_key) {
            return Err(Error::new(
                ErrorKind::ArgumentOutOfRange,
                "primary key is already present".to_string(),
            ));
        }
        let position = self.position_to_primary_key.len() as BitPosition;
        for catalog in &mut self.catalogs {
            catalog.set_item(item, position)?;
        }
        self.position_to_primary_key.push(Some(primary_key.clone()));
        self.primary_key_to_position.insert(primary_key, position);
        self.active.set_bit(position, true)?;
        Ok(())
    }

    /// Tombstone an item. Catalog vectors keep its bits until `compact`
    /// reclaims the position; the active universe hides them meanwhile.
    pub fn remove(&mut self, primary_key: &PK) -> Result<()> {
        let position = self
            .primary_key_to_position
            .remove(primary_key)
            .ok_or_else(|| {
                Error::new(ErrorKind::ArgumentOutOfRange, "unknown primary key".to_string())
            })?;
        self.position_to_primary_key[position as usize] = None;
        self.active.set_bit(position, false)?;
        self.tombstone_count += 1;
        debug!(position, "item tombstoned");
        Ok(())
    }

    /// Re-index an existing item under a fresh bit position. The old
    /// position becomes a tombstone like any remove.
    pub fn update(&mut self, item: &I, primary_key: PK) -> Result<()> {
        self.remove(&primary_key)?;
        self.add(item, primary_key)
    }

    pub fn contains(&self, primary_key: &PK) -> bool {
        self.primary_key_to_position.contains_key(primary_key)
    }

    pub fn item_count(&self) -> usize {
        self.primary_key_to_position.len()
    }

    pub fn tombstone_count(&self) -> u32 {
        self.tombstone_count
    }

    /// Rebuild the bit position space without tombstones.
    ///
    /// Phase 1 computes the shift table and remaps every catalog entry in
    /// parallel into per-entry scratch (reads only live vectors). Phase 2
    /// serially installs the scratch, rewrites the primary key tables, and
    /// resets the tombstone count.
    pub fn compact(&mut self) -> Result<()> {
        if self.tombstone_count == 0 {
            debug!("compaction skipped, no tombstones");
            return Ok(());
        }
        let mut shifts = Vec::with_capacity(self.position_to_primary_key.len());
        let mut tombstones = 0i32;
        for slot in &self.position_to_primary_key {
            match slot {
                None => {
                    shifts.push(-1);
                    tombstones += 1;
                }
                Some(_) => shifts.push(tombstones),
            }
        }
        self.catalogs
            .par_iter_mut()
            .try_for_each(|catalog| catalog.optimize_read_phase(&shifts))?;

        for catalog in &mut self.catalogs {
            catalog.optimize_write_phase();
        }
        let live: Vec<PK> = self.position_to_primary_key.drain(..).flatten().collect();
        self.primary_key_to_position.clear();
        self.active = Vector::new(self.allow_unsafe, Compression::None)?;
        for (position, primary_key) in live.iter().enumerate() {
            self.primary_key_to_position
                .insert(primary_key.clone(), position as BitPosition);
            self.active.set_bit(position as BitPosition, true)?;
        }
        self.position_to_primary_key = live.into_iter().map(Some).collect();
        debug!(
            reclaimed = self.tombstone_count,
            live = self.position_to_primary_key.len(),
            "compaction finished"
        );
        self.tombstone_count = 0;
        Ok(())
    }

    pub fn create_query(&self) -> Query<'_, I, PK> {
        Query::new(self)
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            uptime_secs: self.started_at.elapsed().as_secs(),
            catalog_count: self.catalogs.len(),
            active_items: self.primary_key_to_position.len(),
            tombstoned_items: self.tombstone_count as usize,
            next_bit_position: self.position_to_primary_key.len() as BitPosition,
            queries_executed: self.query_count.load(Ordering::Relaxed),
        }
    }

    /// Fresh uncompressed copy of the active universe.
    pub(crate) fn active_copy(&self) -> Result<Vector> {
        Vector::from_vector(self.allow_unsafe, Compression::None, &self.active)
    }

    pub(crate) fn catalog_as_any(&self, name: &str) -> Result<&dyn Any> {
        self.catalog_slot(name).map(|slot| slot.as_any())
    }

    pub(crate) fn catalog_is_one_to_one(&self, name: &str) -> Result<bool> {
        self.catalog_slot(name).map(|slot| slot.is_one_to_one())
    }

    pub(crate) fn facet_catalog(
        &self,
        name: &str,
        candidate: &Vector,
        disable_parallel: bool,
        short_circuit_counting: bool,
    ) -> Result<Vec<FacetCount>> {
        self.catalog_slot(name)?
            .facet(candidate, disable_parallel, short_circuit_counting)
    }

    fn catalog_slot(&self, name: &str) -> Result<&dyn EngineCatalog<I>> {
        self.catalog_index
            .get(name)
            .map(|&index| self.catalogs[index].as_ref())
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::CatalogMismatch,
                    format!("catalog '{}' is not registered in this engine", name),
                )
            })
    }

    /// Evaluate a filter tree bottom-up against the catalogs. Leaves start
    /// from a copy of the active universe; `Not` clears the child's bits
    /// out of another universe copy.
    pub(crate) fn evaluate_filter(&self, clause: &FilterClause) -> Result<Vector> {
        match clause {
            FilterClause::Leaf(leaf) => {
                let mut vector = self.active_copy()?;
                let catalog = self.catalog_as_any(leaf.catalog_name())?;
                leaf.apply(catalog, &mut vector)?;
                Ok(vector)
            }
            FilterClause::And(children) => {
                let mut children = children.iter();
                let first = children.next().ok_or_else(|| {
                    Error::new(ErrorKind::ArgumentRequired, "empty And clause".to_string())
                })?;
                let mut vector = self.evaluate_filter(first)?;
                for child in children {
                    let evaluated = self.evaluate_filter(child)?;
                    vector.and_in_place(&evaluated)?;
                }
                Ok(vector)
            }
            FilterClause::Or(children) => {
                let mut evaluated: Vec<Vector> = children
                    .iter()
                    .map(|child| self.evaluate_filter(child))
                    .collect::<Result<_>>()?;
                if evaluated.len() >= 2 {
                    let refs: Vec<&Vector> = evaluated.iter().collect();
                    return Vector::or_out_of_place(&refs);
                }
                evaluated.pop().ok_or_else(|| {
                    Error::new(ErrorKind::ArgumentRequired, "empty Or clause".to_string())
                })
            }
            FilterClause::Not(child) => {
                let negated = self.evaluate_filter(child)?;
                let mut vector = self.active_copy()?;
                for position in negated.bit_positions(true)? {
                    vector.set_bit(position, false)?;
                }
                Ok(vector)
            }
        }
    }

    /// Mask vector of the given primary keys' positions. Unknown keys are
    /// skipped.
    pub(crate) fn primary_key_mask(&self, primary_keys: &[PK]) -> Result<Vector> {
        let mut mask = Vector::new(self.allow_unsafe, Compression::None)?;
        for primary_key in primary_keys {
            if let Some(&position) = self.primary_key_to_position.get(primary_key) {
                mask.set_bit(position, true)?;
            }
        }
        Ok(mask)
    }

    pub(crate) fn primary_key_at(&self, position: BitPosition) -> Option<PK> {
        self.position_to_primary_key
            .get(position as usize)
            .and_then(|slot| slot.clone())
    }

    pub(crate) fn note_query_executed(&self) {
        self.query_count.fetch_add(1, Ordering::Relaxed);
    }
}
