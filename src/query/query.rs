use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::trace;

use crate::bitmap::vector::Vector;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{BitPosition, Compression};
use crate::engine::engine::Engine;
use crate::engine::handle::CatalogHandle;
use crate::query::filter::FilterClause;
use crate::query::results::QueryResult;
use crate::query::sort::SortDirective;

/// One-shot query builder over an engine.
///
/// Filter, sort, facet, and amongst parameters accumulate on the builder;
/// `execute` runs exactly once, guarded by an atomic latch, and may be
/// called from a shared reference so concurrent readers can race to it.
pub struct Query<'e, I, PK> {
    engine: &'e Engine<I, PK>,
    amongst: Vec<PK>,
    filter: Option<FilterClause>,
    sorts: Vec<Box<dyn SortDirective>>,
    sort_primary_key_ascending: Option<bool>,
    facets: Vec<String>,
    facet_disable_parallel: bool,
    facet_short_circuit_counting: bool,
    executed: AtomicBool,
    elapsed: Mutex<Option<Duration>>,
}

impl<'e, I, PK> std::fmt::Debug for Query<'e, I, PK> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query").finish_non_exhaustive()
    }
}

impl<'e, I, PK> Query<'e, I, PK>
where
    I: 'static,
    PK: Eq + Hash + Ord + Clone,
{
    pub(crate) fn new(engine: &'e Engine<I, PK>) -> Query<'e, I, PK> {
        Query {
            engine,
            amongst: Vec::new(),
            filter: None,
            sorts: Vec::new(),
            sort_primary_key_ascending: None,
            facets: Vec::new(),
            facet_disable_parallel: false,
            facet_short_circuit_counting: false,
            executed: AtomicBool::new(false),
            elapsed: Mutex::new(None),
        }
    }

    /// Restrict the result to these primary keys. Unknown keys are ignored.
    pub fn amongst(mut self, primary_keys: impl IntoIterator<Item = PK>) -> Query<'e, I, PK> {
        self.amongst.extend(primary_keys);
        self
    }

    /// Add a filter clause. Successive calls AND together.
    pub fn filter(mut self, clause: FilterClause) -> Query<'e, I, PK> {
        self.filter = Some(match self.filter.take() {
            Some(existing) => FilterClause::and(existing, clause),
            None => clause,
        });
        self
    }

    /// Add a sort key; parameters compose left to right, primary to
    /// secondary. One sort parameter per catalog.
    pub fn sort<K>(mut self, catalog: &CatalogHandle<K>, ascending: bool) -> Result<Query<'e, I, PK>>
    where
        K: Ord + Clone + Send + Sync + 'static,
    {
        if self.sort_primary_key_ascending.is_some() {
            return Err(Error::new(
                ErrorKind::Unsupported,
                "sort parameters cannot follow primary key ordering".to_string(),
            ));
        }
        if self.sorts.iter().any(|sort| sort.catalog_name() == catalog.name()) {
            return Err(Error::new(
                ErrorKind::DuplicateParameter,
                format!("catalog '{}' already has a sort parameter", catalog.name()),
            ));
        }
        self.sorts.push(catalog.sort_directive(ascending));
        Ok(self)
    }

    /// Order the result by primary key value. Exclusive with per-catalog
    /// sort parameters.
    pub fn sort_by_primary_key(mut self, ascending: bool) -> Result<Query<'e, I, PK>> {
        if !self.sorts.is_empty() {
            return Err(Error::new(
                ErrorKind::Unsupported,
                "primary key ordering cannot follow sort parameters".to_string(),
            ));
        }
        if self.sort_primary_key_ascending.is_some() {
            return Err(Error::new(
                ErrorKind::DuplicateParameter,
                "primary key ordering is already set".to_string(),
            ));
        }
        self.sort_primary_key_ascending = Some(ascending);
        Ok(self)
    }

    /// Request facet counts for a catalog. One facet per catalog.
    pub fn facet<K>(mut self, catalog: &CatalogHandle<K>) -> Result<Query<'e, I, PK>> {
        if self.facets.iter().any(|name| name == catalog.name()) {
            return Err(Error::new(
                ErrorKind::DuplicateParameter,
                format!("catalog '{}' already has a facet parameter", catalog.name()),
            ));
        }
        self.facets.push(catalog.name().to_string());
        Ok(self)
    }

    /// Cap the facet scan to one thread.
    pub fn facet_disable_parallel(mut self, disable: bool) -> Query<'e, I, PK> {
        self.facet_disable_parallel = disable;
        self
    }

    /// Report facet counts as presence flags (count 1 per matching key).
    pub fn facet_short_circuit_counting(mut self, short_circuit: bool) -> Query<'e, I, PK> {
        self.facet_short_circuit_counting = short_circuit;
        self
    }

    /// Wall time of the execution, once one has happened.
    pub fn elapsed(&self) -> Option<Duration> {
        *self.elapsed.lock()
    }

    /// Run the query: build the candidate set, count it, order it, page
    /// `skip`/`take` out of it, and compute the requested facets.
    pub fn execute(&self, skip: u32, take: u32) -> Result<QueryResult<PK>> {
        if self
            .executed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::new(
                ErrorKind::AlreadyExecuted,
                "a query executes exactly once".to_string(),
            ));
        }
        let started = Instant::now();
        self.validate()?;

        let mut candidate = match &self.filter {
            Some(clause) => self.engine.evaluate_filter(clause)?,
            None => self.engine.active_copy()?,
        };
        if !self.amongst.is_empty() {
            let mask = self.engine.primary_key_mask(&self.amongst)?;
            candidate.and_in_place(&mask)?;
        }

        let total = candidate.population();
        let wanted = (skip as usize).saturating_add(take as usize);
        let ordered = self.ordered_positions(&candidate, wanted)?;
        let primary_keys = ordered
            .into_iter()
            .skip(skip as usize)
            .filter_map(|position| self.engine.primary_key_at(position))
            .collect();

        let mut facets = HashMap::with_capacity(self.facets.len());
        for name in &self.facets {
            let counts = self.engine.facet_catalog(
                name,
                &candidate,
                self.facet_disable_parallel,
                self.facet_short_circuit_counting,
            )?;
            facets.insert(name.clone(), counts);
        }

        let elapsed = started.elapsed();
        *self.elapsed.lock() = Some(elapsed);
        self.engine.note_query_executed();
        trace!(total, elapsed_us = elapsed.as_micros() as u64, "query executed");

        Ok(QueryResult { primary_keys, total, facets, elapsed })
    }

    fn validate(&self) -> Result<()> {
        if let Some(clause) = &self.filter {
            let mut leaves = Vec::new();
            clause.leaf_catalogs(&mut leaves);
            for name in leaves {
                self.engine.catalog_as_any(name)?;
            }
            // direct conjuncts may not repeat a one-to-one catalog; leaves
            // nested under Or/Not are a single parameter from here
            let conjuncts: &[FilterClause] = match clause {
                FilterClause::And(children) => children,
                single => std::slice::from_ref(single),
            };
            let mut per_catalog: HashMap<&str, usize> = HashMap::new();
            for conjunct in conjuncts {
                if let FilterClause::Leaf(leaf) = conjunct {
                    *per_catalog.entry(leaf.catalog_name()).or_insert(0) += 1;
                }
            }
            for (name, count) in per_catalog {
                if count > 1 && self.engine.catalog_is_one_to_one(name)? {
                    return Err(Error::new(
                        ErrorKind::DuplicateParameter,
                        format!("catalog '{}' is one-to-one and takes a single filter", name),
                    ));
                }
            }
        }
        for sort in &self.sorts {
            self.engine.catalog_as_any(sort.catalog_name())?;
        }
        for facet in &self.facets {
            self.engine.catalog_as_any(facet)?;
        }
        Ok(())
    }

    /// The candidate's positions in final order, cut off at `wanted` (the
    /// page end); with no sort parameters this is plain position order.
    fn ordered_positions(&self, candidate: &Vector, wanted: usize) -> Result<Vec<BitPosition>> {
        if let Some(ascending) = self.sort_primary_key_ascending {
            let mut pairs: Vec<(PK, BitPosition)> = candidate
                .bit_positions(true)?
                .filter_map(|position| {
                    self.engine.primary_key_at(position).map(|pk| (pk, position))
                })
                .collect();
            pairs.sort_by(|a, b| if ascending { a.0.cmp(&b.0) } else { b.0.cmp(&a.0) });
            pairs.truncate(wanted);
            return Ok(pairs.into_iter().map(|(_, position)| position).collect());
        }
        let mut ordered = Vec::new();
        self.collect_sorted(&self.sorts, candidate, wanted, &mut ordered)?;
        Ok(ordered)
    }

    /// Depth-first walk of the sort parameters: the first parameter's key
    /// groups partition the candidate, later parameters partition each
    /// group in turn. Keys whose group is empty never surface, and the
    /// walk stops as soon as the page is full.
    fn collect_sorted(
        &self,
        sorts: &[Box<dyn SortDirective>],
        candidate: &Vector,
        wanted: usize,
        out: &mut Vec<BitPosition>,
    ) -> Result<()> {
        if out.len() >= wanted {
            return Ok(());
        }
        let (first, rest) = match sorts.split_first() {
            Some(split) => split,
            None => {
                for position in candidate.bit_positions(true)? {
                    out.push(position);
                    if out.len() >= wanted {
                        break;
                    }
                }
                return Ok(());
            }
        };
        let catalog = self.engine.catalog_as_any(first.catalog_name())?;
        for group in first.groups(catalog, candidate)? {
            let positions = group?;
            if rest.is_empty() {
                for position in positions {
                    out.push(position);
                    if out.len() >= wanted {
                        return Ok(());
                    }
                }
            } else {
                let mut narrowed = Vector::new(candidate.allow_unsafe(), Compression::None)?;
                for position in positions {
                    narrowed.set_bit(position, true)?;
                }
                self.collect_sorted(rest, &narrowed, wanted, out)?;
                if out.len() >= wanted {
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}
