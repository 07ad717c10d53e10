use std::marker::PhantomData;
use std::sync::Arc;

use crate::core::error::{Error, ErrorKind, Result};
use crate::query::filter::{FilterClause, FilterParameter, TypedLeaf};
use crate::query::sort::{SortDirective, TypedSort};

/// Typed token for a registered catalog. Filter, sort, and facet
/// parameters are built through the handle, which carries the catalog's
/// name and key type; the engine resolves both again at execution time and
/// surfaces `CatalogMismatch` if they no longer line up.
#[derive(Debug)]
pub struct CatalogHandle<K> {
    name: String,
    one_to_one: bool,
    _key: PhantomData<fn() -> K>,
}

impl<K> Clone for CatalogHandle<K> {
    fn clone(&self) -> Self {
        CatalogHandle {
            name: self.name.clone(),
            one_to_one: self.one_to_one,
            _key: PhantomData,
        }
    }
}

impl<K> CatalogHandle<K> {
    pub(crate) fn new(name: String, one_to_one: bool) -> CatalogHandle<K> {
        CatalogHandle { name, one_to_one, _key: PhantomData }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_one_to_one(&self) -> bool {
        self.one_to_one
    }
}

impl<K> CatalogHandle<K>
where
    K: Ord + Clone + Send + Sync + 'static,
{
    /// Filter to items carrying exactly this key.
    pub fn exact(&self, key: K) -> FilterClause {
        self.leaf(FilterParameter::Exact(key))
    }

    /// Filter to items carrying any of these keys (deduplicated).
    pub fn any_of(&self, keys: impl IntoIterator<Item = K>) -> FilterClause {
        self.leaf(FilterParameter::AnyOf(keys.into_iter().collect()))
    }

    /// Filter to items whose key lies in `[min, max]`. A missing bound
    /// defaults to the catalog's own extreme; at least one must be given.
    pub fn range(&self, min: Option<K>, max: Option<K>) -> Result<FilterClause> {
        if min.is_none() && max.is_none() {
            return Err(Error::new(
                ErrorKind::ArgumentRequired,
                format!("range filter on catalog '{}' needs at least one bound", self.name),
            ));
        }
        if let (Some(lo), Some(hi)) = (&min, &max) {
            if lo > hi {
                return Err(Error::new(
                    ErrorKind::ArgumentOutOfRange,
                    format!("range filter on catalog '{}' has min > max", self.name),
                ));
            }
        }
        Ok(self.leaf(FilterParameter::Range(min, max)))
    }

    fn leaf(&self, parameter: FilterParameter<K>) -> FilterClause {
        FilterClause::Leaf(Arc::new(TypedLeaf {
            catalog: self.name.clone(),
            parameter,
        }))
    }

    pub(crate) fn sort_directive(&self, ascending: bool) -> Box<dyn SortDirective> {
        Box::new(TypedSort::<K> {
            catalog: self.name.clone(),
            ascending,
            _key: PhantomData,
        })
    }
}
