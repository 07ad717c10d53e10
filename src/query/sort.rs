use std::any::Any;
use std::marker::PhantomData;

use crate::bitmap::vector::Vector;
use crate::catalog::catalog::Catalog;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::BitPosition;

/// One sort key bound to a catalog by name. Execution resolves the catalog
/// and pulls ordered position groups out of it.
pub(crate) trait SortDirective: Send + Sync {
    fn catalog_name(&self) -> &str;

    /// Groups of candidate positions in key order, one group per key whose
    /// intersection with the candidate is non-empty.
    fn groups<'a>(
        &self,
        catalog: &'a dyn Any,
        candidate: &'a Vector,
    ) -> Result<Box<dyn Iterator<Item = Result<Vec<BitPosition>>> + 'a>>;
}

pub(crate) struct TypedSort<K> {
    pub(crate) catalog: String,
    pub(crate) ascending: bool,
    pub(crate) _key: PhantomData<fn() -> K>,
}

impl<K> SortDirective for TypedSort<K>
where
    K: Ord + Clone + Send + Sync + 'static,
{
    fn catalog_name(&self) -> &str {
        &self.catalog
    }

    fn groups<'a>(
        &self,
        catalog: &'a dyn Any,
        candidate: &'a Vector,
    ) -> Result<Box<dyn Iterator<Item = Result<Vec<BitPosition>>> + 'a>> {
        let catalog = catalog.downcast_ref::<Catalog<K>>().ok_or_else(|| {
            Error::new(
                ErrorKind::CatalogMismatch,
                format!("catalog '{}' does not hold this sort's key type", self.catalog),
            )
        })?;
        let groups = catalog
            .sort_bit_positions(candidate, true, self.ascending)
            .map(|group| group.map(|(_, positions)| positions));
        Ok(Box::new(groups))
    }
}
