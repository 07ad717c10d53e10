use std::any::Any;
use std::fmt;
use std::ops::{BitAnd, BitOr, Not};
use std::sync::Arc;

use crate::bitmap::vector::Vector;
use crate::catalog::catalog::Catalog;
use crate::core::error::{Error, ErrorKind, Result};

/// A leaf filter bound to a catalog by name. The engine resolves the
/// catalog at execution time and hands it over as `&dyn Any`; the leaf
/// downcasts back to its key type. Leaves are built through
/// `CatalogHandle`, which is what keeps the name and key type in step.
pub trait FilterLeaf: Send + Sync {
    fn catalog_name(&self) -> &str;
    fn apply(&self, catalog: &dyn Any, target: &mut Vector) -> Result<()>;
}

/// Boolean filter expression over catalog leaves.
///
/// `and`/`or` (and the `&`/`|` operators) flatten same-operation children
/// on construction, so `a & b & c` is one ternary `And` node rather than
/// nested binaries, whichever side the nested node arrives on.
#[derive(Clone)]
pub enum FilterClause {
    Leaf(Arc<dyn FilterLeaf>),
    And(Vec<FilterClause>),
    Or(Vec<FilterClause>),
    Not(Box<FilterClause>),
}

impl FilterClause {
    pub fn and(lhs: FilterClause, rhs: FilterClause) -> FilterClause {
        let mut children = Vec::new();
        for clause in [lhs, rhs] {
            match clause {
                FilterClause::And(nested) => children.extend(nested),
                other => children.push(other),
            }
        }
        FilterClause::And(children)
    }

    pub fn or(lhs: FilterClause, rhs: FilterClause) -> FilterClause {
        let mut children = Vec::new();
        for clause in [lhs, rhs] {
            match clause {
                FilterClause::Or(nested) => children.extend(nested),
                other => children.push(other),
            }
        }
        FilterClause::Or(children)
    }

    pub fn negate(clause: FilterClause) -> FilterClause {
        FilterClause::Not(Box::new(clause))
    }

    /// Catalog names of every leaf, in evaluation order.
    pub(crate) fn leaf_catalogs<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            FilterClause::Leaf(leaf) => out.push(leaf.catalog_name()),
            FilterClause::And(children) | FilterClause::Or(children) => {
                for child in children {
                    child.leaf_catalogs(out);
                }
            }
            FilterClause::Not(child) => child.leaf_catalogs(out),
        }
    }
}

impl BitAnd for FilterClause {
    type Output = FilterClause;

    fn bitand(self, rhs: FilterClause) -> FilterClause {
        FilterClause::and(self, rhs)
    }
}

impl BitOr for FilterClause {
    type Output = FilterClause;

    fn bitor(self, rhs: FilterClause) -> FilterClause {
        FilterClause::or(self, rhs)
    }
}

impl Not for FilterClause {
    type Output = FilterClause;

    fn not(self) -> FilterClause {
        FilterClause::negate(self)
    }
}

impl fmt::Debug for FilterClause {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FilterClause::Leaf(leaf) => write!(f, "Leaf({})", leaf.catalog_name()),
            FilterClause::And(children) => f.debug_tuple("And").field(children).finish(),
            FilterClause::Or(children) => f.debug_tuple("Or").field(children).finish(),
            FilterClause::Not(child) => f.debug_tuple("Not").field(child).finish(),
        }
    }
}

/// The three leaf shapes, by key selection.
pub(crate) enum FilterParameter<K> {
    Exact(K),
    AnyOf(Vec<K>),
    Range(Option<K>, Option<K>),
}

pub(crate) struct TypedLeaf<K> {
    pub(crate) catalog: String,
    pub(crate) parameter: FilterParameter<K>,
}

impl<K> FilterLeaf for TypedLeaf<K>
where
    K: Ord + Clone + Send + Sync + 'static,
{
    fn catalog_name(&self) -> &str {
        &self.catalog
    }

    fn apply(&self, catalog: &dyn Any, target: &mut Vector) -> Result<()> {
        let catalog = catalog.downcast_ref::<Catalog<K>>().ok_or_else(|| {
            Error::new(
                ErrorKind::CatalogMismatch,
                format!("catalog '{}' does not hold this filter's key type", self.catalog),
            )
        })?;
        match &self.parameter {
            FilterParameter::Exact(key) => catalog.filter_exact(target, key),
            FilterParameter::AnyOf(keys) => catalog.filter_any_of(target, keys.iter().cloned()),
            FilterParameter::Range(min, max) => {
                catalog.filter_range(target, min.as_ref(), max.as_ref())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(catalog: &str) -> FilterClause {
        FilterClause::Leaf(Arc::new(TypedLeaf {
            catalog: catalog.to_string(),
            parameter: FilterParameter::Exact(0u32),
        }))
    }

    fn child_count(clause: &FilterClause) -> usize {
        match clause {
            FilterClause::And(children) | FilterClause::Or(children) => children.len(),
            _ => 0,
        }
    }

    #[test]
    fn and_flattens_to_one_node() {
        let clause = leaf("a") & leaf("b") & leaf("c");
        assert!(matches!(clause, FilterClause::And(_)));
        assert_eq!(child_count(&clause), 3);
    }

    #[test]
    fn or_flattens_to_one_node() {
        let clause = (leaf("a") | leaf("b")) | (leaf("c") | leaf("d"));
        assert!(matches!(clause, FilterClause::Or(_)));
        assert_eq!(child_count(&clause), 4);
    }

    #[test]
    fn and_keeps_or_children_whole_on_either_side() {
        let left = (leaf("a") | leaf("b")) & leaf("c");
        assert!(matches!(left, FilterClause::And(_)));
        assert_eq!(child_count(&left), 2);

        let right = leaf("c") & (leaf("a") | leaf("b"));
        assert!(matches!(right, FilterClause::And(_)));
        assert_eq!(child_count(&right), 2);
    }

    #[test]
    fn negation_wraps_a_single_child() {
        let clause = !(leaf("a") & leaf("b"));
        match clause {
            FilterClause::Not(child) => assert_eq!(child_count(&child), 2),
            other => panic!("expected Not, got {:?}", other),
        }
    }

    #[test]
    fn leaf_catalogs_walk_in_order() {
        let clause = (leaf("a") | leaf("b")) & !leaf("c");
        let mut names = Vec::new();
        clause.leaf_catalogs(&mut names);
        assert_eq!(names, vec!["a", "b", "c"]);
    }
}
