//! Definitions for the core identifier types used throughout the store.
//!
//! These types are re-exported in the root of the crate.

use derive_more::{Display, From};
use thiserror::Error;

use crate::index::{DanglingLocalRef, UniqueViolation};
use crate::schema::ModelViolation;
use crate::subgraph::QueryError;

/// A handle to a node within one subgraph.
///
/// Node ids are assigned sequentially on insertion and stay stable across the
/// whole lineage of a subgraph: freezing, thawing and further edits never
/// renumber existing nodes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display, From)]
#[display("n{_0}")]
pub struct Nid(u32);

impl Nid {
    /// The id of the distinguished root node present in every subgraph.
    pub const ROOT: Nid = Nid(0);

    /// Creates a node id from its raw index.
    #[must_use]
    pub fn new(index: u32) -> Self {
        Nid(index)
    }

    /// Returns the raw index of the node id.
    #[must_use]
    pub fn index(self) -> u32 {
        self.0
    }

    /// Whether this is the root node id.
    #[must_use]
    pub fn is_root(self) -> bool {
        self == Self::ROOT
    }
}

/// A handle to a node type declared in a [`Schema`](crate::schema::Schema).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display, From)]
#[display("ty{_0}")]
pub struct NodeTypeId(u16);

impl NodeTypeId {
    pub(crate) fn new(index: usize) -> Self {
        NodeTypeId(u16::try_from(index).expect("too many node types"))
    }

    pub(crate) const fn from_const(index: u16) -> Self {
        NodeTypeId(index)
    }

    /// Returns the position of the type in its schema.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A handle to an attribute slot within one node type.
///
/// Attribute ids are positions in the declared attribute tuple; they are only
/// meaningful together with the [`NodeTypeId`] they were declared under.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display, From)]
#[display("a{_0}")]
pub struct AttrId(u16);

impl AttrId {
    pub(crate) fn new(index: usize) -> Self {
        AttrId(u16::try_from(index).expect("too many attributes"))
    }

    pub(crate) const fn from_const(index: u16) -> Self {
        AttrId(index)
    }

    /// Returns the slot position of the attribute within its node type.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A handle to a declared relational index.
///
/// Index ids are schema-global: every declared index gets a distinct id, no
/// matter which node type it belongs to.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display, From)]
#[display("idx{_0}")]
pub struct IndexId(u32);

impl IndexId {
    pub(crate) fn new(index: usize) -> Self {
        IndexId(u32::try_from(index).expect("too many indices"))
    }

    pub(crate) const fn from_const(index: u32) -> Self {
        IndexId(index)
    }

    /// Returns the schema-global position of the index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The root error kind raised by the store.
///
/// Every failure is one of the four taxonomy members below. Errors are raised
/// synchronously at the call that caused them and are never swallowed or
/// retried internally; a failed operation leaves the subgraph in its prior
/// state.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// A lookup did not return exactly one result.
    #[error(transparent)]
    Query(#[from] QueryError),
    /// A write broke the declared schema or naming contract.
    #[error(transparent)]
    Model(#[from] ModelViolation),
    /// A write would duplicate a key under a unique index.
    #[error(transparent)]
    Unique(#[from] UniqueViolation),
    /// A local reference points at a node that does not exist.
    #[error(transparent)]
    Dangling(#[from] DanglingLocalRef),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn nid_display() {
        assert_eq!(Nid::ROOT.to_string(), "n0");
        assert_eq!(Nid::new(42).to_string(), "n42");
        assert!(Nid::ROOT.is_root());
        assert!(!Nid::new(1).is_root());
    }

    #[test]
    fn error_conversion() {
        let err: StoreError = DanglingLocalRef(Nid::new(3)).into();
        assert_eq!(
            err.to_string(),
            "dangling local reference to node n3 (node missing or about to be removed)"
        );
    }
}
