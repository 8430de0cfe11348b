//! Schema-typed persistent graph store for IC design data.
//!
//! This crate contains the core definitions for viewdb, the in-process data
//! store underlying symbols, schematics, layouts and simulation hierarchies:
//! each design artifact is a *subgraph* of typed, attributed nodes with
//! relational indices and hierarchical names.
//!
//! The store reconciles four requirements: a fixed, validated [`schema`] of
//! node types; bidirectional relational queries through automatically
//! maintained [indices](index); full structural immutability with O(1)
//! snapshots, so near-identical design variants share memory; and an
//! imperative mutation facade that hides the persistence machinery.
//!
//! See the [top-level crate documentation](https://docs.rs/viewdb/latest/viewdb/)
//! for an introductory example.

pub mod core;
pub mod extref;
pub mod index;
pub mod path;
pub mod row;
pub mod schema;
pub mod subgraph;
pub mod updater;
pub mod value;

pub use crate::core::{AttrId, IndexId, Nid, NodeTypeId, StoreError};
pub use crate::extref::ExtRef;
pub use crate::index::{DanglingLocalRef, IndexQuery, UniqueViolation};
pub use crate::path::{NodePath, PathSeg};
pub use crate::row::{Row, RowBuilder};
pub use crate::schema::{
    AttrDef, IndexDef, ModelViolation, NodeType, NodeTypeBuilder, NodeTypeDef, Schema,
    SchemaBuilder,
};
pub use crate::subgraph::{
    Children, FrozenSubgraph, MutableSubgraph, NidIter, QueryError, SubgraphView,
};
pub use crate::updater::Updater;
pub use crate::value::{AttrValue, CellHandle, Rational, Rect, ValueType, Vec2};
