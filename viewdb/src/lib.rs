//! Schema-typed persistent graph store for IC design data.
//!
//! Every design artifact of the platform — a symbol, a schematic, a layout,
//! a simulation hierarchy — is a *subgraph*: typed, attributed nodes with
//! relational indices and hierarchical names, all reachable from a root node
//! that tags what kind of design data the subgraph holds.
//!
//! Subgraphs are persistent data structures. A [`MutableSubgraph`] presents
//! ordinary imperative editing, but every edit produces a new internal
//! version that shares all untouched storage with its predecessors; freezing
//! into a [`FrozenSubgraph`] is O(1) and yields an immutable, hashable
//! snapshot that is safe to cache, share between threads and reference from
//! other subgraphs. Fifty captioned variants of the same resistor symbol, or
//! a thousand Monte-Carlo copies of a simulation result, cost little more
//! than one.
//!
//! # Example
//!
//! ```
//! use viewdb::{AttrValue, MutableSubgraph, Schema, SubgraphView, ValueType};
//!
//! // The schema is built once at startup and shared by all subgraphs.
//! let mut b = Schema::builder();
//! let mut symbol = b.root_type("Symbol");
//! symbol.attr("caption", ValueType::Str);
//! let symbol = symbol.finish();
//! let mut pin = b.node_type("Pin");
//! let pintype = pin.attr_with_default("pintype", ValueType::Token, AttrValue::token("inout"));
//! let by_pintype = pin.index([pintype]);
//! let pin = pin.finish();
//! let schema = b.finish();
//!
//! // A view generator fills a mutable subgraph ...
//! let root = schema.get(symbol).row().set("caption", "nand2")?.finish();
//! let mut sg = MutableSubgraph::new(schema.clone(), root)?;
//! let a = sg.add(schema.get(pin).row().finish())?;
//! sg.bind(&"a".parse()?, a)?;
//!
//! // ... and freezes it at its functional boundary.
//! let frozen = sg.freeze();
//! assert_eq!(frozen.resolve(&"a".parse()?)?, a);
//! let inouts = frozen.query(&schema.index(by_pintype).eq(AttrValue::token("inout")));
//! assert_eq!(inouts.count(), 1);
//! # Ok::<(), viewdb::StoreError>(())
//! ```

pub use viewdb_core::{
    AttrDef, AttrId, AttrValue, CellHandle, Children, DanglingLocalRef, ExtRef, FrozenSubgraph,
    IndexDef, IndexId, IndexQuery, ModelViolation, MutableSubgraph, NidIter, Nid, NodePath,
    NodeType, NodeTypeBuilder, NodeTypeDef, NodeTypeId, PathSeg, QueryError, Rational, Rect, Row,
    RowBuilder, Schema, SchemaBuilder, StoreError, SubgraphView, UniqueViolation, Updater,
    ValueType, Vec2,
};

pub mod core {
    //! Core identifier types and the error taxonomy.
    pub use viewdb_core::core::*;
}

pub mod extref {
    //! References into other, frozen subgraphs.
    pub use viewdb_core::extref::*;
}

pub mod index {
    //! The relational index layer.
    pub use viewdb_core::index::*;
}

pub mod path {
    //! Hierarchical node paths.
    pub use viewdb_core::path::*;
}

pub mod row {
    //! Node rows and row building.
    pub use viewdb_core::row::*;
}

pub mod schema {
    //! Node type, attribute and index declarations.
    pub use viewdb_core::schema::*;
}

pub mod subgraph {
    //! Subgraphs and their mutable/frozen facades.
    pub use viewdb_core::subgraph::*;
}

pub mod updater {
    //! The mutation engine.
    pub use viewdb_core::updater::*;
}

pub mod value {
    //! Attribute values and value types.
    pub use viewdb_core::value::*;
}
