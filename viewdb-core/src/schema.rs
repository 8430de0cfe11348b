//! Declarative description of node types, their attributes and their indices.
//!
//! A [`Schema`] is purely descriptive metadata consumed by the rest of the
//! store; it performs no mutation itself. It is built exactly once at startup
//! through a [`SchemaBuilder`] and then passed into subgraphs as an
//! `Arc<Schema>` — node types never self-register into hidden global state.
//!
//! Every schema carries one built-in node type, [`Schema::PATH`], whose nodes
//! form the hierarchical name tree of each subgraph (see [`crate::path`]).

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use smol_str::SmolStr;
use thiserror::Error;

use crate::core::{AttrId, IndexId, Nid, NodeTypeId};
use crate::path::NodePath;
use crate::row::RowBuilder;
use crate::value::{AttrValue, ValueType};

/// A write that breaks the declared schema or naming contract.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ModelViolation {
    /// A row supplied a value under a name the node type does not declare.
    #[error("node type {ty} has no attribute {name}")]
    UnknownAttr {
        /// Name of the node type.
        ty: SmolStr,
        /// The unknown attribute name.
        name: SmolStr,
    },
    /// A supplied value does not belong to the declared attribute type.
    #[error("attribute {ty}.{attr} expects {expected}, got {got}")]
    TypeMismatch {
        /// Name of the node type.
        ty: SmolStr,
        /// Name of the attribute.
        attr: SmolStr,
        /// The declared value type.
        expected: ValueType,
        /// Kind tag of the rejected value.
        got: &'static str,
    },
    /// A required attribute was left unset.
    #[error("attribute {ty}.{attr} is required")]
    MissingAttr {
        /// Name of the node type.
        ty: SmolStr,
        /// Name of the attribute.
        attr: SmolStr,
    },
    /// A reference slot was filled with a target of the wrong type.
    #[error("attribute {ty}.{attr} must reference a {expected} node, found {found}")]
    BadRefTarget {
        /// Name of the referencing node type.
        ty: SmolStr,
        /// Name of the referencing attribute.
        attr: SmolStr,
        /// Name of the declared target type.
        expected: SmolStr,
        /// Name of the actual target type.
        found: SmolStr,
    },
    /// A row was built against a different schema than the subgraph uses.
    #[error("row was built for a different schema")]
    ForeignRow,
    /// A subgraph was created or loaded without a root node at n0, or with a
    /// non-root node type at n0.
    #[error("subgraph root (n0) is missing or not a declared root type")]
    MissingRoot,
    /// The root node (n0) cannot be removed.
    #[error("the subgraph root (n0) cannot be removed")]
    RemoveRoot,
    /// A node type is not allowed under the subgraph's root type.
    #[error("{ty} nodes are not permitted in a {root} subgraph")]
    NotPermitted {
        /// Name of the offending node type.
        ty: SmolStr,
        /// Name of the subgraph's root type.
        root: SmolStr,
    },
    /// A path was bound while already naming a different node.
    #[error("path {path} is already bound")]
    PathBound {
        /// The contested path.
        path: NodePath,
    },
    /// A node was bound while already carrying a canonical path.
    #[error("node {nid} already has a path")]
    AlreadyNamed {
        /// The node in question.
        nid: Nid,
    },
    /// A textual path failed to parse.
    #[error("invalid path segment {seg:?}: names start with an ASCII letter or underscore")]
    PathSyntax {
        /// The offending segment text.
        seg: String,
    },
    /// An operation expected a non-empty path.
    #[error("empty path")]
    EmptyPath,
    /// A node was inserted under an explicit nid that is already taken.
    #[error("duplicate node id {0}")]
    DuplicateNid(Nid),
    /// The sequential nid allocator ran out of ids.
    #[error("node id allocation exhausted")]
    NidsExhausted,
}

/// Declaration of one attribute slot on a node type.
#[derive(Clone, Debug)]
pub struct AttrDef {
    name: SmolStr,
    ty: ValueType,
    optional: bool,
    default: Option<AttrValue>,
}

impl AttrDef {
    /// The attribute name.
    #[must_use]
    pub fn name(&self) -> &SmolStr {
        &self.name
    }

    /// The declared value type.
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        self.ty
    }

    /// Whether the slot may be left unset.
    #[must_use]
    pub fn is_optional(&self) -> bool {
        self.optional
    }

    /// The default value filled in at row construction, if any.
    #[must_use]
    pub fn default(&self) -> Option<&AttrValue> {
        self.default.as_ref()
    }
}

/// Declaration of one relational index.
///
/// A single-attribute index skips nodes whose attribute is unset; a combined
/// index over several attributes always keys the full tuple, including unset
/// slots. A unique index additionally enforces a one-to-one constraint.
#[derive(Clone, Debug)]
pub struct IndexDef {
    id: IndexId,
    ty: NodeTypeId,
    attrs: Box<[AttrId]>,
    unique: bool,
}

impl IndexDef {
    /// The schema-global id of this index.
    #[must_use]
    pub fn id(&self) -> IndexId {
        self.id
    }

    /// The node type the index is declared on.
    #[must_use]
    pub fn node_type(&self) -> NodeTypeId {
        self.ty
    }

    /// The indexed attribute slots, in key order.
    #[must_use]
    pub fn attrs(&self) -> &[AttrId] {
        &self.attrs
    }

    /// Whether the index enforces a one-to-one constraint.
    #[must_use]
    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub(crate) fn skips_unset(&self) -> bool {
        self.attrs.len() == 1
    }
}

/// Declaration of one node type: an ordered list of attributes plus the
/// indices kept over them.
#[derive(Clone, Debug)]
pub struct NodeTypeDef {
    name: SmolStr,
    attrs: IndexMap<SmolStr, AttrDef>,
    indices: Vec<IndexId>,
    root: bool,
    permitted_in: Option<Box<[NodeTypeId]>>,
}

impl NodeTypeDef {
    /// The node type name.
    #[must_use]
    pub fn name(&self) -> &SmolStr {
        &self.name
    }

    /// Number of attribute slots.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.attrs.len()
    }

    /// Looks up an attribute slot by name.
    #[must_use]
    pub fn attr_id(&self, name: &str) -> Option<AttrId> {
        self.attrs.get_index_of(name).map(AttrId::new)
    }

    /// The declaration of an attribute slot.
    ///
    /// # Panics
    ///
    /// If the slot does not belong to this type.
    #[must_use]
    pub fn attr(&self, id: AttrId) -> &AttrDef {
        let (_, def) = self
            .attrs
            .get_index(id.index())
            .expect("attribute id out of range");
        def
    }

    /// All attribute declarations in slot order.
    pub fn attrs(&self) -> impl ExactSizeIterator<Item = &AttrDef> {
        self.attrs.values()
    }

    /// Ids of the indices declared on this type.
    #[must_use]
    pub fn indices(&self) -> &[IndexId] {
        &self.indices
    }

    /// Whether this type may tag a subgraph root (nid 0).
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.root
    }

    /// Whether nodes of this type may live in a subgraph rooted by `root`.
    #[must_use]
    pub fn permitted_in(&self, root: NodeTypeId) -> bool {
        match &self.permitted_in {
            None => true,
            Some(roots) => roots.contains(&root),
        }
    }
}

/// An immutable registry of node types and indices.
///
/// Built once by [`SchemaBuilder`] and shared by every subgraph that uses it.
#[derive(Debug)]
pub struct Schema {
    types: IndexMap<SmolStr, NodeTypeDef>,
    indices: Vec<IndexDef>,
}

impl Schema {
    /// The built-in path node type present in every schema.
    pub const PATH: NodeTypeId = NodeTypeId::from_const(0);
    /// Slot of the path node's parent reference (root node or parent path).
    pub const PATH_PARENT: AttrId = AttrId::from_const(0);
    /// Slot of the path node's segment name.
    pub const PATH_NAME: AttrId = AttrId::from_const(1);
    /// Slot of the path node's target reference (unset for empty paths).
    pub const PATH_REF: AttrId = AttrId::from_const(2);
    /// Unique index over (parent, name): child lookup and name uniqueness.
    pub const PATH_BY_NAME: IndexId = IndexId::from_const(0);
    /// Unique index over the target: one canonical path per node.
    pub const PATH_OF: IndexId = IndexId::from_const(1);
    /// Non-unique index over the parent: subtree enumeration.
    pub const PATH_CHILDREN: IndexId = IndexId::from_const(2);

    /// Starts building a schema.
    #[must_use]
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    /// Number of declared node types, including the built-in path type.
    #[must_use]
    pub fn num_types(&self) -> usize {
        self.types.len()
    }

    /// Looks up a node type by name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<NodeType<'_>> {
        self.types
            .get_index_of(name)
            .map(|index| self.get(NodeTypeId::new(index)))
    }

    /// Returns a handle to a node type.
    ///
    /// # Panics
    ///
    /// If the id does not belong to this schema.
    #[must_use]
    pub fn get(&self, id: NodeTypeId) -> NodeType<'_> {
        let (_, def) = self
            .types
            .get_index(id.index())
            .expect("node type id out of range");
        NodeType {
            schema: self,
            id,
            def,
        }
    }

    pub(crate) fn type_def(&self, id: NodeTypeId) -> Option<&NodeTypeDef> {
        self.types.get_index(id.index()).map(|(_, def)| def)
    }

    /// The declaration of an index.
    ///
    /// # Panics
    ///
    /// If the id does not belong to this schema.
    #[must_use]
    pub fn index(&self, id: IndexId) -> &IndexDef {
        &self.indices[id.index()]
    }

    /// All node types in declaration order.
    pub fn types(&self) -> impl Iterator<Item = NodeType<'_>> {
        (0..self.types.len()).map(|index| self.get(NodeTypeId::new(index)))
    }
}

/// A borrowed handle to one node type of a schema, used to build rows and
/// queries.
#[derive(Clone, Copy, Debug)]
pub struct NodeType<'s> {
    schema: &'s Schema,
    id: NodeTypeId,
    def: &'s NodeTypeDef,
}

impl<'s> NodeType<'s> {
    /// The type's id within its schema.
    #[must_use]
    pub fn id(&self) -> NodeTypeId {
        self.id
    }

    /// The type's declaration.
    #[must_use]
    pub fn def(&self) -> &'s NodeTypeDef {
        self.def
    }

    /// The schema the type belongs to.
    #[must_use]
    pub fn schema(&self) -> &'s Schema {
        self.schema
    }

    /// Starts building a row of this type, with defaults filled in.
    #[must_use]
    pub fn row(&self) -> RowBuilder<'s> {
        RowBuilder::new(*self)
    }
}

impl fmt::Display for NodeType<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.def.name())
    }
}

/// Builder assembling a [`Schema`] at startup.
///
/// Node types may be forward-declared with [`SchemaBuilder::declare`] so that
/// local references can target types defined later. Declaring the same name
/// twice, or finishing with a declared-but-undefined type, is a programming
/// error and panics.
#[derive(Debug)]
pub struct SchemaBuilder {
    types: IndexMap<SmolStr, Option<NodeTypeDef>>,
    indices: Vec<IndexDef>,
}

impl SchemaBuilder {
    /// Creates a builder pre-populated with the built-in path type.
    #[must_use]
    pub fn new() -> Self {
        let mut builder = SchemaBuilder {
            types: IndexMap::new(),
            indices: Vec::new(),
        };
        let path = builder.declare("$path");
        let mut t = builder.node_type("$path");
        let parent = t.required("parent", ValueType::NodeRef);
        let name = t.required("name", ValueType::PathName);
        let target = t.attr("ref", ValueType::NodeRef);
        t.unique_index([parent, name]);
        t.unique_index([target]);
        t.index([parent]);
        let defined = t.finish();
        debug_assert_eq!(path, Schema::PATH);
        debug_assert_eq!(defined, Schema::PATH);
        builder
    }

    /// Forward-declares a node type, returning its id.
    ///
    /// Declaring an already-known name returns the existing id.
    pub fn declare(&mut self, name: &str) -> NodeTypeId {
        if let Some(index) = self.types.get_index_of(name) {
            return NodeTypeId::new(index);
        }
        let (index, _) = self.types.insert_full(name.into(), None);
        NodeTypeId::new(index)
    }

    /// Starts defining a node type.
    ///
    /// # Panics
    ///
    /// If the name was already defined (forward declarations are fine).
    pub fn node_type(&mut self, name: &str) -> NodeTypeBuilder<'_> {
        let id = self.declare(name);
        assert!(
            self.types[id.index()].is_none(),
            "node type {name} is already defined"
        );
        NodeTypeBuilder {
            builder: self,
            id,
            def: NodeTypeDef {
                name: name.into(),
                attrs: IndexMap::new(),
                indices: Vec::new(),
                root: false,
                permitted_in: None,
            },
        }
    }

    /// Starts defining a subgraph-root node type.
    ///
    /// # Panics
    ///
    /// If the name was already defined.
    pub fn root_type(&mut self, name: &str) -> NodeTypeBuilder<'_> {
        let mut t = self.node_type(name);
        t.def.root = true;
        t
    }

    /// Finishes the schema.
    ///
    /// # Panics
    ///
    /// If a forward-declared type was never defined.
    #[must_use]
    pub fn finish(self) -> Arc<Schema> {
        let types = self
            .types
            .into_iter()
            .map(|(name, def)| {
                let def = def.unwrap_or_else(|| panic!("node type {name} was declared but never defined"));
                (name, def)
            })
            .collect();
        Arc::new(Schema {
            types,
            indices: self.indices,
        })
    }
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for one node type within a [`SchemaBuilder`].
#[derive(Debug)]
pub struct NodeTypeBuilder<'b> {
    builder: &'b mut SchemaBuilder,
    id: NodeTypeId,
    def: NodeTypeDef,
}

impl NodeTypeBuilder<'_> {
    fn push_attr(&mut self, name: &str, def: AttrDef) -> AttrId {
        let (index, prev) = self.def.attrs.insert_full(name.into(), def);
        assert!(
            prev.is_none(),
            "attribute {} is already declared on {}",
            name,
            self.def.name
        );
        AttrId::new(index)
    }

    /// Declares an optional attribute.
    pub fn attr(&mut self, name: &str, ty: ValueType) -> AttrId {
        self.push_attr(
            name,
            AttrDef {
                name: name.into(),
                ty,
                optional: true,
                default: None,
            },
        )
    }

    /// Declares a required attribute.
    pub fn required(&mut self, name: &str, ty: ValueType) -> AttrId {
        self.push_attr(
            name,
            AttrDef {
                name: name.into(),
                ty,
                optional: false,
                default: None,
            },
        )
    }

    /// Declares an attribute with a default value.
    ///
    /// # Panics
    ///
    /// If the default does not belong to the declared type.
    pub fn attr_with_default(
        &mut self,
        name: &str,
        ty: ValueType,
        default: impl Into<AttrValue>,
    ) -> AttrId {
        let default = default.into();
        assert!(
            ty.admits(&default),
            "default for {}.{} does not match {}",
            self.def.name,
            name,
            ty
        );
        self.push_attr(
            name,
            AttrDef {
                name: name.into(),
                ty,
                optional: true,
                default: Some(default),
            },
        )
    }

    /// Declares a non-unique index over the given attribute slots.
    pub fn index(&mut self, attrs: impl IntoIterator<Item = AttrId>) -> IndexId {
        self.push_index(attrs, false)
    }

    /// Declares a unique index over the given attribute slots.
    pub fn unique_index(&mut self, attrs: impl IntoIterator<Item = AttrId>) -> IndexId {
        self.push_index(attrs, true)
    }

    fn push_index(&mut self, attrs: impl IntoIterator<Item = AttrId>, unique: bool) -> IndexId {
        let attrs: Box<[AttrId]> = attrs.into_iter().collect();
        assert!(!attrs.is_empty(), "index on {} has no attributes", self.def.name);
        let id = IndexId::new(self.builder.indices.len());
        self.builder.indices.push(IndexDef {
            id,
            ty: self.id,
            attrs,
            unique,
        });
        self.def.indices.push(id);
        id
    }

    /// Restricts the type to subgraphs rooted by one of `roots`.
    pub fn permitted_in(&mut self, roots: impl IntoIterator<Item = NodeTypeId>) {
        self.def.permitted_in = Some(roots.into_iter().collect());
    }

    /// Completes the type definition, returning its id.
    pub fn finish(self) -> NodeTypeId {
        let NodeTypeBuilder { builder, id, def } = self;
        builder.types[id.index()] = Some(def);
        id
    }
}
