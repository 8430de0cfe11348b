//! Subgraphs and their mutable/frozen facades.
//!
//! A subgraph is the aggregate of all nodes reachable from its root node
//! (n0), together with the derived indices and the name tree. The same
//! persistent state is exposed through two facades:
//!
//! - [`MutableSubgraph`] supports insertion, update and removal through the
//!   mutation engine. Every edit produces a new internal version; untouched
//!   rows, index entries and path entries are shared with all previous
//!   versions. The facade is single-owner and not thread-safe.
//! - [`FrozenSubgraph`] is a read-only snapshot: cheap to clone, safe to
//!   share across threads, hashable and comparable by content. It can only
//!   be edited by thawing into a fresh [`MutableSubgraph`].
//!
//! All read operations live on the [`SubgraphView`] trait, implemented by
//! both facades.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use delegate::delegate;
use fxhash::FxHasher64;
use imbl::{OrdMap, Vector};
use itertools::Itertools;
use thiserror::Error;
use tracing::debug;

use crate::core::{AttrId, Nid, NodeTypeId, StoreError};
use crate::index::{self, IndexKey, IndexQuery, IndexState};
use crate::path::{NodePath, PathSeg};
use crate::row::Row;
use crate::schema::Schema;
use crate::updater::Updater;
use crate::value::AttrValue;

/// A lookup did not return the required result.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum QueryError {
    /// The requested node does not exist.
    #[error("no node with id {0}")]
    NodeNotFound(Nid),
    /// A one-result query matched nothing.
    #[error("query matched no nodes where exactly one was required")]
    NoMatch,
    /// A one-result query matched more than one node.
    #[error("query matched {0} nodes where exactly one was required")]
    Ambiguous(usize),
    /// The path does not name a node.
    #[error("path {0} is not bound")]
    PathNotFound(NodePath),
    /// The node carries no path.
    #[error("node {0} has no path")]
    NoPath(Nid),
}

/// The persistent state behind both facades.
///
/// This type is an implementation detail; use the facades and the
/// [`SubgraphView`] trait instead.
#[doc(hidden)]
#[derive(Clone, Debug)]
pub struct SubgraphState {
    pub(crate) schema: Arc<Schema>,
    pub(crate) nodes: OrdMap<Nid, Arc<Row>>,
    pub(crate) index: IndexState,
    pub(crate) next_nid: u32,
}

impl SubgraphState {
    pub(crate) fn get(&self, nid: Nid) -> Result<&Row, StoreError> {
        self.nodes
            .get(&nid)
            .map(Arc::as_ref)
            .ok_or_else(|| QueryError::NodeNotFound(nid).into())
    }

    pub(crate) fn get_shared(&self, nid: Nid) -> Result<Arc<Row>, StoreError> {
        self.nodes
            .get(&nid)
            .cloned()
            .ok_or_else(|| QueryError::NodeNotFound(nid).into())
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn root_type(&self) -> NodeTypeId {
        self.nodes
            .get(&Nid::ROOT)
            .expect("subgraph root missing")
            .ty()
    }

    pub(crate) fn query(&self, query: &IndexQuery) -> NidIter {
        NidIter::new(index::nids(&self.index, &query.key))
    }

    pub(crate) fn one(&self, query: &IndexQuery) -> Result<Nid, StoreError> {
        let nids = index::nids(&self.index, &query.key);
        match nids.len() {
            0 => Err(QueryError::NoMatch.into()),
            1 => Ok(nids[0]),
            n => Err(QueryError::Ambiguous(n).into()),
        }
    }

    /// The path node holding `seg` under `parent` (the root node or a parent
    /// path node), if any.
    pub(crate) fn find_child(&self, parent: Nid, seg: &PathSeg) -> Option<Nid> {
        let key = IndexKey::Attr {
            index: Schema::PATH_BY_NAME,
            key: Box::new([Some(AttrValue::LocalRef(parent)), Some(seg.to_value())]),
        };
        let nids = index::nids(&self.index, &key);
        debug_assert!(nids.len() <= 1, "unique path index with duplicate entries");
        nids.front().copied()
    }

    /// Walks `path` down the name tree, returning the final path node.
    fn path_node_at(&self, path: &NodePath) -> Result<Nid, StoreError> {
        let mut here = Nid::ROOT;
        for seg in path.segments() {
            here = self
                .find_child(here, seg)
                .ok_or_else(|| QueryError::PathNotFound(path.clone()))?;
        }
        Ok(here)
    }

    pub(crate) fn resolve(&self, path: &NodePath) -> Result<Nid, StoreError> {
        if path.is_root() {
            return Ok(Nid::ROOT);
        }
        let path_node = self.path_node_at(path)?;
        self.get(path_node)?
            .get(Schema::PATH_REF)
            .and_then(AttrValue::as_local_ref)
            .ok_or_else(|| QueryError::PathNotFound(path.clone()).into())
    }

    pub(crate) fn children_of(&self, path: &NodePath) -> Result<Children<'_>, StoreError> {
        let anchor = self.path_node_at(path)?;
        let key = IndexKey::Attr {
            index: Schema::PATH_CHILDREN,
            key: Box::new([Some(AttrValue::LocalRef(anchor))]),
        };
        Ok(Children {
            state: self,
            nids: NidIter::new(index::nids(&self.index, &key)),
        })
    }

    pub(crate) fn path_of(&self, nid: Nid) -> Result<NodePath, StoreError> {
        if nid.is_root() {
            return Ok(NodePath::root());
        }
        let key = IndexKey::Attr {
            index: Schema::PATH_OF,
            key: Box::new([Some(AttrValue::LocalRef(nid))]),
        };
        let entry = index::nids(&self.index, &key);
        let mut here = *entry.front().ok_or(QueryError::NoPath(nid))?;
        let mut path = NodePath::root();
        loop {
            let row = self.get(here)?;
            let seg = row
                .get(Schema::PATH_NAME)
                .and_then(PathSeg::from_value)
                .expect("path node without name");
            path.push(seg);
            let parent = row
                .get(Schema::PATH_PARENT)
                .and_then(AttrValue::as_local_ref)
                .expect("path node without parent");
            if parent.is_root() {
                return Ok(path.reversed());
            }
            here = parent;
        }
    }

    pub(crate) fn matches(&self, other: &SubgraphState) -> bool {
        if !Arc::ptr_eq(&self.schema, &other.schema) {
            return false;
        }
        if self.nodes.len() != other.nodes.len() {
            return false;
        }
        // Pair nodes up in canonical (nid) order; insertion order must agree
        // for equivalence, the concrete nid numbers need not.
        let mut translation = BTreeMap::new();
        for ((nid_a, row_a), (nid_b, row_b)) in self.nodes.iter().zip(other.nodes.iter()) {
            if row_a.ty() != row_b.ty() {
                return false;
            }
            translation.insert(*nid_a, *nid_b);
        }
        self.nodes
            .iter()
            .zip(other.nodes.iter())
            .all(|((_, row_a), (_, row_b))| row_a.translate_nids(&translation) == **row_b)
    }

    pub(crate) fn dump(&self) -> String {
        let mut out = String::new();
        let root_name = self
            .schema
            .type_def(self.root_type())
            .map_or("?", |def| def.name().as_str());
        let _ = writeln!(out, "subgraph {root_name} ({} nodes)", self.len());
        for ty in self.schema.types() {
            let nids = self.query(&IndexQuery::of_type(ty.id()));
            if nids.len() == 0 {
                continue;
            }
            let _ = writeln!(out, "  {}", ty.def().name());
            for nid in nids {
                let row = self.get(nid).expect("type index out of sync");
                let attrs = ty
                    .def()
                    .attrs()
                    .zip(row.values())
                    .filter_map(|(attr, value)| value.map(|v| format!("{}={v}", attr.name())))
                    .join(", ");
                let _ = writeln!(out, "    {nid} {attrs}");
            }
        }
        out
    }

    pub(crate) fn content_hash(&self) -> u64 {
        let mut hasher = FxHasher64::default();
        self.nodes.hash(&mut hasher);
        self.next_nid.hash(&mut hasher);
        hasher.finish()
    }
}

/// Restartable iterator over the nids matched by a query.
///
/// Holds its own (structurally shared) copy of the index entry, so it stays
/// valid and repeatable regardless of later edits.
#[derive(Clone, Debug)]
pub struct NidIter {
    nids: Vector<Nid>,
    pos: usize,
}

impl NidIter {
    pub(crate) fn new(nids: Vector<Nid>) -> Self {
        NidIter { nids, pos: 0 }
    }
}

impl Iterator for NidIter {
    type Item = Nid;

    fn next(&mut self) -> Option<Nid> {
        let nid = self.nids.get(self.pos).copied()?;
        self.pos += 1;
        Some(nid)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let rest = self.nids.len() - self.pos;
        (rest, Some(rest))
    }
}

impl ExactSizeIterator for NidIter {}

/// Iterator over the direct children of a path, as (segment, bound node)
/// pairs. Unbound (empty) path entries yield `None` for the node.
#[derive(Clone, Debug)]
pub struct Children<'g> {
    state: &'g SubgraphState,
    nids: NidIter,
}

impl Iterator for Children<'_> {
    type Item = (PathSeg, Option<Nid>);

    fn next(&mut self) -> Option<Self::Item> {
        let path_node = self.nids.next()?;
        let row = self.state.get(path_node).expect("path index out of sync");
        let seg = row
            .get(Schema::PATH_NAME)
            .and_then(PathSeg::from_value)
            .expect("path node without name");
        let target = row.get(Schema::PATH_REF).and_then(AttrValue::as_local_ref);
        Some((seg, target))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.nids.size_hint()
    }
}

/// Read-only operations shared by both subgraph facades.
pub trait SubgraphView {
    /// The underlying persistent state.
    #[doc(hidden)]
    fn state(&self) -> &SubgraphState;

    /// The schema this subgraph instantiates.
    fn schema(&self) -> &Arc<Schema> {
        &self.state().schema
    }

    /// Number of nodes, including the root and any path nodes.
    fn len(&self) -> usize {
        self.state().len()
    }

    /// Whether the subgraph holds no nodes at all.
    ///
    /// Only a facade observed before its root insertion committed can be
    /// empty; any committed subgraph has at least its root.
    fn is_empty(&self) -> bool {
        self.state().nodes.is_empty()
    }

    /// The row of the node `nid`.
    fn get(&self, nid: Nid) -> Result<&Row, StoreError> {
        self.state().get(nid)
    }

    /// The shared storage of the node `nid`'s row.
    ///
    /// Two subgraph versions that share an untouched node return the same
    /// allocation here (`Arc::ptr_eq`).
    fn get_shared(&self, nid: Nid) -> Result<Arc<Row>, StoreError> {
        self.state().get_shared(nid)
    }

    /// The node type tagging this subgraph (the type of the root node).
    fn root_type(&self) -> NodeTypeId {
        self.state().root_type()
    }

    /// The root row (n0).
    fn root(&self) -> &Row {
        self.state().get(Nid::ROOT).expect("subgraph root missing")
    }

    /// All nodes of one type, in nid (insertion) order.
    ///
    /// The traversal is lazy and restartable: every call starts a fresh pass
    /// over a private copy of the index entry.
    fn all(&self, ty: NodeTypeId) -> NidIter {
        self.query(&IndexQuery::of_type(ty))
    }

    /// All nodes matching an index query, in nid order.
    fn query(&self, query: &IndexQuery) -> NidIter {
        self.state().query(query)
    }

    /// The single node matching `query`.
    ///
    /// Fails with a [`QueryError`] if the match count is not exactly one.
    fn one(&self, query: &IndexQuery) -> Result<Nid, StoreError> {
        self.state().one(query)
    }

    /// Resolves a hierarchical path to the node it names.
    fn resolve(&self, path: &NodePath) -> Result<Nid, StoreError> {
        self.state().resolve(path)
    }

    /// Enumerates the direct children of a path (the root scope for the
    /// empty path).
    fn children_of(&self, path: &NodePath) -> Result<Children<'_>, StoreError> {
        self.state().children_of(path)
    }

    /// The canonical path of a node, if it was bound to one.
    fn path_of(&self, nid: Nid) -> Result<NodePath, StoreError> {
        self.state().path_of(nid)
    }

    /// All nodes with their rows, in nid order.
    fn rows(&self) -> impl Iterator<Item = (Nid, &Row)> {
        self.state()
            .nodes
            .iter()
            .map(|(nid, row)| (*nid, row.as_ref()))
    }

    /// Structural equivalence up to nid renumbering: node count, per-node
    /// types and attribute values (with local references translated) must
    /// agree in insertion order.
    fn matches(&self, other: &impl SubgraphView) -> bool {
        self.state().matches(other.state())
    }

    /// Human-readable table dump for diagnostics.
    fn dump(&self) -> String {
        self.state().dump()
    }
}

/// An editable subgraph.
///
/// Edits go through the mutation engine: each mutating call is an atomic
/// transaction that either commits a new internal version or leaves the
/// previous version untouched. Compound transactions are available through
/// [`MutableSubgraph::with_updater`].
///
/// The facade must be confined to a single owner; it is intentionally not
/// shareable across threads while being edited. Cloning yields an
/// independent subgraph that shares all storage with the original until
/// either is edited further.
#[derive(Clone, Debug)]
pub struct MutableSubgraph {
    state: SubgraphState,
}

impl MutableSubgraph {
    /// Creates a subgraph holding only its root node (nid 0).
    ///
    /// The root row's type must be declared as a root type.
    pub fn new(schema: Arc<Schema>, root: Row) -> Result<Self, StoreError> {
        let mut subgraph = MutableSubgraph {
            state: SubgraphState {
                schema,
                nodes: OrdMap::new(),
                index: IndexState::new(),
                next_nid: 0,
            },
        };
        subgraph.with_updater(|u| u.add_at(Nid::ROOT, root).map(|_| ()))?;
        Ok(subgraph)
    }

    /// Rebuilds a subgraph from an explicit nid → row listing, e.g. the
    /// output of [`SubgraphView::rows`] on another subgraph.
    pub fn load(
        schema: Arc<Schema>,
        rows: impl IntoIterator<Item = (Nid, Row)>,
    ) -> Result<Self, StoreError> {
        let mut subgraph = MutableSubgraph {
            state: SubgraphState {
                schema,
                nodes: OrdMap::new(),
                index: IndexState::new(),
                next_nid: 0,
            },
        };
        subgraph.with_updater(|u| {
            for (nid, row) in rows {
                u.add_at(nid, row)?;
            }
            Ok(())
        })?;
        Ok(subgraph)
    }

    /// Inserts a node, returning its freshly assigned nid.
    pub fn add(&mut self, row: Row) -> Result<Nid, StoreError> {
        self.with_updater(|u| u.add(row))
    }

    /// Replaces the row of an existing node. Only indices over attributes
    /// that actually changed are recomputed.
    pub fn update(&mut self, nid: Nid, row: Row) -> Result<(), StoreError> {
        self.with_updater(|u| u.update(nid, row))
    }

    /// Sets or clears a single attribute of an existing node.
    ///
    /// # Panics
    ///
    /// If the slot does not belong to the node's type.
    pub fn set(
        &mut self,
        nid: Nid,
        attr: AttrId,
        value: Option<AttrValue>,
    ) -> Result<(), StoreError> {
        self.with_updater(|u| u.set(nid, attr, value))
    }

    /// Removes a node. Fails with [`DanglingLocalRef`](crate::index::DanglingLocalRef)
    /// while any local reference (including a path binding) still points at
    /// it; removal never cascades.
    pub fn remove(&mut self, nid: Nid) -> Result<(), StoreError> {
        self.with_updater(|u| u.remove(nid))
    }

    /// Removes a node together with its path entry, if it has one.
    pub fn remove_named(&mut self, nid: Nid) -> Result<(), StoreError> {
        self.with_updater(|u| u.remove_named(nid))
    }

    /// Binds a path to a node. Intermediate path entries are created as
    /// needed; binding an already-bound path or a second path for the same
    /// node is a [`ModelViolation`](crate::schema::ModelViolation).
    pub fn bind(&mut self, path: &NodePath, nid: Nid) -> Result<(), StoreError> {
        self.with_updater(|u| u.bind(path, nid))
    }

    /// Creates an empty (unbound) path, returning its path node.
    pub fn mkpath(&mut self, path: &NodePath) -> Result<Nid, StoreError> {
        self.with_updater(|u| u.mkpath(path))
    }

    /// Runs a compound transaction: all edits staged by `f` commit together
    /// or not at all.
    pub fn with_updater<T>(
        &mut self,
        f: impl FnOnce(&mut Updater) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut updater = Updater::begin(&self.state);
        let out = f(&mut updater)?;
        self.state = updater.commit()?;
        Ok(out)
    }

    /// Freezes the subgraph into an immutable, shareable snapshot.
    ///
    /// O(1): no node data is copied, and the mutable facade is consumed.
    /// Keep editing by [`FrozenSubgraph::thaw`]ing the result.
    #[must_use]
    pub fn freeze(self) -> FrozenSubgraph {
        let hash = self.state.content_hash();
        debug!(nodes = self.state.len(), "freezing subgraph");
        FrozenSubgraph {
            inner: Arc::new(FrozenInner {
                state: self.state,
                hash,
            }),
        }
    }

    delegate! {
        to self.state {
            /// Number of nodes, including the root and any path nodes.
            pub fn len(&self) -> usize;
        }
    }

    /// Whether the subgraph holds no nodes; see [`SubgraphView::is_empty`].
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.nodes.is_empty()
    }
}

impl SubgraphView for MutableSubgraph {
    fn state(&self) -> &SubgraphState {
        &self.state
    }
}

#[derive(Debug)]
struct FrozenInner {
    state: SubgraphState,
    hash: u64,
}

/// An immutable, shareable subgraph snapshot.
///
/// Clones are O(1) and all clones share storage. Because the visible content
/// can never change, a frozen subgraph is safe to read from any number of
/// threads, to cache, and to use as a hash key; equality is by content
/// (nodes and nid allocation, which match iff the indices match).
#[derive(Clone, Debug)]
pub struct FrozenSubgraph {
    inner: Arc<FrozenInner>,
}

impl FrozenSubgraph {
    /// Thaws into a fresh mutable facade sharing all storage with this
    /// snapshot. O(1); later edits never affect the frozen original.
    #[must_use]
    pub fn thaw(&self) -> MutableSubgraph {
        debug!(nodes = self.inner.state.len(), "thawing subgraph");
        MutableSubgraph {
            state: self.inner.state.clone(),
        }
    }

    /// Whether two handles point at the very same snapshot allocation.
    #[must_use]
    pub fn ptr_eq(&self, other: &FrozenSubgraph) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    delegate! {
        to self.inner.state {
            /// Number of nodes, including the root and any path nodes.
            pub fn len(&self) -> usize;
        }
    }

    /// Whether the subgraph holds no nodes; see [`SubgraphView::is_empty`].
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.state.nodes.is_empty()
    }
}

impl SubgraphView for FrozenSubgraph {
    fn state(&self) -> &SubgraphState {
        &self.inner.state
    }
}

impl PartialEq for FrozenSubgraph {
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        self.inner.hash == other.inner.hash
            && Arc::ptr_eq(&self.inner.state.schema, &other.inner.state.schema)
            && self.inner.state.next_nid == other.inner.state.next_nid
            && self.inner.state.nodes == other.inner.state.nodes
    }
}

impl Eq for FrozenSubgraph {}

impl Hash for FrozenSubgraph {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.inner.hash);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::value::ValueType;

    fn schema() -> Arc<Schema> {
        let mut b = Schema::builder();
        let mut head = b.root_type("Head");
        head.attr("label", ValueType::Str);
        head.finish();
        let mut item = b.node_type("Item");
        item.attr("label", ValueType::Str);
        item.finish();
        b.finish()
    }

    fn head(schema: &Arc<Schema>) -> MutableSubgraph {
        let root = schema.find("Head").unwrap().row().finish();
        MutableSubgraph::new(schema.clone(), root).unwrap()
    }

    #[test]
    fn new_subgraph_has_root() {
        let schema = schema();
        let sg = head(&schema);
        assert_eq!(sg.len(), 1);
        assert_eq!(sg.root_type(), schema.find("Head").unwrap().id());
        assert_eq!(sg.root().ty(), sg.root_type());
    }

    #[test]
    fn add_then_get_roundtrip() {
        let schema = schema();
        let mut sg = head(&schema);
        let item = schema.find("Item").unwrap();
        let row = item.row().set("label", "hello").unwrap().finish();
        let nid = sg.add(row.clone()).unwrap();
        assert_eq!(nid, Nid::new(1));
        assert_eq!(sg.get(nid).unwrap(), &row);
    }

    #[test]
    fn get_missing_is_query_error() {
        let schema = schema();
        let sg = head(&schema);
        assert!(matches!(
            sg.get(Nid::new(9)),
            Err(StoreError::Query(QueryError::NodeNotFound(_)))
        ));
    }

    #[test]
    fn freeze_is_content_hashed() {
        let schema = schema();
        let item = schema.find("Item").unwrap();
        let make = || {
            let mut sg = head(&schema);
            sg.add(item.row().set("label", "x").unwrap().finish()).unwrap();
            sg.freeze()
        };
        let a = make();
        let b = make();
        assert!(!a.ptr_eq(&b));
        assert_eq!(a, b);
        use std::collections::hash_map::DefaultHasher;
        let digest = |sg: &FrozenSubgraph| {
            let mut h = DefaultHasher::new();
            sg.hash(&mut h);
            h.finish()
        };
        assert_eq!(digest(&a), digest(&b));
    }

    #[test]
    fn clone_is_independent() {
        let schema = schema();
        let item = schema.find("Item").unwrap();
        let mut sg = head(&schema);
        let mut copy = sg.clone();
        copy.add(item.row().finish()).unwrap();
        assert_eq!(sg.len(), 1);
        assert_eq!(copy.len(), 2);
        sg.add(item.row().finish()).unwrap();
        assert_eq!(copy.len(), 2);
    }

    #[test]
    fn matches_ignores_nid_numbering() {
        let schema = schema();
        let item = schema.find("Item").unwrap();
        let mut a = head(&schema);
        a.add(item.row().set("label", "x").unwrap().finish()).unwrap();

        let root = schema.find("Head").unwrap().row().finish();
        let b = MutableSubgraph::load(
            schema.clone(),
            [
                (Nid::ROOT, root),
                (Nid::new(7), item.row().set("label", "x").unwrap().finish()),
            ],
        )
        .unwrap();
        assert!(a.matches(&b));
        assert!(b.matches(&a));

        let mut c = head(&schema);
        c.add(item.row().set("label", "y").unwrap().finish()).unwrap();
        assert!(!a.matches(&c));
    }
}
