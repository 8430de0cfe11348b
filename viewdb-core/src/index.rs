//! The relational index layer.
//!
//! Indices are derived data kept incrementally current by the mutation
//! engine: maintenance touches only the entries of the nodes (and, on
//! updates, only the attributes) that actually changed, never the whole
//! subgraph. Three kinds of keys live side by side in one persistent map:
//!
//! - a built-in per-type table ([`IndexKey::Type`]), backing `all(type)`,
//! - the declared attribute indices ([`IndexKey::Attr`]), generic, unique or
//!   combined,
//! - an automatic reverse map of local references ([`IndexKey::Backref`]),
//!   used purely for referential-integrity checking.

use std::collections::BTreeMap;

use imbl::{HashMap, OrdSet, Vector};
use thiserror::Error;

use crate::core::{AttrId, IndexId, Nid, NodeTypeId};
use crate::row::Row;
use crate::schema::{IndexDef, Schema};
use crate::value::AttrValue;

/// The persistent index map shared by all subgraph versions.
pub(crate) type IndexState = HashMap<IndexKey, IndexEntry>;

/// A write would duplicate a key under a unique index.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("duplicate key under unique index {index}")]
pub struct UniqueViolation {
    /// The violated index.
    pub index: IndexId,
    /// The duplicated key tuple.
    pub key: Box<[Option<AttrValue>]>,
}

/// A local reference points at a node that does not exist, or an operation
/// would leave one behind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("dangling local reference to node {0} (node missing or about to be removed)")]
pub struct DanglingLocalRef(
    /// The referenced node.
    pub Nid,
);

/// Key of one entry in the index map.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub(crate) enum IndexKey {
    /// Per-type node table.
    Type(NodeTypeId),
    /// Declared attribute index, keyed by the indexed value tuple.
    Attr {
        index: IndexId,
        key: Box<[Option<AttrValue>]>,
    },
    /// Reverse map: which slots reference this node.
    Backref(Nid),
}

/// One source of a local reference: the referencing node and slot.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub(crate) struct Backref {
    pub src: Nid,
    pub attr: AttrId,
}

/// Value of one entry in the index map.
#[derive(Clone, PartialEq, Eq, Debug)]
pub(crate) enum IndexEntry {
    /// Matching nodes, kept sorted by nid.
    Nids(Vector<Nid>),
    /// Referencing slots.
    Refs(OrdSet<Backref>),
}

/// A value-equality query against a declared index (or the built-in type
/// table), runnable on any subgraph built from the same schema.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct IndexQuery {
    pub(crate) key: IndexKey,
}

impl IndexQuery {
    /// Query for all nodes of one type, equivalent to
    /// [`SubgraphView::all`](crate::subgraph::SubgraphView::all).
    #[must_use]
    pub fn of_type(ty: NodeTypeId) -> Self {
        IndexQuery {
            key: IndexKey::Type(ty),
        }
    }
}

impl IndexDef {
    /// Equality query on a single-attribute index.
    ///
    /// # Panics
    ///
    /// If the index is a combined index; use [`IndexDef::eq_tuple`] there.
    #[must_use]
    pub fn eq(&self, value: impl Into<AttrValue>) -> IndexQuery {
        assert!(
            self.attrs().len() == 1,
            "eq() on combined index {}; use eq_tuple()",
            self.id()
        );
        IndexQuery {
            key: IndexKey::Attr {
                index: self.id(),
                key: Box::new([Some(value.into())]),
            },
        }
    }

    /// Equality query on a combined index; the tuple may contain unset slots.
    ///
    /// # Panics
    ///
    /// If the tuple length does not match the index declaration.
    #[must_use]
    pub fn eq_tuple(&self, values: impl IntoIterator<Item = Option<AttrValue>>) -> IndexQuery {
        let key: Box<[Option<AttrValue>]> = values.into_iter().collect();
        assert!(
            key.len() == self.attrs().len(),
            "key arity mismatch on index {}",
            self.id()
        );
        IndexQuery {
            key: IndexKey::Attr {
                index: self.id(),
                key,
            },
        }
    }
}

/// The key tuple `row` contributes to `def`, or `None` if the row is not
/// covered (single-attribute indices skip unset values).
pub(crate) fn attr_key(def: &IndexDef, row: &Row) -> Option<IndexKey> {
    let key: Box<[Option<AttrValue>]> = if def.skips_unset() {
        Box::new([Some(row.get(def.attrs()[0])?.clone())])
    } else {
        def.attrs().iter().map(|&attr| row.get(attr).cloned()).collect()
    };
    Some(IndexKey::Attr {
        index: def.id(),
        key,
    })
}

/// Bisect position of `nid` in a sorted entry.
fn sorted_pos(nids: &Vector<Nid>, nid: Nid) -> usize {
    let (mut lo, mut hi) = (0, nids.len());
    while lo < hi {
        let mid = (lo + hi) / 2;
        if nids[mid] < nid {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

fn push_nid(index: &mut IndexState, key: IndexKey, nid: Nid) {
    match index.get_mut(&key) {
        Some(IndexEntry::Nids(nids)) => {
            let pos = sorted_pos(nids, nid);
            nids.insert(pos, nid);
        }
        Some(IndexEntry::Refs(_)) => unreachable!("nid entry under backref key"),
        None => {
            index.insert(key, IndexEntry::Nids(Vector::unit(nid)));
        }
    }
}

fn pop_nid(index: &mut IndexState, key: &IndexKey, nid: Nid) {
    let emptied = match index.get_mut(key) {
        Some(IndexEntry::Nids(nids)) => {
            let pos = sorted_pos(nids, nid);
            if nids.get(pos) == Some(&nid) {
                nids.remove(pos);
            }
            nids.is_empty()
        }
        Some(IndexEntry::Refs(_)) => unreachable!("nid entry under backref key"),
        None => false,
    };
    if emptied {
        index.remove(key);
    }
}

fn push_backref(index: &mut IndexState, target: Nid, backref: Backref) {
    match index.get_mut(&IndexKey::Backref(target)) {
        Some(IndexEntry::Refs(refs)) => {
            refs.insert(backref);
        }
        Some(IndexEntry::Nids(_)) => unreachable!("backref entry under nid key"),
        None => {
            index.insert(IndexKey::Backref(target), IndexEntry::Refs(OrdSet::unit(backref)));
        }
    }
}

fn pop_backref(index: &mut IndexState, target: Nid, backref: Backref) {
    let key = IndexKey::Backref(target);
    let emptied = match index.get_mut(&key) {
        Some(IndexEntry::Refs(refs)) => {
            refs.remove(&backref);
            refs.is_empty()
        }
        Some(IndexEntry::Nids(_)) => unreachable!("backref entry under nid key"),
        None => false,
    };
    if emptied {
        index.remove(&key);
    }
}

/// Inserts all entries contributed by `row` at `nid`.
pub(crate) fn add_entries(index: &mut IndexState, schema: &Schema, nid: Nid, row: &Row) {
    push_nid(index, IndexKey::Type(row.ty()), nid);
    if let Some(def) = schema.type_def(row.ty()) {
        for &id in def.indices() {
            if let Some(key) = attr_key(schema.index(id), row) {
                push_nid(index, key, nid);
            }
        }
    }
    for (attr, target) in row.local_refs() {
        push_backref(index, target, Backref { src: nid, attr });
    }
}

/// Removes all entries contributed by `row` at `nid`.
pub(crate) fn remove_entries(index: &mut IndexState, schema: &Schema, nid: Nid, row: &Row) {
    pop_nid(index, &IndexKey::Type(row.ty()), nid);
    if let Some(def) = schema.type_def(row.ty()) {
        for &id in def.indices() {
            if let Some(key) = attr_key(schema.index(id), row) {
                pop_nid(index, &key, nid);
            }
        }
    }
    for (attr, target) in row.local_refs() {
        pop_backref(index, target, Backref { src: nid, attr });
    }
}

/// Replaces the entries of `nid` after an update, touching only indices whose
/// key actually changed.
pub(crate) fn update_entries(
    index: &mut IndexState,
    schema: &Schema,
    nid: Nid,
    old: &Row,
    new: &Row,
) {
    if old.ty() != new.ty() {
        // Type change: nothing can be assumed shared.
        remove_entries(index, schema, nid, old);
        add_entries(index, schema, nid, new);
        return;
    }
    if let Some(def) = schema.type_def(new.ty()) {
        for &id in def.indices() {
            let idx = schema.index(id);
            let old_key = attr_key(idx, old);
            let new_key = attr_key(idx, new);
            if old_key == new_key {
                continue;
            }
            if let Some(key) = old_key {
                pop_nid(index, &key, nid);
            }
            if let Some(key) = new_key {
                push_nid(index, key, nid);
            }
        }
    }
    let old_refs: BTreeMap<AttrId, Nid> = old.local_refs().collect();
    let new_refs: BTreeMap<AttrId, Nid> = new.local_refs().collect();
    for (&attr, &target) in &old_refs {
        if new_refs.get(&attr) != Some(&target) {
            pop_backref(index, target, Backref { src: nid, attr });
        }
    }
    for (&attr, &target) in &new_refs {
        if old_refs.get(&attr) != Some(&target) {
            push_backref(index, target, Backref { src: nid, attr });
        }
    }
}

/// The nodes currently filed under `key` (empty if the key is absent).
pub(crate) fn nids(index: &IndexState, key: &IndexKey) -> Vector<Nid> {
    match index.get(key) {
        Some(IndexEntry::Nids(nids)) => nids.clone(),
        _ => Vector::new(),
    }
}

/// Whether any local reference still points at `nid`.
pub(crate) fn has_backrefs(index: &IndexState, nid: Nid) -> bool {
    matches!(
        index.get(&IndexKey::Backref(nid)),
        Some(IndexEntry::Refs(refs)) if !refs.is_empty()
    )
}

/// Checks the one-to-one constraint of every unique index `row` contributes
/// to, given the already-updated index state.
pub(crate) fn check_unique(
    index: &IndexState,
    schema: &Schema,
    row: &Row,
) -> Result<(), UniqueViolation> {
    let Some(def) = schema.type_def(row.ty()) else {
        return Ok(());
    };
    for &id in def.indices() {
        let idx = schema.index(id);
        if !idx.is_unique() {
            continue;
        }
        let Some(key) = attr_key(idx, row) else {
            continue;
        };
        if nids(index, &key).len() > 1 {
            let IndexKey::Attr { key, .. } = key else {
                unreachable!("attr_key returned a non-attr key")
            };
            return Err(UniqueViolation { index: id, key });
        }
    }
    Ok(())
}
