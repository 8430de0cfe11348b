//! The mutation engine.
//!
//! An [`Updater`] stages edits against a copy-on-write view of a subgraph's
//! current version. Index entries are maintained incrementally as edits are
//! staged; the relational constraints (required attributes, unique indices,
//! local-reference integrity, root/type placement) are checked when the
//! transaction commits. Only on a fully successful commit does the facade
//! adopt the new version — any error discards the staged state, leaving the
//! subgraph exactly as it was.
//!
//! This is the only component that touches the container and index
//! internals; everything else reads them through the facades.

use std::collections::BTreeSet;
use std::sync::Arc;

use imbl::OrdMap;
use tracing::debug;

use crate::core::{AttrId, Nid, StoreError};
use crate::index::{self, DanglingLocalRef, IndexKey, IndexState};
use crate::path::{self, NodePath, PathSeg};
use crate::row::{self, Row};
use crate::schema::{ModelViolation, Schema};
use crate::subgraph::{QueryError, SubgraphState};
use crate::value::{AttrValue, ValueType};

/// A staged transaction against one [`MutableSubgraph`](crate::subgraph::MutableSubgraph).
///
/// Obtained from [`MutableSubgraph::with_updater`](crate::subgraph::MutableSubgraph::with_updater);
/// all edits staged through one updater commit atomically.
#[derive(Debug)]
pub struct Updater {
    schema: Arc<Schema>,
    nodes: OrdMap<Nid, Arc<Row>>,
    index: IndexState,
    next_nid: u32,
    /// Nodes inserted or updated in this transaction, pending commit checks.
    touched: BTreeSet<Nid>,
    /// Nodes removed in this transaction, pending dangling-reference checks.
    removed: BTreeSet<Nid>,
}

impl Updater {
    pub(crate) fn begin(state: &SubgraphState) -> Self {
        Updater {
            schema: state.schema.clone(),
            nodes: state.nodes.clone(),
            index: state.index.clone(),
            next_nid: state.next_nid,
            touched: BTreeSet::new(),
            removed: BTreeSet::new(),
        }
    }

    /// The schema of the subgraph under edit.
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Reads a row as staged so far in this transaction.
    pub fn get(&self, nid: Nid) -> Result<&Row, StoreError> {
        self.nodes
            .get(&nid)
            .map(Arc::as_ref)
            .ok_or_else(|| QueryError::NodeNotFound(nid).into())
    }

    fn alloc(&mut self) -> Result<Nid, StoreError> {
        let nid = Nid::new(self.next_nid);
        self.next_nid = self
            .next_nid
            .checked_add(1)
            .ok_or(ModelViolation::NidsExhausted)?;
        Ok(nid)
    }

    fn insert_at(&mut self, nid: Nid, row: Row) -> Result<(), StoreError> {
        row::validate_row(&self.schema, &row)?;
        index::add_entries(&mut self.index, &self.schema, nid, &row);
        self.nodes.insert(nid, Arc::new(row));
        self.touched.insert(nid);
        // A nid removed and re-added in the same transaction is not dangling.
        self.removed.remove(&nid);
        Ok(())
    }

    /// Stages a node insertion under the next free nid.
    pub fn add(&mut self, row: Row) -> Result<Nid, StoreError> {
        let nid = self.alloc()?;
        self.insert_at(nid, row)?;
        Ok(nid)
    }

    /// Stages a node insertion under an explicit nid (used when rebuilding a
    /// subgraph from a node listing).
    pub fn add_at(&mut self, nid: Nid, row: Row) -> Result<Nid, StoreError> {
        if self.nodes.contains_key(&nid) {
            return Err(ModelViolation::DuplicateNid(nid).into());
        }
        let follower = nid
            .index()
            .checked_add(1)
            .ok_or(ModelViolation::NidsExhausted)?;
        self.next_nid = self.next_nid.max(follower);
        self.insert_at(nid, row)?;
        Ok(nid)
    }

    /// Stages a row replacement. Only indices over changed attributes are
    /// recomputed.
    pub fn update(&mut self, nid: Nid, row: Row) -> Result<(), StoreError> {
        row::validate_row(&self.schema, &row)?;
        let Some(old) = self.nodes.get(&nid).cloned() else {
            return Err(QueryError::NodeNotFound(nid).into());
        };
        index::update_entries(&mut self.index, &self.schema, nid, &old, &row);
        self.nodes.insert(nid, Arc::new(row));
        self.touched.insert(nid);
        Ok(())
    }

    /// Stages a single-attribute change.
    ///
    /// # Panics
    ///
    /// If the slot does not belong to the node's type.
    pub fn set(&mut self, nid: Nid, attr: AttrId, value: Option<AttrValue>) -> Result<(), StoreError> {
        let next = self.get(nid)?.with(attr, value);
        self.update(nid, next)
    }

    /// Stages a node removal. The root node (n0) cannot be removed; removal
    /// of a still-referenced node surfaces as [`DanglingLocalRef`] at commit.
    pub fn remove(&mut self, nid: Nid) -> Result<(), StoreError> {
        if nid.is_root() {
            return Err(ModelViolation::RemoveRoot.into());
        }
        let Some(old) = self.nodes.get(&nid).cloned() else {
            return Err(QueryError::NodeNotFound(nid).into());
        };
        index::remove_entries(&mut self.index, &self.schema, nid, &old);
        self.nodes.remove(&nid);
        self.touched.remove(&nid);
        self.removed.insert(nid);
        Ok(())
    }

    /// Stages removal of a node together with its path entry, if any.
    pub fn remove_named(&mut self, nid: Nid) -> Result<(), StoreError> {
        if let Some(path_node) = self.path_node_of(nid) {
            self.remove(path_node)?;
        }
        self.remove(nid)
    }

    /// The path node naming `nid`, as staged so far.
    #[must_use]
    pub fn path_node_of(&self, nid: Nid) -> Option<Nid> {
        let key = IndexKey::Attr {
            index: Schema::PATH_OF,
            key: Box::new([Some(AttrValue::LocalRef(nid))]),
        };
        index::nids(&self.index, &key).front().copied()
    }

    fn find_child(&self, parent: Nid, seg: &PathSeg) -> Option<Nid> {
        let key = IndexKey::Attr {
            index: Schema::PATH_BY_NAME,
            key: Box::new([Some(AttrValue::LocalRef(parent)), Some(seg.to_value())]),
        };
        index::nids(&self.index, &key).front().copied()
    }

    fn ensure_unnamed(&self, nid: Nid) -> Result<(), StoreError> {
        if self.path_node_of(nid).is_some() {
            return Err(ModelViolation::AlreadyNamed { nid }.into());
        }
        Ok(())
    }

    /// Stages a path binding; see
    /// [`MutableSubgraph::bind`](crate::subgraph::MutableSubgraph::bind).
    pub fn bind(&mut self, target_path: &NodePath, nid: Nid) -> Result<(), StoreError> {
        let Some((last, prefix)) = target_path.segments().split_last() else {
            return Err(ModelViolation::EmptyPath.into());
        };
        let mut parent = Nid::ROOT;
        for seg in prefix {
            parent = match self.find_child(parent, seg) {
                Some(existing) => existing,
                None => self.add(path::path_row(&self.schema, parent, seg, None))?,
            };
        }
        match self.find_child(parent, last) {
            Some(existing) => {
                let entry = self.get(existing)?.clone();
                match entry.get(Schema::PATH_REF).and_then(AttrValue::as_local_ref) {
                    Some(bound) if bound == nid => Ok(()),
                    Some(_) => Err(ModelViolation::PathBound {
                        path: target_path.clone(),
                    }
                    .into()),
                    None => {
                        // An empty path entry adopts the binding.
                        self.ensure_unnamed(nid)?;
                        self.update(
                            existing,
                            entry.with(Schema::PATH_REF, Some(AttrValue::LocalRef(nid))),
                        )
                    }
                }
            }
            None => {
                self.ensure_unnamed(nid)?;
                self.add(path::path_row(&self.schema, parent, last, Some(nid)))
                    .map(|_| ())
            }
        }
    }

    /// Stages creation of an empty path, returning its path node. Existing
    /// segments are reused.
    pub fn mkpath(&mut self, target_path: &NodePath) -> Result<Nid, StoreError> {
        if target_path.is_root() {
            return Err(ModelViolation::EmptyPath.into());
        }
        let mut parent = Nid::ROOT;
        for seg in target_path.segments() {
            parent = match self.find_child(parent, seg) {
                Some(existing) => existing,
                None => self.add(path::path_row(&self.schema, parent, seg, None))?,
            };
        }
        Ok(parent)
    }

    /// Validates the staged state and produces the next subgraph version.
    pub(crate) fn commit(self) -> Result<SubgraphState, StoreError> {
        let Updater {
            schema,
            nodes,
            index,
            next_nid,
            touched,
            removed,
        } = self;

        let Some(root_row) = nodes.get(&Nid::ROOT) else {
            return Err(ModelViolation::MissingRoot.into());
        };
        let root_ty = root_row.ty();
        let root_def = schema.type_def(root_ty).ok_or(ModelViolation::ForeignRow)?;
        if !root_def.is_root() {
            return Err(ModelViolation::MissingRoot.into());
        }

        for &nid in &touched {
            let Some(node_row) = nodes.get(&nid) else {
                continue;
            };
            let def = schema
                .type_def(node_row.ty())
                .ok_or(ModelViolation::ForeignRow)?;
            if !nid.is_root() && !def.permitted_in(root_ty) {
                return Err(ModelViolation::NotPermitted {
                    ty: def.name().clone(),
                    root: root_def.name().clone(),
                }
                .into());
            }
            row::check_required(&schema, node_row)?;
            index::check_unique(&index, &schema, node_row)?;
            for (attr, target) in node_row.local_refs() {
                let Some(target_row) = nodes.get(&target) else {
                    return Err(DanglingLocalRef(target).into());
                };
                if let ValueType::LocalRef(expected) = def.attr(attr).value_type() {
                    if target_row.ty() != expected {
                        return Err(row::bad_ref_target(
                            &schema,
                            def,
                            def.attr(attr),
                            expected,
                            target_row.ty(),
                        )
                        .into());
                    }
                }
            }
        }

        for &nid in &removed {
            if index::has_backrefs(&index, nid) {
                return Err(DanglingLocalRef(nid).into());
            }
        }

        debug!(
            touched = touched.len(),
            removed = removed.len(),
            nodes = nodes.len(),
            "committing subgraph transaction"
        );
        Ok(SubgraphState {
            schema,
            nodes,
            index,
            next_nid,
        })
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::subgraph::{MutableSubgraph, SubgraphView};
    use crate::value::ValueType;

    fn schema() -> Arc<Schema> {
        let mut b = Schema::builder();
        b.root_type("Head").finish();
        let net = b.declare("Net");
        let mut port = b.node_type("Port");
        port.attr("net", ValueType::LocalRef(net));
        port.finish();
        let mut net_def = b.node_type("Net");
        net_def.attr("label", ValueType::Str);
        net_def.finish();
        b.finish()
    }

    fn head(schema: &Arc<Schema>) -> MutableSubgraph {
        MutableSubgraph::new(schema.clone(), schema.find("Head").unwrap().row().finish()).unwrap()
    }

    #[test]
    fn compound_transaction_is_atomic() {
        let schema = schema();
        let mut sg = head(&schema);
        let net = schema.find("Net").unwrap();
        // Second staged edit fails; the first must not stick.
        let err = sg.with_updater(|u| {
            u.add(net.row().finish())?;
            u.remove(Nid::new(99))?;
            Ok(())
        });
        assert!(matches!(
            err,
            Err(StoreError::Query(QueryError::NodeNotFound(_)))
        ));
        assert_eq!(sg.len(), 1);
    }

    #[test]
    fn dangling_ref_rejected_at_commit() {
        let schema = schema();
        let mut sg = head(&schema);
        let port = schema.find("Port").unwrap();
        let err = sg.add(port.row().set("net", Nid::new(5)).unwrap().finish());
        assert!(matches!(err, Err(StoreError::Dangling(_))));
        assert_eq!(sg.len(), 1, "failed insert left no residue");
    }

    #[test]
    fn ref_target_type_checked() {
        let schema = schema();
        let mut sg = head(&schema);
        let port = schema.find("Port").unwrap();
        let other = sg.add(port.row().finish()).unwrap();
        // Port.net must reference a Net, not a Port.
        let err = sg.add(port.row().set("net", other).unwrap().finish());
        assert!(matches!(
            err,
            Err(StoreError::Model(ModelViolation::BadRefTarget { .. }))
        ));
    }

    #[test]
    fn remove_then_readd_same_nid() {
        let schema = schema();
        let mut sg = head(&schema);
        let net = schema.find("Net").unwrap();
        let nid = sg.add(net.row().finish()).unwrap();
        sg.with_updater(|u| {
            u.remove(nid)?;
            u.add_at(nid, net.row().finish())?;
            Ok(())
        })
        .unwrap();
        assert!(sg.get(nid).is_ok());
    }

    #[test]
    fn root_removal_rejected() {
        let schema = schema();
        let mut sg = head(&schema);
        assert!(matches!(
            sg.remove(Nid::ROOT),
            Err(StoreError::Model(ModelViolation::RemoveRoot))
        ));
    }
}
