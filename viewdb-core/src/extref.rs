//! References into other, frozen subgraphs.
//!
//! An [`ExtRef`] names a node in another subgraph and holds a strong handle
//! to it: the referenced subgraph stays alive for at least as long as any
//! reference into it exists. Because only [`FrozenSubgraph`]s can be
//! targeted, the references between subgraphs always form a DAG — a frozen
//! subgraph can never be extended to point back at a subgraph created later.

use crate::core::{Nid, StoreError};
use crate::row::Row;
use crate::subgraph::{FrozenSubgraph, SubgraphView};

/// A reference to one node inside another, already-frozen subgraph.
///
/// The target nid is validated eagerly at construction; since the target
/// subgraph is immutable, resolution can never fail afterwards.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct ExtRef {
    target: FrozenSubgraph,
    nid: Nid,
}

impl ExtRef {
    /// Creates a reference to `nid` inside `target`.
    ///
    /// Fails with a [`QueryError`](crate::subgraph::QueryError) if the node
    /// does not exist in the target.
    pub fn new(target: FrozenSubgraph, nid: Nid) -> Result<Self, StoreError> {
        target.get(nid)?;
        Ok(ExtRef { target, nid })
    }

    /// The referenced subgraph.
    #[must_use]
    pub fn target(&self) -> &FrozenSubgraph {
        &self.target
    }

    /// The referenced node id within the target subgraph.
    #[must_use]
    pub fn nid(&self) -> Nid {
        self.nid
    }

    /// The referenced row.
    #[must_use]
    pub fn resolve(&self) -> &Row {
        self.target
            .get(self.nid)
            .expect("target validated at construction and immutable since")
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::core::StoreError;
    use crate::schema::Schema;
    use crate::subgraph::MutableSubgraph;
    use crate::value::ValueType;

    fn frozen_symbol() -> (Arc<Schema>, FrozenSubgraph, Nid) {
        let mut b = Schema::builder();
        b.root_type("Symbol").finish();
        let mut pin = b.node_type("Pin");
        pin.attr("label", ValueType::Str);
        pin.finish();
        let schema = b.finish();
        let mut sg = MutableSubgraph::new(
            schema.clone(),
            schema.find("Symbol").unwrap().row().finish(),
        )
        .unwrap();
        let pin = schema.find("Pin").unwrap();
        let nid = sg.add(pin.row().set("label", "a").unwrap().finish()).unwrap();
        (schema, sg.freeze(), nid)
    }

    #[test]
    fn eager_validation() {
        let (_, frozen, nid) = frozen_symbol();
        let ext = ExtRef::new(frozen.clone(), nid).unwrap();
        assert_eq!(ext.nid(), nid);
        assert_eq!(ext.resolve().ty(), frozen.get(nid).unwrap().ty());
        assert!(matches!(
            ExtRef::new(frozen, Nid::new(99)),
            Err(StoreError::Query(_))
        ));
    }

    #[test]
    fn target_kept_alive() {
        let (_, frozen, nid) = frozen_symbol();
        let ext = ExtRef::new(frozen.clone(), nid).unwrap();
        drop(frozen);
        // The strong handle inside the reference keeps the target readable.
        assert!(ext.target().get(nid).is_ok());
    }
}
