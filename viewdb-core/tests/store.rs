//! End-to-end behaviour of the store: structural sharing, freeze/thaw,
//! queries, referential integrity and the name tree.

use std::sync::Arc;

use proptest::prelude::*;
use rstest::{fixture, rstest};

use viewdb_core::{
    AttrValue, CellHandle, DanglingLocalRef, ExtRef, IndexId, ModelViolation, MutableSubgraph,
    Nid, NodePath, NodeTypeId, PathSeg, QueryError, Row, Schema, StoreError, SubgraphView,
    ValueType, Vec2,
};

/// A miniature design-platform schema: symbols with pins, schematics with
/// nets referencing pins of their symbol, and an indexed resistor table.
struct Design {
    schema: Arc<Schema>,
    symbol: NodeTypeId,
    pin: NodeTypeId,
    schematic: NodeTypeId,
    net: NodeTypeId,
    port: NodeTypeId,
    tap: NodeTypeId,
    res: NodeTypeId,
    by_value: IndexId,
    by_label: IndexId,
    by_net: IndexId,
    by_net_order: IndexId,
}

#[fixture]
fn design() -> Design {
    let mut b = Schema::builder();

    let mut symbol = b.root_type("Symbol");
    symbol.attr("caption", ValueType::Str);
    symbol.attr("cell", ValueType::Cell);
    let symbol = symbol.finish();

    let mut pin = b.node_type("Pin");
    pin.attr_with_default("pintype", ValueType::Token, AttrValue::token("inout"));
    pin.required("pos", ValueType::Vec2);
    pin.permitted_in([symbol]);
    let pin = pin.finish();

    let mut schematic = b.root_type("Schematic");
    schematic.attr("symbol", ValueType::SubgraphRef(symbol));
    let schematic = schematic.finish();

    let net_fwd = b.declare("Net");

    let mut port = b.node_type("Port");
    let port_net = port.attr("net", ValueType::LocalRef(net_fwd));
    let by_net = port.index([port_net]);
    port.permitted_in([schematic]);
    let port = port.finish();

    let mut tap = b.node_type("Tap");
    let tap_net = tap.attr("net", ValueType::LocalRef(net_fwd));
    let tap_order = tap.attr("order", ValueType::Int);
    let by_net_order = tap.unique_index([tap_net, tap_order]);
    tap.permitted_in([schematic]);
    let tap = tap.finish();

    let mut net = b.node_type("Net");
    net.attr("pin", ValueType::ExternalRef(pin));
    net.permitted_in([schematic]);
    let net = net.finish();

    let mut res = b.node_type("Res");
    let value = res.attr("value", ValueType::Int);
    let label = res.attr("label", ValueType::Str);
    let by_value = res.index([value]);
    let by_label = res.unique_index([label]);
    let res = res.finish();

    Design {
        schema: b.finish(),
        symbol,
        pin,
        schematic,
        net,
        port,
        tap,
        res,
        by_value,
        by_label,
        by_net,
        by_net_order,
    }
}

fn symbol_graph(d: &Design) -> MutableSubgraph {
    let root = d
        .schema
        .get(d.symbol)
        .row()
        .set("caption", "R1")
        .unwrap()
        .finish();
    MutableSubgraph::new(d.schema.clone(), root).unwrap()
}

fn res_graph(d: &Design) -> MutableSubgraph {
    let root = d.schema.get(d.symbol).row().finish();
    MutableSubgraph::new(d.schema.clone(), root).unwrap()
}

fn schematic_root(d: &Design) -> Row {
    d.schema.get(d.schematic).row().finish()
}

fn add_res(sg: &mut MutableSubgraph, d: &Design, value: i64, label: &str) -> Nid {
    let row = d
        .schema
        .get(d.res)
        .row()
        .set("value", value)
        .unwrap()
        .set("label", label)
        .unwrap()
        .finish();
    sg.add(row).unwrap()
}

// An inserted row reads back unchanged; a unique-index conflict aborts the
// insert without residue.
#[rstest]
fn insert_lookup_roundtrip(design: Design) {
    let mut sg = res_graph(&design);
    let row = design
        .schema
        .get(design.res)
        .row()
        .set("value", 10i64)
        .unwrap()
        .set("label", "ra")
        .unwrap()
        .finish();
    let nid = sg.add(row.clone()).unwrap();
    assert_eq!(sg.get(nid).unwrap(), &row);

    // A duplicate under the unique label index is rejected without residue.
    let before = sg.len();
    let dup = design
        .schema
        .get(design.res)
        .row()
        .set("value", 99i64)
        .unwrap()
        .set("label", "ra")
        .unwrap()
        .finish();
    let err = sg.add(dup).unwrap_err();
    assert!(matches!(err, StoreError::Unique(u) if u.index == design.by_label));
    assert_eq!(sg.len(), before);
    let q = design.schema.index(design.by_value).eq(99i64);
    assert_eq!(sg.query(&q).count(), 0, "failed insert left no index entry");
}

// Non-unique indices collect all nodes sharing a value, in insertion order.
#[rstest]
fn generic_index_scenario(design: Design) {
    let mut sg = res_graph(&design);
    let a = add_res(&mut sg, &design, 10, "a");
    let b = add_res(&mut sg, &design, 20, "b");
    let c = add_res(&mut sg, &design, 10, "c");
    assert_eq!((a, b, c), (Nid::new(1), Nid::new(2), Nid::new(3)));

    let all: Vec<Nid> = sg.all(design.res).collect();
    assert_eq!(all, vec![a, b, c]);

    let tens: Vec<Nid> = sg
        .query(&design.schema.index(design.by_value).eq(10i64))
        .collect();
    assert_eq!(tens, vec![a, c]);

    // The traversal is restartable: a second pass sees the same nodes.
    let again = sg.query(&design.schema.index(design.by_value).eq(10i64));
    assert_eq!(again.count(), 2);
}

#[rstest]
fn one_requires_exactly_one(design: Design) {
    let mut sg = res_graph(&design);
    add_res(&mut sg, &design, 10, "a");
    add_res(&mut sg, &design, 10, "c");
    let by_value = design.schema.index(design.by_value);
    assert!(matches!(
        sg.one(&by_value.eq(10i64)),
        Err(StoreError::Query(QueryError::Ambiguous(2)))
    ));
    assert!(matches!(
        sg.one(&by_value.eq(77i64)),
        Err(StoreError::Query(QueryError::NoMatch))
    ));
    let by_label = design.schema.index(design.by_label);
    assert_eq!(sg.one(&by_label.eq("c")).unwrap(), Nid::new(2));
}

// Local references protect their target from removal until cleared.
#[rstest]
fn reference_integrity(design: Design) {
    let mut sg = MutableSubgraph::new(design.schema.clone(), schematic_root(&design)).unwrap();
    let (port, net) = sg
        .with_updater(|u| {
            // The port is staged first and references the net inserted after
            // it; the commit check only sees the final state.
            let port = u.add(
                design
                    .schema
                    .get(design.port)
                    .row()
                    .set("net", Nid::new(2))
                    .unwrap()
                    .finish(),
            )?;
            let net = u.add(design.schema.get(design.net).row().finish())?;
            Ok((port, net))
        })
        .unwrap();
    assert_eq!((port, net), (Nid::new(1), Nid::new(2)));

    assert_eq!(
        sg.remove(net).unwrap_err(),
        StoreError::Dangling(DanglingLocalRef(net))
    );

    let net_attr = design.schema.get(design.port).def().attr_id("net").unwrap();
    sg.set(port, net_attr, None).unwrap();
    sg.remove(net).unwrap();
    assert!(matches!(
        sg.get(net),
        Err(StoreError::Query(QueryError::NodeNotFound(_)))
    ));
}

// The by-net index answers the reverse direction of Port.net without any
// hand-maintained back-references.
#[rstest]
fn relational_back_queries(design: Design) {
    let mut sg = MutableSubgraph::new(design.schema.clone(), schematic_root(&design)).unwrap();
    let net_row = design.schema.get(design.net).row().finish();
    let vdd = sg.add(net_row.clone()).unwrap();
    let gnd = sg.add(net_row).unwrap();
    let port_for = |d: &Design, net: Nid| {
        d.schema
            .get(d.port)
            .row()
            .set("net", net)
            .unwrap()
            .finish()
    };
    let p1 = sg.add(port_for(&design, vdd)).unwrap();
    let _p2 = sg.add(port_for(&design, gnd)).unwrap();
    let p3 = sg.add(port_for(&design, vdd)).unwrap();

    let by_net = design.schema.index(design.by_net);
    let on_vdd: Vec<Nid> = sg.query(&by_net.eq(vdd)).collect();
    assert_eq!(on_vdd, vec![p1, p3]);
}

// Combined indices key tuples over several attributes and can be unique.
#[rstest]
fn combined_index(design: Design) {
    let mut sg = MutableSubgraph::new(design.schema.clone(), schematic_root(&design)).unwrap();
    let net = sg.add(design.schema.get(design.net).row().finish()).unwrap();
    let tap = |order: i64| {
        design
            .schema
            .get(design.tap)
            .row()
            .set("net", net)
            .unwrap()
            .set("order", order)
            .unwrap()
            .finish()
    };
    let t0 = sg.add(tap(0)).unwrap();
    let _t1 = sg.add(tap(1)).unwrap();

    let by_net_order = design.schema.index(design.by_net_order);
    let q = by_net_order.eq_tuple([Some(AttrValue::LocalRef(net)), Some(AttrValue::Int(0))]);
    assert_eq!(sg.one(&q).unwrap(), t0);

    let err = sg.add(tap(0)).unwrap_err();
    assert!(matches!(err, StoreError::Unique(u) if u.index == design.by_net_order));
    // An update into a taken tuple is rejected the same way.
    let order = design.schema.get(design.tap).def().attr_id("order").unwrap();
    let err = sg.set(t0, order, Some(AttrValue::Int(1))).unwrap_err();
    assert!(matches!(err, StoreError::Unique(_)));
    assert_eq!(sg.one(&q).unwrap(), t0, "failed update left the index intact");
}

// A single edit shares every untouched row with the parent version.
#[rstest]
fn structural_sharing_across_versions(design: Design) {
    let mut sg = res_graph(&design);
    let mut nids = Vec::new();
    for value in 0..50 {
        nids.push(add_res(&mut sg, &design, value, &format!("r{value}")));
    }
    let frozen = sg.freeze();

    let mut derived = frozen.thaw();
    let touched = nids[17];
    let label = design.schema.get(design.res).def().attr_id("label").unwrap();
    derived
        .set(touched, label, Some(AttrValue::from("renamed")))
        .unwrap();
    let derived = derived.freeze();

    for &nid in &nids {
        let before = frozen.get_shared(nid).unwrap();
        let after = derived.get_shared(nid).unwrap();
        if nid == touched {
            assert!(!Arc::ptr_eq(&before, &after));
        } else {
            assert!(Arc::ptr_eq(&before, &after), "{nid} was copied, not shared");
        }
    }
}

// Mutating a thawed copy never changes the frozen original.
#[rstest]
fn freeze_thaw_non_interference(design: Design) {
    let mut sg = res_graph(&design);
    let a = add_res(&mut sg, &design, 10, "a");
    let frozen = sg.freeze();

    let mut thawed = frozen.thaw();
    let value = design.schema.get(design.res).def().attr_id("value").unwrap();
    thawed.set(a, value, Some(AttrValue::Int(77))).unwrap();
    add_res(&mut thawed, &design, 5, "fresh");
    thawed.remove_named(a).unwrap();

    assert_eq!(frozen.len(), 2);
    assert_eq!(frozen.get(a).unwrap().get(value), Some(&AttrValue::Int(10)));
    let tens = frozen.query(&design.schema.index(design.by_value).eq(10i64));
    assert_eq!(tens.count(), 1);
}

// Rebuilding a subgraph from its extracted node list reproduces the
// indices.
#[rstest]
fn rebuild_equivalence(design: Design) {
    let mut sg = res_graph(&design);
    for value in [10, 20, 10, 30] {
        let label = format!("n{value}_{}", sg.len());
        add_res(&mut sg, &design, value, &label);
    }
    sg.bind(&"group.first".parse().unwrap(), Nid::new(1)).unwrap();
    let original = sg.freeze();

    let rows: Vec<_> = original
        .rows()
        .map(|(nid, row)| (nid, row.clone()))
        .collect();
    let rebuilt = MutableSubgraph::load(design.schema.clone(), rows)
        .unwrap()
        .freeze();

    assert!(original.matches(&rebuilt));
    assert_eq!(original, rebuilt);
    for value in [10, 20, 30] {
        let q = design.schema.index(design.by_value).eq(value);
        let a: Vec<Nid> = original.query(&q).collect();
        let b: Vec<Nid> = rebuilt.query(&q).collect();
        assert_eq!(a, b, "index contents diverge for value {value}");
    }
    assert_eq!(
        rebuilt.resolve(&"group.first".parse().unwrap()).unwrap(),
        Nid::new(1)
    );
}

// Paths bind uniquely and enumerate their children.
#[rstest]
fn path_bind_resolve_children(design: Design) {
    let mut sg = res_graph(&design);
    let a = add_res(&mut sg, &design, 1, "a");
    let b = add_res(&mut sg, &design, 2, "b");
    let other = add_res(&mut sg, &design, 3, "c");

    let inst_a: NodePath = "inst.a".parse().unwrap();
    let inst_b: NodePath = "inst.b".parse().unwrap();
    sg.bind(&inst_a, a).unwrap();
    sg.bind(&inst_b, b).unwrap();

    assert_eq!(sg.resolve(&inst_a).unwrap(), a);
    assert_eq!(sg.path_of(b).unwrap(), inst_b);

    // Rebinding to a different node is a naming violation.
    let err = sg.bind(&inst_a, other).unwrap_err();
    assert!(matches!(
        err,
        StoreError::Model(ModelViolation::PathBound { .. })
    ));
    // Rebinding the same node is a no-op.
    sg.bind(&inst_a, a).unwrap();
    // A second canonical path for an already-named node is rejected too.
    let err = sg.bind(&"alias".parse().unwrap(), a).unwrap_err();
    assert!(matches!(
        err,
        StoreError::Model(ModelViolation::AlreadyNamed { .. })
    ));

    let mut children: Vec<_> = sg
        .children_of(&"inst".parse().unwrap())
        .unwrap()
        .map(|(seg, nid)| (seg.to_string(), nid))
        .collect();
    children.sort();
    assert_eq!(
        children,
        vec![("a".to_string(), Some(a)), ("b".to_string(), Some(b))]
    );

    // The root scope enumerates the intermediate path entry.
    let top: Vec<_> = sg
        .children_of(&NodePath::root())
        .unwrap()
        .map(|(seg, nid)| (seg.to_string(), nid))
        .collect();
    assert_eq!(top, vec![("inst".to_string(), None)]);
}

#[rstest]
fn array_paths(design: Design) {
    let mut sg = res_graph(&design);
    let a = add_res(&mut sg, &design, 1, "a");
    let b = add_res(&mut sg, &design, 2, "b");
    let path_a: NodePath = "taps[0]".parse().unwrap();
    let path_b = NodePath::root()
        .join(PathSeg::name("taps").unwrap())
        .join(4i64);
    sg.bind(&path_a, a).unwrap();
    sg.bind(&path_b, b).unwrap();
    assert_eq!(sg.resolve(&path_a).unwrap(), a);
    assert_eq!(sg.resolve(&"taps[4]".parse().unwrap()).unwrap(), b);
    assert_eq!(sg.path_of(b).unwrap().to_string(), "taps[4]");
}

#[rstest]
fn remove_named_drops_binding(design: Design) {
    let mut sg = res_graph(&design);
    let a = add_res(&mut sg, &design, 1, "a");
    sg.bind(&"r1".parse().unwrap(), a).unwrap();
    // The path entry holds a local reference, so a bare remove is refused.
    assert!(matches!(sg.remove(a), Err(StoreError::Dangling(_))));
    sg.remove_named(a).unwrap();
    assert!(sg.resolve(&"r1".parse().unwrap()).is_err());
    assert!(sg.get(a).is_err());
}

// Cross-subgraph references: frozen-only targets, strong handles, eager
// validation.
#[rstest]
fn cross_subgraph_references(design: Design) {
    let mut symbol = symbol_graph(&design);
    let pin_row = design
        .schema
        .get(design.pin)
        .row()
        .set("pos", Vec2::new(0, 2))
        .unwrap()
        .finish();
    let pin = symbol.add(pin_row).unwrap();
    let symbol = symbol.freeze();

    let root = design
        .schema
        .get(design.schematic)
        .row()
        .set("symbol", symbol.clone())
        .unwrap()
        .finish();
    let mut schem = MutableSubgraph::new(design.schema.clone(), root).unwrap();
    let ext = ExtRef::new(symbol.clone(), pin).unwrap();
    let net = schem
        .add(
            design
                .schema
                .get(design.net)
                .row()
                .set("pin", ext.clone())
                .unwrap()
                .finish(),
        )
        .unwrap();

    let stored = schem.get(net).unwrap();
    let net_pin = design.schema.get(design.net).def().attr_id("pin").unwrap();
    let Some(AttrValue::Ext(stored_ref)) = stored.get(net_pin) else {
        panic!("expected an external reference");
    };
    assert_eq!(stored_ref.resolve().ty(), design.pin);
    assert_eq!(stored_ref.nid(), pin);

    // The declared target type is enforced when the slot is filled.
    let bad = ExtRef::new(symbol.clone(), Nid::ROOT).unwrap();
    let err = design
        .schema
        .get(design.net)
        .row()
        .set("pin", bad)
        .unwrap_err();
    assert!(matches!(err, ModelViolation::BadRefTarget { .. }));
}

#[rstest]
fn node_placement_is_checked(design: Design) {
    // Pins belong to symbols; a schematic subgraph must reject them.
    let mut schem = MutableSubgraph::new(design.schema.clone(), schematic_root(&design)).unwrap();
    let pin_row = design
        .schema
        .get(design.pin)
        .row()
        .set("pos", Vec2::new(0, 0))
        .unwrap()
        .finish();
    let err = schem.add(pin_row).unwrap_err();
    assert!(matches!(
        err,
        StoreError::Model(ModelViolation::NotPermitted { .. })
    ));
}

#[rstest]
fn cell_handle_attribute(design: Design) {
    let cell = CellHandle::new("inv_cell");
    let root = design
        .schema
        .get(design.symbol)
        .row()
        .set("cell", cell.clone())
        .unwrap()
        .finish();
    let sg = MutableSubgraph::new(design.schema.clone(), root).unwrap();
    let cell_attr = design
        .schema
        .get(design.symbol)
        .def()
        .attr_id("cell")
        .unwrap();
    let Some(AttrValue::Cell(stored)) = sg.root().get(cell_attr) else {
        panic!("expected the cell handle");
    };
    assert!(stored.same(&cell));
    assert_eq!(stored.downcast_ref::<&str>(), Some(&"inv_cell"));
}

#[rstest]
fn frozen_equality_includes_allocation(design: Design) {
    let mut a = res_graph(&design);
    let mut b = res_graph(&design);
    let nid = add_res(&mut a, &design, 1, "x");
    add_res(&mut b, &design, 1, "x");
    // Same content, but `b` burnt one more nid.
    let extra = add_res(&mut b, &design, 2, "y");
    b.remove(extra).unwrap();
    let a = a.freeze();
    let b = b.freeze();
    assert_eq!(a.get(nid).unwrap(), b.get(nid).unwrap());
    assert_ne!(a, b);
}

proptest! {
    // No sequence of edits on a thawed copy ever shows through the frozen
    // snapshot.
    #[test]
    fn frozen_snapshots_are_stable(values in prop::collection::vec(0i64..100, 1..20)) {
        let design = design();
        let mut sg = res_graph(&design);
        for (pos, value) in values.iter().enumerate() {
            add_res(&mut sg, &design, *value, &format!("r{pos}"));
        }
        let frozen = sg.freeze();
        let baseline: Vec<_> = frozen.rows().map(|(nid, row)| (nid, row.clone())).collect();

        let mut thawed = frozen.thaw();
        let value_attr = design.schema.get(design.res).def().attr_id("value").unwrap();
        for (pos, _) in values.iter().enumerate() {
            let nid = Nid::new(pos as u32 + 1);
            thawed.set(nid, value_attr, Some(AttrValue::Int(-1))).unwrap();
        }
        add_res(&mut thawed, &design, 1234, "fresh");

        let after: Vec<_> = frozen.rows().map(|(nid, row)| (nid, row.clone())).collect();
        prop_assert_eq!(baseline, after);
    }
}
