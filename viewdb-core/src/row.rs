//! The canonical immutable tuple of attribute values for one node.

use std::collections::BTreeMap;

use smol_str::SmolStr;

use crate::core::{AttrId, Nid, NodeTypeId};
use crate::schema::{AttrDef, ModelViolation, NodeType, NodeTypeDef, Schema};
use crate::subgraph::SubgraphView;
use crate::value::{AttrValue, ValueType};

/// One node's data: its type tag and a fixed-size tuple of attribute values.
///
/// Rows are plain immutable values. They are built through
/// [`NodeType::row`](crate::schema::NodeType::row) against a schema, attached
/// to a subgraph by the mutation engine, and never change in place — updating
/// a node means storing a new row derived with [`Row::with`].
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Row {
    ty: NodeTypeId,
    vals: Box<[Option<AttrValue>]>,
}

impl Row {
    pub(crate) fn new(ty: NodeTypeId, vals: Box<[Option<AttrValue>]>) -> Self {
        Row { ty, vals }
    }

    /// The node type this row instantiates.
    #[must_use]
    pub fn ty(&self) -> NodeTypeId {
        self.ty
    }

    /// The value in the given slot, if set.
    ///
    /// # Panics
    ///
    /// If the slot does not belong to the row's type.
    #[must_use]
    pub fn get(&self, attr: AttrId) -> Option<&AttrValue> {
        self.vals[attr.index()].as_ref()
    }

    /// All slot values in declaration order.
    pub fn values(&self) -> impl ExactSizeIterator<Item = Option<&AttrValue>> {
        self.vals.iter().map(Option::as_ref)
    }

    /// Returns a copy of the row with one slot replaced.
    ///
    /// The replacement is not validated here; the store validates the whole
    /// row when it is written back.
    ///
    /// # Panics
    ///
    /// If the slot does not belong to the row's type.
    #[must_use]
    pub fn with(&self, attr: AttrId, value: Option<AttrValue>) -> Row {
        let mut vals = self.vals.clone();
        vals[attr.index()] = value;
        Row { ty: self.ty, vals }
    }

    /// Local references held by this row, as (slot, target) pairs.
    pub(crate) fn local_refs(&self) -> impl Iterator<Item = (AttrId, Nid)> + '_ {
        self.vals.iter().enumerate().filter_map(|(index, val)| {
            val.as_ref()
                .and_then(AttrValue::as_local_ref)
                .map(|nid| (AttrId::new(index), nid))
        })
    }

    /// Copy of the row with every local reference renumbered through `map`.
    pub(crate) fn translate_nids(&self, map: &BTreeMap<Nid, Nid>) -> Row {
        let vals = self
            .vals
            .iter()
            .map(|val| match val {
                Some(AttrValue::LocalRef(nid)) => {
                    Some(AttrValue::LocalRef(*map.get(nid).unwrap_or(nid)))
                }
                other => other.clone(),
            })
            .collect();
        Row { ty: self.ty, vals }
    }
}

/// Checks one value against its declared slot, including the target types of
/// subgraph and external references (which are self-describing and can be
/// checked as soon as the value is supplied).
pub(crate) fn check_value(
    schema: &Schema,
    ty: &NodeTypeDef,
    attr: &AttrDef,
    value: &AttrValue,
) -> Result<(), ModelViolation> {
    if !attr.value_type().admits(value) {
        return Err(ModelViolation::TypeMismatch {
            ty: ty.name().clone(),
            attr: attr.name().clone(),
            expected: attr.value_type(),
            got: value.kind(),
        });
    }
    match (attr.value_type(), value) {
        (ValueType::SubgraphRef(expected), AttrValue::Subgraph(target)) => {
            if !std::ptr::eq(schema, target.schema().as_ref()) {
                return Err(ModelViolation::ForeignRow);
            }
            let root_ty = target.root_type();
            if root_ty != expected {
                return Err(bad_ref_target(schema, ty, attr, expected, root_ty));
            }
        }
        (ValueType::ExternalRef(expected), AttrValue::Ext(ext)) => {
            if !std::ptr::eq(schema, ext.target().schema().as_ref()) {
                return Err(ModelViolation::ForeignRow);
            }
            let found = ext.resolve().ty();
            if found != expected {
                return Err(bad_ref_target(schema, ty, attr, expected, found));
            }
        }
        _ => {}
    }
    Ok(())
}

pub(crate) fn bad_ref_target(
    schema: &Schema,
    ty: &NodeTypeDef,
    attr: &AttrDef,
    expected: NodeTypeId,
    found: NodeTypeId,
) -> ModelViolation {
    let name_of = |id: NodeTypeId| -> SmolStr {
        schema
            .type_def(id)
            .map(|def| def.name().clone())
            .unwrap_or_else(|| "?".into())
    };
    ModelViolation::BadRefTarget {
        ty: ty.name().clone(),
        attr: attr.name().clone(),
        expected: name_of(expected),
        found: name_of(found),
    }
}

/// Shape-level validation run on every row written to a subgraph: the type
/// must belong to the schema, the arity must match, and every set value must
/// belong to its declared slot type. Required-attribute presence is checked
/// at transaction commit instead, so compound edits may stage rows that are
/// completed later in the same transaction.
pub(crate) fn validate_row(schema: &Schema, row: &Row) -> Result<(), ModelViolation> {
    let Some(def) = schema.type_def(row.ty()) else {
        return Err(ModelViolation::ForeignRow);
    };
    if row.vals.len() != def.arity() {
        return Err(ModelViolation::ForeignRow);
    }
    for (index, value) in row.vals.iter().enumerate() {
        if let Some(value) = value {
            check_value(schema, def, def.attr(AttrId::new(index)), value)?;
        }
    }
    Ok(())
}

/// Checks that no required slot of `row` is unset.
pub(crate) fn check_required(schema: &Schema, row: &Row) -> Result<(), ModelViolation> {
    let def = schema.type_def(row.ty()).ok_or(ModelViolation::ForeignRow)?;
    for (attr, value) in def.attrs().zip(row.vals.iter()) {
        if value.is_none() && !attr.is_optional() {
            return Err(ModelViolation::MissingAttr {
                ty: def.name().clone(),
                attr: attr.name().clone(),
            });
        }
    }
    Ok(())
}

/// Builder for a [`Row`], obtained from [`NodeType::row`].
///
/// Slots start out at their declared defaults; values are type-checked
/// eagerly as they are set.
#[derive(Debug)]
pub struct RowBuilder<'s> {
    ty: NodeType<'s>,
    vals: Vec<Option<AttrValue>>,
}

impl<'s> RowBuilder<'s> {
    pub(crate) fn new(ty: NodeType<'s>) -> Self {
        let vals = ty.def().attrs().map(|attr| attr.default().cloned()).collect();
        RowBuilder { ty, vals }
    }

    /// Sets an attribute by name.
    pub fn set(
        mut self,
        name: &str,
        value: impl Into<AttrValue>,
    ) -> Result<Self, ModelViolation> {
        let def = self.ty.def();
        let Some(attr) = def.attr_id(name) else {
            return Err(ModelViolation::UnknownAttr {
                ty: def.name().clone(),
                name: name.into(),
            });
        };
        let value = value.into();
        check_value(self.ty.schema(), def, def.attr(attr), &value)?;
        self.vals[attr.index()] = Some(value);
        Ok(self)
    }

    /// Clears an attribute by name (back to unset, not to its default).
    pub fn clear(mut self, name: &str) -> Result<Self, ModelViolation> {
        let def = self.ty.def();
        let Some(attr) = def.attr_id(name) else {
            return Err(ModelViolation::UnknownAttr {
                ty: def.name().clone(),
                name: name.into(),
            });
        };
        self.vals[attr.index()] = None;
        Ok(self)
    }

    /// Finishes the row.
    ///
    /// Presence of required attributes is checked when the row is written to
    /// a subgraph, not here.
    #[must_use]
    pub fn finish(self) -> Row {
        Row {
            ty: self.ty.id(),
            vals: self.vals.into_boxed_slice(),
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::schema::Schema;

    fn pin_schema() -> Arc<Schema> {
        let mut b = Schema::builder();
        b.root_type("Symbol").finish();
        let mut pin = b.node_type("Pin");
        pin.attr_with_default("pintype", ValueType::Token, AttrValue::token("inout"));
        pin.required("pos", ValueType::Vec2);
        pin.finish();
        b.finish()
    }

    #[test]
    fn defaults_and_overrides() {
        let schema = pin_schema();
        let pin = schema.find("Pin").unwrap();
        let row = pin
            .row()
            .set("pos", crate::value::Vec2::new(2, 4))
            .unwrap()
            .finish();
        assert_eq!(row.get(AttrId::new(0)), Some(&AttrValue::token("inout")));
        let row = pin
            .row()
            .set("pintype", AttrValue::token("out"))
            .unwrap()
            .finish();
        assert_eq!(row.get(AttrId::new(0)), Some(&AttrValue::token("out")));
    }

    #[test]
    fn unknown_attr_rejected() {
        let schema = pin_schema();
        let pin = schema.find("Pin").unwrap();
        let err = pin.row().set("invalid", 1i64).unwrap_err();
        assert!(matches!(err, ModelViolation::UnknownAttr { .. }));
    }

    #[test]
    fn type_mismatch_rejected() {
        let schema = pin_schema();
        let pin = schema.find("Pin").unwrap();
        let err = pin.row().set("pos", 17i64).unwrap_err();
        assert!(matches!(err, ModelViolation::TypeMismatch { .. }));
    }

    #[test]
    fn required_check() {
        let schema = pin_schema();
        let pin = schema.find("Pin").unwrap();
        let row = pin.row().finish();
        assert!(matches!(
            check_required(&schema, &row),
            Err(ModelViolation::MissingAttr { .. })
        ));
        let row = pin
            .row()
            .set("pos", crate::value::Vec2::new(0, 0))
            .unwrap()
            .finish();
        assert!(check_required(&schema, &row).is_ok());
    }
}
