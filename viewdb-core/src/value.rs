//! Attribute values and their declarable types.
//!
//! Every slot of a node row holds an optional [`AttrValue`]. The value domain
//! is deliberately closed: scalars, small fixed tuples, enum-like tokens and
//! references. Everything is hashable and (apart from the documented
//! [`CellHandle`] exception) immutable, so that rows, subgraphs and index keys
//! can themselves be hashed and shared.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use num_rational::Ratio;
use ordered_float::OrderedFloat;
use smol_str::SmolStr;

use crate::core::{Nid, NodeTypeId};
use crate::extref::ExtRef;
use crate::subgraph::FrozenSubgraph;

/// Exact rational scalar used for geometry and electrical quantities.
pub type Rational = Ratio<i64>;

/// A 2-dimensional point or displacement with rational coordinates.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, derive_more::Display)]
#[display("({x}, {y})")]
pub struct Vec2 {
    /// Horizontal coordinate.
    pub x: Rational,
    /// Vertical coordinate.
    pub y: Rational,
}

impl Vec2 {
    /// Creates a point from two rational (or integer) coordinates.
    pub fn new(x: impl Into<Rational>, y: impl Into<Rational>) -> Self {
        Vec2 {
            x: x.into(),
            y: y.into(),
        }
    }
}

/// An axis-aligned rectangle spanned by its lower-left and upper-right corner.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, derive_more::Display)]
#[display("({lx}, {ly})..({ux}, {uy})")]
pub struct Rect {
    /// Lower-left x.
    pub lx: Rational,
    /// Lower-left y.
    pub ly: Rational,
    /// Upper-right x.
    pub ux: Rational,
    /// Upper-right y.
    pub uy: Rational,
}

impl Rect {
    /// Creates a rectangle from its corner coordinates.
    pub fn new(
        lx: impl Into<Rational>,
        ly: impl Into<Rational>,
        ux: impl Into<Rational>,
        uy: impl Into<Rational>,
    ) -> Self {
        Rect {
            lx: lx.into(),
            ly: ly.into(),
            ux: ux.into(),
            uy: uy.into(),
        }
    }
}

/// Opaque shared handle to an external design-cell object.
///
/// This is the single sanctioned exception to the "attribute values are
/// immutable" rule: the handle itself is compared and hashed by identity, so
/// the object behind it may be interior-mutable. It exists purely to resolve
/// symbol/schematic linkage back to the cell that generated a view. Do not
/// use it to smuggle other mutable state into rows.
#[derive(Clone)]
pub struct CellHandle(Arc<dyn Any + Send + Sync>);

impl CellHandle {
    /// Wraps an external cell object in a handle.
    pub fn new<T: Any + Send + Sync>(cell: T) -> Self {
        CellHandle(Arc::new(cell))
    }

    /// Borrows the wrapped object, if it is of type `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }

    /// Whether two handles refer to the same object.
    #[must_use]
    pub fn same(&self, other: &CellHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for CellHandle {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl Eq for CellHandle {}

impl Hash for CellHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as *const () as usize).hash(state);
    }
}

impl fmt::Debug for CellHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CellHandle({:p})", Arc::as_ptr(&self.0))
    }
}

/// The value stored in one attribute slot of a node row.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
#[non_exhaustive]
pub enum AttrValue {
    /// Boolean flag.
    Bool(bool),
    /// Signed integer scalar.
    Int(i64),
    /// Text value.
    Str(SmolStr),
    /// Enum-like tag, e.g. a pin direction or an orientation.
    Token(SmolStr),
    /// Floating-point scalar (hashable via total order).
    Float(OrderedFloat<f64>),
    /// Exact rational scalar.
    Rational(Rational),
    /// 2d rational point.
    Vec2(Vec2),
    /// Rational rectangle.
    Rect(Rect),
    /// Reference to a node in the same subgraph.
    LocalRef(Nid),
    /// Strong handle to another, frozen subgraph.
    Subgraph(FrozenSubgraph),
    /// Reference to a node inside another, frozen subgraph.
    Ext(ExtRef),
    /// The design-cell handle exception, see [`CellHandle`].
    Cell(CellHandle),
}

impl AttrValue {
    /// Creates a [`AttrValue::Token`] tag.
    pub fn token(tag: impl Into<SmolStr>) -> Self {
        AttrValue::Token(tag.into())
    }

    /// Short tag naming the value kind, used in diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            AttrValue::Bool(_) => "bool",
            AttrValue::Int(_) => "int",
            AttrValue::Str(_) => "str",
            AttrValue::Token(_) => "token",
            AttrValue::Float(_) => "float",
            AttrValue::Rational(_) => "rational",
            AttrValue::Vec2(_) => "vec2",
            AttrValue::Rect(_) => "rect",
            AttrValue::LocalRef(_) => "local ref",
            AttrValue::Subgraph(_) => "subgraph ref",
            AttrValue::Ext(_) => "external ref",
            AttrValue::Cell(_) => "cell handle",
        }
    }

    /// Returns the referenced nid if the value is a local reference.
    #[must_use]
    pub fn as_local_ref(&self) -> Option<Nid> {
        match self {
            AttrValue::LocalRef(nid) => Some(*nid),
            _ => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Bool(v) => write!(f, "{v}"),
            AttrValue::Int(v) => write!(f, "{v}"),
            AttrValue::Str(v) => write!(f, "{v:?}"),
            AttrValue::Token(v) => write!(f, "{v}"),
            AttrValue::Float(v) => write!(f, "{v}"),
            AttrValue::Rational(v) => write!(f, "{v}"),
            AttrValue::Vec2(v) => write!(f, "{v}"),
            AttrValue::Rect(v) => write!(f, "{v}"),
            AttrValue::LocalRef(nid) => write!(f, "{nid}"),
            AttrValue::Subgraph(sg) => write!(f, "<subgraph of {} nodes>", sg.len()),
            AttrValue::Ext(ext) => write!(f, "{}@<subgraph>", ext.nid()),
            AttrValue::Cell(cell) => write!(f, "{cell:?}"),
        }
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Str(v.into())
    }
}

impl From<SmolStr> for AttrValue {
    fn from(v: SmolStr) -> Self {
        AttrValue::Str(v)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Float(OrderedFloat(v))
    }
}

impl From<Rational> for AttrValue {
    fn from(v: Rational) -> Self {
        AttrValue::Rational(v)
    }
}

impl From<Vec2> for AttrValue {
    fn from(v: Vec2) -> Self {
        AttrValue::Vec2(v)
    }
}

impl From<Rect> for AttrValue {
    fn from(v: Rect) -> Self {
        AttrValue::Rect(v)
    }
}

impl From<Nid> for AttrValue {
    fn from(v: Nid) -> Self {
        AttrValue::LocalRef(v)
    }
}

impl From<FrozenSubgraph> for AttrValue {
    fn from(v: FrozenSubgraph) -> Self {
        AttrValue::Subgraph(v)
    }
}

impl From<ExtRef> for AttrValue {
    fn from(v: ExtRef) -> Self {
        AttrValue::Ext(v)
    }
}

impl From<CellHandle> for AttrValue {
    fn from(v: CellHandle) -> Self {
        AttrValue::Cell(v)
    }
}

/// The declared type of an attribute slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[non_exhaustive]
pub enum ValueType {
    /// Boolean flag.
    Bool,
    /// Signed integer scalar.
    Int,
    /// Text value.
    Str,
    /// Enum-like tag.
    Token,
    /// Floating-point scalar.
    Float,
    /// Exact rational scalar.
    Rational,
    /// 2d rational point.
    Vec2,
    /// Rational rectangle.
    Rect,
    /// Path segment name: accepts either [`AttrValue::Str`] or
    /// [`AttrValue::Int`] (array indices). Used by the built-in path type.
    PathName,
    /// Reference to a node of the given type in the same subgraph.
    LocalRef(NodeTypeId),
    /// Reference to a node of any type in the same subgraph.
    NodeRef,
    /// Strong handle to a frozen subgraph with the given root type.
    SubgraphRef(NodeTypeId),
    /// Reference to a node of the given type inside another frozen subgraph.
    ExternalRef(NodeTypeId),
    /// The design-cell handle exception, see [`CellHandle`].
    Cell,
}

impl ValueType {
    /// Structural check that `value` belongs to this type's domain.
    ///
    /// Reference targets are checked elsewhere: declared local-ref target
    /// types at transaction commit, subgraph/external-ref target types when
    /// the row slot is filled.
    #[must_use]
    pub fn admits(&self, value: &AttrValue) -> bool {
        matches!(
            (self, value),
            (ValueType::Bool, AttrValue::Bool(_))
                | (ValueType::Int, AttrValue::Int(_))
                | (ValueType::Str, AttrValue::Str(_))
                | (ValueType::Token, AttrValue::Token(_))
                | (ValueType::Float, AttrValue::Float(_))
                | (ValueType::Rational, AttrValue::Rational(_))
                | (ValueType::Vec2, AttrValue::Vec2(_))
                | (ValueType::Rect, AttrValue::Rect(_))
                | (ValueType::PathName, AttrValue::Str(_))
                | (ValueType::PathName, AttrValue::Int(_))
                | (ValueType::LocalRef(_), AttrValue::LocalRef(_))
                | (ValueType::NodeRef, AttrValue::LocalRef(_))
                | (ValueType::SubgraphRef(_), AttrValue::Subgraph(_))
                | (ValueType::ExternalRef(_), AttrValue::Ext(_))
                | (ValueType::Cell, AttrValue::Cell(_))
        )
    }

    /// Whether values of this type are local references that must stay
    /// resolvable inside the subgraph.
    #[must_use]
    pub fn is_local_ref(&self) -> bool {
        matches!(self, ValueType::LocalRef(_) | ValueType::NodeRef)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Bool => write!(f, "bool"),
            ValueType::Int => write!(f, "int"),
            ValueType::Str => write!(f, "str"),
            ValueType::Token => write!(f, "token"),
            ValueType::Float => write!(f, "float"),
            ValueType::Rational => write!(f, "rational"),
            ValueType::Vec2 => write!(f, "vec2"),
            ValueType::Rect => write!(f, "rect"),
            ValueType::PathName => write!(f, "path name"),
            ValueType::LocalRef(ty) => write!(f, "local ref to {ty}"),
            ValueType::NodeRef => write!(f, "node ref"),
            ValueType::SubgraphRef(ty) => write!(f, "subgraph ref to {ty}"),
            ValueType::ExternalRef(ty) => write!(f, "external ref to {ty}"),
            ValueType::Cell => write!(f, "cell handle"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn admits_scalars() {
        assert!(ValueType::Int.admits(&AttrValue::Int(3)));
        assert!(!ValueType::Int.admits(&AttrValue::Bool(true)));
        assert!(ValueType::PathName.admits(&AttrValue::Int(3)));
        assert!(ValueType::PathName.admits(&AttrValue::from("wire")));
        assert!(!ValueType::PathName.admits(&AttrValue::token("wire")));
    }

    #[test]
    fn cell_handle_identity() {
        let a = CellHandle::new("inverter");
        let b = a.clone();
        let c = CellHandle::new("inverter");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.downcast_ref::<&str>(), Some(&"inverter"));
        assert_eq!(a.downcast_ref::<u32>(), None);
    }

    #[test]
    fn vec2_display() {
        let v = Vec2::new(1, Rational::new(1, 2));
        assert_eq!(v.to_string(), "(1, 1/2)");
        assert_eq!(AttrValue::from(v).kind(), "vec2");
    }
}
