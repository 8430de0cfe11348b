//! Hierarchical node paths.
//!
//! Each subgraph carries a name tree rooted at its root node (n0): path
//! entries are ordinary nodes of the built-in [`Schema::PATH`] type, so they
//! live in the same persistent container and are indexed, shared and
//! validated like any other node. A path segment is either a name
//! (`m1`, `vdd`) or an array index (`[3]`); the textual form reads
//! `inst.pin` or `taps[2].net`.
//!
//! Name resolution and binding are exposed on the subgraph facades; this
//! module defines the path values themselves.

use std::fmt;
use std::str::FromStr;

use smol_str::SmolStr;

use crate::core::Nid;
use crate::row::Row;
use crate::schema::{ModelViolation, Schema};
use crate::value::AttrValue;

/// One segment of a [`NodePath`].
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum PathSeg {
    /// A name: non-empty, starting with an ASCII letter or underscore.
    Name(SmolStr),
    /// An array index.
    Index(i64),
}

impl PathSeg {
    /// Checks the naming rule for string segments.
    pub fn name(text: impl Into<SmolStr>) -> Result<Self, ModelViolation> {
        let text = text.into();
        if valid_name(&text) {
            Ok(PathSeg::Name(text))
        } else {
            Err(ModelViolation::PathSyntax {
                seg: text.to_string(),
            })
        }
    }

    pub(crate) fn to_value(&self) -> AttrValue {
        match self {
            PathSeg::Name(name) => AttrValue::Str(name.clone()),
            PathSeg::Index(index) => AttrValue::Int(*index),
        }
    }

    pub(crate) fn from_value(value: &AttrValue) -> Option<Self> {
        match value {
            AttrValue::Str(name) => Some(PathSeg::Name(name.clone())),
            AttrValue::Int(index) => Some(PathSeg::Index(*index)),
            _ => None,
        }
    }
}

fn valid_name(text: &str) -> bool {
    let mut chars = text.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl fmt::Display for PathSeg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSeg::Name(name) => write!(f, "{name}"),
            PathSeg::Index(index) => write!(f, "[{index}]"),
        }
    }
}

impl From<i64> for PathSeg {
    fn from(index: i64) -> Self {
        PathSeg::Index(index)
    }
}

/// A structured node name: a sequence of segments relative to the subgraph
/// root. The empty path denotes the root scope itself.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct NodePath(Vec<PathSeg>);

impl NodePath {
    /// The empty path (the root scope).
    #[must_use]
    pub fn root() -> Self {
        NodePath::default()
    }

    /// Builds a path from segments.
    #[must_use]
    pub fn from_segs(segs: impl IntoIterator<Item = PathSeg>) -> Self {
        NodePath(segs.into_iter().collect())
    }

    /// The segments, outermost first.
    #[must_use]
    pub fn segments(&self) -> &[PathSeg] {
        &self.0
    }

    /// Whether this is the root scope.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the path extended by one segment.
    #[must_use]
    pub fn join(&self, seg: impl Into<PathSeg>) -> Self {
        let mut segs = self.0.clone();
        segs.push(seg.into());
        NodePath(segs)
    }

    pub(crate) fn push(&mut self, seg: PathSeg) {
        self.0.push(seg);
    }

    pub(crate) fn reversed(mut self) -> Self {
        self.0.reverse();
        self
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, ".");
        }
        for (pos, seg) in self.0.iter().enumerate() {
            match seg {
                PathSeg::Name(name) => {
                    if pos > 0 {
                        write!(f, ".")?;
                    }
                    write!(f, "{name}")?;
                }
                PathSeg::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

impl FromStr for NodePath {
    type Err = ModelViolation;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        if text.is_empty() || text == "." {
            return Ok(NodePath::root());
        }
        let mut segs = Vec::new();
        for part in text.split('.') {
            let (name, indices) = match part.find('[') {
                Some(bracket) => part.split_at(bracket),
                None => (part, ""),
            };
            segs.push(PathSeg::name(name)?);
            let mut rest = indices;
            while !rest.is_empty() {
                let Some(end) = rest.find(']') else {
                    return Err(ModelViolation::PathSyntax {
                        seg: part.to_string(),
                    });
                };
                let index = rest[1..end].parse::<i64>().map_err(|_| {
                    ModelViolation::PathSyntax {
                        seg: part.to_string(),
                    }
                })?;
                segs.push(PathSeg::Index(index));
                rest = &rest[end + 1..];
                if !rest.is_empty() && !rest.starts_with('[') {
                    return Err(ModelViolation::PathSyntax {
                        seg: part.to_string(),
                    });
                }
            }
        }
        Ok(NodePath(segs))
    }
}

/// Builds the row of one path node: `parent` is the root node or the parent
/// path node, `target` the node the name binds (unset for empty paths).
pub(crate) fn path_row(schema: &Schema, parent: Nid, seg: &PathSeg, target: Option<Nid>) -> Row {
    let def = schema
        .type_def(Schema::PATH)
        .expect("built-in path type missing");
    debug_assert_eq!(def.arity(), 3);
    Row::new(
        Schema::PATH,
        Box::new([
            Some(AttrValue::LocalRef(parent)),
            Some(seg.to_value()),
            target.map(AttrValue::LocalRef),
        ]),
    )
}
