//! Structural and value comparison of two containers.

use std::fmt;

use thiserror::Error;

use crate::node::{NodeKind, ReadContainer};
use crate::walker::TreeWalker;

/// Which aspect differed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchKind {
    /// A node is missing on one side, or children differ in name or order.
    Structure,
    /// Group vs dataset, or different shape or element type.
    Kind,
    Attributes,
    Values,
    /// One side could not be read.
    Unreadable,
}

impl fmt::Display for MismatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MismatchKind::Structure => "structure",
            MismatchKind::Kind => "node kind",
            MismatchKind::Attributes => "attributes",
            MismatchKind::Values => "values",
            MismatchKind::Unreadable => "unreadable",
        };
        f.write_str(s)
    }
}

/// First difference found by [`compare`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} mismatch at {path}: {detail}")]
pub struct Mismatch {
    pub path: String,
    pub kind: MismatchKind,
    pub detail: String,
}

fn mismatch(path: impl fmt::Display, kind: MismatchKind, detail: impl Into<String>) -> Mismatch {
    Mismatch {
        path: path.to_string(),
        kind,
        detail: detail.into(),
    }
}

/// Check that `b` holds the same tree, values and attributes as `a`.
///
/// Both containers are walked in lockstep, so children must also appear in
/// the same order. Floats are compared bitwise.
pub fn compare<A, B>(a: &A, b: &B) -> Result<(), Mismatch>
where
    A: ReadContainer + ?Sized,
    B: ReadContainer + ?Sized,
{
    let mut left = TreeWalker::new(a);
    let mut right = TreeWalker::new(b);
    loop {
        let (ea, eb) = match (left.next(), right.next()) {
            (None, None) => return Ok(()),
            (Some(Err(e)), _) | (_, Some(Err(e))) => {
                return Err(mismatch(&e.path, MismatchKind::Unreadable, e.source.to_string()))
            }
            (Some(Ok(ea)), None) => {
                return Err(mismatch(&ea.path, MismatchKind::Structure, "missing in second container"))
            }
            (None, Some(Ok(eb))) => {
                return Err(mismatch(&eb.path, MismatchKind::Structure, "missing in first container"))
            }
            (Some(Ok(ea)), Some(Ok(eb))) => (ea, eb),
        };

        if ea.path != eb.path {
            return Err(mismatch(
                &ea.path,
                MismatchKind::Structure,
                format!("second container has {} here", eb.path),
            ));
        }
        let path = &ea.path;
        if ea.kind != eb.kind {
            return Err(mismatch(
                path,
                MismatchKind::Kind,
                format!("{:?} vs {:?}", ea.kind, eb.kind),
            ));
        }

        let unreadable = |e: crate::Error| mismatch(path, MismatchKind::Unreadable, e.to_string());
        let attrs_a = a.list_attributes(ea.id).map_err(unreadable)?;
        let attrs_b = b.list_attributes(eb.id).map_err(unreadable)?;
        if attrs_a.len() != attrs_b.len() {
            return Err(mismatch(
                path,
                MismatchKind::Attributes,
                format!("{} vs {} attributes", attrs_a.len(), attrs_b.len()),
            ));
        }
        for (x, y) in attrs_a.iter().zip(&attrs_b) {
            if x.name != y.name {
                return Err(mismatch(
                    path,
                    MismatchKind::Attributes,
                    format!("attribute {:?} vs {:?}", x.name, y.name),
                ));
            }
            if x.value != y.value {
                return Err(mismatch(
                    path,
                    MismatchKind::Attributes,
                    format!("attribute {:?} differs", x.name),
                ));
            }
        }

        if matches!(ea.kind, NodeKind::Dataset { .. }) {
            let va = a.read_payload(ea.id).map_err(unreadable)?;
            let vb = b.read_payload(eb.id).map_err(unreadable)?;
            if va != vb {
                return Err(mismatch(path, MismatchKind::Values, "dataset values differ"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockContainer;
    use crate::types::{Array, Attribute, DType};

    fn base() -> MockContainer {
        let mut m = MockContainer::new();
        let g = m.group(0, "g");
        m.dataset_with(g, "d", Array::from(vec![1.0f64, f64::NAN]));
        m.attr(g, Attribute::new("k", Array::from(vec![1i32])));
        m
    }

    #[test]
    fn identical_containers_match() {
        assert_eq!(compare(&base(), &base()), Ok(()));
    }

    #[test]
    fn value_difference() {
        let mut other = MockContainer::new();
        let g = other.group(0, "g");
        other.dataset_with(g, "d", Array::from(vec![1.0f64, 2.0]));
        other.attr(g, Attribute::new("k", Array::from(vec![1i32])));
        let m = compare(&base(), &other).unwrap_err();
        assert_eq!(m.kind, MismatchKind::Values);
        assert_eq!(m.path, "g/d");
    }

    #[test]
    fn attribute_difference() {
        let mut other = MockContainer::new();
        let g = other.group(0, "g");
        other.dataset_with(g, "d", Array::from(vec![1.0f64, f64::NAN]));
        other.attr(g, Attribute::new("k", Array::from(vec![2i32])));
        assert_eq!(compare(&base(), &other).unwrap_err().kind, MismatchKind::Attributes);
    }

    #[test]
    fn missing_node_and_kind_change() {
        let mut other = MockContainer::new();
        let g = other.group(0, "g");
        other.attr(g, Attribute::new("k", Array::from(vec![1i32])));
        let m = compare(&base(), &other).unwrap_err();
        assert_eq!(m.kind, MismatchKind::Structure);
        assert_eq!(m.path, "g/d");

        let mut other = MockContainer::new();
        let g = other.group(0, "g");
        other.dataset(g, "d", vec![2], DType::F32);
        other.attr(g, Attribute::new("k", Array::from(vec![1i32])));
        assert_eq!(compare(&base(), &other).unwrap_err().kind, MismatchKind::Kind);
    }
}
