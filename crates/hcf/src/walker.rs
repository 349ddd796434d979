//! Pre-order traversal of a source container.

use std::collections::HashSet;

use crate::error::{Error, TranscodeError};
use crate::node::{NodeKind, ObjectId, ReadContainer};
use crate::path::{validate_name, NodePath};

/// One visited node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    pub path: NodePath,
    pub id: ObjectId,
    pub kind: NodeKind,
}

/// Lazy depth-first walk: root first, then each group's children in the
/// order the source lists them.
///
/// Every object is yielded once. Reaching an object a second time (a cycle
/// or a child shared by two groups), an unreadable child header, and
/// duplicate or invalid child names are reported as
/// [`Error::MalformedHierarchy`]. After the first error the walker yields
/// nothing more.
pub struct TreeWalker<'a, S: ReadContainer + ?Sized> {
    source: &'a S,
    stack: Vec<(NodePath, ObjectId)>,
    visited: HashSet<ObjectId>,
    failed: bool,
}

impl<'a, S: ReadContainer + ?Sized> TreeWalker<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self {
            source,
            stack: vec![(NodePath::root(), source.root())],
            visited: HashSet::new(),
            failed: false,
        }
    }

    /// Number of nodes (root included), reading metadata only.
    pub fn count_nodes(source: &'a S) -> Result<u64, TranscodeError> {
        let mut n = 0;
        for entry in TreeWalker::new(source) {
            entry?;
            n += 1;
        }
        Ok(n)
    }

    fn visit(&mut self, path: NodePath, id: ObjectId) -> Result<WalkEntry, TranscodeError> {
        if !self.visited.insert(id) {
            return Err(malformed(path, format!("object {id} reached twice")));
        }
        let kind = match self.source.node_kind(id) {
            Ok(kind) => kind,
            Err(Error::Format(e)) => {
                return Err(malformed(path, format!("unreadable object {id}: {e}")))
            }
            Err(e) => return Err(TranscodeError::new(path, e)),
        };

        if kind.is_group() {
            let children = match self.source.list_children(id) {
                Ok(children) => children,
                Err(Error::Format(e)) => {
                    return Err(malformed(path, format!("unreadable links: {e}")))
                }
                Err(e) => return Err(TranscodeError::new(path, e)),
            };
            let mut names = HashSet::with_capacity(children.len());
            let mut pending = Vec::with_capacity(children.len());
            for (name, child) in children {
                if validate_name(&name).is_err() {
                    return Err(malformed(path, format!("invalid child name {name:?}")));
                }
                if !names.insert(name.clone()) {
                    return Err(malformed(path, format!("duplicate child name {name:?}")));
                }
                let child_path = path
                    .join(&name)
                    .map_err(|e| TranscodeError::new(path.clone(), e))?;
                pending.push((child_path, child));
            }
            // Reversed so the first child is popped first.
            self.stack.extend(pending.into_iter().rev());
        }

        Ok(WalkEntry { path, id, kind })
    }
}

fn malformed(path: NodePath, reason: String) -> TranscodeError {
    TranscodeError::new(
        path.clone(),
        Error::MalformedHierarchy {
            path: path.to_string(),
            reason,
        },
    )
}

impl<S: ReadContainer + ?Sized> Iterator for TreeWalker<'_, S> {
    type Item = Result<WalkEntry, TranscodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let (path, id) = self.stack.pop()?;
        let result = self.visit(path, id);
        if result.is_err() {
            self.failed = true;
            self.stack.clear();
        }
        Some(result)
    }
}

impl<S: ReadContainer + ?Sized> std::iter::FusedIterator for TreeWalker<'_, S> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::MockContainer;
    use crate::types::DType;

    fn paths(source: &MockContainer) -> Vec<String> {
        TreeWalker::new(source)
            .map(|e| e.unwrap().path.to_string())
            .collect()
    }

    #[test]
    fn preorder_in_stored_order() {
        let mut m = MockContainer::new();
        let b = m.group(0, "b");
        m.dataset(b, "x", vec![2], DType::U8);
        let a = m.group(0, "a");
        m.group(a, "inner");
        m.dataset(0, "z", vec![], DType::F64);
        assert_eq!(paths(&m), vec!["/", "b", "b/x", "a", "a/inner", "z"]);
        assert_eq!(TreeWalker::count_nodes(&m).unwrap(), 6);
    }

    #[test]
    fn empty_container_yields_root_only() {
        let m = MockContainer::new();
        let entries: Vec<_> = TreeWalker::new(&m).collect();
        assert_eq!(entries.len(), 1);
        let root = entries[0].as_ref().unwrap();
        assert!(root.path.is_root());
        assert_eq!(root.kind, NodeKind::Group);
    }

    #[test]
    fn deep_nesting_does_not_recurse() {
        let mut m = MockContainer::new();
        let mut parent = 0;
        for i in 0..10_000 {
            parent = m.group(parent, &format!("g{i}"));
        }
        assert_eq!(TreeWalker::count_nodes(&m).unwrap(), 10_001);
    }

    #[test]
    fn cycle_is_malformed_and_fuses() {
        let mut m = MockContainer::new();
        let a = m.group(0, "a");
        m.link(a, "back", 0);
        m.group(0, "later");
        let mut walker = TreeWalker::new(&m);
        assert!(walker.next().unwrap().is_ok());
        assert!(walker.next().unwrap().is_ok());
        let err = walker.next().unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedHierarchy);
        assert_eq!(err.path.to_string(), "a/back");
        assert!(walker.next().is_none());
        assert!(walker.next().is_none());
    }

    #[test]
    fn shared_child_is_malformed() {
        let mut m = MockContainer::new();
        let a = m.group(0, "a");
        let d = m.dataset(a, "d", vec![1], DType::I8);
        let b = m.group(0, "b");
        m.link(b, "alias", d);
        let err = TreeWalker::count_nodes(&m).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedHierarchy);
        assert_eq!(err.path.to_string(), "b/alias");
    }

    #[test]
    fn dangling_link_is_malformed() {
        let mut m = MockContainer::new();
        m.link(0, "ghost", 999);
        let err = TreeWalker::count_nodes(&m).unwrap_err();
        assert!(matches!(err.source, Error::MalformedHierarchy { .. }));
        assert_eq!(err.path.to_string(), "ghost");
    }

    #[test]
    fn duplicate_and_invalid_names() {
        let mut m = MockContainer::new();
        m.group(0, "x");
        m.group(0, "x");
        let err = TreeWalker::count_nodes(&m).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedHierarchy);
        assert!(err.path.is_root());

        let mut m = MockContainer::new();
        m.group(0, "a/b");
        assert_eq!(
            TreeWalker::count_nodes(&m).unwrap_err().kind(),
            ErrorKind::MalformedHierarchy
        );
    }

    #[test]
    fn unsupported_node_keeps_its_kind() {
        let mut m = MockContainer::new();
        let r = m.dataset(0, "refs", vec![2], DType::U64);
        m.unsupported(r, "object reference");
        let err = TreeWalker::count_nodes(&m).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedType);
        assert_eq!(err.path.to_string(), "refs");
    }
}
