//! Read-only view of the namespace tree consumed by the realm graph.
//!
//! The realm subsystem never walks inodes or dentries directly; it asks the
//! namespace for "parent directory of" and "ancestor of" and nothing else.
//! The production implementation sits on top of the directory service; the
//! in-memory implementation here backs unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use crate::types::InodeId;

/// Namespace containment queries consumed by realm splitting.
///
/// Containment here is namespace containment (the directory tree), not
/// realm containment.
pub trait NamespaceGraph: Send + Sync {
    /// Returns the parent directory of `ino`, or None at the root.
    fn parent_directory_of(&self, ino: InodeId) -> Option<InodeId>;

    /// Returns true if `a` is a strict namespace ancestor of `b`.
    ///
    /// The default walks `parent_directory_of` upward from `b` and stops
    /// on a revisit, so a corrupt (cyclic) graph answers false rather
    /// than looping. Implementations with a cheaper containment index may
    /// override.
    fn is_ancestor_of(&self, a: InodeId, b: InodeId) -> bool {
        if a == b {
            return false;
        }
        let mut seen = HashSet::new();
        let mut cur = b;
        while let Some(parent) = self.parent_directory_of(cur) {
            if parent == a {
                return true;
            }
            if !seen.insert(parent) {
                return false;
            }
            cur = parent;
        }
        false
    }
}

/// In-memory namespace tree backed by a child -> parent map.
///
/// Test double for the directory service; links are inserted explicitly.
pub struct MemoryNamespace {
    parents: RwLock<HashMap<InodeId, InodeId>>,
}

impl MemoryNamespace {
    /// Creates an empty namespace.
    pub fn new() -> Self {
        Self {
            parents: RwLock::new(HashMap::new()),
        }
    }

    /// Records that `child` lives in directory `parent`.
    pub fn link(&self, child: InodeId, parent: InodeId) {
        let mut parents = self.parents.write().unwrap();
        parents.insert(child, parent);
    }

    /// Removes `child`'s parent link (eviction or unlink).
    pub fn unlink(&self, child: InodeId) {
        let mut parents = self.parents.write().unwrap();
        parents.remove(&child);
    }
}

impl Default for MemoryNamespace {
    fn default() -> Self {
        Self::new()
    }
}

impl NamespaceGraph for MemoryNamespace {
    fn parent_directory_of(&self, ino: InodeId) -> Option<InodeId> {
        let parents = self.parents.read().unwrap();
        parents.get(&ino).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ino(n: u64) -> InodeId {
        InodeId::new(n)
    }

    #[test]
    fn test_parent_directory_of() {
        let ns = MemoryNamespace::new();
        ns.link(ino(2), ino(1));
        assert_eq!(ns.parent_directory_of(ino(2)), Some(ino(1)));
        assert_eq!(ns.parent_directory_of(ino(1)), None);
    }

    #[test]
    fn test_is_ancestor_of_chain() {
        let ns = MemoryNamespace::new();
        ns.link(ino(2), ino(1));
        ns.link(ino(3), ino(2));
        ns.link(ino(4), ino(3));
        assert!(ns.is_ancestor_of(ino(1), ino(4)));
        assert!(ns.is_ancestor_of(ino(2), ino(4)));
        assert!(!ns.is_ancestor_of(ino(4), ino(1)));
    }

    #[test]
    fn test_is_ancestor_of_is_strict() {
        let ns = MemoryNamespace::new();
        ns.link(ino(2), ino(1));
        assert!(!ns.is_ancestor_of(ino(2), ino(2)));
    }

    #[test]
    fn test_is_ancestor_of_disjoint() {
        let ns = MemoryNamespace::new();
        ns.link(ino(2), ino(1));
        ns.link(ino(3), ino(1));
        assert!(!ns.is_ancestor_of(ino(2), ino(3)));
    }

    #[test]
    fn test_is_ancestor_of_cyclic_graph_terminates() {
        let ns = MemoryNamespace::new();
        ns.link(ino(2), ino(3));
        ns.link(ino(3), ino(2));
        assert!(!ns.is_ancestor_of(ino(1), ino(2)));
    }

    #[test]
    fn test_unlink() {
        let ns = MemoryNamespace::new();
        ns.link(ino(2), ino(1));
        ns.unlink(ino(2));
        assert_eq!(ns.parent_directory_of(ino(2)), None);
        assert!(!ns.is_ancestor_of(ino(1), ino(2)));
    }
}
