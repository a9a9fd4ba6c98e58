//! The node type of the realm graph.
//!
//! A SnapRealm is attached 1:1 to the namespace node that owns it and
//! carries that node's local snapshots, its historical parent intervals,
//! identity-keyed links to its live parent and resident children, the cap
//! holders situated under it, and a lazily derived cache of the visible
//! snap IDs. Graph-level operations (residency, visibility queries,
//! splitting) live on `RealmRegistry`; this type owns only per-realm
//! state.

use std::collections::{BTreeMap, BTreeSet};

use crate::types::{InodeId, SnapId, SnapInfo, SnapLink};

/// Snapshot-visibility scope attached to one namespace node.
///
/// `parent` and `open_children` are identity links (inode numbers), not
/// owning handles; they are resolved through the registry, so the realm
/// graph carries no reference cycles and realm lifetime follows namespace
/// residency.
#[derive(Clone, Debug)]
pub struct SnapRealm {
    /// The namespace node that owns this realm.
    ino: InodeId,
    /// Snapshots created directly at this node, keyed by snap ID.
    snaps: BTreeMap<SnapId, SnapInfo>,
    /// Historical parent intervals, keyed by the last snap ID each covers.
    past_parents: BTreeMap<SnapId, SnapLink>,
    /// Current live parent realm, by owning inode. None at the root.
    parent: Option<InodeId>,
    /// Resident child realms whose live parent is this realm.
    open_children: BTreeSet<InodeId>,
    /// Namespace objects under this realm holding outstanding client caps.
    inodes_with_caps: BTreeSet<InodeId>,
    /// Visible snap IDs as of the last computation, newest first.
    cached_snaps: Vec<SnapId>,
    /// Newest snap ID known visible here; ZERO means never computed.
    snap_highwater: SnapId,
    /// Cache generation, bumped on every invalidation. Carried in change
    /// events so collaborators can detect missed updates.
    generation: u64,
}

impl SnapRealm {
    /// Creates an empty realm owned by `ino`, with no parent.
    pub fn new(ino: InodeId) -> Self {
        Self {
            ino,
            snaps: BTreeMap::new(),
            past_parents: BTreeMap::new(),
            parent: None,
            open_children: BTreeSet::new(),
            inodes_with_caps: BTreeSet::new(),
            cached_snaps: Vec::new(),
            snap_highwater: SnapId::ZERO,
            generation: 0,
        }
    }

    /// The owning namespace node.
    pub fn ino(&self) -> InodeId {
        self.ino
    }

    /// The current live parent realm's owning inode, if any.
    pub fn parent(&self) -> Option<InodeId> {
        self.parent
    }

    pub(crate) fn set_parent(&mut self, parent: Option<InodeId>) {
        self.parent = parent;
    }

    /// Snapshots created directly at this node.
    pub fn snaps(&self) -> &BTreeMap<SnapId, SnapInfo> {
        &self.snaps
    }

    pub(crate) fn insert_snap(&mut self, info: SnapInfo) {
        self.snaps.insert(info.snapid, info);
    }

    /// Historical parent intervals, keyed by last covered snap ID.
    pub fn past_parents(&self) -> &BTreeMap<SnapId, SnapLink> {
        &self.past_parents
    }

    /// Records that the realm owned by `dirino` was this realm's parent
    /// over the inclusive snap interval `[first, last]`.
    pub fn add_past_parent(&mut self, first: SnapId, last: SnapId, dirino: InodeId) {
        self.past_parents.insert(last, SnapLink { first, dirino });
    }

    /// Resident child realms currently parented here.
    pub fn open_children(&self) -> &BTreeSet<InodeId> {
        &self.open_children
    }

    pub(crate) fn open_children_mut(&mut self) -> &mut BTreeSet<InodeId> {
        &mut self.open_children
    }

    /// Cap-holding namespace objects situated under this realm.
    pub fn inodes_with_caps(&self) -> &BTreeSet<InodeId> {
        &self.inodes_with_caps
    }

    pub(crate) fn inodes_with_caps_mut(&mut self) -> &mut BTreeSet<InodeId> {
        &mut self.inodes_with_caps
    }

    /// Current cache generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Newest snap ID known visible here; ZERO if the cache was never
    /// computed (or was invalidated).
    pub fn snap_highwater(&self) -> SnapId {
        self.snap_highwater
    }

    /// The cached visibility vector, newest first. Trustworthy only while
    /// `cache_valid` holds.
    pub fn cached_snaps(&self) -> &[SnapId] {
        &self.cached_snaps
    }

    /// True if the cached vector reflects the current graph state.
    pub fn cache_valid(&self) -> bool {
        self.snap_highwater != SnapId::ZERO
    }

    /// Replaces the cache with a freshly computed visible set.
    ///
    /// The highwater follows the maximum element; an empty set leaves it
    /// unset so the next query recomputes.
    pub(crate) fn fill_cache(&mut self, set: &BTreeSet<SnapId>) {
        self.cached_snaps = set.iter().rev().copied().collect();
        self.snap_highwater = set.iter().next_back().copied().unwrap_or(SnapId::ZERO);
    }

    /// Prepends `creating` to the cache and raises the highwater.
    /// Caller has verified `creating` is newer than everything cached.
    pub(crate) fn push_newest(&mut self, creating: SnapId) {
        self.cached_snaps.insert(0, creating);
        self.snap_highwater = creating;
    }

    /// Drops the cached vector and bumps the generation.
    pub(crate) fn invalidate_cache(&mut self) {
        self.cached_snaps.clear();
        self.snap_highwater = SnapId::ZERO;
        self.generation += 1;
    }

    /// Bumps the generation without dropping the cache, for changes the
    /// cache already absorbed incrementally (a new local snapshot).
    pub(crate) fn bump_generation(&mut self) {
        self.generation += 1;
    }

    /// True if the realm carries no state that must outlive its owner's
    /// residency: no children, no cap holders, no snapshot history.
    pub fn is_disposable(&self) -> bool {
        self.open_children.is_empty()
            && self.inodes_with_caps.is_empty()
            && self.snaps.is_empty()
            && self.past_parents.is_empty()
    }
}
