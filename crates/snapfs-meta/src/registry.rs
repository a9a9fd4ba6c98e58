//! The realm graph: ownership, residency, visibility caches, splitting.
//!
//! All parent/child links in the realm graph are inode numbers resolved
//! through this registry, never owning handles, so realm lifetime follows
//! namespace residency and the graph carries no reference cycles. The
//! metadata server runs one logical operation at a time; the registry is a
//! plain owned value mutated through `&mut self` and the only suspension
//! point is residency resolution, which retains no partial state. A
//! multi-threaded embedding must serialize all realm-graph mutation
//! externally.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::{debug, trace};

use crate::algebra::{self, RealmMap};
use crate::namespace::NamespaceGraph;
use crate::realm::SnapRealm;
use crate::resolver::{Residency, ResidencyResolver, Resolution, RetryToken};
use crate::types::{InodeId, RealmError, SnapId, SnapInfo};

/// A realm's effective visible set changed.
///
/// Queued whenever a new local snapshot, a reparenting, or a split alters
/// what a realm's dependents can see. The delivery collaborator drains the
/// queue and notifies cap holders; `generation` lets it detect missed
/// updates.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RealmChange {
    /// The affected realm's owning inode.
    pub realm: InodeId,
    /// The realm's cache generation after the change.
    pub generation: u64,
}

/// Owns every resident SnapRealm, keyed by owning inode.
///
/// The registry is the single point through which realm links resolve and
/// realm state mutates: lifecycle (`open_realm`/`close_realm`), residency
/// (`ensure_ancestors_resident`), visibility (`get_snap_set`,
/// `get_snap_vector`, `update_snap_vector`), snapshot creation
/// (`record_snap`/`create_snap`), capability-holder placement, and realm
/// splitting (`split_at`).
pub struct RealmRegistry {
    realms: RealmMap,
    /// Cap holder -> containing realm, backing `current_realm_of`.
    cap_realm: HashMap<InodeId, InodeId>,
    /// Newest snap ID issued or recorded anywhere; `create_snap` allocates
    /// above it.
    last_issued: SnapId,
    /// Change events awaiting pickup by the notification collaborator.
    changes: Vec<RealmChange>,
}

impl RealmRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            realms: RealmMap::new(),
            cap_realm: HashMap::new(),
            last_issued: SnapId::ZERO,
            changes: Vec::new(),
        }
    }

    /// Returns the realm owned by `ino`.
    pub fn realm(&self, ino: InodeId) -> Result<&SnapRealm, RealmError> {
        self.realms.get(&ino).ok_or(RealmError::RealmNotFound(ino))
    }

    fn realm_mut(&mut self, ino: InodeId) -> Result<&mut SnapRealm, RealmError> {
        self.realms
            .get_mut(&ino)
            .ok_or(RealmError::RealmNotFound(ino))
    }

    /// True if a realm is open for `ino`.
    pub fn contains(&self, ino: InodeId) -> bool {
        self.realms.contains_key(&ino)
    }

    /// Number of open realms.
    pub fn len(&self) -> usize {
        self.realms.len()
    }

    /// True if no realms are open.
    pub fn is_empty(&self) -> bool {
        self.realms.is_empty()
    }

    fn push_change(&mut self, ino: InodeId) {
        if let Some(realm) = self.realms.get(&ino) {
            self.changes.push(RealmChange {
                realm: ino,
                generation: realm.generation(),
            });
        }
    }

    /// Drains the queued change events.
    pub fn take_changes(&mut self) -> Vec<RealmChange> {
        std::mem::take(&mut self.changes)
    }

    /// Opens a realm for `ino`, parented under `parent`'s realm.
    ///
    /// Called when the owning node is loaded and determined to need a
    /// realm (local snapshots, the root, or a capability target). The
    /// parent realm must already be open; the child registers in its
    /// `open_children` in the same step. Opening an already-open realm is
    /// a no-op.
    pub fn open_realm(&mut self, ino: InodeId, parent: Option<InodeId>) -> Result<(), RealmError> {
        if self.realms.contains_key(&ino) {
            trace!(realm = %ino, "open_realm: already open");
            return Ok(());
        }
        if let Some(p) = parent {
            if !self.realms.contains_key(&p) {
                return Err(RealmError::RealmNotFound(p));
            }
        }
        debug!(realm = %ino, parent = ?parent.map(|p| p.as_u64()), "open_realm");
        let mut realm = SnapRealm::new(ino);
        realm.set_parent(parent);
        self.realms.insert(ino, realm);
        if let Some(p) = parent {
            self.realm_mut(p)?.open_children_mut().insert(ino);
        }
        Ok(())
    }

    /// Opens a realm restored from durable state: its local snapshots and
    /// historical parent intervals as persisted by the durability
    /// collaborator, each history entry being `(first, last, dirino)`.
    ///
    /// The registry's snap-ID allocator is raised above every restored ID
    /// so later `create_snap` calls stay monotonic. Restoring over an
    /// already-open realm is refused.
    pub fn open_realm_with_history(
        &mut self,
        ino: InodeId,
        parent: Option<InodeId>,
        snaps: Vec<SnapInfo>,
        past: Vec<(SnapId, SnapId, InodeId)>,
    ) -> Result<(), RealmError> {
        if self.realms.contains_key(&ino) {
            return Err(RealmError::RealmInUse(ino));
        }
        self.open_realm(ino, parent)?;
        let mut max_seen = SnapId::ZERO;
        let realm = self.realm_mut(ino)?;
        for info in snaps {
            max_seen = max_seen.max(info.snapid);
            realm.insert_snap(info);
        }
        for (first, last, dirino) in past {
            max_seen = max_seen.max(last);
            realm.add_past_parent(first, last, dirino);
        }
        self.last_issued = self.last_issued.max(max_seen);
        Ok(())
    }

    /// Closes the realm for `ino` on eviction of its owner.
    ///
    /// Refused with `RealmInUse` while the realm holds children, cap
    /// holders, or snapshot history that must outlive residency.
    pub fn close_realm(&mut self, ino: InodeId) -> Result<(), RealmError> {
        let realm = self.realm(ino)?;
        if !realm.is_disposable() {
            return Err(RealmError::RealmInUse(ino));
        }
        let parent = realm.parent();
        debug!(realm = %ino, "close_realm");
        self.realms.remove(&ino);
        if let Some(p) = parent {
            if let Some(parent_realm) = self.realms.get_mut(&p) {
                parent_realm.open_children_mut().remove(&ino);
            }
        }
        Ok(())
    }

    /// Ensures every ancestor needed to answer visibility queries on
    /// `ino`'s realm is resident: the live parent chain transitively, and
    /// every former parent referenced by any realm on that chain.
    ///
    /// On the first non-resident dependency, exactly one fetch is issued
    /// (tagged with `retry`) and `Residency::Pending` is returned; the
    /// whole operation must be re-run from the top once the continuation
    /// fires. Residency is monotonic, so the retry loop terminates.
    pub fn ensure_ancestors_resident(
        &self,
        ino: InodeId,
        resolver: &dyn ResidencyResolver,
        retry: RetryToken,
    ) -> Result<Residency, RealmError> {
        // Collect the live parent chain, guarding against a corrupt graph.
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut cur = Some(ino);
        while let Some(i) = cur {
            if !seen.insert(i) {
                return Err(RealmError::RealmCycle(i));
            }
            chain.push(i);
            cur = self.realm(i)?.parent();
        }

        // Parent before self: a parent's own ancestors must be resident
        // before its dependents can be answered.
        for &i in chain.iter().rev() {
            let realm = self.realm(i)?;
            for link in realm.past_parents().values() {
                if self.realms.contains_key(&link.dirino) {
                    continue;
                }
                match resolver.resolve(link.dirino, retry) {
                    Resolution::Resident => continue,
                    Resolution::Pending => {
                        debug!(realm = %ino, dependency = %link.dirino,
                            "ensure_ancestors_resident: fetch scheduled");
                        return Ok(Residency::Pending(link.dirino));
                    }
                }
            }
        }
        trace!(realm = %ino, "ensure_ancestors_resident: ready");
        Ok(Residency::Ready)
    }

    /// Snap IDs visible at `ino`'s realm within `[first, last]`.
    ///
    /// Precondition: `ensure_ancestors_resident` reported Ready for this
    /// realm; a non-resident historical parent surfaces as an
    /// `InvariantViolation`-class error, never a narrowed answer.
    pub fn get_snap_set(
        &self,
        ino: InodeId,
        first: SnapId,
        last: SnapId,
    ) -> Result<std::collections::BTreeSet<SnapId>, RealmError> {
        algebra::snap_set(&self.realms, ino, first, last)
    }

    /// All snap IDs visible at `ino`'s realm, newest first.
    ///
    /// Serves the cached vector when valid; otherwise recomputes over
    /// `[0, NOSNAP]`, fills the cache, and sets the highwater to the
    /// maximum found (left unset when the set is empty).
    pub fn get_snap_vector(&mut self, ino: InodeId) -> Result<Vec<SnapId>, RealmError> {
        {
            let realm = self.realm(ino)?;
            if realm.cache_valid() {
                trace!(realm = %ino, "get_snap_vector: cached");
                return Ok(realm.cached_snaps().to_vec());
            }
        }
        let set = algebra::snap_set(&self.realms, ino, SnapId::ZERO, SnapId::NOSNAP)?;
        let realm = self.realm_mut(ino)?;
        realm.fill_cache(&set);
        debug!(realm = %ino, snaps = set.len(), highwater = %realm.snap_highwater(),
            "get_snap_vector: recomputed");
        Ok(realm.cached_snaps().to_vec())
    }

    /// Incremental cache maintenance while recording a brand-new snapshot.
    ///
    /// Computes the cache first if it was never computed, then prepends
    /// `creating` at the newest end and raises the highwater. `creating`
    /// must exceed both the highwater and the newest cached entry; the
    /// vector is stored newest first, so a stale or reordered ID would
    /// corrupt the cache silently, and is rejected instead.
    pub fn update_snap_vector(
        &mut self,
        ino: InodeId,
        creating: SnapId,
    ) -> Result<Vec<SnapId>, RealmError> {
        if !self.realm(ino)?.cache_valid() {
            self.get_snap_vector(ino)?;
        }
        let realm = self.realm_mut(ino)?;
        let newest = realm.cached_snaps().first().copied().unwrap_or(SnapId::ZERO);
        let floor = newest.max(realm.snap_highwater());
        if creating <= floor {
            return Err(RealmError::SnapIdNotMonotonic {
                creating,
                highwater: floor,
            });
        }
        realm.push_newest(creating);
        debug!(realm = %ino, %creating, "update_snap_vector");
        Ok(realm.cached_snaps().to_vec())
    }

    /// Records a new snapshot at `ino`'s realm.
    ///
    /// Applies the incremental cache fast path, stores the SnapInfo, and
    /// invalidates every descendant realm's cache, queueing change events
    /// for the realm and each descendant.
    pub fn record_snap(&mut self, ino: InodeId, info: SnapInfo) -> Result<(), RealmError> {
        let creating = info.snapid;
        self.update_snap_vector(ino, creating)?;
        let realm = self.realm_mut(ino)?;
        realm.insert_snap(info);
        realm.bump_generation();
        self.last_issued = self.last_issued.max(creating);
        debug!(realm = %ino, snapid = %creating, "record_snap");
        self.push_change(ino);

        for d in self.descendants_of(ino)? {
            self.realm_mut(d)?.invalidate_cache();
            self.push_change(d);
        }
        Ok(())
    }

    /// Creates a snapshot named `name` at `ino`'s realm, allocating the
    /// next snap ID above everything ever issued or recorded.
    pub fn create_snap(&mut self, ino: InodeId, name: &str) -> Result<SnapId, RealmError> {
        let id = self.last_issued.successor();
        self.record_snap(ino, SnapInfo::new(id, name))?;
        Ok(id)
    }

    /// Records that the realm owned by `dirino` was the effective parent
    /// of `ino`'s realm over the snap interval `[first, last]`.
    ///
    /// Invoked by namespace restructuring when a subtree moves across a
    /// realm boundary and its old parentage becomes history. The realm's
    /// composition changed, so its cache and its descendants' caches are
    /// invalidated and change events queued.
    pub fn record_past_parent(
        &mut self,
        ino: InodeId,
        first: SnapId,
        last: SnapId,
        dirino: InodeId,
    ) -> Result<(), RealmError> {
        debug!(realm = %ino, %first, %last, past_parent = %dirino, "record_past_parent");
        let realm = self.realm_mut(ino)?;
        realm.add_past_parent(first, last, dirino);
        realm.invalidate_cache();
        self.push_change(ino);
        for d in self.descendants_of(ino)? {
            self.realm_mut(d)?.invalidate_cache();
            self.push_change(d);
        }
        Ok(())
    }

    /// Resident realms below `ino` in the realm graph, via open_children.
    fn descendants_of(&self, ino: InodeId) -> Result<Vec<InodeId>, RealmError> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        seen.insert(ino);
        let mut queue: VecDeque<InodeId> = self.realm(ino)?.open_children().iter().copied().collect();
        while let Some(i) = queue.pop_front() {
            if !seen.insert(i) {
                return Err(RealmError::RealmCycle(i));
            }
            out.push(i);
            queue.extend(self.realm(i)?.open_children().iter().copied());
        }
        Ok(out)
    }

    /// Registers `ino` as holding outstanding client caps under
    /// `realm_ino`'s realm, moving it from any previous realm.
    pub fn attach_cap_holder(&mut self, realm_ino: InodeId, ino: InodeId) -> Result<(), RealmError> {
        if !self.realms.contains_key(&realm_ino) {
            return Err(RealmError::RealmNotFound(realm_ino));
        }
        if let Some(old) = self.cap_realm.insert(ino, realm_ino) {
            if let Some(old_realm) = self.realms.get_mut(&old) {
                old_realm.inodes_with_caps_mut().remove(&ino);
            }
        }
        self.realm_mut(realm_ino)?.inodes_with_caps_mut().insert(ino);
        trace!(realm = %realm_ino, cap_holder = %ino, "attach_cap_holder");
        Ok(())
    }

    /// Drops `ino`'s cap-holder registration (capability revoke or
    /// release). Returns the realm it was under, if any.
    pub fn detach_cap_holder(&mut self, ino: InodeId) -> Option<InodeId> {
        let realm_ino = self.cap_realm.remove(&ino)?;
        if let Some(realm) = self.realms.get_mut(&realm_ino) {
            realm.inodes_with_caps_mut().remove(&ino);
        }
        Some(realm_ino)
    }

    /// The realm currently containing cap holder `ino`.
    pub fn current_realm_of(&self, ino: InodeId) -> Option<InodeId> {
        self.cap_realm.get(&ino).copied()
    }

    /// Splits `ino`'s realm at a newly promoted descendant realm `child`.
    ///
    /// Everything situated under `child`'s owning node moves to `child`:
    /// resident child realms whose owners `child`'s owner strictly
    /// contains, and cap holders whose upward namespace walk reaches
    /// `child`'s owner. `child` itself is reparented under this realm.
    /// Both realms' caches (and those of reparented grandchildren) are
    /// invalidated and change events queued.
    pub fn split_at(
        &mut self,
        ino: InodeId,
        child: InodeId,
        ns: &dyn NamespaceGraph,
    ) -> Result<(), RealmError> {
        if !self.realms.contains_key(&ino) {
            return Err(RealmError::RealmNotFound(ino));
        }
        if !self.realms.contains_key(&child) {
            return Err(RealmError::RealmNotFound(child));
        }
        if !ns.is_ancestor_of(ino, child) {
            return Err(RealmError::SplitTargetNotUnder { realm: ino, child });
        }
        debug!(realm = %ino, %child, "split_at");

        // Reparent the child realm under this one, keeping open_children
        // and parent links consistent in the same step.
        let old_parent = self.realm(child)?.parent();
        if old_parent != Some(ino) {
            if let Some(op) = old_parent {
                if let Some(realm) = self.realms.get_mut(&op) {
                    realm.open_children_mut().remove(&child);
                }
            }
            self.realm_mut(child)?.set_parent(Some(ino));
            self.realm_mut(ino)?.open_children_mut().insert(child);
        }

        // Resident child realms under the new boundary move to it.
        let mut moved_realms = Vec::new();
        let current: Vec<InodeId> = self.realm(ino)?.open_children().iter().copied().collect();
        for r in current {
            if r == child {
                continue;
            }
            if ns.is_ancestor_of(child, r) {
                trace!(realm = %ino, moved = %r, to = %child, "split_at: child realm moved");
                self.realm_mut(ino)?.open_children_mut().remove(&r);
                self.realm_mut(child)?.open_children_mut().insert(r);
                self.realm_mut(r)?.set_parent(Some(child));
                moved_realms.push(r);
            } else {
                trace!(realm = %ino, kept = %r, "split_at: child realm kept");
            }
        }

        // Cap holders under the new boundary move to it.
        let holders: Vec<InodeId> = self.realm(ino)?.inodes_with_caps().iter().copied().collect();
        for h in holders {
            if self.inode_under(ns, h, child)? {
                trace!(realm = %ino, moved = %h, to = %child, "split_at: cap holder moved");
                self.realm_mut(ino)?.inodes_with_caps_mut().remove(&h);
                self.realm_mut(child)?.inodes_with_caps_mut().insert(h);
                self.cap_realm.insert(h, child);
            } else {
                trace!(realm = %ino, kept = %h, "split_at: cap holder kept");
            }
        }

        // Both realms' effective composition changed, as did that of every
        // realm reparented between them.
        for r in [ino, child].into_iter().chain(moved_realms) {
            self.realm_mut(r)?.invalidate_cache();
            self.push_change(r);
        }
        Ok(())
    }

    /// Bounded upward namespace walk: does `ino` sit under `top`?
    ///
    /// A revisited node means the namespace graph cycles, which is an
    /// invariant violation of the surrounding tier, not a recoverable
    /// condition here.
    fn inode_under(
        &self,
        ns: &dyn NamespaceGraph,
        ino: InodeId,
        top: InodeId,
    ) -> Result<bool, RealmError> {
        let mut seen = HashSet::new();
        seen.insert(ino);
        let mut cur = ino;
        while let Some(parent) = ns.parent_directory_of(cur) {
            if parent == top {
                return Ok(true);
            }
            if !seen.insert(parent) {
                return Err(RealmError::NamespaceCycle(ino));
            }
            cur = parent;
        }
        Ok(false)
    }
}

impl Default for RealmRegistry {
    fn default() -> Self {
        Self::new()
    }
}
