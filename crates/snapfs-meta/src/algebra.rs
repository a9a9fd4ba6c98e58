//! Snap-set algebra: which snap IDs are visible at a node over an interval.
//!
//! A node's visible set over `[first, last]` is the union of its own snaps
//! in that interval, each historical parent's visible set restricted to
//! the intersection of the query with that parent's applicability
//! interval, and the live parent's visible set over whatever tail of the
//! query no historical parent covers. Pure functions over realm data; all
//! mutation stays in `realm` and `registry`.

use std::collections::{BTreeMap, BTreeSet};

use tracing::trace;

use crate::realm::SnapRealm;
use crate::types::{InodeId, RealmError, SnapId};

/// The registry's realm table, keyed by owning inode.
pub type RealmMap = BTreeMap<InodeId, SnapRealm>;

/// Computes the set of snap IDs visible at `ino`'s realm within the
/// inclusive interval `[first, last]`.
///
/// Precondition: `ensure_ancestors_resident` has reported Ready for this
/// realm. A historical parent with no open realm is an invariant
/// violation, reported as `ParentNotResident` rather than silently
/// narrowing the answer.
pub fn snap_set(
    realms: &RealmMap,
    ino: InodeId,
    first: SnapId,
    last: SnapId,
) -> Result<BTreeSet<SnapId>, RealmError> {
    let mut out = BTreeSet::new();
    if first > last {
        return Ok(out);
    }
    collect(realms, ino, first, last, &mut out)?;
    Ok(out)
}

fn collect(
    realms: &RealmMap,
    ino: InodeId,
    first: SnapId,
    last: SnapId,
    out: &mut BTreeSet<SnapId>,
) -> Result<(), RealmError> {
    let realm = realms.get(&ino).ok_or(RealmError::RealmNotFound(ino))?;
    trace!(realm = %ino, %first, %last, "snap_set");

    // Local snaps within [first, last].
    for (&id, _) in realm.snaps().range(first..=last) {
        out.insert(id);
    }

    // Historical parents over sub-intervals intersecting [first, last].
    // Entries are keyed by the last snap ID they cover, so the range scan
    // starts at the first entry whose interval can still reach `first`.
    // `thru` tracks the hand-off point; each interval is consumed
    // half-open on its upper side so adjacent entries never re-query the
    // boundary snap ID.
    let mut thru = first;
    for (&until, link) in realm.past_parents().range(first..) {
        if link.first > last {
            break;
        }
        thru = until.min(last);
        if !realms.contains_key(&link.dirino) {
            return Err(RealmError::ParentNotResident {
                realm: ino,
                dirino: link.dirino,
            });
        }
        collect(realms, link.dirino, first.max(link.first), thru, out)?;
        thru = thru.successor();
    }

    // The live parent applied throughout whatever tail remains.
    if thru <= last {
        if let Some(parent) = realm.parent() {
            collect(realms, parent, thru, last, out)?;
        }
    }
    Ok(())
}
