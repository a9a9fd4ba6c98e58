use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents a unique identifier for an inode in the metadata service
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InodeId(u64);

impl InodeId {
    /// The root inode ID (always 1)
    pub const ROOT_INODE: InodeId = InodeId(1);

    /// Creates a new InodeId from a raw u64 value
    pub fn new(id: u64) -> Self {
        InodeId(id)
    }

    /// Returns the raw u64 value of this inode ID
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for InodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonically increasing snapshot identifier with a total order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapId(u64);

impl SnapId {
    /// The zero snap ID; also serves as "unset" for the cache highwater.
    pub const ZERO: SnapId = SnapId(0);

    /// Reserved maximum value: "no snapshot restriction", the open end of
    /// current state. Never assigned to an actual snapshot.
    pub const NOSNAP: SnapId = SnapId(u64::MAX);

    /// Creates a new SnapId from a raw u64 value
    pub fn new(id: u64) -> Self {
        SnapId(id)
    }

    /// Returns the raw u64 value of this snap ID
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// The next snap ID in the total order. Saturates at NOSNAP.
    pub fn successor(self) -> SnapId {
        SnapId(self.0.saturating_add(1))
    }

    /// True if this ID falls within the inclusive interval [first, last].
    pub fn in_interval(self, first: SnapId, last: SnapId) -> bool {
        self >= first && self <= last
    }
}

impl fmt::Display for SnapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == SnapId::NOSNAP {
            write!(f, "NOSNAP")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Represents a point in time with second and nanosecond precision
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    /// Seconds since Unix epoch
    pub secs: u64,
    /// Nanoseconds within the second
    pub nanos: u32,
}

impl Timestamp {
    /// Returns the current timestamp
    pub fn now() -> Self {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system time before epoch");
        Self {
            secs: now.as_secs(),
            nanos: now.subsec_nanos(),
        }
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.secs
            .cmp(&other.secs)
            .then_with(|| self.nanos.cmp(&other.nanos))
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A snapshot created directly at a namespace node.
///
/// The visibility algebra only looks at `snapid`; name and stamp are
/// descriptive metadata carried for clients and durability collaborators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapInfo {
    /// The snapshot's identifier.
    pub snapid: SnapId,
    /// Human-readable snapshot name.
    pub name: String,
    /// Creation time.
    pub stamp: Timestamp,
}

impl SnapInfo {
    /// Creates a new SnapInfo stamped with the current time.
    pub fn new(snapid: SnapId, name: impl Into<String>) -> Self {
        Self {
            snapid,
            name: name.into(),
            stamp: Timestamp::now(),
        }
    }
}

/// A historical parent link: during a bounded past interval of snap IDs,
/// the realm's effective parent was the realm owned by `dirino`.
///
/// Stored in a realm's `past_parents` map keyed by the *last* snap ID of
/// the interval; `first` here is the lower bound, so the entry covers the
/// inclusive interval `[first, key]`. The referenced former parent is
/// identified by namespace node, not by a live link, and is resolved
/// lazily once resident.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapLink {
    /// First snap ID covered by this historical parent.
    pub first: SnapId,
    /// Namespace node owning the former parent realm.
    pub dirino: InodeId,
}

/// Error types for snapshot-realm operations.
///
/// Residency misses are not represented here: "not yet resident" is a
/// control-flow outcome (`Residency::Pending`), never an error. These
/// variants are invariant violations or lifecycle refusals; none of them
/// is retried, and the invariant violations indicate the surrounding
/// metadata state is already inconsistent.
#[derive(Debug, thiserror::Error)]
pub enum RealmError {
    /// No realm is open for the named inode.
    #[error("no snap realm open for inode {0}")]
    RealmNotFound(InodeId),

    /// A historical parent was dereferenced before residency was ensured.
    #[error("past parent {dirino} of realm {realm} is not resident")]
    ParentNotResident {
        /// Realm whose past_parents entry was being resolved
        realm: InodeId,
        /// The non-resident former parent node
        dirino: InodeId,
    },

    /// The realm parent chain loops back on itself.
    #[error("realm parent chain cycles at inode {0}")]
    RealmCycle(InodeId),

    /// An upward namespace walk revisited a node without terminating.
    #[error("namespace parent walk from inode {0} cycled")]
    NamespaceCycle(InodeId),

    /// A snapshot ID was recorded out of monotonic order.
    #[error("snap id {creating} is not newer than highwater {highwater}")]
    SnapIdNotMonotonic {
        /// The ID being recorded
        creating: SnapId,
        /// The newest ID already known to the realm
        highwater: SnapId,
    },

    /// A split target whose owning node is not inside the realm being split.
    #[error("split target {child} is not under realm {realm}")]
    SplitTargetNotUnder {
        /// Realm being split
        realm: InodeId,
        /// The proposed new boundary realm's owning node
        child: InodeId,
    },

    /// The realm still holds children, cap holders, or snapshot history.
    #[error("realm {0} is still in use")]
    RealmInUse(InodeId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snap_id_ordering() {
        assert!(SnapId::ZERO < SnapId::new(1));
        assert!(SnapId::new(7) < SnapId::NOSNAP);
        assert_eq!(SnapId::new(3), SnapId::new(3));
    }

    #[test]
    fn test_snap_id_successor() {
        assert_eq!(SnapId::new(4).successor(), SnapId::new(5));
        assert_eq!(SnapId::NOSNAP.successor(), SnapId::NOSNAP);
    }

    #[test]
    fn test_snap_id_in_interval() {
        let first = SnapId::new(2);
        let last = SnapId::new(5);
        assert!(SnapId::new(2).in_interval(first, last));
        assert!(SnapId::new(5).in_interval(first, last));
        assert!(!SnapId::new(1).in_interval(first, last));
        assert!(!SnapId::new(6).in_interval(first, last));
    }

    #[test]
    fn test_snap_id_display() {
        assert_eq!(format!("{}", SnapId::new(42)), "42");
        assert_eq!(format!("{}", SnapId::NOSNAP), "NOSNAP");
    }

    #[test]
    fn test_inode_id_root() {
        assert_eq!(InodeId::ROOT_INODE.as_u64(), 1);
    }

    #[test]
    fn test_snap_info_new() {
        let info = SnapInfo::new(SnapId::new(9), "nightly");
        assert_eq!(info.snapid, SnapId::new(9));
        assert_eq!(info.name, "nightly");
        assert!(info.stamp.secs > 1700000000);
    }

    #[test]
    fn test_snap_link_serde_roundtrip() {
        let link = SnapLink {
            first: SnapId::new(2),
            dirino: InodeId::new(10),
        };
        let encoded = bincode::serialize(&link).unwrap();
        let decoded: SnapLink = bincode::deserialize(&encoded).unwrap();
        assert_eq!(link, decoded);
    }

    #[test]
    fn test_realm_error_display() {
        let err = RealmError::SnapIdNotMonotonic {
            creating: SnapId::new(3),
            highwater: SnapId::new(7),
        };
        assert_eq!(format!("{}", err), "snap id 3 is not newer than highwater 7");
        let err = RealmError::RealmNotFound(InodeId::new(12));
        assert_eq!(format!("{}", err), "no snap realm open for inode 12");
        let err = RealmError::SplitTargetNotUnder {
            realm: InodeId::new(1),
            child: InodeId::new(9),
        };
        assert_eq!(format!("{}", err), "split target 9 is not under realm 1");
    }
}
