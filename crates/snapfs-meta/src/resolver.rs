//! Residency resolution for realm ancestors.
//!
//! Realm queries can depend on namespace nodes that exist only in durable
//! storage on some other metadata server. The resolver is the collaborator
//! that answers "is this node in memory?" and, when it is not, schedules an
//! asynchronous fetch. The realm subsystem never waits: it reports
//! `Residency::Pending` and the external scheduler re-runs the whole
//! operation once the fetch lands. Residency is monotonic — a node that
//! became resident stays resident for the retry — so the retry loop always
//! terminates.

use std::collections::HashSet;
use std::sync::RwLock;

use crate::types::InodeId;

/// Opaque token identifying a suspended logical operation.
///
/// Handed to the resolver when a fetch is scheduled; the external
/// scheduler uses it to re-invoke the operation at most once, strictly
/// after the fetched node becomes resident.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RetryToken(u64);

impl RetryToken {
    /// Creates a token from a raw operation ID.
    pub fn new(id: u64) -> Self {
        RetryToken(id)
    }

    /// Returns the raw operation ID.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Outcome of a single residency probe.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// The node is in memory; safe to dereference its realm now.
    Resident,
    /// The node is not in memory; a fetch tagged with the caller's
    /// RetryToken has been scheduled.
    Pending,
}

/// Outcome of `RealmRegistry::ensure_ancestors_resident`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Residency {
    /// Every live and historical ancestor is resident; snapshot-set
    /// queries on the realm are safe immediately.
    Ready,
    /// The named dependency is not resident. A fetch has been scheduled;
    /// the whole operation must be retried from scratch when the caller's
    /// continuation fires. No partial progress is retained.
    Pending(InodeId),
}

impl Residency {
    /// True for the Ready outcome.
    pub fn is_ready(&self) -> bool {
        matches!(self, Residency::Ready)
    }
}

/// Residency probe and fetch scheduling, implemented by the cache tier.
///
/// The contract: `resolve` returning `Pending` implies a fetch for `ino`
/// has been scheduled and the continuation identified by `retry` will
/// fire at most once, strictly after `ino` becomes resident.
pub trait ResidencyResolver: Send + Sync {
    /// Probes residency of `ino`, scheduling a fetch on a miss.
    fn resolve(&self, ino: InodeId, retry: RetryToken) -> Resolution;
}

/// In-memory resolver with an explicit resident set and fetch log.
///
/// Test double for the cache tier: fetches are queued rather than
/// performed, and `complete_fetches` plays the role of fetch completion,
/// returning the retry tokens whose continuations would fire.
pub struct MemoryResolver {
    resident: RwLock<HashSet<InodeId>>,
    scheduled: RwLock<Vec<(InodeId, RetryToken)>>,
}

impl MemoryResolver {
    /// Creates a resolver with nothing resident.
    pub fn new() -> Self {
        Self {
            resident: RwLock::new(HashSet::new()),
            scheduled: RwLock::new(Vec::new()),
        }
    }

    /// Marks a node resident without a fetch (already-loaded node).
    pub fn insert_resident(&self, ino: InodeId) {
        self.resident.write().unwrap().insert(ino);
    }

    /// Number of fetches scheduled and not yet completed.
    pub fn scheduled_fetches(&self) -> usize {
        self.scheduled.read().unwrap().len()
    }

    /// Completes every scheduled fetch: the fetched nodes become resident
    /// and the tokens of the operations to re-invoke are returned.
    pub fn complete_fetches(&self) -> Vec<RetryToken> {
        let mut scheduled = self.scheduled.write().unwrap();
        let mut resident = self.resident.write().unwrap();
        let mut tokens = Vec::new();
        for (ino, retry) in scheduled.drain(..) {
            resident.insert(ino);
            tokens.push(retry);
        }
        tokens
    }
}

impl Default for MemoryResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ResidencyResolver for MemoryResolver {
    fn resolve(&self, ino: InodeId, retry: RetryToken) -> Resolution {
        if self.resident.read().unwrap().contains(&ino) {
            return Resolution::Resident;
        }
        self.scheduled.write().unwrap().push((ino, retry));
        Resolution::Pending
    }
}
