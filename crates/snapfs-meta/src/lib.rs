#![warn(missing_docs)]

//! SnapFS metadata subsystem: snapshot realms, visibility computation, realm splitting
//!
//! A snap realm is the unit of snapshot-visibility scope attached to a
//! namespace node. This crate owns the realm graph and the algebra that
//! answers "which snapshot IDs are visible here?" as the namespace is
//! restructured and snapshots are created. The namespace tree, durable
//! persistence, capability semantics, and the retry scheduler are
//! collaborators consumed through the traits in [`namespace`] and
//! [`resolver`].

pub mod algebra;
pub mod namespace;
pub mod realm;
pub mod registry;
pub mod resolver;
pub mod types;
