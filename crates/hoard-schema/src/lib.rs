//! Shared data model for the hoard package store.
//!
//! Everything that crosses the boundary between the installer, the store
//! controller and its collaborators (resolver, transport, lockfile) lives
//! here, so that each side agrees on identity and serialization.

pub mod hash;
pub mod selector;
pub mod types;

// Re-exports
pub use hash::*;
pub use selector::VersionSelector;
pub use types::*;

/// Tag used when a wanted dependency names no version at all.
pub const DEFAULT_TAG: &str = "latest";
