//! Normalized entity collections.
//!
//! This module provides a keyed collection abstraction that:
//! - Stores records once, keyed by an id derived from each record
//! - Preserves insertion order (or a caller-supplied sort order) in `ids`
//! - Offers CRUD and batch operations through an `EntityAdapter`
//! - Exposes read-only selectors that locate a collection inside any
//!   enclosing state shape

mod adapter;
mod merge;
mod selectors;
mod state;

pub use adapter::EntityAdapter;
pub use merge::Merge;
pub use selectors::EntitySelectors;
pub use state::EntityState;
