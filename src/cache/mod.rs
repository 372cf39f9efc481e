//! Query cache: per-signature fetch state, subscriptions and refetch policy.
//!
//! This module provides a fetcher-agnostic cache that:
//! - Keeps one entry per request signature with a fetch state machine
//! - Reference-counts subscribers and removes unused entries after a grace period
//! - Deduplicates in-flight fetches and discards superseded results
//! - Refetches on lifecycle signals and polling timers per the effective policy

mod client;
mod entry;
mod key;
mod policy;
mod registry;
mod subscription;

pub use client::{CacheValue, EntrySummary, QueryArgs, QueryCache};
pub use entry::{CacheEntry, QueryResult, QueryStatus, RequestId, Settlement};
pub use key::{hash_key, QueryKey, QuerySignature, SerdeKey};
pub use policy::{
  resolve_flag, resolve_interval, CacheConfig, EffectivePolicy, EndpointConfig, Overrides,
  RefetchOnMount, DEFAULT_KEEP_UNUSED_FOR,
};
pub use registry::{ConsumerId, SubscriptionRegistry};
pub use subscription::Subscription;
