//! Client-side data-fetching cache.
//!
//! Two engines work together:
//! - [`entity`]: normalized collections with CRUD operations and selectors
//! - [`cache`]: a query cache tracking fetch status, cached results and
//!   subscribers per request signature, refetching on [`lifecycle`] signals
//!
//! # Example
//!
//! ```ignore
//! let cache: QueryCache<(), Vec<Todo>, String> = QueryCache::new(CacheConfig::default())?;
//! cache.register_endpoint("todos", EndpointConfig::default(), move |_| {
//!     let http = http.clone();
//!     async move { http.todos().await.map_err(|e| e.to_string()) }
//! })?;
//!
//! let bus = LifecycleBus::new(source);
//! let _listeners = bus.setup_listeners(cache.dispatcher(), None)?;
//!
//! let mut todos = cache.subscribe("todos", (), Overrides::default())?;
//! let result = todos.settled().await;
//! ```

pub mod cache;
pub mod config;
pub mod entity;
pub mod error;
pub mod lifecycle;

pub use cache::{
  CacheConfig, EndpointConfig, Overrides, QueryCache, QueryKey, QueryResult, QuerySignature,
  QueryStatus, RefetchOnMount, Subscription,
};
pub use entity::{EntityAdapter, EntitySelectors, EntityState, Merge};
pub use error::CacheError;
pub use lifecycle::{
  Dispatch, EventSource, HostEvent, LifecycleBus, LifecycleSignal, ListenerHandle,
  ManualEventSource,
};
