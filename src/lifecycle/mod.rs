//! Lifecycle signals from the host environment.
//!
//! Host event sources report raw events (focus, visibility, connectivity).
//! The `LifecycleBus` normalizes them into the two signals the query cache
//! reacts to and hands them to a `Dispatch` callback.

mod bus;
mod source;

use std::fmt;
use std::sync::Arc;

pub use bus::{CustomHandler, LifecycleBus, ListenerHandle, Teardown};
pub use source::{EventSource, HostEvent, Listener, ListenerId, ManualEventSource};

/// Internal signals that may trigger refetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleSignal {
  /// The application regained focus or became visible
  BecameActive,
  /// Network connectivity was restored
  Reconnected,
}

impl fmt::Display for LifecycleSignal {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      LifecycleSignal::BecameActive => write!(f, "became_active"),
      LifecycleSignal::Reconnected => write!(f, "reconnected"),
    }
  }
}

/// Receives normalized lifecycle signals.
pub type Dispatch = Arc<dyn Fn(LifecycleSignal) + Send + Sync>;
