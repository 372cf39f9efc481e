use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Raw events reported by a host environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostEvent {
  Focus,
  Visible,
  Hidden,
  Online,
  Offline,
}

pub type Listener = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Somewhere host events come from.
///
/// Registration and removal must be paired: every id returned by
/// `add_listener` is eventually passed to `remove_listener` by its owner.
pub trait EventSource: Send + Sync {
  fn add_listener(&self, event: HostEvent, listener: Listener) -> ListenerId;

  /// Returns false if the id was not registered.
  fn remove_listener(&self, id: ListenerId) -> bool;
}

#[derive(Default)]
struct Registrations {
  next_id: u64,
  listeners: BTreeMap<ListenerId, (HostEvent, Listener)>,
}

/// In-memory event source. Events are raised explicitly with `emit`.
///
/// Used by embedders that learn about focus and connectivity through their
/// own channels, and by the terminal front end.
#[derive(Default)]
pub struct ManualEventSource {
  registrations: Mutex<Registrations>,
}

impl ManualEventSource {
  pub fn new() -> Self {
    Self::default()
  }

  /// Invoke every listener registered for `event`. Returns how many ran.
  pub fn emit(&self, event: HostEvent) -> usize {
    // Listeners run outside the lock so they may (un)register freely
    let listeners: Vec<Listener> = self
      .lock()
      .listeners
      .values()
      .filter(|(kind, _)| *kind == event)
      .map(|(_, listener)| Arc::clone(listener))
      .collect();

    for listener in &listeners {
      listener();
    }
    listeners.len()
  }

  pub fn listener_count(&self) -> usize {
    self.lock().listeners.len()
  }

  pub fn listener_count_for(&self, event: HostEvent) -> usize {
    self
      .lock()
      .listeners
      .values()
      .filter(|(kind, _)| *kind == event)
      .count()
  }

  fn lock(&self) -> MutexGuard<'_, Registrations> {
    self
      .registrations
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }
}

impl EventSource for ManualEventSource {
  fn add_listener(&self, event: HostEvent, listener: Listener) -> ListenerId {
    let mut registrations = self.lock();
    registrations.next_id += 1;
    let id = ListenerId(registrations.next_id);
    registrations.listeners.insert(id, (event, listener));
    id
  }

  fn remove_listener(&self, id: ListenerId) -> bool {
    self.lock().listeners.remove(&id).is_some()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};

  #[test]
  fn test_emit_reaches_matching_listeners_only() {
    let source = ManualEventSource::new();
    let hits = Arc::new(AtomicUsize::new(0));

    let counter = hits.clone();
    let id = source.add_listener(
      HostEvent::Online,
      Arc::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
      }),
    );

    assert_eq!(source.emit(HostEvent::Focus), 0);
    assert_eq!(source.emit(HostEvent::Online), 1);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    assert!(source.remove_listener(id));
    assert!(!source.remove_listener(id));
    assert_eq!(source.emit(HostEvent::Online), 0);
    assert_eq!(source.listener_count(), 0);
  }
}
