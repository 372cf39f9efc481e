use color_eyre::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use super::source::{EventSource, HostEvent, Listener, ListenerId};
use super::{Dispatch, LifecycleSignal};

/// Host events listened to by default, and the signal each one becomes.
const DEFAULT_ROUTES: [(HostEvent, LifecycleSignal); 3] = [
  (HostEvent::Focus, LifecycleSignal::BecameActive),
  (HostEvent::Visible, LifecycleSignal::BecameActive),
  (HostEvent::Online, LifecycleSignal::Reconnected),
];

/// Cleanup returned by a listener setup.
pub struct Teardown(Box<dyn FnOnce() + Send>);

impl Teardown {
  pub fn new<F>(f: F) -> Self
  where
    F: FnOnce() + Send + 'static,
  {
    Self(Box::new(f))
  }

  pub fn noop() -> Self {
    Self::new(|| {})
  }

  fn run(self) {
    (self.0)()
  }
}

/// Replaces the default listeners. It decides which host events to listen
/// to and must call the dispatch function with the normalized signals.
pub type CustomHandler = Box<dyn FnOnce(Dispatch, Arc<dyn EventSource>) -> Result<Teardown>>;

/// Owner of listener registrations on one event source.
pub struct LifecycleBus {
  source: Arc<dyn EventSource>,
  installed: Arc<AtomicBool>,
}

impl LifecycleBus {
  pub fn new(source: Arc<dyn EventSource>) -> Self {
    Self {
      source,
      installed: Arc::new(AtomicBool::new(false)),
    }
  }

  /// Whether the default listeners are currently registered.
  pub fn is_installed(&self) -> bool {
    self.installed.load(Ordering::SeqCst)
  }

  /// Register listeners that forward lifecycle signals to `dispatch`.
  ///
  /// Without a custom handler, the default listeners are installed at most
  /// once per bus; later calls get an inert handle until the first handle is
  /// released. With a custom handler, the handler alone chooses what to
  /// listen to. If it fails, the error is returned and anything it
  /// registered is removed again.
  pub fn setup_listeners(
    &self,
    dispatch: Dispatch,
    custom: Option<CustomHandler>,
  ) -> Result<ListenerHandle> {
    match custom {
      Some(handler) => self.install_custom(dispatch, handler),
      None => Ok(self.install_defaults(dispatch)),
    }
  }

  fn install_defaults(&self, dispatch: Dispatch) -> ListenerHandle {
    if self
      .installed
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_err()
    {
      debug!("default lifecycle listeners already installed");
      return ListenerHandle::new(Teardown::noop());
    }

    let ids: Vec<ListenerId> = DEFAULT_ROUTES
      .iter()
      .map(|&(event, signal)| {
        let dispatch = Arc::clone(&dispatch);
        let listener: Listener = Arc::new(move || dispatch(signal));
        self.source.add_listener(event, listener)
      })
      .collect();
    debug!(count = ids.len(), "installed default lifecycle listeners");

    let source = Arc::clone(&self.source);
    let installed = Arc::clone(&self.installed);
    ListenerHandle::new(Teardown::new(move || {
      for id in ids {
        source.remove_listener(id);
      }
      installed.store(false, Ordering::SeqCst);
      debug!("removed default lifecycle listeners");
    }))
  }

  fn install_custom(&self, dispatch: Dispatch, handler: CustomHandler) -> Result<ListenerHandle> {
    let tracking = Arc::new(TrackingSource::new(Arc::clone(&self.source)));

    let shared: Arc<dyn EventSource> = tracking.clone();
    match handler(dispatch, shared) {
      Ok(teardown) => Ok(ListenerHandle::new(Teardown::new(move || {
        teardown.run();
        tracking.remove_all();
      }))),
      Err(e) => {
        tracking.remove_all();
        Err(e)
      }
    }
  }
}

/// Forwards to the real source while remembering what was registered, so a
/// custom handler can never leave listeners behind.
struct TrackingSource {
  inner: Arc<dyn EventSource>,
  ids: Mutex<Vec<ListenerId>>,
}

impl TrackingSource {
  fn new(inner: Arc<dyn EventSource>) -> Self {
    Self {
      inner,
      ids: Mutex::new(Vec::new()),
    }
  }

  fn ids(&self) -> MutexGuard<'_, Vec<ListenerId>> {
    self.ids.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn remove_all(&self) {
    let ids = std::mem::take(&mut *self.ids());
    for id in ids {
      self.inner.remove_listener(id);
    }
  }
}

impl EventSource for TrackingSource {
  fn add_listener(&self, event: HostEvent, listener: Listener) -> ListenerId {
    let id = self.inner.add_listener(event, listener);
    self.ids().push(id);
    id
  }

  fn remove_listener(&self, id: ListenerId) -> bool {
    self.ids().retain(|tracked| *tracked != id);
    self.inner.remove_listener(id)
  }
}

/// Handle to registered lifecycle listeners.
///
/// `unsubscribe` removes everything the setup registered; calling it again
/// does nothing. Dropping the handle unsubscribes as well.
#[must_use = "dropping the handle removes the listeners"]
pub struct ListenerHandle {
  teardown: Mutex<Option<Teardown>>,
}

impl ListenerHandle {
  fn new(teardown: Teardown) -> Self {
    Self {
      teardown: Mutex::new(Some(teardown)),
    }
  }

  pub fn unsubscribe(&self) {
    let teardown = self
      .teardown
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take();
    if let Some(teardown) = teardown {
      teardown.run();
    }
  }

  pub fn is_active(&self) -> bool {
    self
      .teardown
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .is_some()
  }
}

impl Drop for ListenerHandle {
  fn drop(&mut self) {
    self.unsubscribe();
  }
}
