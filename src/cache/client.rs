//! Query cache that orchestrates subscriptions, fetching and cleanup.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

use super::entry::{CacheEntry, QueryResult, QueryStatus, RequestId, Settlement};
use super::key::{QueryKey, QuerySignature};
use super::policy::{CacheConfig, EffectivePolicy, EndpointConfig, Overrides};
use super::registry::{ConsumerId, SubscriptionRegistry};
use super::subscription::Subscription;
use crate::error::CacheError;
use crate::lifecycle::{Dispatch, LifecycleSignal};

/// Request descriptors accepted by the cache.
pub trait QueryArgs: QueryKey + Clone + Send + Sync + 'static {}

impl<R: QueryKey + Clone + Send + Sync + 'static> QueryArgs for R {}

/// Values the cache stores: fetched data and fetch errors.
pub trait CacheValue: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> CacheValue for T {}

type FetcherFn<R, T, E> = Arc<dyn Fn(R) -> BoxFuture<'static, Result<T, E>> + Send + Sync>;

struct Endpoint<R, T, E> {
  fetcher: FetcherFn<R, T, E>,
  config: EndpointConfig,
}

/// A scheduled background task. The token guards against a timer that
/// already woke up acting after it was replaced.
struct Timer {
  token: u64,
  deadline: Instant,
  handle: AbortHandle,
}

struct Slot<R, T, E> {
  entry: CacheEntry<T, E>,
  endpoint: String,
  request: R,
  revision: watch::Sender<u64>,
  removal: Option<Timer>,
  poll: Option<Timer>,
}

impl<R, T, E> Slot<R, T, E> {
  fn new(endpoint: String, request: R) -> Self {
    let (revision, _) = watch::channel(0);
    Self {
      entry: CacheEntry::new(),
      endpoint,
      request,
      revision,
      removal: None,
      poll: None,
    }
  }

  fn notify(&self) {
    self.revision.send_modify(|revision| *revision += 1);
  }

  fn cancel_removal(&mut self) -> bool {
    match self.removal.take() {
      Some(timer) => {
        timer.handle.abort();
        true
      }
      None => false,
    }
  }

  fn cancel_poll(&mut self) {
    if let Some(timer) = self.poll.take() {
      timer.handle.abort();
    }
  }
}

impl<R, T, E> Drop for Slot<R, T, E> {
  fn drop(&mut self) {
    self.cancel_removal();
    self.cancel_poll();
  }
}

struct State<R, T, E> {
  endpoints: HashMap<String, Endpoint<R, T, E>>,
  slots: HashMap<QuerySignature, Slot<R, T, E>>,
  registry: SubscriptionRegistry,
  next_request: RequestId,
  next_consumer: ConsumerId,
  next_timer: u64,
}

impl<R, T, E> State<R, T, E> {
  fn next_timer(&mut self) -> u64 {
    self.next_timer += 1;
    self.next_timer
  }
}

struct Shared<R, T, E> {
  state: Mutex<State<R, T, E>>,
  config: CacheConfig,
  runtime: Handle,
}

/// Summary of one cache entry, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySummary {
  pub signature: QuerySignature,
  pub endpoint: String,
  pub description: String,
  pub status: QueryStatus,
  pub subscriber_count: usize,
}

/// Client-side query cache.
///
/// Each distinct request signature gets one cache entry. Consumers subscribe
/// to signatures; the cache fetches when needed, refetches on lifecycle
/// signals and polling timers, and removes entries a grace period after
/// their last subscriber leaves.
///
/// All state lives behind one lock that is never held across an await, so
/// every transition is visible to readers as soon as the triggering call
/// returns.
pub struct QueryCache<R, T, E> {
  shared: Arc<Shared<R, T, E>>,
}

impl<R, T, E> QueryCache<R, T, E>
where
  R: QueryArgs,
  T: CacheValue,
  E: CacheValue,
{
  /// Create a cache with the given global defaults.
  ///
  /// Must be called from within a tokio runtime; fetches and timers are
  /// spawned onto it.
  pub fn new(config: CacheConfig) -> Result<Self, CacheError> {
    let runtime = Handle::try_current().map_err(|_| CacheError::NoRuntime)?;
    Ok(Self {
      shared: Arc::new(Shared {
        state: Mutex::new(State {
          endpoints: HashMap::new(),
          slots: HashMap::new(),
          registry: SubscriptionRegistry::new(),
          next_request: 0,
          next_consumer: 0,
          next_timer: 0,
        }),
        config,
        runtime,
      }),
    })
  }

  pub fn config(&self) -> &CacheConfig {
    &self.shared.config
  }

  /// Register a named endpoint with its fetcher and defaults.
  ///
  /// The fetcher is called once per issued fetch, with no retries.
  pub fn register_endpoint<F, Fut>(
    &self,
    name: impl Into<String>,
    config: EndpointConfig,
    fetcher: F,
  ) -> Result<(), CacheError>
  where
    F: Fn(R) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
  {
    let name = name.into();
    let mut state = self.shared.lock();
    if state.endpoints.contains_key(&name) {
      return Err(CacheError::DuplicateEndpoint(name));
    }

    let fetcher: FetcherFn<R, T, E> =
      Arc::new(move |request: R| -> BoxFuture<'static, Result<T, E>> { Box::pin(fetcher(request)) });
    debug!(endpoint = %name, "registered endpoint");
    state.endpoints.insert(name, Endpoint { fetcher, config });
    Ok(())
  }

  pub fn signature(&self, endpoint: &str, request: &R) -> QuerySignature {
    QuerySignature::new(endpoint, request)
  }

  /// Subscribe to `request` on `endpoint`.
  ///
  /// Creates the entry on first use and fetches it. An existing entry is
  /// reused: a pending removal is cancelled and cached data is served
  /// unless the mount policy asks for a refetch. A fetch already in flight
  /// is never duplicated.
  pub fn subscribe(
    &self,
    endpoint: &str,
    request: R,
    overrides: Overrides,
  ) -> Result<Subscription<R, T, E>, CacheError> {
    let shared = &self.shared;
    let signature = QuerySignature::new(endpoint, &request);

    let mut state = shared.lock();
    let endpoint_config = state
      .endpoints
      .get(endpoint)
      .map(|e| e.config.clone())
      .ok_or_else(|| CacheError::UnknownEndpoint(endpoint.to_string()))?;

    state.next_consumer += 1;
    let consumer = state.next_consumer;
    let subscribers = state
      .registry
      .register(signature.clone(), consumer, overrides);

    let slot = state
      .slots
      .entry(signature.clone())
      .or_insert_with(|| Slot::new(endpoint.to_string(), request));
    if slot.cancel_removal() {
      debug!(%signature, "reusing entry scheduled for removal");
    }
    slot.entry.retain();
    let revision = slot.revision.subscribe();

    let should_fetch = match slot.entry.status() {
      QueryStatus::Uninitialized => true,
      QueryStatus::Pending => false,
      QueryStatus::Rejected if slot.entry.data().is_none() => true,
      QueryStatus::Fulfilled | QueryStatus::Rejected => endpoint_config
        .mount_policy(&overrides, &shared.config)
        .should_refetch(slot.entry.age()),
    };
    debug!(%signature, consumer, subscribers, should_fetch, "subscribed");

    if should_fetch {
      shared.start_fetch(&mut state, &signature);
    } else {
      shared.arm_polling(&mut state, &signature);
    }
    drop(state);

    Ok(Subscription::new(self.clone(), signature, consumer, revision))
  }

  /// Remove a consumer's registration.
  ///
  /// When the last consumer leaves, the entry is removed after the grace
  /// period unless someone subscribes again first. An in-flight fetch is not
  /// cancelled. Returns false if the consumer was not subscribed.
  pub fn unsubscribe(&self, signature: &QuerySignature, consumer: ConsumerId) -> bool {
    let shared = &self.shared;
    let mut state = shared.lock();
    let Some(remaining) = state.registry.unregister(signature, consumer) else {
      return false;
    };
    if let Some(slot) = state.slots.get_mut(signature) {
      slot.entry.release();
    }
    debug!(%signature, consumer, remaining, "unsubscribed");

    if remaining == 0 {
      shared.schedule_removal(&mut state, signature);
    } else {
      shared.arm_polling(&mut state, signature);
    }
    true
  }

  /// Replace one consumer's overrides. The effective policy is re-resolved
  /// the next time it is needed.
  pub fn update_overrides(
    &self,
    signature: &QuerySignature,
    consumer: ConsumerId,
    overrides: Overrides,
  ) -> bool {
    let shared = &self.shared;
    let mut state = shared.lock();
    if !state.registry.update(signature, consumer, overrides) {
      return false;
    }
    shared.arm_polling(&mut state, signature);
    true
  }

  /// Refetch a subscribed entry now. Ignored while a fetch is in flight.
  pub fn refetch(&self, signature: &QuerySignature) -> bool {
    let shared = &self.shared;
    let mut state = shared.lock();
    if state.registry.count(signature) == 0 {
      return false;
    }
    shared.start_fetch(&mut state, signature)
  }

  /// React to a lifecycle signal.
  ///
  /// Every settled entry with at least one subscriber whose effective policy
  /// enables this signal is refetched. Returns how many fetches started.
  pub fn on_lifecycle_signal(&self, signal: LifecycleSignal) -> usize {
    let shared = &self.shared;
    let mut state = shared.lock();

    let targets: Vec<QuerySignature> = state
      .registry
      .active_signatures()
      .into_iter()
      .filter(|signature| {
        let settled = state
          .slots
          .get(*signature)
          .is_some_and(|slot| slot.entry.status().is_settled());
        let enabled = shared
          .effective_policy(&state, signature)
          .is_some_and(|policy| policy.refetch_on(signal));
        trace!(%signature, %signal, settled, enabled, "evaluated refetch policy");
        settled && enabled
      })
      .cloned()
      .collect();

    let started = targets
      .iter()
      .filter(|signature| shared.start_fetch(&mut state, signature))
      .count();
    debug!(%signal, started, "handled lifecycle signal");
    started
  }

  /// A `Dispatch` that forwards lifecycle signals to this cache.
  pub fn dispatcher(&self) -> Dispatch {
    let cache = self.clone();
    Arc::new(move |signal: LifecycleSignal| {
      cache.on_lifecycle_signal(signal);
    })
  }

  /// Current state of `signature`. Missing entries read as uninitialized.
  pub fn read(&self, signature: &QuerySignature) -> QueryResult<T, E> {
    self
      .shared
      .lock()
      .slots
      .get(signature)
      .map(|slot| QueryResult::from(&slot.entry))
      .unwrap_or_else(QueryResult::uninitialized)
  }

  pub fn contains(&self, signature: &QuerySignature) -> bool {
    self.shared.lock().slots.contains_key(signature)
  }

  pub fn subscriber_count(&self, signature: &QuerySignature) -> usize {
    self
      .shared
      .lock()
      .slots
      .get(signature)
      .map_or(0, |slot| slot.entry.subscriber_count())
  }

  /// The effective policy of `signature` given its current subscribers.
  pub fn effective_policy(&self, signature: &QuerySignature) -> Option<EffectivePolicy> {
    let state = self.shared.lock();
    self.shared.effective_policy(&state, signature)
  }

  /// Every entry, ordered by signature.
  pub fn snapshot(&self) -> Vec<EntrySummary> {
    let state = self.shared.lock();
    let mut entries: Vec<EntrySummary> = state
      .slots
      .iter()
      .map(|(signature, slot)| EntrySummary {
        signature: signature.clone(),
        endpoint: slot.endpoint.clone(),
        description: slot.request.description(),
        status: slot.entry.status(),
        subscriber_count: state.registry.count(signature),
      })
      .collect();
    entries.sort_by(|a, b| a.signature.cmp(&b.signature));
    entries
  }

  /// Drop every entry, registration and timer. Results of fetches still in
  /// flight are discarded when they arrive.
  pub fn reset(&self) {
    let mut state = self.shared.lock();
    let removed = state.slots.len();
    state.slots.clear();
    state.registry.clear();
    debug!(removed, "reset query cache");
  }
}

impl<R, T, E> Shared<R, T, E>
where
  R: QueryArgs,
  T: CacheValue,
  E: CacheValue,
{
  fn lock(&self) -> MutexGuard<'_, State<R, T, E>> {
    // Critical sections never panic midway, so a poisoned lock is still consistent
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn effective_policy(
    &self,
    state: &State<R, T, E>,
    signature: &QuerySignature,
  ) -> Option<EffectivePolicy> {
    let slot = state.slots.get(signature)?;
    let endpoint = state.endpoints.get(&slot.endpoint)?;
    let overrides = state.registry.overrides(signature);
    Some(EffectivePolicy::resolve(
      overrides.iter().copied(),
      &endpoint.config,
      &self.config,
    ))
  }

  /// Move the entry to pending and spawn its fetch. Returns false when a
  /// fetch is already in flight or the entry is gone.
  fn start_fetch(self: &Arc<Self>, state: &mut State<R, T, E>, signature: &QuerySignature) -> bool {
    state.next_request += 1;
    let request_id = state.next_request;

    let Some(slot) = state.slots.get_mut(signature) else {
      return false;
    };
    let Some(endpoint) = state.endpoints.get(&slot.endpoint) else {
      return false;
    };
    if let Err(e) = slot.entry.start(request_id) {
      trace!(%signature, error = %e, "fetch suppressed");
      return false;
    }
    slot.cancel_poll();
    slot.notify();

    let fetcher = Arc::clone(&endpoint.fetcher);
    let request = slot.request.clone();
    debug!(%signature, request_id, "fetch started");

    let shared = Arc::clone(self);
    let signature = signature.clone();
    self.runtime.spawn(async move {
      let outcome = fetcher(request).await;
      shared.settle(&signature, request_id, outcome);
    });
    true
  }

  fn settle(self: &Arc<Self>, signature: &QuerySignature, request_id: RequestId, outcome: Result<T, E>) {
    let mut state = self.lock();
    let Some(slot) = state.slots.get_mut(signature) else {
      debug!(%signature, request_id, "discarding result for removed entry");
      return;
    };

    let rejected = outcome.is_err();
    let settlement = match outcome {
      Ok(data) => slot.entry.fulfill(request_id, data),
      Err(error) => slot.entry.reject(request_id, error),
    };
    if settlement == Settlement::Superseded {
      debug!(%signature, request_id, "discarding superseded result");
      return;
    }

    if rejected {
      warn!(%signature, request_id, "fetch rejected");
    } else {
      debug!(%signature, request_id, "fetch fulfilled");
    }
    slot.notify();
    self.arm_polling(&mut state, signature);
  }

  /// Bring the poll timer in line with the current effective interval.
  ///
  /// A running timer is kept unless the new interval would fire earlier, so
  /// subscriber churn never postpones a due poll.
  fn arm_polling(self: &Arc<Self>, state: &mut State<R, T, E>, signature: &QuerySignature) {
    let token = state.next_timer();
    let subscribers = state.registry.count(signature);
    let interval = self
      .effective_policy(state, signature)
      .and_then(|policy| policy.polling_interval);

    let Some(slot) = state.slots.get_mut(signature) else {
      return;
    };

    let Some(interval) = interval.filter(|_| subscribers > 0 && slot.entry.status().is_settled())
    else {
      slot.cancel_poll();
      return;
    };

    let deadline = Instant::now() + interval;
    if slot
      .poll
      .as_ref()
      .is_some_and(|timer| timer.deadline <= deadline)
    {
      return;
    }
    slot.cancel_poll();

    let weak = Arc::downgrade(self);
    let timer_signature = signature.clone();
    let handle = self
      .runtime
      .spawn(async move {
        tokio::time::sleep(interval).await;
        if let Some(shared) = weak.upgrade() {
          shared.poll_elapsed(&timer_signature, token);
        }
      })
      .abort_handle();
    slot.poll = Some(Timer {
      token,
      deadline,
      handle,
    });
    trace!(%signature, interval_ms = interval.as_millis() as u64, "armed poll timer");
  }

  fn poll_elapsed(self: &Arc<Self>, signature: &QuerySignature, token: u64) {
    let mut state = self.lock();
    let Some(slot) = state.slots.get_mut(signature) else {
      return;
    };
    if slot.poll.as_ref().map(|timer| timer.token) != Some(token) {
      return;
    }
    slot.poll = None;

    if state.registry.count(signature) == 0 {
      return;
    }
    debug!(%signature, "polling interval elapsed");
    self.start_fetch(&mut state, signature);
  }

  fn schedule_removal(self: &Arc<Self>, state: &mut State<R, T, E>, signature: &QuerySignature) {
    let token = state.next_timer();
    let Some(slot) = state.slots.get_mut(signature) else {
      return;
    };
    let grace: Duration = state
      .endpoints
      .get(&slot.endpoint)
      .map_or(self.config.keep_unused_for, |endpoint| {
        endpoint.config.grace_period(&self.config)
      });

    slot.cancel_poll();
    slot.cancel_removal();

    let weak = Arc::downgrade(self);
    let timer_signature = signature.clone();
    let handle = self
      .runtime
      .spawn(async move {
        tokio::time::sleep(grace).await;
        if let Some(shared) = weak.upgrade() {
          shared.removal_elapsed(&timer_signature, token);
        }
      })
      .abort_handle();
    slot.removal = Some(Timer {
      token,
      deadline: Instant::now() + grace,
      handle,
    });
    debug!(%signature, grace_ms = grace.as_millis() as u64, "scheduled removal of unused entry");
  }

  fn removal_elapsed(&self, signature: &QuerySignature, token: u64) {
    let mut state = self.lock();
    let is_current = state
      .slots
      .get(signature)
      .and_then(|slot| slot.removal.as_ref())
      .is_some_and(|timer| timer.token == token);
    if !is_current || state.registry.count(signature) > 0 {
      return;
    }

    if let Some(mut slot) = state.slots.remove(signature) {
      // This task is the removal timer; nothing left to abort
      slot.removal = None;
    }
    debug!(%signature, "removed unused entry");
  }
}

impl<R, T, E> Clone for QueryCache<R, T, E> {
  fn clone(&self) -> Self {
    Self {
      shared: Arc::clone(&self.shared),
    }
  }
}
