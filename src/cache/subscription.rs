use tokio::sync::watch;

use super::client::{CacheValue, QueryArgs, QueryCache};
use super::entry::QueryResult;
use super::key::QuerySignature;
use super::policy::Overrides;
use super::registry::ConsumerId;

/// A consumer's interest in one query signature.
///
/// Holding the subscription keeps the entry alive. Dropping it (or calling
/// `unsubscribe`) releases it, starting the entry's grace period once no
/// other subscriber remains.
pub struct Subscription<R, T, E>
where
  R: QueryArgs,
  T: CacheValue,
  E: CacheValue,
{
  cache: QueryCache<R, T, E>,
  signature: QuerySignature,
  consumer: ConsumerId,
  revision: watch::Receiver<u64>,
  active: bool,
}

impl<R, T, E> Subscription<R, T, E>
where
  R: QueryArgs,
  T: CacheValue,
  E: CacheValue,
{
  pub(crate) fn new(
    cache: QueryCache<R, T, E>,
    signature: QuerySignature,
    consumer: ConsumerId,
    revision: watch::Receiver<u64>,
  ) -> Self {
    Self {
      cache,
      signature,
      consumer,
      revision,
      active: true,
    }
  }

  pub fn signature(&self) -> &QuerySignature {
    &self.signature
  }

  pub fn consumer_id(&self) -> ConsumerId {
    self.consumer
  }

  pub fn read(&self) -> QueryResult<T, E> {
    self.cache.read(&self.signature)
  }

  /// Refetch now. Returns false if a fetch is already in flight.
  pub fn refetch(&self) -> bool {
    self.cache.refetch(&self.signature)
  }

  pub fn update_overrides(&self, overrides: Overrides) -> bool {
    self
      .cache
      .update_overrides(&self.signature, self.consumer, overrides)
  }

  /// Wait for the entry to change.
  ///
  /// Returns false once the entry has been dropped from the cache.
  pub async fn changed(&mut self) -> bool {
    self.revision.changed().await.is_ok()
  }

  /// Wait until no fetch is in flight and return the settled result.
  pub async fn settled(&mut self) -> QueryResult<T, E> {
    loop {
      let result = self.read();
      if result.status.is_settled() {
        return result;
      }
      if !self.changed().await {
        return self.read();
      }
    }
  }

  pub fn unsubscribe(mut self) {
    self.release();
  }

  fn release(&mut self) {
    if std::mem::replace(&mut self.active, false) {
      self.cache.unsubscribe(&self.signature, self.consumer);
    }
  }
}

impl<R, T, E> Drop for Subscription<R, T, E>
where
  R: QueryArgs,
  T: CacheValue,
  E: CacheValue,
{
  fn drop(&mut self) {
    self.release();
  }
}
