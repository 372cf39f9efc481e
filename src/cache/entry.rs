//! Per-signature fetch state machine.
//!
//! ```text
//! uninitialized --start--> pending --fulfill--> fulfilled
//!                             |                    |
//!                             +----reject----> rejected
//! fulfilled|rejected --start--> pending (previous data/error stay visible)
//! ```

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::{Duration, Instant};

use crate::error::CacheError;

/// Identifies one issued fetch. Only the latest one may settle an entry.
pub type RequestId = u64;

/// Fetch status of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryStatus {
  /// No fetch has been issued
  Uninitialized,
  /// A fetch is in flight
  Pending,
  /// The latest fetch succeeded
  Fulfilled,
  /// The latest fetch failed
  Rejected,
}

impl QueryStatus {
  pub fn is_settled(self) -> bool {
    matches!(self, QueryStatus::Fulfilled | QueryStatus::Rejected)
  }
}

impl fmt::Display for QueryStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      QueryStatus::Uninitialized => write!(f, "uninitialized"),
      QueryStatus::Pending => write!(f, "pending"),
      QueryStatus::Fulfilled => write!(f, "fulfilled"),
      QueryStatus::Rejected => write!(f, "rejected"),
    }
  }
}

/// Whether a settlement was applied to the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Settlement {
  Applied,
  /// The result belonged to an older request and was discarded
  Superseded,
}

/// Cached state for one query signature.
#[derive(Debug, Clone)]
pub struct CacheEntry<T, E> {
  status: QueryStatus,
  data: Option<T>,
  error: Option<E>,
  request_id: Option<RequestId>,
  started_at: Option<DateTime<Utc>>,
  fulfilled_at: Option<DateTime<Utc>>,
  rejected_at: Option<DateTime<Utc>>,
  settled: Option<Instant>,
  subscriber_count: usize,
}

impl<T, E> CacheEntry<T, E> {
  pub fn new() -> Self {
    Self {
      status: QueryStatus::Uninitialized,
      data: None,
      error: None,
      request_id: None,
      started_at: None,
      fulfilled_at: None,
      rejected_at: None,
      settled: None,
      subscriber_count: 0,
    }
  }

  pub fn status(&self) -> QueryStatus {
    self.status
  }

  pub fn data(&self) -> Option<&T> {
    self.data.as_ref()
  }

  pub fn error(&self) -> Option<&E> {
    self.error.as_ref()
  }

  pub fn request_id(&self) -> Option<RequestId> {
    self.request_id
  }

  pub fn started_at(&self) -> Option<DateTime<Utc>> {
    self.started_at
  }

  pub fn fulfilled_at(&self) -> Option<DateTime<Utc>> {
    self.fulfilled_at
  }

  pub fn rejected_at(&self) -> Option<DateTime<Utc>> {
    self.rejected_at
  }

  pub fn subscriber_count(&self) -> usize {
    self.subscriber_count
  }

  /// First fetch: pending with nothing to show yet.
  pub fn is_loading(&self) -> bool {
    self.status == QueryStatus::Pending && self.data.is_none()
  }

  pub fn is_fetching(&self) -> bool {
    self.status == QueryStatus::Pending
  }

  /// Time since the last settlement, if any.
  pub fn age(&self) -> Option<Duration> {
    self.settled.map(|t| t.elapsed())
  }

  /// Move to `pending` for `request_id`.
  ///
  /// Fails if a fetch is already in flight. Data and error from the previous
  /// settlement are kept so readers still see them while refetching.
  pub fn start(&mut self, request_id: RequestId) -> Result<(), CacheError> {
    if self.status == QueryStatus::Pending {
      return Err(CacheError::InvalidTransition {
        from: self.status,
        event: "start",
      });
    }
    self.status = QueryStatus::Pending;
    self.request_id = Some(request_id);
    self.started_at = Some(Utc::now());
    Ok(())
  }

  /// Settle the in-flight request `request_id` successfully.
  pub fn fulfill(&mut self, request_id: RequestId, data: T) -> Settlement {
    if !self.is_current(request_id) {
      return Settlement::Superseded;
    }
    self.status = QueryStatus::Fulfilled;
    self.data = Some(data);
    self.error = None;
    self.fulfilled_at = Some(Utc::now());
    self.settled = Some(Instant::now());
    Settlement::Applied
  }

  /// Settle the in-flight request `request_id` with a failure.
  ///
  /// Previously fetched data is retained.
  pub fn reject(&mut self, request_id: RequestId, error: E) -> Settlement {
    if !self.is_current(request_id) {
      return Settlement::Superseded;
    }
    self.status = QueryStatus::Rejected;
    self.error = Some(error);
    self.rejected_at = Some(Utc::now());
    self.settled = Some(Instant::now());
    Settlement::Applied
  }

  pub(crate) fn retain(&mut self) -> usize {
    self.subscriber_count += 1;
    self.subscriber_count
  }

  pub(crate) fn release(&mut self) -> usize {
    self.subscriber_count = self.subscriber_count.saturating_sub(1);
    self.subscriber_count
  }

  fn is_current(&self, request_id: RequestId) -> bool {
    self.status == QueryStatus::Pending && self.request_id == Some(request_id)
  }
}

impl<T, E> Default for CacheEntry<T, E> {
  fn default() -> Self {
    Self::new()
  }
}

/// Immutable snapshot of a cache entry, as handed to consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult<T, E> {
  pub status: QueryStatus,
  pub data: Option<T>,
  pub error: Option<E>,
  pub is_loading: bool,
  pub is_fetching: bool,
  pub fulfilled_at: Option<DateTime<Utc>>,
  pub rejected_at: Option<DateTime<Utc>>,
}

impl<T, E> QueryResult<T, E> {
  /// The result for a signature with no cache entry.
  pub fn uninitialized() -> Self {
    Self {
      status: QueryStatus::Uninitialized,
      data: None,
      error: None,
      is_loading: false,
      is_fetching: false,
      fulfilled_at: None,
      rejected_at: None,
    }
  }

  pub fn is_uninitialized(&self) -> bool {
    self.status == QueryStatus::Uninitialized
  }

  pub fn is_success(&self) -> bool {
    self.status == QueryStatus::Fulfilled
  }

  pub fn is_error(&self) -> bool {
    self.status == QueryStatus::Rejected
  }
}

impl<T: Clone, E: Clone> From<&CacheEntry<T, E>> for QueryResult<T, E> {
  fn from(entry: &CacheEntry<T, E>) -> Self {
    Self {
      status: entry.status,
      data: entry.data.clone(),
      error: entry.error.clone(),
      is_loading: entry.is_loading(),
      is_fetching: entry.is_fetching(),
      fulfilled_at: entry.fulfilled_at,
      rejected_at: entry.rejected_at,
    }
  }
}
