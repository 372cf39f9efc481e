use thiserror::Error;

use crate::cache::QueryStatus;

/// Errors raised by the query cache itself.
///
/// Fetch failures are not errors here: they are stored on the cache entry and
/// surfaced through `QueryResult::error`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheError {
  #[error("unknown endpoint: {0}")]
  UnknownEndpoint(String),

  #[error("endpoint already registered: {0}")]
  DuplicateEndpoint(String),

  #[error("cannot {event} a query that is {from}")]
  InvalidTransition {
    from: QueryStatus,
    event: &'static str,
  },

  #[error("the query cache must be created inside a tokio runtime")]
  NoRuntime,
}
