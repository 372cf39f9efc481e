//! Request signatures.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

/// A request descriptor that can be turned into a stable cache key.
///
/// Equal descriptors must produce equal hashes.
pub trait QueryKey {
  /// Stable, deterministic key for this request.
  fn cache_hash(&self) -> String;

  /// Human readable description, used in logs.
  fn description(&self) -> String {
    self.cache_hash()
  }
}

impl QueryKey for () {
  fn cache_hash(&self) -> String {
    String::new()
  }

  fn description(&self) -> String {
    "no arguments".to_string()
  }
}

impl QueryKey for String {
  fn cache_hash(&self) -> String {
    hash_key(self)
  }

  fn description(&self) -> String {
    self.clone()
  }
}

impl QueryKey for u64 {
  fn cache_hash(&self) -> String {
    self.to_string()
  }
}

/// Any serializable request, keyed by its canonical JSON form.
///
/// Object keys are sorted before hashing, so field order never changes the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerdeKey<T>(pub T);

impl<T: Serialize> QueryKey for SerdeKey<T> {
  fn cache_hash(&self) -> String {
    hash_key(&canonical_json(&self.0))
  }

  fn description(&self) -> String {
    canonical_json(&self.0)
  }
}

fn canonical_json<T: Serialize>(value: &T) -> String {
  // serde_json::Value maps are ordered by key
  match serde_json::to_value(value) {
    Ok(value) => value.to_string(),
    Err(e) => format!("unserializable:{}", e),
  }
}

/// SHA256 hash for stable, fixed-length keys.
pub fn hash_key(input: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(input.as_bytes());
  hex::encode(hasher.finalize())
}

/// Identifies one cache entry: the endpoint name plus the request's key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuerySignature(String);

impl QuerySignature {
  pub fn new<R: QueryKey + ?Sized>(endpoint: &str, request: &R) -> Self {
    Self(format!("{}({})", endpoint, request.cache_hash()))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for QuerySignature {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_equal_requests_share_a_signature() {
    let a = QuerySignature::new("posts", &"page=1".to_string());
    let b = QuerySignature::new("posts", &"page=1".to_string());
    let c = QuerySignature::new("users", &"page=1".to_string());

    assert_eq!(a, b);
    assert_ne!(a, c);
  }

  #[test]
  fn test_serde_key_ignores_field_order() {
    let a = SerdeKey(json!({"page": 1, "filter": "open"}));
    let b = SerdeKey(json!({"filter": "open", "page": 1}));

    assert_eq!(a.cache_hash(), b.cache_hash());
    assert_eq!(a.description(), r#"{"filter":"open","page":1}"#);
  }

  #[test]
  fn test_hash_key_is_fixed_length_hex() {
    let hash = hash_key("anything");
    assert_eq!(hash.len(), 64);
    assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
  }

  #[test]
  fn test_unit_request_signature() {
    assert_eq!(QuerySignature::new("getCount", &()).as_str(), "getCount()");
  }
}
