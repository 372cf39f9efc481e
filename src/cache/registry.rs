use std::collections::{BTreeMap, HashMap};

use super::key::QuerySignature;
use super::policy::Overrides;

/// Identifies one consumer's subscription.
pub type ConsumerId = u64;

/// Active consumers per signature, with each consumer's overrides.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
  by_signature: HashMap<QuerySignature, BTreeMap<ConsumerId, Overrides>>,
}

impl SubscriptionRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register `consumer` and return the signature's new subscriber count.
  pub fn register(
    &mut self,
    signature: QuerySignature,
    consumer: ConsumerId,
    overrides: Overrides,
  ) -> usize {
    let consumers = self.by_signature.entry(signature).or_default();
    consumers.insert(consumer, overrides);
    consumers.len()
  }

  /// Remove `consumer` and return the remaining count.
  ///
  /// Returns `None` when the consumer was not registered, which makes
  /// repeated unsubscribes harmless.
  pub fn unregister(&mut self, signature: &QuerySignature, consumer: ConsumerId) -> Option<usize> {
    let consumers = self.by_signature.get_mut(signature)?;
    consumers.remove(&consumer)?;
    let remaining = consumers.len();
    if remaining == 0 {
      self.by_signature.remove(signature);
    }
    Some(remaining)
  }

  /// Replace a consumer's overrides. Returns false if it is not registered.
  pub fn update(
    &mut self,
    signature: &QuerySignature,
    consumer: ConsumerId,
    overrides: Overrides,
  ) -> bool {
    match self
      .by_signature
      .get_mut(signature)
      .and_then(|consumers| consumers.get_mut(&consumer))
    {
      Some(slot) => {
        *slot = overrides;
        true
      }
      None => false,
    }
  }

  pub fn count(&self, signature: &QuerySignature) -> usize {
    self.by_signature.get(signature).map_or(0, BTreeMap::len)
  }

  pub fn overrides(&self, signature: &QuerySignature) -> Vec<&Overrides> {
    self
      .by_signature
      .get(signature)
      .map(|consumers| consumers.values().collect())
      .unwrap_or_default()
  }

  /// Signatures with at least one subscriber, in a stable order.
  pub fn active_signatures(&self) -> Vec<&QuerySignature> {
    let mut signatures: Vec<&QuerySignature> = self.by_signature.keys().collect();
    signatures.sort();
    signatures
  }

  pub fn clear(&mut self) {
    self.by_signature.clear();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sig(name: &str) -> QuerySignature {
    QuerySignature::new(name, &())
  }

  #[test]
  fn test_register_and_unregister_counts() {
    let mut registry = SubscriptionRegistry::new();
    assert_eq!(registry.register(sig("a"), 1, Overrides::default()), 1);
    assert_eq!(registry.register(sig("a"), 2, Overrides::default()), 2);
    assert_eq!(registry.register(sig("b"), 3, Overrides::default()), 1);

    assert_eq!(registry.unregister(&sig("a"), 1), Some(1));
    assert_eq!(registry.unregister(&sig("a"), 1), None);
    assert_eq!(registry.unregister(&sig("a"), 2), Some(0));
    assert_eq!(registry.count(&sig("a")), 0);
    assert_eq!(registry.active_signatures(), vec![&sig("b")]);
  }

  #[test]
  fn test_update_overrides() {
    let mut registry = SubscriptionRegistry::new();
    registry.register(sig("a"), 1, Overrides::default());

    assert!(registry.update(&sig("a"), 1, Overrides::default().refetch_on_focus(false)));
    assert!(!registry.update(&sig("a"), 9, Overrides::default()));
    assert_eq!(
      registry.overrides(&sig("a")),
      vec![&Overrides::default().refetch_on_focus(false)]
    );
  }
}
