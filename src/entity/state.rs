use std::collections::HashMap;
use std::hash::Hash;

/// An ordered, normalized collection of records.
///
/// Every id in `ids` has exactly one record in `entities` and vice versa.
/// Only `EntityAdapter` mutates a collection, which keeps that bijection intact.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityState<Id, T>
where
  Id: Eq + Hash,
{
  pub(crate) ids: Vec<Id>,
  pub(crate) entities: HashMap<Id, T>,
}

impl<Id: Eq + Hash, T> EntityState<Id, T> {
  pub fn new() -> Self {
    Self {
      ids: Vec::new(),
      entities: HashMap::new(),
    }
  }

  pub fn ids(&self) -> &[Id] {
    &self.ids
  }

  pub fn entities(&self) -> &HashMap<Id, T> {
    &self.entities
  }

  pub fn get(&self, id: &Id) -> Option<&T> {
    self.entities.get(id)
  }

  pub fn contains(&self, id: &Id) -> bool {
    self.entities.contains_key(id)
  }

  pub fn len(&self) -> usize {
    self.ids.len()
  }

  pub fn is_empty(&self) -> bool {
    self.ids.is_empty()
  }

  /// Records in `ids` order.
  pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
    self.ids.iter().filter_map(|id| self.entities.get(id))
  }
}

impl<Id: Eq + Hash, T> Default for EntityState<Id, T> {
  fn default() -> Self {
    Self::new()
  }
}
