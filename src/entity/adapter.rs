//! CRUD operations over `EntityState` collections.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;

use super::merge::Merge;
use super::selectors::EntitySelectors;
use super::state::EntityState;

type SelectIdFn<Id, T> = Arc<dyn Fn(&T) -> Id + Send + Sync>;
type SortComparerFn<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// Operations for a collection of `T` keyed by a derived `Id`.
///
/// The adapter owns no data. It holds the id selector (and an optional sort
/// comparer) and applies every mutation to a caller-provided `EntityState`.
pub struct EntityAdapter<Id, T> {
  select_id: SelectIdFn<Id, T>,
  sort_comparer: Option<SortComparerFn<T>>,
}

impl<Id, T> EntityAdapter<Id, T>
where
  Id: Clone + Eq + Hash,
{
  /// Create an adapter that derives each record's id with `select_id`.
  pub fn new<F>(select_id: F) -> Self
  where
    F: Fn(&T) -> Id + Send + Sync + 'static,
  {
    Self {
      select_id: Arc::new(select_id),
      sort_comparer: None,
    }
  }

  /// Keep `ids` sorted by `comparer` instead of insertion order.
  ///
  /// Sorting is stable, so records comparing equal keep their relative order.
  pub fn sorted_by<F>(mut self, comparer: F) -> Self
  where
    F: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
  {
    self.sort_comparer = Some(Arc::new(comparer));
    self
  }

  pub fn select_id(&self, entity: &T) -> Id {
    (self.select_id)(entity)
  }

  pub fn initial_state(&self) -> EntityState<Id, T> {
    EntityState::new()
  }

  /// Build a collection pre-populated with `entities`.
  pub fn with_entities<I>(&self, entities: I) -> EntityState<Id, T>
  where
    I: IntoIterator<Item = T>,
  {
    let mut state = EntityState::new();
    self.add_many(&mut state, entities);
    state
  }

  /// Insert `entity`, replacing any record with the same id in place.
  pub fn add_one(&self, state: &mut EntityState<Id, T>, entity: T) {
    self.insert_or_replace(state, entity);
    self.resort(state);
  }

  pub fn add_many<I>(&self, state: &mut EntityState<Id, T>, entities: I)
  where
    I: IntoIterator<Item = T>,
  {
    for entity in entities {
      self.insert_or_replace(state, entity);
    }
    self.resort(state);
  }

  /// Same as `add_one`: replace-or-insert without merging.
  pub fn set_one(&self, state: &mut EntityState<Id, T>, entity: T) {
    self.add_one(state, entity);
  }

  pub fn set_many<I>(&self, state: &mut EntityState<Id, T>, entities: I)
  where
    I: IntoIterator<Item = T>,
  {
    self.add_many(state, entities);
  }

  /// Replace the whole collection, contents and order.
  pub fn set_all<I>(&self, state: &mut EntityState<Id, T>, entities: I)
  where
    I: IntoIterator<Item = T>,
  {
    state.ids.clear();
    state.entities.clear();
    self.add_many(state, entities);
  }

  /// Remove the record with `id`. Returns false for unknown ids.
  pub fn remove_one(&self, state: &mut EntityState<Id, T>, id: &Id) -> bool {
    if state.entities.remove(id).is_none() {
      return false;
    }
    state.ids.retain(|existing| existing != id);
    true
  }

  pub fn remove_many<'a, I>(&self, state: &mut EntityState<Id, T>, ids: I)
  where
    I: IntoIterator<Item = &'a Id>,
    Id: 'a,
  {
    let removed: HashSet<Id> = ids
      .into_iter()
      .filter(|id| state.entities.remove(*id).is_some())
      .cloned()
      .collect();

    if !removed.is_empty() {
      state.ids.retain(|id| !removed.contains(id));
    }
  }

  pub fn remove_all(&self, state: &mut EntityState<Id, T>) {
    state.ids.clear();
    state.entities.clear();
  }

  /// Selectors over a collection embedded somewhere inside `S`.
  ///
  /// `locate` finds the collection within the enclosing state, so one state
  /// tree can hold any number of independent collections.
  pub fn get_selectors<S, F>(&self, locate: F) -> EntitySelectors<S, Id, T, F>
  where
    F: Fn(&S) -> &EntityState<Id, T>,
  {
    EntitySelectors::new(locate)
  }

  /// Selectors that operate on a bare `EntityState`.
  #[allow(clippy::type_complexity)]
  pub fn state_selectors(
    &self,
  ) -> EntitySelectors<
    EntityState<Id, T>,
    Id,
    T,
    fn(&EntityState<Id, T>) -> &EntityState<Id, T>,
  > {
    EntitySelectors::new(identity as fn(&EntityState<Id, T>) -> &EntityState<Id, T>)
  }

  fn insert_or_replace(&self, state: &mut EntityState<Id, T>, entity: T) {
    let id = self.select_id(&entity);
    if state.entities.insert(id.clone(), entity).is_none() {
      state.ids.push(id);
    }
  }

  fn resort(&self, state: &mut EntityState<Id, T>) {
    let Some(comparer) = &self.sort_comparer else {
      return;
    };
    let EntityState { ids, entities } = state;
    ids.sort_by(|a, b| match (entities.get(a), entities.get(b)) {
      (Some(a), Some(b)) => comparer(a, b),
      _ => Ordering::Equal,
    });
  }
}

impl<Id, T> EntityAdapter<Id, T>
where
  Id: Clone + Eq + Hash,
  T: Merge,
{
  /// Insert `entity`, or shallow-merge it into the existing record.
  pub fn upsert_one(&self, state: &mut EntityState<Id, T>, entity: T) {
    self.upsert(state, entity);
    self.resort(state);
  }

  pub fn upsert_many<I>(&self, state: &mut EntityState<Id, T>, entities: I)
  where
    I: IntoIterator<Item = T>,
  {
    for entity in entities {
      self.upsert(state, entity);
    }
    self.resort(state);
  }

  /// Shallow-merge `changes` into the record with `id`.
  ///
  /// Unknown ids are ignored. If the changes alter the derived id, the record
  /// is re-keyed in place; a different record already holding the new id is
  /// dropped.
  pub fn update_one(&self, state: &mut EntityState<Id, T>, id: &Id, changes: T::Changes) -> bool {
    let updated = self.update(state, id, changes);
    if updated {
      self.resort(state);
    }
    updated
  }

  pub fn update_many<I>(&self, state: &mut EntityState<Id, T>, updates: I)
  where
    I: IntoIterator<Item = (Id, T::Changes)>,
  {
    let mut any = false;
    for (id, changes) in updates {
      any |= self.update(state, &id, changes);
    }
    if any {
      self.resort(state);
    }
  }

  fn upsert(&self, state: &mut EntityState<Id, T>, entity: T) {
    let id = self.select_id(&entity);
    match state.entities.get_mut(&id) {
      Some(existing) => existing.merge_from(entity),
      None => {
        state.entities.insert(id.clone(), entity);
        state.ids.push(id);
      }
    }
  }

  fn update(&self, state: &mut EntityState<Id, T>, id: &Id, changes: T::Changes) -> bool {
    let Some(entity) = state.entities.get_mut(id) else {
      return false;
    };
    entity.apply_changes(changes);

    let new_id = (self.select_id)(entity);
    if &new_id == id {
      return true;
    }

    if let Some(entity) = state.entities.remove(id) {
      if state.entities.insert(new_id.clone(), entity).is_some() {
        state.ids.retain(|existing| existing != &new_id);
      }
      if let Some(slot) = state.ids.iter_mut().find(|existing| *existing == id) {
        *slot = new_id;
      }
    }
    true
  }
}

impl<Id, T> Clone for EntityAdapter<Id, T> {
  fn clone(&self) -> Self {
    Self {
      select_id: Arc::clone(&self.select_id),
      sort_comparer: self.sort_comparer.clone(),
    }
  }
}

fn identity<S>(state: &S) -> &S {
  state
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;
  use serde_json::{json, Value};

  #[derive(Debug, Clone, PartialEq)]
  struct Book {
    id: String,
    title: String,
  }

  fn book(id: &str, title: &str) -> Book {
    Book {
      id: id.to_string(),
      title: title.to_string(),
    }
  }

  fn books() -> EntityAdapter<String, Book> {
    EntityAdapter::new(|b: &Book| b.id.clone())
  }

  fn records() -> EntityAdapter<u64, Value> {
    EntityAdapter::new(|v: &Value| v["id"].as_u64().unwrap_or_default())
  }

  fn assert_bijection<Id: Eq + Hash + std::fmt::Debug, T>(state: &EntityState<Id, T>) {
    assert_eq!(state.ids().len(), state.entities().len());
    for id in state.ids() {
      assert!(state.entities().contains_key(id), "missing entity for {:?}", id);
    }
  }

  #[test]
  fn test_add_one_then_select_by_id() {
    let adapter = books();
    let mut state = adapter.initial_state();
    let record = book("a", "Dune");

    adapter.add_one(&mut state, record.clone());

    let selectors = adapter.state_selectors();
    assert_eq!(selectors.select_by_id(&state, &"a".to_string()), Some(&record));
    assert_eq!(selectors.select_total(&state), 1);
  }

  #[test]
  fn test_add_one_replaces_existing_in_place() {
    let adapter = books();
    let mut state = adapter.with_entities(vec![book("a", "Dune"), book("b", "Emma")]);

    adapter.add_one(&mut state, book("a", "Dune Messiah"));

    assert_eq!(state.ids(), &["a".to_string(), "b".to_string()]);
    assert_eq!(state.get(&"a".to_string()).map(|b| b.title.as_str()), Some("Dune Messiah"));
  }

  #[test]
  fn test_add_many_appends_new_ids_in_order() {
    let adapter = books();
    let mut state = adapter.with_entities(vec![book("b", "Emma")]);

    adapter.add_many(
      &mut state,
      vec![book("c", "Ulysses"), book("b", "Emma 2"), book("a", "Dune")],
    );

    assert_eq!(state.ids(), &["b".to_string(), "c".to_string(), "a".to_string()]);
    assert_bijection(&state);
  }

  #[test]
  fn test_set_all_replaces_contents_and_order() {
    let adapter = books();
    let mut state = adapter.with_entities(vec![book("a", "Dune"), book("b", "Emma")]);

    adapter.set_all(&mut state, vec![book("z", "Zorba"), book("y", "Yertle")]);

    assert_eq!(state.ids(), &["z".to_string(), "y".to_string()]);
    assert!(!state.contains(&"a".to_string()));
  }

  #[test]
  fn test_remove_ignores_unknown_ids() {
    let adapter = books();
    let mut state =
      adapter.with_entities(vec![book("a", "Dune"), book("b", "Emma"), book("c", "Ulysses")]);

    assert!(!adapter.remove_one(&mut state, &"nope".to_string()));
    adapter.remove_many(&mut state, &["a".to_string(), "zzz".to_string(), "c".to_string()]);

    assert_eq!(state.ids(), &["b".to_string()]);
    assert_bijection(&state);

    adapter.remove_all(&mut state);
    assert!(state.is_empty());
  }

  #[test]
  fn test_upsert_merges_fields() {
    let adapter = records();
    let mut state = adapter.with_entities(vec![json!({"id": 1, "title": "a", "done": false})]);

    adapter.upsert_many(
      &mut state,
      vec![json!({"id": 1, "done": true}), json!({"id": 2, "title": "b"})],
    );

    assert_eq!(state.get(&1), Some(&json!({"id": 1, "title": "a", "done": true})));
    assert_eq!(state.ids(), &[1, 2]);
  }

  #[test]
  fn test_update_one_missing_is_noop() {
    let adapter = records();
    let mut state = adapter.with_entities(vec![json!({"id": 1, "title": "a"})]);
    let before = state.clone();

    assert!(!adapter.update_one(&mut state, &7, json!({"title": "x"})));
    assert_eq!(state, before);
  }

  #[test]
  fn test_update_one_keeps_position() {
    let adapter = records();
    let mut state = adapter.with_entities(vec![
      json!({"id": 1, "title": "a"}),
      json!({"id": 2, "title": "b"}),
      json!({"id": 3, "title": "c"}),
    ]);

    assert!(adapter.update_one(&mut state, &2, json!({"title": "B"})));

    assert_eq!(state.ids(), &[1, 2, 3]);
    assert_eq!(state.get(&2), Some(&json!({"id": 2, "title": "B"})));
  }

  #[test]
  fn test_update_one_rekeys_when_id_changes() {
    let adapter = records();
    let mut state = adapter.with_entities(vec![
      json!({"id": 1, "title": "a"}),
      json!({"id": 2, "title": "b"}),
      json!({"id": 3, "title": "c"}),
    ]);

    adapter.update_one(&mut state, &1, json!({"id": 10}));
    assert_eq!(state.ids(), &[10, 2, 3]);

    // Collides with an existing record, which is dropped
    adapter.update_one(&mut state, &10, json!({"id": 3}));
    assert_eq!(state.ids(), &[3, 2]);
    assert_eq!(state.get(&3), Some(&json!({"id": 3, "title": "a"})));
    assert_bijection(&state);
  }

  #[test]
  fn test_sorted_adapter_keeps_order() {
    let adapter = books().sorted_by(|a: &Book, b: &Book| a.title.cmp(&b.title));
    let mut state = adapter.initial_state();

    adapter.add_many(&mut state, vec![book("1", "Ulysses"), book("2", "Dune")]);
    adapter.add_one(&mut state, book("3", "Emma"));

    let titles: Vec<&str> = state.iter().map(|b| b.title.as_str()).collect();
    assert_eq!(titles, vec!["Dune", "Emma", "Ulysses"]);
  }

  #[derive(Debug, Clone)]
  enum Op {
    Add(u8, u8),
    Upsert(u8, u8),
    Update(u8, u8),
    Remove(u8),
    RemoveMany(Vec<u8>),
  }

  fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
      (0u8..16, any::<u8>()).prop_map(|(id, v)| Op::Add(id, v)),
      (0u8..16, any::<u8>()).prop_map(|(id, v)| Op::Upsert(id, v)),
      (0u8..16, 0u8..16).prop_map(|(id, new_id)| Op::Update(id, new_id)),
      (0u8..16).prop_map(Op::Remove),
      prop::collection::vec(0u8..16, 0..4).prop_map(Op::RemoveMany),
    ]
  }

  proptest! {
    /// ids and entities stay in bijection under any mutation sequence
    #[test]
    fn ids_and_entities_stay_in_bijection(ops in prop::collection::vec(op_strategy(), 0..64)) {
      let adapter = records();
      let mut state = adapter.initial_state();

      for op in ops {
        match op {
          Op::Add(id, v) => adapter.add_one(&mut state, json!({"id": id, "v": v})),
          Op::Upsert(id, v) => adapter.upsert_one(&mut state, json!({"id": id, "w": v})),
          Op::Update(id, new_id) => {
            adapter.update_one(&mut state, &u64::from(id), json!({"id": new_id}));
          }
          Op::Remove(id) => {
            adapter.remove_one(&mut state, &u64::from(id));
          }
          Op::RemoveMany(ids) => {
            let ids: Vec<u64> = ids.into_iter().map(u64::from).collect();
            adapter.remove_many(&mut state, &ids);
          }
        }

        prop_assert_eq!(state.ids().len(), state.entities().len());
        let unique: HashSet<&u64> = state.ids().iter().collect();
        prop_assert_eq!(unique.len(), state.ids().len());
        for id in state.ids() {
          prop_assert!(state.entities().contains_key(id));
        }
      }
    }
  }
}
