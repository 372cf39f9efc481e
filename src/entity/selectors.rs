use std::collections::HashMap;
use std::hash::Hash;
use std::marker::PhantomData;

use super::state::EntityState;

/// Pure read functions over a collection located inside `S`.
pub struct EntitySelectors<S, Id, T, F> {
  locate: F,
  _marker: PhantomData<fn(&S) -> (Id, T)>,
}

impl<S, Id, T, F> EntitySelectors<S, Id, T, F>
where
  Id: Eq + Hash,
  F: Fn(&S) -> &EntityState<Id, T>,
{
  pub(crate) fn new(locate: F) -> Self {
    Self {
      locate,
      _marker: PhantomData,
    }
  }

  pub fn select_ids<'a>(&self, state: &'a S) -> &'a [Id]
  where
    Id: 'a,
    T: 'a,
  {
    (self.locate)(state).ids()
  }

  pub fn select_entities<'a>(&self, state: &'a S) -> &'a HashMap<Id, T>
  where
    Id: 'a,
    T: 'a,
  {
    (self.locate)(state).entities()
  }

  /// All records, in `ids` order.
  pub fn select_all<'a>(&self, state: &'a S) -> Vec<&'a T>
  where
    Id: 'a,
    T: 'a,
  {
    (self.locate)(state).iter().collect()
  }

  pub fn select_total(&self, state: &S) -> usize {
    (self.locate)(state).len()
  }

  pub fn select_by_id<'a>(&self, state: &'a S, id: &Id) -> Option<&'a T>
  where
    Id: 'a,
    T: 'a,
  {
    (self.locate)(state).get(id)
  }
}

#[cfg(test)]
mod tests {
  use crate::entity::EntityAdapter;

  use super::*;

  #[derive(Debug, Clone, PartialEq)]
  struct Todo {
    id: u32,
    text: &'static str,
  }

  struct Workspace {
    inbox: EntityState<u32, Todo>,
    archive: EntityState<u32, Todo>,
  }

  #[test]
  fn test_selectors_locate_nested_collections() {
    let adapter = EntityAdapter::new(|t: &Todo| t.id);
    let workspace = Workspace {
      inbox: adapter.with_entities(vec![
        Todo { id: 2, text: "write" },
        Todo { id: 1, text: "read" },
      ]),
      archive: adapter.with_entities(vec![Todo { id: 9, text: "old" }]),
    };

    let inbox = adapter.get_selectors(|w: &Workspace| &w.inbox);
    let archive = adapter.get_selectors(|w: &Workspace| &w.archive);

    assert_eq!(inbox.select_ids(&workspace), &[2, 1]);
    assert_eq!(
      inbox
        .select_all(&workspace)
        .iter()
        .map(|t| t.text)
        .collect::<Vec<_>>(),
      vec!["write", "read"]
    );
    assert_eq!(inbox.select_total(&workspace), 2);
    assert_eq!(archive.select_total(&workspace), 1);
    assert_eq!(
      archive.select_by_id(&workspace, &9).map(|t| t.text),
      Some("old")
    );
    assert!(archive.select_by_id(&workspace, &2).is_none());
    assert_eq!(archive.select_entities(&workspace).len(), 1);
  }
}
