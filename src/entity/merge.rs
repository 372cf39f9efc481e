use serde_json::Value;

/// Shallow merging for records stored in an `EntityState`.
///
/// `merge_from` backs the upsert operations and `apply_changes` backs the
/// update operations. Both overwrite top-level fields and leave the rest alone.
pub trait Merge {
  /// Partial changes accepted by `update_one`.
  type Changes;

  fn apply_changes(&mut self, changes: Self::Changes);

  fn merge_from(&mut self, other: Self);
}

impl Merge for Value {
  type Changes = Value;

  fn apply_changes(&mut self, changes: Value) {
    self.merge_from(changes);
  }

  fn merge_from(&mut self, other: Value) {
    match (self, other) {
      (Value::Object(existing), Value::Object(incoming)) => {
        for (key, value) in incoming {
          existing.insert(key, value);
        }
      }
      // Non-object records have no fields to merge
      (slot, other) => *slot = other,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_merge_overwrites_top_level_fields_only() {
    let mut record = json!({"id": 1, "title": "a", "meta": {"x": 1, "y": 2}});
    record.merge_from(json!({"title": "b", "meta": {"x": 3}}));

    assert_eq!(record, json!({"id": 1, "title": "b", "meta": {"x": 3}}));
  }

  #[test]
  fn test_merge_non_object_replaces() {
    let mut record = json!(5);
    record.apply_changes(json!({"id": 1}));
    assert_eq!(record, json!({"id": 1}));
  }
}
