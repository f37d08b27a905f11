//! Objects with a lifetime and snapshots of their state.
//!
//! An object is named by an id that may be reused once the object holding
//! it has been deleted, so one id maps to a sequence of instances ordered
//! by creation time. Instances can also come into being implicitly, when a
//! snapshot or deletion arrives for an id that was never created.

use crate::color::string_color_id;
use crate::range::Range;
use crate::{ModelError, Result};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectSnapshot {
    pub ts: f64,
    pub args: serde_json::Value,
}

/// One lifetime of an object id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectInstance {
    pub id: String,
    pub category: String,
    pub name: String,
    pub color_id: u32,
    pub creation_ts: f64,
    /// `None` while the object is alive.
    pub deletion_ts: Option<f64>,
    pub creation_ts_was_explicit: bool,
    pub deletion_ts_was_explicit: bool,
    pub snapshots: Vec<ObjectSnapshot>,
}

impl ObjectInstance {
    fn new(id: &str, category: &str, name: &str, creation_ts: f64) -> Self {
        Self {
            id: id.to_string(),
            category: category.to_string(),
            name: name.to_string(),
            color_id: string_color_id(name),
            creation_ts,
            deletion_ts: None,
            creation_ts_was_explicit: false,
            deletion_ts_was_explicit: false,
            snapshots: Vec::new(),
        }
    }

    pub fn is_alive_at(&self, ts: f64) -> bool {
        ts >= self.creation_ts && self.deletion_ts.is_none_or(|deleted| ts < deleted)
    }

    /// The latest snapshot taken at or before `ts`.
    pub fn snapshot_at(&self, ts: f64) -> Option<&ObjectSnapshot> {
        let index = self.snapshots.partition_point(|s| s.ts <= ts);
        index.checked_sub(1).map(|i| &self.snapshots[i])
    }

    fn check_identity(&self, category: &str, name: &str) -> Result<()> {
        for (field, expected, found) in [("category", &self.category, category), ("name", &self.name, name)] {
            if expected != found {
                return Err(ModelError::ObjectIdentityMismatch {
                    id: self.id.clone(),
                    field,
                    expected: expected.clone(),
                    found: found.to_string(),
                });
            }
        }
        Ok(())
    }

    fn shift(&mut self, amount: f64) {
        self.creation_ts += amount;
        if let Some(deleted) = &mut self.deletion_ts {
            *deleted += amount;
        }
        for snapshot in &mut self.snapshots {
            snapshot.ts += amount;
        }
    }
}

/// Every object instance of a process, by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ObjectCollection {
    instances_by_id: BTreeMap<String, Vec<ObjectInstance>>,
    #[serde(skip)]
    bounds: Range,
}

impl ObjectCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.instances_by_id.is_empty()
    }

    pub fn bounds(&self) -> &Range {
        &self.bounds
    }

    /// Every lifetime of `id`, oldest first.
    pub fn instances(&self, id: &str) -> &[ObjectInstance] {
        self.instances_by_id.get(id).map_or(&[], Vec::as_slice)
    }

    pub fn all_instances(&self) -> impl Iterator<Item = &ObjectInstance> {
        self.instances_by_id.values().flatten()
    }

    /// The instance of `id` alive at `ts`, if any.
    pub fn instance_at(&self, id: &str, ts: f64) -> Option<&ObjectInstance> {
        self.instances(id).iter().rev().find(|instance| instance.is_alive_at(ts))
    }

    pub fn snapshot_at(&self, id: &str, ts: f64) -> Option<&ObjectSnapshot> {
        self.instance_at(id, ts)?.snapshot_at(ts)
    }

    /// Start a new lifetime of `id` at `ts`. The previous lifetime, if any,
    /// must have been deleted by then.
    pub fn id_was_created(&mut self, id: &str, category: &str, name: &str, ts: f64) -> Result<&mut ObjectInstance> {
        let instances = self.instances_by_id.entry(id.to_string()).or_default();
        if let Some(last) = instances.last() {
            if last.deletion_ts.is_none_or(|deleted| ts < deleted) {
                return Err(ModelError::ObjectMutationOutOfOrder { id: id.to_string(), ts });
            }
        }
        let mut instance = ObjectInstance::new(id, category, name, ts);
        instance.creation_ts_was_explicit = true;
        instances.push(instance);
        let last = instances.len() - 1;
        Ok(&mut instances[last])
    }

    /// Record the state of `id` at `ts`. A snapshot of an id with no live
    /// instance after its last deletion starts an implicit instance.
    pub fn add_snapshot(
        &mut self,
        id: &str,
        category: &str,
        name: &str,
        ts: f64,
        args: serde_json::Value,
    ) -> Result<&mut ObjectSnapshot> {
        let instances = self.instances_by_id.entry(id.to_string()).or_default();
        let starts_new = instances
            .last()
            .is_none_or(|last| last.deletion_ts.is_some_and(|deleted| ts >= deleted));
        if starts_new {
            instances.push(ObjectInstance::new(id, category, name, ts));
        }

        let instance = instances
            .iter_mut()
            .rev()
            .find(|instance| instance.is_alive_at(ts))
            .ok_or_else(|| ModelError::NoLiveObject { id: id.to_string(), ts })?;
        instance.check_identity(category, name)?;
        if let Some(last) = instance.snapshots.last() {
            if ts < last.ts {
                return Err(ModelError::SnapshotOrderingViolation {
                    id: id.to_string(),
                    ts,
                    last: last.ts,
                });
            }
        }
        instance.snapshots.push(ObjectSnapshot { ts, args });
        let last = instance.snapshots.len() - 1;
        Ok(&mut instance.snapshots[last])
    }

    /// End the current lifetime of `id` at `ts`. Deleting an id that was
    /// never seen creates and deletes an instance at `ts`.
    pub fn id_was_deleted(&mut self, id: &str, category: &str, name: &str, ts: f64) -> Result<&mut ObjectInstance> {
        let instances = self.instances_by_id.entry(id.to_string()).or_default();
        if instances.is_empty() {
            instances.push(ObjectInstance::new(id, category, name, ts));
        }
        let last = instances.len() - 1;
        let instance = &mut instances[last];
        if ts < instance.creation_ts {
            return Err(ModelError::DeletedBeforeCreation {
                id: id.to_string(),
                ts,
                created: instance.creation_ts,
            });
        }
        if instance.deletion_ts.is_some() {
            return Err(ModelError::ObjectMutationOutOfOrder { id: id.to_string(), ts });
        }
        instance.check_identity(category, name)?;
        instance.deletion_ts = Some(ts);
        instance.deletion_ts_was_explicit = true;
        Ok(instance)
    }

    /// Delete every instance still alive, at `max_timestamp` or at its last
    /// snapshot if that is later.
    pub fn auto_delete_objects(&mut self, max_timestamp: f64) {
        for instance in self.instances_by_id.values_mut().flatten() {
            if instance.deletion_ts.is_some() {
                continue;
            }
            let last_seen = instance.snapshots.last().map_or(instance.creation_ts, |s| s.ts);
            instance.deletion_ts = Some(max_timestamp.max(last_seen));
            instance.deletion_ts_was_explicit = false;
        }
    }

    pub fn shift_timestamps_forward(&mut self, amount: f64) {
        for instance in self.instances_by_id.values_mut().flatten() {
            instance.shift(amount);
        }
        self.update_bounds();
    }

    pub fn update_bounds(&mut self) {
        self.bounds.reset();
        for instance in self.instances_by_id.values().flatten() {
            self.bounds.add_value(instance.creation_ts);
            if let Some(last) = instance.snapshots.last() {
                self.bounds.add_value(last.ts);
            }
            if let Some(deleted) = instance.deletion_ts {
                self.bounds.add_value(deleted);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_snapshot_delete() {
        let mut objects = ObjectCollection::new();
        objects.id_was_created("0x1000", "cc", "LayerImpl", 10.0).unwrap();
        objects.add_snapshot("0x1000", "cc", "LayerImpl", 15.0, json!({"x": 1})).unwrap();
        objects.add_snapshot("0x1000", "cc", "LayerImpl", 20.0, json!({"x": 2})).unwrap();
        let deleted = objects.id_was_deleted("0x1000", "cc", "LayerImpl", 50.0).unwrap();
        assert!(deleted.creation_ts_was_explicit);
        assert!(deleted.deletion_ts_was_explicit);

        let instance = &objects.instances("0x1000")[0];
        assert_eq!(instance.creation_ts, 10.0);
        assert_eq!(instance.deletion_ts, Some(50.0));
        assert_eq!(instance.color_id, string_color_id("LayerImpl"));
        assert_eq!(objects.snapshot_at("0x1000", 17.0).unwrap().args, json!({"x": 1}));
        assert_eq!(objects.snapshot_at("0x1000", 25.0).unwrap().args, json!({"x": 2}));
        assert!(objects.snapshot_at("0x1000", 12.0).is_none());
        assert!(objects.snapshot_at("0x1000", 50.0).is_none());

        objects.update_bounds();
        assert_eq!(objects.bounds().min, Some(10.0));
        assert_eq!(objects.bounds().max, Some(50.0));
    }

    #[test]
    fn ids_are_reused_after_deletion() {
        let mut objects = ObjectCollection::new();
        objects.id_was_created("1", "", "a", 10.0).unwrap();
        assert_eq!(
            objects.id_was_created("1", "", "a", 20.0).unwrap_err(),
            ModelError::ObjectMutationOutOfOrder { id: "1".to_string(), ts: 20.0 }
        );
        objects.id_was_deleted("1", "", "a", 30.0).unwrap();
        assert!(objects.id_was_created("1", "", "a", 25.0).is_err());
        objects.id_was_created("1", "", "b", 30.0).unwrap();

        let names: Vec<&str> = objects.instances("1").iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(objects.instance_at("1", 29.0).unwrap().name, "a");
        assert_eq!(objects.instance_at("1", 30.0).unwrap().name, "b");
        assert!(objects.instance_at("1", 5.0).is_none());
    }

    #[test]
    fn snapshots_start_implicit_instances() {
        let mut objects = ObjectCollection::new();
        objects.add_snapshot("1", "", "a", 10.0, json!(1)).unwrap();
        objects.id_was_deleted("1", "", "a", 20.0).unwrap();
        objects.add_snapshot("1", "", "a", 25.0, json!(2)).unwrap();

        let instances = objects.instances("1");
        assert_eq!(instances.len(), 2);
        assert!(!instances[0].creation_ts_was_explicit);
        assert_eq!(instances[1].creation_ts, 25.0);

        let deleted = objects.id_was_deleted("2", "", "ghost", 7.0).unwrap();
        assert_eq!((deleted.creation_ts, deleted.deletion_ts), (7.0, Some(7.0)));
    }

    #[test]
    fn snapshot_errors() {
        let mut objects = ObjectCollection::new();
        objects.id_was_created("1", "cat", "a", 10.0).unwrap();
        objects.add_snapshot("1", "cat", "a", 15.0, json!(1)).unwrap();
        assert!(matches!(
            objects.add_snapshot("1", "cat", "a", 12.0, json!(2)),
            Err(ModelError::SnapshotOrderingViolation { last, .. }) if last == 15.0
        ));
        assert!(matches!(
            objects.add_snapshot("1", "cat", "b", 16.0, json!(2)),
            Err(ModelError::ObjectIdentityMismatch { field: "name", .. })
        ));
        assert!(matches!(
            objects.add_snapshot("1", "other", "a", 16.0, json!(2)),
            Err(ModelError::ObjectIdentityMismatch { field: "category", .. })
        ));
        assert_eq!(
            objects.add_snapshot("1", "cat", "a", 5.0, json!(0)).unwrap_err(),
            ModelError::NoLiveObject { id: "1".to_string(), ts: 5.0 }
        );
        assert!(matches!(
            objects.id_was_deleted("1", "cat", "a", 9.0),
            Err(ModelError::DeletedBeforeCreation { created, .. }) if created == 10.0
        ));
        assert_eq!(objects.instances("1")[0].snapshots.len(), 1);
    }

    #[test]
    fn auto_delete_and_shift() {
        let mut objects = ObjectCollection::new();
        objects.id_was_created("1", "", "a", 10.0).unwrap();
        objects.add_snapshot("2", "", "b", 40.0, json!(null)).unwrap();
        objects.id_was_created("3", "", "c", 5.0).unwrap();
        objects.id_was_deleted("3", "", "c", 8.0).unwrap();

        objects.auto_delete_objects(30.0);
        assert_eq!(objects.instances("1")[0].deletion_ts, Some(30.0));
        assert!(!objects.instances("1")[0].deletion_ts_was_explicit);
        assert_eq!(objects.instances("2")[0].deletion_ts, Some(40.0));
        assert_eq!(objects.instances("3")[0].deletion_ts, Some(8.0));

        objects.shift_timestamps_forward(-5.0);
        assert_eq!(objects.instances("2")[0].snapshots[0].ts, 35.0);
        assert_eq!(objects.instances("3")[0].creation_ts, 0.0);
        assert_eq!(objects.bounds().min, Some(0.0));
        assert_eq!(objects.bounds().max, Some(35.0));
    }
}
