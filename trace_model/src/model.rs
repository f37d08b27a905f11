use crate::kernel::Kernel;
use crate::process::Process;
use crate::range::Range;
use crate::slice::Slice;
use crate::thread::Thread;
use crate::Result;
use log::debug;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// The result of an import: processes, threads and their slices, plus the
/// soft errors hit along the way.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Model {
    pub processes: BTreeMap<i64, Process>,
    pub kernel: Kernel,
    /// Globally scoped instant events.
    pub instant_events: Vec<Slice>,
    /// Extra top-level fields carried by the trace container.
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub categories: Vec<String>,
    pub import_errors: Vec<String>,
    pub bounds: Range,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(&self, pid: i64) -> Option<&Process> {
        self.processes.get(&pid)
    }

    pub fn get_or_create_process(&mut self, pid: i64) -> &mut Process {
        self.processes.entry(pid).or_insert_with(|| Process::new(pid))
    }

    pub fn thread(&self, pid: i64, tid: i64) -> Option<&Thread> {
        self.process(pid).and_then(|p| p.thread(tid))
    }

    pub fn thread_mut(&mut self, pid: i64, tid: i64) -> Option<&mut Thread> {
        self.processes.get_mut(&pid).and_then(|p| p.threads.get_mut(&tid))
    }

    pub fn get_or_create_thread(&mut self, pid: i64, tid: i64) -> &mut Thread {
        self.get_or_create_process(pid).get_or_create_thread(tid)
    }

    pub fn all_threads(&self) -> impl Iterator<Item = &Thread> {
        self.processes.values().flat_map(|p| p.threads.values())
    }

    pub fn all_threads_mut(&mut self) -> impl Iterator<Item = &mut Thread> {
        self.processes.values_mut().flat_map(|p| p.threads.values_mut())
    }

    pub fn find_all_threads_named(&self, name: &str) -> Vec<&Thread> {
        self.all_threads()
            .filter(|t| t.name.as_deref() == Some(name))
            .collect()
    }

    /// Record a non-fatal problem; the offending event has been skipped.
    pub fn push_import_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        debug!("import error: {message}");
        self.import_errors.push(message);
    }

    pub fn has_import_errors(&self) -> bool {
        !self.import_errors.is_empty()
    }

    pub fn push_instant_event(&mut self, mut slice: Slice) {
        slice.duration = Some(0.0);
        self.instant_events.push(slice);
    }

    pub fn update_bounds(&mut self) {
        self.bounds.reset();
        for process in self.processes.values_mut() {
            process.update_bounds();
            self.bounds.add_range(&process.bounds);
        }
        self.kernel.update_bounds();
        self.bounds.add_range(&self.kernel.bounds);
        for event in &self.instant_events {
            self.bounds.add_value(event.start);
        }
    }

    /// Collect the distinct non-empty categories, sorted.
    pub fn update_categories(&mut self) {
        let mut categories: BTreeSet<&str> = BTreeSet::new();
        for thread in self.all_threads() {
            categories.extend(thread.categories());
        }
        for process in self.processes.values() {
            categories.extend(process.counters.values().map(|c| c.category.as_str()));
            categories.extend(process.instant_events.iter().map(|e| e.category.as_str()));
            categories.extend(process.objects.all_instances().map(|o| o.category.as_str()));
        }
        categories.extend(self.instant_events.iter().map(|e| e.category.as_str()));
        categories.remove("");
        self.categories = categories.into_iter().map(str::to_string).collect();
    }

    /// Translate every timestamp so that the model starts at zero.
    pub fn shift_world_to_zero(&mut self) {
        self.update_bounds();
        let Some(time_base) = self.bounds.min else {
            return;
        };
        let amount = -time_base;
        for process in self.processes.values_mut() {
            process.shift_timestamps_forward(amount);
        }
        self.kernel.shift_timestamps_forward(amount);
        for event in &mut self.instant_events {
            event.shift(amount);
        }
        self.update_bounds();
    }

    pub fn auto_close_open_slices(&mut self, max_timestamp: f64) -> Result<()> {
        for process in self.processes.values_mut() {
            process.auto_close_open_slices(max_timestamp)?;
        }
        Ok(())
    }

    pub fn merge_kernel_with_userland(&mut self) -> Result<()> {
        for process in self.processes.values_mut() {
            process.merge_kernel_with_userland()?;
        }
        Ok(())
    }

    /// Delete every object still alive at the end of the import.
    pub fn auto_delete_objects(&mut self, max_timestamp: f64) {
        for process in self.processes.values_mut() {
            process.objects.auto_delete_objects(max_timestamp);
        }
    }

    pub fn prune_empty_containers(&mut self) {
        for process in self.processes.values_mut() {
            process.prune_empty_threads();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slice::Args;

    fn model_with_slices() -> Model {
        let mut model = Model::new();
        let thread = model.get_or_create_thread(1, 2);
        thread.name = Some("main".to_string());
        thread.slice_group.begin_slice("cat1", "a", 10.0, Args::new()).unwrap();
        thread.slice_group.end_slice(12.0).unwrap();
        thread.slice_group.begin_slice("cat2", "b", 13.0, Args::new()).unwrap();
        model.get_or_create_thread(3, 4);
        model.push_instant_event(Slice::new("cat1", "global", 15.0, Args::new()));
        model
    }

    #[test]
    fn bounds_and_auto_close() {
        let mut model = model_with_slices();
        model.update_bounds();
        assert_eq!(model.bounds.min, Some(10.0));
        assert_eq!(model.bounds.max, Some(15.0));

        model.auto_close_open_slices(15.0).unwrap();
        let thread = model.thread(1, 2).unwrap();
        assert_eq!(thread.slice_group.open_slice_count(), 0);
        assert!(thread.slice_group.slices()[1].did_not_finish);
        assert_eq!(thread.slice_group.slices()[1].duration, Some(2.0));
    }

    #[test]
    fn shift_world_to_zero_translates_everything() {
        let mut model = model_with_slices();
        model.auto_close_open_slices(15.0).unwrap();
        model.shift_world_to_zero();
        assert_eq!(model.bounds.min, Some(0.0));
        assert_eq!(model.bounds.max, Some(5.0));
        assert_eq!(model.thread(1, 2).unwrap().slice_group.slices()[0].start, 0.0);
        assert_eq!(model.instant_events[0].start, 5.0);

        let mut empty = Model::new();
        empty.shift_world_to_zero();
        assert!(empty.bounds.is_empty());
    }

    #[test]
    fn categories_and_pruning() {
        let mut model = model_with_slices();
        model.auto_close_open_slices(15.0).unwrap();
        model.update_categories();
        assert_eq!(model.categories, vec!["cat1", "cat2"]);

        model.prune_empty_containers();
        assert!(model.thread(3, 4).is_none());
        assert!(model.process(3).is_some());
        assert_eq!(model.find_all_threads_named("main").len(), 1);
        assert!(model.find_all_threads_named("other").is_empty());
    }

    #[test]
    fn import_errors_are_kept_in_order() {
        let mut model = Model::new();
        assert!(!model.has_import_errors());
        model.push_import_error("first");
        model.push_import_error(String::from("second"));
        assert_eq!(model.import_errors, vec!["first", "second"]);
    }

    #[test]
    fn live_objects_are_deleted_at_the_end() {
        let mut model = model_with_slices();
        let objects = &mut model.get_or_create_process(1).objects;
        objects.id_was_created("0x10", "cc", "Tile", 11.0).unwrap();
        objects.id_was_created("0x20", "cc", "Tile", 11.0).unwrap();
        objects.id_was_deleted("0x20", "cc", "Tile", 12.0).unwrap();
        model.update_bounds();
        model.auto_delete_objects(model.bounds.max.unwrap_or(0.0));

        let objects = &model.process(1).unwrap().objects;
        assert_eq!(objects.instances("0x10")[0].deletion_ts, Some(15.0));
        assert_eq!(objects.instances("0x20")[0].deletion_ts, Some(12.0));

        model.update_categories();
        assert_eq!(model.categories, vec!["cat1", "cat2", "cc"]);
    }
}
