use crate::counter::Counter;
use crate::object_collection::ObjectCollection;
use crate::range::Range;
use crate::slice::Slice;
use crate::thread::Thread;
use crate::Result;
use serde::Serialize;
use std::collections::BTreeMap;

/// A process: its threads, counters and process-scoped instant events.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Process {
    pub pid: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    pub sort_index: i64,
    pub threads: BTreeMap<i64, Thread>,
    /// Keyed by `category.name`.
    pub counters: BTreeMap<String, Counter>,
    pub instant_events: Vec<Slice>,
    #[serde(skip_serializing_if = "ObjectCollection::is_empty")]
    pub objects: ObjectCollection,
    #[serde(skip)]
    pub bounds: Range,
}

impl Process {
    pub fn new(pid: i64) -> Self {
        Self {
            pid,
            name: None,
            labels: Vec::new(),
            sort_index: 0,
            threads: BTreeMap::new(),
            counters: BTreeMap::new(),
            instant_events: Vec::new(),
            objects: ObjectCollection::new(),
            bounds: Range::new(),
        }
    }

    pub fn thread(&self, tid: i64) -> Option<&Thread> {
        self.threads.get(&tid)
    }

    pub fn get_or_create_thread(&mut self, tid: i64) -> &mut Thread {
        let pid = self.pid;
        self.threads.entry(tid).or_insert_with(|| Thread::new(pid, tid))
    }

    pub fn counter(&self, category: &str, name: &str) -> Option<&Counter> {
        self.counters.get(&format!("{category}.{name}"))
    }

    pub fn get_or_create_counter(&mut self, category: &str, name: &str) -> &mut Counter {
        self.counters
            .entry(format!("{category}.{name}"))
            .or_insert_with(|| Counter::new(category, name))
    }

    pub fn remove_counter(&mut self, category: &str, name: &str) -> Option<Counter> {
        self.counters.remove(&format!("{category}.{name}"))
    }

    pub fn push_instant_event(&mut self, mut slice: Slice) {
        slice.duration = Some(0.0);
        self.instant_events.push(slice);
    }

    pub fn user_friendly_name(&self) -> String {
        match &self.name {
            Some(name) => format!("{} (pid {})", name, self.pid),
            None => format!("Process {}", self.pid),
        }
    }

    pub fn auto_close_open_slices(&mut self, max_timestamp: f64) -> Result<()> {
        for thread in self.threads.values_mut() {
            thread.auto_close_open_slices(max_timestamp)?;
        }
        Ok(())
    }

    pub fn merge_kernel_with_userland(&mut self) -> Result<()> {
        for thread in self.threads.values_mut() {
            thread.merge_kernel_with_userland()?;
        }
        Ok(())
    }

    /// Remove threads that recorded nothing.
    pub fn prune_empty_threads(&mut self) {
        self.threads.retain(|_, thread| !thread.is_empty());
    }

    pub fn update_bounds(&mut self) {
        self.bounds.reset();
        for thread in self.threads.values_mut() {
            thread.update_bounds();
            self.bounds.add_range(&thread.bounds);
        }
        for counter in self.counters.values_mut() {
            counter.update_bounds();
            self.bounds.add_range(&counter.bounds);
        }
        for event in &self.instant_events {
            self.bounds.add_value(event.start);
        }
        self.objects.update_bounds();
        self.bounds.add_range(self.objects.bounds());
    }

    pub fn shift_timestamps_forward(&mut self, amount: f64) {
        for thread in self.threads.values_mut() {
            thread.shift_timestamps_forward(amount);
        }
        for counter in self.counters.values_mut() {
            counter.shift_timestamps_forward(amount);
        }
        for event in &mut self.instant_events {
            event.shift(amount);
        }
        self.objects.shift_timestamps_forward(amount);
        self.update_bounds();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slice::Args;

    #[test]
    fn threads_and_counters_are_created_once() {
        let mut process = Process::new(3);
        process.get_or_create_thread(4).name = Some("worker".to_string());
        assert_eq!(process.get_or_create_thread(4).name.as_deref(), Some("worker"));
        assert_eq!(process.thread(4).unwrap().pid, 3);

        process.get_or_create_counter("mem", "heap").add_series("used", 0);
        assert_eq!(process.get_or_create_counter("mem", "heap").num_series(), 1);
        assert!(process.counter("mem", "heap").is_some());
        assert!(process.remove_counter("mem", "heap").is_some());
        assert!(process.counters.is_empty());
    }

    #[test]
    fn prune_keeps_threads_with_content() {
        let mut process = Process::new(1);
        process.get_or_create_thread(1);
        process
            .get_or_create_thread(2)
            .slice_group
            .push_slice(Slice::complete("", "a", 1.0, 1.0, Args::new()));
        process.prune_empty_threads();
        assert_eq!(process.threads.keys().copied().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn bounds_include_instants_and_counters() {
        let mut process = Process::new(1);
        process.push_instant_event(Slice::new("", "mark", 10.0, Args::new()));
        let counter = process.get_or_create_counter("", "c");
        counter.add_series("value", 0);
        counter.add_sample(2.0, [1.0]);
        process.update_bounds();
        assert_eq!(process.bounds.min, Some(2.0));
        assert_eq!(process.bounds.max, Some(10.0));
        assert_eq!(process.instant_events[0].duration, Some(0.0));
    }

    #[test]
    fn bounds_and_shift_include_objects() {
        let mut process = Process::new(1);
        process.objects.id_was_created("0x1", "cc", "Layer", 4.0).unwrap();
        process.objects.id_was_deleted("0x1", "cc", "Layer", 12.0).unwrap();
        process.update_bounds();
        assert_eq!(process.bounds.min, Some(4.0));
        assert_eq!(process.bounds.max, Some(12.0));

        process.shift_timestamps_forward(-4.0);
        assert_eq!(process.objects.instances("0x1")[0].deletion_ts, Some(8.0));
        assert_eq!(process.bounds.min, Some(0.0));
    }
}
