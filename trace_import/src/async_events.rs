//! Deferred pairing of async (id-matched) events.
//!
//! Async begin, step and finish events may arrive on different threads, so
//! they cannot be matched with a nesting stack. Importers collect them while
//! walking their input and resolve them in one pass when the import is
//! finalized: events are sorted by time and paired by name, then id.

use std::collections::HashMap;
use trace_model::color::string_color_id;
use trace_model::{Args, AsyncSlice, Model, Slice, ThreadKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncPhase {
    /// `S`
    Start,
    /// `T`: the step names the interval that follows it.
    StepInto,
    /// `p`: the step names the interval that precedes it.
    StepPast,
    /// `F`
    Finish,
}

impl AsyncPhase {
    fn is_step(self) -> bool {
        matches!(self, AsyncPhase::StepInto | AsyncPhase::StepPast)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AsyncEvent {
    pub phase: AsyncPhase,
    pub category: String,
    pub name: Option<String>,
    pub id: Option<String>,
    /// Milliseconds.
    pub ts: f64,
    pub thread: ThreadKey,
    pub args: Args,
}

impl AsyncEvent {
    fn step_name(&self) -> String {
        match self.args.get("step") {
            Some(serde_json::Value::String(step)) => step.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }
}

/// Collects async events during import and turns them into
/// [`AsyncSlice`]s on finalize.
#[derive(Debug, Clone, Default)]
pub struct AsyncEventCollector {
    events: Vec<AsyncEvent>,
}

impl AsyncEventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: AsyncEvent) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Pair up the collected events and add the resulting slices to the
    /// start thread of each. Problems are recorded on the model as import
    /// errors. The collector is empty afterwards.
    pub fn resolve(&mut self, model: &mut Model) {
        if self.events.is_empty() {
            return;
        }
        let mut events = std::mem::take(&mut self.events);
        // Stable, so events at the same timestamp keep their input order.
        events.sort_by(|a, b| a.ts.total_cmp(&b.ts));

        let mut open: HashMap<String, HashMap<String, Vec<AsyncEvent>>> = HashMap::new();
        for event in events {
            let Some(name) = event.name.clone() else {
                model.push_import_error("Async events (ph: S, T, p, or F) require a name parameter.");
                continue;
            };
            let Some(id) = event.id.clone() else {
                model.push_import_error("Async events (ph: S, T, p, or F) require an id parameter.");
                continue;
            };

            if event.phase == AsyncPhase::Start {
                let by_id = open.entry(name).or_default();
                if by_id.contains_key(&id) {
                    model.push_import_error(format!(
                        "At {}, a slice of the same id {} was already open.",
                        event.ts, id
                    ));
                    continue;
                }
                by_id.insert(id, vec![event]);
                continue;
            }

            let Some(by_id) = open.get_mut(&name) else {
                model.push_import_error(format!("At {}, no slice named {} was open.", event.ts, name));
                continue;
            };
            let Some(chain) = by_id.get_mut(&id) else {
                model.push_import_error(format!(
                    "At {}, no slice named {} with id={} was open.",
                    event.ts, name, id
                ));
                continue;
            };
            let is_finish = event.phase == AsyncPhase::Finish;
            chain.push(event);
            if is_finish {
                if let Some(chain) = by_id.remove(&id) {
                    if let Some(slice) = build_slice(model, &name, &id, &chain) {
                        let start = slice.start_thread;
                        if let Some(thread) = model.thread_mut(start.pid, start.tid) {
                            thread.async_slice_group.push(slice);
                        }
                    }
                }
            }
        }
    }
}

/// Build the slice for a complete start..finish chain, or record why the
/// chain is invalid.
fn build_slice(model: &mut Model, name: &str, id: &str, chain: &[AsyncEvent]) -> Option<AsyncSlice> {
    let (first, last) = (chain.first()?, chain.last()?);
    let step_type = chain.get(1)?.phase;

    let mut sub_slices = Vec::with_capacity(chain.len() - 1);
    for j in 1..chain.len() {
        let (prev, current) = (&chain[j - 1], &chain[j]);
        if current.phase.is_step() && current.phase != step_type {
            model.push_import_error(format!(
                "At {}, a slice named {} with id={} had both begin and end steps, which is not allowed.",
                current.ts, name, id
            ));
            return None;
        }

        let target = if step_type == AsyncPhase::StepInto { prev } else { current };
        let sub_name = if target.phase.is_step() {
            format!("{}:{}", name, target.step_name())
        } else {
            name.to_string()
        };

        let mut args = first.args.clone();
        args.extend(target.args.clone());
        let color_id = string_color_id(&format!("{sub_name}{j}"));
        let mut sub = Slice::complete(&first.category, sub_name, prev.ts, current.ts - prev.ts, args)
            .with_color_id(color_id);
        if current.phase == AsyncPhase::Finish && step_type == AsyncPhase::StepInto {
            sub.args.extend(current.args.clone());
        }
        sub_slices.push(sub);
    }

    Some(AsyncSlice {
        slice: Slice::complete(&first.category, name, first.ts, last.ts - first.ts, first.args.clone()),
        id: id.to_string(),
        start_thread: first.thread,
        end_thread: last.thread,
        sub_slices,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(phase: AsyncPhase, name: &str, id: &str, ts: f64, tid: i64, args: serde_json::Value) -> AsyncEvent {
        AsyncEvent {
            phase,
            category: "net".to_string(),
            name: Some(name.to_string()),
            id: Some(id.to_string()),
            ts,
            thread: ThreadKey { pid: 1, tid },
            args: args.as_object().cloned().unwrap_or_default(),
        }
    }

    fn model() -> Model {
        let mut model = Model::new();
        model.get_or_create_thread(1, 1);
        model.get_or_create_thread(1, 2);
        model
    }

    #[test]
    fn start_finish_across_threads() {
        let mut model = model();
        let mut collector = AsyncEventCollector::new();
        collector.push(event(AsyncPhase::Finish, "fetch", "7", 5.0, 2, json!({"status": 200})));
        collector.push(event(AsyncPhase::Start, "fetch", "7", 1.0, 1, json!({"url": "/"})));
        collector.resolve(&mut model);

        assert!(collector.is_empty());
        assert!(model.import_errors.is_empty());
        let group = &model.thread(1, 1).unwrap().async_slice_group;
        assert_eq!(group.len(), 1);
        let slice = &group.slices[0];
        assert_eq!(slice.slice.title, "fetch");
        assert_eq!(slice.start(), 1.0);
        assert_eq!(slice.slice.duration, Some(4.0));
        assert_eq!(slice.start_thread.tid, 1);
        assert_eq!(slice.end_thread.tid, 2);
        assert_eq!(slice.slice.args["url"], "/");
        assert_eq!(slice.sub_slices.len(), 1);
        assert_eq!(slice.sub_slices[0].title, "fetch");
    }

    #[test]
    fn step_into_names_following_interval() {
        let mut model = model();
        let mut collector = AsyncEventCollector::new();
        collector.push(event(AsyncPhase::Start, "load", "1", 1.0, 1, json!({})));
        collector.push(event(AsyncPhase::StepInto, "load", "1", 2.0, 1, json!({"step": "parse"})));
        collector.push(event(AsyncPhase::Finish, "load", "1", 4.0, 1, json!({"done": true})));
        collector.resolve(&mut model);

        let slice = &model.thread(1, 1).unwrap().async_slice_group.slices[0];
        let subs: Vec<(&str, f64, Option<f64>)> = slice
            .sub_slices
            .iter()
            .map(|s| (s.title.as_str(), s.start, s.duration))
            .collect();
        assert_eq!(subs, vec![("load", 1.0, Some(1.0)), ("load:parse", 2.0, Some(2.0))]);
        assert_eq!(slice.sub_slices[1].args["done"], true);
    }

    #[test]
    fn step_past_names_preceding_interval() {
        let mut model = model();
        let mut collector = AsyncEventCollector::new();
        collector.push(event(AsyncPhase::Start, "load", "1", 1.0, 1, json!({})));
        collector.push(event(AsyncPhase::StepPast, "load", "1", 2.0, 1, json!({"step": "fetch"})));
        collector.push(event(AsyncPhase::Finish, "load", "1", 4.0, 1, json!({})));
        collector.resolve(&mut model);

        let slice = &model.thread(1, 1).unwrap().async_slice_group.slices[0];
        let titles: Vec<&str> = slice.sub_slices.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["load:fetch", "load"]);
    }

    #[test]
    fn mixed_step_types_are_rejected() {
        let mut model = model();
        let mut collector = AsyncEventCollector::new();
        collector.push(event(AsyncPhase::Start, "load", "1", 1.0, 1, json!({})));
        collector.push(event(AsyncPhase::StepInto, "load", "1", 2.0, 1, json!({"step": "a"})));
        collector.push(event(AsyncPhase::StepPast, "load", "1", 3.0, 1, json!({"step": "b"})));
        collector.push(event(AsyncPhase::Finish, "load", "1", 4.0, 1, json!({})));
        collector.resolve(&mut model);

        assert!(model.thread(1, 1).unwrap().async_slice_group.is_empty());
        assert_eq!(
            model.import_errors,
            vec!["At 3, a slice named load with id=1 had both begin and end steps, which is not allowed."]
        );
    }

    #[test]
    fn unmatched_events_are_import_errors() {
        let mut model = model();
        let mut collector = AsyncEventCollector::new();
        collector.push(event(AsyncPhase::Start, "a", "1", 1.0, 1, json!({})));
        collector.push(event(AsyncPhase::Start, "a", "1", 2.0, 1, json!({})));
        collector.push(event(AsyncPhase::Finish, "b", "1", 3.0, 1, json!({})));
        collector.push(event(AsyncPhase::Finish, "a", "2", 4.0, 1, json!({})));
        let mut nameless = event(AsyncPhase::Start, "", "1", 5.0, 1, json!({}));
        nameless.name = None;
        collector.push(nameless);
        let mut idless = event(AsyncPhase::Start, "c", "", 6.0, 1, json!({}));
        idless.id = None;
        collector.push(idless);
        collector.resolve(&mut model);

        assert_eq!(
            model.import_errors,
            vec![
                "At 2, a slice of the same id 1 was already open.",
                "At 3, no slice named b was open.",
                "At 4, no slice named a with id=2 was open.",
                "Async events (ph: S, T, p, or F) require a name parameter.",
                "Async events (ph: S, T, p, or F) require an id parameter.",
            ]
        );
        assert!(model.thread(1, 1).unwrap().async_slice_group.is_empty());
    }

    #[test]
    fn same_id_can_be_reused_after_finish() {
        let mut model = model();
        let mut collector = AsyncEventCollector::new();
        collector.push(event(AsyncPhase::Start, "a", "1", 1.0, 1, json!({})));
        collector.push(event(AsyncPhase::Finish, "a", "1", 2.0, 1, json!({})));
        collector.push(event(AsyncPhase::Start, "a", "1", 3.0, 1, json!({})));
        collector.push(event(AsyncPhase::Finish, "a", "1", 4.0, 1, json!({})));
        collector.resolve(&mut model);
        assert_eq!(model.thread(1, 1).unwrap().async_slice_group.len(), 2);
        assert!(model.import_errors.is_empty());
    }
}
