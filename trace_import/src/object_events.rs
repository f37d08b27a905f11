//! Deferred resolution of object lifetime events.
//!
//! `N`, `O` and `D` events create, snapshot and delete objects. They are
//! collected during import and applied to each process's object collection
//! in time order when the import is finalized.

use trace_model::{Args, Model};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectPhase {
    /// `N`
    Create,
    /// `O`
    Snapshot,
    /// `D`
    Delete,
}

impl ObjectPhase {
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "N" => Some(ObjectPhase::Create),
            "O" => Some(ObjectPhase::Snapshot),
            "D" => Some(ObjectPhase::Delete),
            _ => None,
        }
    }

    fn code(self) -> &'static str {
        match self {
            ObjectPhase::Create => "N",
            ObjectPhase::Snapshot => "O",
            ObjectPhase::Delete => "D",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectEvent {
    pub phase: ObjectPhase,
    pub category: String,
    pub name: Option<String>,
    pub id: Option<String>,
    /// Milliseconds.
    pub ts: f64,
    pub pid: i64,
    pub args: Args,
}

impl ObjectEvent {
    fn describe(&self) -> String {
        format!(
            "{} event {} at ts={}",
            self.phase.code(),
            self.name.as_deref().unwrap_or("<unnamed>"),
            self.ts
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct ObjectEventCollector {
    events: Vec<ObjectEvent>,
}

impl ObjectEventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: ObjectEvent) {
        self.events.push(event);
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Apply the collected events to the object collections of their
    /// processes. Rejected events are recorded as import errors and
    /// skipped. The collector is empty afterwards.
    pub fn resolve(&mut self, model: &mut Model) {
        let mut events = std::mem::take(&mut self.events);
        events.sort_by(|a, b| a.ts.total_cmp(&b.ts));
        for event in events {
            apply(model, event);
        }
    }
}

fn apply(model: &mut Model, event: ObjectEvent) {
    if event.name.is_none() {
        model.push_import_error(format!(
            "While processing {}: Object events require an name parameter.",
            event.describe()
        ));
    }
    let Some(id) = event.id.as_deref() else {
        model.push_import_error(format!(
            "While processing {}: Object events require an id parameter.",
            event.describe()
        ));
        return;
    };
    let name = event.name.as_deref().unwrap_or("");
    let ts = event.ts;
    let snapshot = match (event.phase, event.args.get("snapshot")) {
        (ObjectPhase::Snapshot, None) => {
            model.push_import_error(format!(
                "While processing {id} at ts={ts}: Snapshots must have args: {{snapshot: ...}}"
            ));
            return;
        }
        (_, snapshot) => snapshot.cloned().unwrap_or_default(),
    };

    let objects = &mut model.get_or_create_process(event.pid).objects;
    let result = match event.phase {
        ObjectPhase::Create => objects
            .id_was_created(id, &event.category, name, ts)
            .map(|_| ())
            .map_err(|e| ("create of ", e)),
        ObjectPhase::Snapshot => objects
            .add_snapshot(id, &event.category, name, ts, snapshot)
            .map(|_| ())
            .map_err(|e| ("snapshot of ", e)),
        ObjectPhase::Delete => objects
            .id_was_deleted(id, &event.category, name, ts)
            .map(|_| ())
            .map_err(|e| ("delete of ", e)),
    };
    if let Err((action, e)) = result {
        model.push_import_error(format!("While processing {action}{id} at ts={ts}: {e}"));
    }
}
