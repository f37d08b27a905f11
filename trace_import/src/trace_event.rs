//! Import Trace Event JSON.
//!
//! Accepts either a bare array of events or a container object of the form
//! `{"traceEvents": [...], ...}`. Container fields other than `traceEvents`
//! become model metadata, except `systemTraceEvents`, which carries a
//! kernel trace and is handed back as a subtrace.
//!
//! Timestamps and durations are microseconds in the input and milliseconds
//! in the model.

use crate::async_events::{AsyncEvent, AsyncEventCollector, AsyncPhase};
use crate::importer::{Importer, ImporterKind, TraceData};
use crate::object_events::{ObjectEvent, ObjectEventCollector, ObjectPhase};
use crate::Result;
use log::trace;
use serde::Deserialize;
use std::borrow::Cow;
use trace_model::color::string_color_id;
use trace_model::{Args, Model, Sample, Slice};

/// A single record of the trace event format.
#[derive(Debug, Clone, Deserialize)]
pub struct TraceEvent {
    /// Event name.
    #[serde(default)]
    pub name: Option<String>,
    /// Event category.
    #[serde(default)]
    pub cat: String,
    /// Phase code, e.g. `B`, `E`, `X`, `C`.
    #[serde(default)]
    pub ph: String,
    #[serde(default)]
    pub pid: i64,
    #[serde(default)]
    pub tid: i64,
    /// Timestamp in microseconds.
    #[serde(default)]
    pub ts: f64,
    /// Duration of complete events, in microseconds.
    #[serde(default)]
    pub dur: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_args")]
    pub args: Args,
    /// Async and counter id - can be string or number.
    #[serde(default, deserialize_with = "deserialize_optional_string_or_number")]
    pub id: Option<String>,
    /// Scope of instant events: `g`, `p` or `t`.
    #[serde(default)]
    pub s: Option<String>,
}

impl TraceEvent {
    fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    /// Timestamp in milliseconds.
    fn ts_ms(&self) -> f64 {
        self.ts / 1000.0
    }
}

/// Deserialize args, treating a missing or null value as empty.
fn deserialize_args<'de, D>(deserializer: D) -> std::result::Result<Args, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    let value: Option<serde_json::Value> = Deserialize::deserialize(deserializer)?;
    match value {
        Some(serde_json::Value::Object(map)) => Ok(map),
        Some(serde_json::Value::Null) | None => Ok(Args::new()),
        Some(_) => Err(D::Error::custom("expected an object for args")),
    }
}

/// Deserialize an optional field that can be either a string or number.
fn deserialize_optional_string_or_number<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value: Option<serde_json::Value> = Deserialize::deserialize(deserializer)?;
    match value {
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(_) | None => Ok(None),
    }
}

/// Some writers cannot guarantee the closing `]` of an event array ends up
/// in the file. Close it, dropping a dangling comma.
fn repair_truncated_array(text: &str) -> Cow<'_, str> {
    if !text.starts_with('[') {
        return Cow::Borrowed(text);
    }
    let mut trimmed = text.trim_end();
    if let Some(stripped) = trimmed.strip_suffix(',') {
        trimmed = stripped.trim_end();
    }
    if trimmed.ends_with(']') {
        Cow::Borrowed(trimmed)
    } else {
        Cow::Owned(format!("{trimmed}]"))
    }
}

fn has_phase(event: Option<&serde_json::Value>) -> bool {
    event.is_some_and(|e| e.get("ph").is_some())
}

pub struct TraceEventImporter {
    events: Vec<serde_json::Value>,
    container_metadata: serde_json::Map<String, serde_json::Value>,
    system_trace_events: Option<String>,
    async_events: AsyncEventCollector,
    object_events: ObjectEventCollector,
}

impl TraceEventImporter {
    pub const KIND: ImporterKind = ImporterKind {
        name: "trace_event",
        can_import: Self::can_import,
        create: Self::create,
    };

    pub fn can_import(data: &TraceData) -> bool {
        match data {
            TraceData::Text(text) => matches!(text.trim_start().chars().next(), Some('{' | '[')),
            TraceData::Json(serde_json::Value::Array(events)) => has_phase(events.first()),
            TraceData::Json(value) => match value.get("traceEvents") {
                Some(serde_json::Value::Array(events)) => has_phase(events.first()),
                _ => false,
            },
        }
    }

    fn create(data: TraceData) -> Result<Box<dyn Importer>> {
        Ok(Box::new(Self::new(data)?))
    }

    /// Decode the payload. Fails only if it is not JSON at all; problems
    /// with individual events are reported during import.
    pub fn new(data: TraceData) -> Result<Self> {
        let value = match data {
            TraceData::Text(text) => {
                let text = repair_truncated_array(text.trim_start());
                serde_json::from_str(&text)?
            }
            TraceData::Json(value) => value,
        };

        let mut importer = Self {
            events: Vec::new(),
            container_metadata: serde_json::Map::new(),
            system_trace_events: None,
            async_events: AsyncEventCollector::new(),
            object_events: ObjectEventCollector::new(),
        };
        match value {
            serde_json::Value::Array(events) => importer.events = events,
            serde_json::Value::Object(mut container) => {
                if let Some(serde_json::Value::Array(events)) = container.remove("traceEvents") {
                    importer.events = events;
                }
                if let Some(serde_json::Value::String(system)) = container.remove("systemTraceEvents") {
                    importer.system_trace_events = Some(system);
                }
                importer.container_metadata = container;
            }
            _ => {}
        }
        Ok(importer)
    }

    fn process_event(&mut self, model: &mut Model, event: TraceEvent) -> Result<()> {
        let phase = event.ph.clone();
        match phase.as_str() {
            "B" | "E" => self.process_duration_event(model, event)?,
            "X" => self.process_complete_event(model, event),
            "S" => self.process_async_event(model, event, AsyncPhase::Start),
            "T" => self.process_async_event(model, event, AsyncPhase::StepInto),
            "p" => self.process_async_event(model, event, AsyncPhase::StepPast),
            "F" => self.process_async_event(model, event, AsyncPhase::Finish),
            // I is the historic instant marker.
            "I" | "i" => self.process_instant_event(model, event),
            "P" => self.process_sample_event(model, event),
            "C" => self.process_counter_event(model, event),
            "M" => self.process_metadata_event(model, event),
            "N" | "O" | "D" => self.process_object_event(model, event),
            "s" | "t" | "f" => {
                trace!("skipping {} event {}", phase, event.name());
            }
            other => model.push_import_error(format!(
                "Unrecognized event phase: {} ({})",
                other,
                event.name()
            )),
        }
        Ok(())
    }

    fn process_object_event(&mut self, model: &mut Model, event: TraceEvent) {
        let Some(phase) = ObjectPhase::from_code(&event.ph) else {
            return;
        };
        model.get_or_create_thread(event.pid, event.tid);
        let ts = event.ts_ms();
        self.object_events.push(ObjectEvent {
            phase,
            category: event.cat,
            name: event.name,
            id: event.id,
            ts,
            pid: event.pid,
            args: event.args,
        });
    }

    fn process_duration_event(&mut self, model: &mut Model, event: TraceEvent) -> Result<()> {
        let ts = event.ts_ms();
        let group = &mut model.get_or_create_thread(event.pid, event.tid).slice_group;
        if !group.is_timestamp_valid_for_begin_or_end(ts) {
            model.push_import_error("Timestamps are moving backward.");
            return Ok(());
        }

        if event.ph == "B" {
            let title = event.name().to_string();
            group.begin_slice(event.cat, title, ts, event.args)?;
            return Ok(());
        }

        if group.open_slice_count() == 0 {
            model.push_import_error("E phase event without a matching B phase event.");
            return Ok(());
        }

        let mut errors = Vec::new();
        let slice = group.end_slice(ts)?;
        if let Some(name) = &event.name {
            if *name != slice.title {
                errors.push(format!(
                    "Titles do not match. Title is {} in openSlice, and is {} in endSlice",
                    slice.title, name
                ));
            }
        }
        for (key, value) in event.args {
            if slice.args.contains_key(&key) {
                errors.push(format!(
                    "Both the B and E phases of {} provided values for argument {}. \
                     The value of the E phase event will be used.",
                    slice.title, key
                ));
            }
            slice.args.insert(key, value);
        }
        for error in errors {
            model.push_import_error(error);
        }
        Ok(())
    }

    fn process_complete_event(&mut self, model: &mut Model, event: TraceEvent) {
        let duration = event.dur.map_or(0.0, |dur| dur / 1000.0);
        let (title, ts) = (event.name().to_string(), event.ts_ms());
        let slice = Slice::complete(event.cat, title, ts, duration, event.args);
        model
            .get_or_create_thread(event.pid, event.tid)
            .slice_group
            .push_slice(slice);
    }

    fn process_async_event(&mut self, model: &mut Model, event: TraceEvent, phase: AsyncPhase) {
        let thread = model.get_or_create_thread(event.pid, event.tid).key();
        self.async_events.push(AsyncEvent {
            phase,
            category: event.cat,
            ts: event.ts / 1000.0,
            name: event.name,
            id: event.id,
            thread,
            args: event.args,
        });
    }

    fn process_instant_event(&mut self, model: &mut Model, event: TraceEvent) {
        let (title, ts) = (event.name().to_string(), event.ts_ms());
        let instant = Slice::instant(event.cat, title, ts, event.args);
        match event.s.as_deref() {
            Some("g") => model.push_instant_event(instant),
            Some("p") => model.get_or_create_process(event.pid).push_instant_event(instant),
            // Thread scope is the default for old traces without `s`.
            _ => {
                model
                    .get_or_create_thread(event.pid, event.tid)
                    .slice_group
                    .push_instant_event(instant);
            }
        }
    }

    fn process_sample_event(&mut self, model: &mut Model, event: TraceEvent) {
        let (title, ts) = (event.name().to_string(), event.ts_ms());
        let sample = Sample::new(event.cat, title, ts, event.args);
        let added = model
            .get_or_create_thread(event.pid, event.tid)
            .add_sample(sample)
            .map(|_| ());
        if let Err(e) = added {
            model.push_import_error(e.to_string());
        }
    }

    fn process_counter_event(&mut self, model: &mut Model, event: TraceEvent) {
        let counter_name = match &event.id {
            Some(id) => format!("{}[{}]", event.name(), id),
            None => event.name().to_string(),
        };

        let process = model.get_or_create_process(event.pid);
        let counter = process.get_or_create_counter(&event.cat, &counter_name);
        if counter.num_series() == 0 {
            for key in event.args.keys() {
                counter.add_series(key.as_str(), string_color_id(&format!("{counter_name}.{key}")));
            }
            if counter.num_series() == 0 {
                process.remove_counter(&event.cat, &counter_name);
                model.push_import_error(format!(
                    "Expected counter {} to have at least one argument to use as a value.",
                    event.name()
                ));
                return;
            }
        }

        let values: Vec<f64> = counter
            .series
            .iter()
            .map(|series| event.args.get(&series.name).and_then(|v| v.as_f64()).unwrap_or(0.0))
            .collect();
        counter.add_sample(event.ts_ms(), values);
    }

    fn process_metadata_event(&mut self, model: &mut Model, event: TraceEvent) {
        let arg_str = |key: &str| event.args.get(key).and_then(|v| v.as_str()).map(str::to_string);
        let arg_i64 = |key: &str| event.args.get(key).and_then(|v| v.as_i64());

        match event.name() {
            "process_name" => model.get_or_create_process(event.pid).name = arg_str("name"),
            "process_labels" => {
                let process = model.get_or_create_process(event.pid);
                for label in arg_str("labels").unwrap_or_default().split(',') {
                    if !label.is_empty() && !process.labels.iter().any(|l| l == label) {
                        process.labels.push(label.to_string());
                    }
                }
            }
            "process_sort_index" => {
                if let Some(index) = arg_i64("sort_index") {
                    model.get_or_create_process(event.pid).sort_index = index;
                }
            }
            "thread_name" => model.get_or_create_thread(event.pid, event.tid).name = arg_str("name"),
            "thread_sort_index" => {
                if let Some(index) = arg_i64("sort_index") {
                    model.get_or_create_thread(event.pid, event.tid).sort_index = index;
                }
            }
            other => model.push_import_error(format!("Unrecognized metadata name: {other}")),
        }
    }
}

impl Importer for TraceEventImporter {
    fn name(&self) -> &'static str {
        "trace_event"
    }

    fn import_priority(&self) -> u32 {
        1
    }

    fn extract_subtraces(&mut self) -> Vec<TraceData> {
        self.system_trace_events
            .take()
            .map(TraceData::Text)
            .into_iter()
            .collect()
    }

    fn import_events(&mut self, model: &mut Model, _is_secondary: bool) -> Result<()> {
        model.metadata.extend(std::mem::take(&mut self.container_metadata));

        for value in std::mem::take(&mut self.events) {
            match serde_json::from_value::<TraceEvent>(value) {
                Ok(event) => self.process_event(model, event)?,
                Err(e) => model.push_import_error(format!("Malformed trace event: {e}")),
            }
        }
        Ok(())
    }

    fn finalize_import(&mut self, model: &mut Model) -> Result<()> {
        self.async_events.resolve(model);
        self.object_events.resolve(model);
        Ok(())
    }
}
