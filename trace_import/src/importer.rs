//! Importer selection and the model import pipeline.

use crate::{ImportError, Result, linux_perf, trace_event, v8_log};
use log::debug;
use std::collections::VecDeque;
use std::path::Path;
use trace_model::Model;

/// A raw trace payload handed to the importers.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceData {
    /// Undecoded text: JSON, ftrace output, a V8 log, ...
    Text(String),
    /// Already decoded JSON.
    Json(serde_json::Value),
}

impl TraceData {
    /// Read a trace file as text.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::Text(std::fs::read_to_string(path)?))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            TraceData::Text(text) => Some(text),
            TraceData::Json(_) => None,
        }
    }
}

impl From<String> for TraceData {
    fn from(text: String) -> Self {
        TraceData::Text(text)
    }
}

impl From<&str> for TraceData {
    fn from(text: &str) -> Self {
        TraceData::Text(text.to_string())
    }
}

impl From<serde_json::Value> for TraceData {
    fn from(value: serde_json::Value) -> Self {
        TraceData::Json(value)
    }
}

/// One importer instance, bound to one trace payload.
pub trait Importer {
    fn name(&self) -> &'static str;

    /// Importers run in ascending priority order.
    fn import_priority(&self) -> u32;

    /// Further payloads embedded in this one. Called once, before any
    /// events are imported.
    fn extract_subtraces(&mut self) -> Vec<TraceData> {
        Vec::new()
    }

    /// Walk the payload and add what it describes to `model`. The first
    /// importer to run is the primary one; every later one is secondary.
    fn import_events(&mut self, model: &mut Model, is_secondary: bool) -> Result<()>;

    /// Called after every importer has imported its events and open slices
    /// have been closed.
    fn finalize_import(&mut self, _model: &mut Model) -> Result<()> {
        Ok(())
    }
}

/// A registered importer type: a capability check and a constructor.
#[derive(Clone, Copy)]
pub struct ImporterKind {
    pub name: &'static str,
    pub can_import: fn(&TraceData) -> bool,
    pub create: fn(TraceData) -> Result<Box<dyn Importer>>,
}

impl std::fmt::Debug for ImporterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImporterKind").field("name", &self.name).finish()
    }
}

/// Importer kinds in registration order.
#[derive(Debug, Clone)]
pub struct ImporterRegistry {
    kinds: Vec<ImporterKind>,
}

impl ImporterRegistry {
    /// A registry with no importers at all.
    pub fn empty() -> Self {
        Self { kinds: Vec::new() }
    }

    pub fn register(&mut self, kind: ImporterKind) {
        self.kinds.push(kind);
    }

    /// The first registered kind that can import `data`.
    pub fn find(&self, data: &TraceData) -> Option<&ImporterKind> {
        self.kinds.iter().find(|kind| (kind.can_import)(data))
    }

    pub fn kinds(&self) -> &[ImporterKind] {
        &self.kinds
    }
}

impl Default for ImporterRegistry {
    fn default() -> Self {
        Self {
            kinds: vec![
                EmptyImporter::KIND,
                trace_event::TraceEventImporter::KIND,
                linux_perf::LinuxPerfImporter::KIND,
                v8_log::V8LogImporter::KIND,
            ],
        }
    }
}

/// Accepts empty payloads and imports nothing.
#[derive(Debug, Default)]
pub struct EmptyImporter;

impl EmptyImporter {
    pub const KIND: ImporterKind = ImporterKind {
        name: "empty",
        can_import: Self::can_import,
        create: Self::create,
    };

    pub fn can_import(data: &TraceData) -> bool {
        match data {
            TraceData::Text(text) => text.is_empty(),
            TraceData::Json(serde_json::Value::Array(events)) => events.is_empty(),
            TraceData::Json(_) => false,
        }
    }

    fn create(_data: TraceData) -> Result<Box<dyn Importer>> {
        Ok(Box::new(EmptyImporter))
    }
}

impl Importer for EmptyImporter {
    fn name(&self) -> &'static str {
        "empty"
    }

    fn import_priority(&self) -> u32 {
        0
    }

    fn import_events(&mut self, _model: &mut Model, _is_secondary: bool) -> Result<()> {
        Ok(())
    }
}

/// Post-import behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportOptions {
    /// Translate all timestamps so the trace starts at zero.
    pub shift_world_to_zero: bool,
    /// Drop threads that ended up with no content.
    pub prune_empty_containers: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            shift_world_to_zero: true,
            prune_empty_containers: true,
        }
    }
}

/// Builds a [`Model`] from one or more trace payloads.
#[derive(Debug, Clone, Default)]
pub struct TraceImporter {
    registry: ImporterRegistry,
    options: ImportOptions,
}

impl TraceImporter {
    /// Create an importer with the default registry and options.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ImportOptions) -> Self {
        Self {
            registry: ImporterRegistry::default(),
            options,
        }
    }

    pub fn with_registry(registry: ImporterRegistry, options: ImportOptions) -> Self {
        Self { registry, options }
    }

    pub fn options(&self) -> &ImportOptions {
        &self.options
    }

    /// Import `traces` into a fresh model. The first trace is the primary
    /// one; the rest, and any subtraces they carry, are secondary.
    pub fn import(&self, traces: Vec<TraceData>) -> Result<Model> {
        let mut model = Model::new();

        let mut pending: VecDeque<TraceData> = traces.into();
        let mut importers: Vec<Box<dyn Importer>> = Vec::new();
        while let Some(data) = pending.pop_front() {
            let kind = self
                .registry
                .find(&data)
                .ok_or(ImportError::UnrecognizedTraceFormat)?;
            debug!("selected {} importer", kind.name);
            let mut importer = (kind.create)(data)?;
            pending.extend(importer.extract_subtraces());
            importers.push(importer);
        }

        importers.sort_by_key(|importer| importer.import_priority());

        for (index, importer) in importers.iter_mut().enumerate() {
            debug!(
                "importing events with {} (priority {})",
                importer.name(),
                importer.import_priority()
            );
            importer.import_events(&mut model, index > 0)?;
        }

        model.update_bounds();
        if let Some(max) = model.bounds.max {
            model.auto_close_open_slices(max)?;
        }

        for importer in &mut importers {
            debug!("finalizing {}", importer.name());
            importer.finalize_import(&mut model)?;
        }

        if self.options.prune_empty_containers {
            model.prune_empty_containers();
        }

        model.merge_kernel_with_userland()?;

        model.update_bounds();
        model.update_categories();

        if self.options.shift_world_to_zero {
            model.shift_world_to_zero();
        }
        if let Some(max) = model.bounds.max {
            model.auto_delete_objects(max);
        }

        debug!(
            "imported {} processes with {} import errors",
            model.processes.len(),
            model.import_errors.len()
        );
        Ok(model)
    }
}
