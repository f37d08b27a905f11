//! Trace importers and the import pipeline.
//!
//! Raw trace payloads are matched to an importer by capability, imported in
//! priority order into a [`trace_model::Model`], and then finalized: open
//! slices are closed at the end of the trace, async events are paired up,
//! kernel slices are merged into userland slices, and the world is shifted
//! to start at zero.
//!
//! # Available Importers
//!
//! - [`trace_event`] - Trace Event JSON (arrays or `{"traceEvents": [...]}`)
//! - [`linux_perf`] - Linux ftrace text, plain or embedded in systrace HTML
//! - [`v8_log`] - V8 `--prof` logs
//!
//! # Example
//!
//! ```
//! use trace_import::{TraceData, TraceImporter};
//!
//! let trace = r#"[
//!     {"name": "a", "ph": "B", "pid": 1, "tid": 1, "ts": 1000},
//!     {"ph": "E", "pid": 1, "tid": 1, "ts": 3000}
//! ]"#;
//! let model = TraceImporter::new().import(vec![TraceData::from(trace)]).unwrap();
//! let thread = model.thread(1, 1).unwrap();
//! assert_eq!(thread.slice_group.slices()[0].duration, Some(2.0));
//! ```

use thiserror::Error;
use trace_model::ModelError;

pub mod async_events;
pub mod importer;
pub mod linux_perf;
pub mod object_events;
pub mod trace_event;
pub mod v8_log;

pub use importer::{
    EmptyImporter, ImportOptions, Importer, ImporterKind, ImporterRegistry, TraceData,
    TraceImporter,
};

// Re-export trace_model for convenience
pub use trace_model;

/// Errors that abort an import.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("could not find an importer for the provided trace data")]
    UnrecognizedTraceFormat,

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Result type for import operations.
pub type Result<T> = std::result::Result<T, ImportError>;
