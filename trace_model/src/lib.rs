//! In-memory model of an imported performance trace.
//!
//! A [`Model`] holds processes, their threads, and on each thread a
//! [`SliceGroup`] of nested time intervals built from begin/end events.
//! Importers (see the `trace_import` crate) fill the model in; this crate
//! owns the interval algebra: begin/end matching, auto-closing of
//! unterminated slices, bounds, and merging of kernel and userland slice
//! groups that do not nest consistently with each other.
//!
//! # Example
//!
//! ```
//! use trace_model::{Args, Slice, SliceGroup};
//!
//! let mut userland = SliceGroup::new();
//! userland.begin_slice("", "one", 2.0, Args::new()).unwrap();
//! userland.end_slice(4.0).unwrap();
//!
//! let mut kernel = SliceGroup::new();
//! kernel.push_slice(Slice::complete("", "two", 1.0, 2.0, Args::new()));
//!
//! let merged = SliceGroup::merge(&userland, &kernel).unwrap();
//! let titles: Vec<_> = merged.slices().iter().map(|s| s.title.as_str()).collect();
//! assert_eq!(titles, ["two", "two (cont.)", "one"]);
//! ```

use thiserror::Error;

mod async_slice_group;
pub mod color;
mod counter;
mod kernel;
mod model;
mod object_collection;
mod process;
mod range;
mod sample;
mod slice;
mod slice_group;
mod thread;

pub use async_slice_group::{AsyncSlice, AsyncSliceGroup};
pub use counter::{Counter, CounterSeries};
pub use kernel::{Cpu, Kernel};
pub use model::Model;
pub use object_collection::{ObjectCollection, ObjectInstance, ObjectSnapshot};
pub use process::Process;
pub use range::Range;
pub use sample::Sample;
pub use slice::{Args, CONTINUATION_SUFFIX, Slice};
pub use slice_group::SliceGroup;
pub use thread::{Thread, ThreadKey};

/// Structural errors that abort model construction.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("slices must be added in increasing timestamp order: {timestamp} is before open slice start {open_start}")]
    OrderingViolation { timestamp: f64, open_start: f64 },

    #[error("end_slice called without any open slices")]
    UnbalancedEnd,

    #[error("slice '{title}' ends at {end}, before its start {start}")]
    NegativeDuration { title: String, start: f64, end: f64 },

    #[error("cannot merge slice groups: group {group} still has {open} open slices")]
    UnmergeableOpenState { group: &'static str, open: usize },

    #[error("samples must be added in increasing timestamp order: {timestamp} is before {last}")]
    SampleOrderingViolation { timestamp: f64, last: f64 },

    #[error("object {id} must be mutated in ascending timestamp order (at {ts})")]
    ObjectMutationOutOfOrder { id: String, ts: f64 },

    #[error("no instance of object {id} is alive at {ts}")]
    NoLiveObject { id: String, ts: f64 },

    #[error("object {id} has {field} '{expected}' but was referenced with '{found}'")]
    ObjectIdentityMismatch { id: String, field: &'static str, expected: String, found: String },

    #[error("snapshots of object {id} must be added in time order: {ts} is before {last}")]
    SnapshotOrderingViolation { id: String, ts: f64, last: f64 },

    #[error("object {id} cannot be deleted at {ts}, before its creation at {created}")]
    DeletedBeforeCreation { id: String, ts: f64, created: f64 },
}

/// Result type for model operations.
pub type Result<T> = std::result::Result<T, ModelError>;
