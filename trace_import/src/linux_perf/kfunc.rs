//! Function-graph tracer records. Entries and exits open and close slices on
//! the thread's kernel slice group, which is folded into its userland
//! slices once the import is complete.

use super::line::Record;
use super::{Details, import_error};
use crate::Result;
use regex::Regex;
use std::sync::LazyLock;
use trace_model::{Args, Model, SliceGroup};

static FUNC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"func=(\S+)").expect("func regex"));

/// The thread's kernel slice group, or `None` if the record carries no tgid
/// or the timestamp would break nesting (which is reported).
fn kernel_slices<'m>(model: &'m mut Model, line: usize, record: &Record<'_>, ts: f64) -> Option<&'m mut SliceGroup> {
    let tgid = record.tgid?;
    let thread = model.get_or_create_thread(tgid, record.pid);
    thread.name = Some(record.thread_name.to_string());
    if thread.kernel_slice_group.is_timestamp_valid_for_begin_or_end(ts) {
        return model.thread_mut(tgid, record.pid).map(|t| &mut t.kernel_slice_group);
    }
    import_error(model, line, "Timestamps are moving backward.");
    None
}

pub(super) fn entry(model: &mut Model, line: usize, record: &Record<'_>, ts: f64) -> Result<Details> {
    let (Some(_), Some(caps)) = (record.tgid, FUNC.captures(record.details)) else {
        return Ok(Details::Malformed);
    };
    let func = caps.get(1).map_or("", |m| m.as_str());
    if let Some(group) = kernel_slices(model, line, record, ts) {
        group.begin_slice("", func, ts, Args::new())?;
    }
    Ok(Details::Parsed)
}

pub(super) fn exit(model: &mut Model, line: usize, record: &Record<'_>, ts: f64) -> Result<Details> {
    if record.tgid.is_none() {
        return Ok(Details::Malformed);
    }
    if let Some(group) = kernel_slices(model, line, record, ts) {
        if group.open_slice_count() > 0 {
            group.end_slice(ts)?;
        }
    }
    Ok(Details::Parsed)
}
