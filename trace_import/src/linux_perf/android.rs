//! Android framework markers written to `trace_marker`:
//!
//! - `B|tgid|title` begins a slice on the writing thread
//! - `E` ends the most recent one
//! - `C|tgid|name|value` samples a process counter
//! - `S|tgid|name|cookie` and `F|tgid|name|cookie` start and finish an
//!   async slice

use super::line::Record;
use super::{Details, LinuxPerfImporter, import_error};
use crate::Result;
use crate::async_events::{AsyncEvent, AsyncPhase};
use trace_model::color::string_color_id;
use trace_model::{Args, Model};

pub(super) fn is_android_marker(details: &str) -> bool {
    details == "E" || ["B|", "E|", "C|", "S|", "F|"].iter().any(|tag| details.starts_with(tag))
}

impl LinuxPerfImporter {
    pub(super) fn import_android_marker(
        &mut self,
        model: &mut Model,
        line: usize,
        record: &Record<'_>,
        ts: f64,
    ) -> Result<Details> {
        let fields: Vec<&str> = record.details.split('|').collect();
        match fields.as_slice() {
            ["B", tgid, title, ..] => {
                let Ok(tgid) = tgid.parse::<i64>() else {
                    return Ok(Details::Malformed);
                };
                let thread = model.get_or_create_thread(tgid, record.pid);
                thread.name = Some(record.thread_name.to_string());
                if !thread.slice_group.is_timestamp_valid_for_begin_or_end(ts) {
                    import_error(model, line, "Timestamps are moving backward.");
                    return Ok(Details::Parsed);
                }
                thread.slice_group.begin_slice("", *title, ts, Args::new())?;
                self.android_tgids.insert(record.pid, tgid);
            }
            ["E", ..] => {
                // An end without a begin in this trace is dropped silently.
                let Some(&tgid) = self.android_tgids.get(&record.pid) else {
                    return Ok(Details::Parsed);
                };
                let Some(thread) = model.thread_mut(tgid, record.pid) else {
                    return Ok(Details::Parsed);
                };
                if thread.slice_group.open_slice_count() == 0 {
                    return Ok(Details::Parsed);
                }
                if !thread.slice_group.is_timestamp_valid_for_begin_or_end(ts) {
                    import_error(model, line, "Timestamps are moving backward.");
                    return Ok(Details::Parsed);
                }
                thread.slice_group.end_slice(ts)?;
            }
            ["C", tgid, name, value, ..] => {
                let (Ok(tgid), Ok(value)) = (tgid.parse::<i64>(), value.trim().parse::<f64>()) else {
                    return Ok(Details::Malformed);
                };
                let counter = model.get_or_create_process(tgid).get_or_create_counter("", name);
                if counter.num_series() == 0 {
                    counter.add_series("value", string_color_id(&format!("{name}.value")));
                }
                counter.add_sample(ts, [value]);
            }
            [tag @ ("S" | "F"), tgid, name, cookie, ..] => {
                let Ok(tgid) = tgid.parse::<i64>() else {
                    return Ok(Details::Malformed);
                };
                let thread = model.get_or_create_thread(tgid, record.pid);
                thread.name = Some(record.thread_name.to_string());
                self.async_events.push(AsyncEvent {
                    phase: if *tag == "S" { AsyncPhase::Start } else { AsyncPhase::Finish },
                    category: String::new(),
                    name: Some(name.to_string()),
                    id: Some(cookie.trim().to_string()),
                    ts,
                    thread: thread.key(),
                    args: Args::new(),
                });
            }
            _ => return Ok(Details::Malformed),
        }
        Ok(Details::Parsed)
    }
}
