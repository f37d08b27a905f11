//! Import V8 `--prof` logs.
//!
//! Timer events become slices on a `V8 Timers` thread. Every tick becomes a
//! sample on `V8 PC`, named after the code its program counter points into,
//! and its call stack feeds a timeline of nested slices on `V8 JavaScript`.
//! All three threads live in a pseudo process. Times in the log are
//! microseconds.

mod code_map;
pub mod log_reader;
mod timeline;

use crate::importer::{Importer, ImporterKind, TraceData};
use crate::{ImportError, Result};
use code_map::{CodeEntry, CodeMap};
use log::{debug, trace};
use log_reader::{parse_number, split_fields};
use serde_json::json;
use timeline::StackTimeline;
use trace_model::{Args, Model, Sample, Slice};

/// Process holding the V8 threads.
pub const V8_PID: i64 = -32;
const TIMER_TID: i64 = 1;
const JAVASCRIPT_TID: i64 = 2;
const PC_TID: i64 = 3;

const UNKNOWN_CODE: &str = "UnknownCode";

const RECORD_PREFIXES: [&str; 5] = ["timer-event,", "tick,", "shared-library,", "profiler,", "code-creation,"];

/// Timers worth showing, with whether each pauses the VM and whether it
/// runs no JavaScript.
const TIMERS: [(&str, bool, bool); 12] = [
    ("V8.Execute", false, false),
    ("V8.External", false, true),
    ("V8.CompileFullCode", true, true),
    ("V8.RecompileSynchronous", true, true),
    ("V8.RecompileParallel", false, false),
    ("V8.CompileEval", true, true),
    ("V8.Parse", true, true),
    ("V8.PreParse", true, true),
    ("V8.ParseLazy", true, true),
    ("V8.GCScavenger", true, true),
    ("V8.GCCompactor", true, true),
    ("V8.GCContext", true, true),
];

fn timer_args(name: &str) -> Option<Args> {
    let &(_, pause, no_execution) = TIMERS.iter().find(|(timer, ..)| *timer == name)?;
    let mut args = Args::new();
    args.insert("pause".to_string(), json!(pause));
    args.insert("no_execution".to_string(), json!(no_execution));
    Some(args)
}

fn micros_to_ms(field: &str) -> Option<f64> {
    parse_number(field).map(|us| us as f64 / 1000.0)
}

pub struct V8LogImporter {
    log: String,
    code_map: CodeMap,
    timeline: StackTimeline,
}

impl V8LogImporter {
    pub const KIND: ImporterKind = ImporterKind {
        name: "v8_log",
        can_import: Self::can_import,
        create: Self::create,
    };

    pub fn can_import(data: &TraceData) -> bool {
        data.as_text()
            .is_some_and(|text| RECORD_PREFIXES.iter().any(|prefix| text.starts_with(prefix)))
    }

    fn create(data: TraceData) -> Result<Box<dyn Importer>> {
        Ok(Box::new(Self::new(data)?))
    }

    pub fn new(data: TraceData) -> Result<Self> {
        match data {
            TraceData::Text(log) => Ok(Self {
                log,
                code_map: CodeMap::new(),
                timeline: StackTimeline::new(),
            }),
            TraceData::Json(_) => Err(ImportError::UnrecognizedTraceFormat),
        }
    }

    /// Handle one record. `None` means its fields did not parse.
    fn process_record(&mut self, model: &mut Model, fields: &[String]) -> Option<()> {
        let (kind, fields) = fields.split_first()?;
        match kind.as_str() {
            "timer-event" => {
                let [name, start, length, ..] = fields else { return None };
                let (start, length) = (micros_to_ms(start)?, micros_to_ms(length)?);
                if let Some(args) = timer_args(name) {
                    let slice = Slice::complete("v8", name.as_str(), start, length, args);
                    model.get_or_create_thread(V8_PID, TIMER_TID).slice_group.push_slice(slice);
                }
            }
            "timer-event-start" => {
                let [name, start, ..] = fields else { return None };
                let start = micros_to_ms(start)?;
                if let Some(args) = timer_args(name) {
                    let group = &mut model.get_or_create_thread(V8_PID, TIMER_TID).slice_group;
                    if group.is_timestamp_valid_for_begin_or_end(start) {
                        group.begin_slice("v8", name.as_str(), start, args).ok()?;
                    } else {
                        model.push_import_error("Timestamps are moving backward.");
                    }
                }
            }
            "timer-event-end" => {
                let [_, end, ..] = fields else { return None };
                let end = micros_to_ms(end)?;
                let group = &mut model.get_or_create_thread(V8_PID, TIMER_TID).slice_group;
                if group.open_slice_count() == 0 {
                    trace!("timer-event-end at {end} with no open timer");
                } else if group.is_timestamp_valid_for_begin_or_end(end) {
                    group.end_slice(end).ok()?;
                } else {
                    model.push_import_error("Timestamps are moving backward.");
                }
            }
            "shared-library" => {
                let [name, start, end, ..] = fields else { return None };
                let (start, end) = (parse_number(start)?, parse_number(end)?);
                self.code_map
                    .add_library(start, CodeEntry::new(end.saturating_sub(start), name.as_str()));
            }
            "code-creation" => {
                let [_, _, address, size, name, ..] = fields else { return None };
                let entry = CodeEntry::new(parse_number(size)?, name.as_str());
                self.code_map.add_code(parse_number(address)?, entry);
            }
            "code-move" => {
                let [from, to, ..] = fields else { return None };
                self.code_map.move_code(parse_number(from)?, parse_number(to)?);
            }
            "code-delete" => {
                let [address, ..] = fields else { return None };
                self.code_map.delete_code(parse_number(address)?);
            }
            "tick" => {
                let [pc, _sp, ts, _, _, _vm_state, stack @ ..] = fields else { return None };
                self.process_tick(model, parse_number(pc)?, micros_to_ms(ts)?, stack);
            }
            other => trace!("ignoring {other} record"),
        }
        Some(())
    }

    fn name_for(&self, address: u64) -> String {
        self.code_map
            .find_entry(address)
            .map_or(UNKNOWN_CODE, |entry| entry.name.as_str())
            .to_string()
    }

    fn process_tick(&mut self, model: &mut Model, pc: u64, ts: f64, stack: &[String]) {
        let name = self.name_for(pc);
        let sample = Sample::new("v8", name.as_str(), ts, Args::new());
        let added = model.get_or_create_thread(V8_PID, PC_TID).add_sample(sample).map(|_| ());
        if let Err(e) = added {
            model.push_import_error(e.to_string());
        }

        // The stack lists callers innermost first; unparsable entries are
        // skipped.
        let mut frames: Vec<String> = stack
            .iter()
            .filter_map(|address| parse_number(address))
            .map(|address| self.name_for(address))
            .collect();
        frames.reverse();
        frames.push(name);
        self.timeline.add_tick(ts, frames);
    }
}

impl Importer for V8LogImporter {
    fn name(&self) -> &'static str {
        "v8_log"
    }

    fn import_priority(&self) -> u32 {
        3
    }

    fn import_events(&mut self, model: &mut Model, _is_secondary: bool) -> Result<()> {
        for (tid, name) in [(TIMER_TID, "V8 Timers"), (JAVASCRIPT_TID, "V8 JavaScript"), (PC_TID, "V8 PC")] {
            model.get_or_create_thread(V8_PID, tid).name = Some(name.to_string());
        }

        let log = std::mem::take(&mut self.log);
        let mut records = 0;
        for (index, line) in log.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            let fields = split_fields(line);
            if self.process_record(model, &fields).is_none() {
                model.push_import_error(format!("Line {}: Malformed {} record ({line})", index + 1, fields[0]));
            }
            records += 1;
        }
        debug!("imported {records} V8 log records");

        let javascript = &mut model.get_or_create_thread(V8_PID, JAVASCRIPT_TID).slice_group;
        self.timeline.push_slices(javascript);
        Ok(())
    }
}
