//! Import Linux ftrace text output.
//!
//! The input is the text of `/sys/kernel/debug/tracing/trace`, either as-is
//! or embedded in a systrace HTML page. Scheduler records become per-CPU
//! slices on [`trace_model::Kernel`] and per-thread scheduler states;
//! function-graph records become kernel slices; `trace_marker` writes carry
//! Android framework slices, counters and async slices, plus the clock sync
//! record that aligns this trace with the userland one.
//!
//! Note that Linux calls a thread a "pid" and a process a "tgid". Records
//! use the Linux names; the model uses pid/tid as everywhere else.

mod android;
mod kfunc;
pub mod line;
mod sched;

use crate::async_events::AsyncEventCollector;
use crate::importer::{Importer, ImporterKind, TraceData};
use crate::{ImportError, Result};
use line::{LineFormat, Record};
use log::debug;
use regex::Regex;
use sched::{CpuState, Run, Switch, Wakeup};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::sync::LazyLock;
use trace_model::{Model, ThreadKey};

static TRACE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\w+):\s*(.*)$").expect("trace marker regex"));

static PARENT_TS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"parent_ts=(\d+\.?\d*)").expect("parent_ts regex"));

const CLOCK_SYNC_MARKER: &str = "trace_event_clock_sync";

/// Whether a handler could make sense of a record's details.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Details {
    Parsed,
    Malformed,
}

/// Record an import error against a line of the input.
fn import_error(model: &mut Model, line: usize, message: impl Display) {
    model.push_import_error(format!("Line {line}: {message}"));
}

/// Split a `trace_marker` payload into its sub-event and details.
fn marker_parts(details: &str) -> Option<(&str, &str)> {
    match TRACE_MARKER.captures(details) {
        Some(caps) => Some((caps.get(1)?.as_str(), caps.get(2)?.as_str())),
        None if android::is_android_marker(details) => Some(("android", details)),
        None => None,
    }
}

fn is_marker_event(event: &str) -> bool {
    // `0` is how older kernels name trace_marker writes.
    matches!(event, "tracing_mark_write" | "0")
}

/// Pairs a kernel timestamp with the userland clock.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ClockSync {
    perf_ts: f64,
    parent_ts: f64,
}

impl ClockSync {
    fn parse(record: &Record<'_>) -> Option<Self> {
        if !is_marker_event(record.event) {
            return None;
        }
        let (sub_event, details) = marker_parts(record.details)?;
        if sub_event != CLOCK_SYNC_MARKER {
            return None;
        }
        let parent_ts: f64 = PARENT_TS.captures(details)?.get(1)?.as_str().parse().ok()?;
        Some(Self {
            perf_ts: record.ts,
            parent_ts: parent_ts * 1000.0,
        })
    }

    /// Amount to add to kernel timestamps. A parent timestamp of zero
    /// means both sides already share a clock.
    fn shift(&self) -> f64 {
        if self.parent_ts == 0.0 || self.parent_ts == self.perf_ts {
            0.0
        } else {
            self.parent_ts - self.perf_ts
        }
    }
}

struct NumberedLine<'a> {
    /// One-based, counted from the start of the original input.
    line: usize,
    text: &'a str,
    /// The record, or why the line could not be read as one.
    parsed: std::result::Result<Record<'a>, String>,
}

fn parse_lines(lines: &[String], first_line: usize) -> Vec<NumberedLine<'_>> {
    let mut format = None;
    let mut parsed = Vec::new();
    for (index, text) in lines.iter().enumerate() {
        let line = first_line + index + 1;
        let text = text.trim_end_matches('\r');
        if text.is_empty() || text.starts_with('#') {
            continue;
        }
        let detected = match format {
            Some(format) => format,
            None => {
                let Some(detected) = LineFormat::detect(text) else {
                    parsed.push(NumberedLine {
                        line,
                        text,
                        parsed: Err(format!("Cannot parse line: {text}")),
                    });
                    continue;
                };
                debug!("detected ftrace line format {detected:?}");
                format = Some(detected);
                detected
            }
        };
        let record = detected
            .parse(text)
            .ok_or_else(|| format!("Unrecognized line: {text}"));
        parsed.push(NumberedLine {
            line,
            text,
            parsed: record,
        });
    }
    parsed
}

fn looks_like_linux_perf(text: &str) -> bool {
    if text.starts_with("# tracer:") || line::extract_from_systrace_html(text).is_some() {
        return true;
    }
    let first_line = text.split('\n').next().unwrap_or_default();
    LineFormat::detect(first_line).is_some()
}

pub struct LinuxPerfImporter {
    lines: Vec<String>,
    first_line: usize,
    cpus: BTreeMap<u32, CpuState>,
    wakeups: Vec<Wakeup>,
    /// Process of each thread with an Android slice open.
    android_tgids: HashMap<i64, i64>,
    async_events: AsyncEventCollector,
}

impl LinuxPerfImporter {
    pub const KIND: ImporterKind = ImporterKind {
        name: "linux_perf",
        can_import: Self::can_import,
        create: Self::create,
    };

    pub fn can_import(data: &TraceData) -> bool {
        data.as_text().is_some_and(looks_like_linux_perf)
    }

    fn create(data: TraceData) -> Result<Box<dyn Importer>> {
        Ok(Box::new(Self::new(data)?))
    }

    pub fn new(data: TraceData) -> Result<Self> {
        let text = data.as_text().ok_or(ImportError::UnrecognizedTraceFormat)?;
        let (lines, first_line) = match line::extract_from_systrace_html(text) {
            Some(extracted) => (extracted.lines, extracted.first_line),
            None => (text.split('\n').map(str::to_string).collect(), 0),
        };
        Ok(Self {
            lines,
            first_line,
            cpus: BTreeMap::new(),
            wakeups: Vec::new(),
            android_tgids: HashMap::new(),
            async_events: AsyncEventCollector::new(),
        })
    }

    fn import_record(&mut self, model: &mut Model, numbered: &NumberedLine<'_>, record: &Record<'_>, shift: f64) -> Result<()> {
        let NumberedLine { line, text, .. } = numbered;
        let ts = record.ts + shift;
        let details = match record.event {
            "sched_switch" => match Switch::parse(record.details) {
                Some(switch) => {
                    self.cpus.entry(record.cpu).or_default().switch_running_thread(ts, switch);
                    Details::Parsed
                }
                None => Details::Malformed,
            },
            "sched_wakeup" | "sched_wakeup_new" => match Wakeup::parse(record.details, ts, record.pid) {
                Some(wakeup) => {
                    self.wakeups.push(wakeup);
                    Details::Parsed
                }
                None => Details::Malformed,
            },
            "funcgraph_entry" => kfunc::entry(model, *line, record, ts)?,
            "funcgraph_exit" => kfunc::exit(model, *line, record, ts)?,
            event if is_marker_event(event) => self.import_trace_marker(model, *line, record, ts)?,
            event => {
                import_error(model, *line, format!("Unknown event {event} ({text})"));
                return Ok(());
            }
        };
        if details == Details::Malformed {
            import_error(model, *line, format!("Malformed {} event ({text})", record.event));
        }
        Ok(())
    }

    fn import_trace_marker(&mut self, model: &mut Model, line: usize, record: &Record<'_>, ts: f64) -> Result<Details> {
        let Some((sub_event, details)) = marker_parts(record.details) else {
            return Ok(Details::Malformed);
        };
        match sub_event {
            // Already applied before any record was imported.
            CLOCK_SYNC_MARKER if PARENT_TS.is_match(details) => Ok(Details::Parsed),
            CLOCK_SYNC_MARKER => Ok(Details::Malformed),
            "android" => self.import_android_marker(model, line, record, ts),
            other => {
                import_error(
                    model,
                    line,
                    format!("Unknown trace_marking_write event {}:{}", record.event, other),
                );
                Ok(Details::Parsed)
            }
        }
    }

    /// Emit the per-CPU slices and derive scheduler states for every thread
    /// of the model that ran on a CPU.
    fn build_scheduling_slices(&self, model: &mut Model) {
        let threads_by_tid: HashMap<i64, ThreadKey> = model.all_threads().map(|t| (t.tid, t.key())).collect();

        for (&number, cpu) in &self.cpus {
            let slices: Vec<_> = cpu
                .runs
                .iter()
                .map(|run| {
                    let title = threads_by_tid
                        .get(&run.tid)
                        .and_then(|key| model.thread(key.pid, key.tid))
                        .map_or_else(|| run.comm.clone(), |thread| thread.user_friendly_name());
                    run.to_cpu_slice(title)
                })
                .collect();
            model.kernel.get_or_create_cpu(number).slices.extend(slices);
        }

        let mut runs_by_tid: BTreeMap<i64, Vec<&Run>> = BTreeMap::new();
        for run in self.cpus.values().flat_map(|cpu| &cpu.runs) {
            if threads_by_tid.contains_key(&run.tid) {
                runs_by_tid.entry(run.tid).or_default().push(run);
            }
        }
        let mut wakeups_by_tid: HashMap<i64, Vec<Wakeup>> = HashMap::new();
        for wakeup in &self.wakeups {
            wakeups_by_tid.entry(wakeup.tid).or_default().push(*wakeup);
        }

        let mut errors = Vec::new();
        for (tid, runs) in runs_by_tid {
            let Some(key) = threads_by_tid.get(&tid) else {
                continue;
            };
            let wakeups = wakeups_by_tid.remove(&tid).unwrap_or_default();
            let time_slices = sched::build_time_slices(runs, wakeups, &mut errors);
            if let Some(thread) = model.thread_mut(key.pid, key.tid) {
                thread.time_slices = time_slices;
            }
        }
        for error in errors {
            model.push_import_error(error);
        }
    }
}

impl Importer for LinuxPerfImporter {
    fn name(&self) -> &'static str {
        "linux_perf"
    }

    fn import_priority(&self) -> u32 {
        2
    }

    fn import_events(&mut self, model: &mut Model, is_secondary: bool) -> Result<()> {
        let lines = std::mem::take(&mut self.lines);
        let numbered_lines = parse_lines(&lines, self.first_line);

        let shift = match numbered_lines
            .iter()
            .find_map(|numbered| numbered.parsed.as_ref().ok().and_then(ClockSync::parse))
        {
            Some(sync) => sync.shift(),
            None if is_secondary => {
                model.push_import_error("Cannot import kernel trace without a clock sync.");
                return Ok(());
            }
            None => 0.0,
        };
        debug!("importing {} ftrace lines, clock shift {shift}", numbered_lines.len());

        for numbered in &numbered_lines {
            match &numbered.parsed {
                Ok(record) => self.import_record(model, numbered, record, shift)?,
                Err(message) => import_error(model, numbered.line, message),
            }
        }
        self.build_scheduling_slices(model);
        Ok(())
    }

    fn finalize_import(&mut self, model: &mut Model) -> Result<()> {
        self.async_events.resolve(model);
        Ok(())
    }
}
