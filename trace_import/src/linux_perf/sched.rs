//! Scheduler events: per-CPU run intervals and per-thread states.

use regex::Regex;
use serde_json::json;
use std::sync::LazyLock;
use trace_model::color::ReservedColor;
use trace_model::{Args, Slice};

static SCHED_SWITCH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"prev_comm=(.+) prev_pid=(\d+) prev_prio=(\d+) prev_state=(\S\+?|\S\|\S) ==> next_comm=(.+) next_pid=(\d+) next_prio=(\d+)",
    )
    .expect("sched_switch regex")
});

// `success=` was dropped from newer kernels.
static SCHED_WAKEUP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"comm=(.+) pid=(\d+) prio=(\d+)(?: success=\d+)? target_cpu=(\d+)").expect("sched_wakeup regex")
});

#[derive(Debug, Clone, PartialEq)]
pub struct Switch {
    pub prev_state: String,
    pub next_comm: String,
    pub next_pid: i64,
    pub next_prio: i64,
}

impl Switch {
    pub fn parse(details: &str) -> Option<Self> {
        let caps = SCHED_SWITCH.captures(details)?;
        Some(Self {
            prev_state: caps.get(4)?.as_str().to_string(),
            next_comm: caps.get(5)?.as_str().to_string(),
            next_pid: caps.get(6)?.as_str().parse().ok()?,
            next_prio: caps.get(7)?.as_str().parse().ok()?,
        })
    }
}

/// A thread becoming runnable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Wakeup {
    pub ts: f64,
    pub tid: i64,
    pub from_tid: i64,
}

impl Wakeup {
    /// `from_tid` is the thread that emitted the wakeup record.
    pub fn parse(details: &str, ts: f64, from_tid: i64) -> Option<Self> {
        let caps = SCHED_WAKEUP.captures(details)?;
        Some(Self {
            ts,
            tid: caps.get(2)?.as_str().parse().ok()?,
            from_tid,
        })
    }
}

/// A stretch of time a thread spent on a CPU.
#[derive(Debug, Clone, PartialEq)]
pub struct Run {
    pub tid: i64,
    pub comm: String,
    pub prio: i64,
    pub start: f64,
    pub duration: f64,
    pub state_when_descheduled: String,
}

impl Run {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    /// The CPU slice for this run.
    pub fn to_cpu_slice(&self, title: String) -> Slice {
        let mut args = Args::new();
        args.insert("comm".to_string(), json!(self.comm));
        args.insert("tid".to_string(), json!(self.tid));
        args.insert("prio".to_string(), json!(self.prio));
        args.insert("stateWhenDescheduled".to_string(), json!(self.state_when_descheduled));
        Slice::complete("", title, self.start, self.duration, args)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Active {
    since: f64,
    tid: i64,
    comm: String,
    prio: i64,
}

/// What one CPU is running.
#[derive(Debug, Clone, Default)]
pub struct CpuState {
    active: Option<Active>,
    pub runs: Vec<Run>,
}

impl CpuState {
    /// Switch to the thread named by `switch` at `ts`, closing the run of
    /// the previously active thread. The idle task (pid 0) is not recorded.
    pub fn switch_running_thread(&mut self, ts: f64, switch: Switch) {
        if let Some(last) = self.active.take() {
            if last.tid != 0 {
                self.runs.push(Run {
                    tid: last.tid,
                    comm: last.comm,
                    prio: last.prio,
                    start: last.since,
                    duration: ts - last.since,
                    state_when_descheduled: switch.prev_state,
                });
            }
        }
        self.active = Some(Active {
            since: ts,
            tid: switch.next_pid,
            comm: switch.next_comm,
            prio: switch.next_prio,
        });
    }
}

/// How the time between two runs of a thread is shown.
struct Descheduled {
    title: &'static str,
    color: ReservedColor,
    /// A wakeup inside the gap splits it into this state plus `Runnable`.
    interrupted_by_wakeup: bool,
}

fn descheduled(state: &str) -> Option<Descheduled> {
    use ReservedColor::{IoWait, Runnable, Sleeping};

    let (title, color, interrupted_by_wakeup) = match state {
        "S" => ("Sleeping", Sleeping, true),
        "R" | "R+" => ("Runnable", Runnable, false),
        "D" => ("Uninterruptible Sleep", IoWait, true),
        "T" => ("__TASK_STOPPED", IoWait, false),
        "t" => ("debug", IoWait, false),
        "Z" => ("Zombie", IoWait, false),
        "X" => ("Exit Dead", IoWait, false),
        "x" => ("Task Dead", IoWait, false),
        "K" => ("Wakekill", IoWait, false),
        "W" => ("Waking", IoWait, false),
        "D|K" => ("Uninterruptible Sleep | WakeKill", IoWait, true),
        "D|W" => ("Uninterruptible Sleep | Waking", IoWait, true),
        _ => return None,
    };
    Some(Descheduled {
        title,
        color,
        interrupted_by_wakeup,
    })
}

fn state_slice(title: &str, color: ReservedColor, start: f64, duration: f64) -> Slice {
    Slice::complete("", title, start, duration, Args::new()).with_color_id(color.id())
}

fn runnable_after_wakeup(wakeup: &Wakeup, until: f64) -> Slice {
    let mut args = Args::new();
    args.insert("wakeup from tid".to_string(), json!(wakeup.from_tid));
    Slice::complete("", "Runnable", wakeup.ts, until - wakeup.ts, args)
        .with_color_id(ReservedColor::Runnable.id())
}

/// Derive a thread's scheduler states from its runs and wakeups. Unknown
/// descheduled states are shown as `UNKNOWN` and reported in `errors`.
pub fn build_time_slices(mut runs: Vec<&Run>, mut wakeups: Vec<Wakeup>, errors: &mut Vec<String>) -> Vec<Slice> {
    runs.sort_by(|a, b| a.start.total_cmp(&b.start));
    wakeups.sort_by(|a, b| a.ts.total_cmp(&b.ts));
    let mut wakeups = wakeups.into_iter().peekable();
    let mut slices = Vec::new();

    let Some(first) = runs.first() else {
        return slices;
    };
    if let Some(wakeup) = wakeups.next_if(|w| w.ts < first.start) {
        slices.push(runnable_after_wakeup(&wakeup, first.start));
    }
    slices.push(state_slice("Running", ReservedColor::Running, first.start, first.duration));

    for pair in runs.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        let mut wakeup = None;
        while let Some(w) = wakeups.next_if(|w| w.ts < next.start) {
            if wakeup.is_none() && w.ts > prev.end() {
                wakeup = Some(w);
            }
        }

        let gap = next.start - prev.end();
        let state = descheduled(&prev.state_when_descheduled).unwrap_or_else(|| {
            errors.push(format!("Unrecognized sleep state: {}", prev.state_when_descheduled));
            Descheduled {
                title: "UNKNOWN",
                color: ReservedColor::IoWait,
                interrupted_by_wakeup: false,
            }
        });
        match wakeup {
            Some(wakeup) if state.interrupted_by_wakeup => {
                slices.push(state_slice(state.title, state.color, prev.end(), wakeup.ts - prev.end()));
                slices.push(runnable_after_wakeup(&wakeup, next.start));
            }
            _ => slices.push(state_slice(state.title, state.color, prev.end(), gap)),
        }

        slices.push(state_slice("Running", ReservedColor::Running, next.start, next.duration));
    }
    slices
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(start: f64, duration: f64, state: &str) -> Run {
        Run {
            tid: 10,
            comm: "app".to_string(),
            prio: 120,
            start,
            duration,
            state_when_descheduled: state.to_string(),
        }
    }

    fn wakeup(ts: f64) -> Wakeup {
        Wakeup { ts, tid: 10, from_tid: 1 }
    }

    fn summarize(slices: &[Slice]) -> Vec<(&str, f64, f64)> {
        slices
            .iter()
            .map(|s| (s.title.as_str(), s.start, s.duration.unwrap_or(-1.0)))
            .collect()
    }

    #[test]
    fn parses_switch_with_spaces_in_comm() {
        let switch = Switch::parse(
            "prev_comm=Surface Flinger  prev_pid=178 prev_prio=112 prev_state=D|K ==> \
             next_comm=Surface Flinger  next_pid=178 next_prio=112",
        )
        .unwrap();
        assert_eq!(switch.prev_state, "D|K");
        assert_eq!(switch.next_comm, "Surface Flinger ");
        assert_eq!(switch.next_pid, 178);
        assert!(Switch::parse("prev_comm=x").is_none());
    }

    #[test]
    fn parses_wakeups_with_and_without_success() {
        let old = Wakeup::parse("comm=debugd pid=4978 prio=120 success=1 target_cpu=000", 1.0, 5441).unwrap();
        assert_eq!(old, Wakeup { ts: 1.0, tid: 4978, from_tid: 5441 });
        let new = Wakeup::parse("comm=debugd pid=4978 prio=120 target_cpu=000", 1.0, 5441).unwrap();
        assert_eq!(new.tid, 4978);
    }

    #[test]
    fn idle_task_is_not_recorded() {
        let mut cpu = CpuState::default();
        let switch = |state: &str, pid: i64| Switch {
            prev_state: state.to_string(),
            next_comm: "t".to_string(),
            next_pid: pid,
            next_prio: 120,
        };
        cpu.switch_running_thread(1.0, switch("R", 5));
        cpu.switch_running_thread(3.0, switch("S", 0));
        cpu.switch_running_thread(4.0, switch("R", 5));
        assert_eq!(cpu.runs.len(), 1);
        assert_eq!(cpu.runs[0].start, 1.0);
        assert_eq!(cpu.runs[0].duration, 2.0);
        assert_eq!(cpu.runs[0].state_when_descheduled, "S");

        let slice = cpu.runs[0].to_cpu_slice("5: t".to_string());
        assert_eq!(slice.args["tid"], 5);
        assert_eq!(slice.args["stateWhenDescheduled"], "S");
    }

    #[test]
    fn sleep_is_split_by_wakeup() {
        let runs = [run(10.0, 2.0, "S"), run(20.0, 1.0, "S")];
        let mut errors = Vec::new();
        let slices = build_time_slices(runs.iter().collect(), vec![wakeup(5.0), wakeup(15.0)], &mut errors);
        assert_eq!(
            summarize(&slices),
            vec![
                ("Runnable", 5.0, 5.0),
                ("Running", 10.0, 2.0),
                ("Sleeping", 12.0, 3.0),
                ("Runnable", 15.0, 5.0),
                ("Running", 20.0, 1.0),
            ]
        );
        assert_eq!(slices[3].args["wakeup from tid"], 1);
        assert_eq!(slices[2].color_id, ReservedColor::Sleeping.id());
        assert!(errors.is_empty());
    }

    #[test]
    fn states_without_wakeup_fill_the_gap() {
        let runs = [
            run(0.0, 1.0, "R+"),
            run(2.0, 1.0, "D"),
            run(4.0, 1.0, "x"),
            run(6.0, 1.0, "?"),
            run(8.0, 1.0, "S"),
        ];
        let mut errors = Vec::new();
        // A wakeup during a runnable gap does not split it.
        let slices = build_time_slices(runs.iter().collect(), vec![wakeup(1.5)], &mut errors);
        let titles: Vec<&str> = slices.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(
            titles,
            vec![
                "Running",
                "Runnable",
                "Running",
                "Uninterruptible Sleep",
                "Running",
                "Task Dead",
                "Running",
                "UNKNOWN",
                "Running",
            ]
        );
        assert_eq!(slices[1].duration, Some(1.0));
        assert_eq!(errors, vec!["Unrecognized sleep state: ?"]);
    }
}
