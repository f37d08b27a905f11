//! Record formats of ftrace text output, and extraction of ftrace text from
//! systrace HTML pages.

use regex::Regex;
use std::sync::LazyLock;

// Kernel 3.2 and later with the print-tgid option:
//   <idle>-0     (-----) [001] d...  1.23: sched_switch: ...
static TGID_RECORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(.+)-(\d+)\s+\(\s*(\d+|-+)\)\s\[(\d+)\]\s+[dX.][N.][Hhs.][0-9a-f.]\s+(\d+\.\d+):\s+(\S+):\s(.*)$",
    )
    .expect("tgid record regex")
});

// Kernel 3.2 and later, default irq-info column:
//   <idle>-0     [001] d...  1.23: sched_switch: ...
static IRQ_INFO_RECORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(.+)-(\d+)\s+\[(\d+)\]\s+[dX.][N.][Hhs.][0-9a-f.]\s+(\d+\.\d+):\s+(\S+):\s(.*)$")
        .expect("irq-info record regex")
});

// Before 3.2:
//   <idle>-0     [001]  1.23: sched_switch: ...
static LEGACY_RECORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(.+)-(\d+)\s+\[(\d+)\]\s*(\d+\.\d+):\s+(\S+):\s(.*)$").expect("legacy record regex")
});

/// One parsed ftrace record.
#[derive(Debug, Clone, PartialEq)]
pub struct Record<'a> {
    /// The `comm` column.
    pub thread_name: &'a str,
    /// Linux pid, i.e. the thread id.
    pub pid: i64,
    /// Thread group (process) id, when the trace carries it.
    pub tgid: Option<i64>,
    pub cpu: u32,
    /// Milliseconds.
    pub ts: f64,
    pub event: &'a str,
    pub details: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineFormat {
    WithTgid,
    WithIrqInfo,
    Legacy,
}

impl LineFormat {
    /// Guess the format from a single record line.
    pub fn detect(line: &str) -> Option<Self> {
        if line.starts_with('{') {
            return None;
        }
        [LineFormat::WithTgid, LineFormat::WithIrqInfo, LineFormat::Legacy]
            .into_iter()
            .find(|format| format.regex().is_match(line))
    }

    fn regex(self) -> &'static Regex {
        match self {
            LineFormat::WithTgid => &TGID_RECORD,
            LineFormat::WithIrqInfo => &IRQ_INFO_RECORD,
            LineFormat::Legacy => &LEGACY_RECORD,
        }
    }

    pub fn parse(self, line: &str) -> Option<Record<'_>> {
        let caps = self.regex().captures(line)?;
        let group = |i: usize| caps.get(i).map(|m| m.as_str());

        let (tgid, cpu, ts, event, details) = match self {
            LineFormat::WithTgid => {
                let tgid = group(3)?;
                let tgid = if tgid.starts_with('-') { None } else { tgid.parse().ok() };
                (tgid, group(4)?, group(5)?, group(6)?, group(7)?)
            }
            LineFormat::WithIrqInfo | LineFormat::Legacy => {
                (None, group(3)?, group(4)?, group(5)?, group(6)?)
            }
        };

        Some(Record {
            thread_name: group(1)?,
            pid: group(2)?.parse().ok()?,
            tgid,
            cpu: cpu.parse().ok()?,
            ts: ts.parse::<f64>().ok()? * 1000.0,
            event,
            details,
        })
    }
}

/// ftrace text pulled out of a systrace HTML page.
#[derive(Debug, Clone, PartialEq)]
pub struct SystraceLines {
    pub lines: Vec<String>,
    /// Zero-based index of the first extracted line within the page.
    pub first_line: usize,
}

/// Find the `linuxPerfData` string of a systrace page and undo its line
/// escaping. Returns `None` for anything that is not such a page.
pub fn extract_from_systrace_html(text: &str) -> Option<SystraceLines> {
    if !text.starts_with("<!DOCTYPE HTML>") {
        return None;
    }
    let lines: Vec<&str> = text.split('\n').collect();
    let mut cursor = 1;
    let mut advance_to = |wanted: &str| -> Option<usize> {
        while cursor < lines.len() {
            if lines[cursor] == wanted {
                return Some(cursor);
            }
            cursor += 1;
        }
        None
    };

    advance_to("  <script>")?;
    let begin = advance_to(r#"  var linuxPerfData = "\"#)? + 1;
    let end = advance_to("  </script>")?;
    advance_to("</body>")?;
    advance_to("</html>")?;

    let raw = lines.get(begin..end)?;
    let (last, body) = raw.split_last()?;
    let mut extracted: Vec<String> = body
        .iter()
        .map(|line| line.strip_suffix(r"\n\").unwrap_or(line).to_string())
        .collect();
    extracted.push(last.strip_suffix(r#"\n";"#)?.to_string());

    Some(SystraceLines {
        lines: extracted,
        first_line: begin,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SWITCH: &str = "sched_switch: prev_comm=swapper prev_pid=0 prev_prio=120 prev_state=R ==> \
                          next_comm=SurfaceFlinger next_pid=178 next_prio=112";

    #[test]
    fn detects_each_format() {
        let legacy = format!("          <idle>-0     [001]  4467.843475: {SWITCH}");
        let irq = format!("     systrace.sh-5441  [001] d...  1031.091584: {SWITCH}");
        let tgid = format!("     systrace.sh-5441  (  5441) [001] d...  1031.091584: {SWITCH}");

        assert_eq!(LineFormat::detect(&legacy), Some(LineFormat::Legacy));
        assert_eq!(LineFormat::detect(&irq), Some(LineFormat::WithIrqInfo));
        assert_eq!(LineFormat::detect(&tgid), Some(LineFormat::WithTgid));
        assert_eq!(LineFormat::detect("SomeRandomText"), None);
        assert_eq!(LineFormat::detect(r#"{"traceEvents": []}"#), None);
    }

    #[test]
    fn parses_record_fields() {
        let line = format!("Binder-Thread #-647   [001]   260.464294: {SWITCH}");
        let record = LineFormat::Legacy.parse(&line).unwrap();
        assert_eq!(record.thread_name, "Binder-Thread #");
        assert_eq!(record.pid, 647);
        assert_eq!(record.tgid, None);
        assert_eq!(record.cpu, 1);
        assert_eq!(record.ts, 260.464294 * 1000.0);
        assert_eq!(record.event, "sched_switch");
        assert!(record.details.starts_with("prev_comm=swapper"));

        let line = format!("  app-43 (   42) [000] d..1  1.500000: {SWITCH}");
        assert_eq!(LineFormat::WithTgid.parse(&line).unwrap().tgid, Some(42));
        let line = format!("  app-43 (-----) [000] d..1  1.500000: {SWITCH}");
        assert_eq!(LineFormat::WithTgid.parse(&line).unwrap().tgid, None);

        assert!(LineFormat::WithIrqInfo.parse("not a record").is_none());
    }

    #[test]
    fn extracts_systrace_html() {
        let page = [
            "<!DOCTYPE HTML>",
            "<html>",
            "<head><title>Android System Trace</title></head>",
            "  <script>",
            r#"  var linuxPerfData = "\"#,
            r"# tracer: nop\n\",
            r"#\n\",
            r"  atrace-14662 [000] 50260.647576: sched_wakeup: comm=adbd pid=14582 prio=120 success=1 target_cpu=000\n\",
            r#"  adbd-14582 [000] 50260.647722: sched_wakeup: comm=adbd pid=14584 prio=120 success=1 target_cpu=000\n";"#,
            "  </script>",
            "</body>",
            "</html>",
        ]
        .join("\n");

        let extracted = extract_from_systrace_html(&page).unwrap();
        assert_eq!(extracted.first_line, 5);
        assert_eq!(
            extracted.lines,
            vec![
                "# tracer: nop",
                "#",
                "  atrace-14662 [000] 50260.647576: sched_wakeup: comm=adbd pid=14582 prio=120 success=1 target_cpu=000",
                "  adbd-14582 [000] 50260.647722: sched_wakeup: comm=adbd pid=14584 prio=120 success=1 target_cpu=000",
            ]
        );

        let unterminated = page.replace(r#"\n";"#, r"\n\");
        assert!(extract_from_systrace_html(&unterminated).is_none());
        assert!(extract_from_systrace_html("# tracer: nop").is_none());
    }
}
