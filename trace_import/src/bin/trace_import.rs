//! Import one or more traces into a single model.
//!
//! The first input is the primary trace; later inputs (for example a
//! kernel ftrace capture taken alongside a Chrome trace) are imported as
//! secondary traces on top of it.
//!
//! # Usage
//!
//! ```bash
//! trace_import trace.json
//! trace_import trace.json ftrace.txt --json -o model.json
//! ```

use clap::Parser;
use log::{info, warn};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use trace_import::{ImportOptions, TraceData, TraceImporter};
use trace_import::trace_model::Model;

#[derive(Parser, Debug)]
#[command(name = "trace_import")]
#[command(about = "Import trace-event JSON, ftrace text and V8 logs into one trace model")]
#[command(version)]
struct Args {
    /// Trace files; the first one is the primary trace
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Write output here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Emit the whole model as JSON instead of a summary
    #[arg(long)]
    json: bool,

    /// Keep the original timestamps instead of starting the trace at zero
    #[arg(long)]
    no_shift: bool,

    /// Keep threads and processes that ended up empty
    #[arg(long)]
    keep_empty: bool,
}

fn write_summary(model: &Model, out: &mut dyn Write) -> std::io::Result<()> {
    let (min, max) = (model.bounds.min.unwrap_or(0.0), model.bounds.max.unwrap_or(0.0));
    writeln!(out, "bounds: {min:.3} ms .. {max:.3} ms ({:.3} ms)", model.bounds.duration())?;
    writeln!(out, "categories: {}", model.categories.join(", "))?;
    for process in model.processes.values() {
        writeln!(out, "{}", process.user_friendly_name())?;
        for thread in process.threads.values() {
            writeln!(
                out,
                "  {}: {} slices, {} samples",
                thread.user_friendly_name(),
                thread.slice_group.len(),
                thread.samples.len()
            )?;
        }
        for counter in process.counters.values() {
            writeln!(out, "  counter {}: {} samples", counter.name, counter.timestamps.len())?;
        }
    }
    for cpu in model.kernel.cpus.values() {
        writeln!(out, "CPU {}: {} slices", cpu.number, cpu.slices.len())?;
    }
    Ok(())
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut traces = Vec::with_capacity(args.inputs.len());
    for input in &args.inputs {
        let data = TraceData::read(input)
            .map_err(|e| format!("Failed to read input file '{}': {}", input.display(), e))?;
        traces.push(data);
    }

    let options = ImportOptions {
        shift_world_to_zero: !args.no_shift,
        prune_empty_containers: !args.keep_empty,
    };
    let model = TraceImporter::with_options(options).import(traces)?;
    for error in &model.import_errors {
        warn!("{error}");
    }
    info!(
        "imported {} processes and {} CPUs from {} traces",
        model.processes.len(),
        model.kernel.cpus.len(),
        args.inputs.len()
    );

    let mut writer: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(File::create(path).map_err(|e| {
            format!("Failed to create output file '{}': {}", path.display(), e)
        })?)),
        None => Box::new(std::io::stdout().lock()),
    };
    if args.json {
        serde_json::to_writer_pretty(&mut writer, &model)?;
        writeln!(writer)?;
    } else {
        write_summary(&model, &mut writer)?;
    }
    writer.flush()?;
    Ok(())
}

fn main() -> ExitCode {
    let mut log_builder = env_logger::builder();
    if std::env::var_os("RUST_LOG").is_none() {
        log_builder.filter_level(log::LevelFilter::Info);
    }
    log_builder.init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("could not import trace: {}", e);
            ExitCode::FAILURE
        }
    }
}
