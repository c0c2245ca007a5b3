//! CLI handler for the dump command.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::cancel::CancelToken;
use crate::config::DumperConfig;
use crate::engine::{DumpStats, Dumper};
use crate::progress::CountingWriter;
use crate::source::MySqlSource;

/// JSON output for a dump run
#[derive(Serialize)]
struct DumpJsonOutput {
    config: String,
    output: String,
    tables_dumped: usize,
    rows_emitted: u64,
    bytes_written: u64,
    cycle_detected: bool,
    elapsed_secs: f64,
}

#[allow(clippy::too_many_arguments)]
pub fn run(
    config_path: PathBuf,
    out: Option<PathBuf>,
    only_data: bool,
    add_column_name: bool,
    progress: bool,
    verbose: bool,
    json: bool,
) -> anyhow::Result<()> {
    let mut config = DumperConfig::load(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    config.normalize()?;

    // CLI flags win over the config file.
    if let Some(out) = out {
        config.dump.out = Some(out);
    }
    if only_data {
        config.dump.only_data = true;
    }
    if add_column_name {
        config.dump.add_column_name = true;
    }

    let source = MySqlSource::connect(&config.source_db)?;
    let cancel = CancelToken::new();

    let spinner = if progress {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner} {msg}").expect("spinner template"),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        bar.set_message("dumping...");
        Some(bar)
    } else {
        None
    };

    let started = Instant::now();
    let out_path = config.dump.out.clone();

    let mut writer: Box<dyn Write> = match &out_path {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        )),
        None => Box::new(io::stdout()),
    };
    if let Some(bar) = spinner.clone() {
        writer = Box::new(CountingWriter::with_callback(writer, move |bytes| {
            bar.set_message(format!("dumping... {bytes} bytes written"));
        }));
    }

    let mut dumper = Dumper::new(&config, &source, cancel);
    let stats = dumper.run(&mut writer)?;
    writer.flush()?;

    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    output_stats(
        &stats,
        &config_path,
        out_path.as_deref(),
        started.elapsed().as_secs_f64(),
        verbose,
        json,
    );

    Ok(())
}

fn output_stats(
    stats: &DumpStats,
    config_path: &std::path::Path,
    out_path: Option<&std::path::Path>,
    elapsed_secs: f64,
    verbose: bool,
    json: bool,
) {
    if json {
        let output = DumpJsonOutput {
            config: config_path.display().to_string(),
            output: out_path
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "stdout".to_string()),
            tables_dumped: stats.tables_dumped,
            rows_emitted: stats.rows_emitted,
            bytes_written: stats.bytes_written,
            cycle_detected: stats.cycle_detected,
            elapsed_secs,
        };
        println!("{}", serde_json::to_string_pretty(&output).unwrap());
    } else if verbose {
        eprintln!("\nDump complete:");
        eprintln!("  Tables dumped: {}", stats.tables_dumped);
        eprintln!("  Rows emitted: {}", stats.rows_emitted);
        eprintln!("  Bytes written: {}", stats.bytes_written);
        if stats.cycle_detected {
            eprintln!("  Reference cycle detected, FK checks disabled in the dump");
        }
        eprintln!("  Elapsed: {elapsed_secs:.2}s");
    }
}
