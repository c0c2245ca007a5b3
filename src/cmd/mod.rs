mod dump;

use clap::{Parser, Subcommand, ValueHint};
use std::path::PathBuf;

const AFTER_HELP: &str = "\x1b[1mCommon workflows:\x1b[0m
  Dump the subset described by a config to stdout:
    sql-subsetter dump dumper.yaml

  Write the dump to a file instead:
    sql-subsetter dump dumper.yaml -o subset.sql

  Data only, with progress on stderr:
    sql-subsetter dump dumper.yaml --only-data -p -o subset.sql

\x1b[1mMore info:\x1b[0m
  Run 'sql-subsetter dump --help' for command-specific options.
  Documentation: https://github.com/helgesverre/sql-subsetter";

#[derive(Parser)]
#[command(name = "sql-subsetter")]
#[command(author = "Helge Sverre <helge.sverre@gmail.com>")]
#[command(version)]
#[command(about = "CLI for dumping a referentially consistent subset of a live MySQL database")]
#[command(after_help = AFTER_HELP)]
#[command(arg_required_else_help = true)]
#[command(max_term_width = 100)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

// Help heading constants for consistency
const INPUT_OUTPUT: &str = "Input/Output";
const BEHAVIOR: &str = "Behavior";
const OUTPUT_FORMAT: &str = "Output";

#[derive(Subcommand)]
pub enum Commands {
    /// Dump the configured subset of the source database
    #[command(visible_alias = "dp")]
    #[command(after_help = "\x1b[1mExamples:\x1b[0m
  sql-subsetter dump dumper.yaml
  sql-subsetter dump dumper.yaml -o subset.sql
  sql-subsetter dump dumper.yaml --only-data --json")]
    Dump {
        /// Dumper YAML config describing the source database and tables
        #[arg(value_hint = ValueHint::FilePath, help_heading = INPUT_OUTPUT)]
        config: PathBuf,

        /// Output dump file (default: stdout, or dump.out from the config)
        #[arg(short, long, value_hint = ValueHint::FilePath, help_heading = INPUT_OUTPUT)]
        out: Option<PathBuf>,

        /// Skip CREATE TABLE statements, emit INSERTs only
        #[arg(long, help_heading = BEHAVIOR)]
        only_data: bool,

        /// Annotate every INSERT value with its column name
        #[arg(long, help_heading = BEHAVIOR)]
        add_column_name: bool,

        /// Show a progress spinner on stderr
        #[arg(short, long, help_heading = OUTPUT_FORMAT)]
        progress: bool,

        /// Print run statistics to stderr
        #[arg(short, long, help_heading = OUTPUT_FORMAT)]
        verbose: bool,

        /// Output run statistics as JSON
        #[arg(long, help_heading = OUTPUT_FORMAT)]
        json: bool,
    },
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Dump {
            config,
            out,
            only_data,
            add_column_name,
            progress,
            verbose,
            json,
        } => dump::run(config, out, only_data, add_column_name, progress, verbose, json),
    }
}
