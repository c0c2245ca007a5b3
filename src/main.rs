// Allow dead code for items that are part of the public API but only used in tests
#![allow(dead_code)]

mod buffer;
mod cancel;
mod cmd;
mod config;
mod emitter;
mod engine;
mod error;
mod faker;
mod progress;
mod query;
mod schema;
mod source;
mod value;

use clap::Parser;
use cmd::Cli;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = cmd::run(cli) {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
