// placelink CLI - record linkage pipelines for UK public place datasets

mod exit_codes;
mod run;
mod snapshot;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use exit_codes::{EXIT_SUCCESS, EXIT_USAGE};

#[derive(Parser)]
#[command(name = "placelink")]
#[command(about = "Link, fuse, and diff UK public place datasets")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a linkage pipeline from a TOML config file
    #[command(after_help = "\
Examples:
  placelink run pipeline.toml
  placelink run pipeline.toml --json
  placelink run pipeline.toml --output result.json --records enriched.csv")]
    Run {
        /// Path to the pipeline .toml config file
        config: PathBuf,

        /// Output JSON to stdout instead of human summary
        #[arg(long)]
        json: bool,

        /// Write JSON output to file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Write enriched records as CSV to file
        #[arg(long)]
        records: Option<PathBuf>,
    },

    /// Validate a pipeline config without running
    #[command(after_help = "\
Examples:
  placelink validate pipeline.toml")]
    Validate {
        /// Path to the pipeline .toml config file
        config: PathBuf,
    },

    /// Compare two snapshots of one dataset and report changes
    #[command(after_help = "\
Examples:
  placelink diff old.csv new.csv --id osmid
  placelink diff old.csv new.csv --id osmid --attr name --attr opening_hours
  placelink diff old.csv new.csv --id osmid --exhaustive --json
  placelink diff old.csv new.csv --id osmid --strict-exit")]
    Diff {
        /// Older snapshot CSV
        old: PathBuf,

        /// Newer snapshot CSV
        new: PathBuf,

        /// Stable id column shared by both snapshots
        #[arg(long, default_value = "id")]
        id: String,

        /// Key attribute to compare (repeatable; default set when omitted)
        #[arg(long = "attr", value_name = "COLUMN")]
        attrs: Vec<String>,

        /// Cap on how many common ids get attribute-diffed
        #[arg(long, env = "PLACELINK_SAMPLE_CAP", default_value_t = 1000)]
        sample_cap: usize,

        /// Diff every common id instead of sampling
        #[arg(long)]
        exhaustive: bool,

        /// Output JSON to stdout instead of human summary
        #[arg(long)]
        json: bool,

        /// Write JSON output to file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Write added.csv / removed.csv / modified.csv into a directory
        #[arg(long, value_name = "DIR")]
        csv_dir: Option<PathBuf>,

        /// Exit non-zero when any change is found (for scripting)
        #[arg(long)]
        strict_exit: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run { config, json, output, records } => {
            run::cmd_run(config, json, output, records)
        }
        Commands::Validate { config } => run::cmd_validate(config),
        Commands::Diff {
            old,
            new,
            id,
            attrs,
            sample_cap,
            exhaustive,
            json,
            output,
            csv_dir,
            strict_exit,
        } => snapshot::cmd_diff(
            old, new, id, attrs, sample_cap, exhaustive, json, output, csv_dir, strict_exit,
        ),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    #[allow(dead_code)]
    pub fn args(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }
}
