#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::fn_params_excessive_bools)]

mod commands;
mod logging;
mod report;

use clap::Parser;
use miette::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "trellis")]
#[command(author, version, about = "Resolve, fetch and link a project into a generated resolution map", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Resolve, fetch and link every dependency of the project
    Install {
        /// Skip build scripts; nothing gets unplugged for them
        #[arg(long)]
        no_scripts: bool,
    },

    /// Print where the last install put a package
    Where {
        /// Locator to look up, e.g. `left-pad@npm:1.3.0`
        locator: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    logging::init(cli.verbose, cli.json);

    match cli.command {
        Commands::Install { no_scripts } => {
            let span = tracing::info_span!("install", cmd = "install", cwd = %cwd.display());
            let _guard = span.enter();
            commands::install::run(&cwd, !no_scripts, cli.json)
        }
        Commands::Where { locator } => commands::lookup::run(&cwd, &locator, cli.json),
    }
}
