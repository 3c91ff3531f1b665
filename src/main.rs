mod cli;
mod commands;
mod paths;
mod progress;
mod runner;
mod schema;
mod store;
mod transport;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    /// Inventory path from `--config` or `NETKEEP_CONFIG`
    pub config: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    if !console::Term::stdout().is_term() {
        colored::control::set_override(false);
    }

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        config: cli.config,
    };

    match run(&ctx, cli.command) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            let code = exit_code(&e);
            ui::error(&format!("{e:#}"));
            if let Some(category) = category(&e) {
                ui::dim(category.advice());
            }
            ExitCode::from(code)
        }
    }
}

fn run(ctx: &Context, command: Command) -> Result<u8> {
    match command {
        Command::Backup(args) => commands::backup::run(ctx, &args),
        Command::Compare(args) => commands::compare::run(ctx, &args),
        Command::Deploy(args) => commands::deploy::run(ctx, &args),
        Command::Validate(args) => commands::validate::run(ctx, &args),
        Command::Report(args) => commands::report::run(ctx, &args),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "netkeep", &mut io::stdout());
            Ok(0)
        }
    }
}

fn category(e: &anyhow::Error) -> Option<confkit::ErrorCategory> {
    e.chain()
        .find_map(|cause| cause.downcast_ref::<confkit::Error>())
        .map(confkit::Error::category)
}

/// Exit code for a failed command; errors outside the taxonomy count as usage/I/O.
fn exit_code(e: &anyhow::Error) -> u8 {
    category(e).map_or(2, |c| c.exit_code())
}
