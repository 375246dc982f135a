//! Kiln CLI — converge this host to a recipe.

use clap::Parser;
use kiln::cli::Outcome;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(
    name = "kiln",
    version,
    about = "Declarative single-host provisioning: images, packages, scripts, archives, checkouts"
)]
struct Cli {
    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,

    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: kiln::cli::Commands,
}

/// `-d` counts as the first verbosity step; each `-v` adds one.
fn log_level(debug: bool, verbose: u8) -> Option<log::LevelFilter> {
    match u8::from(debug).saturating_add(verbose) {
        0 => None,
        1 => Some(log::LevelFilter::Debug),
        _ => Some(log::LevelFilter::Trace),
    }
}

fn init_logging(debug: bool, verbose: u8) {
    let mut builder = match log_level(debug, verbose) {
        Some(level) => {
            let mut b = env_logger::Builder::new();
            b.filter_level(level);
            b
        }
        None => env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")),
    };
    builder.format_timestamp(None).format_target(false).init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.debug, cli.verbose);

    match kiln::cli::dispatch(cli.command) {
        Ok(Outcome::Success) => ExitCode::SUCCESS,
        Ok(outcome) => ExitCode::from(outcome.exit_code()),
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
