use std::path::PathBuf;

use clap::Parser;

use recast_core::{RecastError, RefactoringError};

mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "recast",
    version,
    about = "Apply catalog refactorings to program model snapshots"
)]
struct Cli {
    #[command(subcommand)]
    command: commands::Command,

    /// Configuration file (TOML)
    #[arg(long, global = true, env = "RECAST_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,
}

/// Classify an error into a process exit code.
///
///   0   committed (never reaches here)
///   1   precondition violated, or target not found
///   2   apply failed, or cancelled
///   3   postcondition violated, or stale index
///   4   unknown refactoring
///   10  I/O, configuration, model or usage error
fn classify_exit_code(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| {
            cause
                .downcast_ref::<RefactoringError>()
                .or_else(|| match cause.downcast_ref::<RecastError>() {
                    Some(RecastError::Refactoring(inner)) => Some(inner),
                    _ => None,
                })
        })
        .map_or(10, RefactoringError::exit_code)
}

fn main() {
    // Usage errors share code 10 with other invocation problems; clap's own
    // code 2 is taken by failed applications.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { 10 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    let filter = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (_, 0) => "warn",
        (_, 1) => "info",
        (_, 2) => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let globals = commands::Globals {
        config: cli.config,
        quiet: cli.quiet,
    };

    match commands::run(cli.command, &globals) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(classify_exit_code(&e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use recast_core::Rejection;

    #[test]
    fn exit_code_precondition() {
        let err = anyhow::Error::new(RefactoringError::PreconditionViolation {
            recipe: "InlineTemp".into(),
            rejection: Rejection::new("assigned more than once"),
        });
        assert_eq!(classify_exit_code(&err), 1);
    }

    #[test]
    fn exit_code_survives_context() {
        let err: anyhow::Result<()> =
            Err(RefactoringError::UnknownRefactoring("Frobnicate".into())).context("request 3");
        assert_eq!(classify_exit_code(&err.unwrap_err()), 4);
    }

    #[test]
    fn exit_code_through_recast_error() {
        let err = anyhow::Error::new(RecastError::Refactoring(RefactoringError::Cancelled {
            recipe: "MoveField".into(),
        }));
        assert_eq!(classify_exit_code(&err), 2);
    }

    #[test]
    fn exit_code_general() {
        let err = anyhow::anyhow!("Cannot read model: /nonexistent.json");
        assert_eq!(classify_exit_code(&err), 10);
    }
}
