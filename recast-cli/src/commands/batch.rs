use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use tracing::{debug, info};

use recast_core::engine::CancelToken;
use recast_core::progress::{IndicatifReporter, ProgressReporter};
use recast_core::{RefactoringError, Request, Verdict};
use recast_model::SnapshotFrontEnd;

use super::Globals;

#[derive(Args, Debug)]
pub struct BatchArgs {
    /// Model snapshot (JSON)
    pub model: PathBuf,

    /// JSON array of `{"recipe", "target", "params"}` requests
    pub requests: PathBuf,

    /// Only check every request against the unmodified model
    #[arg(long)]
    pub dry_run: bool,

    /// Write the refactored model here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Write the edit logs (JSON array) here
    #[arg(long)]
    pub log: Option<PathBuf>,
}

pub fn run(args: &BatchArgs, globals: &Globals) -> anyhow::Result<()> {
    let session = super::open_session(&args.model, globals)?;
    let text = std::fs::read_to_string(&args.requests)
        .with_context(|| format!("Cannot read requests: {}", args.requests.display()))?;
    let requests: Vec<Request> = serde_json::from_str(&text)
        .with_context(|| format!("Cannot parse requests: {}", args.requests.display()))?;
    info!(requests = requests.len(), dry_run = args.dry_run, "batch started");

    let visible = !globals.quiet && std::io::stderr().is_terminal();
    let reporter = if visible {
        IndicatifReporter::new()
    } else {
        IndicatifReporter::hidden()
    };

    if args.dry_run {
        return dry_run(&session, &requests, &reporter, globals.quiet);
    }

    // Requests run in order: later ones may target symbols earlier ones create.
    let mut logs = Vec::with_capacity(requests.len());
    reporter.start("applying refactorings", Some(requests.len() as u64));
    for (i, request) in requests.iter().enumerate() {
        debug!(index = i, recipe = %request.recipe, target = %request.target, "applying");
        let log = session
            .perform_request(request, &CancelToken::new())
            .with_context(|| describe_request(i, request));
        reporter.advance(1);
        match log {
            Ok(log) => {
                // A hidden bar drops its messages.
                if visible {
                    reporter.message(&super::apply::describe(&log));
                } else if !globals.quiet {
                    eprintln!("{}", super::apply::describe(&log));
                }
                logs.push(log);
            }
            Err(e) => {
                reporter.finish();
                return Err(e);
            }
        }
    }
    reporter.finish();
    info!(committed = logs.len(), "batch finished");

    let rendered = session
        .render(&SnapshotFrontEnd)
        .context("Cannot render the refactored model")?;
    super::emit(args.output.as_deref(), &rendered)?;

    if let Some(path) = &args.log {
        let json = serde_json::to_string_pretty(&logs)?;
        std::fs::write(path, json).with_context(|| format!("Cannot write {}", path.display()))?;
    }
    if !globals.quiet {
        eprintln!("{} refactorings committed", logs.len());
    }
    Ok(())
}

fn dry_run(
    session: &recast_core::Session,
    requests: &[Request],
    reporter: &dyn ProgressReporter,
    quiet: bool,
) -> anyhow::Result<()> {
    let verdicts = session.check_many_with_progress(requests, reporter);
    debug!(checked = verdicts.len(), "dry run evaluated");

    let mut first_failure: Option<anyhow::Error> = None;
    for (i, (request, verdict)) in requests.iter().zip(verdicts).enumerate() {
        let outcome = match verdict {
            Ok(Verdict::Accepted) => {
                if !quiet {
                    println!("ok        {} on {}", request.recipe, request.target);
                }
                continue;
            }
            Ok(Verdict::Rejected(rejection)) => {
                if !quiet {
                    println!(
                        "rejected  {} on {}: {rejection}",
                        request.recipe, request.target
                    );
                }
                RefactoringError::PreconditionViolation {
                    recipe: request.recipe.clone(),
                    rejection,
                }
            }
            Err(e) => {
                if !quiet {
                    println!("error     {} on {}: {e}", request.recipe, request.target);
                }
                e
            }
        };
        if first_failure.is_none() {
            first_failure = Some(anyhow::Error::new(outcome).context(describe_request(i, request)));
        }
    }

    match first_failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn describe_request(i: usize, request: &Request) -> String {
    format!("request {} ({} on {})", i + 1, request.recipe, request.target)
}
