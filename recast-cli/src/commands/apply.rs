use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use tracing::{info, warn};

use recast_core::EditLog;
use recast_model::SnapshotFrontEnd;

use super::Globals;

#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Model snapshot (JSON)
    pub model: PathBuf,

    /// Refactoring name
    pub recipe: String,

    /// Target symbol path, e.g. `billing::Order::price`
    pub target: String,

    /// Recipe parameter as key=value; values are read as JSON when they parse
    #[arg(short = 'p', long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,

    /// Write the refactored model here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Write the edit log (JSON audit record) here
    #[arg(long)]
    pub log: Option<PathBuf>,
}

pub fn run(args: &ApplyArgs, globals: &Globals) -> anyhow::Result<()> {
    let session = super::open_session(&args.model, globals)?;
    let params = super::parse_params(&args.params)?;

    let log = match session.perform(&args.recipe, &args.target, &params) {
        Ok(log) => log,
        Err(e) => {
            warn!(
                recipe = %args.recipe,
                target = %args.target,
                code = e.exit_code(),
                "refactoring refused"
            );
            if let (Some(rejection), false) = (e.rejection(), globals.quiet) {
                super::check::print_rejection(&args.recipe, rejection);
            }
            return Err(e.into());
        }
    };
    info!(
        recipe = %log.recipe,
        target = %log.target,
        edits = log.len(),
        "refactoring committed"
    );

    let rendered = session
        .render(&SnapshotFrontEnd)
        .context("Cannot render the refactored model")?;
    super::emit(args.output.as_deref(), &rendered)?;

    if let Some(path) = &args.log {
        let json = serde_json::to_string_pretty(&log)?;
        std::fs::write(path, json).with_context(|| format!("Cannot write {}", path.display()))?;
    }

    if !globals.quiet {
        // The model itself may be on stdout.
        eprintln!("{}", describe(&log));
    }
    Ok(())
}

/// One-line outcome plus per-kind edit counts.
pub(super) fn describe(log: &EditLog) -> String {
    let counts: Vec<String> = log
        .summary()
        .iter()
        .map(|(kind, n)| format!("{kind} x{n}"))
        .collect();
    format!(
        "{} committed on {}: {} edits ({})",
        log.recipe,
        log.target,
        log.len(),
        counts.join(", ")
    )
}
