use std::path::PathBuf;

use clap::Args;
use tracing::info;

use recast_core::{RefactoringError, Rejection, Verdict};

use super::{Format, Globals};

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Model snapshot (JSON)
    pub model: PathBuf,

    /// Refactoring name
    pub recipe: String,

    /// Target symbol path, e.g. `billing::Order::price::basePrice`
    pub target: String,

    /// Recipe parameter as key=value; values are read as JSON when they parse
    #[arg(short = 'p', long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t)]
    pub format: Format,
}

pub fn run(args: &CheckArgs, globals: &Globals) -> anyhow::Result<()> {
    let session = super::open_session(&args.model, globals)?;
    let params = super::parse_params(&args.params)?;
    let recipe = session.registry().lookup(&args.recipe)?;

    let verdict = session.check(recipe.name(), &args.target, &params)?;
    info!(
        recipe = recipe.name(),
        target = %args.target,
        accepted = matches!(verdict, Verdict::Accepted),
        "precondition evaluated"
    );

    if args.format == Format::Json {
        println!("{}", serde_json::to_string_pretty(&verdict)?);
    } else if !globals.quiet {
        match &verdict {
            Verdict::Accepted => println!("{} is applicable to {}", recipe.name(), args.target),
            Verdict::Rejected(rejection) => print_rejection(recipe.name(), rejection),
        }
    }

    match verdict {
        Verdict::Accepted => Ok(()),
        Verdict::Rejected(rejection) => Err(RefactoringError::PreconditionViolation {
            recipe: recipe.name().to_string(),
            rejection,
        }
        .into()),
    }
}

pub(super) fn print_rejection(recipe: &str, rejection: &Rejection) {
    println!("{recipe} is not applicable: {}", rejection.reason);
    for conflict in &rejection.conflicts {
        println!("  {:?} {}: {}", conflict.kind, conflict.subject, conflict.detail);
    }
    if let Some(suggestion) = &rejection.suggestion {
        println!("  Try {suggestion} first.");
    }
}
