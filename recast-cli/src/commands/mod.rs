pub mod apply;
pub mod batch;
pub mod check;
pub mod list;
pub mod show;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Subcommand;
use tracing::debug;

use recast_core::{Params, RecastConfig, Registry, Session};
use recast_model::SnapshotFrontEnd;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the registered refactorings
    List(list::ListArgs),
    /// Describe one refactoring
    Show(show::ShowArgs),
    /// Evaluate a refactoring's precondition without changing the model
    Check(check::CheckArgs),
    /// Apply a refactoring and write the resulting model
    Apply(apply::ApplyArgs),
    /// Apply a sequence of refactorings from a JSON request file
    Batch(batch::BatchArgs),
}

/// Options shared by every subcommand.
#[derive(Debug, Default)]
pub struct Globals {
    pub config: Option<PathBuf>,
    pub quiet: bool,
}

pub fn run(cmd: Command, globals: &Globals) -> anyhow::Result<()> {
    match cmd {
        Command::List(args) => list::run(&args, globals),
        Command::Show(args) => show::run(&args, globals),
        Command::Check(args) => check::run(&args, globals),
        Command::Apply(args) => apply::run(&args, globals),
        Command::Batch(args) => batch::run(&args, globals),
    }
}

/// Output format for commands that can print JSON.
#[derive(clap::ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Format {
    #[default]
    Text,
    Json,
}

fn load_config(globals: &Globals) -> anyhow::Result<RecastConfig> {
    let Some(path) = &globals.config else {
        return Ok(RecastConfig::default());
    };
    debug!(path = %path.display(), "loading config");
    RecastConfig::load(path).with_context(|| format!("Cannot load config: {}", path.display()))
}

/// The built-in registry with the configured recipes hidden.
fn registry(globals: &Globals) -> anyhow::Result<Registry> {
    let config = load_config(globals)?;
    let registry = Registry::builtin().context("Built-in catalog is inconsistent")?;
    let registry = registry.configured(&config.registry);
    debug!(recipes = registry.len(), "registry ready");
    Ok(registry)
}

fn open_session(model: &Path, globals: &Globals) -> anyhow::Result<Session> {
    let config = load_config(globals)?;
    let source = std::fs::read_to_string(model)
        .with_context(|| format!("Cannot read model: {}", model.display()))?;
    let session = Session::load(&SnapshotFrontEnd, &source, config)
        .with_context(|| format!("Cannot load model: {}", model.display()))?;
    debug!(path = %model.display(), bytes = source.len(), "model loaded");
    Ok(session)
}

fn parse_params(assignments: &[String]) -> anyhow::Result<Params> {
    assignments
        .iter()
        .map(|a| Params::parse_assignment(a).with_context(|| format!("Bad parameter: {a}")))
        .collect()
}

/// Write `contents` to `path`, or to stdout when no path is given.
fn emit(path: Option<&Path>, contents: &str) -> anyhow::Result<()> {
    match path {
        Some(path) => std::fs::write(path, contents)
            .with_context(|| format!("Cannot write {}", path.display())),
        None => {
            println!("{contents}");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_parse_json_and_plain_values() {
        let params = parse_params(&[
            "name=basePrice".to_string(),
            "nodes=[3,4]".to_string(),
            "flag=true".to_string(),
        ])
        .unwrap();
        assert_eq!(params.require_name("name").unwrap(), "basePrice");
        assert_eq!(params.nodes("nodes").unwrap().len(), 2);
        assert!(params.flag("flag", false).unwrap());
    }

    #[test]
    fn params_need_an_equals_sign() {
        let err = parse_params(&["name".to_string()]).unwrap_err();
        assert!(format!("{err:#}").contains("Bad parameter"));
    }

    #[test]
    fn missing_config_is_an_error() {
        let globals = Globals {
            config: Some(PathBuf::from("/nonexistent/recast.toml")),
            quiet: true,
        };
        assert!(load_config(&globals).is_err());
        assert!(load_config(&Globals::default()).is_ok());
    }
}
