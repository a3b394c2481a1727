use recast_model::ModelError;

use crate::analyzer::Rejection;
use crate::params::ParamError;

/// Top-level recast error type.
///
/// Each variant wraps a layer-specific error enum so callers can match on
/// the source without losing type information.
#[derive(thiserror::Error, Debug)]
pub enum RecastError {
    /// Error from the program model (snapshot loading, path resolution).
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// A refactoring request did not commit.
    #[error("Refactoring error: {0}")]
    Refactoring(#[from] RefactoringError),

    /// Error in configuration parsing or validation.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The built-in recipe catalog is inconsistent.
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),
}

/// Why a refactoring request ended in a state other than `Committed`.
///
/// Apart from `UnknownRefactoring` and `TargetNotFound`, which are reported
/// before a transaction opens, every variant is produced after the model has
/// been restored to its checkpoint.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RefactoringError {
    /// No recipe of that name is registered (or it is disabled).
    #[error("Unknown refactoring: {0}")]
    UnknownRefactoring(String),

    /// The target path does not resolve in the program model.
    #[error("Target not found: {0}")]
    TargetNotFound(String),

    /// The recipe is not applicable to the target.
    #[error("{recipe} rejected: {rejection}")]
    PreconditionViolation { recipe: String, rejection: Rejection },

    /// An edit step failed; the partial edit log was replayed backwards.
    #[error("{recipe} failed in step `{step}`: {source}")]
    ApplyFailed {
        recipe: String,
        step: String,
        source: StepError,
    },

    /// The edits left the model inconsistent. Always a defect in the recipe.
    #[error("{recipe} broke its postcondition: {}", violations.join("; "))]
    PostconditionViolation {
        recipe: String,
        violations: Vec<String>,
    },

    /// The caller cancelled the request before it committed.
    #[error("{recipe} was cancelled")]
    Cancelled { recipe: String },

    /// The reference index does not describe the model it was consulted for.
    #[error("Stale reference index: built at revision {index}, model is at {model}")]
    StaleIndex { index: u64, model: u64 },
}

impl RefactoringError {
    /// Process exit code for this outcome (0 is reserved for `Committed`).
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::PreconditionViolation { .. } | Self::TargetNotFound(_) => 1,
            Self::ApplyFailed { .. } | Self::Cancelled { .. } => 2,
            Self::PostconditionViolation { .. } | Self::StaleIndex { .. } => 3,
            Self::UnknownRefactoring(_) => 4,
        }
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::PreconditionViolation { rejection, .. } => Some(rejection),
            _ => None,
        }
    }
}

/// Failure of a single edit step inside the transformation engine.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum StepError {
    /// A structural edit was refused by the model.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// The step could not work out which edits to make.
    #[error("{0}")]
    Plan(String),

    /// A nested recipe invoked by a composite was not applicable.
    #[error("nested {recipe} rejected: {rejection}")]
    SubRecipe { recipe: String, rejection: Rejection },

    #[error("cancelled")]
    Cancelled,
}

impl StepError {
    pub fn plan(reason: impl Into<String>) -> Self {
        Self::Plan(reason.into())
    }
}

impl From<Rejection> for StepError {
    fn from(rejection: Rejection) -> Self {
        Self::Plan(rejection.to_string())
    }
}

impl From<ParamError> for StepError {
    fn from(err: ParamError) -> Self {
        Self::Plan(err.to_string())
    }
}

/// Errors in configuration parsing and validation.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Cannot read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    /// Configuration file syntax could not be parsed (TOML error).
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Configuration values are present but semantically invalid.
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Mismatch between the embedded catalog and the compiled recipes.
#[derive(thiserror::Error, Debug)]
pub enum CatalogError {
    #[error("Catalog parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// A catalog entry has no recipe behind it.
    #[error("No recipe implements catalog entry `{0}`")]
    MissingRecipe(String),

    /// A recipe is not described by the catalog.
    #[error("Recipe `{0}` has no catalog entry")]
    MissingEntry(String),

    #[error("Recipe `{0}` is registered twice")]
    Duplicate(String),
}

/// Convenience alias for `Result<T, RecastError>`.
pub type Result<T> = std::result::Result<T, RecastError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_the_outcome_table() {
        let rejected = RefactoringError::PreconditionViolation {
            recipe: "InlineTemp".into(),
            rejection: Rejection::new("assigned more than once"),
        };
        assert_eq!(rejected.exit_code(), 1);
        let failed = RefactoringError::ApplyFailed {
            recipe: "MoveField".into(),
            step: "move".into(),
            source: StepError::plan("boom"),
        };
        assert_eq!(failed.exit_code(), 2);
        let broken = RefactoringError::PostconditionViolation {
            recipe: "X".into(),
            violations: vec!["v".into()],
        };
        assert_eq!(broken.exit_code(), 3);
        assert_eq!(RefactoringError::UnknownRefactoring("Nope".into()).exit_code(), 4);
        assert_eq!(RefactoringError::Cancelled { recipe: "X".into() }.exit_code(), 2);
    }

    #[test]
    fn rejection_is_reported_verbatim() {
        let err = RefactoringError::PreconditionViolation {
            recipe: "ReplaceTempWithQuery".into(),
            rejection: Rejection::new("assigned more than once"),
        };
        assert!(err.to_string().contains("assigned more than once"));
        assert_eq!(err.rejection().map(|r| r.reason.as_str()), Some("assigned more than once"));
    }
}
