pub mod analyzer;
pub mod config;
pub mod engine;
pub mod error;
pub mod params;
pub mod progress;
pub mod recipes;
pub mod registry;
pub mod session;
pub mod transaction;

pub use analyzer::{Conflict, ConflictKind, PreconditionAnalyzer, Rejection, Verdict};
pub use config::RecastConfig;
pub use engine::{CancelToken, EditLog, TransformationEngine};
pub use error::{CatalogError, ConfigError, RecastError, RefactoringError, StepError};
pub use params::{ExprSpec, Params};
pub use registry::{Category, RefactoringDescriptor, Registry};
pub use session::{Request, Session};
pub use transaction::{TransactionManager, TransactionObserver, TransactionState};
