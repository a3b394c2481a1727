// Engine session: one program model, many readers, one writer.
//
// The committed `(model, index)` pair sits behind an `RwLock<Arc<_>>`.
// Checks clone the `Arc` (a snapshot token) and run without holding any
// lock, so they never block each other or a writer. `perform` takes the
// writer mutex for its whole duration, transforms a private copy of the
// snapshot, and publishes the copy only if the transaction commits.

use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use recast_model::{FrontEnd, ProgramModel, ReferenceIndex, SymbolId, SymbolPath};

use crate::analyzer::{PreconditionAnalyzer, Verdict};
use crate::config::RecastConfig;
use crate::engine::{CancelToken, EditLog};
use crate::error::{RecastError, RefactoringError};
use crate::params::Params;
use crate::progress::ProgressReporter;
use crate::registry::Registry;
use crate::transaction::{NoopObserver, TransactionManager, TransactionObserver};

/// A committed model with the index derived from it.
#[derive(Debug, Clone)]
pub struct Committed {
    pub model: ProgramModel,
    pub index: ReferenceIndex,
}

/// One refactoring request as a caller names it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub recipe: String,
    pub target: String,
    #[serde(default)]
    pub params: Params,
}

impl Request {
    pub fn new(recipe: &str, target: &str, params: Params) -> Self {
        Self {
            recipe: recipe.to_string(),
            target: target.to_string(),
            params,
        }
    }
}

pub struct Session {
    committed: RwLock<Arc<Committed>>,
    writer: Mutex<()>,
    registry: Arc<Registry>,
    config: RecastConfig,
    observer: Arc<dyn TransactionObserver>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("recipes", &self.registry.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(model: ProgramModel, registry: Arc<Registry>, config: RecastConfig) -> Self {
        let index = ReferenceIndex::build_with(&model, config.analysis.parallel_index);
        Self {
            committed: RwLock::new(Arc::new(Committed { model, index })),
            writer: Mutex::new(()),
            registry,
            config,
            observer: Arc::new(NoopObserver),
        }
    }

    /// Session over the built-in registry, minus recipes the config disables.
    pub fn builtin(model: ProgramModel, config: RecastConfig) -> Result<Self, RecastError> {
        config.validate()?;
        let registry = Registry::builtin()?.configured(&config.registry);
        Ok(Self::new(model, Arc::new(registry), config))
    }

    /// Load a model through a front-end and open a session on it.
    pub fn load<F: FrontEnd>(
        frontend: &F,
        source: &F::Source,
        config: RecastConfig,
    ) -> Result<Self, RecastError> {
        let model = frontend.load_model(source)?;
        Self::builtin(model, config)
    }

    pub fn with_observer(mut self, observer: Arc<dyn TransactionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &RecastConfig {
        &self.config
    }

    /// Snapshot token of the current committed state.
    pub fn snapshot(&self) -> Arc<Committed> {
        Arc::clone(&self.committed.read().expect("session state lock poisoned"))
    }

    pub fn render<F: FrontEnd>(&self, frontend: &F) -> recast_model::Result<F::Source> {
        frontend.render(&self.snapshot().model)
    }

    fn resolve(snapshot: &Committed, target: &str) -> Result<SymbolId, RefactoringError> {
        let path: SymbolPath = target
            .parse()
            .map_err(|_| RefactoringError::TargetNotFound(target.to_string()))?;
        snapshot
            .model
            .resolve(&path)
            .map_err(|_| RefactoringError::TargetNotFound(target.to_string()))
    }

    // ── Reads ─────────────────────────────────────────────────────────

    /// Evaluate a recipe's precondition without touching the model.
    pub fn check(
        &self,
        recipe: &str,
        target: &str,
        params: &Params,
    ) -> Result<Verdict, RefactoringError> {
        self.check_on(&self.snapshot(), recipe, target, params)
    }

    fn check_on(
        &self,
        snapshot: &Committed,
        recipe: &str,
        target: &str,
        params: &Params,
    ) -> Result<Verdict, RefactoringError> {
        let descriptor = self.registry.lookup(recipe)?;
        let target = Self::resolve(snapshot, target)?;
        PreconditionAnalyzer::new(&self.config.analysis).check(
            &descriptor,
            target,
            params,
            &snapshot.model,
            &snapshot.index,
        )
    }

    /// Check many requests in parallel against one snapshot.
    pub fn check_many(&self, requests: &[Request]) -> Vec<Result<Verdict, RefactoringError>> {
        self.check_many_with_progress(requests, &crate::progress::NoopReporter)
    }

    pub fn check_many_with_progress(
        &self,
        requests: &[Request],
        reporter: &dyn ProgressReporter,
    ) -> Vec<Result<Verdict, RefactoringError>> {
        let snapshot = self.snapshot();
        reporter.start("checking preconditions", Some(requests.len() as u64));
        let verdicts = requests
            .par_iter()
            .map(|r| {
                let verdict = self.check_on(&snapshot, &r.recipe, &r.target, &r.params);
                reporter.advance(1);
                verdict
            })
            .collect();
        reporter.finish();
        debug!(requests = requests.len(), "batch check finished");
        verdicts
    }

    // ── Writes ────────────────────────────────────────────────────────

    pub fn perform(
        &self,
        recipe: &str,
        target: &str,
        params: &Params,
    ) -> Result<EditLog, RefactoringError> {
        self.perform_with_cancel(recipe, target, params, &CancelToken::new())
    }

    pub fn perform_request(
        &self,
        request: &Request,
        cancel: &CancelToken,
    ) -> Result<EditLog, RefactoringError> {
        self.perform_with_cancel(&request.recipe, &request.target, &request.params, cancel)
    }

    /// Run a transaction. Writers are serialized; the committed state is
    /// replaced only when the transaction commits.
    pub fn perform_with_cancel(
        &self,
        recipe: &str,
        target: &str,
        params: &Params,
        cancel: &CancelToken,
    ) -> Result<EditLog, RefactoringError> {
        let descriptor = self.registry.lookup(recipe)?;

        let _writer = self.writer.lock().expect("session writer lock poisoned");
        let snapshot = self.snapshot();
        let target = Self::resolve(&snapshot, target)?;
        let mut working = snapshot.model.clone();

        let manager = TransactionManager::new(&self.registry, &self.config, self.observer.as_ref());
        let (log, index) =
            manager.perform(&descriptor, target, params, &mut working, &snapshot.index, cancel)?;

        let revision = working.revision();
        *self.committed.write().expect("session state lock poisoned") =
            Arc::new(Committed { model: working, index });
        info!(
            recipe = descriptor.name(),
            edits = log.len(),
            revision,
            "session state published"
        );
        Ok(log)
    }

    /// Perform requests one after another, stopping at the first failure.
    pub fn perform_all(
        &self,
        requests: &[Request],
    ) -> Result<Vec<EditLog>, (usize, RefactoringError)> {
        requests
            .iter()
            .enumerate()
            .map(|(i, r)| self.perform_request(r, &CancelToken::new()).map_err(|e| (i, e)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recast_model::ModelBuilder;

    fn session() -> Session {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let ty = b.ty(app, "T");
        let f = b.field(ty, "f");
        let m = b.method(ty, "m");
        let read = b.read(f);
        let ret = b.ret(Some(read));
        b.body(m, vec![ret]);
        Session::builtin(b.build().unwrap(), RecastConfig::default()).unwrap()
    }

    #[test]
    fn unknown_target_is_reported() {
        let s = session();
        let err = s.check("RenameMethod", "app::T::nope", &Params::new()).unwrap_err();
        assert_eq!(err, RefactoringError::TargetNotFound("app::T::nope".into()));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn unknown_recipe_is_reported_before_locking() {
        let s = session();
        let err = s.perform("Nope", "app::T::m", &Params::new()).unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn commit_publishes_new_snapshot() {
        let s = session();
        let before = s.snapshot();
        s.perform("RenameMethod", "app::T::m", &Params::new().with("name", "value"))
            .unwrap();
        let after = s.snapshot();
        assert!(before.model.resolve(&"app::T::m".parse().unwrap()).is_ok());
        assert!(after.model.resolve(&"app::T::value".parse().unwrap()).is_ok());
        assert!(after.index.is_current(&after.model));
    }

    #[test]
    fn cancelled_request_changes_nothing() {
        let s = session();
        let before = s.snapshot();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = s
            .perform_with_cancel(
                "RenameMethod",
                "app::T::m",
                &Params::new().with("name", "v"),
                &cancel,
            )
            .unwrap_err();
        assert!(matches!(err, RefactoringError::Cancelled { .. }));
        assert_eq!(s.snapshot().model, before.model);
    }

    #[test]
    fn batch_checks_return_one_verdict_per_request() {
        let s = session();
        let requests = vec![
            Request::new("RenameMethod", "app::T::m", Params::new().with("name", "f")),
            Request::new("RenameMethod", "app::T::m", Params::new().with("name", "g")),
            Request::new("Nope", "app::T::m", Params::new()),
        ];
        let verdicts = s.check_many(&requests);
        assert!(!verdicts[0].as_ref().unwrap().is_accepted());
        assert!(verdicts[1].as_ref().unwrap().is_accepted());
        assert!(verdicts[2].is_err());
    }
}
