// Transformation Engine: runs a recipe's step templates against the model.
//
// The engine is a plain executor. It stops at the first failing step and
// hands back the partial log; undoing that log is the transaction manager's
// job.

mod cx;
mod log;

pub use cx::{StepCx, TreeBuilder};
pub use log::{AppliedEdit, AuditTriple, Binding, Bindings, EditLog};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info};

use recast_model::{ProgramModel, SymbolId};

use crate::config::RecastConfig;
use crate::error::StepError;
use crate::params::Params;
use crate::registry::{RefactoringDescriptor, Registry};

pub type StepResult = Result<(), StepError>;

/// Shared cancellation flag, checked before every step and every edit.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A step failed after `log` had been applied.
#[derive(Debug)]
pub struct PartialApply {
    pub log: EditLog,
    pub step: String,
    pub error: StepError,
}

#[derive(Debug, Clone, Copy)]
pub struct TransformationEngine<'r> {
    registry: &'r Registry,
    config: &'r RecastConfig,
}

impl<'r> TransformationEngine<'r> {
    pub fn new(registry: &'r Registry, config: &'r RecastConfig) -> Self {
        Self { registry, config }
    }

    pub fn apply(
        &self,
        descriptor: &RefactoringDescriptor,
        target: SymbolId,
        params: &Params,
        model: &mut ProgramModel,
        cancel: &CancelToken,
    ) -> Result<EditLog, Box<PartialApply>> {
        let mut log = EditLog::new(descriptor.name(), model.qualified_name(target), params.clone());
        let outcome = {
            let mut cx = StepCx::new(
                model,
                &mut log,
                target,
                params,
                self.registry,
                self.config,
                cancel,
            );
            let outcome = cx.run_steps(descriptor.steps);
            let bindings = cx.into_bindings();
            outcome.map(|()| bindings)
        };
        match outcome {
            Ok(bindings) => {
                log.bindings = bindings;
                info!(
                    recipe = descriptor.name(),
                    edits = log.len(),
                    "recipe applied"
                );
                Ok(log)
            }
            Err((step, error)) => {
                debug!(
                    recipe = descriptor.name(),
                    step = %step,
                    error = %error,
                    applied = log.len(),
                    "recipe stopped"
                );
                Err(Box::new(PartialApply { log, step, error }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recast_model::{ModelBuilder, SymbolKind};

    fn model() -> (ProgramModel, SymbolId) {
        let mut b = ModelBuilder::new();
        let app = b.module("app");
        let ty = b.ty(app, "T");
        b.field(ty, "taken");
        let m = b.method(ty, "m");
        let one = b.lit("1");
        let ret = b.ret(Some(one));
        b.body(m, vec![ret]);
        (b.build().unwrap(), m)
    }

    #[test]
    fn failing_step_returns_partial_log() {
        let (mut model, m) = model();
        let registry = Registry::builtin().unwrap();
        let config = RecastConfig::default();
        let engine = TransformationEngine::new(&registry, &config);
        let descriptor = registry.lookup("RenameMethod").unwrap();
        let params = Params::new().with("name", "taken");
        let partial = engine
            .apply(&descriptor, m, &params, &mut model, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(partial.error, StepError::Model(_)), "{}", partial.error);
        assert_eq!(model.symbol(m).unwrap().name, "m");
    }

    #[test]
    fn cancelled_token_stops_before_the_first_edit() {
        let (mut model, m) = model();
        let original = model.clone();
        let registry = Registry::builtin().unwrap();
        let config = RecastConfig::default();
        let engine = TransformationEngine::new(&registry, &config);
        let descriptor = registry.lookup("RenameMethod").unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let partial = engine
            .apply(&descriptor, m, &Params::new().with("name", "n"), &mut model, &cancel)
            .unwrap_err();
        assert_eq!(partial.error, StepError::Cancelled);
        assert!(partial.log.is_empty());
        assert_eq!(model, original);
    }

    #[test]
    fn successful_run_logs_every_edit() {
        let (mut model, m) = model();
        let registry = Registry::builtin().unwrap();
        let config = RecastConfig::default();
        let engine = TransformationEngine::new(&registry, &config);
        let descriptor = registry.lookup("RenameMethod").unwrap();
        let params = Params::new().with("name", "total");
        let log = engine
            .apply(&descriptor, m, &params, &mut model, &CancelToken::new())
            .unwrap();
        assert_eq!(model.symbol(m).unwrap().name, "total");
        assert_eq!(model.symbol(m).unwrap().kind, SymbolKind::Method);
        assert!(!log.is_empty());
        assert_eq!(log.entries[0].seq, 0);
    }
}
