// Transaction / Verification Manager.
//
// One transaction per request:
//
//   Proposed → PreconditionChecked → Applying → Verifying → Committed
//
// with `RolledBack` reachable from every non-terminal state. Any outcome
// other than `Committed` leaves the model exactly as the checkpoint found it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use recast_model::{ProgramModel, ReferenceIndex, SymbolId, check_well_formed};

use crate::analyzer::{PreconditionAnalyzer, Verdict, Verification};
use crate::config::RecastConfig;
use crate::engine::{CancelToken, EditLog, PartialApply, TransformationEngine};
use crate::error::{RefactoringError, StepError};
use crate::params::Params;
use crate::registry::{RefactoringDescriptor, Registry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionState {
    Proposed,
    PreconditionChecked,
    Applying,
    Verifying,
    Committed,
    RolledBack,
}

impl TransactionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proposed => "Proposed",
            Self::PreconditionChecked => "PreconditionChecked",
            Self::Applying => "Applying",
            Self::Verifying => "Verifying",
            Self::Committed => "Committed",
            Self::RolledBack => "RolledBack",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }

    /// Whether the model may be observed mid-mutation in this state.
    pub fn is_writing(self) -> bool {
        matches!(self, Self::Applying | Self::Verifying)
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Proposed, Self::PreconditionChecked)
                | (Self::PreconditionChecked, Self::Applying)
                | (Self::Applying, Self::Verifying)
                | (Self::Verifying, Self::Committed)
                // Cancellation or an analyzer error can end it before the check.
                | (
                    Self::Proposed | Self::PreconditionChecked | Self::Applying | Self::Verifying,
                    Self::RolledBack
                )
        )
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot token: enough to restore and to prove restoration.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub id: Uuid,
    pub revision: u64,
    pub fingerprint: u64,
    pub taken_at: DateTime<Utc>,
    model: ProgramModel,
}

impl Checkpoint {
    pub fn take(model: &ProgramModel) -> Self {
        Self {
            id: Uuid::new_v4(),
            revision: model.revision(),
            fingerprint: model.fingerprint(),
            taken_at: Utc::now(),
            model: model.clone(),
        }
    }

    pub fn matches(&self, model: &ProgramModel) -> bool {
        model.fingerprint() == self.fingerprint && *model == self.model
    }
}

/// One state change of one transaction.
#[derive(Debug, Clone, Serialize)]
pub struct Transition<'a> {
    pub transaction: Uuid,
    pub recipe: &'a str,
    pub from: TransactionState,
    pub to: TransactionState,
}

/// Hook receiving every transition, e.g. for audit or tests.
pub trait TransactionObserver: Send + Sync {
    fn on_transition(&self, transition: &Transition<'_>);
}

#[derive(Debug, Default)]
pub struct NoopObserver;

impl TransactionObserver for NoopObserver {
    fn on_transition(&self, _transition: &Transition<'_>) {}
}

struct Transaction<'o> {
    id: Uuid,
    recipe: String,
    state: TransactionState,
    observer: &'o dyn TransactionObserver,
}

impl Transaction<'_> {
    fn advance(&mut self, next: TransactionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {next}",
            self.state
        );
        self.observer.on_transition(&Transition {
            transaction: self.id,
            recipe: &self.recipe,
            from: self.state,
            to: next,
        });
        info!(
            transaction = %self.id,
            recipe = %self.recipe,
            from = %self.state,
            to = %next,
            "transaction transition"
        );
        self.state = next;
    }
}

pub struct TransactionManager<'r> {
    registry: &'r Registry,
    config: &'r RecastConfig,
    observer: &'r dyn TransactionObserver,
}

impl fmt::Debug for TransactionManager<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionManager")
            .field("recipes", &self.registry.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<'r> TransactionManager<'r> {
    pub fn new(
        registry: &'r Registry,
        config: &'r RecastConfig,
        observer: &'r dyn TransactionObserver,
    ) -> Self {
        Self {
            registry,
            config,
            observer,
        }
    }

    /// Run one recipe as an all-or-nothing transaction against `model`.
    ///
    /// `index` must describe `model` as passed in. On success returns the
    /// audit log and the index re-derived for the committed state.
    pub fn perform(
        &self,
        descriptor: &RefactoringDescriptor,
        target: SymbolId,
        params: &Params,
        model: &mut ProgramModel,
        index: &ReferenceIndex,
        cancel: &CancelToken,
    ) -> Result<(EditLog, ReferenceIndex), RefactoringError> {
        let recipe = descriptor.name().to_string();
        let mut tx = Transaction {
            id: Uuid::new_v4(),
            recipe: recipe.clone(),
            state: TransactionState::Proposed,
            observer: self.observer,
        };
        let checkpoint = Checkpoint::take(model);

        if cancel.is_cancelled() {
            tx.advance(TransactionState::RolledBack);
            return Err(RefactoringError::Cancelled { recipe });
        }

        // (2) precondition
        let verdict = match PreconditionAnalyzer::new(&self.config.analysis)
            .check(descriptor, target, params, model, index)
        {
            Ok(verdict) => verdict,
            Err(err) => {
                tx.advance(TransactionState::RolledBack);
                return Err(err);
            }
        };
        tx.advance(TransactionState::PreconditionChecked);
        if let Verdict::Rejected(rejection) = verdict {
            tx.advance(TransactionState::RolledBack);
            return Err(RefactoringError::PreconditionViolation { recipe, rejection });
        }

        // (3) apply
        tx.advance(TransactionState::Applying);
        let engine = TransformationEngine::new(self.registry, self.config);
        let log = match engine.apply(descriptor, target, params, model, cancel) {
            Ok(log) => log,
            Err(partial) => {
                let PartialApply { log, step, error } = *partial;
                self.roll_back(&mut tx, model, &log, &checkpoint);
                return Err(match error {
                    StepError::Cancelled => RefactoringError::Cancelled { recipe },
                    source => RefactoringError::ApplyFailed { recipe, step, source },
                });
            }
        };

        // (4) verify
        tx.advance(TransactionState::Verifying);
        if cancel.is_cancelled() {
            self.roll_back(&mut tx, model, &log, &checkpoint);
            return Err(RefactoringError::Cancelled { recipe });
        }
        let fresh = ReferenceIndex::build_with(model, self.config.analysis.parallel_index);
        let violations = self.verify(descriptor, target, params, model, &fresh, &log);
        if !violations.is_empty() {
            warn!(recipe = %recipe, violations = ?violations, "postcondition violated");
            self.roll_back(&mut tx, model, &log, &checkpoint);
            return Err(RefactoringError::PostconditionViolation { recipe, violations });
        }

        // (5) commit
        tx.advance(TransactionState::Committed);
        info!(
            transaction = %tx.id,
            recipe = %recipe,
            edits = log.len(),
            revision = model.revision(),
            "transaction committed"
        );
        Ok((log, fresh))
    }

    fn verify(
        &self,
        descriptor: &RefactoringDescriptor,
        target: SymbolId,
        params: &Params,
        model: &ProgramModel,
        index: &ReferenceIndex,
        log: &EditLog,
    ) -> Vec<String> {
        let mut violations = Vec::new();
        if self.config.transaction.verify_well_formed {
            violations.extend(check_well_formed(model).iter().map(ToString::to_string));
        }
        let verification = Verification {
            model,
            index,
            target,
            params,
            bindings: &log.bindings,
        };
        if let Err(rejection) = (descriptor.postcondition)(&verification) {
            violations.push(rejection.to_string());
        }
        violations
    }

    /// Replay the inverses newest-first and prove the model matches the
    /// checkpoint. The checkpoint copy is the last resort if it does not.
    fn roll_back(
        &self,
        tx: &mut Transaction<'_>,
        model: &mut ProgramModel,
        log: &EditLog,
        checkpoint: &Checkpoint,
    ) {
        if let Err(err) = log.revert(model) {
            error!(
                transaction = %tx.id,
                error = %err,
                "inverse replay failed; restoring checkpoint copy"
            );
            *model = checkpoint.model.clone();
        } else if self.config.transaction.verify_rollback && !checkpoint.matches(model) {
            error!(
                transaction = %tx.id,
                "rollback diverged from checkpoint; restoring checkpoint copy"
            );
            *model = checkpoint.model.clone();
        }
        warn!(
            transaction = %tx.id,
            recipe = %tx.recipe,
            checkpoint = %checkpoint.id,
            reverted = log.len(),
            "transaction rolled back"
        );
        tx.advance(TransactionState::RolledBack);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(TransactionState, TransactionState)>>);

    impl TransactionObserver for Recorder {
        fn on_transition(&self, t: &Transition<'_>) {
            self.0.lock().expect("recorder mutex poisoned").push((t.from, t.to));
        }
    }

    fn model() -> (ProgramModel, SymbolId) {
        let mut b = recast_model::ModelBuilder::new();
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
    fn state_machine_allows_only_forward_moves() {
        use TransactionState::*;
        assert!(Proposed.can_transition_to(PreconditionChecked));
        assert!(Verifying.can_transition_to(Committed));
        assert!(Applying.can_transition_to(RolledBack));
        assert!(!Committed.can_transition_to(RolledBack));
        assert!(!Proposed.can_transition_to(Applying));
        assert!(Applying.is_writing() && !Committed.is_writing());
    }

    #[test]
    fn committed_run_walks_every_state() {
        let (mut model, m) = model();
        let registry = Registry::builtin().unwrap();
        let config = RecastConfig::default();
        let recorder = Recorder::default();
        let manager = TransactionManager::new(&registry, &config, &recorder);
        let descriptor = registry.lookup("RenameMethod").unwrap();
        let index = ReferenceIndex::build(&model);
        let params = Params::new().with("name", "total");
        let (log, fresh) = manager
            .perform(&descriptor, m, &params, &mut model, &index, &CancelToken::new())
            .unwrap();
        assert!(!log.is_empty());
        assert!(fresh.is_current(&model));
        let states: Vec<_> = recorder.0.lock().unwrap().iter().map(|(_, to)| *to).collect();
        assert_eq!(
            states,
            vec![
                TransactionState::PreconditionChecked,
                TransactionState::Applying,
                TransactionState::Verifying,
                TransactionState::Committed
            ]
        );
    }

    #[test]
    fn rejection_leaves_model_untouched() {
        let (mut model, m) = model();
        let original = model.clone();
        let registry = Registry::builtin().unwrap();
        let config = RecastConfig::default();
        let manager = TransactionManager::new(&registry, &config, &NoopObserver);
        let descriptor = registry.lookup("RenameMethod").unwrap();
        let index = ReferenceIndex::build(&model);
        let params = Params::new().with("name", "taken");
        let err = manager
            .perform(&descriptor, m, &params, &mut model, &index, &CancelToken::new())
            .unwrap_err();
        assert_eq!(err.exit_code(), 1, "{err}");
        assert_eq!(model, original);
    }

    #[test]
    fn stale_index_is_refused() {
        let (mut model, m) = model();
        let index = ReferenceIndex::build(&model);
        model
            .apply(&recast_model::Edit::RenameSymbol {
                id: m,
                new_name: "n".into(),
            })
            .unwrap();
        let registry = Registry::builtin().unwrap();
        let config = RecastConfig::default();
        let recorder = Recorder::default();
        let manager = TransactionManager::new(&registry, &config, &recorder);
        let descriptor = registry.lookup("RenameMethod").unwrap();
        let params = Params::new().with("name", "k");
        let err = manager
            .perform(&descriptor, m, &params, &mut model, &index, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, RefactoringError::StaleIndex { .. }), "{err}");
        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![(TransactionState::Proposed, TransactionState::RolledBack)]
        );
    }
}
