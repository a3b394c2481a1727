use std::sync::{Arc, LazyLock};

use recast_core::analyzer::{Analysis, Check, Verification, reject};
use recast_core::engine::{CancelToken, StepCx, StepResult};
use recast_core::registry::{Recipe, Step, TargetShape};
use recast_core::{
    Params, RecastConfig, RefactoringError, Registry, Request, Session, TransactionState,
};
use recast_test::{RecordingObserver, pricing};

const CATALOG: &str = r#"
[[refactoring]]
name = "RenameIntoCollision"
title = "Rename Into Collision"
category = "composing_methods"
summary = "Renames the target, then renames it onto a field."
target = "a method"

[[refactoring]]
name = "RenameUnverified"
title = "Rename Unverified"
category = "composing_methods"
summary = "Renames the target; the postcondition never holds."
target = "a method"

[[refactoring]]
name = "RenameThenCancel"
title = "Rename Then Cancel"
category = "composing_methods"
summary = "Renames the target, then cancels before the second step."
target = "a method"
"#;

static CANCEL: LazyLock<CancelToken> = LazyLock::new(CancelToken::new);

fn accept(_: &Analysis<'_>) -> Check {
    Ok(())
}

fn hold(_: &Verification<'_>) -> Check {
    Ok(())
}

fn never_holds(_: &Verification<'_>) -> Check {
    reject("total is not a price")
}

fn rename_total(cx: &mut StepCx<'_>) -> StepResult {
    let target = cx.target();
    cx.rename(target, "total")
}

fn rename_onto_field(cx: &mut StepCx<'_>) -> StepResult {
    let target = cx.target();
    cx.rename(target, "quantity")
}

fn rename_total_and_cancel(cx: &mut StepCx<'_>) -> StepResult {
    rename_total(cx)?;
    CANCEL.cancel();
    Ok(())
}

const COLLISION: Recipe = Recipe {
    name: "RenameIntoCollision",
    shape: TargetShape::Method,
    precondition: accept,
    steps: &[
        Step {
            name: "rename",
            run: rename_total,
        },
        Step {
            name: "rename onto field",
            run: rename_onto_field,
        },
    ],
    postcondition: hold,
};

const UNVERIFIED: Recipe = Recipe {
    name: "RenameUnverified",
    shape: TargetShape::Method,
    precondition: accept,
    steps: &[Step {
        name: "rename",
        run: rename_total,
    }],
    postcondition: never_holds,
};

const CANCELLING: Recipe = Recipe {
    name: "RenameThenCancel",
    shape: TargetShape::Method,
    precondition: accept,
    steps: &[
        Step {
            name: "rename",
            run: rename_total_and_cancel,
        },
        Step {
            name: "rename again",
            run: rename_onto_field,
        },
    ],
    postcondition: hold,
};

fn session(observer: Arc<RecordingObserver>) -> Session {
    let registry =
        Registry::from_parts(CATALOG, vec![COLLISION, UNVERIFIED, CANCELLING]).unwrap();
    Session::new(pricing(), Arc::new(registry), RecastConfig::default()).with_observer(observer)
}

fn rolled_back(observer: &RecordingObserver) -> bool {
    observer.outcomes() == vec![TransactionState::RolledBack]
}

#[test]
fn failed_step_unwinds_earlier_edits() {
    let observer = Arc::new(RecordingObserver::default());
    let s = session(observer.clone());
    let before = s.snapshot();

    let err = s
        .perform("RenameIntoCollision", "billing::Order::price", &Params::new())
        .unwrap_err();
    assert!(matches!(err, RefactoringError::ApplyFailed { .. }), "{err}");
    assert_eq!(err.exit_code(), 2);
    assert_eq!(s.snapshot().model, before.model);
    assert!(rolled_back(&observer));
}

#[test]
fn failed_postcondition_unwinds_the_transaction() {
    let observer = Arc::new(RecordingObserver::default());
    let s = session(observer.clone());
    let before = s.snapshot();

    let err = s
        .perform("RenameUnverified", "billing::Order::price", &Params::new())
        .unwrap_err();
    assert!(matches!(err, RefactoringError::PostconditionViolation { .. }), "{err}");
    assert_eq!(err.exit_code(), 3);
    assert!(err.to_string().contains("total is not a price"), "{err}");
    assert_eq!(s.snapshot().model, before.model);
    assert!(rolled_back(&observer));
}

#[test]
fn cancellation_between_steps_unwinds_applied_edits() {
    let observer = Arc::new(RecordingObserver::default());
    let s = session(observer.clone());
    let before = s.snapshot();

    let request = Request::new("RenameThenCancel", "billing::Order::price", Params::new());
    let err = s.perform_request(&request, &CANCEL).unwrap_err();
    assert!(matches!(err, RefactoringError::Cancelled { .. }), "{err}");
    assert_eq!(err.exit_code(), 2);
    assert_eq!(s.snapshot().model, before.model);
    assert!(rolled_back(&observer));
}
