use serde_json::json;

use recast_core::{Params, RefactoringError, Verdict};
use recast_model::{NodeKind, check_well_formed};
use recast_test::{pricing, rectangle, resolve, session, staff};

// ── Order.price() ────────────────────────────────────────────────

#[test]
fn base_price_becomes_a_query() {
    let s = session(pricing());
    let log = s
        .perform("ReplaceTempWithQuery", "billing::Order::price::basePrice", &Params::new())
        .unwrap();
    assert_eq!(log.recipe, "ReplaceTempWithQuery");
    assert!(!log.is_empty());

    let snapshot = s.snapshot();
    let model = &snapshot.model;
    let query = resolve(model, "billing::Order::basePrice");
    assert!(model.params(query).is_empty(), "query takes no arguments");

    let price = resolve(model, "billing::Order::price");
    let calls: Vec<_> = model
        .body_nodes(price)
        .into_iter()
        .filter_map(|n| model.node(n))
        .filter(|n| n.kind == NodeKind::Call && n.symbol == Some(query))
        .collect();
    assert_eq!(calls.len(), 2, "both reads of the local now call the query");
    assert!(model.resolve(&"billing::Order::price::basePrice".parse().unwrap()).is_err());
    assert!(check_well_formed(model).is_empty());
}

#[test]
fn discount_factor_is_assigned_more_than_once() {
    let s = session(pricing());
    let before = s.snapshot();
    let err = s
        .perform("ReplaceTempWithQuery", "billing::Order::price::discountFactor", &Params::new())
        .unwrap_err();
    assert_eq!(err.exit_code(), 1);
    assert_eq!(err.rejection().unwrap().reason, "assigned more than once");
    assert_eq!(s.snapshot().model, before.model);
}

#[test]
fn rejection_is_the_same_from_check_and_perform() {
    let s = session(pricing());
    let target = "billing::Order::price::discountFactor";
    let verdict = s.check("ReplaceTempWithQuery", target, &Params::new()).unwrap();
    let Verdict::Rejected(checked) = verdict else {
        panic!("check should reject");
    };
    let RefactoringError::PreconditionViolation { rejection, .. } = s
        .perform("ReplaceTempWithQuery", target, &Params::new())
        .unwrap_err()
    else {
        panic!("perform should report a precondition violation");
    };
    assert_eq!(checked, rejection);
}

// ── Split then replace ───────────────────────────────────────────

#[test]
fn split_enables_replace_temp_with_query() {
    let s = session(rectangle());
    let verdict = s
        .check("ReplaceTempWithQuery", "geometry::Rect::report::temp", &Params::new())
        .unwrap();
    assert_eq!(verdict.rejection().unwrap().reason, "assigned more than once");
    assert_eq!(
        verdict.rejection().unwrap().suggestion.as_deref(),
        Some("SplitTemporaryVariable")
    );

    let log = s
        .perform("SplitTemporaryVariable", "geometry::Rect::report::temp", &Params::new())
        .unwrap();
    let locals = log.bindings.get("locals").cloned();
    assert!(locals.is_some(), "split binds the resulting locals");

    for local in ["geometry::Rect::report::temp", "geometry::Rect::report::temp2"] {
        let verdict = s.check("ReplaceTempWithQuery", local, &Params::new()).unwrap();
        assert!(verdict.is_accepted(), "{local}: {verdict:?}");
    }

    s.perform("ReplaceTempWithQuery", "geometry::Rect::report::temp", &Params::new())
        .unwrap();
    s.perform("ReplaceTempWithQuery", "geometry::Rect::report::temp2", &Params::new())
        .unwrap();
    let snapshot = s.snapshot();
    let report = resolve(&snapshot.model, "geometry::Rect::report");
    assert!(snapshot.model.locals(report).is_empty());
}

// ── Extract / inline ─────────────────────────────────────────────

#[test]
fn extract_then_inline_restores_the_model() {
    let s = session(rectangle());
    // While `temp` spans both halves no half can be extracted on its own.
    let whole = Params::new()
        .with("name", "logArea")
        .with("range", json!({"start": 2, "end": 4}));
    assert!(!s.check("ExtractMethod", "geometry::Rect::report", &whole).unwrap().is_accepted());
    s.perform("SplitTemporaryVariable", "geometry::Rect::report::temp", &Params::new())
        .unwrap();

    let before = s.snapshot();
    s.perform("ExtractMethod", "geometry::Rect::report", &whole).unwrap();

    let extracted = s.snapshot();
    let helper = resolve(&extracted.model, "geometry::Rect::logArea");
    assert_eq!(extracted.index.callers_of(helper).len(), 1);
    assert_eq!(extracted.model.locals(helper).len(), 1, "temp2 moves with the range");

    s.perform("InlineMethod", "geometry::Rect::logArea", &Params::new())
        .unwrap();
    let after = s.snapshot();
    assert_eq!(after.index.edge_signature(), before.index.edge_signature());

    let mut ids_before: Vec<_> = before.model.symbols().map(|s| s.id).collect();
    let mut ids_after: Vec<_> = after.model.symbols().map(|s| s.id).collect();
    ids_before.sort();
    ids_after.sort();
    assert_eq!(ids_after, ids_before);
}

// ── Hierarchies ──────────────────────────────────────────────────

#[test]
fn pull_up_field_then_method() {
    let s = session(staff());
    let early = s
        .check("PullUpMethod", "staff::Engineer::describe", &Params::new())
        .unwrap();
    assert_eq!(early.rejection().unwrap().suggestion.as_deref(), Some("PullUpField"));

    s.perform("PullUpField", "staff::Engineer::name", &Params::new()).unwrap();
    s.perform("PullUpMethod", "staff::Engineer::describe", &Params::new())
        .unwrap();

    let snapshot = s.snapshot();
    let model = &snapshot.model;
    resolve(model, "staff::Employee::name");
    resolve(model, "staff::Employee::describe");
    for sub in ["Engineer", "Salesman"] {
        let ty = resolve(model, &format!("staff::{sub}"));
        assert!(model.fields(ty).is_empty(), "{sub} keeps no field");
        assert!(model.methods(ty).is_empty(), "{sub} keeps no method");
    }
}

#[test]
fn unknown_recipe_and_target_are_reported_without_a_transaction() {
    let s = session(pricing());
    let err = s
        .perform("ExtractMethodology", "billing::Order::price", &Params::new())
        .unwrap_err();
    assert_eq!(err, RefactoringError::UnknownRefactoring("ExtractMethodology".into()));
    assert_eq!(err.exit_code(), 4);

    let err = s
        .perform("InlineTemp", "billing::Order::missing", &Params::new())
        .unwrap_err();
    assert_eq!(err.exit_code(), 1);
}
