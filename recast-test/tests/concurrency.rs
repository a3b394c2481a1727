use std::sync::Arc;
use std::thread;

use recast_core::engine::CancelToken;
use recast_core::{Params, Request, TransactionState};
use recast_model::ModelBuilder;
use recast_test::{RecordingObserver, pricing, resolve, session};

/// `app::Counter` with `count` methods `m0..`, each returning a field.
fn counters(count: usize) -> recast_model::ProgramModel {
    let mut b = ModelBuilder::new();
    let app = b.module("app");
    let ty = b.ty(app, "Counter");
    let value = b.field(ty, "value");
    for i in 0..count {
        let m = b.method(ty, &format!("m{i}"));
        let read = b.read(value);
        let ret = b.ret(Some(read));
        b.body(m, vec![ret]);
    }
    b.build().unwrap()
}

#[test]
fn concurrent_writers_never_interleave() {
    let observer = Arc::new(RecordingObserver::default());
    let s = Arc::new(session(counters(8)).with_observer(observer.clone()));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let s = Arc::clone(&s);
            thread::spawn(move || {
                s.perform(
                    "RenameMethod",
                    &format!("app::Counter::m{i}"),
                    &Params::new().with("name", format!("renamed{i}")),
                )
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    assert_eq!(observer.peak_writers(), 1);
    assert_eq!(
        observer.outcomes(),
        vec![TransactionState::Committed; 8],
        "every rename commits"
    );
    let snapshot = s.snapshot();
    for i in 0..8 {
        resolve(&snapshot.model, &format!("app::Counter::renamed{i}"));
    }
}

#[test]
fn conflicting_writers_are_serialized() {
    // Both requests want the same new name: exactly one can win.
    let s = Arc::new(session(counters(2)));
    let handles: Vec<_> = (0..2)
        .map(|i| {
            let s = Arc::clone(&s);
            thread::spawn(move || {
                s.perform(
                    "RenameMethod",
                    &format!("app::Counter::m{i}"),
                    &Params::new().with("name", "total"),
                )
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = results.into_iter().find_map(Result::err).unwrap();
    assert_eq!(loser.exit_code(), 1, "{loser}");
}

#[test]
fn readers_run_alongside_a_writer() {
    let s = Arc::new(session(pricing()));
    let requests: Vec<_> = (0..32)
        .map(|i| {
            let target = if i % 2 == 0 { "basePrice" } else {
                "discountFactor"
            };
            Request::new(
                "ReplaceTempWithQuery",
                &format!("billing::Order::price::{target}"),
                Params::new(),
            )
        })
        .collect();

    let reader = {
        let s = Arc::clone(&s);
        thread::spawn(move || s.check_many(&requests))
    };
    let writer = {
        let s = Arc::clone(&s);
        thread::spawn(move || {
            s.perform(
                "RenameMethod",
                "billing::Order::price",
                &Params::new().with("name", "total"),
            )
        })
    };

    writer.join().unwrap().unwrap();
    let verdicts = reader.join().unwrap();
    assert_eq!(verdicts.len(), 32);
    // The batch sees one snapshot. Before the rename every basePrice request
    // is accepted; after it no path under `price` resolves.
    let accepted = verdicts
        .iter()
        .filter(|v| v.as_ref().is_ok_and(recast_core::Verdict::is_accepted))
        .count();
    assert!(accepted == 16 || accepted == 0, "accepted {accepted}");
}

#[test]
fn cancellation_before_commit_rolls_back() {
    let observer = Arc::new(RecordingObserver::default());
    let s = session(pricing()).with_observer(observer.clone());
    let before = s.snapshot();
    let cancel = CancelToken::new();
    cancel.cancel();
    let err = s
        .perform_request(
            &Request::new(
                "ReplaceTempWithQuery",
                "billing::Order::price::basePrice",
                Params::new(),
            ),
            &cancel,
        )
        .unwrap_err();
    assert_eq!(err.exit_code(), 2);
    assert_eq!(s.snapshot().model, before.model);
    assert_eq!(observer.outcomes(), vec![TransactionState::RolledBack]);
}
