use std::collections::BTreeMap;

use recast_core::registry::TargetShape;
use recast_core::{Category, Params, RecastConfig, Registry, Session, Verdict};
use recast_model::{FrontEnd, SnapshotFrontEnd};
use recast_test::{SnapshotFile, load_snapshot, pricing, session, staff};

#[test]
fn every_category_has_its_recipes() {
    let registry = Registry::builtin().unwrap();
    let counts: BTreeMap<Category, usize> = Category::ALL
        .into_iter()
        .map(|c| (c, registry.by_category(c).len()))
        .collect();
    assert_eq!(counts[&Category::ComposingMethods], 9);
    assert_eq!(counts[&Category::MovingFeatures], 8);
    assert_eq!(counts[&Category::OrganizingData], 16);
    assert_eq!(counts[&Category::SimplifyingConditionals], 8);
    assert_eq!(counts[&Category::SimplifyingCalls], 15);
    assert_eq!(counts[&Category::Generalization], 11);
    assert_eq!(counts[&Category::BigRefactorings], 4);
    assert_eq!(counts.values().sum::<usize>(), registry.len());
}

#[test]
fn no_recipe_targets_a_module() {
    let s = session(pricing());
    for descriptor in s.registry().iter() {
        let verdict = s.check(descriptor.name(), "billing", &Params::new()).unwrap();
        let Verdict::Rejected(rejection) = verdict else {
            panic!("{} accepted a module", descriptor.name());
        };
        assert!(
            rejection.reason.contains(descriptor.shape.describe()),
            "{}: {}",
            descriptor.name(),
            rejection.reason
        );
    }
}

#[test]
fn hierarchy_shapes_are_told_apart() {
    let s = session(staff());
    let registry = s.registry();
    let collapse = registry.lookup("CollapseHierarchy").unwrap();
    assert_eq!(collapse.shape, TargetShape::Subtype);
    let verdict = s.check("CollapseHierarchy", "staff::Employee", &Params::new()).unwrap();
    assert!(verdict.rejection().is_some());

    let tease = registry.lookup("tease apart inheritance").unwrap();
    assert_eq!(tease.shape, TargetShape::Supertype);
    let verdict = s.check("TeaseApartInheritance", "staff::Engineer", &Params::new()).unwrap();
    assert!(verdict.rejection().unwrap().reason.contains("a type with subtypes"));
}

#[test]
fn disabled_recipes_are_unknown_to_the_session() {
    let config = RecastConfig::from_toml_str("[registry]\ndisabled = [\"InlineTemp\"]\n").unwrap();
    let s = Session::builtin(pricing(), config).unwrap();
    let err = s
        .check("InlineTemp", "billing::Order::price::basePrice", &Params::new())
        .unwrap_err();
    assert_eq!(err.exit_code(), 4);
}

#[test]
fn committed_model_survives_the_snapshot_front_end() {
    let file = SnapshotFile::write(&pricing());
    let text = std::fs::read_to_string(file.path()).unwrap();
    let s = Session::load(&SnapshotFrontEnd, &text, RecastConfig::default()).unwrap();
    s.perform("ReplaceTempWithQuery", "billing::Order::price::basePrice", &Params::new())
        .unwrap();

    let rendered = s.render(&SnapshotFrontEnd).unwrap();
    let out = file.sibling("out.json");
    std::fs::write(&out, &rendered).unwrap();
    let reloaded = load_snapshot(&out).unwrap();
    assert_eq!(reloaded, s.snapshot().model);
    assert_eq!(SnapshotFrontEnd.render(&reloaded).unwrap(), rendered);
}
