use proptest::prelude::*;
use proptest::sample::Index;

use recast_core::{Params, RefactoringError, Registry, Verdict};
use recast_model::{ProgramModel, check_well_formed};
use recast_test::{pricing, rectangle, session, staff, symbol_paths};

fn fixture(which: usize) -> ProgramModel {
    match which % 3 {
        0 => pricing(),
        1 => rectangle(),
        _ => staff(),
    }
}

fn recipe_names() -> Vec<String> {
    Registry::builtin()
        .unwrap()
        .iter()
        .map(|d| d.name().to_string())
        .collect()
}

fn params(choice: u8) -> Params {
    match choice % 3 {
        0 => Params::new(),
        1 => Params::new().with("name", "fresh"),
        // Collides with an existing member in every fixture that has one.
        _ => Params::new().with("name", "price"),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(96))]

    /// A rejected check means `perform` reports the same rejection and
    /// leaves the model alone; any other failure also leaves it alone; a
    /// commit leaves a well-formed model with a current index.
    #[test]
    fn requests_commit_cleanly_or_change_nothing(
        which in 0usize..3,
        recipe in any::<Index>(),
        target in any::<Index>(),
        choice in any::<u8>(),
    ) {
        let model = fixture(which);
        let targets = symbol_paths(&model);
        let recipes = recipe_names();
        let recipe = recipe.get(&recipes).clone();
        let target = target.get(&targets).clone();
        let params = params(choice);

        let s = session(model);
        let before = s.snapshot();
        let verdict = s.check(&recipe, &target, &params).unwrap();
        let outcome = s.perform(&recipe, &target, &params);

        if let Verdict::Rejected(rejection) = &verdict {
            let Err(RefactoringError::PreconditionViolation {
                rejection: reported,
                ..
            }) = &outcome
            else {
                panic!("{recipe} on {target}: rejected by check but perform gave {outcome:?}");
            };
            prop_assert_eq!(reported, rejection);
        }

        let after = s.snapshot();
        match outcome {
            Ok(_) => {
                prop_assert!(check_well_formed(&after.model).is_empty());
                prop_assert!(after.index.is_current(&after.model));
            }
            Err(_) => prop_assert_eq!(&after.model, &before.model),
        }
    }

    /// Checking is read-only no matter how often it runs.
    #[test]
    fn checks_never_mutate(which in 0usize..3, recipe in any::<Index>(), target in any::<Index>()) {
        let model = fixture(which);
        let targets = symbol_paths(&model);
        let recipes = recipe_names();
        let s = session(model);
        let before = s.snapshot();
        let recipe = recipe.get(&recipes);
        let target = target.get(&targets);
        let first = s.check(recipe, target, &Params::new()).unwrap();
        let second = s.check(recipe, target, &Params::new()).unwrap();
        prop_assert_eq!(first, second);
        prop_assert!(std::sync::Arc::ptr_eq(&before, &s.snapshot()));
    }
}
