// Compiled recipe behaviour, grouped the way the catalog groups it.
//
// Each recipe is a `Recipe` constant: a target shape, a read-only
// precondition, an ordered list of edit-step templates, and a
// postcondition checked against the mutated model.

pub mod big;
pub mod calls;
pub mod composing;
pub mod conditionals;
pub mod data;
pub mod generalization;
pub mod moving;
pub(crate) mod support;

use crate::registry::Recipe;

/// Every compiled recipe.
pub fn all() -> Vec<Recipe> {
    let mut recipes = Vec::new();
    recipes.extend(composing::recipes());
    recipes.extend(moving::recipes());
    recipes.extend(data::recipes());
    recipes.extend(conditionals::recipes());
    recipes.extend(calls::recipes());
    recipes.extend(generalization::recipes());
    recipes.extend(big::recipes());
    recipes
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    #[test]
    fn recipe_names_are_unique() {
        let all = super::all();
        let names: HashSet<_> = all.iter().map(|r| r.name).collect();
        assert_eq!(names.len(), all.len());
        assert_eq!(all.len(), 71);
    }

    #[test]
    fn every_recipe_has_steps() {
        for recipe in super::all() {
            assert!(!recipe.steps.is_empty(), "{} has no steps", recipe.name);
        }
    }
}
