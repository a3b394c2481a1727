// Refactoring Registry: the immutable table of recipes, loaded at startup.
//
// Descriptive data (title, category, summary, target wording, prerequisites)
// lives in the embedded `catalog.toml`; behaviour (shape, predicates, steps)
// is compiled in from `crate::recipes`. Loading joins the two and refuses to
// start if either side names something the other lacks.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use recast_model::{ProgramModel, SymbolId, SymbolKind};

use crate::analyzer::{Analysis, Check, Verification, reject};
use crate::config::RegistrySection;
use crate::engine::{StepCx, StepResult};
use crate::error::{CatalogError, RefactoringError};

const CATALOG: &str = include_str!("catalog.toml");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    ComposingMethods,
    MovingFeatures,
    OrganizingData,
    SimplifyingConditionals,
    SimplifyingCalls,
    Generalization,
    BigRefactorings,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Self::ComposingMethods,
        Self::MovingFeatures,
        Self::OrganizingData,
        Self::SimplifyingConditionals,
        Self::SimplifyingCalls,
        Self::Generalization,
        Self::BigRefactorings,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ComposingMethods => "composing_methods",
            Self::MovingFeatures => "moving_features",
            Self::OrganizingData => "organizing_data",
            Self::SimplifyingConditionals => "simplifying_conditionals",
            Self::SimplifyingCalls => "simplifying_calls",
            Self::Generalization => "generalization",
            Self::BigRefactorings => "big_refactorings",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s || normalize(c.as_str()) == normalize(s))
            .ok_or_else(|| format!("unknown category `{s}`"))
    }
}

// ── Target shapes ─────────────────────────────────────────────────────

/// Structural pattern the target symbol must match before the recipe
/// predicate is consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetShape {
    Type,
    /// A type with a supertype.
    Subtype,
    /// A type with at least one subtype.
    Supertype,
    /// A method that is not a constructor.
    Method,
    Constructor,
    Field,
    Local,
    Parameter,
}

impl TargetShape {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Type => "a type",
            Self::Subtype => "a type with a supertype",
            Self::Supertype => "a type with subtypes",
            Self::Method => "a method",
            Self::Constructor => "a constructor",
            Self::Field => "a field",
            Self::Local => "a local variable",
            Self::Parameter => "a parameter",
        }
    }

    pub fn check(self, model: &ProgramModel, target: SymbolId) -> Check {
        let Some(symbol) = model.symbol(target) else {
            return reject(format!("target {target} does not exist"));
        };
        let fits = match self {
            Self::Type => symbol.kind == SymbolKind::Type,
            Self::Subtype => symbol.kind == SymbolKind::Type && symbol.supertype.is_some(),
            Self::Supertype => {
                symbol.kind == SymbolKind::Type && !model.subtypes(target).is_empty()
            }
            Self::Method => symbol.kind == SymbolKind::Method && !symbol.is_constructor(),
            Self::Constructor => symbol.is_constructor(),
            Self::Field => symbol.kind == SymbolKind::Field,
            Self::Local => symbol.kind == SymbolKind::Local,
            Self::Parameter => symbol.kind == SymbolKind::Parameter,
        };
        if fits {
            Ok(())
        } else {
            reject(format!(
                "target must be {}, {} is a {}",
                self.describe(),
                model.qualified_name(target),
                symbol.kind
            ))
        }
    }
}

// ── Descriptors ───────────────────────────────────────────────────────

pub type Precondition = fn(&Analysis<'_>) -> Check;
pub type Postcondition = fn(&Verification<'_>) -> Check;
pub type StepFn = fn(&mut StepCx<'_>) -> StepResult;

/// One edit-step template.
#[derive(Clone, Copy)]
pub struct Step {
    pub name: &'static str,
    pub run: StepFn,
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Compiled behaviour of a recipe.
#[derive(Clone, Copy)]
pub struct Recipe {
    pub name: &'static str,
    pub shape: TargetShape,
    pub precondition: Precondition,
    pub steps: &'static [Step],
    pub postcondition: Postcondition,
}

impl fmt::Debug for Recipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recipe")
            .field("name", &self.name)
            .field("shape", &self.shape)
            .field("steps", &self.steps)
            .finish_non_exhaustive()
    }
}

/// Catalog data for a recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub title: String,
    pub category: Category,
    pub summary: String,
    pub target: String,
    #[serde(default)]
    pub prerequisites: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Catalog {
    refactoring: Vec<CatalogEntry>,
}

/// A registry entry: catalog data joined with compiled behaviour.
#[derive(Clone)]
pub struct RefactoringDescriptor {
    pub entry: CatalogEntry,
    pub shape: TargetShape,
    pub precondition: Precondition,
    pub steps: &'static [Step],
    pub postcondition: Postcondition,
}

impl fmt::Debug for RefactoringDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefactoringDescriptor")
            .field("name", &self.entry.name)
            .field("category", &self.entry.category)
            .field("shape", &self.shape)
            .field("steps", &self.steps)
            .finish_non_exhaustive()
    }
}

impl RefactoringDescriptor {
    pub fn name(&self) -> &str {
        &self.entry.name
    }

    pub fn category(&self) -> Category {
        self.entry.category
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name).collect()
    }
}

// ── Registry ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct Registry {
    descriptors: BTreeMap<String, Arc<RefactoringDescriptor>>,
    /// Normalized name to canonical name.
    aliases: HashMap<String, String>,
}

/// Lowercase with separators removed: `split temporary_variable` and
/// `SplitTemporaryVariable` normalize alike.
fn normalize(name: &str) -> String {
    name.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

impl Registry {
    /// The built-in catalog with every compiled recipe.
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_parts(CATALOG, crate::recipes::all())
    }

    pub fn from_parts(catalog: &str, recipes: Vec<Recipe>) -> Result<Self, CatalogError> {
        let catalog: Catalog = toml::from_str(catalog)?;
        let mut behaviours: HashMap<&'static str, Recipe> = HashMap::new();
        for recipe in recipes {
            if behaviours.insert(recipe.name, recipe).is_some() {
                return Err(CatalogError::Duplicate(recipe.name.to_string()));
            }
        }

        let mut registry = Self::default();
        for entry in catalog.refactoring {
            let recipe = behaviours
                .remove(entry.name.as_str())
                .ok_or_else(|| CatalogError::MissingRecipe(entry.name.clone()))?;
            let name = entry.name.clone();
            let descriptor = RefactoringDescriptor {
                entry,
                shape: recipe.shape,
                precondition: recipe.precondition,
                steps: recipe.steps,
                postcondition: recipe.postcondition,
            };
            if registry
                .descriptors
                .insert(name.clone(), Arc::new(descriptor))
                .is_some()
            {
                return Err(CatalogError::Duplicate(name));
            }
            registry.aliases.insert(normalize(&name), name);
        }
        if let Some(orphan) = behaviours.keys().min() {
            return Err(CatalogError::MissingEntry((*orphan).to_string()));
        }
        debug!(recipes = registry.descriptors.len(), "registry loaded");
        Ok(registry)
    }

    /// Hide the recipes the configuration disables.
    pub fn configured(mut self, section: &RegistrySection) -> Self {
        for name in &section.disabled {
            if let Some(canonical) = self.aliases.remove(&normalize(name)) {
                self.descriptors.remove(&canonical);
            }
        }
        self
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<RefactoringDescriptor>, RefactoringError> {
        self.descriptors
            .get(name)
            .or_else(|| {
                self.aliases
                    .get(&normalize(name))
                    .and_then(|canonical| self.descriptors.get(canonical))
            })
            .cloned()
            .ok_or_else(|| RefactoringError::UnknownRefactoring(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Descriptors in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<RefactoringDescriptor>> {
        self.descriptors.values()
    }

    pub fn by_category(&self, category: Category) -> Vec<&Arc<RefactoringDescriptor>> {
        self.iter().filter(|d| d.category() == category).collect()
    }

    /// Descriptors whose name matches a glob pattern such as `*Temp*`.
    pub fn matching(
        &self,
        pattern: &str,
    ) -> Result<Vec<&Arc<RefactoringDescriptor>>, glob::PatternError> {
        let pattern = glob::Pattern::new(pattern)?;
        Ok(self.iter().filter(|d| pattern.matches(d.name())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::Rejection;

    fn accept(_: &Analysis<'_>) -> Check {
        Ok(())
    }

    fn holds(_: &Verification<'_>) -> Check {
        Ok(())
    }

    fn noop(_: &mut StepCx<'_>) -> StepResult {
        Ok(())
    }

    const STEPS: &[Step] = &[Step {
        name: "noop",
        run: noop,
    }];

    fn recipe(name: &'static str) -> Recipe {
        Recipe {
            name,
            shape: TargetShape::Method,
            precondition: accept,
            steps: STEPS,
            postcondition: holds,
        }
    }

    const ONE: &str = r#"
        [[refactoring]]
        name = "Demo"
        title = "Demo"
        category = "composing_methods"
        summary = "Does nothing."
        target = "a method"
    "#;

    #[test]
    fn builtin_catalog_joins_every_recipe() {
        let registry = Registry::builtin().unwrap();
        assert_eq!(registry.len(), 71);
        for category in Category::ALL {
            assert!(!registry.by_category(category).is_empty(), "{category}");
        }
    }

    #[test]
    fn lookup_is_exact_or_normalized() {
        let registry = Registry::builtin().unwrap();
        assert_eq!(registry.lookup("ExtractMethod").unwrap().name(), "ExtractMethod");
        assert_eq!(
            registry.lookup("split_temporary variable").unwrap().name(),
            "SplitTemporaryVariable"
        );
        assert_eq!(
            registry.lookup("Frobnicate").unwrap_err(),
            RefactoringError::UnknownRefactoring("Frobnicate".into())
        );
    }

    #[test]
    fn disabled_recipes_are_hidden() {
        let registry = Registry::builtin().unwrap().configured(&RegistrySection {
            disabled: vec!["substitute_algorithm".into()],
        });
        assert_eq!(registry.len(), 70);
        assert!(registry.lookup("SubstituteAlgorithm").is_err());
    }

    #[test]
    fn glob_filter_matches_names() {
        let registry = Registry::builtin().unwrap();
        let temps: Vec<_> = registry
            .matching("*Temp*")
            .unwrap()
            .into_iter()
            .map(|d| d.name().to_string())
            .collect();
        assert!(temps.contains(&"InlineTemp".to_string()));
        assert!(temps.contains(&"ReplaceTempWithQuery".to_string()));
    }

    proptest::proptest! {
        #[test]
        fn lookup_ignores_case_and_separators(
            pick in proptest::sample::select(
                Registry::builtin()
                    .unwrap()
                    .iter()
                    .map(|d| d.name().to_string())
                    .collect::<Vec<_>>()
            ),
            mask in proptest::collection::vec(0u8..4, 64),
        ) {
            let registry = Registry::builtin().unwrap();
            let spelled: String = pick
                .chars()
                .zip(mask.iter().cycle())
                .map(|(c, m)| match m {
                    0 => c.to_ascii_lowercase().to_string(),
                    1 => c.to_ascii_uppercase().to_string(),
                    2 => format!("_{c}"),
                    _ => format!(" {c}"),
                })
                .collect();
            let found = registry.lookup(&spelled).unwrap();
            proptest::prop_assert_eq!(found.name(), pick.as_str());
        }
    }

    #[test]
    fn prerequisites_name_known_recipes() {
        let registry = Registry::builtin().unwrap();
        for descriptor in registry.iter() {
            for prerequisite in &descriptor.entry.prerequisites {
                assert!(
                    registry.lookup(prerequisite).is_ok(),
                    "{} lists unknown prerequisite {prerequisite}",
                    descriptor.name()
                );
            }
        }
    }

    #[test]
    fn catalog_and_recipes_must_agree() {
        assert!(Registry::from_parts(ONE, vec![recipe("Demo")]).is_ok());
        assert!(matches!(
            Registry::from_parts(ONE, vec![]),
            Err(CatalogError::MissingRecipe(name)) if name == "Demo"
        ));
        assert!(matches!(
            Registry::from_parts(ONE, vec![recipe("Demo"), recipe("Extra")]),
            Err(CatalogError::MissingEntry(name)) if name == "Extra"
        ));
        assert!(matches!(
            Registry::from_parts(ONE, vec![recipe("Demo"), recipe("Demo")]),
            Err(CatalogError::Duplicate(_))
        ));
    }

    #[test]
    fn shape_mismatch_names_the_expected_shape() {
        let mut b = recast_model::ModelBuilder::new();
        let app = b.module("app");
        let ty = b.ty(app, "T");
        let f = b.field(ty, "f");
        let model = b.build().unwrap();
        let err: Rejection = TargetShape::Method.check(&model, f).unwrap_err();
        assert!(err.reason.contains("a method"), "{}", err.reason);
        assert!(TargetShape::Field.check(&model, f).is_ok());
        assert!(TargetShape::Supertype.check(&model, ty).is_err());
    }
}
