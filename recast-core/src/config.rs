use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level recast configuration, matching `recast.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecastConfig {
    #[serde(default)]
    pub analysis: AnalysisSection,
    #[serde(default)]
    pub transaction: TransactionSection,
    #[serde(default)]
    pub registry: RegistrySection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSection {
    /// Minimum shape similarity for "used in a similar way" checks.
    pub similarity_threshold: f64,
    /// Build the reference index with one task per body.
    pub parallel_index: bool,
}

impl Default for AnalysisSection {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.75,
            parallel_index: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionSection {
    /// Run the structural well-formedness check before commit.
    pub verify_well_formed: bool,
    /// After a rollback, compare the restored model with the checkpoint.
    pub verify_rollback: bool,
}

impl Default for TransactionSection {
    fn default() -> Self {
        Self {
            verify_well_formed: true,
            verify_rollback: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySection {
    /// Recipe names hidden from lookup.
    pub disabled: Vec<String>,
}

impl RecastConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = self.analysis.similarity_threshold;
        if !(0.0..=1.0).contains(&t) {
            return Err(ConfigError::Invalid(format!(
                "analysis.similarity_threshold must be within [0, 1], got {t}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = RecastConfig::from_toml_str("").unwrap();
        assert!((config.analysis.similarity_threshold - 0.75).abs() < f64::EPSILON);
        assert!(config.analysis.parallel_index);
        assert!(config.transaction.verify_well_formed);
        assert!(config.registry.disabled.is_empty());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = RecastConfig::from_toml_str(
            r#"
            [analysis]
            similarity_threshold = 0.5

            [registry]
            disabled = ["SubstituteAlgorithm"]
            "#,
        )
        .unwrap();
        assert!((config.analysis.similarity_threshold - 0.5).abs() < f64::EPSILON);
        assert!(config.analysis.parallel_index);
        assert_eq!(config.registry.disabled, vec!["SubstituteAlgorithm"]);
    }

    #[test]
    fn out_of_range_threshold_is_invalid() {
        let err = RecastConfig::from_toml_str("[analysis]\nsimilarity_threshold = 1.5\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{err}");
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recast.toml");
        std::fs::write(&path, "[transaction]\nverify_rollback = false\n").unwrap();
        let config = RecastConfig::load(&path).unwrap();
        assert!(!config.transaction.verify_rollback);
        assert!(config.transaction.verify_well_formed);

        let missing = RecastConfig::load(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));
    }
}
