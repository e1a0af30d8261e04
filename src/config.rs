use crate::error::{QueryError, Result};
use crate::schema::Dataset;
use serde::{Deserialize, Serialize};
use std::env;

pub const DEFAULT_MAX_LIMIT: u32 = 100;
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

/// Collection catalog and service settings shared by the reader, executor and
/// the text-generation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Named collections holding finance records, one per institution group.
    pub finance_collections: Vec<String>,
    pub sports_collection: String,
    pub education_collection: String,
    pub max_limit: u32,
    pub gemini_model: String,
    pub firestore_project_id: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            finance_collections: vec![
                "schools".to_string(),
                "colleges".to_string(),
                "universities".to_string(),
            ],
            sports_collection: "sports".to_string(),
            education_collection: "education".to_string(),
            max_limit: DEFAULT_MAX_LIMIT,
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            firestore_project_id: None,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Starts from defaults and overrides any field whose `IQE_*` (or
    /// `GEMINI_MODEL` / `FIRESTORE_PROJECT_ID`) variable is set.
    pub fn from_env() -> Result<Self> {
        let mut config = EngineConfig::default();

        if let Ok(names) = env::var("IQE_FINANCE_COLLECTIONS") {
            config.finance_collections = names
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(name) = env::var("IQE_SPORTS_COLLECTION") {
            config.sports_collection = name.trim().to_string();
        }
        if let Ok(name) = env::var("IQE_EDUCATION_COLLECTION") {
            config.education_collection = name.trim().to_string();
        }
        if let Ok(raw) = env::var("IQE_MAX_LIMIT") {
            config.max_limit = raw.trim().parse().map_err(|_| {
                QueryError::ValidationFailure(format!("IQE_MAX_LIMIT is not a number: {}", raw))
            })?;
        }
        if let Ok(model) = env::var("GEMINI_MODEL") {
            config.gemini_model = model;
        }
        if let Ok(project) = env::var("FIRESTORE_PROJECT_ID") {
            config.firestore_project_id = Some(project);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.finance_collections.is_empty() {
            return Err(QueryError::ValidationFailure(
                "At least one finance collection must be configured".to_string(),
            ));
        }
        if self.max_limit == 0 {
            return Err(QueryError::ValidationFailure(
                "max_limit must be at least 1".to_string(),
            ));
        }
        for name in &self.finance_collections {
            if *name == self.sports_collection || *name == self.education_collection {
                return Err(QueryError::ValidationFailure(format!(
                    "Collection '{}' cannot hold both finance and {} records",
                    name,
                    if *name == self.sports_collection {
                        "sports"
                    } else {
                        "education"
                    }
                )));
            }
        }
        Ok(())
    }

    /// The single collection a sports or education dataset lives in.
    /// Finance spans several collections and has no owning collection.
    pub fn owning_collection(&self, dataset: Dataset) -> Option<&str> {
        match dataset {
            Dataset::Finance => None,
            Dataset::Sports => Some(&self.sports_collection),
            Dataset::Education => Some(&self.education_collection),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_limit, 100);
        assert_eq!(config.owning_collection(Dataset::Sports), Some("sports"));
        assert_eq!(config.owning_collection(Dataset::Finance), None);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config =
            EngineConfig::from_json_str(r#"{ "finance_collections": ["A", "B"] }"#).unwrap();
        assert_eq!(config.finance_collections, vec!["A", "B"]);
        assert_eq!(config.education_collection, "education");
        assert_eq!(config.max_limit, DEFAULT_MAX_LIMIT);
    }

    #[test]
    fn test_rejects_overlapping_collections() {
        let json = r#"{ "finance_collections": ["sports"] }"#;
        assert!(matches!(
            EngineConfig::from_json_str(json),
            Err(QueryError::ValidationFailure(_))
        ));
    }

    #[test]
    fn test_rejects_zero_limit_and_empty_catalog() {
        assert!(EngineConfig::from_json_str(r#"{ "max_limit": 0 }"#).is_err());
        assert!(EngineConfig::from_json_str(r#"{ "finance_collections": [] }"#).is_err());
    }
}
