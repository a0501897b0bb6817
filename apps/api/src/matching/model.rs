//! Match model artifact.
//!
//! The artifact is a JSON logistic model exported by the training pipeline:
//!
//! ```json
//! { "version": "2024-05-01", "bias": -2.1,
//!   "weights": { "skill_overlap": 3.2, "keyword_similarity": 2.4 } }
//! ```
//!
//! Weights may name any subset of `FEATURE_NAMES`; unknown names are rejected
//! so a stale artifact fails loudly at startup.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::matching::features::{MatchFeatures, FEATURE_NAMES};

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to read model artifact {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid model artifact: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("model artifact references unknown feature '{0}'")]
    UnknownFeature(String),

    #[error("model artifact weight for '{0}' is not finite")]
    NonFiniteWeight(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchModel {
    pub version: String,
    pub bias: f64,
    pub weights: HashMap<String, f64>,
}

impl MatchModel {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ModelError> {
        let model: MatchModel = serde_json::from_str(raw)?;
        model.validate()?;
        Ok(model)
    }

    fn validate(&self) -> Result<(), ModelError> {
        if !self.bias.is_finite() {
            return Err(ModelError::NonFiniteWeight("bias".to_string()));
        }
        for (name, weight) in &self.weights {
            if !FEATURE_NAMES.contains(&name.as_str()) {
                return Err(ModelError::UnknownFeature(name.clone()));
            }
            if !weight.is_finite() {
                return Err(ModelError::NonFiniteWeight(name.clone()));
            }
        }
        Ok(())
    }

    /// Score in [0, 100], rounded to two decimals.
    pub fn predict(&self, features: &MatchFeatures) -> f64 {
        let logit = self.bias
            + self
                .weights
                .iter()
                .filter_map(|(name, w)| features.get(name).map(|x| w * x))
                .sum::<f64>();
        round2((sigmoid(logit) * 100.0).clamp(0.0, 100.0))
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn features(value: f64) -> MatchFeatures {
        MatchFeatures {
            skill_overlap: value,
            keyword_similarity: value,
            experience_fit: value,
            title_match: value,
            education_present: value,
        }
    }

    #[test]
    fn test_zero_logit_scores_fifty() {
        let model = MatchModel::from_json(r#"{"version": "t", "bias": 0.0, "weights": {}}"#).unwrap();
        assert_eq!(model.predict(&features(1.0)), 50.0);
    }

    #[test]
    fn test_better_features_score_higher() {
        let model = MatchModel::from_json(
            r#"{"version": "t", "bias": -2.0, "weights": {"skill_overlap": 3.0, "keyword_similarity": 2.0}}"#,
        )
        .unwrap();
        let low = model.predict(&features(0.1));
        let high = model.predict(&features(0.9));
        assert!(high > low, "{high} <= {low}");
        assert!((0.0..=100.0).contains(&low));
        assert!((0.0..=100.0).contains(&high));
    }

    #[test]
    fn test_unknown_feature_rejected() {
        let err = MatchModel::from_json(
            r#"{"version": "t", "bias": 0.0, "weights": {"zodiac_sign": 1.0}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::UnknownFeature(name) if name == "zodiac_sign"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"version": "2024-05", "bias": -1.0, "weights": {{"experience_fit": 2.0}}}}"#
        )
        .unwrap();
        let model = MatchModel::load(file.path()).unwrap();
        assert_eq!(model.version, "2024-05");
        // sigmoid(1.0) = 0.7311 → 73.11
        assert_eq!(model.predict(&features(1.0)), 73.11);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = MatchModel::load("/definitely/not/here/model.json").unwrap_err();
        assert!(matches!(err, ModelError::Io { .. }));
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(12.3456), 12.35);
    }
}
