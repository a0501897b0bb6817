//! Match scorers: trait-based backends that turn features into a score.
//!
//! `ModelMatchScorer` applies the on-disk artifact. `HeuristicMatchScorer` is the
//! fallback when no artifact is available. `MatchEngine` owns whichever is
//! active and can reload the artifact at runtime.

use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::matching::features::{extract_features, FeatureReport, MatchFeatures, ResumeInput};
use crate::matching::model::{round2, MatchModel, ModelError};
use crate::models::job::JobPostRow;

/// Full match result returned to callers and cached in `ai_analysis_results`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub score: f64, // 0 – 100
    pub features: MatchFeatures,
    pub matched_skills: Vec<String>,
    pub missing_skills: Vec<String>,
    pub model_version: String,
    pub recommendation: String,
}

/// Implement this to swap scoring backends without touching handlers or tasks.
#[async_trait]
pub trait MatchScorer: Send + Sync {
    async fn score(&self, resume: &ResumeInput, job: &JobPostRow) -> MatchResult;

    fn version(&self) -> String;
}

pub struct ModelMatchScorer(pub MatchModel);

#[async_trait]
impl MatchScorer for ModelMatchScorer {
    async fn score(&self, resume: &ResumeInput, job: &JobPostRow) -> MatchResult {
        let report = extract_features(resume, job);
        let score = self.0.predict(&report.features);
        build_result(score, report, self.version())
    }

    fn version(&self) -> String {
        format!("model:{}", self.0.version)
    }
}

/// Weighted average of features. Used when no model artifact is loaded.
pub struct HeuristicMatchScorer;

const HEURISTIC_WEIGHTS: [(&str, f64); 5] = [
    ("skill_overlap", 0.40),
    ("keyword_similarity", 0.25),
    ("experience_fit", 0.20),
    ("title_match", 0.10),
    ("education_present", 0.05),
];

pub fn heuristic_score(features: &MatchFeatures) -> f64 {
    let total: f64 = HEURISTIC_WEIGHTS
        .iter()
        .filter_map(|(name, w)| features.get(name).map(|x| w * x))
        .sum();
    round2((total * 100.0).clamp(0.0, 100.0))
}

#[async_trait]
impl MatchScorer for HeuristicMatchScorer {
    async fn score(&self, resume: &ResumeInput, job: &JobPostRow) -> MatchResult {
        let report = extract_features(resume, job);
        let score = heuristic_score(&report.features);
        build_result(score, report, self.version())
    }

    fn version(&self) -> String {
        "heuristic:v1".to_string()
    }
}

fn build_result(score: f64, report: FeatureReport, model_version: String) -> MatchResult {
    let recommendation = build_recommendation(score, &report.missing_skills);
    MatchResult {
        score,
        features: report.features,
        matched_skills: report.matched_skills,
        missing_skills: report.missing_skills,
        model_version,
        recommendation,
    }
}

/// Builds a human-readable recommendation string from score and missing skills.
fn build_recommendation(score: f64, missing: &[String]) -> String {
    let top_gaps: Vec<&str> = missing.iter().take(3).map(String::as_str).collect();

    if score >= 75.0 {
        "Strong match. The resume covers the key requirements of this role.".to_string()
    } else if score >= 50.0 {
        if top_gaps.is_empty() {
            format!("Moderate match ({score:.0}/100).")
        } else {
            format!(
                "Moderate match ({score:.0}/100). Consider highlighting: {}.",
                top_gaps.join(", ")
            )
        }
    } else if top_gaps.is_empty() {
        format!("Low match ({score:.0}/100).")
    } else {
        format!(
            "Low match ({score:.0}/100). Missing skills: {}.",
            top_gaps.join(", ")
        )
    }
}

/// Holds the active scorer and the artifact path it was loaded from.
pub struct MatchEngine {
    model_path: PathBuf,
    active: RwLock<Arc<dyn MatchScorer>>,
    model_loaded: RwLock<bool>,
}

impl MatchEngine {
    /// Loads the artifact if present, otherwise starts on the heuristic scorer.
    pub fn load(model_path: impl Into<PathBuf>) -> Self {
        let engine = Self {
            model_path: model_path.into(),
            active: RwLock::new(Arc::new(HeuristicMatchScorer)),
            model_loaded: RwLock::new(false),
        };
        if let Err(e) = engine.reload() {
            warn!("Match model unavailable, using heuristic scorer: {e}");
        }
        engine
    }

    /// Re-reads the artifact. On failure the previously active scorer stays.
    pub fn reload(&self) -> Result<String, ModelError> {
        let model = MatchModel::load(&self.model_path)?;
        let scorer = ModelMatchScorer(model);
        let version = scorer.version();

        // Both values are replaced whole, so a poisoned lock holds nothing torn.
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(scorer);
        *self.model_loaded.write().unwrap_or_else(PoisonError::into_inner) = true;
        info!("Match model loaded: {version}");
        Ok(version)
    }

    pub fn scorer(&self) -> Arc<dyn MatchScorer> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_model_loaded(&self) -> bool {
        *self.model_loaded.read().unwrap_or_else(PoisonError::into_inner)
    }
}
