//! Feature extraction for match scoring.
//!
//! Every feature is normalised to [0, 1] so model weights stay comparable.

use std::collections::{HashMap, HashSet};

use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::models::job::JobPostRow;
use crate::models::resume::ParsedResume;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "have", "in", "is",
    "it", "its", "of", "on", "or", "our", "that", "the", "their", "this", "to", "was", "we",
    "will", "with", "you", "your", "who", "what", "all", "can", "work", "working",
];

/// Names of the features, in the order the model artifact may reference them.
pub const FEATURE_NAMES: &[&str] = &[
    "skill_overlap",
    "keyword_similarity",
    "experience_fit",
    "title_match",
    "education_present",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchFeatures {
    pub skill_overlap: f64,
    pub keyword_similarity: f64,
    pub experience_fit: f64,
    pub title_match: f64,
    pub education_present: f64,
}

impl MatchFeatures {
    pub fn get(&self, name: &str) -> Option<f64> {
        match name {
            "skill_overlap" => Some(self.skill_overlap),
            "keyword_similarity" => Some(self.keyword_similarity),
            "experience_fit" => Some(self.experience_fit),
            "title_match" => Some(self.title_match),
            "education_present" => Some(self.education_present),
            _ => None,
        }
    }
}

/// What the scorer needs from a resume: the raw text plus parsed fields.
#[derive(Debug, Clone, Default)]
pub struct ResumeInput {
    pub text: String,
    pub parsed: ParsedResume,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureReport {
    pub features: MatchFeatures,
    pub matched_skills: Vec<String>,
    pub missing_skills: Vec<String>,
    pub years_experience: f64,
}

/// Lowercased word tokens. Keeps `+`, `#` and `.` inside tokens so "c++", "c#"
/// and "node.js" survive.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '+' || c == '#' || c == '.'))
        .map(|t| t.trim_matches('.'))
        .filter(|t| !t.is_empty())
        .filter(|t| t.chars().count() > 1 || t.chars().all(|c| c.is_alphabetic()))
        .filter(|t| !STOP_WORDS.contains(t))
        .map(String::from)
        .collect()
}

fn term_frequencies(tokens: &[String]) -> HashMap<&str, f64> {
    let mut tf = HashMap::new();
    for token in tokens {
        *tf.entry(token.as_str()).or_insert(0.0) += 1.0;
    }
    tf
}

/// Cosine similarity of two token bags. 0.0 when either side is empty.
pub fn cosine_similarity(a: &[String], b: &[String]) -> f64 {
    let tf_a = term_frequencies(a);
    let tf_b = term_frequencies(b);
    if tf_a.is_empty() || tf_b.is_empty() {
        return 0.0;
    }
    let dot: f64 = tf_a
        .iter()
        .filter_map(|(term, wa)| tf_b.get(term).map(|wb| wa * wb))
        .sum();
    let norm_a = tf_a.values().map(|w| w * w).sum::<f64>().sqrt();
    let norm_b = tf_b.values().map(|w| w * w).sum::<f64>().sqrt();
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

fn first_year(text: &str) -> Option<i32> {
    let digits: Vec<char> = text.chars().collect();
    digits
        .windows(4)
        .find(|w| w.iter().all(|c| c.is_ascii_digit()))
        .and_then(|w| w.iter().collect::<String>().parse().ok())
}

/// Years of experience: the parsed total if present, otherwise the sum of
/// position spans (open-ended positions run to the current year).
pub fn estimate_years(parsed: &ParsedResume) -> f64 {
    if let Some(total) = parsed.total_years_experience {
        return total.max(0.0);
    }
    let current_year = Utc::now().year();
    parsed
        .experience
        .iter()
        .filter_map(|item| {
            let start = item.start_date.as_deref().and_then(first_year)?;
            let end = item
                .end_date
                .as_deref()
                .and_then(first_year)
                .unwrap_or(current_year);
            Some((end - start).max(0) as f64)
        })
        .sum()
}

/// Computes all features for a (resume, job) pair.
pub fn extract_features(resume: &ResumeInput, job: &JobPostRow) -> FeatureReport {
    let resume_tokens = tokenize(&resume.text);
    let resume_token_set: HashSet<&str> = resume_tokens.iter().map(String::as_str).collect();
    let resume_skills: HashSet<String> = resume
        .parsed
        .skills
        .iter()
        .map(|s| s.trim().to_lowercase())
        .collect();

    // Skill overlap
    let mut matched_skills = Vec::new();
    let mut missing_skills = Vec::new();
    for skill in &job.required_skills {
        let skill_lower = skill.trim().to_lowercase();
        if skill_lower.is_empty() {
            continue;
        }
        let skill_tokens = tokenize(&skill_lower);
        let in_text = !skill_tokens.is_empty()
            && skill_tokens
                .iter()
                .all(|t| resume_token_set.contains(t.as_str()));
        if resume_skills.contains(&skill_lower) || in_text {
            matched_skills.push(skill.clone());
        } else {
            missing_skills.push(skill.clone());
        }
    }
    let total_skills = matched_skills.len() + missing_skills.len();
    let skill_overlap = if total_skills == 0 {
        // Nothing to compare against: neutral.
        0.5
    } else {
        matched_skills.len() as f64 / total_skills as f64
    };

    // Keyword similarity
    let job_tokens = tokenize(&format!("{} {} {}", job.title, job.description, job.requirements));
    let keyword_similarity = cosine_similarity(&resume_tokens, &job_tokens);

    // Experience fit
    let years_experience = estimate_years(&resume.parsed);
    let target = job.experience_level().target_years();
    let experience_fit = if target <= 0.0 {
        1.0
    } else {
        (years_experience / target).min(1.0)
    };

    // Title match
    let job_title_tokens: HashSet<String> = tokenize(&job.title).into_iter().collect();
    let title_match = resume.parsed.experience.iter().any(|item| {
        tokenize(&item.title)
            .iter()
            .any(|t| job_title_tokens.contains(t))
    });

    FeatureReport {
        features: MatchFeatures {
            skill_overlap,
            keyword_similarity,
            experience_fit,
            title_match: if title_match { 1.0 } else { 0.0 },
            education_present: if resume.parsed.education.is_empty() {
                0.0
            } else {
                1.0
            },
        },
        matched_skills,
        missing_skills,
        years_experience,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::resume::{EducationItem, ExperienceItem};
    use chrono::Utc;
    use uuid::Uuid;

    pub(crate) fn make_job(title: &str, level: &str, skills: &[&str]) -> JobPostRow {
        JobPostRow {
            id: Uuid::new_v4(),
            recruiter_id: Uuid::new_v4(),
            title: title.to_string(),
            company: "Acme".to_string(),
            description: "Build reliable backend services in Rust and PostgreSQL".to_string(),
            requirements: "Experience with distributed systems".to_string(),
            location: None,
            employment_type: "full_time".to_string(),
            experience_level: level.to_string(),
            salary_min: None,
            salary_max: None,
            remote: true,
            required_skills: skills.iter().map(|s| s.to_string()).collect(),
            status: "published".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    pub(crate) fn make_resume(skills: &[&str], years: Option<f64>) -> ResumeInput {
        ResumeInput {
            text: "Backend engineer building Rust services on PostgreSQL and distributed systems"
                .to_string(),
            parsed: ParsedResume {
                skills: skills.iter().map(|s| s.to_string()).collect(),
                experience: vec![ExperienceItem {
                    title: "Senior Backend Engineer".to_string(),
                    company: "Initech".to_string(),
                    start_date: Some("2019-01".to_string()),
                    end_date: Some("2023-06".to_string()),
                    description: None,
                }],
                education: vec![EducationItem {
                    institution: "State University".to_string(),
                    ..Default::default()
                }],
                total_years_experience: years,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_tokenize_keeps_language_names() {
        let tokens = tokenize("C++, C# and Node.js developer.");
        assert!(tokens.contains(&"c++".to_string()));
        assert!(tokens.contains(&"c#".to_string()));
        assert!(tokens.contains(&"node.js".to_string()));
        assert!(!tokens.contains(&"and".to_string()));
    }

    #[test]
    fn test_cosine_identical_is_one() {
        let a = tokenize("rust postgres redis");
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_disjoint_is_zero() {
        let a = tokenize("rust postgres");
        let b = tokenize("painting sculpture");
        assert_eq!(cosine_similarity(&a, &b), 0.0);
        assert_eq!(cosine_similarity(&a, &[]), 0.0);
    }

    #[test]
    fn test_skill_overlap_counts_parsed_and_text_skills() {
        // "Rust" listed; "PostgreSQL" only in text; "Kafka" absent.
        let report = extract_features(
            &make_resume(&["Rust"], Some(6.0)),
            &make_job("Backend Engineer", "senior", &["Rust", "PostgreSQL", "Kafka"]),
        );
        assert_eq!(report.matched_skills, vec!["Rust", "PostgreSQL"]);
        assert_eq!(report.missing_skills, vec!["Kafka"]);
        assert!((report.features.skill_overlap - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_required_skills_is_neutral() {
        let report = extract_features(&make_resume(&[], None), &make_job("Engineer", "mid", &[]));
        assert_eq!(report.features.skill_overlap, 0.5);
    }

    #[test]
    fn test_experience_fit_caps_at_one() {
        let report = extract_features(
            &make_resume(&[], Some(20.0)),
            &make_job("Engineer", "lead", &[]),
        );
        assert_eq!(report.features.experience_fit, 1.0);

        let junior = extract_features(
            &make_resume(&[], Some(2.5)),
            &make_job("Engineer", "senior", &[]),
        );
        assert!((junior.features.experience_fit - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_entry_level_always_fits() {
        let report = extract_features(
            &make_resume(&[], Some(0.0)),
            &make_job("Engineer", "entry", &[]),
        );
        assert_eq!(report.features.experience_fit, 1.0);
    }

    #[test]
    fn test_years_estimated_from_positions() {
        let resume = make_resume(&[], None);
        assert_eq!(estimate_years(&resume.parsed), 4.0);
    }

    #[test]
    fn test_title_and_education_flags() {
        let report = extract_features(
            &make_resume(&[], Some(3.0)),
            &make_job("Backend Developer", "mid", &[]),
        );
        assert_eq!(report.features.title_match, 1.0);
        assert_eq!(report.features.education_present, 1.0);

        let unrelated = extract_features(
            &make_resume(&[], Some(3.0)),
            &make_job("Graphic Designer", "mid", &[]),
        );
        assert_eq!(unrelated.features.title_match, 0.0);
    }

    #[test]
    fn test_every_feature_name_resolves() {
        let report = extract_features(&make_resume(&[], None), &make_job("Engineer", "mid", &[]));
        for name in FEATURE_NAMES {
            let value = report.features.get(name).unwrap();
            assert!((0.0..=1.0).contains(&value), "{name} = {value}");
        }
        assert!(report.features.get("bogus").is_none());
    }
}
