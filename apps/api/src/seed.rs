//! Reference data inserted at startup. Safe to run on every boot.

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::notifications::templates::DEFAULT_TEMPLATES;

/// Default skill catalog as (name, category).
pub const DEFAULT_SKILLS: &[(&str, &str)] = &[
    ("Rust", "programming"),
    ("Python", "programming"),
    ("JavaScript", "programming"),
    ("TypeScript", "programming"),
    ("Go", "programming"),
    ("Java", "programming"),
    ("C++", "programming"),
    ("SQL", "data"),
    ("PostgreSQL", "data"),
    ("Redis", "data"),
    ("Machine Learning", "data"),
    ("Data Analysis", "data"),
    ("React", "frontend"),
    ("Vue", "frontend"),
    ("CSS", "frontend"),
    ("Node.js", "backend"),
    ("Django", "backend"),
    ("GraphQL", "backend"),
    ("REST APIs", "backend"),
    ("Docker", "devops"),
    ("Kubernetes", "devops"),
    ("AWS", "cloud"),
    ("GCP", "cloud"),
    ("Azure", "cloud"),
    ("Terraform", "devops"),
    ("CI/CD", "devops"),
    ("Git", "tools"),
    ("Linux", "tools"),
    ("Project Management", "management"),
    ("Agile", "management"),
    ("Communication", "soft_skills"),
    ("Leadership", "soft_skills"),
];

pub async fn seed_reference_data(pool: &PgPool) -> Result<()> {
    let skills = seed_skills(pool).await?;
    let templates = seed_templates(pool).await?;
    info!("Seeded {skills} skill(s) and {templates} notification template(s)");
    Ok(())
}

async fn seed_skills(pool: &PgPool) -> Result<u64> {
    let mut inserted = 0;
    for &(name, category) in DEFAULT_SKILLS {
        inserted += sqlx::query(
            "INSERT INTO skills (id, name, category) VALUES ($1, $2, $3) ON CONFLICT (name) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(category)
        .execute(pool)
        .await
        .with_context(|| format!("Failed to seed skill '{name}'"))?
        .rows_affected();
    }
    Ok(inserted)
}

async fn seed_templates(pool: &PgPool) -> Result<u64> {
    let mut inserted = 0;
    for &(kind, channel, subject, body) in DEFAULT_TEMPLATES {
        inserted += sqlx::query(
            r#"
            INSERT INTO notification_templates
                (id, notification_type, channel, subject_template, body_template)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (notification_type, channel) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(kind.as_str())
        .bind(channel.as_str())
        .bind(subject)
        .bind(body)
        .execute(pool)
        .await
        .with_context(|| format!("Failed to seed template {kind}/{channel}"))?
        .rows_affected();
    }
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_default_skill_names_are_unique() {
        let names: HashSet<_> = DEFAULT_SKILLS
            .iter()
            .map(|(name, _)| name.to_lowercase())
            .collect();
        assert_eq!(names.len(), DEFAULT_SKILLS.len());
    }

    #[test]
    fn test_default_skill_categories_are_lowercase() {
        assert!(DEFAULT_SKILLS
            .iter()
            .all(|(_, category)| *category == category.to_lowercase()));
    }
}
