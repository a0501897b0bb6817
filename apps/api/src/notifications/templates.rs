//! Notification templates keyed by (notification type, channel).

use std::collections::HashMap;

use sqlx::PgPool;
use tracing::debug;

use crate::models::notification::{Channel, NotificationTemplateRow, NotificationType};

/// A template ready for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub subject: String,
    pub body: String,
}

impl Template {
    pub fn render(&self, vars: &HashMap<String, String>) -> RenderedMessage {
        RenderedMessage {
            subject: interpolate(&self.subject, vars),
            body: interpolate(&self.body, vars),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedMessage {
    pub subject: String,
    pub body: String,
}

/// Built-in templates. Seeded into `notification_templates` at startup and
/// used directly when the table has no active row for a key.
pub const DEFAULT_TEMPLATES: &[(NotificationType, Channel, &str, &str)] = &[
    (
        NotificationType::ApplicationReceived,
        Channel::InApp,
        "New application for {job_title}",
        "{applicant_name} applied to {job_title}.",
    ),
    (
        NotificationType::ApplicationReceived,
        Channel::Email,
        "New application for {job_title}",
        "Hello,\n\n{applicant_name} has applied to your job post \"{job_title}\". \
         Sign in to HireWise to review the application.",
    ),
    (
        NotificationType::ApplicationStatusChanged,
        Channel::InApp,
        "Application update: {job_title}",
        "Your application for {job_title} at {company} is now: {status}.",
    ),
    (
        NotificationType::ApplicationStatusChanged,
        Channel::Email,
        "Your application for {job_title} was updated",
        "Hello {recipient_name},\n\nYour application for {job_title} at {company} \
         has moved to: {status}.",
    ),
    (
        NotificationType::ResumeParsed,
        Channel::InApp,
        "Resume processed",
        "Your resume \"{resume_title}\" was analysed. We found {skill_count} skills.",
    ),
    (
        NotificationType::ResumeParseFailed,
        Channel::InApp,
        "Resume processing failed",
        "We could not process \"{resume_title}\": {reason}",
    ),
    (
        NotificationType::MatchScoreReady,
        Channel::InApp,
        "Match score ready",
        "Your match score for {job_title} is {score}/100.",
    ),
    (
        NotificationType::JobRecommendation,
        Channel::InApp,
        "New job recommendation",
        "{job_title} at {company} looks like a good fit ({score}/100).",
    ),
    (
        NotificationType::System,
        Channel::InApp,
        "{title}",
        "{message}",
    ),
];

pub fn default_template(kind: NotificationType, channel: Channel) -> Option<Template> {
    DEFAULT_TEMPLATES
        .iter()
        .find(|(k, c, _, _)| *k == kind && *c == channel)
        .map(|(_, _, subject, body)| Template {
            subject: subject.to_string(),
            body: body.to_string(),
        })
}

/// Replaces `{name}` placeholders with values from `vars`.
/// Unknown placeholders are left as-is; `{{` and `}}` produce literal braces.
pub fn interpolate(template: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find(['{', '}']) {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];

        if tail.starts_with("{{") {
            out.push('{');
            rest = &tail[2..];
            continue;
        }
        if tail.starts_with("}}") {
            out.push('}');
            rest = &tail[2..];
            continue;
        }
        if tail.starts_with('}') {
            out.push('}');
            rest = &tail[1..];
            continue;
        }

        match tail[1..].find('}') {
            Some(close) => {
                let name = &tail[1..close + 1];
                let valid_name = !name.is_empty()
                    && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
                match vars.get(name) {
                    Some(value) if valid_name => out.push_str(value),
                    _ => {
                        if valid_name {
                            debug!("Template variable '{name}' not provided");
                        }
                        out.push_str(&tail[..close + 2]);
                    }
                }
                rest = &tail[close + 2..];
            }
            None => {
                out.push_str(tail);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Looks up the active template for a key, falling back to the built-in one.
pub async fn resolve_template(
    pool: &PgPool,
    kind: NotificationType,
    channel: Channel,
) -> Result<Option<Template>, sqlx::Error> {
    let row = sqlx::query_as::<_, NotificationTemplateRow>(
        "SELECT * FROM notification_templates \
         WHERE notification_type = $1 AND channel = $2 AND is_active = TRUE",
    )
    .bind(kind.as_str())
    .bind(channel.as_str())
    .fetch_optional(pool)
    .await?;

    Ok(match row {
        Some(row) => Some(Template {
            subject: row.subject_template,
            body: row.body_template,
        }),
        None => default_template(kind, channel),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_interpolates_known_variables() {
        let out = interpolate(
            "{applicant_name} applied to {job_title}.",
            &vars(&[("applicant_name", "Ada"), ("job_title", "Rust Engineer")]),
        );
        assert_eq!(out, "Ada applied to Rust Engineer.");
    }

    #[test]
    fn test_missing_variable_left_in_place() {
        let out = interpolate("Score: {score}/100", &vars(&[]));
        assert_eq!(out, "Score: {score}/100");
    }

    #[test]
    fn test_escaped_braces() {
        let out = interpolate("{{literal}} and {x}", &vars(&[("x", "y")]));
        assert_eq!(out, "{literal} and y");
    }

    #[test]
    fn test_unbalanced_braces_are_preserved() {
        assert_eq!(interpolate("open { only", &vars(&[])), "open { only");
        assert_eq!(interpolate("close } only", &vars(&[])), "close } only");
        assert_eq!(interpolate("{not valid}", &vars(&[("not valid", "x")])), "{not valid}");
    }

    #[test]
    fn test_values_are_not_reinterpolated() {
        let out = interpolate("{a}", &vars(&[("a", "{b}"), ("b", "nope")]));
        assert_eq!(out, "{b}");
    }

    #[test]
    fn test_every_type_has_in_app_default() {
        for kind in NotificationType::ALL {
            assert!(
                default_template(*kind, Channel::InApp).is_some(),
                "missing in_app template for {kind}"
            );
        }
    }

    #[test]
    fn test_default_keys_are_unique() {
        let mut keys: Vec<_> = DEFAULT_TEMPLATES.iter().map(|(k, c, _, _)| (*k, *c)).collect();
        let before = keys.len();
        keys.sort_by_key(|(k, c)| (k.as_str(), c.as_str()));
        keys.dedup();
        assert_eq!(keys.len(), before);
    }

    #[test]
    fn test_template_render() {
        let template = default_template(NotificationType::MatchScoreReady, Channel::InApp).unwrap();
        let rendered = template.render(&vars(&[("job_title", "SRE"), ("score", "88.5")]));
        assert_eq!(rendered.subject, "Match score ready");
        assert_eq!(rendered.body, "Your match score for SRE is 88.5/100.");
    }
}
