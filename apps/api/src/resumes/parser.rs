//! Resume text extraction and LLM-based field extraction.

use bytes::Bytes;
use tracing::debug;

use crate::errors::AppError;
use crate::llm_client::{LlmClient, LlmError};
use crate::models::resume::ParsedResume;
use crate::resumes::prompts::{resume_parse_system, RESUME_PARSE_PROMPT};

/// Upper bound on characters sent to the LLM. Resumes past this are truncated.
pub const MAX_PROMPT_CHARS: usize = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    PlainText,
}

impl DocumentKind {
    /// Detects the document kind from the declared content type, falling back
    /// to the file extension. Returns `None` for unsupported formats.
    pub fn detect(content_type: Option<&str>, file_name: &str) -> Option<Self> {
        let content_type = content_type
            .map(|ct| ct.split(';').next().unwrap_or_default().trim().to_lowercase());
        match content_type.as_deref() {
            Some("application/pdf") => return Some(DocumentKind::Pdf),
            Some("text/plain") | Some("text/markdown") => return Some(DocumentKind::PlainText),
            _ => {}
        }

        let extension = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "pdf" => Some(DocumentKind::Pdf),
            "txt" | "md" => Some(DocumentKind::PlainText),
            _ => None,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "application/pdf",
            DocumentKind::PlainText => "text/plain",
        }
    }
}

/// Extracts raw text from an uploaded document.
///
/// PDF extraction runs on the blocking pool; a malformed PDF that makes the
/// extractor panic surfaces as a validation error instead of killing the task.
pub async fn extract_text(kind: DocumentKind, body: Bytes) -> Result<String, AppError> {
    match kind {
        DocumentKind::PlainText => Ok(String::from_utf8_lossy(&body).into_owned()),
        DocumentKind::Pdf => {
            let result =
                tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&body))
                    .await;
            match result {
                Ok(Ok(text)) => Ok(text),
                Ok(Err(e)) => Err(AppError::Validation(format!("Could not read PDF: {e}"))),
                Err(_) => Err(AppError::Validation(
                    "Could not read PDF: the document is malformed".to_string(),
                )),
            }
        }
    }
}

/// Collapses whitespace, strips control characters and caps the length.
pub fn normalize_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len().min(MAX_PROMPT_CHARS));
    let mut count = 0;
    for line in raw.lines() {
        let line: String = line
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .chars()
            .filter(|c| !c.is_control())
            .collect();
        if line.is_empty() {
            continue;
        }
        for c in line.chars().chain(std::iter::once('\n')) {
            if count == MAX_PROMPT_CHARS {
                return out.trim_end().to_string();
            }
            out.push(c);
            count += 1;
        }
    }
    out.trim_end().to_string()
}

/// Sends normalized resume text to the LLM and returns the structured fields.
pub async fn parse_resume_text(llm: &LlmClient, text: &str) -> Result<ParsedResume, LlmError> {
    let prompt = RESUME_PARSE_PROMPT.replace("{resume_text}", text);
    let mut parsed: ParsedResume = llm.call_json(&prompt, &resume_parse_system()).await?;
    dedup_skills(&mut parsed.skills);
    debug!(
        "Parsed resume: {} skills, {} positions",
        parsed.skills.len(),
        parsed.experience.len()
    );
    Ok(parsed)
}

/// Case-insensitive dedup that keeps the first spelling seen.
fn dedup_skills(skills: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    skills.retain(|s| {
        let key = s.trim().to_lowercase();
        !key.is_empty() && seen.insert(key)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_by_content_type() {
        assert_eq!(
            DocumentKind::detect(Some("application/pdf"), "upload"),
            Some(DocumentKind::Pdf)
        );
        assert_eq!(
            DocumentKind::detect(Some("text/plain; charset=utf-8"), "upload"),
            Some(DocumentKind::PlainText)
        );
    }

    #[test]
    fn test_detect_falls_back_to_extension() {
        assert_eq!(
            DocumentKind::detect(Some("application/octet-stream"), "CV.PDF"),
            Some(DocumentKind::Pdf)
        );
        assert_eq!(DocumentKind::detect(None, "notes.txt"), Some(DocumentKind::PlainText));
    }

    #[test]
    fn test_detect_rejects_unsupported() {
        assert_eq!(DocumentKind::detect(Some("image/png"), "photo.png"), None);
        assert_eq!(DocumentKind::detect(None, "resume"), None);
    }

    #[tokio::test]
    async fn test_extract_plain_text() {
        let text = extract_text(DocumentKind::PlainText, Bytes::from_static(b"Jane Doe\nRust"))
            .await
            .unwrap();
        assert_eq!(text, "Jane Doe\nRust");
    }

    #[tokio::test]
    async fn test_extract_garbage_pdf_is_validation_error() {
        let err = extract_text(DocumentKind::Pdf, Bytes::from_static(b"not a pdf at all"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_normalize_collapses_whitespace_and_blank_lines() {
        let raw = "  Jane    Doe \n\n\n\tSenior   Engineer\u{0}\n";
        assert_eq!(normalize_text(raw), "Jane Doe\nSenior Engineer");
    }

    #[test]
    fn test_normalize_caps_length() {
        let raw = "x".repeat(MAX_PROMPT_CHARS * 2);
        assert_eq!(normalize_text(&raw).chars().count(), MAX_PROMPT_CHARS);
    }

    #[test]
    fn test_normalize_empty() {
        assert_eq!(normalize_text(" \n \t "), "");
    }

    #[test]
    fn test_dedup_skills_case_insensitive() {
        let mut skills = vec![
            "Rust".to_string(),
            "rust".to_string(),
            " ".to_string(),
            "SQL".to_string(),
        ];
        dedup_skills(&mut skills);
        assert_eq!(skills, vec!["Rust", "SQL"]);
    }
}
