use crate::llm_client::prompts::{JSON_ONLY_SYSTEM, NO_INVENTION_INSTRUCTION};

pub fn resume_parse_system() -> String {
    format!(
        "{JSON_ONLY_SYSTEM} You are an expert technical recruiter who extracts \
         structured data from resumes. {NO_INVENTION_INSTRUCTION}"
    )
}

pub const RESUME_PARSE_PROMPT: &str = r#"Extract the following fields from the resume below and return a single JSON object with exactly this shape:

{
  "full_name": string | null,
  "email": string | null,
  "phone": string | null,
  "summary": string | null,
  "skills": [string],
  "experience": [
    {"title": string, "company": string, "start_date": "YYYY-MM" | null, "end_date": "YYYY-MM" | null, "description": string | null}
  ],
  "education": [
    {"institution": string, "degree": string | null, "field": string | null, "graduation_year": integer | null}
  ],
  "total_years_experience": number | null
}

Rules:
- "skills" lists individual technologies, tools and competencies, deduplicated.
- Use null for "end_date" when the position is current.
- Order experience from most recent to oldest.

RESUME:
---
{resume_text}
---"#;
