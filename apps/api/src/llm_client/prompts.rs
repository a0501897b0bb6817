// Shared prompt fragments. Each service that needs LLM calls defines its own
// prompts.rs alongside it; this file holds the cross-cutting pieces.

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You are a precise, structured assistant. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Instruction appended to extraction prompts to keep the model from guessing.
pub const NO_INVENTION_INSTRUCTION: &str = "\
    Only extract information that is explicitly present in the document. \
    Use null for any field that is not stated. Do NOT infer or invent details.";
