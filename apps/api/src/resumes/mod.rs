// Resume upload and parsing.
// Files live in object storage; parsing runs as a background task and all
// LLM calls go through llm_client.

pub mod handlers;
pub mod parser;
pub mod prompts;
pub mod service;
pub mod storage;
