// Skill catalog and per-user skills.

pub mod handlers;
