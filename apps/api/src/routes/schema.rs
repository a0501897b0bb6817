//! OpenAPI 3 description of the HTTP surface, served at `/api/schema`.

use axum::Json;
use serde_json::{json, Map, Value};

/// One documented operation.
pub struct RouteDoc {
    pub method: &'static str,
    /// Axum-style path, e.g. `/api/v1/jobs/:id`.
    pub path: &'static str,
    pub tag: &'static str,
    pub summary: &'static str,
    pub authenticated: bool,
}

const fn route(
    method: &'static str,
    path: &'static str,
    tag: &'static str,
    summary: &'static str,
    authenticated: bool,
) -> RouteDoc {
    RouteDoc {
        method,
        path,
        tag,
        summary,
        authenticated,
    }
}

pub const ROUTES: &[RouteDoc] = &[
    route("get", "/health", "health", "Service status and version", false),
    route("get", "/health/live", "health", "Liveness check", false),
    route("get", "/health/ready", "health", "Readiness of Postgres, Redis and the match model, with queue depth and socket counts", false),
    route("get", "/api/schema", "meta", "This document", false),
    route("post", "/api/v1/auth/register", "auth", "Register a job seeker or recruiter", false),
    route("post", "/api/v1/auth/login", "auth", "Exchange credentials for a bearer token", false),
    route("get", "/api/v1/auth/me", "auth", "Current user", true),
    route("get", "/api/v1/profile", "profiles", "Caller's role-specific profile", true),
    route("put", "/api/v1/profile", "profiles", "Update the caller's profile", true),
    route("get", "/api/v1/skills", "skills", "Skill catalog, optionally filtered by category", true),
    route("post", "/api/v1/skills", "skills", "Add a catalog skill (admin or recruiter)", true),
    route("get", "/api/v1/me/skills", "skills", "Caller's skills", true),
    route("put", "/api/v1/me/skills", "skills", "Add or update one of the caller's skills", true),
    route("delete", "/api/v1/me/skills/:skill_id", "skills", "Remove one of the caller's skills", true),
    route("get", "/api/v1/jobs", "jobs", "Search published jobs", true),
    route("post", "/api/v1/jobs", "jobs", "Create a job post (recruiter)", true),
    route("get", "/api/v1/jobs/mine", "jobs", "Recruiter's own job posts", true),
    route("get", "/api/v1/jobs/:id", "jobs", "Job post detail", true),
    route("put", "/api/v1/jobs/:id", "jobs", "Update a job post (owner)", true),
    route("delete", "/api/v1/jobs/:id", "jobs", "Delete a job post (owner)", true),
    route("get", "/api/v1/applications", "applications", "Applications visible to the caller", true),
    route("post", "/api/v1/applications", "applications", "Apply to a job (job seeker)", true),
    route("get", "/api/v1/applications/:id", "applications", "Application detail", true),
    route("patch", "/api/v1/applications/:id/status", "applications", "Move an application through the hiring pipeline (job owner)", true),
    route("post", "/api/v1/applications/:id/withdraw", "applications", "Withdraw an application (applicant)", true),
    route("get", "/api/v1/resumes", "resumes", "Caller's resumes", true),
    route("post", "/api/v1/resumes", "resumes", "Upload a PDF or text resume (multipart)", true),
    route("get", "/api/v1/resumes/:id", "resumes", "Resume detail", true),
    route("delete", "/api/v1/resumes/:id", "resumes", "Delete a resume and its file", true),
    route("post", "/api/v1/resumes/:id/reparse", "resumes", "Queue the resume for parsing again", true),
    route("post", "/api/v1/resumes/:id/primary", "resumes", "Make the resume the caller's primary", true),
    route("post", "/api/v1/matching/score", "matching", "Score a resume against a job", true),
    route("get", "/api/v1/matching/recommendations", "matching", "Ranked job recommendations for a resume", true),
    route("get", "/api/v1/matching/model", "matching", "Active scorer version", true),
    route("post", "/api/v1/matching/model/reload", "matching", "Reload the match model artifact (admin)", true),
    route("get", "/api/v1/notifications", "notifications", "Caller's notifications", true),
    route("get", "/api/v1/notifications/unread-count", "notifications", "Unread notification count", true),
    route("post", "/api/v1/notifications/read-all", "notifications", "Mark every notification read", true),
    route("delete", "/api/v1/notifications/:id", "notifications", "Delete a notification", true),
    route("post", "/api/v1/notifications/:id/read", "notifications", "Mark a notification read", true),
    route("get", "/ws/notifications", "notifications", "WebSocket push channel; pass the token as ?token=", false),
];

/// Converts `/jobs/:id` into `/jobs/{id}` and collects the parameter names.
fn openapi_path(path: &str) -> (String, Vec<&str>) {
    let mut params = Vec::new();
    let segments: Vec<String> = path
        .split('/')
        .map(|segment| match segment.strip_prefix(':') {
            Some(name) => {
                params.push(name);
                format!("{{{name}}}")
            }
            None => segment.to_string(),
        })
        .collect();
    (segments.join("/"), params)
}

fn operation(doc: &RouteDoc, params: &[&str]) -> Value {
    let mut op = json!({
        "tags": [doc.tag],
        "summary": doc.summary,
        "responses": {
            "default": { "$ref": "#/components/responses/Error" }
        },
    });
    if !params.is_empty() {
        op["parameters"] = params
            .iter()
            .map(|name| {
                json!({
                    "name": name,
                    "in": "path",
                    "required": true,
                    "schema": { "type": "string", "format": "uuid" },
                })
            })
            .collect();
    }
    if doc.authenticated {
        op["security"] = json!([{ "bearerAuth": [] }]);
    }
    op
}

pub fn openapi_document() -> Value {
    let mut paths = Map::new();
    for doc in ROUTES {
        let (path, params) = openapi_path(doc.path);
        let entry = paths.entry(path).or_insert_with(|| json!({}));
        entry[doc.method] = operation(doc, &params);
    }

    json!({
        "openapi": "3.0.3",
        "info": {
            "title": "HireWise API",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "paths": paths,
        "components": {
            "securitySchemes": {
                "bearerAuth": { "type": "http", "scheme": "bearer", "bearerFormat": "JWT" }
            },
            "responses": {
                "Error": {
                    "description": "Error envelope",
                    "content": {
                        "application/json": {
                            "schema": {
                                "type": "object",
                                "properties": {
                                    "error": {
                                        "type": "object",
                                        "properties": {
                                            "code": { "type": "string" },
                                            "message": { "type": "string" },
                                            "timestamp": { "type": "string", "format": "date-time" }
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    })
}

/// GET /api/schema
pub async fn schema_handler() -> Json<Value> {
    Json(openapi_document())
}
