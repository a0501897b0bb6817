use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::notification::NotificationRow;
use crate::notifications::service;
use crate::pagination::{Page, PageParams};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub unread_only: bool,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl ListParams {
    fn page_params(&self) -> PageParams {
        PageParams {
            page: self.page,
            per_page: self.per_page,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UnreadCount {
    pub unread_count: i64,
}

#[derive(Debug, Serialize)]
pub struct MarkedAll {
    pub updated: u64,
}

/// GET /api/v1/notifications
pub async fn handle_list(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<ListParams>,
) -> Result<Json<Page<NotificationRow>>, AppError> {
    let page = params.page_params();
    let (items, total) = service::list(&state.db, user.id, params.unread_only, page).await?;
    Ok(Json(Page::new(items, total, page)))
}

/// GET /api/v1/notifications/unread-count
pub async fn handle_unread_count(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<UnreadCount>, AppError> {
    let unread_count = service::unread_count(&state.db, user.id).await?;
    Ok(Json(UnreadCount { unread_count }))
}

/// POST /api/v1/notifications/:id/read
pub async fn handle_mark_read(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<NotificationRow>, AppError> {
    Ok(Json(service::mark_read(&state.db, user.id, id).await?))
}

/// POST /api/v1/notifications/read-all
pub async fn handle_mark_all_read(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<MarkedAll>, AppError> {
    let updated = service::mark_all_read(&state.db, user.id).await?;
    Ok(Json(MarkedAll { updated }))
}

/// DELETE /api/v1/notifications/:id
pub async fn handle_delete(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    service::delete(&state.db, user.id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
