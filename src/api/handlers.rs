use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{LoadMoreResponse, RecommendationResult};

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct RecommendationsQuery {
    /// Absent for guests
    pub reader_id: Option<Uuid>,
    pub target_count: Option<usize>,
    /// Comma-separated work ids already shown to the client
    pub exclude: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoadMoreQuery {
    pub reader_id: Option<Uuid>,
    pub exclude: Option<String>,
    #[serde(default)]
    pub offset: usize,
}

/// Health check endpoint
pub async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}

/// GET /api/v1/recommendations
pub async fn get_recommendations(
    State(state): State<AppState>,
    Query(query): Query<RecommendationsQuery>,
) -> AppResult<Json<RecommendationResult>> {
    let exclude = parse_exclude(query.exclude.as_deref())?;
    let target_count = query.target_count.unwrap_or(9);

    let result = state
        .recommendations
        .get_recommendations(query.reader_id, &exclude, target_count)
        .await?;

    Ok(Json(result))
}

/// GET /api/v1/recommendations/more
pub async fn get_more_recommendations(
    State(state): State<AppState>,
    Query(query): Query<LoadMoreQuery>,
) -> AppResult<Json<LoadMoreResponse>> {
    let exclude = parse_exclude(query.exclude.as_deref())?;

    let result = state
        .recommendations
        .get_more_recommendations(query.reader_id, &exclude, query.offset)
        .await?;

    Ok(Json(result))
}

fn parse_exclude(raw: Option<&str>) -> AppResult<Vec<Uuid>> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };

    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            Uuid::parse_str(s)
                .map_err(|_| AppError::InvalidInput(format!("invalid work id in exclude: {}", s)))
        })
        .collect()
}
