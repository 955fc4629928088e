use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::api::server::{AppState, JsonResult};
use crate::db::models::attempt::Attempt;
use crate::db::models::user::{LeaderboardEntry, UserId};
use crate::engine::EngineError;
use crate::engine::league::{BandPolicy, LEADERBOARD_CAP, League};
use crate::engine::recorder::{
    CompletionEvent, ProgressRecorder, RecordedCompletion, StudentOverview,
};
use crate::engine::season::{SeasonReset, SeasonSummary};

/// Progress submission body. Every field defaults so that validation happens
/// in the engine with a typed rejection instead of a deserializer error;
/// clients routinely omit `score` on non-scored tasks.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRequest {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub lesson_name: String,
    #[serde(default)]
    pub task_name: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    #[serde(default = "default_leaderboard_limit")]
    pub limit: i64,
}

#[inline]
const fn default_leaderboard_limit() -> i64 {
    LEADERBOARD_CAP
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPromotionRequest {
    #[serde(default)]
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct ConfirmPromotionResponse {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub progress: Vec<Attempt>,
}

#[instrument(skip(state, req), fields(user = req.user, lesson = req.lesson_name, task = req.task_name))]
pub async fn record_progress(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ProgressRequest>,
) -> JsonResult<RecordedCompletion> {
    let recorder = ProgressRecorder::new(&state.store);
    let outcome = recorder
        .record_completion(
            CompletionEvent {
                user: UserId(req.user),
                lesson_name: req.lesson_name,
                task_name: req.task_name,
                score: req.score,
                completed: req.completed,
            },
            Utc::now().naive_utc(),
        )
        .await?;

    Ok(Json(outcome))
}

#[instrument(skip(state))]
pub async fn league_leaderboard(
    State(state): State<Arc<AppState>>,
    Path(league): Path<String>,
    Query(query): Query<LeaderboardQuery>,
) -> JsonResult<Vec<LeaderboardEntry>> {
    let league: League = league.parse()?;

    let recorder = ProgressRecorder::new(&state.store);
    let entries = recorder.leaderboard(league, query.limit).await?;

    Ok(Json(entries))
}

#[instrument(skip(state, req), fields(user = req.user_id))]
pub async fn confirm_promotion(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ConfirmPromotionRequest>,
) -> JsonResult<ConfirmPromotionResponse> {
    if req.user_id.trim().is_empty() {
        return Err(EngineError::InvalidInput("userId").into());
    }

    let recorder = ProgressRecorder::new(&state.store);
    recorder
        .acknowledge_promotion(&UserId(req.user_id))
        .await?;

    Ok(Json(ConfirmPromotionResponse { ok: true }))
}

#[instrument(skip(state))]
pub async fn user_history(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> JsonResult<HistoryResponse> {
    let recorder = ProgressRecorder::new(&state.store);
    let progress = recorder.history(&UserId(user_id)).await?;

    Ok(Json(HistoryResponse { progress }))
}

#[instrument(skip(state))]
pub async fn students_overview(
    State(state): State<Arc<AppState>>,
) -> JsonResult<Vec<StudentOverview>> {
    let recorder = ProgressRecorder::new(&state.store);
    let overview = recorder.class_overview().await?;

    Ok(Json(overview))
}

#[instrument(skip(state))]
pub async fn run_season_reset(State(state): State<Arc<AppState>>) -> JsonResult<SeasonSummary> {
    let reset = SeasonReset::new(&state.store, BandPolicy::default());
    let summary = reset.run().await?;

    Ok(Json(summary))
}
