use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::db::models::attempt::{Attempt, AttemptDelta};
use crate::db::models::user::{LeaderboardEntry, Role, User, UserId, UserStats};
use crate::db::store::{ProgressStore, StatsPatch};
use crate::engine::league::{LEADERBOARD_CAP, League};
use crate::engine::streak::advance_streak;
use crate::engine::{EngineError, EngineResult};

/// How often the stats CAS is retried before the write is given up on.
/// Losing the race means another event for the same user landed in between;
/// re-reading and recomputing is part of the update protocol, not a retry of
/// a failed call.
const STATS_CAS_ATTEMPTS: usize = 3;

/// One task-completion event as received from the transport layer, already
/// reduced to engine terms.
#[derive(Debug, Clone)]
pub struct CompletionEvent {
    pub user: UserId,
    pub lesson_name: String,
    pub task_name: String,
    pub score: i64,
    pub completed: bool,
}

/// Result of recording one completion: the accumulated attempt row, the
/// streak after the event ("racha" to the client), and the merged stats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedCompletion {
    pub attempt: Attempt,
    pub racha: i64,
    pub stats: UserStats,
}

/// Attempts of one user grouped for the class overview.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentOverview {
    pub name: String,
    pub email: String,
    pub tasks: Vec<Attempt>,
}

/// Orchestrates the per-event pipeline over an injected [`ProgressStore`].
pub struct ProgressRecorder<'a, S> {
    store: &'a S,
}

impl<'a, S: ProgressStore> ProgressRecorder<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Records one completion event: validates, accumulates the attempt row,
    /// advances the streak, applies the score to both point counters, and
    /// persists the stats through a conditional update.
    ///
    /// Not idempotent under duplicate delivery: a resubmitted identical event
    /// accumulates again. Accepted at-least-once semantics.
    #[instrument(skip(self, event, now), fields(user = event.user.0, lesson = event.lesson_name, task = event.task_name))]
    pub async fn record_completion(
        &self,
        event: CompletionEvent,
        now: NaiveDateTime,
    ) -> EngineResult<RecordedCompletion> {
        if event.user.0.trim().is_empty() {
            return Err(EngineError::InvalidInput("user"));
        }
        if event.lesson_name.trim().is_empty() {
            return Err(EngineError::InvalidInput("lessonName"));
        }
        if event.task_name.trim().is_empty() {
            return Err(EngineError::InvalidInput("taskName"));
        }

        // partial client payloads send no score or garbage; treat as zero
        let score = event.score.max(0);

        // existence check up front so an unknown user causes no writes at all
        let mut user = self
            .store
            .get_user(&event.user)
            .await?
            .ok_or_else(|| EngineError::NotFound(event.user.clone()))?;

        let attempt = self
            .store
            .upsert_attempt(&AttemptDelta {
                user: event.user.clone(),
                lesson_name: event.lesson_name.clone(),
                task_name: event.task_name.clone(),
                score,
                completed: event.completed,
                at: now,
            })
            .await?;

        for _ in 0..STATS_CAS_ATTEMPTS {
            let today = now.date();
            let outcome = advance_streak(
                user.stats.streak_current,
                user.stats.last_activity,
                user.stats.streak_protector,
                today,
            );

            let patch = StatsPatch {
                streak_current: outcome.streak,
                last_activity: today,
                points_delta: score,
                streak_protector: user.stats.streak_protector && !outcome.consumed_protector,
                league: first_league(&user),
            };

            if self
                .store
                .apply_stats(&user.id, user.stats.last_activity, &patch)
                .await?
            {
                let stats = patch.merged_into(&user.stats);
                return Ok(RecordedCompletion {
                    attempt,
                    racha: outcome.streak,
                    stats,
                });
            }

            tracing::debug!(user = %user.id, "lost stats race, re-reading");
            user = self
                .store
                .get_user(&event.user)
                .await?
                .ok_or_else(|| EngineError::NotFound(event.user.clone()))?;
        }

        Err(EngineError::StorageUnavailable(format!(
            "stats update for '{}' kept losing the conditional write",
            event.user
        )))
    }

    /// Clears the promotion notification flag. Idempotent over the flag;
    /// a missing user is still `NotFound`.
    #[instrument(skip(self))]
    pub async fn acknowledge_promotion(&self, id: &UserId) -> EngineResult<()> {
        if self.store.clear_promotion(id).await? {
            Ok(())
        } else {
            Err(EngineError::NotFound(id.clone()))
        }
    }

    /// Ranked students of one league, never more than [`LEADERBOARD_CAP`]
    /// entries.
    #[instrument(skip(self))]
    pub async fn leaderboard(
        &self,
        league: League,
        limit: i64,
    ) -> EngineResult<Vec<LeaderboardEntry>> {
        let limit = limit.clamp(1, LEADERBOARD_CAP);
        Ok(self.store.league_leaderboard(league, limit).await?)
    }

    /// Full attempt history for one user, oldest first. An unknown user has
    /// an empty history rather than an error, matching the read-only intent.
    #[instrument(skip(self))]
    pub async fn history(&self, id: &UserId) -> EngineResult<Vec<Attempt>> {
        Ok(self.store.attempts_for_user(id).await?)
    }

    /// Every student's attempts grouped by owner, for the teacher-facing
    /// overview.
    #[instrument(skip(self))]
    pub async fn class_overview(&self) -> EngineResult<Vec<StudentOverview>> {
        let rows = self.store.attempts_with_owners().await?;

        let mut grouped: BTreeMap<String, StudentOverview> = BTreeMap::new();
        for row in rows {
            grouped
                .entry(row.attempt.user_id.0.clone())
                .or_insert_with(|| StudentOverview {
                    name: row.user_name.clone(),
                    email: row.user_email.clone(),
                    tasks: Vec::new(),
                })
                .tasks
                .push(row.attempt);
        }

        Ok(grouped.into_values().collect())
    }
}

/// Students enter the ladder on their first recorded activity; league
/// membership is never rewritten on this path afterwards.
fn first_league(user: &User) -> Option<League> {
    (user.role == Role::Student && user.stats.league.is_none()).then_some(League::ENTRY)
}
