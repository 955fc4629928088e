use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::user::UserId;

/// One row per (user, lesson, task). Repeated events for the same key
/// accumulate `score` in place; `completed` only ever flips false to true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Attempt {
    pub user_id: UserId,
    pub lesson_name: String,
    pub task_name: String,
    pub score: i64,
    pub completed: bool,
    pub completed_at: NaiveDateTime,
}

/// The per-event increment applied to an attempt row.
#[derive(Debug, Clone)]
pub struct AttemptDelta {
    pub user: UserId,
    pub lesson_name: String,
    pub task_name: String,
    pub score: i64,
    pub completed: bool,
    pub at: NaiveDateTime,
}

/// Attempt joined with its owning user, for the class overview.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OwnedAttempt {
    pub user_name: String,
    pub user_email: String,
    #[sqlx(flatten)]
    pub attempt: Attempt,
}
