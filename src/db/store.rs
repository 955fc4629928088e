use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::db::models::attempt::{Attempt, AttemptDelta, OwnedAttempt};
use crate::db::models::user::{LeaderboardEntry, RankedMember, User, UserId, UserStats};
use crate::engine::league::League;

pub type StoreResult<T> = core::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("user '{0}' does not exist")]
    MissingUser(UserId),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// The single stats write the recorder issues per event: absolute streak
/// state plus in-place point increments, applied only while `last_activity`
/// still matches what the recorder read.
#[derive(Debug, Clone)]
pub struct StatsPatch {
    pub streak_current: i64,
    pub last_activity: NaiveDate,
    pub points_delta: i64,
    pub streak_protector: bool,
    /// First-activity league assignment; existing membership is never
    /// overwritten through this path.
    pub league: Option<League>,
}

impl StatsPatch {
    /// The stats as they will read back after this patch lands on `prior`.
    pub fn merged_into(&self, prior: &UserStats) -> UserStats {
        UserStats {
            points_weekly: prior.points_weekly + self.points_delta,
            points_total: prior.points_total + self.points_delta,
            streak_current: self.streak_current,
            last_activity: Some(self.last_activity),
            streak_protector: self.streak_protector,
            league: self.league.or(prior.league),
            promotion_pending: prior.promotion_pending,
        }
    }
}

/// Storage seam the engine is written against. Implementations must make
/// `upsert_attempt` an in-place accumulate and `apply_stats` a single
/// conditional update; the engine never read-modify-writes either record in
/// its own memory.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Accumulating upsert keyed by (user, lesson, task): adds the delta's
    /// score, stamps `completed_at`, and latches `completed` once true.
    /// Returns the row as stored after the event.
    async fn upsert_attempt(&self, delta: &AttemptDelta) -> StoreResult<Attempt>;

    async fn get_user(&self, id: &UserId) -> StoreResult<Option<User>>;

    /// Conditional stats write: applies `patch` only if the row's
    /// `last_activity` still equals `expected_last_activity`. Returns whether
    /// the write landed; `false` means the caller lost a same-user race and
    /// should re-read.
    async fn apply_stats(
        &self,
        id: &UserId,
        expected_last_activity: Option<NaiveDate>,
        patch: &StatsPatch,
    ) -> StoreResult<bool>;

    /// Clears `promotion_pending` whatever its current value. Returns whether
    /// a user row matched at all.
    async fn clear_promotion(&self, id: &UserId) -> StoreResult<bool>;

    /// Students of one league ordered by weekly points descending, earliest
    /// `created_at` first among ties, at most `limit` rows.
    async fn league_leaderboard(
        &self,
        league: League,
        limit: i64,
    ) -> StoreResult<Vec<LeaderboardEntry>>;

    async fn league_size(&self, league: League) -> StoreResult<i64>;

    /// One page of a league's ranked standings (same order as the
    /// leaderboard), for the season reset's bounded sweep.
    async fn ranked_league_page(
        &self,
        league: League,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<RankedMember>>;

    /// Reassigns a user's league; `flag_promotion` also raises
    /// `promotion_pending`.
    async fn move_league(
        &self,
        id: &UserId,
        league: League,
        flag_promotion: bool,
    ) -> StoreResult<()>;

    /// Zeroes `points_weekly` for every student in one statement, returning
    /// the number of rows touched.
    async fn reset_weekly_points(&self) -> StoreResult<u64>;

    /// All attempts of one user, oldest `completed_at` first.
    async fn attempts_for_user(&self, id: &UserId) -> StoreResult<Vec<Attempt>>;

    /// Every attempt joined with its owner, for the class overview.
    async fn attempts_with_owners(&self) -> StoreResult<Vec<OwnedAttempt>>;
}
