use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{PgPool, Postgres};
use tracing::instrument;

use crate::db::models::attempt::{Attempt, AttemptDelta, OwnedAttempt};
use crate::db::models::user::{LeaderboardEntry, RankedMember, User, UserId};
use crate::db::store::{ProgressStore, StatsPatch, StoreError, StoreResult};
use crate::engine::league::League;

/// Every storage call carries this deadline; expiry surfaces as
/// `StoreError::Unavailable` and the caller decides whether to retry.
const STORAGE_DEADLINE: Duration = Duration::from_secs(5);

const USER_FIELDS: &str = r#"
    id,
    name,
    email,
    role,
    points_weekly,
    points_total,
    streak_current,
    last_activity,
    streak_protector,
    league,
    promotion_pending,
    created_at,
    updated_at
"#;

const ATTEMPT_FIELDS: &str = r#"
    user_id,
    lesson_name,
    task_name,
    score,
    completed,
    completed_at
"#;

mod schema {
    pub const LEARNER: &str = r#"
        CREATE TABLE IF NOT EXISTS learner (
            id                 TEXT PRIMARY KEY,
            name               TEXT NOT NULL,
            email              TEXT NOT NULL UNIQUE,
            role               TEXT NOT NULL,
            points_weekly      BIGINT NOT NULL DEFAULT 0,
            points_total       BIGINT NOT NULL DEFAULT 0,
            streak_current     BIGINT NOT NULL DEFAULT 0,
            last_activity      DATE,
            streak_protector   BOOLEAN NOT NULL DEFAULT FALSE,
            league             TEXT,
            promotion_pending  BOOLEAN NOT NULL DEFAULT FALSE,
            created_at         TIMESTAMP NOT NULL DEFAULT NOW(),
            updated_at         TIMESTAMP NOT NULL DEFAULT NOW()
        )"#;

    pub const ATTEMPT: &str = r#"
        CREATE TABLE IF NOT EXISTS attempt (
            user_id       TEXT NOT NULL REFERENCES learner (id),
            lesson_name   TEXT NOT NULL,
            task_name     TEXT NOT NULL,
            score         BIGINT NOT NULL DEFAULT 0,
            completed     BOOLEAN NOT NULL DEFAULT FALSE,
            completed_at  TIMESTAMP NOT NULL,
            created_at    TIMESTAMP NOT NULL DEFAULT NOW(),
            PRIMARY KEY (user_id, lesson_name, task_name)
        )"#;

    pub const LEAGUE_INDEX: &str = r#"
        CREATE INDEX IF NOT EXISTS learner_league_ranking
        ON learner (league, points_weekly DESC, created_at ASC)
        WHERE role = 'student'"#;
}

#[derive(Debug, Clone, Copy)]
pub struct PgStore {
    pool: &'static PgPool,
}

impl PgStore {
    pub fn new(pool: &'static PgPool) -> Self {
        Self { pool }
    }

    #[instrument(skip(pool))]
    pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::query(schema::LEARNER).execute(pool).await?;
        sqlx::query(schema::ATTEMPT).execute(pool).await?;
        sqlx::query(schema::LEAGUE_INDEX).execute(pool).await?;

        Ok(())
    }
}

fn unavailable(e: sqlx::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

/// Bounds one storage future by [`STORAGE_DEADLINE`].
async fn bounded<T, F>(fut: F) -> StoreResult<T>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(STORAGE_DEADLINE, fut).await {
        Ok(result) => result.map_err(unavailable),
        Err(_) => Err(StoreError::Unavailable(
            "storage call exceeded deadline".into(),
        )),
    }
}

#[async_trait]
impl ProgressStore for PgStore {
    #[instrument(skip(self, delta), fields(user = delta.user.0, lesson = delta.lesson_name, task = delta.task_name))]
    async fn upsert_attempt(&self, delta: &AttemptDelta) -> StoreResult<Attempt> {
        bounded(
            sqlx::query_as::<Postgres, Attempt>(&format!(
                r#"
                INSERT INTO attempt (
                    user_id,
                    lesson_name,
                    task_name,
                    score,
                    completed,
                    completed_at
                )
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (user_id, lesson_name, task_name)
                DO UPDATE SET
                    score = attempt.score + EXCLUDED.score,
                    completed = attempt.completed OR EXCLUDED.completed,
                    completed_at = EXCLUDED.completed_at
                RETURNING {ATTEMPT_FIELDS}
                "#
            ))
            .bind(&delta.user)
            .bind(&delta.lesson_name)
            .bind(&delta.task_name)
            .bind(delta.score)
            .bind(delta.completed)
            .bind(delta.at)
            .fetch_one(self.pool),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn get_user(&self, id: &UserId) -> StoreResult<Option<User>> {
        bounded(
            sqlx::query_as::<Postgres, User>(&format!(
                "SELECT {USER_FIELDS} FROM learner WHERE id = $1"
            ))
            .bind(id)
            .fetch_optional(self.pool),
        )
        .await
    }

    #[instrument(skip(self, patch), fields(user = id.0))]
    async fn apply_stats(
        &self,
        id: &UserId,
        expected_last_activity: Option<NaiveDate>,
        patch: &StatsPatch,
    ) -> StoreResult<bool> {
        let result = bounded(
            sqlx::query(
                r#"
                UPDATE learner
                SET streak_current = $2,
                    last_activity = $3,
                    points_weekly = points_weekly + $4,
                    points_total = points_total + $4,
                    streak_protector = $5,
                    league = COALESCE($6, league),
                    updated_at = NOW()
                WHERE id = $1
                AND last_activity IS NOT DISTINCT FROM $7
                "#,
            )
            .bind(id)
            .bind(patch.streak_current)
            .bind(patch.last_activity)
            .bind(patch.points_delta)
            .bind(patch.streak_protector)
            .bind(patch.league)
            .bind(expected_last_activity)
            .execute(self.pool),
        )
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn clear_promotion(&self, id: &UserId) -> StoreResult<bool> {
        let result = bounded(
            sqlx::query(
                r#"
                UPDATE learner
                SET promotion_pending = FALSE,
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(id)
            .execute(self.pool),
        )
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn league_leaderboard(
        &self,
        league: League,
        limit: i64,
    ) -> StoreResult<Vec<LeaderboardEntry>> {
        bounded(
            sqlx::query_as::<Postgres, LeaderboardEntry>(
                r#"
                SELECT
                    name,
                    points_weekly,
                    points_total,
                    streak_current,
                    last_activity,
                    streak_protector,
                    league,
                    promotion_pending
                FROM learner
                WHERE league = $1
                AND role = 'student'
                ORDER BY points_weekly DESC, created_at ASC
                LIMIT $2
                "#,
            )
            .bind(league)
            .bind(limit)
            .fetch_all(self.pool),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn league_size(&self, league: League) -> StoreResult<i64> {
        bounded(
            sqlx::query_scalar::<Postgres, i64>(
                "SELECT COUNT(*) FROM learner WHERE league = $1 AND role = 'student'",
            )
            .bind(league)
            .fetch_one(self.pool),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn ranked_league_page(
        &self,
        league: League,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<RankedMember>> {
        bounded(
            sqlx::query_as::<Postgres, RankedMember>(
                r#"
                SELECT id, points_weekly
                FROM learner
                WHERE league = $1
                AND role = 'student'
                ORDER BY points_weekly DESC, created_at ASC
                LIMIT $2 OFFSET $3
                "#,
            )
            .bind(league)
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn move_league(
        &self,
        id: &UserId,
        league: League,
        flag_promotion: bool,
    ) -> StoreResult<()> {
        bounded(
            sqlx::query(
                r#"
                UPDATE learner
                SET league = $2,
                    promotion_pending = (promotion_pending OR $3),
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(league)
            .bind(flag_promotion)
            .execute(self.pool),
        )
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn reset_weekly_points(&self) -> StoreResult<u64> {
        let result = bounded(
            sqlx::query(
                r#"
                UPDATE learner
                SET points_weekly = 0,
                    updated_at = NOW()
                WHERE role = 'student'
                "#,
            )
            .execute(self.pool),
        )
        .await?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn attempts_for_user(&self, id: &UserId) -> StoreResult<Vec<Attempt>> {
        bounded(
            sqlx::query_as::<Postgres, Attempt>(&format!(
                r#"
                SELECT {ATTEMPT_FIELDS} FROM attempt
                WHERE user_id = $1
                ORDER BY completed_at ASC
                "#
            ))
            .bind(id)
            .fetch_all(self.pool),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn attempts_with_owners(&self) -> StoreResult<Vec<OwnedAttempt>> {
        bounded(
            sqlx::query_as::<Postgres, OwnedAttempt>(
                r#"
                SELECT
                    l.name AS user_name,
                    l.email AS user_email,
                    a.user_id,
                    a.lesson_name,
                    a.task_name,
                    a.score,
                    a.completed,
                    a.completed_at
                FROM attempt a
                JOIN learner l ON a.user_id = l.id
                ORDER BY l.name ASC, a.completed_at ASC
                "#,
            )
            .fetch_all(self.pool),
        )
        .await
    }
}
