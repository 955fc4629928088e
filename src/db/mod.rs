use std::sync::LazyLock;
use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::util::env::{self, Var};
use crate::var;

pub mod models;
pub mod pg;
pub mod store;

#[cfg(test)]
pub mod memory;

pub mod prelude {
    pub use crate::db::db_pool;
    pub use crate::db::models::attempt::{Attempt, AttemptDelta, OwnedAttempt};
    pub use crate::db::models::user::{
        LeaderboardEntry, RankedMember, Role, User, UserId, UserStats,
    };
    pub use crate::db::pg::PgStore;
    pub use crate::db::store::{ProgressStore, StatsPatch, StoreError, StoreResult};
}

static DB_POOL: LazyLock<OnceCell<Db>> = LazyLock::new(OnceCell::new);
pub async fn db_pool() -> PgResult<&'static PgPool> {
    Ok(&DB_POOL
        .get_or_try_init(|| async { Db::new_pool().await })
        .await?
        .pool)
}

struct Db {
    pool: PgPool,
}

impl Db {
    pub async fn new_pool() -> PgResult<Self> {
        let db_url = var!(Var::DatabaseUrl).await?;
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(5))
            .connect(db_url)
            .await?;

        pg::PgStore::ensure_schema(&pool).await?;

        Ok(Self { pool })
    }
}

pub type PgResult<T> = core::result::Result<T, PgError>;

#[derive(Debug, Error)]
pub enum PgError {
    #[error(transparent)]
    SqlxError(#[from] sqlx::Error),

    #[error("{0}")]
    EnvError(#[from] env::EnvErr),
}
