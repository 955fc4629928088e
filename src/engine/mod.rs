use thiserror::Error;

use crate::db::models::user::UserId;
use crate::db::store::StoreError;

pub mod league;
pub mod recorder;
pub mod season;
pub mod streak;


pub type EngineResult<T> = core::result::Result<T, EngineError>;

/// Engine failure taxonomy. Everything surfaces to the transport layer as a
/// typed result; the engine itself never retries a failed storage call.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("missing or empty field '{0}'")]
    InvalidInput(&'static str),

    #[error("user '{0}' not found")]
    NotFound(UserId),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Season reset applied a strict subset of its writes before failing.
    /// Safe to re-run; the next pass converges.
    #[error("season reset interrupted after {processed} writes: {cause}")]
    PartialReset { processed: u64, cause: String },
}

impl From<StoreError> for EngineError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::MissingUser(id) => EngineError::NotFound(id),
            StoreError::Unavailable(cause) => EngineError::StorageUnavailable(cause),
        }
    }
}
