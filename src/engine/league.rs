use core::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hard cap on leaderboard queries regardless of the requested limit.
pub const LEADERBOARD_CAP: i64 = 30;

/// League tiers in ascending order. Variant order is the tier order, so the
/// derived `Ord` ranks Bronze lowest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum League {
    Bronze,
    Silver,
    Gold,
    Diamond,
}

impl League {
    pub const ALL: [League; 4] = [League::Bronze, League::Silver, League::Gold, League::Diamond];

    /// Tier students enter on their first recorded activity.
    pub const ENTRY: League = League::Bronze;

    /// The next tier up, or `None` from the top of the ladder.
    pub fn promoted(self) -> Option<League> {
        match self {
            League::Bronze => Some(League::Silver),
            League::Silver => Some(League::Gold),
            League::Gold => Some(League::Diamond),
            League::Diamond => None,
        }
    }

    /// The next tier down, or `None` from the bottom of the ladder.
    pub fn demoted(self) -> Option<League> {
        match self {
            League::Bronze => None,
            League::Silver => Some(League::Bronze),
            League::Gold => Some(League::Silver),
            League::Diamond => Some(League::Gold),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            League::Bronze => "bronze",
            League::Silver => "silver",
            League::Gold => "gold",
            League::Diamond => "diamond",
        }
    }
}

impl fmt::Display for League {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown league '{0}'")]
pub struct UnknownLeague(pub String);

impl FromStr for League {
    type Err = UnknownLeague;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bronze" => Ok(League::Bronze),
            "silver" => Ok(League::Silver),
            "gold" => Ok(League::Gold),
            "diamond" => Ok(League::Diamond),
            other => Err(UnknownLeague(other.to_string())),
        }
    }
}

// Leagues persist as plain text columns, so encode/decode as `&str` rather
// than requiring a Postgres enum type.
impl sqlx::Type<sqlx::Postgres> for League {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <&str as sqlx::Type<sqlx::Postgres>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for League {
    fn decode(
        value: sqlx::postgres::PgValueRef<'r>,
    ) -> Result<Self, sqlx::error::BoxDynError> {
        let raw = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(raw.parse()?)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for League {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <&str as sqlx::Encode<'q, sqlx::Postgres>>::encode_by_ref(&self.as_str(), buf)
    }
}

/// Verdict for one ranked member at season reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Movement {
    Promote,
    Demote,
    Stay,
}

/// Decides league movement from a 1-based rank within a league of
/// `league_size` members. Injected into the season reset so cutoffs stay a
/// deployment choice rather than engine logic.
pub trait PromotionPolicy {
    fn decide(&self, rank: usize, league_size: usize) -> Movement;
}

impl<F> PromotionPolicy for F
where
    F: Fn(usize, usize) -> Movement,
{
    fn decide(&self, rank: usize, league_size: usize) -> Movement {
        self(rank, league_size)
    }
}

/// Fixed promotion/demotion bands: the top `promote_top` ranks move up, the
/// bottom `demote_bottom` move down. When a league is smaller than both bands
/// combined, promotion wins.
#[derive(Debug, Clone, Copy)]
pub struct BandPolicy {
    pub promote_top: usize,
    pub demote_bottom: usize,
}

impl Default for BandPolicy {
    fn default() -> Self {
        Self {
            promote_top: 5,
            demote_bottom: 5,
        }
    }
}

impl PromotionPolicy for BandPolicy {
    fn decide(&self, rank: usize, league_size: usize) -> Movement {
        if rank == 0 || rank > league_size {
            return Movement::Stay;
        }

        if rank <= self.promote_top {
            Movement::Promote
        } else if rank + self.demote_bottom > league_size {
            Movement::Demote
        } else {
            Movement::Stay
        }
    }
}
