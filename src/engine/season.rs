use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::db::models::user::UserId;
use crate::db::store::ProgressStore;
use crate::engine::league::{League, Movement, PromotionPolicy};
use crate::engine::{EngineError, EngineResult};

/// Page size for the ranking sweep; keeps peak memory bounded by the page,
/// not the league.
const RANKING_PAGE: i64 = 200;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeasonSummary {
    pub users_updated: u64,
    pub promotions: u64,
    pub demotions: u64,
}

#[derive(Debug)]
struct LeagueMove {
    user: UserId,
    target: League,
    promoted: bool,
}

/// The periodic reset: re-evaluates league membership from the final
/// standings, then zeroes every student's weekly points.
///
/// Standings are snapshotted for all leagues before any write, so a
/// promotion out of Bronze cannot be re-ranked while Silver is still being
/// read. Members without weekly points never move, which makes an immediate
/// re-run a no-op for promotion.
pub struct SeasonReset<'a, S, P> {
    store: &'a S,
    policy: P,
}

impl<'a, S: ProgressStore, P: PromotionPolicy> SeasonReset<'a, S, P> {
    pub fn new(store: &'a S, policy: P) -> Self {
        Self { store, policy }
    }

    #[instrument(skip(self))]
    pub async fn run(&self) -> EngineResult<SeasonSummary> {
        let movements = self.collect_movements().await?;

        let mut promotions = 0u64;
        let mut demotions = 0u64;

        for (applied, movement) in movements.iter().enumerate() {
            if let Err(e) = self
                .store
                .move_league(&movement.user, movement.target, movement.promoted)
                .await
            {
                tracing::warn!(
                    applied,
                    total = movements.len(),
                    error = %e,
                    "partial season reset, rerun to converge"
                );
                return Err(EngineError::PartialReset {
                    processed: applied as u64,
                    cause: e.to_string(),
                });
            }

            if movement.promoted {
                promotions += 1;
            } else {
                demotions += 1;
            }
        }

        let users_updated = match self.store.reset_weekly_points().await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(
                    applied = movements.len(),
                    error = %e,
                    "partial season reset, weekly zeroing failed"
                );
                return Err(EngineError::PartialReset {
                    processed: movements.len() as u64,
                    cause: e.to_string(),
                });
            }
        };

        tracing::info!(users_updated, promotions, demotions, "season reset complete");

        Ok(SeasonSummary {
            users_updated,
            promotions,
            demotions,
        })
    }

    /// Read-only pass over every league's standings. Errors here mean
    /// nothing has been written yet, so they surface as plain storage
    /// failures rather than a partial reset.
    async fn collect_movements(&self) -> EngineResult<Vec<LeagueMove>> {
        let mut movements = Vec::new();

        for league in League::ALL {
            let size = self.store.league_size(league).await?;

            let mut offset = 0i64;
            while offset < size {
                let page = self
                    .store
                    .ranked_league_page(league, RANKING_PAGE, offset)
                    .await?;
                if page.is_empty() {
                    break;
                }

                for (index, member) in page.iter().enumerate() {
                    // idle members hold their tier
                    if member.points_weekly == 0 {
                        continue;
                    }

                    let rank = offset as usize + index + 1;
                    match self.policy.decide(rank, size as usize) {
                        Movement::Promote => {
                            if let Some(target) = league.promoted() {
                                movements.push(LeagueMove {
                                    user: member.id.clone(),
                                    target,
                                    promoted: true,
                                });
                            }
                        }
                        Movement::Demote => {
                            if let Some(target) = league.demoted() {
                                movements.push(LeagueMove {
                                    user: member.id.clone(),
                                    target,
                                    promoted: false,
                                });
                            }
                        }
                        Movement::Stay => {}
                    }
                }

                offset += RANKING_PAGE;
            }
        }

        Ok(movements)
    }
}
