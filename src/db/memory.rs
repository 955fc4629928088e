//! In-memory [`ProgressStore`] backing the engine test suite. Mirrors the
//! Postgres implementation's semantics: accumulate-upsert on attempts, CAS on
//! `last_activity`, leaderboard ordering with `created_at` tie-break.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::db::models::attempt::{Attempt, AttemptDelta, OwnedAttempt};
use crate::db::models::user::{LeaderboardEntry, RankedMember, User, UserId};
use crate::db::store::{ProgressStore, StatsPatch, StoreError, StoreResult};
use crate::engine::league::League;

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    reject_stats_writes: AtomicBool,
    // <0 disabled; otherwise remaining league/weekly writes before an
    // injected failure
    fail_writes_after: AtomicI64,
}

#[derive(Default)]
struct Inner {
    users: BTreeMap<String, User>,
    attempts: BTreeMap<(String, String, String), Attempt>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            fail_writes_after: AtomicI64::new(-1),
            ..Self::default()
        }
    }

    pub fn insert_user(&self, user: User) {
        self.inner
            .lock()
            .unwrap()
            .users
            .insert(user.id.0.clone(), user);
    }

    pub fn user(&self, id: &str) -> Option<User> {
        self.inner.lock().unwrap().users.get(id).cloned()
    }

    pub fn attempt_count(&self) -> usize {
        self.inner.lock().unwrap().attempts.len()
    }

    /// Makes every subsequent `apply_stats` report a lost CAS race.
    pub fn force_stats_conflicts(&self) {
        self.reject_stats_writes.store(true, Ordering::SeqCst);
    }

    /// Lets `n` more league/weekly writes through, then fails them.
    pub fn fail_writes_after(&self, n: i64) {
        self.fail_writes_after.store(n, Ordering::SeqCst);
    }

    fn consume_write_budget(&self) -> StoreResult<()> {
        let remaining = self.fail_writes_after.load(Ordering::SeqCst);
        if remaining < 0 {
            return Ok(());
        }
        if remaining == 0 {
            return Err(StoreError::Unavailable("injected write failure".into()));
        }
        self.fail_writes_after.store(remaining - 1, Ordering::SeqCst);
        Ok(())
    }

    fn ranked_students(inner: &Inner, league: League) -> Vec<User> {
        let mut members: Vec<User> = inner
            .users
            .values()
            .filter(|u| u.role == crate::db::models::user::Role::Student)
            .filter(|u| u.stats.league == Some(league))
            .cloned()
            .collect();

        members.sort_by(|a, b| {
            b.stats
                .points_weekly
                .cmp(&a.stats.points_weekly)
                .then(a.created_at.cmp(&b.created_at))
        });

        members
    }
}

#[async_trait]
impl ProgressStore for MemoryStore {
    async fn upsert_attempt(&self, delta: &AttemptDelta) -> StoreResult<Attempt> {
        let mut inner = self.inner.lock().unwrap();
        let key = (
            delta.user.0.clone(),
            delta.lesson_name.clone(),
            delta.task_name.clone(),
        );

        let attempt = inner
            .attempts
            .entry(key)
            .and_modify(|existing| {
                existing.score += delta.score;
                existing.completed |= delta.completed;
                existing.completed_at = delta.at;
            })
            .or_insert_with(|| Attempt {
                user_id: delta.user.clone(),
                lesson_name: delta.lesson_name.clone(),
                task_name: delta.task_name.clone(),
                score: delta.score,
                completed: delta.completed,
                completed_at: delta.at,
            });

        Ok(attempt.clone())
    }

    async fn get_user(&self, id: &UserId) -> StoreResult<Option<User>> {
        Ok(self.inner.lock().unwrap().users.get(&id.0).cloned())
    }

    async fn apply_stats(
        &self,
        id: &UserId,
        expected_last_activity: Option<NaiveDate>,
        patch: &StatsPatch,
    ) -> StoreResult<bool> {
        if self.reject_stats_writes.load(Ordering::SeqCst) {
            return Ok(false);
        }

        let mut inner = self.inner.lock().unwrap();
        let Some(user) = inner.users.get_mut(&id.0) else {
            return Ok(false);
        };

        if user.stats.last_activity != expected_last_activity {
            return Ok(false);
        }

        user.stats = patch.merged_into(&user.stats);
        Ok(true)
    }

    async fn clear_promotion(&self, id: &UserId) -> StoreResult<bool> {
        let mut inner = self.inner.lock().unwrap();
        match inner.users.get_mut(&id.0) {
            Some(user) => {
                user.stats.promotion_pending = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn league_leaderboard(
        &self,
        league: League,
        limit: i64,
    ) -> StoreResult<Vec<LeaderboardEntry>> {
        let inner = self.inner.lock().unwrap();
        Ok(Self::ranked_students(&inner, league)
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|u| LeaderboardEntry {
                name: u.name,
                stats: u.stats,
            })
            .collect())
    }

    async fn league_size(&self, league: League) -> StoreResult<i64> {
        let inner = self.inner.lock().unwrap();
        Ok(Self::ranked_students(&inner, league).len() as i64)
    }

    async fn ranked_league_page(
        &self,
        league: League,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<RankedMember>> {
        let inner = self.inner.lock().unwrap();
        Ok(Self::ranked_students(&inner, league)
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .map(|u| RankedMember {
                id: u.id,
                points_weekly: u.stats.points_weekly,
            })
            .collect())
    }

    async fn move_league(
        &self,
        id: &UserId,
        league: League,
        flag_promotion: bool,
    ) -> StoreResult<()> {
        self.consume_write_budget()?;

        let mut inner = self.inner.lock().unwrap();
        if let Some(user) = inner.users.get_mut(&id.0) {
            user.stats.league = Some(league);
            if flag_promotion {
                user.stats.promotion_pending = true;
            }
        }

        Ok(())
    }

    async fn reset_weekly_points(&self) -> StoreResult<u64> {
        self.consume_write_budget()?;

        let mut inner = self.inner.lock().unwrap();
        let mut touched = 0u64;
        for user in inner.users.values_mut() {
            if user.role == crate::db::models::user::Role::Student {
                user.stats.points_weekly = 0;
                touched += 1;
            }
        }

        Ok(touched)
    }

    async fn attempts_for_user(&self, id: &UserId) -> StoreResult<Vec<Attempt>> {
        let inner = self.inner.lock().unwrap();
        let mut attempts: Vec<Attempt> = inner
            .attempts
            .values()
            .filter(|a| a.user_id == *id)
            .cloned()
            .collect();

        attempts.sort_by(|a, b| a.completed_at.cmp(&b.completed_at));
        Ok(attempts)
    }

    async fn attempts_with_owners(&self) -> StoreResult<Vec<OwnedAttempt>> {
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<OwnedAttempt> = inner
            .attempts
            .values()
            .filter_map(|attempt| {
                inner.users.get(&attempt.user_id.0).map(|owner| OwnedAttempt {
                    user_name: owner.name.clone(),
                    user_email: owner.email.clone(),
                    attempt: attempt.clone(),
                })
            })
            .collect();

        rows.sort_by(|a, b| {
            a.user_name
                .cmp(&b.user_name)
                .then(a.attempt.completed_at.cmp(&b.attempt.completed_at))
        });

        Ok(rows)
    }
}

pub mod fixture {
    use chrono::{Days, NaiveDate};

    use crate::db::models::user::{Role, User, UserId, UserStats};

    /// Deterministic creation times so leaderboard tie-breaks are stable:
    /// lower `seq` registered earlier.
    pub fn user(id: &str, name: &str, role: Role, seq: u64) -> User {
        let base = NaiveDate::from_ymd_opt(2023, 9, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        let created_at = base
            .checked_add_days(Days::new(seq))
            .unwrap_or(base);

        User {
            id: UserId::from(id),
            name: name.to_string(),
            email: format!("{id}@aula.test"),
            role,
            stats: UserStats::default(),
            created_at,
            updated_at: created_at,
        }
    }

    pub fn student(id: &str, name: &str, seq: u64) -> User {
        user(id, name, Role::Student, seq)
    }

    pub fn teacher(id: &str, name: &str, seq: u64) -> User {
        user(id, name, Role::Teacher, seq)
    }
}
