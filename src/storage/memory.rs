//! In-memory backend for tests and `--dry-run` runs. Tracks how many
//! mutation calls were made so gating behavior is observable.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::model::UserIdentity;
use crate::normalization::rows::{
    EquipmentRow, GameRow, ItemPurchaseRow, KilledByRow, MasteryRow, PlayerStatsRow,
    PurchaseChannel, SkillOrderRow,
};
use crate::storage::{ChildRows, MatchStore};

type ChildKey = (DateTime<Utc>, i64, i64);

#[derive(Default)]
struct Inner {
    games: HashMap<i64, GameRow>,
    stats: HashMap<(i64, i64), PlayerStatsRow>,
    mastery: HashMap<(ChildKey, i32), MasteryRow>,
    equipment: HashMap<(ChildKey, i32), EquipmentRow>,
    skills: HashMap<(ChildKey, i32), SkillOrderRow>,
    killed_by: HashMap<(ChildKey, i64), KilledByRow>,
    purchases: HashMap<(ChildKey, i64, PurchaseChannel), ItemPurchaseRow>,
    users: HashMap<i64, UserIdentity>,
    mutation_calls: u64,
}

/// Table row counts at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreCounts {
    pub games: usize,
    pub stats: usize,
    pub mastery: usize,
    pub equipment: usize,
    pub skills: usize,
    pub killed_by: usize,
    pub purchases: usize,
    pub users: usize,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counts(&self) -> StoreCounts {
        let inner = self.lock();
        StoreCounts {
            games: inner.games.len(),
            stats: inner.stats.len(),
            mastery: inner.mastery.len(),
            equipment: inner.equipment.len(),
            skills: inner.skills.len(),
            killed_by: inner.killed_by.len(),
            purchases: inner.purchases.len(),
            users: inner.users.len(),
        }
    }

    /// Number of state-changing calls received (upserts), regardless of
    /// whether they changed any row.
    pub fn mutation_calls(&self) -> u64 {
        self.lock().mutation_calls
    }

    pub fn equipment_rows(&self, game_id: i64, user_id: i64) -> Vec<EquipmentRow> {
        let mut rows: Vec<EquipmentRow> = self
            .lock()
            .equipment
            .values()
            .filter(|r| r.game_id == game_id && r.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.slot);
        rows
    }

    pub fn game(&self, game_id: i64) -> Option<GameRow> {
        self.lock().games.get(&game_id).cloned()
    }

    pub fn player_stats(&self, game_id: i64, user_id: i64) -> Option<PlayerStatsRow> {
        self.lock().stats.get(&(game_id, user_id)).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock only happens after a panicking test; propagate.
        match self.inner.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        }
    }
}

fn child_key(game_start_time: DateTime<Utc>, game_id: i64, user_id: i64) -> ChildKey {
    (game_start_time, game_id, user_id)
}

#[async_trait]
impl MatchStore for MemoryStore {
    async fn game_exists(&self, game_id: i64) -> Result<bool, StorageError> {
        Ok(self.lock().games.contains_key(&game_id))
    }

    async fn participation_exists(
        &self,
        game_id: i64,
        user_id: i64,
    ) -> Result<bool, StorageError> {
        Ok(self.lock().stats.contains_key(&(game_id, user_id)))
    }

    async fn upsert_game(&self, row: &GameRow) -> Result<(), StorageError> {
        let mut inner = self.lock();
        inner.mutation_calls += 1;
        inner.games.entry(row.game_id).or_insert_with(|| row.clone());
        Ok(())
    }

    async fn upsert_player_stats(&self, row: &PlayerStatsRow) -> Result<(), StorageError> {
        let mut inner = self.lock();
        inner.mutation_calls += 1;
        inner.stats.insert((row.game_id, row.user_id), row.clone());
        Ok(())
    }

    async fn upsert_children(&self, rows: ChildRows<'_>) -> Result<(), StorageError> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut inner = self.lock();
        inner.mutation_calls += 1;
        match rows {
            ChildRows::Mastery(rs) => {
                for r in rs {
                    let k = (
                        child_key(r.game_start_time, r.game_id, r.user_id),
                        r.mastery_type,
                    );
                    inner.mastery.insert(k, r.clone());
                }
            }
            ChildRows::Equipment(rs) => {
                for r in rs {
                    let k = (child_key(r.game_start_time, r.game_id, r.user_id), r.slot);
                    inner.equipment.insert(k, r.clone());
                }
            }
            ChildRows::SkillOrder(rs) => {
                for r in rs {
                    let k = (
                        child_key(r.game_start_time, r.game_id, r.user_id),
                        r.skill_level,
                    );
                    inner.skills.insert(k, r.clone());
                }
            }
            ChildRows::KilledBy(rs) => {
                for r in rs {
                    let k = (
                        child_key(r.game_start_time, r.game_id, r.user_id),
                        r.killed_by_id,
                    );
                    inner.killed_by.insert(k, r.clone());
                }
            }
            ChildRows::ItemPurchases(rs) => {
                for r in rs {
                    let k = (
                        child_key(r.game_start_time, r.game_id, r.user_id),
                        r.item_id,
                        r.purchase_type,
                    );
                    inner.purchases.insert(k, r.clone());
                }
            }
        }
        Ok(())
    }

    async fn upsert_user(&self, user: &UserIdentity) -> Result<(), StorageError> {
        let mut inner = self.lock();
        inner.mutation_calls += 1;
        inner.users.insert(user.user_id, user.clone());
        Ok(())
    }

    async fn user_by_nickname(
        &self,
        nickname: &str,
    ) -> Result<Option<UserIdentity>, StorageError> {
        Ok(self
            .lock()
            .users
            .values()
            .find(|u| u.nickname == nickname)
            .cloned())
    }

    async fn user_by_id(&self, user_id: i64) -> Result<Option<UserIdentity>, StorageError> {
        Ok(self.lock().users.get(&user_id).cloned())
    }
}
