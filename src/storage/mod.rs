//! Storage port: one async trait, one implementation per backend.
//!
//! Every upsert is insert-or-replace on the table's natural key, a no-op on
//! empty input, and safe to retry with the same rows.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::model::UserIdentity;
use crate::normalization::rows::{
    EquipmentRow, GameRow, ItemPurchaseRow, KilledByRow, MasteryRow, PlayerStatsRow,
    SkillOrderRow,
};

pub use memory::MemoryStore;
pub use postgres::{Db, PgStore};

/// Rows for one child table of a participation, tagged by table kind so the
/// orchestrator can drive all five through one call shape.
#[derive(Debug, Clone, Copy)]
pub enum ChildRows<'a> {
    Mastery(&'a [MasteryRow]),
    Equipment(&'a [EquipmentRow]),
    SkillOrder(&'a [SkillOrderRow]),
    KilledBy(&'a [KilledByRow]),
    ItemPurchases(&'a [ItemPurchaseRow]),
}

impl ChildRows<'_> {
    pub fn table(&self) -> &'static str {
        match self {
            ChildRows::Mastery(_) => "mastery_levels",
            ChildRows::Equipment(_) => "equipment",
            ChildRows::SkillOrder(_) => "skill_order",
            ChildRows::KilledBy(_) => "killed_by_data",
            ChildRows::ItemPurchases(_) => "items_purchased",
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ChildRows::Mastery(r) => r.len(),
            ChildRows::Equipment(r) => r.len(),
            ChildRows::SkillOrder(r) => r.len(),
            ChildRows::KilledBy(r) => r.len(),
            ChildRows::ItemPurchases(r) => r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
pub trait MatchStore: Send + Sync {
    async fn game_exists(&self, game_id: i64) -> Result<bool, StorageError>;

    async fn participation_exists(
        &self,
        game_id: i64,
        user_id: i64,
    ) -> Result<bool, StorageError>;

    /// Insert the game row if absent. Game rows are never mutated once
    /// present.
    async fn upsert_game(&self, row: &GameRow) -> Result<(), StorageError>;

    async fn upsert_player_stats(&self, row: &PlayerStatsRow) -> Result<(), StorageError>;

    async fn upsert_children(&self, rows: ChildRows<'_>) -> Result<(), StorageError>;

    /// Insert-or-replace on user_id; the nickname follows the latest write.
    async fn upsert_user(&self, user: &UserIdentity) -> Result<(), StorageError>;

    async fn user_by_nickname(
        &self,
        nickname: &str,
    ) -> Result<Option<UserIdentity>, StorageError>;

    async fn user_by_id(&self, user_id: i64) -> Result<Option<UserIdentity>, StorageError>;
}
