//! Insertion orchestrator: existence gating plus the fixed per-participation
//! table order. No retry logic lives here; callers decide whether to replay.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::StorageError;
use crate::model::{MatchParticipation, UserIdentity};
use crate::normalization;
use crate::storage::{ChildRows, MatchStore};

/// Result of pushing one participation through the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The participation was new; `failed_tables` lists any table whose
    /// upsert was rejected (siblings still ran).
    Inserted { failed_tables: Vec<&'static str> },
    /// The (game_id, user_id) pair was already persisted; nothing was
    /// written.
    AlreadyPresent,
}

impl InsertOutcome {
    pub fn fully_inserted(&self) -> bool {
        matches!(self, InsertOutcome::Inserted { failed_tables } if failed_tables.is_empty())
    }
}

/// What `insert_user` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserOutcome {
    Created,
    Updated,
    SkippedExisting,
}

pub struct Orchestrator<S: MatchStore> {
    store: Arc<S>,
}

impl<S: MatchStore> Orchestrator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Normalize and persist one participation. The game row is written only
    /// when the game is unseen; an already-persisted (game_id, user_id) pair
    /// short-circuits with zero writes.
    pub async fn insert_participation(
        &self,
        p: &MatchParticipation,
    ) -> Result<InsertOutcome, StorageError> {
        let bundle = normalization::bundle(p);
        let mut failed_tables = Vec::new();

        if !self.store.game_exists(p.game_id).await? {
            if let Err(e) = self.store.upsert_game(&bundle.game).await {
                warn!(game_id = p.game_id, error = %e, "game upsert failed");
                failed_tables.push("games");
            }
        }

        if self.store.participation_exists(p.game_id, p.user_id).await? {
            debug!(
                game_id = p.game_id,
                user_id = p.user_id,
                "participation already persisted, skipping"
            );
            return Ok(InsertOutcome::AlreadyPresent);
        }

        if let Err(e) = self.store.upsert_player_stats(&bundle.stats).await {
            warn!(game_id = p.game_id, user_id = p.user_id, error = %e, "player stats upsert failed");
            failed_tables.push("player_game_stats");
        }

        let children = [
            ChildRows::Mastery(&bundle.mastery),
            ChildRows::Equipment(&bundle.equipment),
            ChildRows::SkillOrder(&bundle.skills),
            ChildRows::KilledBy(&bundle.killed_by),
            ChildRows::ItemPurchases(&bundle.purchases),
        ];
        for child in children {
            if let Err(e) = self.store.upsert_children(child).await {
                warn!(
                    game_id = p.game_id,
                    user_id = p.user_id,
                    table = child.table(),
                    error = %e,
                    "child table upsert failed"
                );
                failed_tables.push(child.table());
            }
        }

        Ok(InsertOutcome::Inserted { failed_tables })
    }

    /// Create the user on first sight; leave an existing row untouched
    /// unless `force`.
    pub async fn insert_user(
        &self,
        user: &UserIdentity,
        force: bool,
    ) -> Result<UserOutcome, StorageError> {
        match self.store.user_by_id(user.user_id).await? {
            None => {
                self.store.upsert_user(user).await?;
                Ok(UserOutcome::Created)
            }
            Some(_) if force => {
                self.store.upsert_user(user).await?;
                Ok(UserOutcome::Updated)
            }
            Some(_) => Ok(UserOutcome::SkippedExisting),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use serde_json::json;

    fn participation(game_id: i64, user_id: i64) -> MatchParticipation {
        let raw = json!({
            "userNum": user_id,
            "nickname": format!("player{user_id}"),
            "gameId": game_id,
            "seasonId": 25,
            "matchingMode": 3,
            "matchingTeamMode": 1,
            "characterNum": 14,
            "characterLevel": 18,
            "gameRank": 2,
            "playerKill": 4,
            "playerAssistant": 1,
            "monsterKill": 22,
            "masteryLevel": {"301": 19},
            "equipment": {"0": 201405, "1": 202410},
            "skillOrderInfo": {"1": 1014100, "2": 1014200, "3": 1014100},
            "serverName": "Seoul",
            "startDtm": "2024-11-02T21:14:07.123+0900",
            "duration": 1180,
            "playTime": 1180,
            "botAdded": 0,
            "teamNumber": 7,
            "preMade": 0,
            "victory": false,
            "damageToPlayer": 11200,
            "damageToPlayer_basic": 4200,
            "damageToPlayer_skill": 5600,
            "damageToPlayer_itemSkill": 400,
            "damageToPlayer_direct": 600,
            "damageToPlayer_uniqueSkill": 400,
            "damageFromPlayer": 9800,
            "damageFromPlayer_basic": 3000,
            "damageFromPlayer_skill": 5200,
            "damageFromPlayer_itemSkill": 600,
            "damageFromPlayer_direct": 500,
            "damageFromPlayer_uniqueSkill": 500,
            "damageToMonster": 30100,
            "damageToMonster_basic": 15000,
            "damageToMonster_skill": 14000,
            "damageToMonster_itemSkill": 600,
            "damageToMonster_direct": 300,
            "damageToMonster_uniqueSkill": 200,
            "damageFromMonster": 2100,
            "healAmount": 4100,
            "placeOfStart": 5,
            "matchSize": 24,
            "teamKill": 9,
            "sumTotalVFCredits": 980,
            "sumUsedVFCredits": 870,
            "playerDeaths": 1,
            "killsPhaseOne": 1,
            "killsPhaseTwo": 2,
            "killsPhaseThree": 1,
            "deathsPhaseOne": 0,
            "deathsPhaseTwo": 0,
            "deathsPhaseThree": 1,
            "totalDoubleKill": 1,
            "totalTripleKill": 0,
            "totalQuadraKill": 0,
            "totalExtraKill": 0,
            "mainWeather": 2,
            "subWeather": 5,
        });
        MatchParticipation::from_raw(&raw).unwrap()
    }

    #[tokio::test]
    async fn first_insert_populates_all_tables() {
        let store = Arc::new(MemoryStore::new());
        let orch = Orchestrator::new(store.clone());
        let outcome = orch
            .insert_participation(&participation(36878649, 12345))
            .await
            .unwrap();
        assert!(outcome.fully_inserted());
        let counts = store.counts();
        assert_eq!(counts.games, 1);
        assert_eq!(counts.stats, 1);
        assert_eq!(counts.mastery, 1);
        assert_eq!(counts.equipment, 2);
        assert_eq!(counts.skills, 3);
        assert_eq!(counts.killed_by, 0);
        assert_eq!(counts.purchases, 0);
    }

    #[tokio::test]
    async fn gated_participation_makes_zero_mutations() {
        let store = Arc::new(MemoryStore::new());
        let orch = Orchestrator::new(store.clone());
        let p = participation(36878649, 12345);
        orch.insert_participation(&p).await.unwrap();
        let calls = store.mutation_calls();

        let outcome = orch.insert_participation(&p).await.unwrap();
        assert_eq!(outcome, InsertOutcome::AlreadyPresent);
        assert_eq!(store.mutation_calls(), calls);
    }

    #[tokio::test]
    async fn second_player_reuses_existing_game_row() {
        let store = Arc::new(MemoryStore::new());
        let orch = Orchestrator::new(store.clone());
        orch.insert_participation(&participation(36878649, 12345))
            .await
            .unwrap();
        orch.insert_participation(&participation(36878649, 67890))
            .await
            .unwrap();
        let counts = store.counts();
        assert_eq!(counts.games, 1);
        assert_eq!(counts.stats, 2);
    }

    #[tokio::test]
    async fn insert_user_respects_force() {
        let store = Arc::new(MemoryStore::new());
        let orch = Orchestrator::new(store.clone());
        let original = UserIdentity {
            user_id: 12345,
            nickname: "OldName".into(),
        };
        let renamed = UserIdentity {
            user_id: 12345,
            nickname: "NewName".into(),
        };

        assert_eq!(
            orch.insert_user(&original, false).await.unwrap(),
            UserOutcome::Created
        );
        assert_eq!(
            orch.insert_user(&renamed, false).await.unwrap(),
            UserOutcome::SkippedExisting
        );
        let kept = store.user_by_id(12345).await.unwrap().unwrap();
        assert_eq!(kept.nickname, "OldName");

        assert_eq!(
            orch.insert_user(&renamed, true).await.unwrap(),
            UserOutcome::Updated
        );
        let updated = store.user_by_id(12345).await.unwrap().unwrap();
        assert_eq!(updated.nickname, "NewName");
    }
}
