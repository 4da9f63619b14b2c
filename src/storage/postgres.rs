//! Postgres backend: sqlx pool wrapper plus the batch upserts behind
//! [`MatchStore`]. Statements avoid the prepared-statement cache by default
//! so the pool stays safe behind PgBouncer in transaction mode.

use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
    PgPool, QueryBuilder, Row,
};
use tracing::{info, instrument};

use crate::error::StorageError;
use crate::model::UserIdentity;
use crate::normalization::rows::{
    EquipmentRow, GameRow, ItemPurchaseRow, KilledByRow, MasteryRow, PlayerStatsRow,
    SkillOrderRow,
};
use crate::storage::{ChildRows, MatchStore};
use crate::util::env::env_flag;

#[derive(Clone)]
pub struct Db {
    pub pool: PgPool,
}

impl Db {
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let mut connect_options = PgConnectOptions::from_str(database_url)?;

        if database_url.contains("sslmode=require") && !database_url.contains("sslmode=disable") {
            connect_options = connect_options.ssl_mode(PgSslMode::Require);
        }

        if !env_flag("USE_PREPARED", false) {
            // PgBouncer txn mode safe
            connect_options = connect_options.statement_cache_capacity(0);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect_with(connect_options)
            .await?;
        info!("connected to db");

        // Auto-migrate is opt-in; the ingester must run against schemas it
        // does not own.
        if env_flag("AUTO_MIGRATE", false) {
            info!("running migrations (AUTO_MIGRATE=on)");
            Self::run_migrations(&pool).await?;
        } else {
            info!("AUTO_MIGRATE disabled; skipping migrations");
        }
        Ok(Self { pool })
    }

    // Lightweight migration runner: numbered `NNNN_description.sql` files,
    // non-matching names ignored, applied versions tracked in-db.
    async fn run_migrations(pool: &PgPool) -> Result<()> {
        use std::collections::HashSet;
        use std::{fs, path::Path};

        let dir = Path::new("./migrations");
        if !dir.exists() {
            return Ok(());
        }
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS _sqlx_migrations (
                version BIGINT PRIMARY KEY,
                description TEXT,
                installed_at TIMESTAMPTZ DEFAULT now()
             )",
        )
        .execute(pool)
        .await?;
        let applied_rows = sqlx::raw_sql("SELECT version FROM _sqlx_migrations")
            .fetch_all(pool)
            .await?;
        let mut applied: HashSet<i64> = HashSet::new();
        for r in applied_rows {
            applied.insert(r.try_get::<i64, _>(0)?);
        }

        let mut candidates: Vec<(i64, String, std::path::PathBuf)> = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let Some(fname) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            if !fname.ends_with(".sql") {
                continue;
            }
            let num_str: String = fname.chars().take_while(|c| c.is_ascii_digit()).collect();
            if num_str.is_empty() {
                continue;
            }
            if let Some(desc) = fname
                .strip_prefix(&num_str)
                .and_then(|s| s.strip_prefix('_'))
            {
                if let Ok(version) = num_str.parse::<i64>() {
                    candidates.push((version, desc.trim_end_matches(".sql").to_string(), path));
                }
            }
        }
        candidates.sort_by_key(|(v, _, _)| *v);

        for (version, desc, path) in candidates {
            if applied.contains(&version) {
                continue;
            }
            let sql = fs::read_to_string(&path)?;
            info!(version, file = ?path, "applying migration");
            sqlx::raw_sql(sql.trim()).execute(pool).await?;
            let desc_escaped = desc.replace('\'', "''");
            let insert_stmt = format!(
                "INSERT INTO _sqlx_migrations(version, description) VALUES ({}, '{}')",
                version, desc_escaped
            );
            sqlx::raw_sql(&insert_stmt).execute(pool).await?;
            applied.insert(version);
        }
        Ok(())
    }
}

pub struct PgStore {
    db: Db,
}

impl PgStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    fn pool(&self) -> &PgPool {
        &self.db.pool
    }

    async fn upsert_mastery(&self, rows: &[MasteryRow]) -> Result<(), StorageError> {
        let mut qb: QueryBuilder<'_, sqlx::Postgres> = QueryBuilder::new(
            "INSERT INTO mastery_levels (game_start_time, game_id, user_id, mastery_type, level) ",
        );
        qb.push_values(rows, |mut b, r| {
            b.push_bind(r.game_start_time)
                .push_bind(r.game_id)
                .push_bind(r.user_id)
                .push_bind(r.mastery_type)
                .push_bind(r.level);
        });
        qb.push(
            " ON CONFLICT (game_start_time, game_id, user_id, mastery_type)
              DO UPDATE SET level = EXCLUDED.level",
        );
        qb.build().persistent(false).execute(self.pool()).await?;
        Ok(())
    }

    async fn upsert_equipment(&self, rows: &[EquipmentRow]) -> Result<(), StorageError> {
        let mut qb: QueryBuilder<'_, sqlx::Postgres> = QueryBuilder::new(
            "INSERT INTO equipment (game_start_time, game_id, user_id, slot, item_id, type) ",
        );
        qb.push_values(rows, |mut b, r| {
            b.push_bind(r.game_start_time)
                .push_bind(r.game_id)
                .push_bind(r.user_id)
                .push_bind(r.slot)
                .push_bind(r.item_id)
                .push_bind(r.kind.as_i32());
        });
        qb.push(
            " ON CONFLICT (game_start_time, game_id, user_id, slot)
              DO UPDATE SET item_id = EXCLUDED.item_id,
                            type = EXCLUDED.type",
        );
        qb.build().persistent(false).execute(self.pool()).await?;
        Ok(())
    }

    async fn upsert_skill_order(&self, rows: &[SkillOrderRow]) -> Result<(), StorageError> {
        let mut qb: QueryBuilder<'_, sqlx::Postgres> = QueryBuilder::new(
            "INSERT INTO skill_order (game_start_time, game_id, user_id, skill_level, skill_id) ",
        );
        qb.push_values(rows, |mut b, r| {
            b.push_bind(r.game_start_time)
                .push_bind(r.game_id)
                .push_bind(r.user_id)
                .push_bind(r.skill_level)
                .push_bind(r.skill_id);
        });
        qb.push(
            " ON CONFLICT (game_start_time, game_id, user_id, skill_level)
              DO UPDATE SET skill_id = EXCLUDED.skill_id",
        );
        qb.build().persistent(false).execute(self.pool()).await?;
        Ok(())
    }

    async fn upsert_killed_by(&self, rows: &[KilledByRow]) -> Result<(), StorageError> {
        let mut qb: QueryBuilder<'_, sqlx::Postgres> = QueryBuilder::new(
            "INSERT INTO killed_by_data (game_start_time, game_id, user_id, killed_by_id, \
             killed_by_type, killed_by_name, died_area, killed_by_character, \
             killed_by_character_weapon) ",
        );
        qb.push_values(rows, |mut b, r| {
            b.push_bind(r.game_start_time)
                .push_bind(r.game_id)
                .push_bind(r.user_id)
                .push_bind(r.killed_by_id)
                .push_bind(&r.killed_by_type)
                .push_bind(&r.killed_by_name)
                .push_bind(&r.died_area)
                .push_bind(&r.killed_by_character)
                .push_bind(&r.killed_by_character_weapon);
        });
        qb.push(
            " ON CONFLICT (game_start_time, game_id, user_id, killed_by_id)
              DO UPDATE SET killed_by_type = EXCLUDED.killed_by_type,
                            killed_by_name = EXCLUDED.killed_by_name,
                            died_area = EXCLUDED.died_area,
                            killed_by_character = EXCLUDED.killed_by_character,
                            killed_by_character_weapon = EXCLUDED.killed_by_character_weapon",
        );
        qb.build().persistent(false).execute(self.pool()).await?;
        Ok(())
    }

    async fn upsert_item_purchases(&self, rows: &[ItemPurchaseRow]) -> Result<(), StorageError> {
        let mut qb: QueryBuilder<'_, sqlx::Postgres> = QueryBuilder::new(
            "INSERT INTO items_purchased (game_start_time, game_id, user_id, item_id, \
             purchase_type, quantity) ",
        );
        qb.push_values(rows, |mut b, r| {
            b.push_bind(r.game_start_time)
                .push_bind(r.game_id)
                .push_bind(r.user_id)
                .push_bind(r.item_id)
                .push_bind(r.purchase_type.as_str())
                .push_bind(r.quantity);
        });
        qb.push(
            " ON CONFLICT (game_start_time, game_id, user_id, item_id, purchase_type)
              DO UPDATE SET quantity = EXCLUDED.quantity",
        );
        qb.build().persistent(false).execute(self.pool()).await?;
        Ok(())
    }
}

#[async_trait]
impl MatchStore for PgStore {
    async fn game_exists(&self, game_id: i64) -> Result<bool, StorageError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM games WHERE game_id = $1)")
                .bind(game_id)
                .persistent(false)
                .fetch_one(self.pool())
                .await?;
        Ok(exists)
    }

    async fn participation_exists(
        &self,
        game_id: i64,
        user_id: i64,
    ) -> Result<bool, StorageError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM player_game_stats WHERE game_id = $1 AND user_id = $2)",
        )
        .bind(game_id)
        .bind(user_id)
        .persistent(false)
        .fetch_one(self.pool())
        .await?;
        Ok(exists)
    }

    async fn upsert_game(&self, row: &GameRow) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO games (game_id, game_start_time, season_id, match_mode, \
             match_team_mode, server, duration, total_match_players, main_weather_code, \
             sub_weather_code)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (game_id) DO NOTHING",
        )
        .bind(row.game_id)
        .bind(row.game_start_time)
        .bind(row.season_id)
        .bind(row.match_mode)
        .bind(row.match_team_mode)
        .bind(&row.server)
        .bind(row.duration)
        .bind(row.total_match_players)
        .bind(row.main_weather_code)
        .bind(row.sub_weather_code)
        .persistent(false)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn upsert_player_stats(&self, row: &PlayerStatsRow) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO player_game_stats (game_id, game_start_time, user_id, nickname, \
             character_id, team_id, game_place_result, level, kills, assists, monster_kills, \
             damage_to_player, damage_to_monster, tanked_damage, healing, victory, mmr_change, \
             mmr_before, mmr_gain, mmr_after, starting_area, deaths, double_kills, triple_kills, \
             quadra_kills, extra_kills, possessed_credits, used_credits)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
             $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28)
             ON CONFLICT (game_id, user_id) DO UPDATE SET
                game_start_time = EXCLUDED.game_start_time,
                nickname = EXCLUDED.nickname,
                character_id = EXCLUDED.character_id,
                team_id = EXCLUDED.team_id,
                game_place_result = EXCLUDED.game_place_result,
                level = EXCLUDED.level,
                kills = EXCLUDED.kills,
                assists = EXCLUDED.assists,
                monster_kills = EXCLUDED.monster_kills,
                damage_to_player = EXCLUDED.damage_to_player,
                damage_to_monster = EXCLUDED.damage_to_monster,
                tanked_damage = EXCLUDED.tanked_damage,
                healing = EXCLUDED.healing,
                victory = EXCLUDED.victory,
                mmr_change = EXCLUDED.mmr_change,
                mmr_before = EXCLUDED.mmr_before,
                mmr_gain = EXCLUDED.mmr_gain,
                mmr_after = EXCLUDED.mmr_after,
                starting_area = EXCLUDED.starting_area,
                deaths = EXCLUDED.deaths,
                double_kills = EXCLUDED.double_kills,
                triple_kills = EXCLUDED.triple_kills,
                quadra_kills = EXCLUDED.quadra_kills,
                extra_kills = EXCLUDED.extra_kills,
                possessed_credits = EXCLUDED.possessed_credits,
                used_credits = EXCLUDED.used_credits",
        )
        .bind(row.game_id)
        .bind(row.game_start_time)
        .bind(row.user_id)
        .bind(&row.nickname)
        .bind(row.character_id)
        .bind(row.team_id)
        .bind(row.game_place_result)
        .bind(row.level)
        .bind(row.kills)
        .bind(row.assists)
        .bind(row.monster_kills)
        .bind(row.damage_to_player)
        .bind(row.damage_to_monster)
        .bind(row.tanked_damage)
        .bind(row.healing)
        .bind(row.victory)
        .bind(row.mmr_change)
        .bind(row.mmr_before)
        .bind(row.mmr_gain)
        .bind(row.mmr_after)
        .bind(row.starting_area)
        .bind(row.deaths)
        .bind(row.double_kills)
        .bind(row.triple_kills)
        .bind(row.quadra_kills)
        .bind(row.extra_kills)
        .bind(row.possessed_credits)
        .bind(row.used_credits)
        .persistent(false)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn upsert_children(&self, rows: ChildRows<'_>) -> Result<(), StorageError> {
        if rows.is_empty() {
            return Ok(());
        }
        match rows {
            ChildRows::Mastery(r) => self.upsert_mastery(r).await,
            ChildRows::Equipment(r) => self.upsert_equipment(r).await,
            ChildRows::SkillOrder(r) => self.upsert_skill_order(r).await,
            ChildRows::KilledBy(r) => self.upsert_killed_by(r).await,
            ChildRows::ItemPurchases(r) => self.upsert_item_purchases(r).await,
        }
    }

    async fn upsert_user(&self, user: &UserIdentity) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO users (user_id, nickname) VALUES ($1, $2)
             ON CONFLICT (user_id) DO UPDATE SET nickname = EXCLUDED.nickname",
        )
        .bind(user.user_id)
        .bind(&user.nickname)
        .persistent(false)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn user_by_nickname(
        &self,
        nickname: &str,
    ) -> Result<Option<UserIdentity>, StorageError> {
        let row = sqlx::query("SELECT user_id, nickname FROM users WHERE nickname = $1")
            .bind(nickname)
            .persistent(false)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| {
            Ok(UserIdentity {
                user_id: r.try_get("user_id")?,
                nickname: r.try_get("nickname")?,
            })
        })
        .transpose()
    }

    async fn user_by_id(&self, user_id: i64) -> Result<Option<UserIdentity>, StorageError> {
        let row = sqlx::query("SELECT user_id, nickname FROM users WHERE user_id = $1")
            .bind(user_id)
            .persistent(false)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| {
            Ok(UserIdentity {
                user_id: r.try_get("user_id")?,
                nickname: r.try_get("nickname")?,
            })
        })
        .transpose()
    }
}
