//! Table-shaped row types produced by the normalizer.
//!
//! Each struct mirrors one relational table; the natural key columns come
//! first. Rows are plain data so both the Postgres and in-memory backends
//! can consume them.

use chrono::{DateTime, Utc};

/// Row for `games`, one per match. Keyed by `game_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct GameRow {
    pub game_id: i64,
    pub game_start_time: DateTime<Utc>,
    pub season_id: i32,
    pub match_mode: i32,
    pub match_team_mode: i32,
    pub server: String,
    pub duration: i32,
    pub total_match_players: i32,
    pub main_weather_code: Option<i32>,
    pub sub_weather_code: Option<i32>,
}

/// Row for `player_game_stats`. Keyed by (game_id, user_id).
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerStatsRow {
    pub game_id: i64,
    pub game_start_time: DateTime<Utc>,
    pub user_id: i64,
    pub nickname: String,
    pub character_id: i64,
    pub team_id: i32,
    pub game_place_result: i32,
    pub level: i32,
    pub kills: i32,
    pub assists: i32,
    pub monster_kills: i32,
    pub damage_to_player: i32,
    pub damage_to_monster: i32,
    pub tanked_damage: i32,
    pub healing: i32,
    pub victory: bool,
    pub mmr_change: Option<i32>,
    pub mmr_before: Option<i32>,
    pub mmr_gain: Option<i32>,
    pub mmr_after: Option<i32>,
    pub starting_area: i32,
    pub deaths: i32,
    pub double_kills: i32,
    pub triple_kills: i32,
    pub quadra_kills: i32,
    pub extra_kills: i32,
    pub possessed_credits: i32,
    pub used_credits: i32,
}

/// Row for `mastery_levels`. Keyed by (game_start_time, game_id, user_id, mastery_type).
#[derive(Debug, Clone, PartialEq)]
pub struct MasteryRow {
    pub game_start_time: DateTime<Utc>,
    pub game_id: i64,
    pub user_id: i64,
    pub mastery_type: i32,
    pub level: i32,
}

/// Snapshot kind for an equipment row. The slot alone is the natural key;
/// when a slot appears in both snapshots the final row is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EquipmentKind {
    FirstPurchase = 1,
    Final = 2,
}

impl EquipmentKind {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Row for `equipment`. Keyed by (game_start_time, game_id, user_id, slot).
#[derive(Debug, Clone, PartialEq)]
pub struct EquipmentRow {
    pub game_start_time: DateTime<Utc>,
    pub game_id: i64,
    pub user_id: i64,
    pub slot: i32,
    pub item_id: i64,
    pub kind: EquipmentKind,
}

/// Row for `skill_order`. Keyed by (game_start_time, game_id, user_id, skill_level).
#[derive(Debug, Clone, PartialEq)]
pub struct SkillOrderRow {
    pub game_start_time: DateTime<Utc>,
    pub game_id: i64,
    pub user_id: i64,
    pub skill_level: i32,
    pub skill_id: i64,
}

/// Row for `killed_by_data`. Keyed by (game_start_time, game_id, user_id, killed_by_id).
#[derive(Debug, Clone, PartialEq)]
pub struct KilledByRow {
    pub game_start_time: DateTime<Utc>,
    pub game_id: i64,
    pub user_id: i64,
    pub killed_by_id: i64,
    pub killed_by_type: String,
    pub killed_by_name: String,
    pub died_area: String,
    pub killed_by_character: String,
    pub killed_by_character_weapon: String,
}

/// Purchase channel; channels are never merged when counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PurchaseChannel {
    Console,
    Drone,
}

impl PurchaseChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            PurchaseChannel::Console => "console",
            PurchaseChannel::Drone => "drone",
        }
    }
}

/// Row for `items_purchased`. Keyed by
/// (game_start_time, game_id, user_id, item_id, purchase_type).
#[derive(Debug, Clone, PartialEq)]
pub struct ItemPurchaseRow {
    pub game_start_time: DateTime<Utc>,
    pub game_id: i64,
    pub user_id: i64,
    pub item_id: i64,
    pub purchase_type: PurchaseChannel,
    pub quantity: i32,
}
