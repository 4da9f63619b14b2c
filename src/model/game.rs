//! Typed representation of one player's participation in one match.
//!
//! Raw records arrive in two shapes: the live API's `userGames` entries
//! (camelCase keys, kill attributions flattened into suffixed field groups)
//! and previously written batch files (this model re-serialized with its own
//! snake_case field names). Serde aliases let one struct parse both.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::ValidationError;

/// One "killed by" entry: who/what ended this participant's run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillAttribution {
    #[serde(alias = "killerUserNum", default)]
    pub killed_by_id: i64,
    #[serde(alias = "killer", default)]
    pub killed_by_type: String,
    #[serde(alias = "killDetail", default)]
    pub killed_by_name: String,
    #[serde(alias = "placeOfDeath", default)]
    pub died_area: String,
    #[serde(alias = "killerCharacter", default)]
    pub killed_by_character: String,
    #[serde(alias = "killerWeapon", default)]
    pub killed_by_character_weapon: String,
}

/// One player's record within one match, keyed by (game_id, user_id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchParticipation {
    #[serde(alias = "userNum")]
    pub user_id: i64,
    pub nickname: String,
    #[serde(alias = "gameId")]
    pub game_id: i64,
    #[serde(alias = "seasonId")]
    pub season_id: i32,
    #[serde(alias = "matchingMode")]
    pub match_mode: i32,
    #[serde(alias = "matchingTeamMode")]
    pub match_team_mode: i32,
    #[serde(alias = "characterNum")]
    pub character_id: i64,
    #[serde(alias = "characterLevel")]
    pub level: i32,
    #[serde(alias = "gameRank")]
    pub game_place_result: i32,
    #[serde(alias = "playerKill")]
    pub kills: i32,
    #[serde(alias = "playerAssistant")]
    pub assists: i32,
    #[serde(alias = "monsterKill")]
    pub monster_kills: i32,
    #[serde(alias = "masteryLevel", alias = "final_mastery_levels")]
    pub mastery_levels: BTreeMap<String, i32>,
    /// Final equipment snapshot (slot -> item id). Absent in some source
    /// variants; defaults to empty rather than failing the record.
    #[serde(alias = "equipment", default)]
    pub final_equipment: BTreeMap<String, i64>,
    #[serde(alias = "skillOrderInfo")]
    pub skill_order: BTreeMap<String, i64>,
    #[serde(alias = "serverName")]
    pub server: String,
    /// Match start, normalized from the API's fixed UTC+9 local-time string.
    #[serde(
        alias = "startDtm",
        alias = "game_start_datetime",
        deserialize_with = "de_start_time"
    )]
    pub game_start_time: DateTime<Utc>,
    pub duration: i32,
    #[serde(alias = "mmrGainInGame", default)]
    pub mmr_change: Option<i32>,
    #[serde(alias = "mmrBefore", default)]
    pub mmr_before: Option<i32>,
    #[serde(alias = "mmrGain", default)]
    pub mmr_gain: Option<i32>,
    #[serde(alias = "mmrAfter", default)]
    pub mmr_after: Option<i32>,
    #[serde(alias = "playTime")]
    pub total_player_played_time: i32,
    #[serde(alias = "botAdded")]
    pub bots_added: i32,
    #[serde(alias = "teamNumber")]
    pub team_id: i32,
    #[serde(alias = "preMade")]
    pub pre_made: i32,
    pub victory: bool,
    #[serde(alias = "damageToPlayer")]
    pub damage_to_player: i32,
    #[serde(alias = "damageToPlayer_basic")]
    pub damage_to_player_basic: i32,
    #[serde(alias = "damageToPlayer_skill")]
    pub damage_to_player_skill: i32,
    #[serde(alias = "damageToPlayer_itemSkill")]
    pub damage_to_player_item: i32,
    #[serde(alias = "damageToPlayer_direct")]
    pub damage_to_player_true: i32,
    #[serde(alias = "damageToPlayer_uniqueSkill")]
    pub damage_to_player_unique: i32,
    #[serde(alias = "damageFromPlayer")]
    pub tanked_damage: i32,
    #[serde(alias = "damageFromPlayer_basic")]
    pub tanked_damage_basic: i32,
    #[serde(alias = "damageFromPlayer_skill")]
    pub tanked_damage_skill: i32,
    #[serde(alias = "damageFromPlayer_itemSkill")]
    pub tanked_damage_item: i32,
    #[serde(alias = "damageFromPlayer_direct")]
    pub tanked_damage_true: i32,
    #[serde(alias = "damageFromPlayer_uniqueSkill")]
    pub tanked_damage_unique: i32,
    #[serde(alias = "damageToMonster")]
    pub damage_to_monster: i32,
    #[serde(alias = "damageToMonster_basic")]
    pub damage_to_monster_basic: i32,
    #[serde(alias = "damageToMonster_skill")]
    pub damage_to_monster_skill: i32,
    #[serde(alias = "damageToMonster_itemSkill")]
    pub damage_to_monster_item: i32,
    #[serde(alias = "damageToMonster_direct")]
    pub damage_to_monster_true: i32,
    #[serde(alias = "damageToMonster_uniqueSkill")]
    pub damage_to_monster_unique: i32,
    #[serde(alias = "damageFromMonster")]
    pub damage_from_monster: i32,
    #[serde(alias = "healAmount")]
    pub healing: i32,
    #[serde(alias = "placeOfStart")]
    pub starting_area: i32,
    #[serde(alias = "matchSize")]
    pub total_match_players: i32,
    #[serde(alias = "teamKill")]
    pub team_kills: i32,
    /// Ordered kill attributions (up to 3). On API payloads these are
    /// assembled from the suffixed flat groups before deserialization.
    #[serde(alias = "killerList", alias = "killed_by_data", default)]
    pub killed_by: Vec<KillAttribution>,
    #[serde(
        alias = "sumTotalVFCredits",
        alias = "posessed_credits",
        default
    )]
    pub possessed_credits: i32,
    #[serde(alias = "sumUsedVFCredits", default)]
    pub used_credits: i32,
    #[serde(alias = "playerDeaths")]
    pub deaths: i32,
    #[serde(alias = "killsPhaseOne")]
    pub early_kills: i32,
    #[serde(alias = "killsPhaseTwo")]
    pub midgame_kills: i32,
    #[serde(alias = "killsPhaseThree")]
    pub lategame_kills: i32,
    #[serde(alias = "deathsPhaseOne")]
    pub early_deaths: i32,
    #[serde(alias = "deathsPhaseTwo")]
    pub midgame_deaths: i32,
    #[serde(alias = "deathsPhaseThree")]
    pub lategame_deaths: i32,
    /// Multiset of item ids bought from the console channel.
    #[serde(
        alias = "itemTransferredConsole",
        alias = "items_purchased_from_console",
        default
    )]
    pub items_purchased_console: Vec<i64>,
    /// Multiset of item ids bought from the drone channel.
    #[serde(
        alias = "itemTransferredDrone",
        alias = "items_purchased_from_drone",
        default
    )]
    pub items_purchased_drone: Vec<i64>,
    #[serde(alias = "totalDoubleKill")]
    pub double_kills: i32,
    #[serde(alias = "totalTripleKill")]
    pub triple_kills: i32,
    #[serde(alias = "totalQuadraKill")]
    pub quadra_kills: i32,
    #[serde(alias = "totalExtraKill")]
    pub extra_kills: i32,
    /// First purchased item per slot (slot -> ordered item-id list); only the
    /// head of each list is the canonical early-item signal. Absent in some
    /// source variants; defaults to empty.
    #[serde(
        alias = "equipFirstItemForLog",
        alias = "equipment_first_item",
        default
    )]
    pub first_equipment: BTreeMap<String, Vec<i64>>,
    #[serde(alias = "mainWeather", default)]
    pub main_weather: Option<i32>,
    #[serde(alias = "subWeather", default)]
    pub sub_weather: Option<i32>,
}

impl MatchParticipation {
    /// Parse one raw participation object (API or batch-file shape).
    ///
    /// Missing required keys and unparseable values fail with a
    /// `ValidationError` naming the field; missing optional fields never fail.
    pub fn from_raw(raw: &Value) -> Result<Self, ValidationError> {
        let obj = raw.as_object().ok_or(ValidationError::NotAnObject)?;

        // Surface timestamp problems precisely before the full decode.
        if let Some(ts) = start_time_field(obj) {
            let raw_ts = ts.as_str().ok_or_else(|| ValidationError::BadTimestamp {
                field: "startDtm",
                raw: ts.to_string(),
            })?;
            parse_start_time(raw_ts)?;
        }

        let mut doc = obj.clone();
        if !has_assembled_kill_list(&doc) {
            let groups = assemble_kill_groups(&doc);
            let entries = groups
                .iter()
                .map(|k| serde_json::to_value(k).unwrap_or(Value::Null))
                .collect();
            doc.insert("killed_by".to_string(), Value::Array(entries));
        }

        serde_json::from_value(Value::Object(doc))
            .map_err(|e| ValidationError::Record(e.to_string()))
    }
}

/// Parse the API's fixed-offset local-time notation ("+0900") into UTC.
/// Also accepts the already-normalized "+09:00" forms our own batch files use.
pub fn parse_start_time(raw: &str) -> Result<DateTime<Utc>, ValidationError> {
    let normalized = if raw.ends_with("+0900") {
        raw.replace("+0900", "+09:00")
    } else {
        raw.to_string()
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(&normalized) {
        return Ok(dt.with_timezone(&Utc));
    }
    // Space-separated variant written by older batch tooling.
    for fmt in ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z"] {
        if let Ok(dt) = DateTime::parse_from_str(&normalized, fmt) {
            return Ok(dt.with_timezone(&Utc));
        }
    }
    Err(ValidationError::BadTimestamp {
        field: "startDtm",
        raw: raw.to_string(),
    })
}

/// Extract the raw participation objects from a payload: either a bare JSON
/// array (batch file) or an object wrapping a `userGames` array (API).
pub fn raw_participations(payload: &Value) -> Result<Vec<Value>, ValidationError> {
    if let Some(arr) = payload.as_array() {
        return Ok(arr.clone());
    }
    if let Some(arr) = payload.get("userGames").and_then(|v| v.as_array()) {
        return Ok(arr.clone());
    }
    Err(ValidationError::NotAnArray)
}

fn start_time_field(obj: &Map<String, Value>) -> Option<&Value> {
    ["startDtm", "game_start_time", "game_start_datetime"]
        .iter()
        .find_map(|k| obj.get(*k))
}

fn has_assembled_kill_list(obj: &Map<String, Value>) -> bool {
    ["killed_by", "killed_by_data", "killerList"]
        .iter()
        .any(|k| obj.get(*k).map(Value::is_array).unwrap_or(false))
}

/// Collect the up-to-3 flat kill-attribution groups, suffixed "", "2", "3".
/// A group is present iff its `killer{suffix}` key exists; absent groups are
/// omitted, not errors.
fn assemble_kill_groups(obj: &Map<String, Value>) -> Vec<KillAttribution> {
    let mut out = Vec::new();
    for suffix in ["", "2", "3"] {
        let marker = format!("killer{suffix}");
        let Some(kind) = obj.get(&marker).filter(|v| !v.is_null()) else {
            continue;
        };
        out.push(KillAttribution {
            killed_by_id: field_i64(obj, &format!("killerUserNum{suffix}")),
            killed_by_type: field_str(kind),
            killed_by_name: field_str_at(obj, &format!("killDetail{suffix}")),
            died_area: field_str_at(obj, &format!("placeOfDeath{suffix}")),
            killed_by_character: field_str_at(obj, &format!("killerCharacter{suffix}")),
            killed_by_character_weapon: field_str_at(obj, &format!("killerWeapon{suffix}")),
        });
    }
    out
}

fn field_i64(obj: &Map<String, Value>, key: &str) -> i64 {
    obj.get(key).and_then(Value::as_i64).unwrap_or(0)
}

fn field_str(v: &Value) -> String {
    v.as_str().unwrap_or_default().to_string()
}

fn field_str_at(obj: &Map<String, Value>, key: &str) -> String {
    obj.get(key).map(field_str).unwrap_or_default()
}

fn de_start_time<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_start_time(&raw).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn api_record() -> Value {
        json!({
            "userNum": 12345,
            "nickname": "TestPlayer",
            "gameId": 36878649i64,
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
            "mmrGainInGame": 12,
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
        })
    }

    #[test]
    fn parses_api_record_scalars() {
        let p = MatchParticipation::from_raw(&api_record()).unwrap();
        assert_eq!(p.game_id, 36878649);
        assert_eq!(p.user_id, 12345);
        assert_eq!(p.season_id, 25);
        assert_eq!(p.character_id, 14);
        assert_eq!(p.kills, 4);
        assert_eq!(p.deaths, 1);
        assert_eq!(p.possessed_credits, 980);
        assert!(!p.victory);
        assert_eq!(p.main_weather, Some(2));
        assert_eq!(p.sub_weather, Some(5));
        assert_eq!(p.mastery_levels.get("301"), Some(&19));
        assert_eq!(p.skill_order.len(), 3);
    }

    #[test]
    fn normalizes_fixed_offset_timestamp() {
        let p = MatchParticipation::from_raw(&api_record()).unwrap();
        // 21:14 at UTC+9 is 12:14 UTC.
        assert_eq!(p.game_start_time.to_rfc3339(), "2024-11-02T12:14:07.123+00:00");
    }

    #[test]
    fn accepts_space_separated_timestamp() {
        let dt = parse_start_time("2024-11-02 21:14:07+09:00").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-11-02T12:14:07+00:00");
    }

    #[test]
    fn malformed_timestamp_fails_the_record() {
        let mut rec = api_record();
        rec["startDtm"] = json!("not-a-time");
        let err = MatchParticipation::from_raw(&rec).unwrap_err();
        assert!(matches!(err, ValidationError::BadTimestamp { .. }));
    }

    #[test]
    fn missing_required_key_names_the_field() {
        let mut rec = api_record();
        rec.as_object_mut().unwrap().remove("gameId");
        let err = MatchParticipation::from_raw(&rec).unwrap_err();
        assert!(err.to_string().contains("game_id"), "got: {err}");
    }

    #[test]
    fn assembles_two_of_three_kill_groups_in_order() {
        let mut rec = api_record();
        let obj = rec.as_object_mut().unwrap();
        obj.insert("killer".into(), json!("player"));
        obj.insert("killerUserNum".into(), json!(777));
        obj.insert("killDetail".into(), json!("basicAttack"));
        obj.insert("placeOfDeath".into(), json!("Hotel"));
        obj.insert("killerCharacter".into(), json!("Jackie"));
        obj.insert("killerWeapon".into(), json!("TwoHandSword"));
        obj.insert("killer2".into(), json!("wildAnimal"));
        obj.insert("killerCharacter2".into(), json!("Bear"));
        // no killer3 group

        let p = MatchParticipation::from_raw(&rec).unwrap();
        assert_eq!(p.killed_by.len(), 2);
        assert_eq!(p.killed_by[0].killed_by_id, 777);
        assert_eq!(p.killed_by[0].killed_by_type, "player");
        assert_eq!(p.killed_by[1].killed_by_type, "wildAnimal");
        assert_eq!(p.killed_by[1].killed_by_character, "Bear");
        assert_eq!(p.killed_by[1].killed_by_id, 0);
    }

    #[test]
    fn optional_collections_default_to_empty() {
        let mut rec = api_record();
        let obj = rec.as_object_mut().unwrap();
        obj.remove("equipment");
        let p = MatchParticipation::from_raw(&rec).unwrap();
        assert!(p.final_equipment.is_empty());
        assert!(p.first_equipment.is_empty());
        assert!(p.items_purchased_console.is_empty());
        assert!(p.items_purchased_drone.is_empty());
        assert!(p.killed_by.is_empty());
    }

    #[test]
    fn batch_file_round_trip_preserves_scalars() {
        let p = MatchParticipation::from_raw(&api_record()).unwrap();
        let written = serde_json::to_value(&p).unwrap();
        let reparsed = MatchParticipation::from_raw(&written).unwrap();
        assert_eq!(reparsed.game_id, p.game_id);
        assert_eq!(reparsed.user_id, p.user_id);
        assert_eq!(reparsed.game_start_time, p.game_start_time);
        assert_eq!(reparsed.kills, p.kills);
        assert_eq!(reparsed.final_equipment, p.final_equipment);
        assert_eq!(reparsed.killed_by, p.killed_by);
    }

    #[test]
    fn unwraps_user_games_envelope() {
        let payload = json!({"code": 200, "userGames": [api_record()]});
        assert_eq!(raw_participations(&payload).unwrap().len(), 1);
        let bare = json!([api_record(), api_record()]);
        assert_eq!(raw_participations(&bare).unwrap().len(), 2);
        assert!(raw_participations(&json!({"code": 404})).is_err());
    }
}
