//! Pure projections from one [`MatchParticipation`] into the seven
//! table-shaped row lists the store persists. No I/O; calling any projection
//! twice on the same participation yields identical output.

pub mod rows;

use std::collections::BTreeMap;

use crate::model::MatchParticipation;
use rows::{
    EquipmentKind, EquipmentRow, GameRow, ItemPurchaseRow, KilledByRow, MasteryRow,
    PlayerStatsRow, PurchaseChannel, SkillOrderRow,
};

/// Everything the orchestrator persists for one participation, child lists
/// already deduplicated on their natural keys.
#[derive(Debug, Clone)]
pub struct ParticipationBundle {
    pub game: GameRow,
    pub stats: PlayerStatsRow,
    pub mastery: Vec<MasteryRow>,
    pub equipment: Vec<EquipmentRow>,
    pub skills: Vec<SkillOrderRow>,
    pub killed_by: Vec<KilledByRow>,
    pub purchases: Vec<ItemPurchaseRow>,
}

pub fn bundle(p: &MatchParticipation) -> ParticipationBundle {
    let mut mastery = mastery_rows(p);
    dedup_on(&mut mastery, |r| r.mastery_type);

    let mut equipment = equipment_rows(p);
    dedup_on(&mut equipment, |r| r.slot);

    let mut skills = skill_rows(p);
    dedup_on(&mut skills, |r| r.skill_level);

    let mut killed_by = killed_by_rows(p);
    dedup_on(&mut killed_by, |r| r.killed_by_id);

    let mut purchases = item_purchase_rows(p);
    dedup_on(&mut purchases, |r| (r.item_id, r.purchase_type));

    ParticipationBundle {
        game: game_row(p),
        stats: player_stats_row(p),
        mastery,
        equipment,
        skills,
        killed_by,
        purchases,
    }
}

pub fn game_row(p: &MatchParticipation) -> GameRow {
    GameRow {
        game_id: p.game_id,
        game_start_time: p.game_start_time,
        season_id: p.season_id,
        match_mode: p.match_mode,
        match_team_mode: p.match_team_mode,
        server: p.server.clone(),
        duration: p.duration,
        total_match_players: p.total_match_players,
        main_weather_code: p.main_weather,
        sub_weather_code: p.sub_weather,
    }
}

pub fn player_stats_row(p: &MatchParticipation) -> PlayerStatsRow {
    PlayerStatsRow {
        game_id: p.game_id,
        game_start_time: p.game_start_time,
        user_id: p.user_id,
        nickname: p.nickname.clone(),
        character_id: p.character_id,
        team_id: p.team_id,
        game_place_result: p.game_place_result,
        level: p.level,
        kills: p.kills,
        assists: p.assists,
        monster_kills: p.monster_kills,
        damage_to_player: p.damage_to_player,
        damage_to_monster: p.damage_to_monster,
        tanked_damage: p.tanked_damage,
        healing: p.healing,
        victory: p.victory,
        mmr_change: p.mmr_change,
        mmr_before: p.mmr_before,
        mmr_gain: p.mmr_gain,
        mmr_after: p.mmr_after,
        starting_area: p.starting_area,
        deaths: p.deaths,
        double_kills: p.double_kills,
        triple_kills: p.triple_kills,
        quadra_kills: p.quadra_kills,
        extra_kills: p.extra_kills,
        possessed_credits: p.possessed_credits,
        used_credits: p.used_credits,
    }
}

pub fn mastery_rows(p: &MatchParticipation) -> Vec<MasteryRow> {
    p.mastery_levels
        .iter()
        .filter_map(|(mastery_type, level)| {
            Some(MasteryRow {
                game_start_time: p.game_start_time,
                game_id: p.game_id,
                user_id: p.user_id,
                mastery_type: int_key(mastery_type, "mastery_type", p.game_id)?,
                level: *level,
            })
        })
        .collect()
}

/// Final (type 2) rows come before first-purchase (type 1) rows so that a
/// slot present in both snapshots keeps its final row after slot-level dedup.
pub fn equipment_rows(p: &MatchParticipation) -> Vec<EquipmentRow> {
    let finals = p.final_equipment.iter().filter_map(|(slot, item_id)| {
        Some(EquipmentRow {
            game_start_time: p.game_start_time,
            game_id: p.game_id,
            user_id: p.user_id,
            slot: int_key(slot, "equipment slot", p.game_id)?,
            item_id: *item_id,
            kind: EquipmentKind::Final,
        })
    });
    // A first-purchase slot with an empty item list carries no signal.
    let firsts = p.first_equipment.iter().filter_map(|(slot, items)| {
        Some(EquipmentRow {
            game_start_time: p.game_start_time,
            game_id: p.game_id,
            user_id: p.user_id,
            slot: int_key(slot, "first-equipment slot", p.game_id)?,
            item_id: *items.first()?,
            kind: EquipmentKind::FirstPurchase,
        })
    });
    finals.chain(firsts).collect()
}

pub fn skill_rows(p: &MatchParticipation) -> Vec<SkillOrderRow> {
    p.skill_order
        .iter()
        .filter_map(|(skill_level, skill_id)| {
            Some(SkillOrderRow {
                game_start_time: p.game_start_time,
                game_id: p.game_id,
                user_id: p.user_id,
                skill_level: int_key(skill_level, "skill_level", p.game_id)?,
                skill_id: *skill_id,
            })
        })
        .collect()
}

pub fn killed_by_rows(p: &MatchParticipation) -> Vec<KilledByRow> {
    p.killed_by
        .iter()
        .map(|k| KilledByRow {
            game_start_time: p.game_start_time,
            game_id: p.game_id,
            user_id: p.user_id,
            killed_by_id: k.killed_by_id,
            killed_by_type: k.killed_by_type.clone(),
            killed_by_name: k.killed_by_name.clone(),
            died_area: k.died_area.clone(),
            killed_by_character: k.killed_by_character.clone(),
            killed_by_character_weapon: k.killed_by_character_weapon.clone(),
        })
        .collect()
}

/// Reduce each purchase channel's multiset to (item_id, channel, quantity).
/// Channels are counted independently and never merged.
pub fn item_purchase_rows(p: &MatchParticipation) -> Vec<ItemPurchaseRow> {
    let mut out = Vec::new();
    for (channel, items) in [
        (PurchaseChannel::Console, &p.items_purchased_console),
        (PurchaseChannel::Drone, &p.items_purchased_drone),
    ] {
        let mut counts: BTreeMap<i64, i32> = BTreeMap::new();
        for item_id in items {
            *counts.entry(*item_id).or_insert(0) += 1;
        }
        out.extend(counts.into_iter().map(|(item_id, quantity)| ItemPurchaseRow {
            game_start_time: p.game_start_time,
            game_id: p.game_id,
            user_id: p.user_id,
            item_id,
            purchase_type: channel,
            quantity,
        }));
    }
    out
}

/// Stable-sort by natural key, keep the first row per distinct key.
fn dedup_on<T, K: Ord>(rows: &mut Vec<T>, key: impl Fn(&T) -> K) {
    rows.sort_by(|a, b| key(a).cmp(&key(b)));
    rows.dedup_by(|b, a| key(a) == key(b));
}

fn int_key(raw: &str, what: &'static str, game_id: i64) -> Option<i32> {
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(game_id, key = raw, "non-numeric {what} key, row dropped");
            None
        }
    }
}
