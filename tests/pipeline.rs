//! End-to-end pipeline tests over the in-memory store: raw record in,
//! relational rows out, idempotent on replay.

// `synthetic_record` expands past the default macro recursion limit.
#![recursion_limit = "256"]

use std::sync::Arc;

use serde_json::{json, Value};

use er_game_data::model::MatchParticipation;
use er_game_data::normalization::rows::EquipmentKind;
use er_game_data::orchestrator::{InsertOutcome, Orchestrator};
use er_game_data::storage::MemoryStore;

fn synthetic_record() -> Value {
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

#[tokio::test]
async fn synthetic_record_lands_in_every_expected_table() {
    let store = Arc::new(MemoryStore::new());
    let orch = Orchestrator::new(store.clone());

    let p = MatchParticipation::from_raw(&synthetic_record()).unwrap();
    let outcome = orch.insert_participation(&p).await.unwrap();
    assert!(outcome.fully_inserted());

    let counts = store.counts();
    assert_eq!(counts.games, 1);
    assert_eq!(counts.stats, 1);
    assert_eq!(counts.mastery, 1);
    assert_eq!(counts.equipment, 2);
    assert_eq!(counts.skills, 3);
    assert_eq!(counts.killed_by, 0);
    assert_eq!(counts.purchases, 0);

    let game = store.game(36878649).unwrap();
    assert_eq!(game.season_id, 25);
    assert_eq!(game.main_weather_code, Some(2));
    // 21:14 at the fixed +09:00 offset is 12:14 UTC.
    assert_eq!(
        game.game_start_time.to_rfc3339(),
        "2024-11-02T12:14:07.123+00:00"
    );

    let stats = store.player_stats(36878649, 12345).unwrap();
    assert_eq!(stats.nickname, "TestPlayer");
    assert_eq!(stats.kills, 4);
    assert_eq!(stats.mmr_change, Some(12));
    assert_eq!(stats.mmr_before, None);

    for row in store.equipment_rows(36878649, 12345) {
        assert_eq!(row.kind, EquipmentKind::Final);
    }
}

#[tokio::test]
async fn replaying_the_same_record_writes_nothing() {
    let store = Arc::new(MemoryStore::new());
    let orch = Orchestrator::new(store.clone());
    let p = MatchParticipation::from_raw(&synthetic_record()).unwrap();

    orch.insert_participation(&p).await.unwrap();
    let counts_before = store.counts();
    let calls_before = store.mutation_calls();

    let outcome = orch.insert_participation(&p).await.unwrap();
    assert_eq!(outcome, InsertOutcome::AlreadyPresent);
    assert_eq!(store.counts(), counts_before);
    assert_eq!(store.mutation_calls(), calls_before);
}

#[tokio::test]
async fn purchases_and_kill_groups_flow_through() {
    let mut record = synthetic_record();
    {
        let obj = record.as_object_mut().unwrap();
        obj.insert("itemTransferredConsole".into(), json!([101, 101, 205]));
        obj.insert("itemTransferredDrone".into(), json!([101]));
        obj.insert("killer".into(), json!("player"));
        obj.insert("killerUserNum".into(), json!(777));
        obj.insert("killDetail".into(), json!("basicAttack"));
        obj.insert("killer2".into(), json!("wildAnimal"));
        obj.insert("killerCharacter2".into(), json!("Bear"));
    }

    let store = Arc::new(MemoryStore::new());
    let orch = Orchestrator::new(store.clone());
    let p = MatchParticipation::from_raw(&record).unwrap();
    orch.insert_participation(&p).await.unwrap();

    let counts = store.counts();
    // {(101,console,2), (205,console,1), (101,drone,1)}
    assert_eq!(counts.purchases, 3);
    assert_eq!(counts.killed_by, 2);
}

#[tokio::test]
async fn batch_file_form_parses_like_the_api_form() {
    let store = Arc::new(MemoryStore::new());
    let orch = Orchestrator::new(store.clone());

    let api_form = MatchParticipation::from_raw(&synthetic_record()).unwrap();
    let batch_form =
        MatchParticipation::from_raw(&serde_json::to_value(&api_form).unwrap()).unwrap();

    orch.insert_participation(&batch_form).await.unwrap();
    let outcome = orch.insert_participation(&api_form).await.unwrap();
    assert_eq!(outcome, InsertOutcome::AlreadyPresent);
    assert_eq!(store.counts().stats, 1);
}
