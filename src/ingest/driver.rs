//! Ingestion driver: ties the API client, the batch-file replay and the
//! orchestrator together. Unit failures (one participation, one match, one
//! file) are counted and logged, never fatal to the run.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use rand::Rng;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::error::FetchError;
use crate::ingest::api::ErApiClient;
use crate::ingest::files::{self, FileDisposition};
use crate::model::{raw_participations, MatchParticipation, UserIdentity};
use crate::orchestrator::{InsertOutcome, Orchestrator};
use crate::storage::MatchStore;

/// Per-run tally. `processed` counts persisted participations; `skipped`
/// covers filter rejections and already-persisted records; `errored` covers
/// fetch, validation and storage failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: u64,
    pub skipped: u64,
    pub errored: u64,
}

impl RunSummary {
    fn absorb(&mut self, other: RunSummary) {
        self.processed += other.processed;
        self.skipped += other.skipped;
        self.errored += other.errored;
    }
}

pub struct Driver<S: MatchStore> {
    api: ErApiClient,
    orchestrator: Orchestrator<S>,
    current_season: i32,
}

impl<S: MatchStore> Driver<S> {
    pub fn new(api: ErApiClient, store: Arc<S>, current_season: i32) -> Self {
        Self {
            api,
            orchestrator: Orchestrator::new(store),
            current_season,
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator<S> {
        &self.orchestrator
    }

    /// Fetch one match and run every participation through the pipeline.
    pub async fn process_game(&self, game_id: i64) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let parsed = match self.fetch_and_parse(game_id, &mut summary).await {
            Ok(p) => p,
            Err(e) => {
                warn!(game_id, error = %e, "match fetch failed");
                summary.errored += 1;
                return Ok(summary);
            }
        };
        if parsed.is_empty() {
            info!(game_id, "no usable participations, skipping match");
            summary.skipped += 1;
            return Ok(summary);
        }
        if !self.filters_accept(game_id, &parsed) {
            summary.skipped += parsed.len() as u64;
            return Ok(summary);
        }
        for p in &parsed {
            self.insert_one(p, &mut summary).await?;
        }
        info!(game_id, ?summary, "match processed");
        Ok(summary)
    }

    /// Resolve each nickname through the API and persist the identity.
    /// Existing users are left alone unless `force`.
    pub async fn insert_users(&self, usernames: &[String], force: bool) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        for username in usernames {
            if !force
                && self
                    .orchestrator
                    .store()
                    .user_by_nickname(username)
                    .await?
                    .is_some()
            {
                info!(username, "user already exists, use --force to update");
                summary.skipped += 1;
                continue;
            }
            match self.api.fetch_user_by_nickname(username).await {
                Ok(Some(user)) => {
                    let outcome = self.orchestrator.insert_user(&user, force).await?;
                    info!(username, user_id = user.user_id, ?outcome, "user persisted");
                    summary.processed += 1;
                }
                Ok(None) => {
                    warn!(username, "nickname not found");
                    summary.errored += 1;
                }
                Err(e) => {
                    warn!(username, error = %e, "nickname lookup failed");
                    summary.errored += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Resolve a user (store first, then API) and page through their match
    /// history until `limit` participations are persisted or the cursor runs
    /// out.
    pub async fn fetch_user_games(&self, username: &str, limit: u64) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let Some(user) = self.resolve_user(username).await? else {
            warn!(username, "could not resolve user");
            summary.errored += 1;
            return Ok(summary);
        };

        let mut next: Option<i64> = None;
        while summary.processed < limit {
            let (raws, next_cursor) =
                match self.api.fetch_user_matches(user.user_id, next).await {
                    Ok(page) => page,
                    Err(e) => {
                        warn!(username, user_id = user.user_id, error = %e, "history page fetch failed");
                        summary.errored += 1;
                        break;
                    }
                };
            if raws.is_empty() {
                break;
            }
            for raw in &raws {
                if summary.processed >= limit {
                    break;
                }
                match MatchParticipation::from_raw(raw) {
                    Ok(p) => self.insert_one(&p, &mut summary).await?,
                    Err(e) => {
                        warn!(username, error = %e, "invalid participation record");
                        summary.errored += 1;
                    }
                }
            }
            match next_cursor {
                Some(cursor) => next = Some(cursor),
                None => break,
            }
        }
        info!(username, ?summary, "user history run complete");
        Ok(summary)
    }

    /// Replay one batch file. Any validation or storage failure routes the
    /// file to `error_dir`; otherwise it is archived. The file name is
    /// preserved either way.
    pub async fn process_single_file(
        &self,
        path: &Path,
        archive_dir: &Path,
        error_dir: &Path,
    ) -> Result<(FileDisposition, RunSummary)> {
        let mut summary = RunSummary::default();
        let disposition = self.ingest_file(path, &mut summary).await;
        let sink = match disposition {
            FileDisposition::Archived => archive_dir,
            FileDisposition::Errored => error_dir,
        };
        files::move_into(path, sink)
            .with_context(|| format!("moving {} to {}", path.display(), sink.display()))?;
        info!(file = %path.display(), ?disposition, ?summary, "batch file done");
        Ok((disposition, summary))
    }

    /// Replay every `.json` file under `dir`, fanning out across files with
    /// at most `workers` in flight. Participation order inside one file is
    /// preserved.
    pub async fn process_directory(
        &self,
        dir: &Path,
        archive_dir: &Path,
        error_dir: &Path,
        workers: usize,
    ) -> Result<RunSummary> {
        let batch = files::list_json_files(dir, &[archive_dir, error_dir])
            .with_context(|| format!("walking {}", dir.display()))?;
        info!(count = batch.len(), dir = %dir.display(), "replaying batch files");

        let semaphore = Arc::new(Semaphore::new(workers.max(1)));
        let mut tasks = FuturesUnordered::new();
        for path in batch {
            let sem = semaphore.clone();
            tasks.push(async move {
                let _permit = sem.acquire_owned().await.context("semaphore closed")?;
                self.process_single_file(&path, archive_dir, error_dir).await
            });
        }

        let mut summary = RunSummary::default();
        while let Some(res) = tasks.next().await {
            match res {
                Ok((_, file_summary)) => summary.absorb(file_summary),
                Err(e) => {
                    warn!(error = %e, "batch file task failed");
                    summary.errored += 1;
                }
            }
        }
        info!(?summary, "directory replay complete");
        Ok(summary)
    }

    /// Sample `count` random game ids, fetch each with `delay` between
    /// requests, and write accepted matches grouped by team under
    /// `output_dir/{game_id}/team_{team_id}.json`.
    pub async fn sample_games(
        &self,
        count: usize,
        output_dir: &Path,
        delay: Duration,
        archive_dir: Option<&Path>,
    ) -> Result<RunSummary> {
        let mut skip_dirs = vec![output_dir];
        if let Some(a) = archive_dir {
            skip_dirs.push(a);
        }
        let ids = generate_game_ids(count, &skip_dirs);
        let mut summary = RunSummary::default();

        for (i, game_id) in ids.iter().copied().enumerate() {
            info!(game_id, n = i + 1, total = ids.len(), "sampling game");
            let parsed = match self.fetch_and_parse(game_id, &mut summary).await {
                Ok(p) => p,
                Err(e) => {
                    warn!(game_id, error = %e, "sample fetch failed");
                    summary.errored += 1;
                    continue;
                }
            };
            if parsed.is_empty() || !self.filters_accept(game_id, &parsed) {
                summary.skipped += 1;
                continue;
            }
            write_team_files(output_dir, game_id, &parsed)?;
            summary.processed += 1;
            tokio::time::sleep(delay).await;
        }
        info!(?summary, "sampling complete");
        Ok(summary)
    }

    async fn insert_one(
        &self,
        p: &MatchParticipation,
        summary: &mut RunSummary,
    ) -> Result<()> {
        match self.orchestrator.insert_participation(p).await? {
            InsertOutcome::AlreadyPresent => summary.skipped += 1,
            InsertOutcome::Inserted { failed_tables } if failed_tables.is_empty() => {
                summary.processed += 1
            }
            InsertOutcome::Inserted { failed_tables } => {
                warn!(
                    game_id = p.game_id,
                    user_id = p.user_id,
                    ?failed_tables,
                    "participation persisted with table failures"
                );
                summary.errored += 1;
            }
        }
        Ok(())
    }

    async fn fetch_and_parse(
        &self,
        game_id: i64,
        summary: &mut RunSummary,
    ) -> Result<Vec<MatchParticipation>, FetchError> {
        let raws = self.api.fetch_match(game_id).await?;
        let mut parsed = Vec::with_capacity(raws.len());
        for raw in &raws {
            match MatchParticipation::from_raw(raw) {
                Ok(p) => parsed.push(p),
                Err(e) => {
                    warn!(game_id, error = %e, "invalid participation record");
                    summary.errored += 1;
                }
            }
        }
        Ok(parsed)
    }

    /// Season filter (first participation decides; sentinel 0 always passes)
    /// then weather filter (at least one participant must carry both codes).
    fn filters_accept(&self, game_id: i64, parsed: &[MatchParticipation]) -> bool {
        let season = parsed[0].season_id;
        if season != self.current_season && season != 0 {
            info!(
                game_id,
                season,
                current = self.current_season,
                "match is not from the current season, skipping"
            );
            return false;
        }
        let has_weather = parsed
            .iter()
            .any(|p| p.main_weather.is_some() && p.sub_weather.is_some());
        if !has_weather {
            info!(game_id, "match has no weather data, skipping");
            return false;
        }
        true
    }

    async fn ingest_file(&self, path: &Path, summary: &mut RunSummary) -> FileDisposition {
        let payload: Value = match fs::read_to_string(path)
            .map_err(anyhow::Error::from)
            .and_then(|text| serde_json::from_str(&text).map_err(anyhow::Error::from))
        {
            Ok(v) => v,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "unreadable batch file");
                summary.errored += 1;
                return FileDisposition::Errored;
            }
        };
        let raws = match raw_participations(&payload) {
            Ok(r) => r,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "batch file is not a participation array");
                summary.errored += 1;
                return FileDisposition::Errored;
            }
        };

        let mut failed = false;
        for raw in &raws {
            match MatchParticipation::from_raw(raw) {
                Ok(p) => match self.orchestrator.insert_participation(&p).await {
                    Ok(outcome) if outcome.fully_inserted() => summary.processed += 1,
                    Ok(InsertOutcome::AlreadyPresent) => summary.skipped += 1,
                    Ok(_) => {
                        summary.errored += 1;
                        failed = true;
                    }
                    Err(e) => {
                        warn!(file = %path.display(), game_id = p.game_id, error = %e, "storage failure");
                        summary.errored += 1;
                        failed = true;
                    }
                },
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "invalid participation record");
                    summary.errored += 1;
                    failed = true;
                }
            }
        }
        if failed {
            FileDisposition::Errored
        } else {
            FileDisposition::Archived
        }
    }

    async fn resolve_user(&self, username: &str) -> Result<Option<UserIdentity>> {
        if let Some(user) = self.orchestrator.store().user_by_nickname(username).await? {
            return Ok(Some(user));
        }
        let fetched = match self.api.fetch_user_by_nickname(username).await {
            Ok(u) => u,
            Err(e) => {
                warn!(username, error = %e, "nickname lookup failed");
                return Ok(None);
            }
        };
        if let Some(user) = &fetched {
            self.orchestrator.insert_user(user, false).await?;
        }
        Ok(fetched)
    }
}

/// Random candidate ids: stem 35, 36 or 37 followed by six random digits.
/// Ids that already have a directory in one of `skip_dirs` are dropped.
pub fn generate_game_ids(count: usize, skip_dirs: &[&Path]) -> Vec<i64> {
    let mut rng = rand::thread_rng();
    let mut ids = Vec::with_capacity(count);
    for _ in 0..count {
        let stem: i64 = [35, 36, 37][rng.gen_range(0..3)];
        let part: i64 = rng.gen_range(0..=999_999);
        ids.push(stem * 1_000_000 + part);
    }
    for dir in skip_dirs {
        let Ok(entries) = fs::read_dir(dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            if let Some(existing) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.parse::<i64>().ok())
            {
                if ids.contains(&existing) {
                    info!(game_id = existing, "game already sampled, skipping");
                    ids.retain(|id| *id != existing);
                }
            }
        }
    }
    ids
}

fn write_team_files(output_dir: &Path, game_id: i64, parsed: &[MatchParticipation]) -> Result<()> {
    let mut teams: BTreeMap<i32, Vec<&MatchParticipation>> = BTreeMap::new();
    for p in parsed {
        teams.entry(p.team_id).or_default().push(p);
    }
    let game_dir = output_dir.join(game_id.to_string());
    fs::create_dir_all(&game_dir)
        .with_context(|| format!("creating {}", game_dir.display()))?;
    for (team_id, members) in teams {
        let file = game_dir.join(format!("team_{team_id}.json"));
        let body = serde_json::to_string_pretty(&members)?;
        fs::write(&file, body).with_context(|| format!("writing {}", file.display()))?;
    }
    Ok(())
}
