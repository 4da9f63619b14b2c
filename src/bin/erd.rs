use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use er_game_data::ingest::{Driver, ErApiClient};
use er_game_data::logging::init_tracing;
use er_game_data::storage::{Db, MatchStore, MemoryStore, PgStore};
use er_game_data::util::env;

#[derive(Parser, Debug)]
#[command(name = "erd", version, about = "Eternal Return match data ingester")]
struct Cli {
    /// Use the in-memory store instead of Postgres (nothing is persisted)
    #[arg(long, global = true, default_value_t = false)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Fetch user ids by nickname and insert them
    InsertUsers {
        /// Username(s) to fetch and insert
        #[arg(required = true)]
        usernames: Vec<String>,
        /// Force update even if the user exists
        #[arg(long, short = 'f', default_value_t = false)]
        force: bool,
    },
    /// Fetch and persist a user's recent matches
    FetchUserGames {
        /// Username to fetch games for
        username: String,
        /// Maximum number of participations to persist
        #[arg(long, default_value_t = 10)]
        limit: u64,
    },
    /// Fetch one match by id and persist every participation
    ProcessGame {
        game_id: i64,
    },
    /// Replay batch JSON files from a directory
    ProcessJsonFiles {
        /// Directory containing JSON files to process (default: MATCHES_PATH)
        #[arg(long)]
        directory: Option<PathBuf>,
        /// Directory to move processed files (default: ARCHIVE_PATH)
        #[arg(long)]
        archive_dir: Option<PathBuf>,
        /// Directory to move files with errors (default: ERROR_PATH)
        #[arg(long)]
        error_dir: Option<PathBuf>,
        /// Concurrent file workers (default: FILE_WORKERS or 3)
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Replay a single batch JSON file
    ProcessSingleFile {
        /// Path to the JSON file to process
        file_path: PathBuf,
        #[arg(long)]
        archive_dir: Option<PathBuf>,
        #[arg(long)]
        error_dir: Option<PathBuf>,
    },
    /// Sample random game ids and write accepted matches as team JSON files
    RetrieveGames {
        /// Number of game ids to generate and fetch
        #[arg(long, default_value_t = 100)]
        count: usize,
        /// Directory to write team-grouped output to
        #[arg(long, default_value = "output_examples")]
        output_dir: PathBuf,
        /// Delay between fetches, in milliseconds
        #[arg(long, default_value_t = 1330)]
        delay_ms: u64,
    },
}

impl Commands {
    fn needs_api_key(&self) -> bool {
        !matches!(
            self,
            Commands::ProcessJsonFiles { .. } | Commands::ProcessSingleFile { .. }
        )
    }
}

fn env_path(explicit: Option<PathBuf>, key: &str, default: &str) -> PathBuf {
    explicit
        .or_else(|| env::env_opt(key).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(default))
}

async fn run<S: MatchStore>(command: Commands, driver: Driver<S>) -> Result<()> {
    match command {
        Commands::InsertUsers { usernames, force } => {
            let summary = driver.insert_users(&usernames, force).await?;
            info!(?summary, "insert-users done");
        }
        Commands::FetchUserGames { username, limit } => {
            let summary = driver.fetch_user_games(&username, limit).await?;
            info!(?summary, "fetch-user-games done");
        }
        Commands::ProcessGame { game_id } => {
            let summary = driver.process_game(game_id).await?;
            info!(?summary, "process-game done");
        }
        Commands::ProcessJsonFiles {
            directory,
            archive_dir,
            error_dir,
            workers,
        } => {
            let directory = env_path(directory, "MATCHES_PATH", "matches");
            let archive_dir = env_path(archive_dir, "ARCHIVE_PATH", "matches/archive");
            let error_dir = env_path(error_dir, "ERROR_PATH", "matches/errors");
            let workers = workers.unwrap_or_else(|| env::env_parse("FILE_WORKERS", 3));
            let summary = driver
                .process_directory(&directory, &archive_dir, &error_dir, workers)
                .await?;
            info!(?summary, "process-json-files done");
        }
        Commands::ProcessSingleFile {
            file_path,
            archive_dir,
            error_dir,
        } => {
            let archive_dir = env_path(archive_dir, "ARCHIVE_PATH", "matches/archive");
            let error_dir = env_path(error_dir, "ERROR_PATH", "matches/errors");
            let (disposition, summary) = driver
                .process_single_file(&file_path, &archive_dir, &error_dir)
                .await?;
            info!(?disposition, ?summary, "process-single-file done");
        }
        Commands::RetrieveGames {
            count,
            output_dir,
            delay_ms,
        } => {
            let archive_dir = env::env_opt("ARCHIVE_PATH").map(PathBuf::from);
            let summary = driver
                .sample_games(
                    count,
                    &output_dir,
                    Duration::from_millis(delay_ms),
                    archive_dir.as_deref(),
                )
                .await?;
            info!(?summary, "retrieve-games done");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env::init_env();
    init_tracing("info,sqlx=warn")?;
    let cli = Cli::parse();

    let required: &[&str] = if cli.command.needs_api_key() {
        &["ER_API_KEY"]
    } else {
        &[]
    };
    env::preflight_check(
        "erd",
        required,
        &[
            "ER_API_BASE_URL",
            "CURRENT_SEASON",
            "MATCHES_PATH",
            "ARCHIVE_PATH",
            "ERROR_PATH",
            "FILE_WORKERS",
            "DATABASE_URL",
        ],
    )?;

    let base_url = env::env_opt("ER_API_BASE_URL")
        .unwrap_or_else(|| "https://open-api.bser.io".to_string());
    let api_key = env::env_opt("ER_API_KEY").unwrap_or_default();
    let api = ErApiClient::new(&base_url, api_key, None)?;
    let current_season: i32 = env::env_parse("CURRENT_SEASON", 25);

    if cli.dry_run {
        info!("dry run: using in-memory store");
        let driver = Driver::new(api, Arc::new(MemoryStore::new()), current_season);
        run(cli.command, driver).await
    } else {
        let db = Db::connect(&env::db_url()?, env::env_parse("DB_MAX_CONNECTIONS", 5)).await?;
        let driver = Driver::new(api, Arc::new(PgStore::new(db)), current_season);
        run(cli.command, driver).await
    }
}
