use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use gitcorp_core::RunOutcome;
use gitcorp_github::{CredentialPool, GithubClient, GithubConfig};
use gitcorp_rules::RuleTable;
use gitcorp_storage::{CheckpointStore, MirrorCacheFile};
use gitcorp_sync::{
    connect, dump_db_to_json, spawn_interrupt_watcher, Ingestor, PgRowSource, PgSink,
    PooledTokens, SyncConfig,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "gitcorp")]
#[command(about = "Map active GitHub users to normalized company names")]
struct Cli {
    /// Postgres connection string; falls back to DATABASE_URL.
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Resume the ingestion loop: read logins from the source table, fetch
    /// profiles, normalize companies and upsert into the mapping table.
    UpdateDb {
        /// Source table of logins ranked by push count (may be
        /// schema-qualified).
        #[arg(long)]
        source: String,
        /// Schema holding the mapping table.
        #[arg(long, default_value = "github")]
        db_name: String,
        /// Mapping table name.
        #[arg(long, default_value = "user_to_company")]
        table_name: String,
        /// Mirror cache snapshot file.
        #[arg(long, default_value = "db.json")]
        db_json: PathBuf,
        /// Token file, one GitHub token per line.
        #[arg(long, default_value = "github_tokens")]
        tokens: PathBuf,
        /// Checkpoint file holding the count of consumed source rows.
        #[arg(long, default_value = "row_marker")]
        row_marker: PathBuf,
        /// Custom normalization rules (YAML); defaults to the built-in table.
        #[arg(long)]
        rules: Option<PathBuf>,
    },
    /// Rebuild the mirror cache snapshot from the mapping table.
    DbToJson {
        #[arg(long, default_value = "github")]
        db_name: String,
        #[arg(long, default_value = "user_to_company")]
        table_name: String,
        /// Output snapshot path.
        #[arg(long, default_value = "db.json")]
        out: PathBuf,
    },
}

async fn update_db(config: SyncConfig, rules_path: Option<PathBuf>) -> Result<ExitCode> {
    let rules = match rules_path {
        Some(path) => {
            let text = std::fs::read_to_string(&path)?;
            RuleTable::from_yaml(&text)?
        }
        None => RuleTable::builtin()?,
    };
    info!(rules = rules.len(), "normalization rules loaded");

    let client = Arc::new(GithubClient::new(GithubConfig {
        api_base: config.api_base.clone(),
        user_agent: config.user_agent.clone(),
        timeout: Duration::from_secs(config.http_timeout_secs),
    })?);
    let pool = CredentialPool::seed(&config.tokens_path).await?;
    let mut tokens = PooledTokens::new(pool, Arc::clone(&client));

    let pg = connect(&config.database_url).await?;
    let source = PgRowSource::new(pg.clone(), &config.source_table)?;
    let sink = Arc::new(PgSink::new(pg, &config.db_name, &config.table_name)?);

    let cache_file = MirrorCacheFile::new(&config.db_json);
    let cache = cache_file.load().await?;
    info!(entries = cache.len(), "mirror cache loaded");
    let checkpoints = CheckpointStore::new(&config.row_marker_path);

    let mut ingestor = Ingestor::new(
        source,
        client,
        sink,
        rules,
        checkpoints,
        cache_file,
        cache,
    );
    spawn_interrupt_watcher(ingestor.shutdown_flag(), ingestor.flush_flag());

    let summary = ingestor.run(&mut tokens).await?;
    println!(
        "run {} finished: outcome={:?} checkpoint={} flushed={} pending={} \
         inserts={} updates={} cache_hits={} not_found={} errors={}",
        summary.run_id,
        summary.outcome,
        summary.checkpoint,
        summary.rows_flushed,
        summary.rows_pending,
        summary.stats.inserts,
        summary.stats.updates,
        summary.stats.cache_hits,
        summary.stats.not_found,
        summary.stats.fetch_errors,
    );

    // An interrupt that still had rows to flush exits cleanly once they
    // are settled; an interrupt that found nothing to flush is the
    // failure case.
    if summary.outcome == RunOutcome::Interrupted && !summary.pending_at_interrupt {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

async fn db_to_json(database_url: &str, db_name: &str, table_name: &str, out: PathBuf) -> Result<()> {
    let pg = connect(database_url).await?;
    let snapshot = MirrorCacheFile::new(out);
    let count = dump_db_to_json(&pg, db_name, table_name, &snapshot).await?;
    println!("wrote {count} entries to {}", snapshot.path().display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let mut config = SyncConfig::from_env();
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }

    match cli.command {
        Commands::UpdateDb {
            source,
            db_name,
            table_name,
            db_json,
            tokens,
            row_marker,
            rules,
        } => {
            config.source_table = source;
            config.db_name = db_name;
            config.table_name = table_name;
            config.db_json = db_json;
            config.tokens_path = tokens;
            config.row_marker_path = row_marker;
            update_db(config, rules).await
        }
        Commands::DbToJson {
            db_name,
            table_name,
            out,
        } => {
            db_to_json(&config.database_url, &db_name, &table_name, out).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
