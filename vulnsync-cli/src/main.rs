//! vulnsync: keeps a store of CVE records in step with a git CVE corpus.
//!
//! # Usage
//!
//! ```bash
//! # Bring the store up to date with the corpus HEAD
//! vulnsync update --repo /path/to/cvelist --db vulnsync.sqlite
//!
//! # Show recent update runs
//! vulnsync runs --db vulnsync.sqlite
//!
//! # List CVEs that need an issue
//! vulnsync records --db vulnsync.sqlite --state needs_issue
//!
//! # Record that an issue was filed
//! vulnsync set-state --db vulnsync.sqlite CVE-2021-3114 issue_created --reason "golang/vulndb#12"
//! ```

mod report;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use vulnsync_core::{
    Cancellation, CommitUpdateRecord, GitSource, ReferenceTriage, SqliteStore, Store, TriageState,
    UpdateConfig, Updater,
};

#[derive(Parser, Debug)]
#[command(name = "vulnsync")]
#[command(author = "vulnsync Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Incremental CVE corpus sync and triage")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Update the store to match a commit of the CVE corpus
    Update {
        /// Path to the git repository holding the corpus
        #[arg(short, long)]
        repo: PathBuf,
        /// Path to the SQLite store
        #[arg(short, long)]
        db: PathBuf,
        /// Revision to update to
        #[arg(short, long, default_value = "HEAD")]
        commit: String,
        /// Config file (default: vulnsync.json next to the store)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Show update runs, newest first
    Runs {
        /// Path to the SQLite store
        #[arg(short, long)]
        db: PathBuf,
        /// Only runs for this commit hash
        #[arg(long)]
        commit: Option<String>,
        /// Maximum number of runs to show
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },

    /// List CVE records
    Records {
        /// Path to the SQLite store
        #[arg(short, long)]
        db: PathBuf,
        /// Only records in this triage state
        #[arg(long, value_parser = parse_triage_state)]
        state: Option<TriageState>,
    },

    /// Set the triage state of a record by hand
    #[command(name = "set-state")]
    SetState {
        /// Path to the SQLite store
        #[arg(short, long)]
        db: PathBuf,
        /// CVE id, e.g. CVE-2021-3114
        id: String,
        /// New triage state
        #[arg(value_parser = parse_triage_state)]
        state: TriageState,
        /// Why the state changed
        #[arg(long)]
        reason: Option<String>,
    },
}

fn parse_triage_state(s: &str) -> std::result::Result<TriageState, String> {
    s.parse::<TriageState>().map_err(|e| {
        let valid: Vec<&str> = TriageState::ALL.iter().map(TriageState::as_str).collect();
        format!("{} (expected one of: {})", e, valid.join(", "))
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("vulnsync=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Update {
            repo,
            db,
            commit,
            config,
        } => cmd_update(repo, db, commit, config).await,

        Commands::Runs { db, commit, limit } => cmd_runs(&db, commit, limit),

        Commands::Records { db, state } => cmd_records(&db, state),

        Commands::SetState {
            db,
            id,
            state,
            reason,
        } => cmd_set_state(&db, &id, state, reason),
    }
}

async fn cmd_update(repo: PathBuf, db: PathBuf, rev: String, config: Option<PathBuf>) -> Result<()> {
    let config = match &config {
        Some(path) => UpdateConfig::load(path)?,
        None => UpdateConfig::load_for_db(&db)?,
    };

    let cancel = Cancellation::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; stopping after the current directory");
            on_interrupt.cancel();
        }
    });

    println!("Updating {} from {} ({})", db.display(), repo.display(), rev);
    let run = tokio::task::spawn_blocking(move || run_update(&repo, &db, &rev, &config, cancel))
        .await
        .context("update task panicked")??;

    report::print_run_summary(&run, &mut std::io::stdout())?;
    Ok(())
}

fn run_update(
    repo: &Path,
    db: &Path,
    rev: &str,
    config: &UpdateConfig,
    cancel: Cancellation,
) -> Result<CommitUpdateRecord> {
    let source = GitSource::open(repo).with_context(|| format!("opening corpus {}", repo.display()))?;
    let commit = source
        .resolve(rev)
        .with_context(|| format!("resolving revision {}", rev))?;
    let store = open_store(db)?;
    let triage = ReferenceTriage::new(&config.triage.patterns);

    let run = Updater::new(&source, &store, &triage)
        .with_config(config)
        .with_cancellation(cancel)
        .update(&commit)
        .with_context(|| format!("updating to commit {}", commit))?;
    Ok(run)
}

fn open_store(db: &Path) -> Result<SqliteStore> {
    SqliteStore::open(db).with_context(|| format!("opening store {}", db.display()))
}

fn cmd_runs(db: &Path, commit: Option<String>, limit: usize) -> Result<()> {
    let store = open_store(db)?;
    let mut runs = match commit {
        Some(hash) => store.commit_update_records_for(&hash)?,
        None => store.list_commit_update_records(limit)?,
    };
    runs.truncate(limit);
    report::print_runs(&runs, &mut std::io::stdout())
}

fn cmd_records(db: &Path, state: Option<TriageState>) -> Result<()> {
    let store = open_store(db)?;
    let records = match state {
        Some(state) => store.list_cve_records_with_triage_state(state)?,
        None => store.list_cve_records()?,
    };
    report::print_records(&records, &mut std::io::stdout())
}

fn cmd_set_state(db: &Path, id: &str, state: TriageState, reason: Option<String>) -> Result<()> {
    let store = open_store(db)?;
    store
        .set_triage_state(id, state, reason.as_deref())
        .with_context(|| format!("setting triage state of {}", id))?;
    tracing::info!("Set {} to {}", id, state);
    println!("{} is now {}", id, state);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_set_state() {
        let cli = Cli::parse_from([
            "vulnsync",
            "set-state",
            "--db",
            "store.sqlite",
            "CVE-2021-3114",
            "issue_created",
            "--reason",
            "filed",
        ]);
        match cli.command {
            Commands::SetState { id, state, reason, .. } => {
                assert_eq!(id, "CVE-2021-3114");
                assert_eq!(state, TriageState::IssueCreated);
                assert_eq!(reason.as_deref(), Some("filed"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_rejects_unknown_state() {
        let err = Cli::try_parse_from(["vulnsync", "records", "--db", "s.sqlite", "--state", "archived"]).unwrap_err();
        assert!(err.to_string().contains("needs_issue"));
    }

    #[test]
    fn test_update_defaults_to_head() {
        let cli = Cli::parse_from(["vulnsync", "update", "--repo", "corpus", "--db", "s.sqlite"]);
        match cli.command {
            Commands::Update { commit, config, .. } => {
                assert_eq!(commit, "HEAD");
                assert!(config.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_set_state_then_list() {
        let tmp = tempfile::TempDir::new().unwrap();
        let db = tmp.path().join("store.sqlite");
        let err = cmd_set_state(&db, "CVE-2021-0001", TriageState::IssueCreated, None).unwrap_err();
        assert!(format!("{:#}", err).contains("CVE-2021-0001"));
        cmd_records(&db, Some(TriageState::NeedsIssue)).unwrap();
        cmd_runs(&db, None, 5).unwrap();
    }
}
