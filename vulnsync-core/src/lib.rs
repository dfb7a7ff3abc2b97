//! VulnSync Core Library
//!
//! Keeps a store of CVE records in step with a git-hosted CVE corpus:
//! - Object model and tree readers (in-memory and git)
//! - CVE JSON records and triage predicates
//! - Store abstraction with in-memory and SQLite backends
//! - Incremental updater with per-directory hash gating and batched writes

pub mod object;
pub mod source;
pub mod git_source;
pub mod cve;
pub mod triage;
pub mod store;
pub mod memstore;
pub mod sqlite_store;
pub mod config;
pub mod walk;
pub mod update;

pub use object::{Blob, Commit, ObjectId, ObjectKind, Tree, TreeEntry};
pub use source::{CommitInfo, MemorySource, SourceError, TreeReader};
pub use git_source::GitSource;
pub use cve::{Cve, CveState};
pub use triage::{ReferenceTriage, TriagePredicate};
pub use store::{
    CommitUpdateRecord, CveKey, CveRecord, Store, StoreError, Transaction, TriageState,
    DIRECTORY_HASH_IN_PROGRESS,
};
pub use memstore::MemoryStore;
pub use sqlite_store::SqliteStore;
pub use config::{ConfigError, FileNaming, TriageConfig, UpdateConfig, MAX_BATCH_SIZE};
pub use walk::{group_files_by_directory, repo_cve_files, RepoFile};
pub use update::{next_triage_state, Cancellation, Change, UpdateError, Updater};
