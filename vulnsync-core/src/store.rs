//! Store abstraction for synced CVE records
//!
//! A store holds three kinds of data:
//! - CVE records, read and written in atomic batches through `Transaction`
//! - directory hash markers, one per corpus directory
//! - commit update records, one per run of the updater

use crate::cve::CveState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Marker written for a directory while it is being processed. Real
/// directory hashes are hex digests, so this can never match one.
pub const DIRECTORY_HASH_IN_PROGRESS: &str = "in progress";

/// Errors that can occur during store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unknown triage state: {0:?}")]
    UnknownTriageState(String),

    #[error("CVE record {0} already exists")]
    AlreadyExists(String),

    #[error("CVE record {0} not found")]
    NotFound(String),

    #[error("transaction exceeds the limit of {limit} writes")]
    TooManyWrites { limit: usize },

    #[error("commit update record has no id; create it first")]
    MissingRunId,

    #[error("corrupt stored value: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Where a CVE stands in the issue-filing workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriageState {
    /// Needs no issue
    NoActionNeeded,
    /// Needs an issue filed
    NeedsIssue,
    /// An issue was filed; set outside the updater
    IssueCreated,
    /// Changed after its issue was filed; a person has to look at it again
    UpdatedSinceIssueCreation,
}

impl TriageState {
    pub const ALL: [TriageState; 4] = [
        TriageState::NoActionNeeded,
        TriageState::NeedsIssue,
        TriageState::IssueCreated,
        TriageState::UpdatedSinceIssueCreation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TriageState::NoActionNeeded => "no_action_needed",
            TriageState::NeedsIssue => "needs_issue",
            TriageState::IssueCreated => "issue_created",
            TriageState::UpdatedSinceIssueCreation => "updated_since_issue_creation",
        }
    }
}

impl fmt::Display for TriageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriageState {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        TriageState::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| StoreError::UnknownTriageState(s.to_string()))
    }
}

/// Numeric sort key of a CVE id: `CVE-<year>-<number>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CveKey {
    pub year: u32,
    pub number: u64,
}

impl CveKey {
    pub fn new(year: u32, number: u64) -> Self {
        Self { year, number }
    }
}

/// A CVE as tracked in the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CveRecord {
    /// The CVE id, e.g. `CVE-2021-3114`
    pub id: String,
    pub year: u32,
    pub number: u64,
    /// Path of the CVE file in the corpus
    pub path: String,
    /// Hash of the file content the record was last updated from
    pub blob_hash: String,
    pub cve_state: CveState,
    /// Commit at which the record was last touched
    pub commit_hash: String,
    pub triage_state: TriageState,
    pub triage_state_reason: Option<String>,
}

impl CveRecord {
    pub fn key(&self) -> CveKey {
        CveKey::new(self.year, self.number)
    }
}

/// Progress and outcome of one run of the updater
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitUpdateRecord {
    /// Assigned by the store on creation
    pub id: Option<i64>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub commit_hash: String,
    pub commit_time: DateTime<Utc>,
    /// Number of CVE files in the commit
    pub num_total: u64,
    /// Files in directories that were not skipped
    pub num_processed: u64,
    pub num_added: u64,
    pub num_modified: u64,
    pub error: Option<String>,
}

impl CommitUpdateRecord {
    pub fn new(commit_hash: String, commit_time: DateTime<Utc>, num_total: u64) -> Self {
        Self {
            id: None,
            started_at: Utc::now(),
            ended_at: None,
            commit_hash,
            commit_time,
            num_total,
            num_processed: 0,
            num_added: 0,
            num_modified: 0,
            error: None,
        }
    }
}

/// Reads and writes of CVE records inside one atomic transaction
pub trait Transaction {
    /// Add a new record; fails if one with the same id exists
    fn create_cve_record(&mut self, record: &CveRecord) -> Result<()>;

    /// Overwrite an existing record
    fn set_cve_record(&mut self, record: &CveRecord) -> Result<()>;

    /// Records whose keys fall in `[start, end]`, in key order
    fn get_cve_records(&mut self, start: CveKey, end: CveKey) -> Result<Vec<CveRecord>>;
}

/// Durable storage for CVE records, directory markers and run records.
pub trait Store {
    /// Run `f` in a transaction. Either all of its writes are committed or,
    /// if it fails, none are. A store may run `f` more than once.
    fn run_transaction<E, F>(&self, f: F) -> std::result::Result<(), E>
    where
        E: From<StoreError>,
        F: FnMut(&mut dyn Transaction) -> std::result::Result<(), E>;

    /// Stored hash for a corpus directory, if any
    fn get_directory_hash(&self, dir: &str) -> Result<Option<String>>;

    fn set_directory_hash(&self, dir: &str, hash: &str) -> Result<()>;

    /// Persist a new run record and assign its id
    fn create_commit_update_record(&self, record: &mut CommitUpdateRecord) -> Result<()>;

    /// Overwrite a run record created earlier
    fn set_commit_update_record(&self, record: &CommitUpdateRecord) -> Result<()>;

    /// Most recent run records first
    fn list_commit_update_records(&self, limit: usize) -> Result<Vec<CommitUpdateRecord>>;

    /// Run records for one commit, most recent first
    fn commit_update_records_for(&self, commit_hash: &str) -> Result<Vec<CommitUpdateRecord>>;

    fn get_cve_record(&self, id: &str) -> Result<Option<CveRecord>>;

    /// All records, in key order
    fn list_cve_records(&self) -> Result<Vec<CveRecord>>;

    /// Records in a given triage state, in key order
    fn list_cve_records_with_triage_state(&self, state: TriageState) -> Result<Vec<CveRecord>>;

    /// Move a record to a new triage state. This is how issue filing and
    /// human review feed back into the workflow.
    fn set_triage_state(&self, id: &str, state: TriageState, reason: Option<&str>) -> Result<()>;
}
