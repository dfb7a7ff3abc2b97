//! Bringing the store up to date with a commit of the CVE corpus
//!
//! Reading, updating and writing back every record one at a time would be
//! too slow, and a store can only write a bounded number of records per
//! transaction. So the files of a commit are walked once, grouped by
//! directory, and each directory is processed in batches, one transaction
//! per batch. A directory whose hash matches the one recorded after its last
//! complete update is skipped outright.

use crate::config::{FileNaming, UpdateConfig};
use crate::cve::Cve;
use crate::object::ObjectId;
use crate::source::{SourceError, TreeReader};
use crate::store::{
    CommitUpdateRecord, CveKey, CveRecord, DIRECTORY_HASH_IN_PROGRESS, Store, StoreError, Transaction,
    TriageState,
};
use crate::triage::TriagePredicate;
use crate::walk::{RepoFile, group_files_by_directory, repo_cve_files};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("malformed CVE filename {0:?}")]
    MalformedFilename(String),

    #[error("directory {0:?} is not contiguous in the sorted list of files")]
    NonContiguousDirectory(String),

    #[error("unknown triage state: {0:?}")]
    UnknownTriageState(String),

    #[error("source: {0}")]
    Source(#[from] SourceError),

    #[error("store: {0}")]
    Store(#[source] StoreError),

    #[error("decoding {path}: {source}")]
    Decode {
        path: String,
        source: serde_json::Error,
    },

    #[error("triaging {id}: {source}")]
    Triage { id: String, source: anyhow::Error },

    #[error("update cancelled")]
    Cancelled,

    #[error("{}", finalize_message(.processing, .source))]
    Finalize {
        /// The error that stopped processing, if any
        processing: Option<Box<UpdateError>>,
        source: StoreError,
    },
}

fn finalize_message(processing: &Option<Box<UpdateError>>, source: &StoreError) -> String {
    match processing {
        Some(e) => format!("update failed with {}; could not set update record: {}", e, source),
        None => format!("could not set update record: {}", source),
    }
}

impl From<StoreError> for UpdateError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::UnknownTriageState(s) => UpdateError::UnknownTriageState(s),
            other => UpdateError::Store(other),
        }
    }
}

impl UpdateError {
    /// Broken invariants, as opposed to failures of a collaborator.
    /// Re-running will not help.
    pub fn is_structural(&self) -> bool {
        match self {
            UpdateError::MalformedFilename(_)
            | UpdateError::NonContiguousDirectory(_)
            | UpdateError::UnknownTriageState(_) => true,
            UpdateError::Finalize {
                processing: Some(e),
                ..
            } => e.is_structural(),
            _ => false,
        }
    }
}

/// Set from another thread to stop an update between directories
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Whether a CVE file became a new record or changed an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Added,
    Modified,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Counts {
    processed: u64,
    added: u64,
    modified: u64,
}

/// New triage state (and reason, if it should be replaced) for a record
/// that changed while in `old`.
pub fn next_triage_state(old: TriageState, needs_issue: bool) -> (TriageState, Option<String>) {
    match (old, needs_issue) {
        (TriageState::NoActionNeeded, true) => (TriageState::NeedsIssue, None),
        (TriageState::NoActionNeeded, false) => (TriageState::NoActionNeeded, None),
        (TriageState::NeedsIssue, true) => (TriageState::NeedsIssue, None),
        (TriageState::NeedsIssue, false) => (TriageState::NoActionNeeded, None),
        // An issue was filed, so a person should revisit this CVE.
        (TriageState::IssueCreated | TriageState::UpdatedSinceIssueCreation, needs) => (
            TriageState::UpdatedSinceIssueCreation,
            Some(format!("CVE changed; needs issue = {}", needs)),
        ),
    }
}

/// Updates a store to match commits of a CVE corpus.
pub struct Updater<'a, R: ?Sized, S, T: ?Sized> {
    reader: &'a R,
    store: &'a S,
    triage: &'a T,
    batch_size: usize,
    naming: FileNaming,
    cancellation: Option<Cancellation>,
}

impl<'a, R, S, T> Updater<'a, R, S, T>
where
    R: TreeReader + ?Sized,
    S: Store,
    T: TriagePredicate + ?Sized,
{
    pub fn new(reader: &'a R, store: &'a S, triage: &'a T) -> Self {
        let defaults = UpdateConfig::default();
        Self {
            reader,
            store,
            triage,
            batch_size: defaults.batch_size,
            naming: defaults.naming,
            cancellation: None,
        }
    }

    pub fn with_config(mut self, config: &UpdateConfig) -> Self {
        self.batch_size = config.batch_size.max(1);
        self.naming = config.naming.clone();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = Some(cancellation);
        self
    }

    /// Compare the corpus at `commit` with the store and update the store
    /// to match. Returns the final run record.
    ///
    /// A run record is created once the commit's files have been listed and
    /// is updated after every directory, so a failed run leaves its progress
    /// and error behind in the store.
    pub fn update(&self, commit: &ObjectId) -> Result<CommitUpdateRecord, UpdateError> {
        tracing::info!("update starting: commit {}", commit);
        let result = self.run(commit);
        match &result {
            Ok(record) => tracing::info!(
                "update succeeded: commit {}, {} processed, {} added, {} modified",
                commit,
                record.num_processed,
                record.num_added,
                record.num_modified
            ),
            Err(e) => tracing::error!("update of commit {} failed: {}", commit, e),
        }
        result
    }

    fn run(&self, commit_id: &ObjectId) -> Result<CommitUpdateRecord, UpdateError> {
        let commit = self.reader.commit(commit_id)?;

        // Reading all the files up front and comparing them to the store in
        // bulk is cheaper than handling each file as it is found.
        let files = repo_cve_files(self.reader, &commit.tree_id, &self.naming)?;
        let groups = group_files_by_directory(&files)?;

        let mut record = CommitUpdateRecord::new(commit_id.to_string(), commit.time, files.len() as u64);
        self.store.create_commit_update_record(&mut record)?;

        let processing = self.update_directories(&groups, commit_id, &mut record);
        record.ended_at = Some(Utc::now());
        if let Err(e) = &processing {
            record.error = Some(e.to_string());
        }
        match (processing, self.store.set_commit_update_record(&record)) {
            (Ok(()), Ok(())) => Ok(record),
            (Err(e), Ok(())) => Err(e),
            (processing, Err(source)) => Err(UpdateError::Finalize {
                processing: processing.err().map(Box::new),
                source,
            }),
        }
    }

    fn update_directories(
        &self,
        groups: &[&[RepoFile]],
        commit: &ObjectId,
        record: &mut CommitUpdateRecord,
    ) -> Result<(), UpdateError> {
        for dir_files in groups {
            if self.cancellation.as_ref().is_some_and(Cancellation::is_cancelled) {
                tracing::warn!("update cancelled before directory {}", dir_files[0].dir_path);
                return Err(UpdateError::Cancelled);
            }
            let mut counts = Counts::default();
            let result = self.update_directory(dir_files, commit, &mut counts);
            record.num_processed += counts.processed;
            record.num_added += counts.added;
            record.num_modified += counts.modified;
            if let Err(e) = &result {
                record.error = Some(e.to_string());
            }
            let persisted = self.store.set_commit_update_record(record);
            result?;
            persisted?;
        }
        Ok(())
    }

    fn update_directory(
        &self,
        dir_files: &[RepoFile],
        commit: &ObjectId,
        counts: &mut Counts,
    ) -> Result<(), UpdateError> {
        let Some(first) = dir_files.first() else {
            return Ok(());
        };
        let dir_path = first.dir_path.as_str();
        let dir_hash = first.tree_hash.as_str();

        // A stored hash means the directory was fully processed at that hash.
        if self.store.get_directory_hash(dir_path)?.as_deref() == Some(dir_hash) {
            tracing::info!("skipping directory {} because the hashes match", dir_path);
            return Ok(());
        }
        // Until every batch commits the marker must not match any real hash,
        // so an interrupted run redoes the whole directory.
        self.store.set_directory_hash(dir_path, DIRECTORY_HASH_IN_PROGRESS)?;

        for batch in dir_files.chunks(self.batch_size) {
            let (adds, mods) = self.update_batch(batch, commit)?;
            counts.processed += batch.len() as u64;
            counts.added += adds;
            counts.modified += mods;
        }

        self.store.set_directory_hash(dir_path, dir_hash)?;
        Ok(())
    }

    fn update_batch(&self, batch: &[RepoFile], commit: &ObjectId) -> Result<(u64, u64), UpdateError> {
        let (Some(first), Some(last)) = (batch.first(), batch.last()) else {
            return Ok((0, 0));
        };
        let mut adds = 0;
        let mut mods = 0;
        self.store.run_transaction(|tx| {
            // The store may run this body more than once; only the run that
            // commits may count.
            adds = 0;
            mods = 0;

            // The batch is sorted, so one range read covers it. Records are
            // matched on the same numeric key the read and the store use.
            let existing: HashMap<CveKey, CveRecord> = tx
                .get_cve_records(first.key(), last.key())?
                .into_iter()
                .map(|r| (r.key(), r))
                .collect();
            for f in batch {
                let old = existing.get(&f.key());
                if old.is_some_and(|r| r.blob_hash == f.blob_hash.as_str()) {
                    continue;
                }
                match self.handle_cve(f, old, commit, tx)? {
                    Change::Added => adds += 1,
                    Change::Modified => mods += 1,
                }
            }
            Ok::<(), UpdateError>(())
        })?;
        tracing::info!(
            "update transaction {}..{}: {} adds, {} mods",
            first.id(),
            last.id(),
            adds,
            mods
        );
        Ok((adds, mods))
    }

    /// Add or modify the record for one changed CVE file.
    fn handle_cve(
        &self,
        f: &RepoFile,
        old: Option<&CveRecord>,
        commit: &ObjectId,
        tx: &mut dyn Transaction,
    ) -> Result<Change, UpdateError> {
        let path = f.path();
        let data = self.reader.blob(&f.blob_hash)?;
        let cve = Cve::from_json(&data).map_err(|source| UpdateError::Decode {
            path: path.clone(),
            source,
        })?;
        if cve.metadata.id != f.id() {
            tracing::warn!("{} declares id {}", path, cve.metadata.id);
        }
        let needs_issue = if cve.is_public() {
            self.triage
                .needs_issue(&cve)
                .map_err(|source| UpdateError::Triage {
                    id: f.id().to_string(),
                    source,
                })?
        } else {
            false
        };

        let Some(old) = old else {
            let record = CveRecord {
                id: f.id().to_string(),
                year: f.year,
                number: f.number,
                path,
                blob_hash: f.blob_hash.to_string(),
                cve_state: cve.state(),
                commit_hash: commit.to_string(),
                triage_state: if needs_issue {
                    TriageState::NeedsIssue
                } else {
                    TriageState::NoActionNeeded
                },
                triage_state_reason: None,
            };
            tx.create_cve_record(&record)?;
            tracing::debug!("added {} as {}", record.id, record.triage_state);
            return Ok(Change::Added);
        };

        let mut modified = old.clone();
        modified.path = path;
        modified.blob_hash = f.blob_hash.to_string();
        modified.cve_state = cve.state();
        modified.commit_hash = commit.to_string();
        let (state, reason) = next_triage_state(old.triage_state, needs_issue);
        modified.triage_state = state;
        if reason.is_some() {
            modified.triage_state_reason = reason;
        }
        tx.set_cve_record(&modified)?;
        tracing::debug!(
            "modified {}: {} -> {}",
            modified.id,
            old.triage_state,
            modified.triage_state
        );
        Ok(Change::Modified)
    }
}
