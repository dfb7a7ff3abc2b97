//! In-memory `Store`
//!
//! Transactions run against a copy of the record map that replaces the
//! original only when the body succeeds. The store can be told to cap the
//! number of writes per transaction and to run each transaction body more
//! than once, which is what contended document stores do.

use crate::store::{
    CommitUpdateRecord, CveKey, CveRecord, Result, Store, StoreError, Transaction, TriageState,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct MemoryState {
    records: BTreeMap<CveKey, CveRecord>,
    directory_hashes: HashMap<String, String>,
    runs: Vec<CommitUpdateRecord>,
}

pub struct MemoryStore {
    state: Mutex<MemoryState>,
    write_limit: Option<usize>,
    body_runs: usize,
    transactions: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            write_limit: None,
            body_runs: 1,
            transactions: AtomicUsize::new(0),
        }
    }

    /// Fail any transaction that writes more than `limit` records
    pub fn with_write_limit(mut self, limit: usize) -> Self {
        self.write_limit = Some(limit);
        self
    }

    /// Run every transaction body `runs` times, keeping only the last run
    pub fn with_body_runs(mut self, runs: usize) -> Self {
        self.body_runs = runs.max(1);
        self
    }

    /// Number of transactions committed or attempted so far
    pub fn transaction_count(&self) -> usize {
        self.transactions.load(Ordering::SeqCst)
    }

    /// Snapshot of all directory markers
    pub fn directory_hashes(&self) -> Result<HashMap<String, String>> {
        Ok(self.lock()?.directory_hashes.clone())
    }

    /// Put a record directly, bypassing transactions (fixtures)
    pub fn insert_record(&self, record: CveRecord) -> Result<()> {
        self.lock()?.records.insert(record.key(), record);
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".into()))
    }
}

struct MemoryTransaction<'a> {
    records: &'a mut BTreeMap<CveKey, CveRecord>,
    writes: usize,
    limit: Option<usize>,
}

impl MemoryTransaction<'_> {
    fn count_write(&mut self) -> Result<()> {
        self.writes += 1;
        match self.limit {
            Some(limit) if self.writes > limit => Err(StoreError::TooManyWrites { limit }),
            _ => Ok(()),
        }
    }
}

impl Transaction for MemoryTransaction<'_> {
    fn create_cve_record(&mut self, record: &CveRecord) -> Result<()> {
        self.count_write()?;
        if self.records.contains_key(&record.key()) {
            return Err(StoreError::AlreadyExists(record.id.clone()));
        }
        self.records.insert(record.key(), record.clone());
        Ok(())
    }

    fn set_cve_record(&mut self, record: &CveRecord) -> Result<()> {
        self.count_write()?;
        self.records.insert(record.key(), record.clone());
        Ok(())
    }

    fn get_cve_records(&mut self, start: CveKey, end: CveKey) -> Result<Vec<CveRecord>> {
        if start > end {
            return Ok(Vec::new());
        }
        Ok(self.records.range(start..=end).map(|(_, r)| r.clone()).collect())
    }
}

impl Store for MemoryStore {
    fn run_transaction<E, F>(&self, mut f: F) -> std::result::Result<(), E>
    where
        E: From<StoreError>,
        F: FnMut(&mut dyn Transaction) -> std::result::Result<(), E>,
    {
        self.transactions.fetch_add(1, Ordering::SeqCst);
        let mut attempt = 0;
        loop {
            attempt += 1;
            // The lock is released while the body runs so it can consult
            // markers and run records through the store.
            let mut working = self.lock()?.records.clone();
            let mut tx = MemoryTransaction {
                records: &mut working,
                writes: 0,
                limit: self.write_limit,
            };
            f(&mut tx)?;
            if attempt >= self.body_runs {
                self.lock()?.records = working;
                return Ok(());
            }
        }
    }

    fn get_directory_hash(&self, dir: &str) -> Result<Option<String>> {
        Ok(self.lock()?.directory_hashes.get(dir).cloned())
    }

    fn set_directory_hash(&self, dir: &str, hash: &str) -> Result<()> {
        self.lock()?
            .directory_hashes
            .insert(dir.to_string(), hash.to_string());
        Ok(())
    }

    fn create_commit_update_record(&self, record: &mut CommitUpdateRecord) -> Result<()> {
        let mut state = self.lock()?;
        record.id = Some(state.runs.len() as i64 + 1);
        state.runs.push(record.clone());
        Ok(())
    }

    fn set_commit_update_record(&self, record: &CommitUpdateRecord) -> Result<()> {
        let id = record.id.ok_or(StoreError::MissingRunId)?;
        let mut state = self.lock()?;
        let slot = state
            .runs
            .iter_mut()
            .find(|r| r.id == Some(id))
            .ok_or_else(|| StoreError::Backend(format!("commit update record {} not found", id)))?;
        *slot = record.clone();
        Ok(())
    }

    fn list_commit_update_records(&self, limit: usize) -> Result<Vec<CommitUpdateRecord>> {
        Ok(self.lock()?.runs.iter().rev().take(limit).cloned().collect())
    }

    fn commit_update_records_for(&self, commit_hash: &str) -> Result<Vec<CommitUpdateRecord>> {
        Ok(self
            .lock()?
            .runs
            .iter()
            .rev()
            .filter(|r| r.commit_hash == commit_hash)
            .cloned()
            .collect())
    }

    fn get_cve_record(&self, id: &str) -> Result<Option<CveRecord>> {
        Ok(self.lock()?.records.values().find(|r| r.id == id).cloned())
    }

    fn list_cve_records(&self) -> Result<Vec<CveRecord>> {
        Ok(self.lock()?.records.values().cloned().collect())
    }

    fn list_cve_records_with_triage_state(&self, state: TriageState) -> Result<Vec<CveRecord>> {
        Ok(self
            .lock()?
            .records
            .values()
            .filter(|r| r.triage_state == state)
            .cloned()
            .collect())
    }

    fn set_triage_state(&self, id: &str, state: TriageState, reason: Option<&str>) -> Result<()> {
        let mut guard = self.lock()?;
        let record = guard
            .records
            .values_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        record.triage_state = state;
        record.triage_state_reason = reason.map(str::to_string);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cve::CveState;

    fn record(year: u32, number: u64) -> CveRecord {
        CveRecord {
            id: format!("CVE-{}-{:04}", year, number),
            year,
            number,
            path: format!("{}/CVE-{}-{:04}.json", year, year, number),
            blob_hash: "aa".into(),
            cve_state: CveState::Public,
            commit_hash: "c1".into(),
            triage_state: TriageState::NoActionNeeded,
            triage_state_reason: None,
        }
    }

    #[test]
    fn test_failed_transaction_rolls_back() {
        let store = MemoryStore::new();
        let res: std::result::Result<(), StoreError> = store.run_transaction(|tx| {
            tx.create_cve_record(&record(2021, 1))?;
            Err(StoreError::Backend("boom".into()))
        });
        assert!(res.is_err());
        assert!(store.list_cve_records().unwrap().is_empty());
    }

    #[test]
    fn test_range_read_is_numeric() {
        let store = MemoryStore::new();
        for n in [9, 10001, 100009] {
            store.insert_record(record(2014, n)).unwrap();
        }
        store.insert_record(record(2015, 1)).unwrap();

        let mut got = Vec::new();
        store
            .run_transaction::<StoreError, _>(|tx| {
                got = tx.get_cve_records(CveKey::new(2014, 10), CveKey::new(2014, 200000))?;
                Ok(())
            })
            .unwrap();
        let numbers: Vec<u64> = got.iter().map(|r| r.number).collect();
        assert_eq!(numbers, vec![10001, 100009]);
    }

    #[test]
    fn test_create_rejects_duplicates() {
        let store = MemoryStore::new();
        store.insert_record(record(2021, 1)).unwrap();
        let res = store.run_transaction(|tx| tx.create_cve_record(&record(2021, 1)));
        assert!(matches!(res, Err(StoreError::AlreadyExists(_))));
    }

    #[test]
    fn test_write_limit() {
        let store = MemoryStore::new().with_write_limit(2);
        let res = store.run_transaction::<StoreError, _>(|tx| {
            for n in 1..=3 {
                tx.create_cve_record(&record(2021, n))?;
            }
            Ok(())
        });
        assert!(matches!(res, Err(StoreError::TooManyWrites { limit: 2 })));
        assert!(store.list_cve_records().unwrap().is_empty());
    }

    #[test]
    fn test_body_runs_repeat_the_closure() {
        let store = MemoryStore::new().with_body_runs(3);
        let mut calls = 0;
        store
            .run_transaction::<StoreError, _>(|tx| {
                calls += 1;
                tx.create_cve_record(&record(2021, 1))
            })
            .unwrap();
        assert_eq!(calls, 3);
        assert_eq!(store.list_cve_records().unwrap().len(), 1);
        assert_eq!(store.transaction_count(), 1);
    }

    #[test]
    fn test_run_records() {
        let store = MemoryStore::new();
        let mut run = CommitUpdateRecord::new("abc".into(), chrono::Utc::now(), 3);
        assert!(matches!(store.set_commit_update_record(&run), Err(StoreError::MissingRunId)));
        store.create_commit_update_record(&mut run).unwrap();
        assert_eq!(run.id, Some(1));
        run.num_added = 2;
        store.set_commit_update_record(&run).unwrap();

        let mut other = CommitUpdateRecord::new("def".into(), chrono::Utc::now(), 0);
        store.create_commit_update_record(&mut other).unwrap();

        let latest = store.list_commit_update_records(10).unwrap();
        assert_eq!(latest[0].commit_hash, "def");
        assert_eq!(latest[1].num_added, 2);
        assert_eq!(store.commit_update_records_for("abc").unwrap().len(), 1);
    }

    #[test]
    fn test_set_triage_state() {
        let store = MemoryStore::new();
        store.insert_record(record(2021, 7)).unwrap();
        store
            .set_triage_state("CVE-2021-0007", TriageState::IssueCreated, Some("filed #12"))
            .unwrap();
        let r = store.get_cve_record("CVE-2021-0007").unwrap().unwrap();
        assert_eq!(r.triage_state, TriageState::IssueCreated);
        assert_eq!(r.triage_state_reason.as_deref(), Some("filed #12"));
        assert_eq!(store.list_cve_records_with_triage_state(TriageState::IssueCreated).unwrap().len(), 1);
        assert!(matches!(
            store.set_triage_state("CVE-1999-0001", TriageState::NeedsIssue, None),
            Err(StoreError::NotFound(_))
        ));
    }
}
