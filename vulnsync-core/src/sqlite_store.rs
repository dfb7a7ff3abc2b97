//! SQLite-backed store
//!
//! CVE records, directory markers and run records live in one database in
//! WAL mode. Record batches run inside SQLite transactions, so a failed
//! batch leaves no trace.

use crate::cve::CveState;
use crate::store::{
    CommitUpdateRecord, CveKey, CveRecord, Result, Store, StoreError, Transaction, TriageState,
};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS cve_records (
        id TEXT PRIMARY KEY,
        year INTEGER NOT NULL,
        number INTEGER NOT NULL,
        path TEXT NOT NULL,
        blob_hash TEXT NOT NULL,
        cve_state TEXT NOT NULL,
        commit_hash TEXT NOT NULL,
        triage_state TEXT NOT NULL,
        triage_state_reason TEXT
    ) WITHOUT ROWID;
    CREATE UNIQUE INDEX IF NOT EXISTS cve_records_key ON cve_records (year, number);
    CREATE INDEX IF NOT EXISTS cve_records_triage ON cve_records (triage_state);

    CREATE TABLE IF NOT EXISTS directory_hashes (
        path TEXT PRIMARY KEY,
        hash TEXT NOT NULL
    ) WITHOUT ROWID;

    CREATE TABLE IF NOT EXISTS commit_updates (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        commit_hash TEXT NOT NULL,
        commit_time TEXT NOT NULL,
        started_at TEXT NOT NULL,
        ended_at TEXT,
        num_total INTEGER NOT NULL,
        num_processed INTEGER NOT NULL,
        num_added INTEGER NOT NULL,
        num_modified INTEGER NOT NULL,
        error TEXT
    );
    CREATE INDEX IF NOT EXISTS commit_updates_commit ON commit_updates (commit_hash);
";

const RECORD_COLUMNS: &str =
    "id, year, number, path, blob_hash, cve_state, commit_hash, triage_state, triage_state_reason";

const RUN_COLUMNS: &str = "id, commit_hash, commit_time, started_at, ended_at, \
     num_total, num_processed, num_added, num_modified, error";

/// Columns of a `cve_records` row before the enum columns are parsed
struct RawRecord {
    id: String,
    year: i64,
    number: i64,
    path: String,
    blob_hash: String,
    cve_state: String,
    commit_hash: String,
    triage_state: String,
    triage_state_reason: Option<String>,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            year: row.get(1)?,
            number: row.get(2)?,
            path: row.get(3)?,
            blob_hash: row.get(4)?,
            cve_state: row.get(5)?,
            commit_hash: row.get(6)?,
            triage_state: row.get(7)?,
            triage_state_reason: row.get(8)?,
        })
    }

    fn into_record(self) -> Result<CveRecord> {
        let cve_state = CveState::from(self.cve_state.as_str());
        Ok(CveRecord {
            year: u32::try_from(self.year)
                .map_err(|_| StoreError::Corrupt(format!("{}: year {}", self.id, self.year)))?,
            number: u64::try_from(self.number)
                .map_err(|_| StoreError::Corrupt(format!("{}: number {}", self.id, self.number)))?,
            triage_state: self.triage_state.parse()?,
            id: self.id,
            path: self.path,
            blob_hash: self.blob_hash,
            cve_state,
            commit_hash: self.commit_hash,
            triage_state_reason: self.triage_state_reason,
        })
    }
}

struct RawRun {
    id: i64,
    commit_hash: String,
    commit_time: String,
    started_at: String,
    ended_at: Option<String>,
    counts: [i64; 4],
    error: Option<String>,
}

impl RawRun {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            commit_hash: row.get(1)?,
            commit_time: row.get(2)?,
            started_at: row.get(3)?,
            ended_at: row.get(4)?,
            counts: [row.get(5)?, row.get(6)?, row.get(7)?, row.get(8)?],
            error: row.get(9)?,
        })
    }

    fn into_record(self) -> Result<CommitUpdateRecord> {
        let [num_total, num_processed, num_added, num_modified] = self.counts.map(|n| n.max(0) as u64);
        Ok(CommitUpdateRecord {
            id: Some(self.id),
            started_at: parse_time(&self.started_at)?,
            ended_at: self.ended_at.as_deref().map(parse_time).transpose()?,
            commit_hash: self.commit_hash,
            commit_time: parse_time(&self.commit_time)?,
            num_total,
            num_processed,
            num_added,
            num_modified,
            error: self.error,
        })
    }
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp {:?}: {}", s, e)))
}

fn query_records(conn: &Connection, sql: &str, args: impl rusqlite::Params) -> Result<Vec<CveRecord>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let raw = stmt
        .query_map(args, RawRecord::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    raw.into_iter().map(RawRecord::into_record).collect()
}

fn query_runs(conn: &Connection, sql: &str, args: impl rusqlite::Params) -> Result<Vec<CommitUpdateRecord>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let raw = stmt
        .query_map(args, RawRun::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    raw.into_iter().map(RawRun::into_record).collect()
}

fn open_db(conn: Connection) -> Result<Connection> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

/// SQLite-backed `Store`
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        let conn = open_db(Connection::open(path)?)?;
        tracing::debug!("Opened store at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// A private database that disappears when the store is dropped
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(open_db(Connection::open_in_memory()?)?),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Backend("connection lock poisoned".into()))
    }

    /// Run raw SQL against the database (maintenance and fixtures)
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn()?.execute_batch(sql)?;
        Ok(())
    }
}

/// INTEGER columns are signed 64-bit; refuse numbers that would wrap.
fn sql_number(id: &str, number: u64) -> Result<i64> {
    i64::try_from(number)
        .map_err(|_| StoreError::Backend(format!("{}: number {} does not fit in an INTEGER column", id, number)))
}

/// Range bounds; no stored number exceeds `i64::MAX`, so clamping keeps the range exact.
fn key_params(key: CveKey) -> (i64, i64) {
    (key.year as i64, i64::try_from(key.number).unwrap_or(i64::MAX))
}

struct SqliteTransaction<'a> {
    tx: &'a rusqlite::Transaction<'a>,
}

impl Transaction for SqliteTransaction<'_> {
    fn create_cve_record(&mut self, r: &CveRecord) -> Result<()> {
        let number = sql_number(&r.id, r.number)?;
        let res = self.tx.execute(
            "INSERT INTO cve_records (id,year,number,path,blob_hash,cve_state,commit_hash,triage_state,triage_state_reason) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            params![
                r.id,
                r.year as i64,
                number,
                r.path,
                r.blob_hash,
                r.cve_state.as_str(),
                r.commit_hash,
                r.triage_state.as_str(),
                r.triage_state_reason
            ],
        );
        match res {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
                Err(StoreError::AlreadyExists(r.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn set_cve_record(&mut self, r: &CveRecord) -> Result<()> {
        let number = sql_number(&r.id, r.number)?;
        self.tx.execute(
            "INSERT INTO cve_records (id,year,number,path,blob_hash,cve_state,commit_hash,triage_state,triage_state_reason) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9) \
             ON CONFLICT(id) DO UPDATE SET year=excluded.year,number=excluded.number,path=excluded.path,\
             blob_hash=excluded.blob_hash,cve_state=excluded.cve_state,commit_hash=excluded.commit_hash,\
             triage_state=excluded.triage_state,triage_state_reason=excluded.triage_state_reason",
            params![
                r.id,
                r.year as i64,
                number,
                r.path,
                r.blob_hash,
                r.cve_state.as_str(),
                r.commit_hash,
                r.triage_state.as_str(),
                r.triage_state_reason
            ],
        )?;
        Ok(())
    }

    fn get_cve_records(&mut self, start: CveKey, end: CveKey) -> Result<Vec<CveRecord>> {
        let (start_year, start_number) = key_params(start);
        let (end_year, end_number) = key_params(end);
        query_records(
            self.tx,
            &format!(
                "SELECT {} FROM cve_records \
                 WHERE (year, number) >= (?1, ?2) AND (year, number) <= (?3, ?4) \
                 ORDER BY year, number",
                RECORD_COLUMNS
            ),
            params![start_year, start_number, end_year, end_number],
        )
    }
}

impl Store for SqliteStore {
    fn run_transaction<E, F>(&self, mut f: F) -> std::result::Result<(), E>
    where
        E: From<StoreError>,
        F: FnMut(&mut dyn Transaction) -> std::result::Result<(), E>,
    {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(StoreError::from)?;
        f(&mut SqliteTransaction { tx: &tx })?;
        // Dropping an uncommitted transaction rolls it back, which is what
        // happens when `f` fails above.
        tx.commit().map_err(StoreError::from)?;
        Ok(())
    }

    fn get_directory_hash(&self, dir: &str) -> Result<Option<String>> {
        Ok(self
            .conn()?
            .query_row("SELECT hash FROM directory_hashes WHERE path=?1", params![dir], |r| r.get(0))
            .optional()?)
    }

    fn set_directory_hash(&self, dir: &str, hash: &str) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO directory_hashes (path,hash) VALUES (?1,?2) \
             ON CONFLICT(path) DO UPDATE SET hash=excluded.hash",
            params![dir, hash],
        )?;
        Ok(())
    }

    fn create_commit_update_record(&self, r: &mut CommitUpdateRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO commit_updates (commit_hash,commit_time,started_at,ended_at,\
             num_total,num_processed,num_added,num_modified,error) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            params![
                r.commit_hash,
                r.commit_time.to_rfc3339(),
                r.started_at.to_rfc3339(),
                r.ended_at.map(|t| t.to_rfc3339()),
                r.num_total as i64,
                r.num_processed as i64,
                r.num_added as i64,
                r.num_modified as i64,
                r.error
            ],
        )?;
        r.id = Some(conn.last_insert_rowid());
        Ok(())
    }

    fn set_commit_update_record(&self, r: &CommitUpdateRecord) -> Result<()> {
        let id = r.id.ok_or(StoreError::MissingRunId)?;
        let updated = self.conn()?.execute(
            "UPDATE commit_updates SET commit_hash=?2,commit_time=?3,started_at=?4,ended_at=?5,\
             num_total=?6,num_processed=?7,num_added=?8,num_modified=?9,error=?10 WHERE id=?1",
            params![
                id,
                r.commit_hash,
                r.commit_time.to_rfc3339(),
                r.started_at.to_rfc3339(),
                r.ended_at.map(|t| t.to_rfc3339()),
                r.num_total as i64,
                r.num_processed as i64,
                r.num_added as i64,
                r.num_modified as i64,
                r.error
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::Backend(format!("commit update record {} not found", id)));
        }
        Ok(())
    }

    fn list_commit_update_records(&self, limit: usize) -> Result<Vec<CommitUpdateRecord>> {
        query_runs(
            &*self.conn()?,
            &format!("SELECT {} FROM commit_updates ORDER BY id DESC LIMIT ?1", RUN_COLUMNS),
            params![limit.min(i64::MAX as usize) as i64],
        )
    }

    fn commit_update_records_for(&self, commit_hash: &str) -> Result<Vec<CommitUpdateRecord>> {
        query_runs(
            &*self.conn()?,
            &format!(
                "SELECT {} FROM commit_updates WHERE commit_hash=?1 ORDER BY id DESC",
                RUN_COLUMNS
            ),
            params![commit_hash],
        )
    }

    fn get_cve_record(&self, id: &str) -> Result<Option<CveRecord>> {
        let mut records = query_records(
            &*self.conn()?,
            &format!("SELECT {} FROM cve_records WHERE id=?1", RECORD_COLUMNS),
            params![id],
        )?;
        Ok(records.pop())
    }

    fn list_cve_records(&self) -> Result<Vec<CveRecord>> {
        query_records(
            &*self.conn()?,
            &format!("SELECT {} FROM cve_records ORDER BY year, number", RECORD_COLUMNS),
            [],
        )
    }

    fn list_cve_records_with_triage_state(&self, state: TriageState) -> Result<Vec<CveRecord>> {
        query_records(
            &*self.conn()?,
            &format!(
                "SELECT {} FROM cve_records WHERE triage_state=?1 ORDER BY year, number",
                RECORD_COLUMNS
            ),
            params![state.as_str()],
        )
    }

    fn set_triage_state(&self, id: &str, state: TriageState, reason: Option<&str>) -> Result<()> {
        let updated = self.conn()?.execute(
            "UPDATE cve_records SET triage_state=?2, triage_state_reason=?3 WHERE id=?1",
            params![id, state.as_str(), reason],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }
}
