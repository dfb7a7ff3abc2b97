//! Human-readable output for run records and CVE records.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::io::Write;
use vulnsync_core::{CommitUpdateRecord, CveRecord};

fn format_time(t: &DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

fn status(run: &CommitUpdateRecord) -> String {
    match (&run.error, run.ended_at) {
        (Some(e), _) => format!("FAILED ({})", e),
        (None, Some(_)) => "OK".to_string(),
        (None, None) => "RUNNING".to_string(),
    }
}

/// Format a run record as one line.
pub fn format_run(run: &CommitUpdateRecord) -> String {
    let id = run.id.map(|id| format!("#{}", id)).unwrap_or_else(|| "#?".to_string());
    let duration = run
        .ended_at
        .map(|end| format!("{}ms", (end - run.started_at).num_milliseconds()))
        .unwrap_or_else(|| "-".to_string());
    format!(
        "[{}] {} {} (committed {}) | {}/{} processed, {} added, {} modified | {} | {}",
        format_time(&run.started_at),
        id,
        short_hash(&run.commit_hash),
        format_time(&run.commit_time),
        run.num_processed,
        run.num_total,
        run.num_added,
        run.num_modified,
        duration,
        status(run),
    )
}

pub fn print_runs(runs: &[CommitUpdateRecord], writer: &mut dyn Write) -> Result<()> {
    if runs.is_empty() {
        writeln!(writer, "No update runs found.")?;
        return Ok(());
    }

    writeln!(writer, "Update runs ({} entries):", runs.len())?;
    writeln!(writer, "{}", "-".repeat(80))?;
    for run in runs {
        writeln!(writer, "  {}", format_run(run))?;
    }
    writeln!(writer, "{}", "-".repeat(80))?;

    let failures = runs.iter().filter(|r| r.error.is_some()).count();
    let added: u64 = runs.iter().map(|r| r.num_added).sum();
    let modified: u64 = runs.iter().map(|r| r.num_modified).sum();
    writeln!(
        writer,
        "Summary: {} runs ({} failed), {} added, {} modified",
        runs.len(),
        failures,
        added,
        modified,
    )?;
    Ok(())
}

pub fn format_record(record: &CveRecord) -> String {
    let mut line = format!(
        "{:<18} {:<12} {:<30} {}",
        record.id,
        record.cve_state.as_str(),
        record.triage_state.as_str(),
        record.path,
    );
    if let Some(reason) = &record.triage_state_reason {
        line.push_str(&format!(" ({})", reason));
    }
    line
}

pub fn print_records(records: &[CveRecord], writer: &mut dyn Write) -> Result<()> {
    if records.is_empty() {
        writeln!(writer, "No CVE records found.")?;
        return Ok(());
    }
    for record in records {
        writeln!(writer, "{}", format_record(record))?;
    }
    writeln!(writer, "{} records", records.len())?;
    Ok(())
}

/// Summary printed after `vulnsync update`
pub fn print_run_summary(run: &CommitUpdateRecord, writer: &mut dyn Write) -> Result<()> {
    writeln!(writer, "Update completed:")?;
    writeln!(writer, "  Commit:    {}", run.commit_hash)?;
    writeln!(writer, "  Committed: {}", format_time(&run.commit_time))?;
    writeln!(writer, "  Files:     {}", run.num_total)?;
    writeln!(writer, "  Processed: {}", run.num_processed)?;
    writeln!(writer, "  Added:     {}", run.num_added)?;
    writeln!(writer, "  Modified:  {}", run.num_modified)?;
    if let Some(end) = run.ended_at {
        writeln!(writer, "  Time:      {}ms", (end - run.started_at).num_milliseconds())?;
    }
    if run.num_processed == 0 {
        writeln!(writer, "Already up to date.")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use vulnsync_core::{CveState, TriageState};

    fn run() -> CommitUpdateRecord {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let mut run = CommitUpdateRecord::new(
            "0123456789abcdef0123456789abcdef01234567".into(),
            Utc.with_ymd_and_hms(2024, 2, 29, 8, 30, 0).unwrap(),
            10,
        );
        run.id = Some(3);
        run.started_at = start;
        run.ended_at = Some(start + chrono::Duration::milliseconds(1500));
        run.num_processed = 4;
        run.num_added = 1;
        run.num_modified = 2;
        run
    }

    #[test]
    fn test_format_run() {
        let line = format_run(&run());
        assert_eq!(
            line,
            "[2024-03-01 12:00:00 UTC] #3 0123456789ab (committed 2024-02-29 08:30:00 UTC) \
             | 4/10 processed, 1 added, 2 modified | 1500ms | OK"
        );
    }

    #[test]
    fn test_run_status() {
        let mut r = run();
        r.error = Some("update cancelled".into());
        assert!(format_run(&r).ends_with("FAILED (update cancelled)"));
        r.error = None;
        r.ended_at = None;
        assert!(format_run(&r).ends_with("| - | RUNNING"));
    }

    #[test]
    fn test_print_runs_summary() {
        let mut failed = run();
        failed.error = Some("boom".into());
        let mut out = Vec::new();
        print_runs(&[run(), failed], &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("Update runs (2 entries):\n"));
        assert!(text.ends_with("Summary: 2 runs (1 failed), 2 added, 4 modified\n"));

        let mut out = Vec::new();
        print_runs(&[], &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "No update runs found.\n");
    }

    #[test]
    fn test_format_record() {
        let record = CveRecord {
            id: "CVE-2021-3114".into(),
            year: 2021,
            number: 3114,
            path: "2021/3xxx/CVE-2021-3114.json".into(),
            blob_hash: "aa".into(),
            cve_state: CveState::Public,
            commit_hash: "c".into(),
            triage_state: TriageState::UpdatedSinceIssueCreation,
            triage_state_reason: Some("CVE changed; needs issue = true".into()),
        };
        let line = format_record(&record);
        assert!(line.starts_with("CVE-2021-3114      PUBLIC       updated_since_issue_creation"));
        assert!(line.ends_with("2021/3xxx/CVE-2021-3114.json (CVE changed; needs issue = true)"));

        let mut out = Vec::new();
        print_records(&[record], &mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().ends_with("1 records\n"));
    }
}
