//! JSON Lines readers and the atomic safe-rewrite writer.
//!
//! The record store and the stage logs share one line-oriented format: one
//! JSON object per line, UTF-8, no embedded newlines. Reads tolerate
//! malformed lines (a crash can leave at most one partial trailing line);
//! rewrites go through a temporary file in the target directory followed by
//! an atomic rename, so the target is either fully replaced or untouched.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::warn;

use crate::error::StorageError;
use crate::store::record::Record;

/// Reads all records from a JSON Lines file.
///
/// Blank lines are ignored. A malformed line is skipped with a warning and
/// never fails the read; an I/O error does.
pub fn load_records(path: &Path) -> Result<Vec<Record>, StorageError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<Record>(trimmed) {
            Ok(record) => records.push(record),
            Err(error) => {
                warn!(
                    path = %path.display(),
                    line = index + 1,
                    %error,
                    "Skipping malformed JSON line"
                );
            }
        }
    }

    Ok(records)
}

/// Atomically replaces `path` with the given records, one JSON line each.
///
/// The records are serialized to a temporary file in the same directory,
/// flushed, and renamed over the target. On any failure the temporary file
/// is removed and the target is left untouched.
pub fn safe_rewrite<'a, I>(path: &Path, records: I) -> Result<(), StorageError>
where
    I: IntoIterator<Item = &'a Record>,
{
    let dir = parent_dir(path);
    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        for record in records {
            serde_json::to_writer(&mut writer, record)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StorageError::Persist {
        path: path.to_path_buf(),
        message: e.error.to_string(),
    })?;
    Ok(())
}

/// Atomically writes a single pretty-printed JSON document.
///
/// Used for the metric report; same temp-file-then-rename contract as
/// [`safe_rewrite`].
pub fn write_json_report<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let dir = parent_dir(path);
    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StorageError::Persist {
        path: path.to_path_buf(),
        message: e.error.to_string(),
    })?;
    Ok(())
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn record(id: &str) -> Record {
        Record::new(id, format!("ns/{id}"))
    }

    #[test]
    fn test_rewrite_then_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.jsonl");

        let records = vec![record("s0"), record("s1"), record("s2")];
        safe_rewrite(&path, &records).unwrap();

        let loaded = load_records(&path).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[1].sample_id, "s1");
    }

    #[test]
    fn test_load_skips_malformed_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.jsonl");

        let good = serde_json::to_string(&record("s0")).unwrap();
        let contents = format!("{good}\nnot json at all\n\n{{\"truncated\": \n{good}\n");
        fs::write(&path, contents).unwrap();

        let loaded = load_records(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.iter().all(|r| r.sample_id == "s0"));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let result = load_records(&dir.path().join("absent.jsonl"));
        assert!(matches!(result, Err(StorageError::Io(_))));
    }

    #[test]
    fn test_rewrite_replaces_previous_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.jsonl");

        safe_rewrite(&path, &[record("s0"), record("s1")]).unwrap();
        safe_rewrite(&path, &[record("s9")]).unwrap();

        let loaded = load_records(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].sample_id, "s9");
    }

    #[test]
    fn test_rewrite_failure_leaves_target_untouched() {
        let dir = TempDir::new().unwrap();
        // A directory at the target path makes the final rename fail.
        let path = dir.path().join("store.jsonl");
        fs::create_dir(&path).unwrap();

        let result = safe_rewrite(&path, &[record("s0")]);
        assert!(matches!(result, Err(StorageError::Persist { .. })));
        assert!(path.is_dir());

        // No temporary files are left behind.
        let leftovers = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_write_json_report() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.json");

        let report = serde_json::json!({ "a": { "score": { "average": 0.6, "samples": 2 } } });
        write_json_report(&path, &report).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, report);
        // Pretty-printed output spans multiple lines.
        assert!(text.lines().count() > 1);
    }
}
