//! On-disk layout of the append-only event journal.
//!
//! The journal is a shared directory holding one file per event, named by a
//! zero-padded decimal sequence number (`00000000`, `00000001`, ...). The
//! sequence is dense and gapless: an instance must not apply event *N*
//! before it has processed or accounted for everything below it. Files are
//! written exactly once with exclusive-create semantics and are only ever
//! deleted, never edited.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Width of the zero-padded sequence number in journal file names.
pub const SEQ_WIDTH: usize = 8;

/// File name for the given sequence number.
pub fn file_name(seq: u64) -> String {
    format!("{:0width$}", seq, width = SEQ_WIDTH)
}

/// Full path of the journal file for the given sequence number.
pub fn event_path(dir: &Path, seq: u64) -> PathBuf {
    dir.join(file_name(seq))
}

/// Parse a journal file name back into its sequence number.
///
/// Returns `None` for anything that is not a zero-padded decimal name
/// (temp files, editor droppings, subdirectories).
pub fn parse_seq(name: &str) -> Option<u64> {
    if name.len() < SEQ_WIDTH || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}

/// List all journal files in the directory, sorted by sequence number.
pub fn list_event_files(dir: &Path) -> io::Result<Vec<(u64, PathBuf)>> {
    let mut files = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(seq) = parse_seq(name) {
            files.push((seq, path));
        }
    }

    files.sort_by_key(|(seq, _)| *seq);
    Ok(files)
}

/// Lowest sequence number present on disk, if any.
///
/// Garbage collection deletes the oldest files, so a newly opened bus starts
/// its read cursor here rather than at zero.
pub fn lowest_seq(dir: &Path) -> io::Result<Option<u64>> {
    Ok(list_event_files(dir)?.first().map(|(seq, _)| *seq))
}

/// Whether any journal file with a sequence number above `seq` exists.
///
/// Used by replay to decide that a file which refuses to parse was abandoned
/// by its writer rather than still in flight.
pub fn has_file_after(dir: &Path, seq: u64) -> bool {
    list_event_files(dir)
        .map(|files| files.iter().any(|(s, _)| *s > seq))
        .unwrap_or(false)
}

/// Whether the file's mtime is further in the past than `age`.
///
/// Errors (file already gone, clock weirdness) count as "not older": both
/// replay and garbage collection use this to decide destructive steps, and
/// both prefer waiting another cycle over acting on a guess.
pub fn file_older_than(path: &Path, age: std::time::Duration) -> bool {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|elapsed| elapsed > age)
}

/// Exclusively create a journal file with the given content.
///
/// Fails with `ErrorKind::AlreadyExists` when another writer won the race
/// for this sequence number. On write or sync failure the half-written file
/// is removed so the slot can be retried.
pub fn create_exclusive(path: &Path, content: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;

    if let Err(e) = file
        .write_all(content.as_bytes())
        .and_then(|()| file.sync_all())
    {
        let _ = fs::remove_file(path);
        return Err(e);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_name_is_zero_padded() {
        assert_eq!(file_name(0), "00000000");
        assert_eq!(file_name(42), "00000042");
        assert_eq!(file_name(99_999_999), "99999999");
        // Widths beyond eight digits keep growing rather than wrapping.
        assert_eq!(file_name(100_000_000), "100000000");
    }

    #[test]
    fn test_parse_seq_roundtrip() {
        for seq in [0, 1, 7, 1234, 99_999_999, 100_000_000] {
            assert_eq!(parse_seq(&file_name(seq)), Some(seq));
        }
    }

    #[test]
    fn test_parse_seq_rejects_non_journal_names() {
        assert_eq!(parse_seq("config.yaml"), None);
        assert_eq!(parse_seq("0000001"), None); // too short
        assert_eq!(parse_seq("0000000a"), None);
        assert_eq!(parse_seq(".00000001.tmp"), None);
        assert_eq!(parse_seq(""), None);
    }

    #[test]
    fn test_list_event_files_sorted_and_filtered() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();

        fs::write(event_path(dir, 3), "c").unwrap();
        fs::write(event_path(dir, 1), "a").unwrap();
        fs::write(event_path(dir, 2), "b").unwrap();
        fs::write(dir.join("notes.txt"), "ignored").unwrap();
        fs::create_dir(dir.join("00000009")).unwrap();

        let files = list_event_files(dir).unwrap();
        let seqs: Vec<u64> = files.iter().map(|(seq, _)| *seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn test_lowest_seq() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();

        assert_eq!(lowest_seq(dir).unwrap(), None);

        fs::write(event_path(dir, 5), "x").unwrap();
        fs::write(event_path(dir, 9), "y").unwrap();
        assert_eq!(lowest_seq(dir).unwrap(), Some(5));
    }

    #[test]
    fn test_has_file_after() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();

        fs::write(event_path(dir, 2), "x").unwrap();
        assert!(has_file_after(dir, 1));
        assert!(!has_file_after(dir, 2));
        assert!(!has_file_after(dir, 7));
    }

    #[test]
    fn test_create_exclusive_rejects_existing() {
        let temp_dir = TempDir::new().unwrap();
        let path = event_path(temp_dir.path(), 0);

        create_exclusive(&path, "first").unwrap();
        let err = create_exclusive(&path, "second").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);

        // Loser must not have clobbered the winner.
        assert_eq!(fs::read_to_string(&path).unwrap(), "first");
    }
}
