//! Output file verification.

use std::fmt;
use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::Path;

use crate::sort::SortError;

/// Verdict of an output file comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileDiff {
    /// The files hold the same records.
    Equal,
    /// The actual file ends before the expected records do.
    TooShort,
    /// The actual file continues past the expected records.
    TooLong,
    /// The records differ at `line` (1-based).
    Diverged { line: usize },
}

impl fmt::Display for FileDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileDiff::Equal => write!(f, "files are equal"),
            FileDiff::TooShort => write!(f, "actual file is too short"),
            FileDiff::TooLong => write!(f, "actual file is too long"),
            FileDiff::Diverged { line } => write!(f, "files diverge at line {}", line),
        }
    }
}

/// Compares an output file against the expected records.
///
/// Reading of the expected file stops at its first blank line, which acts as
/// an end marker; anything after it is ignored. The actual file may carry at
/// most one extra trailing line and that line must be blank. A line holding
/// only whitespace counts as blank. Both files are streamed, so arbitrarily
/// large outputs can be verified.
pub fn compare_files(expected: &Path, actual: &Path) -> Result<FileDiff, SortError> {
    let mut expected_lines = io::BufReader::new(fs::File::open(expected)?).lines();
    let mut actual_lines = io::BufReader::new(fs::File::open(actual)?).lines();

    let mut line = 0;
    loop {
        let expected_record = match expected_lines.next().transpose()? {
            None => break,
            Some(record) if record.trim().is_empty() => break,
            Some(record) => record,
        };
        line += 1;

        let actual_record = match actual_lines.next().transpose()? {
            None => return Ok(FileDiff::TooShort),
            Some(record) => record,
        };

        if expected_record != actual_record {
            return Ok(FileDiff::Diverged { line });
        }
    }

    // at most one extra trailing line is tolerated and it must be blank
    match actual_lines.next().transpose()? {
        None => Ok(FileDiff::Equal),
        Some(extra) if extra.trim().is_empty() && actual_lines.next().transpose()?.is_none() => Ok(FileDiff::Equal),
        Some(_) => Ok(FileDiff::TooLong),
    }
}
