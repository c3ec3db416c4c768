//! Error types for snapshot decoding and report export

use crate::lprof_format::SkippedEntry;
use crate::pickle::PickleError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Could not read snapshot: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot is not a valid pickle stream: {0}")]
    Pickle(#[from] PickleError),

    #[error("Snapshot has no timings table (top-level value is {0})")]
    MissingTimings(&'static str),

    #[error("Snapshot timings are a {0}, not a mapping")]
    TimingsNotMapping(&'static str),

    #[error("Snapshot was read, but no profiling data was found")]
    Empty { skipped: Vec<SkippedEntry> },
}

impl SnapshotError {
    /// True when nothing usable could be decoded, as opposed to a readable
    /// snapshot that simply held no timings.
    pub fn is_decode_failure(&self) -> bool {
        !matches!(self, SnapshotError::Empty { .. })
    }
}

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_not_a_decode_failure() {
        let empty = SnapshotError::Empty { skipped: vec![] };
        assert!(!empty.is_decode_failure());
        assert_eq!(
            empty.to_string(),
            "Snapshot was read, but no profiling data was found"
        );

        let bad = SnapshotError::Pickle(PickleError::UnexpectedEof(3));
        assert!(bad.is_decode_failure());
        assert!(bad.to_string().contains("unexpected end of pickle stream"));
    }

    #[test]
    fn test_missing_timings_names_the_shape() {
        let err = SnapshotError::MissingTimings("list");
        assert_eq!(
            err.to_string(),
            "Snapshot has no timings table (top-level value is list)"
        );
    }
}
