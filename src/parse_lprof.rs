use crate::errors::SnapshotError;
use crate::lprof_format::{SkippedEntry, Snapshot, TimingRecord};
use crate::pickle::{self, Value};
use log::{info, warn};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// line_profiler records elapsed time in microseconds.
const MICROSECONDS_PER_SECOND: f64 = 1_000_000.0;

/// One line's raw timing before conversion to seconds.
#[derive(Debug, Clone, PartialEq)]
struct LineTiming {
    line: u32,
    hits: u64,
    elapsed_us: f64,
}

/// How a single function's per-line timings were encoded in the snapshot.
#[derive(Debug, PartialEq)]
enum LineEncoding {
    /// `{line: (hits, time)}`, either a real dict or an object exposing items.
    Mapping(Vec<LineTiming>),
    /// `[(line, hits, time), ...]`
    Sequence(Vec<LineTiming>),
    Unknown(String),
}

impl LineEncoding {
    fn classify(raw: &Value) -> LineEncoding {
        let result = match raw {
            Value::List(items) | Value::Tuple(items) => items
                .iter()
                .map(sequence_item)
                .collect::<Result<Vec<_>, _>>()
                .map(LineEncoding::Sequence),
            other => match other.as_mapping() {
                Some(pairs) => pairs
                    .iter()
                    .map(|(line, value)| mapping_item(line, value))
                    .collect::<Result<Vec<_>, _>>()
                    .map(LineEncoding::Mapping),
                None => Err(format!("unsupported line table of type {}", other.type_name())),
            },
        };
        result.unwrap_or_else(LineEncoding::Unknown)
    }
}

fn line_number(value: &Value) -> Result<u32, String> {
    value
        .as_int()
        .and_then(|line| u32::try_from(line).ok())
        .filter(|line| *line >= 1)
        .ok_or_else(|| format!("invalid line number {value:?}"))
}

fn timing(line: &Value, hits: &Value, elapsed: &Value) -> Result<LineTiming, String> {
    let line = line_number(line)?;
    let hits = hits
        .as_int()
        .and_then(|hits| u64::try_from(hits).ok())
        .ok_or_else(|| format!("invalid hit count {hits:?} on line {line}"))?;
    let elapsed_us = elapsed
        .as_f64()
        .filter(|t| t.is_finite() && *t >= 0.0)
        .ok_or_else(|| format!("invalid elapsed time {elapsed:?} on line {line}"))?;
    Ok(LineTiming {
        line,
        hits,
        elapsed_us,
    })
}

fn sequence_item(item: &Value) -> Result<LineTiming, String> {
    match item.as_sequence() {
        Some([line, hits, elapsed]) => timing(line, hits, elapsed),
        _ => Err(format!("expected (line, hits, time), got {item:?}")),
    }
}

fn mapping_item(line: &Value, value: &Value) -> Result<LineTiming, String> {
    match value.as_sequence() {
        Some([hits, elapsed]) => timing(line, hits, elapsed),
        _ => Err(format!("expected (hits, time) for line {line:?}, got {value:?}")),
    }
}

/// The timings table lives on a `LineStats` object or under a `"timings"` key.
fn find_timings(root: &Value) -> Result<&[(Value, Value)], SnapshotError> {
    let timings = root
        .attr("timings")
        .or_else(|| root.get("timings"))
        .ok_or(SnapshotError::MissingTimings(root.type_name()))?;
    timings
        .as_mapping()
        .ok_or(SnapshotError::TimingsNotMapping(timings.type_name()))
}

fn find_unit(root: &Value) -> Option<f64> {
    root.attr("unit")
        .or_else(|| root.get("unit"))
        .and_then(Value::as_f64)
}

fn skip(entry: SkippedEntry, skipped: &mut Vec<SkippedEntry>) {
    warn!(
        "Skipping {} in {}: {}",
        entry.func.as_deref().unwrap_or("<unknown function>"),
        entry.file.as_deref().unwrap_or("<unknown file>"),
        entry.reason
    );
    skipped.push(entry);
}

/// Decodes a line_profiler snapshot.
///
/// The reader is rewound first, so the same handle can be parsed again.
/// Entries whose line table cannot be interpreted are skipped and reported in
/// [`Snapshot::skipped`]. A snapshot that decodes but yields no records is
/// [`SnapshotError::Empty`].
pub fn parse_lprof<R: Read + Seek>(reader: &mut R) -> Result<Snapshot, SnapshotError> {
    reader.seek(SeekFrom::Start(0))?;
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;

    let root = pickle::loads(&bytes)?;
    let timings = find_timings(&root)?;
    let unit = find_unit(&root);

    let mut records = Vec::new();
    let mut skipped = Vec::new();
    for (key, raw_lines) in timings {
        let (file, start_line, func) = match key.as_sequence() {
            Some([file, start_line, func]) => (
                file.as_str(),
                start_line.as_int().and_then(|line| u32::try_from(line).ok()),
                func.as_str(),
            ),
            _ => (None, None, None),
        };
        let (Some(file), Some(start_line), Some(func)) = (file, start_line, func) else {
            skip(
                SkippedEntry {
                    file: file.map(str::to_string),
                    func: func.map(str::to_string),
                    start_line,
                    reason: format!("unrecognized function key {key:?}"),
                },
                &mut skipped,
            );
            continue;
        };

        let lines = match LineEncoding::classify(raw_lines) {
            LineEncoding::Mapping(lines) | LineEncoding::Sequence(lines) => lines,
            LineEncoding::Unknown(reason) => {
                skip(
                    SkippedEntry {
                        file: Some(file.to_string()),
                        func: Some(func.to_string()),
                        start_line: Some(start_line),
                        reason,
                    },
                    &mut skipped,
                );
                continue;
            }
        };

        records.extend(lines.into_iter().map(|timing| TimingRecord {
            file: file.to_string(),
            func: func.to_string(),
            start_line,
            line: timing.line,
            hit_count: timing.hits,
            elapsed_seconds: timing.elapsed_us / MICROSECONDS_PER_SECOND,
        }));
    }

    if records.is_empty() {
        return Err(SnapshotError::Empty { skipped });
    }

    let snapshot = Snapshot {
        records,
        skipped,
        unit,
    };
    info!(
        "Decoded {} line records for {} functions ({} entries skipped)",
        snapshot.records.len(),
        snapshot.function_count(),
        snapshot.skipped.len()
    );
    Ok(snapshot)
}

pub fn parse_lprof_file<P: AsRef<Path>>(path: P) -> Result<Snapshot, SnapshotError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    parse_lprof(&mut reader)
}
