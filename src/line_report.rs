use crate::errors::ReportError;
use crate::extract_function::extract_function_body;
use crate::lprof_format::{FunctionKey, TimingRecord};
use crate::resolve_source::SourceCache;
use crate::summarize_functions::group_by_function_key;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};

/// One profiled line with its source text, as exported to CSV.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LineDetail {
    pub file: String,
    pub func: String,
    pub lineno: u32,
    pub hits: u64,
    pub time_s: f64,
    #[serde(rename = "Code")]
    pub code: String,
}

/// Records taking at least `min_time` seconds, slowest first, with their code.
pub fn line_details(
    records: &[TimingRecord],
    min_time: f64,
    sources: &mut SourceCache,
) -> Vec<LineDetail> {
    let mut details: Vec<LineDetail> = records
        .iter()
        .filter(|record| record.elapsed_seconds >= min_time)
        .map(|record| LineDetail {
            file: record.file.clone(),
            func: record.func.clone(),
            lineno: record.line,
            hits: record.hit_count,
            time_s: record.elapsed_seconds,
            code: sources.line(&record.file, record.line as usize),
        })
        .collect();
    details.sort_by(|a, b| b.time_s.total_cmp(&a.time_s));
    details
}

/// Writes `file,func,lineno,hits,time_s,Code` rows with a header.
pub fn write_csv<W: Write>(details: &[LineDetail], writer: W) -> Result<(), ReportError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for detail in details {
        csv_writer.serialize(detail)?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn read_csv<R: Read>(reader: R) -> Result<Vec<LineDetail>, ReportError> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    let mut details = Vec::new();
    for row in csv_reader.deserialize() {
        details.push(row?);
    }
    Ok(details)
}

/// One source line of a function view, with its profile numbers.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CodeLine {
    pub line: usize,
    pub hits: u64,
    pub time_s: f64,
    pub code: String,
    /// Time relative to the slowest line of the same view, in `[0, 1]`.
    pub heat: f64,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct FunctionView {
    pub key: FunctionKey,
    /// False when no source could be found for the file.
    pub source_found: bool,
    /// Empty when the source is missing or holds no `def` after the start line.
    pub lines: Vec<CodeLine>,
}

fn build_code_lines(body: Vec<(usize, String)>, records: &[TimingRecord]) -> Vec<CodeLine> {
    let mut by_line: HashMap<usize, &TimingRecord> = HashMap::new();
    for record in records {
        by_line.entry(record.line as usize).or_insert(record);
    }

    let mut lines: Vec<CodeLine> = body
        .into_iter()
        .map(|(line, code)| {
            let (hits, time_s) = by_line
                .get(&line)
                .map_or((0, 0.0), |record| (record.hit_count, record.elapsed_seconds));
            CodeLine {
                line,
                hits,
                time_s,
                code,
                heat: 0.0,
            }
        })
        .collect();

    let max_time = lines.iter().map(|line| line.time_s).fold(0.0, f64::max);
    if max_time > 0.0 {
        for line in &mut lines {
            line.heat = line.time_s / max_time;
        }
    }
    lines
}

/// Source-annotated views of every profiled function named `func_name`.
///
/// There is one view per distinct (file, func, start line), in snapshot order.
pub fn function_views(
    records: &[TimingRecord],
    func_name: &str,
    sources: &mut SourceCache,
) -> Vec<FunctionView> {
    group_by_function_key(records)
        .into_iter()
        .filter(|profile| profile.key.func == func_name)
        .map(|profile| match sources.lines(&profile.key.file) {
            None => FunctionView {
                key: profile.key,
                source_found: false,
                lines: Vec::new(),
            },
            Some(src_lines) => {
                let body = extract_function_body(src_lines, profile.key.start_line as usize);
                FunctionView {
                    lines: build_code_lines(body, &profile.lines),
                    key: profile.key,
                    source_found: true,
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve_source::SourceTable;

    fn record(func: &str, start: u32, line: u32, hits: u64, secs: f64) -> TimingRecord {
        TimingRecord {
            file: "/remote/pkg/mod.py".to_string(),
            func: func.to_string(),
            start_line: start,
            line,
            hit_count: hits,
            elapsed_seconds: secs,
        }
    }

    fn sources() -> SourceTable {
        [(
            "mod.py",
            "import time\n\n@cache\ndef work(n):\n    total = 0\n\n    for i in range(n):\n        total += i\n    return total\n\nwork(3)\n",
        )]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_line_details_filters_and_sorts() {
        let records = vec![
            record("work", 3, 5, 1, 0.001),
            record("work", 3, 8, 100, 0.5),
            record("work", 3, 7, 101, 0.2),
        ];
        let table = sources();
        let mut cache = SourceCache::new(&table);
        let details = line_details(&records, 0.01, &mut cache);
        assert_eq!(details.len(), 2);
        assert_eq!(details[0].lineno, 8);
        assert_eq!(details[0].code, "        total += i");
        assert_eq!(details[1].lineno, 7);
    }

    #[test]
    fn test_csv_header_and_round_trip() {
        let details = vec![LineDetail {
            file: "a, b.py".to_string(),
            func: "f".to_string(),
            lineno: 3,
            hits: 7,
            time_s: 0.123456789,
            code: "    print(\"hi, there\")".to_string(),
        }];
        let mut out = Vec::new();
        write_csv(&details, &mut out).unwrap();
        let text = String::from_utf8(out.clone()).unwrap();
        assert!(text.starts_with("file,func,lineno,hits,time_s,Code\n"));
        assert_eq!(read_csv(out.as_slice()).unwrap(), details);
    }

    #[test]
    fn test_function_view_heat_and_missing_lines() {
        let records = vec![record("work", 3, 7, 4, 0.25), record("work", 3, 8, 3, 1.0)];
        let table = sources();
        let mut cache = SourceCache::new(&table);
        let views = function_views(&records, "work", &mut cache);
        assert_eq!(views.len(), 1);
        let view = &views[0];
        assert!(view.source_found);
        let numbers: Vec<usize> = view.lines.iter().map(|l| l.line).collect();
        assert_eq!(numbers, vec![3, 4, 5, 6, 7, 8, 9, 10]);
        let line7 = &view.lines[4];
        assert_eq!((line7.hits, line7.time_s, line7.heat), (4, 0.25, 0.25));
        assert_eq!(view.lines[5].heat, 1.0);
        assert_eq!((view.lines[0].hits, view.lines[0].heat), (0, 0.0));
    }

    #[test]
    fn test_function_view_without_source() {
        let records = vec![record("work", 3, 7, 4, 0.25)];
        let table = SourceTable::new();
        let mut cache = SourceCache::new(&table);
        let views = function_views(&records, "work", &mut cache);
        assert_eq!(views.len(), 1);
        assert!(!views[0].source_found);
        assert!(views[0].lines.is_empty());
    }

    #[test]
    fn test_function_view_without_def() {
        let records = vec![record("work", 10, 11, 1, 0.1)];
        let table = sources();
        let mut cache = SourceCache::new(&table);
        let views = function_views(&records, "work", &mut cache);
        assert!(views[0].source_found);
        assert!(views[0].lines.is_empty());
    }

    #[test]
    fn test_function_views_split_by_start_line() {
        let records = vec![
            record("work", 3, 7, 1, 0.1),
            record("other", 1, 1, 1, 0.1),
            record("work", 4, 8, 1, 0.1),
        ];
        let table = sources();
        let mut cache = SourceCache::new(&table);
        let views = function_views(&records, "work", &mut cache);
        let starts: Vec<u32> = views.iter().map(|v| v.key.start_line).collect();
        assert_eq!(starts, vec![3, 4]);
        assert!(function_views(&records, "nope", &mut cache).is_empty());
    }
}
