use crate::lprof_format::{FunctionKey, FunctionProfile, FunctionSummary, TimingRecord};
use std::collections::{BTreeMap, HashMap};

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn total_time(records: &[TimingRecord]) -> f64 {
    records.iter().map(|record| record.elapsed_seconds).sum()
}

/// Aggregates records into one row per (file, func).
///
/// Rows are ordered by total time, slowest first, with ties broken by
/// (file, func). Percentages are rounded to two decimals and are all zero
/// when no time was recorded at all.
pub fn summarize_functions(records: &[TimingRecord]) -> Vec<FunctionSummary> {
    let totals = records.iter().fold(
        BTreeMap::<(&str, &str), (f64, u64)>::new(),
        |mut acc, record| {
            let entry = acc
                .entry((record.file.as_str(), record.func.as_str()))
                .or_insert((0.0, 0));
            entry.0 += record.elapsed_seconds;
            entry.1 = entry.1.saturating_add(record.hit_count);
            acc
        },
    );

    let grand_total: f64 = totals.values().map(|(time, _)| time).sum();
    let mut summaries: Vec<FunctionSummary> = totals
        .into_iter()
        .map(|((file, func), (total_time_seconds, total_hits))| FunctionSummary {
            file: file.to_string(),
            func: func.to_string(),
            total_time_seconds,
            total_hits,
            pct_of_total: if grand_total > 0.0 {
                round2(total_time_seconds / grand_total * 100.0)
            } else {
                0.0
            },
        })
        .collect();

    // BTreeMap order already sorts by (file, func); the stable sort keeps it for ties.
    summaries.sort_by(|a, b| b.total_time_seconds.total_cmp(&a.total_time_seconds));
    summaries
}

/// Groups records by their full [`FunctionKey`], in order of first appearance.
pub fn group_by_function_key(records: &[TimingRecord]) -> Vec<FunctionProfile> {
    let mut index: HashMap<FunctionKey, usize> = HashMap::new();
    let mut profiles: Vec<FunctionProfile> = Vec::new();
    for record in records {
        let key = record.key();
        match index.get(&key) {
            Some(&position) => profiles[position].lines.push(record.clone()),
            None => {
                index.insert(key.clone(), profiles.len());
                profiles.push(FunctionProfile {
                    key,
                    lines: vec![record.clone()],
                });
            }
        }
    }
    profiles
}

/// Distinct function names in summary order.
pub fn function_names(summaries: &[FunctionSummary]) -> Vec<&str> {
    let mut names: Vec<&str> = Vec::new();
    for summary in summaries {
        if !names.contains(&summary.func.as_str()) {
            names.push(&summary.func);
        }
    }
    names
}
