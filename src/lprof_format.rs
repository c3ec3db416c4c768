use serde::{Deserialize, Serialize};

/// One (file, function, line) observation taken from a snapshot.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TimingRecord {
    pub file: String,
    pub func: String,
    pub start_line: u32,
    pub line: u32,
    pub hit_count: u64,
    pub elapsed_seconds: f64,
}

impl TimingRecord {
    pub fn key(&self) -> FunctionKey {
        FunctionKey {
            file: self.file.clone(),
            func: self.func.clone(),
            start_line: self.start_line,
        }
    }
}

/// Identity of one profiled function as the profiler reported it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionKey {
    pub file: String,
    pub func: String,
    pub start_line: u32,
}

/// Per-(file, func) totals. Distinct start lines are folded together.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FunctionSummary {
    pub file: String,
    pub func: String,
    pub total_time_seconds: f64,
    pub total_hits: u64,
    pub pct_of_total: f64,
}

/// All records sharing one [`FunctionKey`].
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct FunctionProfile {
    pub key: FunctionKey,
    pub lines: Vec<TimingRecord>,
}

/// A snapshot entry the decoder could not interpret and left out.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SkippedEntry {
    pub file: Option<String>,
    pub func: Option<String>,
    pub start_line: Option<u32>,
    pub reason: String,
}

/// The decoded content of one snapshot.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub records: Vec<TimingRecord>,
    pub skipped: Vec<SkippedEntry>,
    /// Timer unit recorded by the profiler, when the snapshot carries one.
    pub unit: Option<f64>,
}

impl Snapshot {
    pub fn function_count(&self) -> usize {
        let mut keys: Vec<FunctionKey> = self.records.iter().map(TimingRecord::key).collect();
        keys.sort();
        keys.dedup();
        keys.len()
    }
}
