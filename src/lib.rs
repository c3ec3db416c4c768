//! Reads line_profiler snapshots and correlates them with Python sources.
//!
//! The flow is: [`parse_lprof`] decodes the snapshot into flat
//! [`TimingRecord`]s, [`summarize_functions`] rolls them up per function, and
//! [`resolve_source`] plus [`extract_function_body`] map each profiled
//! function back onto the source text it came from.

pub mod errors;
pub mod extract_function;
pub mod line_report;
pub mod lprof_format;
pub mod parse_lprof;
pub mod pickle;
pub mod resolve_source;
pub mod summarize_functions;

pub use errors::{ReportError, SnapshotError};
pub use extract_function::extract_function_body;
pub use line_report::{
    function_views, line_details, read_csv, write_csv, CodeLine, FunctionView, LineDetail,
};
pub use lprof_format::{
    FunctionKey, FunctionProfile, FunctionSummary, SkippedEntry, Snapshot, TimingRecord,
};
pub use parse_lprof::{parse_lprof, parse_lprof_file};
pub use resolve_source::{
    load_source_lines, resolve_source, resolve_source_key, source_line, MatchKind, Resolution,
    SourceCache, SourceTable,
};
pub use summarize_functions::{
    function_names, group_by_function_key, summarize_functions, total_time,
};
