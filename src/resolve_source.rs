use log::{debug, warn};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Source texts supplied by the user, keyed by whatever name they chose.
///
/// Keys keep insertion order so that case-insensitive matching is
/// deterministic.
#[derive(Debug, Clone, Default)]
pub struct SourceTable {
    entries: Vec<(String, Vec<String>)>,
    index: HashMap<String, usize>,
}

/// Splits text into lines on `\n`, `\r\n` or `\r`, without terminators.
pub fn split_lines(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        match rest.find(|c: char| c == '\n' || c == '\r') {
            Some(end) => {
                lines.push(rest[..end].to_string());
                let skip = if rest[end..].starts_with("\r\n") { 2 } else { 1 };
                rest = &rest[end + skip..];
            }
            None => {
                lines.push(rest.to_string());
                rest = "";
            }
        }
    }
    lines
}

impl SourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a source given as full text.
    pub fn insert(&mut self, name: impl Into<String>, text: &str) {
        self.insert_lines(name, split_lines(text));
    }

    pub fn insert_lines(&mut self, name: impl Into<String>, lines: Vec<String>) {
        let name = name.into();
        match self.index.get(&name) {
            Some(&position) => self.entries[position].1 = lines,
            None => {
                self.index.insert(name.clone(), self.entries.len());
                self.entries.push((name, lines));
            }
        }
    }

    /// Reads each file from disk, keyed by the path exactly as given.
    ///
    /// A file that cannot be read as UTF-8 text is left out and returned with
    /// its error; the rest of the table is still built.
    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> (Self, Vec<(PathBuf, io::Error)>) {
        let mut table = Self::new();
        let mut failed = Vec::new();
        for path in paths {
            let path = path.as_ref();
            match fs::read_to_string(path) {
                Ok(text) => table.insert(path.to_string_lossy(), &text),
                Err(e) => {
                    warn!("Skipping source {}: {}", path.display(), e);
                    failed.push((path.to_path_buf(), e));
                }
            }
        }
        (table, failed)
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.index
            .get(name)
            .map(|&position| self.entries[position].1.as_slice())
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<N: Into<String>, T: AsRef<str>> FromIterator<(N, T)> for SourceTable {
    fn from_iter<I: IntoIterator<Item = (N, T)>>(iter: I) -> Self {
        let mut table = SourceTable::new();
        for (name, text) in iter {
            table.insert(name, text.as_ref());
        }
        table
    }
}

/// Which step of the matching cascade produced a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    BaseName,
    Suffix,
    CaseInsensitiveBaseName,
    /// Nothing matched; the key is the normalized path itself.
    Unresolved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub key: String,
    pub via: MatchKind,
}

/// Forward-slash form of a path, with empty and `.` segments dropped.
pub fn normalize_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let absolute = unified.starts_with('/');
    let segments: Vec<&str> = unified
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect();
    match (absolute, segments.is_empty()) {
        (true, _) => format!("/{}", segments.join("/")),
        (false, true) => ".".to_string(),
        (false, false) => segments.join("/"),
    }
}

fn base_name(path: &str) -> &str {
    path.rsplit('/').find(|segment| !segment.is_empty()).unwrap_or("")
}

/// Finds the table key that best matches a path reported by the profiler.
///
/// Tried in order: the exact normalized path, the bare file name, every
/// trailing run of path segments from longest to shortest, and finally the
/// file name compared case-insensitively against each key's file name.
pub fn resolve_source(profile_path: &str, sources: &SourceTable) -> Resolution {
    let normalized = normalize_path(profile_path);
    let resolved = |key: &str, via: MatchKind| {
        debug!("Resolved {profile_path} to {key} ({via:?})");
        Resolution {
            key: key.to_string(),
            via,
        }
    };

    if sources.contains_key(&normalized) {
        return resolved(&normalized, MatchKind::Exact);
    }

    let base = base_name(&normalized);
    if sources.contains_key(base) {
        return resolved(base, MatchKind::BaseName);
    }

    let parts: Vec<&str> = normalized.split('/').collect();
    for start in 0..parts.len() {
        let suffix = parts[start..].join("/");
        if sources.contains_key(&suffix) {
            return resolved(&suffix, MatchKind::Suffix);
        }
    }

    let lowered = base.to_lowercase();
    if let Some(key) = sources
        .keys()
        .find(|key| base_name(&normalize_path(key)).to_lowercase() == lowered)
    {
        return resolved(key, MatchKind::CaseInsensitiveBaseName);
    }

    debug!("No source matched {profile_path}");
    Resolution {
        key: normalized,
        via: MatchKind::Unresolved,
    }
}

pub fn resolve_source_key(profile_path: &str, sources: &SourceTable) -> String {
    resolve_source(profile_path, sources).key
}

/// Loads the lines of the source matching `profile_path`.
///
/// Table entries win; otherwise the resolved key is read from disk. Missing,
/// unreadable or empty sources give `None`.
pub fn load_source_lines<'a>(
    profile_path: &str,
    sources: &'a SourceTable,
) -> Option<Cow<'a, [String]>> {
    let key = resolve_source_key(profile_path, sources);
    if let Some(lines) = sources.get(&key).filter(|lines| !lines.is_empty()) {
        return Some(Cow::Borrowed(lines));
    }

    match fs::read_to_string(&key) {
        Ok(text) => {
            let lines = split_lines(&text);
            (!lines.is_empty()).then_some(Cow::Owned(lines))
        }
        Err(e) => {
            debug!("Source {key} not available: {e}");
            None
        }
    }
}

/// Text of one 1-based line, or an empty string when it cannot be shown.
pub fn source_line(profile_path: &str, lineno: usize, sources: &SourceTable) -> String {
    load_source_lines(profile_path, sources)
        .and_then(|lines| line_at(&lines, lineno))
        .unwrap_or_default()
}

fn line_at(lines: &[String], lineno: usize) -> Option<String> {
    lineno.checked_sub(1).and_then(|i| lines.get(i)).cloned()
}

/// Remembers loaded sources for the lifetime of one report.
pub struct SourceCache<'a> {
    sources: &'a SourceTable,
    loaded: HashMap<String, Option<Vec<String>>>,
}

impl<'a> SourceCache<'a> {
    pub fn new(sources: &'a SourceTable) -> Self {
        SourceCache {
            sources,
            loaded: HashMap::new(),
        }
    }

    pub fn lines(&mut self, profile_path: &str) -> Option<&[String]> {
        if !self.loaded.contains_key(profile_path) {
            let lines = load_source_lines(profile_path, self.sources).map(Cow::into_owned);
            self.loaded.insert(profile_path.to_string(), lines);
        }
        self.loaded
            .get(profile_path)
            .and_then(|lines| lines.as_deref())
    }

    pub fn line(&mut self, profile_path: &str, lineno: usize) -> String {
        self.lines(profile_path)
            .and_then(|lines| line_at(lines, lineno))
            .unwrap_or_default()
    }
}
