use lprof_viewer::{
    function_views, line_details, load_source_lines, parse_lprof_file, read_csv, resolve_source,
    write_csv, LineDetail, MatchKind, SourceCache, SourceTable,
};
use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;

const MOD_PY: &str = "import math

def compute(n):
    total = 0
    for i in range(n):
        total += i * i
    return total


@profile
def helper(x):
    y = x + 1
    return y
";

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn uploaded() -> SourceTable {
    [("src/mod.py", MOD_PY)].into_iter().collect()
}

#[test]
fn test_profiled_path_resolves_by_suffix() {
    let sources = uploaded();
    let resolution = resolve_source("/home/alice/project/src/mod.py", &sources);
    assert_eq!(resolution.key, "src/mod.py");
    assert_eq!(resolution.via, MatchKind::Suffix);
}

#[test]
fn test_function_view_from_snapshot() {
    let snapshot = parse_lprof_file(fixture("linestats_p4.lprof")).unwrap();
    let sources = uploaded();
    let mut cache = SourceCache::new(&sources);

    let views = function_views(&snapshot.records, "compute", &mut cache);
    assert_eq!(views.len(), 2);

    let local = &views[0];
    assert!(local.source_found);
    let numbers: Vec<usize> = local.lines.iter().map(|l| l.line).collect();
    assert_eq!(numbers, vec![3, 4, 5, 6, 7, 8, 9]);
    let hottest = local
        .lines
        .iter()
        .max_by(|a, b| a.time_s.total_cmp(&b.time_s))
        .unwrap();
    assert_eq!(hottest.line, 6);
    assert_eq!(hottest.heat, 1.0);
    assert_eq!(hottest.code, "        total += i * i");

    let remote = &views[1];
    assert_eq!(remote.key.file, "C:\\work\\tools\\util.py");
    assert!(!remote.source_found);
}

#[test]
fn test_line_details_csv_file_round_trip() {
    let snapshot = parse_lprof_file(fixture("linestats_p0.lprof")).unwrap();
    let sources = uploaded();
    let mut cache = SourceCache::new(&sources);
    let details = line_details(&snapshot.records, 0.0001, &mut cache);

    let times: Vec<f64> = details.iter().map(|d| d.time_s).collect();
    assert_eq!(times, vec![0.74, 0.25, 0.0020005, 0.0015, 0.0005]);
    assert_eq!(details[0].code, "        total += i * i");
    assert_eq!(details[1].code, "    for i in range(n):");
    // no source for the Windows path, so no code
    assert_eq!(details[2].code, "");

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("profile_lines.csv");
    write_csv(&details, BufWriter::new(fs::File::create(&path).unwrap())).unwrap();

    let text = fs::read_to_string(&path).unwrap();
    assert_eq!(text.lines().next(), Some("file,func,lineno,hits,time_s,Code"));
    assert_eq!(text.lines().count(), details.len() + 1);

    let parsed = read_csv(BufReader::new(fs::File::open(&path).unwrap())).unwrap();
    let key = |d: &LineDetail| {
        (
            d.file.clone(),
            d.func.clone(),
            d.lineno,
            d.hits,
            d.time_s,
        )
    };
    assert_eq!(
        parsed.iter().map(key).collect::<Vec<_>>(),
        details.iter().map(key).collect::<Vec<_>>()
    );
}

#[test]
fn test_sources_fall_back_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("on_disk.py");
    fs::write(&path, "def f():\r\n    return 1\r\n").unwrap();
    let reported = path.to_string_lossy().into_owned();

    let sources = SourceTable::new();
    let lines = load_source_lines(&reported, &sources).unwrap();
    assert_eq!(&lines[..], ["def f():", "    return 1"]);

    // an empty upload under the same name still falls through to the disk copy
    let mut with_empty = SourceTable::new();
    with_empty.insert(reported.clone(), "");
    assert_eq!(load_source_lines(&reported, &with_empty).unwrap().len(), 2);
}

#[test]
fn test_source_table_from_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mod.py");
    fs::write(&path, MOD_PY).unwrap();

    let (sources, failed) = SourceTable::from_files(&[&path]);
    assert!(failed.is_empty());
    assert_eq!(sources.len(), 1);
    let resolution = resolve_source("/home/alice/project/src/mod.py", &sources);
    assert_eq!(resolution.via, MatchKind::CaseInsensitiveBaseName);
    assert_eq!(resolution.key, path.to_string_lossy());
}

#[test]
fn test_unreadable_sources_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("mod.py");
    fs::write(&good, MOD_PY).unwrap();
    let latin1 = dir.path().join("latin1.py");
    fs::write(&latin1, b"name = '\xe9t\xe9'\n").unwrap();
    let missing = dir.path().join("missing.py");

    let (sources, failed) = SourceTable::from_files(&[&latin1, &good, &missing]);
    assert_eq!(sources.len(), 1);
    assert!(sources.contains_key(&good.to_string_lossy()));

    let failed_paths: Vec<&PathBuf> = failed.iter().map(|(path, _)| path).collect();
    assert_eq!(failed_paths, vec![&latin1, &missing]);
    assert_eq!(failed[0].1.kind(), std::io::ErrorKind::InvalidData);
    assert_eq!(failed[1].1.kind(), std::io::ErrorKind::NotFound);

    // the good file still backs the report
    let mut cache = SourceCache::new(&sources);
    assert_eq!(
        cache.line("/home/alice/project/src/mod.py", 6),
        "        total += i * i"
    );
}
