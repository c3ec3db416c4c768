use lprof_viewer::{parse_lprof, parse_lprof_file, summarize_functions, SnapshotError, TimingRecord};
use std::io::Cursor;
use std::path::PathBuf;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn lines_of<'a>(records: &'a [TimingRecord], func: &str, start: u32) -> Vec<&'a TimingRecord> {
    records
        .iter()
        .filter(|r| r.func == func && r.start_line == start)
        .collect()
}

#[test]
fn test_linestats_object_every_protocol() {
    for name in ["linestats_p0.lprof", "linestats_p2.lprof", "linestats_p4.lprof"] {
        let snapshot = parse_lprof_file(fixture(name))
            .unwrap_or_else(|e| panic!("failed to decode {}: {}", name, e));

        assert_eq!(snapshot.records.len(), 7, "{}", name);
        assert!(snapshot.skipped.is_empty(), "{}", name);
        assert_eq!(snapshot.unit, Some(1e-6), "{}", name);
        assert_eq!(snapshot.function_count(), 3, "{}", name);

        let compute = lines_of(&snapshot.records, "compute", 3);
        let lines: Vec<u32> = compute.iter().map(|r| r.line).collect();
        assert_eq!(lines, vec![4, 5, 6, 7], "{}", name);
        assert_eq!(compute[0].file, "/home/alice/project/src/mod.py");
        assert_eq!(compute[2].hit_count, 1000);
        assert_eq!(compute[2].elapsed_seconds, 0.74);

        let util = lines_of(&snapshot.records, "compute", 1);
        assert_eq!(util[0].file, "C:\\work\\tools\\util.py");
        assert_eq!(util[0].elapsed_seconds, 2000.5 / 1_000_000.0);
    }
}

#[test]
fn test_seconds_match_microsecond_sums() {
    let snapshot = parse_lprof_file(fixture("linestats_p4.lprof")).unwrap();
    let expected: [(&str, u32, f64); 3] = [
        ("compute", 3, 10.0 + 250000.0 + 740000.0 + 5.0),
        ("helper", 10, 1500.0 + 500.0),
        ("compute", 1, 2000.5),
    ];
    for (func, start, micros) in expected {
        let seconds: f64 = lines_of(&snapshot.records, func, start)
            .iter()
            .map(|r| r.elapsed_seconds)
            .sum();
        assert!(
            (seconds - micros / 1_000_000.0).abs() < 1e-12,
            "{} at {}: {} vs {}",
            func,
            start,
            seconds,
            micros / 1_000_000.0
        );
    }
}

#[test]
fn test_summary_from_snapshot() {
    let snapshot = parse_lprof_file(fixture("linestats_p2.lprof")).unwrap();
    let summary = summarize_functions(&snapshot.records);

    let rows: Vec<(&str, &str, u64, f64)> = summary
        .iter()
        .map(|s| (s.file.as_str(), s.func.as_str(), s.total_hits, s.pct_of_total))
        .collect();
    assert_eq!(
        rows,
        vec![
            ("/home/alice/project/src/mod.py", "compute", 2002, 99.6),
            ("C:\\work\\tools\\util.py", "compute", 3, 0.2),
            ("/home/alice/project/src/mod.py", "helper", 20, 0.2),
        ]
    );
    let pct_sum: f64 = summary.iter().map(|s| s.pct_of_total).sum();
    assert!((pct_sum - 100.0).abs() < 0.03);
}

#[test]
fn test_mixed_encodings_skip_only_the_bad_entry() {
    let snapshot = parse_lprof_file(fixture("mixed_dict_p3.lprof")).unwrap();

    assert_eq!(snapshot.skipped.len(), 1);
    let skipped = &snapshot.skipped[0];
    assert_eq!(skipped.func.as_deref(), Some("broken"));
    assert_eq!(skipped.start_line, Some(10));
    assert!(skipped.reason.contains("int"), "{}", skipped.reason);

    let funcs: Vec<&str> = snapshot.records.iter().map(|r| r.func.as_str()).collect();
    assert_eq!(
        funcs,
        vec!["mapped", "mapped", "listed", "ordered", "ordered", "custom"]
    );

    let listed = lines_of(&snapshot.records, "listed", 20);
    assert_eq!((listed[0].line, listed[0].hit_count), (21, 2));
    assert_eq!(listed[0].elapsed_seconds, 3.0);

    let custom = lines_of(&snapshot.records, "custom", 40);
    assert_eq!((custom[0].line, custom[0].hit_count), (41, 3));
    assert_eq!(custom[0].elapsed_seconds, 30.0 / 1_000_000.0);

    let ordered = lines_of(&snapshot.records, "ordered", 30);
    assert_eq!(ordered[1].hit_count, 0);
    assert_eq!(ordered[1].elapsed_seconds, 0.0);
}

#[test]
fn test_empty_snapshot_is_distinct_from_failure() {
    match parse_lprof_file(fixture("empty.lprof")) {
        Err(SnapshotError::Empty { skipped }) => assert!(skipped.is_empty()),
        other => panic!("expected an empty snapshot, got {:?}", other),
    }

    match parse_lprof_file(fixture("all_broken.lprof")) {
        Err(err @ SnapshotError::Empty { .. }) => {
            assert!(!err.is_decode_failure());
            if let SnapshotError::Empty { skipped } = err {
                assert_eq!(skipped.len(), 1);
            }
        }
        other => panic!("expected an empty snapshot, got {:?}", other),
    }
}

#[test]
fn test_garbage_is_a_decode_failure() {
    let err = parse_lprof_file(fixture("garbage.bin")).unwrap_err();
    assert!(matches!(err, SnapshotError::Pickle(_)), "{:?}", err);
    assert!(err.is_decode_failure());

    let err = parse_lprof(&mut Cursor::new(vec![0xffu8, 0x00, 0x13])).unwrap_err();
    assert!(err.is_decode_failure());

    // TUPLE2 reaching under a MARK
    let err = parse_lprof(&mut Cursor::new(vec![b'N', b'N', b'(', 0x86, b't', b'.'])).unwrap_err();
    assert!(matches!(err, SnapshotError::Pickle(_)), "{:?}", err);
}

#[test]
fn test_deeply_nested_snapshot_is_a_decode_failure() {
    let mut data = vec![b']'; 300_000];
    data.extend(std::iter::repeat(b'a').take(299_999));
    data.push(b'.');
    let err = parse_lprof(&mut Cursor::new(data)).unwrap_err();
    assert!(matches!(err, SnapshotError::Pickle(_)), "{:?}", err);
    assert!(err.is_decode_failure());
}

#[test]
fn test_wrong_top_level_shape_is_a_decode_failure() {
    let err = parse_lprof_file(fixture("not_a_snapshot.lprof")).unwrap_err();
    assert!(matches!(err, SnapshotError::MissingTimings("list")), "{:?}", err);
}

#[test]
fn test_missing_file_is_an_io_failure() {
    let err = parse_lprof_file(fixture("does_not_exist.lprof")).unwrap_err();
    assert!(matches!(err, SnapshotError::Io(_)));
    assert!(err.is_decode_failure());
}
