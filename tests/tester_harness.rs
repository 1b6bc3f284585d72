//! Benchmark harness on small workloads.

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use kvdb::store::BackendKind;
use kvdb::tester::{
    Benchmark, DatabasePopulator, IndexRange, Operation, OperationDistribution, SuiteSettings,
    TestSuite, TesterError, Workload,
};
use tempfile::tempdir;

fn small_settings() -> SuiteSettings {
    SuiteSettings {
        thread_counts: vec![1, 2],
        operations: 2_000,
        get_when_operations: 500,
        block_size: 64,
        n_keys: 16,
        n_values: 8,
        key_length: 4,
        value_length: 4,
        shards: 4,
    }
}

// =============================================================================
// Suite
// =============================================================================

#[test]
fn test_suite_writes_every_report() {
    let dir = tempdir().expect("Failed to create temp dir");
    let output = dir.path().join("reports");
    let suite = TestSuite::new(&output, small_settings());

    let mut exported: Vec<PathBuf> = Vec::new();
    suite.run(|path| exported.push(path.to_path_buf())).unwrap();

    let names: BTreeSet<String> = fs::read_dir(&output)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();

    // Two thread counts: three backends for each plain mix, two for the
    // conditional one, plus one timing table per plain mix.
    assert_eq!(exported.len(), 2 * (3 + 3 + 2) + 2);
    assert_eq!(names.len(), exported.len());

    for name in [
        "SimpleHashMapBackend_Mostly_reads_1_thread.csv",
        "ShardedHashMapBackend_Balanced_2_threads.csv",
        "MultiConditionHashMapBackend_Balanced_with_getWhen_2_threads.csv",
        "Mostly_reads.csv",
        "Balanced.csv",
    ] {
        assert!(names.contains(name), "missing {name} in {names:?}");
    }
    assert!(!names.contains("ShardedHashMapBackend_Balanced_with_getWhen_1_thread.csv"));
    assert!(!names.contains("Balanced_with_getWhen.csv"));

    // Timing tables are written last.
    assert!(exported[exported.len() - 1].ends_with("Balanced.csv"));
}

#[test]
fn test_results_report_layout() {
    let dir = tempdir().expect("Failed to create temp dir");
    TestSuite::new(dir.path(), small_settings())
        .run(|_| {})
        .unwrap();

    let text =
        fs::read_to_string(dir.path().join("SimpleHashMapBackend_Mostly_reads_2_threads.csv"))
            .unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "OPERATION,AVG,STDEV");
    assert_eq!(lines.len(), 5);
    assert!(lines[1].starts_with("PUT,"));
    // "Mostly reads" never issues MULTI_PUT.
    assert_eq!(lines[3], "MULTI_PUT,,");
}

#[test]
fn test_timing_table_layout() {
    let dir = tempdir().expect("Failed to create temp dir");
    TestSuite::new(dir.path(), small_settings())
        .run(|_| {})
        .unwrap();

    let text = fs::read_to_string(dir.path().join("Balanced.csv")).unwrap();
    let mut lines = text.lines();
    assert_eq!(
        lines.next(),
        Some("THREADS,SimpleHashMapBackend,MultiConditionHashMapBackend,ShardedHashMapBackend")
    );
    for threads in ["1", "2"] {
        let row: Vec<&str> = lines.next().unwrap().split(',').collect();
        assert_eq!(row[0], threads);
        assert_eq!(row.len(), 4);
        for seconds in &row[1..] {
            assert!(seconds.parse::<f64>().unwrap() > 0.0);
        }
    }
    assert_eq!(lines.next(), None);
}

#[test]
fn test_unwritable_output_dir_fails() {
    let dir = tempdir().expect("Failed to create temp dir");
    let file = dir.path().join("not_a_dir");
    fs::write(&file, "x").unwrap();

    let err = TestSuite::new(&file, small_settings()).run(|_| {}).unwrap_err();
    assert!(matches!(err, TesterError::Io { .. }), "{err:?}");
}

// =============================================================================
// Single Benchmark
// =============================================================================

#[test]
fn test_single_benchmark_against_every_backend() {
    let distribution = OperationDistribution::new(0.25, 0.25, 0.25, 0.25, 0.0).unwrap();
    for kind in [
        BackendKind::Simple,
        BackendKind::MultiCondition,
        BackendKind::Sharded { shards: 8 },
    ] {
        let populator = DatabasePopulator::new(kind, 32, 16, 6, 6).unwrap();
        let workload = Workload {
            n_threads: 4,
            n_operations: 4_000,
            block_size: 100,
            keys: IndexRange::new(0, 31),
            values: IndexRange::new(0, 15),
            multi_count: IndexRange::new(2, 4),
        };

        let results = Benchmark::new(populator, distribution, workload)
            .unwrap()
            .run()
            .unwrap();

        let total: u64 = Operation::TIMED.iter().map(|op| results.count(*op)).sum();
        assert_eq!(total, 4_000, "{kind}");
        for operation in Operation::TIMED {
            assert!(results.average(operation).is_some(), "{kind} {operation}");
        }
    }
}

#[test]
fn test_zero_threads_is_rejected() {
    let populator = DatabasePopulator::new(BackendKind::Simple, 4, 4, 4, 4).unwrap();
    let distribution = OperationDistribution::new(1.0, 0.0, 0.0, 0.0, 0.0).unwrap();
    let workload = Workload {
        n_threads: 0,
        n_operations: 10,
        block_size: 1,
        keys: IndexRange::new(0, 3),
        values: IndexRange::new(0, 3),
        multi_count: IndexRange::new(2, 2),
    };
    assert!(matches!(
        Benchmark::new(populator, distribution, workload),
        Err(TesterError::InvalidParameters(_))
    ));
}
