//! End-to-end transfer pipeline tests over network shares and RocksDB.

use std::time::Duration;

use chrono::{Days, Utc};
use pretty_assertions::assert_eq;

use e2e_tests::{create_test_task, set_age, TestHarness};
use relay_storage::TransferStore;
use relay_types::ExecutionStatus;

/// Recursive mirror run: structure kept, sources deleted, emptied folders pruned.
#[tokio::test]
async fn test_mirror_move_with_cleanup() {
    let harness = TestHarness::new();
    harness.write_source("in/top.csv", "top");
    harness.write_source("in/2024/jan/a.csv", "a");
    harness.write_source("in/2024/feb/b.csv", "b");
    harness.write_source("in/2024/feb/readme.md", "keep me");

    let task = harness.put_task(
        create_test_task("mirror")
            .with_pattern("*.csv")
            .with_recursion(true, true)
            .with_delete_source(true),
    );

    let execution = harness.orchestrator.run(&task).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.counts.files_discovered, 3);
    assert_eq!(execution.counts.files_transferred, 3);
    assert_eq!(execution.counts.error_count, 0);

    assert_eq!(
        harness.destination_files(),
        vec!["out/2024/feb/b.csv", "out/2024/jan/a.csv", "out/top.csv"]
    );
    assert_eq!(harness.read_destination("out/2024/jan/a.csv").as_deref(), Some("a"));

    assert!(!harness.source_exists("in/2024/jan"));
    assert!(harness.source_exists("in/2024/feb/readme.md"));
    assert!(harness.source_exists("in"));

    let stored = harness.storage.get_execution(&execution.id).unwrap().unwrap();
    assert_eq!(stored, execution);
    let files = harness.storage.list_transferred_files(&execution.id).unwrap();
    assert_eq!(files.len(), 3);
    assert!(files.iter().all(|f| f.success && f.size > 0));
}

/// Flattened run keeps sources and writes every file into the destination root.
#[tokio::test]
async fn test_flatten_copy_keeps_sources() {
    let harness = TestHarness::new();
    harness.write_source("in/x/one.txt", "1");
    harness.write_source("in/y/two.txt", "2");

    let task = harness.put_task(create_test_task("flat").with_recursion(true, false));
    let execution = harness.orchestrator.run(&task).await.unwrap();

    assert_eq!(execution.counts.files_transferred, 2);
    assert_eq!(harness.destination_files(), vec!["out/one.txt", "out/two.txt"]);
    assert!(harness.source_exists("in/x/one.txt"));
    assert!(harness.source_exists("in/y/two.txt"));
}

/// Without recursion only the root level is listed.
#[tokio::test]
async fn test_non_recursive_ignores_subfolders() {
    let harness = TestHarness::new();
    harness.write_source("in/root.txt", "r");
    harness.write_source("in/sub/deep.txt", "d");

    let task = harness.put_task(create_test_task("shallow"));
    let execution = harness.orchestrator.run(&task).await.unwrap();

    assert_eq!(execution.counts.files_discovered, 1);
    assert_eq!(harness.destination_files(), vec!["out/root.txt"]);
}

/// Yesterday's date token and the modification-date filter applied to real files.
#[tokio::test]
async fn test_date_tokens_filter_files() {
    let harness = TestHarness::new();
    let yesterday = Utc::now()
        .date_naive()
        .checked_sub_days(Days::new(1))
        .unwrap()
        .format("%d%m%Y")
        .to_string();

    harness.write_source(&format!("in/sales_{}.csv", yesterday), "fresh");
    harness.write_source("in/sales_01011999.csv", "wrong date");
    let stale = harness.write_source(&format!("in/old/sales_{}.csv", yesterday), "stale");
    set_age(&stale, Duration::from_secs(10 * 24 * 3600));

    let task = harness.put_task(
        create_test_task("dated")
            .with_pattern("sales_[fechaAyerddmmaaaa].csv[fechaUltMod_2]")
            .with_recursion(true, true),
    );
    let execution = harness.orchestrator.run(&task).await.unwrap();

    assert_eq!(execution.counts.files_discovered, 1);
    assert_eq!(
        harness.destination_files(),
        vec![format!("out/sales_{}.csv", yesterday)]
    );
}

/// Several files processed concurrently are still recorded in listing order.
#[tokio::test]
async fn test_concurrent_files_keep_order() {
    let harness = TestHarness::with_config(|config| config.with_file_concurrency(4));
    for i in 0..8 {
        harness.write_source(&format!("in/f{}.dat", i), &"x".repeat(i + 1));
    }

    let task = harness.put_task(create_test_task("parallel"));
    let execution = harness.orchestrator.run(&task).await.unwrap();
    assert_eq!(execution.counts.files_transferred, 8);

    let names: Vec<String> = harness
        .storage
        .list_transferred_files(&execution.id)
        .unwrap()
        .into_iter()
        .map(|f| f.file_name)
        .collect();
    let expected: Vec<String> = (0..8).map(|i| format!("f{}.dat", i)).collect();
    assert_eq!(names, expected);
}

/// History accumulates newest first through the service facade.
#[tokio::test]
async fn test_execution_history() {
    let harness = TestHarness::new();
    harness.write_source("in/a.txt", "a");
    harness.put_task(create_test_task("history"));
    let service = harness.service();

    let first = service.execute_now("history").await.unwrap();
    harness.write_source("in/b.txt", "b");
    let second = service.execute_now("history").await.unwrap();

    let history = service.list_executions("history").unwrap();
    assert_eq!(
        history.iter().map(|e| e.id.clone()).collect::<Vec<_>>(),
        vec![second.id.clone(), first.id.clone()]
    );
    // Copy mode: the second run sees both files again
    assert_eq!(second.counts.files_transferred, 2);
    assert_eq!(service.list_files(&first.id).unwrap().len(), 1);
}
