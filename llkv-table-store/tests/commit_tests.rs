//! Commit protocol integration tests: concurrency, conflicts, and storage faults.

use arrow::array::{Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use llkv_result::Error;
use llkv_storage::pager::{InstrumentedPager, MemPager, Pager};
use llkv_table_store::{ChangeSet, CommitKind, FileStoreTable, TableOptions, TableSchema};
use llkv_test_utils::init_tracing_for_tests;
use std::sync::{Arc, Barrier};
use std::thread;

fn fields() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("region", DataType::Utf8, false),
        Field::new("id", DataType::Int64, false),
    ]))
}

fn batch(region: &str, ids: std::ops::Range<i64>) -> RecordBatch {
    let len = (ids.end - ids.start) as usize;
    RecordBatch::try_new(
        fields(),
        vec![
            Arc::new(StringArray::from(vec![region; len])),
            Arc::new(Int64Array::from_iter_values(ids)),
        ],
    )
    .unwrap()
}

fn create<P: Pager>(pager: Arc<P>) -> FileStoreTable<P> {
    init_tracing_for_tests();
    let schema = TableSchema::new(
        fields(),
        vec!["region".into()],
        vec![],
        TableOptions::default().with_bucket(2),
    )
    .unwrap();
    FileStoreTable::create(pager, "t", schema).unwrap()
}

fn prepare<P: Pager>(table: &FileStoreTable<P>, batch: &RecordBatch) -> ChangeSet {
    let mut write = table.new_write("writer").unwrap();
    write.write(batch).unwrap();
    write.prepare_commit().unwrap()
}

#[test]
fn test_concurrent_appends_get_dense_ids() {
    const WRITERS: usize = 8;
    let table = create(Arc::new(MemPager::new()));
    let barrier = Arc::new(Barrier::new(WRITERS));

    let mut ids: Vec<u64> = thread::scope(|scope| {
        let handles: Vec<_> = (0..WRITERS)
            .map(|i| {
                let table = table.clone();
                let barrier = Arc::clone(&barrier);
                scope.spawn(move || {
                    let change_set = prepare(&table, &batch(&format!("r{}", i % 3), 0..10));
                    barrier.wait();
                    table
                        .new_commit(format!("user-{i}"))
                        .commit_append(change_set)
                        .unwrap()
                        .unwrap()
                        .id()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    ids.sort_unstable();
    assert_eq!(ids, (1..=WRITERS as u64).collect::<Vec<_>>());

    let manager = table.snapshot_manager();
    assert_eq!(manager.latest_snapshot_id().unwrap(), Some(WRITERS as u64));
    assert_eq!(manager.earliest_snapshot_id().unwrap(), Some(1));
    let latest = manager.latest_snapshot().unwrap().unwrap();
    assert_eq!(latest.total_record_count(), (WRITERS * 10) as u64);

    let rows: usize = table
        .new_read()
        .read_all()
        .unwrap()
        .iter()
        .map(|b| b.num_rows())
        .sum();
    assert_eq!(rows, WRITERS * 10);
}

#[test]
fn test_racing_overwrites_have_one_winner() {
    let table = create(Arc::new(MemPager::new()));
    let commit = table.new_commit("setup");
    commit
        .commit_append(prepare(&table, &batch("a", 0..5)))
        .unwrap();
    commit
        .commit_append(prepare(&table, &batch("b", 0..5)))
        .unwrap();
    let base = table.snapshot_manager().latest_snapshot_id().unwrap();

    let (_, live) = table.new_scan().live_entries().unwrap();
    let (left, right): (Vec<_>, Vec<_>) = live
        .into_iter()
        .partition(|e| e.partition.to_string() == "{a}");
    assert!(!left.is_empty() && !right.is_empty());

    let barrier = Arc::new(Barrier::new(2));
    let results: Vec<_> = thread::scope(|scope| {
        [left, right]
            .into_iter()
            .map(|removed| {
                let table = table.clone();
                let barrier = Arc::clone(&barrier);
                scope.spawn(move || {
                    barrier.wait();
                    table
                        .new_commit("overwriter")
                        .commit(ChangeSet::overwrite(removed, vec![]), base)
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect()
    });

    let winners = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(Error::CommitConflict(_))))
        .count();
    assert_eq!((winners, conflicts), (1, 1));

    let latest = table.snapshot_manager().latest_snapshot().unwrap().unwrap();
    assert_eq!(latest.id(), 3);
    assert_eq!(latest.commit_kind(), CommitKind::Overwrite);
}

#[test]
fn test_storage_fault_leaves_latest_unchanged() {
    let (pager, stats) = InstrumentedPager::new(MemPager::new());
    let pager = Arc::new(pager);
    let table = create(Arc::clone(&pager));
    let commit = table.new_commit("u");
    commit
        .commit_append(prepare(&table, &batch("a", 0..3)))
        .unwrap();

    let change_set = prepare(&table, &batch("a", 3..6));

    pager.fail_writes_under(Some("t/snapshot/snapshot-"));
    let err = commit.commit(change_set.clone(), Some(1)).unwrap_err();
    assert!(matches!(err, Error::Io(_)));
    assert!(stats.snapshot().injected_failures > 0);
    assert_eq!(table.snapshot_manager().latest_snapshot_id().unwrap(), Some(1));

    pager.fail_writes_under(Some("t/manifest/"));
    assert!(matches!(
        commit.commit(change_set.clone(), Some(1)),
        Err(Error::Io(_))
    ));
    assert_eq!(table.snapshot_manager().latest_snapshot_id().unwrap(), Some(1));

    pager.fail_writes_under(None);
    let snapshot = commit.commit(change_set, Some(1)).unwrap();
    assert_eq!(snapshot.id(), 2);
    assert_eq!(snapshot.total_record_count(), 6);
    assert_eq!(table.new_read().read_all().unwrap().iter().map(|b| b.num_rows()).sum::<usize>(), 6);
}

#[test]
fn test_snapshot_chain_history() {
    let table = create(Arc::new(MemPager::new()));
    let commit = table.new_commit("history");
    for i in 0..4 {
        commit
            .commit_append(prepare(&table, &batch("h", i * 10..i * 10 + 10)))
            .unwrap();
    }

    let snapshots: Vec<_> = table
        .snapshot_manager()
        .snapshots()
        .unwrap()
        .collect::<llkv_result::Result<_>>()
        .unwrap();
    let ids: Vec<u64> = snapshots.iter().map(|s| s.id()).collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);
    for (i, snapshot) in snapshots.iter().enumerate() {
        assert_eq!(snapshot.total_record_count(), (i as u64 + 1) * 10);
        assert_eq!(snapshot.delta_record_count(), 10);
        assert!(snapshot.time_millis() > 0);
    }
    assert!(matches!(
        table.new_scan().with_snapshot(9).plan(),
        Err(Error::NotFound(_))
    ));
}
