//! Read-path integration tests for both merge policies.

use arrow::array::{Int32Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use llkv_result::{Error, Result};
use llkv_storage::pager::{MemPager, Pager};
use llkv_table_store::{
    FileStoreTable, MergePolicy, PartitionPredicate, RowKind, TableOptions, TableSchema,
};
use llkv_test_utils::{format_rows, format_rows_sorted, init_tracing_for_tests};
use std::collections::HashMap;
use std::sync::Arc;

fn fields() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("dt", DataType::Utf8, true),
        Field::new("id", DataType::Int64, false),
        Field::new("name", DataType::Utf8, true),
    ]))
}

fn batch(rows: &[(Option<&str>, i64, Option<&str>)]) -> RecordBatch {
    RecordBatch::try_new(
        fields(),
        vec![
            Arc::new(StringArray::from(rows.iter().map(|r| r.0).collect::<Vec<_>>())),
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.1))),
            Arc::new(StringArray::from(rows.iter().map(|r| r.2).collect::<Vec<_>>())),
        ],
    )
    .unwrap()
}

fn pk_table(options: TableOptions) -> FileStoreTable<MemPager> {
    init_tracing_for_tests();
    let schema = TableSchema::new(
        Arc::new(Schema::new(vec![
            Field::new("dt", DataType::Utf8, false),
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ])),
        vec!["dt".into()],
        vec!["dt".into(), "id".into()],
        options,
    )
    .unwrap();
    FileStoreTable::create(Arc::new(MemPager::new()), "db/pk", schema).unwrap()
}

fn pk_batch(rows: &[(&str, i64, &str)]) -> RecordBatch {
    RecordBatch::try_new(
        Arc::new(Schema::new(vec![
            Field::new("dt", DataType::Utf8, false),
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ])),
        vec![
            Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.0))),
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.1))),
            Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.2))),
        ],
    )
    .unwrap()
}

fn commit_rows(table: &FileStoreTable<MemPager>, batch: &RecordBatch, kinds: Option<&[RowKind]>) {
    let mut write = table.new_write("merge-test").unwrap();
    match kinds {
        Some(kinds) => write.write_with_kinds(batch, kinds).unwrap(),
        None => write.write(batch).unwrap(),
    }
    table
        .new_commit("merge-test")
        .commit_append(write.prepare_commit().unwrap())
        .unwrap();
}

#[test]
fn test_primary_key_latest_write_wins_across_commits() {
    let table = pk_table(TableOptions::default().with_bucket(3));
    assert_eq!(table.merge_policy(), MergePolicy::Deduplicate);

    commit_rows(
        &table,
        &pk_batch(&[("d1", 1, "a"), ("d1", 2, "b"), ("d1", 3, "c"), ("d2", 1, "x")]),
        None,
    );
    commit_rows(&table, &pk_batch(&[("d1", 2, "b2"), ("d2", 1, "x2")]), None);
    commit_rows(&table, &pk_batch(&[("d1", 2, "b3")]), None);

    let rows = format_rows_sorted(&table.new_read().read_all().unwrap());
    assert_eq!(
        rows,
        vec![
            "+I[d1, 1, a]",
            "+I[d1, 2, b3]",
            "+I[d1, 3, c]",
            "+I[d2, 1, x2]",
        ]
    );
}

#[test]
fn test_reused_writer_wins_over_commits_made_in_between() {
    let table = pk_table(TableOptions::default());
    let mut writer_a = table.new_write("writer-a").unwrap();
    writer_a.write(&pk_batch(&[("d", 1, "a-first")])).unwrap();
    table
        .new_commit("writer-a")
        .commit_append(writer_a.prepare_commit().unwrap())
        .unwrap();

    commit_rows(
        &table,
        &pk_batch(&[("d", 2, "x"), ("d", 3, "y"), ("d", 1, "b-mid")]),
        None,
    );

    writer_a.write(&pk_batch(&[("d", 1, "a-last")])).unwrap();
    table
        .new_commit("writer-a")
        .commit_append(writer_a.prepare_commit().unwrap())
        .unwrap();

    assert_eq!(
        format_rows_sorted(&table.new_read().read_all().unwrap()),
        vec!["+I[d, 1, a-last]", "+I[d, 2, x]", "+I[d, 3, y]"]
    );
}

#[test]
fn test_primary_key_deletes_and_retractions() {
    let table = pk_table(TableOptions::default());
    commit_rows(
        &table,
        &pk_batch(&[("d", 1, "a"), ("d", 2, "b"), ("d", 3, "c")]),
        None,
    );
    commit_rows(
        &table,
        &pk_batch(&[("d", 1, "a"), ("d", 2, "b"), ("d", 2, "b2")]),
        Some(&[RowKind::Delete, RowKind::UpdateBefore, RowKind::UpdateAfter]),
    );

    assert_eq!(
        format_rows(&table.new_read().read_all().unwrap()),
        vec!["+I[d, 2, b2]", "+I[d, 3, c]"]
    );

    // A retraction alone removes the key.
    commit_rows(
        &table,
        &pk_batch(&[("d", 3, "c")]),
        Some(&[RowKind::UpdateBefore]),
    );
    assert_eq!(
        format_rows(&table.new_read().read_all().unwrap()),
        vec!["+I[d, 2, b2]"]
    );
}

#[test]
fn test_spilled_files_merge_in_write_order() {
    let table = pk_table(TableOptions::default().with_write_buffer_rows(2));
    let mut write = table.new_write("spill").unwrap();
    write.write(&pk_batch(&[("d", 1, "v1"), ("d", 2, "w1")])).unwrap();
    write.write(&pk_batch(&[("d", 1, "v2"), ("d", 3, "z1")])).unwrap();
    write.write(&pk_batch(&[("d", 1, "v3")])).unwrap();
    let change_set = write.prepare_commit().unwrap();
    assert_eq!(change_set.added().len(), 3);
    table.new_commit("spill").commit_append(change_set).unwrap();

    let plan = table.new_scan().plan().unwrap();
    assert_eq!(plan.splits.len(), 1);
    let sequences: Vec<u64> = plan.splits[0]
        .files
        .iter()
        .map(|f| f.min_sequence_number)
        .collect();
    assert_eq!(sequences, vec![0, 2, 4]);

    assert_eq!(
        format_rows(&table.new_read().read_all().unwrap()),
        vec!["+I[d, 1, v3]", "+I[d, 2, w1]", "+I[d, 3, z1]"]
    );
}

#[test]
fn test_reader_respects_batch_size() {
    let table = pk_table(TableOptions::default().with_read_batch_rows(4));
    let rows: Vec<(&str, i64, &str)> = (0..10).map(|i| ("d", i, "n")).collect();
    commit_rows(&table, &pk_batch(&rows), None);

    let batches = table.new_read().read_all().unwrap();
    let sizes: Vec<usize> = batches.iter().map(|b| b.num_rows()).collect();
    assert_eq!(sizes, vec![4, 4, 2]);
    assert_eq!(batches[0].schema(), *table.schema().arrow_schema());
}

#[test]
fn test_merge_streams_files_decoded_in_several_batches() {
    let table = pk_table(TableOptions::default().with_read_batch_rows(2));
    let rows: Vec<(&str, i64, &str)> = (0..7).map(|i| ("d", i, "v1")).collect();
    commit_rows(&table, &pk_batch(&rows), None);
    commit_rows(
        &table,
        &pk_batch(&[("d", 1, "v2"), ("d", 3, "v1"), ("d", 4, "v2"), ("d", 6, "v2")]),
        Some(&[
            RowKind::UpdateAfter,
            RowKind::Delete,
            RowKind::UpdateAfter,
            RowKind::UpdateAfter,
        ]),
    );
    commit_rows(&table, &pk_batch(&[("d", 0, "v3"), ("d", 6, "v3")]), None);

    let batches = table.new_read().read_all().unwrap();
    assert!(batches.iter().all(|b| b.num_rows() <= 2));
    assert_eq!(
        format_rows(&batches),
        vec![
            "+I[d, 0, v3]",
            "+I[d, 1, v2]",
            "+I[d, 2, v1]",
            "+I[d, 4, v2]",
            "+I[d, 5, v1]",
            "+I[d, 6, v3]",
        ]
    );
}

#[test]
fn test_append_only_keeps_duplicates_in_arrival_order() {
    init_tracing_for_tests();
    let schema = TableSchema::new(fields(), vec!["dt".into()], vec![], TableOptions::default())
        .unwrap();
    let table = FileStoreTable::create(Arc::new(MemPager::new()), "db/log", schema).unwrap();
    assert_eq!(table.merge_policy(), MergePolicy::AppendOnly);

    commit_rows(
        &table,
        &batch(&[(Some("d"), 2, Some("b")), (Some("d"), 1, Some("a"))]),
        None,
    );
    commit_rows(
        &table,
        &batch(&[(Some("d"), 2, Some("b")), (None, 9, None)]),
        None,
    );

    let plan = table.new_scan().plan().unwrap();
    assert_eq!(plan.splits.len(), 2);
    let mut rows = Vec::new();
    for split in plan.splits {
        let reader = table.new_read().create_reader(split).unwrap();
        rows.extend(format_rows(&reader.collect::<Result<Vec<_>>>().unwrap()));
    }
    // The null partition sorts first.
    assert_eq!(
        rows,
        vec![
            "+I[NULL, 9, NULL]",
            "+I[d, 2, b]",
            "+I[d, 1, a]",
            "+I[d, 2, b]",
        ]
    );

    let mut write = table.new_write("w").unwrap();
    let deleted = write.write_with_kinds(
        &batch(&[(Some("d"), 1, None)]),
        &[RowKind::Delete],
    );
    assert!(matches!(deleted, Err(Error::InvalidArgumentError(_))));
}

#[test]
fn test_null_partition_uses_default_name_and_spec() {
    init_tracing_for_tests();
    let schema = TableSchema::new(
        fields(),
        vec!["dt".into()],
        vec![],
        TableOptions::default().with_partition_default_name("__NULL__"),
    )
    .unwrap();
    let table = FileStoreTable::create(Arc::new(MemPager::new()), "db/nulls", schema).unwrap();
    commit_rows(
        &table,
        &batch(&[(None, 1, Some("x")), (Some("d"), 2, Some("y"))]),
        None,
    );

    let keys = table.pager().enumerate_keys("db/nulls/dt=__NULL__/").unwrap();
    assert_eq!(keys.len(), 1);
    assert!(keys[0].starts_with("db/nulls/dt=__NULL__/bucket-0/data-"));

    let predicate = PartitionPredicate::from_specs(
        table.schema(),
        &[HashMap::from([("dt".to_string(), "__NULL__".to_string())])],
    )
    .unwrap();
    let plan = table.new_scan().with_partition_filter(predicate).plan().unwrap();
    assert_eq!(plan.splits.len(), 1);
    let batches = table
        .new_read()
        .read_splits(plan.splits)
        .collect::<Result<Vec<_>>>()
        .unwrap();
    assert_eq!(format_rows(&batches), vec!["+I[NULL, 1, x]"]);
}

#[test]
fn test_bucket_filter_and_missing_file() {
    let table = pk_table(TableOptions::default().with_bucket(4));
    let rows: Vec<(&str, i64, &str)> = (0..40).map(|i| ("d", i, "n")).collect();
    commit_rows(&table, &pk_batch(&rows), None);

    let plan = table.new_scan().plan().unwrap();
    assert!(plan.splits.len() > 1);
    let total: u64 = plan.splits.iter().map(|s| s.row_count()).sum();
    assert_eq!(total, 40);

    let only = plan.splits[0].bucket;
    let filtered = table.new_scan().with_bucket(only).plan().unwrap();
    assert_eq!(filtered.splits, vec![plan.splits[0].clone()]);

    // Losing a data file surfaces as NotFound rather than silently skipping rows.
    let split = plan.splits[0].clone();
    let key = table.layout().data_file_key(
        table.schema(),
        &split.partition,
        split.bucket,
        &split.files[0].file_name,
    );
    table.pager().free_many(&[key]).unwrap();
    let result = table
        .new_read()
        .create_reader(split)
        .and_then(|reader| reader.collect::<Result<Vec<_>>>());
    assert!(matches!(result, Err(Error::NotFound(_))));
}

#[test]
fn test_rows_with_int32_partition_roundtrip() {
    init_tracing_for_tests();
    let fields = Arc::new(Schema::new(vec![
        Field::new("p", DataType::Int32, false),
        Field::new("v", DataType::Int32, false),
    ]));
    let schema = TableSchema::new(
        fields.clone(),
        vec!["p".into()],
        vec!["p".into(), "v".into()],
        TableOptions::default(),
    )
    .unwrap();
    let table = FileStoreTable::create(Arc::new(MemPager::new()), "ints", schema).unwrap();
    let batch = RecordBatch::try_new(
        fields,
        vec![
            Arc::new(Int32Array::from(vec![-1, -1, 5])),
            Arc::new(Int32Array::from(vec![3, 3, 1])),
        ],
    )
    .unwrap();
    commit_rows(&table, &batch, None);
    assert_eq!(
        format_rows(&table.new_read().read_all().unwrap()),
        vec!["+I[-1, 3]", "+I[5, 1]"]
    );
}
