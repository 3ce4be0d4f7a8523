//! Scenarios run against both backends through the provider.

use std::sync::Arc;

use sleeper_core::{
    partitions_from_split_points, FileInfo, FileStatus, KeyValue, Partition, PartitionSplitter,
    Range, Region, SplitPartitions,
};
use sleeper_state::{
    Clock, Error, ManualClock, SnapshotRetryPolicy, StateStore, StateStoreKind, TableProperties,
};
use sleeper_statestore::{ProviderConfig, StateStoreProvider};
use sleeper_testing::{file_in_partition, long_key_schema, test_time};

const BACKENDS: [StateStoreKind; 2] = [StateStoreKind::Items, StateStoreKind::Snapshot];

fn provider() -> (StateStoreProvider, Arc<ManualClock>) {
    sleeper_testing::init_test_logging();
    let clock = Arc::new(ManualClock::new(test_time()));
    let config = ProviderConfig {
        db_path: None,
        snapshot_retry: SnapshotRetryPolicy {
            max_attempts: 5,
            max_sleep_millis: 20,
        },
    };
    let provider = StateStoreProvider::try_new(config)
        .unwrap()
        .with_clock(clock.clone());
    (provider, clock)
}

fn properties(kind: StateStoreKind) -> TableProperties {
    let name = format!("{kind:?}-table").to_lowercase();
    let mut properties = TableProperties::new(&name, long_key_schema());
    properties.state_store = kind;
    if kind == StateStoreKind::Snapshot {
        properties.snapshot_url = Some(format!("mem:///{name}"));
    }
    properties
}

fn sorted_partitions(mut partitions: Vec<Partition>) -> Vec<Partition> {
    partitions.sort_by(|a, b| a.id.cmp(&b.id));
    partitions
}

fn sorted_files(mut files: Vec<FileInfo>) -> Vec<FileInfo> {
    files.sort_by(|a, b| {
        (&a.filename, &a.partition_id).cmp(&(&b.filename, &b.partition_id))
    });
    files
}

fn first_range(partition: &Partition) -> &Range {
    &partition.region.ranges()[0]
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_splits_of_one_leaf() {
    let (provider, _) = provider();
    for kind in BACKENDS {
        let store = provider.state_store(&properties(kind)).unwrap();
        store.initialise().await.unwrap();
        let root = store.get_all_partitions().await.unwrap().remove(0);

        let splits = [
            PartitionSplitter::split(&root, 0, KeyValue::Long(50)).unwrap(),
            PartitionSplitter::split(&root, 0, KeyValue::Long(20)).unwrap(),
        ];
        let tasks = splits.into_iter().map(|split| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .atomically_split_partition(&split.parent, &split.left, &split.right)
                    .await
            })
        });
        let results: Vec<_> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        assert_eq!(
            results.iter().filter(|result| result.is_ok()).count(),
            1,
            "{kind:?}"
        );
        let err = results.into_iter().find_map(|result| result.err()).unwrap();
        assert!(err.current_context().is_conflict(), "{kind:?}: {err:?}");

        let partitions = store.get_all_partitions().await.unwrap();
        assert_eq!(partitions.len(), 3, "{kind:?}");
        assert_eq!(store.get_leaf_partitions().await.unwrap().len(), 2, "{kind:?}");
    }
}

#[tokio::test]
async fn test_second_initialise_changes_nothing() {
    let (provider, _) = provider();
    for kind in BACKENDS {
        let store = provider.state_store(&properties(kind)).unwrap();
        store.initialise().await.unwrap();
        store
            .add_file(file_in_partition("file.parquet", "root", 10, 0, 9))
            .await
            .unwrap();

        let err = store.initialise().await.unwrap_err();
        assert!(
            matches!(
                err.current_context(),
                Error::AlreadyInitialised | Error::PartitionAlreadyExists(_)
            ),
            "{kind:?}: {err:?}"
        );
        let partitions = store.get_all_partitions().await.unwrap();
        assert_eq!(partitions.len(), 1, "{kind:?}");
        assert!(partitions[0].is_root() && partitions[0].is_leaf, "{kind:?}");
        assert_eq!(store.get_file_in_partition_list().await.unwrap().len(), 1, "{kind:?}");
        assert_eq!(store.get_active_file_list().await.unwrap().len(), 1, "{kind:?}");
    }
}

#[tokio::test]
async fn test_compaction_across_split_point() {
    let (provider, clock) = provider();
    for kind in BACKENDS {
        let store = provider.state_store(&properties(kind)).unwrap();
        let partitions =
            partitions_from_split_points(&long_key_schema(), &[KeyValue::Long(50)]).unwrap();
        store.initialise_with_partitions(partitions).await.unwrap();

        let mut leaves = store.get_leaf_partitions().await.unwrap();
        leaves.sort_by(|a, b| first_range(a).min.cmp(&first_range(b).min));
        assert_eq!(
            first_range(&leaves[0]),
            &Range::new("key", KeyValue::Long(i64::MIN), Some(KeyValue::Long(50)))
        );
        assert_eq!(
            first_range(&leaves[1]),
            &Range::new("key", KeyValue::Long(50), None)
        );
        let root = store
            .get_all_partitions()
            .await
            .unwrap()
            .into_iter()
            .find(Partition::is_root)
            .unwrap();

        let input = file_in_partition("input.parquet", &root.id, 100, 0, 99);
        store.add_file(input.clone()).await.unwrap();
        store
            .atomically_replace_file_in_partition_records_and_create_new_active_files(
                &[input],
                file_in_partition("left.parquet", &leaves[0].id, 50, 0, 49),
                file_in_partition("right.parquet", &leaves[1].id, 50, 50, 99),
            )
            .await
            .unwrap();
        clock.advance(chrono::Duration::minutes(1));
        store
            .find_files_that_should_have_status_of_gc_pending()
            .await
            .unwrap();

        let active = sorted_files(store.get_active_file_list().await.unwrap());
        let active: Vec<_> = active
            .iter()
            .map(|f| (f.filename.as_str(), f.partition_id.as_str()))
            .collect();
        assert_eq!(
            active,
            vec![
                ("left.parquet", leaves[0].id.as_str()),
                ("right.parquet", leaves[1].id.as_str())
            ],
            "{kind:?}"
        );
        let in_partition = store.get_file_in_partition_list().await.unwrap();
        assert_eq!(in_partition.len(), 2, "{kind:?}");
        assert!(in_partition.iter().all(|f| f.filename != "input.parquet"));
    }
}

#[tokio::test]
async fn test_failed_job_assignment_changes_nothing() {
    let (provider, _) = provider();
    for kind in BACKENDS {
        let store = provider.state_store(&properties(kind)).unwrap();
        store.initialise().await.unwrap();
        let files: Vec<_> = (1..=3)
            .map(|n| file_in_partition(&format!("file{n}.parquet"), "root", 10, 0, 9))
            .collect();
        store.add_files(files.clone()).await.unwrap();
        store
            .atomically_assign_job_id("job1", &files[1..2])
            .await
            .unwrap();

        let err = store
            .atomically_assign_job_id("job2", &files)
            .await
            .unwrap_err();
        assert!(!err.current_context().is_conflict(), "{kind:?}");

        let jobs: Vec<_> = sorted_files(store.get_file_in_partition_list().await.unwrap())
            .into_iter()
            .map(|f| f.job_id)
            .collect();
        assert_eq!(jobs, vec![None, Some("job1".to_owned()), None], "{kind:?}");
    }
}

#[tokio::test]
async fn test_marking_for_garbage_collection_is_idempotent() {
    let (provider, clock) = provider();
    for kind in BACKENDS {
        clock.set(test_time());
        let store = provider.state_store(&properties(kind)).unwrap();
        store.initialise().await.unwrap();
        let file = file_in_partition("file.parquet", "root", 10, 0, 9);
        store.add_file(file.clone()).await.unwrap();
        store
            .atomically_replace_file_in_partition_records_and_create_new_active_file(
                &[file],
                file_in_partition("compacted.parquet", "root", 10, 0, 9),
            )
            .await
            .unwrap();

        clock.advance(chrono::Duration::minutes(1));
        store
            .find_files_that_should_have_status_of_gc_pending()
            .await
            .unwrap();
        let first = sorted_files(store.get_file_lifecycle_list().await.unwrap());

        clock.advance(chrono::Duration::minutes(1));
        store
            .find_files_that_should_have_status_of_gc_pending()
            .await
            .unwrap();
        let second = sorted_files(store.get_file_lifecycle_list().await.unwrap());
        assert_eq!(first, second, "{kind:?}");

        let pending: Vec<_> = second
            .iter()
            .filter(|f| f.status == FileStatus::GarbageCollectionPending)
            .collect();
        assert_eq!(pending.len(), 1, "{kind:?}");
        assert_eq!(pending[0].filename, "file.parquet");
        assert_eq!(
            pending[0].last_update_time,
            Some(test_time() + chrono::Duration::minutes(1))
        );
    }
}

/// Everything a script can read back from a store.
type Readback = (
    Vec<Partition>,
    Vec<Partition>,
    Vec<FileInfo>,
    Vec<FileInfo>,
    Vec<FileInfo>,
);

/// Initialise from `partitions`, apply `split` and run a fixed sequence of
/// file operations, including a split from a stale copy of a leaf and an
/// ingest racing garbage-collection marking.
async fn run_script(
    store: &StateStore,
    clock: &ManualClock,
    partitions: Vec<Partition>,
    split: &SplitPartitions,
) -> Readback {
    clock.set(test_time());
    store.initialise_with_partitions(partitions).await.unwrap();
    store
        .atomically_split_partition(&split.parent, &split.left, &split.right)
        .await
        .unwrap();
    let mut leaves = store.get_leaf_partitions().await.unwrap();
    leaves.sort_by(|a, b| first_range(a).min.cmp(&first_range(b).min));

    let mut stale = leaves[0].clone();
    stale.region = Region::new(vec![Range::new(
        "key",
        KeyValue::Long(-100),
        Some(KeyValue::Long(0)),
    )]);
    let stale_split = PartitionSplitter::split(&stale, 0, KeyValue::Long(-50)).unwrap();
    let err = store
        .atomically_split_partition(&stale_split.parent, &stale_split.left, &stale_split.right)
        .await
        .unwrap_err();
    assert_eq!(
        err.current_context(),
        &Error::ParentRegionMismatch(leaves[0].id.clone())
    );
    assert_eq!(store.get_leaf_partitions().await.unwrap().len(), leaves.len());

    clock.advance(chrono::Duration::seconds(5));
    let a = file_in_partition("a.parquet", &leaves[0].id, 10, -20, -1);
    let b = file_in_partition("b.parquet", &leaves[1].id, 20, 10, 40);
    let c_left = file_in_partition("c.parquet", &split.left.id, 5, 50, 60);
    let c_right = file_in_partition("c.parquet", &split.right.id, 5, 80, 90);
    store
        .add_files(vec![a.clone(), b.clone(), c_left.clone(), c_right])
        .await
        .unwrap();

    clock.advance(chrono::Duration::seconds(5));
    store
        .atomically_replace_file_in_partition_records_and_create_new_active_file(
            &[a, c_left],
            file_in_partition("d.parquet", &leaves[0].id, 10, -20, -1),
        )
        .await
        .unwrap();
    store.atomically_assign_job_id("job", &[b]).await.unwrap();

    clock.advance(chrono::Duration::minutes(1));
    let e = file_in_partition("e.parquet", &leaves[1].id, 3, 1, 3);
    let (added, marked) = futures::join!(
        store.add_file(e),
        store.find_files_that_should_have_status_of_gc_pending()
    );
    added.unwrap();
    marked.unwrap();

    // No file with a file-in-partition record may be pending collection.
    let in_partition = store.get_file_in_partition_list().await.unwrap();
    let lifecycle = store.get_file_lifecycle_list().await.unwrap();
    for file in &lifecycle {
        if file.status == FileStatus::GarbageCollectionPending {
            assert!(
                in_partition.iter().all(|f| f.filename != file.filename),
                "{} is still referenced",
                file.filename
            );
        }
    }

    (
        sorted_partitions(store.get_all_partitions().await.unwrap()),
        sorted_partitions(store.get_leaf_partitions().await.unwrap()),
        sorted_files(store.get_file_in_partition_list().await.unwrap()),
        sorted_files(store.get_file_lifecycle_list().await.unwrap()),
        sorted_files(store.get_active_file_list().await.unwrap()),
    )
}

#[tokio::test]
async fn test_backends_agree() {
    let (provider, clock) = provider();
    let partitions = partitions_from_split_points(
        &long_key_schema(),
        &[KeyValue::Long(0), KeyValue::Long(50)],
    )
    .unwrap();
    let last_leaf = partitions
        .iter()
        .find(|p| p.is_leaf && first_range(p).max.is_none())
        .unwrap();
    let split = PartitionSplitter::split(last_leaf, 0, KeyValue::Long(75)).unwrap();

    let items = provider
        .state_store(&properties(StateStoreKind::Items))
        .unwrap();
    let snapshot = provider
        .state_store(&properties(StateStoreKind::Snapshot))
        .unwrap();
    let from_items = run_script(&items, &clock, partitions.clone(), &split).await;
    let from_snapshot = run_script(&snapshot, &clock, partitions, &split).await;

    assert_eq!(from_items, from_snapshot);
    assert_eq!(from_items.0.len(), 7);
    assert_eq!(from_items.1.len(), 4);
    assert_eq!(from_items.2.len(), 4);
    assert_eq!(from_items.4.len(), 4);

    let lifecycle: Vec<_> = from_items
        .3
        .iter()
        .map(|f| (f.filename.as_str(), f.status))
        .collect();
    assert_eq!(
        lifecycle,
        vec![
            ("a.parquet", FileStatus::GarbageCollectionPending),
            ("b.parquet", FileStatus::Active),
            ("c.parquet", FileStatus::Active),
            ("d.parquet", FileStatus::Active),
            ("e.parquet", FileStatus::Active),
        ]
    );
    assert_eq!(clock.now(), test_time() + chrono::Duration::seconds(70));
}
