use std::sync::Arc;

use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use hashbrown::HashSet;
use sleeper_core::{FileInfo, FileStatus};
use sleeper_state::{
    new_lifecycle_records, validate_existing_records, validate_new_files, Clock, Error,
    FileInfoStore, Result,
};

use crate::SnapshotStore;

/// File records kept as one snapshot holding both the file-in-partition and
/// the lifecycle records, told apart by their status.
#[derive(Debug)]
pub struct SnapshotFileInfoStore {
    snapshots: SnapshotStore<FileInfo>,
    clock: Arc<dyn Clock>,
    garbage_collection_delay: chrono::Duration,
}

impl SnapshotFileInfoStore {
    pub fn new(
        snapshots: SnapshotStore<FileInfo>,
        clock: Arc<dyn Clock>,
        garbage_collection_delay: chrono::Duration,
    ) -> Self {
        Self {
            snapshots,
            clock,
            garbage_collection_delay,
        }
    }

    async fn list(&self, lifecycle: bool) -> Result<Vec<FileInfo>> {
        let records = self.snapshots.records().await?;
        Ok(records
            .into_iter()
            .filter(|file| is_lifecycle(file) == lifecycle)
            .collect())
    }
}

fn is_lifecycle(file: &FileInfo) -> bool {
    file.status != FileStatus::FileInPartition
}

fn position_of_record(records: &[FileInfo], file: &FileInfo) -> Option<usize> {
    records.iter().position(|record| {
        record.status == FileStatus::FileInPartition
            && record.file_in_partition_key() == file.file_in_partition_key()
    })
}

fn has_lifecycle(records: &[FileInfo], filename: &str) -> bool {
    records
        .iter()
        .any(|record| is_lifecycle(record) && record.filename == filename)
}

/// Append the records of newly added files.
fn insert_files(
    records: &mut Vec<FileInfo>,
    files: &[FileInfo],
    now: chrono::DateTime<chrono::Utc>,
) -> Result<()> {
    for file in files {
        error_stack::ensure!(
            position_of_record(records, file).is_none() && !has_lifecycle(records, &file.filename),
            Error::FileAlreadyExists(file.filename.clone())
        );
    }
    records.extend(files.iter().map(|file| file.to_file_in_partition(now)));
    records.extend(new_lifecycle_records(files, now));
    Ok(())
}

fn missing_record(file: &FileInfo) -> Error {
    Error::FileInPartitionMissing {
        filename: file.filename.clone(),
        partition_id: file.partition_id.clone(),
    }
}

#[async_trait::async_trait]
impl FileInfoStore for SnapshotFileInfoStore {
    async fn initialise(&self) -> Result<()> {
        self.snapshots.initialise(vec![]).await?;
        tracing::info!("Initialised file snapshot");
        Ok(())
    }

    async fn add_files(&self, files: Vec<FileInfo>) -> Result<()> {
        validate_new_files(&files)?;
        let now = self.clock.now();
        self.snapshots
            .update(|records| {
                insert_files(records, &files, now)?;
                Ok(true)
            })
            .await?;
        tracing::info!(files = files.len(), "Added files");
        Ok(())
    }

    async fn atomically_replace_file_in_partition_records(
        &self,
        old: &[FileInfo],
        new: Vec<FileInfo>,
    ) -> Result<()> {
        validate_existing_records(old)?;
        validate_new_files(&new)?;
        let now = self.clock.now();

        self.snapshots
            .update(|records| {
                for file in old {
                    let index = position_of_record(records, file)
                        .ok_or_else(|| error_stack::report!(missing_record(file)))?;
                    records.remove(index);
                }
                insert_files(records, &new, now)?;
                Ok(true)
            })
            .await?;
        tracing::info!(
            removed = old.len(),
            added = new.len(),
            "Replaced file-in-partition records"
        );
        Ok(())
    }

    async fn atomically_assign_job_id(&self, job_id: &str, files: &[FileInfo]) -> Result<()> {
        error_stack::ensure!(!job_id.is_empty(), Error::MissingField("jobId"));
        validate_existing_records(files)?;

        let result = self
            .snapshots
            .update(|records| {
                let mut claimed = Vec::with_capacity(files.len());
                for file in files {
                    let index = position_of_record(records, file)
                        .ok_or_else(|| error_stack::report!(missing_record(file)))?;
                    error_stack::ensure!(
                        records[index].job_id.is_none(),
                        Error::JobAlreadyAssigned {
                            filename: file.filename.clone(),
                            partition_id: file.partition_id.clone(),
                        }
                    );
                    claimed.push(index);
                }
                for index in claimed {
                    records[index].job_id = Some(job_id.to_owned());
                }
                Ok(true)
            })
            .await;
        match &result {
            Ok(()) => tracing::info!(job_id, files = files.len(), "Assigned job to files"),
            Err(err) => {
                tracing::warn!(job_id, "Job assignment rejected: {}", err.current_context())
            }
        }
        result
    }

    async fn find_files_that_should_have_status_of_gc_pending(&self) -> Result<()> {
        let now = self.clock.now();
        let mut marked = 0;
        self.snapshots
            .update(|records| {
                let in_partition: HashSet<String> = records
                    .iter()
                    .filter(|file| !is_lifecycle(file))
                    .map(|file| file.filename.clone())
                    .collect();
                marked = 0;
                for file in records.iter_mut() {
                    if file.status == FileStatus::Active && !in_partition.contains(&file.filename)
                    {
                        file.status = FileStatus::GarbageCollectionPending;
                        file.last_update_time = Some(now);
                        marked += 1;
                    }
                }
                Ok(marked > 0)
            })
            .await?;
        tracing::info!(marked, "Marked files as ready for garbage collection");
        Ok(())
    }

    fn get_ready_for_gc_file_infos(&self) -> BoxStream<'static, Result<FileInfo>> {
        let cutoff = self.clock.now() - self.garbage_collection_delay;
        let snapshots = self.snapshots.clone();
        futures::stream::once(async move { snapshots.records().await })
            .map_ok(|records| futures::stream::iter(records.into_iter().map(Ok)))
            .try_flatten()
            .try_filter(move |file| {
                let ready = file.status == FileStatus::GarbageCollectionPending
                    && file.last_update_time.map_or(false, |time| time < cutoff);
                futures::future::ready(ready)
            })
            .boxed()
    }

    async fn delete_file_lifecycle_entries(&self, filenames: &[String]) -> Result<()> {
        self.snapshots
            .update(|records| {
                for filename in filenames {
                    let index = records
                        .iter()
                        .position(|file| {
                            file.status == FileStatus::GarbageCollectionPending
                                && &file.filename == filename
                        })
                        .ok_or_else(|| {
                            error_stack::report!(Error::FileNotReadyForDeletion(filename.clone()))
                        })?;
                    records.remove(index);
                }
                Ok(!filenames.is_empty())
            })
            .await?;
        tracing::info!(files = filenames.len(), "Deleted file lifecycle records");
        Ok(())
    }

    async fn get_file_in_partition_list(&self) -> Result<Vec<FileInfo>> {
        self.list(false).await
    }

    async fn get_file_lifecycle_list(&self) -> Result<Vec<FileInfo>> {
        self.list(true).await
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use sleeper_state::{ManualClock, RevisionKind, RevisionStore, SnapshotRetryPolicy};
    use sleeper_state_sled::SledItemTable;
    use sleeper_testing::{file_in_partition, test_time};

    use super::*;
    use crate::{ObjectStoreRegistry, ObjectStoreUrl};

    async fn store() -> (SnapshotFileInfoStore, Arc<ManualClock>) {
        sleeper_testing::init_test_logging();
        let db = SledItemTable::temporary_db().unwrap();
        let revisions = RevisionStore::new(SledItemTable::open(&db, "revisions").unwrap());
        let snapshots = SnapshotStore::new(
            RevisionKind::Files,
            revisions,
            Arc::new(ObjectStoreRegistry::new()),
            ObjectStoreUrl::from_str("mem:///table").unwrap(),
            SnapshotRetryPolicy::default(),
        );
        let clock = Arc::new(ManualClock::new(test_time()));
        let store =
            SnapshotFileInfoStore::new(snapshots, clock.clone(), chrono::Duration::minutes(10));
        store.initialise().await.unwrap();
        (store, clock)
    }

    #[tokio::test]
    async fn test_add_file_to_two_partitions() {
        let (store, _) = store().await;
        let left = file_in_partition("file1.parquet", "left", 10, 1, 49);
        let right = file_in_partition("file1.parquet", "right", 5, 50, 99);
        store
            .add_files(vec![left.clone(), right.clone()])
            .await
            .unwrap();

        assert_eq!(store.get_file_in_partition_list().await.unwrap().len(), 2);
        let lifecycle = store.get_file_lifecycle_list().await.unwrap();
        assert_eq!(lifecycle, vec![left.to_active_lifecycle(test_time())]);

        let map = store.get_partition_to_file_in_partition_map().await.unwrap();
        assert_eq!(map["left"], vec!["file1.parquet".to_owned()]);
        assert_eq!(map["right"], vec!["file1.parquet".to_owned()]);

        let err = store.add_file(left).await.unwrap_err();
        assert_eq!(
            err.current_context(),
            &Error::FileAlreadyExists("file1.parquet".to_owned())
        );
    }

    #[tokio::test]
    async fn test_replace_with_two_outputs() {
        let (store, _) = store().await;
        let file1 = file_in_partition("file1.parquet", "root", 10, 1, 10);
        let file2 = file_in_partition("file2.parquet", "root", 10, 11, 20);
        store
            .add_files(vec![file1.clone(), file2.clone()])
            .await
            .unwrap();

        let left = file_in_partition("left.parquet", "left", 12, 1, 14);
        let right = file_in_partition("right.parquet", "right", 8, 15, 20);
        store
            .atomically_replace_file_in_partition_records_and_create_new_active_files(
                &[file1, file2],
                left,
                right,
            )
            .await
            .unwrap();

        let mut in_partition: Vec<_> = store
            .get_file_in_partition_list()
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.filename)
            .collect();
        in_partition.sort();
        assert_eq!(in_partition, vec!["left.parquet", "right.parquet"]);
        // The replaced files stay active until garbage collection runs.
        assert_eq!(store.get_active_file_list().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_assign_job_is_all_or_nothing() {
        let (store, _) = store().await;
        let file1 = file_in_partition("file1.parquet", "root", 10, 1, 10);
        let file2 = file_in_partition("file2.parquet", "root", 10, 11, 20);
        store
            .add_files(vec![file1.clone(), file2.clone()])
            .await
            .unwrap();
        store
            .atomically_assign_job_id("job1", &[file2.clone()])
            .await
            .unwrap();

        let err = store
            .atomically_assign_job_id("job2", &[file1.clone(), file2])
            .await
            .unwrap_err();
        assert_eq!(
            err.current_context(),
            &Error::JobAlreadyAssigned {
                filename: "file2.parquet".to_owned(),
                partition_id: "root".to_owned(),
            }
        );
        let unclaimed = store
            .get_file_in_partition_infos_with_no_job_id()
            .await
            .unwrap();
        assert_eq!(unclaimed.len(), 1);
        assert_eq!(unclaimed[0].filename, "file1.parquet");

        let missing = file_in_partition("missing.parquet", "root", 1, 1, 1);
        let err = store
            .atomically_assign_job_id("job3", &[missing])
            .await
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            Error::FileInPartitionMissing { .. }
        ));
    }

    #[tokio::test]
    async fn test_garbage_collection_lifecycle() {
        let (store, clock) = store().await;
        let file = file_in_partition("file1.parquet", "root", 10, 1, 10);
        let output = file_in_partition("file2.parquet", "root", 10, 1, 10);
        store.add_file(file.clone()).await.unwrap();
        store
            .atomically_replace_file_in_partition_records_and_create_new_active_file(
                &[file],
                output,
            )
            .await
            .unwrap();

        clock.advance(chrono::Duration::minutes(1));
        store
            .find_files_that_should_have_status_of_gc_pending()
            .await
            .unwrap();
        let pending_time = clock.now();
        let ready: Vec<String> = store.get_ready_for_gc_files().try_collect().await.unwrap();
        assert!(ready.is_empty());

        // A second pass leaves the pending record untouched.
        clock.advance(chrono::Duration::minutes(11));
        store
            .find_files_that_should_have_status_of_gc_pending()
            .await
            .unwrap();
        let ready: Vec<FileInfo> = store
            .get_ready_for_gc_file_infos()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].filename, "file1.parquet");
        assert_eq!(ready[0].last_update_time, Some(pending_time));

        let err = store
            .delete_file_lifecycle_entries(&["file2.parquet".to_owned()])
            .await
            .unwrap_err();
        assert_eq!(
            err.current_context(),
            &Error::FileNotReadyForDeletion("file2.parquet".to_owned())
        );
        store
            .delete_file_lifecycle_entries(&["file1.parquet".to_owned()])
            .await
            .unwrap();
        let lifecycle = store.get_file_lifecycle_list().await.unwrap();
        assert_eq!(lifecycle.len(), 1);
        assert_eq!(lifecycle[0].filename, "file2.parquet");
    }
}
