use std::sync::Arc;

use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use hashbrown::HashSet;
use sleeper_core::{FileInfo, FileStatus};
use sleeper_state::item_table::{scan_all, scan_stream, Condition, Item, WriteOp, WriteOutcome};
use sleeper_state::{
    new_lifecycle_records, validate_existing_records, validate_new_files, Clock, Error,
    FileInfoStore, ItemTable, Result,
};

use crate::item_format::{
    file_from_item, file_in_partition_key, file_to_item, lifecycle_key, FILE_IN_PARTITION_PREFIX,
    FILE_NAME, JOB_ID, LAST_UPDATE_TIME, LIFECYCLE_PREFIX, STATUS,
};

/// File records stored one item per file-in-partition record and one item
/// per lifecycle record.
#[derive(Debug)]
pub struct ItemFileInfoStore {
    table: Arc<dyn ItemTable>,
    clock: Arc<dyn Clock>,
    garbage_collection_delay: chrono::Duration,
    consistent_reads: bool,
    page_size: usize,
}

impl ItemFileInfoStore {
    pub fn new(
        table: Arc<dyn ItemTable>,
        clock: Arc<dyn Clock>,
        garbage_collection_delay: chrono::Duration,
        consistent_reads: bool,
        page_size: usize,
    ) -> Self {
        Self {
            table,
            clock,
            garbage_collection_delay,
            consistent_reads,
            page_size,
        }
    }

    /// Puts creating the file-in-partition and lifecycle records of new files.
    fn new_file_ops(&self, files: &[FileInfo]) -> Result<Vec<WriteOp>> {
        let now = self.clock.now();
        let mut ops = Vec::with_capacity(files.len() * 2);
        for file in files {
            ops.push(WriteOp::Put {
                key: file_in_partition_key(&file.filename, &file.partition_id),
                item: file_to_item(&file.to_file_in_partition(now))?,
                condition: Condition::NotExists,
            });
        }
        for lifecycle in new_lifecycle_records(files, now) {
            ops.push(WriteOp::Put {
                key: lifecycle_key(&lifecycle.filename),
                item: file_to_item(&lifecycle)?,
                condition: Condition::NotExists,
            });
        }
        Ok(ops)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<FileInfo>> {
        let items = scan_all(
            self.table.clone(),
            prefix,
            self.page_size,
            self.consistent_reads,
        )
        .await?;
        items.iter().map(|(_, item)| file_from_item(item)).collect()
    }
}

/// The filename of the new record an insert op is writing.
fn written_filename(op: &WriteOp) -> String {
    match op {
        WriteOp::Put { item, .. } => item.get_str(FILE_NAME).unwrap_or_default().to_owned(),
        other => other.key().to_owned(),
    }
}

#[async_trait::async_trait]
impl FileInfoStore for ItemFileInfoStore {
    async fn initialise(&self) -> Result<()> {
        // Records are created on first use.
        Ok(())
    }

    async fn add_files(&self, files: Vec<FileInfo>) -> Result<()> {
        validate_new_files(&files)?;
        let ops = self.new_file_ops(&files)?;
        match self.table.transact(ops.clone()).await? {
            WriteOutcome::Committed => {
                tracing::info!(files = files.len(), "Added files");
                Ok(())
            }
            WriteOutcome::ConditionFailed { index, .. } => {
                error_stack::bail!(Error::FileAlreadyExists(written_filename(&ops[index])))
            }
        }
    }

    async fn atomically_replace_file_in_partition_records(
        &self,
        old: &[FileInfo],
        new: Vec<FileInfo>,
    ) -> Result<()> {
        validate_existing_records(old)?;
        validate_new_files(&new)?;

        let mut ops: Vec<_> = old
            .iter()
            .map(|file| WriteOp::Delete {
                key: file_in_partition_key(&file.filename, &file.partition_id),
                condition: Condition::Exists,
            })
            .collect();
        ops.extend(self.new_file_ops(&new)?);

        match self.table.transact(ops.clone()).await? {
            WriteOutcome::Committed => {
                tracing::info!(
                    removed = old.len(),
                    added = new.len(),
                    "Replaced file-in-partition records"
                );
                Ok(())
            }
            WriteOutcome::ConditionFailed { index, .. } if index < old.len() => {
                error_stack::bail!(Error::FileInPartitionMissing {
                    filename: old[index].filename.clone(),
                    partition_id: old[index].partition_id.clone(),
                })
            }
            WriteOutcome::ConditionFailed { index, .. } => {
                error_stack::bail!(Error::FileAlreadyExists(written_filename(&ops[index])))
            }
        }
    }

    async fn atomically_assign_job_id(&self, job_id: &str, files: &[FileInfo]) -> Result<()> {
        error_stack::ensure!(!job_id.is_empty(), Error::MissingField("jobId"));
        validate_existing_records(files)?;

        let ops = files
            .iter()
            .map(|file| WriteOp::Update {
                key: file_in_partition_key(&file.filename, &file.partition_id),
                set: Item::new().with(JOB_ID, job_id),
                remove: vec![],
                condition: Condition::attribute_missing(JOB_ID),
            })
            .collect();

        match self.table.transact(ops).await? {
            WriteOutcome::Committed => {
                tracing::info!(job_id, files = files.len(), "Assigned job to files");
                Ok(())
            }
            WriteOutcome::ConditionFailed { index, key } => {
                let file = &files[index];
                let err = if self.table.get(&key, true).await?.is_some() {
                    Error::JobAlreadyAssigned {
                        filename: file.filename.clone(),
                        partition_id: file.partition_id.clone(),
                    }
                } else {
                    Error::FileInPartitionMissing {
                        filename: file.filename.clone(),
                        partition_id: file.partition_id.clone(),
                    }
                };
                tracing::warn!(job_id, "Job assignment rejected: {err}");
                error_stack::bail!(err)
            }
        }
    }

    async fn find_files_that_should_have_status_of_gc_pending(&self) -> Result<()> {
        // Lifecycle records first: a file added after this listing is not a
        // candidate, and one added before it already has its
        // file-in-partition records.
        let lifecycle = self.list(LIFECYCLE_PREFIX).await?;
        let in_partition: HashSet<String> = self
            .list(FILE_IN_PARTITION_PREFIX)
            .await?
            .into_iter()
            .map(|file| file.filename)
            .collect();
        let now = self.clock.now();

        let mut marked = 0;
        for file in lifecycle {
            if file.status != FileStatus::Active || in_partition.contains(&file.filename) {
                continue;
            }
            let outcome = self
                .table
                .write(WriteOp::Update {
                    key: lifecycle_key(&file.filename),
                    set: Item::new()
                        .with(STATUS, FileStatus::GarbageCollectionPending.to_string())
                        .with(LAST_UPDATE_TIME, now.timestamp_millis()),
                    remove: vec![],
                    condition: Condition::attribute_equals(STATUS, FileStatus::Active.to_string()),
                })
                .await?;
            // Losing to another collector leaves the record as it should be.
            if outcome == WriteOutcome::Committed {
                marked += 1;
            }
        }
        tracing::info!(marked, "Marked files as ready for garbage collection");
        Ok(())
    }

    fn get_ready_for_gc_file_infos(&self) -> BoxStream<'static, Result<FileInfo>> {
        let cutoff = self.clock.now() - self.garbage_collection_delay;
        scan_stream(
            self.table.clone(),
            LIFECYCLE_PREFIX.to_owned(),
            self.page_size,
            self.consistent_reads,
        )
        .and_then(|(_, item)| async move { file_from_item(&item) })
        .try_filter(move |file| {
            let ready = file.status == FileStatus::GarbageCollectionPending
                && file.last_update_time.map_or(false, |time| time < cutoff);
            futures::future::ready(ready)
        })
        .boxed()
    }

    async fn delete_file_lifecycle_entries(&self, filenames: &[String]) -> Result<()> {
        let ops = filenames
            .iter()
            .map(|filename| WriteOp::Delete {
                key: lifecycle_key(filename),
                condition: Condition::attribute_equals(
                    STATUS,
                    FileStatus::GarbageCollectionPending.to_string(),
                ),
            })
            .collect();
        match self.table.transact(ops).await? {
            WriteOutcome::Committed => {
                tracing::info!(files = filenames.len(), "Deleted file lifecycle records");
                Ok(())
            }
            WriteOutcome::ConditionFailed { index, .. } => {
                error_stack::bail!(Error::FileNotReadyForDeletion(filenames[index].clone()))
            }
        }
    }

    async fn get_file_in_partition_list(&self) -> Result<Vec<FileInfo>> {
        self.list(FILE_IN_PARTITION_PREFIX).await
    }

    async fn get_file_lifecycle_list(&self) -> Result<Vec<FileInfo>> {
        self.list(LIFECYCLE_PREFIX).await
    }
}
