use futures::stream::BoxStream;
use futures::StreamExt;
use hashbrown::{HashMap, HashSet};
use sleeper_core::{FileInfo, FileStatus};

use crate::{validate_identifier, Error, Result};

/// Owns the file records of one table.
///
/// Each file has a single lifecycle record (`ACTIVE`, then
/// `GARBAGE_COLLECTION_PENDING`, then deleted) and one `FILE_IN_PARTITION`
/// record per partition it holds records for.
#[async_trait::async_trait]
pub trait FileInfoStore: Send + Sync + std::fmt::Debug {
    /// Prepare the store for a new table.
    async fn initialise(&self) -> Result<()>;

    async fn add_file(&self, file: FileInfo) -> Result<()> {
        self.add_files(vec![file]).await
    }

    /// Add a `FILE_IN_PARTITION` and an `ACTIVE` lifecycle record for each
    /// file, all or nothing.
    async fn add_files(&self, files: Vec<FileInfo>) -> Result<()>;

    /// Remove the given file-in-partition records and add the new files, as
    /// one atomic change.
    ///
    /// Fails without changing anything if any of the old records does not
    /// exist.
    async fn atomically_replace_file_in_partition_records(
        &self,
        old: &[FileInfo],
        new: Vec<FileInfo>,
    ) -> Result<()>;

    async fn atomically_replace_file_in_partition_records_and_create_new_active_file(
        &self,
        old: &[FileInfo],
        new: FileInfo,
    ) -> Result<()> {
        self.atomically_replace_file_in_partition_records(old, vec![new])
            .await
    }

    /// Variant for a compaction which splits its output across the two
    /// children of a partition.
    async fn atomically_replace_file_in_partition_records_and_create_new_active_files(
        &self,
        old: &[FileInfo],
        new1: FileInfo,
        new2: FileInfo,
    ) -> Result<()> {
        self.atomically_replace_file_in_partition_records(old, vec![new1, new2])
            .await
    }

    /// Claim the file-in-partition records for a compaction job.
    ///
    /// Fails without changing anything if any record is missing or already
    /// has a job id.
    async fn atomically_assign_job_id(&self, job_id: &str, files: &[FileInfo]) -> Result<()>;

    /// Move `ACTIVE` lifecycle records with no remaining file-in-partition
    /// records to `GARBAGE_COLLECTION_PENDING`.
    ///
    /// Records that are already pending are left untouched.
    async fn find_files_that_should_have_status_of_gc_pending(&self) -> Result<()>;

    /// Lifecycle records which have been pending for longer than the
    /// garbage-collection delay.
    ///
    /// The stream is lazy, and each call starts from the beginning.
    fn get_ready_for_gc_file_infos(&self) -> BoxStream<'static, Result<FileInfo>>;

    fn get_ready_for_gc_files(&self) -> BoxStream<'static, Result<String>> {
        self.get_ready_for_gc_file_infos()
            .map(|file| file.map(|file| file.filename))
            .boxed()
    }

    /// Delete lifecycle records once the files themselves have been removed.
    ///
    /// Every named file must be `GARBAGE_COLLECTION_PENDING`.
    async fn delete_file_lifecycle_entries(&self, filenames: &[String]) -> Result<()>;

    async fn get_file_in_partition_list(&self) -> Result<Vec<FileInfo>>;

    /// File-in-partition records not yet claimed by a compaction job.
    async fn get_file_in_partition_infos_with_no_job_id(&self) -> Result<Vec<FileInfo>> {
        let files = self.get_file_in_partition_list().await?;
        Ok(files.into_iter().filter(|f| f.job_id.is_none()).collect())
    }

    async fn get_file_lifecycle_list(&self) -> Result<Vec<FileInfo>>;

    async fn get_active_file_list(&self) -> Result<Vec<FileInfo>> {
        let files = self.get_file_lifecycle_list().await?;
        Ok(files
            .into_iter()
            .filter(|f| f.status == FileStatus::Active)
            .collect())
    }

    /// Map from partition id to the files with records in that partition.
    async fn get_partition_to_file_in_partition_map(
        &self,
    ) -> Result<HashMap<String, Vec<String>>> {
        let files = self.get_file_in_partition_list().await?;
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for file in files {
            map.entry(file.partition_id).or_default().push(file.filename);
        }
        Ok(map)
    }
}

/// Check files being added before touching the backend.
///
/// A file may be added to several partitions at once, but only once to each.
pub fn validate_new_files(files: &[FileInfo]) -> Result<()> {
    let mut records = HashSet::with_capacity(files.len());
    for file in files {
        error_stack::ensure!(!file.filename.is_empty(), Error::MissingField("filename"));
        error_stack::ensure!(
            !file.partition_id.is_empty(),
            Error::MissingField("partitionId")
        );
        validate_identifier(&file.filename)?;
        validate_identifier(&file.partition_id)?;
        error_stack::ensure!(
            records.insert(file.file_in_partition_key()),
            Error::FileAlreadyExists(file.filename.clone())
        );
    }
    Ok(())
}

/// The lifecycle records to create for newly added files: one per distinct
/// filename, in first-seen order.
pub fn new_lifecycle_records(
    files: &[FileInfo],
    update_time: chrono::DateTime<chrono::Utc>,
) -> Vec<FileInfo> {
    let mut seen = HashSet::with_capacity(files.len());
    files
        .iter()
        .filter(|file| seen.insert(file.filename.as_str()))
        .map(|file| file.to_active_lifecycle(update_time))
        .collect()
}

/// Check the records named in a replace or job assignment.
///
/// Each record may be named only once.
pub fn validate_existing_records(files: &[FileInfo]) -> Result<()> {
    let mut records = HashSet::with_capacity(files.len());
    for file in files {
        error_stack::ensure!(!file.filename.is_empty(), Error::MissingField("filename"));
        error_stack::ensure!(
            !file.partition_id.is_empty(),
            Error::MissingField("partitionId")
        );
        validate_identifier(&file.filename)?;
        validate_identifier(&file.partition_id)?;
        error_stack::ensure!(
            records.insert(file.file_in_partition_key()),
            Error::DuplicateFileInPartition {
                filename: file.filename.clone(),
                partition_id: file.partition_id.clone(),
            }
        );
    }
    Ok(())
}
