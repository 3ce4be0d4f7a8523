use std::sync::Arc;

use futures::stream::BoxStream;
use hashbrown::HashMap;
use sleeper_core::{FileInfo, Partition, Schema};

use crate::{FileInfoStore, PartitionStore, Result};

/// The state of one table: its partition store plus its file store.
///
/// Every call is forwarded to the owning store. The two stores are
/// independent; no operation spans both.
#[derive(Debug, Clone)]
pub struct StateStore {
    table_name: String,
    partitions: Arc<dyn PartitionStore>,
    files: Arc<dyn FileInfoStore>,
}

impl StateStore {
    pub fn new(
        table_name: impl Into<String>,
        partitions: Arc<dyn PartitionStore>,
        files: Arc<dyn FileInfoStore>,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            partitions,
            files,
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn schema(&self) -> &Schema {
        self.partitions.schema()
    }

    pub fn partition_store(&self) -> &Arc<dyn PartitionStore> {
        &self.partitions
    }

    pub fn file_info_store(&self) -> &Arc<dyn FileInfoStore> {
        &self.files
    }

    /// Initialise both stores, with a single root partition.
    ///
    /// Partitions are written before files, and the two writes are not one
    /// transaction. If initialising the files fails the partitions stay
    /// written, and a retry fails with the partition store's
    /// already-initialised error. A table found in that state needs its
    /// file store initialised on its own through [StateStore::file_info_store].
    pub async fn initialise(&self) -> Result<()> {
        tracing::info!(table = %self.table_name, "Initialising state store");
        self.partitions.initialise().await?;
        self.files.initialise().await
    }

    /// Initialise both stores, with the given partition tree.
    ///
    /// Has the same ordering as [StateStore::initialise].
    pub async fn initialise_with_partitions(&self, partitions: Vec<Partition>) -> Result<()> {
        tracing::info!(
            table = %self.table_name,
            partitions = partitions.len(),
            "Initialising state store"
        );
        self.partitions
            .initialise_with_partitions(partitions)
            .await?;
        self.files.initialise().await
    }

    pub async fn get_all_partitions(&self) -> Result<Vec<Partition>> {
        self.partitions.get_all_partitions().await
    }

    pub async fn get_leaf_partitions(&self) -> Result<Vec<Partition>> {
        self.partitions.get_leaf_partitions().await
    }

    pub async fn atomically_split_partition(
        &self,
        parent: &Partition,
        child1: &Partition,
        child2: &Partition,
    ) -> Result<()> {
        self.partitions
            .atomically_split_partition(parent, child1, child2)
            .await
    }

    pub async fn add_file(&self, file: FileInfo) -> Result<()> {
        self.files.add_file(file).await
    }

    pub async fn add_files(&self, files: Vec<FileInfo>) -> Result<()> {
        self.files.add_files(files).await
    }

    pub async fn atomically_replace_file_in_partition_records_and_create_new_active_file(
        &self,
        old: &[FileInfo],
        new: FileInfo,
    ) -> Result<()> {
        self.files
            .atomically_replace_file_in_partition_records_and_create_new_active_file(old, new)
            .await
    }

    pub async fn atomically_replace_file_in_partition_records_and_create_new_active_files(
        &self,
        old: &[FileInfo],
        new1: FileInfo,
        new2: FileInfo,
    ) -> Result<()> {
        self.files
            .atomically_replace_file_in_partition_records_and_create_new_active_files(
                old, new1, new2,
            )
            .await
    }

    pub async fn atomically_assign_job_id(&self, job_id: &str, files: &[FileInfo]) -> Result<()> {
        self.files.atomically_assign_job_id(job_id, files).await
    }

    pub async fn find_files_that_should_have_status_of_gc_pending(&self) -> Result<()> {
        self.files
            .find_files_that_should_have_status_of_gc_pending()
            .await
    }

    pub fn get_ready_for_gc_file_infos(&self) -> BoxStream<'static, Result<FileInfo>> {
        self.files.get_ready_for_gc_file_infos()
    }

    pub fn get_ready_for_gc_files(&self) -> BoxStream<'static, Result<String>> {
        self.files.get_ready_for_gc_files()
    }

    pub async fn delete_file_lifecycle_entries(&self, filenames: &[String]) -> Result<()> {
        self.files.delete_file_lifecycle_entries(filenames).await
    }

    pub async fn get_file_in_partition_list(&self) -> Result<Vec<FileInfo>> {
        self.files.get_file_in_partition_list().await
    }

    pub async fn get_file_in_partition_infos_with_no_job_id(&self) -> Result<Vec<FileInfo>> {
        self.files.get_file_in_partition_infos_with_no_job_id().await
    }

    pub async fn get_file_lifecycle_list(&self) -> Result<Vec<FileInfo>> {
        self.files.get_file_lifecycle_list().await
    }

    pub async fn get_active_file_list(&self) -> Result<Vec<FileInfo>> {
        self.files.get_active_file_list().await
    }

    pub async fn get_partition_to_file_in_partition_map(
        &self,
    ) -> Result<HashMap<String, Vec<String>>> {
        self.files.get_partition_to_file_in_partition_map().await
    }
}
