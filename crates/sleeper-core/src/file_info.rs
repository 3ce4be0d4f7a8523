use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Key;

/// Status of a file record.
///
/// `FileInPartition` records exist once per (file, partition) occurrence.
/// `Active` and `GarbageCollectionPending` are the two states of the single
/// lifecycle record kept per filename.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileStatus {
    #[display(fmt = "FILE_IN_PARTITION")]
    FileInPartition,
    #[display(fmt = "ACTIVE")]
    Active,
    #[display(fmt = "GARBAGE_COLLECTION_PENDING")]
    GarbageCollectionPending,
}

impl std::str::FromStr for FileStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FILE_IN_PARTITION" => Ok(FileStatus::FileInPartition),
            "ACTIVE" => Ok(FileStatus::Active),
            "GARBAGE_COLLECTION_PENDING" => Ok(FileStatus::GarbageCollectionPending),
            other => Err(format!("unknown file status '{other}'")),
        }
    }
}

/// Metadata about a data file, as held in one state store record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub filename: String,
    pub partition_id: String,
    pub number_of_records: u64,
    pub min_row_key: Option<Key>,
    pub max_row_key: Option<Key>,
    pub status: FileStatus,
    /// The compaction job that has claimed this file as input, if any.
    pub job_id: Option<String>,
    pub last_update_time: Option<DateTime<Utc>>,
}

impl FileInfo {
    /// A new file-in-partition record, as created by ingest.
    pub fn new(
        filename: impl Into<String>,
        partition_id: impl Into<String>,
        number_of_records: u64,
    ) -> Self {
        Self {
            filename: filename.into(),
            partition_id: partition_id.into(),
            number_of_records,
            min_row_key: None,
            max_row_key: None,
            status: FileStatus::FileInPartition,
            job_id: None,
            last_update_time: None,
        }
    }

    pub fn with_row_key_bounds(mut self, min: impl Into<Key>, max: impl Into<Key>) -> Self {
        self.min_row_key = Some(min.into());
        self.max_row_key = Some(max.into());
        self
    }

    pub fn with_status(mut self, status: FileStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_last_update_time(mut self, time: DateTime<Utc>) -> Self {
        self.last_update_time = Some(time);
        self
    }

    /// The file-in-partition record for this file, unclaimed.
    pub fn to_file_in_partition(&self, update_time: DateTime<Utc>) -> Self {
        Self {
            status: FileStatus::FileInPartition,
            job_id: None,
            last_update_time: Some(update_time),
            ..self.clone()
        }
    }

    /// The `Active` lifecycle record for this file.
    pub fn to_active_lifecycle(&self, update_time: DateTime<Utc>) -> Self {
        Self {
            status: FileStatus::Active,
            job_id: None,
            last_update_time: Some(update_time),
            ..self.clone()
        }
    }

    /// Identifies this record among the file-in-partition records.
    pub fn file_in_partition_key(&self) -> (&str, &str) {
        (&self.filename, &self.partition_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_display() {
        for status in [
            FileStatus::FileInPartition,
            FileStatus::Active,
            FileStatus::GarbageCollectionPending,
        ] {
            assert_eq!(status.to_string().parse::<FileStatus>().unwrap(), status);
        }
        assert!("DELETED".parse::<FileStatus>().is_err());
    }

    #[test]
    fn test_lifecycle_record_drops_job() {
        let now = Utc::now();
        let file = FileInfo::new("file.parquet", "root", 10).with_job_id("job");
        let active = file.to_active_lifecycle(now);
        assert_eq!(active.status, FileStatus::Active);
        assert_eq!(active.job_id, None);
        assert_eq!(active.last_update_time, Some(now));
        assert_eq!(active.number_of_records, 10);
    }
}
