use chrono::{DateTime, TimeZone, Utc};
use sleeper_core::{FileInfo, KeyType, Schema};

/// Schema with a single long row key named `key`.
pub fn long_key_schema() -> Schema {
    Schema::single_key("key", KeyType::Long)
}

/// A fixed instant for tests driving a manual clock.
pub fn test_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 0)
        .single()
        .unwrap_or_default()
}

/// A file-in-partition record with long key bounds.
pub fn file_in_partition(
    filename: &str,
    partition_id: &str,
    records: u64,
    min: i64,
    max: i64,
) -> FileInfo {
    FileInfo::new(filename, partition_id, records).with_row_key_bounds(min, max)
}
