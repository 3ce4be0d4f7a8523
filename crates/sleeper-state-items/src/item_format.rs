//! Conversion between partitions or file records and table items.

use chrono::{DateTime, TimeZone, Utc};
use error_stack::{IntoReport, ResultExt};
use sleeper_core::{FileInfo, FileStatus, Key, Partition, Region};
use sleeper_state::item_table::Item;
use sleeper_state::{Error, Result};

pub(crate) const PARTITION_ID: &str = "partitionId";
pub(crate) const IS_LEAF: &str = "isLeaf";
const PARENT_PARTITION_ID: &str = "parentPartitionId";
pub(crate) const CHILD_PARTITION_IDS: &str = "childPartitionIds";
pub(crate) const REGION: &str = "region";
pub(crate) const SPLIT_DIMENSION: &str = "splitDimension";

pub(crate) const FILE_NAME: &str = "fileName";
const NUMBER_OF_RECORDS: &str = "numberOfRecords";
const MIN_ROW_KEY: &str = "minRowKey";
const MAX_ROW_KEY: &str = "maxRowKey";
pub(crate) const STATUS: &str = "status";
pub(crate) const JOB_ID: &str = "jobId";
pub(crate) const LAST_UPDATE_TIME: &str = "lastStateStoreUpdateTime";

/// Prefix of the keys of file-in-partition records.
pub(crate) const FILE_IN_PARTITION_PREFIX: &str = "fip/";
/// Prefix of the keys of lifecycle records.
pub(crate) const LIFECYCLE_PREFIX: &str = "lifecycle/";

pub(crate) fn file_in_partition_key(filename: &str, partition_id: &str) -> String {
    // Ids containing NUL are rejected on the way in, so the pair is unambiguous.
    format!("{FILE_IN_PARTITION_PREFIX}{filename}\u{0}{partition_id}")
}

pub(crate) fn lifecycle_key(filename: &str) -> String {
    format!("{LIFECYCLE_PREFIX}{filename}")
}

/// The stored form of a partition's region.
pub(crate) fn region_json(partition: &Partition) -> Result<String> {
    serde_json::to_string(&partition.region)
        .into_report()
        .change_context(Error::Serialize("partition region"))
        .attach_printable_lazy(|| partition.id.clone())
}

pub(crate) fn partition_to_item(partition: &Partition) -> Result<Item> {
    let region = region_json(partition)?;
    Ok(Item::new()
        .with(PARTITION_ID, partition.id.as_str())
        .with(IS_LEAF, partition.is_leaf)
        .with_opt(PARENT_PARTITION_ID, partition.parent_id.clone())
        .with(CHILD_PARTITION_IDS, partition.child_ids.clone())
        .with(REGION, region)
        .with(SPLIT_DIMENSION, split_dimension_number(partition.split_dimension)))
}

/// The attributes changed on a partition when it is split.
pub(crate) fn split_update(parent: &Partition) -> Item {
    Item::new()
        .with(IS_LEAF, false)
        .with(CHILD_PARTITION_IDS, parent.child_ids.clone())
        .with(SPLIT_DIMENSION, split_dimension_number(parent.split_dimension))
}

fn split_dimension_number(dimension: Option<usize>) -> i64 {
    dimension.map_or(-1, |dimension| dimension as i64)
}

pub(crate) fn partition_from_item(item: &Item) -> Result<Partition> {
    let missing = |name: &'static str| {
        error_stack::report!(Error::Deserialize("partition"))
            .attach_printable(format!("missing attribute '{name}'"))
    };

    let id = item.get_str(PARTITION_ID).ok_or_else(|| missing(PARTITION_ID))?;
    let region: Region = serde_json::from_str(item.get_str(REGION).ok_or_else(|| missing(REGION))?)
        .into_report()
        .change_context(Error::Deserialize("partition region"))
        .attach_printable_lazy(|| id.to_owned())?;
    let split_dimension = item
        .get_number(SPLIT_DIMENSION)
        .ok_or_else(|| missing(SPLIT_DIMENSION))?;

    Ok(Partition {
        id: id.to_owned(),
        region,
        is_leaf: item.get_bool(IS_LEAF).ok_or_else(|| missing(IS_LEAF))?,
        parent_id: item.get_str(PARENT_PARTITION_ID).map(str::to_owned),
        child_ids: item
            .get_string_list(CHILD_PARTITION_IDS)
            .map(<[String]>::to_vec)
            .unwrap_or_default(),
        split_dimension: usize::try_from(split_dimension).ok(),
    })
}

pub(crate) fn file_to_item(file: &FileInfo) -> Result<Item> {
    Ok(Item::new()
        .with(FILE_NAME, file.filename.as_str())
        .with(PARTITION_ID, file.partition_id.as_str())
        .with(NUMBER_OF_RECORDS, file.number_of_records as i64)
        .with_opt(MIN_ROW_KEY, key_to_json(file.min_row_key.as_ref())?)
        .with_opt(MAX_ROW_KEY, key_to_json(file.max_row_key.as_ref())?)
        .with(STATUS, file.status.to_string())
        .with_opt(JOB_ID, file.job_id.clone())
        .with_opt(
            LAST_UPDATE_TIME,
            file.last_update_time.map(|time| time.timestamp_millis()),
        ))
}

fn key_to_json(key: Option<&Key>) -> Result<Option<String>> {
    key.map(|key| {
        serde_json::to_string(key)
            .into_report()
            .change_context(Error::Serialize("row key"))
    })
    .transpose()
}

fn key_from_json(json: Option<&str>) -> Result<Option<Key>> {
    json.map(|json| {
        serde_json::from_str(json)
            .into_report()
            .change_context(Error::Deserialize("row key"))
    })
    .transpose()
}

pub(crate) fn millis_to_time(millis: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| error_stack::report!(Error::Deserialize("update time")))
        .attach_printable_lazy(|| millis)
}

pub(crate) fn file_from_item(item: &Item) -> Result<FileInfo> {
    let missing = |name: &'static str| {
        error_stack::report!(Error::Deserialize("file info"))
            .attach_printable(format!("missing attribute '{name}'"))
    };

    let filename = item.get_str(FILE_NAME).ok_or_else(|| missing(FILE_NAME))?;
    let status: FileStatus = item
        .get_str(STATUS)
        .ok_or_else(|| missing(STATUS))?
        .parse()
        .map_err(|e: String| error_stack::report!(Error::Deserialize("file status")).attach_printable(e))?;
    let number_of_records = item
        .get_number(NUMBER_OF_RECORDS)
        .ok_or_else(|| missing(NUMBER_OF_RECORDS))?;

    Ok(FileInfo {
        filename: filename.to_owned(),
        partition_id: item
            .get_str(PARTITION_ID)
            .ok_or_else(|| missing(PARTITION_ID))?
            .to_owned(),
        number_of_records: u64::try_from(number_of_records)
            .into_report()
            .change_context(Error::Deserialize("file info"))
            .attach_printable_lazy(|| format!("negative record count for '{filename}'"))?,
        min_row_key: key_from_json(item.get_str(MIN_ROW_KEY))?,
        max_row_key: key_from_json(item.get_str(MAX_ROW_KEY))?,
        status,
        job_id: item.get_str(JOB_ID).map(str::to_owned),
        last_update_time: item
            .get_number(LAST_UPDATE_TIME)
            .map(millis_to_time)
            .transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use sleeper_core::{KeyType, KeyValue, PartitionSplitter, Schema};

    use super::*;

    #[test]
    fn test_split_partition_item() {
        let schema = Schema::single_key("key", KeyType::Long);
        let root = Partition::root("root", &schema);
        let split = PartitionSplitter::split(&root, 0, KeyValue::Long(10)).unwrap();

        let item = partition_to_item(&split.parent).unwrap();
        assert_eq!(item.get_bool(IS_LEAF), Some(false));
        assert_eq!(item.get_number(SPLIT_DIMENSION), Some(0));
        assert_eq!(partition_from_item(&item).unwrap(), split.parent);

        let item = partition_to_item(&split.left).unwrap();
        assert_eq!(item.get_number(SPLIT_DIMENSION), Some(-1));
        assert_eq!(partition_from_item(&item).unwrap(), split.left);
    }

    #[test]
    fn test_file_item_keeps_millisecond_time() {
        let time = millis_to_time(1_685_620_800_123).unwrap();
        let file = FileInfo::new("file.parquet", "root", 12)
            .with_row_key_bounds(1_i64, 99_i64)
            .with_job_id("job")
            .with_last_update_time(time);
        let item = file_to_item(&file).unwrap();
        assert_eq!(item.get_str(STATUS), Some("FILE_IN_PARTITION"));
        assert_eq!(file_from_item(&item).unwrap(), file);
    }

    #[test]
    fn test_file_item_missing_attribute() {
        let item = Item::new().with(FILE_NAME, "file.parquet");
        let err = file_from_item(&item).unwrap_err();
        assert_eq!(err.current_context(), &Error::Deserialize("file info"));
    }

    #[test]
    fn test_file_in_partition_keys_are_unambiguous() {
        assert_ne!(
            file_in_partition_key("a/b", "c"),
            file_in_partition_key("a", "b/c")
        );
        assert!(file_in_partition_key("a", "b").starts_with(FILE_IN_PARTITION_PREFIX));
    }
}
