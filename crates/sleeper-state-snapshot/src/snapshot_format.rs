//! Parquet encoding of partition and file snapshots.
//!
//! Booleans and lists in the partition snapshot are stored as strings, and
//! regions and row keys as JSON, so both snapshots have flat string-heavy
//! schemas that any Parquet reader can inspect.

use std::sync::Arc;

use arrow_array::{Array, ArrayRef, Int32Array, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use error_stack::{IntoReport, ResultExt};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use sleeper_core::{FileInfo, FileStatus, Key, Partition};
use sleeper_state::{Error, Result};

/// Records kept in one snapshot.
pub trait SnapshotRecord: Clone + Send + Sync + 'static {
    /// Name used in snapshot paths and error messages.
    const NAME: &'static str;

    fn schema() -> SchemaRef;

    fn to_columns(records: &[Self]) -> Result<Vec<ArrayRef>>;

    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>>;
}

pub(crate) fn encode<T: SnapshotRecord>(records: &[T]) -> Result<Bytes> {
    let batch = RecordBatch::try_new(T::schema(), T::to_columns(records)?)
        .into_report()
        .change_context(Error::Serialize(T::NAME))?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut buffer = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), Some(props))
        .into_report()
        .change_context(Error::Serialize(T::NAME))?;
    writer
        .write(&batch)
        .into_report()
        .change_context(Error::Serialize(T::NAME))?;
    writer
        .close()
        .into_report()
        .change_context(Error::Serialize(T::NAME))?;
    Ok(Bytes::from(buffer))
}

pub(crate) fn decode<T: SnapshotRecord>(bytes: Bytes) -> Result<Vec<T>> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(bytes)
        .into_report()
        .change_context(Error::Deserialize(T::NAME))?
        .build()
        .into_report()
        .change_context(Error::Deserialize(T::NAME))?;

    let mut records = Vec::new();
    for batch in reader {
        let batch = batch
            .into_report()
            .change_context(Error::Deserialize(T::NAME))?;
        records.extend(T::from_batch(&batch)?);
    }
    Ok(records)
}

fn column<'a, A: Array + 'static>(
    batch: &'a RecordBatch,
    name: &str,
    record: &'static str,
) -> Result<&'a A> {
    batch
        .column_by_name(name)
        .and_then(|column| column.as_any().downcast_ref::<A>())
        .ok_or_else(|| {
            error_stack::report!(Error::Deserialize(record))
                .attach_printable(format!("missing or mistyped column '{name}'"))
        })
}

fn optional_string(array: &StringArray, index: usize) -> Option<String> {
    array.is_valid(index).then(|| array.value(index).to_owned())
}

fn to_json<T: serde::Serialize>(value: &T, what: &'static str) -> Result<String> {
    serde_json::to_string(value)
        .into_report()
        .change_context(Error::Serialize(what))
}

fn from_json<T: serde::de::DeserializeOwned>(json: &str, what: &'static str) -> Result<T> {
    serde_json::from_str(json)
        .into_report()
        .change_context(Error::Deserialize(what))
        .attach_printable_lazy(|| json.to_owned())
}

const PARTITION_ID: &str = "partitionId";
const LEAF_PARTITION: &str = "leafPartition";
const PARENT_PARTITION_ID: &str = "parentPartitionId";
const CHILD_PARTITION_IDS: &str = "childPartitionIds";
const REGION: &str = "region";
const SPLIT_DIMENSION: &str = "splitDimension";

impl SnapshotRecord for Partition {
    const NAME: &'static str = "partitions";

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new(PARTITION_ID, DataType::Utf8, false),
            Field::new(LEAF_PARTITION, DataType::Utf8, false),
            Field::new(PARENT_PARTITION_ID, DataType::Utf8, true),
            Field::new(CHILD_PARTITION_IDS, DataType::Utf8, false),
            Field::new(REGION, DataType::Utf8, false),
            Field::new(SPLIT_DIMENSION, DataType::Int32, false),
        ]))
    }

    fn to_columns(partitions: &[Self]) -> Result<Vec<ArrayRef>> {
        let ids = StringArray::from_iter_values(partitions.iter().map(|p| p.id.as_str()));
        let leaves = StringArray::from_iter_values(
            partitions
                .iter()
                .map(|p| if p.is_leaf { "true" } else { "false" }),
        );
        let parents: StringArray = partitions.iter().map(|p| p.parent_id.as_deref()).collect();
        let children = partitions
            .iter()
            .map(|p| to_json(&p.child_ids, "child partition ids"))
            .collect::<Result<Vec<_>>>()?;
        let regions = partitions
            .iter()
            .map(|p| to_json(&p.region, "partition region"))
            .collect::<Result<Vec<_>>>()?;
        let split_dimensions = partitions
            .iter()
            .map(|p| match p.split_dimension {
                None => Ok(-1),
                Some(dimension) => i32::try_from(dimension)
                    .into_report()
                    .change_context(Error::Serialize("split dimension")),
            })
            .collect::<Result<Vec<i32>>>()?;

        Ok(vec![
            Arc::new(ids),
            Arc::new(leaves),
            Arc::new(parents),
            Arc::new(StringArray::from(children)),
            Arc::new(StringArray::from(regions)),
            Arc::new(Int32Array::from(split_dimensions)),
        ])
    }

    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>> {
        let ids: &StringArray = column(batch, PARTITION_ID, Self::NAME)?;
        let leaves: &StringArray = column(batch, LEAF_PARTITION, Self::NAME)?;
        let parents: &StringArray = column(batch, PARENT_PARTITION_ID, Self::NAME)?;
        let children: &StringArray = column(batch, CHILD_PARTITION_IDS, Self::NAME)?;
        let regions: &StringArray = column(batch, REGION, Self::NAME)?;
        let split_dimensions: &Int32Array = column(batch, SPLIT_DIMENSION, Self::NAME)?;

        (0..batch.num_rows())
            .map(|row| {
                Ok(Partition {
                    id: ids.value(row).to_owned(),
                    region: from_json(regions.value(row), "partition region")?,
                    is_leaf: leaves.value(row) == "true",
                    parent_id: optional_string(parents, row),
                    child_ids: from_json(children.value(row), "child partition ids")?,
                    split_dimension: usize::try_from(split_dimensions.value(row)).ok(),
                })
            })
            .collect()
    }
}

const FILE_NAME: &str = "fileName";
const FILE_STATUS: &str = "fileStatus";
const NUMBER_OF_RECORDS: &str = "numberOfRecords";
const MIN_ROW_KEY: &str = "minRowKey";
const MAX_ROW_KEY: &str = "maxRowKey";
const JOB_ID: &str = "jobId";
const LAST_UPDATE_TIME: &str = "lastStateStoreUpdateTime";

fn keys_to_json<'a>(keys: impl Iterator<Item = Option<&'a Key>>) -> Result<StringArray> {
    let keys = keys
        .map(|key| key.map(|key| to_json(key, "row key")).transpose())
        .collect::<Result<Vec<Option<String>>>>()?;
    Ok(StringArray::from(keys))
}

impl SnapshotRecord for FileInfo {
    const NAME: &'static str = "files";

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new(FILE_NAME, DataType::Utf8, false),
            Field::new(FILE_STATUS, DataType::Utf8, false),
            Field::new(PARTITION_ID, DataType::Utf8, false),
            Field::new(NUMBER_OF_RECORDS, DataType::Int64, false),
            Field::new(MIN_ROW_KEY, DataType::Utf8, true),
            Field::new(MAX_ROW_KEY, DataType::Utf8, true),
            Field::new(JOB_ID, DataType::Utf8, true),
            Field::new(LAST_UPDATE_TIME, DataType::Int64, true),
        ]))
    }

    fn to_columns(files: &[Self]) -> Result<Vec<ArrayRef>> {
        let names = StringArray::from_iter_values(files.iter().map(|f| f.filename.as_str()));
        let statuses = StringArray::from_iter_values(files.iter().map(|f| f.status.to_string()));
        let partitions =
            StringArray::from_iter_values(files.iter().map(|f| f.partition_id.as_str()));
        let records = files
            .iter()
            .map(|f| {
                i64::try_from(f.number_of_records)
                    .into_report()
                    .change_context(Error::Serialize("number of records"))
            })
            .collect::<Result<Vec<_>>>()?;
        let job_ids: StringArray = files.iter().map(|f| f.job_id.as_deref()).collect();
        let update_times: Int64Array = files
            .iter()
            .map(|f| f.last_update_time.map(|time| time.timestamp_millis()))
            .collect();

        Ok(vec![
            Arc::new(names),
            Arc::new(statuses),
            Arc::new(partitions),
            Arc::new(Int64Array::from(records)),
            Arc::new(keys_to_json(files.iter().map(|f| f.min_row_key.as_ref()))?),
            Arc::new(keys_to_json(files.iter().map(|f| f.max_row_key.as_ref()))?),
            Arc::new(job_ids),
            Arc::new(update_times),
        ])
    }

    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>> {
        let names: &StringArray = column(batch, FILE_NAME, Self::NAME)?;
        let statuses: &StringArray = column(batch, FILE_STATUS, Self::NAME)?;
        let partitions: &StringArray = column(batch, PARTITION_ID, Self::NAME)?;
        let records: &Int64Array = column(batch, NUMBER_OF_RECORDS, Self::NAME)?;
        let min_keys: &StringArray = column(batch, MIN_ROW_KEY, Self::NAME)?;
        let max_keys: &StringArray = column(batch, MAX_ROW_KEY, Self::NAME)?;
        let job_ids: &StringArray = column(batch, JOB_ID, Self::NAME)?;
        let update_times: &Int64Array = column(batch, LAST_UPDATE_TIME, Self::NAME)?;

        (0..batch.num_rows())
            .map(|row| {
                let status: FileStatus = statuses.value(row).parse().map_err(|e: String| {
                    error_stack::report!(Error::Deserialize("file status")).attach_printable(e)
                })?;
                let last_update_time = if update_times.is_valid(row) {
                    let millis = update_times.value(row);
                    let time = Utc.timestamp_millis_opt(millis).single().ok_or_else(|| {
                        error_stack::report!(Error::Deserialize("update time"))
                            .attach_printable(millis)
                    })?;
                    Some(time)
                } else {
                    None
                };
                Ok(FileInfo {
                    filename: names.value(row).to_owned(),
                    partition_id: partitions.value(row).to_owned(),
                    number_of_records: u64::try_from(records.value(row))
                        .into_report()
                        .change_context(Error::Deserialize("number of records"))?,
                    min_row_key: optional_string(min_keys, row)
                        .map(|json| from_json(&json, "row key"))
                        .transpose()?,
                    max_row_key: optional_string(max_keys, row)
                        .map(|json| from_json(&json, "row key"))
                        .transpose()?,
                    status,
                    job_id: optional_string(job_ids, row),
                    last_update_time,
                })
            })
            .collect()
    }
}
