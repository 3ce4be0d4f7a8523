use std::time::Duration;

use error_stack::{IntoReport, ResultExt};
use serde::{Deserialize, Serialize};
use sleeper_core::Schema;

use crate::Error;

/// Which backend holds a table's state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateStoreKind {
    /// One item per partition and per file record, updated with conditional
    /// multi-item transactions.
    #[default]
    Items,
    /// Whole-table snapshots in an object store, swapped in through a
    /// conditionally updated revision pointer.
    Snapshot,
}

/// The properties of a table that the state store depends on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableProperties {
    pub table_name: String,
    pub schema: Schema,
    #[serde(default)]
    pub state_store: StateStoreKind,
    /// Object store URL under which snapshot files are written, such as
    /// `s3://bucket/tables/my-table` or `mem:///my-table`.
    ///
    /// Required for the snapshot backend.
    #[serde(default)]
    pub snapshot_url: Option<String>,
    /// How long a file stays `GARBAGE_COLLECTION_PENDING` before it is
    /// returned as ready for garbage collection.
    #[serde(default = "default_gc_delay_minutes")]
    pub garbage_collection_delay_minutes: u32,
    /// Whether item-table reads should be strongly consistent.
    #[serde(default = "default_consistent_reads")]
    pub consistent_reads: bool,
    /// Number of items fetched per page when scanning item tables.
    #[serde(default = "default_scan_page_size")]
    pub scan_page_size: usize,
}

fn default_gc_delay_minutes() -> u32 {
    10
}

fn default_consistent_reads() -> bool {
    true
}

fn default_scan_page_size() -> usize {
    100
}

impl TableProperties {
    pub fn new(table_name: impl Into<String>, schema: Schema) -> Self {
        Self {
            table_name: table_name.into(),
            schema,
            state_store: StateStoreKind::default(),
            snapshot_url: None,
            garbage_collection_delay_minutes: default_gc_delay_minutes(),
            consistent_reads: default_consistent_reads(),
            scan_page_size: default_scan_page_size(),
        }
    }

    pub fn from_yaml(yaml: &str) -> error_stack::Result<Self, Error> {
        let properties: Self = serde_yaml::from_str(yaml)
            .into_report()
            .change_context(Error::InvalidConfig)?;
        properties.validate()?;
        Ok(properties)
    }

    pub fn validate(&self) -> error_stack::Result<(), Error> {
        error_stack::ensure!(!self.table_name.is_empty(), Error::MissingField("table_name"));
        error_stack::ensure!(self.scan_page_size > 0, Error::InvalidConfig);
        if self.state_store == StateStoreKind::Snapshot {
            error_stack::ensure!(
                self.snapshot_url.is_some(),
                Error::MissingField("snapshot_url")
            );
        }
        Ok(())
    }

    pub fn garbage_collection_delay(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.garbage_collection_delay_minutes as i64)
    }
}

/// Bounds on the optimistic-concurrency retry loop of the snapshot backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// Upper bound of the random sleep between attempts.
    #[serde(default = "default_max_sleep_millis")]
    pub max_sleep_millis: u64,
}

fn default_max_attempts() -> usize {
    5
}

fn default_max_sleep_millis() -> u64 {
    2_000
}

impl Default for SnapshotRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            max_sleep_millis: default_max_sleep_millis(),
        }
    }
}

impl SnapshotRetryPolicy {
    pub fn max_sleep(&self) -> Duration {
        Duration::from_millis(self.max_sleep_millis)
    }
}

#[cfg(test)]
mod tests {
    use sleeper_core::KeyType;

    use super::*;

    #[test]
    fn test_table_properties_defaults() {
        let properties = TableProperties::from_yaml(
            r#"
table_name: my-table
schema:
  row_keys:
    - name: key
      type: long
"#,
        )
        .unwrap();
        assert_eq!(
            properties,
            TableProperties::new("my-table", Schema::single_key("key", KeyType::Long))
        );
        assert_eq!(
            properties.garbage_collection_delay(),
            chrono::Duration::minutes(10)
        );
    }

    #[test]
    fn test_snapshot_backend_requires_url() {
        let err = TableProperties::from_yaml(
            r#"
table_name: my-table
state_store: snapshot
schema:
  row_keys:
    - name: key
      type: string
"#,
        )
        .unwrap_err();
        assert_eq!(err.current_context(), &Error::MissingField("snapshot_url"));
    }

    #[test]
    fn test_schema_without_row_keys_is_rejected() {
        let err = TableProperties::from_yaml(
            r#"
table_name: my-table
schema:
  row_keys: []
"#,
        )
        .unwrap_err();
        assert_eq!(err.current_context(), &Error::InvalidConfig);
    }
}
