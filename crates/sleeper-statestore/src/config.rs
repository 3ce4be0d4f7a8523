use std::path::PathBuf;

use error_stack::{IntoReport, ResultExt};
use serde::{Deserialize, Serialize};
use sleeper_state::{Error, SnapshotRetryPolicy};

/// Process-wide settings shared by every table's state store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Path of the sled database holding item tables and revision pointers.
    ///
    /// A temporary database is used when unset.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    #[serde(default)]
    pub snapshot_retry: SnapshotRetryPolicy,
}

impl ProviderConfig {
    pub fn from_yaml(yaml: &str) -> error_stack::Result<Self, Error> {
        serde_yaml::from_str(yaml)
            .into_report()
            .change_context(Error::InvalidConfig)
    }
}
