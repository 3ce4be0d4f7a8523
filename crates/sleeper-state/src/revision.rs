use std::sync::Arc;

use error_stack::ResultExt;

use crate::item_table::{Condition, Item, WriteOp, WriteOutcome};
use crate::{Error, ItemTable, Result};

const REVISION_ATTRIBUTE: &str = "revision";

/// Identifies one immutable snapshot: a monotonic revision number plus a
/// random token, so writers racing to the same revision number still write
/// to distinct paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RevisionId {
    revision: u64,
    token: String,
}

impl RevisionId {
    /// The first revision of a new snapshot series.
    pub fn initial() -> Self {
        Self::new(1)
    }

    fn new(revision: u64) -> Self {
        Self {
            revision,
            token: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// The revision to attempt to write after this one.
    pub fn next(&self) -> Self {
        Self::new(self.revision + 1)
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl std::fmt::Display for RevisionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Zero-padded so lexical order of snapshot paths matches revision order.
        write!(f, "{:012}-{}", self.revision, self.token)
    }
}

impl std::str::FromStr for RevisionId {
    type Err = error_stack::Report<Error>;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = || {
            error_stack::report!(Error::Deserialize("revision id")).attach_printable(s.to_owned())
        };
        let (revision, token) = s.split_once('-').ok_or_else(invalid)?;
        let revision = revision.parse().map_err(|_| invalid())?;
        if token.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            revision,
            token: token.to_owned(),
        })
    }
}

/// Which snapshot series a revision pointer refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum RevisionKind {
    #[display(fmt = "partitions")]
    Partitions,
    #[display(fmt = "files")]
    Files,
}

impl RevisionKind {
    fn pointer_key(&self) -> &'static str {
        match self {
            RevisionKind::Partitions => "CURRENT_PARTITIONS_REVISION_ID",
            RevisionKind::Files => "CURRENT_FILES_REVISION_ID",
        }
    }
}

/// Holds the pointers to the current snapshot of each kind.
///
/// Pointer updates are conditional on the pointer still holding the
/// revision the writer read. This is the single point where concurrent
/// snapshot writers are serialized.
#[derive(Debug, Clone)]
pub struct RevisionStore {
    table: Arc<dyn ItemTable>,
}

impl RevisionStore {
    pub fn new(table: Arc<dyn ItemTable>) -> Self {
        Self { table }
    }

    /// Read the current revision, or `None` if nothing has been written.
    pub async fn current(&self, kind: RevisionKind) -> Result<Option<RevisionId>> {
        let item = self
            .table
            .get(kind.pointer_key(), true)
            .await
            .attach_printable_lazy(|| format!("reading {kind} revision pointer"))?;
        match item {
            None => Ok(None),
            Some(item) => {
                let revision = item
                    .get_str(REVISION_ATTRIBUTE)
                    .ok_or(Error::Deserialize("revision pointer"))?;
                Ok(Some(revision.parse()?))
            }
        }
    }

    /// Create the pointer, only if it does not yet exist.
    pub async fn create(&self, kind: RevisionKind, revision: &RevisionId) -> Result<WriteOutcome> {
        self.table
            .write(WriteOp::Put {
                key: kind.pointer_key().to_owned(),
                item: Item::new().with(REVISION_ATTRIBUTE, revision.to_string()),
                condition: Condition::NotExists,
            })
            .await
    }

    /// Move the pointer from `current` to `next`, only if it still points at
    /// `current`.
    pub async fn conditional_update(
        &self,
        kind: RevisionKind,
        current: &RevisionId,
        next: &RevisionId,
    ) -> Result<WriteOutcome> {
        self.table
            .write(WriteOp::Put {
                key: kind.pointer_key().to_owned(),
                item: Item::new().with(REVISION_ATTRIBUTE, next.to_string()),
                condition: Condition::attribute_equals(REVISION_ATTRIBUTE, current.to_string()),
            })
            .await
    }
}
