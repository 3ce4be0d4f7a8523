/// The single error kind surfaced by the state store.
///
/// The variant names the immediate cause. The attached report carries the
/// rest of the context (table, partition and file ids, backend errors).
#[derive(derive_more::Display, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[display(fmt = "missing required field '{_0}'")]
    MissingField(&'static str),
    #[display(fmt = "invalid partitions")]
    InvalidPartitions,
    #[display(fmt = "partition '{_0}' must be passed in its split form (not a leaf, with a split dimension)")]
    InvalidSplitParent(String),
    #[display(fmt = "partition '{_0}' is not a leaf")]
    ParentNotLeaf(String),
    #[display(fmt = "partition '{parent}' should have children {expected:?} but has {actual:?}")]
    ChildrenMismatch {
        parent: String,
        expected: Vec<String>,
        actual: Vec<String>,
    },
    #[display(fmt = "partition '{child}' should have parent '{parent}'")]
    ChildParentMismatch { child: String, parent: String },
    #[display(fmt = "new partition '{_0}' must be a leaf")]
    ChildNotLeaf(String),
    #[display(fmt = "regions of the children of '{_0}' do not exactly cover its region")]
    ChildRegionsMismatch(String),
    #[display(fmt = "region of partition '{_0}' does not match the stored partition")]
    ParentRegionMismatch(String),
    #[display(fmt = "identifier {_0:?} contains a NUL character")]
    InvalidIdentifier(String),
    #[display(fmt = "partition '{_0}' already exists")]
    PartitionAlreadyExists(String),
    #[display(fmt = "no partition with id '{_0}'")]
    UnknownPartition(String),
    #[display(fmt = "file '{_0}' already exists")]
    FileAlreadyExists(String),
    #[display(fmt = "no file-in-partition record for file '{filename}' in partition '{partition_id}'")]
    FileInPartitionMissing {
        filename: String,
        partition_id: String,
    },
    #[display(fmt = "file '{filename}' in partition '{partition_id}' is named more than once")]
    DuplicateFileInPartition {
        filename: String,
        partition_id: String,
    },
    #[display(fmt = "file '{filename}' in partition '{partition_id}' is already assigned to a job")]
    JobAlreadyAssigned {
        filename: String,
        partition_id: String,
    },
    #[display(fmt = "file '{_0}' is not ready for garbage collection")]
    FileNotReadyForDeletion(String),
    #[display(fmt = "concurrent modification of {_0}")]
    ConcurrentModification(String),
    #[display(fmt = "gave up after {attempts} conflicting update attempts")]
    RetriesExhausted { attempts: usize },
    #[display(fmt = "state store is already initialised")]
    AlreadyInitialised,
    #[display(fmt = "state store is not initialised")]
    NotInitialised,
    #[display(fmt = "failed to perform '{_0}' on backend")]
    Backend(&'static str),
    #[display(fmt = "failed to serialize {_0}")]
    Serialize(&'static str),
    #[display(fmt = "failed to deserialize {_0}")]
    Deserialize(&'static str),
    #[display(fmt = "invalid configuration")]
    InvalidConfig,
}

impl error_stack::Context for Error {}

impl Error {
    /// Whether this error means a concurrent writer won a race.
    ///
    /// The operation may succeed if retried later against fresh state.
    /// Every other error is a hard failure for the given input.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::ConcurrentModification(_) | Error::RetriesExhausted { .. }
        )
    }
}

pub type Result<T> = error_stack::Result<T, Error>;
