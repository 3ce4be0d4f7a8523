use crate::KeyType;

#[derive(derive_more::Display, Debug, PartialEq)]
pub enum Error {
    #[display(fmt = "schema must have at least one row key field")]
    NoRowKeys,
    #[display(fmt = "no row key field at dimension {_0}")]
    NoSuchDimension(usize),
    #[display(fmt = "expected key of type {expected:?} but was {actual:?}")]
    KeyTypeMismatch { expected: KeyType, actual: KeyType },
    #[display(fmt = "split points must be strictly increasing")]
    UnsortedSplitPoints,
    #[display(fmt = "split point is outside of partition '{_0}'")]
    SplitPointOutsidePartition(String),
    #[display(fmt = "partition '{_0}' is not a leaf")]
    NotALeaf(String),
    #[display(fmt = "partition tree has no root")]
    MissingRoot,
    #[display(fmt = "partition tree has more than one root: {_0:?}")]
    MultipleRoots(Vec<String>),
    #[display(fmt = "no partition with id '{_0}'")]
    UnknownPartition(String),
}

impl error_stack::Context for Error {}
