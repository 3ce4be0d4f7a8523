use crate::{Error, KeyValue, Partition, Range};

/// The three partitions making up a split: the parent as it will look once
/// split, and its two new leaf children.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitPartitions {
    pub parent: Partition,
    pub left: Partition,
    pub right: Partition,
}

/// Builds the partitions for splitting a leaf.
///
/// The split itself must still be applied through the state store, which is
/// the point where concurrent splits of the same leaf are serialized.
#[derive(Debug, Default)]
pub struct PartitionSplitter;

impl PartitionSplitter {
    /// Split `parent` on `dimension` at `split_point`.
    ///
    /// The left child covers `[min, split_point)` and the right child covers
    /// `[split_point, max)`. Child ids are fresh UUIDs.
    pub fn split(
        parent: &Partition,
        dimension: usize,
        split_point: KeyValue,
    ) -> error_stack::Result<SplitPartitions, Error> {
        error_stack::ensure!(parent.is_leaf, Error::NotALeaf(parent.id.clone()));
        let range = parent
            .region
            .range(dimension)
            .ok_or(Error::NoSuchDimension(dimension))?;
        error_stack::ensure!(
            range.min.key_type() == split_point.key_type(),
            Error::KeyTypeMismatch {
                expected: range.min.key_type(),
                actual: split_point.key_type(),
            }
        );
        error_stack::ensure!(
            range.strictly_contains(&split_point),
            Error::SplitPointOutsidePartition(parent.id.clone())
        );

        let left_range = Range::new(&range.field, range.min.clone(), Some(split_point.clone()));
        let right_range = Range::new(&range.field, split_point, range.max.clone());

        let left = Partition::leaf(
            uuid::Uuid::new_v4().to_string(),
            parent.region.with_range(dimension, left_range),
            Some(parent.id.clone()),
        );
        let right = Partition::leaf(
            uuid::Uuid::new_v4().to_string(),
            parent.region.with_range(dimension, right_range),
            Some(parent.id.clone()),
        );
        let parent = parent
            .clone()
            .into_split(vec![left.id.clone(), right.id.clone()], dimension);

        Ok(SplitPartitions {
            parent,
            left,
            right,
        })
    }
}
