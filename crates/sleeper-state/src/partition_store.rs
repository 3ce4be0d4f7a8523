use error_stack::ResultExt;
use itertools::Itertools;
use sleeper_core::{Partition, PartitionTree, Schema};

use crate::{Error, Result};

/// The id of the root partition written by [PartitionStore::initialise].
pub const ROOT_PARTITION_ID: &str = "root";

/// Owns the partition tree of one table.
#[async_trait::async_trait]
pub trait PartitionStore: Send + Sync + std::fmt::Debug {
    fn schema(&self) -> &Schema;

    /// Write a single root leaf covering the whole key space.
    ///
    /// Fails if the table already has partitions.
    async fn initialise(&self) -> Result<()> {
        let root = Partition::root(ROOT_PARTITION_ID, self.schema());
        self.initialise_with_partitions(vec![root]).await
    }

    /// Write the given partitions as the initial tree.
    ///
    /// Fails if any partition already exists.
    async fn initialise_with_partitions(&self, partitions: Vec<Partition>) -> Result<()>;

    async fn get_all_partitions(&self) -> Result<Vec<Partition>>;

    async fn get_leaf_partitions(&self) -> Result<Vec<Partition>> {
        let partitions = self.get_all_partitions().await?;
        Ok(partitions.into_iter().filter(|p| p.is_leaf).collect())
    }

    /// Replace the leaf `parent` with itself as an internal partition plus
    /// two new leaf children.
    ///
    /// `parent` is passed in its split form (not a leaf, listing the two
    /// children). The split applies only if the stored parent is still a
    /// leaf; a caller that loses a race with another split of the same
    /// partition gets [Error::ConcurrentModification] and nothing changes.
    async fn atomically_split_partition(
        &self,
        parent: &Partition,
        child1: &Partition,
        child2: &Partition,
    ) -> Result<()>;
}

/// Partition ids and filenames are joined with NUL in record keys.
pub fn validate_identifier(id: &str) -> Result<()> {
    error_stack::ensure!(!id.contains('\0'), Error::InvalidIdentifier(id.to_owned()));
    Ok(())
}

/// Check a split request before touching the backend.
pub fn validate_split(parent: &Partition, child1: &Partition, child2: &Partition) -> Result<()> {
    for partition in [parent, child1, child2] {
        validate_identifier(&partition.id)?;
    }
    let Some(dimension) = parent.split_dimension.filter(|_| !parent.is_leaf) else {
        error_stack::bail!(Error::InvalidSplitParent(parent.id.clone()));
    };

    let expected = vec![child1.id.clone(), child2.id.clone()];
    error_stack::ensure!(
        parent.child_ids.iter().sorted().eq(expected.iter().sorted()) && child1.id != child2.id,
        Error::ChildrenMismatch {
            parent: parent.id.clone(),
            expected,
            actual: parent.child_ids.clone(),
        }
    );

    for child in [child1, child2] {
        error_stack::ensure!(
            child.parent_id.as_deref() == Some(parent.id.as_str()),
            Error::ChildParentMismatch {
                child: child.id.clone(),
                parent: parent.id.clone(),
            }
        );
        error_stack::ensure!(
            child.is_leaf && child.child_ids.is_empty(),
            Error::ChildNotLeaf(child.id.clone())
        );
    }

    validate_child_regions(parent, dimension, child1, child2)
}

/// The children must be the parent's region cut in two along `dimension`.
fn validate_child_regions(
    parent: &Partition,
    dimension: usize,
    child1: &Partition,
    child2: &Partition,
) -> Result<()> {
    let mismatch = || error_stack::report!(Error::ChildRegionsMismatch(parent.id.clone()));

    let parent_range = parent.region.range(dimension).ok_or_else(mismatch)?;
    let range1 = child1.region.range(dimension).ok_or_else(mismatch)?;
    let range2 = child2.region.range(dimension).ok_or_else(mismatch)?;
    let (lower, upper) = if range1.min <= range2.min {
        (range1, range2)
    } else {
        (range2, range1)
    };
    let covers = lower.min == parent_range.min
        && lower.max.as_ref() == Some(&upper.min)
        && upper.max == parent_range.max
        && lower.min < upper.min;

    let other_dimensions_match = [child1, child2].iter().all(|child| {
        child.region.ranges().len() == parent.region.ranges().len()
            && child
                .region
                .ranges()
                .iter()
                .zip(parent.region.ranges())
                .enumerate()
                .all(|(d, (c, p))| d == dimension || c == p)
    });

    if covers && other_dimensions_match {
        Ok(())
    } else {
        Err(mismatch())
    }
}

/// Check that partitions form a single tree with consistent links.
pub fn validate_partitions(partitions: &[Partition]) -> Result<()> {
    let tree = PartitionTree::try_new(partitions.to_vec()).change_context(Error::InvalidPartitions)?;
    error_stack::ensure!(tree.len() == partitions.len(), Error::InvalidPartitions);

    for partition in partitions {
        validate_identifier(&partition.id)?;
        error_stack::ensure!(
            partition.is_leaf == partition.child_ids.is_empty(),
            Error::InvalidPartitions
        );
        if let Some(parent_id) = &partition.parent_id {
            let parent = tree
                .partition(parent_id)
                .ok_or_else(|| error_stack::report!(Error::UnknownPartition(parent_id.clone())))
                .change_context(Error::InvalidPartitions)?;
            error_stack::ensure!(
                parent.child_ids.contains(&partition.id),
                Error::InvalidPartitions
            );
        }
        tree.children(&partition.id)
            .change_context(Error::InvalidPartitions)?;
    }
    Ok(())
}
