use sleeper_core::{Partition, Schema};
use sleeper_state::{validate_partitions, validate_split, Error, PartitionStore, Result};

use crate::SnapshotStore;

/// Partitions kept as one snapshot of the whole tree.
#[derive(Debug)]
pub struct SnapshotPartitionStore {
    schema: Schema,
    snapshots: SnapshotStore<Partition>,
}

impl SnapshotPartitionStore {
    pub fn new(schema: Schema, snapshots: SnapshotStore<Partition>) -> Self {
        Self { schema, snapshots }
    }
}

/// Apply a validated split to the partitions of the current snapshot.
fn apply_split(
    partitions: &mut Vec<Partition>,
    parent: &Partition,
    child1: &Partition,
    child2: &Partition,
) -> Result<()> {
    let index = partitions
        .iter()
        .position(|p| p.id == parent.id)
        .ok_or_else(|| error_stack::report!(Error::UnknownPartition(parent.id.clone())))?;
    if !partitions[index].is_leaf {
        return Err(error_stack::report!(Error::ParentNotLeaf(parent.id.clone()))
            .change_context(Error::ConcurrentModification(format!(
                "partition '{}'",
                parent.id
            ))));
    }
    error_stack::ensure!(
        partitions[index].region == parent.region,
        Error::ParentRegionMismatch(parent.id.clone())
    );
    for child in [child1, child2] {
        error_stack::ensure!(
            partitions.iter().all(|p| p.id != child.id),
            Error::PartitionAlreadyExists(child.id.clone())
        );
    }

    let stored = &mut partitions[index];
    stored.is_leaf = false;
    stored.child_ids = parent.child_ids.clone();
    stored.split_dimension = parent.split_dimension;
    partitions.push(child1.clone());
    partitions.push(child2.clone());
    Ok(())
}

#[async_trait::async_trait]
impl PartitionStore for SnapshotPartitionStore {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn initialise_with_partitions(&self, partitions: Vec<Partition>) -> Result<()> {
        validate_partitions(&partitions)?;
        let count = partitions.len();
        self.snapshots.initialise(partitions).await?;
        tracing::info!(partitions = count, "Initialised partitions");
        Ok(())
    }

    async fn get_all_partitions(&self) -> Result<Vec<Partition>> {
        self.snapshots.records().await
    }

    async fn atomically_split_partition(
        &self,
        parent: &Partition,
        child1: &Partition,
        child2: &Partition,
    ) -> Result<()> {
        validate_split(parent, child1, child2)?;

        let result = self
            .snapshots
            .update(|partitions| {
                apply_split(partitions, parent, child1, child2)?;
                Ok(true)
            })
            .await;
        match &result {
            Ok(()) => tracing::info!(
                parent = %parent.id,
                child1 = %child1.id,
                child2 = %child2.id,
                "Split partition"
            ),
            Err(err) if err.current_context().is_conflict() => {
                tracing::warn!(parent = %parent.id, "Split rejected: {}", err.current_context())
            }
            Err(_) => {}
        }
        result
    }
}
