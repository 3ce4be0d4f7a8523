use std::sync::Arc;

use sleeper_core::{Partition, Schema};
use sleeper_state::item_table::{scan_all, Condition, WriteOp, WriteOutcome};
use sleeper_state::{validate_partitions, validate_split, Error, ItemTable, PartitionStore, Result};

use crate::item_format::{
    partition_from_item, partition_to_item, region_json, split_update, IS_LEAF, REGION,
};

/// Partitions stored one item per partition, keyed by partition id.
#[derive(Debug)]
pub struct ItemPartitionStore {
    schema: Schema,
    table: Arc<dyn ItemTable>,
    consistent_reads: bool,
    page_size: usize,
}

impl ItemPartitionStore {
    pub fn new(
        schema: Schema,
        table: Arc<dyn ItemTable>,
        consistent_reads: bool,
        page_size: usize,
    ) -> Self {
        Self {
            schema,
            table,
            consistent_reads,
            page_size,
        }
    }

    /// Why the conditional update of `parent` failed.
    async fn split_rejected(&self, parent: &Partition) -> Result<error_stack::Report<Error>> {
        let Some(item) = self.table.get(&parent.id, true).await? else {
            return Ok(error_stack::report!(Error::UnknownPartition(parent.id.clone())));
        };
        let stored = partition_from_item(&item)?;
        let conflict = || Error::ConcurrentModification(format!("partition '{}'", parent.id));
        let err = if !stored.is_leaf {
            error_stack::report!(Error::ParentNotLeaf(parent.id.clone())).change_context(conflict())
        } else if stored.region != parent.region {
            error_stack::report!(Error::ParentRegionMismatch(parent.id.clone()))
        } else {
            // The partition changed back between the write and this read.
            error_stack::report!(conflict())
        };
        Ok(err)
    }
}

#[async_trait::async_trait]
impl PartitionStore for ItemPartitionStore {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn initialise_with_partitions(&self, partitions: Vec<Partition>) -> Result<()> {
        validate_partitions(&partitions)?;

        let ops = partitions
            .iter()
            .map(|partition| {
                Ok(WriteOp::Put {
                    key: partition.id.clone(),
                    item: partition_to_item(partition)?,
                    condition: Condition::NotExists,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        match self.table.transact(ops).await? {
            WriteOutcome::Committed => {
                tracing::info!(partitions = partitions.len(), "Initialised partitions");
                Ok(())
            }
            WriteOutcome::ConditionFailed { key, .. } => {
                error_stack::bail!(Error::PartitionAlreadyExists(key))
            }
        }
    }

    async fn get_all_partitions(&self) -> Result<Vec<Partition>> {
        let items = scan_all(self.table.clone(), "", self.page_size, self.consistent_reads).await?;
        tracing::debug!(partitions = items.len(), "Loaded partitions");
        items
            .iter()
            .map(|(_, item)| partition_from_item(item))
            .collect()
    }

    async fn atomically_split_partition(
        &self,
        parent: &Partition,
        child1: &Partition,
        child2: &Partition,
    ) -> Result<()> {
        validate_split(parent, child1, child2)?;

        let ops = vec![
            WriteOp::Update {
                key: parent.id.clone(),
                set: split_update(parent),
                remove: vec![],
                condition: Condition::All(vec![
                    Condition::attribute_equals(IS_LEAF, true),
                    Condition::attribute_equals(REGION, region_json(parent)?),
                ]),
            },
            WriteOp::Put {
                key: child1.id.clone(),
                item: partition_to_item(child1)?,
                condition: Condition::NotExists,
            },
            WriteOp::Put {
                key: child2.id.clone(),
                item: partition_to_item(child2)?,
                condition: Condition::NotExists,
            },
        ];

        match self.table.transact(ops).await? {
            WriteOutcome::Committed => {
                tracing::info!(
                    parent = %parent.id,
                    child1 = %child1.id,
                    child2 = %child2.id,
                    "Split partition"
                );
                Ok(())
            }
            WriteOutcome::ConditionFailed { index: 0, .. } => {
                let err = self.split_rejected(parent).await?;
                tracing::warn!(parent = %parent.id, "Split rejected: {}", err.current_context());
                Err(err)
            }
            WriteOutcome::ConditionFailed { key, .. } => {
                error_stack::bail!(Error::PartitionAlreadyExists(key))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use sleeper_core::{
        partitions_from_split_points, KeyType, KeyValue, PartitionSplitter, Range, Region,
    };
    use sleeper_state_sled::SledItemTable;

    use super::*;

    fn store() -> ItemPartitionStore {
        sleeper_testing::init_test_logging();
        let db = SledItemTable::temporary_db().unwrap();
        let table = SledItemTable::open(&db, "partitions").unwrap();
        // Small pages so scans cross page boundaries.
        ItemPartitionStore::new(sleeper_testing::long_key_schema(), table, true, 2)
    }

    #[tokio::test]
    async fn test_initialise_writes_root() {
        let store = store();
        store.initialise().await.unwrap();

        let partitions = store.get_all_partitions().await.unwrap();
        assert_eq!(
            partitions,
            vec![Partition::root("root", &sleeper_testing::long_key_schema())]
        );

        let err = store.initialise().await.unwrap_err();
        assert_eq!(
            err.current_context(),
            &Error::PartitionAlreadyExists("root".to_owned())
        );
    }

    #[tokio::test]
    async fn test_initialise_from_split_points() {
        let store = store();
        let schema = sleeper_testing::long_key_schema();
        let partitions = partitions_from_split_points(
            &schema,
            &[KeyValue::Long(10), KeyValue::Long(20), KeyValue::Long(30)],
        )
        .unwrap();
        store
            .initialise_with_partitions(partitions.clone())
            .await
            .unwrap();

        let mut stored = store.get_all_partitions().await.unwrap();
        stored.sort_by(|a, b| a.id.cmp(&b.id));
        let mut expected = partitions;
        expected.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(stored, expected);
        assert_eq!(store.get_leaf_partitions().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_split_leaf() {
        let store = store();
        store.initialise().await.unwrap();
        let root = Partition::root("root", &sleeper_testing::long_key_schema());
        let split = PartitionSplitter::split(&root, 0, KeyValue::Long(50)).unwrap();

        store
            .atomically_split_partition(&split.parent, &split.left, &split.right)
            .await
            .unwrap();

        let mut all = store.get_all_partitions().await.unwrap();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        let mut expected = vec![split.parent.clone(), split.left.clone(), split.right.clone()];
        expected.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(all, expected);

        let leaves = store.get_leaf_partitions().await.unwrap();
        assert_eq!(leaves.len(), 2);
        assert!(leaves.iter().all(|p| p.parent_id.as_deref() == Some("root")));
    }

    #[tokio::test]
    async fn test_second_split_of_same_leaf_is_rejected() {
        let store = store();
        store.initialise().await.unwrap();
        let root = Partition::root("root", &sleeper_testing::long_key_schema());
        let first = PartitionSplitter::split(&root, 0, KeyValue::Long(50)).unwrap();
        let second = PartitionSplitter::split(&root, 0, KeyValue::Long(20)).unwrap();

        store
            .atomically_split_partition(&first.parent, &first.left, &first.right)
            .await
            .unwrap();
        let err = store
            .atomically_split_partition(&second.parent, &second.left, &second.right)
            .await
            .unwrap_err();
        assert!(err.current_context().is_conflict());
        assert_eq!(store.get_all_partitions().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_split_of_unknown_partition() {
        let store = store();
        store.initialise().await.unwrap();
        let schema = Schema::single_key("key", KeyType::Long);
        let other = Partition::root("other", &schema);
        let split = PartitionSplitter::split(&other, 0, KeyValue::Long(1)).unwrap();

        let err = store
            .atomically_split_partition(&split.parent, &split.left, &split.right)
            .await
            .unwrap_err();
        assert_eq!(
            err.current_context(),
            &Error::UnknownPartition("other".to_owned())
        );
        assert_eq!(store.get_all_partitions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_split_with_stale_parent_region_is_rejected() {
        let store = store();
        store.initialise().await.unwrap();
        let schema = sleeper_testing::long_key_schema();
        let mut stale = Partition::root("root", &schema);
        stale.region = Region::new(vec![Range::new(
            "key",
            KeyValue::Long(0),
            Some(KeyValue::Long(100)),
        )]);
        let split = PartitionSplitter::split(&stale, 0, KeyValue::Long(50)).unwrap();

        let err = store
            .atomically_split_partition(&split.parent, &split.left, &split.right)
            .await
            .unwrap_err();
        assert_eq!(
            err.current_context(),
            &Error::ParentRegionMismatch("root".to_owned())
        );
        assert!(!err.current_context().is_conflict());
        assert_eq!(
            store.get_all_partitions().await.unwrap(),
            vec![Partition::root("root", &schema)]
        );
    }
}
