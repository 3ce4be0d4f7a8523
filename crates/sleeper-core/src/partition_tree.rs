use hashbrown::HashMap;
use itertools::Itertools;

use crate::{Error, Key, Partition};

/// Read-only view of a table's partitions, linked by id.
#[derive(Debug, Clone)]
pub struct PartitionTree {
    root_id: String,
    partitions: HashMap<String, Partition>,
}

impl PartitionTree {
    pub fn try_new(partitions: Vec<Partition>) -> error_stack::Result<Self, Error> {
        let roots: Vec<_> = partitions
            .iter()
            .filter(|p| p.is_root())
            .map(|p| p.id.clone())
            .collect();
        let root_id = match roots.len() {
            0 => error_stack::bail!(Error::MissingRoot),
            1 => roots.into_iter().next().ok_or(Error::MissingRoot)?,
            _ => error_stack::bail!(Error::MultipleRoots(roots)),
        };

        let partitions: HashMap<_, _> = partitions.into_iter().map(|p| (p.id.clone(), p)).collect();
        Ok(Self {
            root_id,
            partitions,
        })
    }

    pub fn root(&self) -> &Partition {
        &self.partitions[&self.root_id]
    }

    pub fn partition(&self, id: &str) -> Option<&Partition> {
        self.partitions.get(id)
    }

    pub fn children(&self, id: &str) -> error_stack::Result<Vec<&Partition>, Error> {
        let partition = self
            .partition(id)
            .ok_or_else(|| Error::UnknownPartition(id.to_owned()))?;
        partition
            .child_ids
            .iter()
            .map(|child| {
                self.partition(child)
                    .ok_or_else(|| error_stack::report!(Error::UnknownPartition(child.clone())))
            })
            .try_collect()
    }

    pub fn leaf_partitions(&self) -> impl Iterator<Item = &Partition> + '_ {
        self.partitions.values().filter(|p| p.is_leaf)
    }

    /// Descend from the root to the leaf whose region contains `key`.
    pub fn leaf_partition_for_key(&self, key: &Key) -> error_stack::Result<&Partition, Error> {
        let mut current = self.root();
        while !current.is_leaf {
            current = self
                .children(&current.id)?
                .into_iter()
                .find(|child| child.region.contains(key))
                .ok_or_else(|| Error::UnknownPartition(current.id.clone()))?;
        }
        Ok(current)
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }
}
