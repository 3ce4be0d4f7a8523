use serde::{Deserialize, Serialize};

use crate::{Region, Schema};

/// A node in a table's partition tree.
///
/// Partitions refer to their parent and children by id only. Lookups go
/// through a map of id to partition (see [crate::PartitionTree]); the
/// referential invariants are checked when the tree is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub id: String,
    pub region: Region,
    pub is_leaf: bool,
    /// `None` for the root.
    pub parent_id: Option<String>,
    /// Empty for leaves.
    pub child_ids: Vec<String>,
    /// The row-key dimension this partition was split on, if it was split.
    pub split_dimension: Option<usize>,
}

impl Partition {
    /// A leaf partition with the given parent.
    pub fn leaf(id: impl Into<String>, region: Region, parent_id: Option<String>) -> Self {
        Self {
            id: id.into(),
            region,
            is_leaf: true,
            parent_id,
            child_ids: vec![],
            split_dimension: None,
        }
    }

    /// The single root partition of a new table, covering the full key space.
    pub fn root(id: impl Into<String>, schema: &Schema) -> Self {
        Self::leaf(id, Region::full(schema), None)
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Return a copy of this partition turned into an internal node with the
    /// given children.
    pub fn into_split(mut self, child_ids: Vec<String>, dimension: usize) -> Self {
        self.is_leaf = false;
        self.child_ids = child_ids;
        self.split_dimension = Some(dimension);
        self
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "partition '{}' [{}]", self.id, self.region)?;
        if self.is_leaf {
            write!(f, " (leaf)")
        } else {
            write!(f, " (children: {:?})", self.child_ids)
        }
    }
}
