//! Client interface for a key-value table with conditional writes.
//!
//! This is the shape of backend the state store is designed for: point
//! reads, paginated prefix scans, and writes of one or more items that are
//! applied together only if every item's condition holds at write time.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};

use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    String(String),
    Number(i64),
    Bool(bool),
    StringList(Vec<String>),
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_owned())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Number(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<Vec<String>> for AttributeValue {
    fn from(value: Vec<String>) -> Self {
        AttributeValue::StringList(value)
    }
}

/// A set of named attributes stored under one key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item(BTreeMap<String, AttributeValue>);

impl Item {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<AttributeValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Set the attribute if `value` is present.
    pub fn with_opt(self, name: &str, value: Option<impl Into<AttributeValue>>) -> Self {
        match value {
            Some(value) => self.with(name, value),
            None => self,
        }
    }

    pub fn set(&mut self, name: &str, value: impl Into<AttributeValue>) {
        self.0.insert(name.to_owned(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<AttributeValue> {
        self.0.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.0.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.0.get(name) {
            Some(AttributeValue::String(value)) => Some(value),
            _ => None,
        }
    }

    pub fn get_number(&self, name: &str) -> Option<i64> {
        match self.0.get(name) {
            Some(AttributeValue::Number(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.0.get(name) {
            Some(AttributeValue::Bool(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_string_list(&self, name: &str) -> Option<&[String]> {
        match self.0.get(name) {
            Some(AttributeValue::StringList(value)) => Some(value),
            _ => None,
        }
    }

    /// Overwrite attributes with those from `other`.
    pub fn merge(&mut self, other: Item) {
        self.0.extend(other.0);
    }
}

/// A condition on the stored item which must hold for a write to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Always,
    Exists,
    NotExists,
    /// The item exists and the attribute has the given value.
    AttributeEquals(String, AttributeValue),
    /// The item exists and does not have the attribute.
    AttributeMissing(String),
    /// Every one of the conditions holds.
    All(Vec<Condition>),
}

impl Condition {
    pub fn attribute_equals(name: &str, value: impl Into<AttributeValue>) -> Self {
        Condition::AttributeEquals(name.to_owned(), value.into())
    }

    pub fn attribute_missing(name: &str) -> Self {
        Condition::AttributeMissing(name.to_owned())
    }

    /// Evaluate the condition against the currently stored item.
    pub fn holds(&self, current: Option<&Item>) -> bool {
        match (self, current) {
            (Condition::Always, _) => true,
            (Condition::Exists, current) => current.is_some(),
            (Condition::NotExists, current) => current.is_none(),
            (Condition::AttributeEquals(name, value), Some(item)) => item.get(name) == Some(value),
            (Condition::AttributeMissing(name), Some(item)) => item.get(name).is_none(),
            (Condition::All(conditions), current) => {
                conditions.iter().all(|condition| condition.holds(current))
            }
            (_, None) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Store `item`, replacing any existing item.
    Put {
        key: String,
        item: Item,
        condition: Condition,
    },
    /// Set and remove attributes of an existing item.
    ///
    /// Fails the condition check if the item does not exist.
    Update {
        key: String,
        set: Item,
        remove: Vec<String>,
        condition: Condition,
    },
    Delete {
        key: String,
        condition: Condition,
    },
}

impl WriteOp {
    pub fn key(&self) -> &str {
        match self {
            WriteOp::Put { key, .. } | WriteOp::Update { key, .. } | WriteOp::Delete { key, .. } => {
                key
            }
        }
    }

    pub fn condition(&self) -> &Condition {
        match self {
            WriteOp::Put { condition, .. }
            | WriteOp::Update { condition, .. }
            | WriteOp::Delete { condition, .. } => condition,
        }
    }

    /// The item stored after applying this operation to `current`.
    ///
    /// Returns `None` if the item is deleted.
    pub fn apply(&self, current: Option<Item>) -> Option<Item> {
        match self {
            WriteOp::Put { item, .. } => Some(item.clone()),
            WriteOp::Update { set, remove, .. } => current.map(|mut item| {
                item.merge(set.clone());
                for name in remove {
                    item.remove(name);
                }
                item
            }),
            WriteOp::Delete { .. } => None,
        }
    }
}

/// The result of a conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Every operation was applied.
    Committed,
    /// The condition of the operation at `index` did not hold, so nothing
    /// was applied.
    ConditionFailed { index: usize, key: String },
}

/// One page of a scan.
#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    pub items: Vec<(String, Item)>,
    /// The last key returned, if there may be more items after it.
    pub last_key: Option<String>,
}

#[async_trait::async_trait]
pub trait ItemTable: Send + Sync + std::fmt::Debug {
    async fn get(&self, key: &str, consistent: bool) -> Result<Option<Item>>;

    /// Return up to `limit` items whose key starts with `prefix`, in key
    /// order, starting after `start_after`.
    async fn scan(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        limit: usize,
        consistent: bool,
    ) -> Result<ScanPage>;

    /// Apply all operations atomically, or none of them if any condition
    /// does not hold.
    async fn transact(&self, ops: Vec<WriteOp>) -> Result<WriteOutcome>;

    async fn write(&self, op: WriteOp) -> Result<WriteOutcome> {
        self.transact(vec![op]).await
    }
}

/// Lazily scan every item under `prefix`, one page at a time.
///
/// Each call starts a fresh scan.
pub fn scan_stream(
    table: Arc<dyn ItemTable>,
    prefix: String,
    page_size: usize,
    consistent: bool,
) -> BoxStream<'static, Result<(String, Item)>> {
    // `None` state means the scan is finished.
    futures::stream::try_unfold(Some(None::<String>), move |state| {
        let table = table.clone();
        let prefix = prefix.clone();
        async move {
            let Some(start_after) = state else {
                return Ok(None);
            };
            let page = table
                .scan(&prefix, start_after.as_deref(), page_size, consistent)
                .await?;
            let next = page.last_key.map(Some);
            let items = futures::stream::iter(page.items.into_iter().map(Ok));
            let result: Result<_> = Ok(Some((items, next)));
            result
        }
    })
    .try_flatten()
    .boxed()
}

/// Scan every item under `prefix`.
pub async fn scan_all(
    table: Arc<dyn ItemTable>,
    prefix: &str,
    page_size: usize,
    consistent: bool,
) -> Result<Vec<(String, Item)>> {
    scan_stream(table, prefix.to_owned(), page_size, consistent)
        .try_collect()
        .await
}
