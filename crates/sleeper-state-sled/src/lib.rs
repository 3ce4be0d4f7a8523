#![warn(
    rust_2018_idioms,
    nonstandard_style,
    future_incompatible,
    clippy::mod_module_files,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::undocumented_unsafe_blocks
)]

//! An [ItemTable] stored in a sled tree.
//!
//! Multi-item writes run as sled transactions, so conditions are checked and
//! writes applied atomically with respect to every other writer sharing the
//! same database.

use std::ops::Bound;
use std::sync::Arc;

use error_stack::{IntoReport, ResultExt};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sleeper_state::item_table::{Item, ScanPage, WriteOp, WriteOutcome};
use sleeper_state::{Error, ItemTable, Result};

#[derive(Debug, Clone)]
pub struct SledItemTable {
    name: String,
    tree: sled::Tree,
}

/// Reasons a transaction is aborted.
#[derive(Debug)]
enum Abort {
    Condition(usize),
    Encode,
    Decode,
}

impl SledItemTable {
    /// Open (creating if needed) the table `name` in `db`.
    pub fn open(db: &sled::Db, name: &str) -> Result<Arc<Self>> {
        let tree = db
            .open_tree(name)
            .into_report()
            .change_context(Error::Backend("open"))
            .attach_printable_lazy(|| format!("table '{name}'"))?;
        Ok(Arc::new(Self {
            name: name.to_owned(),
            tree,
        }))
    }

    /// Open (creating if needed) the database at `path`.
    pub fn open_db(path: &std::path::Path) -> Result<sled::Db> {
        sled::open(path)
            .into_report()
            .change_context(Error::Backend("open"))
            .attach_printable_lazy(|| format!("database at '{}'", path.display()))
    }

    /// A temporary database, removed when the last handle is dropped.
    pub fn temporary_db() -> Result<sled::Db> {
        sled::Config::new()
            .temporary(true)
            .open()
            .into_report()
            .change_context(Error::Backend("open"))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn decode(&self, key: &[u8], value: &[u8]) -> Result<Item> {
        bincode::deserialize(value)
            .into_report()
            .change_context(Error::Deserialize("item"))
            .attach_printable_lazy(|| {
                format!(
                    "key '{}' in table '{}'",
                    String::from_utf8_lossy(key),
                    self.name
                )
            })
    }
}

#[async_trait::async_trait]
impl ItemTable for SledItemTable {
    // sled reads are always consistent with committed transactions.
    async fn get(&self, key: &str, _consistent: bool) -> Result<Option<Item>> {
        let value = self
            .tree
            .get(key)
            .into_report()
            .change_context(Error::Backend("get"))
            .attach_printable_lazy(|| format!("key '{key}' in table '{}'", self.name))?;
        value
            .map(|value| self.decode(key.as_bytes(), &value))
            .transpose()
    }

    async fn scan(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        limit: usize,
        _consistent: bool,
    ) -> Result<ScanPage> {
        let lower = match start_after {
            Some(start_after) => Bound::Excluded(start_after.as_bytes()),
            None => Bound::Included(prefix.as_bytes()),
        };

        let mut items = Vec::new();
        for entry in self.tree.range::<&[u8], _>((lower, Bound::Unbounded)) {
            let (key, value) = entry
                .into_report()
                .change_context(Error::Backend("scan"))
                .attach_printable_lazy(|| format!("table '{}'", self.name))?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            let item = self.decode(&key, &value)?;
            let key = String::from_utf8(key.to_vec())
                .into_report()
                .change_context(Error::Deserialize("item key"))?;
            items.push((key, item));
            if items.len() == limit {
                break;
            }
        }

        let last_key = if items.len() == limit {
            items.last().map(|(key, _)| key.clone())
        } else {
            None
        };
        tracing::trace!(table = %self.name, prefix, items = items.len(), "Scanned page");
        Ok(ScanPage { items, last_key })
    }

    async fn transact(&self, ops: Vec<WriteOp>) -> Result<WriteOutcome> {
        let result = self.tree.transaction(|tx| {
            for (index, op) in ops.iter().enumerate() {
                let current = match tx.get(op.key())? {
                    Some(value) => Some(
                        bincode::deserialize::<Item>(&value)
                            .map_err(|_| ConflictableTransactionError::Abort(Abort::Decode))?,
                    ),
                    None => None,
                };

                let updating_missing = matches!(op, WriteOp::Update { .. }) && current.is_none();
                if updating_missing || !op.condition().holds(current.as_ref()) {
                    return Err(ConflictableTransactionError::Abort(Abort::Condition(index)));
                }

                match op.apply(current) {
                    Some(item) => {
                        let value = bincode::serialize(&item)
                            .map_err(|_| ConflictableTransactionError::Abort(Abort::Encode))?;
                        tx.insert(op.key(), value)?;
                    }
                    None => {
                        tx.remove(op.key())?;
                    }
                }
            }
            Ok(())
        });

        match result {
            Ok(()) => Ok(WriteOutcome::Committed),
            Err(TransactionError::Abort(Abort::Condition(index))) => {
                let key = ops[index].key().to_owned();
                tracing::debug!(table = %self.name, key = %key, "Conditional write rejected");
                Ok(WriteOutcome::ConditionFailed { index, key })
            }
            Err(TransactionError::Abort(Abort::Encode)) => Err(error_stack::report!(
                Error::Serialize("item")
            )
            .attach_printable(format!("table '{}'", self.name))),
            Err(TransactionError::Abort(Abort::Decode)) => Err(error_stack::report!(
                Error::Deserialize("item")
            )
            .attach_printable(format!("table '{}'", self.name))),
            Err(TransactionError::Storage(err)) => Err(error_stack::Report::new(err)
                .change_context(Error::Backend("transact"))
                .attach_printable(format!("table '{}'", self.name))),
        }
    }
}
