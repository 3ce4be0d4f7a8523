use std::str::FromStr;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use error_stack::ResultExt;
use sleeper_state::{
    Clock, Error, FileInfoStore, PartitionStore, Result, RevisionKind, RevisionStore,
    SnapshotRetryPolicy, StateStore, StateStoreKind, SystemClock, TableProperties,
};
use sleeper_state_items::{ItemFileInfoStore, ItemPartitionStore};
use sleeper_state_sled::SledItemTable;
use sleeper_state_snapshot::{
    ObjectStoreRegistry, ObjectStoreUrl, SnapshotFileInfoStore, SnapshotPartitionStore,
    SnapshotStore,
};

use crate::ProviderConfig;

/// Cache of state stores, one per table name.
///
/// Stores are built on first request and kept until the provider is
/// dropped. Every store shares the provider's database, object store
/// clients and clock.
#[derive(Debug)]
pub struct StateStoreProvider {
    db: sled::Db,
    registry: Arc<ObjectStoreRegistry>,
    clock: Arc<dyn Clock>,
    snapshot_retry: SnapshotRetryPolicy,
    stores: DashMap<String, StateStore>,
}

impl StateStoreProvider {
    pub fn try_new(config: ProviderConfig) -> Result<Self> {
        let db = match &config.db_path {
            Some(path) => SledItemTable::open_db(path)?,
            None => SledItemTable::temporary_db()?,
        };
        Ok(Self {
            db,
            registry: Arc::new(ObjectStoreRegistry::new()),
            clock: Arc::new(SystemClock),
            snapshot_retry: config.snapshot_retry,
            stores: DashMap::new(),
        })
    }

    /// Use `clock` for every store built from now on.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn object_store_registry(&self) -> &Arc<ObjectStoreRegistry> {
        &self.registry
    }

    /// The state store of the table described by `properties`.
    ///
    /// The store is built on the first call for a table name. Later calls
    /// return the cached store even if `properties` differ.
    pub fn state_store(&self, properties: &TableProperties) -> Result<StateStore> {
        match self.stores.entry(properties.table_name.clone()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let store = self
                    .build(properties)
                    .attach_printable_lazy(|| format!("table '{}'", properties.table_name))?;
                tracing::info!(
                    table = %properties.table_name,
                    backend = ?properties.state_store,
                    "Created state store"
                );
                Ok(entry.insert(store).value().clone())
            }
        }
    }

    /// Number of tables with a cached store.
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    fn build(&self, properties: &TableProperties) -> Result<StateStore> {
        properties.validate()?;
        let table = &properties.table_name;
        let (partitions, files): (Arc<dyn PartitionStore>, Arc<dyn FileInfoStore>) =
            match properties.state_store {
                StateStoreKind::Items => {
                    let partitions = ItemPartitionStore::new(
                        properties.schema.clone(),
                        SledItemTable::open(&self.db, &format!("{table}-partitions"))?,
                        properties.consistent_reads,
                        properties.scan_page_size,
                    );
                    let files = ItemFileInfoStore::new(
                        SledItemTable::open(&self.db, &format!("{table}-files"))?,
                        self.clock.clone(),
                        properties.garbage_collection_delay(),
                        properties.consistent_reads,
                        properties.scan_page_size,
                    );
                    (Arc::new(partitions), Arc::new(files))
                }
                StateStoreKind::Snapshot => {
                    let url = properties
                        .snapshot_url
                        .as_deref()
                        .ok_or_else(|| error_stack::report!(Error::MissingField("snapshot_url")))?;
                    let base_url =
                        ObjectStoreUrl::from_str(url).change_context(Error::InvalidConfig)?;
                    let revisions = RevisionStore::new(SledItemTable::open(
                        &self.db,
                        &format!("{table}-revisions"),
                    )?);

                    let partitions = SnapshotPartitionStore::new(
                        properties.schema.clone(),
                        self.snapshots(RevisionKind::Partitions, &revisions, &base_url),
                    );
                    let files = SnapshotFileInfoStore::new(
                        self.snapshots(RevisionKind::Files, &revisions, &base_url),
                        self.clock.clone(),
                        properties.garbage_collection_delay(),
                    );
                    (Arc::new(partitions), Arc::new(files))
                }
            };
        Ok(StateStore::new(table, partitions, files))
    }

    fn snapshots<T: sleeper_state_snapshot::SnapshotRecord>(
        &self,
        kind: RevisionKind,
        revisions: &RevisionStore,
        base_url: &ObjectStoreUrl,
    ) -> SnapshotStore<T> {
        SnapshotStore::new(
            kind,
            revisions.clone(),
            self.registry.clone(),
            base_url.clone(),
            self.snapshot_retry.clone(),
        )
    }
}
