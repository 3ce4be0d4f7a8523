use std::sync::Arc;
use std::time::Duration;

use error_stack::ResultExt;
use rand::Rng;
use sleeper_state::item_table::WriteOutcome;
use sleeper_state::{Error, Result, RevisionId, RevisionKind, RevisionStore, SnapshotRetryPolicy};

use crate::snapshot_format::{decode, encode, SnapshotRecord};
use crate::stores::{ObjectStoreRegistry, ObjectStoreUrl};

/// A series of immutable snapshots of one record type, with the current one
/// named by a revision pointer.
///
/// Snapshot files are never overwritten. An update writes a new file at a
/// path derived from the next revision id, then swaps the pointer only if
/// it still names the revision the update was computed from.
#[derive(Debug, Clone)]
pub struct SnapshotStore<T> {
    kind: RevisionKind,
    revisions: RevisionStore,
    registry: Arc<ObjectStoreRegistry>,
    base_url: ObjectStoreUrl,
    retry: SnapshotRetryPolicy,
    _records: std::marker::PhantomData<fn() -> T>,
}

/// The outcome of one attempt at an update.
#[derive(Debug)]
enum Attempt {
    Committed(RevisionId),
    /// The update made no change, so nothing was written.
    Unchanged,
    /// Another writer moved the pointer first.
    Conflict { orphan: ObjectStoreUrl },
}

impl<T: SnapshotRecord> SnapshotStore<T> {
    pub fn new(
        kind: RevisionKind,
        revisions: RevisionStore,
        registry: Arc<ObjectStoreRegistry>,
        base_url: ObjectStoreUrl,
        retry: SnapshotRetryPolicy,
    ) -> Self {
        Self {
            kind,
            revisions,
            registry,
            base_url,
            retry,
            _records: std::marker::PhantomData,
        }
    }

    fn snapshot_url(&self, revision: &RevisionId) -> Result<ObjectStoreUrl> {
        self.base_url
            .join(&format!("{}/{revision}.parquet", T::NAME))
            .change_context(Error::Backend("snapshot path"))
    }

    async fn write_snapshot(&self, revision: &RevisionId, records: &[T]) -> Result<ObjectStoreUrl> {
        let url = self.snapshot_url(revision)?;
        let bytes = encode(records)?;
        self.registry
            .put(&url, bytes)
            .await
            .change_context(Error::Backend("write snapshot"))?;
        Ok(url)
    }

    /// Best-effort removal of a snapshot that never became current.
    async fn delete_orphan(&self, url: &ObjectStoreUrl) {
        if let Err(e) = self.registry.delete(url).await {
            tracing::warn!("Failed to delete orphaned snapshot {url}: {e:?}");
        }
    }

    /// Write `records` as revision 1 and create the pointer.
    ///
    /// Fails with [Error::AlreadyInitialised] if the pointer already exists.
    pub async fn initialise(&self, records: Vec<T>) -> Result<()> {
        error_stack::ensure!(
            self.revisions.current(self.kind).await?.is_none(),
            Error::AlreadyInitialised
        );

        let revision = RevisionId::initial();
        let url = self.write_snapshot(&revision, &records).await?;
        match self.revisions.create(self.kind, &revision).await? {
            WriteOutcome::Committed => {
                tracing::info!(kind = %self.kind, "Initialised snapshot at {url}");
                Ok(())
            }
            WriteOutcome::ConditionFailed { .. } => {
                self.delete_orphan(&url).await;
                error_stack::bail!(Error::AlreadyInitialised)
            }
        }
    }

    /// Read the current revision and its records.
    pub async fn read(&self) -> Result<(RevisionId, Vec<T>)> {
        let revision = self
            .revisions
            .current(self.kind)
            .await?
            .ok_or_else(|| error_stack::report!(Error::NotInitialised))
            .attach_printable_lazy(|| format!("no current {} snapshot", self.kind))?;
        let url = self.snapshot_url(&revision)?;
        let bytes = self
            .registry
            .get(&url)
            .await
            .change_context(Error::Backend("read snapshot"))?;
        let records = decode(bytes).attach_printable_lazy(|| url.clone())?;
        tracing::debug!(kind = %self.kind, %revision, records = records.len(), "Read snapshot");
        Ok((revision, records))
    }

    pub async fn records(&self) -> Result<Vec<T>> {
        Ok(self.read().await?.1)
    }

    async fn try_update<F>(&self, update: &mut F) -> Result<Attempt>
    where
        F: FnMut(&mut Vec<T>) -> Result<bool> + Send,
    {
        let (current, mut records) = self.read().await?;
        if !update(&mut records)? {
            return Ok(Attempt::Unchanged);
        }

        let next = current.next();
        let url = self.write_snapshot(&next, &records).await?;
        match self
            .revisions
            .conditional_update(self.kind, &current, &next)
            .await?
        {
            WriteOutcome::Committed => Ok(Attempt::Committed(next)),
            WriteOutcome::ConditionFailed { .. } => Ok(Attempt::Conflict { orphan: url }),
        }
    }

    /// Apply `update` to the current records and commit the result as a new
    /// snapshot.
    ///
    /// `update` returns whether it changed anything. An error from `update`
    /// fails the whole call at once. If another writer commits first, the
    /// update is re-applied to the new records after a random sleep, up to
    /// the policy's number of attempts.
    pub async fn update<F>(&self, mut update: F) -> Result<()>
    where
        F: FnMut(&mut Vec<T>) -> Result<bool> + Send,
    {
        let attempts = self.retry.max_attempts;
        for attempt in 1..=attempts {
            match self.try_update(&mut update).await? {
                Attempt::Committed(revision) => {
                    tracing::debug!(kind = %self.kind, %revision, attempt, "Committed snapshot");
                    return Ok(());
                }
                Attempt::Unchanged => return Ok(()),
                Attempt::Conflict { orphan } => {
                    tracing::warn!(
                        kind = %self.kind,
                        attempt,
                        "Snapshot revision changed during update"
                    );
                    // Under sustained contention these deletes can fail and
                    // leave unreferenced snapshot files behind.
                    self.delete_orphan(&orphan).await;
                    if attempt < attempts {
                        let max_millis = self.retry.max_sleep().as_millis() as u64;
                        let millis = rand::thread_rng().gen_range(0..=max_millis);
                        tokio::time::sleep(Duration::from_millis(millis)).await;
                    }
                }
            }
        }
        error_stack::bail!(Error::RetriesExhausted { attempts })
    }
}
