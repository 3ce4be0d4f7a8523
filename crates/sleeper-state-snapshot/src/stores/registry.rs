use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use error_stack::{IntoReport, ResultExt};
use object_store::ObjectStore;

use super::{Error, ObjectStoreKey, ObjectStoreUrl};

/// Cache of object store clients, one per [ObjectStoreKey].
///
/// All `mem://` URLs resolved through one registry share a single in-memory
/// store.
#[derive(Default, Debug)]
pub struct ObjectStoreRegistry {
    object_stores: DashMap<ObjectStoreKey, Arc<dyn ObjectStore>>,
}

impl ObjectStoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object_store(
        &self,
        url: &ObjectStoreUrl,
    ) -> error_stack::Result<Arc<dyn ObjectStore>, Error> {
        let key = url.key()?;
        match self.object_stores.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(entry) => Ok(entry.get().clone()),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let object_store = create_object_store(vacant.key())?;
                Ok(vacant.insert(object_store).value().clone())
            }
        }
    }

    /// Write a new object.
    pub async fn put(&self, url: &ObjectStoreUrl, bytes: Bytes) -> error_stack::Result<(), Error> {
        let path = url.path()?;
        let length = bytes.len();
        self.object_store(url)?
            .put(&path, bytes)
            .await
            .into_report()
            .change_context_lazy(|| Error::Writing(url.clone()))?;
        tracing::debug!("Wrote {length} bytes to {url}");
        Ok(())
    }

    pub async fn get(&self, url: &ObjectStoreUrl) -> error_stack::Result<Bytes, Error> {
        let path = url.path()?;
        let read_error = || Error::Reading(url.clone());
        let bytes = self
            .object_store(url)?
            .get(&path)
            .await
            .into_report()
            .change_context_lazy(read_error)?
            .bytes()
            .await
            .into_report()
            .change_context_lazy(read_error)?;
        tracing::debug!("Read {} bytes from {url}", bytes.len());
        Ok(bytes)
    }

    pub async fn delete(&self, url: &ObjectStoreUrl) -> error_stack::Result<(), Error> {
        let path = url.path()?;
        self.object_store(url)?
            .delete(&path)
            .await
            .into_report()
            .change_context_lazy(|| Error::Deleting(url.clone()))
    }
}

fn create_object_store(key: &ObjectStoreKey) -> error_stack::Result<Arc<dyn ObjectStore>, Error> {
    match key {
        ObjectStoreKey::Local => Ok(Arc::new(object_store::local::LocalFileSystem::new())),
        ObjectStoreKey::Memory => Ok(Arc::new(object_store::memory::InMemory::new())),
        ObjectStoreKey::Aws {
            bucket,
            region,
            virtual_hosted_style_request,
        } => {
            let builder = object_store::aws::AmazonS3Builder::from_env()
                .with_bucket_name(bucket)
                .with_virtual_hosted_style_request(*virtual_hosted_style_request);
            let builder = if let Some(region) = region {
                builder.with_region(region)
            } else {
                builder
            };
            let object_store = builder
                .build()
                .into_report()
                .change_context_lazy(|| Error::CreatingObjectStore(key.clone()))?;
            Ok(Arc::new(object_store))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_registry_reuses_clients() {
        let registry = ObjectStoreRegistry::new();
        let a = ObjectStoreUrl::from_str("mem:///a").unwrap();
        let b = ObjectStoreUrl::from_str("mem:///b").unwrap();

        assert!(!registry.object_stores.contains_key(&ObjectStoreKey::Memory));
        let store_a = registry.object_store(&a).unwrap();
        let store_b = registry.object_store(&b).unwrap();
        assert!(Arc::ptr_eq(&store_a, &store_b));
        assert_eq!(store_a.to_string(), "InMemory");
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let registry = ObjectStoreRegistry::new();
        let url = ObjectStoreUrl::from_str("mem:///table/snapshot.parquet").unwrap();

        registry
            .put(&url, Bytes::from_static(b"snapshot"))
            .await
            .unwrap();
        assert_eq!(registry.get(&url).await.unwrap(), Bytes::from_static(b"snapshot"));

        registry.delete(&url).await.unwrap();
        let err = registry.get(&url).await.unwrap_err();
        assert!(matches!(err.current_context(), Error::Reading(_)));
    }

    #[tokio::test]
    async fn test_local_file_system() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("file://{}/snapshot.parquet", dir.path().display());
        let url = ObjectStoreUrl::from_str(&url).unwrap();
        let registry = ObjectStoreRegistry::new();

        registry.put(&url, Bytes::from_static(b"data")).await.unwrap();
        assert!(dir.path().join("snapshot.parquet").exists());
        assert_eq!(registry.get(&url).await.unwrap(), Bytes::from_static(b"data"));
    }
}
