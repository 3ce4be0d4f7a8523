use std::str::FromStr;

use error_stack::{IntoReport, ResultExt};
use itertools::Itertools;
use url::Url;

use super::Error;

/// URL of an object (or a directory of objects) in an object store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ObjectStoreUrl {
    url: Url,
}

impl ObjectStoreUrl {
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The path of the object within its store.
    pub fn path(&self) -> error_stack::Result<object_store::path::Path, Error> {
        object_store::path::Path::parse(self.url.path())
            .into_report()
            .change_context_lazy(|| Error::InvalidPath(self.url.clone()))
    }

    pub fn key(&self) -> error_stack::Result<ObjectStoreKey, Error> {
        ObjectStoreKey::from_url(&self.url)
    }

    /// The URL of `name` under this URL.
    ///
    /// Unlike [Url::join], the last segment of this URL is always kept.
    pub fn join(&self, name: &str) -> error_stack::Result<Self, Error> {
        let joined = format!("{}/{}", self.url.as_str().trim_end_matches('/'), name);
        joined.parse()
    }
}

impl FromStr for ObjectStoreUrl {
    type Err = error_stack::Report<Error>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let url = Url::from_str(s)
            .into_report()
            .change_context_lazy(|| Error::InvalidUrl(s.to_owned()))?;
        Ok(Self { url })
    }
}

impl std::fmt::Display for ObjectStoreUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.url.fmt(f)
    }
}

/// Identifies one object store client.
#[derive(Debug, Hash, Eq, PartialEq, Clone)]
pub enum ObjectStoreKey {
    Local,
    Memory,
    Aws {
        bucket: String,
        region: Option<String>,
        virtual_hosted_style_request: bool,
    },
}

impl ObjectStoreKey {
    fn from_url(url: &Url) -> error_stack::Result<Self, Error> {
        match url.scheme() {
            "file" => Ok(Self::Local),
            "mem" => Ok(Self::Memory),
            "s3" | "s3a" => {
                let bucket = url
                    .host_str()
                    .ok_or_else(|| Error::MissingHost(url.clone()))?
                    .to_owned();
                Ok(Self::Aws {
                    bucket,
                    region: None,
                    virtual_hosted_style_request: false,
                })
            }
            "https" => {
                let host = url
                    .host_str()
                    .ok_or_else(|| Error::MissingHost(url.clone()))?;
                match host.splitn(4, '.').collect_tuple() {
                    Some(("s3", bucket, "amazonaws", "com")) => Ok(Self::Aws {
                        bucket: bucket.to_owned(),
                        region: None,
                        virtual_hosted_style_request: false,
                    }),
                    Some((bucket, "s3", region, "amazonaws.com")) => Ok(Self::Aws {
                        bucket: bucket.to_owned(),
                        region: Some(region.to_owned()),
                        virtual_hosted_style_request: true,
                    }),
                    _ => error_stack::bail!(Error::UnsupportedHost(url.clone())),
                }
            }
            _ => error_stack::bail!(Error::UnsupportedScheme(url.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> ObjectStoreUrl {
        ObjectStoreUrl::from_str(s).unwrap()
    }

    #[test]
    fn test_memory_url() {
        let table = url("mem:///tables/my-table");
        assert_eq!(table.key().unwrap(), ObjectStoreKey::Memory);

        let snapshot = table.join("partitions/000000000001-a.parquet").unwrap();
        assert_eq!(
            snapshot.to_string(),
            "mem:///tables/my-table/partitions/000000000001-a.parquet"
        );
        assert_eq!(
            snapshot.path().unwrap(),
            object_store::path::Path::parse("tables/my-table/partitions/000000000001-a.parquet")
                .unwrap()
        );
    }

    #[test]
    fn test_join_keeps_trailing_segment() {
        let table = url("file:///data/table/");
        assert_eq!(table.key().unwrap(), ObjectStoreKey::Local);
        assert_eq!(
            table.join("files").unwrap().to_string(),
            "file:///data/table/files"
        );
    }

    #[test]
    fn test_aws_urls() {
        assert_eq!(
            url("s3://bucket/tables").key().unwrap(),
            ObjectStoreKey::Aws {
                bucket: "bucket".to_owned(),
                region: None,
                virtual_hosted_style_request: false,
            }
        );
        assert_eq!(
            url("https://bucket.s3.eu-west-2.amazonaws.com/tables")
                .key()
                .unwrap(),
            ObjectStoreKey::Aws {
                bucket: "bucket".to_owned(),
                region: Some("eu-west-2".to_owned()),
                virtual_hosted_style_request: true,
            }
        );
    }

    #[test]
    fn test_unsupported_scheme() {
        let err = url("ftp://host/path").key().unwrap_err();
        assert!(matches!(err.current_context(), Error::UnsupportedScheme(_)));
    }
}
