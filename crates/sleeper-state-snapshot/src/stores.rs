mod object_store_url;
mod registry;

pub use object_store_url::*;
pub use registry::*;

#[derive(derive_more::Display, Debug)]
pub enum Error {
    #[display(fmt = "invalid URL '{_0}'")]
    InvalidUrl(String),
    #[display(fmt = "missing host in URL '{_0}'")]
    MissingHost(url::Url),
    #[display(fmt = "unsupported scheme '{}' in URL '{_0}'", "_0.scheme()")]
    UnsupportedScheme(url::Url),
    #[display(fmt = "unsupported host in URL '{_0}'")]
    UnsupportedHost(url::Url),
    #[display(fmt = "invalid path '{}' in URL '{_0}'", "_0.path()")]
    InvalidPath(url::Url),
    #[display(fmt = "error creating object store for {_0:?}")]
    CreatingObjectStore(ObjectStoreKey),
    #[display(fmt = "writing object '{_0}'")]
    Writing(ObjectStoreUrl),
    #[display(fmt = "reading object '{_0}'")]
    Reading(ObjectStoreUrl),
    #[display(fmt = "deleting object '{_0}'")]
    Deleting(ObjectStoreUrl),
}

impl error_stack::Context for Error {}
