use cairn_types::ObjectId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("two bundles with name {0} found")]
    DuplicateBundle(String),

    #[error("bundle name {0} is reserved")]
    ReservedBundleName(String),

    #[error("could not find dependency {dependency} when processing bundle {bundle}")]
    UnresolvedDependency { dependency: String, bundle: String },

    #[error("could not find asset {url} for bundle {bundle}")]
    MissingAsset { url: String, bundle: String },

    #[error("cyclic dependency found, involving {0}")]
    CyclicDependency(String),

    #[error("invalid bundle {path}: {reason}")]
    InvalidBundle { path: String, reason: String },

    #[error("CRC32 mismatch for object {0}")]
    CrcMismatch(ObjectId),

    #[error("compression failed: {0}")]
    Compression(String),

    #[error("invalid asset selector: {0}")]
    InvalidSelector(String),

    #[error("store error: {0}")]
    Store(#[from] cairn_store::StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type BundleResult<T> = Result<T, BundleError>;
