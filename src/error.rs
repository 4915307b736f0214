use std::path::PathBuf;
use thiserror::Error;

/// The main error type for ondisk operations.
#[derive(Debug, Error)]
pub enum OndiskError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot specify both allow list and block list, pick one")]
    ConflictingSiteFilters,

    #[error("Invalid batch size {0}: must be at least 1")]
    InvalidBatchSize(usize),

    #[error("Failed to resolve catalog environment: {message}")]
    Environment { message: String },

    #[error("Failed to parse catalog config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },

    #[error("Catalog config {path} is missing '{key}' in section [client]")]
    ConfigMissing { path: PathBuf, key: String },

    #[error("Catalog config {path} has an invalid '{key}' value '{value}': {message}")]
    ConfigValue {
        path: PathBuf,
        key: String,
        value: String,
        message: String,
    },

    #[error("Unsupported catalog auth type '{0}' (supported: userpass, x509, x509_proxy)")]
    UnsupportedAuthType(String),

    #[error("Catalog authentication failed: {message}")]
    CatalogAuth { message: String },

    #[error("Catalog request to {url} failed: {message}")]
    CatalogRequest { url: String, message: String },

    #[error("Catalog returned HTTP {status} for {url}: {message}")]
    CatalogStatus {
        url: String,
        status: u16,
        message: String,
    },

    #[error("Malformed catalog response from {url}: {message}")]
    CatalogResponse { url: String, message: String },

    #[error("Failed to write file list to {path}: {source}")]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File list {path} holds a name that is not UTF-8 at item {index}")]
    InvalidFileName { path: PathBuf, index: usize },

    #[error("Failed to decode pickle at byte {offset}: {message}")]
    PickleDecode { offset: usize, message: String },
}
