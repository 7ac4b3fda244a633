pub mod loader;
pub mod obj;
pub mod ply;
pub mod point_cloud;
pub mod transformer;

pub use loader::*;
pub use obj::*;
pub use ply::*;
pub use point_cloud::*;
pub use transformer::*;

use thiserror::Error;

/// Failures while reading or writing mesh files.
#[derive(Debug, Error)]
pub enum MeshIoError {
    #[error("failed to read '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write '{path}': {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed {format} data: {message}")]
    Malformed {
        format: &'static str,
        message: String,
    },

    #[error("unsupported mesh extension '{0}'")]
    UnsupportedExtension(String),

    #[error("decoded cloud is invalid: {0}")]
    InvalidCloud(#[from] PointCloudError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
