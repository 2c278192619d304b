//! Error types shared by the fetchers, writers and the polling loop

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Everything that can go wrong while downloading or persisting weather data
#[derive(Error, Debug)]
pub enum HydrometError {
    /// Bad coordinates, date ranges or horizons
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// The request never produced a usable response
    #[error("network error: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    /// The API answered, but not with what we asked for
    #[error("API error: {message}")]
    Api { message: String },

    /// Writing, reading or pruning output files failed
    #[error("file system error at {}: {message}", path.display())]
    FileSystem { path: PathBuf, message: String },
}

impl HydrometError {
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn api<S: Into<String>>(message: S) -> Self {
        Self::Api {
            message: message.into(),
        }
    }

    pub fn file_system<E: std::fmt::Display>(path: &Path, cause: E) -> Self {
        Self::FileSystem {
            path: path.to_path_buf(),
            message: cause.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, HydrometError>;
