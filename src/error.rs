use std::{fmt, io, path::StripPrefixError};

use sqlx::Error as SqlxError;
use thiserror::Error;
use walkdir::Error as WalkDirError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Custom error: {0}")]
    Custom(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Document view error: {0}")]
    Document(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("Malformed scope '{0}', expected '<arch>.<module type>'")]
    MalformedScope(String),
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
    #[error("Cannot find library class [{class}] for scope [{scope}] when evaluating {platform}")]
    UnresolvedLibrary {
        class: String,
        scope: String,
        platform: String,
    },
}

impl From<StripPrefixError> for GraphError {
    fn from(src: StripPrefixError) -> GraphError {
        GraphError::NotFound(format!("Strip prefix failed for path. Error: {src}"))
    }
}

impl From<toml::de::Error> for GraphError {
    fn from(src: toml::de::Error) -> GraphError {
        GraphError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<io::Error> for GraphError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => GraphError::NotFound(format!("{x}")),
            _ => GraphError::Io(format!("IOError: {}", x.kind())),
        }
    }
}

impl From<WalkDirError> for GraphError {
    fn from(x: WalkDirError) -> Self {
        match x.path() {
            Some(path) => GraphError::Io(format!("Workspace walk failed at {path:?}: {x}")),
            None => GraphError::Io(format!("Workspace walk failed: {x}")),
        }
    }
}

impl From<fmt::Error> for GraphError {
    fn from(x: fmt::Error) -> Self {
        GraphError::Custom(format!("{x}"))
    }
}

impl From<rayon::ThreadPoolBuildError> for GraphError {
    fn from(x: rayon::ThreadPoolBuildError) -> Self {
        GraphError::Custom(format!("Could not build parse worker pool: {x}"))
    }
}

impl From<tokio::task::JoinError> for GraphError {
    fn from(x: tokio::task::JoinError) -> Self {
        GraphError::Custom(format!("Parse worker task failed: {x}"))
    }
}

impl From<SqlxError> for GraphError {
    fn from(db_error: SqlxError) -> Self {
        GraphError::Database(format!("{db_error:?}"))
    }
}
