//! Error taxonomy shared by every registry, matching and approval operation.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::PersonStatus;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("person not found: {0}")]
    NotFound(u64),
    #[error("person {id} is {status}, expected {expected}")]
    InvalidState {
        id: u64,
        status: PersonStatus,
        expected: PersonStatus,
    },
    #[error("no usable face in any stored photo of person {0}")]
    NoUsableFace(u64),
    #[error("encoding extraction failed: {0}")]
    Extraction(String),
    #[error("registry storage failed at {path}: {source}")]
    StorageFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("registry file {path} is invalid: {message}")]
    CorruptStore { path: PathBuf, message: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
