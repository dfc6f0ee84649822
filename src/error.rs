//! Rich diagnostic error types for the opencenter control plane.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text so callers (and the HTTP layer that maps
//! these onto status codes) know exactly what went wrong.

use miette::Diagnostic;
use thiserror::Error;

use crate::config::ConfigError;
use crate::seeds::SeedError;

/// Top-level error type for the control plane.
#[derive(Debug, Error, Diagnostic)]
pub enum OcError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Seed(#[from] SeedError),
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("{entity} id {id} does not exist")]
    #[diagnostic(
        code(opencenter::store::id_not_found),
        help("No record with this primary key exists. List the table to find a valid id.")
    )]
    IdNotFound { entity: String, id: i64 },

    #[error("unable to create {entity}: {message}")]
    #[diagnostic(
        code(opencenter::store::create),
        help(
            "The record was rejected and nothing was written. Check that every \
             required field is present, that unique fields do not collide with an \
             existing row, and that JSON fields hold an object or a list."
        )
    )]
    Create { entity: String, message: String },

    #[error("invalid {entity} update: {message}")]
    #[diagnostic(
        code(opencenter::store::validation),
        help(
            "The update was rolled back. Unknown and read-only fields are dropped \
             silently; this error means a remaining value had the wrong type or \
             violated a uniqueness constraint."
        )
    )]
    Validation { entity: String, message: String },

    #[error("redb error: {message}")]
    #[diagnostic(
        code(opencenter::store::redb),
        help(
            "The embedded database failed and the enclosing write was rolled back. \
             Check the data directory for corruption or exhausted disk space."
        )
    )]
    Redb { message: String },

    #[error("I/O error: {source}")]
    #[diagnostic(
        code(opencenter::store::io),
        help("A filesystem operation failed. Check that the data directory exists and is writable.")
    )]
    Io {
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {message}")]
    #[diagnostic(
        code(opencenter::store::serde),
        help(
            "A stored row could not be encoded or decoded as JSON. \
             This usually means the data directory was written by an incompatible version."
        )
    )]
    Serialization { message: String },

    #[error("query error: {message}")]
    #[diagnostic(
        code(opencenter::store::query),
        help("The filter expression evaluator failed or returned records outside the table schema.")
    )]
    Query { message: String },
}

impl StoreError {
    pub(crate) fn create(entity: &str, message: impl Into<String>) -> Self {
        StoreError::Create {
            entity: entity.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn validation(entity: &str, message: impl Into<String>) -> Self {
        StoreError::Validation {
            entity: entity.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn not_found(entity: &str, id: i64) -> Self {
        StoreError::IdNotFound {
            entity: entity.to_string(),
            id,
        }
    }
}

/// Convenience alias for functions returning control-plane results.
pub type OcResult<T> = std::result::Result<T, OcError>;
