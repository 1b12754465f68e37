//! Error types for the lease pool engine.
//!
//! All fallible operations in this crate return [`Result<T>`], which uses
//! the [`Error`] enum for error variants. Expected outcomes such as an
//! unknown address or an exhausted pool are not errors; those surface as
//! `None` or `false` from the pool operations.

use std::net::Ipv4Addr;

/// Errors that can occur while building or operating an address pool.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File system I/O error while reading or writing the configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (configuration file).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A caller supplied a value that can never be valid.
    ///
    /// Empty names, unspecified (`0.0.0.0`) or nil mandatory addresses,
    /// missing mandatory builder fields and inverted address ranges all end
    /// up here. Nothing is applied when this is returned.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An operation was invoked on a binding in the wrong state.
    ///
    /// Committing a dynamic lease onto a permanent binding (or a permanent
    /// lease onto a dynamic one) is a caller bug. The pool is left untouched.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Invalid configuration document.
    ///
    /// Returned by [`Config::validate`](crate::Config::validate) when an
    /// instance entry cannot be parsed or built.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The address does not belong to the pool being operated on.
    #[error("Address {0} is not part of the pool")]
    AddressOutOfRange(Ipv4Addr),

    /// An instance with the same name is already registered.
    #[error("Instance {0} already exists")]
    DuplicateInstance(String),
}

/// A specialized Result type for lease pool operations.
pub type Result<T> = std::result::Result<T, Error>;
