//! # Error Taxonomy
//!
//! Typed errors for the conditions distinguished in the router's error
//! handling design: most are fatal to the whole process, but
//! [`RouterError::Registration`] and [`RouterError::Routing`] are recovered
//! inline by the caller and never need to surface past the phase that
//! produced them.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Recovered: the router answers with an `ERROR` message and keeps
    /// enumerating the offending client's inventory.
    #[error("address range overlap: {0}")]
    Registration(String),

    /// Recovered: the router synthesises an error `TRANSACTION` response.
    #[error("routing error: {0}")]
    Routing(String),
}
