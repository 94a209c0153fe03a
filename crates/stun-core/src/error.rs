//! Error types for stun-core
//!
//! Table-consistency violations (duplicate id, missing id, closed agent)
//! are returned synchronously from the call that triggered them. Outcomes
//! of transactions already in flight (stop, timeout, close) are delivered
//! through the transaction handler as part of an [`AgentEvent`](crate::AgentEvent).

use std::fmt;
use std::io;
use std::sync::Arc;
use thiserror::Error;

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in STUN transaction handling
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Operation attempted after the agent was closed.
    #[error("agent is closed")]
    AgentClosed,

    /// A transaction with the same id is already pending.
    #[error("transaction already exists")]
    TransactionExists,

    /// No pending transaction with the given id.
    #[error("transaction does not exist")]
    TransactionNotExists,

    /// Delivered to a handler when its transaction was stopped.
    #[error("transaction is stopped")]
    TransactionStopped,

    /// Delivered to a handler when its transaction passed the deadline.
    #[error("transaction is timed out")]
    TransactionTimeOut,

    /// Outbound write failed in the multiplexer.
    #[error("transport error: {0}")]
    Transport(#[source] TransportError),

    /// Inbound bytes are not a valid STUN message.
    #[error("failed to decode STUN message: {0}")]
    Decode(String),

    /// Message cannot be represented on the wire.
    #[error("failed to encode STUN message: {0}")]
    Encode(String),

    /// No peer address recorded; `Client::dial` was never called.
    #[error("client is not dialed")]
    NotDialed,

    /// No multiplexer attached to the client.
    #[error("no multiplexer attached")]
    NoMultiplexer,

    /// Completion channel dropped without an event.
    #[error("internal channel closed")]
    ChannelClosed,

    /// No async runtime available to drive the collector.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

/// The multiplexer's `io::Error`, shared so that [`Error`] stays `Clone`.
///
/// Equality compares kind and rendered message.
#[derive(Debug, Clone)]
pub struct TransportError(Arc<io::Error>);

impl TransportError {
    pub fn kind(&self) -> io::ErrorKind {
        self.0.kind()
    }

    /// The error exactly as returned by `Multiplexer::write_to`
    pub fn io_error(&self) -> &io::Error {
        &self.0
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl PartialEq for TransportError {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
            || (self.kind() == other.kind() && self.0.to_string() == other.0.to_string())
    }
}

impl Eq for TransportError {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Transport(TransportError(Arc::new(e)))
    }
}

impl Error {
    /// Whether this error is a terminal outcome delivered through a handler
    /// rather than returned from a call.
    pub fn is_transaction_outcome(&self) -> bool {
        matches!(
            self,
            Error::TransactionStopped | Error::TransactionTimeOut | Error::AgentClosed
        )
    }
}
