//! STUN transaction handling for the rvoip stack.
//!
//! This crate correlates outbound STUN requests with their responses over a
//! connectionless transport, following the RFC 5389 transaction model: each
//! request carries a transaction id, a response is matched back purely by
//! that id, and requests that see no response before their deadline are
//! failed out.
//!
//! - [`Agent`] owns the table of pending transactions and guarantees exactly
//!   one [`AgentEvent`] per started transaction.
//! - [`Client`] drives an agent over a [`Multiplexer`] and offers both a
//!   fire-and-forget [`Client::start`] and a call-and-response
//!   [`Client::do_request`].
//!
//! Socket I/O is left to the [`Multiplexer`] implementation.

// Error handling
pub mod error;

// Minimal STUN message model
pub mod message;

// Transaction agent
pub mod agent;

// Request/response client
pub mod client;

// Tracing setup
pub mod logging;

pub use agent::{spawn_collector, Agent, AgentConfig, AgentEvent, DefaultHandler, Handler};
pub use client::{Client, ClientConfig, DatagramCallback, MatchFn, Multiplexer};
pub use error::{Error, Result, TransportError};
pub use message::{
    is_message, Attribute, AttributeType, Message, MessageClass, MessageType, TransactionId,
};

/// Re-export of common types
pub mod prelude {
    pub use super::{
        Agent, AgentConfig, AgentEvent, Client, ClientConfig, Error, Message, MessageType,
        Multiplexer, Result, TransactionId,
    };
}

/// STUN protocol constants
pub mod constants {
    /// STUN magic cookie value (RFC 5389)
    pub const STUN_MAGIC_COOKIE: u32 = 0x2112A442;

    /// STUN message header size
    pub const STUN_HEADER_SIZE: usize = 20;

    /// Transaction id size, magic cookie included
    pub const TRANSACTION_ID_SIZE: usize = 16;

    /// Default port for STUN servers
    pub const DEFAULT_STUN_PORT: u16 = 3478;
}
