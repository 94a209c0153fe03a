use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;

/// Predicate deciding whether an inbound datagram belongs to a registrant
pub type MatchFn = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

/// Receives inbound datagrams accepted by the paired [`MatchFn`]
pub type DatagramCallback = Arc<dyn Fn(&[u8], SocketAddr) + Send + Sync>;

/// Shares one datagram socket between several protocols.
///
/// Implementations own the socket: they read datagrams, hand each one to
/// every registered callback whose predicate accepts it, and perform
/// outbound writes.
#[async_trait]
pub trait Multiplexer: Send + Sync {
    /// Register interest in inbound datagrams accepted by `matcher`.
    fn add(&self, matcher: MatchFn, callback: DatagramCallback);

    /// Send `buf` to `addr`, returning the number of bytes written.
    async fn write_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize>;
}
