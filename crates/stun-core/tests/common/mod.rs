//! Shared test helpers

#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use rvoip_stun_core::logging::{init_tracing, LogSettings};
use rvoip_stun_core::{DatagramCallback, MatchFn, Message, Multiplexer};

pub fn init_logging() {
    let _ = init_tracing(&LogSettings::for_tests());
}

pub fn peer() -> SocketAddr {
    "1.2.3.4:3478".parse().unwrap()
}

/// How the stub answers each write
pub enum Reply {
    /// Never answer
    Silent,
    /// Deliver these bytes to every matching registrant
    Fixed(Bytes),
    /// Answer each request with a binding success carrying its id
    Mirror,
}

/// In-memory multiplexer delivering replies synchronously from `write_to`
pub struct StubMultiplexer {
    clients: Mutex<Vec<(MatchFn, DatagramCallback)>>,
    reply: Mutex<Reply>,
    fail: Option<io::ErrorKind>,
    last_write: Mutex<Option<(Bytes, SocketAddr)>>,
    writes: AtomicUsize,
}

impl StubMultiplexer {
    pub fn new(reply: Reply) -> Self {
        Self {
            clients: Mutex::new(Vec::new()),
            reply: Mutex::new(reply),
            fail: None,
            last_write: Mutex::new(None),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn failing(kind: io::ErrorKind) -> Self {
        Self {
            fail: Some(kind),
            ..Self::new(Reply::Silent)
        }
    }

    pub fn set_reply(&self, reply: Reply) {
        *self.reply.lock() = reply;
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn last_write(&self) -> Option<(Bytes, SocketAddr)> {
        self.last_write.lock().clone()
    }

    /// Feed a datagram as if it had arrived from the network
    pub fn inject(&self, data: &[u8], from: SocketAddr) {
        let clients = self.clients.lock().clone();
        for (matcher, callback) in clients {
            if matcher(data) {
                callback(data, from);
            }
        }
    }
}

#[async_trait]
impl Multiplexer for StubMultiplexer {
    fn add(&self, matcher: MatchFn, callback: DatagramCallback) {
        self.clients.lock().push((matcher, callback));
    }

    async fn write_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        if let Some(kind) = self.fail {
            return Err(io::Error::new(kind, "stub write failure"));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        *self.last_write.lock() = Some((Bytes::copy_from_slice(buf), addr));

        let response = match &*self.reply.lock() {
            Reply::Silent => None,
            Reply::Fixed(bytes) => Some(bytes.clone()),
            Reply::Mirror => Message::decode(buf)
                .ok()
                .and_then(|request| Message::binding_success(request.transaction_id).encode().ok()),
        };
        if let Some(response) = response {
            self.inject(&response, addr);
        }
        Ok(buf.len())
    }
}
