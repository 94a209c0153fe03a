//! # STUN Client
//!
//! [`Client`] pairs one [`Agent`] with one [`Multiplexer`]. Outbound
//! requests are written through the multiplexer; inbound datagrams the
//! multiplexer recognises as STUN are decoded and fed to
//! [`Agent::process`]. A background collector times out requests that get
//! no answer.
//!
//! [`Client::do_request`] gives callers a call-and-response idiom on top of
//! the same start/process/collect machinery used by [`Client::start`]:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rvoip_stun_core::{Client, ClientConfig, Message, Multiplexer};
//!
//! # async fn example(mux: Arc<dyn Multiplexer>) -> rvoip_stun_core::Result<()> {
//! let client = Client::new(ClientConfig::default())?;
//! client.multiplex(mux);
//! client.dial("192.0.2.10:3478".parse().unwrap())?;
//!
//! client
//!     .do_request(&Message::binding_request(), |response| {
//!         println!("got {}", response.msg_type);
//!         Ok(())
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod multiplexer;

pub use config::{ClientConfig, DEFAULT_TIMEOUT};
pub use multiplexer::{DatagramCallback, MatchFn, Multiplexer};

use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use crate::agent::{spawn_collector, Agent, AgentConfig, AgentEvent};
use crate::error::{Error, Result};
use crate::message::{is_message, Message, TransactionId};

/// Request/response STUN client
pub struct Client {
    agent: Arc<Agent>,
    config: ClientConfig,
    peer: RwLock<Option<SocketAddr>>,
    multiplexer: RwLock<Option<Arc<dyn Multiplexer>>>,
    collector: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Create a client and start its transaction collector.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        tokio::runtime::Handle::try_current().map_err(|e| Error::Runtime(e.to_string()))?;

        let agent = Arc::new(Agent::new(
            AgentConfig::new().with_collect_rate(config.collect_rate),
        ));
        let collector = spawn_collector(&agent);
        debug!(peer = ?config.peer, timeout = ?config.timeout, "Created STUN client");

        Ok(Self {
            agent,
            peer: RwLock::new(config.peer),
            config,
            multiplexer: RwLock::new(None),
            collector: Mutex::new(Some(collector)),
        })
    }

    /// Record the peer that requests are sent to.
    pub fn dial(&self, addr: SocketAddr) -> Result<()> {
        if self.agent.is_closed() {
            return Err(Error::AgentClosed);
        }
        *self.peer.write() = Some(addr);
        debug!(%addr, "STUN client dialed");
        Ok(())
    }

    /// Attach the multiplexer used for outbound writes and register the
    /// inbound STUN route with it.
    ///
    /// The route holds the agent weakly; datagrams arriving after the
    /// client is gone are dropped.
    pub fn multiplex(&self, multiplexer: Arc<dyn Multiplexer>) {
        let agent: Weak<Agent> = Arc::downgrade(&self.agent);
        multiplexer.add(
            Arc::new(|buf: &[u8]| is_message(buf)),
            Arc::new(move |buf: &[u8], from: SocketAddr| {
                let Some(agent) = agent.upgrade() else {
                    trace!(%from, "STUN client dropped, ignoring datagram");
                    return;
                };
                match Message::decode(buf) {
                    Ok(message) => {
                        if let Err(e) = agent.process(message) {
                            trace!(%from, error = %e, "Dropping inbound STUN message");
                        }
                    }
                    Err(e) => debug!(%from, error = %e, "Failed to decode inbound STUN message"),
                }
            }),
        );
        *self.multiplexer.write() = Some(multiplexer);
    }

    /// Send `message` and register its transaction; `handler` receives the
    /// outcome.
    ///
    /// The transaction is registered before the write so that a response
    /// arriving while the write is still in progress is matched. If the
    /// write fails the transaction is stopped (the handler sees
    /// [`Error::TransactionStopped`]) and the write error is returned.
    /// A message that cannot be encoded is rejected before anything is
    /// registered.
    pub async fn start<F>(&self, message: &Message, deadline: Instant, handler: F) -> Result<()>
    where
        F: FnOnce(AgentEvent) + Send + 'static,
    {
        let (multiplexer, peer) = self.route()?;
        let raw = message.encode()?;
        let id = message.transaction_id;
        self.agent.start(id, deadline, handler)?;
        self.send(multiplexer.as_ref(), &raw, message, peer, id).await
    }

    /// Send `message` and wait for its response, timeout, or client close.
    ///
    /// On a matching response `handler` is invoked and its result returned.
    /// Otherwise the terminal error ([`Error::TransactionTimeOut`],
    /// [`Error::AgentClosed`], a transport error) is returned and `handler`
    /// is never called.
    pub async fn do_request<F>(&self, message: &Message, handler: F) -> Result<()>
    where
        F: FnOnce(&Message) -> Result<()>,
    {
        let deadline = Instant::now() + self.config.timeout;
        let (tx, rx) = oneshot::channel();

        self.start(message, deadline, move |event| {
            let _ = tx.send(event);
        })
        .await?;

        let event = rx.await.map_err(|_| Error::ChannelClosed)?;
        let response = event.into_result()?;
        handler(&response)
    }

    /// Close the client: every pending transaction is failed with
    /// [`Error::AgentClosed`] and the collector is stopped.
    pub fn close(&self) -> Result<()> {
        self.agent.close()?;
        if let Some(collector) = self.collector.lock().take() {
            collector.abort();
        }
        debug!("STUN client closed");
        Ok(())
    }

    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        *self.peer.read()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn route(&self) -> Result<(Arc<dyn Multiplexer>, SocketAddr)> {
        if self.agent.is_closed() {
            return Err(Error::AgentClosed);
        }
        let peer = (*self.peer.read()).ok_or(Error::NotDialed)?;
        let multiplexer = self.multiplexer.read().clone().ok_or(Error::NoMultiplexer)?;
        Ok((multiplexer, peer))
    }

    async fn send(
        &self,
        multiplexer: &dyn Multiplexer,
        raw: &[u8],
        message: &Message,
        peer: SocketAddr,
        id: TransactionId,
    ) -> Result<()> {
        match multiplexer.write_to(raw, peer).await {
            Ok(written) => {
                trace!(%id, %peer, written, msg_type = %message.msg_type, "Sent STUN message");
                Ok(())
            }
            Err(e) => {
                warn!(%id, %peer, error = %e, "Failed to send STUN message");
                let _ = self.agent.stop(id);
                Err(e.into())
            }
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        // Fail whatever is still pending with AgentClosed. A panicking
        // handler must not escalate into a panic inside drop.
        let agent = &self.agent;
        match panic::catch_unwind(AssertUnwindSafe(|| agent.close())) {
            Ok(Ok(())) => debug!("STUN client dropped while open, agent closed"),
            Ok(Err(_)) => {}
            Err(_) => error!("Transaction handler panicked while dropping STUN client"),
        }
        if let Some(collector) = self.collector.lock().take() {
            collector.abort();
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("peer", &self.peer())
            .field("agent", &self.agent)
            .field("config", &self.config)
            .finish()
    }
}
