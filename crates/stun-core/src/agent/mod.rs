//! # Transaction Agent
//!
//! The agent owns the table of in-flight STUN transactions and guarantees
//! that every started transaction receives exactly one [`AgentEvent`]:
//!
//! ```text
//!            start()                ┌────────────┐
//!   caller ───────────────────────▶ │  pending   │
//!                                   └─────┬──────┘
//!        process(msg) │ stop() │ collect(now) │ close()
//!                     ▼        ▼              ▼        ▼
//!                  matched   stopped       timed out  agent closed
//! ```
//!
//! All table access happens under one mutex, together with the closed flag.
//! An entry is always removed from the table before its handler runs and the
//! lock is released first, so a handler may call back into the agent (even
//! for the same id) without deadlocking.
//!
//! [`Agent::collect`] and [`Agent::close`] complete many transactions in
//! one call. A handler that panics there does not stop the rest from being
//! notified; the first panic is resumed once the batch is done.
//!
//! Deadlines are absolute [`Instant`]s. Expired transactions are reaped by
//! [`Agent::collect`], either called directly or driven by the task returned
//! from [`spawn_collector`].

mod collector;
mod config;
mod event;

pub use collector::spawn_collector;
pub use config::{AgentConfig, DefaultHandler, DEFAULT_COLLECT_RATE};
pub use event::AgentEvent;

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, trace};

use crate::error::{Error, Result};
use crate::message::{Message, TransactionId};

/// Initial capacity of the per-sweep list of expired transactions
const COLLECT_INIT_CAPACITY: usize = 100;

/// Per-transaction completion callback, invoked at most once.
pub type Handler = Box<dyn FnOnce(AgentEvent) + Send + 'static>;

enum EventHandler {
    Once(Handler),
    Default,
}

struct AgentTransaction {
    deadline: Instant,
    handler: EventHandler,
}

#[derive(Default)]
struct AgentState {
    closed: bool,
    transactions: HashMap<TransactionId, AgentTransaction>,
}

/// Concurrency-safe table of pending STUN transactions.
pub struct Agent {
    state: Mutex<AgentState>,
    config: AgentConfig,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        debug!(?config, "Creating STUN transaction agent");
        Self {
            state: Mutex::new(AgentState::default()),
            config,
        }
    }

    /// Register a pending transaction that completes through `handler`.
    ///
    /// Fails with [`Error::TransactionExists`] if `id` is already pending and
    /// with [`Error::AgentClosed`] after [`Agent::close`]; the table is left
    /// untouched in both cases.
    pub fn start<F>(&self, id: TransactionId, deadline: Instant, handler: F) -> Result<()>
    where
        F: FnOnce(AgentEvent) + Send + 'static,
    {
        self.insert(id, deadline, EventHandler::Once(Box::new(handler)))
    }

    /// Register a pending transaction completed through the configured
    /// fallback handler.
    pub fn start_default(&self, id: TransactionId, deadline: Instant) -> Result<()> {
        self.insert(id, deadline, EventHandler::Default)
    }

    fn insert(&self, id: TransactionId, deadline: Instant, handler: EventHandler) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::AgentClosed);
        }
        if state.transactions.contains_key(&id) {
            return Err(Error::TransactionExists);
        }
        state.transactions.insert(id, AgentTransaction { deadline, handler });
        trace!(%id, "Transaction started");
        Ok(())
    }

    /// Cancel a pending transaction; its handler receives
    /// [`Error::TransactionStopped`] before this returns.
    pub fn stop(&self, id: TransactionId) -> Result<()> {
        let transaction = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(Error::AgentClosed);
            }
            state
                .transactions
                .remove(&id)
                .ok_or(Error::TransactionNotExists)?
        };
        trace!(%id, "Transaction stopped");
        self.dispatch(transaction, AgentEvent::failed(id, Error::TransactionStopped));
        Ok(())
    }

    /// Deliver an inbound message to the transaction it answers.
    ///
    /// A message with no matching transaction is silently dropped: late and
    /// duplicated responses are routine on an unreliable transport.
    pub fn process(&self, message: Message) -> Result<()> {
        let id = message.transaction_id;
        let transaction = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(Error::AgentClosed);
            }
            state.transactions.remove(&id)
        };
        match transaction {
            Some(transaction) => {
                trace!(%id, msg_type = %message.msg_type, "Transaction matched");
                self.dispatch(transaction, AgentEvent::matched(message));
            }
            None => trace!(%id, "No pending transaction for message, ignoring"),
        }
        Ok(())
    }

    /// Time out every transaction whose deadline is at or before `now`.
    ///
    /// Returns the number of transactions reaped. A no-op once the agent is
    /// closed.
    pub fn collect(&self, now: Instant) -> usize {
        let expired = {
            let mut state = self.state.lock();
            if state.closed {
                return 0;
            }
            let mut ids = Vec::with_capacity(COLLECT_INIT_CAPACITY);
            ids.extend(
                state
                    .transactions
                    .iter()
                    .filter(|(_, t)| t.deadline <= now)
                    .map(|(id, _)| *id),
            );
            ids.into_iter()
                .filter_map(|id| state.transactions.remove(&id).map(|t| (id, t)))
                .collect::<Vec<_>>()
        };

        let count = expired.len();
        if count > 0 {
            debug!(count, "Collected timed out transactions");
        }
        self.dispatch_all(expired, Error::TransactionTimeOut);
        count
    }

    /// Close the agent, notifying every pending transaction with
    /// [`Error::AgentClosed`] before returning. A second call returns
    /// [`Error::AgentClosed`] and notifies nobody.
    pub fn close(&self) -> Result<()> {
        let drained = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(Error::AgentClosed);
            }
            state.closed = true;
            std::mem::take(&mut state.transactions)
        };
        debug!(pending = drained.len(), "Closing STUN transaction agent");
        self.dispatch_all(drained, Error::AgentClosed);
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of pending transactions
    pub fn len(&self) -> usize {
        self.state.lock().transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn collect_rate(&self) -> Duration {
        self.config.collect_rate
    }

    // Must be called without the state lock held.
    fn dispatch(&self, transaction: AgentTransaction, event: AgentEvent) {
        match transaction.handler {
            EventHandler::Once(handler) => handler(event),
            EventHandler::Default => match &self.config.handler {
                Some(handler) => handler(event),
                None => trace!(id = %event.transaction_id, "No default handler, dropping event"),
            },
        }
    }

    // Every handler in the batch runs even if an earlier one panics.
    fn dispatch_all<I>(&self, batch: I, reason: Error)
    where
        I: IntoIterator<Item = (TransactionId, AgentTransaction)>,
    {
        let mut first_panic = None;
        for (id, transaction) in batch {
            let event = AgentEvent::failed(id, reason.clone());
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(transaction, event)));
            if let Err(payload) = outcome {
                error!(%id, error = %reason, "Transaction handler panicked");
                first_panic.get_or_insert(payload);
            }
        }
        if let Some(payload) = first_panic {
            panic::resume_unwind(payload);
        }
    }
}

impl Default for Agent {
    fn default() -> Self {
        Self::new(AgentConfig::default())
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Agent")
            .field("closed", &state.closed)
            .field("pending", &state.transactions.len())
            .field("collect_rate", &self.config.collect_rate)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn default_handler_receives_events() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let agent = Agent::new(AgentConfig::new().with_handler(move |e: AgentEvent| {
            assert_eq!(e.error, Some(Error::TransactionStopped));
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let id = TransactionId::new();
        agent.start_default(id, Instant::now() + Duration::from_secs(60)).unwrap();
        agent.stop(id).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn default_handler_absent_is_not_an_error() {
        let agent = Agent::default();
        let id = TransactionId::new();
        agent.start_default(id, Instant::now()).unwrap();
        assert_eq!(agent.collect(Instant::now()), 1);
        assert!(agent.is_empty());
    }

    #[test]
    fn handler_may_reenter_agent() {
        let agent = Arc::new(Agent::default());
        let id = TransactionId::new();
        let deadline = Instant::now() + Duration::from_secs(60);

        let inner = agent.clone();
        agent
            .start(id, deadline, move |_| {
                // The entry is gone by the time the handler runs.
                assert_eq!(inner.stop(id), Err(Error::TransactionNotExists));
                inner.start(id, deadline, |_| {}).unwrap();
            })
            .unwrap();

        agent.process(Message::binding_success(id)).unwrap();
        assert_eq!(agent.len(), 1);
        agent.close().unwrap();
        assert!(agent.is_empty());
    }

    #[test]
    fn collect_includes_exact_deadline() {
        let agent = Agent::default();
        let now = Instant::now();
        agent.start(TransactionId::new(), now, |_| {}).unwrap();
        agent
            .start(TransactionId::new(), now + Duration::from_millis(1), |_| {})
            .unwrap();
        assert_eq!(agent.collect(now), 1);
        assert_eq!(agent.len(), 1);
    }
}
