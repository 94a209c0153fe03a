use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, trace, warn};

use super::Agent;

/// Lower bound on the sweep interval; `tokio::time::interval` rejects zero
const MIN_COLLECT_RATE: Duration = Duration::from_millis(1);

/// Spawn a task that sweeps `agent` every `agent.collect_rate()`.
///
/// The task only holds a weak reference and exits once the agent is closed
/// or dropped. Must be called from within a Tokio runtime.
pub fn spawn_collector(agent: &Arc<Agent>) -> JoinHandle<()> {
    let rate = agent.collect_rate().max(MIN_COLLECT_RATE);
    let weak: Weak<Agent> = Arc::downgrade(agent);

    tokio::spawn(async move {
        debug!(?rate, "Transaction collector started");
        let mut ticker = time::interval(rate);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let Some(agent) = weak.upgrade() else {
                break;
            };
            if agent.is_closed() {
                break;
            }
            // A panicking handler must not end the sweeps
            match panic::catch_unwind(AssertUnwindSafe(|| agent.collect(Instant::now()))) {
                Ok(0) => {}
                Ok(reaped) => trace!(reaped, "Collector sweep"),
                Err(_) => warn!("Transaction handler panicked during collector sweep"),
            }
        }
        debug!("Transaction collector stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentConfig;
    use crate::error::Error;
    use crate::message::TransactionId;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn collector_times_out_expired_transaction() {
        let agent = Arc::new(Agent::new(
            AgentConfig::new().with_collect_rate(Duration::from_millis(10)),
        ));
        let handle = spawn_collector(&agent);

        let (tx, rx) = oneshot::channel();
        agent
            .start(TransactionId::new(), Instant::now() + Duration::from_millis(20), move |e| {
                let _ = tx.send(e);
            })
            .unwrap();

        let event = time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("collector did not fire")
            .unwrap();
        assert_eq!(event.error, Some(Error::TransactionTimeOut));

        agent.close().unwrap();
        time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("collector did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn collector_survives_panicking_handler() {
        let agent = Arc::new(Agent::new(
            AgentConfig::new().with_collect_rate(Duration::from_millis(5)),
        ));
        let handle = spawn_collector(&agent);

        agent
            .start(TransactionId::new(), Instant::now(), |_| panic!("handler failure"))
            .unwrap();
        time::sleep(Duration::from_millis(30)).await;
        assert!(agent.is_empty());

        // Later sweeps still run
        let (tx, rx) = oneshot::channel();
        agent
            .start(TransactionId::new(), Instant::now(), move |e| {
                let _ = tx.send(e);
            })
            .unwrap();
        let event = time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("collector stopped after panic")
            .unwrap();
        assert_eq!(event.error, Some(Error::TransactionTimeOut));

        agent.close().unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn collector_exits_when_agent_dropped() {
        let agent = Arc::new(Agent::new(
            AgentConfig::new().with_collect_rate(Duration::from_millis(5)),
        ));
        let handle = spawn_collector(&agent);
        drop(agent);
        time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("collector did not stop")
            .unwrap();
    }
}
