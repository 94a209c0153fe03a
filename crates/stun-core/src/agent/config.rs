use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::AgentEvent;

/// Default interval between collector sweeps
pub const DEFAULT_COLLECT_RATE: Duration = Duration::from_millis(100);

/// Fallback handler for transactions started without their own handler.
pub type DefaultHandler = Arc<dyn Fn(AgentEvent) + Send + Sync + 'static>;

/// Agent configuration
#[derive(Clone)]
pub struct AgentConfig {
    /// Invoked for transactions registered through `Agent::start_default`
    pub handler: Option<DefaultHandler>,
    /// How often the periodic collector sweeps the table
    pub collect_rate: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            handler: None,
            collect_rate: DEFAULT_COLLECT_RATE,
        }
    }
}

impl AgentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(AgentEvent) + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn with_collect_rate(mut self, rate: Duration) -> Self {
        self.collect_rate = rate;
        self
    }
}

impl fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentConfig")
            .field("handler", &self.handler.as_ref().map(|_| "<fn>"))
            .field("collect_rate", &self.collect_rate)
            .finish()
    }
}
