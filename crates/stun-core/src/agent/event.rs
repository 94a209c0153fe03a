use crate::error::{Error, Result};
use crate::message::{Message, TransactionId};

/// Terminal notification delivered exactly once per transaction.
///
/// Carries the matched response on success, or the reason the transaction
/// ended without one ([`Error::TransactionStopped`],
/// [`Error::TransactionTimeOut`] or [`Error::AgentClosed`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentEvent {
    pub transaction_id: TransactionId,
    pub message: Option<Message>,
    pub error: Option<Error>,
}

impl AgentEvent {
    pub(crate) fn matched(message: Message) -> Self {
        Self {
            transaction_id: message.transaction_id,
            message: Some(message),
            error: None,
        }
    }

    pub(crate) fn failed(transaction_id: TransactionId, error: Error) -> Self {
        Self {
            transaction_id,
            message: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.message.is_some()
    }

    /// Collapse the event into the response or the failure reason.
    pub fn into_result(self) -> Result<Message> {
        match (self.message, self.error) {
            (_, Some(error)) => Err(error),
            (Some(message), None) => Ok(message),
            (None, None) => Err(Error::ChannelClosed),
        }
    }
}
