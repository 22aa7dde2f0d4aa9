//! Dispatcher: sends the chosen reply and the secondary acknowledgement.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::PipelineError;
use crate::pipeline::types::{InboundMessage, OutboundChannel, ReplyDecision};

/// What happened on the outbound channel for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReceipt {
    /// The like went through.
    pub acknowledged: bool,
}

pub struct Dispatcher {
    channel: Arc<dyn OutboundChannel>,
    acknowledge: bool,
}

impl Dispatcher {
    pub fn new(channel: Arc<dyn OutboundChannel>, acknowledge: bool) -> Self {
        Self {
            channel,
            acknowledge,
        }
    }

    /// Send the reply for `decision`, then like the message unless it was
    /// spam. A failed like is logged and never undoes the reply.
    pub async fn dispatch(
        &self,
        message: &InboundMessage,
        decision: &ReplyDecision,
    ) -> Result<DispatchReceipt, PipelineError> {
        self.channel
            .send_reply(message, decision.text())
            .await
            .map_err(|source| PipelineError::Dispatch {
                id: message.id,
                source,
            })?;

        info!(
            id = %message.id,
            author = %message.author_handle,
            provenance = decision.provenance().label(),
            "Reply sent"
        );

        if decision.is_spam() || !self.acknowledge {
            return Ok(DispatchReceipt {
                acknowledged: false,
            });
        }

        let acknowledged = match self.channel.acknowledge(message).await {
            Ok(()) => true,
            Err(e) => {
                warn!(id = %message.id, error = %e, "Like failed; reply already sent");
                false
            }
        };
        Ok(DispatchReceipt { acknowledged })
    }
}
