use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::InboundMessage;

/// Receives each inbound message on its own task
#[async_trait]
pub trait InboundHandler: Send + Sync + 'static {
    /// Handle one message. May take as long as it needs.
    async fn handle(&self, message: InboundMessage);
}

/// Hands inbound messages to a handler, one spawned task per message.
///
/// There is no queue or limit: a burst of messages runs concurrently.
#[derive(Clone)]
pub struct Dispatcher {
    handler: Option<Arc<dyn InboundHandler>>,
}

impl Dispatcher {
    /// Dispatch to `handler`
    pub fn new(handler: Arc<dyn InboundHandler>) -> Self {
        Self {
            handler: Some(handler),
        }
    }

    /// Only log messages
    pub fn logging_only() -> Self {
        Self { handler: None }
    }

    /// Start handling `message`; never blocks the caller
    pub fn dispatch(&self, message: InboundMessage) -> Option<JoinHandle<()>> {
        let Some(handler) = self.handler.clone() else {
            tracing::info!(sender = %message.sender, "no handler, message logged only");
            return None;
        };
        Some(tokio::spawn(async move {
            let sender = message.sender.clone();
            handler.handle(message).await;
            tracing::debug!(sender = %sender, "message handled");
        }))
    }
}
