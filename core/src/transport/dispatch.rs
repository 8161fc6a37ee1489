// Dispatch — route inbound frames to the handler registered for their kind

use super::MessageHandler;
use crate::message::{Message, MessageKind};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("A handler is already registered for {kind} messages")]
    AlreadyRegistered { kind: MessageKind },
}

/// At most one handler per message kind
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<MessageKind, Arc<dyn MessageHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        kind: MessageKind,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), DispatchError> {
        if self.handlers.contains_key(&kind) {
            return Err(DispatchError::AlreadyRegistered { kind });
        }
        self.handlers.insert(kind, handler);
        Ok(())
    }

    pub fn unregister(&mut self, kind: MessageKind) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.remove(&kind)
    }

    pub fn is_registered(&self, kind: MessageKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub fn handler(&self, kind: MessageKind) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.get(&kind).cloned()
    }

    /// Hand `message` to its handler. Returns false when nobody claims the kind.
    pub fn dispatch(&self, message: &Message) -> bool {
        match self.handlers.get(&message.kind()) {
            Some(handler) => {
                handler.handle_message(message);
                true
            }
            None => {
                trace!(kind = %message.kind(), "no handler registered, dropping");
                false
            }
        }
    }
}
