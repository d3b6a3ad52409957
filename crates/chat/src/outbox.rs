use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use steward_core::{CollaboratorError, ReplyOption, ReplySink, UserId};

use crate::blocks::{reply_message, MessageTemplate};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    pub user_id: UserId,
    pub correlation_id: Option<String>,
    pub template: MessageTemplate,
}

/// Reply sink that queues rendered messages for the runner to hand to the
/// transport once the current envelope has been dispatched.
#[derive(Default)]
pub struct OutboxReplySink {
    pending: Mutex<VecDeque<OutboundMessage>>,
}

impl OutboxReplySink {
    pub fn push(&self, message: OutboundMessage) {
        self.lock().push_back(message);
    }

    pub fn drain(&self) -> Vec<OutboundMessage> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<OutboundMessage>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl ReplySink for OutboxReplySink {
    async fn prompt(
        &self,
        user_id: &UserId,
        text: &str,
        options: &[ReplyOption],
    ) -> Result<(), CollaboratorError> {
        self.push(OutboundMessage {
            user_id: user_id.clone(),
            correlation_id: None,
            template: reply_message(text, options),
        });
        Ok(())
    }
}
