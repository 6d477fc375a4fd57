//! Ordered queue of frames awaiting a `Ready` connection.

use std::collections::VecDeque;

use crate::protocol::Message;

/// FIFO of messages not yet sent.
///
/// Every outbound message passes through here; the runtime drains it
/// immediately while the connection is `Ready`, so before the handshake
/// acknowledgment nothing reaches the transport and afterwards messages
/// flow in strict enqueue order.
#[derive(Debug, Default)]
pub(crate) struct OutboundQueue {
    messages: VecDeque<Message>,
}

impl OutboundQueue {
    pub(crate) fn push(&mut self, message: Message) { self.messages.push_back(message); }

    pub(crate) fn pop(&mut self) -> Option<Message> { self.messages.pop_front() }

    pub(crate) fn len(&self) -> usize { self.messages.len() }

    pub(crate) fn clear(&mut self) { self.messages.clear(); }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Message, SubscriptionId, SubscriptionRequest};

    fn start(id: u64) -> Message {
        Message::SubscriptionStart {
            id: SubscriptionId::Number(id),
            payload: SubscriptionRequest::new("subscription { tick }"),
        }
    }

    #[test]
    fn drains_in_enqueue_order() {
        let mut queue = OutboundQueue::default();
        queue.push(start(1));
        queue.push(Message::SubscriptionEnd {
            id: SubscriptionId::Number(1),
        });
        queue.push(start(2));
        assert_eq!(queue.len(), 3);

        assert_eq!(queue.pop().as_ref().map(Message::kind), Some("subscription_start"));
        assert_eq!(queue.pop().as_ref().map(Message::kind), Some("subscription_end"));
        assert_eq!(queue.pop().and_then(|m| m.id().cloned()), Some(SubscriptionId::Number(2)));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn clear_discards_everything() {
        let mut queue = OutboundQueue::default();
        queue.push(start(1));
        queue.clear();
        assert_eq!(queue.len(), 0);
        assert!(queue.pop().is_none());
    }
}
