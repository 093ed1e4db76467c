//! Named queues: unbounded FIFO channels carrying envelopes.
//!
//! Each queue has any number of producer handles but exactly one consumer:
//! the receiver can be taken once. Push never blocks, so a slow sink can
//! never stall a feed worker.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use commbot_core::error::{BotError, Result};
use commbot_core::types::{Envelope, Payload, QueueName};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

/// Producer handle for one named queue.
#[derive(Debug, Clone)]
pub struct QueueSender {
    name: QueueName,
    tx: UnboundedSender<Envelope>,
}

impl QueueSender {
    pub fn name(&self) -> QueueName {
        self.name
    }

    /// Wrap a payload in an envelope and push it. Safe to call from any thread.
    pub fn push(&self, payload: Payload) -> Result<()> {
        let envelope = Envelope {
            queue: self.name,
            payload,
            enqueued_at: Utc::now(),
        };
        self.tx
            .send(envelope)
            .map_err(|_| BotError::QueueClosed(self.name.to_string()))
    }
}

/// The single consumer handle for one named queue.
#[derive(Debug)]
pub struct QueueReceiver {
    name: QueueName,
    rx: UnboundedReceiver<Envelope>,
}

impl QueueReceiver {
    pub fn name(&self) -> QueueName {
        self.name
    }

    /// Pop the oldest envelope without waiting. `None` when the queue is empty
    /// (or every producer is gone and it has been drained).
    pub fn try_pop(&mut self) -> Option<Envelope> {
        match self.rx.try_recv() {
            Ok(envelope) => Some(envelope),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Number of envelopes waiting.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// All named queues of the process.
#[derive(Debug)]
pub struct QueueRegistry {
    senders: HashMap<QueueName, QueueSender>,
    receivers: Mutex<HashMap<QueueName, QueueReceiver>>,
}

impl QueueRegistry {
    /// Create one queue per [`QueueName`].
    pub fn new() -> Self {
        let mut senders = HashMap::new();
        let mut receivers = HashMap::new();
        for name in QueueName::ALL {
            let (tx, rx) = unbounded_channel();
            senders.insert(name, QueueSender { name, tx });
            receivers.insert(name, QueueReceiver { name, rx });
        }
        Self {
            senders,
            receivers: Mutex::new(receivers),
        }
    }

    /// A producer handle for `name`.
    pub fn sender(&self, name: QueueName) -> QueueSender {
        // Every name is populated in `new`.
        self.senders[&name].clone()
    }

    /// Claim the consumer side of `name`. Only the first call succeeds.
    pub fn take_receiver(&self, name: QueueName) -> Option<QueueReceiver> {
        self.receivers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&name)
    }
}

impl Default for QueueRegistry {
    fn default() -> Self {
        Self::new()
    }
}
