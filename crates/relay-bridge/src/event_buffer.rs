//! Bounded, newest-first store of normalized inbound events.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::client::RemoteMessage;
use crate::lock_or_recover;

pub const DEFAULT_EVENT_BUFFER_CAPACITY: usize = 2_000;

/// One received message or media notification, as exposed to HTTP pollers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub chat_id: Option<i64>,
    pub from_id: Option<i64>,
    pub date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_error: Option<String>,
}

impl InboundEvent {
    /// Normalizes a raw message. The event time falls back to `received_at`;
    /// attachment fields are filled in by the caller once media is persisted.
    pub fn from_remote(message: &RemoteMessage, received_at: DateTime<Utc>) -> Self {
        Self {
            chat_id: message.chat_id,
            from_id: message.sender_id,
            date: message.date.unwrap_or(received_at),
            message: message.text.clone().filter(|text| !text.is_empty()),
            url: None,
            media_error: None,
        }
    }
}

#[derive(Debug)]
pub struct InboundEventBuffer {
    capacity: usize,
    events: Mutex<VecDeque<InboundEvent>>,
}

impl InboundEventBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            events: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Inserts at the head, evicting the oldest entry once full.
    pub fn append(&self, event: InboundEvent) {
        let mut events = lock_or_recover(&self.events);
        events.push_front(event);
        while events.len() > self.capacity {
            events.pop_back();
        }
    }

    /// Point-in-time copy in newest-first order.
    pub fn snapshot(&self) -> Vec<InboundEvent> {
        let events = lock_or_recover(&self.events);
        events.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock_or_recover(&self.events).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InboundEventBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_CAPACITY)
    }
}
