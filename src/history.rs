//! Bounded in-memory event history

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub ts: DateTime<Utc>,
    pub role: String,
    pub content: String,
}

/// Keeps the most recent `max_events` events; older ones are dropped
#[derive(Debug)]
pub struct EventLog {
    max_events: usize,
    events: Mutex<VecDeque<HistoryEvent>>,
}

impl EventLog {
    pub fn new(max_events: usize) -> Self {
        Self {
            max_events: max_events.max(1),
            events: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, role: &str, content: impl Into<String>) {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if events.len() == self.max_events {
            events.pop_front();
        }
        events.push_back(HistoryEvent {
            ts: Utc::now(),
            role: role.to_string(),
            content: content.into(),
        });
    }

    /// Events oldest first
    pub fn snapshot(&self) -> Vec<HistoryEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
