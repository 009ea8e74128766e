//! Broadcast fan-out with a bounded replay ring.
//!
//! Identifier assignment, ring insertion, and the broadcast send happen under
//! one lock, so every subscriber observes strictly increasing identifiers and
//! a subscription taken with `since` splices the ring and the live channel
//! without gaps or repeats.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::broadcast::{self, Receiver, Sender, error::RecvError, error::TryRecvError};

use crate::event::{Event, EventEnvelope, EventId};

/// Ring size used by [`EventBus::new`].
pub const DEFAULT_REPLAY_CAPACITY: usize = 1_024;

struct Ring {
    last_id: EventId,
    capacity: usize,
    entries: VecDeque<EventEnvelope>,
}

struct Shared {
    ring: Mutex<Ring>,
    sender: Sender<EventEnvelope>,
}

/// Cloneable handle to the notification bus.
#[derive(Clone)]
pub struct EventBus {
    shared: Arc<Shared>,
}

impl EventBus {
    /// Bus retaining at most `capacity` events for replay; zero is raised to one.
    ///
    /// Live subscribers that fall more than `capacity` events behind lose the
    /// oldest ones.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            shared: Arc::new(Shared {
                ring: Mutex::new(Ring {
                    last_id: 0,
                    capacity,
                    entries: VecDeque::with_capacity(capacity),
                }),
                sender,
            }),
        }
    }

    /// Bus with [`DEFAULT_REPLAY_CAPACITY`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Publish `event` and return its identifier. Never blocks on subscribers.
    pub fn publish(&self, event: Event) -> EventId {
        let mut ring = self.ring();
        ring.last_id += 1;
        let envelope = EventEnvelope {
            id: ring.last_id,
            timestamp: Utc::now(),
            event,
        };
        if ring.entries.len() == ring.capacity {
            ring.entries.pop_front();
        }
        ring.entries.push_back(envelope.clone());
        // Err only means nobody is listening.
        let _ = self.shared.sender.send(envelope);
        ring.last_id
    }

    /// Publish a free-text [`Event::Info`].
    pub fn info(&self, message: impl Into<String>) -> EventId {
        self.publish(Event::Info {
            message: message.into(),
        })
    }

    /// Subscribe to future events.
    ///
    /// With `since` set, retained events with a larger identifier are
    /// delivered first.
    #[must_use]
    pub fn subscribe(&self, since: Option<EventId>) -> EventStream {
        let ring = self.ring();
        let receiver = self.shared.sender.subscribe();
        let backlog = since
            .map(|since| {
                ring.entries
                    .iter()
                    .skip_while(|envelope| envelope.id <= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        EventStream {
            backlog,
            receiver,
            skipped: 0,
        }
    }

    /// Identifier of the most recent event, `None` before the first publish.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        let last = self.ring().last_id;
        (last > 0).then_some(last)
    }

    fn ring(&self) -> MutexGuard<'_, Ring> {
        self.shared
            .ring
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Events for one subscriber: the replay backlog, then live traffic.
pub struct EventStream {
    backlog: VecDeque<EventEnvelope>,
    receiver: Receiver<EventEnvelope>,
    skipped: u64,
}

impl EventStream {
    /// Next event, or `None` once every bus handle is dropped.
    ///
    /// A subscriber that lagged resumes at the oldest event still buffered.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        if let Some(envelope) = self.backlog.pop_front() {
            return Some(envelope);
        }
        loop {
            match self.receiver.recv().await {
                Ok(envelope) => return Some(envelope),
                Err(RecvError::Lagged(count)) => self.skipped += count,
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next event if one is ready.
    pub fn try_next(&mut self) -> Option<EventEnvelope> {
        if let Some(envelope) = self.backlog.pop_front() {
            return Some(envelope);
        }
        loop {
            match self.receiver.try_recv() {
                Ok(envelope) => return Some(envelope),
                Err(TryRecvError::Lagged(count)) => self.skipped += count,
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Number of live events lost to lag so far.
    #[must_use]
    pub const fn skipped(&self) -> u64 {
        self.skipped
    }
}
