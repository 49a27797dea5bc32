use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use time::OffsetDateTime;
use tracing::trace;
use uuid::Uuid;

use crate::error::BleError;
use crate::sync::{Semaphore, WaitOutcome};

/// One characteristic value delivered to a registered channel.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct Notification {
    characteristic: Uuid,
    payload: Vec<u8>,
    #[serde(with = "time::serde::rfc3339")]
    received_at: OffsetDateTime,
}

impl Notification {
    /// Creates a notification stamped with the current UTC time.
    #[must_use]
    pub fn new(characteristic: Uuid, payload: Vec<u8>) -> Self {
        Self {
            characteristic,
            payload,
            received_at: OffsetDateTime::now_utc(),
        }
    }

    #[must_use]
    pub fn characteristic(&self) -> Uuid {
        self.characteristic
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Returns when the value reached the registry.
    #[must_use]
    pub fn received_at(&self) -> OffsetDateTime {
        self.received_at
    }
}

#[derive(Debug, Default)]
struct ChannelState {
    queue: VecDeque<Notification>,
    /// Cancellations not yet consumed by a reader.
    cancels: usize,
    closed: bool,
}

/// Queue plus item semaphore backing one registered key.
///
/// The semaphore holds one permit per queued item and per latched
/// cancellation; every permit change happens under the state lock.
#[derive(Debug)]
pub(crate) struct NotificationChannel {
    key: String,
    characteristics: HashSet<Uuid>,
    state: Mutex<ChannelState>,
    items: Semaphore,
}

impl NotificationChannel {
    pub(crate) fn new(key: String, characteristics: HashSet<Uuid>) -> Self {
        Self {
            key,
            characteristics,
            state: Mutex::new(ChannelState::default()),
            items: Semaphore::new(0),
        }
    }

    pub(crate) fn watches(&self, characteristic: Uuid) -> bool {
        self.characteristics.contains(&characteristic)
    }

    /// Appends one item. Returns `false` once the channel is closed.
    pub(crate) fn push(&self, notification: Notification) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        state.queue.push_back(notification);
        self.items.post();
        trace!(key = %self.key, queued = state.queue.len(), permits = self.items.value(), "notification queued");
        true
    }

    /// Wakes one blocked reader, or makes the next read on an empty queue
    /// return immediately. Items queued before the cancel are still served.
    pub(crate) fn cancel(&self) {
        let mut state = self.lock();
        state.cancels = state.cancels.saturating_add(1);
        self.items.post();
    }

    /// Drops queued items and latched cancellations. Returns the number of items dropped.
    pub(crate) fn reset(&self) -> usize {
        let mut state = self.lock();
        let dropped = state.queue.len();
        state.queue.clear();
        state.cancels = 0;
        self.items.drain();
        dropped
    }

    /// Marks the channel dead and wakes any blocked reader.
    pub(crate) fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.queue.clear();
        self.items.post();
    }

    pub(crate) fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    /// Blocks for the first item, then takes up to `max_count` items in arrival order.
    ///
    /// A latched cancel ends the read with [`BleError::NoData`] only once the
    /// queue is empty.
    pub(crate) fn read(
        &self,
        max_count: usize,
        timeout: Duration,
    ) -> Result<Vec<Notification>, BleError> {
        if max_count == 0 {
            return Ok(Vec::new());
        }

        let deadline = Instant::now().checked_add(timeout);
        loop {
            let remaining = deadline.map_or(timeout, |deadline| {
                deadline.saturating_duration_since(Instant::now())
            });
            if self.items.wait_timeout(remaining) == WaitOutcome::TimedOut {
                return Err(BleError::Timeout { timeout });
            }

            let mut state = self.lock();
            if state.closed {
                // Leave a permit behind so every other blocked reader sees the close too.
                self.items.post();
                return Err(BleError::NoData);
            }
            let Some(first) = state.queue.pop_front() else {
                if state.cancels > 0 {
                    state.cancels -= 1;
                    return Err(BleError::NoData);
                }
                // The permit was taken back by a reset; keep waiting.
                continue;
            };

            let mut batch = Vec::with_capacity(max_count.min(state.queue.len() + 1));
            batch.push(first);
            while batch.len() < max_count && !state.queue.is_empty() && self.items.try_wait() {
                if let Some(next) = state.queue.pop_front() {
                    batch.push(next);
                }
            }
            return Ok(batch);
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
