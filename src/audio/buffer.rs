//! Jitter buffer for received audio units
//!
//! A bounded blocking FIFO between the audio receive thread and playback.
//! Units carry no sequence numbers, so the buffer cannot reorder or detect
//! gaps; it only absorbs arrival-time variance before playback starts.
//!
//! The queue has two sides. [`JitterProducer`] handles push, the single
//! [`JitterBuffer`] pops. Dropping the buffer closes the queue for every
//! producer; dropping every producer lets the buffer drain and then report
//! the end of the stream.

use crossbeam_channel::{
    bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::media::MediaUnit;

/// How many units the jitter buffer may hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterCapacity {
    /// Sized to the handshake-reported unit count, so the whole stream is
    /// prefetched and the producer never waits
    WholeStream,
    /// Fixed number of units regardless of stream length
    Units(usize),
}

impl Default for JitterCapacity {
    fn default() -> Self {
        JitterCapacity::WholeStream
    }
}

impl JitterCapacity {
    /// Concrete capacity for a stream of `expected_units`
    pub fn resolve(self, expected_units: u64) -> usize {
        let units = match self {
            JitterCapacity::WholeStream => usize::try_from(expected_units).unwrap_or(usize::MAX),
            JitterCapacity::Units(n) => n,
        };
        // A zero-capacity channel would be a rendezvous, not a buffer
        units.max(1)
    }
}

/// Returned when the consumer side is gone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferClosed(pub MediaUnit);

/// A push that did not complete; the unit is handed back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    Full(MediaUnit),
    Closed(MediaUnit),
}

/// A timed pop that returned no unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopError {
    /// Nothing arrived within the timeout
    Timeout,
    /// Every producer is gone and the queue is drained
    Ended,
}

#[derive(Default)]
struct Counters {
    pushed: AtomicUsize,
    popped: AtomicUsize,
    high_water: AtomicUsize,
    full_waits: AtomicUsize,
}

/// Push side of a jitter buffer; clone it for more producers
#[derive(Clone)]
pub struct JitterProducer {
    tx: Sender<MediaUnit>,
    counters: Arc<Counters>,
}

impl JitterProducer {
    /// Push a unit, blocking while the buffer is full
    pub fn push(&self, unit: MediaUnit) -> Result<(), BufferClosed> {
        let unit = match self.tx.try_send(unit) {
            Ok(()) => {
                self.record_push();
                return Ok(());
            }
            Err(TrySendError::Full(unit)) => unit,
            Err(TrySendError::Disconnected(unit)) => return Err(BufferClosed(unit)),
        };

        self.counters.full_waits.fetch_add(1, Ordering::Relaxed);
        self.tx.send(unit).map_err(|e| BufferClosed(e.into_inner()))?;
        self.record_push();
        Ok(())
    }

    /// Push a unit, waiting at most `timeout` for space
    pub fn push_timeout(&self, unit: MediaUnit, timeout: Duration) -> Result<(), PushError> {
        let unit = match self.tx.try_send(unit) {
            Ok(()) => {
                self.record_push();
                return Ok(());
            }
            Err(TrySendError::Full(unit)) => unit,
            Err(TrySendError::Disconnected(unit)) => return Err(PushError::Closed(unit)),
        };

        self.counters.full_waits.fetch_add(1, Ordering::Relaxed);
        match self.tx.send_timeout(unit, timeout) {
            Ok(()) => {
                self.record_push();
                Ok(())
            }
            Err(SendTimeoutError::Timeout(unit)) => Err(PushError::Full(unit)),
            Err(SendTimeoutError::Disconnected(unit)) => Err(PushError::Closed(unit)),
        }
    }

    /// Push without waiting
    pub fn try_push(&self, unit: MediaUnit) -> Result<(), PushError> {
        match self.tx.try_send(unit) {
            Ok(()) => {
                self.record_push();
                Ok(())
            }
            Err(TrySendError::Full(unit)) => Err(PushError::Full(unit)),
            Err(TrySendError::Disconnected(unit)) => Err(PushError::Closed(unit)),
        }
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    fn record_push(&self) {
        self.counters.pushed.fetch_add(1, Ordering::Relaxed);
        self.counters
            .high_water
            .fetch_max(self.tx.len(), Ordering::Relaxed);
    }
}

/// Pop side of a bounded blocking FIFO of media units
pub struct JitterBuffer {
    rx: Receiver<MediaUnit>,
    capacity: usize,
    counters: Arc<Counters>,
}

impl JitterBuffer {
    /// Create a queue holding at most `capacity` units
    pub fn bounded(capacity: usize) -> (JitterProducer, JitterBuffer) {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        let counters = Arc::new(Counters::default());
        let producer = JitterProducer {
            tx,
            counters: counters.clone(),
        };
        let buffer = JitterBuffer {
            rx,
            capacity,
            counters,
        };
        (producer, buffer)
    }

    /// Queue for a stream announced at handshake
    pub fn for_stream(policy: JitterCapacity, expected_units: u64) -> (JitterProducer, JitterBuffer) {
        Self::bounded(policy.resolve(expected_units))
    }

    /// Pop the oldest unit, blocking while the buffer is empty.
    /// `None` once every producer is gone and the queue is drained.
    pub fn pop(&self) -> Option<MediaUnit> {
        let unit = self.rx.recv().ok()?;
        self.counters.popped.fetch_add(1, Ordering::Relaxed);
        Some(unit)
    }

    /// Pop the oldest unit, waiting at most `timeout`
    pub fn pop_timeout(&self, timeout: Duration) -> Result<MediaUnit, PopError> {
        match self.rx.recv_timeout(timeout) {
            Ok(unit) => {
                self.counters.popped.fetch_add(1, Ordering::Relaxed);
                Ok(unit)
            }
            Err(RecvTimeoutError::Timeout) => Err(PopError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(PopError::Ended),
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.rx.is_full()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> JitterBufferStats {
        JitterBufferStats {
            level: self.len(),
            capacity: self.capacity,
            pushed: self.counters.pushed.load(Ordering::Relaxed),
            popped: self.counters.popped.load(Ordering::Relaxed),
            high_water: self.counters.high_water.load(Ordering::Relaxed),
            full_waits: self.counters.full_waits.load(Ordering::Relaxed),
        }
    }
}

/// Jitter buffer statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JitterBufferStats {
    pub level: usize,
    pub capacity: usize,
    pub pushed: usize,
    pub popped: usize,
    pub high_water: usize,
    /// Pushes that had to wait for space
    pub full_waits: usize,
}

impl JitterBufferStats {
    pub fn fill_level(&self) -> f32 {
        self.level as f32 / self.capacity as f32
    }
}
