//! Bounded event slots between control threads and a unit's render callback.
//!
//! The channel is allocated once when the pair is created. `inject()` and the
//! `EventQueue` polling methods never block and never allocate, so both ends are
//! safe to call from the audio thread. A full channel drops the event and bumps
//! a counter instead of waiting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::ScheduledEvent;

/// Events buffered per unit before back-pressure drops kick in.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Create a bounded injector/queue pair.
pub fn event_channel(capacity: usize) -> (EventInjector, EventQueue) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    (
        EventInjector {
            tx,
            dropped: Arc::clone(&dropped),
        },
        EventQueue { rx, dropped },
    )
}

/// Sending half, handed out by instrument units.
#[derive(Clone, Debug)]
pub struct EventInjector {
    tx: Sender<ScheduledEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventInjector {
    /// Deliver an event. Returns `false` if it was dropped.
    #[inline]
    pub fn inject(&self, event: ScheduledEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(0)
    }

    /// Whether both injectors point at the same unit.
    pub fn same_target(&self, other: &EventInjector) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

/// Receiving half, polled by the unit during render.
#[derive(Debug)]
pub struct EventQueue {
    rx: Receiver<ScheduledEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventQueue {
    /// Drain pending events into `buffer`, returning how many were written.
    pub fn poll_into(&self, buffer: &mut [ScheduledEvent]) -> usize {
        let mut count = 0;
        for slot in buffer.iter_mut() {
            match self.rx.try_recv() {
                Ok(event) => {
                    *slot = event;
                    count += 1;
                }
                Err(_) => break,
            }
        }
        count
    }

    #[inline]
    pub fn try_next(&self) -> Option<ScheduledEvent> {
        self.rx.try_recv().ok()
    }

    /// Drain everything currently queued. Allocates; not for the audio thread.
    pub fn drain(&self) -> Vec<ScheduledEvent> {
        self.rx.try_iter().collect()
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        while self.rx.try_recv().is_ok() {}
    }
}
