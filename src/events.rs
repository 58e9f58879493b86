//! Progress events emitted by the library. The library never prints; callers
//! decide how to render these.

use crate::submit::BatchStatus;
use solana_sdk::signature::Signature;
use std::{sync::Mutex, time::Duration};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// An address was dropped before batching.
    RecipientRejected { id: u64, address: String, reason: String },
    /// A `.sol` alias was resolved to a key.
    AliasResolved { alias: String, address: String },
    AccountMissing { recipient: String },
    BatchesPlanned { batches: usize, recipients: usize },
    OversizedBatch { sequence_index: usize, size: Option<usize> },
    BatchStarted {
        sequence_index: usize,
        total_batches: usize,
        first_recipient: usize,
        last_recipient: usize,
    },
    BatchSubmitted { sequence_index: usize, signature: Signature },
    ConfirmationTimedOut { sequence_index: usize, signature: Signature },
    BatchFinished {
        sequence_index: usize,
        status: BatchStatus,
        signature: Option<Signature>,
        error: Option<String>,
    },
    Cooldown { delay: Duration },
    RunCancelled { remaining_batches: usize },
    RunFinished { success_count: usize, fail_count: usize },
    /// Remote draw could not be used; the draw ran locally.
    DrawFallback { reason: String },
    DrawCompleted { winners: usize, pool_size: usize, remote: bool },
    ResolutionProgress(ResolutionProgress),
    WinnerReplaced { removed: String, replacement: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupStatus {
    Start,
    /// The previous attempt failed and is being repeated.
    Retry,
    Success,
    NotFound,
    Error,
    Complete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionProgress {
    pub current: usize,
    pub total: usize,
    pub username: String,
    pub status: LookupStatus,
}

impl ResolutionProgress {
    pub fn percentage(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.current as f64 / self.total as f64) * 100.0).round() as u8
    }
}

pub trait EventSink {
    fn emit(&self, event: Event);
}

impl<F: Fn(Event)> EventSink for F {
    fn emit(&self, event: Event) {
        self(event)
    }
}

/// Discards everything.
pub struct Silent;

impl EventSink for Silent {
    fn emit(&self, _event: Event) {}
}

/// Keeps every event in memory, in emission order.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventSink for Recorder {
    fn emit(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
