//! In-flight payload bookkeeping
//!
//! A `PendingPayload` owns one batch of events from the moment it is
//! built until every event has been handed to the registrar. Partial
//! acknowledgements move the acked prefix out and re-anchor the
//! bookkeeping on the remainder, so a frame regenerated for
//! retransmission covers exactly the events the server has not yet
//! accepted.

use bytes::Bytes;
use tokio::time::Instant;

use skiff_protocol::{encode_jdat_body, Event, Nonce, ProtocolError};

/// What an acknowledgement did to a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckProgress {
    /// Every remaining event is now acknowledged
    Complete,
    /// The ack recorded new progress, but events remain outstanding
    Partial,
    /// The ack was older than what is already recorded
    None,
}

/// One in-flight batch and its acknowledgement state
#[derive(Debug)]
pub struct PendingPayload {
    nonce: Nonce,
    events: Vec<Event>,
    /// `events.len()` at last (re)generation
    num_events: usize,
    /// Events acked by the server but not yet forwarded to the registrar
    ack_events: usize,
    /// Offset within `events` at which the current wire frame begins
    payload_start: usize,
    /// Serialized wire body; `None` once freed
    frame: Option<Bytes>,
    /// Deadline for the next expected ack; `None` while none is expected
    timeout: Option<Instant>,
}

impl PendingPayload {
    /// Build a payload and its initial wire frame
    pub fn new(events: Vec<Event>, nonce: Nonce, hostname: &str) -> Result<Self, ProtocolError> {
        let num_events = events.len();
        let mut payload = Self {
            nonce,
            events,
            num_events,
            ack_events: 0,
            payload_start: 0,
            frame: None,
            timeout: None,
        };
        payload.generate(hostname)?;
        Ok(payload)
    }

    /// (Re)build the wire frame from the un-acked tail of `events`
    pub fn generate(&mut self, hostname: &str) -> Result<(), ProtocolError> {
        let start = self.ack_events;
        let body = encode_jdat_body(&self.nonce, &mut self.events[start..], hostname)?;
        self.frame = Some(Bytes::from(body));
        self.payload_start = start;
        Ok(())
    }

    /// Frame bytes for (re)transmission, regenerating if freed
    pub fn wire_frame(&mut self, hostname: &str) -> Result<Bytes, ProtocolError> {
        if self.frame.is_none() {
            self.generate(hostname)?;
        }
        Ok(self.frame.clone().unwrap_or_default())
    }

    /// Apply a server acknowledgement
    ///
    /// `sequence` counts events from `payload_start`, cumulatively. A
    /// sequence at or past the remaining window completes the payload
    /// (over-large sequences are accepted silently); one that does not
    /// advance past recorded progress is a no-op. Any progress frees the
    /// frame - a later retransmission regenerates it for the smaller
    /// remainder.
    pub fn apply_ack(&mut self, sequence: usize) -> AckProgress {
        let remaining = self.num_events - self.payload_start;

        if sequence >= remaining {
            self.ack_events = self.events.len();
            self.frame = None;
            AckProgress::Complete
        } else if sequence + self.payload_start > self.ack_events {
            self.ack_events = sequence + self.payload_start;
            self.frame = None;
            AckProgress::Partial
        } else {
            AckProgress::None
        }
    }

    /// Move the acked prefix out for delivery to the registrar
    ///
    /// Re-anchors the payload on the remaining events: counters and
    /// `payload_start` reset so a regenerated frame covers exactly the
    /// remainder.
    pub fn take_acked_prefix(&mut self) -> Vec<Event> {
        let acked: Vec<Event> = self.events.drain(..self.ack_events).collect();
        self.num_events = self.events.len();
        self.ack_events = 0;
        self.payload_start = 0;
        acked
    }

    /// Consume a fully-acked payload, yielding its events for the
    /// registrar
    pub fn into_events(self) -> Vec<Event> {
        self.events
    }

    /// The payload's nonce
    pub fn nonce(&self) -> &Nonce {
        &self.nonce
    }

    /// True when every event has been acknowledged
    pub fn is_fully_acked(&self) -> bool {
        self.ack_events == self.events.len()
    }

    /// Events acked but not yet drained to the registrar
    pub fn ack_events(&self) -> usize {
        self.ack_events
    }

    /// Event count at last frame generation
    pub fn num_events(&self) -> usize {
        self.num_events
    }

    /// Offset the current frame starts at
    pub fn payload_start(&self) -> usize {
        self.payload_start
    }

    /// Number of events currently held
    pub fn events_len(&self) -> usize {
        self.events.len()
    }

    /// Whether a serialized frame is currently held in memory
    pub fn has_frame(&self) -> bool {
        self.frame.is_some()
    }

    /// Drop the serialized frame to bound memory
    pub fn free_frame(&mut self) {
        self.frame = None;
    }

    /// The ack deadline, if one is armed
    pub fn timeout(&self) -> Option<Instant> {
        self.timeout
    }

    /// Arm or clear the ack deadline
    pub fn set_timeout(&mut self, deadline: Option<Instant>) {
        self.timeout = deadline;
    }
}

#[cfg(test)]
#[path = "payload_test.rs"]
mod payload_test;
