//! Pending payload registry
//!
//! Send order and O(1) ack lookup over the in-flight payloads. Payloads
//! get a monotonically increasing send sequence; the queue is ordered by
//! it and the nonce index maps straight to it, so a position resolves in
//! constant time as `seq - front_seq`. Head removal is `pop_front`.
//!
//! Payloads leave the queue only from the head (ordered drain); a
//! fully-acked payload in the middle stays queued until everything before
//! it completes.

use std::collections::{HashMap, VecDeque};

use skiff_protocol::Nonce;

use crate::payload::PendingPayload;

/// In-flight payloads in send order, indexed by nonce
#[derive(Debug, Default)]
pub struct PendingQueue {
    queue: VecDeque<PendingPayload>,
    index: HashMap<Nonce, u64>,
    /// Send sequence the next pushed payload receives
    next_seq: u64,
}

impl PendingQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending payloads
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// True when nothing is in flight
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Send sequence of the head payload
    pub fn front_seq(&self) -> Option<u64> {
        if self.queue.is_empty() {
            None
        } else {
            Some(self.next_seq - self.queue.len() as u64)
        }
    }

    /// Append a payload, assigning its send sequence
    pub fn push(&mut self, payload: PendingPayload) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.index.insert(*payload.nonce(), seq);
        self.queue.push_back(payload);
        seq
    }

    /// Whether a nonce is currently in flight
    pub fn contains(&self, nonce: &Nonce) -> bool {
        self.index.contains_key(nonce)
    }

    /// Send sequence for a nonce
    pub fn seq_of(&self, nonce: &Nonce) -> Option<u64> {
        self.index.get(nonce).copied()
    }

    /// Payload at a send sequence
    pub fn get(&self, seq: u64) -> Option<&PendingPayload> {
        self.queue.get(self.position(seq)?)
    }

    /// Mutable payload at a send sequence
    pub fn get_mut(&mut self, seq: u64) -> Option<&mut PendingPayload> {
        let position = self.position(seq)?;
        self.queue.get_mut(position)
    }

    /// The head payload
    pub fn head(&self) -> Option<&PendingPayload> {
        self.queue.front()
    }

    /// The head payload, mutably
    pub fn head_mut(&mut self) -> Option<&mut PendingPayload> {
        self.queue.front_mut()
    }

    /// Remove and return the head payload, dropping its index entry
    pub fn pop_head(&mut self) -> Option<PendingPayload> {
        let payload = self.queue.pop_front()?;
        self.index.remove(payload.nonce());
        Some(payload)
    }

    /// Translate a send sequence into a queue position
    fn position(&self, seq: u64) -> Option<usize> {
        let front = self.front_seq()?;
        if seq < front || seq >= self.next_seq {
            return None;
        }
        Some((seq - front) as usize)
    }
}

#[cfg(test)]
#[path = "pending_test.rs"]
mod pending_test;
