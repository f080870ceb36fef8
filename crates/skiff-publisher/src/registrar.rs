//! Registrar sink
//!
//! The publisher emits `RegistrarEvent::Events` batches in exact send
//! order; concatenated, they form a prefix of the original input stream.
//! The registrar records the highest acknowledged offset per source and
//! persists the map after every update, so a restart resumes from known
//! progress instead of replaying the world.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tokio::sync::mpsc;

use skiff_protocol::Event;

/// State file name inside the persist directory
pub const STATE_FILE: &str = ".skiff";

/// Ordered notification from the publisher
#[derive(Debug)]
pub enum RegistrarEvent {
    /// A contiguous run of events the server has durably accepted
    Events(Vec<Event>),
}

/// Persists acknowledged offsets
pub struct Registrar {
    receiver: mpsc::Receiver<RegistrarEvent>,
    state_path: PathBuf,
    offsets: BTreeMap<String, u64>,
    events_recorded: u64,
}

impl Registrar {
    /// Create a registrar persisting under `persist_dir`
    pub fn new(persist_dir: impl AsRef<Path>, receiver: mpsc::Receiver<RegistrarEvent>) -> Self {
        Self {
            receiver,
            state_path: persist_dir.as_ref().join(STATE_FILE),
            offsets: BTreeMap::new(),
            events_recorded: 0,
        }
    }

    /// Run until the publisher closes the channel
    pub async fn run(mut self) {
        tracing::debug!(state = %self.state_path.display(), "registrar starting");

        while let Some(event) = self.receiver.recv().await {
            match event {
                RegistrarEvent::Events(events) => self.record(&events),
            }
        }

        tracing::info!(
            events = self.events_recorded,
            sources = self.offsets.len(),
            "registrar shutting down"
        );
    }

    /// Fold a batch of acknowledged events into the offset map
    fn record(&mut self, events: &[Event]) {
        for event in events {
            if let (Some(source), Some(offset)) = (event.source(), event.offset()) {
                let entry = self.offsets.entry(source.to_string()).or_insert(0);
                if offset > *entry {
                    *entry = offset;
                }
            }
        }

        self.events_recorded += events.len() as u64;
        self.persist();
    }

    /// Write the offset map out, atomically via a temp file rename
    fn persist(&self) {
        let json = match serde_json::to_vec_pretty(&self.offsets) {
            Ok(json) => json,
            Err(error) => {
                tracing::error!(%error, "failed to serialize registrar state");
                return;
            }
        };

        let tmp_path = self.state_path.with_extension("tmp");
        if let Err(error) = std::fs::write(&tmp_path, &json) {
            tracing::error!(%error, path = %tmp_path.display(), "failed to write registrar state");
            return;
        }
        if let Err(error) = std::fs::rename(&tmp_path, &self.state_path) {
            tracing::error!(%error, path = %self.state_path.display(), "failed to move registrar state into place");
        }
    }

    /// Number of events recorded so far
    pub fn events_recorded(&self) -> u64 {
        self.events_recorded
    }
}

#[cfg(test)]
#[path = "registrar_test.rs"]
mod registrar_test;
