//! Event spooler
//!
//! Accumulates harvested events into batches for the publisher. A batch
//! ships when it reaches the configured size or when the idle flush
//! deadline passes with events waiting, whichever comes first. On
//! shutdown the partial batch is flushed so nothing harvested is left
//! behind.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use skiff_config::SpoolConfig;
use skiff_protocol::Event;

/// Batches events by size and idle time
pub struct Spooler {
    input: mpsc::Receiver<Event>,
    output: mpsc::Sender<Vec<Event>>,
    size: usize,
    idle_flush: Duration,
    cancel: CancellationToken,
}

impl Spooler {
    /// Create a spooler between the harvester and the publisher
    pub fn new(
        config: &SpoolConfig,
        input: mpsc::Receiver<Event>,
        output: mpsc::Sender<Vec<Event>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            input,
            output,
            size: config.size,
            idle_flush: config.idle_flush,
            cancel,
        }
    }

    /// Run until the input closes or shutdown is signalled
    pub async fn run(mut self) {
        let mut spool: Vec<Event> = Vec::with_capacity(self.size);
        let mut deadline = Instant::now() + self.idle_flush;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    break;
                }
                event = self.input.recv() => {
                    match event {
                        Some(event) => {
                            if spool.is_empty() {
                                deadline = Instant::now() + self.idle_flush;
                            }
                            spool.push(event);
                            if spool.len() >= self.size {
                                if !self.flush(&mut spool).await {
                                    return;
                                }
                            }
                        }
                        None => break,
                    }
                }
                _ = tokio::time::sleep_until(deadline), if !spool.is_empty() => {
                    if !self.flush(&mut spool).await {
                        return;
                    }
                }
            }
        }

        // Drain whatever is left so harvested events are not dropped
        if !spool.is_empty() {
            self.flush(&mut spool).await;
        }
        tracing::debug!("spooler shutting down");
    }

    /// Hand the spool to the publisher; false when the publisher is gone
    async fn flush(&self, spool: &mut Vec<Event>) -> bool {
        let batch = std::mem::replace(spool, Vec::with_capacity(self.size));
        match self.output.send(batch).await {
            Ok(()) => true,
            Err(_) => {
                tracing::debug!("publisher input closed, spooler stopping");
                false
            }
        }
    }
}

#[cfg(test)]
#[path = "spool_test.rs"]
mod spool_test;
