//! Line harvester
//!
//! Reads newline-delimited log lines from a byte stream (standard input
//! in practice) and turns each into an `Event` carrying the line, its
//! source name, and the byte offset just past it - the position a
//! restart would resume from once the registrar records the event as
//! acknowledged.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use skiff_protocol::Event;

/// Source name used for standard input
pub const STDIN_SOURCE: &str = "-";

/// Streams lines from a reader into events
pub struct LineHarvester<R> {
    reader: BufReader<R>,
    source: String,
    output: mpsc::Sender<Event>,
    cancel: CancellationToken,
}

impl LineHarvester<tokio::io::Stdin> {
    /// Harvest standard input
    pub fn stdin(output: mpsc::Sender<Event>, cancel: CancellationToken) -> Self {
        Self::from_reader(tokio::io::stdin(), STDIN_SOURCE, output, cancel)
    }
}

impl<R: AsyncRead + Unpin> LineHarvester<R> {
    /// Harvest an arbitrary reader under the given source name
    pub fn from_reader(
        reader: R,
        source: impl Into<String>,
        output: mpsc::Sender<Event>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            reader: BufReader::new(reader),
            source: source.into(),
            output,
            cancel,
        }
    }

    /// Run until the reader ends or shutdown is signalled
    pub async fn run(mut self) {
        let mut lines = self.reader.lines();
        let mut offset: u64 = 0;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            // Offset points past the line and its newline
                            offset += line.len() as u64 + 1;
                            let event = Event::from_line(self.source.clone(), offset, line);
                            if self.output.send(event).await.is_err() {
                                return;
                            }
                        }
                        Ok(None) => {
                            tracing::info!(source = %self.source, "input exhausted");
                            break;
                        }
                        Err(error) => {
                            tracing::error!(source = %self.source, %error, "read failed");
                            break;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "harvest_test.rs"]
mod harvest_test;
