//! Publisher event loop
//!
//! Drives the shipping state machine over one connection at a time:
//! accept a batch, frame it under a fresh nonce, send it, and hold it
//! until the server acknowledges every event. Acknowledgements may be
//! partial (a prefix of a frame) and may arrive out of order across
//! frames; the publisher reorders them so the registrar only ever sees a
//! contiguous prefix of the input stream.
//!
//! # Connection lifecycle
//!
//! The outer loop connects (rotating servers, sleeping the reconnect
//! delay between attempts); the inner loop multiplexes five event
//! sources: transport credit, spooler input, incoming frames, the
//! ack/keepalive timer, and the shutdown signal. Any transport or
//! protocol error tears the connection down and restarts the outer loop,
//! which retransmits every pending payload from the head in the original
//! send order.
//!
//! # Flow control
//!
//! New input is only accepted after a transport credit, and credits stop
//! being taken once 100 payloads are pending. Combined with the spooler's
//! batch cap this bounds publisher memory; wire frames of partially acked
//! payloads are freed eagerly and rebuilt only if retransmission needs
//! them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use skiff_config::NetworkConfig;
use skiff_protocol::{Ack, Event, Frame, Nonce, SIG_ACKN, SIG_JDAT, SIG_PING, SIG_PONG};
use skiff_transport::{Connection, Incoming, Transport, TransportError};

use crate::error::PublishError;
use crate::payload::{AckProgress, PendingPayload};
use crate::pending::PendingQueue;
use crate::registrar::RegistrarEvent;

/// Most payloads allowed in flight before new sends stop
pub const MAX_PENDING_PAYLOADS: usize = 100;

/// Idle time before a PING probes the connection
pub const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(900);

/// Stamped on events when the local hostname cannot be determined
const FALLBACK_HOSTNAME: &str = "localhost.localdomain";

/// Why the inner connection loop ended
enum LoopExit {
    Error(PublishError),
    Shutdown,
}

/// Publisher counters
#[derive(Debug, Default)]
pub struct PublisherMetrics {
    batches_received: AtomicU64,
    payloads_sent: AtomicU64,
    retransmits: AtomicU64,
    events_confirmed: AtomicU64,
    reconnects: AtomicU64,
    pings_sent: AtomicU64,
}

impl PublisherMetrics {
    /// Point-in-time snapshot
    pub fn snapshot(&self) -> PublisherSnapshot {
        PublisherSnapshot {
            batches_received: self.batches_received.load(Ordering::Relaxed),
            payloads_sent: self.payloads_sent.load(Ordering::Relaxed),
            retransmits: self.retransmits.load(Ordering::Relaxed),
            events_confirmed: self.events_confirmed.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            pings_sent: self.pings_sent.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of publisher counters
#[derive(Debug, Clone, Copy, Default)]
pub struct PublisherSnapshot {
    pub batches_received: u64,
    pub payloads_sent: u64,
    pub retransmits: u64,
    pub events_confirmed: u64,
    pub reconnects: u64,
    pub pings_sent: u64,
}

/// The publisher task
pub struct Publisher {
    config: NetworkConfig,
    transport: Box<dyn Transport>,
    input: mpsc::Receiver<Vec<Event>>,
    registrar: mpsc::Sender<RegistrarEvent>,
    cancel: CancellationToken,
    reload: Option<watch::Receiver<NetworkConfig>>,
    hostname: String,

    queue: PendingQueue,
    /// Payloads after the head that already received acks
    out_of_sync: usize,
    pending_ping: bool,
    /// Set once shutdown is requested while payloads are still pending
    shutdown: bool,

    metrics: Arc<PublisherMetrics>,
}

impl Publisher {
    /// Create a publisher
    ///
    /// The local hostname is resolved once here; every shipped event gets
    /// it as its `host` field.
    pub fn new(
        config: NetworkConfig,
        transport: Box<dyn Transport>,
        input: mpsc::Receiver<Vec<Event>>,
        registrar: mpsc::Sender<RegistrarEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let hostname = match hostname::get() {
            Ok(name) => name.to_string_lossy().into_owned(),
            Err(error) => {
                tracing::warn!(%error, "failed to determine the local hostname, using {}", FALLBACK_HOSTNAME);
                FALLBACK_HOSTNAME.to_string()
            }
        };

        Self {
            config,
            transport,
            input,
            registrar,
            cancel,
            reload: None,
            hostname,
            queue: PendingQueue::new(),
            out_of_sync: 0,
            pending_ping: false,
            shutdown: false,
            metrics: Arc::new(PublisherMetrics::default()),
        }
    }

    /// Override the hostname stamped on events
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Subscribe to configuration reloads, applied at the next reconnect
    pub fn with_reload(mut self, reload: watch::Receiver<NetworkConfig>) -> Self {
        self.reload = Some(reload);
        self
    }

    /// Shared handle to the publisher's counters
    pub fn metrics(&self) -> Arc<PublisherMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Run until shutdown; returns the final counter snapshot
    pub async fn run(mut self) -> PublisherSnapshot {
        tracing::info!(hostname = %self.hostname, "publisher starting");

        let mut reconnecting = false;

        'publish: loop {
            self.apply_reload();

            let mut conn = match self.transport.connect().await {
                Ok(conn) => conn,
                Err(error) => {
                    tracing::warn!(%error, "connect attempt failed");
                    if self.shutdown {
                        // Shutdown preempts reconnection; upstream replay
                        // recovers whatever is still pending
                        break 'publish;
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.reconnect) => {}
                        _ = self.cancel.cancelled(), if !self.shutdown => {
                            if self.queue.is_empty() {
                                break 'publish;
                            }
                            self.shutdown = true;
                        }
                    }
                    continue 'publish;
                }
            };

            if reconnecting {
                self.metrics.reconnects.fetch_add(1, Ordering::Relaxed);
            }

            // After an error every previously sent payload is resent from
            // the head; a fresh ping exchange starts from scratch too
            let mut retry_seq = if reconnecting { self.queue.front_seq() } else { None };
            self.pending_ping = false;
            let mut input_enabled = false;
            let mut credit_enabled = true;

            let timer = tokio::time::sleep(if self.queue.is_empty() {
                KEEPALIVE_TIMEOUT
            } else {
                self.config.timeout
            });
            tokio::pin!(timer);

            let exit = loop {
                tokio::select! {
                    Some(_) = conn.credit.recv(), if credit_enabled => {
                        match self.handle_credit(&conn, &mut retry_seq, &mut input_enabled).await {
                            Ok(Some(deadline)) => timer.as_mut().reset(deadline),
                            Ok(None) => {}
                            Err(error) => break LoopExit::Error(error),
                        }
                    }
                    batch = self.input.recv(), if input_enabled => {
                        match batch {
                            Some(events) => {
                                if let Err(error) = self.send_new_payload(&conn, events).await {
                                    break LoopExit::Error(error);
                                }
                                // One batch per credit
                                input_enabled = false;
                                if self.queue.len() >= MAX_PENDING_PAYLOADS {
                                    credit_enabled = false;
                                }
                                timer.as_mut().reset(self.ack_deadline());
                            }
                            None => {
                                // Spooler is gone; drain what is pending
                                // and stop
                                if self.queue.is_empty() {
                                    break LoopExit::Shutdown;
                                }
                                self.shutdown = true;
                                input_enabled = false;
                            }
                        }
                    }
                    incoming = conn.incoming.recv() => {
                        let frame = match incoming {
                            Some(Incoming::Frame(frame)) => frame,
                            Some(Incoming::Error(error)) => break LoopExit::Error(error.into()),
                            None => break LoopExit::Error(TransportError::Closed.into()),
                        };
                        if let Err(error) = self.process_frame(frame, &mut credit_enabled).await {
                            break LoopExit::Error(error);
                        }
                        if self.queue.is_empty() {
                            if self.shutdown {
                                break LoopExit::Shutdown;
                            }
                            timer.as_mut().reset(Instant::now() + KEEPALIVE_TIMEOUT);
                        } else {
                            timer.as_mut().reset(self.ack_deadline());
                        }
                    }
                    () = &mut timer => {
                        let mut resent = false;
                        if self.out_of_sync > 0 {
                            match self.check_resend(&conn).await {
                                Ok(sent) => resent = sent,
                                Err(error) => break LoopExit::Error(error),
                            }
                        }
                        if resent {
                            timer.as_mut().reset(Instant::now() + self.config.timeout);
                        } else if !self.queue.is_empty() || !input_enabled {
                            // Something was sent and nothing came back in
                            // time
                            break LoopExit::Error(PublishError::ServerTimeout);
                        } else if self.pending_ping {
                            break LoopExit::Error(PublishError::PingTimeout);
                        } else {
                            // Idle for the whole keepalive window; probe
                            // the connection
                            if let Err(error) = conn.write(SIG_PING, Bytes::new()).await {
                                break LoopExit::Error(error.into());
                            }
                            self.pending_ping = true;
                            self.metrics.pings_sent.fetch_add(1, Ordering::Relaxed);
                            // The PING took the transport buffer; wait for
                            // fresh credit before accepting input again
                            input_enabled = false;
                            timer.as_mut().reset(Instant::now() + self.config.timeout);
                        }
                    }
                    _ = self.cancel.cancelled(), if !self.shutdown => {
                        if self.queue.is_empty() {
                            break LoopExit::Shutdown;
                        }
                        self.shutdown = true;
                        input_enabled = false;
                    }
                }
            };

            match exit {
                LoopExit::Shutdown => {
                    conn.disconnect();
                    break 'publish;
                }
                LoopExit::Error(error) => {
                    tracing::warn!(%error, "transport error, will reconnect");
                    conn.disconnect();

                    if self.shutdown {
                        tracing::warn!(
                            pending = self.queue.len(),
                            "shutdown requested during drain, abandoning pending payloads"
                        );
                        break 'publish;
                    }

                    reconnecting = true;
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.reconnect) => {}
                        _ = self.cancel.cancelled(), if !self.shutdown => {
                            if self.queue.is_empty() {
                                break 'publish;
                            }
                            self.shutdown = true;
                        }
                    }
                }
            }
        }

        tracing::info!("publisher shutdown complete");
        self.metrics.snapshot()
    }

    /// Pick up a reloaded network section; only the timings apply to a
    /// running publisher
    fn apply_reload(&mut self) {
        let Some(reload) = &mut self.reload else {
            return;
        };
        if reload.has_changed().unwrap_or(false) {
            let network = reload.borrow_and_update().clone();
            self.config.timeout = network.timeout;
            self.config.reconnect = network.reconnect;
            tracing::info!(
                "applied reloaded network timings; server and TLS changes take effect on restart"
            );
        }
    }

    /// One transport credit: retransmit if anything is owed, otherwise
    /// open the input for the next batch
    ///
    /// Returns the timer deadline to arm, when one applies.
    async fn handle_credit(
        &mut self,
        conn: &Connection,
        retry_seq: &mut Option<u64>,
        input_enabled: &mut bool,
    ) -> Result<Option<Instant>, PublishError> {
        if let Some(from) = *retry_seq {
            if let Some(seq) = self.next_retry_target(from) {
                self.resend(conn, seq).await?;
                *retry_seq = self.next_retry_target(seq + 1);
                return Ok(Some(self.ack_deadline()));
            }
            // Everything left was acked while we were catching up
            *retry_seq = None;
        }

        if self.out_of_sync > 0 && self.check_resend(conn).await? {
            return Ok(Some(Instant::now() + self.config.timeout));
        }

        if !self.shutdown {
            *input_enabled = true;
        }
        Ok(None)
    }

    /// First payload at or after `from` that still has unacked events
    fn next_retry_target(&self, from: u64) -> Option<u64> {
        let front = self.queue.front_seq()?;
        let end = front + self.queue.len() as u64;
        let mut seq = from.max(front);
        while seq < end {
            match self.queue.get(seq) {
                Some(payload) if payload.is_fully_acked() => seq += 1,
                Some(_) => return Some(seq),
                None => return None,
            }
        }
        None
    }

    /// Retransmit one payload, clearing its ack deadline
    async fn resend(&mut self, conn: &Connection, seq: u64) -> Result<(), PublishError> {
        let frame = {
            let Some(payload) = self.queue.get_mut(seq) else {
                return Ok(());
            };
            payload.set_timeout(None);
            payload.wire_frame(&self.hostname)?
        };
        conn.write(SIG_JDAT, frame).await?;
        self.metrics.retransmits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Resend the head payload if its ack deadline has passed
    async fn check_resend(&mut self, conn: &Connection) -> Result<bool, PublishError> {
        let now = Instant::now();
        let frame = {
            let Some(head) = self.queue.head_mut() else {
                return Ok(false);
            };
            match head.timeout() {
                Some(deadline) if deadline <= now => {}
                _ => return Ok(false),
            }
            head.set_timeout(Some(now + self.config.timeout));
            head.wire_frame(&self.hostname)?
        };
        conn.write(SIG_JDAT, frame).await?;
        self.metrics.retransmits.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    /// When to expect the next ack: the head's armed deadline, or a
    /// fresh network timeout
    fn ack_deadline(&self) -> Instant {
        self.queue
            .head()
            .and_then(|payload| payload.timeout())
            .unwrap_or_else(|| Instant::now() + self.config.timeout)
    }

    /// Frame a batch under a fresh nonce and send it
    async fn send_new_payload(
        &mut self,
        conn: &Connection,
        events: Vec<Event>,
    ) -> Result<(), PublishError> {
        self.metrics.batches_received.fetch_add(1, Ordering::Relaxed);

        let nonce = self.generate_nonce();
        let mut payload = PendingPayload::new(events, nonce, &self.hostname)?;
        let frame = payload.wire_frame(&self.hostname)?;
        self.queue.push(payload);

        conn.write(SIG_JDAT, frame).await?;
        self.metrics.payloads_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Draw a nonce not shared with any in-flight payload
    ///
    /// A collision is astronomically unlikely, but a duplicate key would
    /// cross-wire two payloads' acknowledgements.
    fn generate_nonce(&self) -> Nonce {
        let mut rng = rand::rng();
        loop {
            let nonce: Nonce = rng.random();
            if !self.queue.contains(&nonce) {
                return nonce;
            }
        }
    }

    /// Dispatch one server frame
    async fn process_frame(
        &mut self,
        frame: Frame,
        credit_enabled: &mut bool,
    ) -> Result<(), PublishError> {
        match frame.signature {
            SIG_PONG => self.process_pong(&frame.body),
            SIG_ACKN => self.process_ack(&frame.body, credit_enabled).await,
            signature => Err(PublishError::UnknownSignature { signature }),
        }
    }

    fn process_pong(&mut self, body: &[u8]) -> Result<(), PublishError> {
        if !body.is_empty() {
            return Err(PublishError::PongOverflow(body.len()));
        }
        if !self.pending_ping {
            return Err(PublishError::UnexpectedPong);
        }
        self.pending_ping = false;
        Ok(())
    }

    /// Record an acknowledgement and drain whatever became deliverable
    async fn process_ack(
        &mut self,
        body: &[u8],
        credit_enabled: &mut bool,
    ) -> Result<(), PublishError> {
        let ack = Ack::parse(body)?;

        // A miss is a stale ack: after a retransmission both sends may be
        // acked, and the payload completed on the first
        let Some(seq) = self.queue.seq_of(&ack.nonce) else {
            return Ok(());
        };
        let is_head = self.queue.front_seq() == Some(seq);

        let (pre_ack, progress) = match self.queue.get_mut(seq) {
            Some(payload) => (
                payload.ack_events(),
                payload.apply_ack(ack.sequence as usize),
            ),
            None => return Ok(()),
        };

        if is_head {
            self.drain_to_registrar(credit_enabled).await?;
        } else if pre_ack == 0 && progress != AckProgress::None {
            // An ack for a later payload landed before the head finished
            self.out_of_sync += 1;
        }

        // While out of sync the head is overdue; arm its deadline so the
        // timer path retransmits it
        if self.out_of_sync > 0 {
            let deadline = Instant::now() + self.config.timeout;
            if let Some(head) = self.queue.head_mut() {
                if head.timeout().is_none() {
                    head.set_timeout(Some(deadline));
                }
            }
        }

        Ok(())
    }

    /// Hand acked events to the registrar, strictly in send order
    ///
    /// Walks from the head: fully-acked payloads are retired whole; a
    /// partially-acked head gives up its acked prefix and the walk stops,
    /// because nothing behind it may be delivered yet.
    async fn drain_to_registrar(
        &mut self,
        credit_enabled: &mut bool,
    ) -> Result<(), PublishError> {
        loop {
            let (fully_acked, any_acked) = match self.queue.head() {
                Some(head) => (head.is_fully_acked(), head.ack_events() > 0),
                None => break,
            };
            if !any_acked {
                break;
            }

            if fully_acked {
                let Some(payload) = self.queue.pop_head() else {
                    break;
                };
                let events = payload.into_events();
                self.metrics
                    .events_confirmed
                    .fetch_add(events.len() as u64, Ordering::Relaxed);
                self.registrar
                    .send(RegistrarEvent::Events(events))
                    .await
                    .map_err(|_| PublishError::RegistrarClosed)?;

                // The payload that just became head stops counting as
                // out of sync
                if let Some(new_head) = self.queue.head() {
                    if new_head.ack_events() > 0 && self.out_of_sync > 0 {
                        self.out_of_sync -= 1;
                    }
                }

                // Resume sends stopped by the pending-payload cap
                if !*credit_enabled && self.queue.len() < MAX_PENDING_PAYLOADS {
                    *credit_enabled = true;
                }
            } else {
                let events = match self.queue.head_mut() {
                    Some(head) => head.take_acked_prefix(),
                    None => break,
                };
                self.metrics
                    .events_confirmed
                    .fetch_add(events.len() as u64, Ordering::Relaxed);
                self.registrar
                    .send(RegistrarEvent::Events(events))
                    .await
                    .map_err(|_| PublishError::RegistrarClosed)?;
                // The rest of the head is still outstanding
                break;
            }
        }
        Ok(())
    }
}
