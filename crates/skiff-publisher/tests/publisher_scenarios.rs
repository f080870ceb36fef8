//! End-to-end publisher scenarios over a scripted transport
//!
//! The mock transport hands each connection's server end to the test,
//! which grants credits, reads frames, and answers with acks, pongs, or
//! failures. Time is paused, so keepalive and timeout scenarios run
//! instantly: whenever every task is idle, the runtime jumps to the next
//! armed deadline.

use std::io::Read;

use async_trait::async_trait;
use bytes::Bytes;
use flate2::read::ZlibDecoder;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use skiff_config::NetworkConfig;
use skiff_protocol::{Ack, Event, Frame, SIG_ACKN, SIG_JDAT, SIG_PING, SIG_PONG};
use skiff_publisher::{Publisher, PublisherSnapshot, RegistrarEvent};
use skiff_transport::{Connection, Incoming, Transport, TransportError};

const HOSTNAME: &str = "shipper.example.com";

// ============================================================================
// Scripted transport
// ============================================================================

/// The server's end of one mock connection
struct ServerEnd {
    credit: mpsc::Sender<()>,
    incoming: mpsc::Sender<Incoming>,
    outgoing: mpsc::Receiver<([u8; 4], Bytes)>,
}

/// A decoded JDAT frame
struct JdatFrame {
    nonce: [u8; 16],
    records: Vec<serde_json::Value>,
}

impl JdatFrame {
    fn decode(body: &[u8]) -> Self {
        let mut nonce = [0u8; 16];
        nonce.copy_from_slice(&body[..16]);

        let mut decoder = ZlibDecoder::new(&body[16..]);
        let mut stream = Vec::new();
        decoder.read_to_end(&mut stream).unwrap();

        let mut records = Vec::new();
        let mut rest = &stream[..];
        while !rest.is_empty() {
            let len = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
            records.push(serde_json::from_slice(&rest[4..4 + len]).unwrap());
            rest = &rest[4 + len..];
        }

        Self { nonce, records }
    }

    fn lines(&self) -> Vec<&str> {
        self.records
            .iter()
            .map(|r| r["line"].as_str().unwrap())
            .collect()
    }
}

impl ServerEnd {
    /// Allow the publisher one more write
    async fn grant_credit(&self) {
        self.credit.send(()).await.unwrap();
    }

    async fn next_frame(&mut self) -> ([u8; 4], Bytes) {
        self.outgoing.recv().await.expect("publisher hung up")
    }

    async fn next_jdat(&mut self) -> JdatFrame {
        let (signature, body) = self.next_frame().await;
        assert_eq!(signature, SIG_JDAT, "expected a JDAT frame");
        JdatFrame::decode(&body)
    }

    async fn ack(&self, nonce: [u8; 16], sequence: u32) {
        let body = Ack { nonce, sequence }.to_bytes();
        self.incoming
            .send(Incoming::Frame(Frame {
                signature: SIG_ACKN,
                body: Bytes::copy_from_slice(&body),
            }))
            .await
            .unwrap();
    }

    async fn send(&self, signature: [u8; 4], body: &[u8]) {
        self.incoming
            .send(Incoming::Frame(Frame {
                signature,
                body: Bytes::copy_from_slice(body),
            }))
            .await
            .unwrap();
    }

    /// Deliver a terminal transport error
    async fn fail(&self) {
        self.incoming
            .send(Incoming::Error(TransportError::Closed))
            .await
            .unwrap();
    }
}

/// Transport that hands each new connection's server end to the test
struct MockTransport {
    server_ends: mpsc::UnboundedSender<ServerEnd>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<Connection, TransportError> {
        let (credit_tx, credit_rx) = mpsc::channel(256);
        let (incoming_tx, incoming_rx) = mpsc::channel(64);
        let (outgoing_tx, outgoing_rx) = mpsc::channel(256);

        self.server_ends
            .send(ServerEnd {
                credit: credit_tx,
                incoming: incoming_tx,
                outgoing: outgoing_rx,
            })
            .map_err(|_| TransportError::Closed)?;

        Ok(Connection::new(credit_rx, incoming_rx, outgoing_tx, Vec::new()))
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    input: mpsc::Sender<Vec<Event>>,
    registrar: mpsc::Receiver<RegistrarEvent>,
    server_ends: mpsc::UnboundedReceiver<ServerEnd>,
    cancel: CancellationToken,
    task: JoinHandle<PublisherSnapshot>,
}

fn start_publisher() -> Harness {
    let (input_tx, input_rx) = mpsc::channel(256);
    let (registrar_tx, registrar_rx) = mpsc::channel(256);
    let (ends_tx, ends_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let publisher = Publisher::new(
        NetworkConfig::default(),
        Box::new(MockTransport {
            server_ends: ends_tx,
        }),
        input_rx,
        registrar_tx,
        cancel.clone(),
    )
    .with_hostname(HOSTNAME);

    Harness {
        input: input_tx,
        registrar: registrar_rx,
        server_ends: ends_rx,
        cancel,
        task: tokio::spawn(publisher.run()),
    }
}

impl Harness {
    /// Wait for the publisher to (re)connect
    async fn connection(&mut self) -> ServerEnd {
        self.server_ends.recv().await.expect("publisher hung up")
    }

    async fn send_batch(&self, lines: std::ops::Range<u64>) {
        let events: Vec<Event> = lines
            .map(|n| Event::from_line("test.log", n, format!("event {}", n)))
            .collect();
        self.input.send(events).await.unwrap();
    }

    /// Expect the next registrar delivery to carry exactly these lines
    async fn expect_delivery(&mut self, expected: &[&str]) {
        let RegistrarEvent::Events(events) = self.registrar.recv().await.expect("registrar closed");
        let lines: Vec<&str> = events
            .iter()
            .map(|e| e.get("line").unwrap().as_str().unwrap())
            .collect();
        assert_eq!(lines, expected);
    }

    fn expect_no_delivery_yet(&mut self) {
        assert!(
            self.registrar.try_recv().is_err(),
            "registrar received events before the head was acked"
        );
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_happy_path() {
    let mut harness = start_publisher();
    let mut conn = harness.connection().await;

    conn.grant_credit().await;
    harness.send_batch(0..3).await;

    let jdat = conn.next_jdat().await;
    assert_eq!(jdat.lines(), vec!["event 0", "event 1", "event 2"]);
    assert_eq!(jdat.records[0]["host"], HOSTNAME);

    conn.ack(jdat.nonce, 3).await;
    harness.expect_delivery(&["event 0", "event 1", "event 2"]).await;

    harness.cancel.cancel();
    let snapshot = harness.task.await.unwrap();
    assert_eq!(snapshot.payloads_sent, 1);
    assert_eq!(snapshot.events_confirmed, 3);
    assert_eq!(snapshot.retransmits, 0);
}

#[tokio::test(start_paused = true)]
async fn test_partial_ack_then_completion() {
    let mut harness = start_publisher();
    let mut conn = harness.connection().await;

    conn.grant_credit().await;
    harness.send_batch(0..5).await;
    let jdat = conn.next_jdat().await;

    // The acked prefix is delivered immediately; the rest stays pending
    conn.ack(jdat.nonce, 2).await;
    harness.expect_delivery(&["event 0", "event 1"]).await;

    // Cumulative sequence covering the whole original frame completes it
    conn.ack(jdat.nonce, 5).await;
    harness.expect_delivery(&["event 2", "event 3", "event 4"]).await;

    harness.cancel.cancel();
    let snapshot = harness.task.await.unwrap();
    assert_eq!(snapshot.events_confirmed, 5);
}

#[tokio::test(start_paused = true)]
async fn test_out_of_order_acks_reordered_for_registrar() {
    let mut harness = start_publisher();
    let mut conn = harness.connection().await;

    conn.grant_credit().await;
    harness.send_batch(0..2).await;
    let first = conn.next_jdat().await;

    conn.grant_credit().await;
    harness.send_batch(2..4).await;
    let second = conn.next_jdat().await;

    // The later payload acks first; nothing may reach the registrar
    conn.ack(second.nonce, 2).await;
    tokio::task::yield_now().await;
    harness.expect_no_delivery_yet();

    conn.ack(first.nonce, 2).await;
    harness.expect_delivery(&["event 0", "event 1"]).await;
    harness.expect_delivery(&["event 2", "event 3"]).await;

    harness.cancel.cancel();
    let snapshot = harness.task.await.unwrap();
    assert_eq!(snapshot.events_confirmed, 4);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_retransmits_pending_in_order() {
    let mut harness = start_publisher();
    let mut conn = harness.connection().await;

    conn.grant_credit().await;
    harness.send_batch(0..2).await;
    let first = conn.next_jdat().await;

    conn.grant_credit().await;
    harness.send_batch(2..4).await;
    let second = conn.next_jdat().await;

    // Connection dies with both payloads unacked
    conn.fail().await;

    let mut conn = harness.connection().await;
    conn.grant_credit().await;
    let resent_first = conn.next_jdat().await;
    conn.grant_credit().await;
    let resent_second = conn.next_jdat().await;

    // Same nonces, same events, original order
    assert_eq!(resent_first.nonce, first.nonce);
    assert_eq!(resent_second.nonce, second.nonce);
    assert_eq!(resent_first.lines(), vec!["event 0", "event 1"]);
    assert_eq!(resent_second.lines(), vec!["event 2", "event 3"]);

    conn.ack(resent_first.nonce, 2).await;
    conn.ack(resent_second.nonce, 2).await;
    harness.expect_delivery(&["event 0", "event 1"]).await;
    harness.expect_delivery(&["event 2", "event 3"]).await;

    harness.cancel.cancel();
    let snapshot = harness.task.await.unwrap();
    assert_eq!(snapshot.reconnects, 1);
    assert_eq!(snapshot.retransmits, 2);
}

#[tokio::test(start_paused = true)]
async fn test_frame_regenerated_after_partial_ack_and_reconnect() {
    let mut harness = start_publisher();
    let mut conn = harness.connection().await;

    conn.grant_credit().await;
    harness.send_batch(0..5).await;
    let jdat = conn.next_jdat().await;

    // Partial ack frees the frame and hands over the prefix
    conn.ack(jdat.nonce, 2).await;
    harness.expect_delivery(&["event 0", "event 1"]).await;

    conn.fail().await;

    // The retransmitted frame is rebuilt from the remainder only
    let mut conn = harness.connection().await;
    conn.grant_credit().await;
    let resent = conn.next_jdat().await;
    assert_eq!(resent.nonce, jdat.nonce);
    assert_eq!(resent.lines(), vec!["event 2", "event 3", "event 4"]);

    conn.ack(resent.nonce, 3).await;
    harness.expect_delivery(&["event 2", "event 3", "event 4"]).await;

    harness.cancel.cancel();
    harness.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_backpressure_caps_pending_payloads() {
    let mut harness = start_publisher();
    let mut conn = harness.connection().await;

    let mut nonces = Vec::new();
    for n in 0..100u64 {
        conn.grant_credit().await;
        harness.send_batch(n..n + 1).await;
        nonces.push(conn.next_jdat().await.nonce);
    }

    // Payload #101 must not ship while 100 are pending, even though the
    // transport has credit to spare
    conn.grant_credit().await;
    harness.send_batch(100..101).await;
    let held_back = tokio::time::timeout(
        std::time::Duration::from_secs(1),
        conn.outgoing.recv(),
    )
    .await;
    assert!(held_back.is_err(), "101st payload shipped past the cap");

    // One full head ack drains a slot and releases the held payload
    conn.ack(nonces[0], 1).await;
    harness.expect_delivery(&["event 0"]).await;
    let released = conn.next_jdat().await;
    assert_eq!(released.lines(), vec!["event 100"]);

    // Drain the rest so shutdown is immediate
    for nonce in &nonces[1..] {
        conn.ack(*nonce, 1).await;
    }
    conn.ack(released.nonce, 1).await;
    for n in 1..=100u64 {
        let line = format!("event {}", n);
        harness.expect_delivery(&[line.as_str()]).await;
    }

    harness.cancel.cancel();
    let snapshot = harness.task.await.unwrap();
    assert_eq!(snapshot.payloads_sent, 101);
    assert_eq!(snapshot.events_confirmed, 101);
}

#[tokio::test(start_paused = true)]
async fn test_idle_keepalive_ping_pong() {
    let mut harness = start_publisher();
    let mut conn = harness.connection().await;
    conn.grant_credit().await;

    // Paused time jumps the 900s keepalive window once everyone is idle
    let (signature, body) = conn.next_frame().await;
    assert_eq!(signature, SIG_PING);
    assert!(body.is_empty());

    conn.send(SIG_PONG, b"").await;
    // The transport grants fresh credit after the PING write
    conn.grant_credit().await;

    // Connection stays healthy: the next keepalive window produces
    // another PING rather than a reconnect
    let (signature, _) = conn.next_frame().await;
    assert_eq!(signature, SIG_PING);

    harness.cancel.cancel();
    let snapshot = harness.task.await.unwrap();
    assert_eq!(snapshot.pings_sent, 2);
    assert_eq!(snapshot.reconnects, 0);
}

#[tokio::test(start_paused = true)]
async fn test_missing_pong_forces_reconnect() {
    let mut harness = start_publisher();
    let mut conn = harness.connection().await;
    conn.grant_credit().await;

    let (signature, _) = conn.next_frame().await;
    assert_eq!(signature, SIG_PING);
    conn.grant_credit().await;

    // No PONG: after the network timeout the publisher reconnects
    let _conn = harness.connection().await;

    harness.cancel.cancel();
    let snapshot = harness.task.await.unwrap();
    assert_eq!(snapshot.reconnects, 1);
}

#[tokio::test(start_paused = true)]
async fn test_pong_with_body_is_a_protocol_error() {
    let mut harness = start_publisher();
    let mut conn = harness.connection().await;
    conn.grant_credit().await;

    let (signature, _) = conn.next_frame().await;
    assert_eq!(signature, SIG_PING);
    conn.send(SIG_PONG, &[1]).await;

    let _conn = harness.connection().await;
    harness.cancel.cancel();
    harness.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_unexpected_pong_is_a_protocol_error() {
    let mut harness = start_publisher();
    let conn = harness.connection().await;

    conn.send(SIG_PONG, b"").await;

    let _conn = harness.connection().await;
    harness.cancel.cancel();
    harness.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_unknown_signature_is_a_protocol_error() {
    let mut harness = start_publisher();
    let conn = harness.connection().await;

    conn.send(*b"WHAT", b"payload").await;

    let _conn = harness.connection().await;
    harness.cancel.cancel();
    harness.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stale_ack_is_ignored() {
    let mut harness = start_publisher();
    let mut conn = harness.connection().await;

    conn.grant_credit().await;
    harness.send_batch(0..2).await;
    let jdat = conn.next_jdat().await;

    conn.ack(jdat.nonce, 2).await;
    harness.expect_delivery(&["event 0", "event 1"]).await;

    // A duplicate ack for the completed payload must be ignored, and the
    // publisher keeps working afterwards
    conn.ack(jdat.nonce, 2).await;

    conn.grant_credit().await;
    harness.send_batch(2..3).await;
    let next = conn.next_jdat().await;
    conn.ack(next.nonce, 1).await;
    harness.expect_delivery(&["event 2"]).await;

    harness.cancel.cancel();
    harness.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_graceful_shutdown_drains_pending() {
    let mut harness = start_publisher();
    let mut conn = harness.connection().await;

    conn.grant_credit().await;
    harness.send_batch(0..2).await;
    let first = conn.next_jdat().await;
    conn.grant_credit().await;
    harness.send_batch(2..4).await;
    let second = conn.next_jdat().await;

    // Shutdown with two payloads in flight: the publisher keeps running
    // until both are acked
    harness.cancel.cancel();
    tokio::task::yield_now().await;

    conn.ack(first.nonce, 2).await;
    harness.expect_delivery(&["event 0", "event 1"]).await;
    conn.ack(second.nonce, 2).await;
    harness.expect_delivery(&["event 2", "event 3"]).await;

    let snapshot = harness.task.await.unwrap();
    assert_eq!(snapshot.events_confirmed, 4);
}

#[tokio::test(start_paused = true)]
async fn test_error_during_shutdown_drain_exits() {
    let mut harness = start_publisher();
    let mut conn = harness.connection().await;

    conn.grant_credit().await;
    harness.send_batch(0..2).await;
    let _jdat = conn.next_jdat().await;

    harness.cancel.cancel();
    tokio::task::yield_now().await;

    // Shutdown is preemptive over reconnection: a dead connection during
    // the drain ends the publisher instead of retrying forever
    conn.fail().await;
    harness.task.await.unwrap();

    assert!(
        harness.server_ends.try_recv().is_err(),
        "publisher reconnected after shutdown"
    );
}

#[tokio::test(start_paused = true)]
async fn test_input_close_drains_then_exits() {
    let mut harness = start_publisher();
    let mut conn = harness.connection().await;

    conn.grant_credit().await;
    harness.send_batch(0..3).await;
    let jdat = conn.next_jdat().await;

    conn.ack(jdat.nonce, 3).await;
    harness.expect_delivery(&["event 0", "event 1", "event 2"]).await;

    // Spooler closing the input ends the publisher once it notices on
    // the next credit
    drop(harness.input);
    conn.grant_credit().await;

    let snapshot = harness.task.await.unwrap();
    assert_eq!(snapshot.events_confirmed, 3);
}
