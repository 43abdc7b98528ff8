//! Shared test helpers: a loopback target and in-process link doubles.

use async_trait::async_trait;
use filchaos_core::constants::{
    FLOODSUB_PROTOCOL, GOSSIPSUB_V10_PROTOCOL, GOSSIPSUB_V11_PROTOCOL, IDENTIFY_PUSH_PROTOCOL,
    PING_PROTOCOL,
};
use filchaos_core::{AssertionSink, ChaosConfig, FuzzError};
use filchaos_net::{BoxedStream, Connector, PeerLink, TargetPeer};
use libp2p::futures::io::Cursor;
use libp2p::futures::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, StreamExt};
use libp2p::swarm::SwarmEvent;
use libp2p::{Multiaddr, PeerId, StreamProtocol, SwarmBuilder, noise, tcp, yamux};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Every protocol the loopback target accepts streams on.
pub const ACCEPTED_PROTOCOLS: [&str; 5] = [
    PING_PROTOCOL,
    IDENTIFY_PUSH_PROTOCOL,
    GOSSIPSUB_V11_PROTOCOL,
    GOSSIPSUB_V10_PROTOCOL,
    FLOODSUB_PROTOCOL,
];

/// Deadlines short enough that a whole attack finishes in well under a
/// second even when every operation times out.
pub fn tight_config() -> ChaosConfig {
    ChaosConfig {
        dial_timeout: Duration::from_millis(100),
        teardown_timeout: Duration::from_millis(50),
        io_timeout: Duration::from_millis(50),
        reply_timeout: Duration::from_millis(20),
        oversized_write_timeout: Duration::from_millis(100),
        stream_hold: Duration::from_millis(50),
        incomplete_write_pause: Duration::from_millis(20),
        slow_write_budget: Duration::from_millis(200),
        stop_grace: Duration::from_secs(1),
        seed: Some(1),
        ..ChaosConfig::local()
    }
}

/// A syntactically valid `/p2p` target that nothing listens on.
pub fn unroutable_target() -> String {
    format!("/ip4/127.0.0.1/tcp/1/p2p/{}", PeerId::random())
}

// ---------------------------------------------------------------------------
// Loopback target
// ---------------------------------------------------------------------------

/// How the loopback target treats what it receives.
#[derive(Debug, Clone, Copy, Default)]
pub struct TargetOptions {
    /// Echo ping payloads back, like a real ping responder.
    pub echo_ping: bool,
    /// Close the whole connection once a peer has sent more than this.
    pub close_after: Option<usize>,
}

/// One inbound stream, recorded when it ended.
#[derive(Debug, Clone)]
pub struct ReceivedStream {
    pub protocol: &'static str,
    pub from: PeerId,
    pub bytes: Vec<u8>,
    /// False when the stream ended in an error rather than a clean EOF.
    pub clean: bool,
}

struct TargetState {
    options: TargetOptions,
    received: Mutex<Vec<ReceivedStream>>,
    per_peer: Mutex<HashMap<PeerId, usize>>,
    connections: AtomicUsize,
    disconnects: AtomicUsize,
    disconnect_tx: mpsc::UnboundedSender<PeerId>,
}

impl TargetState {
    /// Add `n` bytes to `peer`'s running total and return the new total.
    fn account(&self, peer: PeerId, n: usize) -> usize {
        let mut per_peer = self.per_peer.lock();
        let total = per_peer.entry(peer).or_default();
        *total += n;
        *total
    }
}

/// A libp2p peer on 127.0.0.1 that accepts streams on every attacked
/// protocol and records their contents.
pub struct LoopbackTarget {
    target: TargetPeer,
    state: Arc<TargetState>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl LoopbackTarget {
    pub async fn spawn(options: TargetOptions) -> Self {
        let mut swarm = SwarmBuilder::with_new_identity()
            .with_tokio()
            .with_tcp(
                tcp::Config::default().nodelay(true),
                noise::Config::new,
                yamux::Config::default,
            )
            .expect("tcp transport")
            .with_behaviour(|_| libp2p_stream::Behaviour::new())
            .expect("stream behaviour")
            .with_swarm_config(|c| c.with_idle_connection_timeout(Duration::from_secs(30)))
            .build();
        let peer_id = *swarm.local_peer_id();
        let mut control = swarm.behaviour().new_control();

        swarm
            .listen_on("/ip4/127.0.0.1/tcp/0".parse().expect("listen addr"))
            .expect("listen");
        let addr: Multiaddr = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let SwarmEvent::NewListenAddr { address, .. } = swarm.select_next_some().await {
                    return address;
                }
            }
        })
        .await
        .expect("target never reported a listen address");

        let (disconnect_tx, mut disconnect_rx) = mpsc::unbounded_channel();
        let state = Arc::new(TargetState {
            options,
            received: Mutex::new(Vec::new()),
            per_peer: Mutex::new(HashMap::new()),
            connections: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            disconnect_tx,
        });
        let shutdown = CancellationToken::new();
        let mut tasks = Vec::new();

        for protocol in ACCEPTED_PROTOCOLS {
            let mut incoming = control
                .accept(StreamProtocol::new(protocol))
                .expect("protocol registered twice");
            let state = Arc::clone(&state);
            tasks.push(tokio::spawn(async move {
                while let Some((peer, stream)) = incoming.next().await {
                    tokio::spawn(drain(protocol, peer, stream, Arc::clone(&state)));
                }
            }));
        }

        let swarm_state = Arc::clone(&state);
        let swarm_shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = swarm_shutdown.cancelled() => break,
                    Some(peer) = disconnect_rx.recv() => {
                        if swarm.disconnect_peer_id(peer).is_ok() {
                            swarm_state.disconnects.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                    event = swarm.select_next_some() => {
                        if let SwarmEvent::ConnectionEstablished { .. } = event {
                            swarm_state.connections.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                }
            }
        }));

        Self {
            target: TargetPeer::from_parts(peer_id, addr),
            state,
            shutdown,
            tasks,
        }
    }

    pub fn target(&self) -> &TargetPeer {
        &self.target
    }

    /// Streams that have ended so far.
    pub fn received(&self) -> Vec<ReceivedStream> {
        self.state.received.lock().clone()
    }

    pub fn received_on(&self, protocol: &str) -> Vec<ReceivedStream> {
        self.received()
            .into_iter()
            .filter(|s| s.protocol == protocol)
            .collect()
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Connections the target closed because of `close_after`.
    pub fn disconnects(&self) -> usize {
        self.state.disconnects.load(Ordering::SeqCst)
    }

    /// Poll until at least `n` streams on `protocol` have ended, or `within`
    /// elapses; returns whatever was recorded either way.
    pub async fn wait_for(&self, protocol: &str, n: usize, within: Duration) -> Vec<ReceivedStream> {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let seen = self.received_on(protocol);
            if seen.len() >= n || tokio::time::Instant::now() >= deadline {
                return seen;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for LoopbackTarget {
    fn drop(&mut self) {
        self.shutdown.cancel();
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Read one inbound stream to its end and record it.
async fn drain(protocol: &'static str, peer: PeerId, mut stream: libp2p::Stream, state: Arc<TargetState>) {
    let mut bytes = Vec::new();
    let mut buf = vec![0u8; 64 * 1024];
    let clean = loop {
        match stream.read(&mut buf).await {
            Ok(0) => break true,
            Ok(n) => {
                bytes.extend_from_slice(&buf[..n]);
                if protocol == PING_PROTOCOL && state.options.echo_ping {
                    let _ = stream.write_all(&buf[..n]).await;
                    let _ = stream.flush().await;
                }
                let total = state.account(peer, n);
                if state.options.close_after.is_some_and(|limit| total > limit) {
                    let _ = state.disconnect_tx.send(peer);
                    break false;
                }
            }
            Err(_) => break false,
        }
    };
    state.received.lock().push(ReceivedStream {
        protocol,
        from: peer,
        bytes,
        clean,
    });
}

// ---------------------------------------------------------------------------
// Stalled link
// ---------------------------------------------------------------------------

/// A stream whose every read, write, flush and close stays pending forever.
pub struct StalledStream;

impl AsyncRead for StalledStream {
    fn poll_read(self: Pin<&mut Self>, _: &mut Context<'_>, _: &mut [u8]) -> Poll<std::io::Result<usize>> {
        Poll::Pending
    }
}

impl AsyncWrite for StalledStream {
    fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, _: &[u8]) -> Poll<std::io::Result<usize>> {
        Poll::Pending
    }
    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Pending
    }
    fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Pending
    }
}

/// Where a [`StalledLink`] stops making progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallAt {
    /// Opening a stream never completes.
    Open,
    /// Streams open instantly but never move a byte.
    Io,
}

/// A link to a peer that never answers. Disconnect and redial never
/// complete either.
#[derive(Debug)]
pub struct StalledLink {
    stall: StallAt,
    torn_down: AtomicUsize,
}

impl StalledLink {
    pub fn new(stall: StallAt) -> Self {
        Self {
            stall,
            torn_down: AtomicUsize::new(0),
        }
    }

    pub fn teardowns(&self) -> usize {
        self.torn_down.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerLink for StalledLink {
    fn local_peer_id(&self) -> PeerId {
        PeerId::random()
    }

    async fn open_stream(&self, _: StreamProtocol) -> Result<BoxedStream, FuzzError> {
        match self.stall {
            StallAt::Open => std::future::pending().await,
            StallAt::Io => Ok(Box::new(StalledStream)),
        }
    }

    async fn disconnect(&self) -> Result<(), FuzzError> {
        std::future::pending().await
    }

    async fn reconnect(&self) -> Result<(), FuzzError> {
        std::future::pending().await
    }

    async fn teardown(&self) {
        self.torn_down.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out a fresh [`StalledLink`] per connect.
#[derive(Debug, Clone, Copy)]
pub struct StalledConnector(pub StallAt);

#[async_trait]
impl Connector for StalledConnector {
    type Link = StalledLink;

    async fn connect(&self, _: &TargetPeer, _: &ChaosConfig, _: &CancellationToken) -> Result<StalledLink, FuzzError> {
        Ok(StalledLink::new(self.0))
    }
}

// ---------------------------------------------------------------------------
// Counting connector
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Gauge {
    live: AtomicUsize,
    peak: AtomicUsize,
    connects: AtomicUsize,
    teardowns: AtomicUsize,
}

/// Counts live links: a link is live from connect until its first teardown.
#[derive(Debug, Clone)]
pub struct CountingConnector {
    gauge: Arc<Gauge>,
    open_delay: Duration,
}

impl CountingConnector {
    /// Every stream open on the produced links takes `open_delay`.
    pub fn new(open_delay: Duration) -> Self {
        Self {
            gauge: Arc::new(Gauge::default()),
            open_delay,
        }
    }

    pub fn live(&self) -> usize {
        self.gauge.live.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.gauge.peak.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.gauge.connects.load(Ordering::SeqCst)
    }

    pub fn teardowns(&self) -> usize {
        self.gauge.teardowns.load(Ordering::SeqCst)
    }
}

pub struct CountingLink {
    gauge: Arc<Gauge>,
    open_delay: Duration,
    torn_down: AtomicBool,
}

#[async_trait]
impl PeerLink for CountingLink {
    fn local_peer_id(&self) -> PeerId {
        PeerId::random()
    }

    async fn open_stream(&self, _: StreamProtocol) -> Result<BoxedStream, FuzzError> {
        tokio::time::sleep(self.open_delay).await;
        Ok(Box::new(Cursor::new(Vec::new())))
    }

    async fn disconnect(&self) -> Result<(), FuzzError> {
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), FuzzError> {
        Ok(())
    }

    async fn teardown(&self) {
        if !self.torn_down.swap(true, Ordering::SeqCst) {
            self.gauge.live.fetch_sub(1, Ordering::SeqCst);
            self.gauge.teardowns.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Connector for CountingConnector {
    type Link = CountingLink;

    async fn connect(&self, _: &TargetPeer, _: &ChaosConfig, _: &CancellationToken) -> Result<CountingLink, FuzzError> {
        let now = self.gauge.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.gauge.peak.fetch_max(now, Ordering::SeqCst);
        self.gauge.connects.fetch_add(1, Ordering::SeqCst);
        Ok(CountingLink {
            gauge: Arc::clone(&self.gauge),
            open_delay: self.open_delay,
            torn_down: AtomicBool::new(false),
        })
    }
}

// ---------------------------------------------------------------------------
// Recording sink
// ---------------------------------------------------------------------------

/// One call made on a [`RecordingSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct Assertion {
    pub kind: &'static str,
    pub name: String,
    pub condition: bool,
    pub details: Value,
}

/// Keeps every assertion it is handed.
#[derive(Debug, Default)]
pub struct RecordingSink {
    seen: Mutex<Vec<Assertion>>,
}

impl RecordingSink {
    pub fn all(&self) -> Vec<Assertion> {
        self.seen.lock().clone()
    }

    pub fn of_kind(&self, kind: &str) -> Vec<Assertion> {
        self.all().into_iter().filter(|a| a.kind == kind).collect()
    }

    fn push(&self, kind: &'static str, condition: bool, name: &str, details: &Value) {
        self.seen.lock().push(Assertion {
            kind,
            name: name.to_string(),
            condition,
            details: details.clone(),
        });
    }
}

impl AssertionSink for RecordingSink {
    fn always(&self, condition: bool, name: &str, details: &Value) {
        self.push("always", condition, name, details);
    }

    fn sometimes(&self, condition: bool, name: &str, details: &Value) {
        self.push("sometimes", condition, name, details);
    }

    fn reachable(&self, name: &str, details: &Value) {
        self.push("reachable", true, name, details);
    }

    fn unreachable(&self, name: &str, details: &Value) {
        self.push("unreachable", false, name, details);
    }
}
