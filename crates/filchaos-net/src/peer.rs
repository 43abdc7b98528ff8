//! Ephemeral peers: one throwaway identity and swarm per attack execution.
//!
//! Each [`EphemeralPeer`] owns a background tokio task running a libp2p
//! swarm (TCP + Noise + Yamux, DNS resolution) whose only behaviour is
//! `libp2p_stream`, so streams can be opened on any protocol name without a
//! protocol implementation behind it. The handle talks to the task over an
//! mpsc command channel, the same way a long-lived network node would, but
//! the task lives only as long as one execution.
//!
//! No connection limits or resource-manager behaviour is installed: the
//! point is to exercise the remote peer's limits, not our own.

use crate::io::{self, BoxedStream};
use crate::target::TargetPeer;
use async_trait::async_trait;
use filchaos_core::{ChaosConfig, FuzzError};
use libp2p::futures::StreamExt;
use libp2p::swarm::dial_opts::{DialOpts, PeerCondition};
use libp2p::swarm::{ConnectionId, SwarmEvent};
use libp2p::{identity, noise, tcp, yamux, Multiaddr, PeerId, StreamProtocol, Swarm, SwarmBuilder};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A live connection to the target that attacks drive.
///
/// Implementations need not bound their own operations; strategies wrap
/// every call in a deadline.
#[async_trait]
pub trait PeerLink: Send + Sync {
    fn local_peer_id(&self) -> PeerId;

    /// Open a new stream negotiated for `protocol`.
    async fn open_stream(&self, protocol: StreamProtocol) -> Result<BoxedStream, FuzzError>;

    /// Close every connection to the target.
    async fn disconnect(&self) -> Result<(), FuzzError>;

    /// Dial the target again and wait for the connection.
    async fn reconnect(&self) -> Result<(), FuzzError>;

    /// Release everything the link owns. Calling it again is a no-op.
    async fn teardown(&self);
}

/// Produces a connected [`PeerLink`] per execution.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Link: PeerLink + 'static;

    async fn connect(
        &self,
        target: &TargetPeer,
        config: &ChaosConfig,
        cancel: &CancellationToken,
    ) -> Result<Self::Link, FuzzError>;
}

/// Builds a fresh [`EphemeralPeer`] for every connect.
#[derive(Debug, Default, Clone, Copy)]
pub struct EphemeralPeerFactory;

#[async_trait]
impl Connector for EphemeralPeerFactory {
    type Link = EphemeralPeer;

    async fn connect(
        &self,
        target: &TargetPeer,
        config: &ChaosConfig,
        cancel: &CancellationToken,
    ) -> Result<EphemeralPeer, FuzzError> {
        let peer = EphemeralPeer::spawn(target, config)?;
        match io::guarded("dial", config.dial_timeout, cancel, peer.reconnect()).await {
            Ok(()) => {
                debug!(local = %peer.local_peer_id, peer = %target.peer_id(), "ephemeral peer connected");
                Ok(peer)
            }
            Err(e) => {
                peer.teardown().await;
                Err(e)
            }
        }
    }
}

/// Commands sent from [`EphemeralPeer`] to its swarm task.
#[derive(Debug)]
enum Command {
    /// Dial the target; the reply fires once the connection is up or failed.
    Dial {
        reply: oneshot::Sender<Result<(), FuzzError>>,
    },
    /// Close all connections to the target.
    Disconnect { reply: oneshot::Sender<()> },
    /// Stop the event loop and drop the swarm.
    Shutdown,
}

/// A throwaway libp2p identity connected to one target.
pub struct EphemeralPeer {
    local_peer_id: PeerId,
    target: PeerId,
    control: Mutex<libp2p_stream::Control>,
    command_tx: mpsc::UnboundedSender<Command>,
    task: Mutex<Option<JoinHandle<()>>>,
    teardown_timeout: Duration,
}

impl std::fmt::Debug for EphemeralPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralPeer")
            .field("local_peer_id", &self.local_peer_id)
            .field("target", &self.target)
            .field("running", &self.task.lock().is_some())
            .finish()
    }
}

impl EphemeralPeer {
    /// Generate an identity, build and start the swarm, and listen on
    /// `config.listen_addr`. Does not dial.
    pub fn spawn(target: &TargetPeer, config: &ChaosConfig) -> Result<Self, FuzzError> {
        let keypair = identity::Keypair::generate_ed25519();
        let local_peer_id = PeerId::from(keypair.public());

        let behaviour = libp2p_stream::Behaviour::new();
        let control = behaviour.new_control();

        let idle = config.idle_connection_timeout;
        let mut swarm = SwarmBuilder::with_existing_identity(keypair)
            .with_tokio()
            .with_tcp(
                tcp::Config::default().nodelay(true),
                noise::Config::new,
                yamux::Config::default,
            )
            .map_err(|e| FuzzError::Host(format!("tcp transport: {e}")))?
            .with_dns()
            .map_err(|e| FuzzError::Host(format!("dns: {e}")))?
            .with_behaviour(|_| Ok(behaviour))
            .map_err(|e| FuzzError::Host(format!("behaviour: {e}")))?
            .with_swarm_config(|c| c.with_idle_connection_timeout(idle))
            .build();

        let listen_addr: Multiaddr = config
            .listen_addr
            .parse()
            .map_err(|e| FuzzError::Host(format!("invalid listen addr {}: {e}", config.listen_addr)))?;
        swarm
            .listen_on(listen_addr)
            .map_err(|e| FuzzError::Host(format!("listen: {e}")))?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(swarm_event_loop(swarm, command_rx, target.clone()));

        Ok(Self {
            local_peer_id,
            target: target.peer_id(),
            control: Mutex::new(control),
            command_tx,
            task: Mutex::new(Some(task)),
            teardown_timeout: config.teardown_timeout,
        })
    }

    fn send(&self, cmd: Command) -> Result<(), FuzzError> {
        self.command_tx
            .send(cmd)
            .map_err(|_| FuzzError::Host("swarm task stopped".into()))
    }
}

#[async_trait]
impl PeerLink for EphemeralPeer {
    fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    async fn open_stream(&self, protocol: StreamProtocol) -> Result<BoxedStream, FuzzError> {
        let mut control = self.control.lock().clone();
        let stream = control
            .open_stream(self.target, protocol.clone())
            .await
            .map_err(|e| FuzzError::StreamOpen {
                protocol: protocol.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Box::new(stream))
    }

    async fn disconnect(&self) -> Result<(), FuzzError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Disconnect { reply })?;
        rx.await
            .map_err(|_| FuzzError::Host("swarm task stopped".into()))
    }

    async fn reconnect(&self) -> Result<(), FuzzError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Dial { reply })?;
        rx.await
            .map_err(|_| FuzzError::Connect("swarm task stopped before dial completed".into()))?
    }

    async fn teardown(&self) {
        let task = self.task.lock().take();
        let Some(mut task) = task else {
            return;
        };
        let _ = self.command_tx.send(Command::Shutdown);
        if tokio::time::timeout(self.teardown_timeout, &mut task).await.is_err() {
            warn!(local = %self.local_peer_id, "swarm task ignored shutdown, aborting");
            task.abort();
        }
    }
}

impl Drop for EphemeralPeer {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

/// Background task running one ephemeral swarm.
async fn swarm_event_loop(
    mut swarm: Swarm<libp2p_stream::Behaviour>,
    mut command_rx: mpsc::UnboundedReceiver<Command>,
    target: TargetPeer,
) {
    let mut pending: HashMap<ConnectionId, oneshot::Sender<Result<(), FuzzError>>> = HashMap::new();

    loop {
        tokio::select! {
            cmd = command_rx.recv() => {
                match cmd {
                    Some(Command::Dial { reply }) => {
                        let opts = DialOpts::peer_id(target.peer_id())
                            .condition(PeerCondition::Always)
                            .addresses(target.addrs().to_vec())
                            .build();
                        let connection_id = opts.connection_id();
                        match swarm.dial(opts) {
                            Ok(()) => {
                                pending.insert(connection_id, reply);
                            }
                            Err(e) => {
                                let _ = reply.send(Err(FuzzError::Connect(e.to_string())));
                            }
                        }
                    }
                    Some(Command::Disconnect { reply }) => {
                        let _ = swarm.disconnect_peer_id(target.peer_id());
                        let _ = reply.send(());
                    }
                    Some(Command::Shutdown) | None => break,
                }
            }
            event = swarm.next() => {
                let Some(event) = event else { break };

                match event {
                    SwarmEvent::ConnectionEstablished { peer_id, connection_id, .. } => {
                        debug!(%peer_id, ?connection_id, "connection established");
                        if let Some(reply) = pending.remove(&connection_id) {
                            let _ = reply.send(Ok(()));
                        }
                    }
                    SwarmEvent::OutgoingConnectionError { connection_id, error, .. } => {
                        debug!(?connection_id, %error, "outgoing connection failed");
                        if let Some(reply) = pending.remove(&connection_id) {
                            let _ = reply.send(Err(FuzzError::Connect(error.to_string())));
                        }
                    }
                    SwarmEvent::ConnectionClosed { peer_id, cause, .. } => {
                        debug!(%peer_id, ?cause, "connection closed");
                    }
                    SwarmEvent::NewListenAddr { address, .. } => {
                        debug!(%address, "ephemeral peer listening");
                    }
                    _ => {}
                }
            }
        }
    }

    debug!(peer = %target.peer_id(), "ephemeral swarm stopped");
}
