//! An in-memory link that records every stream a strategy opens.

use crate::io::BoxedStream;
use crate::peer::PeerLink;
use crate::strategy::AttackContext;
use crate::target::TargetPeer;
use async_trait::async_trait;
use filchaos_core::{ChaosConfig, FuzzError};
use libp2p::futures::{AsyncRead, AsyncWrite};
use libp2p::{PeerId, StreamProtocol};
use parking_lot::Mutex;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_util::sync::CancellationToken;

/// What happened to one stream.
#[derive(Debug, Clone, Default)]
pub struct StreamRecord {
    pub protocol: String,
    pub bytes: Vec<u8>,
    /// The write side was closed cleanly.
    pub closed: bool,
    /// The handle was released.
    pub dropped: bool,
}

type Records = Arc<Mutex<Vec<StreamRecord>>>;

struct RecordingStream {
    index: usize,
    records: Records,
    fail_writes: bool,
}

impl AsyncRead for RecordingStream {
    fn poll_read(self: Pin<&mut Self>, _: &mut Context<'_>, _: &mut [u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(Ok(0))
    }
}

impl AsyncWrite for RecordingStream {
    fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        if self.fail_writes {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "stream reset by peer")));
        }
        self.records.lock()[self.index].bytes.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.records.lock()[self.index].closed = true;
        Poll::Ready(Ok(()))
    }
}

impl Drop for RecordingStream {
    fn drop(&mut self) {
        self.records.lock()[self.index].dropped = true;
    }
}

/// A link whose streams accept everything (or fail every write) and
/// remember how they ended.
pub struct RecordingLink {
    records: Records,
    fail_writes: bool,
    target: TargetPeer,
    config: ChaosConfig,
    cancel: CancellationToken,
}

impl Default for RecordingLink {
    fn default() -> Self {
        Self {
            records: Records::default(),
            fail_writes: false,
            target: TargetPeer::from_parts(PeerId::random(), "/ip4/127.0.0.1/tcp/1".parse().unwrap()),
            config: ChaosConfig::local(),
            cancel: CancellationToken::new(),
        }
    }
}

impl RecordingLink {
    pub fn failing_writes() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    pub fn cx(&self) -> AttackContext<'_> {
        AttackContext {
            link: self,
            target: &self.target,
            config: &self.config,
            cancel: &self.cancel,
        }
    }

    pub fn streams(&self) -> Vec<StreamRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl PeerLink for RecordingLink {
    fn local_peer_id(&self) -> PeerId {
        PeerId::random()
    }

    async fn open_stream(&self, protocol: StreamProtocol) -> Result<BoxedStream, FuzzError> {
        let mut records = self.records.lock();
        records.push(StreamRecord {
            protocol: protocol.as_ref().to_string(),
            ..StreamRecord::default()
        });
        Ok(Box::new(RecordingStream {
            index: records.len() - 1,
            records: Arc::clone(&self.records),
            fail_writes: self.fail_writes,
        }))
    }

    async fn disconnect(&self) -> Result<(), FuzzError> {
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), FuzzError> {
        Ok(())
    }

    async fn teardown(&self) {}
}
