//! Deadline-guarded stream I/O.
//!
//! Every helper here races the operation against both a timeout and the
//! session cancellation token, so no call can outlive either.

use filchaos_core::FuzzError;
use libp2p::futures::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A byte stream an attack can write to. Implemented by `libp2p::Stream`
/// and by in-process test doubles.
pub trait AttackStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AttackStream for T {}

pub type BoxedStream = Box<dyn AttackStream>;

/// Run `fut` until it finishes, `after` elapses, or `cancel` fires.
pub async fn guarded<T, F>(
    op: &'static str,
    after: Duration,
    cancel: &CancellationToken,
    fut: F,
) -> Result<T, FuzzError>
where
    F: Future<Output = Result<T, FuzzError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FuzzError::Cancelled),
        res = tokio::time::timeout(after, fut) => match res {
            Ok(inner) => inner,
            Err(_) => Err(FuzzError::Timeout { op, after }),
        },
    }
}

/// Write all of `data` and flush.
pub async fn write_all<S>(
    stream: &mut S,
    data: &[u8],
    after: Duration,
    cancel: &CancellationToken,
) -> Result<(), FuzzError>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    guarded("write", after, cancel, async {
        stream
            .write_all(data)
            .await
            .map_err(|e| FuzzError::Write(e.to_string()))?;
        stream.flush().await.map_err(|e| FuzzError::Write(e.to_string()))
    })
    .await
}

/// One read into `buf`. `Ok(0)` means the remote closed its side.
pub async fn read_some<S>(
    stream: &mut S,
    buf: &mut [u8],
    after: Duration,
    cancel: &CancellationToken,
) -> Result<usize, FuzzError>
where
    S: AsyncRead + Unpin + ?Sized,
{
    guarded("read", after, cancel, async {
        stream.read(buf).await.map_err(|e| FuzzError::Read(e.to_string()))
    })
    .await
}

/// Half-close the write side.
pub async fn close<S>(stream: &mut S, after: Duration, cancel: &CancellationToken) -> Result<(), FuzzError>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    guarded("close", after, cancel, async {
        stream.close().await.map_err(|e| FuzzError::Write(e.to_string()))
    })
    .await
}

/// Sleep for `dur`, returning early with `Cancelled` if the session stops.
pub async fn pause(cancel: &CancellationToken, dur: Duration) -> Result<(), FuzzError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FuzzError::Cancelled),
        _ = tokio::time::sleep(dur) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libp2p::futures::io::Cursor;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// A stream that never makes progress in either direction.
    struct Stalled;

    impl AsyncRead for Stalled {
        fn poll_read(self: Pin<&mut Self>, _: &mut Context<'_>, _: &mut [u8]) -> Poll<std::io::Result<usize>> {
            Poll::Pending
        }
    }

    impl AsyncWrite for Stalled {
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

    #[tokio::test]
    async fn stalled_write_times_out() {
        let cancel = CancellationToken::new();
        let mut s: BoxedStream = Box::new(Stalled);
        let after = Duration::from_millis(20);
        let err = write_all(&mut s, b"x", after, &cancel).await.unwrap_err();
        assert_eq!(err, FuzzError::Timeout { op: "write", after });
    }

    #[tokio::test]
    async fn stalled_read_times_out() {
        let cancel = CancellationToken::new();
        let mut s = Stalled;
        let mut buf = [0u8; 8];
        let err = read_some(&mut s, &mut buf, Duration::from_millis(20), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "timeout");
    }

    #[tokio::test]
    async fn cancellation_wins_over_timeout() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut s = Stalled;
        let err = close(&mut s, Duration::from_secs(60), &cancel).await.unwrap_err();
        assert_eq!(err, FuzzError::Cancelled);
        assert_eq!(pause(&cancel, Duration::from_secs(60)).await, Err(FuzzError::Cancelled));
    }

    #[tokio::test]
    async fn writes_reach_the_stream() {
        let cancel = CancellationToken::new();
        let mut s = Cursor::new(Vec::new());
        write_all(&mut s, b"abc", Duration::from_secs(1), &cancel).await.unwrap();
        assert_eq!(s.into_inner(), b"abc");
    }

    #[tokio::test]
    async fn pause_completes() {
        let cancel = CancellationToken::new();
        assert!(pause(&cancel, Duration::from_millis(1)).await.is_ok());
    }
}
