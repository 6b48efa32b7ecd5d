use super::listener::{BoxedConnection, Listen};
use crate::{HushError, Result};
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct ConnTracker {
    active: AtomicUsize,
    shutdown: AtomicBool,
    drained: Notify,
}

/// 统计活动连接并在关停时等待其全部关闭的监听器。
///
/// 连接不持有监听器本身，只共享一个计数器；连接 drop 时计数减一，
/// 关停过程中计数归零即唤醒等待方。
pub struct GracefulListener<L> {
    inner: L,
    tracker: Arc<ConnTracker>,
    max_shutdown_time: Duration,
}

impl<L: Listen> GracefulListener<L> {
    pub fn new(inner: L, max_shutdown_time: Duration) -> Self {
        Self {
            inner,
            tracker: Arc::new(ConnTracker::default()),
            max_shutdown_time,
        }
    }

    /// 接受一个连接，底层错误原样返回
    pub async fn accept(&self) -> io::Result<(GracefulConnection<BoxedConnection>, SocketAddr)> {
        let (conn, addr) = self.inner.accept().await?;
        self.tracker.active.fetch_add(1, Ordering::SeqCst);
        Ok((
            GracefulConnection {
                inner: conn,
                tracker: self.tracker.clone(),
            },
            addr,
        ))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub fn active_connections(&self) -> usize {
        self.tracker.active.load(Ordering::SeqCst)
    }

    /// 关闭监听器并等待所有连接关闭。
    ///
    /// 底层监听器关闭失败时立即返回该错误；超过 `max_shutdown_time`
    /// 仍有连接未关闭时返回 [`HushError::ShutdownTimeout`]。
    pub async fn close(&mut self) -> Result<()> {
        self.inner.close()?;
        self.tracker.shutdown.store(true, Ordering::SeqCst);
        self.wait_drained().await
    }

    async fn wait_drained(&self) -> Result<()> {
        let deadline = Instant::now() + self.max_shutdown_time;
        loop {
            let notified = self.tracker.drained.notified();
            tokio::pin!(notified);
            // 先登记再检查计数，避免错过计数归零时的唤醒
            notified.as_mut().enable();
            if self.tracker.active.load(Ordering::SeqCst) == 0 {
                return Ok(());
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(HushError::ShutdownTimeout(self.max_shutdown_time));
            }
        }
    }
}

/// 被监听器跟踪的连接，drop 即关闭
pub struct GracefulConnection<C> {
    inner: C,
    tracker: Arc<ConnTracker>,
}

impl<C> Drop for GracefulConnection<C> {
    fn drop(&mut self) {
        let previous = self.tracker.active.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 && self.tracker.shutdown.load(Ordering::SeqCst) {
            self.tracker.drained.notify_waiters();
        }
    }
}

impl<C: AsyncRead + Unpin> AsyncRead for GracefulConnection<C> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<C: AsyncWrite + Unpin> AsyncWrite for GracefulConnection<C> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::listener::AcceptFuture;
    use std::sync::atomic::AtomicUsize;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::sync::{Mutex, mpsc};

    /// 从通道中取出预先准备好的内存连接
    struct ChannelListener {
        rx: Mutex<mpsc::UnboundedReceiver<DuplexStream>>,
        closes: Arc<AtomicUsize>,
        fail_close: bool,
    }

    impl ChannelListener {
        fn new() -> (Self, mpsc::UnboundedSender<DuplexStream>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                Self {
                    rx: Mutex::new(rx),
                    closes: Arc::new(AtomicUsize::new(0)),
                    fail_close: false,
                },
                tx,
            )
        }
    }

    impl Listen for ChannelListener {
        fn accept(&self) -> AcceptFuture<'_> {
            Box::pin(async move {
                let conn = self.rx.lock().await.recv().await.ok_or_else(|| {
                    io::Error::new(io::ErrorKind::ConnectionAborted, "channel closed")
                })?;
                Ok((
                    Box::new(conn) as BoxedConnection,
                    "127.0.0.1:7000".parse().unwrap(),
                ))
            })
        }

        fn local_addr(&self) -> io::Result<SocketAddr> {
            Ok("127.0.0.1:7000".parse().unwrap())
        }

        fn close(&mut self) -> io::Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                return Err(io::Error::other("close failed"));
            }
            Ok(())
        }
    }

    async fn open(
        listener: &GracefulListener<ChannelListener>,
        tx: &mpsc::UnboundedSender<DuplexStream>,
        count: usize,
    ) -> (Vec<GracefulConnection<BoxedConnection>>, Vec<DuplexStream>) {
        let mut conns = Vec::new();
        let mut peers = Vec::new();
        for _ in 0..count {
            let (a, b) = tokio::io::duplex(64);
            tx.send(a).unwrap();
            conns.push(listener.accept().await.unwrap().0);
            peers.push(b);
        }
        (conns, peers)
    }

    // ==================== 计数测试 ====================

    #[tokio::test]
    async fn test_counts_connections() {
        let (inner, tx) = ChannelListener::new();
        let listener = GracefulListener::new(inner, Duration::from_secs(1));
        let (mut conns, _peers) = open(&listener, &tx, 3).await;
        assert_eq!(listener.active_connections(), 3);
        conns.pop();
        assert_eq!(listener.active_connections(), 2);
        drop(conns);
        assert_eq!(listener.active_connections(), 0);
    }

    #[tokio::test]
    async fn test_connection_passes_io_through() {
        let (inner, tx) = ChannelListener::new();
        let listener = GracefulListener::new(inner, Duration::from_secs(1));
        let (mut conns, mut peers) = open(&listener, &tx, 1).await;
        conns[0].write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        peers[0].read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn test_accept_error_propagates() {
        let (inner, tx) = ChannelListener::new();
        drop(tx);
        let listener = GracefulListener::new(inner, Duration::from_secs(1));
        let err = listener.accept().await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
        assert_eq!(listener.active_connections(), 0);
    }

    // ==================== 关停测试 ====================

    #[tokio::test(start_paused = true)]
    async fn test_close_times_out_with_open_connection() {
        let (inner, tx) = ChannelListener::new();
        let closes = inner.closes.clone();
        let mut listener = GracefulListener::new(inner, Duration::from_millis(50));
        let (mut conns, _peers) = open(&listener, &tx, 3).await;
        conns.truncate(1);

        let start = Instant::now();
        let err = listener.close().await.unwrap_err();
        assert!(err.is_timeout());
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(listener.active_connections(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_returns_when_drained() {
        let (inner, tx) = ChannelListener::new();
        let mut listener = GracefulListener::new(inner, Duration::from_secs(1));
        let (conns, _peers) = open(&listener, &tx, 3).await;

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            drop(conns);
        });
        let start = Instant::now();
        listener.close().await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(listener.active_connections(), 0);
    }

    #[tokio::test]
    async fn test_close_without_connections_is_immediate() {
        let (inner, _tx) = ChannelListener::new();
        let mut listener = GracefulListener::new(inner, Duration::from_secs(30));
        listener.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_inner_close_error_is_fatal() {
        let (mut inner, tx) = ChannelListener::new();
        inner.fail_close = true;
        let mut listener = GracefulListener::new(inner, Duration::from_secs(30));
        let (_conns, _peers) = open(&listener, &tx, 1).await;
        let err = listener.close().await.unwrap_err();
        assert!(matches!(err, HushError::IOError(_)));
    }
}
