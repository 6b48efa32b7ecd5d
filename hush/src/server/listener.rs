use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite};

/// 可被 HTTP 连接驱动的双向字节流
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Connection for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

pub type BoxedConnection = Box<dyn Connection>;

/// 接受连接的 Future。
///
/// 约定：
/// - `Ok((conn, peer))` 表示成功接受到一个连接；
/// - `Err(e)` 表示监听器已无法继续工作，服务器将进入关停流程。
pub type AcceptFuture<'a> =
    Pin<Box<dyn Future<Output = io::Result<(BoxedConnection, SocketAddr)>> + Send + 'a>>;

/// 原始监听器
pub trait Listen: Send + Sync {
    fn accept(&self) -> AcceptFuture<'_>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
    /// 停止接受新连接，已建立的连接不受影响
    fn close(&mut self) -> io::Result<()>;
}

/// TCP 监听器
pub struct Listener {
    inner: Option<tokio::net::TcpListener>,
}

impl Listener {
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        Ok(Self::from(listener))
    }
}

impl TryFrom<std::net::TcpListener> for Listener {
    type Error = io::Error;

    fn try_from(listener: std::net::TcpListener) -> Result<Self, Self::Error> {
        // 设置为非阻塞模式
        listener.set_nonblocking(true)?;
        let tokio_listener = tokio::net::TcpListener::from_std(listener)?;
        Ok(Self::from(tokio_listener))
    }
}

impl From<tokio::net::TcpListener> for Listener {
    fn from(listener: tokio::net::TcpListener) -> Self {
        Self {
            inner: Some(listener),
        }
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "listener closed")
}

impl Listen for Listener {
    fn accept(&self) -> AcceptFuture<'_> {
        Box::pin(async move {
            let listener = self.inner.as_ref().ok_or_else(closed)?;
            let (stream, addr) = listener.accept().await?;
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!(error = ?e, "failed to set TCP_NODELAY");
            }
            Ok((Box::new(stream) as BoxedConnection, addr))
        })
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.as_ref().ok_or_else(closed)?.local_addr()
    }

    fn close(&mut self) -> io::Result<()> {
        // drop 即关闭监听 socket
        self.inner.take();
        Ok(())
    }
}
