use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::{PrinterError, Result};

/// Byte transport to one printer.
///
/// Implementations connect lazily: `write` and `read` establish the link when
/// it is not up yet, so callers never track connection state. `connect` and
/// `disconnect` are idempotent.
#[async_trait]
pub trait Transport: Send {
    async fn connect(&mut self) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;

    /// Send `data`, split into as many link-level writes as needed.
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Whatever bytes the link has available right now. May be empty or hold
    /// only part of a frame.
    async fn read(&mut self) -> Result<Vec<u8>>;

    /// Link warm-up some printer variants expect before the first command.
    async fn handshake(&mut self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn connect(&mut self) -> Result<()> {
        (**self).connect().await
    }

    async fn disconnect(&mut self) -> Result<()> {
        (**self).disconnect().await
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        (**self).write(data).await
    }

    async fn read(&mut self) -> Result<Vec<u8>> {
        (**self).read().await
    }

    async fn handshake(&mut self) -> Result<()> {
        (**self).handshake().await
    }
}

/// Default number of bytes requested per stream read.
pub const DEFAULT_READ_LEN: usize = 1024;
/// Default time a stream read waits for data before reporting nothing.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

type Opener<S> = Box<dyn FnMut() -> BoxFuture<'static, io::Result<S>> + Send>;

/// Transport over a byte stream such as an RFCOMM tty or a socket.
///
/// Streams have no per-write ceiling, so writes go out whole.
pub struct StreamTransport<S> {
    stream: Option<S>,
    opener: Option<Opener<S>>,
    read_len: usize,
    read_timeout: Option<Duration>,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap an already connected stream. Once it is closed it cannot be
    /// reopened.
    pub fn from_stream(stream: S) -> Self {
        Self {
            stream: Some(stream),
            opener: None,
            read_len: DEFAULT_READ_LEN,
            read_timeout: Some(DEFAULT_READ_TIMEOUT),
        }
    }

    /// Open the stream on first use (and again after a disconnect) with
    /// `opener`.
    pub fn with_opener<F, Fut>(mut opener: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = io::Result<S>> + Send + 'static,
    {
        Self {
            stream: None,
            opener: Some(Box::new(move || Box::pin(opener()))),
            read_len: DEFAULT_READ_LEN,
            read_timeout: Some(DEFAULT_READ_TIMEOUT),
        }
    }

    pub fn with_read_len(mut self, read_len: usize) -> Self {
        self.read_len = read_len.max(1);
        self
    }

    /// `None` makes reads wait until data arrives.
    pub fn with_read_timeout(mut self, read_timeout: Option<Duration>) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn stream_mut(&mut self) -> Result<&mut S> {
        self.stream
            .as_mut()
            .ok_or_else(|| PrinterError::Connection("stream is not connected".into()))
    }
}

impl StreamTransport<tokio::fs::File> {
    /// Talk to a printer through a bound RFCOMM device such as `/dev/rfcomm0`.
    pub fn rfcomm(device: impl Into<PathBuf>) -> Self {
        let device = device.into();
        Self::with_opener(move || {
            let device = device.clone();
            async move {
                tokio::fs::OpenOptions::new()
                    .read(true)
                    .write(true)
                    .open(&device)
                    .await
            }
        })
    }
}

#[async_trait]
impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let opener = self.opener.as_mut().ok_or_else(|| {
            PrinterError::Connection("stream was closed and cannot be reopened".into())
        })?;
        let stream = opener()
            .await
            .map_err(|e| PrinterError::Connection(format!("failed to open stream: {e}")))?;
        self.stream = Some(stream);
        debug!("stream transport connected");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            // The peer may already be gone; the stream is dropped either way.
            let _ = stream.shutdown().await;
            debug!("stream transport disconnected");
        }
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.connect().await?;
        let stream = self.stream_mut()?;
        let written = match stream.write_all(data).await {
            Ok(()) => stream.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            self.stream = None;
            return Err(PrinterError::Connection(format!("write failed: {e}")));
        }
        Ok(())
    }

    async fn read(&mut self) -> Result<Vec<u8>> {
        self.connect().await?;
        let mut buf = vec![0u8; self.read_len];
        let timeout = self.read_timeout;
        let stream = self.stream_mut()?;
        let read = match timeout {
            Some(limit) => match tokio::time::timeout(limit, stream.read(&mut buf)).await {
                Ok(read) => read,
                Err(_) => return Ok(Vec::new()),
            },
            None => stream.read(&mut buf).await,
        };
        match read {
            Ok(0) => {
                self.stream = None;
                Err(PrinterError::Connection("stream closed by peer".into()))
            }
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) => {
                self.stream = None;
                Err(PrinterError::Connection(format!("read failed: {e}")))
            }
        }
    }
}
