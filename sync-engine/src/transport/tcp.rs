//! TCP transport: one connection per frame.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use sync_core::RestartPolicy;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;

use super::{read_frame, write_frame, Transport, TransportError, ACK, MAX_FRAME_SIZE};

/// Default wait for the receiver's acknowledgement.
///
/// Covers the receiver's decrypt, apply and fsync, not just the network.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(30);

/// Outbound TCP transport.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    connect_timeout: Duration,
    ack_timeout: Duration,
}

impl TcpTransport {
    /// Create a transport whose connection attempts are bounded by
    /// `connect_timeout`. Acknowledgements get [`DEFAULT_ACK_TIMEOUT`].
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        }
    }

    /// Set how long to wait for the acknowledgement after a frame is written.
    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }

    async fn exchange(&self, mut stream: TcpStream, frame: &[u8]) -> Result<(), TransportError> {
        write_frame(&mut stream, frame)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;

        let ack = timeout(self.ack_timeout, read_frame(&mut stream, ACK.len()))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::Send(format!("no acknowledgement: {e}")))?;
        if ack != ACK {
            return Err(TransportError::Send("unexpected acknowledgement".into()));
        }

        if let Err(e) = stream.shutdown().await {
            tracing::debug!(error = %e, "shutdown after acknowledgement failed");
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(
        &self,
        peer: &str,
        addresses: &[SocketAddr],
        frame: &[u8],
    ) -> Result<(), TransportError> {
        for addr in addresses {
            match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    tracing::debug!(peer, %addr, len = frame.len(), "connected");
                    return self.exchange(stream, frame).await;
                }
                Ok(Err(e)) => {
                    tracing::debug!(peer, %addr, error = %e, "connect failed, trying next address");
                }
                Err(_) => {
                    tracing::debug!(peer, %addr, "connect timed out, trying next address");
                }
            }
        }
        Err(TransportError::Connect {
            peer: peer.to_string(),
            attempts: addresses.len(),
        })
    }
}

/// Receives inbound frames.
///
/// Called once per connection with the raw (still sealed) frame. The
/// connection is acknowledged after this returns.
#[async_trait]
pub trait FrameHandler: Send + Sync + 'static {
    /// Process one inbound frame.
    async fn handle_frame(&self, frame: Vec<u8>, remote: SocketAddr);
}

/// Listener for inbound frames.
#[derive(Debug)]
pub struct InboundServer {
    listener: TcpListener,
    read_timeout: Duration,
}

impl InboundServer {
    /// Bind the listener, restarting per `policy` if binding fails.
    pub async fn bind(
        addr: SocketAddr,
        read_timeout: Duration,
        policy: RestartPolicy,
    ) -> Result<Self, TransportError> {
        let mut attempt = 0;
        loop {
            match TcpListener::bind(addr).await {
                Ok(listener) => {
                    let local = listener.local_addr()?;
                    tracing::info!(addr = %local, "listening for peers");
                    return Ok(Self {
                        listener,
                        read_timeout,
                    });
                }
                Err(e) => {
                    attempt += 1;
                    match policy.delay_for(attempt) {
                        Some(delay) => {
                            tracing::warn!(%addr, error = %e, ?delay, "bind failed, restarting");
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            tracing::error!(%addr, error = %e, "bind failed, giving up");
                            return Err(TransportError::Io(e));
                        }
                    }
                }
            }
        }
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` flips to `true`.
    ///
    /// Each connection is served on its own task.
    pub async fn run<H: FrameHandler>(self, handler: Arc<H>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("listener stopped");
                        return;
                    }
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        let handler = Arc::clone(&handler);
                        let read_timeout = self.read_timeout;
                        tokio::spawn(async move {
                            if let Err(e) = serve(stream, remote, handler, read_timeout).await {
                                tracing::debug!(%remote, error = %e, "inbound connection failed");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }
    }
}

async fn serve<H: FrameHandler>(
    mut stream: TcpStream,
    remote: SocketAddr,
    handler: Arc<H>,
    read_timeout: Duration,
) -> Result<(), TransportError> {
    let frame = timeout(read_timeout, read_frame(&mut stream, MAX_FRAME_SIZE))
        .await
        .map_err(|_| TransportError::Timeout)??;

    handler.handle_frame(frame, remote).await;

    write_frame(&mut stream, ACK).await?;
    if let Err(e) = stream.shutdown().await {
        tracing::debug!(%remote, error = %e, "shutdown after acknowledging failed");
    }
    Ok(())
}
