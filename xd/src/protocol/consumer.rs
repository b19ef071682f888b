//! Consumer peer: drains raw bytes from a pipe, but only when told to.
//!
//! The consumer never reads on its own. Each `on_data_received`
//! notification hands it a byte count to drain, and the call resolves
//! only after the peer has pulled those bytes off the pipe. That makes
//! the notification a measurable round trip and lets a slow consumer
//! throttle the whole transfer.

use std::time::Duration;
use tokio::io::{AsyncReadExt, DuplexStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::TransferError;

#[derive(Debug)]
pub enum ConsumerRequest {
    Configure {
        buffer_size: u32,
        interval: Duration,
        reply: oneshot::Sender<()>,
    },
    Start {
        input: DuplexStream,
        reply: oneshot::Sender<()>,
    },
    DataReceived {
        bytes: u32,
        reply: oneshot::Sender<()>,
    },
    Finish {
        reply: oneshot::Sender<()>,
    },
}

/// Client half of a consumer peer.
#[derive(Debug, Clone)]
pub struct ConsumerHandle {
    tx: mpsc::Sender<ConsumerRequest>,
}

impl ConsumerHandle {
    pub fn new(tx: mpsc::Sender<ConsumerRequest>) -> Self {
        Self { tx }
    }

    pub async fn configure(
        &self,
        buffer_size: u32,
        interval: Duration,
    ) -> Result<(), TransferError> {
        self.call(|reply| ConsumerRequest::Configure {
            buffer_size,
            interval,
            reply,
        })
        .await
    }

    /// Hands the peer its input pipe for the coming transfer.
    pub async fn start(&self, input: DuplexStream) -> Result<(), TransferError> {
        self.call(|reply| ConsumerRequest::Start { input, reply }).await
    }

    /// Tells the peer `bytes` more are available and waits for it to
    /// drain them.
    pub async fn on_data_received(&self, bytes: u32) -> Result<(), TransferError> {
        self.call(|reply| ConsumerRequest::DataReceived { bytes, reply })
            .await
    }

    /// Signals end of transfer; the peer releases its input pipe.
    pub async fn finish(&self) -> Result<(), TransferError> {
        self.call(|reply| ConsumerRequest::Finish { reply }).await
    }

    async fn call(
        &self,
        build: impl FnOnce(oneshot::Sender<()>) -> ConsumerRequest,
    ) -> Result<(), TransferError> {
        let (reply, ack) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| TransferError::Disconnected("consumer peer gone".into()))?;
        ack.await
            .map_err(|_| TransferError::Disconnected("consumer dropped reply".into()))
    }
}

/// Spawns a consumer peer loop and returns its handle.
pub fn spawn_consumer() -> ConsumerHandle {
    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(run_consumer(rx));
    ConsumerHandle::new(tx)
}

async fn run_consumer(mut rx: mpsc::Receiver<ConsumerRequest>) {
    let mut buffer_size: u32 = 0;
    let mut interval = Duration::ZERO;
    let mut input: Option<DuplexStream> = None;
    let mut received: u64 = 0;

    while let Some(request) = rx.recv().await {
        match request {
            ConsumerRequest::Configure {
                buffer_size: size,
                interval: pause,
                reply,
            } => {
                buffer_size = size;
                interval = pause;
                let _ = reply.send(());
            }
            ConsumerRequest::Start { input: pipe, reply } => {
                input = Some(pipe);
                received = 0;
                let _ = reply.send(());
            }
            ConsumerRequest::DataReceived { bytes, reply } => {
                match input.as_mut() {
                    Some(pipe) => {
                        if let Err(err) = drain(pipe, bytes, buffer_size, interval).await {
                            warn!(error = %err, "consumer drain failed");
                        } else {
                            received += u64::from(bytes);
                        }
                    }
                    None => warn!(bytes, "data notification before start"),
                }
                let _ = reply.send(());
            }
            ConsumerRequest::Finish { reply } => {
                debug!(received, "consumer finished");
                input = None;
                let _ = reply.send(());
            }
        }
    }
}

/// Pulls `bytes` off the pipe in chunks of at most `buffer_size`,
/// pausing `interval` before each chunk.
async fn drain(
    pipe: &mut DuplexStream,
    bytes: u32,
    buffer_size: u32,
    interval: Duration,
) -> Result<(), TransferError> {
    let mut buffer = vec![0u8; (buffer_size.max(1)) as usize];
    let mut remaining = bytes as usize;
    while remaining > 0 {
        sleep(interval).await;
        let want = remaining.min(buffer.len());
        let n = pipe.read(&mut buffer[..want]).await?;
        if n == 0 {
            return Err(TransferError::UnexpectedEof);
        }
        remaining -= n;
    }
    Ok(())
}
