//! Producer peer: generates framed records into a pipe at a paced
//! interval.
//!
//! The peer runs as a spawned loop driven by a command channel, so a
//! `produce` call returns as soon as the command is queued. Writing
//! happens inside the peer and is subject to pipe backpressure there,
//! never on the caller.

use std::time::Duration;
use tokio::io::DuplexStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::TransferError;
use crate::protocol::{write_end_of_stream, write_record};

#[derive(Debug)]
pub enum ProducerRequest {
    Configure {
        data_size: u32,
        chunk_size: u32,
        interval: Duration,
        reply: oneshot::Sender<()>,
    },
    Produce {
        code: i32,
        output: DuplexStream,
    },
}

/// Client half of a producer peer.
#[derive(Debug, Clone)]
pub struct ProducerHandle {
    tx: mpsc::Sender<ProducerRequest>,
}

impl ProducerHandle {
    pub fn new(tx: mpsc::Sender<ProducerRequest>) -> Self {
        Self { tx }
    }

    /// Sets the generation parameters for subsequent `produce` calls.
    pub async fn configure(
        &self,
        data_size: u32,
        chunk_size: u32,
        interval: Duration,
    ) -> Result<(), TransferError> {
        let (reply, ack) = oneshot::channel();
        self.send(ProducerRequest::Configure {
            data_size,
            chunk_size,
            interval,
            reply,
        })
        .await?;
        ack.await
            .map_err(|_| TransferError::Disconnected("producer dropped configure".into()))
    }

    /// Asks the peer to stream its configured payload into `output`.
    ///
    /// Returns once the command is accepted; generation proceeds in the
    /// peer concurrently with the caller draining the pipe.
    pub async fn produce(&self, code: i32, output: DuplexStream) -> Result<(), TransferError> {
        self.send(ProducerRequest::Produce { code, output }).await
    }

    async fn send(&self, request: ProducerRequest) -> Result<(), TransferError> {
        self.tx
            .send(request)
            .await
            .map_err(|_| TransferError::Disconnected("producer peer gone".into()))
    }
}

/// Spawns a producer peer loop and returns its handle.
pub fn spawn_producer() -> ProducerHandle {
    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(run_producer(rx));
    ProducerHandle::new(tx)
}

async fn run_producer(mut rx: mpsc::Receiver<ProducerRequest>) {
    let mut data_size: u32 = 0;
    let mut chunk_size: u32 = 0;
    let mut interval = Duration::ZERO;

    while let Some(request) = rx.recv().await {
        match request {
            ProducerRequest::Configure {
                data_size: data,
                chunk_size: chunk,
                interval: pause,
                reply,
            } => {
                data_size = data;
                chunk_size = chunk;
                interval = pause;
                let _ = reply.send(());
            }
            ProducerRequest::Produce { code, mut output } => {
                debug!(code, data_size, chunk_size, "producing records");
                if data_size > 0 && chunk_size == 0 {
                    warn!("producer not configured, closing output");
                    continue;
                }
                if let Err(err) = generate(&mut output, data_size, chunk_size, interval).await {
                    warn!(error = %err, "producer write failed");
                }
            }
        }
    }
}

/// Writes `data_size` bytes as records of at most `chunk_size` bytes,
/// pausing `interval` before each record, then the terminator. The
/// last record carries the remainder, so exactly `data_size` payload
/// bytes cross the pipe.
async fn generate(
    output: &mut DuplexStream,
    data_size: u32,
    chunk_size: u32,
    interval: Duration,
) -> Result<(), TransferError> {
    let buffer = vec![0u8; chunk_size as usize];
    let mut remaining = data_size as usize;
    while remaining > 0 {
        sleep(interval).await;
        let n = remaining.min(buffer.len());
        write_record(output, &buffer[..n]).await?;
        remaining -= n;
    }
    write_end_of_stream(output).await
}
