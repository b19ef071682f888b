//! Byte-stream wire protocol between producer, task, and consumer.
//!
//! A stream is a sequence of records, each prefixed by a big-endian
//! `i32` length, followed by a zero-length terminator. Payload bytes
//! are opaque. The length prefix is accounting metadata only; it never
//! counts toward transferred byte totals.

mod connector;
mod consumer;
mod producer;

pub use connector::{Connector, LocalConnector};
pub use consumer::{spawn_consumer, ConsumerHandle, ConsumerRequest};
pub use producer::{spawn_producer, ProducerHandle, ProducerRequest};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TransferError;

/// Capacity of every in-memory pipe, and the backpressure bound: a
/// writer stalls once it is this many bytes ahead of the reader.
pub const PIPE_CAPACITY: usize = 64 * 1024;

/// Length prefix marking the end of a record stream.
pub const END_OF_STREAM: i32 = 0;

/// Writes one framed record: length prefix, then the payload.
pub async fn write_record<W>(writer: &mut W, payload: &[u8]) -> Result<(), TransferError>
where
    W: AsyncWrite + Unpin,
{
    debug_assert!(payload.len() <= i32::MAX as usize);
    writer.write_i32(payload.len() as i32).await?;
    writer.write_all(payload).await?;
    Ok(())
}

/// Writes the zero-length terminator and flushes.
pub async fn write_end_of_stream<W>(writer: &mut W) -> Result<(), TransferError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_i32(END_OF_STREAM).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads the next record's length prefix.
///
/// Returns `None` at the terminator. A truncated prefix or a negative
/// length is a protocol violation.
pub async fn read_record_len<R>(reader: &mut R) -> Result<Option<usize>, TransferError>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_i32().await {
        Ok(len) => len,
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(TransferError::UnexpectedEof);
        }
        Err(err) => return Err(err.into()),
    };
    if len == END_OF_STREAM {
        return Ok(None);
    }
    if len < 0 {
        return Err(TransferError::Protocol(format!(
            "negative record length {len}"
        )));
    }
    Ok(Some(len as usize))
}
