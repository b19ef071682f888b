//! Measured pipe operations shared by the transfer variants. Each
//! helper wraps one pipe operation in a stopwatch and pushes the byte
//! count into the task's progress snapshot.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TransferError;
use crate::protocol::{ConsumerHandle, PIPE_CAPACITY};
use crate::task::core::TaskController;
use crate::task::measurement::{LABEL_NOTIFY, LABEL_READ, LABEL_WRITE};

/// Reads up to `buf.len()` bytes from the producer pipe. A closed pipe
/// mid-record is a protocol violation, surfaced as `UnexpectedEof`.
pub async fn read_from_producer<R>(
    ctl: &TaskController,
    input: &mut R,
    buf: &mut [u8],
) -> Result<usize, TransferError>
where
    R: AsyncRead + Unpin,
{
    let stopwatch = ctl.stopwatch(LABEL_READ);
    let n = input.read(buf).await?;
    stopwatch.stop();
    if n == 0 {
        return Err(TransferError::UnexpectedEof);
    }
    ctl.add_input_read(n as u64);
    Ok(n)
}

/// Writes `payload` to the consumer pipe. The payload must fit the
/// pipe whole, or a stalled consumer could deadlock the writer against
/// its own unread bytes.
pub async fn write_to_consumer<W>(
    ctl: &TaskController,
    output: &mut W,
    payload: &[u8],
) -> Result<(), TransferError>
where
    W: AsyncWrite + Unpin,
{
    debug_assert!(payload.len() <= PIPE_CAPACITY);
    let stopwatch = ctl.stopwatch(LABEL_WRITE);
    output.write_all(payload).await?;
    stopwatch.stop();
    ctl.add_output_written(payload.len() as u64);
    Ok(())
}

/// Notifies the consumer of `bytes` available and waits for the drain.
pub async fn notify_consumer(
    ctl: &TaskController,
    consumer: &ConsumerHandle,
    bytes: u32,
) -> Result<(), TransferError> {
    let stopwatch = ctl.stopwatch(LABEL_NOTIFY);
    consumer.on_data_received(bytes).await?;
    stopwatch.stop();
    Ok(())
}
