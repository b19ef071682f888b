//! Multi variant: a reader and a writer run concurrently, decoupled by
//! a bounded relay pipe.
//!
//! The reader deframes producer records and forwards raw payload into
//! the relay. The writer drains the relay and feeds the consumer in
//! its own buffer-sized chunks, so a slow consumer stalls only the
//! writer while the reader keeps pulling until the relay fills. The
//! relay carries no framing; closing its write end is the end signal.

use std::sync::Arc;
use async_trait::async_trait;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tracing::debug;

use crate::error::TransferError;
use crate::protocol::{read_record_len, Connector, PIPE_CAPACITY};
use crate::task::core::{TaskBehavior, TaskController};
use crate::task::pump::{notify_consumer, read_from_producer, write_to_consumer};

pub struct MultiThreadTask {
    connector: Arc<dyn Connector>,
}

impl MultiThreadTask {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl TaskBehavior for MultiThreadTask {
    async fn run(&self, ctl: TaskController) -> Result<(), TransferError> {
        ctl.record_configuration(ctl.configuration());
        let (relay_write, relay_read) = duplex(PIPE_CAPACITY);
        // if one side fails, dropping its relay end unblocks the other:
        // the reader sees a closed pipe, the writer sees end of stream
        futures::try_join!(
            read_producer_into_relay(&ctl, self.connector.as_ref(), relay_write),
            write_relay_to_consumer(&ctl, self.connector.as_ref(), relay_read),
        )?;
        debug!(task = "multi", "transfer complete");
        Ok(())
    }
}

/// Reader side: connect the producer, deframe its records, forward raw
/// payload into the relay. Closes the relay on the terminator.
async fn read_producer_into_relay(
    ctl: &TaskController,
    connector: &dyn Connector,
    mut relay: DuplexStream,
) -> Result<(), TransferError> {
    let config = ctl.configuration();
    let producer = connector.connect_producer().await?;
    producer
        .configure(
            config.producer_data_size,
            config.producer_chunk_size,
            config.producer_interval(),
        )
        .await?;

    let (producer_end, mut input) = duplex(PIPE_CAPACITY);
    producer.produce(0, producer_end).await?;

    let mut buffer = vec![0u8; config.transfer_buffer_size as usize];
    while let Some(mut record_len) = read_record_len(&mut input).await? {
        ctl.checkpoint()?;
        ctl.deadline_exceeded()?;
        while record_len > 0 {
            let want = record_len.min(buffer.len());
            let n = read_from_producer(ctl, &mut input, &mut buffer[..want]).await?;
            relay.write_all(&buffer[..n]).await?;
            record_len -= n;
        }
    }
    relay.shutdown().await?;
    Ok(())
}

/// Writer side: connect the consumer, drain the relay until it closes,
/// pushing each chunk to the consumer with a notification.
async fn write_relay_to_consumer(
    ctl: &TaskController,
    connector: &dyn Connector,
    mut relay: DuplexStream,
) -> Result<(), TransferError> {
    let config = ctl.configuration();
    let consumer = connector.connect_consumer().await?;
    consumer
        .configure(config.consumer_buffer_size, config.consumer_interval())
        .await?;

    let (mut output, consumer_end) = duplex(PIPE_CAPACITY);
    consumer.start(consumer_end).await?;

    let mut buffer = vec![0u8; config.transfer_buffer_size as usize];
    loop {
        ctl.checkpoint()?;
        ctl.deadline_exceeded()?;
        let n = relay.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        write_to_consumer(ctl, &mut output, &buffer[..n]).await?;
        notify_consumer(ctl, &consumer, n as u32).await?;
    }
    consumer.finish().await?;
    Ok(())
}
