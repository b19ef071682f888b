//! Single variant: one execution context deframes producer records and
//! pushes the payload straight to the consumer.

use std::sync::Arc;
use async_trait::async_trait;
use tokio::io::{duplex, DuplexStream};
use tracing::debug;

use crate::error::TransferError;
use crate::protocol::{read_record_len, Connector, ConsumerHandle, PIPE_CAPACITY};
use crate::task::core::{TaskBehavior, TaskController};
use crate::task::pump::{notify_consumer, read_from_producer, write_to_consumer};

pub struct SingleThreadTask {
    connector: Arc<dyn Connector>,
}

impl SingleThreadTask {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl TaskBehavior for SingleThreadTask {
    async fn run(&self, ctl: TaskController) -> Result<(), TransferError> {
        let config = ctl.configuration();

        let producer = self.connector.connect_producer().await?;
        producer
            .configure(
                config.producer_data_size,
                config.producer_chunk_size,
                config.producer_interval(),
            )
            .await?;
        let consumer = self.connector.connect_consumer().await?;
        consumer
            .configure(config.consumer_buffer_size, config.consumer_interval())
            .await?;
        ctl.record_configuration(config);

        let (producer_end, mut input) = duplex(PIPE_CAPACITY);
        producer.produce(0, producer_end).await?;
        let (mut output, consumer_end) = duplex(PIPE_CAPACITY);
        consumer.start(consumer_end).await?;

        copy_records(
            &ctl,
            &mut input,
            &mut output,
            &consumer,
            config.transfer_buffer_size as usize,
        )
        .await?;
        consumer.finish().await?;
        debug!(task = "single", "transfer complete");
        Ok(())
    }
}

/// Moves every framed record from `input` to `output`, notifying the
/// consumer after each write. Checks cancellation and the deadline
/// once per record.
async fn copy_records(
    ctl: &TaskController,
    input: &mut DuplexStream,
    output: &mut DuplexStream,
    consumer: &ConsumerHandle,
    buffer_size: usize,
) -> Result<(), TransferError> {
    let mut buffer = vec![0u8; buffer_size];
    while let Some(mut record_len) = read_record_len(input).await? {
        ctl.checkpoint()?;
        ctl.deadline_exceeded()?;
        while record_len > 0 {
            let want = record_len.min(buffer.len());
            let n = read_from_producer(ctl, input, &mut buffer[..want]).await?;
            write_to_consumer(ctl, output, &buffer[..n]).await?;
            notify_consumer(ctl, consumer, n as u32).await?;
            record_len -= n;
        }
    }
    Ok(())
}
