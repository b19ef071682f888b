//! Endpoint wiring. A [`Connector`] hands tasks their producer and
//! consumer peers; the default implementation spawns in-process peer
//! loops, one pair per connection.

use async_trait::async_trait;

use crate::error::TransferError;
use crate::protocol::{spawn_consumer, spawn_producer, ConsumerHandle, ProducerHandle};

/// Source of transfer endpoints. Tests substitute their own to model
/// slow or broken peers.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect_producer(&self) -> Result<ProducerHandle, TransferError>;
    async fn connect_consumer(&self) -> Result<ConsumerHandle, TransferError>;
}

/// Spawns fresh in-process peers for every connection.
#[derive(Debug, Default)]
pub struct LocalConnector;

impl LocalConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn connect_producer(&self) -> Result<ProducerHandle, TransferError> {
        Ok(spawn_producer())
    }

    async fn connect_consumer(&self) -> Result<ConsumerHandle, TransferError> {
        Ok(spawn_consumer())
    }
}
