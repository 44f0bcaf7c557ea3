// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

use crate::errors::TransportError;
use crate::message::OutboundMessage;

/// Publishes messages to the ingestion service.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publishes a single message and waits for the service to accept it.
    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError>;

    /// Publishes all messages as one unit. Either all are accepted or the call fails.
    async fn send_batch(&self, messages: &[OutboundMessage]) -> Result<(), TransportError>;
}

/// Transport that keeps every published unit in memory.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    published: Mutex<Vec<Vec<OutboundMessage>>>,
}

impl MemoryTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Published units in order. A single send shows up as a unit of one.
    #[must_use]
    pub fn published(&self) -> Vec<Vec<OutboundMessage>> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// All published messages, flattened.
    #[must_use]
    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.published().into_iter().flatten().collect()
    }

    fn record(&self, unit: Vec<OutboundMessage>) {
        debug!("EVENTHUB | Recorded {} message(s) in memory", unit.len());
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(unit);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        self.record(vec![message.clone()]);
        Ok(())
    }

    async fn send_batch(&self, messages: &[OutboundMessage]) -> Result<(), TransportError> {
        self.record(messages.to_vec());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::message::Metadata;

    fn message(body: &str) -> OutboundMessage {
        OutboundMessage::new(body.as_bytes().to_vec(), Metadata::new(), None)
    }

    #[tokio::test]
    async fn test_memory_transport_keeps_units() {
        let transport = MemoryTransport::new();

        transport.send(&message("a")).await.unwrap();
        transport
            .send_batch(&[message("b"), message("c")])
            .await
            .unwrap();

        let published = transport.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].len(), 1);
        assert_eq!(published[1].len(), 2);
        let bodies: Vec<Vec<u8>> = transport
            .messages()
            .iter()
            .map(|m| m.payload().to_vec())
            .collect();
        assert_eq!(bodies, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }
}
