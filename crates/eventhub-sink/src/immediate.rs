// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use tracing::debug;

use crate::converter::{Compression, EventConverter};
use crate::errors::SinkError;
use crate::event::LogEvent;
use crate::transport::Transport;

/// Delivers one event per call with no buffering.
///
/// Holds no per-call state, so concurrent `emit` calls are fine. The batching
/// engine uses it as the last delivery attempt for a single event.
#[derive(Clone)]
pub struct ImmediateSink {
    converter: EventConverter,
    transport: Arc<dyn Transport>,
    compression: Compression,
}

impl std::fmt::Debug for ImmediateSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImmediateSink")
            .field("converter", &self.converter)
            .field("compression", &self.compression)
            .finish_non_exhaustive()
    }
}

impl ImmediateSink {
    /// Payloads larger than `compression_threshold` bytes are gzip compressed.
    /// Without a threshold nothing is compressed.
    #[must_use]
    pub fn new(
        converter: EventConverter,
        transport: Arc<dyn Transport>,
        compression_threshold: Option<usize>,
    ) -> Self {
        let compression =
            compression_threshold.map_or(Compression::Never, Compression::AboveThreshold);
        ImmediateSink {
            converter,
            transport,
            compression,
        }
    }

    /// Converts `event` with a fresh routing key and sends it, waiting for the
    /// transport to accept it.
    pub async fn emit(&self, event: &LogEvent) -> Result<(), SinkError> {
        let message = self.converter.convert(event, None, self.compression)?;
        debug!(
            "EVENTHUB | Emitting single message of {} bytes",
            message.serialized_size()
        );
        self.transport.send(&message).await?;
        Ok(())
    }
}
