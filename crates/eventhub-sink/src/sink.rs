// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Front-end over the two delivery paths.
//!
//! ```rust,ignore
//! let sink = EventHubSink::builder(transport)
//!     .config(SinkConfig { write_in_batches: true, ..Default::default() })
//!     .hook(Arc::new(|message: &mut OutboundMessage, _event: &LogEvent| {
//!         message.metadata_mut().insert("Env", "prod");
//!     }))
//!     .build()?;
//! sink.emit(event).await?;
//! sink.shutdown().await?;
//! ```

use std::sync::Arc;
use tracing::debug;

use crate::batching::{BatchingEngine, FlushReport};
use crate::config::SinkConfig;
use crate::converter::{EventConverter, MessageHook};
use crate::errors::{ConstructionError, FlushError, SinkError};
use crate::event::{LogEvent, LogLevel};
use crate::formatter::{Formatter, SuffixJsonFormatter};
use crate::immediate::ImmediateSink;
use crate::transport::Transport;

#[derive(Debug)]
enum Delivery {
    Immediate(ImmediateSink),
    Batching(BatchingEngine),
}

#[derive(Debug)]
pub struct EventHubSink {
    delivery: Delivery,
    minimum_level: LogLevel,
}

pub struct EventHubSinkBuilder {
    transport: Arc<dyn Transport>,
    config: SinkConfig,
    formatter: Option<Arc<dyn Formatter>>,
    hook: Option<MessageHook>,
}

impl EventHubSinkBuilder {
    #[must_use]
    pub fn config(mut self, config: SinkConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the default [`SuffixJsonFormatter`].
    #[must_use]
    pub fn formatter(mut self, formatter: Arc<dyn Formatter>) -> Self {
        self.formatter = Some(formatter);
        self
    }

    #[must_use]
    pub fn hook(mut self, hook: MessageHook) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Builds the sink. With `write_in_batches` the flush worker is spawned, so
    /// this must run inside a tokio runtime.
    pub fn build(self) -> Result<EventHubSink, ConstructionError> {
        let formatter = self
            .formatter
            .unwrap_or_else(|| Arc::new(SuffixJsonFormatter::default()));
        let converter =
            EventConverter::new(formatter, self.config.application_name.clone(), self.hook);

        let delivery = if self.config.write_in_batches {
            let engine =
                BatchingEngine::start(self.config.batching_options(), converter, self.transport)?;
            Delivery::Batching(engine)
        } else {
            Delivery::Immediate(ImmediateSink::new(
                converter,
                self.transport,
                self.config.compression_threshold,
            ))
        };

        Ok(EventHubSink {
            delivery,
            minimum_level: self.config.minimum_level,
        })
    }
}

impl EventHubSink {
    #[must_use]
    pub fn builder(transport: Arc<dyn Transport>) -> EventHubSinkBuilder {
        EventHubSinkBuilder {
            transport,
            config: SinkConfig::default(),
            formatter: None,
            hook: None,
        }
    }

    #[must_use]
    pub fn is_enabled(&self, level: LogLevel) -> bool {
        level >= self.minimum_level
    }

    #[must_use]
    pub fn is_batching(&self) -> bool {
        matches!(self.delivery, Delivery::Batching(_))
    }

    /// Publishes `event` right away, or buffers it when batching. Events below
    /// the minimum level are ignored.
    pub async fn emit(&self, event: LogEvent) -> Result<(), SinkError> {
        if !self.is_enabled(event.level()) {
            return Ok(());
        }

        match &self.delivery {
            Delivery::Immediate(sink) => sink.emit(&event).await,
            Delivery::Batching(engine) => {
                engine.enqueue(event);
                Ok(())
            }
        }
    }

    /// Flushes buffered events. `None` without batching.
    pub async fn flush(&self) -> Result<Option<FlushReport>, FlushError> {
        match &self.delivery {
            Delivery::Immediate(_) => Ok(None),
            Delivery::Batching(engine) => engine.flush().await.map(Some),
        }
    }

    pub async fn shutdown(&self) -> Result<Option<FlushReport>, FlushError> {
        match &self.delivery {
            Delivery::Immediate(_) => {
                debug!("EVENTHUB | Shutting down immediate sink");
                Ok(None)
            }
            Delivery::Batching(engine) => engine.shutdown().await.map(Some),
        }
    }
}
