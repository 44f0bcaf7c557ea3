// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock transports and formatters for testing

use eventhub_sink::errors::{FormatError, TransportError};
use eventhub_sink::event::LogEvent;
use eventhub_sink::formatter::Formatter;
use eventhub_sink::message::OutboundMessage;
use eventhub_sink::transport::Transport;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Mock transport that records every call and can be told to fail
#[derive(Default)]
pub struct MockTransport {
    pub fail_batches: bool,
    pub fail_sends: bool,
    /// Fail odd-numbered sends only: the first attempt for an event fails and
    /// the retry that follows it succeeds.
    pub fail_alternate_sends: bool,
    batch_calls: AtomicUsize,
    send_calls: AtomicUsize,
    batches: Mutex<Vec<Vec<OutboundMessage>>>,
    singles: Mutex<Vec<OutboundMessage>>,
}

#[allow(dead_code)]
impl MockTransport {
    pub fn failing_batches() -> Self {
        MockTransport {
            fail_batches: true,
            ..Default::default()
        }
    }

    pub fn failing_everything() -> Self {
        MockTransport {
            fail_batches: true,
            fail_sends: true,
            ..Default::default()
        }
    }

    /// Batches fail; each single send fails once and succeeds on the next call.
    pub fn flaky_sends() -> Self {
        MockTransport {
            fail_batches: true,
            fail_alternate_sends: true,
            ..Default::default()
        }
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    /// Batches that were accepted
    pub fn batches(&self) -> Vec<Vec<OutboundMessage>> {
        self.batches.lock().unwrap().clone()
    }

    /// Single messages that were accepted
    pub fn singles(&self) -> Vec<OutboundMessage> {
        self.singles.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        let previous = self.send_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_sends || (self.fail_alternate_sends && previous % 2 == 0) {
            return Err(TransportError::Unavailable);
        }
        self.singles.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn send_batch(&self, messages: &[OutboundMessage]) -> Result<(), TransportError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_batches {
            return Err(TransportError::Rejected("batch refused".to_string()));
        }
        self.batches.lock().unwrap().push(messages.to_vec());
        Ok(())
    }
}

/// Mock formatter that writes the message template verbatim
pub struct TemplateFormatter;

impl Formatter for TemplateFormatter {
    fn format(&self, event: &LogEvent) -> Result<Vec<u8>, FormatError> {
        Ok(event.message_template().as_bytes().to_vec())
    }
}
