// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::constants::{APPLICATION_TYPE_KEY, LOG_ITEM_ID_KEY};
use crate::errors::ConversionError;
use crate::event::LogEvent;
use crate::formatter::{Formatter, SuffixJsonFormatter};
use crate::message::{Metadata, OutboundMessage};

/// Customization hook run on every converted message before default tagging.
pub type MessageHook = Arc<dyn Fn(&mut OutboundMessage, &LogEvent) + Send + Sync>;

/// When a converted payload is gzip compressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Always,
    /// Compress when the serialized size is strictly greater than the threshold.
    AboveThreshold(usize),
    Never,
}

impl Compression {
    fn applies_to(self, message: &OutboundMessage) -> bool {
        match self {
            Compression::Always => true,
            Compression::AboveThreshold(threshold) => message.serialized_size() > threshold,
            Compression::Never => false,
        }
    }
}

/// Turns one log event into one outbound message.
#[derive(Clone)]
pub struct EventConverter {
    formatter: Arc<dyn Formatter>,
    application_name: Option<String>,
    hook: Option<MessageHook>,
}

impl fmt::Debug for EventConverter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventConverter")
            .field("application_name", &self.application_name)
            .field("hook", &self.hook.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for EventConverter {
    fn default() -> Self {
        EventConverter::new(Arc::new(SuffixJsonFormatter::default()), None, None)
    }
}

impl EventConverter {
    /// A blank application name is treated as absent.
    #[must_use]
    pub fn new(
        formatter: Arc<dyn Formatter>,
        application_name: Option<String>,
        hook: Option<MessageHook>,
    ) -> Self {
        let application_name = application_name.filter(|name| !name.trim().is_empty());
        EventConverter {
            formatter,
            application_name,
            hook,
        }
    }

    #[must_use]
    pub fn application_name(&self) -> Option<&str> {
        self.application_name.as_deref()
    }

    /// Formats `event` and wraps it with a routing key, a fresh `LogItemId`
    /// and the default tags. A missing routing key is replaced by a fresh UUID.
    pub fn convert(
        &self,
        event: &LogEvent,
        routing_key: Option<&str>,
        compression: Compression,
    ) -> Result<OutboundMessage, ConversionError> {
        let payload = self.formatter.format(event)?;
        let routing_key = routing_key.map_or_else(new_routing_key, str::to_string);

        let mut metadata = Metadata::new();
        metadata.insert(LOG_ITEM_ID_KEY, Uuid::new_v4().to_string());

        let mut message = OutboundMessage::new(payload, metadata, Some(routing_key));
        if compression.applies_to(&message) {
            message = message.compress()?;
        }

        if let Some(hook) = &self.hook {
            hook(&mut message, event);
        }

        if let Some(name) = &self.application_name {
            message
                .metadata_mut()
                .insert_if_absent(APPLICATION_TYPE_KEY, name.as_str());
        }

        Ok(message)
    }
}

/// Fresh partition routing key.
#[must_use]
pub fn new_routing_key() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::errors::FormatError;
    use crate::event::LogLevel;
    use chrono::{TimeZone, Utc};

    struct FixedFormatter(&'static [u8]);

    impl Formatter for FixedFormatter {
        fn format(&self, _event: &LogEvent) -> Result<Vec<u8>, FormatError> {
            Ok(self.0.to_vec())
        }
    }

    struct FailingFormatter;

    impl Formatter for FailingFormatter {
        fn format(&self, _event: &LogEvent) -> Result<Vec<u8>, FormatError> {
            Err(FormatError::Custom("cannot format".to_string()))
        }
    }

    fn event() -> LogEvent {
        LogEvent::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap().fixed_offset(),
            LogLevel::Information,
            "Processed {Count} items",
        )
        .with_property("Count", 3)
    }

    fn converter(hook: Option<MessageHook>) -> EventConverter {
        EventConverter::new(
            Arc::new(FixedFormatter(b"{\"Level\":\"Information\"}")),
            Some("billing".to_string()),
            hook,
        )
    }

    #[test]
    fn test_convert_sets_routing_key_and_log_item_id() {
        let message = converter(None)
            .convert(&event(), Some("pk-1"), Compression::Never)
            .unwrap();

        assert_eq!(message.payload(), b"{\"Level\":\"Information\"}");
        assert_eq!(message.routing_key(), Some("pk-1"));
        let id = message.metadata().get(LOG_ITEM_ID_KEY).unwrap();
        assert!(Uuid::parse_str(id).is_ok());
        assert_eq!(message.metadata().get(APPLICATION_TYPE_KEY), Some("billing"));
    }

    #[test]
    fn test_missing_routing_key_is_generated() {
        let converter = converter(None);
        let first = converter.convert(&event(), None, Compression::Never).unwrap();
        let second = converter.convert(&event(), None, Compression::Never).unwrap();

        assert!(Uuid::parse_str(first.routing_key().unwrap()).is_ok());
        assert_ne!(first.routing_key(), second.routing_key());
        assert_ne!(
            first.metadata().get(LOG_ITEM_ID_KEY),
            second.metadata().get(LOG_ITEM_ID_KEY)
        );
    }

    #[test]
    fn test_hook_type_is_not_overwritten() {
        let hook: MessageHook = Arc::new(|message: &mut OutboundMessage, _event: &LogEvent| {
            message.metadata_mut().insert("Type", "audit");
        });

        let message = converter(Some(hook))
            .convert(&event(), None, Compression::Never)
            .unwrap();

        assert_eq!(message.metadata().get("Type"), Some("audit"));
    }

    #[test]
    fn test_hook_sees_compressed_message() {
        let hook: MessageHook = Arc::new(|message: &mut OutboundMessage, event: &LogEvent| {
            let marker = if message.is_compressed() { "yes" } else { "no" };
            message.metadata_mut().insert("Compressed", marker);
            message
                .metadata_mut()
                .insert("Template", event.message_template());
        });

        let message = converter(Some(hook))
            .convert(&event(), None, Compression::Always)
            .unwrap();

        assert_eq!(message.metadata().get("Compressed"), Some("yes"));
        assert_eq!(
            message.metadata().get("Template"),
            Some("Processed {Count} items")
        );
    }

    #[test]
    fn test_blank_application_name_adds_no_tag() {
        let converter = EventConverter::new(
            Arc::new(FixedFormatter(b"{}")),
            Some("   ".to_string()),
            None,
        );

        let message = converter.convert(&event(), None, Compression::Never).unwrap();

        assert!(!message.metadata().contains_key(APPLICATION_TYPE_KEY));
        assert_eq!(converter.application_name(), None);
    }

    #[test]
    fn test_compression_threshold() {
        let converter = converter(None);
        let size = converter
            .convert(&event(), Some("pk"), Compression::Never)
            .unwrap()
            .serialized_size();

        // The application tag is added after the size check.
        let tag_size = APPLICATION_TYPE_KEY.len() + "billing".len();
        let untagged = size - tag_size;

        let at_threshold = converter
            .convert(&event(), Some("pk"), Compression::AboveThreshold(untagged))
            .unwrap();
        assert!(!at_threshold.is_compressed());

        let above_threshold = converter
            .convert(&event(), Some("pk"), Compression::AboveThreshold(untagged - 1))
            .unwrap();
        assert!(above_threshold.is_compressed());
    }

    #[test]
    fn test_decompress_yields_formatter_output() {
        let formatter = Arc::new(SuffixJsonFormatter::default());
        let expected = formatter.format(&event()).unwrap();
        let converter = EventConverter::new(formatter, None, None);

        let message = converter.convert(&event(), None, Compression::Always).unwrap();

        assert!(message.is_compressed());
        assert_eq!(message.decompress().unwrap().payload(), expected.as_slice());
    }

    #[test]
    fn test_formatter_failure_propagates() {
        let converter = EventConverter::new(Arc::new(FailingFormatter), None, None);

        let result = converter.convert(&event(), None, Compression::Never);

        assert!(matches!(result, Err(ConversionError::Format(_))));
    }
}
