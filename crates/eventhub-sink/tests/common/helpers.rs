// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use chrono::{TimeZone, Utc};
use eventhub_sink::converter::{new_routing_key, Compression, EventConverter};
use eventhub_sink::event::{LogEvent, LogLevel};

/// Create a log event whose template is `template` and that carries `Sequence = n`
pub fn create_test_event(template: &str, n: u64) -> LogEvent {
    let timestamp = Utc
        .with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
        .unwrap()
        .fixed_offset();
    LogEvent::new(timestamp, LogLevel::Information, template).with_property("Sequence", n)
}

/// Create `count` numbered events with the same template
pub fn create_test_events(count: u64) -> Vec<LogEvent> {
    (0..count)
        .map(|n| create_test_event("Processed item {Sequence}", n))
        .collect()
}

/// Wire size of `event` as converted on the batching path
pub fn batch_wire_size(converter: &EventConverter, event: &LogEvent) -> usize {
    converter
        .convert(event, Some(&new_routing_key()), Compression::Always)
        .expect("failed to convert test event")
        .serialized_size()
}

/// A string that gzip cannot shrink much
pub fn incompressible_text(len: usize) -> String {
    let mut text = String::with_capacity(len + 36);
    while text.len() < len {
        text.push_str(&uuid::Uuid::new_v4().simple().to_string());
    }
    text.truncate(len);
    text
}
