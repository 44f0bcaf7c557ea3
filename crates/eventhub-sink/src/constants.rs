// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wire limits, defaults and well-known metadata keys.
//!
//! # Size limits
//!
//! The ingestion endpoint rejects any published unit larger than
//! [`MAX_MESSAGE_SIZE_BYTES`], and every message inside a batch costs roughly
//! [`MESSAGE_OVERHEAD_BYTES`] of framing on top of its own payload. The batching
//! engine subtracts the overhead for every message before comparing against the
//! ceiling, so a batch of `n` messages may carry at most
//! `MAX_MESSAGE_SIZE_BYTES - n * MESSAGE_OVERHEAD_BYTES` bytes.

use std::time::Duration;

/// Hard ceiling for one published unit (single message or whole batch).
pub const MAX_MESSAGE_SIZE_BYTES: usize = 256_000;

/// Estimated protocol overhead charged per message in a batch.
pub const MESSAGE_OVERHEAD_BYTES: usize = 6_000;

/// Smallest accepted batch size limit.
pub const MIN_BATCH_SIZE_LIMIT: usize = 1;

/// Largest accepted batch size limit.
pub const MAX_BATCH_SIZE_LIMIT: usize = 100;

/// Number of events the front-end batches together when nothing is configured.
pub const DEFAULT_BATCH_SIZE_LIMIT: usize = 50;

/// Flush period used when nothing is configured.
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(2);

/// Metadata key marking the payload encoding.
pub const CONTENT_ENCODING_KEY: &str = "Content-Encoding";

/// Value of [`CONTENT_ENCODING_KEY`] for gzip compressed payloads.
pub const GZIP_ENCODING: &str = "gzip";

/// Metadata key carrying the application name tag.
pub const APPLICATION_TYPE_KEY: &str = "Type";

/// Metadata key carrying the per-message unique identifier.
pub const LOG_ITEM_ID_KEY: &str = "LogItemId";

/// `tracing` target of the best-effort diagnostic channel.
pub const DIAGNOSTICS_TARGET: &str = "eventhub_sink::diagnostics";
