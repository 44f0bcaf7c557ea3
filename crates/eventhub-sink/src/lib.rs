// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # eventhub-sink
//!
//! Ships structured log events to an Event Hubs style ingestion endpoint, either one
//! event per publish call or batched on a timer.
//!
//! ## Architecture
//!
//! ```text
//!   producer ──enqueue──> BatchingEngine ──(tick / size trigger)──┐
//!                                                                  │
//!                          ┌───────────────────────────────────────┘
//!                          v
//!                   EventConverter ──> size budget check
//!                                          │           │
//!                                   fits   │           │ too big / batch rejected
//!                                          v           v
//!                               Transport::send_batch  Transport::send per event
//!                                                          │ failure
//!                                                          v
//!                                                   ImmediateSink::emit
//! ```
//!
//! - [`converter`]: one [`event::LogEvent`] into one [`message::OutboundMessage`]
//! - [`immediate`]: unbuffered, one publish per event
//! - [`batching`]: timer driven buffer with size-aware partial-failure delivery
//! - [`sink`]: front-end choosing between the two delivery paths
//! - [`transport`] / [`http`]: the publish seam and its adapters

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod batching;
pub mod buffer;
pub mod config;
pub mod constants;
pub mod converter;
pub mod credentials;
pub mod errors;
pub mod event;
pub mod formatter;
pub mod http;
pub mod immediate;
pub mod message;
pub mod sink;
pub mod transport;
