// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Event buffer shared by producers and the flush worker.
//!
//! Producers only ever hold the lock long enough to push one event. A flush takes
//! the whole buffer in one step and bumps the generation, so events enqueued while
//! it runs land in the next generation.

use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

use crate::event::LogEvent;

#[derive(Debug, Default)]
struct BufferState {
    events: Vec<LogEvent>,
    generation: u64,
    flushing: bool,
    closed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Push {
    /// The event was buffered; holds the buffer length after the push.
    Accepted(usize),
    /// The buffer is closed and the event was dropped.
    Closed,
}

#[derive(Debug, Default)]
pub struct EventBuffer {
    state: Mutex<BufferState>,
    idle: Notify,
}

impl EventBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, event: LogEvent) -> Push {
        let mut state = self.lock();
        if state.closed {
            return Push::Closed;
        }
        state.events.push(event);
        Push::Accepted(state.events.len())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops accepting events. Returns the number still buffered.
    pub fn close(&self) -> usize {
        let mut state = self.lock();
        state.closed = true;
        state.events.len()
    }

    /// Takes the buffered events and marks a flush as running.
    ///
    /// Returns `None` when another flush holds the buffer.
    pub fn begin_flush(&self) -> Option<FlushGuard<'_>> {
        let mut state = self.lock();
        if state.flushing {
            return None;
        }
        state.flushing = true;
        let events = std::mem::take(&mut state.events);
        let generation = state.generation;
        state.generation += 1;
        Some(FlushGuard {
            buffer: self,
            events,
            generation,
        })
    }

    /// Like [`EventBuffer::begin_flush`], but waits for a running flush to finish.
    pub async fn begin_flush_when_idle(&self) -> FlushGuard<'_> {
        loop {
            let idle = self.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();

            if let Some(guard) = self.begin_flush() {
                return guard;
            }
            idle.await;
        }
    }

    fn end_flush(&self) {
        self.lock().flushing = false;
        self.idle.notify_waiters();
    }
}

/// Marks a running flush. Dropping it, even on an error path, releases the buffer
/// for the next flush.
#[derive(Debug)]
pub struct FlushGuard<'a> {
    buffer: &'a EventBuffer,
    events: Vec<LogEvent>,
    generation: u64,
}

impl FlushGuard<'_> {
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn events(&self) -> &[LogEvent] {
        &self.events
    }
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.buffer.end_flush();
    }
}
