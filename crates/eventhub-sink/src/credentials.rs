// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `Authorization` values for the ingestion endpoint.
//!
//! Shared access signatures expire, so a resolved token is cached only until
//! shortly before its expiry and then fetched again.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use std::{future::Future, pin::Pin};
use tokio::sync::Mutex;
use tracing::debug;

use crate::errors::TransportError;

/// Tokens are refreshed this many seconds before they expire.
pub const DEFAULT_REFRESH_MARGIN_SECS: i64 = 300;

/// A shared access signature and the moment it stops being accepted.
#[derive(Clone, PartialEq, Eq)]
pub struct SasToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for SasToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SasToken")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

pub type SasResolverFn = Arc<
    dyn Fn() -> Pin<Box<dyn Future<Output = Result<SasToken, String>> + Send>> + Send + Sync,
>;

#[derive(Clone)]
pub enum SasCredential {
    /// A fixed header value, used as is for the lifetime of the process.
    Fixed(String),
    Refreshing {
        resolver_fn: SasResolverFn,
        cached: Arc<Mutex<Option<SasToken>>>,
        refresh_margin: Duration,
    },
}

impl SasCredential {
    pub fn fixed(value: &str) -> Self {
        Self::Fixed(value.to_string())
    }

    pub fn refreshing(resolver_fn: SasResolverFn) -> Self {
        Self::refreshing_with_margin(resolver_fn, Duration::seconds(DEFAULT_REFRESH_MARGIN_SECS))
    }

    pub fn refreshing_with_margin(resolver_fn: SasResolverFn, refresh_margin: Duration) -> Self {
        Self::Refreshing {
            resolver_fn,
            cached: Arc::new(Mutex::new(None)),
            refresh_margin,
        }
    }

    /// Returns the current header value, resolving a new token when the cached
    /// one is missing or about to expire. Concurrent callers share one refresh.
    pub async fn authorization(&self) -> Result<String, TransportError> {
        match self {
            Self::Fixed(value) => Ok(value.clone()),
            Self::Refreshing {
                resolver_fn,
                cached,
                refresh_margin,
            } => {
                let mut cached = cached.lock().await;
                if let Some(token) = cached.as_ref() {
                    if Utc::now() + *refresh_margin < token.expires_at {
                        return Ok(token.value.clone());
                    }
                }

                let token = (resolver_fn)()
                    .await
                    .map_err(TransportError::Credentials)?;
                debug!(
                    "EVENTHUB | Resolved shared access signature valid until {}",
                    token.expires_at
                );
                let value = token.value.clone();
                *cached = Some(token);
                Ok(value)
            }
        }
    }
}

impl std::fmt::Debug for SasCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed(_) => write!(f, "SasCredential::Fixed"),
            Self::Refreshing { refresh_margin, .. } => f
                .debug_struct("SasCredential::Refreshing")
                .field("refresh_margin", refresh_margin)
                .finish_non_exhaustive(),
        }
    }
}
