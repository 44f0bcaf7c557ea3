// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::time::Duration;

use crate::batching::{BatchPolicy, BatchingOptions, SizeLimits};
use crate::constants::{
    DEFAULT_BATCH_SIZE_LIMIT, DEFAULT_PERIOD, MAX_MESSAGE_SIZE_BYTES, MESSAGE_OVERHEAD_BYTES,
};
use crate::errors::ConfigError;
use crate::event::LogLevel;

/// Sink configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkConfig {
    /// Tagged on every message as `Type` unless a hook already set it
    pub application_name: Option<String>,
    /// Buffer events and publish them in batches instead of one by one
    pub write_in_batches: bool,
    /// Events published together per batch
    pub batch_size_limit: usize,
    /// Interval between periodic flushes
    pub period: Duration,
    pub batch_policy: BatchPolicy,
    /// Payloads above this size are compressed on the immediate path
    pub compression_threshold: Option<usize>,
    /// Events below this level are ignored
    pub minimum_level: LogLevel,
    pub max_message_size: usize,
    pub message_overhead: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            application_name: None,
            write_in_batches: false,
            batch_size_limit: DEFAULT_BATCH_SIZE_LIMIT,
            period: DEFAULT_PERIOD,
            batch_policy: BatchPolicy::SizeChecked,
            compression_threshold: None,
            minimum_level: LogLevel::Verbose,
            max_message_size: MAX_MESSAGE_SIZE_BYTES,
            message_overhead: MESSAGE_OVERHEAD_BYTES,
        }
    }
}

impl SinkConfig {
    /// Create configuration from `EVENTHUB_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`SinkConfig::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let lookup = |key: &str| lookup(key).filter(|val| !val.trim().is_empty());

        let application_name = lookup("EVENTHUB_APPLICATION_NAME");
        let write_in_batches = match lookup("EVENTHUB_WRITE_IN_BATCHES") {
            Some(val) => parse_bool("EVENTHUB_WRITE_IN_BATCHES", &val)?,
            None => defaults.write_in_batches,
        };
        let batch_size_limit = match lookup("EVENTHUB_BATCH_SIZE_LIMIT") {
            Some(val) => parse_number("EVENTHUB_BATCH_SIZE_LIMIT", &val)?,
            None => defaults.batch_size_limit,
        };
        let period = match lookup("EVENTHUB_PERIOD_MS") {
            Some(val) => Duration::from_millis(parse_number("EVENTHUB_PERIOD_MS", &val)?),
            None => defaults.period,
        };
        let batch_policy = match lookup("EVENTHUB_BATCH_POLICY") {
            Some(val) => parse_policy(&val)?,
            None => defaults.batch_policy,
        };
        let compression_threshold = lookup("EVENTHUB_COMPRESSION_THRESHOLD")
            .map(|val| parse_number("EVENTHUB_COMPRESSION_THRESHOLD", &val))
            .transpose()?;
        let minimum_level = match lookup("EVENTHUB_MINIMUM_LEVEL") {
            Some(val) => LogLevel::parse(&val).ok_or(ConfigError::InvalidValue {
                key: "EVENTHUB_MINIMUM_LEVEL",
                value: val,
            })?,
            None => defaults.minimum_level,
        };
        let max_message_size = match lookup("EVENTHUB_MAX_MESSAGE_SIZE") {
            Some(val) => parse_number("EVENTHUB_MAX_MESSAGE_SIZE", &val)?,
            None => defaults.max_message_size,
        };
        let message_overhead = match lookup("EVENTHUB_MESSAGE_OVERHEAD") {
            Some(val) => parse_number("EVENTHUB_MESSAGE_OVERHEAD", &val)?,
            None => defaults.message_overhead,
        };

        let config = Self {
            application_name,
            write_in_batches,
            batch_size_limit,
            period,
            batch_policy,
            compression_threshold,
            minimum_level,
            max_message_size,
            message_overhead,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_message_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "EVENTHUB_MAX_MESSAGE_SIZE",
                value: self.max_message_size.to_string(),
            });
        }

        self.batching_options().validate()?;
        Ok(())
    }

    #[must_use]
    pub fn batching_options(&self) -> BatchingOptions {
        BatchingOptions {
            batch_size_limit: self.batch_size_limit,
            period: self.period,
            policy: self.batch_policy,
            limits: SizeLimits {
                ceiling: self.max_message_size,
                overhead: self.message_overhead,
            },
            compression_threshold: self.compression_threshold,
        }
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn parse_policy(value: &str) -> Result<BatchPolicy, ConfigError> {
    match value.trim().to_lowercase().replace('-', "_").as_str() {
        "size_checked" => Ok(BatchPolicy::SizeChecked),
        "attempt_first" => Ok(BatchPolicy::AttemptFirst),
        _ => Err(ConfigError::InvalidValue {
            key: "EVENTHUB_BATCH_POLICY",
            value: value.to_string(),
        }),
    }
}
