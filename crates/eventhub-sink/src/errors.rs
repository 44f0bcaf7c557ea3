// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the sink.

use reqwest::StatusCode;

/// Invalid arguments given to a sink constructor. No instance is created.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConstructionError {
    #[error("batch size limit must be between {min} and {max}, got {actual}")]
    BatchSizeLimit {
        min: usize,
        max: usize,
        actual: usize,
    },

    #[error("flush period must be greater than zero")]
    ZeroPeriod,
}

/// Failure turning an event into bytes.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("failed to write JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Custom(String),
}

/// Failure converting a log event into an outbound message.
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("failed to format log event: {0}")]
    Format(#[from] FormatError),

    #[error("failed to compress payload: {0}")]
    Compression(#[from] std::io::Error),
}

/// Failure reported by a transport adapter.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{status}: ingestion endpoint rejected the publish: {body}")]
    Status { status: StatusCode, body: String },

    #[error("publish rejected: {0}")]
    Rejected(String),

    #[error("failed to obtain credentials: {0}")]
    Credentials(String),

    #[error("transport unavailable")]
    Unavailable,
}

/// Failure on the immediate (one event per call) path.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Failure of a flush cycle that could not be recovered locally.
#[derive(Debug, thiserror::Error)]
pub enum FlushError {
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error("failed to send batch of {count} messages: {source}")]
    Batch {
        count: usize,
        #[source]
        source: TransportError,
    },
}

/// Failure decompressing a message payload.
#[derive(Debug, thiserror::Error)]
pub enum DecompressError {
    #[error("the message is not compressed")]
    NotCompressed,

    #[error("failed to decompress payload: {0}")]
    Io(#[from] std::io::Error),
}

/// Invalid environment configuration.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error(transparent)]
    Construction(#[from] ConstructionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_construction_error_display() {
        let error = ConstructionError::BatchSizeLimit {
            min: 1,
            max: 100,
            actual: 101,
        };
        assert_eq!(
            error.to_string(),
            "batch size limit must be between 1 and 100, got 101"
        );
    }

    #[test]
    fn test_sink_error_is_transparent() {
        let error = SinkError::from(TransportError::Rejected("quota exceeded".to_string()));
        assert_eq!(error.to_string(), "publish rejected: quota exceeded");
    }

    #[test]
    fn test_flush_error_keeps_source() {
        let error = FlushError::Batch {
            count: 3,
            source: TransportError::Unavailable,
        };
        assert_eq!(
            error.to_string(),
            "failed to send batch of 3 messages: transport unavailable"
        );
        assert!(std::error::Error::source(&error).is_some());
    }

    #[test]
    fn test_config_error_from_construction() {
        let error = ConfigError::from(ConstructionError::ZeroPeriod);
        assert_eq!(error.to_string(), "flush period must be greater than zero");
    }
}
