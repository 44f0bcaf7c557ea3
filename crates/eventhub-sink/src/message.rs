// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Outbound messages as handed to a transport.
//!
//! The payload of an [`OutboundMessage`] has no setter. Compressing or
//! decompressing builds a new message carrying the same metadata and routing key.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use crate::constants::{CONTENT_ENCODING_KEY, GZIP_ENCODING};
use crate::errors::DecompressError;

/// Ordered string metadata with unique keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: Vec<(String, String)>,
}

impl Metadata {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` to `value`. An existing key keeps its position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Sets `key` only if it is not present yet. Returns whether it was added.
    pub fn insert_if_absent(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        if self.contains_key(&key) {
            return false;
        }
        self.entries.push((key, value.into()));
        true
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn size_in_bytes(&self) -> usize {
        self.entries.iter().map(|(k, v)| k.len() + v.len()).sum()
    }
}

/// One publishable unit: payload bytes, metadata and an optional routing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    payload: Vec<u8>,
    metadata: Metadata,
    routing_key: Option<String>,
}

impl OutboundMessage {
    #[must_use]
    pub fn new(payload: Vec<u8>, metadata: Metadata, routing_key: Option<String>) -> Self {
        OutboundMessage {
            payload,
            metadata,
            routing_key,
        }
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    #[must_use]
    pub fn routing_key(&self) -> Option<&str> {
        self.routing_key.as_deref()
    }

    /// Bytes this message occupies on the wire: payload, metadata keys and values,
    /// and the routing key.
    #[must_use]
    pub fn serialized_size(&self) -> usize {
        self.payload.len()
            + self.metadata.size_in_bytes()
            + self.routing_key.as_ref().map_or(0, String::len)
    }

    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.metadata.get(CONTENT_ENCODING_KEY) == Some(GZIP_ENCODING)
    }

    /// Returns a gzip compressed copy. Metadata is copied in order and
    /// `Content-Encoding: gzip` is added.
    pub fn compress(&self) -> std::io::Result<OutboundMessage> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&self.payload)?;
        let payload = encoder.finish()?;

        let mut metadata = self.metadata.clone();
        metadata.insert(CONTENT_ENCODING_KEY, GZIP_ENCODING);

        Ok(OutboundMessage {
            payload,
            metadata,
            routing_key: self.routing_key.clone(),
        })
    }

    /// Returns an uncompressed copy without the encoding marker.
    pub fn decompress(&self) -> Result<OutboundMessage, DecompressError> {
        if !self.is_compressed() {
            return Err(DecompressError::NotCompressed);
        }

        let mut decoder = GzDecoder::new(self.payload.as_slice());
        let mut payload = Vec::new();
        decoder.read_to_end(&mut payload)?;

        let mut metadata = self.metadata.clone();
        metadata.remove(CONTENT_ENCODING_KEY);

        Ok(OutboundMessage {
            payload,
            metadata,
            routing_key: self.routing_key.clone(),
        })
    }
}
