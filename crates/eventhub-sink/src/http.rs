// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Event Hubs REST publishing over HTTP.
//!
//! Every publish is a POST to `{endpoint}/messages` carrying a JSON array with
//! the `application/vnd.microsoft.servicebus.json` content type, one entry per
//! message. A single send is an array of one. Message metadata travels in each
//! entry's `UserProperties`, never as HTTP headers, so a metadata key such as
//! `Content-Encoding` or `Authorization` cannot change how the request itself is
//! read.

use async_trait::async_trait;
use base64::prelude::*;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

use crate::credentials::SasCredential;
use crate::errors::TransportError;
use crate::message::OutboundMessage;
use crate::transport::Transport;

const BATCH_CONTENT_TYPE: &str = "application/vnd.microsoft.servicebus.json";
const TRANSFER_ENCODING_KEY: &str = "Content-Transfer-Encoding";
const BASE64_ENCODING: &str = "base64";

#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Base URL of the event hub, e.g. `https://ns.servicebus.windows.net/hub`.
    pub endpoint: String,
    pub timeout: Duration,
    pub https_proxy: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    messages_url: String,
    credential: Arc<SasCredential>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct BrokerProperties<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    partition_key: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct BatchEntry<'a> {
    body: String,
    broker_properties: BrokerProperties<'a>,
    user_properties: serde_json::Map<String, serde_json::Value>,
}

impl<'a> From<&'a OutboundMessage> for BatchEntry<'a> {
    fn from(message: &'a OutboundMessage) -> Self {
        let mut user_properties: serde_json::Map<String, serde_json::Value> = message
            .metadata()
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::from(v)))
            .collect();

        let body = match std::str::from_utf8(message.payload()) {
            Ok(text) => text.to_string(),
            Err(_) => {
                user_properties.insert(
                    TRANSFER_ENCODING_KEY.to_string(),
                    serde_json::Value::from(BASE64_ENCODING),
                );
                BASE64_STANDARD.encode(message.payload())
            }
        };

        BatchEntry {
            body,
            broker_properties: BrokerProperties {
                partition_key: message.routing_key(),
            },
            user_properties,
        }
    }
}

impl HttpTransport {
    pub fn new(
        config: HttpTransportConfig,
        credential: Arc<SasCredential>,
    ) -> Result<Self, TransportError> {
        let client = build_client(&config)?;
        let messages_url = format!("{}/messages", config.endpoint.trim_end_matches('/'));
        Ok(HttpTransport {
            client,
            messages_url,
            credential,
        })
    }

    async fn post_entries(&self, messages: &[OutboundMessage]) -> Result<(), TransportError> {
        let mut headers = HeaderMap::new();
        let authorization = self.credential.authorization().await?;
        headers.insert(AUTHORIZATION, header_value(&authorization)?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(BATCH_CONTENT_TYPE));

        let entries: Vec<BatchEntry<'_>> = messages.iter().map(BatchEntry::from).collect();
        let body =
            serde_json::to_vec(&entries).map_err(|e| TransportError::Rejected(e.to_string()))?;

        self.post(headers, body).await
    }

    async fn post(&self, headers: HeaderMap, body: Vec<u8>) -> Result<(), TransportError> {
        let response = self
            .client
            .post(&self.messages_url)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        error!("EVENTHUB | Publish failed with status {status}: {body}");
        Err(TransportError::Status { status, body })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        debug!(
            "EVENTHUB | Sending message of {} bytes",
            message.serialized_size()
        );
        self.post_entries(std::slice::from_ref(message)).await
    }

    async fn send_batch(&self, messages: &[OutboundMessage]) -> Result<(), TransportError> {
        debug!("EVENTHUB | Sending batch of {} messages", messages.len());
        self.post_entries(messages).await
    }
}

fn header_value(value: &str) -> Result<HeaderValue, TransportError> {
    HeaderValue::from_str(value)
        .map_err(|_| TransportError::Rejected(format!("invalid header value {value:?}")))
}

fn build_client(config: &HttpTransportConfig) -> Result<reqwest::Client, TransportError> {
    let mut builder = reqwest::Client::builder()
        .timeout(config.timeout)
        .pool_idle_timeout(Duration::from_secs(270))
        .tcp_keepalive(Duration::from_secs(120));

    if let Some(proxy) = &config.https_proxy {
        builder = builder.proxy(reqwest::Proxy::https(proxy)?);
    }

    Ok(builder.build()?)
}
