// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod config;

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use eventhub_sink::{
    config::SinkConfig,
    credentials::SasCredential,
    event::LogEvent,
    http::{HttpTransport, HttpTransportConfig},
    sink::EventHubSink,
    transport::{MemoryTransport, Transport},
};

use crate::config::ForwarderConfig;

#[tokio::main]
pub async fn main() {
    let forwarder_config = ForwarderConfig::from_env();
    let log_level = forwarder_config
        .as_ref()
        .map_or("info", |config| config.log_level.as_str());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .with_writer(std::io::stderr)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let forwarder_config = match forwarder_config {
        Ok(c) => c,
        Err(e) => {
            error!("Error creating forwarder config: {e}");
            return;
        }
    };
    let sink_config = match SinkConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Error creating sink config: {e}");
            return;
        }
    };

    let memory_transport = forwarder_config.dry_run.then(|| Arc::new(MemoryTransport::new()));
    let transport: Arc<dyn Transport> = match &memory_transport {
        Some(memory) => {
            info!("Dry run: messages are recorded in memory and not published");
            Arc::clone(memory) as Arc<dyn Transport>
        }
        None => match create_http_transport(&forwarder_config) {
            Ok(transport) => Arc::new(transport),
            Err(e) => {
                error!("Error creating HTTP transport: {e}");
                return;
            }
        },
    };

    let sink = match EventHubSink::builder(transport).config(sink_config).build() {
        Ok(sink) => sink,
        Err(e) => {
            error!("Error creating sink: {e}");
            return;
        }
    };

    info!(
        "Forwarding log events from stdin ({} delivery)",
        if sink.is_batching() { "batched" } else { "immediate" }
    );
    forward_stdin(&sink).await;

    match sink.shutdown().await {
        Ok(Some(report)) => info!(
            "Final flush: {} delivered, {} dropped",
            report.delivered(),
            report.dropped
        ),
        Ok(None) => {}
        Err(e) => error!("Final flush failed: {e}"),
    }

    if let Some(memory) = memory_transport {
        info!("Dry run recorded {} messages", memory.messages().len());
    }
}

fn create_http_transport(config: &ForwarderConfig) -> Result<HttpTransport, String> {
    let endpoint = config
        .endpoint
        .clone()
        .ok_or_else(|| "EVENTHUB_ENDPOINT is not set".to_string())?;
    let token = config
        .sas_token
        .as_deref()
        .ok_or_else(|| "EVENTHUB_SAS_TOKEN is not set".to_string())?;

    HttpTransport::new(
        HttpTransportConfig {
            endpoint,
            timeout: config.timeout,
            https_proxy: config.https_proxy.clone(),
        },
        Arc::new(SasCredential::fixed(token)),
    )
    .map_err(|e| e.to_string())
}

/// Reads events until EOF or Ctrl-C.
async fn forward_stdin(sink: &EventHubSink) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut line_number: u64 = 0;
    loop {
        let line = tokio::select! {
            _ = &mut ctrl_c => {
                info!("Received Ctrl-C, shutting down");
                break;
            }
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("Reached end of input");
                break;
            }
            Err(e) => {
                error!("Failed to read from stdin: {e}");
                break;
            }
        };
        line_number += 1;

        match parse_event(&line) {
            Ok(Some(event)) => {
                if let Err(e) = sink.emit(event).await {
                    error!("Failed to publish event from line {line_number}: {e}");
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Skipping malformed line {line_number}: {e}"),
        }
    }
}

/// Blank lines carry no event.
fn parse_event(line: &str) -> Result<Option<LogEvent>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line).map(Some)
}
