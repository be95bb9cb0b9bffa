// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::borrow::Cow;
use std::env;
use std::net::SocketAddr;

use serde::Serialize;
use tokio::io::{AsyncWriteExt, Stdout};
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use log_intake::{Config, HandlerFactory, Message, Server};

// Messages buffered between the connections and stdout before readers are throttled
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// One received message as written to stdout.
#[derive(Debug, Serialize)]
struct Event<'a> {
    message: Cow<'a, str>,
    family: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote_addr: Option<SocketAddr>,
}

impl<'a> From<&'a Message> for Event<'a> {
    fn from(message: &'a Message) -> Self {
        Self {
            message: String::from_utf8_lossy(&message.payload),
            family: message.metadata.family.to_string(),
            remote_addr: message.metadata.remote_addr,
        }
    }
}

#[tokio::main]
pub async fn main() {
    let log_level = env::var("DD_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(log_level).expect("could not parse log level in configuration"),
        )
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid log intake configuration: {}", e);
            return;
        }
    };

    let (tx, rx) = mpsc::channel::<Message>(EVENT_CHANNEL_CAPACITY);
    let factory = match HandlerFactory::for_config(&config, tx) {
        Ok(factory) => factory,
        Err(e) => {
            error!("Invalid log intake configuration: {}", e);
            return;
        }
    };

    let mut server = match Server::new(config, factory) {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to create log intake server: {}", e);
            return;
        }
    };
    if let Err(e) = server.start().await {
        error!("Failed to start log intake server: {}", e);
        return;
    }

    let writer = tokio::spawn(write_events(rx, tokio::io::stdout()));

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutting down log intake");
    server.stop().await;

    // Dropping the server drops the last sender, which ends the writer
    drop(server);
    match writer.await {
        Ok(written) => debug!("Wrote {} event(s)", written),
        Err(e) => error!("Event writer failed: {:?}", e),
    }
}

async fn write_events(mut rx: mpsc::Receiver<Message>, mut out: Stdout) -> u64 {
    let mut written = 0;
    while let Some(message) = rx.recv().await {
        let mut line = match serde_json::to_vec(&Event::from(&message)) {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize event from {}: {}", message.metadata, e);
                continue;
            }
        };
        line.push(b'\n');
        if let Err(e) = out.write_all(&line).await {
            error!("Failed to write event to stdout: {}", e);
            break;
        }
        written += 1;
    }
    if let Err(e) = out.flush().await {
        error!("Failed to flush stdout: {}", e);
    }
    written
}
