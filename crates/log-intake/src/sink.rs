// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Downstream consumers of framed messages.
//!
//! A sink is called from the task that owns the connection, so a sink that applies
//! backpressure slows down only that connection. Sinks are shared by every connection
//! of a server and must be safe to call concurrently.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

use crate::metadata::NetworkMetadata;

/// A framed message and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub payload: Bytes,
    pub metadata: NetworkMetadata,
}

/// Receives every message produced by a server.
///
/// Ownership of the payload moves into the sink; the server keeps no reference to
/// it. Failures are the sink's own business and are never reported back to the
/// connection that produced the message.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn deliver(&self, payload: Bytes, metadata: NetworkMetadata);
}

#[async_trait]
impl<F> MessageSink for F
where
    F: Fn(Bytes, NetworkMetadata) + Send + Sync,
{
    async fn deliver(&self, payload: Bytes, metadata: NetworkMetadata) {
        self(payload, metadata);
    }
}

/// Bounded channel: waits for capacity, which throttles the producing connection.
#[async_trait]
impl MessageSink for mpsc::Sender<Message> {
    async fn deliver(&self, payload: Bytes, metadata: NetworkMetadata) {
        if self.send(Message { payload, metadata }).await.is_err() {
            debug!("Message receiver dropped, discarding message from {}", metadata);
        }
    }
}

#[async_trait]
impl MessageSink for mpsc::UnboundedSender<Message> {
    async fn deliver(&self, payload: Bytes, metadata: NetworkMetadata) {
        if self.send(Message { payload, metadata }).is_err() {
            debug!("Message receiver dropped, discarding message from {}", metadata);
        }
    }
}
