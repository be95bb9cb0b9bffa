// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-connection processing.
//!
//! A [`HandlerFactory`] binds a splitter, the metadata extraction of a transport
//! family and a sink together. The server only asks it for a [`ConnectionHandler`]
//! per accepted connection, or hands it datagrams, without knowing anything about
//! delimiters or where messages end up.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::codec::Decoder;
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::error::{ConfigError, ConnectionError};
use crate::metadata::{Family, NetworkMetadata, Peer};
use crate::sink::MessageSink;
use crate::split::{DelimiterCodec, DelimiterSplitter, Split};

// Initial capacity reserved before each read on a stream connection
const READ_BUFFER_SIZE: usize = 8192;

/// Builds handlers for one transport family.
#[derive(Clone)]
pub struct HandlerFactory {
    family: Family,
    splitter: DelimiterSplitter,
    sink: Arc<dyn MessageSink>,
}

impl std::fmt::Debug for HandlerFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerFactory")
            .field("family", &self.family)
            .field("splitter", &self.splitter)
            .finish_non_exhaustive()
    }
}

impl HandlerFactory {
    pub fn new(
        family: Family,
        splitter: DelimiterSplitter,
        sink: impl MessageSink + 'static,
    ) -> Self {
        Self {
            family,
            splitter,
            sink: Arc::new(sink),
        }
    }

    /// Creates a factory for the transport, delimiter and size limit of `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the delimiter is empty or the size limit is 0.
    pub fn for_config(
        config: &Config,
        sink: impl MessageSink + 'static,
    ) -> Result<Self, ConfigError> {
        let splitter = DelimiterSplitter::new(config.delimiter.clone(), config.max_message_size)?;
        Ok(Self::new(config.transport.family(), splitter, sink))
    }

    #[must_use]
    pub fn family(&self) -> Family {
        self.family
    }

    #[must_use]
    pub fn splitter(&self) -> &DelimiterSplitter {
        &self.splitter
    }

    /// Creates the handler for a newly accepted stream connection.
    #[must_use]
    pub fn connection(&self, peer: &Peer, timeout: Duration) -> ConnectionHandler {
        ConnectionHandler {
            codec: DelimiterCodec::new(self.splitter.clone()),
            metadata: self.family.metadata(peer),
            sink: Arc::clone(&self.sink),
            timeout,
        }
    }

    /// Frames a single datagram and delivers its messages.
    ///
    /// The end of the datagram is the end of input, so a trailing message without a
    /// delimiter is delivered too. Datagrams never share state. Returns the number of
    /// delivered messages.
    pub async fn handle_datagram(&self, packet: &[u8], peer: &Peer) -> usize {
        let metadata = self.family.metadata(peer);
        let mut remaining = packet;
        let mut delivered = 0;

        while !remaining.is_empty() {
            match self.splitter.split(remaining, true) {
                Split::Token { advance, len } => {
                    if len > 0 {
                        let payload = Bytes::copy_from_slice(&remaining[..len]);
                        self.sink.deliver(payload, metadata).await;
                        delivered += 1;
                    }
                    remaining = &remaining[advance..];
                }
                Split::TooLarge { buffered } => {
                    warn!(
                        "Dropping datagram message from {}: {} bytes exceed max message size of {}",
                        peer,
                        buffered,
                        self.splitter.max_message_size()
                    );
                    break;
                }
                Split::NeedMore => break,
            }
        }

        delivered
    }
}

/// Reads one stream connection until it ends, fails or times out.
pub struct ConnectionHandler {
    codec: DelimiterCodec,
    metadata: NetworkMetadata,
    sink: Arc<dyn MessageSink>,
    timeout: Duration,
}

impl ConnectionHandler {
    #[must_use]
    pub fn metadata(&self) -> NetworkMetadata {
        self.metadata
    }

    /// Runs the read loop against `stream`.
    ///
    /// Messages are delivered in the order their delimiters appear. Bytes of an
    /// incomplete message are dropped when the connection fails.
    ///
    /// # Errors
    ///
    /// Returns an error if a read fails, no data arrives within the read timeout, or a
    /// message exceeds the max message size. The connection should be closed in all
    /// cases.
    pub async fn run<S>(mut self, mut stream: S) -> Result<(), ConnectionError>
    where
        S: AsyncRead + Unpin,
    {
        let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
        loop {
            while let Some(message) = self.codec.decode(&mut buf)? {
                self.emit(message).await;
            }

            buf.reserve(READ_BUFFER_SIZE);
            let read = tokio::time::timeout(self.timeout, stream.read_buf(&mut buf))
                .await
                .map_err(|_| ConnectionError::Timeout(self.timeout))??;
            trace!("Read {} bytes from {}", read, self.metadata);

            if read == 0 {
                while let Some(message) = self.codec.decode_eof(&mut buf)? {
                    self.emit(message).await;
                }
                debug!("Connection from {} closed by peer", self.metadata);
                return Ok(());
            }
        }
    }

    async fn emit(&self, message: Bytes) {
        if message.is_empty() {
            return;
        }
        self.sink.deliver(message, self.metadata).await;
    }
}
