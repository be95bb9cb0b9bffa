// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use crate::metadata::Family;

/// Errors raised while building or validating a [`crate::config::Config`].
///
/// These are always returned before any transport resource is touched.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("line delimiter cannot be empty")]
    EmptyDelimiter,

    #[error("max message size must be greater than 0")]
    InvalidMaxMessageSize,

    #[error("read timeout must be greater than 0")]
    InvalidTimeout,

    #[error("max connections must be greater than 0 when set")]
    InvalidMaxConnections,

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("handler factory is for {factory} but the transport is {transport}")]
    FamilyMismatch { factory: Family, transport: Family },

    #[error("Invalid value for {name}: {reason}")]
    InvalidEnv { name: &'static str, reason: String },
}

/// Errors surfaced by the [`crate::server::Server`] lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server already started")]
    AlreadyStarted,

    #[error("Server was stopped and cannot be restarted")]
    Stopped,
}

/// Errors local to a single connection or datagram.
///
/// A connection failing with one of these is closed. Nothing is reported to the
/// caller of `Server::start` or `Server::stop`.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("message exceeds max message size of {limit} bytes ({buffered} bytes buffered without a delimiter)")]
    MessageTooLarge { limit: usize, buffered: usize },

    #[error("no data received for {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
