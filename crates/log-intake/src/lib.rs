// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Delimiter framed log intake.
//!
//! Listens on TCP, a Unix domain socket or UDP, cuts the incoming byte stream into
//! messages on a configurable delimiter and hands every message, together with the
//! sender's network metadata, to a [`MessageSink`].
//!
//! ```no_run
//! use log_intake::{Config, HandlerFactory, Message, Server};
//! use tokio::sync::mpsc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::tcp("127.0.0.1", 9000).with_delimiter(b";".to_vec());
//! let (tx, mut rx) = mpsc::channel::<Message>(1024);
//!
//! let factory = HandlerFactory::for_config(&config, tx)?;
//! let mut server = Server::new(config, factory)?;
//! server.start().await?;
//!
//! while let Some(message) = rx.recv().await {
//!     println!("{}: {:?}", message.metadata, message.payload);
//! }
//! server.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod handler;
pub mod metadata;
pub mod server;
pub mod sink;
pub mod split;

pub use config::{Config, TransportConfig};
pub use error::{ConfigError, ConnectionError, ServerError};
pub use handler::{ConnectionHandler, HandlerFactory};
pub use metadata::{Family, NetworkMetadata, Peer};
pub use server::{LocalAddr, Server, ServerState};
pub use sink::{Message, MessageSink};
pub use split::{DelimiterCodec, DelimiterSplitter, Split};
