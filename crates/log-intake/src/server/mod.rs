// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log intake server lifecycle.
//!
//! A [`Server`] goes through `Created -> Started -> Stopping -> Stopped`:
//!
//! - [`Server::new`] validates the configuration; nothing is bound yet.
//! - [`Server::start`] binds the transport and spawns the accept loop (TCP, Unix
//!   sockets) or the datagram reader (UDP). A bind failure leaves the server in
//!   `Created` so it can be started again.
//! - [`Server::stop`] cancels the loop, closes the transport, waits for every
//!   connection task to exit and, for Unix sockets, removes the socket file.
//!   Calling it again is a no-op.
//!
//! The transports form a closed set selected by [`crate::metadata::Family`]. Each
//! accepted stream connection runs in its own task, so a failing or slow connection
//! never affects the others.

mod datagram;
mod stream;
#[cfg(unix)]
pub mod unix;

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{Config, TransportConfig};
use crate::error::{ConfigError, ServerError};
use crate::handler::HandlerFactory;
use stream::{StreamListener, StreamOptions};

/// Lifecycle state of a [`Server`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    Started,
    Stopping,
    Stopped,
}

/// Address the server actually bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalAddr {
    Socket(SocketAddr),
    Unix(PathBuf),
}

impl fmt::Display for LocalAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Socket(addr) => write!(f, "{}", addr),
            Self::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

enum Listener {
    Stream(StreamListener),
    Datagram(UdpSocket),
}

impl Listener {
    async fn bind(transport: &TransportConfig) -> io::Result<(Self, LocalAddr)> {
        match transport {
            TransportConfig::Tcp { host, port, .. } => {
                let listener = TcpListener::bind((host.as_str(), *port)).await?;
                let local_addr = listener.local_addr()?;
                Ok((
                    Self::Stream(StreamListener::Tcp(listener)),
                    LocalAddr::Socket(local_addr),
                ))
            }
            TransportConfig::Udp { host, port } => {
                let socket = UdpSocket::bind((host.as_str(), *port)).await?;
                let local_addr = socket.local_addr()?;
                Ok((Self::Datagram(socket), LocalAddr::Socket(local_addr)))
            }
            #[cfg(unix)]
            TransportConfig::Unix {
                path, permissions, ..
            } => {
                let (listener, cleanup) = unix::bind(path, *permissions).await?;
                Ok((
                    Self::Stream(StreamListener::Unix { listener, cleanup }),
                    LocalAddr::Unix(path.clone()),
                ))
            }
            #[cfg(not(unix))]
            TransportConfig::Unix { .. } => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "Unix Domain Sockets are only supported on Unix platforms",
            )),
        }
    }
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    local_addr: LocalAddr,
}

/// Receives log messages on one transport and hands them to a sink.
pub struct Server {
    config: Config,
    factory: HandlerFactory,
    state: ServerState,
    running: Option<Running>,
}

impl Server {
    /// Creates a server without binding anything.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` is invalid or `factory` was built for
    /// a different transport family.
    pub fn new(config: Config, factory: HandlerFactory) -> Result<Self, ServerError> {
        config.validate()?;

        let transport = config.transport.family();
        if factory.family() != transport {
            return Err(ConfigError::FamilyMismatch {
                factory: factory.family(),
                transport,
            }
            .into());
        }

        Ok(Self {
            config,
            factory,
            state: ServerState::Created,
            running: None,
        })
    }

    #[must_use]
    pub fn state(&self) -> ServerState {
        self.state
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The bound address while the server is running.
    #[must_use]
    pub fn local_addr(&self) -> Option<&LocalAddr> {
        self.running.as_ref().map(|running| &running.local_addr)
    }

    /// Binds the transport and starts serving in the background.
    ///
    /// # Errors
    ///
    /// Returns an error if the server was already started or stopped, or if the
    /// transport cannot be bound. After a bind error the server can be started again.
    pub async fn start(&mut self) -> Result<(), ServerError> {
        match self.state {
            ServerState::Created => {}
            ServerState::Started | ServerState::Stopping => {
                return Err(ServerError::AlreadyStarted)
            }
            ServerState::Stopped => return Err(ServerError::Stopped),
        }

        let (listener, local_addr) = Listener::bind(&self.config.transport)
            .await
            .map_err(|source| ServerError::Bind {
                address: self.config.transport.address(),
                source,
            })?;

        let cancel = CancellationToken::new();
        let factory = self.factory.clone();
        let task = match listener {
            Listener::Stream(listener) => {
                let options = StreamOptions {
                    timeout: self.config.timeout,
                    max_connections: self.config.transport.max_connections(),
                };
                tokio::spawn(stream::serve(listener, factory, options, cancel.clone()))
            }
            Listener::Datagram(socket) => {
                tokio::spawn(datagram::serve(socket, factory, cancel.clone()))
            }
        };

        info!(
            "Log intake listening on {} ({})",
            local_addr,
            self.factory.family()
        );
        self.running = Some(Running {
            cancel,
            task,
            local_addr,
        });
        self.state = ServerState::Started;
        Ok(())
    }

    /// Stops the server and waits until every connection has been closed.
    ///
    /// Safe to call more than once, and before [`Server::start`].
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        self.state = ServerState::Stopping;
        running.cancel.cancel();
        if let Err(e) = running.task.await {
            error!("Log intake server task failed: {:?}", e);
        }
        self.state = ServerState::Stopped;
        info!("Log intake on {} stopped", running.local_addr);
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        // Connection tasks finish in the background when the server is not stopped
        if let Some(running) = &self.running {
            running.cancel.cancel();
        }
    }
}
