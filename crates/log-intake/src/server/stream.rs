// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Accept loop shared by the connection oriented transports (TCP, Unix sockets).

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

#[cfg(unix)]
use {
    super::unix::SocketCleanupGuard,
    tokio::net::{UnixListener, UnixStream},
};

use crate::error::ConnectionError;
use crate::handler::{ConnectionHandler, HandlerFactory};
use crate::metadata::Peer;

// Pause after an unexpected accept error (e.g. out of file descriptors) so the
// loop does not spin while the condition lasts
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

pub(crate) enum StreamListener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix {
        listener: UnixListener,
        cleanup: SocketCleanupGuard,
    },
}

enum Connection {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl StreamListener {
    async fn accept(&self) -> io::Result<(Connection, Peer)> {
        match self {
            Self::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                Ok((Connection::Tcp(stream), Peer::Socket(addr)))
            }
            #[cfg(unix)]
            Self::Unix { listener, .. } => {
                let (stream, _addr) = listener.accept().await?;
                Ok((Connection::Unix(stream), Peer::Unnamed))
            }
        }
    }

    /// Closes the listening socket. The returned guard removes the socket file
    /// when dropped.
    #[cfg(unix)]
    fn close(self) -> Option<SocketCleanupGuard> {
        match self {
            Self::Tcp(_) => None,
            Self::Unix { cleanup, .. } => Some(cleanup),
        }
    }

    #[cfg(not(unix))]
    fn close(self) -> Option<()> {
        None
    }
}

impl Connection {
    async fn handle(self, handler: ConnectionHandler) -> Result<(), ConnectionError> {
        match self {
            Self::Tcp(stream) => handler.run(stream).await,
            #[cfg(unix)]
            Self::Unix(stream) => handler.run(stream).await,
        }
    }
}

pub(crate) struct StreamOptions {
    pub timeout: Duration,
    pub max_connections: Option<usize>,
}

/// Accepts connections until `cancel` fires, then closes the listener and waits for
/// every connection task to finish.
pub(crate) async fn serve(
    listener: StreamListener,
    factory: HandlerFactory,
    options: StreamOptions,
    cancel: CancellationToken,
) {
    let family = factory.family();
    let limiter = options.max_connections.map(|n| Arc::new(Semaphore::new(n)));
    let mut connections = JoinSet::new();

    loop {
        let permit = match &limiter {
            Some(limiter) => tokio::select! {
                _ = cancel.cancelled() => break,
                permit = Arc::clone(limiter).acquire_owned() => match permit {
                    Ok(permit) => Some(permit),
                    // The semaphore is never closed
                    Err(_) => break,
                },
            },
            None => None,
        };

        let (connection, peer) = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionAborted
                            | io::ErrorKind::ConnectionReset
                            | io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    debug!("Connection dropped before accept on {}: {}", family, e);
                    continue;
                }
                Err(e) => {
                    error!("Failed to accept {} connection: {}", family, e);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => continue,
                    }
                }
            },
            finished = async {
                match connections.join_next().await {
                    Some(finished) => finished,
                    None => std::future::pending().await,
                }
            } => {
                if let Err(e) = finished {
                    if e.is_panic() {
                        // Don't kill the server on panic - log and continue
                        error!("Connection handler panicked: {:?}", e);
                    }
                }
                continue;
            },
        };

        let handler = factory.connection(&peer, options.timeout);
        debug!("Accepted connection from {}", handler.metadata());
        let cancel = cancel.clone();
        connections.spawn(async move {
            let _permit = permit;
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Closing {} connection from {} on shutdown", family, peer);
                }
                result = connection.handle(handler) => {
                    if let Err(e) = result {
                        log_connection_error(&peer, &e);
                    }
                }
            }
        });
    }

    // Close the listener first so no new connection is queued while draining
    let _cleanup = listener.close();
    debug!(
        "Waiting for {} {} connection(s) to finish",
        connections.len(),
        family
    );
    while let Some(finished) = connections.join_next().await {
        if let Err(e) = finished {
            if e.is_panic() {
                error!("Connection handler panicked: {:?}", e);
            }
        }
    }
}

fn log_connection_error(peer: &Peer, error: &ConnectionError) {
    match error {
        ConnectionError::Timeout(_) => {
            debug!("Closing idle connection from {}: {}", peer, error);
        }
        ConnectionError::MessageTooLarge { .. } => {
            warn!("Closing connection from {}, dropping message: {}", peer, error);
        }
        ConnectionError::Io(_) => {
            warn!("Closing connection from {} after read error: {}", peer, error);
        }
    }
}
