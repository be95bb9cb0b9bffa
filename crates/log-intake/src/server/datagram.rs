// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::handler::HandlerFactory;
use crate::metadata::Peer;

// Largest possible UDP payload, so a datagram is never truncated by the read
const MAX_DATAGRAM_SIZE: usize = 65_536;

/// Receives datagrams until `cancel` fires. Each datagram is framed on its own.
pub(crate) async fn serve(socket: UdpSocket, factory: HandlerFactory, cancel: CancellationToken) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        let (len, src) = tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(e) => {
                    // e.g. ICMP port unreachable surfacing on some platforms
                    warn!("Failed to receive datagram: {}", e);
                    continue;
                }
            },
        };

        let peer = Peer::Socket(src);
        tokio::select! {
            _ = cancel.cancelled() => break,
            delivered = factory.handle_datagram(&buf[..len], &peer) => {
                trace!("Delivered {} message(s) from {} byte datagram sent by {}", delivered, len, peer);
            }
        }
    }

    debug!("Datagram reader stopped");
}
