// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Network metadata attached to every delivered message.
//!
//! Each transport family knows how to describe where a message came from. TCP and
//! UDP report the remote socket address. Unix domain socket peers are unnamed, so
//! their metadata only carries the family tag.

use std::fmt;
use std::net::SocketAddr;

/// The transport kind a server listens on.
///
/// This is the only polymorphic axis the server depends on: it selects the bind
/// strategy, whether connections are accepted or datagrams received, and which
/// metadata is extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    /// Stream transport over TCP
    Tcp,
    /// Stream transport over a Unix domain socket
    Unix,
    /// Datagram transport over UDP
    Udp,
}

impl Family {
    /// Derives the metadata for a message received from `peer`.
    #[must_use]
    pub fn metadata(self, peer: &Peer) -> NetworkMetadata {
        let remote_addr = match (self, peer) {
            (Family::Tcp | Family::Udp, Peer::Socket(addr)) => Some(*addr),
            // Unix peers have no addressable endpoint
            (Family::Unix, _) | (_, Peer::Unnamed) => None,
        };
        NetworkMetadata {
            family: self,
            remote_addr,
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Unix => write!(f, "unix"),
            Self::Udp => write!(f, "udp"),
        }
    }
}

/// Where a connection or datagram came from, as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Peer {
    /// Peer with a socket address (TCP, UDP)
    Socket(SocketAddr),
    /// Peer without an address (Unix domain sockets)
    Unnamed,
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Socket(addr) => write!(f, "{}", addr),
            Self::Unnamed => write!(f, "unnamed peer"),
        }
    }
}

/// Immutable description of the origin of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkMetadata {
    /// Transport family the message arrived on
    pub family: Family,
    /// Remote endpoint, absent for Unix domain sockets
    pub remote_addr: Option<SocketAddr>,
}

impl fmt::Display for NetworkMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.remote_addr {
            Some(addr) => write!(f, "{}://{}", self.family, addr),
            None => write!(f, "{}", self.family),
        }
    }
}
