// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 weft-mesh.dev

//! Outbound connections to the other ring members.
//!
//! Every remote member gets one [`PeerClient`]. The socket lives in a
//! dedicated I/O task that serves exchanges one at a time, so replies on a
//! peer connection can never interleave. The task enforces the per-hop
//! deadline itself and drops the connection when it fires, which also
//! discards any reply that arrives late.

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use weft::hash::RingKey;
use weft::ring::{Member, Ring};
use weft::wire::{self, Request, Response, WireError};

/// Per-hop deadline for a forwarded or broadcast sub-request.
pub const T_HOP: Duration = Duration::from_secs(2);

/// Peer exchange errors. All absorbed into fan-out aggregates.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("peer {0} unreachable: {1}")]
    Unreachable(String, String),

    #[error("connection to peer {0} lost")]
    ConnectionLost(String),

    #[error("peer {0} exceeded the hop deadline")]
    HopTimeout(String),

    #[error(transparent)]
    Wire(#[from] WireError),
}

struct Command {
    request: Request,
    reply: oneshot::Sender<Result<Response, PeerError>>,
}

/// Handle to one remote ring member's server endpoint.
pub struct PeerClient {
    id: String,
    hash: RingKey,
    tx: mpsc::Sender<Command>,
}

impl PeerClient {
    /// Spawn the I/O task for `member`. The connection itself is opened
    /// lazily on the first exchange.
    pub fn spawn(member: &Member) -> Self {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(io_task(member.id.clone(), member.endpoint(), rx));
        Self {
            id: member.id.clone(),
            hash: member.hash,
            tx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn hash(&self) -> RingKey {
        self.hash
    }

    /// Send `request` and await the correlated reply. Bounded by [`T_HOP`]
    /// per queued exchange.
    pub async fn request(&self, request: Request) -> Result<Response, PeerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command {
                request,
                reply: reply_tx,
            })
            .await
            .map_err(|_| PeerError::ConnectionLost(self.id.clone()))?;
        reply_rx
            .await
            .map_err(|_| PeerError::ConnectionLost(self.id.clone()))?
    }
}

async fn io_task(peer: String, endpoint: String, mut rx: mpsc::Receiver<Command>) {
    let mut stream: Option<TcpStream> = None;
    while let Some(command) = rx.recv().await {
        let outcome =
            match tokio::time::timeout(T_HOP, exchange(&peer, &endpoint, &mut stream, &command.request))
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(PeerError::HopTimeout(peer.clone())),
            };
        if outcome.is_err() {
            // Drop the socket so a late or partial reply cannot
            // desynchronize the next exchange.
            stream = None;
        }
        let _ = command.reply.send(outcome);
    }
    debug!(%peer, "peer client stopped");
}

async fn exchange(
    peer: &str,
    endpoint: &str,
    stream: &mut Option<TcpStream>,
    request: &Request,
) -> Result<Response, PeerError> {
    if stream.is_none() {
        let connected = TcpStream::connect(endpoint)
            .await
            .map_err(|e| PeerError::Unreachable(peer.to_string(), e.to_string()))?;
        connected.set_nodelay(true).ok();
        debug!(peer, endpoint, "connected to ring member");
        *stream = Some(connected);
    }
    let Some(socket) = stream.as_mut() else {
        return Err(PeerError::ConnectionLost(peer.to_string()));
    };

    let frame = wire::encode_request(request)?;
    wire::write_frame(socket, &frame).await?;

    loop {
        let Some(frame) = wire::read_frame(socket).await? else {
            return Err(PeerError::ConnectionLost(peer.to_string()));
        };
        let response = wire::decode_response(&frame)?;
        if response.correlation == request.correlation {
            return Ok(response);
        }
        warn!(
            peer,
            correlation = response.correlation,
            "discarding stale reply"
        );
    }
}

/// One client per remote ring member, keyed by ring hash.
pub struct PeerSet {
    peers: HashMap<RingKey, PeerClient>,
}

impl PeerSet {
    /// Spawn a client for every remote member of `ring`.
    pub fn new(ring: &Ring) -> Self {
        let peers = ring
            .remote_members()
            .map(|member| (member.hash, PeerClient::spawn(member)))
            .collect();
        Self { peers }
    }

    pub fn get(&self, hash: RingKey) -> Option<&PeerClient> {
        self.peers.get(&hash)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
