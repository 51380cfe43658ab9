// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 weft-mesh.dev

//! Async client for the directory protocol.
//!
//! Publisher, subscriber, and broker applications follow the same contract:
//! register, wait until the deployment is ready, look up who to connect to.
//! This client speaks the wire protocol of [`crate::wire`] against any
//! directory node; the node routes on the caller's behalf.

use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tracing::debug;

use crate::wire::{
    self, MessageKind, RegistrantInfo, Request, RequestBody, Response, ResponseBody, Role,
    RouteMode, Status, WireError,
};

/// Client error types.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("connection closed by directory node")]
    Closed,

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("response kind mismatch: expected {expected:?}, got {got:?}")]
    Mismatch {
        expected: MessageKind,
        got: MessageKind,
    },
}

/// A connection to one directory node.
pub struct DirectoryClient {
    stream: TcpStream,
    correlation: u64,
}

impl DirectoryClient {
    /// Connect to a directory node's server endpoint (`host:port`).
    pub async fn connect(endpoint: &str) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(endpoint)
            .await
            .map_err(|e| ClientError::Connect(e.to_string()))?;
        stream.set_nodelay(true).ok();
        debug!(endpoint, "connected to directory node");
        Ok(Self {
            stream,
            correlation: 0,
        })
    }

    /// Register under `role` with the given endpoint identity and topics.
    ///
    /// Publishers advertise the topics they produce, subscribers the topics
    /// they consume, and the broker registers as [`Role::Both`].
    pub async fn register(
        &mut self,
        role: Role,
        info: RegistrantInfo,
        topics: Vec<String>,
    ) -> Result<(), ClientError> {
        let response = self
            .call(RequestBody::Register { role, info, topics })
            .await?;
        match response.status {
            Status::Success => Ok(()),
            _ => Err(ClientError::Rejected(reason_of(response))),
        }
    }

    /// Whether the deployment has reached its expected registrations.
    pub async fn is_ready(&mut self) -> Result<bool, ClientError> {
        let response = self.call(RequestBody::IsReady).await?;
        match response.body {
            ResponseBody::IsReady(snapshot) => Ok(snapshot.ready),
            other => Err(ClientError::Mismatch {
                expected: MessageKind::IsReady,
                got: other.kind(),
            }),
        }
    }

    /// Poll [`Self::is_ready`] every `poll` until it reports `true` or
    /// `deadline` elapses. Returns the final readiness observation.
    pub async fn wait_ready(
        &mut self,
        poll: Duration,
        deadline: Duration,
    ) -> Result<bool, ClientError> {
        let started = tokio::time::Instant::now();
        loop {
            if self.is_ready().await? {
                return Ok(true);
            }
            if started.elapsed() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Publishers of any of `topics`; under broker dissemination, the
    /// broker endpoint instead.
    pub async fn lookup_by_topic(
        &mut self,
        topics: Vec<String>,
    ) -> Result<Vec<RegistrantInfo>, ClientError> {
        let response = self.call(RequestBody::LookupByTopic { topics }).await?;
        if response.status != Status::Success {
            return Err(ClientError::Rejected(reason_of(response)));
        }
        match response.body {
            ResponseBody::LookupByTopic { matches } => Ok(matches),
            other => Err(ClientError::Mismatch {
                expected: MessageKind::LookupByTopic,
                got: other.kind(),
            }),
        }
    }

    /// Every publisher in the deployment. Broker dissemination only.
    pub async fn lookup_all(&mut self) -> Result<Vec<RegistrantInfo>, ClientError> {
        let response = self.call(RequestBody::LookupAll).await?;
        if response.status != Status::Success {
            return Err(ClientError::Rejected(reason_of(response)));
        }
        match response.body {
            ResponseBody::LookupAll { publishers } => Ok(publishers),
            other => Err(ClientError::Mismatch {
                expected: MessageKind::LookupAll,
                got: other.kind(),
            }),
        }
    }

    async fn call(&mut self, body: RequestBody) -> Result<Response, ClientError> {
        self.correlation += 1;
        let request = Request {
            correlation: self.correlation,
            route: RouteMode::Initial,
            key: None,
            body,
        };

        let frame = wire::encode_request(&request)?;
        wire::write_frame(&mut self.stream, &frame).await?;

        let frame = wire::read_frame(&mut self.stream)
            .await?
            .ok_or(ClientError::Closed)?;
        let response = wire::decode_response(&frame)?;
        if response.correlation != request.correlation {
            return Err(ClientError::Rejected(format!(
                "correlation mismatch: sent {}, got {}",
                request.correlation, response.correlation
            )));
        }
        Ok(response)
    }
}

fn reason_of(response: Response) -> String {
    response
        .reason
        .unwrap_or_else(|| "no reason given".to_string())
}
