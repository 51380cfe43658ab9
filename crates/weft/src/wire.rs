// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 weft-mesh.dev

//! Directory protocol wire format.
//!
//! Length-prefixed binary protocol shared by clients, directory nodes, and
//! inter-node forwards. The body is a one-byte schema version followed by
//! the bincode encoding of the envelope.
//!
//! Wire format:
//! ```text
//! +----------------+-------------+------------------+
//! | Length (4B BE) | Version (1B)| bincode envelope |
//! +----------------+-------------+------------------+
//! ```
//!
//! Requests carry a message kind (the [`RequestBody`] discriminant), a
//! routing mode, an optional 48-bit key, and a correlation id echoed by the
//! eventual response. Responses carry the matching kind, a status, and an
//! optional reason string.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::hash::RingKey;

/// Wire schema version. Bumped on any incompatible envelope change.
pub const WIRE_VERSION: u8 = 1;

/// Hard cap on a single frame (version byte included).
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// The closed set of directory operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    Register,
    IsReady,
    LookupByTopic,
    LookupAll,
}

/// How far along the ring a request has travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteMode {
    /// Fresh from a client; the receiving node owns the fan-out.
    Initial,
    /// In flight; the receiver must continue the closest-preceding search.
    ForwardPred,
    /// In flight; the receiver is the terminal handler.
    ForwardSucc,
}

/// Registrant roles. `Both` is the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Publisher,
    Subscriber,
    Both,
}

/// Endpoint identity of a registrant, as returned by lookups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistrantInfo {
    pub id: String,
    pub addr: String,
    pub port: u16,
}

/// Request payloads, one variant per operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestBody {
    Register {
        role: Role,
        info: RegistrantInfo,
        topics: Vec<String>,
    },
    IsReady,
    LookupByTopic {
        topics: Vec<String>,
    },
    LookupAll,
}

impl RequestBody {
    /// The message kind this payload belongs to.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Register { .. } => MessageKind::Register,
            Self::IsReady => MessageKind::IsReady,
            Self::LookupByTopic { .. } => MessageKind::LookupByTopic,
            Self::LookupAll => MessageKind::LookupAll,
        }
    }
}

/// A request envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Echoed verbatim in the response on the same connection.
    pub correlation: u64,
    pub route: RouteMode,
    /// Ring key the request is routed by; `None` for broadcast probes.
    pub key: Option<RingKey>,
    pub body: RequestBody,
}

/// Response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Success,
    Failure,
    Unknown,
}

/// A node's readiness report.
///
/// `ready` is the client-facing answer. The counter fields are the local
/// snapshot that cross-node aggregation sums; on an aggregated response they
/// hold the deployment-wide sums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadySnapshot {
    pub ready: bool,
    pub pubs: u32,
    pub subs: u32,
    pub broker: bool,
}

/// Response payloads, matching [`RequestBody`] variant for variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseBody {
    Register,
    IsReady(ReadySnapshot),
    LookupByTopic { matches: Vec<RegistrantInfo> },
    LookupAll { publishers: Vec<RegistrantInfo> },
}

impl ResponseBody {
    /// The message kind this payload belongs to.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Register => MessageKind::Register,
            Self::IsReady(_) => MessageKind::IsReady,
            Self::LookupByTopic { .. } => MessageKind::LookupByTopic,
            Self::LookupAll { .. } => MessageKind::LookupAll,
        }
    }

    /// Empty payload of the given kind, used for failure responses.
    pub fn empty(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Register => Self::Register,
            MessageKind::IsReady => Self::IsReady(ReadySnapshot {
                ready: false,
                pubs: 0,
                subs: 0,
                broker: false,
            }),
            MessageKind::LookupByTopic => Self::LookupByTopic {
                matches: Vec::new(),
            },
            MessageKind::LookupAll => Self::LookupAll {
                publishers: Vec::new(),
            },
        }
    }
}

/// A response envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub correlation: u64,
    pub status: Status,
    pub reason: Option<String>,
    pub body: ResponseBody,
}

impl Response {
    pub fn success(correlation: u64, body: ResponseBody) -> Self {
        Self {
            correlation,
            status: Status::Success,
            reason: None,
            body,
        }
    }

    pub fn failure(correlation: u64, kind: MessageKind, reason: impl Into<String>) -> Self {
        Self {
            correlation,
            status: Status::Failure,
            reason: Some(reason.into()),
            body: ResponseBody::empty(kind),
        }
    }
}

/// Wire errors. All of these reset the offending connection.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("unsupported wire version {0}")]
    Version(u8),

    #[error("frame of {0} bytes exceeds the {MAX_FRAME_LEN}-byte limit")]
    FrameTooLarge(usize),

    #[error("empty frame")]
    EmptyFrame,

    #[error("malformed frame: {0}")]
    Encoding(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Encode a request into a version-prefixed frame.
pub fn encode_request(request: &Request) -> Result<Vec<u8>, WireError> {
    encode(request)
}

/// Decode a request from a version-prefixed frame.
pub fn decode_request(frame: &[u8]) -> Result<Request, WireError> {
    decode(frame)
}

/// Encode a response into a version-prefixed frame.
pub fn encode_response(response: &Response) -> Result<Vec<u8>, WireError> {
    encode(response)
}

/// Decode a response from a version-prefixed frame.
pub fn decode_response(frame: &[u8]) -> Result<Response, WireError> {
    decode(frame)
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, WireError> {
    let body =
        bincode::serialize(value).map_err(|e| WireError::Encoding(e.to_string()))?;
    let mut frame = Vec::with_capacity(body.len() + 1);
    frame.push(WIRE_VERSION);
    frame.extend_from_slice(&body);
    if frame.len() > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(frame.len()));
    }
    Ok(frame)
}

fn decode<T: DeserializeOwned>(frame: &[u8]) -> Result<T, WireError> {
    let (&version, body) = frame.split_first().ok_or(WireError::EmptyFrame)?;
    if version != WIRE_VERSION {
        return Err(WireError::Version(version));
    }
    bincode::deserialize(body).map_err(|e| WireError::Encoding(e.to_string()))
}

/// Read one length-prefixed frame.
///
/// Returns `Ok(None)` if the connection closed cleanly at a frame boundary.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 {
        return Err(WireError::EmptyFrame);
    }
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(len));
    }

    let mut frame = vec![0u8; len];
    reader.read_exact(&mut frame).await?;
    Ok(Some(frame))
}

/// Write one length-prefixed frame.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    if frame.len() > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(frame.len()));
    }
    writer.write_all(&(frame.len() as u32).to_be_bytes()).await?;
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}
