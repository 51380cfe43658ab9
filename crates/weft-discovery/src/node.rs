// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 weft-mesh.dev

//! Directory node runtime.
//!
//! One node serves a single TCP endpoint; client requests and inter-node
//! forwards arrive there indistinguishably and the envelope's routing mode
//! tells them apart. Requests on a connection are processed strictly in
//! arrival order, so responses never overtake each other on an endpoint.
//!
//! An `Initial` request makes this node the fan-out owner: registrations
//! split into one routed sub-request per (topic, id) pair, while readiness
//! probes and lookups broadcast to every ring member. Forwarded requests
//! are either handled here (key in range) or passed along the finger table.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use weft::hash::{self, RingKey};
use weft::registry::{Dissemination, NodeState, Refusal, Registry};
use weft::ring::{FingerTable, Ring};
use weft::route::{self, RouteDecision};
use weft::wire::{
    self, MessageKind, ReadySnapshot, RegistrantInfo, Request, RequestBody, Response,
    ResponseBody, Role, RouteMode, Status, WireError,
};

use crate::config::NodeConfig;

pub mod peers;

pub use peers::{PeerClient, PeerError, PeerSet, T_HOP};

/// Overall deadline for a global readiness aggregation.
pub const T_READY: Duration = Duration::from_secs(5);

/// Malformed frames tolerated before the node gives up with exit code 2.
const MAX_PROTOCOL_VIOLATIONS: u32 = 8;

/// Node runtime errors.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("bind error: {0}")]
    Bind(String),

    #[error("node already running")]
    AlreadyRunning,

    #[error("repeated protocol violations")]
    ProtocolViolations,
}

/// One member of the discovery ring.
#[derive(Clone)]
pub struct DirectoryNode {
    config: Arc<NodeConfig>,
    ring: Arc<Ring>,
    fingers: Arc<FingerTable>,
    registry: Arc<RwLock<Registry>>,
    peers: Arc<PeerSet>,
    correlation: Arc<AtomicU64>,
    violations: Arc<AtomicU32>,
    shutdown: Arc<tokio::sync::Notify>,
    running: Arc<AtomicBool>,
}

impl DirectoryNode {
    /// Build a node over an already-validated ring. Spawns the peer I/O
    /// tasks; the server endpoint is bound by [`Self::run`].
    pub fn new(config: NodeConfig, ring: Ring) -> Self {
        let fingers = FingerTable::build(&ring);
        let mut registry = Registry::new(
            config.dissemination,
            config.expected_pubs,
            config.expected_subs,
        );
        registry.mark_configured();
        let peers = PeerSet::new(&ring);

        Self {
            config: Arc::new(config),
            ring: Arc::new(ring),
            fingers: Arc::new(fingers),
            registry: Arc::new(RwLock::new(registry)),
            peers: Arc::new(peers),
            correlation: Arc::new(AtomicU64::new(0)),
            violations: Arc::new(AtomicU32::new(0)),
            shutdown: Arc::new(tokio::sync::Notify::new()),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The ring this node is a member of.
    pub fn ring(&self) -> &Ring {
        &self.ring
    }

    /// Whether the server loop is active.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Debug dump of identity, ring position, and finger targets.
    pub fn log_topology(&self) {
        let local = self.ring.local();
        debug!(
            id = %local.id,
            hash = %format_args!("{:#014x}", local.hash),
            members = self.ring.len(),
            "ring position"
        );
        let mut last = None;
        for (i, &target) in self.fingers.entries().iter().enumerate() {
            if last != Some(target) {
                debug!(finger = i, target = %format_args!("{:#014x}", target), "finger target");
                last = Some(target);
            }
        }
    }

    /// Bind the server endpoint and serve until shutdown.
    pub async fn run(&self) -> Result<(), NodeError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(NodeError::AlreadyRunning);
        }

        let endpoint = self.config.bind_endpoint();
        let listener = TcpListener::bind(&endpoint)
            .await
            .map_err(|e| NodeError::Bind(e.to_string()))?;
        self.registry.write().await.mark_bound();
        info!(%endpoint, members = self.ring.len(), "directory node listening");

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            debug!(%peer_addr, "inbound connection");
                            let node = self.clone();
                            tokio::spawn(async move {
                                node.handle_connection(stream, peer_addr).await;
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "accept error");
                        }
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        if self.violations.load(Ordering::SeqCst) >= MAX_PROTOCOL_VIOLATIONS {
            return Err(NodeError::ProtocolViolations);
        }
        Ok(())
    }

    /// Signal the node to shut down.
    pub async fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    /// Serve one inbound connection. Requests are processed sequentially;
    /// a malformed frame resets the connection.
    async fn handle_connection(&self, mut stream: TcpStream, peer_addr: SocketAddr) {
        loop {
            tokio::select! {
                result = wire::read_frame(&mut stream) => {
                    let frame = match result {
                        Ok(Some(frame)) => frame,
                        Ok(None) => {
                            debug!(%peer_addr, "connection closed");
                            break;
                        }
                        Err(e) => {
                            self.record_violation(peer_addr, &e);
                            break;
                        }
                    };

                    let request = match wire::decode_request(&frame) {
                        Ok(request) => request,
                        Err(e) => {
                            self.record_violation(peer_addr, &e);
                            break;
                        }
                    };

                    let response = self.dispatch(request).await;
                    let frame = match wire::encode_response(&response) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(%peer_addr, error = %e, "failed to encode response");
                            break;
                        }
                    };
                    if let Err(e) = wire::write_frame(&mut stream, &frame).await {
                        debug!(%peer_addr, error = %e, "failed to write response");
                        break;
                    }
                }
                _ = self.shutdown.notified() => {
                    debug!(%peer_addr, "connection handler shutting down");
                    break;
                }
            }
        }
    }

    fn record_violation(&self, peer_addr: SocketAddr, error: &WireError) {
        if let WireError::Io(e) = error {
            debug!(%peer_addr, error = %e, "read error");
            return;
        }
        let count = self.violations.fetch_add(1, Ordering::SeqCst) + 1;
        warn!(%peer_addr, error = %error, count, "protocol violation, resetting connection");
        if count >= MAX_PROTOCOL_VIOLATIONS {
            error!("protocol violation limit reached, shutting down");
            self.shutdown.notify_waiters();
        }
    }

    /// Decision point for every inbound request.
    async fn dispatch(&self, request: Request) -> Response {
        match request.route {
            RouteMode::Initial => self.handle_initial(request).await,
            RouteMode::ForwardPred | RouteMode::ForwardSucc => {
                self.handle_forwarded(request).await
            }
        }
    }

    /// A request already in flight around the ring.
    async fn handle_forwarded(&self, request: Request) -> Response {
        let Some(key) = request.key else {
            // Broadcast probe: the receiver is the terminal handler.
            return self.handle_local(request).await;
        };

        match route::decide(&self.ring, &self.fingers, key) {
            RouteDecision::Local => self.handle_local(request).await,
            RouteDecision::Forward { target, mode } => {
                if request.route == RouteMode::ForwardSucc {
                    // The previous hop tagged us terminal for a key we do
                    // not own; keep routing rather than mis-handle it.
                    debug!(key = %format_args!("{:#014x}", key), "re-routing successor-tagged request");
                }
                self.forward(request, target, mode).await
            }
        }
    }

    /// Send `request` one hop along the ring and relay the reply back,
    /// re-correlated to the inbound envelope.
    async fn forward(&self, request: Request, target: RingKey, mode: RouteMode) -> Response {
        let inbound = request.correlation;
        let kind = request.body.kind();
        let Some(peer) = self.peers.get(target) else {
            // Cannot happen with a validated static manifest.
            return Response::failure(inbound, kind, "no route to finger");
        };

        let outbound = Request {
            correlation: self.next_correlation(),
            route: mode,
            key: request.key,
            body: request.body,
        };
        match peer.request(outbound).await {
            Ok(mut response) => {
                response.correlation = inbound;
                response
            }
            Err(e) => Response::failure(inbound, kind, e.to_string()),
        }
    }

    /// Route one keyed sub-request issued by this node as fan-out owner.
    async fn route_sub(&self, key: RingKey, body: RequestBody) -> Response {
        let request = Request {
            correlation: self.next_correlation(),
            route: RouteMode::ForwardPred,
            key: Some(key),
            body,
        };
        self.handle_forwarded(request).await
    }

    /// Send a terminal probe straight to the member at `target`.
    async fn probe(&self, target: RingKey, body: RequestBody) -> Result<ResponseBody, String> {
        let Some(peer) = self.peers.get(target) else {
            return Err("no route to member".into());
        };
        let request = Request {
            correlation: self.next_correlation(),
            route: RouteMode::ForwardSucc,
            key: None,
            body,
        };
        match peer.request(request).await {
            Ok(response) if response.status == Status::Success => Ok(response.body),
            Ok(response) => Err(response
                .reason
                .unwrap_or_else(|| "sub-request failed".to_string())),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Requests fresh from a client: this node owns the fan-out.
    async fn handle_initial(&self, request: Request) -> Response {
        let correlation = request.correlation;
        match request.body {
            RequestBody::Register { role, info, topics } => {
                self.initial_register(correlation, role, info, topics).await
            }
            RequestBody::IsReady => self.initial_is_ready(correlation).await,
            RequestBody::LookupByTopic { topics } => {
                self.initial_lookup(correlation, topics).await
            }
            RequestBody::LookupAll => self.initial_lookup_all(correlation).await,
        }
    }

    /// Fan a registration out into one routed sub-request per (topic, id)
    /// pair; brokers route once by the broker key.
    async fn initial_register(
        &self,
        correlation: u64,
        role: Role,
        info: RegistrantInfo,
        topics: Vec<String>,
    ) -> Response {
        if role == Role::Both {
            let key = hash::broker_key(&info.id);
            let mut response = self
                .route_sub(key, RequestBody::Register { role, info, topics })
                .await;
            response.correlation = correlation;
            return response;
        }

        if topics.is_empty() {
            return Response::failure(correlation, MessageKind::Register, "registration without topics");
        }

        let mut tasks = JoinSet::new();
        for (index, topic) in topics.iter().enumerate() {
            let node = self.clone();
            let info = info.clone();
            let topic = topic.clone();
            tasks.spawn(async move {
                let key = hash::record_key(&topic, &info.id);
                let body = RequestBody::Register {
                    role,
                    info,
                    topics: vec![topic],
                };
                (index, node.route_sub(key, body).await)
            });
        }

        // Success iff every sub-response succeeded; the first failure in
        // topic order is the one the client sees.
        let mut failures: Vec<(usize, Response)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, response)) if response.status == Status::Success => {}
                Ok((index, response)) => failures.push((index, response)),
                Err(e) => failures.push((
                    usize::MAX,
                    Response::failure(
                        correlation,
                        MessageKind::Register,
                        format!("fan-out task failed: {e}"),
                    ),
                )),
            }
        }

        match failures.into_iter().min_by_key(|(index, _)| *index) {
            None => Response::success(correlation, ResponseBody::Register),
            Some((_, first)) => Response {
                correlation,
                status: first.status,
                reason: first.reason,
                body: ResponseBody::Register,
            },
        }
    }

    /// Aggregate readiness across every ring member.
    async fn initial_is_ready(&self, correlation: u64) -> Response {
        {
            let registry = self.registry.read().await;
            if registry.state() == NodeState::Ready {
                // Terminal state; no need to re-poll the ring.
                return Response::success(correlation, ResponseBody::IsReady(registry.snapshot()));
            }
        }

        let aggregate = match tokio::time::timeout(T_READY, self.gather_snapshots()).await {
            Ok(Some(snapshots)) => self.registry.read().await.aggregate(&snapshots),
            // A member missing or slow means "not ready", never an error.
            Ok(None) | Err(_) => ReadySnapshot {
                ready: false,
                pubs: 0,
                subs: 0,
                broker: false,
            },
        };

        if aggregate.ready {
            self.registry.write().await.mark_ready();
        }
        Response::success(correlation, ResponseBody::IsReady(aggregate))
    }

    /// Snapshot every ring member, local node included. `None` when any
    /// member failed to answer.
    async fn gather_snapshots(&self) -> Option<Vec<ReadySnapshot>> {
        let mut snapshots = vec![self.registry.read().await.snapshot()];

        let mut tasks = JoinSet::new();
        for member in self.ring.remote_members() {
            let node = self.clone();
            let target = member.hash;
            tasks.spawn(async move { node.probe(target, RequestBody::IsReady).await });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(ResponseBody::IsReady(snapshot))) => snapshots.push(snapshot),
                Ok(Ok(_)) | Ok(Err(_)) | Err(_) => return None,
            }
        }
        Some(snapshots)
    }

    /// Broadcast a topic lookup to every member and union the results.
    async fn initial_lookup(&self, correlation: u64, topics: Vec<String>) -> Response {
        let local = self.registry.read().await.lookup_topics(&topics);

        let mut tasks = JoinSet::new();
        for (index, member) in self.ring.remote_members().enumerate() {
            let node = self.clone();
            let target = member.hash;
            let topics = topics.clone();
            tasks.spawn(async move {
                (index, node.probe(target, RequestBody::LookupByTopic { topics }).await)
            });
        }

        let mut gathered: Vec<(usize, Result<Vec<RegistrantInfo>, String>)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(ResponseBody::LookupByTopic { matches }))) => {
                    gathered.push((index, Ok(matches)));
                }
                Ok((index, Ok(_))) => {
                    gathered.push((index, Err("mismatched sub-response".into())));
                }
                Ok((index, Err(reason))) => gathered.push((index, Err(reason))),
                Err(e) => gathered.push((usize::MAX, Err(format!("fan-out task failed: {e}")))),
            }
        }
        gathered.sort_by_key(|(index, _)| *index);

        let mut matches = local;
        let mut seen: std::collections::HashSet<RegistrantInfo> =
            matches.iter().cloned().collect();
        for (_, result) in gathered {
            match result {
                Ok(sub) => {
                    for found in sub {
                        if seen.insert(found.clone()) {
                            matches.push(found);
                        }
                    }
                }
                Err(reason) => {
                    return Response::failure(correlation, MessageKind::LookupByTopic, reason)
                }
            }
        }

        Response::success(correlation, ResponseBody::LookupByTopic { matches })
    }

    /// Enumerate every publisher for the broker. Broker dissemination only.
    async fn initial_lookup_all(&self, correlation: u64) -> Response {
        let local = {
            let registry = self.registry.read().await;
            if registry.dissemination() == Dissemination::Direct {
                return Response::failure(
                    correlation,
                    MessageKind::LookupAll,
                    Refusal::LookallNotPermitted.reason(),
                );
            }
            registry.local_publishers()
        };

        let mut tasks = JoinSet::new();
        for (index, member) in self.ring.remote_members().enumerate() {
            let node = self.clone();
            let target = member.hash;
            tasks.spawn(async move { (index, node.probe(target, RequestBody::LookupAll).await) });
        }

        let mut gathered: Vec<(usize, Result<Vec<RegistrantInfo>, String>)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(ResponseBody::LookupAll { publishers }))) => {
                    gathered.push((index, Ok(publishers)));
                }
                Ok((index, Ok(_))) => {
                    gathered.push((index, Err("mismatched sub-response".into())));
                }
                Ok((index, Err(reason))) => gathered.push((index, Err(reason))),
                Err(e) => gathered.push((usize::MAX, Err(format!("fan-out task failed: {e}")))),
            }
        }
        gathered.sort_by_key(|(index, _)| *index);

        let mut publishers = local;
        let mut seen: std::collections::HashSet<RegistrantInfo> =
            publishers.iter().cloned().collect();
        for (_, result) in gathered {
            match result {
                Ok(sub) => {
                    for found in sub {
                        if seen.insert(found.clone()) {
                            publishers.push(found);
                        }
                    }
                }
                Err(reason) => {
                    return Response::failure(correlation, MessageKind::LookupAll, reason)
                }
            }
        }

        Response::success(correlation, ResponseBody::LookupAll { publishers })
    }

    /// Terminal handling: the request's key (if any) is in this node's
    /// range, or the request is a broadcast probe addressed to us.
    async fn handle_local(&self, request: Request) -> Response {
        let correlation = request.correlation;
        match request.body {
            RequestBody::Register { role, info, topics } => {
                let mut registry = self.registry.write().await;
                let result = match role {
                    Role::Both => registry.register_broker(&info),
                    _ => topics
                        .iter()
                        .try_for_each(|topic| registry.register_topic(role, &info, topic)),
                };
                drop(registry);

                match result {
                    Ok(()) => {
                        info!(id = %info.id, ?role, "registered");
                        Response::success(correlation, ResponseBody::Register)
                    }
                    Err(refusal) => {
                        debug!(id = %info.id, ?role, reason = refusal.reason(), "registration refused");
                        Response::failure(correlation, MessageKind::Register, refusal.reason())
                    }
                }
            }

            RequestBody::IsReady => {
                let registry = self.registry.read().await;
                Response::success(correlation, ResponseBody::IsReady(registry.snapshot()))
            }

            RequestBody::LookupByTopic { topics } => {
                let registry = self.registry.read().await;
                Response::success(
                    correlation,
                    ResponseBody::LookupByTopic {
                        matches: registry.lookup_topics(&topics),
                    },
                )
            }

            RequestBody::LookupAll => {
                let registry = self.registry.read().await;
                if registry.dissemination() == Dissemination::Direct {
                    Response::failure(
                        correlation,
                        MessageKind::LookupAll,
                        Refusal::LookallNotPermitted.reason(),
                    )
                } else {
                    Response::success(
                        correlation,
                        ResponseBody::LookupAll {
                            publishers: registry.local_publishers(),
                        },
                    )
                }
            }
        }
    }

    fn next_correlation(&self) -> u64 {
        self.correlation.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiscoveryStrategy;

    fn centralized_node(dissemination: Dissemination) -> DirectoryNode {
        let config = NodeConfig {
            name: "discovery".into(),
            bind_addr: "127.0.0.1".into(),
            port: 5555,
            expected_pubs: 1,
            expected_subs: 1,
            dissemination,
            discovery: DiscoveryStrategy::Centralized,
        };
        let ring = Ring::single("discovery", "127.0.0.1", 5555);
        DirectoryNode::new(config, ring)
    }

    fn register(role: Role, id: &str, port: u16, topics: &[&str]) -> Request {
        Request {
            correlation: 1,
            route: RouteMode::Initial,
            key: None,
            body: RequestBody::Register {
                role,
                info: RegistrantInfo {
                    id: id.into(),
                    addr: "127.0.0.1".into(),
                    port,
                },
                topics: topics.iter().map(|t| t.to_string()).collect(),
            },
        }
    }

    fn initial(body: RequestBody) -> Request {
        Request {
            correlation: 1,
            route: RouteMode::Initial,
            key: None,
            body,
        }
    }

    #[tokio::test]
    async fn test_register_then_lookup_local() {
        let node = centralized_node(Dissemination::Direct);
        node.registry.write().await.mark_bound();

        let response = node
            .dispatch(register(Role::Publisher, "p1", 7001, &["sports", "weather"]))
            .await;
        assert_eq!(response.status, Status::Success);

        let response = node
            .dispatch(initial(RequestBody::LookupByTopic {
                topics: vec!["sports".into()],
            }))
            .await;
        match response.body {
            ResponseBody::LookupByTopic { matches } => {
                assert_eq!(matches.len(), 1);
                assert_eq!(matches[0].id, "p1");
            }
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_duplicate_registration_reports_first_failure() {
        let node = centralized_node(Dissemination::Direct);
        node.registry.write().await.mark_bound();

        let first = node
            .dispatch(register(Role::Publisher, "p1", 7001, &["sports"]))
            .await;
        assert_eq!(first.status, Status::Success);

        let second = node
            .dispatch(register(Role::Subscriber, "p1", 7002, &["sports"]))
            .await;
        assert_eq!(second.status, Status::Failure);
        assert_eq!(second.reason.as_deref(), Some("name already exists"));
    }

    #[tokio::test]
    async fn test_is_ready_transitions_to_terminal_state() {
        let node = centralized_node(Dissemination::Direct);
        node.registry.write().await.mark_bound();

        let response = node.dispatch(initial(RequestBody::IsReady)).await;
        match response.body {
            ResponseBody::IsReady(snapshot) => assert!(!snapshot.ready),
            other => panic!("unexpected body {other:?}"),
        }

        node.dispatch(register(Role::Publisher, "p1", 7001, &["sports"]))
            .await;
        node.dispatch(register(Role::Subscriber, "s1", 7002, &["sports"]))
            .await;

        let response = node.dispatch(initial(RequestBody::IsReady)).await;
        match response.body {
            ResponseBody::IsReady(snapshot) => {
                assert!(snapshot.ready);
                assert_eq!(snapshot.pubs, 1);
                assert_eq!(snapshot.subs, 1);
            }
            other => panic!("unexpected body {other:?}"),
        }
        assert_eq!(node.registry.read().await.state(), NodeState::Ready);
    }

    #[tokio::test]
    async fn test_lookup_all_refused_in_direct_mode() {
        let node = centralized_node(Dissemination::Direct);
        node.registry.write().await.mark_bound();

        let response = node.dispatch(initial(RequestBody::LookupAll)).await;
        assert_eq!(response.status, Status::Failure);
        assert_eq!(
            response.reason.as_deref(),
            Some("lookall not permitted in direct mode")
        );
    }

    #[tokio::test]
    async fn test_broker_registration_and_lookup() {
        let node = centralized_node(Dissemination::Broker);
        node.registry.write().await.mark_bound();

        node.dispatch(register(Role::Publisher, "p1", 7001, &["sports"]))
            .await;
        node.dispatch(register(Role::Subscriber, "s1", 7002, &["sports"]))
            .await;

        // Broker mode: not ready until the broker slot fills.
        let response = node.dispatch(initial(RequestBody::IsReady)).await;
        match response.body {
            ResponseBody::IsReady(snapshot) => assert!(!snapshot.ready),
            other => panic!("unexpected body {other:?}"),
        }

        let response = node.dispatch(register(Role::Both, "b1", 7100, &[])).await;
        assert_eq!(response.status, Status::Success);

        let response = node.dispatch(initial(RequestBody::IsReady)).await;
        match response.body {
            ResponseBody::IsReady(snapshot) => {
                assert!(snapshot.ready);
                assert!(snapshot.broker);
            }
            other => panic!("unexpected body {other:?}"),
        }

        // Lookups resolve to the broker, not the matching publisher.
        let response = node
            .dispatch(initial(RequestBody::LookupByTopic {
                topics: vec!["sports".into()],
            }))
            .await;
        match response.body {
            ResponseBody::LookupByTopic { matches } => {
                assert_eq!(matches.len(), 1);
                assert_eq!(matches[0].id, "b1");
            }
            other => panic!("unexpected body {other:?}"),
        }

        // Second broker refused until restart.
        let response = node.dispatch(register(Role::Both, "b2", 7101, &[])).await;
        assert_eq!(response.status, Status::Failure);
        assert_eq!(response.reason.as_deref(), Some("broker already exists"));
    }
}
