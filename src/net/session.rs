//! Session and transport management
//!
//! Owns the connection table, the UDP receive loop and the fixed-rate tick
//! that drives eviction and snapshot broadcast. Packet handling is split from
//! socket I/O: [`SessionManager::handle_datagram`] and
//! [`SessionManager::tick_at`] return the datagrams to send, and the async
//! loops only move bytes.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use serde::Serialize;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::game::authority::MovementAuthority;
use crate::game::movement::{CharacterClass, SPAWN_POSITION};
use crate::net::packet::Packet;
use crate::net::protocol::{self, InputSample, WireMessage};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::Timer;

/// Largest datagram the receive loop accepts
pub const MAX_DATAGRAM_SIZE: usize = 8 * 1024;

pub const DENY_SERVER_FULL: &str = "server full";
pub const NOTICE_TIMEOUT: &str = "timeout";
pub const NOTICE_SHUTDOWN: &str = "server shutting down";

/// A transport endpoint bound to a logical identity
#[derive(Debug, Clone)]
pub struct Connection {
    pub identity: String,
    pub endpoint: SocketAddr,
    pub class: CharacterClass,
    pub connected_at: Instant,
    pub last_heartbeat: Instant,
    limiter: ConnectionRateLimiter,
}

/// Bytes to send to one endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub addr: SocketAddr,
    pub payload: Bytes,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub heartbeat_timeout: Duration,
    pub max_clients: usize,
    pub input_rate_limit: u32,
    pub tick_period: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            heartbeat_timeout: config.heartbeat_timeout,
            max_clients: config.max_clients,
            input_rate_limit: config.input_rate_limit,
            tick_period: config.tick_period(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[derive(Debug, Default)]
pub struct SessionStats {
    pub datagrams_received: AtomicU64,
    pub decode_errors: AtomicU64,
    pub unknown_messages: AtomicU64,
    pub unknown_endpoints: AtomicU64,
    pub rate_limited: AtomicU64,
    pub connections_accepted: AtomicU64,
    pub connections_denied: AtomicU64,
    pub disconnects: AtomicU64,
    pub timeouts: AtomicU64,
    pub snapshots_sent: AtomicU64,
    pub send_failures: AtomicU64,
    pub tick_overruns: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SessionStatsSnapshot {
    pub datagrams_received: u64,
    pub decode_errors: u64,
    pub unknown_messages: u64,
    pub unknown_endpoints: u64,
    pub rate_limited: u64,
    pub connections_accepted: u64,
    pub connections_denied: u64,
    pub disconnects: u64,
    pub timeouts: u64,
    pub snapshots_sent: u64,
    pub send_failures: u64,
    pub tick_overruns: u64,
}

impl SessionStats {
    pub fn snapshot(&self) -> SessionStatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        SessionStatsSnapshot {
            datagrams_received: load(&self.datagrams_received),
            decode_errors: load(&self.decode_errors),
            unknown_messages: load(&self.unknown_messages),
            unknown_endpoints: load(&self.unknown_endpoints),
            rate_limited: load(&self.rate_limited),
            connections_accepted: load(&self.connections_accepted),
            connections_denied: load(&self.connections_denied),
            disconnects: load(&self.disconnects),
            timeouts: load(&self.timeouts),
            snapshots_sent: load(&self.snapshots_sent),
            send_failures: load(&self.send_failures),
            tick_overruns: load(&self.tick_overruns),
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Pause after a receive error that is likely to repeat immediately
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Receive errors caused by one peer rather than the socket itself
fn is_transient(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionRefused
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
    )
}

pub struct SessionManager {
    /// Keyed by identity; endpoints may change across NAT rebinding
    connections: DashMap<String, Connection>,
    endpoints: DashMap<SocketAddr, String>,
    authority: Arc<MovementAuthority>,
    settings: SessionSettings,
    stats: SessionStats,
    ticks: AtomicU64,
    outbound_sequence: AtomicU32,
}

impl SessionManager {
    pub fn new(settings: SessionSettings, authority: Arc<MovementAuthority>) -> Self {
        Self {
            connections: DashMap::new(),
            endpoints: DashMap::new(),
            authority,
            settings,
            stats: SessionStats::default(),
            ticks: AtomicU64::new(0),
            outbound_sequence: AtomicU32::new(0),
        }
    }

    pub fn authority(&self) -> &Arc<MovementAuthority> {
        &self.authority
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn connection(&self, identity: &str) -> Option<Connection> {
        self.connections.get(identity).map(|c| c.value().clone())
    }

    pub fn identity_for(&self, addr: &SocketAddr) -> Option<String> {
        self.endpoints.get(addr).map(|id| id.value().clone())
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn handle_datagram(&self, addr: SocketAddr, data: &[u8]) -> Vec<Outgoing> {
        self.handle_datagram_at(addr, data, Instant::now())
    }

    /// Decode and dispatch one datagram, returning any replies
    pub fn handle_datagram_at(&self, addr: SocketAddr, data: &[u8], now: Instant) -> Vec<Outgoing> {
        bump(&self.stats.datagrams_received);

        let packet = match Packet::parse(data) {
            Ok(packet) => packet,
            Err(e) => {
                bump(&self.stats.decode_errors);
                debug!(addr = %addr, error = %e, "Dropping undecodable datagram");
                return Vec::new();
            }
        };

        match packet {
            Packet::Connect { identity, class } => self
                .handle_connect(addr, identity, class.unwrap_or_default(), now)
                .into_iter()
                .collect(),
            Packet::Heartbeat => self.handle_heartbeat(addr, now).into_iter().collect(),
            Packet::Disconnect { .. } => {
                self.handle_disconnect(addr);
                Vec::new()
            }
            Packet::Message(WireMessage::Input(sample)) => {
                self.handle_input(addr, &sample, now).into_iter().collect()
            }
            Packet::Message(other) => {
                debug!(
                    addr = %addr,
                    message_type = other.message_type(),
                    "Ignoring server-bound message of client-bound type"
                );
                Vec::new()
            }
            Packet::ConnectAck | Packet::ConnectDenied { .. } | Packet::HeartbeatAck => {
                debug!(addr = %addr, "Ignoring client-bound control message");
                Vec::new()
            }
            Packet::Unknown { kind } => {
                bump(&self.stats.unknown_messages);
                debug!(addr = %addr, kind = %kind, "Ignoring unknown message type");
                Vec::new()
            }
        }
    }

    /// Create or refresh a connection and its actor.
    ///
    /// A repeated `CONNECT` from the endpoint already bound to the identity
    /// (a retry or a duplicated datagram) only refreshes liveness and is
    /// acknowledged again. Connecting a known identity from a new endpoint
    /// moves it there and resets the actor, so the client restarts its
    /// sequence numbering.
    fn handle_connect(
        &self,
        addr: SocketAddr,
        identity: String,
        class: CharacterClass,
        now: Instant,
    ) -> Option<Outgoing> {
        if let Some(mut existing) = self.connections.get_mut(&identity) {
            if existing.endpoint == addr && self.authority.contains(&identity) {
                existing.last_heartbeat = now;
                drop(existing);
                self.authority.touch_at(&identity, now);
                debug!(addr = %addr, identity = %identity, "Repeated connect, session kept");
                return self.control(addr, Packet::ConnectAck);
            }
        }

        // This endpoint previously spoke for someone else
        if let Some(previous) = self.identity_for(&addr) {
            if previous != identity {
                info!(addr = %addr, previous = %previous, identity = %identity, "Endpoint switched identity");
                self.drop_connection(&previous);
            }
        }

        let is_new = !self.connections.contains_key(&identity);
        if is_new && self.connections.len() >= self.settings.max_clients {
            bump(&self.stats.connections_denied);
            warn!(
                addr = %addr,
                identity = %identity,
                max_clients = self.settings.max_clients,
                "Connection denied, server full"
            );
            return self.control(
                addr,
                Packet::ConnectDenied {
                    reason: DENY_SERVER_FULL.to_string(),
                },
            );
        }

        let connection = Connection {
            identity: identity.clone(),
            endpoint: addr,
            class,
            connected_at: now,
            last_heartbeat: now,
            limiter: ConnectionRateLimiter::new(self.settings.input_rate_limit),
        };

        if let Some(old) = self.connections.insert(identity.clone(), connection) {
            if old.endpoint != addr {
                self.endpoints
                    .remove_if(&old.endpoint, |_, owner| owner == &identity);
            }
        }
        self.endpoints.insert(addr, identity.clone());
        self.authority.add_actor(&identity, SPAWN_POSITION, class);

        bump(&self.stats.connections_accepted);
        info!(
            addr = %addr,
            identity = %identity,
            class = %class,
            reconnect = !is_new,
            connections = self.connections.len(),
            "Player connected"
        );

        self.control(addr, Packet::ConnectAck)
    }

    fn handle_heartbeat(&self, addr: SocketAddr, now: Instant) -> Option<Outgoing> {
        let identity = self.known_identity(addr)?;

        if let Some(mut connection) = self.connections.get_mut(&identity) {
            connection.last_heartbeat = now;
        }
        self.authority.touch_at(&identity, now);
        trace!(identity = %identity, "Heartbeat");

        self.control(addr, Packet::HeartbeatAck)
    }

    fn handle_input(&self, addr: SocketAddr, sample: &InputSample, now: Instant) -> Option<Outgoing> {
        let Some(identity) = self.identity_for(&addr) else {
            bump(&self.stats.unknown_endpoints);
            warn!(addr = %addr, sequence = sample.sequence_number, "Input from unknown endpoint");
            return None;
        };

        {
            let mut connection = self.connections.get_mut(&identity)?;
            connection.last_heartbeat = now;
            if !connection.limiter.check() {
                bump(&self.stats.rate_limited);
                debug!(identity = %identity, sequence = sample.sequence_number, "Rate limited input");
                return None;
            }
        }

        let mut update = self.authority.apply_input_at(&identity, sample, now)?;
        update.sequence_number = self.next_outbound_sequence();

        match protocol::encode(&WireMessage::PositionUpdate(update)) {
            Ok(payload) => Some(Outgoing {
                addr,
                payload: Bytes::from(payload),
            }),
            Err(e) => {
                warn!(identity = %identity, error = %e, "Failed to encode position update");
                None
            }
        }
    }

    fn handle_disconnect(&self, addr: SocketAddr) {
        let Some(identity) = self.known_identity(addr) else {
            return;
        };
        if self.drop_connection(&identity) {
            bump(&self.stats.disconnects);
            info!(addr = %addr, identity = %identity, "Player disconnected");
        }
    }

    fn known_identity(&self, addr: SocketAddr) -> Option<String> {
        let identity = self.identity_for(&addr);
        if identity.is_none() {
            bump(&self.stats.unknown_endpoints);
            debug!(addr = %addr, "Control message from unknown endpoint");
        }
        identity
    }

    /// Remove a connection, its endpoint mapping and its actor
    fn drop_connection(&self, identity: &str) -> bool {
        let removed = self.connections.remove(identity);
        if let Some((_, connection)) = &removed {
            self.endpoints
                .remove_if(&connection.endpoint, |_, owner| owner == identity);
        }
        let had_actor = self.authority.remove_actor(identity);
        removed.is_some() || had_actor
    }

    fn next_outbound_sequence(&self) -> u32 {
        self.outbound_sequence
            .fetch_add(1, Ordering::Relaxed)
            .wrapping_add(1)
    }

    fn control(&self, addr: SocketAddr, packet: Packet) -> Option<Outgoing> {
        match packet.to_bytes() {
            Ok(payload) => Some(Outgoing { addr, payload }),
            Err(e) => {
                warn!(addr = %addr, error = %e, "Failed to encode control message");
                None
            }
        }
    }

    pub fn tick(&self) -> Vec<Outgoing> {
        self.tick_at(Instant::now())
    }

    /// One server tick: evict silent players, then broadcast a snapshot of
    /// every live actor to every live connection
    pub fn tick_at(&self, now: Instant) -> Vec<Outgoing> {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        let timeout = self.settings.heartbeat_timeout;
        let mut outgoing = Vec::new();

        let mut expired = Vec::new();
        self.connections.retain(|_, connection| {
            let silent = now.saturating_duration_since(connection.last_heartbeat) > timeout;
            if silent {
                expired.push((connection.identity.clone(), connection.endpoint));
            }
            !silent
        });

        for identity in self.authority.evict_stale_at(now, timeout) {
            if let Some((_, connection)) = self.connections.remove(&identity) {
                expired.push((identity, connection.endpoint));
            }
        }

        for (identity, endpoint) in expired {
            self.endpoints
                .remove_if(&endpoint, |_, owner| owner == &identity);
            // Actors the authority evicted itself were counted there
            if self.authority.remove_actor(&identity) {
                self.authority.stats().evictions.fetch_add(1, Ordering::Relaxed);
            }
            bump(&self.stats.timeouts);
            info!(identity = %identity, addr = %endpoint, "Connection timed out");

            outgoing.extend(self.control(
                endpoint,
                Packet::Disconnect {
                    detail: Some(NOTICE_TIMEOUT.to_string()),
                },
            ));
        }

        if self.connections.is_empty() {
            return outgoing;
        }

        let mut snapshot = self.authority.snapshot();
        snapshot.sequence_number = self.next_outbound_sequence();

        let payload = match protocol::encode(&WireMessage::StateSnapshot(snapshot)) {
            Ok(payload) => Bytes::from(payload),
            Err(e) => {
                warn!(error = %e, "Failed to encode state snapshot");
                return outgoing;
            }
        };

        outgoing.extend(self.connections.iter().map(|connection| Outgoing {
            addr: connection.endpoint,
            payload: payload.clone(),
        }));
        self.stats.snapshots_sent.fetch_add(
            self.connections.len() as u64,
            Ordering::Relaxed,
        );

        outgoing
    }

    /// Drive the receive loop and the tick loop until `shutdown` fires
    pub async fn run(
        self: Arc<Self>,
        socket: Arc<UdpSocket>,
        shutdown: watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        info!(
            addr = %socket.local_addr()?,
            tick_period_ms = self.settings.tick_period.as_secs_f64() * 1000.0,
            heartbeat_timeout_secs = self.settings.heartbeat_timeout.as_secs(),
            max_clients = self.settings.max_clients,
            "Session manager running"
        );

        tokio::join!(
            self.receive_loop(&socket, shutdown.clone()),
            self.tick_loop(&socket, shutdown),
        );

        self.shutdown_connections(&socket).await;
        info!("Session manager stopped");
        Ok(())
    }

    async fn receive_loop(&self, socket: &UdpSocket, mut shutdown: watch::Receiver<bool>) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                result = socket.recv_from(&mut buf) => match result {
                    Ok((len, addr)) => {
                        for out in self.handle_datagram(addr, &buf[..len]) {
                            self.send(socket, out).await;
                        }
                    }
                    Err(e) if is_transient(&e) => {
                        // ICMP port-unreachable surfaces here on some platforms
                        debug!(error = %e, "UDP receive failed");
                    }
                    Err(e) => {
                        warn!(error = %e, "UDP receive failed, backing off");
                        tokio::time::sleep(RECV_ERROR_BACKOFF).await;
                    }
                },
            }
        }
    }

    async fn tick_loop(&self, socket: &UdpSocket, mut shutdown: watch::Receiver<bool>) {
        let period = self.settings.tick_period;
        let mut tick_interval = interval(period);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tick_interval.tick() => {
                    let timer = Timer::new();
                    for out in self.tick() {
                        self.send(socket, out).await;
                    }

                    let elapsed = timer.elapsed();
                    if elapsed > period {
                        bump(&self.stats.tick_overruns);
                        warn!(
                            tick = self.ticks(),
                            elapsed_us = timer.elapsed_micros(),
                            period_us = period.as_micros() as u64,
                            "Tick overran its period"
                        );
                    }
                }
            }
        }
    }

    async fn send(&self, socket: &UdpSocket, out: Outgoing) {
        if let Err(e) = socket.send_to(&out.payload, out.addr).await {
            bump(&self.stats.send_failures);
            debug!(addr = %out.addr, error = %e, "UDP send failed");
        }
    }

    /// Best-effort disconnect notice to everyone, then forget them
    pub async fn shutdown_connections(&self, socket: &UdpSocket) {
        let endpoints: Vec<(String, SocketAddr)> = self
            .connections
            .iter()
            .map(|c| (c.identity.clone(), c.endpoint))
            .collect();

        for (identity, endpoint) in &endpoints {
            if let Some(out) = self.control(
                *endpoint,
                Packet::Disconnect {
                    detail: Some(NOTICE_SHUTDOWN.to_string()),
                },
            ) {
                self.send(socket, out).await;
            }
            self.drop_connection(identity);
        }

        info!(notified = endpoints.len(), "Connections closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MovementConfig;
    use crate::game::movement::MovementFlags;
    use crate::net::protocol::{decode, Decoded, PositionUpdate, StateSnapshot};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn manager_with(settings: SessionSettings) -> SessionManager {
        let authority = Arc::new(MovementAuthority::new(MovementConfig::default()));
        SessionManager::new(settings, authority)
    }

    fn manager() -> SessionManager {
        manager_with(SessionSettings::default())
    }

    fn input_bytes(sequence: u32) -> Vec<u8> {
        protocol::encode(&WireMessage::Input(InputSample {
            sequence_number: sequence,
            timestamp: 0.0,
            flags: MovementFlags::FORWARD,
            yaw: 0.0,
            pitch: 0.0,
            delta_time: 0.1,
        }))
        .unwrap()
    }

    fn position_update(out: &Outgoing) -> PositionUpdate {
        match decode(&out.payload).unwrap() {
            Decoded::Message(WireMessage::PositionUpdate(update)) => update,
            other => panic!("expected position update, got {other:?}"),
        }
    }

    fn snapshot(out: &Outgoing) -> StateSnapshot {
        match decode(&out.payload).unwrap() {
            Decoded::Message(WireMessage::StateSnapshot(snapshot)) => snapshot,
            other => panic!("expected snapshot, got {other:?}"),
        }
    }

    #[test]
    fn connect_is_acknowledged() {
        let sessions = manager();
        let replies = sessions.handle_datagram(addr(5000), b"CONNECT:alice");

        assert_eq!(replies.len(), 1);
        assert_eq!(&replies[0].payload[..], b"CONNECT_ACK:SUCCESS");
        assert_eq!(sessions.connection_count(), 1);
        assert!(sessions.authority().contains("alice"));
        assert_eq!(sessions.identity_for(&addr(5000)).as_deref(), Some("alice"));
    }

    #[test]
    fn connect_with_class_sets_actor_class() {
        let sessions = manager();
        sessions.handle_datagram(addr(5000), b"CONNECT:alice:Ranger");
        assert_eq!(
            sessions.authority().get("alice").unwrap().class,
            CharacterClass::Ranger
        );
    }

    #[test]
    fn input_is_applied_and_answered() {
        let sessions = manager();
        sessions.handle_datagram(addr(5000), b"CONNECT:alice");

        let replies = sessions.handle_datagram(addr(5000), &input_bytes(1));
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].addr, addr(5000));

        let update = position_update(&replies[0]);
        assert_eq!(update.player_id, "alice");
        assert_eq!(update.input_sequence, 1);
        assert!(update.z < 0.0);

        // Duplicate gets no reply
        assert!(sessions.handle_datagram(addr(5000), &input_bytes(1)).is_empty());
    }

    #[test]
    fn input_from_unknown_endpoint_is_dropped() {
        let sessions = manager();
        sessions.handle_datagram(addr(5000), b"CONNECT:alice");

        assert!(sessions.handle_datagram(addr(6000), &input_bytes(1)).is_empty());
        assert_eq!(sessions.stats().snapshot().unknown_endpoints, 1);
        assert_eq!(sessions.authority().get("alice").unwrap().last_processed_sequence, 0);
    }

    #[test]
    fn garbage_is_counted_and_dropped() {
        let sessions = manager();
        assert!(sessions.handle_datagram(addr(5000), &[0xff, 0x00, 0x13]).is_empty());
        assert!(sessions
            .handle_datagram(addr(5000), br#"{"MessageType":"PlayerInput""#)
            .is_empty());
        assert!(sessions
            .handle_datagram(addr(5000), br#"{"MessageType":"Teleport"}"#)
            .is_empty());

        let stats = sessions.stats().snapshot();
        assert_eq!(stats.decode_errors, 2);
        assert_eq!(stats.unknown_messages, 1);
    }

    #[test]
    fn heartbeat_is_acknowledged() {
        let sessions = manager();
        sessions.handle_datagram(addr(5000), b"CONNECT:alice");

        let replies = sessions.handle_datagram(addr(5000), b"HEARTBEAT");
        assert_eq!(&replies[0].payload[..], b"HEARTBEAT_ACK");
        assert!(sessions.handle_datagram(addr(7000), b"HEARTBEAT").is_empty());
    }

    #[test]
    fn full_server_denies_new_identities() {
        let sessions = manager_with(SessionSettings {
            max_clients: 1,
            ..Default::default()
        });
        sessions.handle_datagram(addr(5000), b"CONNECT:alice");

        let replies = sessions.handle_datagram(addr(5001), b"CONNECT:bob");
        assert_eq!(&replies[0].payload[..], b"CONNECT_DENIED:server full");
        assert_eq!(sessions.connection_count(), 1);

        // A known identity may still reconnect
        let replies = sessions.handle_datagram(addr(5002), b"CONNECT:alice");
        assert_eq!(&replies[0].payload[..], b"CONNECT_ACK:SUCCESS");
    }

    #[test]
    fn reconnect_moves_identity_to_new_endpoint() {
        let sessions = manager();
        sessions.handle_datagram(addr(5000), b"CONNECT:alice");
        sessions.handle_datagram(addr(5000), &input_bytes(1));

        sessions.handle_datagram(addr(5001), b"CONNECT:alice");
        assert_eq!(sessions.connection_count(), 1);
        assert!(sessions.identity_for(&addr(5000)).is_none());
        assert_eq!(sessions.connection("alice").unwrap().endpoint, addr(5001));
        assert_eq!(sessions.authority().get("alice").unwrap().last_processed_sequence, 0);
    }

    #[test]
    fn repeated_connect_keeps_actor_state() {
        let sessions = manager();
        sessions.handle_datagram(addr(5000), b"CONNECT:alice");
        for seq in 1..=10 {
            sessions.handle_datagram(addr(5000), &input_bytes(seq));
        }
        let before = sessions.authority().get("alice").unwrap();
        assert_eq!(before.last_processed_sequence, 10);

        let replies = sessions.handle_datagram(addr(5000), b"CONNECT:alice");
        assert_eq!(&replies[0].payload[..], b"CONNECT_ACK:SUCCESS");

        let after = sessions.authority().get("alice").unwrap();
        assert_eq!(after.position, before.position);
        assert_eq!(after.last_processed_sequence, 10);
        assert_eq!(sessions.connection_count(), 1);

        // Old inputs stay stale
        assert!(sessions.handle_datagram(addr(5000), &input_bytes(3)).is_empty());
        assert_eq!(sessions.authority().get("alice").unwrap().position, before.position);
    }

    #[test]
    fn repeated_connect_refreshes_liveness() {
        let sessions = manager();
        let start = Instant::now();
        sessions.handle_datagram_at(addr(5000), b"CONNECT:alice", start);
        sessions.handle_datagram_at(addr(5000), b"CONNECT:alice", start + Duration::from_secs(20));

        sessions.tick_at(start + Duration::from_secs(40));
        assert!(sessions.connection("alice").is_some());
        assert!(sessions.authority().contains("alice"));
    }

    #[test]
    fn disconnect_removes_connection_and_actor() {
        let sessions = manager();
        sessions.handle_datagram(addr(5000), b"CONNECT:alice");
        sessions.handle_datagram(addr(5000), b"DISCONNECT");

        assert_eq!(sessions.connection_count(), 0);
        assert!(!sessions.authority().contains("alice"));
        assert_eq!(sessions.stats().snapshot().disconnects, 1);
    }

    #[test]
    fn rate_limit_drops_excess_input() {
        let sessions = manager_with(SessionSettings {
            input_rate_limit: 2,
            ..Default::default()
        });
        sessions.handle_datagram(addr(5000), b"CONNECT:alice");

        let answered = (1..=10)
            .filter(|seq| !sessions.handle_datagram(addr(5000), &input_bytes(*seq)).is_empty())
            .count();
        assert!(answered < 10);
        assert!(sessions.stats().snapshot().rate_limited > 0);
    }

    #[test]
    fn tick_broadcasts_one_snapshot_to_everyone() {
        let sessions = manager();
        sessions.handle_datagram(addr(5000), b"CONNECT:alice");
        sessions.handle_datagram(addr(5001), b"CONNECT:bob");

        let out = sessions.tick();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].payload, out[1].payload);

        let snapshot = snapshot(&out[0]);
        assert_eq!(snapshot.player_positions.len(), 2);
        assert!(snapshot.find("alice").is_some());
    }

    #[test]
    fn empty_server_sends_nothing_on_tick() {
        assert!(manager().tick().is_empty());
    }

    #[test]
    fn silent_player_is_evicted_with_notice() {
        let sessions = manager();
        sessions.handle_datagram(addr(5000), b"CONNECT:alice");

        let out = sessions.tick_at(Instant::now() + Duration::from_secs(31));
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0].payload[..], b"DISCONNECT:timeout");
        assert_eq!(sessions.connection_count(), 0);
        assert!(!sessions.authority().contains("alice"));
        assert_eq!(sessions.stats().snapshot().timeouts, 1);
        assert_eq!(sessions.authority().stats().snapshot().evictions, 1);
    }

    #[test]
    fn connection_timeout_counts_as_eviction() {
        let sessions = manager();
        let start = Instant::now();
        sessions.handle_datagram_at(addr(5000), b"CONNECT:alice", start);
        sessions.handle_datagram_at(addr(5001), b"CONNECT:bob", start);

        // Actor refreshed, connection not: only the connection clock expires
        sessions
            .authority()
            .touch_at("alice", start + Duration::from_secs(20));
        sessions.tick_at(start + Duration::from_secs(31));

        assert!(!sessions.authority().contains("alice"));
        let stats = sessions.stats().snapshot();
        assert_eq!(stats.timeouts, 2);
        assert_eq!(sessions.authority().stats().snapshot().evictions, 2);
    }

    #[test]
    fn transient_receive_errors_are_recognised() {
        assert!(is_transient(&std::io::Error::from(ErrorKind::ConnectionReset)));
        assert!(!is_transient(&std::io::Error::from(ErrorKind::NotConnected)));
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let sessions = Arc::new(manager());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(sessions.clone().run(socket, rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("session manager did not stop")
            .unwrap()
            .unwrap();
        assert!(sessions.ticks() > 0);
    }
}
