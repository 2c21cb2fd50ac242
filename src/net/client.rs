//! UDP client driving local prediction

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, trace, warn};

use crate::config::MovementConfig;
use crate::game::movement::{CharacterClass, MovementFlags};
use crate::game::prediction::{ActorPose, ClientPrediction};
use crate::net::packet::{validate_identity, Packet};
use crate::net::protocol::{DecodeError, EncodeError, InputSample, PositionUpdate, StateSnapshot, WireMessage};
use crate::net::session::MAX_DATAGRAM_SIZE;

/// Interval between connect retries while waiting for the ack
const CONNECT_RETRY: Duration = Duration::from_millis(250);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid identity: {0}")]
    InvalidIdentity(#[source] DecodeError),

    #[error("no answer from server within {0:?}")]
    Timeout(Duration),

    #[error("connection denied: {0}")]
    Denied(String),

    #[error("not connected")]
    NotConnected,

    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// What a received datagram meant for this client
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Our own authoritative state arrived; `applied` is false for reordered updates
    Reconciled { input_sequence: u32, applied: bool },
    /// Snapshot received; our entry (if any) was reconciled
    Snapshot { actors: usize, applied: bool },
    HeartbeatAck,
    Disconnected { reason: Option<String> },
    Ignored,
}

pub struct NetworkClient {
    socket: UdpSocket,
    server: SocketAddr,
    identity: String,
    class: CharacterClass,
    movement: MovementConfig,
    prediction: Arc<Mutex<ClientPrediction>>,
    last_snapshot: Mutex<Option<StateSnapshot>>,
    connected: bool,
}

impl NetworkClient {
    /// Bind an ephemeral local port aimed at `server`
    pub async fn bind(
        server: SocketAddr,
        identity: &str,
        class: CharacterClass,
        movement: MovementConfig,
    ) -> Result<Self, ClientError> {
        validate_identity(identity).map_err(ClientError::InvalidIdentity)?;

        let local: SocketAddr = if server.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(server).await?;

        debug!(
            local = %socket.local_addr()?,
            server = %server,
            identity = %identity,
            "Client socket bound"
        );

        Ok(Self {
            socket,
            server,
            identity: identity.to_string(),
            class,
            movement,
            prediction: Arc::new(Mutex::new(ClientPrediction::new(
                movement,
                class.speed_modifier(),
            ))),
            last_snapshot: Mutex::new(None),
            connected: false,
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Shared handle for a renderer that reads display state every frame
    pub fn prediction(&self) -> Arc<Mutex<ClientPrediction>> {
        self.prediction.clone()
    }

    pub fn display_state(&self, interpolation: f32) -> ActorPose {
        self.prediction.lock().display_state(interpolation)
    }

    /// Last broadcast snapshot, including other actors
    pub fn last_snapshot(&self) -> Option<StateSnapshot> {
        self.last_snapshot.lock().clone()
    }

    /// Send the connect sentinel and wait for the ack, resending periodically.
    ///
    /// No-op while connected. The server keeps the session of a repeated
    /// connect from the same endpoint, so the sequence must not restart.
    pub async fn connect(&mut self, wait: Duration) -> Result<(), ClientError> {
        if self.connected {
            return Ok(());
        }

        let request = Packet::Connect {
            identity: self.identity.clone(),
            class: Some(self.class),
        }
        .to_bytes()?;

        let deadline = Instant::now() + wait;
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        while Instant::now() < deadline {
            self.socket.send(&request).await?;

            let retry_at = (Instant::now() + CONNECT_RETRY).min(deadline);
            while let Some(remaining) = retry_at.checked_duration_since(Instant::now()) {
                let Ok(received) = timeout(remaining, self.socket.recv(&mut buf)).await else {
                    break;
                };
                let len = received?;

                match Packet::parse(&buf[..len]) {
                    Ok(Packet::ConnectAck) => {
                        // The server reset our actor; start a fresh sequence
                        *self.prediction.lock() =
                            ClientPrediction::new(self.movement, self.class.speed_modifier());
                        self.connected = true;
                        info!(identity = %self.identity, server = %self.server, "Connected");
                        return Ok(());
                    }
                    Ok(Packet::ConnectDenied { reason }) => {
                        warn!(identity = %self.identity, reason = %reason, "Connection denied");
                        return Err(ClientError::Denied(reason));
                    }
                    Ok(other) => trace!(packet = ?other, "Ignoring datagram while connecting"),
                    Err(e) => debug!(error = %e, "Undecodable datagram while connecting"),
                }
            }
        }

        Err(ClientError::Timeout(wait))
    }

    /// Predict locally and send the resulting sample
    pub async fn submit(
        &self,
        flags: MovementFlags,
        yaw: f32,
        pitch: f32,
        dt: f32,
    ) -> Result<InputSample, ClientError> {
        if !self.connected {
            return Err(ClientError::NotConnected);
        }
        let sample = self.prediction.lock().submit(flags, yaw, pitch, dt);
        self.flush().await?;
        Ok(sample)
    }

    /// Send every sample queued by the prediction engine
    pub async fn flush(&self) -> Result<usize, ClientError> {
        let outbound = self.prediction.lock().drain_outbound();
        for sample in &outbound {
            let payload = Packet::Message(WireMessage::Input(*sample)).to_bytes()?;
            // Lost inputs are superseded, never resent
            if let Err(e) = self.socket.send(&payload).await {
                debug!(sequence = sample.sequence_number, error = %e, "Input send failed");
            }
        }
        Ok(outbound.len())
    }

    pub async fn heartbeat(&self) -> Result<(), ClientError> {
        self.socket.send(&Packet::Heartbeat.to_bytes()?).await?;
        Ok(())
    }

    /// Best-effort goodbye
    pub async fn disconnect(&mut self) -> Result<(), ClientError> {
        let notice = Packet::Disconnect {
            detail: Some(self.identity.clone()),
        };
        self.socket.send(&notice.to_bytes()?).await?;
        self.connected = false;
        info!(identity = %self.identity, "Disconnected");
        Ok(())
    }

    /// Wait for and handle one datagram
    pub async fn recv(&mut self) -> Result<ClientEvent, ClientError> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let len = self.socket.recv(&mut buf).await?;
        Ok(self.handle_datagram(&buf[..len]))
    }

    /// Handle every datagram already waiting, without blocking
    pub fn poll(&mut self) -> Result<Vec<ClientEvent>, ClientError> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let mut events = Vec::new();
        loop {
            match self.socket.try_recv(&mut buf) {
                Ok(len) => events.push(self.handle_datagram(&buf[..len])),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(events),
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn handle_datagram(&mut self, data: &[u8]) -> ClientEvent {
        let packet = match Packet::parse(data) {
            Ok(packet) => packet,
            Err(e) => {
                debug!(error = %e, "Dropping undecodable datagram");
                return ClientEvent::Ignored;
            }
        };

        match packet {
            Packet::Message(WireMessage::PositionUpdate(update)) => {
                if update.player_id != self.identity {
                    return ClientEvent::Ignored;
                }
                let applied = self.reconcile(&update);
                ClientEvent::Reconciled {
                    input_sequence: update.input_sequence,
                    applied,
                }
            }
            Packet::Message(WireMessage::StateSnapshot(snapshot)) => {
                let applied = match snapshot.find(&self.identity) {
                    Some(own) => self.reconcile(own),
                    None => false,
                };
                let actors = snapshot.player_positions.len();
                *self.last_snapshot.lock() = Some(snapshot);
                ClientEvent::Snapshot { actors, applied }
            }
            Packet::HeartbeatAck => ClientEvent::HeartbeatAck,
            Packet::Disconnect { detail } => {
                self.connected = false;
                info!(identity = %self.identity, reason = ?detail, "Server closed the session");
                ClientEvent::Disconnected { reason: detail }
            }
            other => {
                trace!(packet = ?other, "Ignoring datagram");
                ClientEvent::Ignored
            }
        }
    }

    fn reconcile(&self, update: &PositionUpdate) -> bool {
        self.prediction.lock().on_server_update(update)
    }
}
