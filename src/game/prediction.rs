//! Client-side prediction and reconciliation

use std::collections::VecDeque;
use std::f32::consts::{PI, TAU};

use glam::Vec3;
use serde::Serialize;
use tracing::{debug, trace};

use crate::config::MovementConfig;
use crate::net::protocol::{InputSample, PositionUpdate};

use super::movement::{integrate, MovementFlags, SPAWN_POSITION};

/// Position and look angles of one actor
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ActorPose {
    pub position: Vec3,
    pub yaw: f32,
    pub pitch: f32,
}

impl ActorPose {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            yaw: 0.0,
            pitch: 0.0,
        }
    }

    /// Blend towards `other`, turning through the shorter arc
    fn lerp(&self, other: &ActorPose, t: f32) -> ActorPose {
        if t <= 0.0 {
            return *self;
        }
        if t >= 1.0 {
            return *other;
        }
        ActorPose {
            position: self.position.lerp(other.position, t),
            yaw: self.yaw + shortest_angle(self.yaw, other.yaw) * t,
            pitch: self.pitch + (other.pitch - self.pitch) * t,
        }
    }
}

/// Signed difference `to - from` wrapped into `[-PI, PI)`
fn shortest_angle(from: f32, to: f32) -> f32 {
    (to - from + PI).rem_euclid(TAU) - PI
}

impl Default for ActorPose {
    fn default() -> Self {
        Self::at(SPAWN_POSITION)
    }
}

/// Keeps the locally controlled actor responsive while the server decides.
///
/// The predicted pose is always `server pose + replay(pending)`; it is
/// rebuilt from scratch on every server update, never patched.
#[derive(Debug, Clone)]
pub struct ClientPrediction {
    config: MovementConfig,
    speed_modifier: f32,
    next_sequence: u32,
    last_acknowledged: u32,
    /// Client-local clock stamped on outgoing samples
    clock: f32,
    pending: VecDeque<InputSample>,
    outbound: VecDeque<InputSample>,
    server: ActorPose,
    predicted: ActorPose,
}

impl ClientPrediction {
    pub fn new(config: MovementConfig, speed_modifier: f32) -> Self {
        Self::starting_at(config, speed_modifier, SPAWN_POSITION)
    }

    pub fn starting_at(config: MovementConfig, speed_modifier: f32, position: Vec3) -> Self {
        let pose = ActorPose::at(config.arena.clamp(position));
        Self {
            config,
            speed_modifier,
            next_sequence: 1,
            last_acknowledged: 0,
            clock: 0.0,
            pending: VecDeque::new(),
            outbound: VecDeque::new(),
            server: pose,
            predicted: pose,
        }
    }

    /// Turn one frame of input into a sequenced sample, apply it locally and
    /// queue it for transmission
    pub fn submit(&mut self, flags: MovementFlags, yaw: f32, pitch: f32, dt: f32) -> InputSample {
        let sequence_number = self.next_sequence;
        self.next_sequence = self.next_sequence.saturating_add(1);

        if dt.is_finite() && dt > 0.0 {
            self.clock += dt;
        }

        let sample = InputSample {
            sequence_number,
            timestamp: self.clock,
            flags,
            yaw: if yaw.is_finite() { yaw } else { self.predicted.yaw },
            pitch: if pitch.is_finite() { pitch } else { self.predicted.pitch },
            delta_time: dt,
        };

        self.predicted = self.step(self.predicted, &sample);
        self.pending.push_back(sample);
        self.outbound.push_back(sample);
        sample
    }

    /// Reconcile against an authoritative update.
    ///
    /// Returns false when the update was older than one already applied.
    pub fn on_server_update(&mut self, update: &PositionUpdate) -> bool {
        if update.input_sequence < self.last_acknowledged {
            trace!(
                input_sequence = update.input_sequence,
                last_acknowledged = self.last_acknowledged,
                "Ignoring reordered server update"
            );
            return false;
        }

        let position = update.position();
        if !position.is_finite() {
            debug!(player_id = %update.player_id, "Ignoring non-finite server position");
            return false;
        }

        self.server = ActorPose {
            position,
            yaw: update.yaw,
            pitch: update.pitch,
        };
        self.last_acknowledged = update.input_sequence;

        while self
            .pending
            .front()
            .is_some_and(|sample| sample.sequence_number <= update.input_sequence)
        {
            self.pending.pop_front();
        }

        self.predicted = self.replay();
        true
    }

    /// Server pose with every unacknowledged sample applied in order
    pub fn replay(&self) -> ActorPose {
        self.pending
            .iter()
            .fold(self.server, |pose, sample| self.step(pose, sample))
    }

    /// Blend between the last confirmed pose (0.0) and the prediction (1.0)
    pub fn display_state(&self, interpolation: f32) -> ActorPose {
        let t = if interpolation.is_nan() {
            1.0
        } else {
            interpolation.clamp(0.0, 1.0)
        };
        self.server.lerp(&self.predicted, t)
    }

    /// Samples submitted since the last drain, oldest first
    pub fn drain_outbound(&mut self) -> Vec<InputSample> {
        self.outbound.drain(..).collect()
    }

    pub fn pending(&self) -> impl Iterator<Item = &InputSample> {
        self.pending.iter()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn server_state(&self) -> ActorPose {
        self.server
    }

    pub fn predicted_state(&self) -> ActorPose {
        self.predicted
    }

    pub fn last_acknowledged(&self) -> u32 {
        self.last_acknowledged
    }

    pub fn next_sequence(&self) -> u32 {
        self.next_sequence
    }

    pub fn speed_modifier(&self) -> f32 {
        self.speed_modifier
    }

    fn step(&self, pose: ActorPose, sample: &InputSample) -> ActorPose {
        ActorPose {
            position: integrate(
                pose.position,
                sample.yaw,
                sample.flags,
                sample.delta_time,
                self.speed_modifier,
                &self.config,
            ),
            yaw: sample.yaw,
            pitch: sample.pitch,
        }
    }
}
