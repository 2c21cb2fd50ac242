//! Server movement authority - canonical actor state and input validation

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use glam::Vec3;
use serde::Serialize;
use tracing::{info, trace, warn};

use crate::config::MovementConfig;
use crate::net::protocol::{InputSample, PositionUpdate, StateSnapshot};
use crate::util::time::server_time_of_day;

use super::movement::{integrate, is_plausible_move, max_plausible_distance, CharacterClass};

/// Authoritative state of one connected actor.
///
/// Never patched in place: every accepted input builds a new value that
/// replaces the old one under the map's per-key lock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanonicalActorState {
    pub position: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub class: CharacterClass,
    pub last_processed_sequence: u32,
    pub last_update: Instant,
}

impl CanonicalActorState {
    pub fn new(position: Vec3, class: CharacterClass, now: Instant) -> Self {
        Self {
            position,
            yaw: 0.0,
            pitch: 0.0,
            class,
            last_processed_sequence: 0,
            last_update: now,
        }
    }

    pub fn to_update(&self, identity: &str, timestamp: f32) -> PositionUpdate {
        PositionUpdate {
            sequence_number: 0,
            timestamp,
            player_id: identity.to_string(),
            x: self.position.x,
            y: self.position.y,
            z: self.position.z,
            yaw: self.yaw,
            pitch: self.pitch,
            input_sequence: self.last_processed_sequence,
        }
    }
}

/// Operator counters
#[derive(Debug, Default)]
pub struct AuthorityStats {
    pub inputs_applied: AtomicU64,
    pub stale_inputs: AtomicU64,
    pub unknown_identity: AtomicU64,
    pub rejected_moves: AtomicU64,
    pub evictions: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AuthorityStatsSnapshot {
    pub inputs_applied: u64,
    pub stale_inputs: u64,
    pub unknown_identity: u64,
    pub rejected_moves: u64,
    pub evictions: u64,
}

impl AuthorityStats {
    pub fn snapshot(&self) -> AuthorityStatsSnapshot {
        AuthorityStatsSnapshot {
            inputs_applied: self.inputs_applied.load(Ordering::Relaxed),
            stale_inputs: self.stale_inputs.load(Ordering::Relaxed),
            unknown_identity: self.unknown_identity.load(Ordering::Relaxed),
            rejected_moves: self.rejected_moves.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// The single source of truth for where every actor is.
///
/// Keyed by logical identity. Different actors are updated in parallel; a
/// single actor is only ever read-modify-written under its shard lock.
pub struct MovementAuthority {
    actors: DashMap<String, CanonicalActorState>,
    config: MovementConfig,
    stats: AuthorityStats,
}

impl MovementAuthority {
    pub fn new(config: MovementConfig) -> Self {
        Self {
            actors: DashMap::new(),
            config,
            stats: AuthorityStats::default(),
        }
    }

    pub fn config(&self) -> &MovementConfig {
        &self.config
    }

    pub fn stats(&self) -> &AuthorityStats {
        &self.stats
    }

    /// Create (or reset) an actor with `last_processed_sequence = 0`
    pub fn add_actor(&self, identity: &str, start_position: Vec3, class: CharacterClass) {
        let start = self.config.arena.clamp(start_position);
        let replaced = self
            .actors
            .insert(
                identity.to_string(),
                CanonicalActorState::new(start, class, Instant::now()),
            )
            .is_some();

        info!(
            identity = %identity,
            position = ?start,
            class = %class,
            replaced,
            "Actor added"
        );
    }

    /// Remove an actor; returns false if it was already absent
    pub fn remove_actor(&self, identity: &str) -> bool {
        let removed = self.actors.remove(identity).is_some();
        if removed {
            info!(identity = %identity, "Actor removed");
        }
        removed
    }

    pub fn get(&self, identity: &str) -> Option<CanonicalActorState> {
        self.actors.get(identity).map(|entry| *entry.value())
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.actors.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    /// Refresh liveness without moving the actor
    pub fn touch(&self, identity: &str) {
        self.touch_at(identity, Instant::now());
    }

    pub fn touch_at(&self, identity: &str, now: Instant) {
        if let Some(mut entry) = self.actors.get_mut(identity) {
            entry.last_update = now;
        }
    }

    pub fn apply_input(&self, identity: &str, sample: &InputSample) -> Option<PositionUpdate> {
        self.apply_input_at(identity, sample, Instant::now())
    }

    /// Validate and apply one input sample.
    ///
    /// Rotation is taken from the client verbatim even when the positional
    /// part is rejected. That keeps look control latency-free, and it is a
    /// trust boundary: a modified client can aim freely, only its position
    /// is policed.
    pub fn apply_input_at(
        &self,
        identity: &str,
        sample: &InputSample,
        now: Instant,
    ) -> Option<PositionUpdate> {
        let Some(mut entry) = self.actors.get_mut(identity) else {
            self.stats.unknown_identity.fetch_add(1, Ordering::Relaxed);
            warn!(identity = %identity, "Received input for unknown actor");
            return None;
        };

        let current = *entry.value();

        if sample.sequence_number <= current.last_processed_sequence {
            self.stats.stale_inputs.fetch_add(1, Ordering::Relaxed);
            trace!(
                identity = %identity,
                sequence = sample.sequence_number,
                last = current.last_processed_sequence,
                "Ignoring stale input"
            );
            return None;
        }

        let yaw = if sample.yaw.is_finite() {
            sample.yaw
        } else {
            current.yaw
        };
        let pitch = if sample.pitch.is_finite() {
            sample.pitch
        } else {
            current.pitch
        };

        let speed_modifier = current.class.speed_modifier();
        let candidate = integrate(
            current.position,
            yaw,
            sample.flags,
            sample.delta_time,
            speed_modifier,
            &self.config,
        );

        let position = if is_plausible_move(
            current.position,
            candidate,
            sample.delta_time,
            speed_modifier,
            &self.config,
        ) {
            candidate
        } else {
            self.stats.rejected_moves.fetch_add(1, Ordering::Relaxed);
            warn!(
                identity = %identity,
                sequence = sample.sequence_number,
                distance = current.position.distance(candidate),
                max = max_plausible_distance(sample.delta_time, speed_modifier, &self.config),
                "Suspicious movement rejected"
            );
            current.position
        };

        let next = CanonicalActorState {
            position,
            yaw,
            pitch,
            class: current.class,
            last_processed_sequence: sample.sequence_number,
            last_update: now,
        };
        *entry.value_mut() = next;
        drop(entry);

        self.stats.inputs_applied.fetch_add(1, Ordering::Relaxed);
        Some(next.to_update(identity, server_time_of_day()))
    }

    /// Point-in-time copy of every live actor.
    ///
    /// Each value is copied out under its shard's read lock, so no actor is
    /// ever observed half-updated.
    pub fn snapshot(&self) -> StateSnapshot {
        let server_time = server_time_of_day();
        let player_positions = self
            .actors
            .iter()
            .map(|entry| entry.value().to_update(entry.key(), server_time))
            .collect();

        StateSnapshot {
            sequence_number: 0,
            timestamp: server_time,
            player_positions,
            server_time,
        }
    }

    pub fn evict_stale(&self, threshold: Duration) -> Vec<String> {
        self.evict_stale_at(Instant::now(), threshold)
    }

    /// Remove every actor silent for longer than `threshold` as of `now`
    pub fn evict_stale_at(&self, now: Instant, threshold: Duration) -> Vec<String> {
        let mut evicted = Vec::new();
        self.actors.retain(|identity, state| {
            let stale = now.saturating_duration_since(state.last_update) > threshold;
            if stale {
                evicted.push(identity.clone());
            }
            !stale
        });

        for identity in &evicted {
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            info!(identity = %identity, "Evicted inactive actor");
        }
        evicted
    }
}
