//! Movement integration shared by client prediction and the server authority
//!
//! Every position either side computes goes through [`integrate`] and
//! [`Arena::clamp`]. There is exactly one copy of this logic; prediction only
//! stays in agreement with the server because both call it.

use std::fmt;
use std::str::FromStr;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::MovementConfig;

/// Height above the ground plane an actor rests at
pub const FLOOR_OFFSET: f32 = 0.51;

/// Where newly connected actors appear
pub const SPAWN_POSITION: Vec3 = Vec3::new(0.0, FLOOR_OFFSET, 0.0);

/// Six boolean movement intents sampled from the input device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementFlags {
    #[serde(rename = "MoveForward")]
    pub forward: bool,
    #[serde(rename = "MoveBackward")]
    pub backward: bool,
    #[serde(rename = "MoveLeft")]
    pub left: bool,
    #[serde(rename = "MoveRight")]
    pub right: bool,
    #[serde(rename = "MoveUp")]
    pub up: bool,
    #[serde(rename = "MoveDown")]
    pub down: bool,
}

impl MovementFlags {
    pub const FORWARD: Self = Self {
        forward: true,
        backward: false,
        left: false,
        right: false,
        up: false,
        down: false,
    };

    /// Unit direction in actor space (forward is -Z), or zero when nothing is
    /// pressed or the pressed keys cancel out
    pub fn direction(&self) -> Vec3 {
        let mut dir = Vec3::ZERO;
        if self.forward {
            dir += Vec3::NEG_Z;
        }
        if self.backward {
            dir += Vec3::Z;
        }
        if self.left {
            dir += Vec3::NEG_X;
        }
        if self.right {
            dir += Vec3::X;
        }
        if self.up {
            dir += Vec3::Y;
        }
        if self.down {
            dir += Vec3::NEG_Y;
        }
        dir.normalize_or_zero()
    }

    pub fn is_idle(&self) -> bool {
        self.direction() == Vec3::ZERO
    }
}

/// Square arena with a floor plane
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Arena {
    /// Edge length of the ground square, centred on the origin
    pub size: f32,
    /// Half extent of the actor; keeps its body inside the walls
    pub actor_radius: f32,
    /// Height of the ground plane
    pub ground_y: f32,
}

impl Default for Arena {
    fn default() -> Self {
        Self::square(50.0)
    }
}

impl Arena {
    pub fn square(size: f32) -> Self {
        Self {
            size,
            actor_radius: 0.5,
            ground_y: 0.0,
        }
    }

    /// Inclusive horizontal bounds for the actor's centre
    pub fn horizontal_bounds(&self) -> (f32, f32) {
        let half = self.size / 2.0;
        (-half + self.actor_radius, half - self.actor_radius)
    }

    pub fn floor(&self) -> f32 {
        self.ground_y + FLOOR_OFFSET
    }

    /// Clamp a position into the arena.
    ///
    /// Pure and idempotent. Built from `max`/`min` rather than `clamp` so a
    /// non-finite coordinate lands on a bound instead of propagating.
    pub fn clamp(&self, position: Vec3) -> Vec3 {
        let (min, max) = self.horizontal_bounds();
        Vec3::new(
            position.x.max(min).min(max),
            position.y.max(self.floor()),
            position.z.max(min).min(max),
        )
    }

    pub fn contains(&self, position: Vec3) -> bool {
        self.clamp(position) == position
    }
}

/// Playable classes and their movement speed modifiers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CharacterClass {
    #[default]
    Brawler,
    Ranger,
    Spellcaster,
}

impl CharacterClass {
    pub fn speed_modifier(self) -> f32 {
        match self {
            CharacterClass::Brawler => 0.8,
            CharacterClass::Ranger => 1.2,
            CharacterClass::Spellcaster => 1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CharacterClass::Brawler => "Brawler",
            CharacterClass::Ranger => "Ranger",
            CharacterClass::Spellcaster => "Spellcaster",
        }
    }
}

impl fmt::Display for CharacterClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown character class: {0}")]
pub struct UnknownClass(pub String);

impl FromStr for CharacterClass {
    type Err = UnknownClass;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "brawler" => Ok(CharacterClass::Brawler),
            "ranger" => Ok(CharacterClass::Ranger),
            "spellcaster" => Ok(CharacterClass::Spellcaster),
            _ => Err(UnknownClass(s.to_string())),
        }
    }
}

/// Rotate an actor-space vector about the vertical axis
pub fn rotate_by_yaw(v: Vec3, yaw: f32) -> Vec3 {
    let (sin_yaw, cos_yaw) = yaw.sin_cos();
    Vec3::new(
        v.x * cos_yaw + v.z * sin_yaw,
        v.y,
        -v.x * sin_yaw + v.z * cos_yaw,
    )
}

/// The part of a sample's `dt` that produces motion: at most
/// `max_input_dt`, and zero when negative or non-finite
pub fn effective_dt(dt: f32, config: &MovementConfig) -> f32 {
    if dt.is_finite() && dt > 0.0 {
        dt.min(config.max_input_dt)
    } else {
        0.0
    }
}

/// Advance a position by one input sample.
///
/// Motion is credited for [`effective_dt`] only, so a long frame moves as
/// far as `max_input_dt` allows on both client and server. The result is
/// always clamped into the arena, even for an idle sample.
pub fn integrate(
    position: Vec3,
    yaw: f32,
    flags: MovementFlags,
    dt: f32,
    speed_modifier: f32,
    config: &MovementConfig,
) -> Vec3 {
    let dt = effective_dt(dt, config);
    let direction = rotate_by_yaw(flags.direction(), yaw);
    let step = direction * (config.base_speed * speed_modifier * dt);

    let candidate = if step.is_finite() {
        position + step
    } else {
        position
    };

    let clamped = config.arena.clamp(candidate);
    if clamped != candidate {
        debug!(
            original = ?candidate,
            constrained = ?clamped,
            "Boundary constraint applied"
        );
    }
    clamped
}

/// Largest distance a single sample may legitimately move the actor
pub fn max_plausible_distance(dt: f32, speed_modifier: f32, config: &MovementConfig) -> f32 {
    config.base_speed * speed_modifier * effective_dt(dt, config) * config.anti_cheat_tolerance
}

/// Anti-cheat distance check between two canonical positions
pub fn is_plausible_move(
    from: Vec3,
    to: Vec3,
    dt: f32,
    speed_modifier: f32,
    config: &MovementConfig,
) -> bool {
    let distance = from.distance(to);
    distance.is_finite() && distance <= max_plausible_distance(dt, speed_modifier, config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MovementConfig {
        MovementConfig::default()
    }

    #[test]
    fn opposing_flags_cancel() {
        let flags = MovementFlags {
            forward: true,
            backward: true,
            ..Default::default()
        };
        assert_eq!(flags.direction(), Vec3::ZERO);
        assert!(flags.is_idle());
    }

    #[test]
    fn diagonal_direction_is_normalized() {
        let flags = MovementFlags {
            forward: true,
            right: true,
            ..Default::default()
        };
        assert!((flags.direction().length() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn integrate_is_deterministic() {
        let flags = MovementFlags {
            forward: true,
            left: true,
            up: true,
            ..Default::default()
        };
        let start = Vec3::new(3.0, 2.0, -4.0);
        let a = integrate(start, 0.7, flags, 1.0 / 60.0, 1.2, &config());
        let b = integrate(start, 0.7, flags, 1.0 / 60.0, 1.2, &config());
        assert_eq!(a.to_array().map(f32::to_bits), b.to_array().map(f32::to_bits));
    }

    #[test]
    fn forward_at_zero_yaw_moves_along_negative_z() {
        let pos = integrate(SPAWN_POSITION, 0.0, MovementFlags::FORWARD, 0.1, 1.0, &config());
        assert!((pos.z - -0.5).abs() < 1e-6);
        assert!((pos.x).abs() < 1e-6);
        assert_eq!(pos.y, SPAWN_POSITION.y);
    }

    #[test]
    fn yaw_rotates_forward_about_vertical_axis() {
        let pos = integrate(
            SPAWN_POSITION,
            std::f32::consts::FRAC_PI_2,
            MovementFlags::FORWARD,
            0.1,
            1.0,
            &config(),
        );
        assert!((pos.x - -0.5).abs() < 1e-5);
        assert!(pos.z.abs() < 1e-5);
    }

    #[test]
    fn invalid_dt_does_not_move() {
        for dt in [-1.0, f32::NAN, f32::INFINITY] {
            let pos = integrate(SPAWN_POSITION, 0.0, MovementFlags::FORWARD, dt, 1.0, &config());
            assert_eq!(pos, SPAWN_POSITION);
        }
    }

    #[test]
    fn clamp_is_idempotent() {
        let arena = Arena::default();
        let (min, max) = arena.horizontal_bounds();
        let samples = [
            Vec3::ZERO,
            Vec3::new(1000.0, -1000.0, -1000.0),
            Vec3::new(max, arena.floor(), min),
            Vec3::new(min, 10.0, max),
            Vec3::new(-24.4, 0.2, 24.6),
            Vec3::new(f32::INFINITY, f32::NEG_INFINITY, 3.0),
            Vec3::new(f32::NAN, f32::NAN, f32::NAN),
        ];
        for p in samples {
            let once = arena.clamp(p);
            assert_eq!(arena.clamp(once), once, "not idempotent for {p:?}");
            assert!(once.is_finite());
            assert!(arena.contains(once));
        }
    }

    #[test]
    fn clamp_keeps_actor_inside_walls_and_above_floor() {
        let arena = Arena::default();
        let clamped = arena.clamp(Vec3::new(100.0, -5.0, -100.0));
        assert_eq!(clamped, Vec3::new(24.5, FLOOR_OFFSET, -24.5));
    }

    #[test]
    fn plausibility_boundary_is_inclusive() {
        let config = config();
        let max = max_plausible_distance(0.25, 1.0, &config);
        assert_eq!(max, 5.0 * 0.25 * 1.5);

        let origin = Vec3::ZERO;
        assert!(is_plausible_move(origin, Vec3::new(max, 0.0, 0.0), 0.25, 1.0, &config));
        assert!(!is_plausible_move(
            origin,
            Vec3::new(max + 1.0, 0.0, 0.0),
            0.25,
            1.0,
            &config
        ));
    }

    #[test]
    fn long_frame_moves_at_most_max_input_dt() {
        let config = config();
        let long = integrate(SPAWN_POSITION, 0.0, MovementFlags::FORWARD, 0.4, 1.0, &config);
        let capped = integrate(
            SPAWN_POSITION,
            0.0,
            MovementFlags::FORWARD,
            config.max_input_dt,
            1.0,
            &config,
        );
        assert_eq!(long, capped);
        assert_eq!(
            max_plausible_distance(10.0, 1.0, &config),
            max_plausible_distance(config.max_input_dt, 1.0, &config)
        );
        assert_eq!(max_plausible_distance(f32::NAN, 1.0, &config), 0.0);
    }

    #[test]
    fn integrated_moves_are_always_plausible() {
        let config = config();
        let diagonal = MovementFlags {
            forward: true,
            right: true,
            up: true,
            ..Default::default()
        };
        for dt in [1.0 / 60.0, 0.1, 0.25, 0.4, 2.0, 30.0] {
            for class in [CharacterClass::Brawler, CharacterClass::Ranger, CharacterClass::Spellcaster] {
                let modifier = class.speed_modifier();
                let to = integrate(SPAWN_POSITION, 0.9, diagonal, dt, modifier, &config);
                assert!(is_plausible_move(SPAWN_POSITION, to, dt, modifier, &config));
            }
        }
    }

    #[test]
    fn teleport_is_implausible() {
        let config = config();
        let teleport = SPAWN_POSITION + Vec3::new(0.0, 0.0, -20.0);
        assert!(!is_plausible_move(SPAWN_POSITION, teleport, 0.4, 1.2, &config));
    }

    #[test]
    fn class_parsing() {
        assert_eq!("ranger".parse::<CharacterClass>(), Ok(CharacterClass::Ranger));
        assert_eq!(" Spellcaster ".parse::<CharacterClass>(), Ok(CharacterClass::Spellcaster));
        assert!("paladin".parse::<CharacterClass>().is_err());
        assert_eq!(CharacterClass::default().speed_modifier(), 0.8);
    }
}
