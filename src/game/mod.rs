//! Movement simulation shared by client and server

pub mod authority;
pub mod movement;
pub mod prediction;

pub use authority::{CanonicalActorState, MovementAuthority};
pub use movement::{integrate, Arena, CharacterClass, MovementFlags, SPAWN_POSITION};
pub use prediction::{ActorPose, ClientPrediction};
