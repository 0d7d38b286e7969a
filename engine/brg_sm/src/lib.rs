//! Pattern/phase state machine.
//!
//! Pattern trees are built once from parsed source (delegates compiled up
//! front) and executed many times against different cancellation tokens
//! and generation contexts. Execution lowers each node onto scheduler
//! coroutines; phases poll their end conditions (external defeat signal,
//! timeout, cancellation) and report snapshot-diffed completions to the
//! scoring collaborator.

mod build;
mod collab;
mod entity;
mod exec;
mod node;
mod world;

pub use build::{build_pattern, BuildError};
pub use collab::{
    CounterSnapshot, DifficultyProvider, EffectRequester, InstanceData, NullEffects, NullInstance,
};
pub use entity::{Projectile, OFFSCREEN};
pub use exec::{spawn_pattern, PatternHandle, PhaseCompletion, PhaseOutcome};
pub use node::{Action, PatternNode, PhaseKind, PhaseProps, ENGINE_FPS};
pub use world::World;
