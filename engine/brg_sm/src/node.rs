//! Pattern tree nodes.
//!
//! Nodes are constructed once (usually from parsed source), hold their
//! delegates pre-compiled, and are never mutated after construction; the
//! same tree can be executed many times against different cancellation
//! tokens and generation contexts.

use brg_compile::{Gcxf, VelocityStep};

/// Engine update rate in frames per second.
pub const ENGINE_FPS: f32 = 120.0;

/// Frames a fired projectile lives unless released earlier.
pub const DEFAULT_TTL_FRAMES: u32 = 600;

/// Declared phase type.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PhaseKind {
    /// Stage section (not scored).
    Stage,
    /// Boss non-spell.
    Nonspell,
    /// Scored spell card.
    Spell,
    /// Survival/timeout card.
    Timeout,
    /// Dialogue, no combat.
    Dialogue,
}

impl PhaseKind {
    pub fn parse(name: &str) -> Option<PhaseKind> {
        match name {
            "stage" => Some(PhaseKind::Stage),
            "nonspell" => Some(PhaseKind::Nonspell),
            "spell" => Some(PhaseKind::Spell),
            "timeout" => Some(PhaseKind::Timeout),
            "dialogue" => Some(PhaseKind::Dialogue),
            _ => None,
        }
    }
}

/// Declared phase metadata.
#[derive(Clone, Debug)]
pub struct PhaseProps {
    pub kind: Option<PhaseKind>,
    /// Hit-point budget announced to the instance-data collaborator.
    pub hp: Option<u32>,
    /// Background key requested through the effects collaborator.
    pub background: Option<String>,
}

/// A leaf effect.
#[derive(Clone, Debug)]
pub enum Action {
    /// Spawn a projectile with constant velocity `polar(speed, angle)`.
    FireStraight {
        style: String,
        speed: Gcxf<f32>,
        angle: Gcxf<f32>,
    },
    /// Spawn a projectile whose velocity is the symbolic derivative of a
    /// position curve.
    FireCurve { style: String, curve: VelocityStep },
    /// Fire-and-forget effect/audio request.
    Effect { key: String },
    /// Suspend the enclosing async block.
    Wait { seconds: Gcxf<f32> },
}

/// The pattern tree.
#[derive(Clone, Debug)]
pub enum PatternNode {
    Action(Action),
    /// Fixed sequence of actions with no inter-step suspension.
    Sync {
        wait: Gcxf<f32>,
        children: Vec<PatternNode>,
    },
    /// Actions interleaved with explicit waits; runs concurrently with
    /// sibling async nodes under the same phase.
    Async {
        wait: Gcxf<f32>,
        children: Vec<PatternNode>,
    },
    /// A bounded episode with completion semantics.
    Phase {
        props: PhaseProps,
        /// Timeout in seconds; zero means no timeout.
        timeout: Gcxf<f32>,
        children: Vec<PatternNode>,
    },
    /// Root container sequencing phases.
    Pattern { phases: Vec<PatternNode> },
}

impl PatternNode {
    /// Phases of a root pattern node.
    pub fn phases(&self) -> &[PatternNode] {
        match self {
            PatternNode::Pattern { phases } => phases,
            _ => &[],
        }
    }
}
