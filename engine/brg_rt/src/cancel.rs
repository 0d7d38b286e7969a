//! Hierarchical cancellation tree.
//!
//! Three node shapes: a root [`CancelSource`], [`joint`] (cancelled when
//! either side is), and [`passthrough`] (bounded by the ultimate root plus
//! its own local token, discarding every intermediate joint's local state).
//!
//! The asymmetry between `joint` and `passthrough` is observable behavior
//! pattern content depends on: a root pattern invocation joins against its
//! caller, while a nested summon passes through to the encounter root so
//! that ending the enclosing pattern does not end the summon. Do not unify
//! the two composition rules.
//!
//! Cancellation is a polled condition, never an error path. Nodes are
//! single-threaded `Rc` values; the execution model runs one logical update
//! thread.

use std::cell::Cell;
use std::rc::Rc;

/// Cancellation strength. Higher levels win; a scene-level cancel cannot be
/// downgraded by a later operation-level cancel.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum CancelLevel {
    None,
    Operation,
    Scene,
}

/// A node in the cancellation tree.
pub trait Cancellee {
    fn cancelled(&self) -> bool;

    /// The ultimate root bound of this node; `None` means this node is
    /// itself a root.
    fn root(&self) -> Option<CancelRef>;
}

pub type CancelRef = Rc<dyn Cancellee>;

/// Resolve a node to its ultimate root.
fn root_of(c: &CancelRef) -> CancelRef {
    c.root().unwrap_or_else(|| Rc::clone(c))
}

/// A cancellable root token.
pub struct CancelSource {
    level: Cell<CancelLevel>,
}

impl CancelSource {
    pub fn new() -> Rc<CancelSource> {
        Rc::new(CancelSource {
            level: Cell::new(CancelLevel::None),
        })
    }

    /// Cancel at operation level.
    pub fn cancel(&self) {
        self.cancel_to(CancelLevel::Operation);
    }

    /// Cancel at a specific level; only upgrades stick.
    pub fn cancel_to(&self, level: CancelLevel) {
        if level > self.level.get() {
            self.level.set(level);
        }
    }

    pub fn level(&self) -> CancelLevel {
        self.level.get()
    }
}

impl Cancellee for CancelSource {
    fn cancelled(&self) -> bool {
        self.level.get() > CancelLevel::None
    }

    fn root(&self) -> Option<CancelRef> {
        None
    }
}

/// A token that can never be cancelled, for detached invocations.
pub fn null_cancel() -> CancelRef {
    CancelSource::new()
}

struct Joint {
    parent: CancelRef,
    local: CancelRef,
}

impl Cancellee for Joint {
    fn cancelled(&self) -> bool {
        self.parent.cancelled() || self.local.cancelled()
    }

    fn root(&self) -> Option<CancelRef> {
        Some(root_of(&self.parent))
    }
}

struct Passthrough {
    root: CancelRef,
    local: CancelRef,
}

impl Cancellee for Passthrough {
    fn cancelled(&self) -> bool {
        self.root.cancelled() || self.local.cancelled()
    }

    fn root(&self) -> Option<CancelRef> {
        Some(Rc::clone(&self.root))
    }
}

/// Composition for a *root* pattern invocation: cancelled when either the
/// caller's token or the node-local token cancels.
pub fn joint(parent: &CancelRef, local: &CancelRef) -> CancelRef {
    Rc::new(Joint {
        parent: Rc::clone(parent),
        local: Rc::clone(local),
    })
}

/// Composition for a *nested* (summon) invocation: bounded only by the
/// ultimate root of `parent` plus `local`; the parent's own local state is
/// discarded.
pub fn passthrough(parent: &CancelRef, local: &CancelRef) -> CancelRef {
    Rc::new(Passthrough {
        root: root_of(parent),
        local: Rc::clone(local),
    })
}
