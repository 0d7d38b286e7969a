//! Pooled projectile entity.

use glam::Vec2;

use brg_exec::PoolItem;

/// Off-screen park position for released instances.
pub const OFFSCREEN: Vec2 = Vec2::new(-50.0, 0.0);

/// A transient fired object. Movement state lives in the movement
/// coroutine; the entity carries what the rest of the engine reads.
#[derive(Clone, Debug)]
pub struct Projectile {
    pub pos: Vec2,
}

impl Projectile {
    pub fn new() -> Self {
        Projectile { pos: OFFSCREEN }
    }
}

impl Default for Projectile {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolItem for Projectile {
    fn reset(&mut self) {
        self.pos = OFFSCREEN;
    }

    fn park(&mut self) {
        self.pos = OFFSCREEN;
    }
}
