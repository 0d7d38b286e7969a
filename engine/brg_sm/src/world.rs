//! The per-tick execution context handed to every coroutine.

use brg_exec::Pool;

use crate::{EffectRequester, InstanceData, NullEffects, NullInstance, Projectile, ENGINE_FPS};

/// Mutable engine state shared by all coroutines within a tick: the entity
/// pool plus the collaborator handles. Single logical update thread; no
/// mutation crosses a tick boundary except through these fields.
pub struct World {
    pub frame: u64,
    /// Seconds per tick.
    pub dt: f32,
    pub pool: Pool<Projectile>,
    pub instance: Box<dyn InstanceData>,
    pub effects: Box<dyn EffectRequester>,
}

impl World {
    pub fn new(instance: Box<dyn InstanceData>, effects: Box<dyn EffectRequester>) -> Self {
        World {
            frame: 0,
            dt: 1.0 / ENGINE_FPS,
            pool: Pool::new(),
            instance,
            effects,
        }
    }

    pub fn headless() -> Self {
        Self::new(Box::<NullInstance>::default(), Box::<NullEffects>::default())
    }

    /// Scene teardown: the pool is fully cleared, not reset.
    pub fn teardown(&mut self) {
        self.pool.clear();
    }
}
