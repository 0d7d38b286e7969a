//! Top-level engine context.
//!
//! [`Engine`] owns every process-scoped registry: the operator repository,
//! the delegate compiler and its caches, the pattern cache, the scheduler,
//! and the world (entity pool plus collaborator handles). It is constructed
//! at startup and torn down at shutdown; nothing here is ambient global
//! state.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{debug, info};

use brg_compile::{normalize_source, Compiler};
use brg_ops::build_op_table;
use brg_rt::{CancelRef, CancelSource, GenCtx, RngStream};
use brg_sm::{
    build_pattern, spawn_pattern, BuildError, DifficultyProvider, EffectRequester, InstanceData,
    PatternHandle, PatternNode, World,
};

pub use brg_sm::{CounterSnapshot, NullEffects, NullInstance, PhaseCompletion, PhaseOutcome};

/// Instance data that records completions into a shared buffer; useful for
/// headless runs and drivers that only need outcomes.
#[derive(Default)]
pub struct RecordingInstance {
    completions: Rc<RefCell<Vec<PhaseCompletion>>>,
}

impl RecordingInstance {
    pub fn shared(&self) -> Rc<RefCell<Vec<PhaseCompletion>>> {
        Rc::clone(&self.completions)
    }
}

impl InstanceData for RecordingInstance {
    fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot::default()
    }

    fn health_depleted(&self) -> bool {
        false
    }

    fn phase_end(&mut self, completion: PhaseCompletion) {
        self.completions.borrow_mut().push(completion);
    }
}

/// The engine: compilation front door plus the frame-stepped runtime.
pub struct Engine {
    compiler: Compiler,
    patterns: FxHashMap<String, Arc<PatternNode>>,
    sched: brg_exec::Scheduler<World>,
    world: World,
    /// Encounter root token; cancelling it ends every pattern run.
    encounter: Rc<CancelSource>,
    encounter_ref: CancelRef,
    base_seed: u64,
    spawned: u64,
}

impl Engine {
    pub fn new(instance: Box<dyn InstanceData>, effects: Box<dyn EffectRequester>) -> Self {
        Self::with_difficulty_and_seed(instance, effects, 1.0, 0)
    }

    pub fn with_difficulty(
        instance: Box<dyn InstanceData>,
        effects: Box<dyn EffectRequester>,
        difficulty: &dyn DifficultyProvider,
    ) -> Self {
        Self::with_difficulty_and_seed(instance, effects, difficulty.multiplier(), 0)
    }

    pub fn with_difficulty_and_seed(
        instance: Box<dyn InstanceData>,
        effects: Box<dyn EffectRequester>,
        difficulty: f32,
        base_seed: u64,
    ) -> Self {
        let encounter = CancelSource::new();
        let encounter_ref: CancelRef = encounter.clone();
        info!(difficulty, base_seed, "engine start");
        Engine {
            compiler: Compiler::with_difficulty(Rc::new(build_op_table()), difficulty),
            patterns: FxHashMap::default(),
            sched: brg_exec::Scheduler::new(),
            world: World::new(instance, effects),
            encounter,
            encounter_ref,
            base_seed,
            spawned: 0,
        }
    }

    /// Headless engine plus a shared handle to the recorded completions.
    pub fn headless() -> (Self, Rc<RefCell<Vec<PhaseCompletion>>>) {
        let recorder = RecordingInstance::default();
        let completions = recorder.shared();
        (
            Self::new(Box::new(recorder), Box::<NullEffects>::default()),
            completions,
        )
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn compiler(&self) -> &Compiler {
        &self.compiler
    }

    /// Compile (or fetch) the pattern for a script. Patterns are cached by
    /// normalized source text and shared across runtime instances.
    pub fn compile(&mut self, src: &str) -> Result<Arc<PatternNode>, BuildError> {
        let key = normalize_source(src);
        if let Some(hit) = self.patterns.get(&key) {
            debug!(src = %key, "pattern cache hit");
            return Ok(Arc::clone(hit));
        }
        let pattern = build_pattern(src, &self.compiler)?;
        self.patterns.insert(key, Arc::clone(&pattern));
        Ok(pattern)
    }

    fn fresh_gcx(&mut self) -> GenCtx {
        self.spawned += 1;
        GenCtx::new(RngStream::for_entity(self.base_seed, self.spawned))
    }

    /// Start a root pattern run bounded by the encounter token.
    pub fn start_pattern(&mut self, src: &str) -> Result<PatternHandle, BuildError> {
        let pattern = self.compile(src)?;
        let gcx = self.fresh_gcx();
        let parent = Rc::clone(&self.encounter_ref);
        Ok(spawn_pattern(&mut self.sched, pattern, &parent, gcx, true))
    }

    /// Start a nested summon under a running pattern: bounded by the
    /// encounter root plus its own token, not by the parent's local state.
    pub fn start_summon(
        &mut self,
        src: &str,
        parent: &PatternHandle,
    ) -> Result<PatternHandle, BuildError> {
        let pattern = self.compile(src)?;
        let gcx = self.fresh_gcx();
        let scope = parent.scope();
        Ok(spawn_pattern(&mut self.sched, pattern, &scope, gcx, false))
    }

    /// Advance one frame.
    pub fn tick(&mut self) {
        self.world.frame += 1;
        self.sched.tick(&mut self.world);
    }

    pub fn run_frames(&mut self, n: u32) {
        for _ in 0..n {
            self.tick();
        }
    }

    pub fn frame(&self) -> u64 {
        self.world.frame
    }

    /// Abort the whole encounter: every joint and passthrough derived from
    /// the root token observes this.
    pub fn abort_encounter(&self) {
        self.encounter.cancel();
    }

    /// Forced shutdown: drain the scheduler and clear the pool. Returns the
    /// number of non-droppable coroutines that were still incomplete.
    pub fn shutdown(&mut self) -> usize {
        let survivors = self.sched.close_all();
        self.world.teardown();
        info!(survivors, "engine shutdown");
        survivors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_cache_returns_shared_instance() {
        let (mut engine, _) = Engine::headless();
        let a = engine.compile("phase 0 <hp 100> fire-straight(speed=1)").unwrap();
        let b = engine
            .compile("phase 0  <hp 100>\n  fire-straight(speed=1)  # layout variant")
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_shutdown_after_abort_is_clean() {
        let (mut engine, _) = Engine::headless();
        let _handle = engine.start_pattern("phase 0 <hp 100> fire-straight(speed=1)").unwrap();
        engine.run_frames(10);
        engine.abort_encounter();
        engine.run_frames(2);
        // The pattern exec observed the cancel and completed; only
        // droppable movers could remain, and they completed too.
        assert_eq!(engine.shutdown(), 0);
    }

    #[test]
    fn test_shutdown_mid_run_reports_survivors() {
        let (mut engine, _) = Engine::headless();
        let _handle = engine.start_pattern("phase 0 <hp 100> fire-straight(speed=1)").unwrap();
        engine.run_frames(10);
        // The pattern exec is non-droppable and still pending.
        assert_eq!(engine.shutdown(), 1);
    }
}
