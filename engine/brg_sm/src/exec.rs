//! Pattern execution: the interpreter that walks pattern trees by lowering
//! them onto scheduler coroutines.
//!
//! Cancellation composition: a *root* pattern invocation runs under
//! `joint(parent, local)`, a *nested* (summon) invocation under
//! `passthrough(parent, local)`. Ending one summon therefore never
//! cascade-cancels siblings or nested summons sharing the encounter root;
//! only the root token reaches down through every passthrough. The two
//! rules are intentionally different and pattern content depends on both.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use glam::Vec2;
use tracing::{debug, error, info};

use brg_compile::{Gcxf, MoveState, VelocityStep};
use brg_exec::{Coroutine, EntityId, SchedOps, Scheduler, Step, Tier};
use brg_rt::{joint, passthrough, CancelRef, CancelSource, GenCtx};

use crate::collab::CounterSnapshot;
use crate::node::{Action, PatternNode, PhaseKind, DEFAULT_TTL_FRAMES, ENGINE_FPS};
use crate::{Projectile, World};

/// How a phase ended.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// Ended by the external defeat signal.
    Cleared,
    /// Ended by its own timeout.
    Timeout,
    /// Ended by cancellation (parent cancel or a skip override).
    Cancelled,
}

/// Reported to the scoring collaborator when a phase ends: the outcome plus
/// counters snapshot at phase start and diffed at phase end.
#[derive(Clone, Debug, PartialEq)]
pub struct PhaseCompletion {
    pub index: usize,
    pub kind: Option<PhaseKind>,
    pub outcome: PhaseOutcome,
    pub hits_taken: u32,
    pub meter_gained: f32,
    pub bombs_used: u32,
}

struct SkipRequest {
    target: usize,
    callback: Option<Box<dyn FnOnce()>>,
}

#[derive(Default)]
struct SkipState {
    pending: Option<SkipRequest>,
}

impl SkipState {
    /// Idempotent; the highest pending target wins within a tick.
    fn request(&mut self, target: usize, callback: Option<Box<dyn FnOnce()>>) {
        match &self.pending {
            Some(existing) if existing.target >= target => {}
            _ => self.pending = Some(SkipRequest { target, callback }),
        }
    }

    fn take(&mut self) -> Option<SkipRequest> {
        self.pending.take()
    }
}

/// External control surface for a running pattern.
pub struct PatternHandle {
    local: Rc<CancelSource>,
    scope: CancelRef,
    skip: Rc<RefCell<SkipState>>,
    done: Rc<Cell<bool>>,
}

impl PatternHandle {
    /// Cancel this pattern run (local token only; the parent is untouched).
    pub fn cancel(&self) {
        self.local.cancel();
    }

    /// The pattern's composed scope token, for spawning nested summons.
    pub fn scope(&self) -> CancelRef {
        Rc::clone(&self.scope)
    }

    /// Request a jump to phase `target`. Idempotent; within one tick the
    /// highest pending target wins.
    pub fn request_skip(&self, target: usize) {
        self.skip.borrow_mut().request(target, None);
    }

    /// Skip with a callback fired once the jump lands.
    pub fn request_skip_with(&self, target: usize, callback: impl FnOnce() + 'static) {
        self.skip.borrow_mut().request(target, Some(Box::new(callback)));
    }

    pub fn is_done(&self) -> bool {
        self.done.get()
    }
}

/// Start a pattern run on the scheduler.
///
/// `root` selects the cancellation composition: `joint` for root
/// invocations, `passthrough` for nested summons (see module docs).
pub fn spawn_pattern(
    sched: &mut Scheduler<World>,
    node: Arc<PatternNode>,
    parent: &CancelRef,
    gcx: GenCtx,
    root: bool,
) -> PatternHandle {
    let local = CancelSource::new();
    let local_ref: CancelRef = local.clone();
    let scope = if root {
        joint(parent, &local_ref)
    } else {
        passthrough(parent, &local_ref)
    };
    let handle = PatternHandle {
        local: Rc::clone(&local),
        scope: Rc::clone(&scope),
        skip: Rc::default(),
        done: Rc::default(),
    };
    sched.run(
        Tier::Behavior,
        PatternExec {
            node,
            ct: scope,
            local,
            gcx,
            next_phase: 0,
            running: None,
            skip: Rc::clone(&handle.skip),
            done: Rc::clone(&handle.done),
            pending_skip_cb: None,
        },
    );
    handle
}

struct RunningPhase {
    index: usize,
    kind: Option<PhaseKind>,
    shifter: Rc<CancelSource>,
    start: CounterSnapshot,
    started_frame: u64,
    timeout_frames: Option<u64>,
}

struct PatternExec {
    node: Arc<PatternNode>,
    /// Composed scope token (joint or passthrough over the caller's).
    ct: CancelRef,
    /// Local token; cancelled when the run finishes so pattern-scoped work
    /// stops with it.
    local: Rc<CancelSource>,
    gcx: GenCtx,
    next_phase: usize,
    running: Option<RunningPhase>,
    skip: Rc<RefCell<SkipState>>,
    done: Rc<Cell<bool>>,
    pending_skip_cb: Option<Box<dyn FnOnce()>>,
}

impl PatternExec {
    fn finish(&mut self) -> Step<World> {
        self.done.set(true);
        // Pattern-scoped coroutines (blocks, movers) are bounded by this.
        self.local.cancel();
        if let Some(cb) = self.pending_skip_cb.take() {
            cb();
        }
        Step::Done
    }

    fn enter_phase(
        &mut self,
        world: &mut World,
        sch: &mut SchedOps<World>,
        index: usize,
    ) -> RunningPhase {
        let node = Arc::clone(&self.node);
        let (props, timeout, children) = match node.phases().get(index) {
            Some(PatternNode::Phase {
                props,
                timeout,
                children,
            }) => (Some(props), Some(timeout), children.as_slice()),
            _ => (None, None, &[] as &[PatternNode]),
        };
        let shifter = CancelSource::new();
        let shifter_ref: CancelRef = shifter.clone();
        let phase_ct = joint(&self.ct, &shifter_ref);
        let kind = props.and_then(|p| p.kind);
        if let Some(hp) = props.and_then(|p| p.hp) {
            world.instance.set_hp_budget(hp);
        }
        if let Some(bg) = props.and_then(|p| p.background.as_deref()) {
            world.effects.request(bg);
        }
        let secs = timeout.map_or(0.0, |t| t.call(&mut self.gcx));
        let timeout_frames = if secs > 0.0 {
            Some((secs * ENGINE_FPS).round() as u64)
        } else {
            None
        };
        info!(phase = index, ?kind, timeout = secs, "phase start");
        for (block_idx, child) in children.iter().enumerate() {
            let (is_async, wait, actions) = match child {
                PatternNode::Sync { wait, children } => (false, wait, children),
                PatternNode::Async { wait, children } => (true, wait, children),
                _ => continue,
            };
            let actions: Vec<Action> = actions
                .iter()
                .filter_map(|c| match c {
                    PatternNode::Action(a) => Some(a.clone()),
                    _ => None,
                })
                .collect();
            sch.append(
                Tier::Behavior,
                BlockExec {
                    is_async,
                    actions,
                    idx: 0,
                    wait: Some(wait.clone()),
                    wait_frames: 0,
                    phase_ct: Rc::clone(&phase_ct),
                    bullet_ct: Rc::clone(&self.ct),
                    abort: Rc::clone(&self.local),
                    gcx: self.gcx.copy(u32::try_from(block_idx).unwrap_or(0)),
                    fired: 0,
                },
            );
        }
        RunningPhase {
            index,
            kind,
            shifter,
            start: world.instance.snapshot(),
            started_frame: world.frame,
            timeout_frames,
        }
    }

    fn report(&mut self, world: &mut World, run: &RunningPhase, outcome: PhaseOutcome) {
        run.shifter.cancel();
        let end = world.instance.snapshot();
        let completion = PhaseCompletion {
            index: run.index,
            kind: run.kind,
            outcome,
            hits_taken: end.hits.saturating_sub(run.start.hits),
            meter_gained: end.meter - run.start.meter,
            bombs_used: end.bombs.saturating_sub(run.start.bombs),
        };
        info!(phase = run.index, ?outcome, "phase end");
        world.instance.phase_end(completion);
    }
}

impl Coroutine<World> for PatternExec {
    fn step(&mut self, world: &mut World, sch: &mut SchedOps<World>) -> Step<World> {
        if self.ct.cancelled() {
            if let Some(run) = self.running.take() {
                self.report(world, &run, PhaseOutcome::Cancelled);
            }
            return self.finish();
        }
        let Some(run) = self.running.take() else {
            if let Some(cb) = self.pending_skip_cb.take() {
                cb();
            }
            if self.next_phase >= self.node.phases().len() {
                return self.finish();
            }
            let index = self.next_phase;
            self.next_phase = index + 1;
            let run = self.enter_phase(world, sch, index);
            self.running = Some(run);
            return Step::Pending;
        };

        // Skip overrides beat the phase's own end conditions.
        let skip_req = self.skip.borrow_mut().take();
        if let Some(req) = skip_req {
            debug!(from = run.index, to = req.target, "phase skip override");
            self.report(world, &run, PhaseOutcome::Cancelled);
            self.next_phase = req.target;
            self.pending_skip_cb = req.callback;
            return Step::Pending;
        }
        if world.instance.health_depleted() {
            self.report(world, &run, PhaseOutcome::Cleared);
            return Step::Pending;
        }
        if let Some(frames) = run.timeout_frames {
            if world.frame.saturating_sub(run.started_frame) >= frames {
                self.report(world, &run, PhaseOutcome::Timeout);
                return Step::Pending;
            }
        }
        self.running = Some(run);
        Step::Pending
    }
}

enum StepFault {
    NonFinite { action: &'static str },
}

struct BlockExec {
    is_async: bool,
    actions: Vec<Action>,
    idx: usize,
    /// Block-start delay; evaluated lazily on the first step.
    wait: Option<Gcxf<f32>>,
    wait_frames: u32,
    /// Bounds this block's own stepping (phase shifter included).
    phase_ct: CancelRef,
    /// Pattern-scope token handed to spawned movers: bullets outlive the
    /// phase that fired them, not the pattern run.
    bullet_ct: CancelRef,
    /// Pattern-local source, cancelled to abort the containing pattern on
    /// a step fault.
    abort: Rc<CancelSource>,
    gcx: GenCtx,
    fired: u32,
}

impl BlockExec {
    fn secs_to_frames(secs: f32) -> u32 {
        (secs.max(0.0) * ENGINE_FPS).round() as u32
    }

    fn exec(
        &mut self,
        world: &mut World,
        sch: &mut SchedOps<World>,
        action: &Action,
    ) -> Result<(), StepFault> {
        match action {
            Action::FireStraight { style, speed, angle } => {
                let mut child = self.gcx.copy(self.fired);
                self.fired += 1;
                let speed = speed.call(&mut child);
                let angle = angle.call(&mut child);
                if !speed.is_finite() || !angle.is_finite() {
                    return Err(StepFault::NonFinite {
                        action: "fire-straight",
                    });
                }
                let rad = angle.to_radians();
                let vel = Vec2::new(rad.cos(), rad.sin()) * speed;
                self.spawn(world, sch, style, Mover::Constant(vel), child);
            }
            Action::FireCurve { style, curve } => {
                let child = self.gcx.copy(self.fired);
                self.fired += 1;
                self.spawn(world, sch, style, Mover::Curve(curve.clone()), child);
            }
            Action::Effect { key } => world.effects.request(key),
            // Handled by the stepping loop.
            Action::Wait { .. } => {}
        }
        Ok(())
    }

    fn spawn(
        &self,
        world: &mut World,
        sch: &mut SchedOps<World>,
        style: &str,
        mover: Mover,
        gcx: GenCtx,
    ) {
        let id = world.pool.request(style, Projectile::new);
        if let Some(p) = world.pool.get_mut(id) {
            p.pos = Vec2::ZERO;
        }
        sch.append_droppable(
            Tier::Movement,
            MoveCo {
                id,
                mover,
                state: MoveState::at(Vec2::ZERO),
                gcx,
                ct: Rc::clone(&self.bullet_ct),
                age: 0,
                ttl: DEFAULT_TTL_FRAMES,
            },
        );
    }
}

impl Coroutine<World> for BlockExec {
    fn step(&mut self, world: &mut World, sch: &mut SchedOps<World>) -> Step<World> {
        if self.phase_ct.cancelled() {
            return Step::Done;
        }
        if let Some(wait) = self.wait.take() {
            let secs = wait.call(&mut self.gcx);
            self.wait_frames = Self::secs_to_frames(secs);
        }
        if self.wait_frames > 0 {
            self.wait_frames -= 1;
            return Step::Pending;
        }
        while self.idx < self.actions.len() {
            let action = self.actions[self.idx].clone();
            self.idx += 1;
            if let Action::Wait { seconds } = &action {
                if self.is_async {
                    let frames = Self::secs_to_frames(seconds.call(&mut self.gcx));
                    if frames > 0 {
                        self.wait_frames = frames;
                        return Step::Pending;
                    }
                    continue;
                }
            }
            if let Err(StepFault::NonFinite { action }) = self.exec(world, sch, &action) {
                // A faulted step aborts the containing pattern, not the
                // scheduler.
                error!(action, "pattern step fault; aborting pattern run");
                self.abort.cancel();
                return Step::Done;
            }
        }
        Step::Done
    }
}

enum Mover {
    Constant(Vec2),
    Curve(VelocityStep),
}

/// Per-projectile movement coroutine.
struct MoveCo {
    id: EntityId,
    mover: Mover,
    state: MoveState,
    gcx: GenCtx,
    ct: CancelRef,
    age: u32,
    ttl: u32,
}

impl Coroutine<World> for MoveCo {
    fn step(&mut self, world: &mut World, _sch: &mut SchedOps<World>) -> Step<World> {
        if self.ct.cancelled() {
            if world.pool.is_active(self.id) {
                world.pool.release(self.id);
            }
            return Step::Done;
        }
        if !world.pool.is_active(self.id) {
            return Step::Done;
        }
        match &self.mover {
            Mover::Constant(vel) => {
                self.state.pos += *vel * world.dt;
                self.state.t += world.dt;
            }
            Mover::Curve(curve) => {
                curve.step(&mut self.state, &mut self.gcx, world.dt);
            }
        }
        if let Some(p) = world.pool.get_mut(self.id) {
            p.pos = self.state.pos;
        }
        self.age += 1;
        if self.age >= self.ttl {
            world.pool.release(self.id);
            return Step::Done;
        }
        Step::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    use brg_ops::build_op_table;
    use brg_rt::{null_cancel, RngStream};

    use crate::{build_pattern, CounterSnapshot, InstanceData, NullEffects};

    /// Instance data whose defeat signal fires after a fixed number of
    /// polls (one poll per tick from the running phase).
    struct MockInstance {
        polls: Cell<u32>,
        depleted_after: u32,
        completions: Rc<RefCell<Vec<PhaseCompletion>>>,
    }

    impl InstanceData for MockInstance {
        fn snapshot(&self) -> CounterSnapshot {
            CounterSnapshot::default()
        }

        fn health_depleted(&self) -> bool {
            self.polls.set(self.polls.get() + 1);
            self.polls.get() > self.depleted_after
        }

        fn phase_end(&mut self, completion: PhaseCompletion) {
            self.completions.borrow_mut().push(completion);
        }
    }

    fn world_with_mock(depleted_after: u32) -> (World, Rc<RefCell<Vec<PhaseCompletion>>>) {
        let completions = Rc::new(RefCell::new(Vec::new()));
        let world = World::new(
            Box::new(MockInstance {
                polls: Cell::new(0),
                depleted_after,
                completions: Rc::clone(&completions),
            }),
            Box::<NullEffects>::default(),
        );
        (world, completions)
    }

    fn compiler() -> brg_compile::Compiler {
        brg_compile::Compiler::new(Rc::new(build_op_table()))
    }

    fn gcx() -> GenCtx {
        GenCtx::new(RngStream::for_entity(1, 1))
    }

    fn run_ticks(sched: &mut Scheduler<World>, world: &mut World, n: u32) {
        for _ in 0..n {
            world.frame += 1;
            sched.tick(world);
        }
    }

    /// The end-to-end example scenario: hp-budgeted phase with one sync
    /// fire; a mock collaborator depletes health at tick 50; the outcome is
    /// a clear (not a timeout) with a zero snapshot diff.
    #[test]
    fn test_scenario_health_depletion_clears_phase() {
        let c = compiler();
        let pattern =
            build_pattern("phase 0 <hp 1000> action block 0 fire-straight(speed=2)", &c).unwrap();
        let (mut world, completions) = world_with_mock(50);
        let mut sched: Scheduler<World> = Scheduler::new();
        let root = null_cancel();
        let handle = spawn_pattern(&mut sched, pattern, &root, gcx(), true);

        run_ticks(&mut sched, &mut world, 120);

        assert!(handle.is_done());
        let completions = completions.borrow();
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].outcome, PhaseOutcome::Cleared);
        assert_eq!(completions[0].hits_taken, 0);
        assert_eq!(completions[0].index, 0);
    }

    #[test]
    fn test_scenario_bullet_moves_before_clear() {
        let c = compiler();
        let pattern =
            build_pattern("phase 0 <hp 1000> action block 0 fire-straight(speed=2)", &c).unwrap();
        let (mut world, _) = world_with_mock(u32::MAX);
        let mut sched: Scheduler<World> = Scheduler::new();
        let root = null_cancel();
        let _handle = spawn_pattern(&mut sched, pattern, &root, gcx(), true);

        run_ticks(&mut sched, &mut world, 60);

        let ids = world.pool.active_ids("orb");
        assert_eq!(ids.len(), 1);
        let p = world.pool.get(ids[0]).unwrap();
        // Constant speed 2 along +x for just under half a second.
        assert!(p.pos.x > 0.5 && p.pos.x < 1.5, "pos.x = {}", p.pos.x);
        assert!(p.pos.y.abs() < 1e-5);
    }

    #[test]
    fn test_phase_timeout_outcome() {
        let c = compiler();
        let pattern = build_pattern("phase 0.25 <hp 10> effect(warning)", &c).unwrap();
        let (mut world, completions) = world_with_mock(u32::MAX);
        let mut sched: Scheduler<World> = Scheduler::new();
        let root = null_cancel();
        let handle = spawn_pattern(&mut sched, pattern, &root, gcx(), true);

        run_ticks(&mut sched, &mut world, 120);

        assert!(handle.is_done());
        assert_eq!(completions.borrow()[0].outcome, PhaseOutcome::Timeout);
    }

    #[test]
    fn test_phases_run_in_sequence() {
        let c = compiler();
        let pattern = build_pattern(
            "phase 0.1 <type nonspell> effect(a) phase 0.1 <type spell> effect(b)",
            &c,
        )
        .unwrap();
        let (mut world, completions) = world_with_mock(u32::MAX);
        let mut sched: Scheduler<World> = Scheduler::new();
        let root = null_cancel();
        let handle = spawn_pattern(&mut sched, pattern, &root, gcx(), true);

        run_ticks(&mut sched, &mut world, 120);

        assert!(handle.is_done());
        let completions = completions.borrow();
        assert_eq!(completions.len(), 2);
        assert_eq!(completions[0].kind, Some(PhaseKind::Nonspell));
        assert_eq!(completions[1].kind, Some(PhaseKind::Spell));
    }

    #[test]
    fn test_skip_override_jumps_and_fires_callback() {
        let c = compiler();
        let pattern = build_pattern(
            "phase 0 <type nonspell> effect(a) phase 0 <type spell> effect(b) phase 0.1 <type timeout> effect(c)",
            &c,
        )
        .unwrap();
        let (mut world, completions) = world_with_mock(u32::MAX);
        let mut sched: Scheduler<World> = Scheduler::new();
        let root = null_cancel();
        let handle = spawn_pattern(&mut sched, pattern, &root, gcx(), true);
        run_ticks(&mut sched, &mut world, 5);

        let fired = Rc::new(Cell::new(false));
        let fired_probe = Rc::clone(&fired);
        // Lower target issued after a higher one in the same tick loses.
        handle.request_skip(1);
        handle.request_skip_with(2, move || fired_probe.set(true));
        handle.request_skip(1);
        run_ticks(&mut sched, &mut world, 5);

        assert!(fired.get(), "skip callback must fire once the jump lands");
        let completions = completions.borrow();
        assert_eq!(completions[0].outcome, PhaseOutcome::Cancelled);
        assert_eq!(completions[0].index, 0);
        // The pattern is now in phase 2; phase 1 never reported.
        assert!(completions.iter().all(|pc| pc.index != 1));
    }

    #[test]
    fn test_external_cancel_reports_cancelled() {
        let c = compiler();
        let pattern = build_pattern("phase 0 <hp 10> effect(a)", &c).unwrap();
        let (mut world, completions) = world_with_mock(u32::MAX);
        let mut sched: Scheduler<World> = Scheduler::new();
        let root = null_cancel();
        let handle = spawn_pattern(&mut sched, pattern, &root, gcx(), true);
        run_ticks(&mut sched, &mut world, 5);
        handle.cancel();
        run_ticks(&mut sched, &mut world, 2);

        assert!(handle.is_done());
        assert_eq!(completions.borrow()[0].outcome, PhaseOutcome::Cancelled);
    }

    /// Cancelling one summon's pattern run must not cascade into a nested
    /// summon sharing the same encounter root; cancelling the root ends
    /// everything.
    #[test]
    fn test_summon_cancellation_isolation() {
        let c = compiler();
        let node = build_pattern("phase 0 <hp 10> effect(a)", &c).unwrap();
        let (mut world, _) = world_with_mock(u32::MAX);
        let mut sched: Scheduler<World> = Scheduler::new();

        let encounter = CancelSource::new();
        let encounter_ref: CancelRef = encounter.clone();
        let outer = spawn_pattern(&mut sched, Arc::clone(&node), &encounter_ref, gcx(), true);
        let summon = spawn_pattern(&mut sched, Arc::clone(&node), &outer.scope(), gcx(), false);
        let nested = spawn_pattern(&mut sched, Arc::clone(&node), &summon.scope(), gcx(), false);
        run_ticks(&mut sched, &mut world, 3);

        summon.cancel();
        run_ticks(&mut sched, &mut world, 3);
        assert!(summon.is_done());
        assert!(!outer.is_done(), "parent must survive a summon's cancel");
        assert!(!nested.is_done(), "nested summon shares only the root bound");

        encounter.cancel();
        run_ticks(&mut sched, &mut world, 3);
        assert!(outer.is_done());
        assert!(nested.is_done());
    }

    #[test]
    fn test_async_blocks_interleave_waits() {
        let c = compiler();
        let pattern = build_pattern(
            "phase 0 <hp 10> action async 0 fire-straight(speed=1) wait(0.1) fire-straight(speed=1)",
            &c,
        )
        .unwrap();
        let (mut world, _) = world_with_mock(u32::MAX);
        let mut sched: Scheduler<World> = Scheduler::new();
        let root = null_cancel();
        let _handle = spawn_pattern(&mut sched, pattern, &root, gcx(), true);

        run_ticks(&mut sched, &mut world, 5);
        assert_eq!(world.pool.active_count("orb"), 1);
        run_ticks(&mut sched, &mut world, 15);
        assert_eq!(world.pool.active_count("orb"), 2);
    }

    #[test]
    fn test_pattern_end_releases_bullets() {
        let c = compiler();
        let pattern =
            build_pattern("phase 0.05 <hp 10> action block 0 fire-straight(speed=2)", &c).unwrap();
        let (mut world, _) = world_with_mock(u32::MAX);
        let mut sched: Scheduler<World> = Scheduler::new();
        let root = null_cancel();
        let handle = spawn_pattern(&mut sched, pattern, &root, gcx(), true);

        run_ticks(&mut sched, &mut world, 30);
        assert!(handle.is_done());
        // The pattern finishing cancels its scope; the mover released its
        // projectile back to the pool.
        assert_eq!(world.pool.active_count("orb"), 0);
        assert_eq!(world.pool.free_count("orb"), 1);
    }
}
