//! Per-frame, priority-ordered coroutine runner.
//!
//! Coroutines are explicit step functions: the scheduler invokes each at
//! most once per tick, and the coroutine reports `Pending`, `Done`, or
//! `Yield(next)` (complete by handing the slot to a successor, which is
//! stepped within the same tick). Within one tick execution order is
//! stable: tier by tier, submission order within a tier. Prepend
//! insertions land at the lane cursor and so become visible within the
//! current tick when the scheduler has not yet passed the insertion point.
//!
//! Forced shutdown drains every lane without further ticking; surviving
//! non-droppable coroutines are a warning, expected only under abnormal
//! termination such as scene teardown.

use tracing::warn;

/// Result of stepping a coroutine once.
pub enum Step<C> {
    /// Not yet complete; step again next tick.
    Pending,
    /// Complete; remove.
    Done,
    /// Complete by replacement: the successor takes this slot and is
    /// stepped within the current tick.
    Yield(Box<dyn Coroutine<C>>),
}

/// A suspendable unit of per-tick work. Cancellation is polled by the
/// coroutine itself at the top of its step.
pub trait Coroutine<C> {
    fn step(&mut self, ctx: &mut C, sch: &mut SchedOps<C>) -> Step<C>;
}

impl<C, F> Coroutine<C> for F
where
    F: FnMut(&mut C, &mut SchedOps<C>) -> Step<C>,
{
    fn step(&mut self, ctx: &mut C, sch: &mut SchedOps<C>) -> Step<C> {
        self(ctx, sch)
    }
}

/// Priority tier; lower tiers run first each tick.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    /// Entity movement integration.
    Movement,
    /// Pattern and phase logic.
    Behavior,
    /// Cosmetic / fire-and-forget work.
    Effects,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Movement, Tier::Behavior, Tier::Effects];

    #[inline]
    fn index(self) -> usize {
        self as usize
    }
}

enum InsertMode {
    Append,
    Prepend,
    TryPrepend,
}

struct Entry<C> {
    co: Box<dyn Coroutine<C>>,
    droppable: bool,
}

/// Insertion interface handed to a coroutine while it is being stepped.
/// Requests are applied as soon as the step returns.
pub struct SchedOps<C> {
    requests: Vec<(InsertMode, Tier, Entry<C>)>,
}

impl<C> SchedOps<C> {
    fn new() -> Self {
        SchedOps {
            requests: Vec::new(),
        }
    }

    /// Run after all currently queued work, this and future ticks.
    pub fn append(&mut self, tier: Tier, co: impl Coroutine<C> + 'static) {
        self.requests
            .push((InsertMode::Append, tier, Entry { co: Box::new(co), droppable: false }));
    }

    /// Append a coroutine that forced shutdown may silently drop.
    pub fn append_droppable(&mut self, tier: Tier, co: impl Coroutine<C> + 'static) {
        self.requests
            .push((InsertMode::Append, tier, Entry { co: Box::new(co), droppable: true }));
    }

    /// Run before un-stepped work; visible within the current tick if the
    /// lane cursor has not passed the insertion point.
    pub fn prepend(&mut self, tier: Tier, co: impl Coroutine<C> + 'static) {
        self.requests
            .push((InsertMode::Prepend, tier, Entry { co: Box::new(co), droppable: false }));
    }

    /// Prepend if possible, otherwise append.
    pub fn try_prepend(&mut self, tier: Tier, co: impl Coroutine<C> + 'static) {
        self.requests
            .push((InsertMode::TryPrepend, tier, Entry { co: Box::new(co), droppable: false }));
    }
}

/// The scheduler: one ordered lane per tier.
pub struct Scheduler<C> {
    lanes: [Vec<Entry<C>>; 3],
}

impl<C> Scheduler<C> {
    pub fn new() -> Self {
        Scheduler {
            lanes: [Vec::new(), Vec::new(), Vec::new()],
        }
    }

    pub fn len(&self) -> usize {
        self.lanes.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.iter().all(Vec::is_empty)
    }

    /// Submit from outside a tick: append to the end of the lane.
    pub fn run(&mut self, tier: Tier, co: impl Coroutine<C> + 'static) {
        self.lanes[tier.index()].push(Entry { co: Box::new(co), droppable: false });
    }

    /// Submit a coroutine that forced shutdown may silently drop.
    pub fn run_droppable(&mut self, tier: Tier, co: impl Coroutine<C> + 'static) {
        self.lanes[tier.index()].push(Entry { co: Box::new(co), droppable: true });
    }

    /// Submit from outside a tick, ahead of queued work.
    pub fn run_prepend(&mut self, tier: Tier, co: impl Coroutine<C> + 'static) {
        self.lanes[tier.index()].insert(0, Entry { co: Box::new(co), droppable: false });
    }

    /// Prepend if possible, otherwise append. Outside a tick prepending is
    /// always possible.
    pub fn run_try_prepend(&mut self, tier: Tier, co: impl Coroutine<C> + 'static) {
        self.run_prepend(tier, co);
    }

    /// Step every registered coroutine at most once, in tier order then
    /// submission order.
    pub fn tick(&mut self, ctx: &mut C) {
        for tier in Tier::ALL {
            let lane_idx = tier.index();
            let mut cursor = 0usize;
            loop {
                if cursor >= self.lanes[lane_idx].len() {
                    break;
                }
                let mut entry = self.lanes[lane_idx].remove(cursor);
                let mut ops = SchedOps::new();
                match entry.co.step(ctx, &mut ops) {
                    Step::Pending => {
                        self.lanes[lane_idx].insert(cursor, entry);
                        cursor += 1;
                    }
                    Step::Done => {}
                    Step::Yield(next) => {
                        // Successor occupies the slot and is stepped this
                        // tick: the cursor does not advance.
                        entry.co = next;
                        self.lanes[lane_idx].insert(cursor, entry);
                    }
                }
                self.apply(ops, tier, cursor);
            }
        }
    }

    fn apply(&mut self, ops: SchedOps<C>, current_tier: Tier, cursor: usize) {
        for (mode, tier, entry) in ops.requests {
            let lane_idx = tier.index();
            match mode {
                InsertMode::Append => self.lanes[lane_idx].push(entry),
                InsertMode::Prepend | InsertMode::TryPrepend => {
                    if tier == current_tier {
                        let at = cursor.min(self.lanes[lane_idx].len());
                        self.lanes[lane_idx].insert(at, entry);
                    } else {
                        // A lane that already ran this tick picks it up
                        // first thing next tick; a later lane this tick.
                        self.lanes[lane_idx].insert(0, entry);
                    }
                }
            }
        }
    }

    /// Forced shutdown: drain everything without further ticking. Returns
    /// the number of non-droppable coroutines that were still incomplete.
    pub fn close_all(&mut self) -> usize {
        let mut survivors = 0usize;
        for lane in &mut self.lanes {
            for entry in lane.drain(..) {
                if !entry.droppable {
                    survivors += 1;
                }
            }
        }
        if survivors > 0 {
            warn!(
                survivors,
                "forced shutdown left non-droppable coroutines incomplete"
            );
        }
        survivors
    }
}

impl<C> Default for Scheduler<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<&'static str>>>;

    fn logger(log: &Log, name: &'static str, ticks: usize) -> impl FnMut(&mut (), &mut SchedOps<()>) -> Step<()> {
        let log = Rc::clone(log);
        let mut remaining = ticks;
        move |_ctx, _sch| {
            log.borrow_mut().push(name);
            remaining -= 1;
            if remaining == 0 {
                Step::Done
            } else {
                Step::Pending
            }
        }
    }

    #[test]
    fn test_insertion_mode_ordering() {
        // Submitted append, prepend, try-prepend in that order with an
        // empty queue: on the next tick the try-prepend and prepend
        // coroutines execute before the append coroutine.
        let log: Log = Rc::default();
        let mut sch: Scheduler<()> = Scheduler::new();
        sch.run(Tier::Behavior, logger(&log, "append", 1));
        sch.run_prepend(Tier::Behavior, logger(&log, "prepend", 1));
        sch.run_try_prepend(Tier::Behavior, logger(&log, "try-prepend", 1));
        sch.tick(&mut ());
        let order = log.borrow().clone();
        let append_at = order.iter().position(|n| *n == "append").unwrap();
        assert!(order.iter().position(|n| *n == "prepend").unwrap() < append_at);
        assert!(order.iter().position(|n| *n == "try-prepend").unwrap() < append_at);
    }

    #[test]
    fn test_tier_order_then_submission_order() {
        let log: Log = Rc::default();
        let mut sch: Scheduler<()> = Scheduler::new();
        sch.run(Tier::Effects, logger(&log, "fx", 1));
        sch.run(Tier::Behavior, logger(&log, "beh-1", 1));
        sch.run(Tier::Movement, logger(&log, "move", 1));
        sch.run(Tier::Behavior, logger(&log, "beh-2", 1));
        sch.tick(&mut ());
        assert_eq!(*log.borrow(), vec!["move", "beh-1", "beh-2", "fx"]);
    }

    #[test]
    fn test_each_coroutine_steps_once_per_tick() {
        let log: Log = Rc::default();
        let mut sch: Scheduler<()> = Scheduler::new();
        sch.run(Tier::Behavior, logger(&log, "a", 3));
        sch.tick(&mut ());
        sch.tick(&mut ());
        assert_eq!(log.borrow().len(), 2);
        sch.tick(&mut ());
        assert_eq!(log.borrow().len(), 3);
        assert!(sch.is_empty());
    }

    #[test]
    fn test_in_tick_prepend_runs_same_tick() {
        let log: Log = Rc::default();
        let mut sch: Scheduler<()> = Scheduler::new();
        let inner_log = Rc::clone(&log);
        sch.run(Tier::Behavior, move |_: &mut (), sch: &mut SchedOps<()>| {
            inner_log.borrow_mut().push("spawner");
            sch.prepend(Tier::Behavior, logger(&inner_log, "prepended", 1));
            Step::Done
        });
        let tail_log = Rc::clone(&log);
        sch.run(Tier::Behavior, logger(&tail_log, "tail", 1));
        sch.tick(&mut ());
        // The prepended coroutine ran this tick, before the tail entry.
        assert_eq!(*log.borrow(), vec!["spawner", "prepended", "tail"]);
    }

    #[test]
    fn test_in_tick_append_runs_same_tick_at_end() {
        let log: Log = Rc::default();
        let mut sch: Scheduler<()> = Scheduler::new();
        let inner_log = Rc::clone(&log);
        sch.run(Tier::Behavior, move |_: &mut (), sch: &mut SchedOps<()>| {
            inner_log.borrow_mut().push("spawner");
            sch.append(Tier::Behavior, logger(&inner_log, "appended", 1));
            Step::Done
        });
        let tail_log = Rc::clone(&log);
        sch.run(Tier::Behavior, logger(&tail_log, "tail", 1));
        sch.tick(&mut ());
        assert_eq!(*log.borrow(), vec!["spawner", "tail", "appended"]);
    }

    #[test]
    fn test_yield_replacement_steps_successor_same_tick() {
        let log: Log = Rc::default();
        let mut sch: Scheduler<()> = Scheduler::new();
        let inner_log = Rc::clone(&log);
        sch.run(Tier::Behavior, move |_: &mut (), _: &mut SchedOps<()>| {
            inner_log.borrow_mut().push("parent");
            let child_log = Rc::clone(&inner_log);
            Step::Yield(Box::new(logger(&child_log, "child", 2)))
        });
        sch.tick(&mut ());
        assert_eq!(*log.borrow(), vec!["parent", "child"]);
        sch.tick(&mut ());
        assert_eq!(*log.borrow(), vec!["parent", "child", "child"]);
        assert!(sch.is_empty());
    }

    #[test]
    fn test_close_all_counts_non_droppable() {
        let log: Log = Rc::default();
        let mut sch: Scheduler<()> = Scheduler::new();
        sch.run(Tier::Behavior, logger(&log, "keep", 10));
        sch.run_droppable(Tier::Effects, logger(&log, "drop", 10));
        assert_eq!(sch.close_all(), 1);
        assert!(sch.is_empty());
    }

    #[test]
    fn test_close_all_clean_when_only_droppable() {
        let log: Log = Rc::default();
        let mut sch: Scheduler<()> = Scheduler::new();
        sch.run_droppable(Tier::Effects, logger(&log, "drop", 10));
        assert_eq!(sch.close_all(), 0);
    }
}
