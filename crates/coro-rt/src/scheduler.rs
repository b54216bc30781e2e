// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Cooperative single-threaded scheduler.
//!
//! All bookkeeping lives in one `RefCell<State>`. Every operation borrows
//! it, computes the next handoff, and releases the borrow before touching
//! processor state, so no borrow is ever held across a switch. Saved
//! continuations live outside the cell, one per coroutine id, because a
//! switch writes into the suspending flow's cell after the borrow is gone.
//!
//! Suspension points: `yield_now`, `block`, `sleep`, and the spawn
//! handshake. Everything else runs to completion.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::process;
use std::time::Duration;

use crate::config::Config;
use crate::context::{self, Continuation, ContinuationCell, Stack};
use crate::coroutine::{Coroutine, CoroutineId, Status};
use crate::diagnostics::{CoroutineInfo, Diagnostics};
use crate::error::{Error, Result, Violation};
use crate::future::{CoFuture, Refused, Token};
use crate::queue::RingQueue;
use crate::timer::{Clock, Timers};

/// Handle to the runtime's scheduling operations.
///
/// Obtained by dereferencing a [`Runtime`](crate::Runtime), and passed to
/// every coroutine body.
pub struct Scheduler {
    state: RefCell<State>,
    conts: Box<[ContinuationCell]>,
    config: Config,
    clock: Clock,
}

struct State {
    /// Arena indexed by `CoroutineId`. Slot 0 is main.
    coroutines: Vec<Coroutine>,
    ready: RingQueue<Token>,
    idle: RingQueue<CoroutineId>,
    registry: RingQueue<CoroutineId>,
    timers: Timers,
    current: CoroutineId,
    next_seq: u64,
    /// Set by `spawn` for the duration of the handshake.
    spawner: Option<CoroutineId>,
}

/// A switch decided under the borrow, performed after it is released.
struct Handoff {
    from: CoroutineId,
    to: CoroutineId,
    cont: Continuation,
}

impl State {
    fn new(capacity: usize) -> Result<Self> {
        let mut coroutines = Vec::new();
        coroutines
            .try_reserve_exact(capacity)
            .map_err(|e| Error::storage("coroutine arena", e))?;
        let mut state = Self {
            coroutines,
            ready: RingQueue::with_capacity(capacity)
                .map_err(|e| Error::storage("ready queue", e))?,
            idle: RingQueue::with_capacity(capacity)
                .map_err(|e| Error::storage("idle pool", e))?,
            registry: RingQueue::with_capacity(capacity)
                .map_err(|e| Error::storage("coroutine registry", e))?,
            timers: Timers::with_capacity(capacity)
                .map_err(|e| Error::storage("timer heap", e))?,
            current: CoroutineId::MAIN,
            next_seq: 0,
            spawner: None,
        };
        state.coroutines.push(Coroutine::main());
        state
            .registry
            .push(CoroutineId::MAIN)
            .map_err(|_| Error::InvalidState {
                reason: "registry has no room for the main coroutine",
            })?;
        Ok(state)
    }

    fn slot(&self, id: CoroutineId) -> std::result::Result<&Coroutine, Violation> {
        self.coroutines
            .get(id.0)
            .ok_or(Violation::UnknownCoroutine { id: id.0 })
    }

    fn slot_mut(&mut self, id: CoroutineId) -> std::result::Result<&mut Coroutine, Violation> {
        self.coroutines
            .get_mut(id.0)
            .ok_or(Violation::UnknownCoroutine { id: id.0 })
    }

    fn name(&self, id: CoroutineId) -> String {
        self.coroutines
            .get(id.0)
            .map(|co| co.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// New outstanding token for `co`, replacing any previous one.
    fn issue(&mut self, co: CoroutineId) -> std::result::Result<Token, Violation> {
        self.next_seq += 1;
        let token = Token {
            co,
            seq: self.next_seq,
        };
        token.issue(&mut self.slot_mut(co)?.pending);
        Ok(token)
    }

    fn wake(&mut self, token: Token) -> std::result::Result<(), Violation> {
        let slot = self.slot_mut(token.co)?;
        match token.mark_ready(&mut slot.pending) {
            Ok(()) => {}
            Err(Refused::AlreadyReady) => {
                return Err(Violation::DoubleWake {
                    name: slot.name.clone(),
                })
            }
            Err(Refused::Stale) => {
                return Err(Violation::StaleFuture {
                    name: slot.name.clone(),
                })
            }
        }
        slot.status = Status::Ready;
        self.ready
            .push(token)
            .map_err(|_| Violation::QueueOverflow {
                queue: "ready queue",
            })
    }

    fn expire_timers(&mut self, now: u64) -> std::result::Result<(), Violation> {
        while let Some(token) = self.timers.pop_due(now) {
            log::trace!("timer fired for {}", token.co);
            self.wake(token)?;
        }
        Ok(())
    }

    /// Make `target` the running coroutine and take its continuation.
    fn enter(
        &mut self,
        target: CoroutineId,
        conts: &[ContinuationCell],
    ) -> std::result::Result<Continuation, Violation> {
        let cont = conts
            .get(target.0)
            .and_then(ContinuationCell::take)
            .ok_or_else(|| Violation::MissingContinuation {
                name: self.name(target),
            })?;
        self.slot_mut(target)?.status = Status::Running;
        self.current = target;
        Ok(cont)
    }

    /// Consume a popped ready token and decide where control goes.
    /// `None` means the token was the caller's own and it keeps running.
    fn handoff(
        &mut self,
        token: Token,
        conts: &[ContinuationCell],
    ) -> std::result::Result<Option<Handoff>, Violation> {
        let from = self.current;
        let slot = self.slot_mut(token.co)?;
        if token.consume(&mut slot.pending).is_err() {
            return Err(Violation::StaleFuture {
                name: slot.name.clone(),
            });
        }
        if token.co == from {
            slot.status = Status::Running;
            return Ok(None);
        }
        let cont = self.enter(token.co, conts)?;
        Ok(Some(Handoff {
            from,
            to: token.co,
            cont,
        }))
    }

    /// Leave the running coroutine in `status` and hand off to the next
    /// ready token. Used by block and sleep.
    fn park(
        &mut self,
        status: Status,
        now: u64,
        during: &'static str,
        conts: &[ContinuationCell],
    ) -> std::result::Result<Option<Handoff>, Violation> {
        let me = self.current;
        self.slot_mut(me)?.status = status;
        self.expire_timers(now)?;
        let token = self
            .ready
            .pop()
            .ok_or(Violation::NoReadyCoroutine { during })?;
        self.handoff(token, conts)
    }

    /// Idle-pool reuse first, then a fresh stack if the registry has room.
    fn acquire(&mut self, config: &Config) -> Result<CoroutineId> {
        if let Some(id) = self.idle.pop() {
            log::trace!("reusing idle coroutine slot {id}");
            return Ok(id);
        }
        if self.registry.is_full() {
            return Err(Error::CapacityExceeded {
                max: config.max_concurrency,
            });
        }
        let stack = Stack::new(config.stack_size).map_err(|source| Error::AllocationFailure {
            what: "coroutine stack",
            source,
        })?;
        let id = CoroutineId(self.coroutines.len());
        if self.registry.push(id).is_err() {
            return Err(Error::CapacityExceeded {
                max: config.max_concurrency,
            });
        }
        log::debug!(
            "mapped {} byte stack for coroutine slot {id}",
            stack.usable_size()
        );
        self.coroutines.push(Coroutine::with_stack(stack));
        Ok(id)
    }

    fn stacks_mapped(&self) -> usize {
        self.coroutines.iter().filter(|co| co.stack.is_some()).count()
    }

    fn snapshot(&self) -> Diagnostics {
        Diagnostics {
            ready: self.ready.len(),
            idle: self.idle.len(),
            total: self.registry.len(),
            capacity: self.registry.capacity(),
            timers: self.timers.len(),
            stacks_mapped: self.stacks_mapped(),
            coroutines: self
                .registry
                .iter()
                .filter_map(|&id| {
                    self.coroutines.get(id.0).map(|co| CoroutineInfo {
                        id,
                        name: co.name.clone(),
                        status: co.status,
                    })
                })
                .collect(),
        }
    }
}

impl Scheduler {
    pub(crate) fn new(config: Config) -> Result<Self> {
        // Main takes a registry slot, so every container holds one extra.
        let capacity = config.max_concurrency + 1;
        let state = State::new(capacity)?;
        let mut conts = Vec::new();
        conts
            .try_reserve_exact(capacity)
            .map_err(|e| Error::storage("continuation table", e))?;
        conts.resize_with(capacity, ContinuationCell::empty);
        Ok(Self {
            state: RefCell::new(state),
            conts: conts.into_boxed_slice(),
            config,
            clock: Clock::start(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The running coroutine. [`CoroutineId::MAIN`] outside any coroutine.
    pub fn current(&self) -> CoroutineId {
        self.state.borrow().current
    }

    /// Status of a registered coroutine, `None` for unknown ids.
    pub fn status(&self, id: CoroutineId) -> Option<Status> {
        self.state.borrow().coroutines.get(id.0).map(|co| co.status)
    }

    /// Whether the ready queue holds any token.
    pub fn has_pending(&self) -> bool {
        !self.state.borrow().ready.is_empty()
    }

    /// Start `body` as a new coroutine named `name`.
    ///
    /// The new coroutine is queued behind whatever is already ready; the
    /// caller keeps running. Names are cut to
    /// [`MAX_NAME_LEN`](crate::MAX_NAME_LEN) bytes.
    ///
    /// # Errors
    /// [`Error::CapacityExceeded`] when `max_concurrency` coroutines are
    /// alive, [`Error::AllocationFailure`] when a fresh stack cannot be
    /// mapped.
    pub fn spawn<F>(&self, name: &str, body: F) -> Result<CoroutineId>
    where
        F: FnOnce(&Scheduler) + 'static,
    {
        let (spawner, id, start) = {
            let mut st = self.state.borrow_mut();
            let id = st.acquire(&self.config)?;
            let arg = self as *const Scheduler as *mut ();
            let slot = &mut st.coroutines[id.0];
            let Some(stack) = slot.stack.as_ref() else {
                return Err(Error::InvalidState {
                    reason: "coroutine slot has no stack",
                });
            };
            // SAFETY: the slot is idle or fresh, so nothing runs on its stack.
            let start = unsafe { context::prepare(stack, coroutine_main, arg) };
            slot.assign(name, Box::new(body));
            let spawner = st.current;
            st.spawner = Some(spawner);
            st.current = id;
            (spawner, id, start)
        };
        log::debug!("spawn {id} `{}` from {spawner}", self.state.borrow().name(id));
        // SAFETY: `start` was just prepared on a mapped stack; the handshake
        // resumes the spawner's cell before the body runs.
        unsafe { context::switch(&self.conts[spawner.0], start) };
        Ok(id)
    }

    /// Let every other ready coroutine run once, then continue.
    ///
    /// Expired sleepers are woken first. With nothing ready this is a
    /// no-op.
    pub fn yield_now(&self) {
        let now = self.clock.now_ns();
        let step = self.state.borrow_mut().yield_step(now, &self.conts);
        self.complete(step);
    }

    /// Park the running coroutine until a future it issued is woken, or
    /// until [`clear_block`](Self::clear_block) is called on it.
    ///
    /// Fatal when no other coroutine is ready.
    pub fn block(&self) {
        let now = self.clock.now_ns();
        let step = self
            .state
            .borrow_mut()
            .park(Status::Blocked, now, "block", &self.conts);
        self.complete(step);
    }

    /// Park the running coroutine for at least `duration`.
    ///
    /// Only the timer wakes it. Any future issued earlier becomes stale.
    pub fn sleep(&self, duration: Duration) {
        let now = self.clock.now_ns();
        let step = {
            let mut st = self.state.borrow_mut();
            st.sleep_step(now, duration, &self.conts)
        };
        self.complete(step);
    }

    /// Issue a wait token for the running coroutine.
    ///
    /// Hand it to whatever will observe the awaited event, then
    /// [`block`](Self::block). Replaces any token issued earlier.
    pub fn new_future(&self) -> CoFuture {
        let result = {
            let mut st = self.state.borrow_mut();
            let me = st.current;
            st.issue(me)
        };
        match result {
            Ok(token) => CoFuture::new(token),
            Err(v) => self.fatal(v),
        }
    }

    /// Mark `future` ready and queue its owner. Never suspends.
    ///
    /// Waking a future twice, or one that was superseded or consumed, is
    /// fatal.
    pub fn wake(&self, future: &CoFuture) {
        let result = self.state.borrow_mut().wake(future.token);
        if let Err(v) = result {
            self.fatal(v);
        }
    }

    /// Make a BLOCKED coroutine ready again without its future.
    ///
    /// Tokens it handed out before become stale.
    pub fn clear_block(&self, id: CoroutineId) {
        let result = {
            let mut st = self.state.borrow_mut();
            st.clear_block(id)
        };
        if let Err(v) = result {
            self.fatal(v);
        }
    }

    /// Wake due sleepers, then run ready coroutines until the queue drains.
    pub fn dispatch(&self) {
        let now = self.clock.now_ns();
        let result = self.state.borrow_mut().expire_timers(now);
        if let Err(v) = result {
            self.fatal(v);
        }
        while self.has_pending() {
            self.yield_now();
        }
    }

    /// How long an external poller may sleep before a timer is due.
    ///
    /// `None` when no sleeper exists, zero when one is already due.
    pub fn min_wait_time(&self) -> Option<Duration> {
        let now = self.clock.now_ns();
        self.state.borrow().timers.min_wait(now)
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.state.borrow().snapshot()
    }

    /// Write the diagnostic dump to stderr.
    pub fn print_diagnostics(&self) {
        match self.state.try_borrow() {
            Ok(st) => eprintln!("{}", st.snapshot()),
            Err(_) => eprintln!("(runtime state busy, no diagnostics)"),
        }
    }

    /// Release every slot. Returns the number of stacks unmapped.
    pub(crate) fn shutdown(&self) -> usize {
        let slots = {
            let mut st = self.state.borrow_mut();
            if st.current != CoroutineId::MAIN {
                let name = st.name(st.current);
                if std::thread::panicking() {
                    // One of these stacks is the one we are running on.
                    std::mem::forget(std::mem::take(&mut st.coroutines));
                    log::error!("runtime dropped on coroutine `{name}` while panicking; leaking stacks");
                    return 0;
                }
                drop(st);
                self.fatal(Violation::TeardownOffMain { name });
            }
            while st.registry.pop().is_some() {}
            while st.idle.pop().is_some() {}
            while st.ready.pop().is_some() {}
            st.timers.clear();
            st.spawner = None;
            std::mem::take(&mut st.coroutines)
        };
        for cell in self.conts.iter() {
            cell.clear();
        }
        let unmapped = slots.iter().filter(|co| co.stack.is_some()).count();
        let suspended = slots
            .iter()
            .filter(|co| matches!(co.status, Status::Blocked | Status::Sleeping))
            .count();
        if suspended > 0 {
            log::debug!("discarding {suspended} suspended coroutine frames");
        }
        // Bodies that never started drop here, outside the borrow.
        drop(slots);
        unmapped
    }

    /// Perform a switch decided under the borrow.
    fn complete(&self, step: std::result::Result<Option<Handoff>, Violation>) {
        match step {
            Ok(None) => {}
            Ok(Some(h)) => {
                log::trace!("switch {} -> {}", h.from, h.to);
                // SAFETY: `h.cont` was taken from its cell, so it is resumed
                // once; `from`'s cell is refilled before anything reads it.
                unsafe { context::switch(&self.conts[h.from.0], h.cont) };
            }
            Err(v) => self.fatal(v),
        }
    }

    /// Report a contract violation and panic. No borrow may be live.
    #[cold]
    fn fatal(&self, violation: Violation) -> ! {
        log::error!("coroutine runtime violation: {violation}");
        self.print_diagnostics();
        panic!("{violation}");
    }

    /// Second half of spawn, run on the new stack: queue the new
    /// coroutine and return to the spawner.
    fn handshake(&self) {
        let step = self.state.borrow_mut().handshake_step(&self.conts);
        match step {
            Ok(h) => {
                // SAFETY: the spawner suspended itself in `spawn`.
                unsafe { context::switch(&self.conts[h.from.0], h.cont) };
            }
            Err(v) => self.fatal(v),
        }
    }

    /// Retire the finished coroutine and hand off for good.
    fn finish(&self, me: CoroutineId) -> ! {
        let now = self.clock.now_ns();
        let step = self.state.borrow_mut().finish_step(me, now, &self.conts);
        match step {
            Ok(h) => {
                log::trace!("{} finished, switch to {}", h.from, h.to);
                // SAFETY: the slot is idle; nothing will resume this stack
                // until a new body is prepared on it.
                unsafe { context::jump(h.cont) }
            }
            Err(v) => self.fatal(v),
        }
    }

    fn take_body(&self, me: CoroutineId) -> Option<(String, crate::coroutine::Body)> {
        let mut st = self.state.borrow_mut();
        let slot = st.coroutines.get_mut(me.0)?;
        let body = slot.body.take()?;
        Some((slot.name.clone(), body))
    }
}

impl State {
    fn yield_step(
        &mut self,
        now: u64,
        conts: &[ContinuationCell],
    ) -> std::result::Result<Option<Handoff>, Violation> {
        self.expire_timers(now)?;
        let Some(target) = self.ready.pop() else {
            return Ok(None);
        };
        let me = self.current;
        // An earlier self-wake already put our own token at the front.
        if target.co != me {
            let token = self.issue(me)?;
            self.wake(token)?;
        }
        self.handoff(target, conts)
    }

    fn sleep_step(
        &mut self,
        now: u64,
        duration: Duration,
        conts: &[ContinuationCell],
    ) -> std::result::Result<Option<Handoff>, Violation> {
        let me = self.current;
        let token = self.issue(me)?;
        self.timers
            .insert(now, duration, token)
            .map_err(|_| Violation::QueueOverflow {
                queue: "timer heap",
            })?;
        self.park(Status::Sleeping, now, "sleep", conts)
    }

    fn clear_block(&mut self, id: CoroutineId) -> std::result::Result<(), Violation> {
        let slot = self.slot(id)?;
        if slot.status != Status::Blocked {
            return Err(Violation::NotBlocked {
                name: slot.name.clone(),
                status: slot.status,
            });
        }
        let token = self.issue(id)?;
        self.wake(token)
    }

    fn handshake_step(
        &mut self,
        conts: &[ContinuationCell],
    ) -> std::result::Result<Handoff, Violation> {
        let me = self.current;
        let spawner = self.spawner.take().ok_or(Violation::MissingSpawner)?;
        let token = self.issue(me)?;
        self.wake(token)?;
        let cont = self.enter(spawner, conts)?;
        Ok(Handoff {
            from: me,
            to: spawner,
            cont,
        })
    }

    fn finish_step(
        &mut self,
        me: CoroutineId,
        now: u64,
        conts: &[ContinuationCell],
    ) -> std::result::Result<Handoff, Violation> {
        self.slot_mut(me)?.retire();
        self.idle.push(me).map_err(|_| Violation::QueueOverflow {
            queue: "idle pool",
        })?;
        self.expire_timers(now)?;
        let token = self.ready.pop().ok_or(Violation::NoReadyCoroutine {
            during: "coroutine exit",
        })?;
        match self.handoff(token, conts)? {
            Some(h) => Ok(h),
            // The retired slot holds no token, so this cannot be ours.
            None => Err(Violation::StaleFuture {
                name: self.name(me),
            }),
        }
    }
}

/// Entry point of every coroutine stack.
///
/// Runs the handshake, then the body. A panic escaping the body cannot
/// unwind past this frame, so it aborts the process after logging.
extern "C" fn coroutine_main(arg: *mut ()) -> ! {
    // SAFETY: `spawn` passes the scheduler, which outlives every coroutine
    // stack it owns.
    let sched = unsafe { &*(arg as *const Scheduler) };
    sched.handshake();

    let me = sched.current();
    if let Some((name, body)) = sched.take_body(me) {
        log::trace!("coroutine `{name}` starting");
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| body(sched))) {
            let msg = if let Some(s) = payload.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic".to_string()
            };
            log::error!("coroutine `{name}` panicked: {msg}");
            eprintln!("coroutine `{name}` panicked: {msg}");
            sched.print_diagnostics();
            process::abort();
        }
    }
    sched.finish(me)
}
