use {
    crate::{
        context::Context,
        effect::{typed_exit, Effect},
        op::{EExit, Op, Value},
        scheduler::Scheduler,
        scope::Scope,
    },
    std::{
        cell::{Cell, RefCell},
        collections::HashMap,
        convert::Infallible,
        fmt::Debug,
        marker::PhantomData,
        panic::{catch_unwind, AssertUnwindSafe},
        rc::{Rc, Weak},
        time::{SystemTime, UNIX_EPOCH},
    },
    tracing::{debug, trace},
    weft_core::{
        Cause, Defect, Exit, FiberId, FiberRefs, FlagsPatch, RuntimeFiberId, RuntimeFlags,
    },
};

// How many ops a fiber may run before yielding its scheduler slot when
// cooperative yielding is enabled.
const OPS_PER_TICK: u32 = 2048;

/// Runtime state shared by every fiber forked from one [`Runtime`](crate::Runtime):
/// the scheduler and the live-fiber registry. Explicitly owned, never a
/// process-wide singleton.
pub(crate) struct RuntimeShared {
    pub(crate) scheduler: Rc<dyn Scheduler>,
    registry: RefCell<HashMap<u64, Weak<RefCell<FiberState>>>>,
    next_fiber_id: Cell<u64>,
}

impl RuntimeShared {
    pub(crate) fn new(scheduler: Rc<dyn Scheduler>) -> Rc<Self> {
        Rc::new(RuntimeShared {
            scheduler,
            registry: RefCell::new(HashMap::new()),
            next_fiber_id: Cell::new(0),
        })
    }

    pub(crate) fn fresh_id(&self) -> RuntimeFiberId {
        let id = self.next_fiber_id.get();
        self.next_fiber_id.set(id + 1);
        let started_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        RuntimeFiberId { id, started_at }
    }

    fn live_fibers(&self) -> usize {
        let mut registry = self.registry.borrow_mut();
        registry.retain(|_, weak| weak.strong_count() > 0);
        registry.len()
    }
}

enum Status {
    Running,
    Suspended { token: u64, cleanup: Option<Op> },
    Done(EExit),
}

enum Frame {
    OnSuccess(Box<dyn FnOnce(Value) -> Op>),
    Fold {
        on_success: Box<dyn FnOnce(Value) -> Op>,
        on_failure: Box<dyn FnOnce(crate::op::ECause) -> Op>,
    },
    Finalizer(Box<dyn FnOnce(&EExit) -> Op>),
    RestoreFlags(RuntimeFlags),
    RestoreContext(Context),
    RestoreScope(Scope),
}

struct FiberState {
    id: RuntimeFiberId,
    shared: Rc<RuntimeShared>,
    fiber_refs: FiberRefs,
    flags: RuntimeFlags,
    context: Context,
    scope: Scope,
    stack: Vec<Frame>,
    cur: Option<Op>,
    status: Status,
    interrupters: FiberId,
    observers: Vec<Box<dyn FnOnce(&EExit)>>,
    in_tick: bool,
    next_token: u64,
}

/// One logical green thread: drives an op tree to completion, publishing its
/// exit to observers exactly once. A fiber only runs on one scheduler tick at
/// a time.
#[derive(Clone)]
pub(crate) struct FiberRun {
    state: Rc<RefCell<FiberState>>,
}

impl FiberRun {
    pub(crate) fn new(
        shared: Rc<RuntimeShared>,
        id: RuntimeFiberId,
        fiber_refs: FiberRefs,
        flags: RuntimeFlags,
        context: Context,
        scope: Scope,
    ) -> FiberRun {
        let state = Rc::new(RefCell::new(FiberState {
            id,
            shared: Rc::clone(&shared),
            fiber_refs,
            flags,
            context,
            scope,
            stack: Vec::new(),
            cur: None,
            status: Status::Running,
            interrupters: FiberId::None,
            observers: Vec::new(),
            in_tick: false,
            next_token: 0,
        }));
        shared
            .registry
            .borrow_mut()
            .insert(id.id, Rc::downgrade(&state));
        if flags.enabled(RuntimeFlags::RUNTIME_METRICS) {
            debug!(fiber = id.id, live = shared.live_fibers(), "Fiber created.");
        }
        FiberRun { state }
    }

    pub(crate) fn start(&self, op: Op, immediate: bool) {
        self.state.borrow_mut().cur = Some(op);
        if immediate {
            self.run_tick();
        } else {
            let me = self.clone();
            let scheduler = Rc::clone(&self.state.borrow().shared.scheduler);
            scheduler.schedule(Box::new(move || me.run_tick()));
        }
    }

    pub(crate) fn fiber_id(&self) -> FiberId {
        FiberId::Runtime(self.state.borrow().id)
    }

    pub(crate) fn poll(&self) -> Option<EExit> {
        match &self.state.borrow().status {
            Status::Done(exit) => Some(exit.clone()),
            _ => None,
        }
    }

    pub(crate) fn final_fiber_refs(&self) -> FiberRefs {
        self.state.borrow().fiber_refs.clone()
    }

    /// Registers an observer for the fiber's exit. Observers registered after
    /// completion fire synchronously with the already-computed exit.
    pub(crate) fn add_observer(&self, observer: impl FnOnce(&EExit) + 'static) {
        let done = match &mut *self.state.borrow_mut() {
            FiberState {
                status: Status::Done(exit),
                ..
            } => Some(exit.clone()),
            state => {
                state.observers.push(Box::new(observer));
                return;
            }
        };
        if let Some(exit) = done {
            observer(&exit);
        }
    }

    /// Enqueues an interrupt signal tagged with `interrupter`. Idempotent and
    /// composable: repeated interrupters accumulate into a composite identity.
    /// If the fiber is suspended in an interruptible region it is woken to
    /// unwind; under a mask the signal is consulted when the mask exits.
    pub(crate) fn interrupt_as(&self, interrupter: FiberId) {
        let wake = {
            let mut state = self.state.borrow_mut();
            if let Status::Done(_) = state.status {
                return;
            }
            state.interrupters = std::mem::take(&mut state.interrupters).combine(interrupter);
            trace!(
                fiber = state.id.id,
                interrupters = %state.interrupters,
                "Interrupt signal recorded."
            );
            if state.in_tick || !state.flags.interruptible() {
                false
            } else if let Status::Suspended { cleanup, .. } = &mut state.status {
                // Run the async cleanup (masked), then fall through to the
                // pending-interrupt check, which unwinds with the full
                // interrupter set as of that moment.
                let cleanup = cleanup.take();
                state.cur = Some(match cleanup {
                    None => Op::succeed_unit(),
                    Some(cleanup) => Op::WithFlags {
                        patch: FlagsPatch::disable(RuntimeFlags::INTERRUPTION),
                        inner: Box::new(Op::Fold {
                            first: Box::new(cleanup),
                            on_success: Box::new(|_| Op::succeed_unit()),
                            on_failure: Box::new(Op::FailCause),
                        }),
                    },
                });
                state.status = Status::Running;
                true
            } else {
                false
            }
        };
        if wake {
            let me = self.clone();
            let scheduler = Rc::clone(&self.state.borrow().shared.scheduler);
            scheduler.schedule(Box::new(move || me.run_tick()));
        }
    }

    fn resume(&self, token: u64, op: Op) {
        let schedule = {
            let mut state = self.state.borrow_mut();
            match state.status {
                Status::Suspended { token: t, .. } if t == token => {
                    state.status = Status::Running;
                    state.cur = Some(op);
                    !state.in_tick
                }
                _ => {
                    trace!("Stale resume ignored.");
                    false
                }
            }
        };
        if schedule {
            let me = self.clone();
            let scheduler = Rc::clone(&self.state.borrow().shared.scheduler);
            scheduler.schedule(Box::new(move || me.run_tick()));
        }
    }

    fn publish(&self, exit: EExit) {
        let observers = {
            let mut state = self.state.borrow_mut();
            debug_assert!(!matches!(state.status, Status::Done(_)));
            state.status = Status::Done(exit.clone());
            state.cur = None;
            state.stack.clear();
            state.in_tick = false;
            state
                .shared
                .registry
                .borrow_mut()
                .remove(&state.id.id);
            if state.flags.enabled(RuntimeFlags::RUNTIME_METRICS) {
                debug!(
                    fiber = state.id.id,
                    live = state.shared.live_fibers(),
                    "Fiber done."
                );
            }
            std::mem::take(&mut state.observers)
        };
        trace!(success = exit.is_success(), "Fiber exit published.");
        for observer in observers {
            observer(&exit);
        }
    }

    fn set_cur(&self, op: Op) {
        self.state.borrow_mut().cur = Some(op);
    }

    /// Parks the fiber, returning the token that a matching resume must carry.
    fn park(&self) -> u64 {
        let mut state = self.state.borrow_mut();
        let token = state.next_token;
        state.next_token += 1;
        state.status = Status::Suspended {
            token,
            cleanup: None,
        };
        token
    }

    /// After a suspension site: decides whether the fiber was synchronously
    /// resumed (continue the tick), needs to unwind for a pending interrupt,
    /// or stays parked (end the tick).
    fn after_suspension(&self) -> bool {
        let mut state = self.state.borrow_mut();
        let resumed = state.cur.is_some();
        let unwind = state.flags.interruptible() && !state.interrupters.is_none();
        match &mut state.status {
            Status::Running if resumed => true,
            Status::Suspended { cleanup, .. } if unwind => {
                let cleanup = cleanup.take();
                state.cur = Some(match cleanup {
                    None => Op::succeed_unit(),
                    Some(cleanup) => Op::WithFlags {
                        patch: FlagsPatch::disable(RuntimeFlags::INTERRUPTION),
                        inner: Box::new(Op::Fold {
                            first: Box::new(cleanup),
                            on_success: Box::new(|_| Op::succeed_unit()),
                            on_failure: Box::new(Op::FailCause),
                        }),
                    },
                });
                state.status = Status::Running;
                true
            }
            _ => {
                state.in_tick = false;
                false
            }
        }
    }

    /// One scheduler tick: interprets ops until the fiber suspends, exhausts
    /// its op budget, or completes.
    pub(crate) fn run_tick(&self) {
        {
            let mut state = self.state.borrow_mut();
            if state.in_tick || matches!(state.status, Status::Done(_)) {
                return;
            }
            state.in_tick = true;
        }
        let mut budget = OPS_PER_TICK;
        loop {
            let op = {
                let mut state = self.state.borrow_mut();
                let Some(mut op) = state.cur.take() else {
                    state.in_tick = false;
                    return;
                };
                // Pending interrupts are consulted at every interruptible op
                // boundary. A failure already unwinding keeps its cause.
                if state.flags.interruptible()
                    && !state.interrupters.is_none()
                    && !matches!(op, Op::FailCause(_))
                {
                    trace!(fiber = state.id.id, "Unwinding for pending interrupt.");
                    op = Op::FailCause(Cause::interrupt(state.interrupters.clone()));
                }
                trace!(fiber = state.id.id, op = op.tag(), "Executing op.");
                op
            };

            budget -= 1;
            if budget == 0 {
                if self.state.borrow().flags.cooperative_yielding() {
                    trace!("Op budget exhausted; yielding to the scheduler.");
                    let scheduler = {
                        let mut state = self.state.borrow_mut();
                        state.cur = Some(op);
                        state.in_tick = false;
                        Rc::clone(&state.shared.scheduler)
                    };
                    let me = self.clone();
                    scheduler.schedule(Box::new(move || me.run_tick()));
                    return;
                }
                budget = OPS_PER_TICK;
            }

            if !self.step(op) {
                return;
            }
        }
    }

    /// Executes one op. Returns false when the tick is over (suspension or
    /// completion).
    fn step(&self, op: Op) -> bool {
        match op {
            Op::Succeed(value) => {
                let frame = self.state.borrow_mut().stack.pop();
                match frame {
                    None => {
                        self.publish(Exit::Success(value));
                        return false;
                    }
                    Some(Frame::OnSuccess(f)) => self.set_cur(run_user(move || f(value))),
                    Some(Frame::Fold { on_success, .. }) => {
                        self.set_cur(run_user(move || on_success(value)))
                    }
                    Some(Frame::Finalizer(f)) => {
                        let exit = Exit::Success(Rc::clone(&value));
                        {
                            let mut state = self.state.borrow_mut();
                            let old = state.flags;
                            state.flags = old.disable(RuntimeFlags::INTERRUPTION);
                            state
                                .stack
                                .push(Frame::OnSuccess(Box::new(move |_| Op::Succeed(value))));
                            state.stack.push(Frame::RestoreFlags(old));
                        }
                        self.set_cur(run_user(move || f(&exit)));
                    }
                    Some(Frame::RestoreFlags(old)) => {
                        self.state.borrow_mut().flags = old;
                        self.set_cur(Op::Succeed(value));
                    }
                    Some(Frame::RestoreContext(context)) => {
                        self.state.borrow_mut().context = context;
                        self.set_cur(Op::Succeed(value));
                    }
                    Some(Frame::RestoreScope(scope)) => {
                        self.state.borrow_mut().scope = scope;
                        self.set_cur(Op::Succeed(value));
                    }
                }
            }
            Op::FailCause(cause) => {
                let frame = self.state.borrow_mut().stack.pop();
                match frame {
                    None => {
                        self.publish(Exit::Failure(cause));
                        return false;
                    }
                    Some(Frame::OnSuccess(_)) => self.set_cur(Op::FailCause(cause)),
                    Some(Frame::Fold { on_failure, .. }) => {
                        self.set_cur(run_user(move || on_failure(cause)))
                    }
                    Some(Frame::Finalizer(f)) => {
                        let exit = Exit::Failure(cause.clone());
                        {
                            let mut state = self.state.borrow_mut();
                            let old = state.flags;
                            state.flags = old.disable(RuntimeFlags::INTERRUPTION);
                            let rethrow = cause.clone();
                            state.stack.push(Frame::Fold {
                                on_success: Box::new(move |_| Op::FailCause(rethrow)),
                                on_failure: Box::new(move |later| {
                                    Op::FailCause(cause.then(later))
                                }),
                            });
                            state.stack.push(Frame::RestoreFlags(old));
                        }
                        self.set_cur(run_user(move || f(&exit)));
                    }
                    Some(Frame::RestoreFlags(old)) => {
                        self.state.borrow_mut().flags = old;
                        self.set_cur(Op::FailCause(cause));
                    }
                    Some(Frame::RestoreContext(context)) => {
                        self.state.borrow_mut().context = context;
                        self.set_cur(Op::FailCause(cause));
                    }
                    Some(Frame::RestoreScope(scope)) => {
                        self.state.borrow_mut().scope = scope;
                        self.set_cur(Op::FailCause(cause));
                    }
                }
            }
            Op::Sync(thunk) => match catch_unwind(AssertUnwindSafe(thunk)) {
                Ok(value) => self.set_cur(Op::Succeed(value)),
                Err(panic) => self.set_cur(Op::FailCause(Cause::die_defect(Defect::from_panic(
                    panic.as_ref(),
                )))),
            },
            Op::Suspend(f) => self.set_cur(run_user(f)),
            Op::OnSuccess { first, then } => {
                self.state.borrow_mut().stack.push(Frame::OnSuccess(then));
                self.set_cur(*first);
            }
            Op::Fold {
                first,
                on_success,
                on_failure,
            } => {
                self.state.borrow_mut().stack.push(Frame::Fold {
                    on_success,
                    on_failure,
                });
                self.set_cur(*first);
            }
            Op::OnExit { first, finalizer } => {
                self.state
                    .borrow_mut()
                    .stack
                    .push(Frame::Finalizer(finalizer));
                self.set_cur(*first);
            }
            Op::WithFlags { patch, inner } => {
                {
                    let mut state = self.state.borrow_mut();
                    let old = state.flags;
                    state.flags = patch.apply(old);
                    state.stack.push(Frame::RestoreFlags(old));
                }
                self.set_cur(*inner);
            }
            Op::CheckInterruptible(f) => {
                let interruptible = self.state.borrow().flags.interruptible();
                self.set_cur(run_user(move || f(interruptible)));
            }
            Op::GetFiberId(f) => {
                let id = self.fiber_id();
                self.set_cur(run_user(move || f(id)));
            }
            Op::ModifyFiberRefs(f) => {
                let (id, fiber_refs) = {
                    let state = self.state.borrow();
                    (FiberId::Runtime(state.id), state.fiber_refs.clone())
                };
                match catch_unwind(AssertUnwindSafe(move || f(id, fiber_refs))) {
                    Ok((fiber_refs, op)) => {
                        self.state.borrow_mut().fiber_refs = fiber_refs;
                        self.set_cur(op);
                    }
                    Err(panic) => self.set_cur(Op::FailCause(Cause::die_defect(
                        Defect::from_panic(panic.as_ref()),
                    ))),
                }
            }
            Op::GetContext(f) => {
                let context = self.state.borrow().context.clone();
                self.set_cur(run_user(move || f(context)));
            }
            Op::WithContext { context, inner } => {
                {
                    let mut state = self.state.borrow_mut();
                    let old = std::mem::replace(&mut state.context, context);
                    state.stack.push(Frame::RestoreContext(old));
                }
                self.set_cur(*inner);
            }
            Op::GetScope(f) => {
                let scope = self.state.borrow().scope.clone();
                self.set_cur(run_user(move || f(scope)));
            }
            Op::WithScope { scope, inner } => {
                {
                    let mut state = self.state.borrow_mut();
                    let old = std::mem::replace(&mut state.scope, scope);
                    state.stack.push(Frame::RestoreScope(old));
                }
                self.set_cur(*inner);
            }
            Op::Fork { inner, immediate } => {
                let (shared, fiber_refs, flags, context, scope, parent) = {
                    let state = self.state.borrow();
                    (
                        Rc::clone(&state.shared),
                        state.fiber_refs.clone(),
                        state.flags,
                        state.context.clone(),
                        state.scope.clone(),
                        state.id.id,
                    )
                };
                let child_id = shared.fresh_id();
                let child_refs = fiber_refs.fork_as(FiberId::Runtime(child_id));
                let child = FiberRun::new(shared, child_id, child_refs, flags, context, scope);
                debug!(parent, child = child_id.id, immediate, "Forked fiber.");
                child.start(*inner, immediate);
                self.set_cur(Op::Succeed(Rc::new(child) as Value));
            }
            Op::Yield => {
                let token = self.park();
                let me = self.clone();
                let scheduler = Rc::clone(&self.state.borrow().shared.scheduler);
                scheduler.schedule(Box::new(move || me.resume(token, Op::succeed_unit())));
                return self.after_suspension();
            }
            Op::Sleep(duration) => {
                let token = self.park();
                let me = self.clone();
                let scheduler = Rc::clone(&self.state.borrow().shared.scheduler);
                let wake_at = scheduler.now() + duration;
                scheduler.schedule_at(
                    wake_at,
                    Box::new(move || me.resume(token, Op::succeed_unit())),
                );
                return self.after_suspension();
            }
            Op::Async { register } => {
                let token = self.park();
                let resume = Resume {
                    fiber: self.clone(),
                    token,
                };
                match catch_unwind(AssertUnwindSafe(move || register(resume))) {
                    Ok(cleanup_op) => {
                        let mut state = self.state.borrow_mut();
                        if let Status::Suspended { token: t, cleanup } = &mut state.status {
                            if *t == token {
                                *cleanup = cleanup_op;
                            }
                        }
                    }
                    Err(panic) => {
                        let mut state = self.state.borrow_mut();
                        state.status = Status::Running;
                        state.cur = Some(Op::FailCause(Cause::die_defect(Defect::from_panic(
                            panic.as_ref(),
                        ))));
                    }
                }
                return self.after_suspension();
            }
        }
        true
    }
}

fn run_user(f: impl FnOnce() -> Op) -> Op {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(op) => op,
        Err(panic) => Op::FailCause(Cause::die_defect(Defect::from_panic(panic.as_ref()))),
    }
}

/// A single-shot callback that resumes a suspended fiber. Late or repeated
/// resumes are ignored via the suspension token.
#[derive(Clone)]
pub(crate) struct Resume {
    fiber: FiberRun,
    token: u64,
}

impl Resume {
    pub(crate) fn resume_op(&self, op: Op) {
        self.fiber.resume(self.token, op);
    }
}

/// A handle to a running (or finished) fiber.
pub struct Fiber<A, E = Infallible> {
    pub(crate) run: FiberRun,
    pub(crate) _marker: PhantomData<fn() -> (A, E)>,
}

impl<A, E> Clone for Fiber<A, E> {
    fn clone(&self) -> Self {
        Fiber {
            run: self.run.clone(),
            _marker: PhantomData,
        }
    }
}

impl<A: Clone + 'static, E: Clone + Debug + 'static> Fiber<A, E> {
    pub fn id(&self) -> FiberId {
        self.run.fiber_id()
    }

    /// The exit if the fiber is done, else `None`. Used by synchronous entry
    /// points.
    pub fn poll(&self) -> Option<Exit<A, E>> {
        self.run.poll().map(|exit| typed_exit(&exit))
    }

    /// Awaits the fiber's exit without inheriting its fiber refs.
    pub fn await_exit(&self) -> Effect<Exit<A, E>, Infallible> {
        let run = self.run.clone();
        Effect::from_op(Op::Async {
            register: Box::new(move |resume| {
                run.add_observer(move |exit| {
                    let typed: Exit<A, E> = typed_exit(exit);
                    resume.resume_op(Op::Succeed(Rc::new(typed)));
                });
                None
            }),
        })
    }

    /// Awaits the fiber and, on success, merges its fiber refs into the
    /// caller via each ref's join function before yielding the value.
    pub fn join(&self) -> Effect<A, E> {
        let run = self.run.clone();
        self.await_exit()
            .widen_error::<E>()
            .flat_map(move |exit| match exit {
                Exit::Success(value) => {
                    let child_refs = run.final_fiber_refs();
                    Effect::<(), Infallible>::from_op(Op::ModifyFiberRefs(Box::new(
                        move |id, refs| (refs.join_as(id, &child_refs), Op::succeed_unit()),
                    )))
                    .widen_error::<E>()
                    .map(move |_| value)
                }
                Exit::Failure(cause) => Effect::fail_cause(cause),
            })
    }

    /// Interrupts the fiber as the current fiber and awaits acknowledgement,
    /// yielding the target's exit.
    pub fn interrupt(&self) -> Effect<Exit<A, E>, Infallible> {
        let me = self.clone();
        Effect::from_op(Op::GetFiberId(Box::new(move |id| {
            me.run.interrupt_as(id);
            me.await_exit().op
        })))
    }

    /// Interrupts the fiber on behalf of `interrupter` and awaits
    /// acknowledgement.
    pub fn interrupt_as(&self, interrupter: FiberId) -> Effect<Exit<A, E>, Infallible> {
        let me = self.clone();
        Effect::from_op(Op::Suspend(Box::new(move || {
            me.run.interrupt_as(interrupter);
            me.await_exit().op
        })))
    }
}
