use {
    crate::{
        context::Context,
        deferred::Deferred,
        error::ErrorValue,
        fiber::{Fiber, FiberRun, Resume},
        op::{self, ECause, EExit, Op, Value},
        scope::{scope_exit, Scope, ScopeExit},
    },
    std::{
        cell::Cell,
        convert::Infallible,
        fmt::Debug,
        marker::PhantomData,
        rc::Rc,
        time::Duration,
    },
    weft_core::{Cause, Exit, FiberId, FiberRef, FlagsPatch, RuntimeFlags},
};

/// A lazy description of a program that yields an `A` or fails with a
/// [`Cause<E>`]. Nothing runs until a [`Runtime`](crate::Runtime) forks it.
///
/// Values and errors flow through the interpreter type-erased; the typed
/// surface restores them at the boundaries, which is why `A: Clone` and
/// `E: Clone` are pervasive.
pub struct Effect<A, E = Infallible> {
    pub(crate) op: Op,
    _marker: PhantomData<fn() -> (A, E)>,
}

impl<A: 'static, E: 'static> Effect<A, E> {
    pub(crate) fn from_op(op: Op) -> Self {
        Effect {
            op,
            _marker: PhantomData,
        }
    }
}

impl<A: Clone + 'static> Effect<A, Infallible> {
    /// Reinterprets an infallible effect at any error type.
    pub fn widen_error<E2: 'static>(self) -> Effect<A, E2> {
        Effect::from_op(self.op)
    }
}

impl Effect<(), Infallible> {
    pub fn unit() -> Effect<(), Infallible> {
        Effect::from_op(Op::succeed_unit())
    }
}

impl<A: Clone + 'static, E: Clone + Debug + 'static> Effect<A, E> {
    pub fn succeed(value: A) -> Effect<A, E> {
        Effect::from_op(Op::Succeed(Rc::new(value)))
    }

    pub fn fail(error: E) -> Effect<A, E> {
        Effect::from_op(Op::FailCause(Cause::fail(ErrorValue::new(error))))
    }

    pub fn fail_cause(cause: Cause<E>) -> Effect<A, E> {
        Effect::from_op(Op::FailCause(erase_cause(cause)))
    }

    /// Fails with a defect: an unrecoverable error outside the typed channel.
    pub fn die(message: impl Into<String>) -> Effect<A, E> {
        Effect::from_op(Op::FailCause(Cause::die(message)))
    }

    pub fn from_exit(exit: Exit<A, E>) -> Effect<A, E> {
        match exit {
            Exit::Success(value) => Effect::succeed(value),
            Exit::Failure(cause) => Effect::fail_cause(cause),
        }
    }

    /// Lifts a side-effecting thunk. Panics inside become defects.
    pub fn sync(thunk: impl FnOnce() -> A + 'static) -> Effect<A, E> {
        Effect::from_op(Op::Sync(Box::new(move || Rc::new(thunk()) as Value)))
    }

    /// Defers construction of the effect until it runs.
    pub fn suspend(f: impl FnOnce() -> Effect<A, E> + 'static) -> Effect<A, E> {
        Effect::from_op(Op::Suspend(Box::new(move || f().op)))
    }

    /// Suspends the fiber until the callback is invoked. `register` may
    /// return a cleanup effect that runs if the fiber is interrupted while
    /// suspended here.
    pub fn async_(
        register: impl FnOnce(AsyncCallback<A, E>) -> Option<Effect<(), Infallible>> + 'static,
    ) -> Effect<A, E> {
        Effect::from_op(Op::Async {
            register: Box::new(move |resume| {
                register(AsyncCallback {
                    resume,
                    _marker: PhantomData,
                })
                .map(|cleanup| cleanup.op)
            }),
        })
    }

    /// An effect that never completes. Only interruption ends it.
    pub fn never() -> Effect<A, E> {
        Effect::from_op(Op::Async {
            register: Box::new(|_| None),
        })
    }

    /// Interrupts the current fiber as itself.
    pub fn interrupt() -> Effect<A, E> {
        Effect::from_op(Op::GetFiberId(Box::new(|id| {
            Op::FailCause(Cause::interrupt(id))
        })))
    }

    pub fn map<B: Clone + 'static>(self, f: impl FnOnce(A) -> B + 'static) -> Effect<B, E> {
        Effect::from_op(op::on_success(self.op, move |value| {
            Op::Succeed(Rc::new(f(downcast_value::<A>(&value))))
        }))
    }

    pub fn flat_map<B: Clone + 'static>(
        self,
        f: impl FnOnce(A) -> Effect<B, E> + 'static,
    ) -> Effect<B, E> {
        Effect::from_op(op::on_success(self.op, move |value| {
            f(downcast_value::<A>(&value)).op
        }))
    }

    pub fn zip<B: Clone + 'static>(self, that: Effect<B, E>) -> Effect<(A, B), E> {
        self.flat_map(move |a| that.map(move |b| (a, b)))
    }

    pub fn as_unit(self) -> Effect<(), E> {
        self.map(|_| ())
    }

    pub fn tap(self, f: impl FnOnce(&A) + 'static) -> Effect<A, E> {
        self.map(move |value| {
            f(&value);
            value
        })
    }

    /// The fundamental eliminator: handles the full cause on failure and the
    /// value on success, moving to a new error type.
    pub fn fold_cause<B: Clone + 'static, E2: Clone + Debug + 'static>(
        self,
        on_failure: impl FnOnce(Cause<E>) -> Effect<B, E2> + 'static,
        on_success: impl FnOnce(A) -> Effect<B, E2> + 'static,
    ) -> Effect<B, E2> {
        Effect::from_op(Op::Fold {
            first: Box::new(self.op),
            on_success: Box::new(move |value| on_success(downcast_value::<A>(&value)).op),
            on_failure: Box::new(move |cause| on_failure(typed_cause::<E>(cause)).op),
        })
    }

    pub fn catch_all_cause<E2: Clone + Debug + 'static>(
        self,
        f: impl FnOnce(Cause<E>) -> Effect<A, E2> + 'static,
    ) -> Effect<A, E2> {
        self.fold_cause(f, Effect::succeed)
    }

    /// Recovers from typed failures. Defects and interruptions pass through.
    pub fn catch_all<E2: Clone + Debug + 'static>(
        self,
        f: impl FnOnce(E) -> Effect<A, E2> + 'static,
    ) -> Effect<A, E2> {
        self.fold_cause(
            move |cause| match cause.first_failure().cloned() {
                Some(error) => f(error),
                None => Effect::fail_cause(cause.flat_map(|_| Cause::Empty)),
            },
            Effect::succeed,
        )
    }

    pub fn map_error<E2: Clone + Debug + 'static>(
        self,
        f: impl FnOnce(E) -> E2 + 'static,
    ) -> Effect<A, E2> {
        self.catch_all(move |error| Effect::fail(f(error)))
    }

    /// Materializes the exit, making the effect infallible.
    pub fn exit(self) -> Effect<Exit<A, E>, Infallible> {
        self.fold_cause(
            |cause| Effect::succeed(Exit::Failure(cause)),
            |value| Effect::succeed(Exit::Success(value)),
        )
    }

    /// Runs `f` with the exit on every completion path. The finalizer is
    /// uninterruptible and its failure is appended to the original cause.
    pub fn on_exit(
        self,
        f: impl FnOnce(&Exit<A, E>) -> Effect<(), Infallible> + 'static,
    ) -> Effect<A, E> {
        Effect::from_op(op::on_exit(self.op, move |exit| {
            f(&typed_exit::<A, E>(exit)).op
        }))
    }

    pub fn ensuring(self, finalizer: Effect<(), Infallible>) -> Effect<A, E> {
        self.on_exit(move |_| finalizer)
    }

    pub fn uninterruptible(self) -> Effect<A, E> {
        Effect::from_op(Op::WithFlags {
            patch: FlagsPatch::disable(RuntimeFlags::INTERRUPTION),
            inner: Box::new(self.op),
        })
    }

    pub fn interruptible(self) -> Effect<A, E> {
        Effect::from_op(Op::WithFlags {
            patch: FlagsPatch::enable(RuntimeFlags::INTERRUPTION),
            inner: Box::new(self.op),
        })
    }

    /// Masks interruption for the whole region; the [`Restore`] passed to `f`
    /// reinstates the caller's interruptibility for chosen sub-regions.
    pub fn uninterruptible_mask(
        f: impl FnOnce(Restore) -> Effect<A, E> + 'static,
    ) -> Effect<A, E> {
        Effect::from_op(Op::CheckInterruptible(Box::new(move |interruptible| {
            Op::WithFlags {
                patch: FlagsPatch::disable(RuntimeFlags::INTERRUPTION),
                inner: Box::new(f(Restore { interruptible }).op),
            }
        })))
    }

    /// Forks the effect onto a new fiber inheriting context, flags, scope and
    /// forked fiber refs. The child starts running immediately.
    pub fn fork(self) -> Effect<Fiber<A, E>, Infallible> {
        self.fork_inner(true)
    }

    /// Like [`Effect::fork`] but the child only starts on the next scheduler
    /// tick.
    pub fn fork_scheduled(self) -> Effect<Fiber<A, E>, Infallible> {
        self.fork_inner(false)
    }

    fn fork_inner(self, immediate: bool) -> Effect<Fiber<A, E>, Infallible> {
        Effect::from_op(op::on_success(
            Op::Fork {
                inner: Box::new(self.op),
                immediate,
            },
            |value| {
                let run = match value.downcast_ref::<FiberRun>() {
                    Some(run) => run.clone(),
                    None => unreachable!("fork value type confusion"),
                };
                Op::Succeed(Rc::new(Fiber::<A, E> {
                    run,
                    _marker: PhantomData,
                }))
            },
        ))
    }

    /// Runs both effects concurrently; the first success wins and the loser
    /// is interrupted and awaited. When both fail the causes combine in
    /// parallel. Interrupting the race interrupts both sides.
    pub fn race(self, that: Effect<A, E>) -> Effect<A, E> {
        Effect::uninterruptible_mask(move |restore| {
            restore
                .apply(self)
                .fork()
                .widen_error::<E>()
                .flat_map(move |left| {
                    restore
                        .apply(that)
                        .fork()
                        .widen_error::<E>()
                        .flat_map(move |right| {
                            let decided: Deferred<RaceDecision, Infallible> = Deferred::new();
                            let failed = Rc::new(Cell::new(0u32));
                            for (side, run) in [
                                (RaceDecision::Left, left.run.clone()),
                                (RaceDecision::Right, right.run.clone()),
                            ] {
                                let decided = decided.clone();
                                let failed = Rc::clone(&failed);
                                run.add_observer(move |exit| {
                                    if exit.is_success() {
                                        decided.done(Exit::succeed(side));
                                    } else {
                                        failed.set(failed.get() + 1);
                                        if failed.get() == 2 {
                                            decided
                                                .done(Exit::succeed(RaceDecision::AllFailed));
                                        }
                                    }
                                });
                            }
                            let (l, r) = (left.clone(), right.clone());
                            let (l2, r2) = (left, right);
                            restore
                                .apply(decided.await_().widen_error::<E>())
                                .flat_map(move |decision| match decision {
                                    RaceDecision::Left => r
                                        .interrupt()
                                        .widen_error::<E>()
                                        .flat_map(move |_| l.join()),
                                    RaceDecision::Right => l
                                        .interrupt()
                                        .widen_error::<E>()
                                        .flat_map(move |_| r.join()),
                                    RaceDecision::AllFailed => l
                                        .await_exit()
                                        .zip(r.await_exit())
                                        .widen_error::<E>()
                                        .flat_map(|exits| match exits {
                                            (Exit::Failure(lc), Exit::Failure(rc)) => {
                                                Effect::fail_cause(lc.both(rc))
                                            }
                                            _ => unreachable!(
                                                "race arbitration saw two failures"
                                            ),
                                        }),
                                })
                                .on_exit(move |exit| {
                                    if exit.is_interrupted() {
                                        l2.interrupt().zip(r2.interrupt()).as_unit()
                                    } else {
                                        Effect::succeed(())
                                    }
                                })
                        })
                })
        })
    }

    /// Runs both effects concurrently and waits for both. The first failure
    /// interrupts the other side; both fiber-ref snapshots are joined back on
    /// success, left before right.
    pub fn zip_par<B: Clone + 'static>(self, that: Effect<B, E>) -> Effect<(A, B), E> {
        Effect::uninterruptible_mask(move |restore| {
            restore
                .apply(self)
                .fork()
                .widen_error::<E>()
                .flat_map(move |left| {
                    restore
                        .apply(that)
                        .fork()
                        .widen_error::<E>()
                        .flat_map(move |right| {
                            let decided: Deferred<ParDecision, Infallible> = Deferred::new();
                            let succeeded = Rc::new(Cell::new(0u32));
                            for (failure, run) in [
                                (ParDecision::LeftFailed, left.run.clone()),
                                (ParDecision::RightFailed, right.run.clone()),
                            ] {
                                let decided = decided.clone();
                                let succeeded = Rc::clone(&succeeded);
                                run.add_observer(move |exit| {
                                    if exit.is_success() {
                                        succeeded.set(succeeded.get() + 1);
                                        if succeeded.get() == 2 {
                                            decided.done(Exit::succeed(ParDecision::BothDone));
                                        }
                                    } else {
                                        decided.done(Exit::succeed(failure));
                                    }
                                });
                            }
                            let (l, r) = (left.clone(), right.clone());
                            let (l2, r2) = (left, right);
                            restore
                                .apply(decided.await_().widen_error::<E>())
                                .flat_map(move |decision| match decision {
                                    ParDecision::BothDone => l.join().zip(r.join()),
                                    ParDecision::LeftFailed => r
                                        .interrupt()
                                        .widen_error::<E>()
                                        .flat_map(move |right_exit| {
                                            l.await_exit().widen_error::<E>().flat_map(
                                                move |left_exit| {
                                                    let cause = match (left_exit, right_exit) {
                                                        (Exit::Failure(lc), Exit::Failure(rc))
                                                            if !rc.is_interrupted_only() =>
                                                        {
                                                            lc.both(rc)
                                                        }
                                                        (Exit::Failure(lc), _) => lc,
                                                        _ => unreachable!(
                                                            "left side lost the arbitration"
                                                        ),
                                                    };
                                                    Effect::fail_cause(cause)
                                                },
                                            )
                                        }),
                                    ParDecision::RightFailed => l
                                        .interrupt()
                                        .widen_error::<E>()
                                        .flat_map(move |left_exit| {
                                            r.await_exit().widen_error::<E>().flat_map(
                                                move |right_exit| {
                                                    let cause = match (left_exit, right_exit) {
                                                        (Exit::Failure(lc), Exit::Failure(rc))
                                                            if !lc.is_interrupted_only() =>
                                                        {
                                                            lc.both(rc)
                                                        }
                                                        (_, Exit::Failure(rc)) => rc,
                                                        _ => unreachable!(
                                                            "right side lost the arbitration"
                                                        ),
                                                    };
                                                    Effect::fail_cause(cause)
                                                },
                                            )
                                        }),
                                })
                                .on_exit(move |exit| {
                                    if exit.is_interrupted() {
                                        l2.interrupt().zip(r2.interrupt()).as_unit()
                                    } else {
                                        Effect::succeed(())
                                    }
                                })
                        })
                })
        })
    }

    /// Yields `Some(value)` if the effect completes within `duration`. On
    /// timeout the effect's fiber is interrupted, its finalizers run, and the
    /// result is `None`. A completion already latched when the timer fires
    /// still wins.
    pub fn timeout(self, duration: Duration) -> Effect<Option<A>, E> {
        Effect::uninterruptible_mask(move |restore| {
            restore
                .apply(self)
                .fork()
                .widen_error::<E>()
                .flat_map(move |fiber| {
                    restore
                        .apply(sleep(duration))
                        .fork()
                        .widen_error::<E>()
                        .flat_map(move |timer| {
                            let decided: Deferred<bool, Infallible> = Deferred::new();
                            {
                                let decided = decided.clone();
                                fiber.run.add_observer(move |_| {
                                    decided.done(Exit::succeed(true));
                                });
                            }
                            {
                                let decided = decided.clone();
                                timer.run.add_observer(move |_| {
                                    decided.done(Exit::succeed(false));
                                });
                            }
                            let (f1, t1) = (fiber.clone(), timer.clone());
                            let (f2, t2) = (fiber, timer);
                            restore
                                .apply(decided.await_().widen_error::<E>())
                                .flat_map(move |finished_first| {
                                    if finished_first {
                                        t1.interrupt()
                                            .widen_error::<E>()
                                            .flat_map(move |_| f1.join().map(Some))
                                    } else {
                                        f1.interrupt().widen_error::<E>().flat_map(
                                            move |exit| match exit {
                                                Exit::Success(value) => {
                                                    Effect::succeed(Some(value))
                                                }
                                                Exit::Failure(cause)
                                                    if cause.is_interrupted_only() =>
                                                {
                                                    Effect::succeed(None)
                                                }
                                                Exit::Failure(cause) => {
                                                    Effect::fail_cause(cause)
                                                }
                                            },
                                        )
                                    }
                                })
                                .on_exit(move |exit| {
                                    if exit.is_interrupted() {
                                        f2.interrupt().zip(t2.interrupt()).as_unit()
                                    } else {
                                        Effect::succeed(())
                                    }
                                })
                        })
                })
        })
    }

    /// Replaces the fiber's context for the duration of the effect.
    pub fn provide_context(self, context: Context) -> Effect<A, E> {
        Effect::from_op(Op::WithContext {
            context,
            inner: Box::new(self.op),
        })
    }

    /// Adds one service on top of the current context.
    pub fn provide_service<S: 'static>(self, service: S) -> Effect<A, E> {
        let inner = self.op;
        Effect::from_op(Op::GetContext(Box::new(move |current| Op::WithContext {
            context: current.add(service),
            inner: Box::new(inner),
        })))
    }

    /// Runs the effect in a fresh child scope that closes, releasing its
    /// finalizers in reverse order, when the effect completes by any path.
    pub fn scoped(self) -> Effect<A, E> {
        let inner = self.op;
        Effect::from_op(Op::GetScope(Box::new(move |parent| {
            let child = parent.fork();
            let close = child.clone();
            op::on_exit(
                Op::WithScope {
                    scope: child,
                    inner: Box::new(inner),
                },
                move |exit| close.close(scope_exit(exit)).op,
            )
        })))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RaceDecision {
    Left,
    Right,
    AllFailed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ParDecision {
    BothDone,
    LeftFailed,
    RightFailed,
}

/// Reinstates the interruptibility that was current outside an
/// [`Effect::uninterruptible_mask`] region.
#[derive(Clone, Copy, Debug)]
pub struct Restore {
    interruptible: bool,
}

impl Restore {
    pub fn apply<A: 'static, E: 'static>(&self, effect: Effect<A, E>) -> Effect<A, E> {
        let patch = if self.interruptible {
            FlagsPatch::enable(RuntimeFlags::INTERRUPTION)
        } else {
            FlagsPatch::disable(RuntimeFlags::INTERRUPTION)
        };
        Effect::from_op(Op::WithFlags {
            patch,
            inner: Box::new(effect.op),
        })
    }
}

/// The single-shot completion callback handed to [`Effect::async_`]
/// registrations. Late or duplicate completions are ignored.
pub struct AsyncCallback<A, E = Infallible> {
    resume: Resume,
    _marker: PhantomData<fn(A, E)>,
}

impl<A, E> Clone for AsyncCallback<A, E> {
    fn clone(&self) -> Self {
        AsyncCallback {
            resume: self.resume.clone(),
            _marker: PhantomData,
        }
    }
}

impl<A: 'static, E: Clone + Debug + 'static> AsyncCallback<A, E> {
    pub fn succeed(&self, value: A) {
        self.resume.resume_op(Op::Succeed(Rc::new(value)));
    }

    pub fn fail(&self, error: E) {
        self.resume
            .resume_op(Op::FailCause(Cause::fail(ErrorValue::new(error))));
    }

    pub fn done(&self, exit: Exit<A, E>) {
        match exit {
            Exit::Success(value) => self.succeed(value),
            Exit::Failure(cause) => self
                .resume
                .resume_op(Op::FailCause(erase_cause(cause))),
        }
    }
}

/// Effectful access to a [`FiberRef`]'s fiber-local value.
pub trait FiberRefOps<A> {
    fn get(&self) -> Effect<A, Infallible>;

    fn set(&self, value: A) -> Effect<(), Infallible>;

    fn update(&self, f: impl FnOnce(&A) -> A + 'static) -> Effect<(), Infallible>
    where
        Self: Sized;

    /// Runs `inner` with the ref set to `value`, restoring the previous value
    /// on every completion path.
    fn locally<B, E>(&self, value: A, inner: Effect<B, E>) -> Effect<B, E>
    where
        B: Clone + 'static,
        E: Clone + Debug + 'static;
}

impl<A: Clone + 'static> FiberRefOps<A> for FiberRef<A> {
    fn get(&self) -> Effect<A, Infallible> {
        let reference = self.clone();
        Effect::from_op(Op::ModifyFiberRefs(Box::new(move |_, refs| {
            let value = refs.get(&reference);
            (refs, Op::Succeed(Rc::new(value)))
        })))
    }

    fn set(&self, value: A) -> Effect<(), Infallible> {
        let reference = self.clone();
        Effect::from_op(Op::ModifyFiberRefs(Box::new(move |id, refs| {
            (refs.updated_as(id, &reference, value), Op::succeed_unit())
        })))
    }

    fn update(&self, f: impl FnOnce(&A) -> A + 'static) -> Effect<(), Infallible> {
        let reference = self.clone();
        Effect::from_op(Op::ModifyFiberRefs(Box::new(move |id, refs| {
            let current = refs.get(&reference);
            let value = f(&current);
            (refs.updated_as(id, &reference, value), Op::succeed_unit())
        })))
    }

    fn locally<B, E>(&self, value: A, inner: Effect<B, E>) -> Effect<B, E>
    where
        B: Clone + 'static,
        E: Clone + Debug + 'static,
    {
        let reference = self.clone();
        let inner = inner.op;
        Effect::from_op(Op::ModifyFiberRefs(Box::new(move |id, refs| {
            let saved = refs.get(&reference);
            let updated = refs.updated_as(id, &reference, value);
            let restored = op::on_exit(inner, move |_| {
                Op::ModifyFiberRefs(Box::new(move |id, refs| {
                    (refs.updated_as(id, &reference, saved), Op::succeed_unit())
                }))
            });
            (updated, restored)
        })))
    }
}

/// The current fiber's full context.
pub fn context() -> Effect<Context, Infallible> {
    Effect::from_op(Op::GetContext(Box::new(|context| {
        Op::Succeed(Rc::new(context))
    })))
}

/// Looks up a service in the current context, dying when it is absent.
pub fn service<S: 'static>() -> Effect<Rc<S>, Infallible> {
    Effect::from_op(Op::GetContext(Box::new(|context| {
        match context.get::<S>() {
            Some(service) => Op::Succeed(Rc::new(service)),
            None => Op::FailCause(Cause::die(format!(
                "Service not found: {}",
                std::any::type_name::<S>()
            ))),
        }
    })))
}

/// The scope the current fiber releases resources into.
pub fn scope() -> Effect<Scope, Infallible> {
    Effect::from_op(Op::GetScope(Box::new(|scope| Op::Succeed(Rc::new(scope)))))
}

pub fn fiber_id() -> Effect<FiberId, Infallible> {
    Effect::from_op(Op::GetFiberId(Box::new(|id| Op::Succeed(Rc::new(id)))))
}

/// Registers a finalizer with the current scope. If the scope is already
/// closed the finalizer runs immediately.
pub fn add_finalizer(
    finalizer: impl FnOnce(&ScopeExit) -> Effect<(), Infallible> + 'static,
) -> Effect<(), Infallible> {
    Effect::from_op(Op::GetScope(Box::new(move |scope| {
        match scope.add(Box::new(move |exit| finalizer(exit).op)) {
            Ok(()) => Op::succeed_unit(),
            Err(finalizer) => finalizer(&Exit::Success(())),
        }
    })))
}

/// Gives other ready fibers a chance to run before continuing.
pub fn yield_now() -> Effect<(), Infallible> {
    Effect::from_op(Op::Yield)
}

/// Suspends the fiber until the scheduler clock reaches `now + duration`.
pub fn sleep(duration: Duration) -> Effect<(), Infallible> {
    Effect::from_op(Op::Sleep(duration))
}

pub(crate) fn downcast_value<A: Clone + 'static>(value: &Value) -> A {
    match value.downcast_ref::<A>() {
        Some(value) => value.clone(),
        None => unreachable!("value type confusion"),
    }
}

pub(crate) fn erase_cause<E: Debug + 'static>(cause: Cause<E>) -> ECause {
    cause.map(|error| ErrorValue::new(error))
}

pub(crate) fn typed_cause<E: Clone + 'static>(cause: ECause) -> Cause<E> {
    cause.flat_map(|error| match error.downcast::<E>() {
        Some(error) => Cause::Fail(error),
        None => Cause::die(format!("error type confusion: {}", error.rendered())),
    })
}

pub(crate) fn typed_exit<A: Clone + 'static, E: Clone + 'static>(exit: &EExit) -> Exit<A, E> {
    match exit {
        Exit::Success(value) => Exit::Success(downcast_value::<A>(value)),
        Exit::Failure(cause) => Exit::Failure(typed_cause(cause.clone())),
    }
}
