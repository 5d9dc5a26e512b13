use {
    crate::{
        context::Context,
        effect::Effect,
        error::{maybe_debug_dump, FiberFailure},
        fiber::{Fiber, FiberRun, RuntimeShared},
        op,
        scheduler::{DefaultScheduler, Scheduler},
        scope::{scope_exit, Scope},
    },
    std::{fmt::Debug, marker::PhantomData, rc::Rc},
    tracing::warn,
    weft_core::{Exit, FiberId, FiberRefs, RuntimeFlags},
};

/// The entry point: holds the baseline context, flags and fiber-ref values
/// every forked fiber starts from, plus the scheduler they share.
pub struct Runtime {
    context: Context,
    flags: RuntimeFlags,
    fiber_refs: FiberRefs,
    shared: Rc<RuntimeShared>,
}

impl Runtime {
    pub fn new() -> Self {
        Runtime::with_scheduler(Rc::new(DefaultScheduler::new()))
    }

    pub fn with_scheduler(scheduler: Rc<dyn Scheduler>) -> Self {
        Runtime {
            context: Context::new(),
            flags: RuntimeFlags::default(),
            fiber_refs: FiberRefs::new(),
            shared: RuntimeShared::new(scheduler),
        }
    }

    /// Replaces the baseline context.
    pub fn context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// Replaces the baseline runtime flags.
    pub fn flags(mut self, flags: RuntimeFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Forks `effect` onto a fresh root fiber with its own root scope, which
    /// closes when the fiber completes. The fiber starts on the next
    /// scheduler tick.
    pub fn fork<A: Clone + 'static, E: Clone + Debug + 'static>(
        &self,
        effect: Effect<A, E>,
    ) -> Fiber<A, E> {
        let root_scope = Scope::new();
        let close = root_scope.clone();
        let wrapped = op::on_exit(effect.op, move |exit| {
            close.close(scope_exit(exit)).op
        });
        let id = self.shared.fresh_id();
        let fiber_refs = self.fiber_refs.fork_as(FiberId::Runtime(id));
        let run = FiberRun::new(
            Rc::clone(&self.shared),
            id,
            fiber_refs,
            self.flags,
            self.context.clone(),
            root_scope,
        );
        run.start(wrapped, false);
        Fiber {
            run,
            _marker: PhantomData,
        }
    }

    /// Runs the effect to completion on the calling thread, returning its
    /// exit. Dies when the effect suspends on an event the scheduler cannot
    /// produce.
    pub fn run_sync_exit<A: Clone + 'static, E: Clone + Debug + 'static>(
        &self,
        effect: Effect<A, E>,
    ) -> Exit<A, E> {
        let fiber = self.fork(effect);
        self.shared.scheduler.flush();
        match fiber.poll() {
            Some(exit) => exit,
            None => {
                warn!("Fiber did not resolve synchronously.");
                Exit::die(
                    "cannot resolve synchronously: \
                     the fiber is suspended on an external event",
                )
            }
        }
    }

    /// Runs the effect to completion, unwrapping success and packaging any
    /// failure cause as an error.
    pub fn run_sync<A: Clone + 'static, E: Clone + Debug + 'static>(
        &self,
        effect: Effect<A, E>,
    ) -> Result<A, FiberFailure<E>> {
        match self.run_sync_exit(effect) {
            Exit::Success(value) => Ok(value),
            Exit::Failure(cause) => {
                maybe_debug_dump(&cause);
                Err(FiberFailure::new(cause))
            }
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Runtime::new()
    }
}
