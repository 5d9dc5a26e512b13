use {
    crate::{
        effect::Effect,
        error::ErrorValue,
        op::{self, ECause, EExit, Op},
    },
    std::{cell::RefCell, convert::Infallible, rc::Rc},
    tracing::trace,
    weft_core::{Exit, FlagsPatch, RuntimeFlags},
};

/// The erased exit a scope is closed with: finalizers can ask whether the
/// owning computation succeeded, failed, or was interrupted, but not for its
/// typed value.
pub type ScopeExit = Exit<(), ErrorValue>;

pub(crate) type Finalizer = Box<dyn FnOnce(&ScopeExit) -> Op>;

enum ScopeState {
    Open(Vec<Finalizer>),
    Closed,
}

/// A resource-lifetime container: an ordered list of finalizers run exactly
/// once, in reverse (LIFO) order of registration, when the scope is closed
/// with the owning computation's exit.
#[derive(Clone)]
pub struct Scope {
    inner: Rc<RefCell<ScopeState>>,
}

impl Scope {
    pub fn new() -> Self {
        Scope {
            inner: Rc::new(RefCell::new(ScopeState::Open(Vec::new()))),
        }
    }

    /// Creates a child scope. The child may be closed early; otherwise it is
    /// closed when this scope closes, with the same exit.
    #[must_use]
    pub fn fork(&self) -> Scope {
        let child = Scope::new();
        let handle = child.clone();
        // Closing an already-closed child is a no-op, so early closes are safe.
        let _ = self.add(Box::new(move |exit: &ScopeExit| {
            handle.close(exit.clone()).op
        }));
        child
    }

    pub fn is_closed(&self) -> bool {
        matches!(*self.inner.borrow(), ScopeState::Closed)
    }

    /// Registers a finalizer. Returns it back when the scope has already been
    /// closed, so the caller can decide to run it immediately.
    pub(crate) fn add(&self, finalizer: Finalizer) -> Result<(), Finalizer> {
        match &mut *self.inner.borrow_mut() {
            ScopeState::Open(finalizers) => {
                finalizers.push(finalizer);
                Ok(())
            }
            ScopeState::Closed => Err(finalizer),
        }
    }

    /// Closes the scope, running all finalizers in LIFO order with `exit`,
    /// uninterruptibly. Closing twice is a no-op. Finalizer failures are
    /// combined sequentially and surface as the close effect's failure.
    pub fn close(&self, exit: ScopeExit) -> Effect<(), Infallible> {
        let inner = Rc::clone(&self.inner);
        Effect::from_op(Op::Suspend(Box::new(move || {
            let finalizers = match std::mem::replace(&mut *inner.borrow_mut(), ScopeState::Closed)
            {
                ScopeState::Open(finalizers) => finalizers,
                ScopeState::Closed => return Op::succeed_unit(),
            };
            trace!(count = finalizers.len(), "Closing scope.");
            Op::WithFlags {
                patch: FlagsPatch::disable(RuntimeFlags::INTERRUPTION),
                inner: Box::new(run_finalizers(finalizers, exit, None)),
            }
        })))
    }
}

impl Default for Scope {
    fn default() -> Self {
        Scope::new()
    }
}

// Pops from the back of the registration list, giving LIFO release order.
// A failing finalizer never stops the remaining ones; causes accumulate
// sequentially and surface once every finalizer has run.
fn run_finalizers(mut finalizers: Vec<Finalizer>, exit: ScopeExit, pending: Option<ECause>) -> Op {
    let Some(finalizer) = finalizers.pop() else {
        return match pending {
            None => Op::succeed_unit(),
            Some(cause) => Op::FailCause(cause),
        };
    };
    // Each step resolves to `Option<ECause>` so one continuation owns the
    // remaining finalizers whichever way the step went.
    let step = Op::Fold {
        first: Box::new(finalizer(&exit)),
        on_success: Box::new(|_| Op::Succeed(Rc::new(None::<ECause>))),
        on_failure: Box::new(|cause| Op::Succeed(Rc::new(Some(cause)))),
    };
    op::on_success(step, move |outcome| {
        let failed = match outcome.downcast_ref::<Option<ECause>>() {
            Some(failed) => failed.clone(),
            None => unreachable!("finalizer step outcome type confusion"),
        };
        let pending = match (pending, failed) {
            (pending, None) => pending,
            (None, failed) => failed,
            (Some(earlier), Some(later)) => Some(earlier.then(later)),
        };
        run_finalizers(finalizers, exit, pending)
    })
}

pub(crate) fn scope_exit(exit: &EExit) -> ScopeExit {
    match exit {
        Exit::Success(_) => Exit::Success(()),
        Exit::Failure(cause) => Exit::Failure(cause.clone()),
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &*self.inner.borrow() {
            ScopeState::Open(finalizers) => {
                write!(f, "Scope(open, {} finalizers)", finalizers.len())
            }
            ScopeState::Closed => f.write_str("Scope(closed)"),
        }
    }
}
