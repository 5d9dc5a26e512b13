use {
    crate::{
        effect::{erase_cause, typed_exit, Effect},
        op::{exit_to_op, EExit, Op},
    },
    std::{cell::RefCell, convert::Infallible, fmt::Debug, marker::PhantomData, rc::Rc},
    weft_core::{Cause, Exit},
};

/// A one-shot cell that fibers can await. Completes exactly once; every
/// waiter, past or future, observes the same exit.
pub struct Deferred<A, E = Infallible> {
    state: Rc<RefCell<State>>,
    _marker: PhantomData<fn() -> (A, E)>,
}

enum State {
    Pending(Vec<Box<dyn FnOnce(&EExit)>>),
    Done(EExit),
}

impl<A, E> Clone for Deferred<A, E> {
    fn clone(&self) -> Self {
        Deferred {
            state: Rc::clone(&self.state),
            _marker: PhantomData,
        }
    }
}

impl<A, E> Default for Deferred<A, E> {
    fn default() -> Self {
        Deferred {
            state: Rc::new(RefCell::new(State::Pending(Vec::new()))),
            _marker: PhantomData,
        }
    }
}

impl<A: Clone + 'static, E: Clone + Debug + 'static> Deferred<A, E> {
    pub fn new() -> Self {
        Deferred::default()
    }

    /// Suspends the calling fiber until the deferred completes. Awaiting an
    /// already-completed deferred resumes immediately.
    pub fn await_(&self) -> Effect<A, E> {
        let state = Rc::clone(&self.state);
        Effect::from_op(Op::Async {
            register: Box::new(move |resume| {
                let mut current = state.borrow_mut();
                match &mut *current {
                    State::Done(exit) => {
                        let exit = exit.clone();
                        drop(current);
                        resume.resume_op(exit_to_op(&exit));
                    }
                    State::Pending(waiters) => {
                        waiters.push(Box::new(move |exit| resume.resume_op(exit_to_op(exit))));
                    }
                }
                None
            }),
        })
    }

    /// Completes the deferred with `exit`, waking every waiter. Returns false
    /// when it was already completed; the first write wins.
    pub fn done(&self, exit: Exit<A, E>) -> bool {
        let erased = match exit {
            Exit::Success(value) => Exit::Success(Rc::new(value) as Rc<dyn std::any::Any>),
            Exit::Failure(cause) => Exit::Failure(erase_cause(cause)),
        };
        let waiters = {
            let mut state = self.state.borrow_mut();
            match &mut *state {
                State::Done(_) => return false,
                State::Pending(waiters) => {
                    let waiters = std::mem::take(waiters);
                    *state = State::Done(erased.clone());
                    waiters
                }
            }
        };
        for waiter in waiters {
            waiter(&erased);
        }
        true
    }

    /// Effectful completion with a value; yields whether this call won.
    pub fn succeed(&self, value: A) -> Effect<bool, Infallible> {
        let me = self.clone();
        Effect::sync(move || me.done(Exit::succeed(value)))
    }

    /// Effectful completion with a typed failure; yields whether this call
    /// won.
    pub fn fail(&self, error: E) -> Effect<bool, Infallible> {
        let me = self.clone();
        Effect::sync(move || me.done(Exit::fail(error)))
    }

    /// Effectful completion with a full cause; yields whether this call won.
    pub fn fail_cause(&self, cause: Cause<E>) -> Effect<bool, Infallible> {
        let me = self.clone();
        Effect::sync(move || me.done(Exit::Failure(cause)))
    }

    pub fn poll(&self) -> Option<Exit<A, E>> {
        match &*self.state.borrow() {
            State::Done(exit) => Some(typed_exit(exit)),
            State::Pending(_) => None,
        }
    }
}
