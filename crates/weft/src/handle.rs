use {
    crate::{
        effect::{add_finalizer, Effect},
        fiber::Fiber,
    },
    std::{cell::RefCell, convert::Infallible, fmt::Debug, rc::Rc},
};

/// A slot holding at most one running fiber. Setting a new occupant
/// interrupts the previous one, and the slot is emptied, interrupting any
/// occupant, when the scope it was created in closes.
pub struct FiberHandle<A, E = Infallible> {
    slot: Rc<RefCell<Option<Fiber<A, E>>>>,
}

impl<A, E> Clone for FiberHandle<A, E> {
    fn clone(&self) -> Self {
        FiberHandle {
            slot: Rc::clone(&self.slot),
        }
    }
}

impl<A: Clone + 'static, E: Clone + Debug + 'static> FiberHandle<A, E> {
    /// Creates a handle tied to the current scope.
    pub fn new() -> Effect<FiberHandle<A, E>, Infallible> {
        let handle = FiberHandle {
            slot: Rc::new(RefCell::new(None)),
        };
        let registered = handle.clone();
        add_finalizer(move |_| registered.clear()).map(move |_| handle)
    }

    /// Stores `fiber`, interrupting and awaiting any previous occupant first.
    pub fn set(&self, fiber: Fiber<A, E>) -> Effect<(), Infallible> {
        let slot = Rc::clone(&self.slot);
        Effect::suspend(move || {
            let previous = slot.borrow_mut().replace(fiber);
            match previous {
                Some(previous) => previous.interrupt().as_unit(),
                None => Effect::succeed(()),
            }
        })
    }

    /// Forks `effect` and stores the resulting fiber in the slot.
    pub fn run(&self, effect: Effect<A, E>) -> Effect<Fiber<A, E>, Infallible> {
        let me = self.clone();
        effect
            .fork()
            .flat_map(move |fiber| me.set(fiber.clone()).map(move |_| fiber))
    }

    /// The current occupant, if any.
    pub fn current(&self) -> Option<Fiber<A, E>> {
        self.slot.borrow().clone()
    }

    /// Interrupts and awaits the occupant, if any, leaving it in the slot so
    /// its exit stays observable.
    pub fn interrupt(&self) -> Effect<(), Infallible> {
        let slot = Rc::clone(&self.slot);
        Effect::suspend(move || {
            let current = slot.borrow().clone();
            match current {
                Some(fiber) => fiber.interrupt().as_unit(),
                None => Effect::succeed(()),
            }
        })
    }

    /// Empties the slot, interrupting and awaiting the occupant.
    pub fn clear(&self) -> Effect<(), Infallible> {
        let slot = Rc::clone(&self.slot);
        Effect::suspend(move || match slot.borrow_mut().take() {
            Some(fiber) => fiber.interrupt().as_unit(),
            None => Effect::succeed(()),
        })
    }

    /// Awaits the occupant's result without inheriting its fiber refs. Dies
    /// when the slot is empty.
    pub fn join(&self) -> Effect<A, E> {
        let slot = Rc::clone(&self.slot);
        Effect::suspend(move || {
            let current = slot.borrow().clone();
            match current {
                Some(fiber) => fiber
                    .await_exit()
                    .widen_error::<E>()
                    .flat_map(Effect::from_exit),
                None => Effect::die("FiberHandle.join: no fiber has been started"),
            }
        })
    }
}
