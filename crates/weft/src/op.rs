//! The erased instruction set the interpreter executes. The typed
//! [`Effect`](crate::Effect) facade builds these trees; values travel as
//! `Rc<dyn Any>` and typed failures as [`ErrorValue`](crate::ErrorValue),
//! with downcasts confined to the facade's boundaries.

use {
    crate::{context::Context, error::ErrorValue, fiber::Resume, scope::Scope},
    std::{any::Any, rc::Rc, time::Duration},
    weft_core::{Cause, Exit, FiberId, FiberRefs, FlagsPatch},
};

pub(crate) type Value = Rc<dyn Any>;
pub(crate) type ECause = Cause<ErrorValue>;
pub(crate) type EExit = Exit<Value, ErrorValue>;

pub(crate) fn unit() -> Value {
    Rc::new(())
}

pub(crate) enum Op {
    Succeed(Value),
    FailCause(ECause),
    Sync(Box<dyn FnOnce() -> Value>),
    Suspend(Box<dyn FnOnce() -> Op>),
    /// Suspends the fiber. `register` receives a single-shot resume callback
    /// and may return a cleanup op to run if the fiber is interrupted while
    /// suspended.
    Async {
        register: Box<dyn FnOnce(Resume) -> Option<Op>>,
    },
    OnSuccess {
        first: Box<Op>,
        then: Box<dyn FnOnce(Value) -> Op>,
    },
    Fold {
        first: Box<Op>,
        on_success: Box<dyn FnOnce(Value) -> Op>,
        on_failure: Box<dyn FnOnce(ECause) -> Op>,
    },
    /// Attaches a finalizer that runs on every exit path, uninterruptibly,
    /// before the exit continues to propagate.
    OnExit {
        first: Box<Op>,
        finalizer: Box<dyn FnOnce(&EExit) -> Op>,
    },
    WithFlags {
        patch: FlagsPatch,
        inner: Box<Op>,
    },
    CheckInterruptible(Box<dyn FnOnce(bool) -> Op>),
    GetFiberId(Box<dyn FnOnce(FiberId) -> Op>),
    /// Reads and replaces the fiber's ref snapshot in one step, producing the
    /// op to continue with.
    ModifyFiberRefs(Box<dyn FnOnce(FiberId, FiberRefs) -> (FiberRefs, Op)>),
    GetContext(Box<dyn FnOnce(Context) -> Op>),
    WithContext {
        context: Context,
        inner: Box<Op>,
    },
    GetScope(Box<dyn FnOnce(Scope) -> Op>),
    WithScope {
        scope: Scope,
        inner: Box<Op>,
    },
    Fork {
        inner: Box<Op>,
        immediate: bool,
    },
    Yield,
    Sleep(Duration),
}

impl Op {
    pub(crate) fn succeed_unit() -> Op {
        Op::Succeed(unit())
    }

    pub(crate) fn tag(&self) -> &'static str {
        match self {
            Op::Succeed(_) => "Succeed",
            Op::FailCause(_) => "FailCause",
            Op::Sync(_) => "Sync",
            Op::Suspend(_) => "Suspend",
            Op::Async { .. } => "Async",
            Op::OnSuccess { .. } => "OnSuccess",
            Op::Fold { .. } => "Fold",
            Op::OnExit { .. } => "OnExit",
            Op::WithFlags { .. } => "WithFlags",
            Op::CheckInterruptible(_) => "CheckInterruptible",
            Op::GetFiberId(_) => "GetFiberId",
            Op::ModifyFiberRefs(_) => "ModifyFiberRefs",
            Op::GetContext(_) => "GetContext",
            Op::WithContext { .. } => "WithContext",
            Op::GetScope(_) => "GetScope",
            Op::WithScope { .. } => "WithScope",
            Op::Fork { .. } => "Fork",
            Op::Yield => "Yield",
            Op::Sleep(_) => "Sleep",
        }
    }
}

pub(crate) fn on_success(first: Op, then: impl FnOnce(Value) -> Op + 'static) -> Op {
    Op::OnSuccess {
        first: Box::new(first),
        then: Box::new(then),
    }
}

pub(crate) fn on_exit(first: Op, finalizer: impl FnOnce(&EExit) -> Op + 'static) -> Op {
    Op::OnExit {
        first: Box::new(first),
        finalizer: Box::new(finalizer),
    }
}

pub(crate) fn exit_to_op(exit: &EExit) -> Op {
    match exit {
        Exit::Success(value) => Op::Succeed(Rc::clone(value)),
        Exit::Failure(cause) => Op::FailCause(cause.clone()),
    }
}
