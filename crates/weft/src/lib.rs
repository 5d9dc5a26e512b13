//! Weft is a structured-concurrency runtime built around cooperatively
//! scheduled fibers on a single thread.
//!
//! Programs are [`Effect`] values: lazy descriptions that only run when a
//! [`Runtime`] forks them onto a fiber. Fibers carry typed failure causes
//! ([`Cause`]), inheritable fiber-local state ([`FiberRef`]), a service
//! context ([`Context`]), and release resources through [`Scope`]s in reverse
//! acquisition order on every exit path, including interruption.
//!
//! ```rust
//! use weft::{Effect, FiberRef, FiberRefOps, Runtime};
//!
//! let counter = FiberRef::new(0);
//! let reader = counter.clone();
//! let program = counter.set(1).flat_map(move |_| reader.get());
//! assert_eq!(Runtime::new().run_sync(program).unwrap(), 1);
//! ```
//!
//! Concurrency is structured: [`Effect::race`], [`Effect::zip_par`] and
//! [`Effect::timeout`] interrupt and await their losers, so no fiber outlives
//! the expression that spawned it unless explicitly forked. Time is virtual:
//! [`sleep`] and [`timeout`] advance the scheduler clock only when no fiber
//! is ready, which makes timing-dependent tests deterministic.
//!
//! Set the `WEFT_DEBUG` environment variable to dump failure causes to
//! stderr when a synchronous entry point observes a failed fiber.

#![cfg_attr(all(doc, CHANNEL_NIGHTLY), feature(doc_auto_cfg))]
#![deny(unused_must_use)]
#![warn(rust_2018_idioms, unreachable_pub)]

mod context;
mod deferred;
mod effect;
mod error;
mod fiber;
mod handle;
mod layer;
mod op;
mod runtime;
mod scheduler;
mod scope;

pub use {
    context::Context,
    deferred::Deferred,
    effect::{
        add_finalizer, context, fiber_id, scope, service, sleep, yield_now, AsyncCallback,
        Effect, FiberRefOps, Restore,
    },
    error::{ErrorValue, FiberFailure},
    fiber::Fiber,
    handle::FiberHandle,
    layer::Layer,
    runtime::Runtime,
    scheduler::{DefaultScheduler, Scheduler, Task, TestScheduler},
    scope::{Scope, ScopeExit},
    weft_core::{
        Cause, Defect, Exit, FiberId, FiberRef, FiberRefs, FlagsPatch, RuntimeFiberId,
        RuntimeFlags,
    },
};
