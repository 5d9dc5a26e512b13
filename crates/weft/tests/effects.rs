use {
    std::{cell::RefCell, convert::Infallible, rc::Rc},
    weft::{Cause, Deferred, Effect, Exit, Runtime, RuntimeFlags, Scheduler, TestScheduler},
};

#[test]
fn values_flow_through_map_and_flat_map() {
    let program = Effect::<i32, Infallible>::succeed(20)
        .map(|n| n + 1)
        .flat_map(|n| Effect::succeed(n * 2));
    assert_eq!(Runtime::new().run_sync(program).unwrap(), 42);
}

#[test]
fn catch_all_recovers_typed_failures() {
    let program = Effect::<i32, String>::fail("worth recovering".to_string())
        .catch_all(|error| Effect::<i32, Infallible>::succeed(error.len() as i32));
    assert_eq!(Runtime::new().run_sync(program).unwrap(), 16);
}

#[test]
fn defects_pass_catch_all_untouched() {
    let program = Effect::<i32, String>::die("not recoverable")
        .catch_all(|_| Effect::<i32, Infallible>::succeed(0));
    let exit = Runtime::new().run_sync_exit(program);
    match exit {
        Exit::Failure(cause) => assert_eq!(cause.defects().len(), 1),
        Exit::Success(_) => panic!("defects must not be recovered"),
    }
}

#[test]
fn panics_become_defects() {
    let exit = Runtime::new().run_sync_exit(Effect::<i32, Infallible>::sync(|| {
        panic!("kaput")
    }));
    match exit {
        Exit::Failure(cause) => {
            assert_eq!(cause.defects()[0].message(), "kaput");
        }
        Exit::Success(_) => panic!("the thunk panicked"),
    }
}

#[test]
fn finalizer_failures_append_to_the_cause() {
    let program = Effect::<(), String>::fail("original".to_string())
        .ensuring(Effect::<(), Infallible>::die("finalizer blew up"));
    let failure = Runtime::new().run_sync(program).unwrap_err();
    let cause = failure.cause();
    assert_eq!(cause.failures(), [&"original".to_string()]);
    assert_eq!(cause.defects().len(), 1);
}

#[test]
fn exit_materializes_the_cause() {
    let program = Effect::<i32, String>::fail_cause(Cause::fail("boom".to_string())).exit();
    let exit = Runtime::new().run_sync(program).unwrap();
    assert_eq!(exit, Exit::fail("boom".to_string()));
}

#[test]
fn async_registration_may_resume_synchronously() {
    let program = Effect::<i32, Infallible>::async_(|callback| {
        callback.succeed(9);
        None
    });
    assert_eq!(Runtime::new().run_sync(program).unwrap(), 9);
}

#[test]
fn deferred_wakes_every_waiter() {
    let deferred: Deferred<i32, Infallible> = Deferred::new();
    let first = deferred.await_();
    let second = deferred.await_();
    let complete = deferred.succeed(5);
    let program = first.fork().flat_map(move |one| {
        second.fork().flat_map(move |two| {
            complete.flat_map(move |won| {
                assert!(won);
                one.join().zip(two.join())
            })
        })
    });
    assert_eq!(Runtime::new().run_sync(program).unwrap(), (5, 5));
}

#[test]
fn deferred_completion_is_single_shot() {
    let deferred: Deferred<i32, Infallible> = Deferred::new();
    let win = deferred.succeed(1);
    let lose = deferred.succeed(2);
    let waiter = deferred.await_();
    let program = win.flat_map(move |first| {
        lose.flat_map(move |second| waiter.map(move |value| (first, second, value)))
    });
    assert_eq!(Runtime::new().run_sync(program).unwrap(), (true, false, 1));
}

#[test]
fn deferred_fail_cause_carries_the_full_cause() {
    let deferred: Deferred<i32, String> = Deferred::new();
    let awaiting = deferred.await_().exit();
    let program = deferred
        .fail_cause(Cause::fail("boom".to_string()))
        .flat_map(move |won| awaiting.map(move |exit| (won, exit)));
    let (won, exit) = Runtime::new().run_sync(program).unwrap();
    assert!(won);
    assert_eq!(exit, Exit::fail("boom".to_string()));
}

#[test]
fn long_synchronous_chains_survive_the_op_budget() {
    let mut program = Effect::<u32, Infallible>::succeed(0);
    for _ in 0..5000 {
        program = program.map(|n| n + 1);
    }
    assert_eq!(Runtime::new().run_sync(program).unwrap(), 5000);
}

#[test]
fn chains_run_to_completion_without_cooperative_yielding() {
    let mut program = Effect::<u32, Infallible>::succeed(0);
    for _ in 0..5000 {
        program = program.map(|n| n + 1);
    }
    let runtime = Runtime::new()
        .flags(RuntimeFlags::default().disable(RuntimeFlags::COOPERATIVE_YIELDING));
    assert_eq!(runtime.run_sync(program).unwrap(), 5000);
}

#[test]
fn unresolvable_suspensions_die_synchronously() {
    let exit = Runtime::new().run_sync_exit(Effect::<(), Infallible>::never());
    match exit {
        Exit::Failure(cause) => assert!(cause.defects()[0]
            .message()
            .contains("cannot resolve synchronously")),
        Exit::Success(_) => panic!("the fiber cannot complete"),
    }
}

#[test]
fn a_test_scheduler_steps_only_when_told() {
    let scheduler = Rc::new(TestScheduler::new());
    let runtime = Runtime::with_scheduler(scheduler.clone());
    let fiber = runtime.fork(Effect::<i32, Infallible>::succeed(3));
    assert!(fiber.poll().is_none());
    scheduler.flush();
    assert_eq!(fiber.poll(), Some(Exit::succeed(3)));
}

#[test]
fn tap_observes_without_consuming() {
    let seen = Rc::new(RefCell::new(0));
    let observer = Rc::clone(&seen);
    let program = Effect::<i32, Infallible>::succeed(8).tap(move |n| *observer.borrow_mut() = *n);
    assert_eq!(Runtime::new().run_sync(program).unwrap(), 8);
    assert_eq!(*seen.borrow(), 8);
}
