use {
    std::{cell::RefCell, convert::Infallible, rc::Rc, time::Duration},
    weft::{add_finalizer, sleep, yield_now, Effect, FiberId, FiberRef, FiberRefOps, Runtime},
};

type Log = Rc<RefCell<Vec<String>>>;

fn log_effect(log: &Log, line: &'static str) -> Effect<(), Infallible> {
    let log = log.clone();
    Effect::sync(move || log.borrow_mut().push(line.to_string()))
}

#[test]
fn interruption_runs_finalizers() {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let program = Effect::<(), Infallible>::never()
        .ensuring(log_effect(&log, "released"))
        .fork()
        .flat_map(|fiber| fiber.interrupt());
    let exit = Runtime::new().run_sync(program).unwrap();
    assert!(exit.is_interrupted());
    assert_eq!(log.borrow().as_slice(), ["released"]);
}

#[test]
fn uninterruptible_regions_finish_before_unwinding() {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let work = sleep(Duration::from_secs(1))
        .flat_map({
            let log = log.clone();
            move |_| log_effect(&log, "finished")
        })
        .uninterruptible();
    let program = work.fork().flat_map(|fiber| fiber.interrupt());
    let exit = Runtime::new().run_sync(program).unwrap();
    assert!(exit.is_interrupted());
    assert_eq!(log.borrow().as_slice(), ["finished"]);
}

#[test]
fn repeated_interrupters_combine_into_one_cause() {
    let first = FiberId::runtime(101, 0);
    let second = FiberId::runtime(202, 0);
    let expected = first.clone().combine(second.clone());
    let program = Effect::<(), Infallible>::never()
        .fork()
        .flat_map(move |fiber| {
            let and_again = fiber.clone();
            let target = fiber.clone();
            fiber
                .interrupt_as(first)
                .fork()
                .flat_map(move |_| and_again.interrupt_as(second).fork())
                .flat_map(move |_| target.await_exit())
        });
    let exit = Runtime::new().run_sync(program).unwrap();
    match exit {
        weft::Exit::Failure(cause) => {
            assert!(cause.is_interrupted_only());
            assert_eq!(cause.interruptors(), expected);
        }
        weft::Exit::Success(_) => panic!("the fiber can only end by interruption"),
    }
}

#[test]
fn completed_fibers_keep_their_exit() {
    let program = Effect::<i32, Infallible>::succeed(7)
        .fork()
        .flat_map(|fiber| fiber.interrupt());
    let exit = Runtime::new().run_sync(program).unwrap();
    assert_eq!(exit, weft::Exit::succeed(7));
}

#[test]
fn interrupting_a_scoped_fiber_releases_its_resources() {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let scoped = add_finalizer({
        let log = log.clone();
        move |_| log_effect(&log, "Releasing Module 1")
    })
    .flat_map(|_| Effect::<(), Infallible>::never())
    .scoped();
    let program = scoped.fork().flat_map(|fiber| fiber.interrupt());
    let exit = Runtime::new().run_sync(program).unwrap();
    assert!(exit.is_interrupted());
    assert_eq!(log.borrow().as_slice(), ["Releasing Module 1"]);
}

#[test]
fn race_keeps_the_winner_and_interrupts_the_loser() {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let winner = sleep(Duration::from_millis(10)).map(|_| "winner");
    let loser = Effect::<&'static str, Infallible>::never()
        .ensuring(log_effect(&log, "loser released"));
    let value = Runtime::new().run_sync(winner.race(loser)).unwrap();
    assert_eq!(value, "winner");
    assert_eq!(log.borrow().as_slice(), ["loser released"]);
}

#[test]
fn race_joins_only_the_winner_refs() {
    let latest = FiberRef::new_with(
        "initial".to_string(),
        |value: &String| value.clone(),
        |_parent: &String, child: &String| child.clone(),
    );
    let fast = {
        let latest = latest.clone();
        latest.set("fast".to_string())
    };
    let slow = {
        let latest = latest.clone();
        sleep(Duration::from_secs(5)).flat_map(move |_| latest.set("slow".to_string()))
    };
    let reader = latest.clone();
    let program = fast.race(slow).flat_map(move |_| reader.get());
    assert_eq!(Runtime::new().run_sync(program).unwrap(), "fast");
}

#[test]
fn both_race_failures_combine_in_parallel() {
    let left = Effect::<(), String>::fail("left broke".to_string());
    let right = sleep(Duration::from_millis(1))
        .widen_error::<String>()
        .flat_map(|_| Effect::<(), String>::fail("right broke".to_string()));
    let failure = Runtime::new().run_sync(left.race(right)).unwrap_err();
    let failures = failure.cause().failures();
    assert_eq!(
        failures,
        [&"left broke".to_string(), &"right broke".to_string()]
    );
}

#[test]
fn a_race_with_no_winner_leaves_refs_alone() {
    let tag = FiberRef::new_with(
        "start".to_string(),
        |parent: &String| parent.clone(),
        |_parent: &String, child: &String| child.clone(),
    );
    let left_view = tag.clone();
    let right_view = tag.clone();
    let reader = tag.clone();
    let left = left_view
        .set("left".to_string())
        .widen_error::<String>()
        .flat_map(|_| Effect::<(), String>::fail("left down".to_string()));
    let right = right_view
        .set("right".to_string())
        .widen_error::<String>()
        .flat_map(|_| Effect::<(), String>::fail("right down".to_string()));
    let program = left.race(right).exit().flat_map(move |exit| {
        assert!(exit.is_failure());
        reader.get()
    });
    assert_eq!(Runtime::new().run_sync(program).unwrap(), "start");
}

#[test]
fn zip_par_interrupts_the_sibling_on_failure() {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let ok = Effect::<i32, String>::never().ensuring(log_effect(&log, "sibling released"));
    let bad = sleep(Duration::from_millis(5))
        .widen_error::<String>()
        .flat_map(|_| Effect::<i32, String>::fail("broke".to_string()));
    let failure = Runtime::new().run_sync(ok.zip_par(bad)).unwrap_err();
    assert_eq!(failure.cause().failures(), [&"broke".to_string()]);
    assert_eq!(log.borrow().as_slice(), ["sibling released"]);
}

#[test]
fn zip_par_joins_both_sides() {
    let program = Effect::<i32, Infallible>::succeed(2)
        .zip_par(sleep(Duration::from_millis(3)).map(|_| 40));
    let (left, right) = Runtime::new().run_sync(program).unwrap();
    assert_eq!(left + right, 42);
}

#[test]
fn timeout_interrupts_and_returns_none() {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let slow = sleep(Duration::from_secs(60))
        .map(|_| 42)
        .ensuring(log_effect(&log, "cleaned up"));
    let outcome = Runtime::new()
        .run_sync(slow.timeout(Duration::from_secs(1)))
        .unwrap();
    assert_eq!(outcome, None);
    assert_eq!(log.borrow().as_slice(), ["cleaned up"]);
}

#[test]
fn timeout_passes_fast_results_through() {
    let outcome = Runtime::new()
        .run_sync(Effect::<i32, Infallible>::succeed(5).timeout(Duration::from_secs(1)))
        .unwrap();
    assert_eq!(outcome, Some(5));
}

#[test]
fn yielding_interleaves_ready_fibers() {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let child = log_effect(&log, "child before yield")
        .flat_map({
            let log = log.clone();
            move |_| yield_now().flat_map(move |_| log_effect(&log, "child after yield"))
        });
    let program = child.fork().flat_map({
        let log = log.clone();
        move |fiber| log_effect(&log, "parent").flat_map(move |_| fiber.join())
    });
    Runtime::new().run_sync(program).unwrap();
    assert_eq!(
        log.borrow().as_slice(),
        ["child before yield", "parent", "child after yield"]
    );
}
