use {
    std::{cell::RefCell, convert::Infallible, rc::Rc},
    weft::{Effect, FiberHandle, Runtime},
};

type Log = Rc<RefCell<Vec<String>>>;

fn log_effect(log: &Log, line: &'static str) -> Effect<(), Infallible> {
    let log = log.clone();
    Effect::sync(move || log.borrow_mut().push(line.to_string()))
}

#[test]
fn a_new_occupant_interrupts_the_previous_one() {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let first_log = log.clone();
    let second_log = log.clone();
    let program = FiberHandle::<(), Infallible>::new().flat_map(move |handle| {
        let again = handle.clone();
        handle
            .run(Effect::<(), Infallible>::never().ensuring(log_effect(&first_log, "first released")))
            .flat_map(move |_| {
                again.run(
                    Effect::<(), Infallible>::never()
                        .ensuring(log_effect(&second_log, "second released")),
                )
            })
            .as_unit()
    });
    Runtime::new().run_sync(program).unwrap();
    assert_eq!(
        log.borrow().as_slice(),
        ["first released", "second released"]
    );
}

#[test]
fn interrupting_the_occupant_keeps_it_in_the_slot() {
    let program = FiberHandle::<(), Infallible>::new().flat_map(|handle| {
        let observer = handle.clone();
        handle
            .run(Effect::<(), Infallible>::never())
            .flat_map(move |_| {
                let slot = observer.clone();
                observer
                    .interrupt()
                    .map(move |_| slot.current().and_then(|fiber| fiber.poll()))
            })
    });
    let exit = Runtime::new().run_sync(program).unwrap().unwrap();
    assert!(exit.is_interrupted());
}

#[test]
fn clearing_empties_the_slot() {
    let program = FiberHandle::<(), Infallible>::new().flat_map(|handle| {
        let after = handle.clone();
        handle
            .run(Effect::<(), Infallible>::never())
            .flat_map(move |_| {
                let slot = after.clone();
                after.clear().map(move |_| slot.current().is_none())
            })
    });
    assert!(Runtime::new().run_sync(program).unwrap());
}

#[test]
fn joining_an_empty_handle_is_a_defect() {
    let program = FiberHandle::<i32, Infallible>::new().flat_map(|handle| handle.join());
    let failure = Runtime::new().run_sync(program).unwrap_err();
    assert!(failure
        .cause()
        .defects()
        .iter()
        .any(|defect| defect.message().contains("no fiber has been started")));
}
