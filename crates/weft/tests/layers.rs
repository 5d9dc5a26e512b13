use {
    std::{cell::RefCell, rc::Rc},
    weft::{add_finalizer, service, Context, Effect, Exit, Layer, Runtime},
};

type Log = Rc<RefCell<Vec<String>>>;

#[derive(Clone)]
struct ModuleOne;
#[derive(Clone)]
struct ModuleTwo;
#[derive(Clone)]
struct ModuleThree;

/// A layer that logs its acquisition, registers a logging release finalizer,
/// and provides `service`.
fn module<S: Clone + 'static>(log: &Log, name: &'static str, service: S) -> Layer {
    let log = log.clone();
    Layer::from_effect(move || {
        let service = service.clone();
        let acquire_log = log.clone();
        let release_log = log.clone();
        Effect::sync(move || {
            acquire_log
                .borrow_mut()
                .push(format!("Acquiring {name}"))
        })
        .flat_map(move |_| {
            add_finalizer(move |_| {
                Effect::sync(move || {
                    release_log
                        .borrow_mut()
                        .push(format!("Releasing {name}"))
                })
            })
            .map(move |_| Context::with(service))
        })
    })
}

#[test]
fn releases_in_reverse_acquisition_order() {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let layer = module(&log, "Module 1", ModuleOne).and(module(&log, "Module 2", ModuleTwo));
    Runtime::new()
        .run_sync(Effect::succeed(()).provide_layer(layer))
        .unwrap();
    assert_eq!(
        log.borrow().as_slice(),
        [
            "Acquiring Module 1",
            "Acquiring Module 2",
            "Releasing Module 2",
            "Releasing Module 1",
        ]
    );
}

#[test]
fn a_layer_composed_with_itself_is_acquired_once() {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let layer = module(&log, "Module 1", ModuleOne);
    Runtime::new()
        .run_sync(Effect::succeed(()).provide_layer(layer.clone().and(layer)))
        .unwrap();
    assert_eq!(
        log.borrow().as_slice(),
        ["Acquiring Module 1", "Releasing Module 1"]
    );
}

#[test]
fn nested_vertical_composition_releases_bottom_up() {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let layer = module(&log, "1", ModuleOne)
        .to(module(&log, "2", ModuleTwo))
        .to(module(&log, "3", ModuleThree));
    Runtime::new()
        .run_sync(Effect::succeed(()).provide_layer(layer))
        .unwrap();
    assert_eq!(
        log.borrow().as_slice(),
        [
            "Acquiring 1",
            "Acquiring 2",
            "Acquiring 3",
            "Releasing 3",
            "Releasing 2",
            "Releasing 1",
        ]
    );
}

#[test]
fn interrupting_a_layered_fiber_still_releases() {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let layer = module(&log, "Module 1", ModuleOne).to(module(&log, "Module 2", ModuleTwo));
    let program = Effect::<(), std::convert::Infallible>::never()
        .provide_layer(layer)
        .fork()
        .flat_map(|fiber| fiber.interrupt());
    let exit = Runtime::new().run_sync(program).unwrap();
    assert!(exit.is_interrupted());
    assert_eq!(
        log.borrow().as_slice(),
        [
            "Acquiring Module 1",
            "Acquiring Module 2",
            "Releasing Module 2",
            "Releasing Module 1",
        ]
    );
}

#[test]
fn a_shared_layer_is_acquired_once() {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let base = module(&log, "Base", ModuleOne);
    let left = base.clone().to(module(&log, "Left", ModuleTwo));
    let right = base.to(module(&log, "Right", ModuleThree));
    Runtime::new()
        .run_sync(Effect::succeed(()).provide_layer(left.and(right)))
        .unwrap();
    assert_eq!(
        log.borrow().as_slice(),
        [
            "Acquiring Base",
            "Acquiring Left",
            "Acquiring Right",
            "Releasing Right",
            "Releasing Left",
            "Releasing Base",
        ]
    );
}

#[test]
fn a_memoized_layer_outlives_individual_builds() {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let program = {
        let base = module(&log, "Shared", ModuleOne);
        base.memoize().flat_map(move |memoized| {
            let again = memoized.clone();
            Effect::succeed(())
                .provide_layer(memoized)
                .flat_map(move |_| Effect::succeed(()).provide_layer(again))
        })
    };
    Runtime::new().run_sync(program.scoped()).unwrap();
    assert_eq!(
        log.borrow().as_slice(),
        ["Acquiring Shared", "Releasing Shared"]
    );
}

#[test]
fn vertical_composition_feeds_output_into_the_environment() {
    #[derive(Clone)]
    struct Config {
        url: &'static str,
    }
    #[derive(Clone)]
    struct Client {
        url: &'static str,
    }

    let config = Layer::succeed(Config { url: "db://prod" });
    let client = Layer::service(|| {
        service::<Config>().map(|config| Client { url: config.url })
    });
    let url = Runtime::new()
        .run_sync(
            service::<Client>()
                .map(|client| client.url)
                .provide_layer(config.to(client)),
        )
        .unwrap();
    assert_eq!(url, "db://prod");
}

#[test]
fn a_missing_service_is_a_defect() {
    let exit = Runtime::new().run_sync_exit(service::<ModuleOne>().as_unit());
    match exit {
        Exit::Failure(cause) => {
            let defects = cause.defects();
            assert_eq!(defects.len(), 1);
            assert!(defects[0].message().contains("Service not found"));
        }
        Exit::Success(_) => panic!("lookup should not have succeeded"),
    }
}

#[test]
fn a_failing_layer_releases_what_was_acquired() {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let acquired: Layer<String> = {
        let log = log.clone();
        Layer::from_effect(move || {
            let acquire_log = log.clone();
            let release_log = log.clone();
            Effect::sync(move || acquire_log.borrow_mut().push("Acquiring First".into()))
                .flat_map(move |_| {
                    add_finalizer(move |_| {
                        Effect::sync(move || {
                            release_log.borrow_mut().push("Releasing First".into())
                        })
                    })
                    .widen_error::<String>()
                    .map(|_| Context::with(ModuleOne))
                })
        })
    };
    let failing: Layer<String> = {
        let log = log.clone();
        Layer::from_effect(move || {
            let log = log.clone();
            Effect::sync(move || log.borrow_mut().push("Acquiring Second".into()))
                .flat_map(|_| Effect::fail("second refused to start".to_string()))
        })
    };
    let flaky = acquired.to(failing);
    let result = Runtime::new().run_sync(Effect::succeed(()).provide_layer(flaky));
    let failure = result.unwrap_err();
    assert_eq!(
        failure.cause().failures(),
        [&"second refused to start".to_string()]
    );
    assert_eq!(
        log.borrow().as_slice(),
        ["Acquiring First", "Acquiring Second", "Releasing First"]
    );
}
