//! Builds a small service graph, races two queries against each other under a
//! timeout, and shows that the database layer is released exactly once no
//! matter which query wins.
//!
//! Run with `RUST_LOG=trace cargo run --example supervisor` to watch the
//! interpreter's op trace.

use {
    std::time::Duration,
    weft::{add_finalizer, service, sleep, Context, Effect, Layer, Runtime},
};

#[derive(Clone)]
struct Database {
    url: &'static str,
}

#[derive(Clone)]
struct QueryApi {
    db_url: &'static str,
}

fn main() {
    tracing_subscriber::fmt::init();

    let database = Layer::from_effect(|| {
        Effect::sync(|| println!("acquiring database"))
            .flat_map(|_| {
                add_finalizer(|_| Effect::sync(|| println!("releasing database")))
            })
            .map(|_| Context::with(Database { url: "db://local" }))
    });
    let api = Layer::service(|| {
        service::<Database>().map(|database| QueryApi { db_url: database.url })
    });

    let fast = sleep(Duration::from_millis(10)).flat_map(|_| {
        service::<QueryApi>().map(|api| format!("fast replica answered via {}", api.db_url))
    });
    let slow = sleep(Duration::from_secs(2)).flat_map(|_| {
        service::<QueryApi>().map(|api| format!("slow replica answered via {}", api.db_url))
    });

    let program = fast
        .race(slow)
        .timeout(Duration::from_secs(1))
        .provide_layer(database.to(api));

    match Runtime::new().run_sync(program).unwrap() {
        Some(answer) => println!("{answer}"),
        None => println!("both replicas timed out"),
    }
}
