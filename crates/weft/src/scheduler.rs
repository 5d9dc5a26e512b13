use {
    std::{
        cell::{Cell, RefCell},
        collections::{BTreeMap, VecDeque},
        time::Duration,
    },
    tracing::trace,
};

pub type Task = Box<dyn FnOnce()>;

/// Decides when a queued fiber continuation runs. Time is virtual: timed
/// tasks are keyed by a deadline and the clock advances deterministically to
/// the next deadline once the ready queue drains, so sleeps and timeouts
/// resolve without wall-clock waits.
pub trait Scheduler {
    fn schedule(&self, task: Task);
    fn schedule_at(&self, wake_at: Duration, task: Task);
    fn now(&self) -> Duration;
    /// Runs queued tasks until both the ready queue and the timer queue are
    /// empty. Re-entrant calls are no-ops.
    fn flush(&self);
}

#[derive(Default)]
struct Queues {
    ready: RefCell<VecDeque<Task>>,
    timers: RefCell<BTreeMap<(Duration, u64), Task>>,
    clock: Cell<Duration>,
    next_seq: Cell<u64>,
    draining: Cell<bool>,
}

impl Queues {
    fn push(&self, task: Task) {
        self.ready.borrow_mut().push_back(task);
    }

    fn push_at(&self, wake_at: Duration, task: Task) {
        let wake_at = wake_at.max(self.clock.get());
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        self.timers.borrow_mut().insert((wake_at, seq), task);
    }

    fn drain(&self) {
        if self.draining.get() {
            return;
        }
        self.draining.set(true);
        loop {
            let task = self.ready.borrow_mut().pop_front();
            if let Some(task) = task {
                task();
                continue;
            }
            let timed = self.timers.borrow_mut().pop_first();
            match timed {
                Some(((wake_at, _), task)) => {
                    trace!(?wake_at, "Advancing virtual clock to next deadline.");
                    self.clock.set(wake_at);
                    task();
                }
                None => break,
            }
        }
        self.draining.set(false);
    }
}

/// The default scheduler: drains its queue as soon as a task arrives, so a
/// top-level `schedule` behaves like a microtask trampoline. Tasks scheduled
/// while draining are queued behind the tasks already waiting, which is what
/// interleaves cooperating fibers.
#[derive(Default)]
pub struct DefaultScheduler {
    queues: Queues,
}

impl DefaultScheduler {
    pub fn new() -> Self {
        DefaultScheduler::default()
    }
}

impl Scheduler for DefaultScheduler {
    fn schedule(&self, task: Task) {
        self.queues.push(task);
        self.queues.drain();
    }

    fn schedule_at(&self, wake_at: Duration, task: Task) {
        self.queues.push_at(wake_at, task);
    }

    fn now(&self) -> Duration {
        self.queues.clock.get()
    }

    fn flush(&self) {
        self.queues.drain();
    }
}

/// A scheduler that only runs tasks when explicitly flushed, for tests that
/// need to observe fibers parked between ticks.
#[derive(Default)]
pub struct TestScheduler {
    queues: Queues,
}

impl TestScheduler {
    pub fn new() -> Self {
        TestScheduler::default()
    }

    pub fn pending(&self) -> usize {
        self.queues.ready.borrow().len() + self.queues.timers.borrow().len()
    }
}

impl Scheduler for TestScheduler {
    fn schedule(&self, task: Task) {
        self.queues.push(task);
    }

    fn schedule_at(&self, wake_at: Duration, task: Task) {
        self.queues.push_at(wake_at, task);
    }

    fn now(&self) -> Duration {
        self.queues.clock.get()
    }

    fn flush(&self) {
        self.queues.drain();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn test_scheduler_defers_until_flush() {
        let scheduler = TestScheduler::new();
        let ran = Rc::new(Cell::new(false));
        let flag = Rc::clone(&ran);
        scheduler.schedule(Box::new(move || flag.set(true)));
        assert!(!ran.get());
        scheduler.flush();
        assert!(ran.get());
    }

    #[test]
    fn timers_run_in_deadline_order_and_advance_the_clock() {
        let scheduler = TestScheduler::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        let (a, b) = (Rc::clone(&order), Rc::clone(&order));
        scheduler.schedule_at(Duration::from_secs(10), Box::new(move || a.borrow_mut().push("b")));
        scheduler.schedule_at(Duration::from_secs(5), Box::new(move || b.borrow_mut().push("a")));
        scheduler.flush();
        assert_eq!(*order.borrow(), vec!["a", "b"]);
        assert_eq!(scheduler.now(), Duration::from_secs(10));
    }

    #[test]
    fn default_scheduler_drains_on_schedule() {
        let scheduler = DefaultScheduler::new();
        let ran = Rc::new(Cell::new(false));
        let flag = Rc::clone(&ran);
        scheduler.schedule(Box::new(move || flag.set(true)));
        assert!(ran.get());
    }
}
