use {
    crate::FiberId,
    std::{
        any::Any,
        fmt::{Debug, Display, Formatter},
    },
};

/// A defect: a programming error or invariant violation, as opposed to a typed
/// domain failure. Carries the rendered message only, since defects originate
/// either from panics or from explicit `die` calls.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Defect(String);

impl Defect {
    pub fn new(message: impl Into<String>) -> Self {
        Defect(message.into())
    }

    /// Harvests a panic payload. Panics raised with `panic!("…")` carry either
    /// a `&'static str` or a `String`; anything else is opaque.
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        if let Some(panic) = payload.downcast_ref::<&'static str>() {
            Defect::new(*panic)
        } else if let Some(panic) = payload.downcast_ref::<String>() {
            Defect::new(panic.clone())
        } else {
            Defect::new("UNKNOWN")
        }
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl Display for Defect {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An immutable tree describing why a computation ended abnormally.
///
/// `Sequential` composes causes from effects that failed one after another
/// (e.g. a failure followed by a failing finalizer), while `Parallel` composes
/// causes from concurrent failures (e.g. two racing fibers that both failed),
/// so that no failure is ever silently dropped.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Cause<E> {
    Empty,
    Fail(E),
    Die(Defect),
    Interrupt(FiberId),
    Sequential(Box<Cause<E>>, Box<Cause<E>>),
    Parallel(Box<Cause<E>>, Box<Cause<E>>),
}

impl<E> Cause<E> {
    pub fn empty() -> Self {
        Cause::Empty
    }

    pub fn fail(error: E) -> Self {
        Cause::Fail(error)
    }

    pub fn die(message: impl Into<String>) -> Self {
        Cause::Die(Defect::new(message))
    }

    pub fn die_defect(defect: Defect) -> Self {
        Cause::Die(defect)
    }

    pub fn interrupt(id: FiberId) -> Self {
        Cause::Interrupt(id)
    }

    /// Sequential composition. `Empty` operands are dropped.
    #[must_use]
    pub fn then(self, that: Cause<E>) -> Cause<E> {
        match (self, that) {
            (Cause::Empty, that) => that,
            (this, Cause::Empty) => this,
            (this, that) => Cause::Sequential(Box::new(this), Box::new(that)),
        }
    }

    /// Parallel composition. `Empty` operands are dropped.
    #[must_use]
    pub fn both(self, that: Cause<E>) -> Cause<E> {
        match (self, that) {
            (Cause::Empty, that) => that,
            (this, Cause::Empty) => this,
            (this, that) => Cause::Parallel(Box::new(this), Box::new(that)),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Cause::Empty => true,
            Cause::Fail(_) | Cause::Die(_) | Cause::Interrupt(_) => false,
            Cause::Sequential(l, r) | Cause::Parallel(l, r) => l.is_empty() && r.is_empty(),
        }
    }

    /// Whether the tree contains any `Interrupt` node.
    pub fn is_interrupted(&self) -> bool {
        match self {
            Cause::Interrupt(_) => true,
            Cause::Empty | Cause::Fail(_) | Cause::Die(_) => false,
            Cause::Sequential(l, r) | Cause::Parallel(l, r) => {
                l.is_interrupted() || r.is_interrupted()
            }
        }
    }

    /// Whether no `Fail` or `Die` node exists anywhere in the tree. This is
    /// the query used to tell a pure cancellation apart from a real error.
    pub fn is_interrupted_only(&self) -> bool {
        match self {
            Cause::Empty | Cause::Interrupt(_) => true,
            Cause::Fail(_) | Cause::Die(_) => false,
            Cause::Sequential(l, r) | Cause::Parallel(l, r) => {
                l.is_interrupted_only() && r.is_interrupted_only()
            }
        }
    }

    /// All typed failures, in left-to-right order.
    pub fn failures(&self) -> Vec<&E> {
        let mut out = Vec::new();
        self.visit(&mut |cause| {
            if let Cause::Fail(e) = cause {
                out.push(e);
            }
        });
        out
    }

    /// All defects, in left-to-right order.
    pub fn defects(&self) -> Vec<&Defect> {
        let mut out = Vec::new();
        self.visit(&mut |cause| {
            if let Cause::Die(d) = cause {
                out.push(d);
            }
        });
        out
    }

    pub fn first_failure(&self) -> Option<&E> {
        self.failures().into_iter().next()
    }

    /// The combined identity of every interrupting fiber in the tree.
    pub fn interruptors(&self) -> FiberId {
        let mut combined = FiberId::None;
        self.visit(&mut |cause| {
            if let Cause::Interrupt(id) = cause {
                combined = std::mem::take(&mut combined).combine(id.clone());
            }
        });
        combined
    }

    fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Cause<E>)) {
        match self {
            Cause::Sequential(l, r) | Cause::Parallel(l, r) => {
                l.visit(f);
                r.visit(f);
            }
            leaf => f(leaf),
        }
    }

    #[must_use]
    pub fn map<E2>(self, f: impl Fn(E) -> E2 + Copy) -> Cause<E2> {
        self.flat_map(|e| Cause::Fail(f(e)))
    }

    /// Replaces every `Fail` node with the cause returned by `f`.
    #[must_use]
    pub fn flat_map<E2>(self, f: impl Fn(E) -> Cause<E2> + Copy) -> Cause<E2> {
        match self {
            Cause::Empty => Cause::Empty,
            Cause::Fail(e) => f(e),
            Cause::Die(d) => Cause::Die(d),
            Cause::Interrupt(id) => Cause::Interrupt(id),
            Cause::Sequential(l, r) => {
                Cause::Sequential(Box::new(l.flat_map(f)), Box::new(r.flat_map(f)))
            }
            Cause::Parallel(l, r) => {
                Cause::Parallel(Box::new(l.flat_map(f)), Box::new(r.flat_map(f)))
            }
        }
    }
}

impl<E: Debug> Cause<E> {
    /// Renders the tree with one node per line. The first line is the first
    /// failure or defect, so top-level messages stay readable even though the
    /// underlying model is a tree.
    pub fn pretty(&self) -> String {
        let mut lines = Vec::new();
        if let Some(e) = self.first_failure() {
            lines.push(format!("Error: {e:?}"));
        } else if let Some(d) = self.defects().first() {
            lines.push(format!("Defect: {d}"));
        } else if self.is_interrupted() {
            lines.push(format!("Interrupted by {}", self.interruptors()));
        } else {
            lines.push("Empty cause".to_string());
        }
        self.pretty_into(&mut lines, 1);
        lines.join("\n")
    }

    fn pretty_into(&self, lines: &mut Vec<String>, depth: usize) {
        let pad = "  ".repeat(depth);
        match self {
            Cause::Empty => (),
            Cause::Fail(e) => lines.push(format!("{pad}Fail: {e:?}")),
            Cause::Die(d) => lines.push(format!("{pad}Die: {d}")),
            Cause::Interrupt(id) => lines.push(format!("{pad}Interrupt: {id}")),
            Cause::Sequential(l, r) => {
                lines.push(format!("{pad}Sequential"));
                l.pretty_into(lines, depth + 1);
                r.pretty_into(lines, depth + 1);
            }
            Cause::Parallel(l, r) => {
                lines.push(format!("{pad}Parallel"));
                l.pretty_into(lines, depth + 1);
                r.pretty_into(lines, depth + 1);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn interrupted_only_holds_without_fail_or_die() {
        let cause: Cause<String> = Cause::interrupt(FiberId::runtime(1, 0))
            .then(Cause::interrupt(FiberId::runtime(2, 0)));
        assert!(cause.is_interrupted_only());
        assert!(cause.is_interrupted());

        let mixed = cause.both(Cause::fail("boom".to_string()));
        assert!(!mixed.is_interrupted_only());
        assert!(mixed.is_interrupted());
    }

    #[test]
    fn empty_operands_are_dropped() {
        let cause: Cause<&str> = Cause::empty().then(Cause::fail("a"));
        assert_eq!(cause, Cause::Fail("a"));
        let cause: Cause<&str> = Cause::fail("a").both(Cause::empty());
        assert_eq!(cause, Cause::Fail("a"));
    }

    #[test]
    fn interruptors_combine_across_the_tree() {
        let a = FiberId::runtime(1, 0);
        let b = FiberId::runtime(2, 0);
        let cause: Cause<&str> =
            Cause::interrupt(a.clone()).both(Cause::interrupt(b.clone()).then(Cause::Empty));
        assert_eq!(cause.interruptors(), a.combine(b));
    }

    #[test]
    fn failures_are_collected_left_to_right() {
        let cause = Cause::fail(1).then(Cause::fail(2).both(Cause::fail(3)));
        assert_eq!(cause.failures(), vec![&1, &2, &3]);
        assert_eq!(cause.first_failure(), Some(&1));
    }

    #[test]
    fn pretty_leads_with_the_first_error() {
        let cause = Cause::fail("boom").then(Cause::<&str>::die("bug"));
        assert!(cause.pretty().starts_with("Error: \"boom\""));
    }

    #[test]
    fn defect_from_panic_downcasts_str_and_string() {
        let payload: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(Defect::from_panic(payload.as_ref()).message(), "static str");
        let payload: Box<dyn Any + Send> = Box::new("owned".to_string());
        assert_eq!(Defect::from_panic(payload.as_ref()).message(), "owned");
        let payload: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(Defect::from_panic(payload.as_ref()).message(), "UNKNOWN");
    }
}
