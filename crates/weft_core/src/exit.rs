use crate::{Cause, FiberId};

/// The terminal outcome of a fiber. Once published it is immutable.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Exit<A, E> {
    Success(A),
    Failure(Cause<E>),
}

impl<A, E> Exit<A, E> {
    pub fn succeed(value: A) -> Self {
        Exit::Success(value)
    }

    pub fn fail(error: E) -> Self {
        Exit::Failure(Cause::fail(error))
    }

    pub fn die(message: impl Into<String>) -> Self {
        Exit::Failure(Cause::die(message))
    }

    pub fn interrupt(id: FiberId) -> Self {
        Exit::Failure(Cause::interrupt(id))
    }

    pub fn failure(cause: Cause<E>) -> Self {
        Exit::Failure(cause)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Exit::Success(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Exit::Failure(_))
    }

    /// Whether the exit was caused, at least in part, by interruption.
    pub fn is_interrupted(&self) -> bool {
        match self {
            Exit::Success(_) => false,
            Exit::Failure(cause) => cause.is_interrupted(),
        }
    }

    pub fn cause(&self) -> Option<&Cause<E>> {
        match self {
            Exit::Success(_) => None,
            Exit::Failure(cause) => Some(cause),
        }
    }

    pub fn success(&self) -> Option<&A> {
        match self {
            Exit::Success(value) => Some(value),
            Exit::Failure(_) => None,
        }
    }

    #[must_use]
    pub fn map<B>(self, f: impl FnOnce(A) -> B) -> Exit<B, E> {
        match self {
            Exit::Success(value) => Exit::Success(f(value)),
            Exit::Failure(cause) => Exit::Failure(cause),
        }
    }

    #[must_use]
    pub fn map_error<E2>(self, f: impl Fn(E) -> E2 + Copy) -> Exit<A, E2> {
        match self {
            Exit::Success(value) => Exit::Success(value),
            Exit::Failure(cause) => Exit::Failure(cause.map(f)),
        }
    }

    /// Discards the success value, keeping the cause intact.
    #[must_use]
    pub fn as_unit(&self) -> Exit<(), E>
    where
        E: Clone,
    {
        match self {
            Exit::Success(_) => Exit::Success(()),
            Exit::Failure(cause) => Exit::Failure(cause.clone()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn interruption_is_visible_through_the_exit() {
        let exit: Exit<(), &str> = Exit::interrupt(FiberId::runtime(1, 0));
        assert!(exit.is_failure());
        assert!(exit.is_interrupted());
        let exit: Exit<(), &str> = Exit::fail("boom");
        assert!(!exit.is_interrupted());
    }

    #[test]
    fn map_preserves_failures() {
        let exit: Exit<u32, &str> = Exit::fail("boom");
        assert_eq!(exit.map(|n| n + 1), Exit::fail("boom"));
        let exit: Exit<u32, &str> = Exit::succeed(1);
        assert_eq!(exit.map(|n| n + 1), Exit::succeed(2));
    }
}
