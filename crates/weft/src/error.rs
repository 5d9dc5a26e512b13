use {
    colorful::Colorful,
    std::{
        any::Any,
        fmt::{Debug, Display, Formatter},
        rc::Rc,
    },
    weft_core::Cause,
};

/// An opaque typed-failure payload carried through the erased interpreter.
/// The rendered form is captured at construction so causes stay printable
/// after the concrete error type is erased.
#[derive(Clone)]
pub struct ErrorValue {
    value: Rc<dyn Any>,
    rendered: Rc<str>,
}

impl ErrorValue {
    pub(crate) fn new<E: Debug + 'static>(error: E) -> Self {
        let rendered = format!("{error:?}");
        ErrorValue {
            value: Rc::new(error),
            rendered: rendered.into(),
        }
    }

    pub fn downcast<E: Clone + 'static>(&self) -> Option<E> {
        self.value.downcast_ref::<E>().cloned()
    }

    pub fn rendered(&self) -> &str {
        &self.rendered
    }
}

impl Debug for ErrorValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.rendered)
    }
}

/// The user-visible failure surface of the synchronous entry points: wraps the
/// full [`Cause`] tree while keeping the message readable, derived from the
/// first pretty-printed error in the tree.
pub struct FiberFailure<E> {
    cause: Cause<E>,
}

impl<E> FiberFailure<E> {
    pub(crate) fn new(cause: Cause<E>) -> Self {
        FiberFailure { cause }
    }

    pub fn cause(&self) -> &Cause<E> {
        &self.cause
    }

    pub fn into_cause(self) -> Cause<E> {
        self.cause
    }
}

impl<E: Debug> Display for FiberFailure<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let pretty = self.cause.pretty();
        f.write_str(pretty.lines().next().unwrap_or("Empty cause"))
    }
}

impl<E: Debug> Debug for FiberFailure<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "FiberFailure({})", self.cause.pretty())
    }
}

impl<E: Debug> std::error::Error for FiberFailure<E> {}

/// Prints a colored cause dump when `WEFT_DEBUG` is set, for diagnosing
/// failing runs without attaching a subscriber.
pub(crate) fn maybe_debug_dump<E: Debug>(cause: &Cause<E>) {
    if std::env::var("WEFT_DEBUG").is_err() {
        return;
    }
    println!("Cause of fiber failure:");
    for line in cause.pretty().lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("Die") || trimmed.starts_with("Defect") {
            println!("{}", line.to_string().color(colorful::Color::Red));
        } else if trimmed.starts_with("Interrupt") {
            println!("{}", line.to_string().color(colorful::Color::Yellow));
        } else {
            println!("{line}");
        }
    }
}
