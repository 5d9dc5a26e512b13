use std::fmt::{Debug, Formatter};

/// An immutable bitset controlling runtime behavior. Flag changes produce new
/// values; the interpreter snapshots the previous value so masked regions can
/// restore exactly what the caller had.
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RuntimeFlags(u32);

impl RuntimeFlags {
    /// Whether the fiber may be unwound by interrupt signals.
    pub const INTERRUPTION: RuntimeFlags = RuntimeFlags(1 << 0);
    /// Whether long synchronous chains periodically yield to the scheduler.
    pub const COOPERATIVE_YIELDING: RuntimeFlags = RuntimeFlags(1 << 1);
    /// Whether the runtime reports fiber lifecycle counts.
    pub const RUNTIME_METRICS: RuntimeFlags = RuntimeFlags(1 << 2);

    pub fn none() -> Self {
        RuntimeFlags(0)
    }

    pub fn enabled(self, flag: RuntimeFlags) -> bool {
        self.0 & flag.0 == flag.0
    }

    #[must_use]
    pub fn enable(self, flag: RuntimeFlags) -> Self {
        RuntimeFlags(self.0 | flag.0)
    }

    #[must_use]
    pub fn disable(self, flag: RuntimeFlags) -> Self {
        RuntimeFlags(self.0 & !flag.0)
    }

    pub fn interruptible(self) -> bool {
        self.enabled(RuntimeFlags::INTERRUPTION)
    }

    pub fn cooperative_yielding(self) -> bool {
        self.enabled(RuntimeFlags::COOPERATIVE_YIELDING)
    }
}

impl Default for RuntimeFlags {
    fn default() -> Self {
        RuntimeFlags::none()
            .enable(RuntimeFlags::INTERRUPTION)
            .enable(RuntimeFlags::COOPERATIVE_YIELDING)
    }
}

impl Debug for RuntimeFlags {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut set = f.debug_set();
        if self.enabled(RuntimeFlags::INTERRUPTION) {
            set.entry(&"Interruption");
        }
        if self.enabled(RuntimeFlags::COOPERATIVE_YIELDING) {
            set.entry(&"CooperativeYielding");
        }
        if self.enabled(RuntimeFlags::RUNTIME_METRICS) {
            set.entry(&"RuntimeMetrics");
        }
        set.finish()
    }
}

/// A reversible change to [`RuntimeFlags`]: which flags to enable and which to
/// disable when entering a region.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FlagsPatch {
    to_enable: u32,
    to_disable: u32,
}

impl FlagsPatch {
    pub fn enable(flag: RuntimeFlags) -> Self {
        FlagsPatch {
            to_enable: flag.0,
            to_disable: 0,
        }
    }

    pub fn disable(flag: RuntimeFlags) -> Self {
        FlagsPatch {
            to_enable: 0,
            to_disable: flag.0,
        }
    }

    /// The patch that turns `old` into `new`.
    pub fn diff(old: RuntimeFlags, new: RuntimeFlags) -> Self {
        FlagsPatch {
            to_enable: new.0 & !old.0,
            to_disable: old.0 & !new.0,
        }
    }

    /// The patch that undoes this one.
    #[must_use]
    pub fn inverse(self) -> Self {
        FlagsPatch {
            to_enable: self.to_disable,
            to_disable: self.to_enable,
        }
    }

    #[must_use]
    pub fn apply(self, flags: RuntimeFlags) -> RuntimeFlags {
        RuntimeFlags((flags.0 | self.to_enable) & !self.to_disable)
    }
}
