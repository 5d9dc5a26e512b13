use std::{
    collections::BTreeSet,
    fmt::{Display, Formatter},
};

/// The identity of a single live fiber: a unique numeric id plus the sequence
/// number at which the fiber was started.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RuntimeFiberId {
    pub id: u64,
    pub started_at: u64,
}

/// A combinable fiber identity. Combination is used when several fibers are
/// jointly responsible for an outcome, most notably when more than one fiber
/// interrupts the same target.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum FiberId {
    None,
    Runtime(RuntimeFiberId),
    Composite(BTreeSet<RuntimeFiberId>),
}

impl FiberId {
    pub fn none() -> Self {
        FiberId::None
    }

    pub fn runtime(id: u64, started_at: u64) -> Self {
        FiberId::Runtime(RuntimeFiberId { id, started_at })
    }

    /// The runtime ids contained in this identity. Empty for [`FiberId::None`].
    pub fn ids(&self) -> BTreeSet<RuntimeFiberId> {
        match self {
            FiberId::None => BTreeSet::new(),
            FiberId::Runtime(id) => {
                let mut ids = BTreeSet::new();
                ids.insert(*id);
                ids
            }
            FiberId::Composite(ids) => ids.clone(),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, FiberId::None)
    }

    /// Combines two identities. `None` is the identity element, and the union
    /// of runtime ids is idempotent, so `a.combine(a) == a`.
    #[must_use]
    pub fn combine(self, other: FiberId) -> FiberId {
        match (self, other) {
            (FiberId::None, other) => other,
            (this, FiberId::None) => this,
            (this, other) => {
                let mut ids = this.ids();
                ids.extend(other.ids());
                FiberId::from_ids(ids)
            }
        }
    }

    pub fn combine_all(ids: impl IntoIterator<Item = FiberId>) -> FiberId {
        ids.into_iter().fold(FiberId::None, FiberId::combine)
    }

    fn from_ids(ids: BTreeSet<RuntimeFiberId>) -> FiberId {
        match ids.len() {
            0 => FiberId::None,
            1 => FiberId::Runtime(*ids.iter().next().unwrap()),
            _ => FiberId::Composite(ids),
        }
    }
}

impl Default for FiberId {
    fn default() -> Self {
        FiberId::None
    }
}

impl Display for FiberId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FiberId::None => f.write_str("#none"),
            FiberId::Runtime(id) => write!(f, "#{}", id.id),
            FiberId::Composite(ids) => {
                f.write_str("#{")?;
                let mut first = true;
                for id in ids {
                    if !first {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", id.id)?;
                    first = false;
                }
                f.write_str("}")
            }
        }
    }
}
