use {
    crate::FiberId,
    std::{
        any::Any,
        collections::HashMap,
        marker::PhantomData,
        rc::Rc,
        sync::atomic::{AtomicU64, Ordering},
    },
};

// Stable identities for refs come from a process-wide counter rather than from
// object addresses, so snapshot maps never depend on allocator or GC behavior.
static NEXT_REF_ID: AtomicU64 = AtomicU64::new(0);

type RefValue = Rc<dyn Any>;

struct Erased {
    id: u64,
    initial: RefValue,
    fork: Rc<dyn Fn(&RefValue) -> RefValue>,
    join: Rc<dyn Fn(&RefValue, &RefValue) -> RefValue>,
}

/// A typed, per-fiber contextual variable with custom inheritance rules.
///
/// `fork` derives the child's initial value when a fiber is spawned and is
/// applied exactly once per spawn. `join` merges a finished child's value back
/// into the parent and is applied exactly once per join. The defaults are
/// identity `fork` and parent-keeps `join`.
pub struct FiberRef<A> {
    erased: Rc<Erased>,
    _marker: PhantomData<fn(A) -> A>,
}

impl<A> Clone for FiberRef<A> {
    fn clone(&self) -> Self {
        FiberRef {
            erased: Rc::clone(&self.erased),
            _marker: PhantomData,
        }
    }
}

impl<A: Clone + 'static> FiberRef<A> {
    pub fn new(initial: A) -> Self {
        FiberRef::new_with(initial, |a: &A| a.clone(), |parent: &A, _child: &A| {
            parent.clone()
        })
    }

    pub fn new_with(
        initial: A,
        fork: impl Fn(&A) -> A + 'static,
        join: impl Fn(&A, &A) -> A + 'static,
    ) -> Self {
        let fork = move |value: &RefValue| -> RefValue {
            Rc::new(fork(downcast::<A>(value))) as RefValue
        };
        let join = move |parent: &RefValue, child: &RefValue| -> RefValue {
            Rc::new(join(downcast::<A>(parent), downcast::<A>(child))) as RefValue
        };
        FiberRef {
            erased: Rc::new(Erased {
                id: NEXT_REF_ID.fetch_add(1, Ordering::Relaxed),
                initial: Rc::new(initial),
                fork: Rc::new(fork),
                join: Rc::new(join),
            }),
            _marker: PhantomData,
        }
    }

    pub fn initial(&self) -> A {
        downcast::<A>(&self.erased.initial).clone()
    }
}

fn downcast<A: 'static>(value: &RefValue) -> &A {
    match value.downcast_ref::<A>() {
        Some(a) => a,
        None => unreachable!("fiber ref value had an unexpected type"),
    }
}

#[derive(Clone)]
struct Entry {
    erased: Rc<Erased>,
    // Non-empty stack of (owner, value); the top is the current value.
    stack: Vec<(FiberId, RefValue)>,
}

impl Entry {
    fn current(&self) -> &RefValue {
        &self.stack.last().unwrap().1
    }
}

/// An immutable per-fiber snapshot of all [`FiberRef`] values. Updates produce
/// a new snapshot; nothing is mutated in place.
#[derive(Clone, Default)]
pub struct FiberRefs {
    map: HashMap<u64, Entry>,
}

impl FiberRefs {
    pub fn new() -> Self {
        FiberRefs::default()
    }

    /// The current value of `fiber_ref`, or its initial value when the ref is
    /// absent from this snapshot.
    pub fn get<A: Clone + 'static>(&self, fiber_ref: &FiberRef<A>) -> A {
        match self.map.get(&fiber_ref.erased.id) {
            Some(entry) => downcast::<A>(entry.current()).clone(),
            None => fiber_ref.initial(),
        }
    }

    /// Returns a snapshot with `fiber_ref` set to `value`, owned by
    /// `fiber_id`. When the top entry is already owned by `fiber_id` the value
    /// is replaced, otherwise a new entry is pushed.
    #[must_use]
    pub fn updated_as<A: Clone + 'static>(
        &self,
        fiber_id: FiberId,
        fiber_ref: &FiberRef<A>,
        value: A,
    ) -> FiberRefs {
        let mut map = self.map.clone();
        let value: RefValue = Rc::new(value);
        let entry = map.entry(fiber_ref.erased.id).or_insert_with(|| Entry {
            erased: Rc::clone(&fiber_ref.erased),
            stack: Vec::new(),
        });
        match entry.stack.last_mut() {
            Some((owner, current)) if *owner == fiber_id => *current = value,
            _ => entry.stack.push((fiber_id, value)),
        }
        FiberRefs { map }
    }

    /// Derives the snapshot a freshly-spawned child starts with: every ref's
    /// `fork` function applied to the parent's current value, exactly once,
    /// tagged with the child's id.
    #[must_use]
    pub fn fork_as(&self, child_id: FiberId) -> FiberRefs {
        let map = self
            .map
            .iter()
            .map(|(id, entry)| {
                let forked = (entry.erased.fork)(entry.current());
                let entry = Entry {
                    erased: Rc::clone(&entry.erased),
                    stack: vec![(child_id.clone(), forked)],
                };
                (*id, entry)
            })
            .collect();
        FiberRefs { map }
    }

    /// Merges a finished fiber's snapshot into this one: for every ref present
    /// in `other`, the new value is `join(self_value, other_value)`, applied
    /// exactly once per ref.
    #[must_use]
    pub fn join_as(&self, self_id: FiberId, other: &FiberRefs) -> FiberRefs {
        let mut map = self.map.clone();
        for (id, other_entry) in &other.map {
            let joined = match map.get(id) {
                Some(entry) => (entry.erased.join)(entry.current(), other_entry.current()),
                None => (other_entry.erased.join)(&other_entry.erased.initial, other_entry.current()),
            };
            let entry = map.entry(*id).or_insert_with(|| Entry {
                erased: Rc::clone(&other_entry.erased),
                stack: Vec::new(),
            });
            match entry.stack.last_mut() {
                Some((owner, current)) if *owner == self_id => *current = joined,
                _ => entry.stack.push((self_id.clone(), joined)),
            }
        }
        FiberRefs { map }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn fiber(n: u64) -> FiberId {
        FiberId::runtime(n, 0)
    }

    #[test]
    fn reading_an_absent_ref_yields_its_default() {
        let reference = FiberRef::new(41);
        assert_eq!(FiberRefs::new().get(&reference), 41);
    }

    #[test]
    fn updates_produce_new_snapshots() {
        let reference = FiberRef::new(0);
        let refs = FiberRefs::new();
        let updated = refs.updated_as(fiber(1), &reference, 7);
        assert_eq!(refs.get(&reference), 0);
        assert_eq!(updated.get(&reference), 7);
    }

    #[test]
    fn fork_applies_the_fork_function_once_per_spawn() {
        let reference = FiberRef::new_with(0, |n| n + 1, |parent, _| *parent);
        let parent = FiberRefs::new().updated_as(fiber(1), &reference, 0);
        let child = parent.fork_as(fiber(2));
        let grandchild = child.fork_as(fiber(3));
        assert_eq!(child.get(&reference), 1);
        assert_eq!(grandchild.get(&reference), 2);
    }

    #[test]
    fn join_merges_with_the_join_function() {
        let reference = FiberRef::new_with(0, |n| *n, |parent, child| *parent.max(child));
        let parent = FiberRefs::new().updated_as(fiber(1), &reference, 2);
        let child = parent.fork_as(fiber(2)).updated_as(fiber(2), &reference, 1);
        assert_eq!(parent.join_as(fiber(1), &child).get(&reference), 2);

        let parent = FiberRefs::new().updated_as(fiber(1), &reference, 0);
        let child = parent.fork_as(fiber(2)).updated_as(fiber(2), &reference, 1);
        assert_eq!(parent.join_as(fiber(1), &child).get(&reference), 1);
    }

    #[test]
    fn default_join_keeps_the_parent_value() {
        let reference = FiberRef::new("parent");
        let parent = FiberRefs::new().updated_as(fiber(1), &reference, "parent");
        let child = parent.fork_as(fiber(2)).updated_as(fiber(2), &reference, "child");
        assert_eq!(parent.join_as(fiber(1), &child).get(&reference), "parent");
    }
}
