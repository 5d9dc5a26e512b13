use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt::{Debug, Formatter},
    rc::Rc,
};

/// An immutable bag of services keyed by type. Adding a service produces a new
/// context; merging is right-biased.
#[derive(Clone, Default)]
pub struct Context {
    map: HashMap<TypeId, (Rc<dyn Any>, &'static str)>,
}

impl Context {
    pub fn new() -> Self {
        Context::default()
    }

    pub fn with<S: 'static>(service: S) -> Self {
        Context::new().add(service)
    }

    #[must_use]
    pub fn add<S: 'static>(self, service: S) -> Self {
        self.add_rc(Rc::new(service))
    }

    #[must_use]
    pub fn add_rc<S: 'static>(mut self, service: Rc<S>) -> Self {
        self.map.insert(
            TypeId::of::<S>(),
            (service as Rc<dyn Any>, std::any::type_name::<S>()),
        );
        self
    }

    pub fn get<S: 'static>(&self) -> Option<Rc<S>> {
        self.map.get(&TypeId::of::<S>()).map(|(service, _)| {
            match Rc::clone(service).downcast::<S>() {
                Ok(service) => service,
                Err(_) => unreachable!("context entry had an unexpected type"),
            }
        })
    }

    /// Merges `other` over this context: on key collisions `other` wins.
    #[must_use]
    pub fn merge(&self, other: &Context) -> Context {
        let mut map = self.map.clone();
        map.extend(other.map.iter().map(|(k, v)| (*k, v.clone())));
        Context { map }
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }
}

impl Debug for Context {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.map.values().map(|(_, name)| *name).collect();
        names.sort_unstable();
        f.debug_set().entries(names).finish()
    }
}
