use {
    crate::{
        context::Context,
        deferred::Deferred,
        effect::Effect,
        op::{self, Op},
        scope::{scope_exit, Scope},
    },
    std::{
        cell::RefCell, collections::HashMap, convert::Infallible, fmt::Debug,
        marker::PhantomData, rc::Rc,
    },
    tracing::debug,
};

/// A recipe for building part of a [`Context`], acquiring resources into a
/// scope along the way. Layers form a graph by composition and are compared
/// by identity: the same layer value reachable through multiple paths of one
/// build is acquired once and shared.
pub struct Layer<E = Infallible> {
    node: Rc<Node<E>>,
    _marker: PhantomData<fn() -> E>,
}

impl<E> Clone for Layer<E> {
    fn clone(&self) -> Self {
        Layer {
            node: Rc::clone(&self.node),
            _marker: PhantomData,
        }
    }
}

#[allow(clippy::type_complexity)]
enum Node<E> {
    /// A leaf: runs the build effect in the build scope.
    Scoped {
        build: Box<dyn Fn() -> Effect<Context, E>>,
    },
    /// Feeds the output context of `from` into the environment of `to`.
    To { from: Layer<E>, to: Layer<E> },
    /// Builds both sides concurrently and merges their outputs, right-biased.
    And { left: Layer<E>, right: Layer<E> },
    /// Pins the inner layer's first build result to a captured scope so later
    /// builds reuse it.
    Memoized {
        inner: Layer<E>,
        scope: Scope,
        built: RefCell<Option<Deferred<Context, E>>>,
    },
}

/// In-flight and finished builds for one `build` call, keyed by node
/// identity.
type MemoMap<E> = Rc<RefCell<HashMap<usize, Deferred<Context, E>>>>;

impl<E: Clone + Debug + 'static> Layer<E> {
    fn from_node(node: Node<E>) -> Layer<E> {
        Layer {
            node: Rc::new(node),
            _marker: PhantomData,
        }
    }

    /// A layer from a scoped build effect. The effect runs with the build
    /// scope current, so finalizers it registers release when that scope
    /// closes.
    pub fn from_effect(build: impl Fn() -> Effect<Context, E> + 'static) -> Layer<E> {
        Layer::from_node(Node::Scoped {
            build: Box::new(build),
        })
    }

    /// A layer providing one service built by an effect.
    pub fn service<S: Clone + 'static>(
        build: impl Fn() -> Effect<S, E> + 'static,
    ) -> Layer<E> {
        Layer::from_effect(move || build().map(Context::with))
    }

    /// A layer providing an already-constructed service.
    pub fn succeed<S: Clone + 'static>(service: S) -> Layer<E> {
        Layer::from_effect(move || Effect::succeed(Context::with(service.clone())))
    }

    /// Horizontal composition: both sides build concurrently against the same
    /// environment and their outputs merge.
    pub fn and(self, that: Layer<E>) -> Layer<E> {
        Layer::from_node(Node::And {
            left: self,
            right: that,
        })
    }

    /// Vertical composition: `self`'s output becomes part of `that`'s
    /// environment; the result is `that`'s output.
    pub fn to(self, that: Layer<E>) -> Layer<E> {
        Layer::from_node(Node::To {
            from: self,
            to: that,
        })
    }

    /// Captures the current scope and returns a layer whose first build is
    /// remembered: later builds, even from other `build` calls, reuse the
    /// result, and its resources live until the captured scope closes.
    pub fn memoize(&self) -> Effect<Layer<E>, Infallible> {
        let inner = self.clone();
        crate::effect::scope().map(move |scope| {
            Layer::from_node(Node::Memoized {
                inner,
                scope,
                built: RefCell::new(None),
            })
        })
    }

    /// Builds the layer's output context, registering all acquired resources
    /// with `scope`.
    pub fn build(&self, scope: &Scope) -> Effect<Context, E> {
        let layer = self.clone();
        let scope = scope.clone();
        Effect::suspend(move || {
            let memo: MemoMap<E> = Rc::new(RefCell::new(HashMap::new()));
            build_node(&layer, &scope, &memo)
        })
    }
}

fn build_node<E: Clone + Debug + 'static>(
    layer: &Layer<E>,
    scope: &Scope,
    memo: &MemoMap<E>,
) -> Effect<Context, E> {
    let key = Rc::as_ptr(&layer.node) as *const () as usize;
    if let Some(deferred) = memo.borrow().get(&key) {
        debug!(key, "Layer shared; awaiting existing build.");
        return deferred.await_();
    }
    let deferred: Deferred<Context, E> = Deferred::new();
    memo.borrow_mut().insert(key, deferred.clone());
    let built = match &*layer.node {
        Node::Scoped { build } => {
            // Acquisition is masked so a finalizer is never registered for a
            // partially-acquired resource.
            Effect::<Context, E>::from_op(Op::WithScope {
                scope: scope.clone(),
                inner: Box::new(build().op),
            })
            .uninterruptible()
        }
        Node::To { from, to } => {
            let to = to.clone();
            let scope = scope.clone();
            let memo = Rc::clone(memo);
            build_node(from, &scope.clone(), &memo).flat_map(move |provided| {
                let inner = build_node(&to, &scope, &memo);
                Effect::from_op(Op::GetContext(Box::new(move |current| Op::WithContext {
                    context: current.merge(&provided),
                    inner: Box::new(inner.op),
                })))
            })
        }
        Node::And { left, right } => build_node(left, scope, memo)
            .zip_par(build_node(right, scope, memo))
            .map(|(left, right)| left.merge(&right)),
        Node::Memoized {
            inner,
            scope: pinned,
            built,
        } => {
            let mut slot = built.borrow_mut();
            match &*slot {
                Some(existing) => {
                    debug!("Memoized layer; awaiting pinned build.");
                    existing.await_()
                }
                None => {
                    let pinned_deferred: Deferred<Context, E> = Deferred::new();
                    *slot = Some(pinned_deferred.clone());
                    // The pinned build gets a fresh memo table: sharing within
                    // it is keyed to this build, not to the caller's.
                    let fresh: MemoMap<E> = Rc::new(RefCell::new(HashMap::new()));
                    build_node(inner, pinned, &fresh).on_exit(move |exit| {
                        pinned_deferred.done(exit.clone());
                        Effect::succeed(())
                    })
                }
            }
        }
    };
    built.on_exit(move |exit| {
        deferred.done(exit.clone());
        Effect::succeed(())
    })
}

impl<A: Clone + 'static, E: Clone + Debug + 'static> Effect<A, E> {
    /// Builds `layer` in a child scope, runs `self` with its output merged
    /// into the context, and closes the child scope, releasing the layer's
    /// resources, when `self` completes by any path.
    pub fn provide_layer(self, layer: Layer<E>) -> Effect<A, E> {
        let inner = self.op;
        Effect::from_op(Op::GetScope(Box::new(move |parent| {
            let child = parent.fork();
            let close = child.clone();
            let provided = layer.build(&child).flat_map(move |built| {
                Effect::<A, E>::from_op(Op::GetContext(Box::new(move |current| {
                    Op::WithContext {
                        context: current.merge(&built),
                        inner: Box::new(inner),
                    }
                })))
            });
            op::on_exit(provided.op, move |exit| close.close(scope_exit(exit)).op)
        })))
    }
}
