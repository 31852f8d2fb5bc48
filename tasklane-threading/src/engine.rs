use std::io;
use std::sync::Arc;

use parking_lot::RwLock;

/// The capabilities the detach manager requires from an embedded scripting engine.
///
/// The engine owns the execution model. This crate only moves serialized code between contexts
/// and decides what happens with the results, it never interprets a [`Function`] or [`Value`]
/// itself.
///
/// A context created with [`new_context`] is owned by exactly one thread at a time. It is built up
/// on the host thread and then moved to a detached worker, which is why contexts, functions and
/// values must be [`Send`].
///
/// [`Function`]: Self::Function
/// [`Value`]: Self::Value
/// [`new_context`]: Self::new_context
pub trait ScriptEngine: Send + Sync + 'static {
    /// A callable as seen by the host context.
    type Callable;
    /// A callable bound to an isolated context.
    type Function: Send + 'static;
    /// An argument or result value.
    type Value: Send + 'static;
    /// An isolated interpreter instance.
    type Context: Send + 'static;
    /// Errors raised by the engine.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Writes a self-contained representation of `callable` to `out`.
    ///
    /// Must fail without side effects on the host if the callable captures state that cannot be
    /// transferred, such as a live external resource.
    fn serialize(&self, callable: &Self::Callable, out: &mut dyn io::Write)
    -> Result<(), Self::Error>;

    /// Creates a fresh context with the engine's standard capabilities.
    fn new_context(&self) -> Result<Self::Context, Self::Error>;

    /// Loads serialized code into `context`, labelled with `source_name` for diagnostics.
    fn load(
        &self,
        context: &mut Self::Context,
        bytes: &[u8],
        source_name: &str,
    ) -> Result<Self::Function, Self::Error>;

    /// Invokes `function` with `args` inside `context`.
    ///
    /// When `want_results` is `false`, the caller discards all results and the engine may return
    /// an empty list.
    fn call(
        &self,
        context: &mut Self::Context,
        function: Self::Function,
        args: Vec<Self::Value>,
        want_results: bool,
    ) -> Result<Vec<Self::Value>, Self::Error>;

    /// Returns whether `value` counts as true.
    fn is_truthy(&self, value: &Self::Value) -> bool;

    /// Releases all resources owned by `context`.
    fn close_context(&self, context: Self::Context) {
        drop(context);
    }
}

type Hook<E> = dyn Fn(&mut <E as ScriptEngine>::Context) -> Result<(), <E as ScriptEngine>::Error>
    + Send
    + Sync;

/// Initialization callbacks replayed into every new isolated context.
///
/// Modules register hooks at startup to install their bindings. Applying the hooks gives a new
/// context the same capabilities as a freshly started host. Hooks can be registered at any time;
/// a context only sees the hooks registered before it was created.
pub struct StartupHooks<E: ScriptEngine> {
    hooks: RwLock<Vec<Arc<Hook<E>>>>,
}

impl<E: ScriptEngine> StartupHooks<E> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            hooks: RwLock::new(Vec::new()),
        }
    }

    /// Appends a hook. Hooks run in registration order.
    pub fn register<F>(&self, hook: F)
    where
        F: Fn(&mut E::Context) -> Result<(), E::Error> + Send + Sync + 'static,
    {
        self.hooks.write().push(Arc::new(hook));
    }

    /// Returns the number of registered hooks.
    pub fn len(&self) -> usize {
        self.hooks.read().len()
    }

    /// Returns `true` if no hooks are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs all hooks against `context`, stopping at the first error.
    pub fn apply(&self, context: &mut E::Context) -> Result<(), E::Error> {
        // Snapshot, so hooks may register further hooks without deadlocking.
        let hooks = self.hooks.read().clone();
        for hook in hooks {
            hook(context)?;
        }
        Ok(())
    }
}

impl<E: ScriptEngine> Default for StartupHooks<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: ScriptEngine> std::fmt::Debug for StartupHooks<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartupHooks")
            .field("len", &self.len())
            .finish()
    }
}

/// An isolated context that is closed through its engine when dropped.
///
/// This makes teardown unconditional: it happens after a successful run, after a failed run, when
/// the worker panics, and when the worker thread could never be started.
pub(crate) struct SlaveContext<E: ScriptEngine> {
    engine: Arc<E>,
    context: Option<E::Context>,
}

impl<E: ScriptEngine> SlaveContext<E> {
    /// Creates a context and applies the startup hooks to it.
    pub fn create(engine: &Arc<E>, hooks: &StartupHooks<E>) -> Result<Self, E::Error> {
        let mut context = Self {
            engine: Arc::clone(engine),
            context: Some(engine.new_context()?),
        };

        hooks.apply(context.get_mut())?;
        Ok(context)
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    pub fn get_mut(&mut self) -> &mut E::Context {
        self.context
            .as_mut()
            .expect("slave context is only taken on drop")
    }
}

impl<E: ScriptEngine> Drop for SlaveContext<E> {
    fn drop(&mut self) {
        if let Some(context) = self.context.take() {
            self.engine.close_context(context);
        }
    }
}
