use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tasklane_log::{LogError, PanicMessage};

use crate::buffer::{BufferError, TransportBuffer};
use crate::builder::{DetachBuilder, PanicHandler, ThreadName};
use crate::engine::{ScriptEngine, SlaveContext, StartupHooks};
use crate::queue::{DedupMode, TaskHandle, TaskQueue};

/// A completion trigger pushed onto the [`TaskQueue`] when a detached job reports success.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Trigger {
    /// The host task to schedule.
    pub handle: TaskHandle,
    /// How to treat the handle if it is already pending.
    pub mode: DedupMode,
}

impl Trigger {
    /// Creates a trigger for `handle` with the given dedup mode.
    pub const fn new(handle: TaskHandle, mode: DedupMode) -> Self {
        Self { handle, mode }
    }
}

/// Errors returned synchronously by [`Detacher::detach`].
///
/// Once a job has been launched, failures are no longer reported to the caller. They are logged
/// instead, see [`Detacher`].
#[derive(Debug, thiserror::Error)]
pub enum DetachError<E>
where
    E: std::error::Error + 'static,
{
    /// The callable captures state that cannot be transferred to another context.
    #[error("failed to serialize callable")]
    SerializationFailed(#[source] E),
    /// The isolated context could not be created, initialized or loaded with the callable.
    #[error("failed to prepare isolated context")]
    ContextFailed(#[source] E),
    /// The transport buffer could not be allocated.
    #[error("failed to allocate transport buffer")]
    AllocationFailure(#[from] BufferError),
    /// The operating system refused to start another thread.
    #[error("failed to spawn detached worker thread")]
    ThreadCreationFailed(#[source] io::Error),
}

/// Decrements the active job counter when the job is freed.
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Everything a worker thread needs to run one job, owned exclusively by that thread.
struct DetachedJob<E: ScriptEngine> {
    id: u64,
    context: SlaveContext<E>,
    function: E::Function,
    args: Vec<E::Value>,
    discard_results: bool,
    trigger: Option<Trigger>,
    queue: Arc<TaskQueue>,
    source: String,
    active: ActiveGuard,
}

impl<E: ScriptEngine> DetachedJob<E> {
    fn run(self) {
        let Self {
            id,
            context,
            function,
            args,
            discard_results,
            trigger,
            queue,
            source,
            active,
        } = self;

        // Locals drop in reverse order, also while unwinding, so the context is closed before the
        // job stops counting as active.
        let _active = active;
        let mut context = context;

        let engine = Arc::clone(context.engine());
        let result = engine.call(context.get_mut(), function, args, !discard_results);

        match result {
            Err(error) => {
                tasklane_log::error!(
                    detached = true,
                    job = id,
                    source = %source,
                    "detached job failed: {}",
                    LogError(&error)
                );
            }
            Ok(results) => {
                let fired = trigger.filter(|_| results.first().is_some_and(|v| engine.is_truthy(v)));

                if let Some(trigger) = fired {
                    if let Err(error) = queue.push(trigger.handle, trigger.mode) {
                        tasklane_log::error!(
                            detached = true,
                            job = id,
                            handle = trigger.handle.value(),
                            "failed to schedule completion trigger: {}",
                            LogError(&error)
                        );
                    }
                }

                tasklane_log::debug!(job = id, fired = fired.is_some(), "detached job finished");
            }
        }
    }
}

/// A dedicated, detached thread that runs a single job.
///
/// Workers are handed to a [`ThreadSpawn`] implementation, which decides how the thread is created
/// and must eventually call [`Worker::run`] on it. Nobody joins the thread.
pub struct Worker {
    id: u64,
    name: String,
    stack_size: Option<usize>,
    panic_handler: Option<Arc<PanicHandler>>,
    task: Box<dyn FnOnce() + Send>,
}

impl Worker {
    /// Returns the sequence number of the job run by this worker.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the thread name assigned to this worker.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the requested stack size, if one was configured.
    pub fn stack_size(&self) -> Option<usize> {
        self.stack_size
    }

    /// Runs the job on the current thread.
    ///
    /// A panic inside the job is caught. It is passed to the panic handler if one is configured,
    /// otherwise it is logged. The isolated context is torn down in either case.
    pub fn run(self) {
        let result = std::panic::catch_unwind(AssertUnwindSafe(self.task));

        match (self.panic_handler, result) {
            // Panic handler and error, we swallow the panic and invoke the callback.
            (Some(panic_handler), Err(error)) => {
                panic_handler(error);
            }
            // No panic handler and error, nobody is left to observe the panic but the logs.
            (None, Err(error)) => {
                tasklane_log::error!(
                    detached = true,
                    job = self.id,
                    worker = %self.name,
                    "detached job panicked: {}",
                    PanicMessage(&*error)
                );
            }
            // Otherwise, we do nothing.
            (_, Ok(())) => {}
        }
    }
}

/// A trait for customizing the spawning of threads for detached jobs.
///
/// Implement [`ThreadSpawn`] to adjust thread settings before creation, or to run workers on
/// threads managed elsewhere.
pub trait ThreadSpawn {
    /// Spawns a new thread that runs the worker.
    fn spawn(&mut self, worker: Worker) -> io::Result<()>;
}

/// A default implementation of [`ThreadSpawn`] using [`std::thread::Builder`].
///
/// The thread is named after the worker and uses the configured stack size. Its join handle is
/// dropped immediately, which detaches it.
#[derive(Clone, Debug, Default)]
pub struct DefaultSpawn;

impl ThreadSpawn for DefaultSpawn {
    fn spawn(&mut self, worker: Worker) -> io::Result<()> {
        let mut b = std::thread::Builder::new().name(worker.name().to_owned());
        if let Some(stack_size) = worker.stack_size() {
            b = b.stack_size(stack_size);
        }
        b.spawn(|| worker.run())?;

        Ok(())
    }
}

/// A flexible [`ThreadSpawn`] implementation that uses a closure to create threads.
#[derive(Clone)]
pub struct CustomSpawn<B>(B);

impl<B> CustomSpawn<B> {
    /// Creates a new instance of [`CustomSpawn`] with the provided closure.
    pub fn new(spawn_handler: B) -> Self {
        CustomSpawn(spawn_handler)
    }
}

impl<B> ThreadSpawn for CustomSpawn<B>
where
    B: FnMut(Worker) -> io::Result<()>,
{
    fn spawn(&mut self, worker: Worker) -> io::Result<()> {
        self.0(worker)
    }
}

/// Runs serialized callables on dedicated threads in isolated contexts.
///
/// [`detach`](Self::detach) captures a callable from the host, copies it through a
/// [`TransportBuffer`] into a new isolated context, and launches a detached thread that calls it.
/// The call returns as soon as the thread has been created. There is no result channel: a job
/// reports back only by firing its [`Trigger`], which pushes a task onto the host's
/// [`TaskQueue`] if the callable's first result is truthy.
///
/// Failures inside a job, including panics, are logged with `detached = true` and never reach
/// the caller. A job that fails does not fire its trigger.
///
/// Every job gets its own thread. There is no pool, no admission control, no cancellation and no
/// ordering between jobs.
pub struct Detacher<E: ScriptEngine, S = DefaultSpawn> {
    pub(crate) engine: Arc<E>,
    pub(crate) queue: Arc<TaskQueue>,
    pub(crate) hooks: StartupHooks<E>,
    pub(crate) thread_name: Box<ThreadName>,
    pub(crate) stack_size: Option<usize>,
    pub(crate) chunk_size: usize,
    pub(crate) panic_handler: Option<Arc<PanicHandler>>,
    pub(crate) spawn_handler: Mutex<S>,
    pub(crate) next_id: AtomicU64,
    pub(crate) active: Arc<AtomicUsize>,
}

impl<E: ScriptEngine> Detacher<E, DefaultSpawn> {
    /// Returns a [`DetachBuilder`] for the engine and host queue.
    pub fn builder(engine: Arc<E>, queue: Arc<TaskQueue>) -> DetachBuilder<E> {
        DetachBuilder::new(engine, queue)
    }
}

impl<E, S> Detacher<E, S>
where
    E: ScriptEngine,
    S: ThreadSpawn,
{
    /// Runs `callable` with `args` on a new detached thread.
    pub fn detach(
        &self,
        callable: &E::Callable,
        args: Vec<E::Value>,
    ) -> Result<(), DetachError<E::Error>> {
        self.launch(callable, args, None)
    }

    /// Runs `callable` with `args` on a new detached thread and fires `trigger` on success.
    ///
    /// The trigger is pushed if the callable returns normally and its first result is truthy.
    pub fn detach_with_trigger(
        &self,
        callable: &E::Callable,
        args: Vec<E::Value>,
        trigger: Trigger,
    ) -> Result<(), DetachError<E::Error>> {
        self.launch(callable, args, Some(trigger))
    }

    fn launch(
        &self,
        callable: &E::Callable,
        args: Vec<E::Value>,
        trigger: Option<Trigger>,
    ) -> Result<(), DetachError<E::Error>> {
        let buffer = TransportBuffer::with_chunk_size(self.chunk_size)?;
        self.engine
            .serialize(callable, &mut &buffer)
            .map_err(DetachError::SerializationFailed)?;

        let mut context =
            SlaveContext::create(&self.engine, &self.hooks).map_err(DetachError::ContextFailed)?;
        let function = buffer
            .with_bytes(|bytes| self.engine.load(context.get_mut(), bytes, buffer.name()))
            .map_err(DetachError::ContextFailed)?;

        let source = buffer.name().to_owned();
        let size = buffer.len();
        buffer.release();

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let job = DetachedJob {
            id,
            context,
            function,
            args,
            discard_results: trigger.is_none(),
            trigger,
            queue: Arc::clone(&self.queue),
            source,
            active: ActiveGuard::new(&self.active),
        };

        let worker = Worker {
            id,
            name: (self.thread_name)(id),
            stack_size: self.stack_size,
            panic_handler: self.panic_handler.clone(),
            task: Box::new(move || job.run()),
        };

        // If spawning fails, the worker is dropped along with the job, closing its context.
        self.spawn_handler
            .lock()
            .spawn(worker)
            .map_err(DetachError::ThreadCreationFailed)?;

        tasklane_log::trace!(job = id, size, "launched detached job");
        Ok(())
    }
}

impl<E: ScriptEngine, S> Detacher<E, S> {
    /// Returns the hooks applied to every new isolated context.
    ///
    /// Hooks registered here affect all jobs launched afterwards.
    pub fn startup_hooks(&self) -> &StartupHooks<E> {
        &self.hooks
    }

    /// Returns the queue completion triggers are pushed to.
    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    /// Returns the scripting engine.
    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// Returns the number of launched jobs that have not finished yet.
    pub fn active_jobs(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

impl<E: ScriptEngine, S> std::fmt::Debug for Detacher<E, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Detacher")
            .field("queue", &self.queue)
            .field("hooks", &self.hooks)
            .field("stack_size", &self.stack_size)
            .field("chunk_size", &self.chunk_size)
            .field("active_jobs", &self.active_jobs())
            .finish_non_exhaustive()
    }
}
