use std::any::Any;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize};

use parking_lot::Mutex;
use tasklane_config::{Config, DEFAULT_CHUNK_SIZE, DEFAULT_THREAD_NAME};

use crate::detach::{CustomSpawn, DefaultSpawn, Detacher, ThreadSpawn, Worker};
use crate::engine::{ScriptEngine, StartupHooks};
use crate::queue::TaskQueue;

/// Type alias for a thread safe closure that is used for panic handling across the code.
pub(crate) type PanicHandler = dyn Fn(Box<dyn Any + Send>) + Send + Sync;

/// Type alias for the closure naming worker threads by job sequence number.
pub(crate) type ThreadName = dyn Fn(u64) -> String + Send + Sync;

/// [`DetachBuilder`] provides a flexible way to configure and build a [`Detacher`].
///
/// This builder enables you to customize thread naming, stack sizes, panic handling, the way
/// threads are spawned and the startup hooks applied to every isolated context.
pub struct DetachBuilder<E: ScriptEngine, S = DefaultSpawn> {
    engine: Arc<E>,
    queue: Arc<TaskQueue>,
    hooks: StartupHooks<E>,
    thread_name: Box<ThreadName>,
    stack_size: Option<usize>,
    chunk_size: usize,
    panic_handler: Option<Arc<PanicHandler>>,
    spawn_handler: S,
}

impl<E: ScriptEngine> DetachBuilder<E, DefaultSpawn> {
    /// Initializes a new [`DetachBuilder`] with default settings.
    ///
    /// Completion triggers of all detached jobs are pushed onto `queue`.
    pub fn new(engine: Arc<E>, queue: Arc<TaskQueue>) -> Self {
        Self {
            engine,
            queue,
            hooks: StartupHooks::new(),
            thread_name: Box::new(|id| format!("{DEFAULT_THREAD_NAME}-{id}")),
            stack_size: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            panic_handler: None,
            spawn_handler: DefaultSpawn,
        }
    }

    /// Initializes a new [`DetachBuilder`] from the buffer and worker sections of `config`.
    pub fn from_config(engine: Arc<E>, queue: Arc<TaskQueue>, config: &Config) -> Self {
        let prefix = config.workers.thread_name.clone();

        let mut builder = Self::new(engine, queue)
            .thread_name(move |id| format!("{prefix}-{id}"))
            .chunk_size(config.buffer.chunk_size);
        builder.stack_size = config.workers.stack_size;
        builder
    }
}

impl<E, S> DetachBuilder<E, S>
where
    E: ScriptEngine,
    S: ThreadSpawn,
{
    /// Specifies a custom naming convention for detached threads.
    ///
    /// The provided closure receives the job's sequence number and returns a name, which can be
    /// useful for debugging and logging.
    pub fn thread_name<F>(mut self, thread_name: F) -> Self
    where
        F: Fn(u64) -> String + Send + Sync + 'static,
    {
        self.thread_name = Box::new(thread_name);
        self
    }

    /// Sets the stack size of detached threads in bytes.
    pub fn stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = Some(stack_size);
        self
    }

    /// Sets the initial allocation and growth quantum of transport buffers.
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Registers a hook that runs against every new isolated context.
    ///
    /// Hooks run in registration order, before the callable is loaded into the context. A failing
    /// hook fails the [`detach`](Detacher::detach) call.
    pub fn startup_hook<F>(self, hook: F) -> Self
    where
        F: Fn(&mut E::Context) -> Result<(), E::Error> + Send + Sync + 'static,
    {
        self.hooks.register(hook);
        self
    }

    /// Sets a custom panic handler for detached jobs.
    ///
    /// If a job panics, the provided handler receives the payload on the worker thread. Without a
    /// handler, the panic is logged.
    pub fn panic_handler<F>(mut self, panic_handler: F) -> Self
    where
        F: Fn(Box<dyn Any + Send>) + Send + Sync + 'static,
    {
        self.panic_handler = Some(Arc::new(panic_handler));
        self
    }

    /// Configures a custom thread spawning procedure.
    ///
    /// The closure receives each [`Worker`] and must start a thread that calls [`Worker::run`],
    /// or return an error, which is reported as
    /// [`ThreadCreationFailed`](crate::DetachError::ThreadCreationFailed).
    pub fn spawn_handler<F>(self, spawn_handler: F) -> DetachBuilder<E, CustomSpawn<F>>
    where
        F: FnMut(Worker) -> io::Result<()>,
    {
        DetachBuilder {
            engine: self.engine,
            queue: self.queue,
            hooks: self.hooks,
            thread_name: self.thread_name,
            stack_size: self.stack_size,
            chunk_size: self.chunk_size,
            panic_handler: self.panic_handler,
            spawn_handler: CustomSpawn::new(spawn_handler),
        }
    }

    /// Constructs a [`Detacher`] based on the configured settings.
    pub fn build(self) -> Detacher<E, S> {
        Detacher {
            engine: self.engine,
            queue: self.queue,
            hooks: self.hooks,
            thread_name: self.thread_name,
            stack_size: self.stack_size,
            chunk_size: self.chunk_size,
            panic_handler: self.panic_handler,
            spawn_handler: Mutex::new(self.spawn_handler),
            next_id: AtomicU64::new(0),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }
}
