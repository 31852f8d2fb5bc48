use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tasklane_log::LogConfig;

/// Default number of pending slots in the task queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Default allocation quantum of transport buffers, in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Default name prefix of detached worker threads.
pub const DEFAULT_THREAD_NAME: &str = "tasklane-detached";

/// Defines the source of a config error
#[derive(Debug, Default)]
enum ConfigErrorSource {
    /// An error occurring independently.
    #[default]
    None,
    /// An error originating from a configuration file.
    File(PathBuf),
    /// An error originating from a single configuration value.
    Field(&'static str),
    /// An error originating from a single configuration value in a configuration file.
    FieldInFile(&'static str, PathBuf),
}

impl fmt::Display for ConfigErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigErrorSource::None => Ok(()),
            ConfigErrorSource::File(file_name) => {
                write!(f, " (file {})", file_name.display())
            }
            ConfigErrorSource::Field(name) => write!(f, " (field {name})"),
            ConfigErrorSource::FieldInFile(name, file_name) => {
                write!(f, " (field {name} in file {})", file_name.display())
            }
        }
    }
}

/// Indicates config related errors.
#[derive(Debug)]
pub struct ConfigError {
    source: ConfigErrorSource,
    kind: ConfigErrorKind,
    inner: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl ConfigError {
    #[inline]
    fn new(kind: ConfigErrorKind) -> Self {
        Self {
            source: ConfigErrorSource::None,
            kind,
            inner: None,
        }
    }

    #[inline]
    fn wrap<E>(inner: E, kind: ConfigErrorKind) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            source: ConfigErrorSource::None,
            kind,
            inner: Some(Box::new(inner)),
        }
    }

    #[inline]
    fn file(mut self, p: impl AsRef<Path>) -> Self {
        let path = p.as_ref().to_path_buf();
        self.source = match self.source {
            ConfigErrorSource::Field(name) => ConfigErrorSource::FieldInFile(name, path),
            _ => ConfigErrorSource::File(path),
        };
        self
    }

    #[inline]
    fn field(name: &'static str) -> Self {
        Self {
            source: ConfigErrorSource::Field(name),
            ..Self::new(ConfigErrorKind::InvalidValue)
        }
    }

    /// Returns the error kind of the error.
    pub fn kind(&self) -> ConfigErrorKind {
        self.kind
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind, self.source)
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.as_ref().map(|err| err.as_ref() as &(dyn Error + 'static))
    }
}

/// Indicates config related errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigErrorKind {
    /// Failed to open the file.
    #[error("could not open config file")]
    CouldNotOpenFile,
    /// Parsing YAML failed.
    #[error("could not parse yaml config file")]
    BadYaml,
    /// A value in the configuration is out of range.
    #[error("invalid config value")]
    InvalidValue,
}

/// Controls the task queue that hands completion triggers back to the host loop.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of pending slots, tombstones included.
    ///
    /// Pushes beyond this limit are rejected until the host drains the queue.
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Controls transport buffers carrying serialized code to worker contexts.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Initial allocation and growth quantum in bytes.
    pub chunk_size: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Controls the threads spawned for detached jobs.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Name prefix of detached threads, followed by a sequence number.
    pub thread_name: String,
    /// Stack size of detached threads in bytes, or the platform default if unset.
    pub stack_size: Option<usize>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            thread_name: DEFAULT_THREAD_NAME.to_owned(),
            stack_size: None,
        }
    }
}

/// Config struct.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Logging setup, see [`tasklane_log::init`].
    pub logging: LogConfig,
    /// The task queue.
    pub queue: QueueConfig,
    /// Transport buffers.
    pub buffer: BufferConfig,
    /// Detached worker threads.
    pub workers: WorkerConfig,
}

impl Config {
    /// Loads a config from a YAML file at the given path.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let contents = fs::read_to_string(path).map_err(|e| {
            ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(path)
        })?;

        Self::parse(&contents).map_err(|e| e.file(path))
    }

    /// Parses a config from a YAML document.
    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        Self::parse(contents)
    }

    /// Writes the config as YAML.
    pub fn to_writer<W: io::Write>(&self, writer: W) -> Result<(), ConfigError> {
        serde_yaml::to_writer(writer, self)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml))
    }

    fn parse(contents: &str) -> Result<Self, ConfigError> {
        // An empty file is a valid config consisting of defaults only.
        let config = if contents.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(contents)
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml))?
        };

        config.validate()
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.queue.capacity == 0 {
            return Err(ConfigError::field("queue.capacity"));
        }

        if self.buffer.chunk_size == 0 {
            return Err(ConfigError::field("buffer.chunk_size"));
        }

        if self.workers.thread_name.contains('\0') {
            return Err(ConfigError::field("workers.thread_name"));
        }

        Ok(self)
    }
}
