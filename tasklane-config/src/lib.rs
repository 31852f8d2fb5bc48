//! Configuration for the Tasklane offloading core.
//!
//! The configuration is a plain `serde` value with defaults for every field, so an empty document
//! is a valid configuration. It can be loaded from a YAML file with [`Config::from_path`] or
//! parsed from a string with [`Config::from_yaml_str`]. Both validate the result before returning
//! it.
//!
//! ```
//! use tasklane_config::Config;
//!
//! let config = Config::from_yaml_str("queue:\n  capacity: 16\n").unwrap();
//! assert_eq!(config.queue.capacity, 16);
//! assert_eq!(config.buffer.chunk_size, tasklane_config::DEFAULT_CHUNK_SIZE);
//! ```

#![warn(missing_docs)]

mod config;

pub use self::config::*;
