//! `RuntimeConfig`: the small configuration surface for an in-process
//! execution substrate — no wire format to layer, just the handful of knobs
//! that pick thread counts and default queue shape.

use crate::error::{ErrorKind, ErrorPtr, UncaughtHandler};
use std::env;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

impl From<ConfigError> for ErrorPtr {
    fn from(err: ConfigError) -> Self {
        ErrorPtr::new(ErrorKind::Programmer, err.to_string())
    }
}

/// Construction knobs for a runtime: thread-pool size, default queue shape,
/// long-stack-support toggle, and an optional uncaught-exception handler.
#[derive(Clone)]
pub struct RuntimeConfig {
    pub thread_pool_size: usize,
    pub default_queue_priority: i32,
    pub default_queue_parallelism: usize,
    pub long_stack_support: bool,
    pub uncaught_handler: Option<UncaughtHandler>,
}

impl fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("thread_pool_size", &self.thread_pool_size)
            .field("default_queue_priority", &self.default_queue_priority)
            .field("default_queue_parallelism", &self.default_queue_parallelism)
            .field("long_stack_support", &self.long_stack_support)
            .field("uncaught_handler", &self.uncaught_handler.is_some())
            .finish()
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            thread_pool_size: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            default_queue_priority: 0,
            default_queue_parallelism: 1,
            long_stack_support: false,
            uncaught_handler: None,
        }
    }
}

impl RuntimeConfig {
    /// Starts from [`RuntimeConfig::default`] and overlays any
    /// `REACTOR_CORE_*` environment variables that are set.
    pub fn from_env() -> Result<Self, ErrorPtr> {
        let mut config = RuntimeConfig::default();
        if let Ok(value) = env::var("REACTOR_CORE_THREAD_POOL_SIZE") {
            config.thread_pool_size = parse_env("REACTOR_CORE_THREAD_POOL_SIZE", &value)?;
        }
        if let Ok(value) = env::var("REACTOR_CORE_DEFAULT_QUEUE_PRIORITY") {
            config.default_queue_priority = parse_env("REACTOR_CORE_DEFAULT_QUEUE_PRIORITY", &value)?;
        }
        if let Ok(value) = env::var("REACTOR_CORE_DEFAULT_QUEUE_PARALLELISM") {
            config.default_queue_parallelism = parse_env("REACTOR_CORE_DEFAULT_QUEUE_PARALLELISM", &value)?;
        }
        if let Ok(value) = env::var("REACTOR_CORE_LONG_STACK_SUPPORT") {
            config.long_stack_support = matches!(value.as_str(), "1" | "true" | "TRUE" | "yes");
        }
        tracing::debug!(?config, "runtime config loaded from environment");
        Ok(config)
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ErrorPtr> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidValue { name, value: value.to_string() }.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let config = RuntimeConfig::default();
        assert!(config.thread_pool_size >= 1);
        assert_eq!(config.default_queue_parallelism, 1);
        assert!(!config.long_stack_support);
    }

    #[test]
    fn parse_env_rejects_garbage() {
        let err = parse_env::<usize>("REACTOR_CORE_THREAD_POOL_SIZE", "not-a-number");
        assert!(err.is_err());
    }
}
