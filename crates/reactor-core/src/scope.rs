//! `Scope`: an RAII holder for process-wide runtime state installed at
//! startup (the uncaught-exception handler, long-stack-support toggle).

use crate::error::{set_uncaught_handler, UncaughtHandler};

/// Options consulted once, at [`Scope::new`].
pub struct InitOptions {
    pub uncaught_handler: Option<UncaughtHandler>,
    pub long_stack_support: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        InitOptions {
            uncaught_handler: None,
            long_stack_support: false,
        }
    }
}

/// Installs `options` for as long as it lives, restoring the previous
/// uncaught-exception handler on drop.
pub struct Scope {
    previous_handler: Option<UncaughtHandler>,
    long_stack_support: bool,
}

impl Scope {
    pub fn new(options: InitOptions) -> Self {
        let previous_handler = options.uncaught_handler.map(set_uncaught_handler);
        tracing::info!(
            long_stack_support = options.long_stack_support,
            "runtime scope initialized"
        );
        Scope {
            previous_handler,
            long_stack_support: options.long_stack_support,
        }
    }

    pub fn long_stack_support(&self) -> bool {
        self.long_stack_support
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        if let Some(previous) = self.previous_handler.take() {
            set_uncaught_handler(previous);
        }
        tracing::info!("runtime scope dropped");
    }
}
