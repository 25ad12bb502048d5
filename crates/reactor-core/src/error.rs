//! The crate-wide error model.
//!
//! `reactor-core` represents every failure as a [`ReactorError`] behind a
//! shareable, type-erased [`ErrorPtr`]. Values travel the error track of an
//! [`crate::expected::Expected`], a promise, or a channel closure; panics
//! are only used as the nothrow-violation detector at dispatcher
//! boundaries.

use std::any::Any;
use std::backtrace::Backtrace;
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};

/// Stable, enumerable error categories.
///
/// # Why
/// Concrete kinds let `fail_kind::<K>` and the uncaught-exception handler
/// dispatch without downcasting every possible attachment; the attachment
/// list still carries whatever extra context a caller wants to retrieve.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum ErrorKind {
    /// Reading a non-settled state, popping an empty queue, or constructing
    /// an `Expected` from a null error carrier.
    ValueAbsent,
    /// Scheduler misuse: a second queue on a direct scheduler, or an invalid
    /// termination-mode transition.
    Scheduling,
    /// Reading from or writing to a channel that has closed, or violating
    /// its back-pressure contract.
    Channel,
    /// A channel or observable reached a clean end of stream; distinct from
    /// `Channel` so consumers can tell "done" apart from "failed".
    EndOfStream,
    /// A timer dispatcher rejected a requested delay.
    Timer,
    /// Caller supplied a value that is invalid by construction (`buffer(0)`,
    /// an out-of-range slice).
    Programmer,
    /// An OS error translated via [`crate::error::registry::from_errno`].
    Errno(i32),
    /// `Promise::all`'s aggregate failure; holds one outcome per input.
    Combined,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::ValueAbsent => write!(f, "value-absent"),
            ErrorKind::Scheduling => write!(f, "scheduling"),
            ErrorKind::Channel => write!(f, "channel"),
            ErrorKind::EndOfStream => write!(f, "end-of-stream"),
            ErrorKind::Timer => write!(f, "timer"),
            ErrorKind::Programmer => write!(f, "programmer"),
            ErrorKind::Errno(code) => write!(f, "errno({code})"),
            ErrorKind::Combined => write!(f, "combined"),
        }
    }
}

/// An arbitrary printable value attached to an error for post-hoc diagnosis.
pub trait Attachment: fmt::Display + fmt::Debug + Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
}

impl<T> Attachment for T
where
    T: fmt::Display + fmt::Debug + Send + Sync + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The concrete error payload shared behind an [`ErrorPtr`].
#[derive(Debug)]
pub struct ReactorError {
    kind: ErrorKind,
    message: String,
    attachments: Vec<Box<dyn Attachment>>,
    backtrace: Option<Backtrace>,
}

impl ReactorError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        ReactorError {
            kind,
            message: message.into(),
            attachments: Vec::new(),
            backtrace: None,
        }
    }

    /// Capture a backtrace at construction. Only called when long-stack
    /// support is enabled (see [`crate::scope::InitOptions`]); capturing one
    /// unconditionally would defeat the point of making it opt-in.
    pub fn with_backtrace(mut self) -> Self {
        self.backtrace = Some(Backtrace::capture());
        self
    }

    pub fn with_attachment(mut self, attachment: impl Attachment) -> Self {
        self.attachments.push(Box::new(attachment));
        self
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        self.backtrace.as_ref()
    }

    /// Returns the first attachment whose concrete type is `T`, if any.
    pub fn attachment<T: 'static>(&self) -> Option<&T> {
        self.attachments
            .iter()
            .find_map(|a| a.as_any().downcast_ref::<T>())
    }

    pub fn into_ptr(self) -> ErrorPtr {
        ErrorPtr(Arc::new(self))
    }
}

impl fmt::Display for ReactorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)?;
        for attachment in &self.attachments {
            write!(f, " | {attachment}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ReactorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

/// An opaque, shareable, type-erased handle to a settled error.
///
/// # Contract
/// - Constructing one from a null carrier is itself a programmer error;
///   since Rust has no null pointers here the invariant is upheld
///   structurally — there is no `ErrorPtr::from_raw` escape hatch.
#[derive(Debug, Clone)]
pub struct ErrorPtr(Arc<ReactorError>);

impl PartialEq for ErrorPtr {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl ErrorPtr {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        ReactorError::new(kind, message).into_ptr()
    }

    pub fn kind(&self) -> &ErrorKind {
        self.0.kind()
    }

    pub fn message(&self) -> &str {
        self.0.message()
    }

    pub fn attachment<T: 'static>(&self) -> Option<&T> {
        self.0.attachment::<T>()
    }

    /// True when `kind` matches the `K` closure-supplied predicate; used by
    /// `Promise::fail_kind`.
    pub fn is_kind(&self, kind: &ErrorKind) -> bool {
        self.0.kind() == kind
    }
}

impl fmt::Display for ErrorPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl From<ReactorError> for ErrorPtr {
    fn from(value: ReactorError) -> Self {
        value.into_ptr()
    }
}

/// Process-wide handler invoked for any error that reaches the end of a
/// chain without being caught, or for any panic trapped at a dispatcher
/// boundary.
pub type UncaughtHandler = Arc<dyn Fn(&ErrorPtr) + Send + Sync>;

static UNCAUGHT_HANDLER: OnceLock<RwLock<UncaughtHandler>> = OnceLock::new();

fn handler_cell() -> &'static RwLock<UncaughtHandler> {
    UNCAUGHT_HANDLER.get_or_init(|| RwLock::new(Arc::new(default_uncaught_handler)))
}

fn default_uncaught_handler(error: &ErrorPtr) {
    tracing::error!(error = %error, "uncaught error reached runtime boundary");
}

/// Install a new process-wide uncaught-exception handler. Returns the
/// previous one, in case a caller wants to chain it.
pub fn set_uncaught_handler(handler: UncaughtHandler) -> UncaughtHandler {
    let cell = handler_cell();
    let mut guard = cell.write().expect("uncaught handler lock poisoned");
    std::mem::replace(&mut *guard, handler)
}

/// Route an error to the current uncaught-exception handler.
pub fn route_uncaught(error: &ErrorPtr) {
    let handler = handler_cell().read().expect("uncaught handler lock poisoned").clone();
    handler(error);
}

/// OS errno → typed error translation, populated at init as a fixed,
/// immutable registry (no global mutable state beyond the handler above).
pub mod registry {
    use super::{ErrorKind, ErrorPtr};

    /// Produce a typed error from an errno-like integer. Unknown codes still
    /// map to `ErrorKind::Errno(code)`, carrying the platform's rendering of
    /// the condition as the message.
    pub fn from_errno(code: i32) -> ErrorPtr {
        let message = std::io::Error::from_raw_os_error(code).to_string();
        ErrorPtr::new(ErrorKind::Errno(code), message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_roundtrip() {
        let err = ReactorError::new(ErrorKind::Programmer, "bad arg")
            .with_attachment(42_i32)
            .into_ptr();
        assert_eq!(err.attachment::<i32>(), Some(&42));
        assert_eq!(err.attachment::<String>(), None);
    }

    #[test]
    fn display_includes_attachments() {
        let err = ReactorError::new(ErrorKind::Channel, "closed")
            .with_attachment("extra-context")
            .into_ptr();
        let rendered = err.to_string();
        assert!(rendered.contains("closed"));
        assert!(rendered.contains("extra-context"));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn error_kind_roundtrips_through_serde_json() {
        let kind = ErrorKind::Errno(42);
        let json = serde_json::to_string(&kind).expect("serialize");
        let back: ErrorKind = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(kind, back);
    }

    #[test]
    fn errno_registry_maps_unknown_codes() {
        let err = registry::from_errno(9999);
        assert_eq!(err.kind(), &ErrorKind::Errno(9999));
    }

    #[test]
    fn uncaught_handler_can_be_swapped() {
        use std::sync::atomic::{AtomicBool, Ordering};
        static CALLED: AtomicBool = AtomicBool::new(false);
        let previous = set_uncaught_handler(Arc::new(|_err| {
            CALLED.store(true, Ordering::SeqCst);
        }));
        route_uncaught(&ErrorPtr::new(ErrorKind::ValueAbsent, "test"));
        assert!(CALLED.load(Ordering::SeqCst));
        set_uncaught_handler(previous);
    }
}
