//! `Expected<T>`: a settled outcome, either a value or an error.
//!
//! Resolutions with zero, one, or several values are all expressed as a
//! single generic parameter `T`, which is itself a tuple when there is more
//! than one value (`Expected<()>`, `Expected<(A, B)>`, ...), so every
//! operator only has to reason about one generic parameter.

use crate::error::ErrorPtr;
use std::fmt;

/// A settled outcome: exactly one of `Value`/`Error` is inhabited.
#[derive(Debug, Clone)]
pub enum Expected<T> {
    Value(T),
    Error(ErrorPtr),
}

impl<T> Expected<T> {
    pub fn value(value: T) -> Self {
        Expected::Value(value)
    }

    pub fn error(error: ErrorPtr) -> Self {
        Expected::Error(error)
    }

    pub fn has_value(&self) -> bool {
        matches!(self, Expected::Value(_))
    }

    pub fn has_error(&self) -> bool {
        matches!(self, Expected::Error(_))
    }

    /// Consumes the outcome and returns the value. Panics if it is an error
    /// — calling this where an error is a live possibility is itself the
    /// programmer error; use [`Expected::try_into_value`] when the error
    /// needs to propagate instead.
    pub fn into_value(self) -> T {
        match self {
            Expected::Value(v) => v,
            Expected::Error(e) => panic!("into_value called on an error outcome: {e}"),
        }
    }

    /// Consumes the outcome, surfacing the error through `Result` instead of
    /// discarding it.
    pub fn try_into_value(self) -> Result<T, ErrorPtr> {
        match self {
            Expected::Value(v) => Ok(v),
            Expected::Error(e) => Err(e),
        }
    }

    pub fn error_ref(&self) -> Option<&ErrorPtr> {
        match self {
            Expected::Value(_) => None,
            Expected::Error(e) => Some(e),
        }
    }

    pub fn value_ref(&self) -> Option<&T> {
        match self {
            Expected::Value(v) => Some(v),
            Expected::Error(_) => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Expected<U> {
        match self {
            Expected::Value(v) => Expected::Value(f(v)),
            Expected::Error(e) => Expected::Error(e),
        }
    }
}

impl<T> From<Result<T, ErrorPtr>> for Expected<T> {
    fn from(result: Result<T, ErrorPtr>) -> Self {
        match result {
            Ok(v) => Expected::Value(v),
            Err(e) => Expected::Error(e),
        }
    }
}

impl<T> From<Expected<T>> for Result<T, ErrorPtr> {
    fn from(expected: Expected<T>) -> Self {
        expected.try_into_value()
    }
}

impl<T: fmt::Display> fmt::Display for Expected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expected::Value(v) => write!(f, "Value({v})"),
            Expected::Error(e) => write!(f, "Error({e})"),
        }
    }
}
