//! Provides common error types and associated convenience methods for TiledArray.

use std::fmt;

/// A result of type `T`, or a [`TAError`]
pub type TAResult<T> = Result<T, TAError>;

#[derive(Clone)]
struct ErrorData {
    message: String,
    stack: Vec<String>,
}

impl<T> From<T> for ErrorData
where
    T: fmt::Display,
{
    fn from(message: T) -> Self {
        Self {
            message: message.to_string(),
            stack: vec![],
        }
    }
}

/// The category of a `TAError`.
#[derive(Clone, Copy, Eq, PartialEq)]
pub enum ErrorType {
    BadRequest,
    Conflict,
    Internal,
    NotFound,
    Uninitialized,
}

impl fmt::Debug for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::BadRequest => "bad request",
            Self::Conflict => "conflict",
            Self::Internal => "internal error",
            Self::NotFound => "not found",
            Self::Uninitialized => "uninitialized",
        })
    }
}

/// A general error description.
#[derive(Clone)]
pub struct TAError {
    code: ErrorType,
    data: ErrorData,
}

impl TAError {
    /// Returns a new error with the given code and message.
    pub fn new<I: fmt::Display>(code: ErrorType, message: I) -> Self {
        Self {
            code,
            data: message.into(),
        }
    }

    /// Error indicating that the arguments of an operation are mismatched or out of bounds.
    pub fn bad_request<M: fmt::Display, I: fmt::Display>(message: M, cause: I) -> Self {
        Self::new(ErrorType::BadRequest, format!("{}: {}", message, cause))
    }

    /// Error indicating that a single-assignment slot was written or consumed twice.
    pub fn conflict<M: fmt::Display>(message: M) -> Self {
        Self::new(ErrorType::Conflict, message)
    }

    /// A truly unexpected error, for which the calling application cannot define any specific
    /// handling behavior.
    pub fn internal<I: fmt::Display>(info: I) -> Self {
        log::error!("{}", info);
        Self::new(ErrorType::Internal, info)
    }

    /// Error indicating that the requested tile does not exist.
    pub fn not_found<I: fmt::Display>(locator: I) -> Self {
        Self::new(ErrorType::NotFound, locator)
    }

    /// Error indicating access through an object which holds no data.
    pub fn uninitialized<I: fmt::Display>(info: I) -> Self {
        Self::new(ErrorType::Uninitialized, info)
    }

    pub fn code(&self) -> ErrorType {
        self.code
    }

    pub fn message(&'_ self) -> &'_ str {
        &self.data.message
    }

    /// The context accumulated while this error propagated.
    pub fn stack(&self) -> &[String] {
        &self.data.stack
    }

    pub fn consume<I: fmt::Display>(mut self, info: I) -> Self {
        self.data.stack.push(info.to_string());
        self
    }
}

impl std::error::Error for TAError {}

impl fmt::Debug for TAError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for TAError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.data.message)?;

        for context in self.data.stack.iter().rev() {
            write!(f, "\n  while {}", context)?;
        }

        Ok(())
    }
}

/// Construct a [`TAError`] of type [`ErrorType::BadRequest`] from a format string.
#[macro_export]
macro_rules! bad_request {
    ($($t:tt)*) => {{
        $crate::TAError::new($crate::ErrorType::BadRequest, format!($($t)*))
    }};
}

/// Construct a [`TAError`] of type [`ErrorType::Conflict`] from a format string.
#[macro_export]
macro_rules! conflict {
    ($($t:tt)*) => {{
        $crate::TAError::conflict(format!($($t)*))
    }};
}

/// Construct a [`TAError`] of type [`ErrorType::Internal`] from a format string.
#[macro_export]
macro_rules! internal {
    ($($t:tt)*) => {{
        $crate::TAError::internal(format!($($t)*))
    }};
}

/// Construct a [`TAError`] of type [`ErrorType::NotFound`] from a format string.
#[macro_export]
macro_rules! not_found {
    ($($t:tt)*) => {{
        $crate::TAError::not_found(format!($($t)*))
    }};
}

/// Construct a [`TAError`] of type [`ErrorType::Uninitialized`] from a format string.
#[macro_export]
macro_rules! uninitialized {
    ($($t:tt)*) => {{
        $crate::TAError::uninitialized(format!($($t)*))
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_context() {
        let err = bad_request!("tile {} is out of bounds", 7).consume("evaluating [i,j]");

        assert_eq!(err.code(), ErrorType::BadRequest);
        assert_eq!(err.message(), "tile 7 is out of bounds");
        assert_eq!(
            err.to_string(),
            "bad request: tile 7 is out of bounds\n  while evaluating [i,j]"
        );
    }
}
