//! Caller-supplied substitute data for endpoints the backend does not have.

use crate::error::{ErrorKind, RequestFailure};

/// Default value to use when an endpoint turns out to be missing (404).
#[derive(Debug, Clone, PartialEq)]
pub enum Fallback<T> {
    None,
    Data(T),
}

impl<T> Fallback<T> {
    pub fn is_some(&self) -> bool {
        matches!(self, Fallback::Data(_))
    }

    /// Replaces a final MissingEndpoint failure with the fallback data.
    /// Every other failure, cancellation included, passes through untouched.
    pub fn resolve(self, result: Result<T, RequestFailure>) -> Result<T, RequestFailure> {
        match (result, self) {
            (Err(RequestFailure::Failed(err)), Fallback::Data(data)) if err.kind() == ErrorKind::MissingEndpoint => {
                tracing::debug!(message = err.message(), "endpoint missing, using fallback data");
                Ok(data)
            }
            (result, _) => result,
        }
    }
}

impl<T> Default for Fallback<T> {
    fn default() -> Self {
        Fallback::None
    }
}

impl<T> From<Option<T>> for Fallback<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(data) => Fallback::Data(data),
            None => Fallback::None,
        }
    }
}
