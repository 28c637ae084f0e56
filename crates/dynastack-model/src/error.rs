//! Store error types.
//!
//! A [`StoreError`] is what a store round trip fails with. The mapper never
//! interprets or retries these; it hands them to the caller unchanged.

use std::fmt;

/// Well-known store error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum StoreErrorCode {
    /// Table or index not found.
    ResourceNotFoundException,
    /// Condition check failed.
    ConditionalCheckFailedException,
    /// Provisioned throughput exceeded.
    ProvisionedThroughputExceededException,
    /// Request limit exceeded.
    RequestLimitExceeded,
    /// Request throttled.
    ThrottlingException,
    /// Validation error.
    #[default]
    ValidationException,
    /// Serialization error.
    SerializationException,
    /// Internal server error.
    InternalServerError,
    /// Access denied.
    AccessDeniedException,
    /// Credentials not recognised.
    UnrecognizedClientException,
    /// The request never produced a service response (connect, timeout, I/O).
    Transport,
    /// A service error code this crate does not know about.
    Unknown,
}

impl StoreErrorCode {
    /// Parses a service error code string, e.g. `"ValidationException"`.
    ///
    /// Fully-qualified forms such as
    /// `com.amazonaws.dynamodb.v20120810#ResourceNotFoundException` are
    /// accepted as well.
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        let short = code.rsplit('#').next().unwrap_or(code);
        match short {
            "ResourceNotFoundException" => Self::ResourceNotFoundException,
            "ConditionalCheckFailedException" => Self::ConditionalCheckFailedException,
            "ProvisionedThroughputExceededException" => {
                Self::ProvisionedThroughputExceededException
            }
            "RequestLimitExceeded" => Self::RequestLimitExceeded,
            "ThrottlingException" => Self::ThrottlingException,
            "ValidationException" => Self::ValidationException,
            "SerializationException" => Self::SerializationException,
            "InternalServerError" => Self::InternalServerError,
            "AccessDeniedException" => Self::AccessDeniedException,
            "UnrecognizedClientException" => Self::UnrecognizedClientException,
            _ => Self::Unknown,
        }
    }

    /// Returns the short error code string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResourceNotFoundException => "ResourceNotFoundException",
            Self::ConditionalCheckFailedException => "ConditionalCheckFailedException",
            Self::ProvisionedThroughputExceededException => {
                "ProvisionedThroughputExceededException"
            }
            Self::RequestLimitExceeded => "RequestLimitExceeded",
            Self::ThrottlingException => "ThrottlingException",
            Self::ValidationException => "ValidationException",
            Self::SerializationException => "SerializationException",
            Self::InternalServerError => "InternalServerError",
            Self::AccessDeniedException => "AccessDeniedException",
            Self::UnrecognizedClientException => "UnrecognizedClientException",
            Self::Transport => "Transport",
            Self::Unknown => "Unknown",
        }
    }

    /// Returns `true` for codes a caller would typically retry with backoff.
    #[must_use]
    pub fn is_throttling(&self) -> bool {
        matches!(
            self,
            Self::ProvisionedThroughputExceededException
                | Self::RequestLimitExceeded
                | Self::ThrottlingException
        )
    }
}

impl fmt::Display for StoreErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error returned by a store round trip.
#[derive(Debug)]
pub struct StoreError {
    /// The error code.
    pub code: StoreErrorCode,
    /// A human-readable error message.
    pub message: String,
    /// The underlying source error, if any.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoreError({}): {}", self.code, self.message)
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl StoreError {
    /// Create a new `StoreError` from an error code.
    #[must_use]
    pub fn new(code: StoreErrorCode) -> Self {
        Self {
            message: code.as_str().to_owned(),
            code,
            source: None,
        }
    }

    /// Create a new `StoreError` with a custom message.
    #[must_use]
    pub fn with_message(code: StoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code,
            source: None,
        }
    }

    /// Set the source error.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Table or index not found.
    #[must_use]
    pub fn resource_not_found(message: impl Into<String>) -> Self {
        Self::with_message(StoreErrorCode::ResourceNotFoundException, message)
    }

    /// Validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::with_message(StoreErrorCode::ValidationException, message)
    }

    /// Internal server error.
    #[must_use]
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::with_message(StoreErrorCode::InternalServerError, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_parse_fully_qualified_code() {
        let code =
            StoreErrorCode::from_code("com.amazonaws.dynamodb.v20120810#ResourceNotFoundException");
        assert_eq!(code, StoreErrorCode::ResourceNotFoundException);
    }

    #[test]
    fn test_should_map_unrecognised_code_to_unknown() {
        assert_eq!(
            StoreErrorCode::from_code("SomethingNew"),
            StoreErrorCode::Unknown
        );
    }

    #[test]
    fn test_should_format_code_and_message() {
        let err = StoreError::validation("bad key");
        assert_eq!(err.to_string(), "StoreError(ValidationException): bad key");
    }

    #[test]
    fn test_should_flag_throttling_codes() {
        assert!(StoreErrorCode::ThrottlingException.is_throttling());
        assert!(!StoreErrorCode::ValidationException.is_throttling());
    }
}
