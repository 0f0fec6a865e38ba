use std::fmt;
use thiserror::Error as ThisError;

///
/// Error
///
/// Top-level runtime error. Every kind aborts the current operation and
/// rolls the transaction back unless the caller catches it explicitly.
///

#[derive(Clone, Debug, ThisError)]
pub enum Error {
    /// Constraint violation: schema constraint, `constrains` hook, or a
    /// value that failed per-kind normalization.
    #[error("validation failed: {message}")]
    Validation { message: String },

    /// A record-level or field-level access rule denied the operation.
    #[error("access denied on {entity}: {message}")]
    Access { entity: String, message: String },

    /// An operation referenced an id that no longer exists.
    #[error("record does not exist: {entity}({id})")]
    Missing { entity: String, id: i64 },

    /// A row was locked or changed underneath; retryable.
    #[error("could not obtain lock on {entity}({id})")]
    Concurrency { entity: String, id: i64 },

    /// Contract breach by a compute/inverse hook. Not user-facing.
    #[error("programming error: {message}")]
    Programming { message: String },

    /// Operation refused for a business reason surfaceable to the end user.
    #[error("{message}")]
    User { message: String },

    /// Registry build failure (bad declarations).
    #[error("registry error: {message}")]
    Registry { message: String },

    /// Engine invariant violation. Not user-facing.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn access(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Access {
            entity: entity.into(),
            message: message.into(),
        }
    }

    pub fn missing(entity: impl Into<String>, id: i64) -> Self {
        Self::Missing {
            entity: entity.into(),
            id,
        }
    }

    pub fn concurrency(entity: impl Into<String>, id: i64) -> Self {
        Self::Concurrency {
            entity: entity.into(),
            id,
        }
    }

    pub fn programming(message: impl Into<String>) -> Self {
        Self::Programming {
            message: message.into(),
        }
    }

    pub fn user(message: impl Into<String>) -> Self {
        Self::User {
            message: message.into(),
        }
    }

    pub fn registry(message: impl Into<String>) -> Self {
        Self::Registry {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Validation { .. } => ErrorClass::Validation,
            Self::Access { .. } => ErrorClass::Access,
            Self::Missing { .. } => ErrorClass::NotFound,
            Self::Concurrency { .. } => ErrorClass::Conflict,
            Self::Programming { .. } | Self::Internal { .. } => ErrorClass::Internal,
            Self::User { .. } => ErrorClass::Refused,
            Self::Registry { .. } => ErrorClass::InvariantViolation,
        }
    }

    /// Concurrency conflicts may be retried with backoff; nothing else may.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Concurrency { .. })
    }

    /// Whether the message is suitable for end users (and thus translated
    /// by the presentation layer). Programming and internal errors are not.
    #[must_use]
    pub const fn is_user_facing(&self) -> bool {
        !matches!(self, Self::Programming { .. } | Self::Internal { .. })
    }
}

///
/// ErrorClass
/// Internal error taxonomy for runtime classification.
/// Not a stable API; may change without notice.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    Validation,
    Access,
    NotFound,
    Conflict,
    Refused,
    Internal,
    InvariantViolation,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Validation => "validation",
            Self::Access => "access",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Refused => "refused",
            Self::Internal => "internal",
            Self::InvariantViolation => "invariant_violation",
        };
        write!(f, "{label}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_is_the_only_retryable_kind() {
        assert!(Error::concurrency("sale.order", 3).is_retryable());
        assert!(!Error::validation("bad value").is_retryable());
        assert!(!Error::missing("sale.order", 3).is_retryable());
    }

    #[test]
    fn programming_errors_are_not_user_facing() {
        assert!(!Error::programming("compute left a hole").is_user_facing());
        assert!(!Error::internal("oops").is_user_facing());
        assert!(Error::user("cannot confirm an empty order").is_user_facing());
    }

    #[test]
    fn classes_map_per_kind() {
        assert_eq!(Error::validation("x").class(), ErrorClass::Validation);
        assert_eq!(Error::concurrency("m", 1).class(), ErrorClass::Conflict);
        assert_eq!(Error::missing("m", 1).class(), ErrorClass::NotFound);
    }
}
