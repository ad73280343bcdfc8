use thiserror::Error;
use uuid::Uuid;

use crate::store::StorageError;

pub type SafetyResult<T> = std::result::Result<T, SafetyError>;

/// Errors surfaced by the kid safety policy surface
#[derive(Debug, Error)]
pub enum SafetyError {
    /// Malformed or out-of-range input
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The requesting actor does not control the target kid account
    #[error("Not authorized: {0}")]
    Authorization(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Storage failure: {0}")]
    Storage(#[from] StorageError),

    /// Maturity or consent rules block the requested action
    #[error("Denied by policy: {0}")]
    PolicyDenied(PolicyDenial),

    #[error("Login code rejected: {0}")]
    LoginCodeRejected(LoginCodeRejection),
}

impl SafetyError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        Self::Authorization(message.into())
    }

    pub fn kid_account_not_found(id: Uuid) -> Self {
        Self::NotFound {
            entity: "Kid account",
            id: id.to_string(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// True for outcomes that the boolean-returning operations report as `false`
    pub fn is_soft_denial(&self) -> bool {
        matches!(self, Self::PolicyDenied(_) | Self::LoginCodeRejected(_))
    }
}

/// Why a maturity or consent rule blocked an action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDenial {
    /// High-maturity kids cannot have password access revoked
    HighMaturityRevocation,
    /// Low maturity or revoked access forbids the kid from changing the password
    PasswordChangeNotAllowed,
    NoPasswordSet,
    TooManyAttempts,
    IndependenceDayReached,
    AlreadyResolved,
    AlreadyDecided,
    ApprovalExpired,
}

impl std::fmt::Display for PolicyDenial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = match self {
            Self::HighMaturityRevocation => "password access cannot be revoked at high maturity",
            Self::PasswordChangeNotAllowed => "kid is not allowed to change the password",
            Self::NoPasswordSet => "no password has been set",
            Self::TooManyAttempts => "too many attempts, try again later",
            Self::IndependenceDayReached => "independence day has already been reached",
            Self::AlreadyResolved => "safety event is already resolved",
            Self::AlreadyDecided => "approval request was already decided",
            Self::ApprovalExpired => "approval request has expired",
        };
        f.write_str(message)
    }
}

/// Distinct outcomes of a failed login code redemption
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginCodeRejection {
    NotFound,
    AlreadyUsed,
    Revoked,
    Expired,
}

impl std::fmt::Display for LoginCodeRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = match self {
            Self::NotFound => "code not found",
            Self::AlreadyUsed => "code already used",
            Self::Revoked => "code revoked",
            Self::Expired => "code expired",
        };
        f.write_str(message)
    }
}

/// Map soft denials to `Ok(false)` for the boolean operations
pub(crate) fn denied_as_false(result: SafetyResult<()>) -> SafetyResult<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.is_soft_denial() => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_denials_are_soft() {
        let err = SafetyError::PolicyDenied(PolicyDenial::HighMaturityRevocation);
        assert!(err.is_soft_denial());
        assert!(!denied_as_false(Err(err)).unwrap());
    }

    #[test]
    fn authorization_failures_are_never_coerced() {
        let result = denied_as_false(Err(SafetyError::authorization("not the parent")));
        assert!(matches!(result, Err(SafetyError::Authorization(_))));
    }

    #[test]
    fn rejection_messages_are_distinct() {
        let expired = SafetyError::LoginCodeRejected(LoginCodeRejection::Expired).to_string();
        let revoked = SafetyError::LoginCodeRejected(LoginCodeRejection::Revoked).to_string();
        assert_ne!(expired, revoked);
        assert!(expired.contains("expired"));
    }
}
