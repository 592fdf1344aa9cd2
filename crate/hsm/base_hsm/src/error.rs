use std::fmt::{self, Display, Formatter};

use pkcs11_sys::CK_RV;
use strum::Display;
use thiserror::Error;

use crate::{attributes::AttributeType, pkcs11_ext::ckr_name, ObjectClass};

pub type HResult<T> = Result<T, HError>;

/// The protocol step a token error was raised from
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
#[strum(serialize_all = "snake_case")]
pub enum Step {
    Initialize,
    Finalize,
    GetInfo,
    SlotDiscovery,
    MechanismList,
    OpenSession,
    Login,
    Logout,
    CloseSession,
    GenerateKeyPair,
    GetAttributes,
    SignInit,
    Sign,
    VerifyInit,
    Verify,
}

/// Multi-part operations tracked by a session
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    Sign,
    Verify,
}

/// A raw PKCS#11 return value, displayed by name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rv(pub CK_RV);

impl Display for Rv {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#x})", ckr_name(self.0), self.0)
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("wrong credential")]
    WrongCredential,
    #[error("user already authenticated")]
    AlreadyAuthenticated,
    #[error("token locked")]
    TokenLocked,
}

impl AuthError {
    /// Only a wrong credential may be retried, with another credential and a fresh session.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::WrongCredential)
    }
}

#[derive(Error, Debug)]
pub enum HError {
    #[error("{0}")]
    Default(String),

    #[error("Error loading the library: {0}")]
    LibLoading(#[from] libloading::Error),

    #[error("PKCS#11 {step} failed: {rv}")]
    Pkcs11 { step: Step, rv: Rv },

    #[error("no slot with a token present")]
    NoTokenPresent,

    #[error("authentication failed: {0}")]
    Auth(AuthError),

    #[error("the session is not authenticated")]
    NotAuthenticated,

    #[error("attribute {0} is not available on this object")]
    AttributeUnavailable(AttributeType),

    #[error("attribute {attribute} cannot be requested from a {class} object")]
    AttributeNotApplicable {
        attribute: AttributeType,
        class: ObjectClass,
    },

    #[error("invalid value for attribute {attribute}: {reason}")]
    AttributeValue {
        attribute: AttributeType,
        reason: String,
    },

    #[error("{0} operation not initialized")]
    NotInitialized(Operation),

    #[error("a {0} operation is already active on this session")]
    OperationActive(Operation),

    #[error("key policy violation: {0}")]
    Policy(String),

    #[error("unsupported parameter: {0}")]
    UnsupportedParameter(String),

    #[error("mechanism {0:#x} is not supported by the slot")]
    MechanismNotSupported(pkcs11_sys::CK_MECHANISM_TYPE),

    #[error("lifecycle violation: {0}")]
    Lifecycle(String),

    #[error(transparent)]
    TryFromIntError(#[from] std::num::TryFromIntError),

    #[error(transparent)]
    FromUtf8Error(#[from] std::string::FromUtf8Error),
}

impl HError {
    pub(crate) const fn token(step: Step, rv: CK_RV) -> Self {
        Self::Pkcs11 { step, rv: Rv(rv) }
    }

    /// The protocol step that raised a token error, if any
    #[must_use]
    pub const fn step(&self) -> Option<Step> {
        match self {
            Self::Pkcs11 { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// The raw token return value, if any
    #[must_use]
    pub const fn rv(&self) -> Option<CK_RV> {
        match self {
            Self::Pkcs11 { rv, .. } => Some(rv.0),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use pkcs11_sys::CKR_PIN_INCORRECT;

    use super::*;

    #[test]
    fn test_token_error_display() {
        let err = HError::token(Step::Login, CKR_PIN_INCORRECT);
        assert_eq!(
            err.to_string(),
            "PKCS#11 login failed: CKR_PIN_INCORRECT (0xa0)"
        );
        assert_eq!(err.step(), Some(Step::Login));
        assert_eq!(err.rv(), Some(CKR_PIN_INCORRECT));
    }

    #[test]
    fn test_auth_error_retryable() {
        assert!(AuthError::WrongCredential.is_retryable());
        assert!(!AuthError::TokenLocked.is_retryable());
        assert!(!AuthError::AlreadyAuthenticated.is_retryable());
    }
}
