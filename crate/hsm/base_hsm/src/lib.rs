//! Copyright 2024 Cosmian Tech SAS

#![allow(non_snake_case)]
#![allow(clippy::missing_safety_doc)]

mod error;

pub use attributes::{Attribute, AttributeTemplate, AttributeType, ObjectClass};
pub use cryptoki::{CkResult, Cryptoki};
pub use error::{AuthError, HError, HResult, Operation, Rv, Step};
pub use hsm_lib::HsmLib;
pub use mechanism::{
    MechanismSpec, ParameterSet, ParameterSetConvention, SignatureFamily, SignatureScheme,
};
pub use provider::{Info, Provider};
pub use session::{
    AuthState, Credential, KeyHandle, KeyPair, Session, UserType, Verification,
};
pub use slots::SlotManager;
pub use templates::{KeyId, KeyPolicy, build_templates, generate_random_bytes};
pub use workflow::{DEFAULT_MESSAGE, WorkflowConfig, WorkflowReport, run};

mod attributes;
mod cryptoki;
mod hsm_lib;
mod mechanism;
pub mod pkcs11_ext;
mod provider;
mod session;
mod slots;
mod templates;
mod workflow;

pub mod test_helpers;

#[cfg(test)]
mod tests;
