mod mldsa;

mod session_impl;
pub use mldsa::{KeyPair, Verification};
pub use session_impl::{AuthState, Credential, KeyHandle, Session, UserType};
