//! The boundary between the session protocol and a PKCS#11 token.
//!
//! Every method maps one-to-one to a PKCS#11 function and returns the raw `CK_RV`
//! on failure. Interpreting return values (authentication errors, negative
//! verification, which protocol step failed) is left to the session layer.

use pkcs11_sys::{
    CK_FLAGS, CK_MECHANISM_TYPE, CK_OBJECT_HANDLE, CK_RV, CK_SESSION_HANDLE, CK_SLOT_ID,
    CK_USER_TYPE,
};

use crate::{
    Info,
    attributes::{AttributeTemplate, AttributeType},
    mechanism::MechanismSpec,
};

/// Result of a raw token call
pub type CkResult<T> = Result<T, CK_RV>;

pub trait Cryptoki {
    /// `C_Initialize` with OS locking
    fn initialize(&self) -> CkResult<()>;

    fn finalize(&self) -> CkResult<()>;

    fn get_info(&self) -> CkResult<Info>;

    fn get_slot_list(&self, token_present: bool) -> CkResult<Vec<CK_SLOT_ID>>;

    fn get_mechanism_list(&self, slot_id: CK_SLOT_ID) -> CkResult<Vec<CK_MECHANISM_TYPE>>;

    fn open_session(&self, slot_id: CK_SLOT_ID, flags: CK_FLAGS) -> CkResult<CK_SESSION_HANDLE>;

    fn close_session(&self, session: CK_SESSION_HANDLE) -> CkResult<()>;

    fn login(&self, session: CK_SESSION_HANDLE, user_type: CK_USER_TYPE, pin: &[u8])
    -> CkResult<()>;

    fn logout(&self, session: CK_SESSION_HANDLE) -> CkResult<()>;

    /// Returns the public and private key handles, in this order
    fn generate_key_pair(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &MechanismSpec,
        public_template: &AttributeTemplate,
        private_template: &AttributeTemplate,
    ) -> CkResult<(CK_OBJECT_HANDLE, CK_OBJECT_HANDLE)>;

    /// Values in request order, `None` for attributes the token reports unavailable
    /// (sensitive or invalid for the object). Any other failure is an error.
    fn get_attribute_value(
        &self,
        session: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
        attribute_types: &[AttributeType],
    ) -> CkResult<Vec<Option<Vec<u8>>>>;

    fn sign_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &MechanismSpec,
        key: CK_OBJECT_HANDLE,
    ) -> CkResult<()>;

    /// Single-part signature
    fn sign(&self, session: CK_SESSION_HANDLE, data: &[u8]) -> CkResult<Vec<u8>>;

    fn verify_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &MechanismSpec,
        key: CK_OBJECT_HANDLE,
    ) -> CkResult<()>;

    /// Single-part verification, `Ok(())` means the signature is valid
    fn verify(&self, session: CK_SESSION_HANDLE, data: &[u8], signature: &[u8]) -> CkResult<()>;
}
