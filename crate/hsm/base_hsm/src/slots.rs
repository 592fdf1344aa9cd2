use pkcs11_sys::{CK_FLAGS, CK_MECHANISM_TYPE, CK_SLOT_ID, CKF_RW_SESSION, CKF_SERIAL_SESSION};
use tracing::{debug, warn};

use crate::{
    HError, HResult, Rv, Session, Step, cryptoki::Cryptoki, hsm_lib::HsmLib,
    mechanism::SignatureScheme, pkcs11_ext::CK_INVALID_HANDLE, provider::Provider,
};

/// A slot with a token present, selected on an initialized [`Provider`].
pub struct SlotManager<'p, C: Cryptoki = HsmLib> {
    provider: &'p Provider<C>,
    slot_id: CK_SLOT_ID,
}

impl<'p, C: Cryptoki> SlotManager<'p, C> {
    pub(crate) const fn new(provider: &'p Provider<C>, slot_id: CK_SLOT_ID) -> Self {
        Self { provider, slot_id }
    }

    #[must_use]
    pub const fn slot_id(&self) -> CK_SLOT_ID {
        self.slot_id
    }

    /// The mechanisms the token in this slot supports
    pub fn supported_mechanisms(&self) -> HResult<Vec<CK_MECHANISM_TYPE>> {
        self.provider.ensure_initialized()?;
        self.provider
            .backend()
            .get_mechanism_list(self.slot_id)
            .map_err(|rv| HError::token(Step::MechanismList, rv))
    }

    pub fn supports(&self, mechanism: CK_MECHANISM_TYPE) -> HResult<bool> {
        Ok(self.supported_mechanisms()?.contains(&mechanism))
    }

    /// Fail with [`HError::MechanismNotSupported`] unless the token lists every
    /// mechanism needed to generate, sign and verify with `scheme`
    pub fn check_scheme(&self, scheme: &SignatureScheme) -> HResult<()> {
        let mechanisms = self.supported_mechanisms()?;
        for mechanism in scheme.required_mechanisms() {
            if !mechanisms.contains(&mechanism) {
                return Err(HError::MechanismNotSupported(mechanism));
            }
        }
        debug!("Slot {} supports {scheme}", self.slot_id);
        Ok(())
    }

    /// Open a serial session on the slot, read-write if `read_write` is set.
    ///
    /// The session is closed by [`Session::close`], or when it is dropped.
    pub fn open_session(&self, read_write: bool) -> HResult<Session<'p, C>> {
        self.provider.ensure_initialized()?;
        let flags: CK_FLAGS = if read_write {
            CKF_RW_SESSION | CKF_SERIAL_SESSION
        } else {
            CKF_SERIAL_SESSION
        };
        let handle = self
            .provider
            .backend()
            .open_session(self.slot_id, flags)
            .map_err(|rv| HError::token(Step::OpenSession, rv))?;
        if handle == CK_INVALID_HANDLE {
            if let Err(rv) = self.provider.backend().close_session(handle) {
                warn!("Failed releasing the invalid session handle: {}", Rv(rv));
            }
            return Err(HError::Default(
                "the token returned an invalid session handle".to_owned(),
            ));
        }
        Ok(Session::new(self.provider, self.slot_id, handle))
    }
}
