use std::{
    cell::Cell,
    fmt,
    fmt::{Display, Formatter},
};

use pkcs11_sys::{CK_INFO, CK_SLOT_ID};
use tracing::{debug, warn};

use crate::{HError, HResult, SlotManager, Step, cryptoki::Cryptoki, hsm_lib::HsmLib};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProviderState {
    Loaded,
    Initialized,
    Finalized,
}

/// A loaded token library and its initialize/finalize lifecycle.
///
/// Sessions borrow the provider, so [`Provider::finalize`], which consumes it,
/// cannot be called while one of them is alive.
pub struct Provider<C: Cryptoki = HsmLib> {
    backend: C,
    state: Cell<ProviderState>,
    open_sessions: Cell<usize>,
}

impl Provider<HsmLib> {
    /// Load the PKCS#11 library at `path`
    pub fn load<P: AsRef<std::ffi::OsStr>>(path: P) -> HResult<Self> {
        let path = path.as_ref();
        debug!("Loading PKCS#11 library {}", path.to_string_lossy());
        Ok(Self::with_backend(HsmLib::instantiate(path)?))
    }
}

impl<C: Cryptoki> Provider<C> {
    pub const fn with_backend(backend: C) -> Self {
        Self {
            backend,
            state: Cell::new(ProviderState::Loaded),
            open_sessions: Cell::new(0),
        }
    }

    /// Initialize the library. Must be called exactly once, before anything else.
    pub fn initialize(&self) -> HResult<()> {
        match self.state.get() {
            ProviderState::Loaded => {}
            ProviderState::Initialized => {
                return Err(HError::Lifecycle(
                    "the provider is already initialized".to_owned(),
                ));
            }
            ProviderState::Finalized => {
                return Err(HError::Lifecycle("the provider is finalized".to_owned()));
            }
        }
        self.backend
            .initialize()
            .map_err(|rv| HError::token(Step::Initialize, rv))?;
        self.state.set(ProviderState::Initialized);
        debug!("PKCS#11 library initialized");
        Ok(())
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state.get() == ProviderState::Initialized
    }

    /// Finalize the library. The provider cannot be used afterwards.
    pub fn finalize(self) -> HResult<()> {
        self.ensure_initialized()?;
        let open_sessions = self.open_sessions.get();
        if open_sessions > 0 {
            return Err(HError::Lifecycle(format!(
                "cannot finalize with {open_sessions} open session(s)"
            )));
        }
        // finalize is attempted once, whatever the outcome
        self.state.set(ProviderState::Finalized);
        self.backend
            .finalize()
            .map_err(|rv| HError::token(Step::Finalize, rv))?;
        debug!("PKCS#11 library finalized");
        Ok(())
    }

    pub fn get_info(&self) -> HResult<Info> {
        self.ensure_initialized()?;
        self.backend
            .get_info()
            .map_err(|rv| HError::token(Step::GetInfo, rv))
    }

    /// Slots with a token present, in the order reported by the library
    pub fn slots_with_token(&self) -> HResult<Vec<CK_SLOT_ID>> {
        self.ensure_initialized()?;
        let slots = self
            .backend
            .get_slot_list(true)
            .map_err(|rv| HError::token(Step::SlotDiscovery, rv))?;
        debug!("Slots with a token: {slots:?}");
        if slots.is_empty() {
            return Err(HError::NoTokenPresent);
        }
        Ok(slots)
    }

    /// The first slot with a token present
    pub fn first_slot(&self) -> HResult<SlotManager<'_, C>> {
        let slots = self.slots_with_token()?;
        let slot_id = slots.first().copied().ok_or(HError::NoTokenPresent)?;
        Ok(SlotManager::new(self, slot_id))
    }

    /// A specific slot, which must have a token present
    pub fn slot(&self, slot_id: CK_SLOT_ID) -> HResult<SlotManager<'_, C>> {
        if !self.slots_with_token()?.contains(&slot_id) {
            debug!("Slot {slot_id} has no token present");
            return Err(HError::NoTokenPresent);
        }
        Ok(SlotManager::new(self, slot_id))
    }

    /// Number of sessions opened through this provider and not yet closed
    #[must_use]
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.get()
    }

    pub(crate) const fn backend(&self) -> &C {
        &self.backend
    }

    pub(crate) fn ensure_initialized(&self) -> HResult<()> {
        match self.state.get() {
            ProviderState::Initialized => Ok(()),
            ProviderState::Loaded => Err(HError::Lifecycle(
                "the provider is not initialized".to_owned(),
            )),
            ProviderState::Finalized => {
                Err(HError::Lifecycle("the provider is finalized".to_owned()))
            }
        }
    }

    pub(crate) fn session_opened(&self) {
        self.open_sessions.set(self.open_sessions.get() + 1);
    }

    pub(crate) fn session_closed(&self) {
        self.open_sessions
            .set(self.open_sessions.get().saturating_sub(1));
    }
}

impl<C: Cryptoki> Drop for Provider<C> {
    fn drop(&mut self) {
        if self.state.get() != ProviderState::Initialized {
            return;
        }
        let open_sessions = self.open_sessions.get();
        if open_sessions > 0 {
            warn!("Provider dropped with {open_sessions} open session(s), not finalizing");
            return;
        }
        self.state.set(ProviderState::Finalized);
        if let Err(rv) = self.backend.finalize() {
            warn!(
                "Failed finalizing the PKCS#11 library on drop: {}",
                HError::token(Step::Finalize, rv)
            );
        }
    }
}

pub struct Info {
    pub cryptoki_version: (u8, u8),
    pub manufacturer_id: String,
    pub flags: u64,
    pub library_description: String,
    pub library_version: (u8, u8),
}

/// PKCS#11 strings are blank padded, not NUL terminated
fn padded_string(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches([' ', '\0'])
        .to_owned()
}

impl From<CK_INFO> for Info {
    fn from(info: CK_INFO) -> Self {
        #[cfg(target_os = "windows")]
        let flags = u64::from(info.flags);
        #[cfg(not(target_os = "windows"))]
        let flags = info.flags;
        Self {
            cryptoki_version: (info.cryptokiVersion.major, info.cryptokiVersion.minor),
            manufacturer_id: padded_string(&info.manufacturerID),
            flags,
            library_description: padded_string(&info.libraryDescription),
            library_version: (info.libraryVersion.major, info.libraryVersion.minor),
        }
    }
}

impl Display for Info {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cryptoki Version: {}.{}\nManufacturer ID: {}\nFlags: {}\nLibrary Description: \
             {}\nLibrary Version: {}.{}",
            self.cryptoki_version.0,
            self.cryptoki_version.1,
            self.manufacturer_id,
            self.flags,
            self.library_description,
            self.library_version.0,
            self.library_version.1
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_string() {
        assert_eq!(padded_string(b"SoftHSM     "), "SoftHSM");
        assert_eq!(padded_string(b"Implementation\0\0"), "Implementation");
        assert_eq!(padded_string(b""), "");
    }

    #[test]
    fn test_load_missing_library() {
        assert!(matches!(
            Provider::load("/nonexistent/libpkcs11-does-not-exist.so"),
            Err(HError::LibLoading(_))
        ));
    }
}
