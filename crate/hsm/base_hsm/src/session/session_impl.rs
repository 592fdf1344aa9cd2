//! A session with a PKCS#11 token.
//!
//! The session owns its authentication state and the state of the sign and verify
//! operations. All state lives in `Cell`s, which keeps a `Session` on the call
//! chain that opened it (`Session` is not `Sync`).
//!
//! Authentication states:
//! - `Unauthenticated` after open and after logout
//! - `Authenticated` after a successful login
//! - `Failed` after a failed login: the session is poisoned and only logout and
//!   close are accepted
//!
//! The session is closed by [`Session::close`], which logs out first when
//! authenticated. A session dropped without being closed is closed by `Drop`,
//! errors being logged.

use std::{cell::Cell, fmt, marker::PhantomData};

use pkcs11_sys::{
    CK_OBJECT_HANDLE, CK_SESSION_HANDLE, CK_SLOT_ID, CK_USER_TYPE, CKR_PIN_INCORRECT,
    CKR_PIN_LEN_RANGE, CKR_PIN_LOCKED, CKR_USER_ALREADY_LOGGED_IN, CKU_SO, CKU_USER,
};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::{
    AuthError, HError, HResult, ObjectClass, Step,
    attributes::{Attribute, AttributeTemplate, AttributeType},
    cryptoki::Cryptoki,
    hsm_lib::HsmLib,
    provider::Provider,
};

/// The PIN used to log in.
///
/// Zeroized on drop and never printed.
#[derive(Clone)]
pub struct Credential(Zeroizing<String>);

impl Credential {
    pub fn new(pin: impl Into<String>) -> Self {
        Self(Zeroizing::new(pin.into()))
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(****)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UserType {
    #[default]
    User,
    SecurityOfficer,
}

impl UserType {
    const fn ck_user_type(self) -> CK_USER_TYPE {
        match self {
            Self::User => CKU_USER,
            Self::SecurityOfficer => CKU_SO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticated,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OperationState {
    Idle,
    Initialized,
}

/// A key object created in a session.
///
/// The handle borrows the session that created it and cannot outlive it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyHandle<'s> {
    handle: CK_OBJECT_HANDLE,
    class: ObjectClass,
    session: CK_SESSION_HANDLE,
    _session: PhantomData<&'s ()>,
}

impl KeyHandle<'_> {
    pub(crate) const fn new(
        handle: CK_OBJECT_HANDLE,
        class: ObjectClass,
        session: CK_SESSION_HANDLE,
    ) -> Self {
        Self {
            handle,
            class,
            session,
            _session: PhantomData,
        }
    }

    #[must_use]
    pub const fn handle(&self) -> CK_OBJECT_HANDLE {
        self.handle
    }

    #[must_use]
    pub const fn class(&self) -> ObjectClass {
        self.class
    }
}

pub struct Session<'p, C: Cryptoki = HsmLib> {
    provider: &'p Provider<C>,
    slot_id: CK_SLOT_ID,
    handle: CK_SESSION_HANDLE,
    auth: Cell<AuthState>,
    pub(crate) signing: Cell<OperationState>,
    pub(crate) verifying: Cell<OperationState>,
    closed: Cell<bool>,
}

impl<'p, C: Cryptoki> Session<'p, C> {
    pub(crate) fn new(
        provider: &'p Provider<C>,
        slot_id: CK_SLOT_ID,
        handle: CK_SESSION_HANDLE,
    ) -> Self {
        debug!("Opened session {handle} on slot {slot_id}");
        provider.session_opened();
        Self {
            provider,
            slot_id,
            handle,
            auth: Cell::new(AuthState::Unauthenticated),
            signing: Cell::new(OperationState::Idle),
            verifying: Cell::new(OperationState::Idle),
            closed: Cell::new(false),
        }
    }

    /// Get the PKCS#11 session handle
    #[must_use]
    pub const fn handle(&self) -> CK_SESSION_HANDLE {
        self.handle
    }

    #[must_use]
    pub const fn slot_id(&self) -> CK_SLOT_ID {
        self.slot_id
    }

    #[must_use]
    pub fn auth_state(&self) -> AuthState {
        self.auth.get()
    }

    pub(crate) const fn backend(&self) -> &C {
        self.provider.backend()
    }

    /// Log in to the token.
    ///
    /// A wrong credential, a locked token or any other token failure poisons
    /// the session. Logging in twice fails with
    /// [`AuthError::AlreadyAuthenticated`] and leaves the state unchanged.
    pub fn login(&self, user_type: UserType, credential: &Credential) -> HResult<()> {
        match self.auth.get() {
            AuthState::Unauthenticated => {}
            AuthState::Authenticated => {
                return Err(HError::Auth(AuthError::AlreadyAuthenticated));
            }
            AuthState::Failed => return Err(poisoned()),
        }
        match self.backend().login(
            self.handle,
            user_type.ck_user_type(),
            credential.as_bytes(),
        ) {
            Ok(()) => {
                self.auth.set(AuthState::Authenticated);
                debug!("Session {} logged in as {user_type:?}", self.handle);
                Ok(())
            }
            Err(CKR_USER_ALREADY_LOGGED_IN) => Err(HError::Auth(AuthError::AlreadyAuthenticated)),
            Err(rv) => {
                self.auth.set(AuthState::Failed);
                Err(match rv {
                    CKR_PIN_INCORRECT | CKR_PIN_LEN_RANGE => {
                        HError::Auth(AuthError::WrongCredential)
                    }
                    CKR_PIN_LOCKED => HError::Auth(AuthError::TokenLocked),
                    rv => HError::token(Step::Login, rv),
                })
            }
        }
    }

    /// Log out. Any active sign or verify operation is abandoned.
    ///
    /// If the token fails to log out, the session stays authenticated.
    pub fn logout(&self) -> HResult<()> {
        if self.auth.get() != AuthState::Authenticated {
            return Err(HError::NotAuthenticated);
        }
        self.backend()
            .logout(self.handle)
            .map_err(|rv| HError::token(Step::Logout, rv))?;
        self.auth.set(AuthState::Unauthenticated);
        self.signing.set(OperationState::Idle);
        self.verifying.set(OperationState::Idle);
        debug!("Session {} logged out", self.handle);
        Ok(())
    }

    /// Close the session and log out if necessary.
    ///
    /// The session is considered closed even if the token reports an error,
    /// which is returned after both steps have been attempted.
    pub fn close(self) -> HResult<()> {
        self.close_()
    }

    fn close_(&self) -> HResult<()> {
        if self.closed.replace(true) {
            return Ok(());
        }
        let logged_out = if self.auth.get() == AuthState::Authenticated {
            self.logout()
        } else {
            Ok(())
        };
        let closed = self
            .backend()
            .close_session(self.handle)
            .map_err(|rv| HError::token(Step::CloseSession, rv));
        self.provider.session_closed();
        debug!("Closed session {}", self.handle);
        match (logged_out, closed) {
            (Err(e), Err(close_error)) => {
                warn!("Failed closing session {}: {close_error}", self.handle);
                Err(e)
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    /// Fails on a poisoned session
    pub(crate) fn ensure_usable(&self) -> HResult<()> {
        if self.auth.get() == AuthState::Failed {
            return Err(poisoned());
        }
        Ok(())
    }

    pub(crate) fn ensure_authenticated(&self) -> HResult<()> {
        match self.auth.get() {
            AuthState::Authenticated => Ok(()),
            AuthState::Unauthenticated => Err(HError::NotAuthenticated),
            AuthState::Failed => Err(poisoned()),
        }
    }

    pub(crate) fn ensure_owned(&self, key: &KeyHandle<'_>) -> HResult<()> {
        if key.session != self.handle {
            return Err(HError::Lifecycle(format!(
                "key handle {} belongs to session {}, not {}",
                key.handle, key.session, self.handle
            )));
        }
        Ok(())
    }

    /// Read attributes of a key, in request order.
    ///
    /// Attribute types that make no sense for the class of the key are rejected
    /// before the token is called. Attributes the token cannot return fail with
    /// [`HError::AttributeUnavailable`].
    pub fn get_attributes(
        &self,
        key: &KeyHandle<'_>,
        attribute_types: &[AttributeType],
    ) -> HResult<AttributeTemplate> {
        self.ensure_usable()?;
        self.ensure_owned(key)?;
        if let Some(attribute) = attribute_types
            .iter()
            .find(|attribute_type| !attribute_type.readable_from(key.class))
        {
            return Err(HError::AttributeNotApplicable {
                attribute: *attribute,
                class: key.class,
            });
        }
        debug!(
            "Retrieving attributes {attribute_types:?} of {} {}",
            key.class, key.handle
        );
        let values = self
            .backend()
            .get_attribute_value(self.handle, key.handle, attribute_types)
            .map_err(|rv| HError::token(Step::GetAttributes, rv))?;
        if values.len() != attribute_types.len() {
            return Err(HError::Default(format!(
                "expected {} attribute values, got {}",
                attribute_types.len(),
                values.len()
            )));
        }
        let mut template = AttributeTemplate::new();
        for (attribute_type, value) in attribute_types.iter().zip(values) {
            let value = value.ok_or(HError::AttributeUnavailable(*attribute_type))?;
            template.set(Attribute::decode(*attribute_type, value)?);
        }
        Ok(template)
    }
}

impl<C: Cryptoki> Drop for Session<'_, C> {
    fn drop(&mut self) {
        if let Err(e) = self.close_() {
            warn!("Failed closing session {} on drop: {e}", self.handle);
        }
    }
}

fn poisoned() -> HError {
    HError::Lifecycle("the session failed authentication and must be closed".to_owned())
}
