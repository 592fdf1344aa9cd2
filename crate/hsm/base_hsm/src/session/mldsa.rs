use pkcs11_sys::{CKR_SIGNATURE_INVALID, CKR_SIGNATURE_LEN_RANGE};
use strum::Display;
use tracing::debug;

use crate::{
    HError, HResult, ObjectClass, Operation, Step,
    attributes::{AttributeTemplate, AttributeType},
    cryptoki::Cryptoki,
    mechanism::SignatureScheme,
    pkcs11_ext::CK_INVALID_HANDLE,
    session::session_impl::{KeyHandle, OperationState, Session},
    templates::{KeyPolicy, build_templates},
};

/// Outcome of a verification that reached the token
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
#[strum(serialize_all = "lowercase")]
pub enum Verification {
    Verified,
    Failed,
}

impl Verification {
    #[must_use]
    pub const fn is_verified(self) -> bool {
        matches!(self, Self::Verified)
    }
}

/// The two halves of a generated key pair and the scheme they were generated with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPair<'s> {
    public_key: KeyHandle<'s>,
    private_key: KeyHandle<'s>,
    scheme: SignatureScheme,
}

impl<'s> KeyPair<'s> {
    #[must_use]
    pub const fn public_key(&self) -> &KeyHandle<'s> {
        &self.public_key
    }

    #[must_use]
    pub const fn private_key(&self) -> &KeyHandle<'s> {
        &self.private_key
    }

    #[must_use]
    pub const fn scheme(&self) -> &SignatureScheme {
        &self.scheme
    }
}

impl<C: Cryptoki> Session<'_, C> {
    /// Generate a key pair on the token.
    ///
    /// Either both handles are returned or an error: a zero handle from the
    /// token is a failure.
    pub fn generate_key_pair(
        &self,
        scheme: &SignatureScheme,
        public_template: &AttributeTemplate,
        private_template: &AttributeTemplate,
    ) -> HResult<KeyPair<'_>> {
        self.ensure_authenticated()?;
        debug!(
            "Generating {scheme} key pair, public template: {:?}",
            public_template.types().collect::<Vec<_>>()
        );
        let (public_key, private_key) = self
            .backend()
            .generate_key_pair(
                self.handle(),
                &scheme.key_gen(),
                public_template,
                private_template,
            )
            .map_err(|rv| HError::token(Step::GenerateKeyPair, rv))?;
        if public_key == CK_INVALID_HANDLE || private_key == CK_INVALID_HANDLE {
            return Err(HError::Default(
                "the token returned an invalid key handle".to_owned(),
            ));
        }
        debug!("Generated key pair: public {public_key}, private {private_key}");
        Ok(KeyPair {
            public_key: KeyHandle::new(public_key, ObjectClass::PublicKey, self.handle()),
            private_key: KeyHandle::new(private_key, ObjectClass::PrivateKey, self.handle()),
            scheme: *scheme,
        })
    }

    /// Build the templates from `policy` and generate the key pair
    pub fn generate_key_pair_with_policy(
        &self,
        scheme: &SignatureScheme,
        policy: &KeyPolicy,
    ) -> HResult<KeyPair<'_>> {
        let (public_template, private_template) = build_templates(policy, scheme)?;
        self.generate_key_pair(scheme, &public_template, &private_template)
    }

    /// Start a signature with the private `key`.
    ///
    /// Fails with [`HError::OperationActive`] if a signature is already
    /// initialized, without calling the token.
    pub fn sign_init(&self, scheme: &SignatureScheme, key: &KeyHandle<'_>) -> HResult<()> {
        self.ensure_owned(key)?;
        self.ensure_authenticated()?;
        if key.class() != ObjectClass::PrivateKey {
            return Err(HError::AttributeNotApplicable {
                attribute: AttributeType::Sign,
                class: key.class(),
            });
        }
        if self.signing.get() == OperationState::Initialized {
            return Err(HError::OperationActive(Operation::Sign));
        }
        self.backend()
            .sign_init(self.handle(), &scheme.sign(), key.handle())
            .map_err(|rv| HError::token(Step::SignInit, rv))?;
        self.signing.set(OperationState::Initialized);
        Ok(())
    }

    /// Sign `data` in a single part. The operation is over whatever the outcome.
    pub fn sign(&self, data: &[u8]) -> HResult<Vec<u8>> {
        self.ensure_authenticated()?;
        if self.signing.get() != OperationState::Initialized {
            return Err(HError::NotInitialized(Operation::Sign));
        }
        self.signing.set(OperationState::Idle);
        let signature = self
            .backend()
            .sign(self.handle(), data)
            .map_err(|rv| HError::token(Step::Sign, rv))?;
        debug!("Signed {} bytes: {}", data.len(), hex::encode(&signature));
        Ok(signature)
    }

    /// Start a verification with the public `key`.
    pub fn verify_init(&self, scheme: &SignatureScheme, key: &KeyHandle<'_>) -> HResult<()> {
        self.ensure_owned(key)?;
        self.ensure_authenticated()?;
        if key.class() != ObjectClass::PublicKey {
            return Err(HError::AttributeNotApplicable {
                attribute: AttributeType::Verify,
                class: key.class(),
            });
        }
        if self.verifying.get() == OperationState::Initialized {
            return Err(HError::OperationActive(Operation::Verify));
        }
        self.backend()
            .verify_init(self.handle(), &scheme.sign(), key.handle())
            .map_err(|rv| HError::token(Step::VerifyInit, rv))?;
        self.verifying.set(OperationState::Initialized);
        Ok(())
    }

    /// Verify `signature` over `data`.
    ///
    /// An invalid signature is a [`Verification::Failed`] result, not an error.
    /// Any other token failure is an error.
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> HResult<Verification> {
        self.ensure_authenticated()?;
        if self.verifying.get() != OperationState::Initialized {
            return Err(HError::NotInitialized(Operation::Verify));
        }
        self.verifying.set(OperationState::Idle);
        let verification = match self.backend().verify(self.handle(), data, signature) {
            Ok(()) => Verification::Verified,
            Err(CKR_SIGNATURE_INVALID | CKR_SIGNATURE_LEN_RANGE) => Verification::Failed,
            Err(rv) => return Err(HError::token(Step::Verify, rv)),
        };
        debug!("Signature verification: {verification}");
        Ok(verification)
    }

    /// Sign `data` with the private half of `key_pair`, using the scheme it was generated with
    pub fn sign_message(&self, key_pair: &KeyPair<'_>, data: &[u8]) -> HResult<Vec<u8>> {
        self.sign_init(key_pair.scheme(), key_pair.private_key())?;
        self.sign(data)
    }

    /// Verify with the public half of `key_pair`, using the scheme it was generated with
    pub fn verify_message(
        &self,
        key_pair: &KeyPair<'_>,
        data: &[u8],
        signature: &[u8],
    ) -> HResult<Verification> {
        self.verify_init(key_pair.scheme(), key_pair.public_key())?;
        self.verify(data, signature)
    }
}
