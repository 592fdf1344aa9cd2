//! The end to end provisioning workflow: initialize the library, open and
//! authenticate a session on the first slot with a token, generate a key pair,
//! read back the public key, sign a message and verify the signature.
//!
//! Resources are released in reverse acquisition order on every path (logout,
//! close, finalize). The first error is returned, teardown errors that follow
//! it are logged.

use pkcs11_sys::CK_SLOT_ID;
use tracing::{debug, info, warn};

use crate::{
    HError, HResult, UserType,
    attributes::AttributeType,
    cryptoki::Cryptoki,
    mechanism::{ParameterSet, SignatureScheme},
    provider::Provider,
    session::{Credential, Session, Verification},
    templates::{KeyPolicy, build_templates},
};

/// The message signed when none is given
pub const DEFAULT_MESSAGE: &str = "Hello, PKCS#11 ML DSA!";

#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub credential: Credential,
    pub policy: KeyPolicy,
    pub scheme: SignatureScheme,
    pub message: Vec<u8>,
    /// Check the slot lists the required mechanisms before opening the session
    pub check_mechanisms: bool,
}

impl WorkflowConfig {
    /// A configuration signing [`DEFAULT_MESSAGE`] with the mechanism check enabled
    #[must_use]
    pub fn new(credential: Credential, policy: KeyPolicy, scheme: SignatureScheme) -> Self {
        Self {
            credential,
            policy,
            scheme,
            message: DEFAULT_MESSAGE.as_bytes().to_vec(),
            check_mechanisms: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowReport {
    pub slot_id: CK_SLOT_ID,
    /// The label of the public key, as read back from the token
    pub public_label: String,
    pub id: Vec<u8>,
    pub scheme: SignatureScheme,
    /// The raw ML-DSA public key (`CKA_VALUE`)
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
    pub verification: Verification,
}

/// Run the whole workflow against `provider`, finalizing it before returning.
pub fn run<C: Cryptoki>(provider: Provider<C>, config: &WorkflowConfig) -> HResult<WorkflowReport> {
    let outcome = provision(&provider, config);
    if !provider.is_initialized() {
        return outcome;
    }
    let finalized = provider.finalize();
    first_error(outcome, finalized)
}

/// Keep the first error, log the teardown error that follows it
fn first_error<T>(outcome: HResult<T>, teardown: HResult<()>) -> HResult<T> {
    match (outcome, teardown) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) | (Err(e), Ok(())) => Err(e),
        (Err(e), Err(teardown_error)) => {
            warn!("Teardown failed after an error: {teardown_error}");
            Err(e)
        }
    }
}

fn provision<C: Cryptoki>(
    provider: &Provider<C>,
    config: &WorkflowConfig,
) -> HResult<WorkflowReport> {
    provider.initialize()?;
    let slot = provider.first_slot()?;
    info!("Using slot {}", slot.slot_id());
    if config.check_mechanisms {
        slot.check_scheme(&config.scheme)?;
    }
    // templates are checked before anything is created on the token
    build_templates(&config.policy, &config.scheme)?;
    let session = slot.open_session(true)?;
    let outcome = exercise(&session, config);
    let closed = session.close();
    first_error(outcome, closed)
}

fn exercise<C: Cryptoki>(
    session: &Session<'_, C>,
    config: &WorkflowConfig,
) -> HResult<WorkflowReport> {
    session.login(UserType::User, &config.credential)?;

    let key_pair = session.generate_key_pair_with_policy(&config.scheme, &config.policy)?;
    info!(
        "Generated {} key pair with id {}",
        config.scheme, config.policy.id
    );

    let attributes = session.get_attributes(
        key_pair.public_key(),
        &[AttributeType::Id, AttributeType::Label, AttributeType::Value],
    )?;
    let id = attributes
        .id()
        .ok_or(HError::AttributeUnavailable(AttributeType::Id))?
        .to_vec();
    if id != config.policy.id.as_bytes() {
        return Err(HError::AttributeValue {
            attribute: AttributeType::Id,
            reason: format!(
                "expected {}, the token returned {}",
                config.policy.id,
                hex::encode(&id)
            ),
        });
    }
    let public_label = attributes
        .label()
        .ok_or(HError::AttributeUnavailable(AttributeType::Label))?
        .to_owned();
    let public_key = attributes
        .value()
        .ok_or(HError::AttributeUnavailable(AttributeType::Value))?
        .to_vec();
    check_parameter_set(session, &key_pair, &config.scheme)?;
    if public_key.len() != config.scheme.parameter_set.public_key_len() {
        return Err(HError::AttributeValue {
            attribute: AttributeType::Value,
            reason: format!(
                "an {} public key is {} bytes long, the token returned {}",
                config.scheme.parameter_set,
                config.scheme.parameter_set.public_key_len(),
                public_key.len()
            ),
        });
    }

    let signature = session.sign_message(&key_pair, &config.message)?;
    let verification = session.verify_message(&key_pair, &config.message, &signature)?;
    info!("Signature verification: {verification}");

    Ok(WorkflowReport {
        slot_id: session.slot_id(),
        public_label,
        id,
        scheme: config.scheme,
        public_key,
        signature,
        verification,
    })
}

/// Tokens following the mechanism parameter convention may not expose
/// `CKA_PARAMETER_SET`; when they do, it must match the scheme
fn check_parameter_set<C: Cryptoki>(
    session: &Session<'_, C>,
    key_pair: &crate::KeyPair<'_>,
    scheme: &SignatureScheme,
) -> HResult<()> {
    let attributes =
        match session.get_attributes(key_pair.public_key(), &[AttributeType::ParameterSet]) {
            Ok(attributes) => attributes,
            Err(HError::AttributeUnavailable(_)) => {
                debug!("The token does not expose the parameter set of the public key");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
    if let Some(value) = attributes.parameter_set() {
        let parameter_set = ParameterSet::try_from(value)?;
        if parameter_set != scheme.parameter_set {
            return Err(HError::AttributeValue {
                attribute: AttributeType::ParameterSet,
                reason: format!(
                    "expected {}, the token returned {parameter_set}",
                    scheme.parameter_set
                ),
            });
        }
    }
    Ok(())
}
