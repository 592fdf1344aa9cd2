use std::fmt::{self, Display, Formatter};

use rand::{TryRngCore, rngs::OsRng};

use crate::{
    HError, HResult, ObjectClass,
    attributes::{Attribute, AttributeTemplate},
    mechanism::SignatureScheme,
};

/// Length of a randomly generated `CKA_ID`
pub const KEY_ID_LENGTH: usize = 16;

/// Suffix appended to the label of the public half of a pair
pub const PUBLIC_LABEL_SUFFIX: &str = "_pk";

/// Generate `T` random bytes from the OS random source
pub fn generate_random_bytes<const T: usize>() -> HResult<[u8; T]> {
    let mut bytes = [0_u8; T];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| HError::Default(format!("Error generating random bytes: {e}")))?;
    Ok(bytes)
}

/// The `CKA_ID` shared by both halves of a key pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyId(Vec<u8>);

impl KeyId {
    pub fn random() -> HResult<Self> {
        Ok(Self(generate_random_bytes::<KEY_ID_LENGTH>()?.to_vec()))
    }

    pub fn new(bytes: Vec<u8>) -> HResult<Self> {
        if bytes.is_empty() {
            return Err(HError::Policy("the key identifier cannot be empty".to_owned()));
        }
        Ok(Self(bytes))
    }

    pub fn from_hex(hex_id: &str) -> HResult<Self> {
        let bytes = hex::decode(hex_id)
            .map_err(|e| HError::Policy(format!("invalid hex key identifier: {e}")))?;
        Self::new(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Display for KeyId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

/// What the generated pair is allowed to be
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPolicy {
    pub label: String,
    pub id: KeyId,
    /// Must stay `false`: the private key never leaves the token
    pub extractable_private: bool,
    /// Persist the pair on the token (`CKA_TOKEN`) rather than in the session only
    pub token: bool,
}

impl KeyPolicy {
    /// A persistent, non-extractable policy with a random identifier
    pub fn new(label: impl Into<String>) -> HResult<Self> {
        Ok(Self {
            label: label.into(),
            id: KeyId::random()?,
            extractable_private: false,
            token: true,
        })
    }

    #[must_use]
    pub fn with_id(mut self, id: KeyId) -> Self {
        self.id = id;
        self
    }

    #[must_use]
    pub const fn session_only(mut self) -> Self {
        self.token = false;
        self
    }

    #[must_use]
    pub fn public_label(&self) -> String {
        format!("{}{PUBLIC_LABEL_SUFFIX}", self.label)
    }
}

/// Build the public and private key templates, in this order.
///
/// The public key is verify-only and not private, the private key is sign-only,
/// private, sensitive and non-extractable. Both carry the same `CKA_ID`.
pub fn build_templates(
    policy: &KeyPolicy,
    scheme: &SignatureScheme,
) -> HResult<(AttributeTemplate, AttributeTemplate)> {
    if policy.extractable_private {
        return Err(HError::Policy(
            "the private key must not be extractable".to_owned(),
        ));
    }
    let key_type = scheme.family.key_type();

    let mut public_template = AttributeTemplate::new()
        .with(Attribute::Class(ObjectClass::PublicKey))
        .with(Attribute::KeyType(key_type));
    if let Some(parameter_set) = scheme.template_parameter_set() {
        public_template.set(Attribute::ParameterSet(parameter_set.ck_value()));
    }
    public_template
        .set(Attribute::Token(policy.token))
        .set(Attribute::Private(false))
        .set(Attribute::Verify(true))
        .set(Attribute::Label(policy.public_label()))
        .set(Attribute::Id(policy.id.as_bytes().to_vec()));

    let private_template = AttributeTemplate::new()
        .with(Attribute::Class(ObjectClass::PrivateKey))
        .with(Attribute::KeyType(key_type))
        .with(Attribute::Token(policy.token))
        .with(Attribute::Private(true))
        .with(Attribute::Sensitive(true))
        .with(Attribute::Sign(true))
        .with(Attribute::Extractable(false))
        .with(Attribute::Label(policy.label.clone()))
        .with(Attribute::Id(policy.id.as_bytes().to_vec()));

    Ok((public_template, private_template))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        AttributeType,
        mechanism::{ParameterSet, ParameterSetConvention, SignatureFamily},
        pkcs11_ext::{CKK_ML_DSA, CKP_ML_DSA_87},
    };

    fn scheme(convention: ParameterSetConvention) -> SignatureScheme {
        SignatureScheme::resolve(SignatureFamily::MlDsa, Some(ParameterSet::MlDsa87), convention)
    }

    #[test]
    fn test_random_key_id() {
        let a = KeyId::random().unwrap();
        let b = KeyId::random().unwrap();
        assert_eq!(a.as_bytes().len(), KEY_ID_LENGTH);
        assert_eq!(a.to_string().len(), 2 * KEY_ID_LENGTH);
        assert_ne!(a, b);
    }

    #[test]
    fn test_key_id_from_hex() {
        let id = KeyId::from_hex("00a1ff").unwrap();
        assert_eq!(id.as_bytes(), &[0x00, 0xa1, 0xff]);
        assert!(matches!(KeyId::from_hex("xyz"), Err(HError::Policy(_))));
        assert!(matches!(KeyId::from_hex(""), Err(HError::Policy(_))));
    }

    #[test]
    fn test_templates_share_identifier_and_lock_private_key() {
        for convention in [
            ParameterSetConvention::KeyAttribute,
            ParameterSetConvention::MechanismParameter,
        ] {
            let policy = KeyPolicy::new("mldsa").unwrap();
            let (public, private) = build_templates(&policy, &scheme(convention)).unwrap();

            assert_eq!(public.id(), Some(policy.id.as_bytes()));
            assert_eq!(public.id(), private.id());

            assert_eq!(public.class(), Some(ObjectClass::PublicKey));
            assert_eq!(public.flag(AttributeType::Private), Some(false));
            assert_eq!(public.flag(AttributeType::Verify), Some(true));
            assert!(!public.contains(AttributeType::Sign));
            assert_eq!(public.label(), Some("mldsa_pk"));

            assert_eq!(private.class(), Some(ObjectClass::PrivateKey));
            assert_eq!(private.flag(AttributeType::Private), Some(true));
            assert_eq!(private.flag(AttributeType::Sensitive), Some(true));
            assert_eq!(private.flag(AttributeType::Extractable), Some(false));
            assert_eq!(private.flag(AttributeType::Sign), Some(true));
            assert!(!private.contains(AttributeType::Verify));
            assert!(!private.contains(AttributeType::ParameterSet));
            assert_eq!(private.label(), Some("mldsa"));

            for template in [&public, &private] {
                assert_eq!(
                    template.get(AttributeType::KeyType),
                    Some(&Attribute::KeyType(CKK_ML_DSA))
                );
                assert_eq!(template.flag(AttributeType::Token), Some(true));
            }
        }
    }

    #[test]
    fn test_parameter_set_follows_convention() {
        let policy = KeyPolicy::new("mldsa").unwrap();
        let (public, _) =
            build_templates(&policy, &scheme(ParameterSetConvention::KeyAttribute)).unwrap();
        assert_eq!(public.parameter_set(), Some(CKP_ML_DSA_87));
        let (public, _) =
            build_templates(&policy, &scheme(ParameterSetConvention::MechanismParameter))
                .unwrap();
        assert_eq!(public.parameter_set(), None);
    }

    #[test]
    fn test_templates_are_deterministic() {
        let policy = KeyPolicy::new("mldsa")
            .unwrap()
            .with_id(KeyId::new(vec![7; 4]).unwrap())
            .session_only();
        let scheme = scheme(ParameterSetConvention::KeyAttribute);
        let first = build_templates(&policy, &scheme).unwrap();
        let second = build_templates(&policy, &scheme).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.0.flag(AttributeType::Token), Some(false));
        assert_eq!(first.1.flag(AttributeType::Token), Some(false));
    }

    #[test]
    fn test_extractable_private_key_is_rejected() {
        let mut policy = KeyPolicy::new("mldsa").unwrap();
        policy.extractable_private = true;
        assert!(matches!(
            build_templates(&policy, &scheme(ParameterSetConvention::KeyAttribute)),
            Err(HError::Policy(_))
        ));
    }
}
