//! Resolution of an algorithm family and parameter set into the mechanisms a token expects.
//!
//! Tokens disagree on where the ML-DSA parameter set goes. PKCS#11 3.2 puts it in the
//! `CKA_PARAMETER_SET` attribute of the public key template, while some earlier vendor
//! implementations expect it as `CK_ULONG` mechanism parameter data. A [`SignatureScheme`]
//! records which [`ParameterSetConvention`] applies so that key generation, signing and
//! verification always agree.

use std::str::FromStr;

use pkcs11_sys::{CK_MECHANISM_TYPE, CK_ULONG};
use strum::Display;

use crate::{
    HError, HResult,
    pkcs11_ext::{
        CKK_ML_DSA, CKM_ML_DSA, CKM_ML_DSA_KEY_PAIR_GEN, CKP_ML_DSA_44, CKP_ML_DSA_65,
        CKP_ML_DSA_87,
    },
};

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ParameterSet {
    #[strum(serialize = "ML-DSA-44")]
    MlDsa44,
    #[default]
    #[strum(serialize = "ML-DSA-65")]
    MlDsa65,
    #[strum(serialize = "ML-DSA-87")]
    MlDsa87,
}

impl ParameterSet {
    pub const ALL: [Self; 3] = [Self::MlDsa44, Self::MlDsa65, Self::MlDsa87];

    /// The `CKP_ML_DSA_*` value
    #[must_use]
    pub const fn ck_value(self) -> CK_ULONG {
        match self {
            Self::MlDsa44 => CKP_ML_DSA_44,
            Self::MlDsa65 => CKP_ML_DSA_65,
            Self::MlDsa87 => CKP_ML_DSA_87,
        }
    }

    /// Encoded public key length in bytes (FIPS 204, table 2)
    #[must_use]
    pub const fn public_key_len(self) -> usize {
        match self {
            Self::MlDsa44 => 1312,
            Self::MlDsa65 => 1952,
            Self::MlDsa87 => 2592,
        }
    }

    /// Signature length in bytes (FIPS 204, table 2)
    #[must_use]
    pub const fn signature_len(self) -> usize {
        match self {
            Self::MlDsa44 => 2420,
            Self::MlDsa65 => 3309,
            Self::MlDsa87 => 4627,
        }
    }
}

/// Accepts `ML-DSA-65`, `mldsa65`, `ml_dsa_65` or just `65`, case insensitive
impl FromStr for ParameterSet {
    type Err = HError;

    fn from_str(s: &str) -> HResult<Self> {
        let normalized = s
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_ascii_uppercase();
        match normalized.strip_prefix("MLDSA").unwrap_or(&normalized) {
            "44" => Ok(Self::MlDsa44),
            "65" => Ok(Self::MlDsa65),
            "87" => Ok(Self::MlDsa87),
            _ => Err(HError::UnsupportedParameter(format!(
                "unknown ML-DSA parameter set: {s}"
            ))),
        }
    }
}

impl TryFrom<CK_ULONG> for ParameterSet {
    type Error = HError;

    fn try_from(value: CK_ULONG) -> HResult<Self> {
        match value {
            CKP_ML_DSA_44 => Ok(Self::MlDsa44),
            CKP_ML_DSA_65 => Ok(Self::MlDsa65),
            CKP_ML_DSA_87 => Ok(Self::MlDsa87),
            x => Err(HError::UnsupportedParameter(format!(
                "unknown ML-DSA parameter set tag: {x:#x}"
            ))),
        }
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SignatureFamily {
    #[default]
    #[strum(serialize = "ML-DSA")]
    MlDsa,
}

impl SignatureFamily {
    #[must_use]
    pub const fn key_type(self) -> pkcs11_sys::CK_KEY_TYPE {
        match self {
            Self::MlDsa => CKK_ML_DSA,
        }
    }

    #[must_use]
    pub const fn key_gen_mechanism(self) -> CK_MECHANISM_TYPE {
        match self {
            Self::MlDsa => CKM_ML_DSA_KEY_PAIR_GEN,
        }
    }

    #[must_use]
    pub const fn sign_mechanism(self) -> CK_MECHANISM_TYPE {
        match self {
            Self::MlDsa => CKM_ML_DSA,
        }
    }
}

impl FromStr for SignatureFamily {
    type Err = HError;

    fn from_str(s: &str) -> HResult<Self> {
        match s.replace(['-', '_'], "").to_ascii_uppercase().as_str() {
            "MLDSA" => Ok(Self::MlDsa),
            _ => Err(HError::UnsupportedParameter(format!(
                "unknown signature family: {s}"
            ))),
        }
    }
}

/// Where the parameter set is handed to the token
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[strum(serialize_all = "kebab-case")]
pub enum ParameterSetConvention {
    /// `CKA_PARAMETER_SET` on the public key template, mechanisms without parameter
    #[default]
    KeyAttribute,
    /// `CK_ULONG` mechanism parameter at generation and at sign/verify
    MechanismParameter,
}

impl FromStr for ParameterSetConvention {
    type Err = HError;

    fn from_str(s: &str) -> HResult<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "key-attribute" | "attribute" => Ok(Self::KeyAttribute),
            "mechanism-parameter" | "mechanism" => Ok(Self::MechanismParameter),
            _ => Err(HError::UnsupportedParameter(format!(
                "unknown parameter set convention: {s}"
            ))),
        }
    }
}

/// A mechanism and its optional parameter data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MechanismSpec {
    pub mechanism: CK_MECHANISM_TYPE,
    pub parameter: Option<ParameterSet>,
}

/// A fully resolved signature scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureScheme {
    pub family: SignatureFamily,
    pub parameter_set: ParameterSet,
    pub convention: ParameterSetConvention,
}

impl SignatureScheme {
    /// Resolve a scheme, defaulting to ML-DSA-65 when no parameter set is given.
    #[must_use]
    pub fn resolve(
        family: SignatureFamily,
        parameter_set: Option<ParameterSet>,
        convention: ParameterSetConvention,
    ) -> Self {
        Self {
            family,
            parameter_set: parameter_set.unwrap_or_default(),
            convention,
        }
    }

    /// Resolve a scheme from user supplied names
    pub fn parse(
        family: &str,
        parameter_set: Option<&str>,
        convention: Option<&str>,
    ) -> HResult<Self> {
        Ok(Self::resolve(
            family.parse()?,
            parameter_set.map(str::parse).transpose()?,
            convention.map(str::parse).transpose()?.unwrap_or_default(),
        ))
    }

    const fn mechanism_parameter(&self) -> Option<ParameterSet> {
        match self.convention {
            ParameterSetConvention::KeyAttribute => None,
            ParameterSetConvention::MechanismParameter => Some(self.parameter_set),
        }
    }

    #[must_use]
    pub const fn key_gen(&self) -> MechanismSpec {
        MechanismSpec {
            mechanism: self.family.key_gen_mechanism(),
            parameter: self.mechanism_parameter(),
        }
    }

    /// The mechanism used both for signing and for verification
    #[must_use]
    pub const fn sign(&self) -> MechanismSpec {
        MechanismSpec {
            mechanism: self.family.sign_mechanism(),
            parameter: self.mechanism_parameter(),
        }
    }

    /// The parameter set to carry as `CKA_PARAMETER_SET` on the public template, if any
    #[must_use]
    pub const fn template_parameter_set(&self) -> Option<ParameterSet> {
        match self.convention {
            ParameterSetConvention::KeyAttribute => Some(self.parameter_set),
            ParameterSetConvention::MechanismParameter => None,
        }
    }

    /// Mechanisms a slot must list to run this scheme end to end
    #[must_use]
    pub const fn required_mechanisms(&self) -> [CK_MECHANISM_TYPE; 2] {
        [
            self.family.key_gen_mechanism(),
            self.family.sign_mechanism(),
        ]
    }
}

impl std::fmt::Display for SignatureScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.parameter_set, self.convention)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_set_names() {
        for name in ["ML-DSA-44", "mldsa44", "ml_dsa_44", "44"] {
            assert_eq!(name.parse::<ParameterSet>().unwrap(), ParameterSet::MlDsa44);
        }
        assert_eq!(
            "ml-dsa-87".parse::<ParameterSet>().unwrap(),
            ParameterSet::MlDsa87
        );
        assert!(matches!(
            "ML-DSA-99".parse::<ParameterSet>(),
            Err(HError::UnsupportedParameter(_))
        ));
        assert!(matches!(
            ParameterSet::try_from(42),
            Err(HError::UnsupportedParameter(_))
        ));
        for set in ParameterSet::ALL {
            assert_eq!(ParameterSet::try_from(set.ck_value()).unwrap(), set);
            assert_eq!(set.to_string().parse::<ParameterSet>().unwrap(), set);
        }
    }

    #[test]
    fn test_resolve_defaults_to_65() {
        let scheme = SignatureScheme::resolve(
            SignatureFamily::MlDsa,
            None,
            ParameterSetConvention::KeyAttribute,
        );
        assert_eq!(scheme.parameter_set, ParameterSet::MlDsa65);
        assert_eq!(scheme.to_string(), "ML-DSA-65 (key-attribute)");
    }

    #[test]
    fn test_key_attribute_convention() {
        let scheme = SignatureScheme::parse("ML-DSA", Some("87"), Some("key-attribute")).unwrap();
        assert_eq!(
            scheme.key_gen(),
            MechanismSpec {
                mechanism: CKM_ML_DSA_KEY_PAIR_GEN,
                parameter: None
            }
        );
        assert_eq!(scheme.sign().parameter, None);
        assert_eq!(scheme.template_parameter_set(), Some(ParameterSet::MlDsa87));
    }

    #[test]
    fn test_mechanism_parameter_convention() {
        let scheme =
            SignatureScheme::parse("mldsa", Some("ML-DSA-44"), Some("mechanism-parameter"))
                .unwrap();
        assert_eq!(scheme.key_gen().parameter, Some(ParameterSet::MlDsa44));
        assert_eq!(
            scheme.sign(),
            MechanismSpec {
                mechanism: CKM_ML_DSA,
                parameter: Some(ParameterSet::MlDsa44)
            }
        );
        assert_eq!(scheme.template_parameter_set(), None);
        assert_eq!(
            scheme.required_mechanisms(),
            [CKM_ML_DSA_KEY_PAIR_GEN, CKM_ML_DSA]
        );
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!(SignatureScheme::parse("RSA", None, None).is_err());
        assert!(SignatureScheme::parse("ML-DSA", None, Some("inline")).is_err());
    }
}
