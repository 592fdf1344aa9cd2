//! Public keys as X.509 `SubjectPublicKeyInfo`, in DER and PEM.

use der::{Encode, asn1::BitString, oid::ObjectIdentifier};
use mldsa_hsm_base::ParameterSet;
use pem::{EncodeConfig, LineEnding};
use x509_cert::spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};

use crate::error::result::CliResult;

// NIST CSOR, sigAlgs arc
const ID_ML_DSA_44: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.3.17");
const ID_ML_DSA_65: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.3.18");
const ID_ML_DSA_87: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.3.19");

#[must_use]
pub const fn algorithm_oid(parameter_set: ParameterSet) -> ObjectIdentifier {
    match parameter_set {
        ParameterSet::MlDsa44 => ID_ML_DSA_44,
        ParameterSet::MlDsa65 => ID_ML_DSA_65,
        ParameterSet::MlDsa87 => ID_ML_DSA_87,
    }
}

/// Wrap the raw `CKA_VALUE` of an ML-DSA public key in a `SubjectPublicKeyInfo`.
/// The algorithm identifier has no parameters.
/// The key bytes are taken as they are: their length is checked by the workflow.
pub fn public_key_der(parameter_set: ParameterSet, raw: &[u8]) -> CliResult<Vec<u8>> {
    let spki = SubjectPublicKeyInfoOwned {
        algorithm: AlgorithmIdentifierOwned {
            oid: algorithm_oid(parameter_set),
            parameters: None,
        },
        subject_public_key: BitString::from_bytes(raw)?,
    };
    Ok(spki.to_der()?)
}

pub fn public_key_pem(parameter_set: ParameterSet, raw: &[u8]) -> CliResult<String> {
    let der = public_key_der(parameter_set, raw)?;
    Ok(pem::encode_config(
        &pem::Pem::new("PUBLIC KEY", der),
        EncodeConfig::new().set_line_ending(LineEnding::LF),
    ))
}
