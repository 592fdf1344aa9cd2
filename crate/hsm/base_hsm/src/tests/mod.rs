#![allow(clippy::unwrap_used, clippy::expect_used)]



use mldsa_hsm_logger::log_init;

use crate::{
    HResult, ParameterSet, ParameterSetConvention, Provider, SignatureFamily, SignatureScheme,
};
pub(crate) use soft_token::SoftToken;

pub(crate) const PIN: &str = "1234";

/// A 23 byte message
pub(crate) const MESSAGE: &[u8] = b"Hello, PKCS#11 ML-DSA!!";

pub(crate) const CONVENTIONS: [ParameterSetConvention; 2] = [
    ParameterSetConvention::KeyAttribute,
    ParameterSetConvention::MechanismParameter,
];

pub(crate) fn scheme(
    parameter_set: ParameterSet,
    convention: ParameterSetConvention,
) -> SignatureScheme {
    SignatureScheme::resolve(SignatureFamily::MlDsa, Some(parameter_set), convention)
}

/// An initialized provider over a fresh soft token, and a handle on that token
pub(crate) fn initialized_provider() -> HResult<(Provider<SoftToken>, SoftToken)> {
    log_init(None);
    let token = SoftToken::new(PIN);
    let provider = Provider::with_backend(token.clone());
    provider.initialize()?;
    Ok((provider, token))
}
