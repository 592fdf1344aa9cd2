//! Copyright 2024 Cosmian Tech SAS

use mldsa_hsm_base::{HResult, Provider};
use tracing::info;

#[cfg(test)]
#[cfg(feature = "softhsm2")]
mod tests;

/// Where `make install` puts the SoftHSM2 PKCS#11 library
pub const SOFTHSM2_PKCS11_LIB: &str = "/usr/local/lib/softhsm/libsofthsm2.so";

/// Load SoftHSM2 from `path`, or from its default install location.
///
/// SoftHSM2 implements the PKCS#11 3.2 ML-DSA mechanisms with the parameter
/// set carried as a key attribute.
pub fn load(path: Option<&str>) -> HResult<Provider> {
    let path = path.unwrap_or(SOFTHSM2_PKCS11_LIB);
    info!("Loading SoftHSM2 from {path}");
    Provider::load(path)
}
