//! Helpers for the integration tests run against a real token.

use crate::{Credential, HError, HResult};

/// The user PIN of the test token, from `HSM_USER_PASSWORD`
pub fn get_hsm_password() -> HResult<Credential> {
    let user_password = std::env::var("HSM_USER_PASSWORD")
        .ok()
        .or_else(|| option_env!("HSM_USER_PASSWORD").map(ToOwned::to_owned))
        .ok_or_else(|| {
            HError::Default(
                "The user password for the HSM is not set. Please set the HSM_USER_PASSWORD \
                 environment variable"
                    .to_owned(),
            )
        })?;
    Ok(Credential::new(user_password))
}

/// The PKCS#11 library to test, from `env_var` or `default`
#[must_use]
pub fn get_hsm_lib_path(env_var: &str, default: &str) -> String {
    std::env::var(env_var).unwrap_or_else(|_| default.to_owned())
}
