use std::{
    fmt,
    path::{Path, PathBuf},
};

use clap::{Args, ValueEnum};
use mldsa_hsm_base::{
    Credential, KeyId, KeyPolicy, ParameterSet, ParameterSetConvention, SignatureFamily,
    SignatureScheme, WorkflowConfig,
};
use serde::{Deserialize, Serialize};
use softhsm2_pkcs11_loader::SOFTHSM2_PKCS11_LIB;
use tracing::debug;

use crate::{
    cli_bail,
    error::{
        CliError,
        result::{CliResult, CliResultHelper},
    },
};

pub const MLDSA_HSM_CONF_ENV: &str = "MLDSA_HSM_CONF";

/// Where to find the token and how to log in to it.
///
/// Values not given on the command line or in the environment are read from
/// the TOML configuration file, if any:
/// ```toml
/// hsm_lib = "/usr/local/lib/softhsm/libsofthsm2.so"
/// hsm_password = "12345678"
/// ```
#[derive(Args, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct HsmConfig {
    /// The PKCS#11 library of the HSM.
    /// Defaults to the SoftHSM2 library
    #[clap(verbatim_doc_comment, long, env = "MLDSA_HSM_LIB")]
    pub hsm_lib: Option<String>,

    /// The user PIN of the token
    #[clap(long, env = "HSM_USER_PASSWORD", hide_env_values = true)]
    pub hsm_password: Option<String>,
}

impl fmt::Debug for HsmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HsmConfig")
            .field("hsm_lib", &self.lib_path())
            .field(
                "hsm_password",
                &self.hsm_password.as_ref().map(|_| "****"),
            )
            .finish()
    }
}

impl HsmConfig {
    /// Read a configuration file
    pub fn from_file(path: &Path) -> CliResult<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read the configuration file {}", path.display()))?;
        Ok(toml::from_str(&content)?)
    }

    /// Fill the values missing from `self` with those of the file at `path`,
    /// or of the file named by `MLDSA_HSM_CONF` when `path` is `None`
    pub fn merge_file(self, path: Option<&Path>) -> CliResult<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match std::env::var_os(MLDSA_HSM_CONF_ENV) {
                Some(path) => PathBuf::from(path),
                None => return Ok(self),
            },
        };
        debug!("Reading configuration file {}", path.display());
        let file = Self::from_file(&path)?;
        Ok(Self {
            hsm_lib: self.hsm_lib.or(file.hsm_lib),
            hsm_password: self.hsm_password.or(file.hsm_password),
        })
    }

    #[must_use]
    pub fn lib_path(&self) -> &str {
        self.hsm_lib.as_deref().unwrap_or(SOFTHSM2_PKCS11_LIB)
    }

    pub fn credential(&self) -> CliResult<Credential> {
        let Some(password) = &self.hsm_password else {
            return Err(CliError::Configuration(
                "the user PIN is required: use --hsm-password or set HSM_USER_PASSWORD".to_owned(),
            ));
        };
        Ok(Credential::new(password.as_str()))
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParameterSetArg {
    #[value(name = "ML-DSA-44", alias = "44")]
    MlDsa44,
    #[default]
    #[value(name = "ML-DSA-65", alias = "65")]
    MlDsa65,
    #[value(name = "ML-DSA-87", alias = "87")]
    MlDsa87,
}

impl From<ParameterSetArg> for ParameterSet {
    fn from(arg: ParameterSetArg) -> Self {
        match arg {
            ParameterSetArg::MlDsa44 => Self::MlDsa44,
            ParameterSetArg::MlDsa65 => Self::MlDsa65,
            ParameterSetArg::MlDsa87 => Self::MlDsa87,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConventionArg {
    /// `CKA_PARAMETER_SET` on the public key template
    #[default]
    KeyAttribute,
    /// A `CK_ULONG` mechanism parameter
    MechanismParameter,
}

impl From<ConventionArg> for ParameterSetConvention {
    fn from(arg: ConventionArg) -> Self {
        match arg {
            ConventionArg::KeyAttribute => Self::KeyAttribute,
            ConventionArg::MechanismParameter => Self::MechanismParameter,
        }
    }
}

/// The key pair to generate
#[derive(Args, Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyConfig {
    /// The label of the private key; the public key gets the `_pk` suffix.
    /// Defaults to `mldsa-<random uuid>`
    #[clap(verbatim_doc_comment, long)]
    pub label: Option<String>,

    /// The identifier shared by both keys, in hex. Defaults to 16 random bytes
    #[clap(long)]
    pub id: Option<String>,

    /// The ML-DSA parameter set
    #[clap(long, short = 'p', value_enum, default_value_t = ParameterSetArg::MlDsa65)]
    pub parameter_set: ParameterSetArg,

    /// How the parameter set is passed to the token
    #[clap(long, value_enum, default_value_t = ConventionArg::KeyAttribute)]
    pub convention: ConventionArg,

    /// Create session keys (CKA_TOKEN false), destroyed with the session
    #[clap(long)]
    pub session_only: bool,
}

impl KeyConfig {
    #[must_use]
    pub fn scheme(&self) -> SignatureScheme {
        SignatureScheme::resolve(
            SignatureFamily::MlDsa,
            Some(self.parameter_set.into()),
            self.convention.into(),
        )
    }

    pub fn policy(&self) -> CliResult<KeyPolicy> {
        let label = self
            .label
            .clone()
            .unwrap_or_else(|| format!("mldsa-{}", uuid::Uuid::new_v4()));
        if label.is_empty() {
            cli_bail!("the key label cannot be empty");
        }
        let mut policy = KeyPolicy::new(label)?;
        if let Some(id) = &self.id {
            policy = policy.with_id(KeyId::from_hex(id)?);
        }
        if self.session_only {
            policy = policy.session_only();
        }
        Ok(policy)
    }

    /// The workflow configuration signing `message`
    pub fn workflow_config(
        &self,
        credential: Credential,
        message: Vec<u8>,
        check_mechanisms: bool,
    ) -> CliResult<WorkflowConfig> {
        let mut config = WorkflowConfig::new(credential, self.policy()?, self.scheme());
        config.message = message;
        config.check_mechanisms = check_mechanisms;
        Ok(config)
    }
}
