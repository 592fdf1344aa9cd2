use clap::Parser;
use mldsa_hsm_base::pkcs11_ext::{CKM_ML_DSA, CKM_ML_DSA_KEY_PAIR_GEN};

use crate::{config::HsmConfig, error::result::CliResult};

/// Print the library information and, for each slot with a token,
/// whether it supports ML-DSA key generation and signatures.
#[derive(Parser, Debug)]
#[clap(verbatim_doc_comment)]
pub struct InfoAction;

impl InfoAction {
    /// # Errors
    ///
    /// Returns an error if the library cannot be loaded or queried.
    pub fn process(&self, hsm: &HsmConfig) -> CliResult<()> {
        let provider = softhsm2_pkcs11_loader::load(Some(hsm.lib_path()))?;
        provider.initialize()?;
        println!("{}", provider.get_info()?);
        for slot_id in provider.slots_with_token()? {
            let slot = provider.slot(slot_id)?;
            let mechanisms = slot.supported_mechanisms()?;
            println!(
                "Slot {slot_id}: CKM_ML_DSA_KEY_PAIR_GEN {}, CKM_ML_DSA {}",
                supported(mechanisms.contains(&CKM_ML_DSA_KEY_PAIR_GEN)),
                supported(mechanisms.contains(&CKM_ML_DSA)),
            );
        }
        Ok(provider.finalize()?)
    }
}

const fn supported(yes: bool) -> &'static str {
    if yes { "supported" } else { "not supported" }
}
