//! These tests require a working SoftHSM2 with an initialized token and are gated
//! behind the `softhsm2` feature.
//! To run them, cd into the crate directory and run (replace `XXX` with the user PIN):
//! ```
//! HSM_USER_PASSWORD=XXX cargo test --features softhsm2 -- --ignored
//! ```
//! Set `SOFTHSM2_PKCS11_LIB` if the library is not installed at the default path.
use std::ptr;

use libloading::Library;
use mldsa_hsm_base::{
    AttributeType, HResult, KeyPolicy, ParameterSet, ParameterSetConvention, Provider,
    SignatureFamily, SignatureScheme, UserType, Verification, WorkflowConfig,
    pkcs11_ext::{CKM_ML_DSA, CKM_ML_DSA_KEY_PAIR_GEN},
    run,
    test_helpers::{get_hsm_lib_path, get_hsm_password},
};
use mldsa_hsm_logger::log_init;
use pkcs11_sys::{
    CK_C_INITIALIZE_ARGS, CK_RV, CK_VOID_PTR, CKF_OS_LOCKING_OK, CKR_OK,
};

use crate::SOFTHSM2_PKCS11_LIB;

fn lib_path() -> String {
    get_hsm_lib_path("SOFTHSM2_PKCS11_LIB", SOFTHSM2_PKCS11_LIB)
}

fn initialized() -> HResult<Provider> {
    log_init(None);
    let provider = crate::load(Some(&lib_path()))?;
    provider.initialize()?;
    Ok(provider)
}

fn policy() -> HResult<KeyPolicy> {
    // session objects: the test token is left as found
    Ok(KeyPolicy::new(format!("mldsa-test-{}", uuid::Uuid::new_v4()))?.session_only())
}

#[test]
#[ignore = "Requires Linux, SoftHSM2 library, and HSM environment"]
fn test_hsm_softhsm2_low_level_test() -> HResult<()> {
    let library = unsafe { Library::new(lib_path()) }?;
    let init = unsafe {
        library.get::<unsafe extern "C" fn(p_init_args: CK_VOID_PTR) -> CK_RV>(b"C_Initialize")
    }?;
    let finalize = unsafe {
        library.get::<unsafe extern "C" fn(p_reserved: CK_VOID_PTR) -> CK_RV>(b"C_Finalize")
    }?;

    let mut p_init_args = CK_C_INITIALIZE_ARGS {
        CreateMutex: None,
        DestroyMutex: None,
        LockMutex: None,
        UnlockMutex: None,
        flags: CKF_OS_LOCKING_OK,
        pReserved: ptr::null_mut(),
    };
    let rv = unsafe { init(&raw mut p_init_args as CK_VOID_PTR) };
    assert_eq!(rv, CKR_OK);
    let rv = unsafe { finalize(ptr::null_mut()) };
    assert_eq!(rv, CKR_OK);
    Ok(())
}

#[test]
#[ignore = "Requires Linux, SoftHSM2 library, and HSM environment"]
fn test_hsm_softhsm2_get_info() -> HResult<()> {
    let provider = initialized()?;
    let info = provider.get_info()?;
    println!("{info}");
    assert!(info.cryptoki_version.0 >= 2);
    provider.finalize()
}

#[test]
#[ignore = "Requires Linux, SoftHSM2 library, and HSM environment"]
fn test_hsm_softhsm2_get_mechanisms() -> HResult<()> {
    let provider = initialized()?;
    {
        let slot = provider.first_slot()?;
        let mechanisms = slot.supported_mechanisms()?;
        println!("slot {}: {} mechanisms", slot.slot_id(), mechanisms.len());
        assert!(mechanisms.contains(&CKM_ML_DSA_KEY_PAIR_GEN));
        assert!(mechanisms.contains(&CKM_ML_DSA));
    }
    provider.finalize()
}

#[test]
#[ignore = "Requires Linux, SoftHSM2 library, and HSM environment"]
fn test_hsm_softhsm2_sign_verify() -> HResult<()> {
    let provider = initialized()?;
    {
        let session = provider.first_slot()?.open_session(true)?;
        session.login(UserType::User, &get_hsm_password()?)?;
        for parameter_set in ParameterSet::ALL {
            let scheme = SignatureScheme::resolve(
                SignatureFamily::MlDsa,
                Some(parameter_set),
                ParameterSetConvention::KeyAttribute,
            );
            let key_pair = session.generate_key_pair_with_policy(&scheme, &policy()?)?;
            let attributes =
                session.get_attributes(key_pair.public_key(), &[AttributeType::Value])?;
            assert_eq!(
                attributes.value().map(<[u8]>::len),
                Some(parameter_set.public_key_len())
            );
            let signature = session.sign_message(&key_pair, b"Hello, PKCS#11 ML DSA!")?;
            assert_eq!(
                session.verify_message(&key_pair, b"Hello, PKCS#11 ML DSA!", &signature)?,
                Verification::Verified
            );
            assert_eq!(
                session.verify_message(&key_pair, b"Hello, PKCS#11 ML DSA?", &signature)?,
                Verification::Failed
            );
        }
        session.close()?;
    }
    provider.finalize()
}

#[test]
#[ignore = "Requires Linux, SoftHSM2 library, and HSM environment"]
fn test_hsm_softhsm2_workflow() -> HResult<()> {
    log_init(None);
    let config = WorkflowConfig::new(
        get_hsm_password()?,
        policy()?,
        SignatureScheme::parse("ML-DSA", Some("ML-DSA-65"), None)?,
    );
    let report = run(crate::load(Some(&lib_path()))?, &config)?;
    assert_eq!(report.verification, Verification::Verified);
    assert_eq!(report.id, config.policy.id.as_bytes());
    Ok(())
}
