use std::ptr;

use libloading::Library;
use pkcs11_sys::{
    CK_ATTRIBUTE, CK_BBOOL, CK_C_CloseSession, CK_C_Finalize, CK_C_GenerateKeyPair,
    CK_C_GetAttributeValue, CK_C_GetInfo, CK_C_GetMechanismList, CK_C_GetSlotList,
    CK_C_INITIALIZE_ARGS, CK_C_Initialize, CK_C_Login, CK_C_Logout, CK_C_OpenSession,
    CK_C_Sign, CK_C_SignInit, CK_C_Verify, CK_C_VerifyInit, CK_FLAGS, CK_INFO, CK_MECHANISM,
    CK_MECHANISM_PTR, CK_MECHANISM_TYPE, CK_OBJECT_HANDLE, CK_SESSION_HANDLE, CK_SLOT_ID,
    CK_ULONG, CK_USER_TYPE, CK_VOID_PTR, CKF_OS_LOCKING_OK, CKR_ARGUMENTS_BAD,
    CKR_ATTRIBUTE_SENSITIVE, CKR_ATTRIBUTE_TYPE_INVALID, CKR_FUNCTION_NOT_SUPPORTED, CKR_OK,
};
use tracing::trace;
use zeroize::Zeroizing;

use crate::{
    HResult, Info, Rv,
    attributes::{AttributeTemplate, AttributeType},
    cryptoki::{CkResult, Cryptoki},
    mechanism::{MechanismSpec, ParameterSet},
    pkcs11_ext::CK_UNAVAILABLE_INFORMATION,
};

/// Call a function of the library and return its `CK_RV`
macro_rules! hsm_rv {
    ($hsm_lib:expr, $function:ident $(, $arg:expr)* $(,)?) => {{
        let function = $hsm_lib.$function.ok_or(CKR_FUNCTION_NOT_SUPPORTED)?;
        let rv = unsafe { function($($arg),*) };
        trace!("{} returned {}", stringify!($function), Rv(rv));
        rv
    }};
}

/// Call a function of the library, returning `Err(rv)` from the enclosing function
/// on anything but `CKR_OK`
macro_rules! hsm_call {
    ($hsm_lib:expr, $function:ident $(, $arg:expr)* $(,)?) => {{
        let rv = hsm_rv!($hsm_lib, $function $(, $arg)*);
        if rv != CKR_OK {
            return Err(rv);
        }
    }};
}

/// The PKCS#11 functions of a dynamically loaded token library.
///
/// Every function used by the session protocol is resolved when the library is
/// loaded, so a library missing one of them fails at load time rather than in
/// the middle of the protocol.
///
/// The library is neither initialized on load nor finalized on drop:
/// that lifecycle belongs to the [`Provider`](crate::Provider) owning it.
pub struct HsmLib {
    _library: Library,
    C_Initialize: CK_C_Initialize,
    C_Finalize: CK_C_Finalize,
    C_GetInfo: CK_C_GetInfo,
    C_GetSlotList: CK_C_GetSlotList,
    C_GetMechanismList: CK_C_GetMechanismList,

    C_OpenSession: CK_C_OpenSession,
    C_CloseSession: CK_C_CloseSession,

    C_Login: CK_C_Login,
    C_Logout: CK_C_Logout,

    C_GenerateKeyPair: CK_C_GenerateKeyPair,
    C_GetAttributeValue: CK_C_GetAttributeValue,

    C_SignInit: CK_C_SignInit,
    C_Sign: CK_C_Sign,
    C_VerifyInit: CK_C_VerifyInit,
    C_Verify: CK_C_Verify,
}

impl HsmLib {
    /// Load the library at `path` and resolve the functions used by the protocol
    pub fn instantiate<P>(path: P) -> HResult<Self>
    where
        P: AsRef<std::ffi::OsStr>,
    {
        unsafe {
            let library = Library::new(path)?;
            let hsm_lib = Self {
                C_Initialize: Some(*library.get(b"C_Initialize")?),
                C_Finalize: Some(*library.get(b"C_Finalize")?),
                C_GetInfo: Some(*library.get(b"C_GetInfo")?),
                C_GetSlotList: Some(*library.get(b"C_GetSlotList")?),
                C_GetMechanismList: Some(*library.get(b"C_GetMechanismList")?),
                C_OpenSession: Some(*library.get(b"C_OpenSession")?),
                C_CloseSession: Some(*library.get(b"C_CloseSession")?),
                C_Login: Some(*library.get(b"C_Login")?),
                C_Logout: Some(*library.get(b"C_Logout")?),
                C_GenerateKeyPair: Some(*library.get(b"C_GenerateKeyPair")?),
                C_GetAttributeValue: Some(*library.get(b"C_GetAttributeValue")?),
                C_SignInit: Some(*library.get(b"C_SignInit")?),
                C_Sign: Some(*library.get(b"C_Sign")?),
                C_VerifyInit: Some(*library.get(b"C_VerifyInit")?),
                C_Verify: Some(*library.get(b"C_Verify")?),
                // we need to keep the library alive
                _library: library,
            };
            Ok(hsm_lib)
        }
    }
}

fn ck_ulong(len: usize) -> CkResult<CK_ULONG> {
    CK_ULONG::try_from(len).map_err(|_| CKR_ARGUMENTS_BAD)
}

fn to_usize(len: CK_ULONG) -> CkResult<usize> {
    usize::try_from(len).map_err(|_| CKR_ARGUMENTS_BAD)
}

/// A `CK_ATTRIBUTE` array and the buffers it points into
struct CkTemplate {
    _values: Vec<Vec<u8>>,
    attributes: Vec<CK_ATTRIBUTE>,
}

impl CkTemplate {
    fn new(template: &AttributeTemplate) -> CkResult<Self> {
        let mut values = template.iter().map(|a| a.encode()).collect::<Vec<_>>();
        let attributes = template
            .iter()
            .zip(values.iter_mut())
            .map(|(attribute, value)| {
                Ok(CK_ATTRIBUTE {
                    type_: attribute.attribute_type().ck_type(),
                    pValue: value.as_mut_ptr().cast(),
                    ulValueLen: ck_ulong(value.len())?,
                })
            })
            .collect::<CkResult<Vec<_>>>()?;
        Ok(Self {
            _values: values,
            attributes,
        })
    }

    fn len(&self) -> CkResult<CK_ULONG> {
        ck_ulong(self.attributes.len())
    }
}

/// Build the `CK_MECHANISM` for `spec` and hand it to `call`.
///
/// The parameter, when present, is a single `CK_ULONG` holding the parameter set.
fn with_mechanism<T>(
    spec: &MechanismSpec,
    call: impl FnOnce(CK_MECHANISM_PTR) -> CkResult<T>,
) -> CkResult<T> {
    let mut parameter: CK_ULONG = spec.parameter.map_or(0, ParameterSet::ck_value);
    let mut mechanism = match spec.parameter {
        Some(_) => CK_MECHANISM {
            mechanism: spec.mechanism,
            pParameter: (&raw mut parameter).cast(),
            ulParameterLen: ck_ulong(size_of::<CK_ULONG>())?,
        },
        None => CK_MECHANISM {
            mechanism: spec.mechanism,
            pParameter: ptr::null_mut(),
            ulParameterLen: 0,
        },
    };
    call(&raw mut mechanism)
}

/// `C_GetAttributeValue` reports attributes it cannot return through these codes
/// while still filling in the others
const fn attribute_rv_ok(rv: pkcs11_sys::CK_RV) -> bool {
    matches!(
        rv,
        CKR_OK | CKR_ATTRIBUTE_SENSITIVE | CKR_ATTRIBUTE_TYPE_INVALID
    )
}

impl Cryptoki for HsmLib {
    fn initialize(&self) -> CkResult<()> {
        let mut init_args = CK_C_INITIALIZE_ARGS {
            CreateMutex: None,
            DestroyMutex: None,
            LockMutex: None,
            UnlockMutex: None,
            flags: CKF_OS_LOCKING_OK,
            pReserved: ptr::null_mut(),
        };
        let init_args: CK_VOID_PTR = (&raw mut init_args).cast();
        hsm_call!(self, C_Initialize, init_args);
        Ok(())
    }

    fn finalize(&self) -> CkResult<()> {
        hsm_call!(self, C_Finalize, ptr::null_mut());
        Ok(())
    }

    fn get_info(&self) -> CkResult<Info> {
        let mut info = CK_INFO::default();
        hsm_call!(self, C_GetInfo, &raw mut info);
        Ok(info.into())
    }

    fn get_slot_list(&self, token_present: bool) -> CkResult<Vec<CK_SLOT_ID>> {
        let token_present = CK_BBOOL::from(token_present);
        let mut count: CK_ULONG = 0;
        hsm_call!(
            self,
            C_GetSlotList,
            token_present,
            ptr::null_mut(),
            &raw mut count
        );
        let mut slots: Vec<CK_SLOT_ID> = vec![0; to_usize(count)?];
        hsm_call!(
            self,
            C_GetSlotList,
            token_present,
            slots.as_mut_ptr(),
            &raw mut count
        );
        slots.truncate(to_usize(count)?);
        Ok(slots)
    }

    fn get_mechanism_list(&self, slot_id: CK_SLOT_ID) -> CkResult<Vec<CK_MECHANISM_TYPE>> {
        let mut count: CK_ULONG = 0;
        hsm_call!(
            self,
            C_GetMechanismList,
            slot_id,
            ptr::null_mut(),
            &raw mut count
        );
        let mut mechanisms: Vec<CK_MECHANISM_TYPE> = vec![0; to_usize(count)?];
        hsm_call!(
            self,
            C_GetMechanismList,
            slot_id,
            mechanisms.as_mut_ptr(),
            &raw mut count
        );
        mechanisms.truncate(to_usize(count)?);
        Ok(mechanisms)
    }

    fn open_session(&self, slot_id: CK_SLOT_ID, flags: CK_FLAGS) -> CkResult<CK_SESSION_HANDLE> {
        let mut session_handle: CK_SESSION_HANDLE = 0;
        hsm_call!(
            self,
            C_OpenSession,
            slot_id,
            flags,
            ptr::null_mut(),
            None,
            &raw mut session_handle
        );
        Ok(session_handle)
    }

    fn close_session(&self, session: CK_SESSION_HANDLE) -> CkResult<()> {
        hsm_call!(self, C_CloseSession, session);
        Ok(())
    }

    fn login(
        &self,
        session: CK_SESSION_HANDLE,
        user_type: CK_USER_TYPE,
        pin: &[u8],
    ) -> CkResult<()> {
        let mut pin_bytes = Zeroizing::new(pin.to_vec());
        let pin_len = ck_ulong(pin_bytes.len())?;
        hsm_call!(
            self,
            C_Login,
            session,
            user_type,
            pin_bytes.as_mut_ptr(),
            pin_len
        );
        Ok(())
    }

    fn logout(&self, session: CK_SESSION_HANDLE) -> CkResult<()> {
        hsm_call!(self, C_Logout, session);
        Ok(())
    }

    fn generate_key_pair(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &MechanismSpec,
        public_template: &AttributeTemplate,
        private_template: &AttributeTemplate,
    ) -> CkResult<(CK_OBJECT_HANDLE, CK_OBJECT_HANDLE)> {
        let mut public_template = CkTemplate::new(public_template)?;
        let mut private_template = CkTemplate::new(private_template)?;
        let public_len = public_template.len()?;
        let private_len = private_template.len()?;
        let mut public_key: CK_OBJECT_HANDLE = 0;
        let mut private_key: CK_OBJECT_HANDLE = 0;
        with_mechanism(mechanism, |mechanism| {
            hsm_call!(
                self,
                C_GenerateKeyPair,
                session,
                mechanism,
                public_template.attributes.as_mut_ptr(),
                public_len,
                private_template.attributes.as_mut_ptr(),
                private_len,
                &raw mut public_key,
                &raw mut private_key
            );
            Ok(())
        })?;
        Ok((public_key, private_key))
    }

    fn get_attribute_value(
        &self,
        session: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
        attribute_types: &[AttributeType],
    ) -> CkResult<Vec<Option<Vec<u8>>>> {
        let mut template = attribute_types
            .iter()
            .map(|attribute_type| CK_ATTRIBUTE {
                type_: attribute_type.ck_type(),
                pValue: ptr::null_mut(),
                ulValueLen: 0,
            })
            .collect::<Vec<_>>();
        let count = ck_ulong(template.len())?;

        // first call: lengths only
        let rv = hsm_rv!(
            self,
            C_GetAttributeValue,
            session,
            object,
            template.as_mut_ptr(),
            count
        );
        if !attribute_rv_ok(rv) {
            return Err(rv);
        }
        let mut values = template
            .iter()
            .map(|attribute| {
                if attribute.ulValueLen == CK_UNAVAILABLE_INFORMATION {
                    Ok(None)
                } else {
                    Ok(Some(vec![0_u8; to_usize(attribute.ulValueLen)?]))
                }
            })
            .collect::<CkResult<Vec<_>>>()?;
        for (attribute, value) in template.iter_mut().zip(values.iter_mut()) {
            if let Some(buffer) = value {
                attribute.pValue = buffer.as_mut_ptr().cast();
            } else {
                attribute.pValue = ptr::null_mut();
                attribute.ulValueLen = 0;
            }
        }

        // second call: values
        let rv = hsm_rv!(
            self,
            C_GetAttributeValue,
            session,
            object,
            template.as_mut_ptr(),
            count
        );
        if !attribute_rv_ok(rv) {
            return Err(rv);
        }
        for (attribute, value) in template.iter().zip(values.iter_mut()) {
            if attribute.ulValueLen == CK_UNAVAILABLE_INFORMATION {
                *value = None;
            } else if let Some(buffer) = value {
                buffer.truncate(to_usize(attribute.ulValueLen)?);
            }
        }
        Ok(values)
    }

    fn sign_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &MechanismSpec,
        key: CK_OBJECT_HANDLE,
    ) -> CkResult<()> {
        with_mechanism(mechanism, |mechanism| {
            hsm_call!(self, C_SignInit, session, mechanism, key);
            Ok(())
        })
    }

    fn sign(&self, session: CK_SESSION_HANDLE, data: &[u8]) -> CkResult<Vec<u8>> {
        let data_len = ck_ulong(data.len())?;
        let mut signature_len: CK_ULONG = 0;
        hsm_call!(
            self,
            C_Sign,
            session,
            data.as_ptr().cast_mut(),
            data_len,
            ptr::null_mut(),
            &raw mut signature_len
        );
        let mut signature = vec![0_u8; to_usize(signature_len)?];
        hsm_call!(
            self,
            C_Sign,
            session,
            data.as_ptr().cast_mut(),
            data_len,
            signature.as_mut_ptr(),
            &raw mut signature_len
        );
        signature.truncate(to_usize(signature_len)?);
        Ok(signature)
    }

    fn verify_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &MechanismSpec,
        key: CK_OBJECT_HANDLE,
    ) -> CkResult<()> {
        with_mechanism(mechanism, |mechanism| {
            hsm_call!(self, C_VerifyInit, session, mechanism, key);
            Ok(())
        })
    }

    fn verify(&self, session: CK_SESSION_HANDLE, data: &[u8], signature: &[u8]) -> CkResult<()> {
        hsm_call!(
            self,
            C_Verify,
            session,
            data.as_ptr().cast_mut(),
            ck_ulong(data.len())?,
            signature.as_ptr().cast_mut(),
            ck_ulong(signature.len())?
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HError;

    #[test]
    fn test_missing_library_fails_at_load() {
        let res = HsmLib::instantiate("/nonexistent/libpkcs11-does-not-exist.so");
        assert!(matches!(res, Err(HError::LibLoading(_))));
    }

    #[test]
    fn test_template_buffers() {
        use crate::{Attribute, ObjectClass};

        let template = AttributeTemplate::new()
            .with(Attribute::Class(ObjectClass::PublicKey))
            .with(Attribute::Verify(true))
            .with(Attribute::Label("abc".to_owned()));
        let ck_template = CkTemplate::new(&template).unwrap();
        assert_eq!(ck_template.len().unwrap(), 3);
        let lengths = ck_template
            .attributes
            .iter()
            .map(|a| a.ulValueLen)
            .collect::<Vec<_>>();
        assert_eq!(lengths, vec![size_of::<CK_ULONG>() as CK_ULONG, 1, 3]);
    }

    /// Read back what the token would see: `(mechanism, ulParameterLen, *pParameter)`
    fn ck_mechanism(spec: &MechanismSpec) -> (CK_ULONG, CK_ULONG, Option<CK_ULONG>) {
        with_mechanism(spec, |mechanism| {
            let mechanism = unsafe { &*mechanism };
            let parameter = if mechanism.pParameter.is_null() {
                None
            } else {
                Some(unsafe { *mechanism.pParameter.cast::<CK_ULONG>() })
            };
            Ok((mechanism.mechanism, mechanism.ulParameterLen, parameter))
        })
        .unwrap()
    }

    #[test]
    fn test_mechanism_parameter_encoding() {
        use crate::{
            ParameterSetConvention, SignatureFamily, SignatureScheme,
            pkcs11_ext::{CKM_ML_DSA, CKM_ML_DSA_KEY_PAIR_GEN},
        };

        for parameter_set in ParameterSet::ALL {
            let scheme = SignatureScheme::resolve(
                SignatureFamily::MlDsa,
                Some(parameter_set),
                ParameterSetConvention::MechanismParameter,
            );
            let ck_parameter = Some(parameter_set.ck_value());
            let ck_len = size_of::<CK_ULONG>() as CK_ULONG;
            assert_eq!(
                ck_mechanism(&scheme.key_gen()),
                (CKM_ML_DSA_KEY_PAIR_GEN, ck_len, ck_parameter)
            );
            assert_eq!(
                ck_mechanism(&scheme.sign()),
                (CKM_ML_DSA, ck_len, ck_parameter)
            );

            let scheme = SignatureScheme::resolve(
                SignatureFamily::MlDsa,
                Some(parameter_set),
                ParameterSetConvention::KeyAttribute,
            );
            assert_eq!(
                ck_mechanism(&scheme.key_gen()),
                (CKM_ML_DSA_KEY_PAIR_GEN, 0, None)
            );
            assert_eq!(ck_mechanism(&scheme.sign()), (CKM_ML_DSA, 0, None));
        }
    }
}
