use pkcs11_sys::{
    CK_ATTRIBUTE_TYPE, CK_KEY_TYPE, CK_OBJECT_CLASS, CK_ULONG, CKA_ALWAYS_SENSITIVE, CKA_CLASS,
    CKA_EXTRACTABLE, CKA_ID, CKA_KEY_TYPE, CKA_LABEL, CKA_LOCAL, CKA_NEVER_EXTRACTABLE,
    CKA_PRIVATE, CKA_SENSITIVE, CKA_SIGN, CKA_TOKEN, CKA_VALUE, CKA_VERIFY, CKO_PRIVATE_KEY,
    CKO_PUBLIC_KEY,
};
use strum::Display;

use crate::{HError, HResult, pkcs11_ext::CKA_PARAMETER_SET};

/// The two object classes this crate creates
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectClass {
    #[strum(serialize = "public key")]
    PublicKey,
    #[strum(serialize = "private key")]
    PrivateKey,
}

impl ObjectClass {
    #[must_use]
    pub const fn ck_class(self) -> CK_OBJECT_CLASS {
        match self {
            Self::PublicKey => CKO_PUBLIC_KEY,
            Self::PrivateKey => CKO_PRIVATE_KEY,
        }
    }
}

impl TryFrom<CK_OBJECT_CLASS> for ObjectClass {
    type Error = HError;

    fn try_from(class: CK_OBJECT_CLASS) -> HResult<Self> {
        match class {
            CKO_PUBLIC_KEY => Ok(Self::PublicKey),
            CKO_PRIVATE_KEY => Ok(Self::PrivateKey),
            x => Err(HError::AttributeValue {
                attribute: AttributeType::Class,
                reason: format!("unsupported object class {x:#x}"),
            }),
        }
    }
}

#[derive(Debug, Display, PartialEq, Eq, Clone, Copy, Hash)]
pub enum AttributeType {
    #[strum(serialize = "CKA_CLASS")]
    Class,
    #[strum(serialize = "CKA_KEY_TYPE")]
    KeyType,
    #[strum(serialize = "CKA_TOKEN")]
    Token,
    #[strum(serialize = "CKA_PRIVATE")]
    Private,
    #[strum(serialize = "CKA_SENSITIVE")]
    Sensitive,
    #[strum(serialize = "CKA_EXTRACTABLE")]
    Extractable,
    #[strum(serialize = "CKA_NEVER_EXTRACTABLE")]
    NeverExtractable,
    #[strum(serialize = "CKA_ALWAYS_SENSITIVE")]
    AlwaysSensitive,
    #[strum(serialize = "CKA_LOCAL")]
    Local,
    #[strum(serialize = "CKA_SIGN")]
    Sign,
    #[strum(serialize = "CKA_VERIFY")]
    Verify,
    #[strum(serialize = "CKA_LABEL")]
    Label,
    #[strum(serialize = "CKA_ID")]
    Id,
    #[strum(serialize = "CKA_PARAMETER_SET")]
    ParameterSet,
    #[strum(serialize = "CKA_VALUE")]
    Value,
}

impl AttributeType {
    #[must_use]
    pub const fn ck_type(self) -> CK_ATTRIBUTE_TYPE {
        match self {
            Self::Class => CKA_CLASS,
            Self::KeyType => CKA_KEY_TYPE,
            Self::Token => CKA_TOKEN,
            Self::Private => CKA_PRIVATE,
            Self::Sensitive => CKA_SENSITIVE,
            Self::Extractable => CKA_EXTRACTABLE,
            Self::NeverExtractable => CKA_NEVER_EXTRACTABLE,
            Self::AlwaysSensitive => CKA_ALWAYS_SENSITIVE,
            Self::Local => CKA_LOCAL,
            Self::Sign => CKA_SIGN,
            Self::Verify => CKA_VERIFY,
            Self::Label => CKA_LABEL,
            Self::Id => CKA_ID,
            Self::ParameterSet => CKA_PARAMETER_SET,
            Self::Value => CKA_VALUE,
        }
    }

    /// Whether the attribute can be read back from an object of the given class.
    ///
    /// The private key value is never readable, and sign/verify capabilities
    /// only exist on their own half of the pair.
    #[must_use]
    pub const fn readable_from(self, class: ObjectClass) -> bool {
        match (self, class) {
            (
                Self::Class
                | Self::KeyType
                | Self::Token
                | Self::Private
                | Self::Local
                | Self::Label
                | Self::Id
                | Self::ParameterSet,
                _,
            )
            | (Self::Verify | Self::Value, ObjectClass::PublicKey)
            | (
                Self::Sign
                | Self::Sensitive
                | Self::Extractable
                | Self::NeverExtractable
                | Self::AlwaysSensitive,
                ObjectClass::PrivateKey,
            ) => true,
            _ => false,
        }
    }
}

impl TryFrom<CK_ATTRIBUTE_TYPE> for AttributeType {
    type Error = HError;

    fn try_from(type_: CK_ATTRIBUTE_TYPE) -> HResult<Self> {
        match type_ {
            CKA_CLASS => Ok(Self::Class),
            CKA_KEY_TYPE => Ok(Self::KeyType),
            CKA_TOKEN => Ok(Self::Token),
            CKA_PRIVATE => Ok(Self::Private),
            CKA_SENSITIVE => Ok(Self::Sensitive),
            CKA_EXTRACTABLE => Ok(Self::Extractable),
            CKA_NEVER_EXTRACTABLE => Ok(Self::NeverExtractable),
            CKA_ALWAYS_SENSITIVE => Ok(Self::AlwaysSensitive),
            CKA_LOCAL => Ok(Self::Local),
            CKA_SIGN => Ok(Self::Sign),
            CKA_VERIFY => Ok(Self::Verify),
            CKA_LABEL => Ok(Self::Label),
            CKA_ID => Ok(Self::Id),
            CKA_PARAMETER_SET => Ok(Self::ParameterSet),
            CKA_VALUE => Ok(Self::Value),
            x => Err(HError::UnsupportedParameter(format!(
                "unknown attribute type {x:#x}"
            ))),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Attribute {
    Class(ObjectClass),
    KeyType(CK_KEY_TYPE),
    Token(bool),
    Private(bool),
    Sensitive(bool),
    Extractable(bool),
    NeverExtractable(bool),
    AlwaysSensitive(bool),
    Local(bool),
    Sign(bool),
    Verify(bool),
    Label(String),
    Id(Vec<u8>),
    ParameterSet(CK_ULONG),
    Value(Vec<u8>),
}

impl Attribute {
    #[must_use]
    pub const fn attribute_type(&self) -> AttributeType {
        match self {
            Self::Class(_) => AttributeType::Class,
            Self::KeyType(_) => AttributeType::KeyType,
            Self::Token(_) => AttributeType::Token,
            Self::Private(_) => AttributeType::Private,
            Self::Sensitive(_) => AttributeType::Sensitive,
            Self::Extractable(_) => AttributeType::Extractable,
            Self::NeverExtractable(_) => AttributeType::NeverExtractable,
            Self::AlwaysSensitive(_) => AttributeType::AlwaysSensitive,
            Self::Local(_) => AttributeType::Local,
            Self::Sign(_) => AttributeType::Sign,
            Self::Verify(_) => AttributeType::Verify,
            Self::Label(_) => AttributeType::Label,
            Self::Id(_) => AttributeType::Id,
            Self::ParameterSet(_) => AttributeType::ParameterSet,
            Self::Value(_) => AttributeType::Value,
        }
    }

    /// The value as laid out in a `CK_ATTRIBUTE` buffer
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Class(class) => class.ck_class().to_ne_bytes().to_vec(),
            Self::KeyType(v) | Self::ParameterSet(v) => v.to_ne_bytes().to_vec(),
            Self::Token(b)
            | Self::Private(b)
            | Self::Sensitive(b)
            | Self::Extractable(b)
            | Self::NeverExtractable(b)
            | Self::AlwaysSensitive(b)
            | Self::Local(b)
            | Self::Sign(b)
            | Self::Verify(b) => vec![u8::from(*b)],
            Self::Label(label) => label.as_bytes().to_vec(),
            Self::Id(bytes) | Self::Value(bytes) => bytes.clone(),
        }
    }

    /// Parse a value returned by `C_GetAttributeValue`
    pub fn decode(attribute_type: AttributeType, bytes: Vec<u8>) -> HResult<Self> {
        let ulong = |bytes: &[u8]| -> HResult<CK_ULONG> {
            let array = bytes.try_into().map_err(|_| HError::AttributeValue {
                attribute: attribute_type,
                reason: format!(
                    "expected {} bytes, got {}",
                    size_of::<CK_ULONG>(),
                    bytes.len()
                ),
            })?;
            Ok(CK_ULONG::from_ne_bytes(array))
        };
        let bool_ = |bytes: &[u8]| -> HResult<bool> {
            match bytes {
                [b] => Ok(*b != 0),
                _ => Err(HError::AttributeValue {
                    attribute: attribute_type,
                    reason: format!("expected a single byte, got {}", bytes.len()),
                }),
            }
        };
        Ok(match attribute_type {
            AttributeType::Class => Self::Class(ObjectClass::try_from(ulong(&bytes)?)?),
            AttributeType::KeyType => Self::KeyType(ulong(&bytes)?),
            AttributeType::ParameterSet => Self::ParameterSet(ulong(&bytes)?),
            AttributeType::Token => Self::Token(bool_(&bytes)?),
            AttributeType::Private => Self::Private(bool_(&bytes)?),
            AttributeType::Sensitive => Self::Sensitive(bool_(&bytes)?),
            AttributeType::Extractable => Self::Extractable(bool_(&bytes)?),
            AttributeType::NeverExtractable => Self::NeverExtractable(bool_(&bytes)?),
            AttributeType::AlwaysSensitive => Self::AlwaysSensitive(bool_(&bytes)?),
            AttributeType::Local => Self::Local(bool_(&bytes)?),
            AttributeType::Sign => Self::Sign(bool_(&bytes)?),
            AttributeType::Verify => Self::Verify(bool_(&bytes)?),
            AttributeType::Label => Self::Label(String::from_utf8(bytes)?),
            AttributeType::Id => Self::Id(bytes),
            AttributeType::Value => Self::Value(bytes),
        })
    }
}

/// An ordered set of attributes, at most one per attribute type.
///
/// Insertion order is kept since some tokens are sensitive to it,
/// but values are always looked up by type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeTemplate(Vec<Attribute>);

impl AttributeTemplate {
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Insert an attribute, replacing in place any attribute of the same type
    pub fn set(&mut self, attribute: Attribute) -> &mut Self {
        let attribute_type = attribute.attribute_type();
        match self
            .0
            .iter_mut()
            .find(|a| a.attribute_type() == attribute_type)
        {
            Some(existing) => *existing = attribute,
            None => self.0.push(attribute),
        }
        self
    }

    #[must_use]
    pub fn with(mut self, attribute: Attribute) -> Self {
        self.set(attribute);
        self
    }

    #[must_use]
    pub fn get(&self, attribute_type: AttributeType) -> Option<&Attribute> {
        self.0.iter().find(|a| a.attribute_type() == attribute_type)
    }

    #[must_use]
    pub fn contains(&self, attribute_type: AttributeType) -> bool {
        self.get(attribute_type).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.0.iter()
    }

    pub fn types(&self) -> impl Iterator<Item = AttributeType> + '_ {
        self.0.iter().map(Attribute::attribute_type)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn id(&self) -> Option<&[u8]> {
        match self.get(AttributeType::Id)? {
            Attribute::Id(id) => Some(id),
            _ => None,
        }
    }

    #[must_use]
    pub fn label(&self) -> Option<&str> {
        match self.get(AttributeType::Label)? {
            Attribute::Label(label) => Some(label),
            _ => None,
        }
    }

    #[must_use]
    pub fn value(&self) -> Option<&[u8]> {
        match self.get(AttributeType::Value)? {
            Attribute::Value(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn class(&self) -> Option<ObjectClass> {
        match self.get(AttributeType::Class)? {
            Attribute::Class(class) => Some(*class),
            _ => None,
        }
    }

    #[must_use]
    pub fn parameter_set(&self) -> Option<CK_ULONG> {
        match self.get(AttributeType::ParameterSet)? {
            Attribute::ParameterSet(p) => Some(*p),
            _ => None,
        }
    }

    /// The value of a boolean attribute
    #[must_use]
    pub fn flag(&self, attribute_type: AttributeType) -> Option<bool> {
        match self.get(attribute_type)? {
            Attribute::Token(b)
            | Attribute::Private(b)
            | Attribute::Sensitive(b)
            | Attribute::Extractable(b)
            | Attribute::NeverExtractable(b)
            | Attribute::AlwaysSensitive(b)
            | Attribute::Local(b)
            | Attribute::Sign(b)
            | Attribute::Verify(b) => Some(*b),
            _ => None,
        }
    }
}

impl FromIterator<Attribute> for AttributeTemplate {
    fn from_iter<I: IntoIterator<Item = Attribute>>(iter: I) -> Self {
        let mut template = Self::new();
        for attribute in iter {
            template.set(attribute);
        }
        template
    }
}

impl<'a> IntoIterator for &'a AttributeTemplate {
    type IntoIter = std::slice::Iter<'a, Attribute>;
    type Item = &'a Attribute;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
