//! Data structures containing mdoc attributes and the issuer's commitment to
//! them: [`IssuerSignedItem`] and the [`MobileSecurityObject`] (ISO 18013-5
//! §8.3.2.1.2.3 and §9.1.2.4).

use std::borrow::Cow;

use chrono::{DateTime, SecondsFormat, Utc};
use ciborium::{tag, value::Value};
use derive_more::AsRef;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use serde_with::skip_serializing_none;

use crate::utils::{
    cose::CoseKey,
    serialization::{RequiredValue, RequiredValueTrait, TaggedBytes},
};

pub type DocType = String;
pub type NameSpace = String;
pub type DataElementIdentifier = String;
pub type DataElementValue = Value;
pub type DigestID = u64;

/// An attribute as it is signed by the issuer: the attribute name and value
/// together with the digest ID referring into the MSO's `valueDigests` and the
/// unpredictable `random` salt blinding the digest.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IssuerSignedItem {
    #[serde(rename = "digestID")]
    pub digest_id: DigestID,
    pub random: ByteBuf,
    pub element_identifier: DataElementIdentifier,
    pub element_value: DataElementValue,
}

/// [`IssuerSignedItem`] as it appears on the wire: a Tag 24 data item whose
/// encoded bytes are the input to the digest in the MSO.
pub type IssuerSignedItemBytes = TaggedBytes<IssuerSignedItem>;

/// The issuer-signed attributes of one namespace, in issuance order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, AsRef)]
pub struct Attributes(pub Vec<IssuerSignedItemBytes>);

impl From<Vec<IssuerSignedItemBytes>> for Attributes {
    fn from(items: Vec<IssuerSignedItemBytes>) -> Self {
        Attributes(items)
    }
}

pub type IssuerNameSpaces = IndexMap<NameSpace, Attributes>;

/// An attribute name and value.
///
/// See also [`IssuerSignedItem`], which additionally contains the attribute's
/// `random` and `digestID`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Entry {
    pub name: DataElementIdentifier,
    pub value: DataElementValue,
}

impl From<&Attributes> for Vec<Entry> {
    fn from(attrs: &Attributes) -> Self {
        attrs
            .0
            .iter()
            .map(|issuer_signed| Entry {
                name: issuer_signed.as_ref().element_identifier.clone(),
                value: issuer_signed.as_ref().element_value.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct MobileSecurityObjectVersion;
impl RequiredValueTrait for MobileSecurityObjectVersion {
    type Type = Cow<'static, str>;
    const REQUIRED_VALUE: Self::Type = Cow::Borrowed("1.0");
}

/// The MSO, the payload of the issuer's signature: commits to all attributes
/// through their salted digests, binds the device key, and carries the
/// validity window of the credential.
#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MobileSecurityObject {
    pub version: RequiredValue<MobileSecurityObjectVersion>,
    pub digest_algorithm: DigestAlgorithm,
    pub value_digests: ValueDigests,
    pub device_key_info: DeviceKeyInfo,
    pub doc_type: DocType,
    pub validity_info: ValidityInfo,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum DigestAlgorithm {
    #[serde(rename = "SHA-256")]
    #[strum(serialize = "SHA-256")]
    Sha256,
    #[serde(rename = "SHA-384")]
    #[strum(serialize = "SHA-384")]
    Sha384,
    #[serde(rename = "SHA-512")]
    #[strum(serialize = "SHA-512")]
    Sha512,
}

/// Digests of the [`Attributes`], grouped per namespace and keyed by digest ID.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, AsRef)]
pub struct ValueDigests(pub IndexMap<NameSpace, DigestIDs>);

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, AsRef)]
pub struct DigestIDs(pub IndexMap<DigestID, ByteBuf>);

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceKeyInfo {
    pub device_key: CoseKey,
    pub key_authorizations: Option<KeyAuthorizations>,
    pub key_info: Option<IndexMap<i64, DataElementValue>>,
}

impl From<CoseKey> for DeviceKeyInfo {
    fn from(device_key: CoseKey) -> Self {
        DeviceKeyInfo {
            device_key,
            key_authorizations: None,
            key_info: None,
        }
    }
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KeyAuthorizations {
    pub name_spaces: Option<Vec<NameSpace>>,
    pub data_elements: Option<IndexMap<NameSpace, Vec<DataElementIdentifier>>>,
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidityInfo {
    pub signed: Tdate,
    pub valid_from: Tdate,
    pub valid_until: Tdate,
    pub expected_update: Option<Tdate>,
}

/// An RFC 3339 date-time string carrying CBOR tag 0 (tdate).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tdate(String);

impl Tdate {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<DateTime<Utc>> for Tdate {
    fn from(dt: DateTime<Utc>) -> Self {
        Tdate(dt.to_rfc3339_opts(SecondsFormat::Secs, true))
    }
}

impl TryFrom<&Tdate> for DateTime<Utc> {
    type Error = chrono::ParseError;

    fn try_from(date: &Tdate) -> Result<Self, Self::Error> {
        Ok(DateTime::parse_from_rfc3339(&date.0)?.with_timezone(&Utc))
    }
}

impl Serialize for Tdate {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            self.0.serialize(serializer)
        } else {
            tag::Required::<&String, 0>(&self.0).serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Tdate {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            Ok(Tdate(String::deserialize(deserializer)?))
        } else {
            let tag::Required::<String, 0>(date) = Deserialize::deserialize(deserializer)?;
            Ok(Tdate(date))
        }
    }
}
