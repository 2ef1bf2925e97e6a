//! The envelopes in which mdoc attributes travel: the `DeviceResponse` of
//! ISO 18013-5 §8.3.2.1.2.2 holding one or more documents, and the
//! `IssuerSigned`/`DeviceSigned` structures inside them.

use std::borrow::Cow;

use coset::{CoseMac0, CoseSign1};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::{
    errors::ParseError,
    iso::{
        engagement::DeviceAuthenticationBytes,
        mdocs::{DataElementIdentifier, DataElementValue, DocType, IssuerNameSpaces, MobileSecurityObject, NameSpace},
    },
    utils::{
        cose::MdocCose,
        serialization::{cbor_deserialize, cbor_serialize, CborError, RequiredValue, RequiredValueTrait, TaggedBytes},
    },
};

#[derive(Debug, Clone)]
pub struct DeviceResponseVersion;
impl RequiredValueTrait for DeviceResponseVersion {
    type Type = Cow<'static, str>;
    const REQUIRED_VALUE: Self::Type = Cow::Borrowed("1.0");
}

/// A disclosure of mdoc attributes, sent by the holder to the verifier.
/// Also called "MDoc" by the OpenID profiles that carry it.
#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceResponse {
    pub version: RequiredValue<DeviceResponseVersion>,
    pub documents: Option<Vec<Document>>,
    pub document_errors: Option<Vec<DocumentError>>,
    pub status: u64,
}

pub type DocumentError = IndexMap<DocType, ErrorCode>;
pub type ErrorCode = i64;

impl DeviceResponse {
    pub fn new(documents: Vec<Document>) -> Self {
        DeviceResponse {
            version: RequiredValue::default(),
            documents: Some(documents),
            document_errors: None,
            status: 0,
        }
    }

    pub fn parse(bytes: &[u8]) -> std::result::Result<Self, ParseError> {
        cbor_deserialize(bytes).map_err(ParseError::DeviceResponse)
    }

    pub fn encode(&self) -> std::result::Result<Vec<u8>, CborError> {
        cbor_serialize(self)
    }
}

/// A single document inside a [`DeviceResponse`]: issuer-signed attributes,
/// plus device authentication when the holder presented it over a session.
#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub doc_type: DocType,
    pub issuer_signed: IssuerSigned,
    pub device_signed: Option<DeviceSigned>,
}

/// The issuer-signed part of a document: the disclosed attributes and the
/// issuer's signature over the MSO. This is also the OID4VCI credential
/// payload (§A.2.4), which carries no `docType`.
#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IssuerSigned {
    pub name_spaces: Option<IssuerNameSpaces>,
    pub issuer_auth: IssuerAuth,
}

pub type IssuerAuth = MdocCose<CoseSign1, TaggedBytes<MobileSecurityObject>>;

/// A document as issued: issuer-signed attributes bound to a document type,
/// without device authentication.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IssuerSignedDocument {
    pub doc_type: DocType,
    pub issuer_signed: IssuerSigned,
}

impl IssuerSignedDocument {
    /// The names of the namespaces the document holds attributes in.
    pub fn name_spaces(&self) -> Vec<&str> {
        self.issuer_signed
            .name_spaces
            .as_ref()
            .map(|name_spaces| name_spaces.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// The attribute values of the given namespace, by element identifier.
    pub fn issuer_name_space(&self, name_space: &str) -> Option<IndexMap<DataElementIdentifier, DataElementValue>> {
        let attrs = self.issuer_signed.name_spaces.as_ref()?.get(name_space)?;
        Some(
            attrs
                .as_ref()
                .iter()
                .map(|item| {
                    (
                        item.as_ref().element_identifier.clone(),
                        item.as_ref().element_value.clone(),
                    )
                })
                .collect(),
        )
    }
}

impl From<IssuerSignedDocument> for Document {
    fn from(doc: IssuerSignedDocument) -> Self {
        Document {
            doc_type: doc.doc_type,
            issuer_signed: doc.issuer_signed,
            device_signed: None,
        }
    }
}

impl From<Document> for IssuerSignedDocument {
    fn from(doc: Document) -> Self {
        IssuerSignedDocument {
            doc_type: doc.doc_type,
            issuer_signed: doc.issuer_signed,
        }
    }
}

/// The device-signed part of a document: the (usually empty) self-asserted
/// attributes, and the device's proof of possession of the device key over
/// the session transcript.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSigned {
    pub name_spaces: DeviceNameSpacesBytes,
    pub device_auth: DeviceAuth,
}

pub type DeviceNameSpaces = IndexMap<NameSpace, IndexMap<DataElementIdentifier, DataElementValue>>;
pub type DeviceNameSpacesBytes = TaggedBytes<DeviceNameSpaces>;

/// The holder's authentication over the [`DeviceAuthentication`]
/// (see [`crate::iso::engagement`]): either a signature with the device
/// private key, or a MAC keyed via ECDH with the reader's ephemeral key.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum DeviceAuth {
    DeviceSignature(MdocCose<CoseSign1, DeviceAuthenticationBytes<'static>>),
    DeviceMac(MdocCose<CoseMac0, DeviceAuthenticationBytes<'static>>),
}
