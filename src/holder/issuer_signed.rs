//! The bare `IssuerSigned` wire format of OID4VCI (§A.2.4): the two-key CBOR
//! map `{nameSpaces, issuerAuth}`, base64url-encoded without padding. Unlike
//! a `Document` it carries no `docType`; the document type is agreed upon
//! out-of-band and checked against the MSO on parsing.

use base64::prelude::*;
use ciborium::value::Value;

use crate::{
    errors::{Error, ParseError, Result},
    iso::disclosure::{IssuerSigned, IssuerSignedDocument},
    utils::serialization::{cbor_deserialize, cbor_serialize},
};

impl IssuerSignedDocument {
    /// Encode the issuer-signed part for OID4VCI: exactly
    /// `{"nameSpaces": …, "issuerAuth": …}`, without the document type.
    pub fn encode_issuer_signed(&self) -> Result<Vec<u8>> {
        Ok(cbor_serialize(&self.issuer_signed)?)
    }

    /// [`encode_issuer_signed`](Self::encode_issuer_signed), base64url-encoded
    /// without padding.
    pub fn encode_issuer_signed_base64(&self) -> Result<String> {
        Ok(BASE64_URL_SAFE_NO_PAD.encode(self.encode_issuer_signed()?))
    }

    /// Parse an OID4VCI `IssuerSigned` payload into a document of the given
    /// document type. The MSO must parse, declare version 1.0 and match
    /// `doc_type`; its signature is *not* verified here.
    pub fn parse_issuer_signed(bytes: &[u8], doc_type: &str) -> Result<Self> {
        // Decode to a map first: the required-keys check should fail with a
        // precise error before any field deserialization does.
        let value: Value = cbor_deserialize(bytes).map_err(ParseError::IssuerSigned)?;
        let map = value.as_map().ok_or(ParseError::IssuerSignedStructure)?;
        for key in ["nameSpaces", "issuerAuth"] {
            if !map.iter().any(|(k, _)| k.as_text() == Some(key)) {
                return Err(ParseError::IssuerSignedStructure.into());
            }
        }

        let issuer_signed: IssuerSigned = cbor_deserialize(bytes).map_err(ParseError::IssuerSigned)?;

        let mso = issuer_signed
            .issuer_auth
            .dangerous_parse_unverified()
            .map_err(ParseError::MobileSecurityObject)?;
        if mso.as_ref().doc_type != doc_type {
            return Err(ParseError::DocTypeMismatch {
                expected: doc_type.to_string(),
                found: mso.as_ref().doc_type.clone(),
            }
            .into());
        }

        Ok(IssuerSignedDocument {
            doc_type: doc_type.to_string(),
            issuer_signed,
        })
    }

    pub fn parse_issuer_signed_base64(encoded: &str, doc_type: &str) -> Result<Self> {
        let bytes = BASE64_URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| Error::Parse(ParseError::Base64(e)))?;
        Self::parse_issuer_signed(&bytes, doc_type)
    }
}
