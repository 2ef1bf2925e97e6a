//! Data structures that bind a disclosure to its session: the
//! [`SessionTranscript`] and the [`DeviceAuthentication`] structure the holder
//! signs (or MACs) with the device key (ISO 18013-5 §9.1.3, with the OID4VP
//! handover of ISO 18013-7).

use std::borrow::Cow;

use ciborium::value::Value;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use url::Url;

use crate::{
    iso::{disclosure::DeviceNameSpacesBytes, mdocs::DocType},
    utils::{
        crypto::sha256,
        serialization::{cbor_serialize, CborError, CborSeq, DeviceAuthenticationString, RequiredValue, TaggedBytes},
    },
};

/// The structure that the holder authenticates when disclosing attributes:
/// a transcript of the session so far, the document type, and the
/// device-signed attributes. Computed independently by the holder and the
/// verifier; never transmitted.
pub type DeviceAuthentication<'a> = CborSeq<DeviceAuthenticationKeyed<'a>>;

/// See [`DeviceAuthentication`].
pub type DeviceAuthenticationBytes<'a> = TaggedBytes<DeviceAuthentication<'a>>;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DeviceAuthenticationKeyed<'a> {
    pub device_authentication: RequiredValue<DeviceAuthenticationString>,
    pub session_transcript: Cow<'a, SessionTranscript>,
    pub doc_type: Cow<'a, str>,
    pub device_name_spaces_bytes: DeviceNameSpacesBytes,
}

impl<'a> DeviceAuthenticationKeyed<'a> {
    pub fn new(
        doc_type: &'a DocType,
        session_transcript: &'a SessionTranscript,
        device_name_spaces_bytes: DeviceNameSpacesBytes,
    ) -> Self {
        DeviceAuthenticationKeyed {
            device_authentication: RequiredValue::default(),
            session_transcript: Cow::Borrowed(session_transcript),
            doc_type: Cow::Borrowed(doc_type.as_str()),
            device_name_spaces_bytes,
        }
    }

    /// The encoded `DeviceAuthenticationBytes`, the detached payload under
    /// the device signature or MAC.
    pub fn encoded(self) -> Result<Vec<u8>, CborError> {
        cbor_serialize(&TaggedBytes::try_new(CborSeq(self))?)
    }
}

/// Transcript of the session so far. Used in [`DeviceAuthentication`].
pub type SessionTranscript = CborSeq<SessionTranscriptKeyed>;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionTranscriptKeyed {
    pub device_engagement_bytes: Option<DeviceEngagementBytes>,
    pub ereader_key_bytes: Option<EReaderKeyBytes>,
    pub handover: Handover,
}

// Engagement only occurs in proximity flows; for the OID4VP flow these two
// are absent and carried here opaquely, preserving their encoding.
pub type DeviceEngagementBytes = TaggedBytes<Value>;
pub type EReaderKeyBytes = TaggedBytes<Value>;

/// Transcript of the first contact between the holder and the verifier,
/// differing per communication channel. Both sides compute this
/// independently; if they disagree, device authentication fails.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Handover {
    QrHandover,
    Oid4vpHandover(CborSeq<Oid4vpHandoverKeyed>),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Oid4vpHandoverKeyed {
    /// `SHA256(cbor_encode([client_id, mdoc_nonce]))`
    pub client_id_hash: ByteBuf,
    /// `SHA256(cbor_encode([response_uri, mdoc_nonce]))`
    pub response_uri_hash: ByteBuf,
    pub nonce: String,
}

impl SessionTranscript {
    /// The session transcript of the ISO 18013-7 OID4VP profile:
    /// `[null, null, OID4VPHandover]`.
    pub fn new_oid4vp(
        client_id: &str,
        response_uri: &Url,
        verifier_nonce: String,
        mdoc_nonce: &str,
    ) -> Result<Self, CborError> {
        let handover = Oid4vpHandoverKeyed {
            client_id_hash: ByteBuf::from(sha256(&cbor_serialize(&[client_id, mdoc_nonce])?)),
            response_uri_hash: ByteBuf::from(sha256(&cbor_serialize(&[response_uri.as_str(), mdoc_nonce])?)),
            nonce: verifier_nonce,
        };

        let transcript = CborSeq(SessionTranscriptKeyed {
            device_engagement_bytes: None,
            ereader_key_bytes: None,
            handover: Handover::Oid4vpHandover(CborSeq(handover)),
        });

        Ok(transcript)
    }

    /// The encoded `SessionTranscriptBytes` (Tag 24), the HKDF salt input of
    /// the device MAC key.
    pub fn encoded(&self) -> Result<Vec<u8>, CborError> {
        cbor_serialize(&TaggedBytes::try_new(self.clone())?)
    }
}
