//! Verifier software: validating mdoc disclosures, see
//! [`DeviceResponse::verify()`] for the strict pipeline and [`Verifier`] for
//! the diagnostics-accumulating variant.

use chrono::{DateTime, Utc};
use derive_more::AsRef;
use indexmap::IndexMap;
use p256::{ecdsa::VerifyingKey, PublicKey, SecretKey};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use tracing::{debug, warn};

use crate::{
    errors::Result,
    identifiers::{AttributeIdentifier, AttributeIdentifierHolder},
    iso::{
        disclosure::{DeviceAuth, DeviceResponse, Document, DocumentError, IssuerSigned},
        engagement::{DeviceAuthenticationKeyed, SessionTranscript},
        mdocs::{
            Attributes, DataElementIdentifier, DataElementValue, DigestID, DocType, IssuerSignedItemBytes,
            MobileSecurityObject, NameSpace, ValidityInfo,
        },
    },
    utils::{
        cose::ClonePayload,
        crypto::{cbor_digest, dh_hmac_key},
        serialization::cbor_deserialize,
        x509::{Certificate, CertificateUsage},
    },
};

/// Attributes of an mdoc that was disclosed in a [`DeviceResponse`], as
/// computed by [`DeviceResponse::verify()`]. Grouped per namespace. Validity
/// information and the attribute issuer's common name are also included.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentDisclosedAttributes {
    pub attributes: IndexMap<NameSpace, IndexMap<DataElementIdentifier, DataElementValue>>,
    pub issuer: String,
    pub ca: String,
    pub validity_info: ValidityInfo,
}

/// All attributes that were disclosed in a [`DeviceResponse`], as computed by
/// [`DeviceResponse::verify()`].
pub type DisclosedAttributes = IndexMap<DocType, DocumentDisclosedAttributes>;

#[derive(thiserror::Error, Debug)]
pub enum VerificationError {
    #[error("errors in device response: {0:#?}")]
    DeviceResponseErrors(Vec<DocumentError>),
    #[error("unexpected status: {0}")]
    UnexpectedStatus(u64),
    #[error("no documents found in device response")]
    NoDocuments,
    #[error("inconsistent doctypes: document contained {document}, mso contained {mso}")]
    WrongDocType { document: DocType, mso: DocType },
    #[error("namespace {0} not found in mso")]
    MissingNamespace(NameSpace),
    #[error("digest ID {0} not found in mso")]
    MissingDigestID(DigestID),
    #[error("attribute verification failed: did not hash to the value in the MSO")]
    AttributeVerificationFailed,
    #[error("missing ephemeral reader key")]
    EphemeralKeyMissing,
    #[error("missing session transcript")]
    SessionTranscriptMissing,
    #[error("document carries no device authentication")]
    DeviceAuthMissing,
    #[error("validity error: {0}")]
    Validity(#[from] ValidityError),
    #[error("attributes mismatch: {0:?}")]
    MissingAttributes(Vec<AttributeIdentifier>),
    #[error("unexpected amount of CA Common Names in issuer certificate: expected 1, found {0}")]
    UnexpectedCACommonNameCount(usize),
    #[error("unexpected amount of Common Names in issuer certificate: expected 1, found {0}")]
    UnexpectedIssuerCommonNameCount(usize),
    #[error("verification failed: {}", .0.join("; "))]
    Failed(Vec<String>),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ValidityError {
    #[error("validity parsing failed: {0}")]
    ParsingFailed(#[from] chrono::ParseError),
    #[error("signed at {0}, which is in the future")]
    SignedInFuture(String),
    #[error("not yet valid: valid from {0}")]
    NotYetValid(String),
    #[error("expired at {0}")]
    Expired(String),
}

/// Indicates how a [`ValidityInfo`] should be verified against the current date.
#[derive(Debug, Clone, Copy)]
pub enum ValidityRequirement {
    /// The [`ValidityInfo`] must not be expired, but it is allowed to be not yet valid.
    AllowNotYetValid,
    /// The [`ValidityInfo`] must be valid now and not be expired.
    Valid,
}

impl ValidityInfo {
    pub fn verify_is_valid_at(
        &self,
        time: DateTime<Utc>,
        validity: ValidityRequirement,
    ) -> std::result::Result<(), ValidityError> {
        if time < DateTime::<Utc>::try_from(&self.signed)? {
            Err(ValidityError::SignedInFuture(self.signed.as_str().to_string()))
        } else if matches!(validity, ValidityRequirement::Valid)
            && time < DateTime::<Utc>::try_from(&self.valid_from)?
        {
            Err(ValidityError::NotYetValid(self.valid_from.as_str().to_string()))
        } else if time > DateTime::<Utc>::try_from(&self.valid_until)? {
            Err(ValidityError::Expired(self.valid_until.as_str().to_string()))
        } else {
            Ok(())
        }
    }
}

/// Request for attributes of a single document, ISO 18013-5 §8.3.2.1.2.1.
/// The booleans are the verifier's intent to retain each attribute.
#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ItemsRequest {
    pub doc_type: DocType,
    pub name_spaces: IndexMap<NameSpace, IndexMap<DataElementIdentifier, bool>>,
    pub request_info: Option<IndexMap<String, DataElementValue>>,
}

impl AttributeIdentifierHolder for ItemsRequest {
    fn attribute_identifiers(&self) -> indexmap::IndexSet<AttributeIdentifier> {
        self.name_spaces
            .iter()
            .flat_map(|(namespace, attributes)| {
                attributes.keys().map(|attribute| AttributeIdentifier {
                    doc_type: self.doc_type.clone(),
                    namespace: namespace.clone(),
                    attribute: attribute.clone(),
                })
            })
            .collect()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, AsRef)]
pub struct ItemsRequests(pub Vec<ItemsRequest>);

impl From<Vec<ItemsRequest>> for ItemsRequests {
    fn from(value: Vec<ItemsRequest>) -> Self {
        Self(value)
    }
}

impl ItemsRequests {
    /// Checks that all requested attributes are disclosed in the [`DeviceResponse`].
    pub fn match_against_response(&self, device_response: &DeviceResponse) -> Result<()> {
        let not_found: Vec<_> = self
            .0
            .iter()
            .flat_map(|items_request| {
                device_response
                    .documents
                    .as_ref()
                    .and_then(|docs| docs.iter().find(|doc| doc.doc_type == items_request.doc_type))
                    .map_or_else(
                        // If the entire document is missing then all requested attributes are missing
                        || items_request.attribute_identifiers().into_iter().collect(),
                        |doc| items_request.match_against_document(doc),
                    )
            })
            .collect();

        if not_found.is_empty() {
            Ok(())
        } else {
            Err(VerificationError::MissingAttributes(not_found).into())
        }
    }
}

impl ItemsRequest {
    /// Returns requested attributes, if any, that are not present in the document.
    pub fn match_against_document(&self, document: &Document) -> Vec<AttributeIdentifier> {
        let document_identifiers = document.attribute_identifiers();
        self.attribute_identifiers()
            .into_iter()
            .filter(|attribute| !document_identifiers.contains(attribute))
            .collect()
    }
}

impl DeviceResponse {
    /// Verify a [`DeviceResponse`], returning the verified attributes, grouped
    /// per doctype and namespace.
    ///
    /// # Arguments
    /// - `eph_reader_key` - the ephemeral reader private key in case the mdoc
    ///   is authenticated with a MAC.
    /// - `session_transcript` - the session transcript this disclosure must be
    ///   bound to.
    /// - `time` - the time at which to verify trust chain and validity window.
    /// - `trust_anchors` - trusted CA certificates.
    pub fn verify(
        &self,
        eph_reader_key: Option<&SecretKey>,
        session_transcript: &SessionTranscript,
        time: DateTime<Utc>,
        trust_anchors: &[Certificate],
    ) -> Result<DisclosedAttributes> {
        if let Some(errors) = &self.document_errors {
            return Err(VerificationError::DeviceResponseErrors(errors.clone()).into());
        }
        if self.status != 0 {
            return Err(VerificationError::UnexpectedStatus(self.status).into());
        }

        let documents = self.documents.as_ref().ok_or(VerificationError::NoDocuments)?;
        if documents.is_empty() {
            return Err(VerificationError::NoDocuments.into());
        }

        let mut attrs = IndexMap::new();
        for doc in documents {
            debug!("verifying document with doc_type: {}", doc.doc_type);
            let (doc_type, doc_attrs) = doc
                .verify(eph_reader_key, session_transcript, time, trust_anchors)
                .map_err(|e| {
                    warn!("document verification failed: {e}");
                    e
                })?;
            attrs.insert(doc_type, doc_attrs);
            debug!("document OK");
        }

        Ok(attrs)
    }
}

impl IssuerSigned {
    /// Verify the issuer authentication: trust chain, issuer signature,
    /// validity window, and the digests of all disclosed attributes.
    pub fn verify(
        &self,
        validity: ValidityRequirement,
        time: DateTime<Utc>,
        trust_anchors: &[Certificate],
    ) -> Result<(DocumentDisclosedAttributes, MobileSecurityObject)> {
        let mso = self
            .issuer_auth
            .verify_against_trust_anchors(CertificateUsage::Mdl, time, trust_anchors)?
            .into_inner();

        mso.validity_info
            .verify_is_valid_at(time, validity)
            .map_err(VerificationError::Validity)?;

        let attrs = self
            .name_spaces
            .as_ref()
            .map(|name_spaces| {
                name_spaces
                    .iter()
                    .map(|(namespace, items)| Ok((namespace.clone(), mso.verify_attrs_in_namespace(items, namespace)?)))
                    .collect::<Result<_>>()
            })
            .transpose()?
            .unwrap_or_default();

        let signing_cert = self.issuer_auth.signing_cert()?;
        let mut ca_cns = signing_cert.issuer_common_names()?;
        if ca_cns.len() != 1 {
            return Err(VerificationError::UnexpectedCACommonNameCount(ca_cns.len()).into());
        }

        let mut issuer_cns = signing_cert.common_names()?;
        if issuer_cns.len() != 1 {
            return Err(VerificationError::UnexpectedIssuerCommonNameCount(issuer_cns.len()).into());
        }

        let attributes = DocumentDisclosedAttributes {
            attributes: attrs,
            issuer: issuer_cns.pop().unwrap(),
            ca: ca_cns.pop().unwrap(),
            validity_info: mso.validity_info.clone(),
        };

        Ok((attributes, mso))
    }
}

impl MobileSecurityObject {
    fn verify_attrs_in_namespace(
        &self,
        attrs: &Attributes,
        namespace: &NameSpace,
    ) -> Result<IndexMap<DataElementIdentifier, DataElementValue>> {
        attrs
            .as_ref()
            .iter()
            .map(|item| {
                self.verify_attr_digest(namespace, item)?;
                Ok((
                    item.as_ref().element_identifier.clone(),
                    item.as_ref().element_value.clone(),
                ))
            })
            .collect::<Result<_>>()
    }

    /// Given an [`IssuerSignedItemBytes`], i.e. an attribute, verify that its
    /// digest is correctly included in the MSO.
    fn verify_attr_digest(&self, namespace: &NameSpace, item: &IssuerSignedItemBytes) -> Result<()> {
        let digest_id = item.as_ref().digest_id;
        let digest = self
            .value_digests
            .0
            .get(namespace)
            .ok_or_else(|| VerificationError::MissingNamespace(namespace.clone()))?
            .0
            .get(&digest_id)
            .ok_or(VerificationError::MissingDigestID(digest_id))?;

        if digest.as_slice() != cbor_digest(self.digest_algorithm, item)? {
            return Err(VerificationError::AttributeVerificationFailed.into());
        }
        Ok(())
    }
}

impl Document {
    pub fn verify(
        &self,
        eph_reader_key: Option<&SecretKey>,
        session_transcript: &SessionTranscript,
        time: DateTime<Utc>,
        trust_anchors: &[Certificate],
    ) -> Result<(DocType, DocumentDisclosedAttributes)> {
        debug!("verify issuer_signed");
        let (attrs, mso) = self
            .issuer_signed
            .verify(ValidityRequirement::Valid, time, trust_anchors)?;

        debug!("verifying mso.doc_type matches document doc_type");
        if self.doc_type != mso.doc_type {
            return Err(VerificationError::WrongDocType {
                document: self.doc_type.clone(),
                mso: mso.doc_type,
            }
            .into());
        }

        self.verify_device_auth(&mso, eph_reader_key, session_transcript)?;
        debug!("device authentication valid");

        Ok((mso.doc_type, attrs))
    }

    fn verify_device_auth(
        &self,
        mso: &MobileSecurityObject,
        eph_reader_key: Option<&SecretKey>,
        session_transcript: &SessionTranscript,
    ) -> Result<()> {
        let device_signed = self.device_signed.as_ref().ok_or(VerificationError::DeviceAuthMissing)?;

        debug!("serializing device_authentication");
        let device_authentication_bts = DeviceAuthenticationKeyed::new(
            &self.doc_type,
            session_transcript,
            device_signed.name_spaces.clone(),
        )
        .encoded()?;

        debug!("extracting device_key");
        let device_key = VerifyingKey::try_from(&mso.device_key_info.device_key)?;
        match &device_signed.device_auth {
            DeviceAuth::DeviceSignature(sig) => {
                debug!("verifying DeviceSignature");
                sig.clone_with_payload(device_authentication_bts).verify(&device_key)?;
            }
            DeviceAuth::DeviceMac(mac) => {
                debug!("verifying DeviceMac");
                let device_pubkey = PublicKey::try_from(&mso.device_key_info.device_key)?;
                let mac_key = dh_hmac_key(
                    eph_reader_key.ok_or(VerificationError::EphemeralKeyMissing)?,
                    &device_pubkey,
                    &session_transcript.encoded()?,
                    "EMacKey",
                    32,
                )?;
                mac.clone_with_payload(device_authentication_bts).verify(&mac_key)?;
            }
        }

        Ok(())
    }
}

/// Options for [`Verifier::verify`].
#[derive(Default)]
pub struct VerificationOptions {
    /// The ephemeral reader private key, required when the holder
    /// authenticated with a MAC.
    pub ephemeral_reader_key: Option<SecretKey>,
    pub session_transcript: Option<SessionTranscript>,
    /// The time to verify at; the current time if absent.
    pub now: Option<DateTime<Utc>>,
}

impl VerificationOptions {
    /// Use a session transcript as computed and encoded elsewhere (the plain
    /// CBOR encoding of the `SessionTranscript` array).
    pub fn with_encoded_session_transcript(mut self, bytes: &[u8]) -> Result<Self> {
        self.session_transcript = Some(cbor_deserialize(bytes)?);
        Ok(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Check {
    Parse,
    TrustChain,
    IssuerSignature,
    ValueDigests,
    Validity,
    DeviceAuth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Passed,
    Failed,
    Skipped,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckAssessment {
    pub document: Option<DocType>,
    pub check: Check,
    pub status: CheckStatus,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestCount {
    pub disclosed: usize,
    pub committed: usize,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentDiagnostics {
    pub doc_type: DocType,
    pub issuer: Option<String>,
    pub ca: Option<String>,
    pub certificate_serial: Option<String>,
    pub validity_info: Option<ValidityInfo>,
    pub digest_counts: IndexMap<NameSpace, DigestCount>,
    pub disclosed_attributes: IndexMap<NameSpace, Vec<DataElementIdentifier>>,
}

/// The result of every check the verification pipeline ran, computable even
/// when verification fails.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticInformation {
    pub checks: Vec<CheckAssessment>,
    pub documents: Vec<DocumentDiagnostics>,
}

impl DiagnosticInformation {
    fn push(&mut self, document: Option<&DocType>, check: Check, result: std::result::Result<(), String>) -> bool {
        let (status, reason) = match result {
            Ok(()) => (CheckStatus::Passed, None),
            Err(reason) => (CheckStatus::Failed, Some(reason)),
        };
        let passed = status == CheckStatus::Passed;
        self.checks.push(CheckAssessment {
            document: document.cloned(),
            check,
            status,
            reason,
        });
        passed
    }

    fn skip(&mut self, document: Option<&DocType>, check: Check, reason: &str) {
        self.checks.push(CheckAssessment {
            document: document.cloned(),
            check,
            status: CheckStatus::Skipped,
            reason: Some(reason.to_string()),
        });
    }

    fn failures(&self) -> Vec<String> {
        self.checks
            .iter()
            .filter(|assessment| assessment.status == CheckStatus::Failed)
            .map(|assessment| match (&assessment.document, &assessment.reason) {
                (Some(doc), Some(reason)) => format!("{} ({doc}): {reason}", assessment.check),
                (None, Some(reason)) => format!("{}: {reason}", assessment.check),
                (Some(doc), None) => format!("{} ({doc})", assessment.check),
                (None, None) => assessment.check.to_string(),
            })
            .collect()
    }
}

/// Verifier running the whole pipeline per document, accumulating an
/// assessment per check instead of stopping at the first failure, so that
/// diagnostics are available even for rejected responses.
pub struct Verifier {
    trusted_certificates: Vec<Certificate>,
}

impl Verifier {
    pub fn new(trusted_certificates: Vec<Certificate>) -> Self {
        Verifier { trusted_certificates }
    }

    /// Verify an encoded [`DeviceResponse`]. On success returns the parsed
    /// response; on failure a single summary error. Use
    /// [`get_diagnostic_information`](Self::get_diagnostic_information) for
    /// per-check detail.
    pub fn verify(&self, bytes: &[u8], options: &VerificationOptions) -> Result<DeviceResponse> {
        self.verify_with_diagnostics(bytes, options).0
    }

    pub fn get_diagnostic_information(&self, bytes: &[u8], options: &VerificationOptions) -> DiagnosticInformation {
        self.verify_with_diagnostics(bytes, options).1
    }

    pub fn verify_with_diagnostics(
        &self,
        bytes: &[u8],
        options: &VerificationOptions,
    ) -> (Result<DeviceResponse>, DiagnosticInformation) {
        let mut diagnostics = DiagnosticInformation {
            checks: Vec::new(),
            documents: Vec::new(),
        };

        let response = match DeviceResponse::parse(bytes) {
            Ok(response) => response,
            Err(error) => {
                diagnostics.push(None, Check::Parse, Err(error.to_string()));
                return (
                    Err(VerificationError::Failed(diagnostics.failures()).into()),
                    diagnostics,
                );
            }
        };

        let mut parse_result = Ok(());
        if let Some(errors) = &response.document_errors {
            parse_result = Err(VerificationError::DeviceResponseErrors(errors.clone()).to_string());
        } else if response.status != 0 {
            parse_result = Err(VerificationError::UnexpectedStatus(response.status).to_string());
        } else if response.documents.as_ref().map_or(true, Vec::is_empty) {
            parse_result = Err(VerificationError::NoDocuments.to_string());
        }
        diagnostics.push(None, Check::Parse, parse_result);

        let now = options.now.unwrap_or_else(Utc::now);
        for document in response.documents.iter().flatten() {
            self.assess_document(document, options, now, &mut diagnostics);
        }

        let failures = diagnostics.failures();
        let result = if failures.is_empty() {
            Ok(response)
        } else {
            Err(VerificationError::Failed(failures).into())
        };
        (result, diagnostics)
    }

    fn assess_document(
        &self,
        document: &Document,
        options: &VerificationOptions,
        now: DateTime<Utc>,
        diagnostics: &mut DiagnosticInformation,
    ) {
        let doc_type = &document.doc_type;
        let issuer_auth = &document.issuer_signed.issuer_auth;

        let mso = match issuer_auth.dangerous_parse_unverified() {
            Ok(mso) => {
                let mso = mso.into_inner();
                if mso.doc_type == *doc_type {
                    diagnostics.push(Some(doc_type), Check::Parse, Ok(()));
                    Some(mso)
                } else {
                    let error = VerificationError::WrongDocType {
                        document: doc_type.clone(),
                        mso: mso.doc_type,
                    };
                    diagnostics.push(Some(doc_type), Check::Parse, Err(error.to_string()));
                    None
                }
            }
            Err(error) => {
                diagnostics.push(Some(doc_type), Check::Parse, Err(error.to_string()));
                None
            }
        };

        let signing_cert = issuer_auth.signing_cert().ok();

        // Trust chain and issuer signature are assessed independently: a
        // response signed by an unknown CA still gets its signature checked
        // against the leaf certificate it presented.
        let chain_result = issuer_auth
            .x5chain()
            .and_then(|chain| {
                let (leaf, intermediates) = chain.split_first().ok_or(crate::utils::cose::CoseError::MissingX5Chain)?;
                leaf.verify(CertificateUsage::Mdl, intermediates, now, &self.trusted_certificates)
                    .map_err(Into::into)
            })
            .map_err(|e| e.to_string());
        diagnostics.push(Some(doc_type), Check::TrustChain, chain_result);

        let signature_result = signing_cert
            .as_ref()
            .ok_or_else(|| "no signing certificate".to_string())
            .and_then(|cert| cert.public_key().map_err(|e| e.to_string()))
            .and_then(|key| issuer_auth.verify(&key).map_err(|e| e.to_string()));
        diagnostics.push(Some(doc_type), Check::IssuerSignature, signature_result);

        let mut diag_document = DocumentDiagnostics {
            doc_type: doc_type.clone(),
            issuer: signing_cert
                .as_ref()
                .and_then(|cert| cert.common_names().ok())
                .and_then(|mut names| names.pop()),
            ca: signing_cert
                .as_ref()
                .and_then(|cert| cert.issuer_common_names().ok())
                .and_then(|mut names| names.pop()),
            certificate_serial: signing_cert.as_ref().and_then(|cert| cert.serial().ok()),
            validity_info: mso.as_ref().map(|mso| mso.validity_info.clone()),
            digest_counts: IndexMap::new(),
            disclosed_attributes: IndexMap::new(),
        };

        if let Some(name_spaces) = &document.issuer_signed.name_spaces {
            for (namespace, attributes) in name_spaces {
                diag_document.disclosed_attributes.insert(
                    namespace.clone(),
                    attributes
                        .as_ref()
                        .iter()
                        .map(|item| item.as_ref().element_identifier.clone())
                        .collect(),
                );
                diag_document.digest_counts.insert(
                    namespace.clone(),
                    DigestCount {
                        disclosed: attributes.as_ref().len(),
                        committed: mso
                            .as_ref()
                            .and_then(|mso| mso.value_digests.0.get(namespace))
                            .map(|digests| digests.0.len())
                            .unwrap_or_default(),
                    },
                );
            }
        }

        match &mso {
            Some(mso) => {
                let digests_result = document
                    .issuer_signed
                    .name_spaces
                    .iter()
                    .flatten()
                    .flat_map(|(namespace, attributes)| {
                        attributes.as_ref().iter().map(move |item| (namespace, item))
                    })
                    .try_for_each(|(namespace, item)| {
                        mso.verify_attr_digest(namespace, item).map_err(|e| {
                            format!("{}/{}: {e}", namespace, item.as_ref().element_identifier)
                        })
                    });
                diagnostics.push(Some(doc_type), Check::ValueDigests, digests_result);

                let validity_result = mso
                    .validity_info
                    .verify_is_valid_at(now, ValidityRequirement::Valid)
                    .map_err(|e| e.to_string());
                diagnostics.push(Some(doc_type), Check::Validity, validity_result);
            }
            None => {
                diagnostics.skip(Some(doc_type), Check::ValueDigests, "MSO unavailable");
                diagnostics.skip(Some(doc_type), Check::Validity, "MSO unavailable");
            }
        }

        match (&mso, &document.device_signed, &options.session_transcript) {
            (None, _, _) => diagnostics.skip(Some(doc_type), Check::DeviceAuth, "MSO unavailable"),
            (_, None, _) => diagnostics.skip(Some(doc_type), Check::DeviceAuth, "document carries no deviceSigned"),
            (Some(_), Some(_), None) => {
                diagnostics.push(
                    Some(doc_type),
                    Check::DeviceAuth,
                    Err(VerificationError::SessionTranscriptMissing.to_string()),
                );
            }
            (Some(mso), Some(_), Some(session_transcript)) => {
                let result = document
                    .verify_device_auth(mso, options.ephemeral_reader_key.as_ref(), session_transcript)
                    .map_err(|e| e.to_string());
                diagnostics.push(Some(doc_type), Check::DeviceAuth, result);
            }
        }

        diagnostics.documents.push(diag_document);
    }
}
