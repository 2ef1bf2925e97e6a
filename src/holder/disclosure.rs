//! Disclosure: build an OID4VP-bound [`DeviceResponse`] out of issued
//! documents, filtering attributes down to what the verifier asked for and
//! authenticating with the device key over the session transcript.

use coset::Header;
use indexmap::IndexSet;
use p256::{ecdsa::SigningKey, PublicKey, SecretKey};
use tracing::warn;
use url::Url;

use crate::{
    errors::{Error, Result},
    holder::{
        presentation::{LimitDisclosure, PresentationDefinition},
        HolderError,
    },
    iso::{
        disclosure::{
            DeviceAuth, DeviceNameSpaces, DeviceNameSpacesBytes, DeviceResponse, DeviceSigned, Document, IssuerSigned,
            IssuerSignedDocument,
        },
        engagement::{DeviceAuthenticationKeyed, SessionTranscript},
        mdocs::{Attributes, IssuerNameSpaces},
    },
    utils::{cose::MdocCose, crypto::dh_hmac_key, serialization::TaggedBytes},
};

/// How the holder proves possession of the device key.
enum DeviceAuthMethod {
    /// ECDSA signature with the device private key.
    Signature(SigningKey),
    /// HMAC keyed by ECDH between the device private key and the verifier's
    /// ephemeral reader key, via HKDF with the session transcript as salt.
    Mac {
        device_key: SecretKey,
        reader_key: PublicKey,
    },
}

/// Builder assembling a [`DeviceResponse`] disclosure out of one or more
/// issued documents.
pub struct DeviceResponseBuilder {
    documents: Vec<IssuerSignedDocument>,
    presentation_definition: Option<PresentationDefinition>,
    session_transcript: Option<SessionTranscript>,
    device_auth: Option<DeviceAuthMethod>,
}

impl DeviceResponseBuilder {
    /// Start from an encoded `DeviceResponse` as received from the issuance
    /// flow. The issuer-signed items are retained in their original encoding,
    /// so their digests in the MSO stay valid.
    pub fn from_bytes(mdoc_bytes: &[u8]) -> Result<Self> {
        let mdoc = DeviceResponse::parse(mdoc_bytes)?;
        Ok(Self::from_mdoc(mdoc))
    }

    pub fn from_mdoc(mdoc: DeviceResponse) -> Self {
        let documents = mdoc
            .documents
            .unwrap_or_default()
            .into_iter()
            .map(IssuerSignedDocument::from)
            .collect();
        Self::from_documents(documents)
    }

    pub fn from_document(document: IssuerSignedDocument) -> Self {
        Self::from_documents(vec![document])
    }

    pub fn from_documents(documents: Vec<IssuerSignedDocument>) -> Self {
        DeviceResponseBuilder {
            documents,
            presentation_definition: None,
            session_transcript: None,
            device_auth: None,
        }
    }

    /// Restrict the disclosed attributes to what the verifier's presentation
    /// definition asks for. Documents without a matching input descriptor are
    /// dropped; within a document, attributes are filtered only when the
    /// descriptor has `"limit_disclosure": "required"`.
    pub fn using_presentation_definition(mut self, presentation_definition: PresentationDefinition) -> Self {
        self.presentation_definition = Some(presentation_definition);
        self
    }

    /// Bind the response to an OID4VP session (ISO 18013-7).
    pub fn using_session_transcript_for_oid4vp(
        mut self,
        mdoc_nonce: &str,
        client_id: &str,
        response_uri: &Url,
        verifier_nonce: String,
    ) -> Result<Self> {
        self.session_transcript = Some(SessionTranscript::new_oid4vp(
            client_id,
            response_uri,
            verifier_nonce,
            mdoc_nonce,
        )?);
        Ok(self)
    }

    /// Bind the response to an externally computed session transcript.
    pub fn using_session_transcript(mut self, session_transcript: SessionTranscript) -> Self {
        self.session_transcript = Some(session_transcript);
        self
    }

    pub fn authenticate_with_signature(mut self, device_key: &SigningKey) -> Self {
        self.device_auth = Some(DeviceAuthMethod::Signature(device_key.clone()));
        self
    }

    pub fn authenticate_with_mac(mut self, device_key: &SecretKey, ephemeral_reader_key: &PublicKey) -> Self {
        self.device_auth = Some(DeviceAuthMethod::Mac {
            device_key: device_key.clone(),
            reader_key: *ephemeral_reader_key,
        });
        self
    }

    /// Assemble the `DeviceResponse`: filter the documents, authenticate each
    /// of them over the session transcript, and wrap them in the response
    /// envelope.
    pub async fn sign(self) -> Result<DeviceResponse> {
        let session_transcript = self.session_transcript.ok_or(HolderError::MissingSessionTranscript)?;
        let device_auth = self.device_auth.ok_or(HolderError::MissingDeviceAuth)?;

        let documents = match &self.presentation_definition {
            Some(definition) => filter_documents(self.documents, definition),
            None => self.documents,
        };
        if documents.is_empty() {
            return Err(HolderError::NoDocuments.into());
        }

        let mut signed_documents = Vec::with_capacity(documents.len());
        for document in documents {
            let device_signed = authenticate_document(&document, &session_transcript, &device_auth).await?;
            signed_documents.push(Document {
                doc_type: document.doc_type,
                issuer_signed: document.issuer_signed,
                device_signed: Some(device_signed),
            });
        }

        Ok(DeviceResponse::new(signed_documents))
    }
}

async fn authenticate_document(
    document: &IssuerSignedDocument,
    session_transcript: &SessionTranscript,
    device_auth: &DeviceAuthMethod,
) -> Result<DeviceSigned> {
    // No self-asserted attributes: DeviceNameSpaces is the empty map.
    let name_spaces = DeviceNameSpacesBytes::try_new(DeviceNameSpaces::new())?;
    let device_authentication = TaggedBytes::try_new(crate::utils::serialization::CborSeq(
        DeviceAuthenticationKeyed::new(&document.doc_type, session_transcript, name_spaces.clone()),
    ))?;

    // The COSE payload is detached: `null` on the wire, with the
    // DeviceAuthenticationBytes as the payload of the Sig_structure.
    let device_auth = match device_auth {
        DeviceAuthMethod::Signature(key) => DeviceAuth::DeviceSignature(
            MdocCose::sign(&device_authentication, Header::default(), key, false).await?,
        ),
        DeviceAuthMethod::Mac { device_key, reader_key } => {
            let mac_key = dh_hmac_key(
                device_key,
                reader_key,
                &session_transcript.encoded()?,
                "EMacKey",
                32,
            )
            .map_err(Error::Crypto)?;
            DeviceAuth::DeviceMac(MdocCose::mac(&device_authentication, Header::default(), &mac_key, false)?)
        }
    };

    Ok(DeviceSigned {
        name_spaces,
        device_auth,
    })
}

fn filter_documents(
    documents: Vec<IssuerSignedDocument>,
    definition: &PresentationDefinition,
) -> Vec<IssuerSignedDocument> {
    documents
        .into_iter()
        .filter_map(|document| {
            let Some(descriptor) = definition
                .input_descriptors
                .iter()
                .find(|descriptor| descriptor.id == document.doc_type)
            else {
                warn!("document {} not requested, dropping it", document.doc_type);
                return None;
            };

            if descriptor.constraints.limit_disclosure != Some(LimitDisclosure::Required) {
                return Some(document);
            }

            let requested = descriptor.requested_elements();
            let IssuerSignedDocument { doc_type, issuer_signed } = document;

            let name_spaces: IssuerNameSpaces = issuer_signed
                .name_spaces?
                .into_iter()
                .filter_map(|(namespace, attributes)| {
                    let items: Vec<_> = attributes
                        .0
                        .into_iter()
                        .filter(|item| {
                            requested.contains(&(namespace.clone(), item.as_ref().element_identifier.clone()))
                        })
                        .collect();
                    (!items.is_empty()).then(|| (namespace, Attributes::from(items)))
                })
                .collect();

            let disclosed: IndexSet<_> = name_spaces
                .iter()
                .flat_map(|(namespace, attributes)| {
                    attributes
                        .as_ref()
                        .iter()
                        .map(|item| (namespace.clone(), item.as_ref().element_identifier.clone()))
                })
                .collect();
            for (namespace, element) in requested {
                if !disclosed.contains(&(namespace.clone(), element.clone())) {
                    warn!("requested attribute {namespace}/{element} not present in {doc_type}");
                }
            }

            if name_spaces.is_empty() {
                warn!("no requested attributes present in {doc_type}, dropping it");
                return None;
            }

            Some(IssuerSignedDocument {
                doc_type,
                issuer_signed: IssuerSigned {
                    name_spaces: Some(name_spaces),
                    issuer_auth: issuer_signed.issuer_auth,
                },
            })
        })
        .collect()
}
