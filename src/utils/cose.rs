//! COSE_Sign1 and COSE_Mac0 messages (RFC 8152) as used by ISO 18013-5:
//! construction, signing (locally or through an external signer), MAC
//! computation, and verification including trust-anchor validation of the
//! `x5chain` header.

use std::marker::PhantomData;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ciborium::value::Value;
use coset::{
    iana, AsCborValue, CoseMac0, CoseMac0Builder, CoseSign1, CoseSign1Builder, Header, HeaderBuilder, Label,
    ProtectedHeader,
};
use p256::ecdsa::{signature::Verifier, Signature, VerifyingKey};
use ring::hmac;
use serde::{de, de::DeserializeOwned, ser, Deserialize, Deserializer, Serialize, Serializer};

use crate::utils::{
    crypto::CryptoError,
    keys::EcdsaKey,
    serialization::{cbor_deserialize, cbor_serialize, CborError},
    x509::{Certificate, CertificateError, CertificateUsage},
};

/// COSE header label for `x5chain` (RFC 9360).
pub const COSE_X5CHAIN_HEADER_LABEL: i64 = 33;

#[derive(thiserror::Error, Debug)]
pub enum CoseError {
    #[error("COSE message invalid: {0}")]
    Format(coset::CoseError),
    #[error("missing payload")]
    MissingPayload,
    #[error("missing algorithm in protected header")]
    MissingAlgorithm,
    #[error("unsupported algorithm: {0:?}")]
    UnsupportedAlgorithm(coset::Algorithm),
    #[error("signature parse failed: {0}")]
    SignatureParseFailed(#[source] p256::ecdsa::Error),
    #[error("signature invalid: {0}")]
    SignatureInvalid(#[source] p256::ecdsa::Error),
    #[error("MAC invalid")]
    MacInvalid,
    #[error("external signer failed: {0}")]
    Signing(#[source] SignerError),
    #[error("missing x5chain header")]
    MissingX5Chain,
    #[error("malformed x5chain header")]
    MalformedX5Chain,
    #[error("signing certificate error: {0}")]
    Certificate(#[from] CertificateError),
    #[error("CBOR error: {0}")]
    Cbor(#[from] CborError),
    #[error("key conversion error: {0}")]
    Key(#[from] CryptoError),
}

impl From<coset::CoseError> for CoseError {
    fn from(error: coset::CoseError) -> Self {
        CoseError::Format(error)
    }
}

/// Error produced by an external signer, surfaced unmodified.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub struct SignerError(Box<dyn std::error::Error + Send + Sync>);

impl SignerError {
    pub fn new(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        SignerError(error.into())
    }
}

/// External signer receiving only the fully built `Sig_structure` bytes.
/// Must return the raw signature: `r || s` for ES*, 64 bytes for Ed25519.
#[async_trait]
pub trait BasicSigner: Send + Sync {
    async fn sign(&self, sig_structure: &[u8]) -> Result<Vec<u8>, SignerError>;
}

/// External signer receiving the full signing context besides the
/// `Sig_structure` bytes.
#[async_trait]
pub trait ContextualSigner: Send + Sync {
    async fn sign(&self, input: ContextualSignInput<'_>) -> Result<Vec<u8>, SignerError>;
}

pub struct ContextualSignInput<'a> {
    pub sig_structure: &'a [u8],
    pub protected: &'a Header,
    pub unprotected: &'a Header,
    pub algorithm: iana::Algorithm,
    pub payload: &'a [u8],
}

/// External-signer dispatch. The variant is chosen explicitly by the caller;
/// there is no shape inspection or trial invocation.
pub enum CoseSigner<'a> {
    Basic(&'a dyn BasicSigner),
    Contextual(&'a dyn ContextualSigner),
}

/// Public key in COSE_Key format (RFC 8152 §7).
#[derive(Debug, Clone, PartialEq)]
pub struct CoseKey(pub coset::CoseKey);

impl Serialize for CoseKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0
            .clone()
            .to_cbor_value()
            .map_err(ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CoseKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let key = coset::CoseKey::from_cbor_value(value).map_err(de::Error::custom)?;
        Ok(CoseKey(key))
    }
}

/// Wrapper for a COSE message (`CoseSign1` or `CoseMac0`), remembering the
/// type of its payload.
#[derive(Debug, Clone, PartialEq)]
pub struct MdocCose<C, T>(pub C, PhantomData<T>);

impl<C, T> From<C> for MdocCose<C, T> {
    fn from(cose: C) -> Self {
        MdocCose(cose, PhantomData)
    }
}

impl<C, T> Serialize for MdocCose<C, T>
where
    C: coset::AsCborValue + Clone,
{
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0
            .clone()
            .to_cbor_value()
            .map_err(ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de, C, T> Deserialize<'de> for MdocCose<C, T>
where
    C: coset::AsCborValue,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let cose = C::from_cbor_value(value).map_err(de::Error::custom)?;
        Ok(cose.into())
    }
}

/// Clone a COSE message, replacing or removing its (detached) payload.
pub trait ClonePayload {
    fn clone_with_payload(&self, bts: Vec<u8>) -> Self;
    fn clone_without_payload(&self) -> Self;
}

impl<T> ClonePayload for MdocCose<CoseSign1, T> {
    fn clone_with_payload(&self, bts: Vec<u8>) -> Self {
        let mut cose = self.0.clone();
        cose.payload = Some(bts);
        cose.into()
    }

    fn clone_without_payload(&self) -> Self {
        let mut cose = self.0.clone();
        cose.payload = None;
        cose.into()
    }
}

impl<T> ClonePayload for MdocCose<CoseMac0, T> {
    fn clone_with_payload(&self, bts: Vec<u8>) -> Self {
        let mut cose = self.0.clone();
        cose.payload = Some(bts);
        cose.into()
    }

    fn clone_without_payload(&self) -> Self {
        let mut cose = self.0.clone();
        cose.payload = None;
        cose.into()
    }
}

fn protected_header(alg: iana::Algorithm) -> ProtectedHeader {
    ProtectedHeader {
        original_data: None,
        header: HeaderBuilder::new().algorithm(alg).build(),
    }
}

fn is_signing_algorithm(alg: iana::Algorithm) -> bool {
    matches!(
        alg,
        iana::Algorithm::ES256 | iana::Algorithm::ES384 | iana::Algorithm::ES512 | iana::Algorithm::EdDSA
    )
}

/// Unprotected header carrying the signing certificate chain (label 33,
/// a single bstr or an array of bstr, leaf first) and optionally a key ID.
pub fn new_certificate_header(x5chain: &[Certificate], kid: Option<Vec<u8>>) -> Header {
    let chain_value = match x5chain {
        [cert] => Value::Bytes(cert.as_bytes().to_vec()),
        certs => Value::Array(certs.iter().map(|cert| Value::Bytes(cert.as_bytes().to_vec())).collect()),
    };

    let mut builder = HeaderBuilder::new().value(COSE_X5CHAIN_HEADER_LABEL, chain_value);
    if let Some(kid) = kid {
        builder = builder.key_id(kid);
    }
    builder.build()
}

impl<T> MdocCose<CoseSign1, T> {
    /// Serialize `obj`, build the `Sig_structure` over it (empty
    /// `external_aad`), and sign with the holder of an ECDSA private key.
    /// With `include_payload` false the resulting message has a detached
    /// payload (`null` on the wire).
    pub async fn sign<K: EcdsaKey>(
        obj: &(impl Serialize + Sync),
        unprotected: Header,
        key: &K,
        include_payload: bool,
    ) -> Result<Self, CoseError> {
        let payload = cbor_serialize(obj)?;
        let protected = protected_header(iana::Algorithm::ES256);
        let sig_data = coset::sig_structure_data(
            coset::SignatureContext::CoseSign1,
            protected.clone(),
            None,
            &[],
            &payload,
        );

        let signature = key
            .try_sign(&sig_data)
            .await
            .map_err(|e| CoseError::Signing(SignerError::new(e)))?;

        let mut builder = CoseSign1Builder::new()
            .protected(protected.header)
            .unprotected(unprotected)
            .signature(signature.to_bytes().to_vec());
        if include_payload {
            builder = builder.payload(payload);
        }

        Ok(builder.build().into())
    }

    /// As [`sign`](Self::sign), but the raw signature is produced by an
    /// external signer. `alg` is carried in the protected header and passed
    /// through to contextual signers.
    pub async fn sign_with_signer(
        obj: &(impl Serialize + Sync),
        alg: iana::Algorithm,
        unprotected: Header,
        signer: &CoseSigner<'_>,
        include_payload: bool,
    ) -> Result<Self, CoseError> {
        if !is_signing_algorithm(alg) {
            return Err(CoseError::UnsupportedAlgorithm(coset::Algorithm::Assigned(alg)));
        }

        let payload = cbor_serialize(obj)?;
        let protected = protected_header(alg);
        let sig_data = coset::sig_structure_data(
            coset::SignatureContext::CoseSign1,
            protected.clone(),
            None,
            &[],
            &payload,
        );

        let signature = match signer {
            CoseSigner::Basic(signer) => signer.sign(&sig_data).await,
            CoseSigner::Contextual(signer) => {
                signer
                    .sign(ContextualSignInput {
                        sig_structure: &sig_data,
                        protected: &protected.header,
                        unprotected: &unprotected,
                        algorithm: alg,
                        payload: &payload,
                    })
                    .await
            }
        }
        .map_err(CoseError::Signing)?;

        let mut builder = CoseSign1Builder::new()
            .protected(protected.header)
            .unprotected(unprotected)
            .signature(signature);
        if include_payload {
            builder = builder.payload(payload);
        }

        Ok(builder.build().into())
    }

    /// Verify the signature over the reconstructed `Sig_structure` against the
    /// given public key. The payload must be present; re-attach a detached
    /// payload first with [`ClonePayload::clone_with_payload`].
    pub fn verify(&self, key: &VerifyingKey) -> Result<(), CoseError> {
        let alg = self.0.protected.header.alg.as_ref().ok_or(CoseError::MissingAlgorithm)?;
        if *alg != coset::Algorithm::Assigned(iana::Algorithm::ES256) {
            return Err(CoseError::UnsupportedAlgorithm(alg.clone()));
        }
        if self.0.payload.is_none() {
            return Err(CoseError::MissingPayload);
        }

        self.0.verify_signature(&[], |sig, data| {
            let signature = Signature::from_slice(sig).map_err(CoseError::SignatureParseFailed)?;
            key.verify(data, &signature).map_err(CoseError::SignatureInvalid)
        })
    }

    /// Parse the payload without verifying the signature.
    pub fn dangerous_parse_unverified(&self) -> Result<T, CoseError>
    where
        T: DeserializeOwned,
    {
        let payload = self.0.payload.as_ref().ok_or(CoseError::MissingPayload)?;
        Ok(cbor_deserialize(payload)?)
    }

    /// The certificate chain from the `x5chain` header, leaf first.
    pub fn x5chain(&self) -> Result<Vec<Certificate>, CoseError> {
        let value = self
            .0
            .unprotected
            .rest
            .iter()
            .chain(self.0.protected.header.rest.iter())
            .find(|(label, _)| *label == Label::Int(COSE_X5CHAIN_HEADER_LABEL))
            .map(|(_, value)| value)
            .ok_or(CoseError::MissingX5Chain)?;

        match value {
            Value::Bytes(bts) => Ok(vec![Certificate::from(bts.clone())]),
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_bytes()
                        .map(|bts| Certificate::from(bts.clone()))
                        .ok_or(CoseError::MalformedX5Chain)
                })
                .collect(),
            _ => Err(CoseError::MalformedX5Chain),
        }
    }

    /// The signing (leaf) certificate from the `x5chain` header.
    pub fn signing_cert(&self) -> Result<Certificate, CoseError> {
        let mut chain = self.x5chain()?;
        if chain.is_empty() {
            return Err(CoseError::MissingX5Chain);
        }
        Ok(chain.swap_remove(0))
    }

    /// Validate the `x5chain` against the trust anchors at time `time`, then
    /// verify the signature with the leaf certificate's public key, and
    /// return the parsed payload.
    pub fn verify_against_trust_anchors(
        &self,
        usage: CertificateUsage,
        time: DateTime<Utc>,
        trust_anchors: &[Certificate],
    ) -> Result<T, CoseError>
    where
        T: DeserializeOwned,
    {
        let chain = self.x5chain()?;
        let (leaf, intermediates) = chain.split_first().ok_or(CoseError::MissingX5Chain)?;
        leaf.verify(usage, intermediates, time, trust_anchors)?;

        self.verify(&leaf.public_key()?)?;

        self.dangerous_parse_unverified()
    }
}

impl<T> MdocCose<CoseMac0, T> {
    /// Serialize `obj`, build the `MAC_structure` over it (empty
    /// `external_aad`), and compute the HMAC-SHA256 tag.
    pub fn mac(
        obj: &impl Serialize,
        unprotected: Header,
        key: &hmac::Key,
        include_payload: bool,
    ) -> Result<Self, CoseError> {
        let payload = cbor_serialize(obj)?;
        let protected = protected_header(iana::Algorithm::HMAC_256_256);
        let mac_data = coset::mac_structure_data(coset::MacContext::CoseMac0, protected.clone(), &[], &payload);
        let tag = hmac::sign(key, &mac_data);

        let mut builder = CoseMac0Builder::new()
            .protected(protected.header)
            .unprotected(unprotected)
            .tag(tag.as_ref().to_vec());
        if include_payload {
            builder = builder.payload(payload);
        }

        Ok(builder.build().into())
    }

    pub fn verify(&self, key: &hmac::Key) -> Result<(), CoseError> {
        let alg = self.0.protected.header.alg.as_ref().ok_or(CoseError::MissingAlgorithm)?;
        if *alg != coset::Algorithm::Assigned(iana::Algorithm::HMAC_256_256) {
            return Err(CoseError::UnsupportedAlgorithm(alg.clone()));
        }
        if self.0.payload.is_none() {
            return Err(CoseError::MissingPayload);
        }

        self.0
            .verify_tag(&[], |tag, data| hmac::verify(key, data, tag).map_err(|_| CoseError::MacInvalid))
    }
}
