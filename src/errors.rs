use crate::{
    holder::HolderError,
    utils::{
        cose::CoseError, crypto::CryptoError, serialization::CborError, x509::CertificateError,
    },
    verifier::VerificationError,
};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("CBOR error: {0}")]
    Cbor(#[from] CborError),
    #[error("COSE error: {0}")]
    Cose(#[from] CoseError),
    #[error("cryptographic error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("certificate error: {0}")]
    Certificate(#[from] CertificateError),
    #[error("{0}")]
    Parse(#[from] ParseError),
    #[error("builder error: {0}")]
    Builder(#[from] BuilderError),
    #[error("holder error: {0}")]
    Holder(#[from] HolderError),
    #[error("verification error: {0}")]
    Verification(#[from] VerificationError),
}

#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    #[error("Unable to decode device response: {0}")]
    DeviceResponse(#[source] CborError),
    #[error("Invalid IssuerSigned structure: missing nameSpaces or issuerAuth")]
    IssuerSignedStructure,
    #[error("Unable to decode IssuerSigned: {0}")]
    IssuerSigned(#[source] CborError),
    #[error("Unable to decode MSO: {0}")]
    MobileSecurityObject(#[source] CoseError),
    #[error("doctype mismatch: expected {expected}, found {found}")]
    DocTypeMismatch { expected: String, found: String },
    #[error("base64 decoding failed: {0}")]
    Base64(#[from] base64::DecodeError),
}

#[derive(thiserror::Error, Debug)]
pub enum BuilderError {
    #[error("Cannot provide both issuerPrivateKey and signer")]
    ConflictingSigners,
    #[error("Either issuerPrivateKey or signer must be provided")]
    MissingSigner,
    #[error("digest algorithm not set")]
    MissingDigestAlgorithm,
    #[error("validity info not set")]
    MissingValidityInfo,
    #[error("device key info not set")]
    MissingDeviceKeyInfo,
    #[error("no attributes to sign")]
    NoAttributes,
    #[error("duplicate element {element} in namespace {namespace}")]
    DuplicateElement { namespace: String, element: String },
    #[error("unrepresentable element value in {namespace}/{element}: {reason}")]
    InvalidElementValue {
        namespace: String,
        element: String,
        reason: &'static str,
    },
    #[error("invalid validity window: requires signed <= validFrom <= validUntil")]
    InvalidValidityWindow,
}
