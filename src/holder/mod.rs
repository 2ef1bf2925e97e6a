//! Holder software: ingesting issued credentials (including the bare
//! `IssuerSigned` payloads of OID4VCI) and disclosing attributes from them.

mod disclosure;
mod issuer_signed;
mod presentation;

pub use disclosure::DeviceResponseBuilder;
pub use presentation::{Constraints, Field, InputDescriptor, LimitDisclosure, PresentationDefinition};

#[derive(thiserror::Error, Debug)]
pub enum HolderError {
    #[error("missing session transcript")]
    MissingSessionTranscript,
    #[error("missing device authentication method")]
    MissingDeviceAuth,
    #[error("no documents to disclose")]
    NoDocuments,
}
