//! Implementation of the ISO/IEC 18013-5 mdoc credential format: issuing
//! attributes into a signed Mobile Security Object, selectively disclosing
//! them bound to a session transcript (including the OID4VP binding of
//! ISO 18013-7 and the bare `IssuerSigned` payloads of OID4VCI), and
//! verifying disclosures against X.509 trust anchors.

pub mod errors;
pub mod holder;
pub mod identifiers;
pub mod iso;
pub mod issuer;
pub mod utils;
pub mod verifier;

pub use errors::{Error, ParseError, Result};
pub use iso::*;
