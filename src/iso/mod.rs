//! Data structures defined by ISO 18013-5 (and the ISO 18013-7 OID4VP
//! handover), modelled after their CDDL.

pub mod disclosure;
pub mod engagement;
pub mod mdocs;

pub use disclosure::*;
pub use engagement::*;
pub use mdocs::*;
