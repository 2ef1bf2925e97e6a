pub mod cose;
pub mod crypto;
pub mod keys;
pub mod serialization;
pub mod x509;
