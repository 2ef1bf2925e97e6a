//! Contracts for ECDSA private keys used to sign mdoc structures.

use async_trait::async_trait;
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};

/// An ECDSA private key that can sign mdoc data structures. The signing
/// operation is async: implementations may have to reach out to secure
/// hardware or a remote HSM.
#[async_trait]
pub trait EcdsaKey: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn verifying_key(&self) -> Result<VerifyingKey, Self::Error>;

    /// Attempt to sign the given message, returning a digital signature on
    /// success, or an error if something went wrong.
    async fn try_sign(&self, msg: &[u8]) -> Result<Signature, Self::Error>;
}

#[async_trait]
impl EcdsaKey for SigningKey {
    type Error = p256::ecdsa::Error;

    async fn verifying_key(&self) -> Result<VerifyingKey, Self::Error> {
        Ok(*self.verifying_key())
    }

    async fn try_sign(&self, msg: &[u8]) -> Result<Signature, Self::Error> {
        p256::ecdsa::signature::Signer::try_sign(self, msg)
    }
}
