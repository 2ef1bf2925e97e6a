//! Cryptographic utilities: digests, ECDH, HKDF and key conversion functions.

use ciborium::value::Value;
use coset::{iana, CoseKeyBuilder, Label};
use p256::{
    ecdh,
    ecdsa::VerifyingKey,
    elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint},
    EncodedPoint, FieldBytes, PublicKey, SecretKey,
};
use rand_core::{OsRng, RngCore};
use ring::{digest, hkdf, hmac};
use serde::Serialize;

use crate::{
    iso::mdocs::DigestAlgorithm,
    utils::{
        cose::CoseKey,
        serialization::{cbor_serialize, CborError},
    },
};

#[derive(thiserror::Error, Debug)]
pub enum CryptoError {
    #[error("HKDF failed")]
    Hkdf,
    #[error("missing coordinate")]
    KeyMissingCoordinate,
    #[error("wrong key type")]
    KeyWrongType,
    #[error("missing key ID")]
    KeyMissingKeyID,
    #[error("unexpected COSE_Key label")]
    KeyUnexpectedCoseLabel,
    #[error("coordinate parse failed")]
    KeyCoordinateParseFailed,
    #[error("JWK parse failed")]
    KeyJwkParseFailed,
    #[error("key parse failed: {0}")]
    KeyParseFailed(#[from] p256::ecdsa::Error),
}

/// Compute the digest of the CBOR encoding of the argument.
pub fn cbor_digest<T: Serialize>(alg: DigestAlgorithm, val: &T) -> Result<Vec<u8>, CborError> {
    Ok(message_digest(alg, cbor_serialize(val)?.as_ref()))
}

pub fn message_digest(alg: DigestAlgorithm, bts: &[u8]) -> Vec<u8> {
    let alg = match alg {
        DigestAlgorithm::Sha256 => &digest::SHA256,
        DigestAlgorithm::Sha384 => &digest::SHA384,
        DigestAlgorithm::Sha512 => &digest::SHA512,
    };
    digest::digest(alg, bts).as_ref().to_vec()
}

pub fn sha256(bts: &[u8]) -> Vec<u8> {
    digest::digest(&digest::SHA256, bts).as_ref().to_vec()
}

/// Fresh random bytes from the operating system CSPRNG.
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut bts = vec![0u8; len];
    OsRng.fill_bytes(&mut bts);
    bts
}

/// The HKDF from RFC 5869.
pub fn hkdf(input_key_material: &[u8], salt: &[u8], info: &str, len: usize) -> Result<Vec<u8>, CryptoError> {
    struct OutputLen(usize);
    impl hkdf::KeyType for OutputLen {
        fn len(&self) -> usize {
            self.0
        }
    }

    let mut bts = vec![0u8; len];
    hkdf::Salt::new(hkdf::HKDF_SHA256, salt)
        .extract(input_key_material)
        .expand(&[info.as_bytes()], OutputLen(len))
        .map_err(|_| CryptoError::Hkdf)?
        .fill(&mut bts)
        .map_err(|_| CryptoError::Hkdf)?;

    Ok(bts)
}

/// Using the HKDF from RFC 5869 with salt `SHA256(salt)`, compute a HMAC key.
pub fn hmac_key(input_key_material: &[u8], salt: &[u8], info: &str, len: usize) -> Result<hmac::Key, CryptoError> {
    let bts = hkdf(input_key_material, sha256(salt).as_slice(), info, len)?;
    let key = hmac::Key::new(hmac::HMAC_SHA256, &bts);
    Ok(key)
}

/// Using Diffie-Hellman and the HKDF from RFC 5869, compute a HMAC key.
pub fn dh_hmac_key(
    privkey: &SecretKey,
    pubkey: &PublicKey,
    salt: &[u8],
    info: &str,
    len: usize,
) -> Result<hmac::Key, CryptoError> {
    let dh = ecdh::diffie_hellman(privkey.to_nonzero_scalar(), pubkey.as_affine());
    hmac_key(dh.raw_secret_bytes().as_ref(), salt, info, len)
}

impl TryFrom<&VerifyingKey> for CoseKey {
    type Error = CryptoError;

    fn try_from(key: &VerifyingKey) -> Result<Self, Self::Error> {
        let encoded_point = key.to_encoded_point(false);
        let x = encoded_point.x().ok_or(CryptoError::KeyMissingCoordinate)?.to_vec();
        let y = encoded_point.y().ok_or(CryptoError::KeyMissingCoordinate)?.to_vec();

        let key = CoseKey(CoseKeyBuilder::new_ec2_pub_key(iana::EllipticCurve::P_256, x, y).build());
        Ok(key)
    }
}

impl TryFrom<&CoseKey> for VerifyingKey {
    type Error = CryptoError;

    fn try_from(key: &CoseKey) -> Result<Self, Self::Error> {
        if key.0.kty != coset::RegisteredLabel::Assigned(iana::KeyType::EC2) {
            return Err(CryptoError::KeyWrongType);
        }

        let crv = key.0.params.first().ok_or(CryptoError::KeyMissingKeyID)?;
        if *crv != (Label::Int(-1), Value::Integer(1.into())) {
            return Err(CryptoError::KeyWrongType);
        }

        let x = key.0.params.get(1).ok_or(CryptoError::KeyMissingCoordinate)?;
        if x.0 != Label::Int(-2) {
            return Err(CryptoError::KeyUnexpectedCoseLabel);
        }
        let y = key.0.params.get(2).ok_or(CryptoError::KeyMissingCoordinate)?;
        if y.0 != Label::Int(-3) {
            return Err(CryptoError::KeyUnexpectedCoseLabel);
        }

        let x = x.1.as_bytes().ok_or(CryptoError::KeyCoordinateParseFailed)?;
        let y = y.1.as_bytes().ok_or(CryptoError::KeyCoordinateParseFailed)?;
        if x.len() != 32 || y.len() != 32 {
            return Err(CryptoError::KeyCoordinateParseFailed);
        }

        let point = EncodedPoint::from_affine_coordinates(
            FieldBytes::from_slice(x),
            FieldBytes::from_slice(y),
            false,
        );
        let key = VerifyingKey::from_encoded_point(&point).map_err(CryptoError::KeyParseFailed)?;
        Ok(key)
    }
}

impl TryFrom<&CoseKey> for PublicKey {
    type Error = CryptoError;

    fn try_from(key: &CoseKey) -> Result<Self, Self::Error> {
        let verifying_key = VerifyingKey::try_from(key)?;
        let encoded_point = verifying_key.to_encoded_point(false);
        Option::from(PublicKey::from_encoded_point(&encoded_point)).ok_or(CryptoError::KeyCoordinateParseFailed)
    }
}

#[cfg(test)]
mod tests {
    use p256::{ecdsa::SigningKey, SecretKey};
    use rand_core::OsRng;
    use ring::hmac;

    use super::*;

    #[test]
    fn random_bytes_differ() {
        let first = random_bytes(32);
        let second = random_bytes(32);
        assert_eq!(first.len(), 32);
        assert_ne!(first, second);
    }

    #[test]
    fn cose_key_roundtrip() {
        let key = SigningKey::random(&mut OsRng);
        let verifying_key = key.verifying_key();

        let cose_key = CoseKey::try_from(verifying_key).unwrap();
        let converted = VerifyingKey::try_from(&cose_key).unwrap();

        assert_eq!(*verifying_key, converted);
    }

    #[test]
    fn dh_hmac_key_agreement() {
        // Both parties derive the same HMAC key from their own private key
        // and the other's public key.
        let device_key = SecretKey::random(&mut OsRng);
        let reader_key = SecretKey::random(&mut OsRng);
        let salt = b"session transcript bytes";

        let device_mac_key = dh_hmac_key(&device_key, &reader_key.public_key(), salt, "EMacKey", 32).unwrap();
        let reader_mac_key = dh_hmac_key(&reader_key, &device_key.public_key(), salt, "EMacKey", 32).unwrap();

        let tag = hmac::sign(&device_mac_key, b"DeviceAuthentication bytes");
        hmac::verify(&reader_mac_key, b"DeviceAuthentication bytes", tag.as_ref()).unwrap();
    }

    #[test]
    fn hkdf_domain_separation() {
        let ikm = [0x0b; 22];
        let salt: Vec<u8> = (0x00..=0x0c).collect();

        let okm = hkdf(&ikm, &salt, "EMacKey", 42).unwrap();
        assert_eq!(okm.len(), 42);
        assert_eq!(okm, hkdf(&ikm, &salt, "EMacKey", 42).unwrap());
        assert_ne!(okm, hkdf(&ikm, &salt, "SKReader", 42).unwrap());
    }
}
