//! X.509 certificates: wrapping DER-encoded certificates, verifying them
//! against trust anchors (RFC 5280) with the mdoc extended key usages, and
//! (behind the `generate` feature) producing CA and issuer certificates.

use chrono::{DateTime, Utc};
use p256::{ecdsa::VerifyingKey, pkcs8::DecodePublicKey};
use rustls_pki_types::{CertificateDer, TrustAnchor, UnixTime};
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use webpki::ring::{ECDSA_P256_SHA256, ECDSA_P256_SHA384, ECDSA_P384_SHA256, ECDSA_P384_SHA384};
use x509_parser::prelude::{FromDer, X509Certificate};

#[derive(thiserror::Error, Debug)]
pub enum CertificateError {
    #[error("certificate parsing failed: {0}")]
    Parsing(String),
    #[error("certificate public key incompatible: {0}")]
    PublicKey(String),
    #[error("certificate verification failed: {0:?}")]
    Verification(webpki::Error),
    #[cfg(any(test, feature = "generate"))]
    #[error("certificate generation failed: {0}")]
    Generation(String),
}

/// Extended key usage that a certificate is verified for, as assigned by
/// ISO 18013-5 (OIDs 1.0.18013.5.1.2 and 1.0.18013.5.1.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum CertificateUsage {
    Mdl,
    ReaderAuth,
}

const EKU_MDL: &[u8] = &[0x28, 0x81, 0x8c, 0x5d, 0x05, 0x01, 0x02];
const EKU_READER_AUTH: &[u8] = &[0x28, 0x81, 0x8c, 0x5d, 0x05, 0x01, 0x06];

impl CertificateUsage {
    fn eku(self) -> &'static [u8] {
        match self {
            CertificateUsage::Mdl => EKU_MDL,
            CertificateUsage::ReaderAuth => EKU_READER_AUTH,
        }
    }
}

/// An X.509 certificate, DER-encoded.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Certificate(ByteBuf);

impl From<Vec<u8>> for Certificate {
    fn from(bts: Vec<u8>) -> Self {
        Certificate(ByteBuf::from(bts))
    }
}

impl From<&[u8]> for Certificate {
    fn from(bts: &[u8]) -> Self {
        Certificate(ByteBuf::from(bts.to_vec()))
    }
}

impl Certificate {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Verify this certificate against the given trust anchors at time
    /// `time`, requiring `usage` in its extended key usage extension.
    pub fn verify(
        &self,
        usage: CertificateUsage,
        intermediates: &[Certificate],
        time: DateTime<Utc>,
        trust_anchors: &[Certificate],
    ) -> Result<(), CertificateError> {
        let anchor_ders: Vec<CertificateDer> = trust_anchors
            .iter()
            .map(|cert| CertificateDer::from(cert.as_bytes()))
            .collect();
        let anchors: Vec<TrustAnchor> = anchor_ders
            .iter()
            .map(|der| webpki::anchor_from_trusted_cert(der).map_err(CertificateError::Verification))
            .collect::<Result<_, _>>()?;

        let intermediate_ders: Vec<CertificateDer> = intermediates
            .iter()
            .map(|cert| CertificateDer::from(cert.as_bytes()))
            .collect();

        let leaf_der = CertificateDer::from(self.as_bytes());
        let end_entity = webpki::EndEntityCert::try_from(&leaf_der).map_err(CertificateError::Verification)?;

        end_entity
            .verify_for_usage(
                &[ECDSA_P256_SHA256, ECDSA_P256_SHA384, ECDSA_P384_SHA256, ECDSA_P384_SHA384],
                &anchors,
                &intermediate_ders,
                UnixTime::since_unix_epoch(core::time::Duration::from_secs(time.timestamp().max(0) as u64)),
                webpki::KeyUsage::required(usage.eku()),
                None,
                None,
            )
            .map_err(CertificateError::Verification)?;

        Ok(())
    }

    fn parse(&self) -> Result<X509Certificate, CertificateError> {
        let (_, parsed) =
            X509Certificate::from_der(self.as_bytes()).map_err(|e| CertificateError::Parsing(e.to_string()))?;
        Ok(parsed)
    }

    pub fn public_key(&self) -> Result<VerifyingKey, CertificateError> {
        let parsed = self.parse()?;
        VerifyingKey::from_public_key_der(parsed.public_key().raw)
            .map_err(|e| CertificateError::PublicKey(e.to_string()))
    }

    /// The common names in the certificate subject.
    pub fn common_names(&self) -> Result<Vec<String>, CertificateError> {
        let parsed = self.parse()?;
        parsed
            .subject()
            .iter_common_name()
            .map(|cn| {
                cn.as_str()
                    .map(str::to_string)
                    .map_err(|e| CertificateError::Parsing(e.to_string()))
            })
            .collect()
    }

    /// The common names in the certificate issuer, i.e. of the CA.
    pub fn issuer_common_names(&self) -> Result<Vec<String>, CertificateError> {
        let parsed = self.parse()?;
        parsed
            .issuer()
            .iter_common_name()
            .map(|cn| {
                cn.as_str()
                    .map(str::to_string)
                    .map_err(|e| CertificateError::Parsing(e.to_string()))
            })
            .collect()
    }

    /// The certificate serial number, hex-encoded.
    pub fn serial(&self) -> Result<String, CertificateError> {
        Ok(hex::encode(self.parse()?.raw_serial()))
    }
}

#[cfg(any(test, feature = "generate"))]
mod generate {
    use p256::{ecdsa::SigningKey, pkcs8::EncodePrivateKey, SecretKey};
    use rand_core::OsRng;
    use rcgen::{BasicConstraints, CertificateParams, CustomExtension, DnType, IsCa, KeyPair};

    use super::{Certificate, CertificateError, CertificateUsage};

    /// OID of the X.509 extended key usage extension (2.5.29.37).
    const OID_EXT_KEY_USAGE: &[u64] = &[2, 5, 29, 37];

    impl CertificateUsage {
        fn eku_extension(self) -> CustomExtension {
            // SEQUENCE OF one OID, DER-encoded.
            let mut content = vec![0x30, 0x09, 0x06, 0x07];
            content.extend_from_slice(self.eku());
            CustomExtension::from_oid_content(OID_EXT_KEY_USAGE, content)
        }
    }

    impl Certificate {
        /// Generate a new self-signed CA certificate with its private key.
        pub fn new_ca(common_name: &str) -> Result<(Certificate, SigningKey), CertificateError> {
            let (mut params, signing_key, key_pair) = base_params(common_name)?;
            params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);

            let cert = params.self_signed(&key_pair).map_err(generation_error)?;
            Ok((Certificate::from(cert.der().as_ref()), signing_key))
        }

        /// Generate a certificate for `usage`, signed by the given CA.
        pub fn new(
            ca: &Certificate,
            ca_key: &SigningKey,
            common_name: &str,
            usage: CertificateUsage,
        ) -> Result<(Certificate, SigningKey), CertificateError> {
            let ca_key_pair = key_pair(ca_key)?;
            let ca_params =
                CertificateParams::from_ca_cert_der(&rustls_pki_types::CertificateDer::from(ca.as_bytes().to_vec()))
                    .map_err(generation_error)?;
            let ca_cert = ca_params.self_signed(&ca_key_pair).map_err(generation_error)?;

            let (mut params, signing_key, leaf_key_pair) = base_params(common_name)?;
            params.custom_extensions.push(usage.eku_extension());

            let cert = params
                .signed_by(&leaf_key_pair, &ca_cert, &ca_key_pair)
                .map_err(generation_error)?;
            Ok((Certificate::from(cert.der().as_ref()), signing_key))
        }
    }

    fn base_params(common_name: &str) -> Result<(CertificateParams, SigningKey, KeyPair), CertificateError> {
        let signing_key = SigningKey::random(&mut OsRng);
        let key_pair = key_pair(&signing_key)?;

        let mut params = CertificateParams::new(Vec::new()).map_err(generation_error)?;
        params.distinguished_name.push(DnType::CommonName, common_name);

        Ok((params, signing_key, key_pair))
    }

    fn key_pair(key: &SigningKey) -> Result<KeyPair, CertificateError> {
        let secret = SecretKey::from_bytes(&key.to_bytes()).map_err(generation_error)?;
        let der = secret.to_pkcs8_der().map_err(generation_error)?;
        KeyPair::try_from(der.as_bytes()).map_err(generation_error)
    }

    fn generation_error(error: impl std::fmt::Display) -> CertificateError {
        CertificateError::Generation(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Utc;

    use super::*;

    #[test]
    fn generate_and_verify() {
        let (ca, ca_key) = Certificate::new_ca("ca.issuer.example.com").unwrap();
        let (cert, cert_key) = Certificate::new(&ca, &ca_key, "cert.issuer.example.com", CertificateUsage::Mdl).unwrap();

        cert.verify(CertificateUsage::Mdl, &[], Utc::now(), &[ca.clone()]).unwrap();

        assert_eq!(cert.public_key().unwrap(), *cert_key.verifying_key());
        assert_eq!(cert.common_names().unwrap(), ["cert.issuer.example.com"]);
        assert_eq!(cert.issuer_common_names().unwrap(), ["ca.issuer.example.com"]);
    }

    #[test]
    fn verify_rejects_wrong_usage() {
        let (ca, ca_key) = Certificate::new_ca("ca.example.com").unwrap();
        let (cert, _) = Certificate::new(&ca, &ca_key, "cert.example.com", CertificateUsage::ReaderAuth).unwrap();

        assert_matches!(
            cert.verify(CertificateUsage::Mdl, &[], Utc::now(), &[ca]),
            Err(CertificateError::Verification(_))
        );
    }

    #[test]
    fn verify_rejects_unknown_ca() {
        let (ca, ca_key) = Certificate::new_ca("ca.example.com").unwrap();
        let (other_ca, _) = Certificate::new_ca("other-ca.example.com").unwrap();
        let (cert, _) = Certificate::new(&ca, &ca_key, "cert.example.com", CertificateUsage::Mdl).unwrap();

        assert_matches!(
            cert.verify(CertificateUsage::Mdl, &[], Utc::now(), &[other_ca]),
            Err(CertificateError::Verification(_))
        );
    }
}
