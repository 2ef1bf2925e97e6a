//! Helpers for the integration tests: a CA and issuer certificate generated
//! on the fly, and a signed example document.

use chrono::{TimeZone, Utc};
use ciborium::value::Value;
use coset::iana;
use p256::{ecdsa::SigningKey, pkcs8::EncodePrivateKey, SecretKey};
use rand_core::OsRng;
use rcgen::{BasicConstraints, CertificateParams, CustomExtension, DnType, IsCa, KeyPair};

use mdl::{
    issuer::{DeviceKey, DocumentBuilder, SignOptions, Validity},
    iso::mdocs::{DigestAlgorithm, Entry},
    utils::{cose::CoseKey, x509::Certificate},
    IssuerSignedDocument,
};

pub const ISSUANCE_CA_CN: &str = "ca.issuer.example.com";
pub const ISSUANCE_CERT_CN: &str = "cert.issuer.example.com";
pub const EXAMPLE_DOC_TYPE: &str = "org.iso.18013.5.1.mDL";
pub const EXAMPLE_NAMESPACE: &str = "org.iso.18013.5.1";

/// 1.0.18013.5.1.2 (mdlDS), wrapped in `SEQUENCE OF OID`.
const EKU_MDL_DER: &[u8] = &[0x30, 0x09, 0x06, 0x07, 0x28, 0x81, 0x8c, 0x5d, 0x05, 0x01, 0x02];
const OID_EXT_KEY_USAGE: &[u64] = &[2, 5, 29, 37];

fn rcgen_key_pair(key: &SigningKey) -> (SigningKey, KeyPair) {
    let secret = SecretKey::from_bytes(&key.to_bytes()).unwrap();
    let der = secret.to_pkcs8_der().unwrap();
    (key.clone(), KeyPair::try_from(der.as_bytes()).unwrap())
}

pub fn issuer_ca() -> (Certificate, SigningKey) {
    let (signing_key, key_pair) = rcgen_key_pair(&SigningKey::random(&mut OsRng));

    let mut params = CertificateParams::new(Vec::new()).unwrap();
    params.distinguished_name.push(DnType::CommonName, ISSUANCE_CA_CN);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);

    let cert = params.self_signed(&key_pair).unwrap();
    (Certificate::from(cert.der().as_ref()), signing_key)
}

pub fn issuer_cert(ca: &Certificate, ca_key: &SigningKey) -> (Certificate, SigningKey) {
    let (_, ca_key_pair) = rcgen_key_pair(ca_key);
    let ca_der = rustls_pki_types::CertificateDer::from(ca.as_bytes().to_vec());
    let ca_params = CertificateParams::from_ca_cert_der(&ca_der).unwrap();
    let ca_cert = ca_params.self_signed(&ca_key_pair).unwrap();

    let (signing_key, key_pair) = rcgen_key_pair(&SigningKey::random(&mut OsRng));
    let mut params = CertificateParams::new(Vec::new()).unwrap();
    params.distinguished_name.push(DnType::CommonName, ISSUANCE_CERT_CN);
    params
        .custom_extensions
        .push(CustomExtension::from_oid_content(OID_EXT_KEY_USAGE, EKU_MDL_DER.to_vec()));

    let cert = params.signed_by(&key_pair, &ca_cert, &ca_key_pair).unwrap();
    (Certificate::from(cert.der().as_ref()), signing_key)
}

pub fn example_entries() -> Vec<Entry> {
    vec![
        Entry {
            name: "given_name".to_string(),
            value: Value::Text("John".to_string()),
        },
        Entry {
            name: "family_name".to_string(),
            value: Value::Text("Doe".to_string()),
        },
        Entry {
            name: "birth_date".to_string(),
            value: Value::Text("1990-01-01".to_string()),
        },
    ]
}

/// Issue the example document, valid throughout 2024, bound to `device_key`.
pub async fn issue_example_document(
    issuer_certificates: &[Certificate],
    issuer_key: &SigningKey,
    device_key: &SigningKey,
) -> IssuerSignedDocument {
    DocumentBuilder::new(EXAMPLE_DOC_TYPE)
        .add_issuer_name_space(EXAMPLE_NAMESPACE, example_entries())
        .use_digest_algorithm(DigestAlgorithm::Sha256)
        .add_validity_info(Validity {
            signed: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            valid_from: None,
            valid_until: Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()),
            expected_update: None,
        })
        .add_device_key_info(DeviceKey::Cose(CoseKey::try_from(device_key.verifying_key()).unwrap()))
        .sign(SignOptions {
            issuer_private_key: Some(issuer_key),
            signer: None,
            issuer_certificates,
            algorithm: iana::Algorithm::ES256,
            kid: None,
        })
        .await
        .unwrap()
}
