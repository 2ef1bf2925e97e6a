//! Issuance: build mdoc documents out of attributes and sign them into an
//! [`IssuerSignedDocument`], committing to the attributes through salted
//! digests in the MSO.

use chrono::{DateTime, Duration, Utc};
use ciborium::value::Value;
use coset::iana;
use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use p256::{ecdsa::VerifyingKey, elliptic_curve::JwkEcKey};
use rand_core::{OsRng, RngCore};
use serde_bytes::ByteBuf;

use crate::{
    errors::{BuilderError, Error, Result},
    iso::{
        disclosure::{IssuerAuth, IssuerSigned, IssuerSignedDocument},
        mdocs::{
            Attributes, DigestAlgorithm, DigestID, DigestIDs, DocType, Entry, IssuerNameSpaces, IssuerSignedItem,
            IssuerSignedItemBytes, MobileSecurityObject, NameSpace, ValidityInfo, ValueDigests,
        },
    },
    utils::{
        cose::{new_certificate_header, CoseKey, CoseSigner},
        crypto::{cbor_digest, random_bytes, CryptoError},
        keys::EcdsaKey,
        serialization::{RequiredValue, TaggedBytes},
        x509::Certificate,
    },
};

/// Length of the `random` salt blinding each attribute digest.
const ATTRIBUTE_RANDOM_LENGTH: usize = 32;

/// The device public key to bind the credential to, either as a COSE_Key or
/// as a JWK.
#[derive(Debug, Clone)]
pub enum DeviceKey {
    Cose(CoseKey),
    Jwk(JwkEcKey),
}

impl TryFrom<DeviceKey> for CoseKey {
    type Error = CryptoError;

    fn try_from(key: DeviceKey) -> std::result::Result<Self, Self::Error> {
        match key {
            DeviceKey::Cose(key) => Ok(key),
            DeviceKey::Jwk(jwk) => {
                let public = p256::PublicKey::from_jwk(&jwk).map_err(|_| CryptoError::KeyJwkParseFailed)?;
                CoseKey::try_from(&VerifyingKey::from(public))
            }
        }
    }
}

/// Validity window of the credential to be signed. `valid_from` defaults to
/// `signed`, `valid_until` to `signed` plus one year.
#[derive(Debug, Clone, Copy)]
pub struct Validity {
    pub signed: DateTime<Utc>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub expected_update: Option<DateTime<Utc>>,
}

impl Validity {
    pub fn new(signed: DateTime<Utc>) -> Self {
        Validity {
            signed,
            valid_from: None,
            valid_until: None,
            expected_update: None,
        }
    }

    fn into_validity_info(self) -> Result<ValidityInfo> {
        let valid_from = self.valid_from.unwrap_or(self.signed);
        let valid_until = self.valid_until.unwrap_or(self.signed + Duration::days(365));
        if self.signed > valid_from || valid_from > valid_until {
            return Err(BuilderError::InvalidValidityWindow.into());
        }

        Ok(ValidityInfo {
            signed: self.signed.into(),
            valid_from: valid_from.into(),
            valid_until: valid_until.into(),
            expected_update: self.expected_update.map(Into::into),
        })
    }
}

/// How the issuer authentication is to be produced: with a locally held
/// private key, or through an external (HSM-held) signer. Exactly one of the
/// two must be set.
pub struct SignOptions<'a, K = p256::ecdsa::SigningKey> {
    pub issuer_private_key: Option<&'a K>,
    pub signer: Option<CoseSigner<'a>>,
    /// The certificate chain for the `x5chain` header, leaf first.
    pub issuer_certificates: &'a [Certificate],
    pub algorithm: iana::Algorithm,
    pub kid: Option<Vec<u8>>,
}

/// Builder for an mdoc document, to be signed into an
/// [`IssuerSignedDocument`].
#[derive(Debug, Clone)]
pub struct DocumentBuilder {
    doc_type: DocType,
    name_spaces: IndexMap<NameSpace, Vec<Entry>>,
    digest_algorithm: Option<DigestAlgorithm>,
    validity: Option<Validity>,
    device_key: Option<DeviceKey>,
}

impl DocumentBuilder {
    pub fn new(doc_type: impl Into<DocType>) -> Self {
        DocumentBuilder {
            doc_type: doc_type.into(),
            name_spaces: IndexMap::new(),
            digest_algorithm: None,
            validity: None,
            device_key: None,
        }
    }

    /// Append attributes to the given namespace.
    pub fn add_issuer_name_space(mut self, name_space: impl Into<NameSpace>, entries: Vec<Entry>) -> Self {
        self.name_spaces.entry(name_space.into()).or_default().extend(entries);
        self
    }

    /// Required before [`sign`](Self::sign).
    pub fn use_digest_algorithm(mut self, digest_algorithm: DigestAlgorithm) -> Self {
        self.digest_algorithm = Some(digest_algorithm);
        self
    }

    /// Required before [`sign`](Self::sign).
    pub fn add_validity_info(mut self, validity: Validity) -> Self {
        self.validity = Some(validity);
        self
    }

    /// Required before [`sign`](Self::sign).
    pub fn add_device_key_info(mut self, device_key: DeviceKey) -> Self {
        self.device_key = Some(device_key);
        self
    }

    /// Sign the document: generate fresh salts and digest IDs for all
    /// attributes, compute the MSO, and produce the issuer authentication
    /// with its Tag-24 encoding as COSE payload.
    pub async fn sign<K: EcdsaKey>(self, options: SignOptions<'_, K>) -> Result<IssuerSignedDocument> {
        if options.issuer_private_key.is_some() && options.signer.is_some() {
            return Err(BuilderError::ConflictingSigners.into());
        }

        let digest_algorithm = self.digest_algorithm.ok_or(BuilderError::MissingDigestAlgorithm)?;
        let validity = self.validity.ok_or(BuilderError::MissingValidityInfo)?;
        let device_key = self.device_key.ok_or(BuilderError::MissingDeviceKeyInfo)?;
        if self.name_spaces.is_empty() {
            return Err(BuilderError::NoAttributes.into());
        }

        let mut name_spaces = IssuerNameSpaces::new();
        let mut value_digests = IndexMap::new();
        for (name_space, entries) in self.name_spaces {
            validate_entries(&name_space, &entries)?;

            let mut items = Vec::with_capacity(entries.len());
            let mut digests = IndexMap::with_capacity(entries.len());
            let mut used_ids = IndexSet::with_capacity(entries.len());
            for entry in entries {
                let item = IssuerSignedItemBytes::try_new(IssuerSignedItem {
                    digest_id: fresh_digest_id(&mut used_ids),
                    random: ByteBuf::from(random_bytes(ATTRIBUTE_RANDOM_LENGTH)),
                    element_identifier: entry.name,
                    element_value: entry.value,
                })?;
                digests.insert(item.as_ref().digest_id, ByteBuf::from(cbor_digest(digest_algorithm, &item)?));
                items.push(item);
            }

            name_spaces.insert(name_space.clone(), Attributes::from(items));
            value_digests.insert(name_space, DigestIDs(digests));
        }

        let mso = MobileSecurityObject {
            version: RequiredValue::default(),
            digest_algorithm,
            value_digests: ValueDigests(value_digests),
            device_key_info: CoseKey::try_from(device_key).map_err(Error::Crypto)?.into(),
            doc_type: self.doc_type.clone(),
            validity_info: validity.into_validity_info()?,
        };

        let payload = TaggedBytes::try_new(mso)?;
        let unprotected = new_certificate_header(options.issuer_certificates, options.kid);

        let issuer_auth: IssuerAuth = match (options.issuer_private_key, options.signer) {
            (Some(key), None) => {
                if options.algorithm != iana::Algorithm::ES256 {
                    return Err(crate::utils::cose::CoseError::UnsupportedAlgorithm(coset::Algorithm::Assigned(
                        options.algorithm,
                    ))
                    .into());
                }
                IssuerAuth::sign(&payload, unprotected, key, true).await?
            }
            (None, Some(ref signer)) => {
                IssuerAuth::sign_with_signer(&payload, options.algorithm, unprotected, signer, true).await?
            }
            _ => return Err(BuilderError::MissingSigner.into()),
        };

        Ok(IssuerSignedDocument {
            doc_type: self.doc_type,
            issuer_signed: IssuerSigned {
                name_spaces: Some(name_spaces),
                issuer_auth,
            },
        })
    }
}

fn validate_entries(name_space: &NameSpace, entries: &[Entry]) -> Result<()> {
    if let Some(element) = entries.iter().map(|entry| &entry.name).duplicates().next() {
        return Err(BuilderError::DuplicateElement {
            namespace: name_space.clone(),
            element: element.clone(),
        }
        .into());
    }

    for entry in entries {
        if let Some(reason) = find_unrepresentable(&entry.value) {
            return Err(BuilderError::InvalidElementValue {
                namespace: name_space.clone(),
                element: entry.name.clone(),
                reason,
            }
            .into());
        }
    }

    Ok(())
}

/// NaN and negative zero have no deterministic encoding and are forbidden in
/// signed payloads.
fn find_unrepresentable(value: &Value) -> Option<&'static str> {
    match value {
        Value::Float(f) if f.is_nan() => Some("NaN"),
        Value::Float(f) if *f == 0.0 && f.is_sign_negative() => Some("negative zero"),
        Value::Array(items) => items.iter().find_map(find_unrepresentable),
        Value::Map(entries) => entries
            .iter()
            .find_map(|(key, value)| find_unrepresentable(key).or_else(|| find_unrepresentable(value))),
        Value::Tag(_, inner) => find_unrepresentable(inner),
        _ => None,
    }
}

/// A uniformly random digest ID, unique within `used`.
fn fresh_digest_id(used: &mut IndexSet<DigestID>) -> DigestID {
    loop {
        let id = OsRng.next_u32() as DigestID;
        if used.insert(id) {
            return id;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use p256::ecdsa::SigningKey;

    use crate::utils::x509::CertificateUsage;

    use super::*;

    pub(crate) fn test_entries() -> Vec<Entry> {
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

    fn test_builder() -> DocumentBuilder {
        DocumentBuilder::new("org.iso.18013.5.1.mDL")
            .add_issuer_name_space("org.iso.18013.5.1", test_entries())
            .use_digest_algorithm(DigestAlgorithm::Sha256)
            .add_validity_info(Validity::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()))
    }

    fn test_issuer() -> (Vec<Certificate>, SigningKey, Certificate) {
        let (ca, ca_key) = Certificate::new_ca("ca.issuer.example.com").unwrap();
        let (cert, key) = Certificate::new(&ca, &ca_key, "cert.issuer.example.com", CertificateUsage::Mdl).unwrap();
        (vec![cert], key, ca)
    }

    fn device_key() -> DeviceKey {
        let key = SigningKey::random(&mut OsRng);
        DeviceKey::Cose(CoseKey::try_from(key.verifying_key()).unwrap())
    }

    fn sign_options<'a>(certs: &'a [Certificate], key: &'a SigningKey) -> SignOptions<'a> {
        SignOptions {
            issuer_private_key: Some(key),
            signer: None,
            issuer_certificates: certs,
            algorithm: iana::Algorithm::ES256,
            kid: None,
        }
    }

    #[tokio::test]
    async fn sign_produces_valid_digests() {
        let (certs, key, _) = test_issuer();
        let doc = test_builder()
            .add_device_key_info(device_key())
            .sign(sign_options(&certs, &key))
            .await
            .unwrap();

        let mso = doc.issuer_signed.issuer_auth.dangerous_parse_unverified().unwrap();
        let mso = mso.into_inner();
        assert_eq!(mso.doc_type, "org.iso.18013.5.1.mDL");

        let name_spaces = doc.issuer_signed.name_spaces.as_ref().unwrap();
        let attrs = name_spaces.get("org.iso.18013.5.1").unwrap();
        assert_eq!(attrs.as_ref().len(), 3);

        let digests = mso.value_digests.0.get("org.iso.18013.5.1").unwrap();
        for item in attrs.as_ref() {
            let expected = cbor_digest(DigestAlgorithm::Sha256, item).unwrap();
            assert_eq!(digests.0.get(&item.as_ref().digest_id).unwrap().as_slice(), expected);
        }
    }

    #[tokio::test]
    async fn salts_and_digest_ids_are_fresh() {
        let (certs, key, _) = test_issuer();
        let doc = test_builder()
            .add_device_key_info(device_key())
            .sign(sign_options(&certs, &key))
            .await
            .unwrap();

        let name_spaces = doc.issuer_signed.name_spaces.as_ref().unwrap();
        let items = name_spaces.get("org.iso.18013.5.1").unwrap();

        let salts: IndexSet<_> = items.as_ref().iter().map(|item| item.as_ref().random.clone()).collect();
        assert_eq!(salts.len(), 3);
        assert!(salts.iter().all(|salt| salt.len() >= 16));

        let ids: IndexSet<_> = items.as_ref().iter().map(|item| item.as_ref().digest_id).collect();
        assert_eq!(ids.len(), 3);
    }

    #[tokio::test]
    async fn default_validity_window_is_one_year() {
        let (certs, key, _) = test_issuer();
        let signed = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let doc = test_builder()
            .add_device_key_info(device_key())
            .sign(sign_options(&certs, &key))
            .await
            .unwrap();

        let mso = doc
            .issuer_signed
            .issuer_auth
            .dangerous_parse_unverified()
            .unwrap()
            .into_inner();
        let validity = &mso.validity_info;
        assert_eq!(DateTime::<Utc>::try_from(&validity.valid_from).unwrap(), signed);
        assert_eq!(
            DateTime::<Utc>::try_from(&validity.valid_until).unwrap(),
            signed + Duration::days(365),
        );
    }

    #[tokio::test]
    async fn sign_rejects_both_key_and_signer() {
        use crate::utils::cose::{BasicSigner, SignerError};

        struct NopSigner;
        #[async_trait::async_trait]
        impl BasicSigner for NopSigner {
            async fn sign(&self, _: &[u8]) -> std::result::Result<Vec<u8>, SignerError> {
                Ok(vec![0x42; 64])
            }
        }

        let (certs, key, _) = test_issuer();
        let error = test_builder()
            .add_device_key_info(device_key())
            .sign(SignOptions {
                issuer_private_key: Some(&key),
                signer: Some(CoseSigner::Basic(&NopSigner)),
                issuer_certificates: &certs,
                algorithm: iana::Algorithm::ES256,
                kid: None,
            })
            .await
            .unwrap_err();

        assert_matches!(error, Error::Builder(BuilderError::ConflictingSigners));
        assert_eq!(
            error.to_string(),
            "builder error: Cannot provide both issuerPrivateKey and signer",
        );
    }

    #[tokio::test]
    async fn sign_rejects_neither_key_nor_signer() {
        let (certs, _, _) = test_issuer();
        let error = test_builder()
            .add_device_key_info(device_key())
            .sign(SignOptions::<SigningKey> {
                issuer_private_key: None,
                signer: None,
                issuer_certificates: &certs,
                algorithm: iana::Algorithm::ES256,
                kid: None,
            })
            .await
            .unwrap_err();

        assert_matches!(error, Error::Builder(BuilderError::MissingSigner));
    }

    #[tokio::test]
    async fn sign_requires_digest_algorithm() {
        let (certs, key, _) = test_issuer();
        let error = DocumentBuilder::new("doctype")
            .add_issuer_name_space("namespace", test_entries())
            .add_validity_info(Validity::new(Utc::now()))
            .add_device_key_info(device_key())
            .sign(sign_options(&certs, &key))
            .await
            .unwrap_err();

        assert_matches!(error, Error::Builder(BuilderError::MissingDigestAlgorithm));
    }

    #[tokio::test]
    async fn sign_rejects_nan() {
        let (certs, key, _) = test_issuer();
        let error = test_builder()
            .add_issuer_name_space(
                "org.iso.18013.5.1.aamva",
                vec![Entry {
                    name: "weight".to_string(),
                    value: Value::Float(f64::NAN),
                }],
            )
            .add_device_key_info(device_key())
            .sign(sign_options(&certs, &key))
            .await
            .unwrap_err();

        assert_matches!(error, Error::Builder(BuilderError::InvalidElementValue { .. }));
    }

    #[tokio::test]
    async fn sign_rejects_duplicate_elements() {
        let (certs, key, _) = test_issuer();
        let mut entries = test_entries();
        entries.push(Entry {
            name: "given_name".to_string(),
            value: Value::Text("Jane".to_string()),
        });

        let error = DocumentBuilder::new("doctype")
            .add_issuer_name_space("namespace", entries)
            .use_digest_algorithm(DigestAlgorithm::Sha256)
            .add_validity_info(Validity::new(Utc::now()))
            .add_device_key_info(device_key())
            .sign(sign_options(&certs, &key))
            .await
            .unwrap_err();

        assert_matches!(error, Error::Builder(BuilderError::DuplicateElement { .. }));
    }
}
