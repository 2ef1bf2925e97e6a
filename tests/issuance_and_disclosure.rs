//! End-to-end tests: issue a document, disclose it bound to an OID4VP
//! session, and verify the resulting `DeviceResponse` against the issuer CA.

use assert_matches::assert_matches;
use chrono::{TimeZone, Utc};
use ciborium::value::Value;
use coset::{iana, HeaderBuilder, MacContext, ProtectedHeader};
use indexmap::IndexSet;
use p256::{
    ecdsa::SigningKey,
    SecretKey,
};
use rand_core::OsRng;
use url::Url;

use mdl::{
    holder::{DeviceResponseBuilder, PresentationDefinition},
    utils::{crypto::dh_hmac_key, serialization::cbor_deserialize, x509::Certificate},
    verifier::{Check, CheckStatus, ValidityError, VerificationError, VerificationOptions, Verifier},
    DeviceAuth, DeviceAuthenticationKeyed, DeviceResponse, Document, IssuerSignedDocument, IssuerSignedItem,
    IssuerSignedItemBytes, SessionTranscript,
};

mod common;
use common::*;

const CLIENT_ID: &str = "example-verifier";
const VERIFIER_NONCE: &str = "verifier-nonce";
const MDOC_NONCE: &str = "mdoc-nonce";

fn response_uri() -> Url {
    "https://verifier.example.com/response".parse().unwrap()
}

fn example_session_transcript() -> SessionTranscript {
    SessionTranscript::new_oid4vp(CLIENT_ID, &response_uri(), VERIFIER_NONCE.to_string(), MDOC_NONCE).unwrap()
}

fn verification_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
}

async fn issue_and_present(
    device_key: &SigningKey,
) -> (DeviceResponse, IssuerSignedDocument, Certificate) {
    let (ca, ca_key) = issuer_ca();
    let (cert, issuer_key) = issuer_cert(&ca, &ca_key);
    let issued = issue_example_document(std::slice::from_ref(&cert), &issuer_key, device_key).await;

    let response = DeviceResponseBuilder::from_document(issued.clone())
        .using_session_transcript_for_oid4vp(MDOC_NONCE, CLIENT_ID, &response_uri(), VERIFIER_NONCE.to_string())
        .unwrap()
        .authenticate_with_signature(device_key)
        .sign()
        .await
        .unwrap();

    (response, issued, ca)
}

#[tokio::test]
async fn issue_present_verify_with_device_signature() {
    let device_key = SigningKey::random(&mut OsRng);
    let (response, _, ca) = issue_and_present(&device_key).await;

    // The strict pipeline verifies and returns the disclosed attributes.
    let disclosed = response
        .verify(
            None,
            &example_session_transcript(),
            verification_time(),
            std::slice::from_ref(&ca),
        )
        .unwrap();

    let document_attrs = &disclosed[EXAMPLE_DOC_TYPE];
    assert_eq!(document_attrs.issuer, ISSUANCE_CERT_CN);
    assert_eq!(document_attrs.ca, ISSUANCE_CA_CN);
    assert_eq!(
        document_attrs.attributes[EXAMPLE_NAMESPACE]["given_name"],
        Value::Text("John".to_string()),
    );

    // The accumulating verifier agrees and reports every check as passed.
    let verifier = Verifier::new(vec![ca]);
    let options = VerificationOptions {
        session_transcript: Some(example_session_transcript()),
        now: Some(verification_time()),
        ..Default::default()
    };
    let (result, diagnostics) = verifier.verify_with_diagnostics(&response.encode().unwrap(), &options);
    result.unwrap();
    assert!(diagnostics.checks.iter().all(|check| check.status == CheckStatus::Passed));
    assert_eq!(diagnostics.documents[0].disclosed_attributes[EXAMPLE_NAMESPACE].len(), 3);
}

#[tokio::test]
async fn issue_present_verify_with_device_mac() {
    let device_secret = SecretKey::random(&mut OsRng);
    let device_key = SigningKey::from(&device_secret);
    let reader_secret = SecretKey::random(&mut OsRng);

    let (ca, ca_key) = issuer_ca();
    let (cert, issuer_key) = issuer_cert(&ca, &ca_key);
    let issued = issue_example_document(std::slice::from_ref(&cert), &issuer_key, &device_key).await;

    let response = DeviceResponseBuilder::from_document(issued)
        .using_session_transcript_for_oid4vp(MDOC_NONCE, CLIENT_ID, &response_uri(), VERIFIER_NONCE.to_string())
        .unwrap()
        .authenticate_with_mac(&device_secret, &reader_secret.public_key())
        .sign()
        .await
        .unwrap();

    response
        .verify(
            Some(&reader_secret),
            &example_session_transcript(),
            verification_time(),
            std::slice::from_ref(&ca),
        )
        .unwrap();

    // The MAC tag must equal a reference HMAC-SHA256 under the
    // ECDH-HKDF-derived key, computed over the COSE MAC_structure embedding
    // the DeviceAuthenticationBytes.
    let document = &response.documents.as_ref().unwrap()[0];
    let device_signed = document.device_signed.as_ref().unwrap();
    let DeviceAuth::DeviceMac(mac) = &device_signed.device_auth else {
        panic!("expected deviceMac");
    };

    let session_transcript = example_session_transcript();
    let mac_key = dh_hmac_key(
        &reader_secret,
        &device_secret.public_key(),
        &session_transcript.encoded().unwrap(),
        "EMacKey",
        32,
    )
    .unwrap();
    let device_authentication_bts = DeviceAuthenticationKeyed::new(
        &document.doc_type,
        &session_transcript,
        device_signed.name_spaces.clone(),
    )
    .encoded()
    .unwrap();
    let mac_data = coset::mac_structure_data(
        MacContext::CoseMac0,
        ProtectedHeader {
            original_data: None,
            header: HeaderBuilder::new().algorithm(iana::Algorithm::HMAC_256_256).build(),
        },
        &[],
        &device_authentication_bts,
    );
    let reference_tag = ring::hmac::sign(&mac_key, &mac_data);
    assert_eq!(mac.0.tag, reference_tag.as_ref());
}

#[tokio::test]
async fn selective_disclosure_keeps_item_encodings() {
    let device_key = SigningKey::random(&mut OsRng);
    let (ca, ca_key) = issuer_ca();
    let (cert, issuer_key) = issuer_cert(&ca, &ca_key);
    let issued = issue_example_document(std::slice::from_ref(&cert), &issuer_key, &device_key).await;

    let issued_encodings: IndexSet<Vec<u8>> = issued.issuer_signed.name_spaces.as_ref().unwrap()
        [EXAMPLE_NAMESPACE]
        .as_ref()
        .iter()
        .map(|item| item.encoded().to_vec())
        .collect();

    let definition = PresentationDefinition::from_json(&format!(
        r#"{{
            "id": "family-name-only",
            "input_descriptors": [
                {{
                    "id": "{EXAMPLE_DOC_TYPE}",
                    "constraints": {{
                        "limit_disclosure": "required",
                        "fields": [
                            {{"path": ["$['{EXAMPLE_NAMESPACE}']['family_name']"], "intent_to_retain": false}}
                        ]
                    }}
                }}
            ]
        }}"#
    ))
    .unwrap();

    let response = DeviceResponseBuilder::from_document(issued)
        .using_presentation_definition(definition)
        .using_session_transcript_for_oid4vp(MDOC_NONCE, CLIENT_ID, &response_uri(), VERIFIER_NONCE.to_string())
        .unwrap()
        .authenticate_with_signature(&device_key)
        .sign()
        .await
        .unwrap();

    // Only the requested attribute is disclosed, with its Tag-24 encoding
    // byte-identical to issuance, so digest verification still passes.
    let document = &response.documents.as_ref().unwrap()[0];
    let disclosed = &document.issuer_signed.name_spaces.as_ref().unwrap()[EXAMPLE_NAMESPACE];
    assert_eq!(disclosed.as_ref().len(), 1);
    assert_eq!(disclosed.as_ref()[0].as_ref().element_identifier, "family_name");
    assert!(issued_encodings.contains(disclosed.as_ref()[0].encoded()));

    let disclosed_attrs = response
        .verify(
            None,
            &example_session_transcript(),
            verification_time(),
            std::slice::from_ref(&ca),
        )
        .unwrap();
    let attributes = &disclosed_attrs[EXAMPLE_DOC_TYPE].attributes[EXAMPLE_NAMESPACE];
    assert_eq!(attributes.len(), 1);
    assert_eq!(attributes["family_name"], Value::Text("Doe".to_string()));
}

#[tokio::test]
async fn oid4vci_bridge_to_presentation() {
    let device_key = SigningKey::random(&mut OsRng);
    let (ca, ca_key) = issuer_ca();
    let (cert, issuer_key) = issuer_cert(&ca, &ca_key);
    let issued = issue_example_document(std::slice::from_ref(&cert), &issuer_key, &device_key).await;

    // Over OID4VCI the credential travels as base64url(IssuerSigned), without
    // the document type.
    let credential = issued.encode_issuer_signed_base64().unwrap();
    let parsed = IssuerSignedDocument::parse_issuer_signed_base64(&credential, EXAMPLE_DOC_TYPE).unwrap();
    assert_eq!(parsed, issued);

    // Wrapping the parsed document in a DeviceResponse produces a valid
    // envelope.
    let reencoded = DeviceResponse::new(vec![Document::from(parsed.clone())]).encode().unwrap();
    let value: Value = cbor_deserialize(&reencoded).unwrap();
    let keys: Vec<_> = value
        .as_map()
        .unwrap()
        .iter()
        .map(|(key, _)| key.as_text().unwrap().to_string())
        .collect();
    assert_eq!(keys, ["version", "documents", "status"]);

    // And the parsed document can still be presented and verified.
    let response = DeviceResponseBuilder::from_document(parsed)
        .using_session_transcript_for_oid4vp(MDOC_NONCE, CLIENT_ID, &response_uri(), VERIFIER_NONCE.to_string())
        .unwrap()
        .authenticate_with_signature(&device_key)
        .sign()
        .await
        .unwrap();
    response
        .verify(
            None,
            &example_session_transcript(),
            verification_time(),
            std::slice::from_ref(&ca),
        )
        .unwrap();
}

#[tokio::test]
async fn tampered_attribute_fails_digest_check() {
    let device_key = SigningKey::random(&mut OsRng);
    let (mut response, _, ca) = issue_and_present(&device_key).await;

    // Replace the value of the first attribute, re-encoding the item.
    let document = &mut response.documents.as_mut().unwrap()[0];
    let name_spaces = document.issuer_signed.name_spaces.as_mut().unwrap();
    let attributes = name_spaces.get_mut(EXAMPLE_NAMESPACE).unwrap();
    let original = attributes.0[0].as_ref().clone();
    attributes.0[0] = IssuerSignedItemBytes::try_new(IssuerSignedItem {
        element_value: Value::Text("Mallory".to_string()),
        ..original
    })
    .unwrap();

    let error = response
        .verify(
            None,
            &example_session_transcript(),
            verification_time(),
            std::slice::from_ref(&ca),
        )
        .unwrap_err();
    assert_matches!(
        error,
        mdl::Error::Verification(VerificationError::AttributeVerificationFailed)
    );

    // Diagnostics remain available on failure and pin the failing check.
    let verifier = Verifier::new(vec![ca]);
    let options = VerificationOptions {
        session_transcript: Some(example_session_transcript()),
        now: Some(verification_time()),
        ..Default::default()
    };
    let (result, diagnostics) = verifier.verify_with_diagnostics(&response.encode().unwrap(), &options);
    result.unwrap_err();
    let digest_check = diagnostics
        .checks
        .iter()
        .find(|check| check.check == Check::ValueDigests)
        .unwrap();
    assert_eq!(digest_check.status, CheckStatus::Failed);
    // The device signature still verifies: the tampering is caught by the
    // digests, not by device authentication.
    let device_auth_check = diagnostics
        .checks
        .iter()
        .find(|check| check.check == Check::DeviceAuth)
        .unwrap();
    assert_eq!(device_auth_check.status, CheckStatus::Passed);
}

#[tokio::test]
async fn expired_document_fails_validity_check() {
    let device_key = SigningKey::random(&mut OsRng);
    let (response, _, ca) = issue_and_present(&device_key).await;

    let expired_time = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
    let error = response
        .verify(
            None,
            &example_session_transcript(),
            expired_time,
            std::slice::from_ref(&ca),
        )
        .unwrap_err();
    assert_matches!(
        error,
        mdl::Error::Verification(VerificationError::Validity(ValidityError::Expired(_)))
    );
}

#[tokio::test]
async fn unknown_ca_fails_trust_chain() {
    let device_key = SigningKey::random(&mut OsRng);
    let (response, _, _) = issue_and_present(&device_key).await;
    let (other_ca, _) = issuer_ca();

    response
        .verify(
            None,
            &example_session_transcript(),
            verification_time(),
            std::slice::from_ref(&other_ca),
        )
        .unwrap_err();

    let verifier = Verifier::new(vec![other_ca]);
    let options = VerificationOptions {
        session_transcript: Some(example_session_transcript()),
        now: Some(verification_time()),
        ..Default::default()
    };
    let diagnostics = verifier.get_diagnostic_information(&response.encode().unwrap(), &options);
    let trust_check = diagnostics
        .checks
        .iter()
        .find(|check| check.check == Check::TrustChain)
        .unwrap();
    assert_eq!(trust_check.status, CheckStatus::Failed);
    // Issuer signature itself is still valid under the presented leaf.
    let signature_check = diagnostics
        .checks
        .iter()
        .find(|check| check.check == Check::IssuerSignature)
        .unwrap();
    assert_eq!(signature_check.status, CheckStatus::Passed);
}

#[tokio::test]
async fn wrong_session_transcript_fails_device_auth() {
    let device_key = SigningKey::random(&mut OsRng);
    let (response, _, ca) = issue_and_present(&device_key).await;

    let other_transcript =
        SessionTranscript::new_oid4vp(CLIENT_ID, &response_uri(), "other-nonce".to_string(), MDOC_NONCE).unwrap();

    let error = response
        .verify(None, &other_transcript, verification_time(), std::slice::from_ref(&ca))
        .unwrap_err();
    assert_matches!(error, mdl::Error::Cose(_));
}
