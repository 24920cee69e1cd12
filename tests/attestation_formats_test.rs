// Integration tests for every attestation statement format, produced by the
// software authenticator and checked through the registration verifier
use std::sync::Arc;

use ciborium::value::Value;
use vouchrs_webauthn::attestation::{AndroidKeyPolicy, AttestationPolicy, AttestationType};
use vouchrs_webauthn::cose::CoseAlgorithm;
use vouchrs_webauthn::registration::{verify_registration_response, ExpectedRegistration};
use vouchrs_webauthn::testing::authenticator::{
    rewrite_registration_auth_data, tamper_statement, AttestationKind, SoftAuthenticator,
};
use vouchrs_webauthn::testing::certificates::TestCa;
use vouchrs_webauthn::testing::constants::{ORIGIN, RP_ID};
use vouchrs_webauthn::testing::{init_logging, RootTrustStore};
use vouchrs_webauthn::types::RegistrationInfo;
use vouchrs_webauthn::{AttestationFormat, WebAuthnError};

const CHALLENGE: [u8; 32] = [0x5a; 32];

fn expected() -> ExpectedRegistration {
    ExpectedRegistration::new(
        CHALLENGE.to_vec(),
        vec![ORIGIN.to_string()],
        vec![RP_ID.to_string()],
    )
    .supported_algorithms(CoseAlgorithm::ALL.to_vec())
}

fn register(
    authenticator: &SoftAuthenticator,
    kind: AttestationKind,
    expected: &ExpectedRegistration,
) -> Result<RegistrationInfo, WebAuthnError> {
    let response = authenticator.make_credential(RP_ID, ORIGIN, &CHALLENGE, kind);
    Ok(verify_registration_response(&response, expected)?
        .registration_info
        .expect("Should carry registration info"))
}

fn flip_last_byte(value: &mut Value) {
    let bytes = value.as_bytes_mut().expect("Should be a byte string");
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
}

#[test]
fn test_every_format_verifies() {
    init_logging();
    let cases = [
        (AttestationKind::None, AttestationFormat::None, AttestationType::None),
        (
            AttestationKind::PackedSelf,
            AttestationFormat::Packed,
            AttestationType::SelfAttestation,
        ),
        (AttestationKind::PackedFull, AttestationFormat::Packed, AttestationType::Uncertain),
        (AttestationKind::FidoU2f, AttestationFormat::FidoU2f, AttestationType::Uncertain),
        (AttestationKind::Apple, AttestationFormat::Apple, AttestationType::Uncertain),
        (AttestationKind::AndroidKey, AttestationFormat::AndroidKey, AttestationType::Uncertain),
        (
            AttestationKind::AndroidSafetyNet,
            AttestationFormat::AndroidSafetyNet,
            AttestationType::Uncertain,
        ),
        (AttestationKind::Tpm, AttestationFormat::Tpm, AttestationType::Uncertain),
    ];

    for (kind, fmt, attestation_type) in cases {
        let authenticator = SoftAuthenticator::new(CoseAlgorithm::Es256);
        let info = register(&authenticator, kind, &expected())
            .unwrap_or_else(|e| panic!("{kind:?} attestation should verify: {e}"));
        assert_eq!(info.fmt, fmt, "{kind:?}");
        assert_eq!(info.attestation_type, attestation_type, "{kind:?}");
        assert_eq!(
            info.trust_path.is_empty(),
            attestation_type != AttestationType::Uncertain,
            "{kind:?}"
        );
    }
}

#[test]
fn test_chains_resolve_against_trusted_root() {
    for kind in [
        AttestationKind::PackedFull,
        AttestationKind::FidoU2f,
        AttestationKind::Apple,
        AttestationKind::AndroidKey,
        AttestationKind::AndroidSafetyNet,
        AttestationKind::Tpm,
    ] {
        let authenticator = SoftAuthenticator::new(CoseAlgorithm::Es256);
        let roots = RootTrustStore::new(vec![authenticator.attestation_root().certificate.der()]);
        let trusted = expected().trust_store(Arc::new(roots));
        let info = register(&authenticator, kind, &trusted)
            .unwrap_or_else(|e| panic!("{kind:?} chain should be trusted: {e}"));
        assert_eq!(info.attestation_type, AttestationType::Basic, "{kind:?}");

        let stranger = TestCa::new("Unrelated Root");
        let untrusted = expected().trust_store(Arc::new(RootTrustStore::new(vec![
            stranger.certificate.der(),
        ])));
        let err = register(&authenticator, kind, &untrusted).unwrap_err();
        assert!(matches!(err, WebAuthnError::AttestationInvalid(_)), "{kind:?}");
    }
}

#[test]
fn test_tampered_statement_signatures_rejected() {
    for kind in [
        AttestationKind::PackedSelf,
        AttestationKind::PackedFull,
        AttestationKind::FidoU2f,
        AttestationKind::AndroidKey,
        AttestationKind::Tpm,
    ] {
        let authenticator = SoftAuthenticator::new(CoseAlgorithm::Es256);
        let mut response = authenticator.make_credential(RP_ID, ORIGIN, &CHALLENGE, kind);
        tamper_statement(&mut response, "sig", flip_last_byte);

        let err = verify_registration_response(&response, &expected()).unwrap_err();
        assert!(
            matches!(err, WebAuthnError::AttestationInvalid(_)),
            "{kind:?}: {err}"
        );
    }
}

#[test]
fn test_statement_bound_to_authenticator_data() {
    // Changing the counter after signing breaks every format but none
    for kind in [
        AttestationKind::PackedSelf,
        AttestationKind::PackedFull,
        AttestationKind::Apple,
        AttestationKind::AndroidKey,
        AttestationKind::AndroidSafetyNet,
        AttestationKind::Tpm,
    ] {
        let authenticator = SoftAuthenticator::new(CoseAlgorithm::Es256);
        let mut response = authenticator.make_credential(RP_ID, ORIGIN, &CHALLENGE, kind);
        rewrite_registration_auth_data(&mut response, |auth_data| auth_data[36] ^= 0x01);

        let err = verify_registration_response(&response, &expected()).unwrap_err();
        assert!(
            matches!(err, WebAuthnError::AttestationInvalid(_)),
            "{kind:?}: {err}"
        );
    }
}

#[test]
fn test_self_attestation_with_rsa_and_eddsa() {
    for alg in [CoseAlgorithm::Rs256, CoseAlgorithm::Ps256, CoseAlgorithm::EdDsa] {
        let authenticator = SoftAuthenticator::new(alg);
        let info = register(&authenticator, AttestationKind::PackedSelf, &expected())
            .unwrap_or_else(|e| panic!("{alg} self attestation should verify: {e}"));
        assert_eq!(info.attestation_type, AttestationType::SelfAttestation);
        assert_eq!(info.credential_algorithm, alg);
    }
}

#[test]
fn test_self_attestation_alg_must_match_credential() {
    let authenticator = SoftAuthenticator::new(CoseAlgorithm::Es256);
    let mut response =
        authenticator.make_credential(RP_ID, ORIGIN, &CHALLENGE, AttestationKind::PackedSelf);
    tamper_statement(&mut response, "alg", |alg| {
        *alg = Value::Integer(CoseAlgorithm::Rs256.id().into());
    });

    let err = verify_registration_response(&response, &expected()).unwrap_err();
    assert!(matches!(err, WebAuthnError::AttestationInvalid(_)));
}

#[test]
fn test_unknown_statement_algorithm_rejected() {
    let authenticator = SoftAuthenticator::new(CoseAlgorithm::Es256);
    let mut response =
        authenticator.make_credential(RP_ID, ORIGIN, &CHALLENGE, AttestationKind::PackedFull);
    tamper_statement(&mut response, "alg", |alg| *alg = Value::Integer((-65535).into()));

    let err = verify_registration_response(&response, &expected()).unwrap_err();
    assert!(matches!(err, WebAuthnError::UnsupportedAlgorithm(_)));
}

#[test]
fn test_tpm_with_rsa_credential() {
    let authenticator = SoftAuthenticator::new(CoseAlgorithm::Rs256);
    let info = register(&authenticator, AttestationKind::Tpm, &expected())
        .expect("Should verify an RSA TPM credential");
    assert_eq!(info.fmt, AttestationFormat::Tpm);
    assert_eq!(info.credential_algorithm, CoseAlgorithm::Rs256);
}

#[test]
fn test_tpm_pub_area_must_match_credential() {
    let authenticator = SoftAuthenticator::new(CoseAlgorithm::Es256);
    let mut response =
        authenticator.make_credential(RP_ID, ORIGIN, &CHALLENGE, AttestationKind::Tpm);
    tamper_statement(&mut response, "pubArea", flip_last_byte);

    let err = verify_registration_response(&response, &expected()).unwrap_err();
    assert!(matches!(err, WebAuthnError::AttestationInvalid(_)));
}

#[test]
fn test_tpm_version_checked() {
    let authenticator = SoftAuthenticator::new(CoseAlgorithm::Es256);
    let mut response =
        authenticator.make_credential(RP_ID, ORIGIN, &CHALLENGE, AttestationKind::Tpm);
    tamper_statement(&mut response, "ver", |ver| *ver = Value::Text("1.2".into()));

    let err = verify_registration_response(&response, &expected()).unwrap_err();
    assert!(matches!(err, WebAuthnError::AttestationInvalid(_)));
}

#[test]
fn test_fido_u2f_rejects_extra_certificates() {
    let authenticator = SoftAuthenticator::new(CoseAlgorithm::Es256);
    let root = authenticator.attestation_root().certificate.der();
    let mut response =
        authenticator.make_credential(RP_ID, ORIGIN, &CHALLENGE, AttestationKind::FidoU2f);
    tamper_statement(&mut response, "x5c", |x5c| {
        if let Value::Array(chain) = x5c {
            chain.push(Value::Bytes(root));
        }
    });

    let err = verify_registration_response(&response, &expected()).unwrap_err();
    assert!(matches!(err, WebAuthnError::AttestationInvalid(_)));
}

#[test]
fn test_android_key_policy_options() {
    let authenticator = SoftAuthenticator::new(CoseAlgorithm::Es256);
    let strict = expected().attestation_policy(AttestationPolicy {
        android_key: AndroidKeyPolicy {
            require_tee_enforced: true,
            require_verified_boot: true,
        },
        ..AttestationPolicy::default()
    });
    register(&authenticator, AttestationKind::AndroidKey, &strict)
        .expect("TEE-generated key on a locked device should satisfy the strict policy");
}

#[test]
fn test_safetynet_response_must_be_jws() {
    let authenticator = SoftAuthenticator::new(CoseAlgorithm::Es256);
    let mut response = authenticator.make_credential(
        RP_ID,
        ORIGIN,
        &CHALLENGE,
        AttestationKind::AndroidSafetyNet,
    );
    tamper_statement(&mut response, "response", |jws| {
        *jws = Value::Bytes(b"not.a-jws".to_vec());
    });

    let err = verify_registration_response(&response, &expected()).unwrap_err();
    assert!(matches!(err, WebAuthnError::AttestationInvalid(_)));
}
