// Integration tests for authentication verification, counter policy and the
// service facade backed by a passkey store
use serde_json::json;
use vouchrs_webauthn::authentication::{
    verify_authentication_response, ExpectedAuthentication, ZeroCounterPolicy,
};
use vouchrs_webauthn::authenticator_data::AuthenticatorFlags;
use vouchrs_webauthn::cose::CoseAlgorithm;
use vouchrs_webauthn::crypto;
use vouchrs_webauthn::registration::{verify_registration_response, ExpectedRegistration};
use vouchrs_webauthn::settings::WebAuthnSettings;
use vouchrs_webauthn::store::{InMemoryPasskeyStore, PasskeyStore};
use vouchrs_webauthn::testing::authenticator::{
    rewrite_client_data, AttestationKind, SoftAuthenticator,
};
use vouchrs_webauthn::testing::constants::{
    ORIGIN, RP_ID, RP_NAME, TEST_DISPLAY_NAME, TEST_USER_NAME,
};
use vouchrs_webauthn::testing::init_logging;
use vouchrs_webauthn::types::{Authenticator, UserVerificationRequirement};
use vouchrs_webauthn::{WebAuthnError, WebAuthnService};

const CHALLENGE: [u8; 32] = [0x17; 32];

fn expected() -> ExpectedAuthentication {
    ExpectedAuthentication::new(
        CHALLENGE.to_vec(),
        vec![ORIGIN.to_string()],
        vec![RP_ID.to_string()],
    )
}

/// Register `authenticator` and return the record a relying party would store
fn register(authenticator: &SoftAuthenticator) -> Authenticator {
    let response =
        authenticator.make_credential(RP_ID, ORIGIN, &CHALLENGE, AttestationKind::None);
    let expected = ExpectedRegistration::new(
        CHALLENGE.to_vec(),
        vec![ORIGIN.to_string()],
        vec![RP_ID.to_string()],
    )
    .supported_algorithms(CoseAlgorithm::ALL.to_vec());
    verify_registration_response(&response, &expected)
        .expect("Should register")
        .registration_info
        .expect("Should carry registration info")
        .to_authenticator()
}

#[test]
fn test_authentication_for_every_algorithm() {
    init_logging();
    for alg in CoseAlgorithm::ALL {
        let mut authenticator = SoftAuthenticator::new(alg).with_user_handle(b"user-42");
        let record = register(&authenticator);
        let response = authenticator.get_assertion(RP_ID, ORIGIN, &CHALLENGE);

        let verified = verify_authentication_response(&response, &expected(), &record)
            .unwrap_or_else(|e| panic!("{alg} assertion should verify: {e}"));
        assert!(verified.verified);
        let info = verified.authentication_info.expect("Should carry info");
        assert_eq!(info.new_counter, 1);
        assert_eq!(info.credential_id, authenticator.credential_id());
        assert_eq!(info.user_handle.as_deref(), Some(b"user-42".as_slice()));
        assert!(info.user_verified);
        assert_eq!(info.rp_id, RP_ID);
    }
}

#[test]
fn test_repeated_counter_flags_clone() {
    let mut authenticator = SoftAuthenticator::new(CoseAlgorithm::Es256)
        .with_sign_count(5)
        .with_counter_step(0);
    let mut record = register(&authenticator);
    record.counter = 5;

    let response = authenticator.get_assertion(RP_ID, ORIGIN, &CHALLENGE);
    let err = verify_authentication_response(&response, &expected(), &record).unwrap_err();
    assert!(matches!(err, WebAuthnError::PossibleCloneDetected(_)));
    assert!(err.is_account_flag());
}

#[test]
fn test_counter_going_backwards_flags_clone() {
    let mut authenticator = SoftAuthenticator::new(CoseAlgorithm::Es256).with_sign_count(2);
    let mut record = register(&authenticator);
    record.counter = 10;

    let response = authenticator.get_assertion(RP_ID, ORIGIN, &CHALLENGE);
    let err = verify_authentication_response(&response, &expected(), &record).unwrap_err();
    assert!(matches!(err, WebAuthnError::PossibleCloneDetected(_)));
}

#[test]
fn test_zero_counter_exempt_by_default() {
    let mut authenticator = SoftAuthenticator::new(CoseAlgorithm::Es256).with_counter_step(0);
    let record = register(&authenticator);
    assert_eq!(record.counter, 0);

    for _ in 0..2 {
        let response = authenticator.get_assertion(RP_ID, ORIGIN, &CHALLENGE);
        let info = verify_authentication_response(&response, &expected(), &record)
            .expect("Should accept an authenticator without a counter")
            .authentication_info
            .expect("Should carry info");
        assert_eq!(info.new_counter, 0);
    }

    let response = authenticator.get_assertion(RP_ID, ORIGIN, &CHALLENGE);
    let strict = expected().zero_counter_policy(ZeroCounterPolicy::Enforce);
    let err = verify_authentication_response(&response, &strict, &record).unwrap_err();
    assert!(matches!(err, WebAuthnError::PossibleCloneDetected(_)));
}

#[test]
fn test_tampered_signature_rejected() {
    let mut authenticator = SoftAuthenticator::new(CoseAlgorithm::Es256);
    let record = register(&authenticator);
    let mut response = authenticator.get_assertion(RP_ID, ORIGIN, &CHALLENGE);

    let mut auth_data =
        crypto::base64url_decode(&response.response.authenticator_data, "authenticatorData")
            .expect("Should decode");
    auth_data[36] ^= 0x01;
    response.response.authenticator_data = crypto::base64url_encode(&auth_data);

    let err = verify_authentication_response(&response, &expected(), &record).unwrap_err();
    assert!(matches!(err, WebAuthnError::SignatureInvalid(_)));
}

#[test]
fn test_assertion_from_other_credential_rejected() {
    let authenticator = SoftAuthenticator::new(CoseAlgorithm::Es256);
    let record = register(&authenticator);
    let mut other = SoftAuthenticator::new(CoseAlgorithm::Es256);

    let response = other.get_assertion(RP_ID, ORIGIN, &CHALLENGE);
    let err = verify_authentication_response(&response, &expected(), &record).unwrap_err();
    assert!(matches!(err, WebAuthnError::CredentialMismatch(_)));
}

#[test]
fn test_wrong_rp_id_rejected() {
    let mut authenticator = SoftAuthenticator::new(CoseAlgorithm::Es256);
    let record = register(&authenticator);
    let response = authenticator.get_assertion("evil.example", ORIGIN, &CHALLENGE);

    let err = verify_authentication_response(&response, &expected(), &record).unwrap_err();
    assert!(matches!(err, WebAuthnError::RpIdMismatch(_)));
}

#[test]
fn test_registration_client_data_rejected_for_assertion() {
    let mut authenticator = SoftAuthenticator::new(CoseAlgorithm::Es256);
    let record = register(&authenticator);
    let mut response = authenticator.get_assertion(RP_ID, ORIGIN, &CHALLENGE);
    response.response.client_data_json =
        rewrite_client_data(&response.response.client_data_json, |value| {
            value["type"] = json!("webauthn.create");
        });

    let err = verify_authentication_response(&response, &expected(), &record).unwrap_err();
    assert!(matches!(err, WebAuthnError::ClientDataInvalid(_)));
}

#[test]
fn test_user_verification_policy() {
    let mut authenticator =
        SoftAuthenticator::new(CoseAlgorithm::Es256).with_flags(AuthenticatorFlags::USER_PRESENT);
    let record = register(&authenticator);
    let response = authenticator.get_assertion(RP_ID, ORIGIN, &CHALLENGE);

    let err = verify_authentication_response(
        &response,
        &expected().require_user_verification(true),
        &record,
    )
    .unwrap_err();
    assert!(matches!(err, WebAuthnError::UserVerificationRequired(_)));

    let info = verify_authentication_response(&response, &expected(), &record)
        .expect("Should accept UP without UV by default")
        .authentication_info
        .expect("Should carry info");
    assert!(!info.user_verified);
}

#[test]
fn test_empty_user_handle_is_absent() {
    let mut authenticator = SoftAuthenticator::new(CoseAlgorithm::Es256);
    let record = register(&authenticator);
    let mut response = authenticator.get_assertion(RP_ID, ORIGIN, &CHALLENGE);
    response.response.user_handle = Some(String::new());

    let info = verify_authentication_response(&response, &expected(), &record)
        .expect("Should verify")
        .authentication_info
        .expect("Should carry info");
    assert_eq!(info.user_handle, None);
}

fn service_settings() -> WebAuthnSettings {
    let mut settings = WebAuthnSettings::default();
    settings.relying_party.id = RP_ID.to_string();
    settings.relying_party.name = RP_NAME.to_string();
    settings.relying_party.origins = vec![ORIGIN.to_string()];
    settings.ceremony.user_verification = UserVerificationRequirement::Preferred;
    settings
}

#[test]
fn test_service_flow_with_store() {
    init_logging();
    let service = WebAuthnService::new(service_settings()).expect("Should build service");
    let store = InMemoryPasskeyStore::new();
    let mut authenticator = SoftAuthenticator::new(CoseAlgorithm::Es256);

    // Registration
    let (options, state) = service
        .start_registration(None, TEST_USER_NAME, TEST_DISPLAY_NAME, &[])
        .expect("Should start registration");
    let challenge = options.challenge_bytes().expect("Should decode challenge");
    let response =
        authenticator.make_credential(RP_ID, ORIGIN, &challenge, AttestationKind::PackedSelf);
    let registration = service
        .finish_registration(&response, &state)
        .expect("Should finish registration")
        .registration_info
        .expect("Should carry registration info");
    store
        .save_authenticator(&state.user_handle, registration.to_authenticator())
        .expect("Should store credential");

    // Authentication, twice, against the stored record
    let existing = store
        .authenticators_for_user(&state.user_handle)
        .expect("Should list credentials");
    for expected_counter in 1..=2 {
        let (options, auth_state) = service
            .start_authentication(&existing)
            .expect("Should start authentication");
        assert_eq!(options.allow_credentials.len(), 1);
        let challenge = options.challenge_bytes().expect("Should decode challenge");
        let assertion = authenticator.get_assertion(RP_ID, ORIGIN, &challenge);

        let (user_handle, verified) = service
            .finish_authentication_with_store(&store, &assertion, &auth_state)
            .expect("Should authenticate");
        assert_eq!(user_handle, state.user_handle);
        assert_eq!(
            verified.authentication_info.expect("info").new_counter,
            expected_counter
        );
    }

    let stored = store
        .load_authenticator(authenticator.credential_id())
        .expect("Should load")
        .expect("Should exist");
    assert_eq!(stored.authenticator.counter, 2);
}

#[test]
fn test_service_replay_rejected() {
    let service = WebAuthnService::new(service_settings()).expect("Should build service");
    let store = InMemoryPasskeyStore::new();
    let mut authenticator = SoftAuthenticator::new(CoseAlgorithm::Es256);

    let (options, state) = service
        .start_registration(Some(b"user-7".as_slice()), TEST_USER_NAME, TEST_DISPLAY_NAME, &[])
        .expect("Should start registration");
    let challenge = options.challenge_bytes().expect("Should decode challenge");
    let response = authenticator.make_credential(RP_ID, ORIGIN, &challenge, AttestationKind::None);
    let record = service
        .finish_registration(&response, &state)
        .expect("Should register")
        .registration_info
        .expect("Should carry registration info")
        .to_authenticator();
    store.save_authenticator(b"user-7", record).expect("Should store");

    let (options, auth_state) = service
        .start_authentication(&[])
        .expect("Should start authentication");
    let challenge = options.challenge_bytes().expect("Should decode challenge");
    let assertion = authenticator.get_assertion(RP_ID, ORIGIN, &challenge);

    service
        .finish_authentication_with_store(&store, &assertion, &auth_state)
        .expect("First use should verify");
    let err = service
        .finish_authentication_with_store(&store, &assertion, &auth_state)
        .unwrap_err();
    assert!(matches!(err, WebAuthnError::PossibleCloneDetected(_)));
}

#[test]
fn test_service_unknown_credential_rejected() {
    let service = WebAuthnService::new(service_settings()).expect("Should build service");
    let store = InMemoryPasskeyStore::new();
    let mut authenticator = SoftAuthenticator::new(CoseAlgorithm::Es256);

    let (options, auth_state) = service
        .start_authentication(&[])
        .expect("Should start authentication");
    let challenge = options.challenge_bytes().expect("Should decode challenge");
    let assertion = authenticator.get_assertion(RP_ID, ORIGIN, &challenge);

    let err = service
        .finish_authentication_with_store(&store, &assertion, &auth_state)
        .unwrap_err();
    assert!(matches!(err, WebAuthnError::CredentialMismatch(_)));
}
