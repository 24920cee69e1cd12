//! Registration response verification

use std::sync::Arc;

use log::{debug, warn};

use crate::attestation::{self, AttestationObject, AttestationPolicy, TrustStore};
use crate::authenticator_data::AuthenticatorData;
use crate::cbor::CborDecoder;
use crate::ceremony;
use crate::client_data::{CeremonyType, CollectedClientData};
use crate::cose::CoseAlgorithm;
use crate::crypto;
use crate::error::WebAuthnError;
use crate::options::DEFAULT_ALGORITHMS;
use crate::types::{RegistrationInfo, RegistrationResponse, VerifiedRegistration};

/// What a registration response is checked against
#[derive(Clone)]
pub struct ExpectedRegistration {
    /// Any of these challenges is accepted
    pub challenges: Vec<Vec<u8>>,
    pub origins: Vec<String>,
    pub rp_ids: Vec<String>,
    pub require_user_verification: bool,
    /// Credential algorithms the relying party accepts
    pub supported_algorithms: Vec<CoseAlgorithm>,
    pub attestation_policy: AttestationPolicy,
    pub trust_store: Option<Arc<dyn TrustStore>>,
    pub decoder: CborDecoder,
}

impl ExpectedRegistration {
    /// Expectations for a single challenge, origin set and RP ID set
    #[must_use]
    pub fn new(challenge: Vec<u8>, origins: Vec<String>, rp_ids: Vec<String>) -> Self {
        Self {
            challenges: vec![challenge],
            origins,
            rp_ids,
            require_user_verification: false,
            supported_algorithms: DEFAULT_ALGORITHMS.to_vec(),
            attestation_policy: AttestationPolicy::default(),
            trust_store: None,
            decoder: CborDecoder::default(),
        }
    }

    #[must_use]
    pub fn require_user_verification(mut self, required: bool) -> Self {
        self.require_user_verification = required;
        self
    }

    #[must_use]
    pub fn supported_algorithms(mut self, algorithms: Vec<CoseAlgorithm>) -> Self {
        self.supported_algorithms = algorithms;
        self
    }

    #[must_use]
    pub fn attestation_policy(mut self, policy: AttestationPolicy) -> Self {
        self.attestation_policy = policy;
        self
    }

    #[must_use]
    pub fn trust_store(mut self, store: Arc<dyn TrustStore>) -> Self {
        self.trust_store = Some(store);
        self
    }

    #[must_use]
    pub fn decoder(mut self, decoder: CborDecoder) -> Self {
        self.decoder = decoder;
        self
    }
}

/// Verify a registration (`navigator.credentials.create`) response
///
/// # Errors
/// Returns the first failing check as a `WebAuthnError`: malformed input,
/// client data mismatch, RP ID mismatch, missing user presence or
/// verification, unsupported credential algorithm, or invalid attestation
pub fn verify_registration_response(
    response: &RegistrationResponse,
    expected: &ExpectedRegistration,
) -> Result<VerifiedRegistration, WebAuthnError> {
    let result = verify(response, expected);
    if let Err(err) = &result {
        warn!("Registration rejected: {:?}", err.kind());
    }
    result
}

fn verify(
    response: &RegistrationResponse,
    expected: &ExpectedRegistration,
) -> Result<VerifiedRegistration, WebAuthnError> {
    let credential_id = ceremony::credential_id(&response.id, &response.raw_id, &response.r#type)?;

    // 1. Client data
    let client_data_json =
        crypto::base64url_decode(&response.response.client_data_json, "clientDataJSON")?;
    let client_data = CollectedClientData::parse(&client_data_json)?;
    client_data.validate(CeremonyType::Create, &expected.challenges, &expected.origins)?;

    // 2. Attestation object and authenticator data
    let attestation_bytes =
        crypto::base64url_decode(&response.response.attestation_object, "attestationObject")?;
    let attestation_object = AttestationObject::decode(&attestation_bytes, &expected.decoder)?;
    let auth_data = AuthenticatorData::parse(&attestation_object.auth_data, &expected.decoder)?;
    let rp_id = ceremony::matching_rp_id(&auth_data, &expected.rp_ids)?;

    // 3. User presence and verification
    ceremony::check_user_flags(&auth_data, expected.require_user_verification)?;

    let attested = auth_data.attested_credential_data.as_ref().ok_or_else(|| {
        WebAuthnError::malformed("Registration authenticator data lacks attested credential data")
    })?;
    if attested.credential_id != credential_id {
        return Err(WebAuthnError::malformed(
            "Attested credential ID differs from the response id",
        ));
    }
    let credential_algorithm = attested.credential_public_key.alg;
    if !expected.supported_algorithms.contains(&credential_algorithm) {
        return Err(WebAuthnError::UnsupportedAlgorithm(format!(
            "Credential algorithm {credential_algorithm} was not requested"
        )));
    }

    // 4. Attestation statement
    let client_data_hash = crypto::sha256(&client_data_json);
    let attestation_result = attestation::verify_attestation(
        &attestation_object,
        &auth_data,
        &client_data_hash,
        &expected.attestation_policy,
        expected.trust_store.as_deref(),
    )?;

    debug!(
        "Registered credential with {} attestation ({:?}), counter {}",
        attestation_object.fmt, attestation_result.attestation_type, auth_data.sign_count
    );

    // 5. State to persist
    Ok(VerifiedRegistration {
        verified: true,
        registration_info: Some(RegistrationInfo {
            fmt: attestation_object.fmt,
            aaguid: attested.aaguid,
            credential_id,
            credential_public_key: attested.credential_public_key_bytes.clone(),
            credential_algorithm,
            counter: auth_data.sign_count,
            credential_device_type: auth_data.credential_device_type(),
            credential_backed_up: auth_data.credential_backed_up(),
            attestation_type: attestation_result.attestation_type,
            trust_path: attestation_result.trust_path,
            user_verified: auth_data.flags.user_verified(),
            origin: client_data.origin,
            rp_id,
            transports: response.response.transports.clone().unwrap_or_default(),
            authenticator_extension_results: ceremony::extension_results(&auth_data),
        }),
    })
}
