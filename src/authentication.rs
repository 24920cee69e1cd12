//! Authentication (assertion) response verification and counter policy

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::authenticator_data::AuthenticatorData;
use crate::cbor::CborDecoder;
use crate::ceremony;
use crate::client_data::{CeremonyType, CollectedClientData};
use crate::cose::CosePublicKey;
use crate::crypto;
use crate::error::WebAuthnError;
use crate::signature;
use crate::types::{AuthenticationInfo, AuthenticationResponse, Authenticator, VerifiedAuthentication};

/// How a signature counter of zero is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZeroCounterPolicy {
    /// Stored and reported counters both zero is accepted every time
    #[default]
    Exempt,
    /// Counters must strictly increase, zero included
    Enforce,
}

impl ZeroCounterPolicy {
    /// Compare the reported counter against the stored one
    ///
    /// # Errors
    /// Returns `PossibleCloneDetected` if the counter did not increase
    pub fn check(self, stored: u32, reported: u32) -> Result<(), WebAuthnError> {
        if self == Self::Exempt && stored == 0 && reported == 0 {
            debug!("Authenticator does not implement a signature counter");
            return Ok(());
        }
        if reported <= stored {
            warn!("Signature counter went from {stored} to {reported}");
            return Err(WebAuthnError::PossibleCloneDetected(format!(
                "signCount {reported} does not exceed stored counter {stored}"
            )));
        }
        Ok(())
    }
}

/// What an authentication response is checked against
#[derive(Debug, Clone)]
pub struct ExpectedAuthentication {
    /// Any of these challenges is accepted
    pub challenges: Vec<Vec<u8>>,
    pub origins: Vec<String>,
    pub rp_ids: Vec<String>,
    pub require_user_verification: bool,
    pub zero_counter_policy: ZeroCounterPolicy,
    pub decoder: CborDecoder,
}

impl ExpectedAuthentication {
    /// Expectations for a single challenge, origin set and RP ID set
    #[must_use]
    pub fn new(challenge: Vec<u8>, origins: Vec<String>, rp_ids: Vec<String>) -> Self {
        Self {
            challenges: vec![challenge],
            origins,
            rp_ids,
            require_user_verification: false,
            zero_counter_policy: ZeroCounterPolicy::default(),
            decoder: CborDecoder::default(),
        }
    }

    #[must_use]
    pub fn require_user_verification(mut self, required: bool) -> Self {
        self.require_user_verification = required;
        self
    }

    #[must_use]
    pub fn zero_counter_policy(mut self, policy: ZeroCounterPolicy) -> Self {
        self.zero_counter_policy = policy;
        self
    }

    #[must_use]
    pub fn decoder(mut self, decoder: CborDecoder) -> Self {
        self.decoder = decoder;
        self
    }
}

/// Verify an authentication (`navigator.credentials.get`) response against
/// the stored authenticator record
///
/// The record is not modified; persist `new_counter` from the result.
///
/// # Errors
/// Returns the first failing check as a `WebAuthnError`, including
/// `CredentialMismatch` for an assertion from another credential,
/// `SignatureInvalid`, and `PossibleCloneDetected` from the counter policy
pub fn verify_authentication_response(
    response: &AuthenticationResponse,
    expected: &ExpectedAuthentication,
    authenticator: &Authenticator,
) -> Result<VerifiedAuthentication, WebAuthnError> {
    let result = verify(response, expected, authenticator);
    if let Err(err) = &result {
        warn!("Authentication rejected: {:?}", err.kind());
    }
    result
}

fn verify(
    response: &AuthenticationResponse,
    expected: &ExpectedAuthentication,
    authenticator: &Authenticator,
) -> Result<VerifiedAuthentication, WebAuthnError> {
    let credential_id = ceremony::credential_id(&response.id, &response.raw_id, &response.r#type)?;

    // 1. Client data
    let client_data_json =
        crypto::base64url_decode(&response.response.client_data_json, "clientDataJSON")?;
    let client_data = CollectedClientData::parse(&client_data_json)?;
    client_data.validate(CeremonyType::Get, &expected.challenges, &expected.origins)?;

    // 2. Credential
    if !crypto::constant_time_eq(&credential_id, &authenticator.credential_id) {
        return Err(WebAuthnError::CredentialMismatch(format!(
            "credential {} is not the stored credential",
            response.id
        )));
    }

    // 3. Authenticator data
    let auth_data_bytes =
        crypto::base64url_decode(&response.response.authenticator_data, "authenticatorData")?;
    let auth_data = AuthenticatorData::parse(&auth_data_bytes, &expected.decoder)?;
    let rp_id = ceremony::matching_rp_id(&auth_data, &expected.rp_ids)?;
    ceremony::check_user_flags(&auth_data, expected.require_user_verification)?;

    // 4. Assertion signature over authenticatorData || SHA-256(clientDataJSON)
    let public_key =
        CosePublicKey::from_bytes(&authenticator.credential_public_key, &expected.decoder)?;
    let sig = crypto::base64url_decode(&response.response.signature, "signature")?;
    let client_data_hash = crypto::sha256(&client_data_json);
    let signed_data = [auth_data_bytes.as_slice(), client_data_hash.as_slice()].concat();
    if !signature::verify_signature(&public_key, &signed_data, &sig)? {
        return Err(WebAuthnError::SignatureInvalid(format!(
            "{} assertion signature does not verify",
            public_key.alg
        )));
    }

    // 5. Counter
    expected
        .zero_counter_policy
        .check(authenticator.counter, auth_data.sign_count)?;

    let user_handle = response
        .response
        .user_handle
        .as_deref()
        .filter(|handle| !handle.is_empty())
        .map(|handle| crypto::base64url_decode(handle, "userHandle"))
        .transpose()?;

    debug!(
        "Assertion verified, counter {} -> {}",
        authenticator.counter, auth_data.sign_count
    );

    Ok(VerifiedAuthentication {
        verified: true,
        authentication_info: Some(AuthenticationInfo {
            credential_id,
            new_counter: auth_data.sign_count,
            credential_device_type: auth_data.credential_device_type(),
            credential_backed_up: auth_data.credential_backed_up(),
            user_verified: auth_data.flags.user_verified(),
            origin: client_data.origin,
            rp_id,
            user_handle,
            authenticator_extension_results: ceremony::extension_results(&auth_data),
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_must_increase() {
        let policy = ZeroCounterPolicy::Exempt;
        assert!(policy.check(5, 6).is_ok());
        assert!(matches!(
            policy.check(5, 5),
            Err(WebAuthnError::PossibleCloneDetected(_))
        ));
        assert!(policy.check(5, 4).is_err());
        assert!(policy.check(5, 0).is_err());
    }

    #[test]
    fn test_zero_counter_policy() {
        assert!(ZeroCounterPolicy::Exempt.check(0, 0).is_ok());
        assert!(ZeroCounterPolicy::Exempt.check(0, 1).is_ok());
        assert!(matches!(
            ZeroCounterPolicy::Enforce.check(0, 0),
            Err(WebAuthnError::PossibleCloneDetected(_))
        ));
        assert!(ZeroCounterPolicy::Enforce.check(0, 1).is_ok());
    }

    #[test]
    fn test_zero_counter_policy_serde() {
        let policy: ZeroCounterPolicy = serde_json::from_str("\"enforce\"").expect("parse");
        assert_eq!(policy, ZeroCounterPolicy::Enforce);
        assert_eq!(ZeroCounterPolicy::default(), ZeroCounterPolicy::Exempt);
    }
}
