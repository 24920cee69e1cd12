//! `WebAuthn` service implementation
//!
//! This module ties settings, option generation and response verification
//! together. Ceremony state returned by the `start_*` methods is owned by the
//! caller (session, cache) and handed back to the matching `finish_*` method.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::attestation::TrustStore;
use crate::authentication::{verify_authentication_response, ExpectedAuthentication};
use crate::cbor::CborDecoder;
use crate::crypto;
use crate::error::WebAuthnError;
use crate::options::{
    generate_authentication_options, generate_registration_options, AuthenticationOptionsConfig,
    RegistrationOptionsConfig,
};
use crate::registration::{verify_registration_response, ExpectedRegistration};
use crate::settings::WebAuthnSettings;
use crate::store::PasskeyStore;
use crate::types::{
    AuthenticationOptions, AuthenticationResponse, Authenticator, CredentialDescriptor,
    RegistrationOptions, RegistrationResponse, RelyingPartyConfig, UserVerificationRequirement,
    VerifiedAuthentication, VerifiedRegistration,
};

/// State kept between `start_registration` and `finish_registration`
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RegistrationState {
    pub user_handle: Vec<u8>,
    pub user_name: String,
    pub challenge: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// State kept between `start_authentication` and `finish_authentication`
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AuthenticationState {
    pub challenge: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// Core `WebAuthn` service
pub struct WebAuthnService {
    settings: WebAuthnSettings,
    relying_party: RelyingPartyConfig,
    trust_store: Option<Arc<dyn TrustStore>>,
}

impl WebAuthnService {
    /// Create a new `WebAuthnService` with the given settings
    ///
    /// # Errors
    /// Returns `ConfigurationError` if the relying party settings are invalid
    pub fn new(settings: WebAuthnSettings) -> Result<Self, WebAuthnError> {
        let relying_party = settings.relying_party_config()?;
        info!(
            "WebAuthn relying party {} accepting {} origin(s)",
            relying_party.id,
            relying_party.origins.len()
        );
        Ok(Self {
            settings,
            relying_party,
            trust_store: None,
        })
    }

    /// Resolve attestation chains through `trust_store`
    #[must_use]
    pub fn with_trust_store(mut self, trust_store: Arc<dyn TrustStore>) -> Self {
        self.trust_store = Some(trust_store);
        self
    }

    #[must_use]
    pub fn settings(&self) -> &WebAuthnSettings {
        &self.settings
    }

    #[must_use]
    pub fn relying_party(&self) -> &RelyingPartyConfig {
        &self.relying_party
    }

    /// Create registration options for a new credential
    ///
    /// # Arguments
    /// * `user_handle` - Existing user handle, or `None` to generate one
    /// * `user_name` - User name (e.g., email)
    /// * `display_name` - User display name
    /// * `existing` - Authenticators the user already registered
    ///
    /// # Errors
    /// Returns `ConfigurationError` if the options cannot be generated
    pub fn start_registration(
        &self,
        user_handle: Option<&[u8]>,
        user_name: &str,
        display_name: &str,
        existing: &[Authenticator],
    ) -> Result<(RegistrationOptions, RegistrationState), WebAuthnError> {
        let ceremony = &self.settings.ceremony;
        let user_handle = match user_handle {
            Some(handle) => handle.to_vec(),
            None => crypto::generate_user_handle()?,
        };
        let challenge = crypto::generate_challenge()?;

        let options = generate_registration_options(&RegistrationOptionsConfig {
            rp_name: self.relying_party.name.clone(),
            rp_id: self.relying_party.id.clone(),
            user_name: user_name.to_string(),
            user_display_name: Some(display_name.to_string()),
            user_id: Some(user_handle.clone()),
            challenge: Some(challenge.clone()),
            timeout_ms: Some(ceremony.timeout_ms),
            attestation: Some(ceremony.attestation),
            exclude_credentials: existing.iter().map(CredentialDescriptor::from).collect(),
            authenticator_attachment: ceremony.authenticator_attachment,
            resident_key: Some(ceremony.resident_key),
            user_verification: Some(ceremony.user_verification),
            supported_algorithms: Some(ceremony.algorithms.clone()),
        })?;

        let state = RegistrationState {
            user_handle,
            user_name: user_name.to_string(),
            challenge,
            created_at: Utc::now(),
        };

        Ok((options, state))
    }

    /// Complete registration with client response
    ///
    /// # Errors
    /// Returns a `WebAuthnError` if the ceremony expired or any verification
    /// step fails
    pub fn finish_registration(
        &self,
        response: &RegistrationResponse,
        state: &RegistrationState,
    ) -> Result<VerifiedRegistration, WebAuthnError> {
        self.check_not_expired(state.created_at)?;

        let mut expected = ExpectedRegistration::new(
            state.challenge.clone(),
            self.relying_party.origins.clone(),
            self.relying_party.rp_ids.clone(),
        )
        .require_user_verification(self.require_user_verification())
        .supported_algorithms(self.settings.ceremony.algorithms.clone())
        .attestation_policy(self.settings.verification.attestation.clone())
        .decoder(self.decoder());
        if let Some(store) = &self.trust_store {
            expected = expected.trust_store(Arc::clone(store));
        }

        let verified = verify_registration_response(response, &expected)?;
        debug!("Registration finished for {}", state.user_name);
        Ok(verified)
    }

    /// Create authentication options to verify an existing credential
    ///
    /// # Arguments
    /// * `credentials` - Credentials to allow; empty for discoverable credentials
    ///
    /// # Errors
    /// Returns `ConfigurationError` if the options cannot be generated
    pub fn start_authentication(
        &self,
        credentials: &[Authenticator],
    ) -> Result<(AuthenticationOptions, AuthenticationState), WebAuthnError> {
        let challenge = crypto::generate_challenge()?;
        let options = generate_authentication_options(&AuthenticationOptionsConfig {
            rp_id: self.relying_party.id.clone(),
            challenge: Some(challenge.clone()),
            timeout_ms: Some(self.settings.ceremony.timeout_ms),
            allow_credentials: credentials.iter().map(CredentialDescriptor::from).collect(),
            user_verification: Some(self.settings.ceremony.user_verification),
        })?;

        let state = AuthenticationState {
            challenge,
            created_at: Utc::now(),
        };

        Ok((options, state))
    }

    /// Complete authentication with client response
    ///
    /// The caller persists `new_counter` from the result.
    ///
    /// # Errors
    /// Returns a `WebAuthnError` if the ceremony expired, the signature does
    /// not verify, or the counter indicates a cloned authenticator
    pub fn finish_authentication(
        &self,
        response: &AuthenticationResponse,
        state: &AuthenticationState,
        authenticator: &Authenticator,
    ) -> Result<VerifiedAuthentication, WebAuthnError> {
        self.check_not_expired(state.created_at)?;

        let expected = ExpectedAuthentication::new(
            state.challenge.clone(),
            self.relying_party.origins.clone(),
            self.relying_party.rp_ids.clone(),
        )
        .require_user_verification(self.require_user_verification())
        .zero_counter_policy(self.settings.verification.zero_counter_policy)
        .decoder(self.decoder());

        verify_authentication_response(response, &expected, authenticator)
    }

    /// Complete authentication against a [`PasskeyStore`]
    ///
    /// Looks the credential up, verifies the response and stores the new
    /// counter. Returns the user handle the credential belongs to.
    ///
    /// # Errors
    /// Returns `CredentialMismatch` for an unknown credential, any
    /// verification failure, or a store error
    pub fn finish_authentication_with_store(
        &self,
        store: &dyn PasskeyStore,
        response: &AuthenticationResponse,
        state: &AuthenticationState,
    ) -> Result<(Vec<u8>, VerifiedAuthentication), WebAuthnError> {
        let credential_id = crypto::base64url_decode(&response.raw_id, "rawId")?;
        let stored = store.load_authenticator(&credential_id)?.ok_or_else(|| {
            WebAuthnError::CredentialMismatch(format!("unknown credential {}", response.id))
        })?;

        let verified = self.finish_authentication(response, state, &stored.authenticator)?;
        if let Some(info) = &verified.authentication_info {
            store.update_counter(&credential_id, info.new_counter)?;
        }
        Ok((stored.user_handle, verified))
    }

    fn require_user_verification(&self) -> bool {
        self.settings.verification.require_user_verification
            || self.settings.ceremony.user_verification == UserVerificationRequirement::Required
    }

    fn decoder(&self) -> CborDecoder {
        CborDecoder::new(self.settings.decoder)
    }

    fn check_not_expired(&self, created_at: DateTime<Utc>) -> Result<(), WebAuthnError> {
        let timeout = Duration::milliseconds(i64::from(self.settings.ceremony.timeout_ms));
        let expires_at = created_at.checked_add_signed(timeout).ok_or_else(|| {
            WebAuthnError::ClientDataInvalid("ceremony creation time is out of range".into())
        })?;
        if Utc::now() > expires_at {
            return Err(WebAuthnError::ClientDataInvalid(
                "ceremony challenge has expired".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> WebAuthnSettings {
        let mut settings = WebAuthnSettings::default();
        settings.relying_party.id = "example.com".to_string();
        settings.relying_party.name = "Example".to_string();
        settings.relying_party.origins = vec!["https://example.com".to_string()];
        settings
    }

    #[test]
    fn test_new_rejects_invalid_relying_party() {
        let mut bad = settings();
        bad.relying_party.origins = vec!["http://example.com".to_string()];
        assert!(matches!(
            WebAuthnService::new(bad),
            Err(WebAuthnError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_start_registration_uses_settings() {
        let service = WebAuthnService::new(settings()).expect("service");
        let (options, state) = service
            .start_registration(Some(b"user-1".as_slice()), "alice@example.com", "Alice", &[])
            .expect("start");

        assert_eq!(options.rp.id, "example.com");
        assert_eq!(options.user.display_name, "Alice");
        assert_eq!(options.user.id, crypto::base64url_encode(b"user-1"));
        assert_eq!(options.challenge_bytes().expect("challenge"), state.challenge);
        assert_eq!(state.user_handle, b"user-1".to_vec());
    }

    #[test]
    fn test_start_authentication_lists_credentials() {
        let service = WebAuthnService::new(settings()).expect("service");
        let (options, state) = service.start_authentication(&[]).expect("start");
        assert!(options.allow_credentials.is_empty());
        assert_eq!(state.challenge.len(), crypto::GENERATED_CHALLENGE_LEN);
    }

    #[test]
    fn test_expired_state_rejected() {
        let service = WebAuthnService::new(settings()).expect("service");
        let stale = Utc::now() - Duration::minutes(5);
        assert!(matches!(
            service.check_not_expired(stale),
            Err(WebAuthnError::ClientDataInvalid(_))
        ));
        assert!(service.check_not_expired(Utc::now()).is_ok());
    }

    #[test]
    fn test_out_of_range_creation_time_rejected() {
        let service = WebAuthnService::new(settings()).expect("service");
        assert!(matches!(
            service.check_not_expired(DateTime::<Utc>::MAX_UTC),
            Err(WebAuthnError::ClientDataInvalid(_))
        ));
    }
}
