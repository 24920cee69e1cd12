//! Registration and authentication option generation
//!
//! Callers fill in the fields they care about; everything left as `None` is
//! resolved to a documented default in a single step before the options are
//! built. Nothing here performs I/O; the caller stores the challenge.

use log::debug;

use crate::cose::CoseAlgorithm;
use crate::crypto;
use crate::error::WebAuthnError;
use crate::types::{
    AttestationConveyance, AuthenticationOptions, AuthenticatorAttachment,
    AuthenticatorSelectionCriteria, CredentialDescriptor, PublicKeyCredentialDescriptor,
    PublicKeyCredentialParameters, RegistrationExtensions, RegistrationOptions, RelyingParty,
    ResidentKeyRequirement, UserEntity, UserVerificationRequirement, PUBLIC_KEY_CREDENTIAL_TYPE,
};

/// Ceremony timeout when none is configured
pub const DEFAULT_TIMEOUT_MS: u32 = 60_000;

/// Algorithms advertised when none are configured, in preference order
pub const DEFAULT_ALGORITHMS: [CoseAlgorithm; 3] = [
    CoseAlgorithm::Es256,
    CoseAlgorithm::EdDsa,
    CoseAlgorithm::Rs256,
];

/// Inputs for [`generate_registration_options`]
#[derive(Debug, Clone, Default)]
pub struct RegistrationOptionsConfig {
    pub rp_name: String,
    pub rp_id: String,
    pub user_name: String,
    /// Defaults to `user_name`
    pub user_display_name: Option<String>,
    /// Defaults to 32 random bytes
    pub user_id: Option<Vec<u8>>,
    /// Defaults to 32 random bytes; at least 16 bytes when supplied
    pub challenge: Option<Vec<u8>>,
    pub timeout_ms: Option<u32>,
    pub attestation: Option<AttestationConveyance>,
    /// Credentials the user already has, so authenticators do not re-register
    pub exclude_credentials: Vec<CredentialDescriptor>,
    pub authenticator_attachment: Option<AuthenticatorAttachment>,
    pub resident_key: Option<ResidentKeyRequirement>,
    pub user_verification: Option<UserVerificationRequirement>,
    pub supported_algorithms: Option<Vec<CoseAlgorithm>>,
}

/// Inputs for [`generate_authentication_options`]
#[derive(Debug, Clone, Default)]
pub struct AuthenticationOptionsConfig {
    pub rp_id: String,
    /// Defaults to 32 random bytes; at least 16 bytes when supplied
    pub challenge: Option<Vec<u8>>,
    pub timeout_ms: Option<u32>,
    /// Empty for the discoverable credential flow
    pub allow_credentials: Vec<CredentialDescriptor>,
    pub user_verification: Option<UserVerificationRequirement>,
}

/// Registration config with every default applied
struct ResolvedRegistration {
    user_display_name: String,
    user_id: Vec<u8>,
    challenge: Vec<u8>,
    timeout_ms: u32,
    attestation: AttestationConveyance,
    resident_key: ResidentKeyRequirement,
    user_verification: UserVerificationRequirement,
    algorithms: Vec<CoseAlgorithm>,
}

impl RegistrationOptionsConfig {
    fn resolve(&self) -> Result<ResolvedRegistration, WebAuthnError> {
        if self.rp_id.is_empty() {
            return Err(WebAuthnError::ConfigurationError(
                "Relying party ID cannot be empty".into(),
            ));
        }
        if self.user_name.is_empty() {
            return Err(WebAuthnError::ConfigurationError(
                "User name cannot be empty".into(),
            ));
        }

        let user_id = match &self.user_id {
            Some(id) if id.is_empty() || id.len() > 64 => {
                return Err(WebAuthnError::ConfigurationError(
                    "User ID must be 1 to 64 bytes".into(),
                ))
            }
            Some(id) => id.clone(),
            None => crypto::generate_user_handle()?,
        };

        let mut algorithms: Vec<CoseAlgorithm> = Vec::new();
        for alg in self
            .supported_algorithms
            .as_deref()
            .unwrap_or(&DEFAULT_ALGORITHMS)
        {
            if !algorithms.contains(alg) {
                algorithms.push(*alg);
            }
        }
        if algorithms.is_empty() {
            return Err(WebAuthnError::ConfigurationError(
                "At least one supported algorithm is required".into(),
            ));
        }

        Ok(ResolvedRegistration {
            user_display_name: self
                .user_display_name
                .clone()
                .unwrap_or_else(|| self.user_name.clone()),
            user_id,
            challenge: resolve_challenge(self.challenge.as_deref())?,
            timeout_ms: self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
            attestation: self.attestation.unwrap_or_default(),
            resident_key: self.resident_key.unwrap_or_default(),
            user_verification: self.user_verification.unwrap_or_default(),
            algorithms,
        })
    }
}

fn resolve_challenge(challenge: Option<&[u8]>) -> Result<Vec<u8>, WebAuthnError> {
    match challenge {
        Some(challenge) if challenge.len() < crypto::MIN_CHALLENGE_LEN => {
            Err(WebAuthnError::ConfigurationError(format!(
                "Challenge must be at least {} bytes, got {}",
                crypto::MIN_CHALLENGE_LEN,
                challenge.len()
            )))
        }
        Some(challenge) => Ok(challenge.to_vec()),
        None => crypto::generate_challenge(),
    }
}

/// Build `PublicKeyCredentialCreationOptions` for a new credential
///
/// # Errors
/// Returns `ConfigurationError` for an empty RP ID or user name, an
/// out-of-range user ID, a short challenge, an empty algorithm list, or a
/// failing random source
pub fn generate_registration_options(
    config: &RegistrationOptionsConfig,
) -> Result<RegistrationOptions, WebAuthnError> {
    let resolved = config.resolve()?;
    debug!(
        "Generated registration options for RP {} with {} excluded credentials",
        config.rp_id,
        config.exclude_credentials.len()
    );

    Ok(RegistrationOptions {
        challenge: crypto::base64url_encode(&resolved.challenge),
        rp: RelyingParty {
            id: config.rp_id.clone(),
            name: config.rp_name.clone(),
        },
        user: UserEntity {
            id: crypto::base64url_encode(&resolved.user_id),
            name: config.user_name.clone(),
            display_name: resolved.user_display_name,
        },
        pub_key_cred_params: resolved
            .algorithms
            .iter()
            .map(|alg| PublicKeyCredentialParameters {
                r#type: PUBLIC_KEY_CREDENTIAL_TYPE.to_string(),
                alg: *alg,
            })
            .collect(),
        timeout: resolved.timeout_ms,
        exclude_credentials: config
            .exclude_credentials
            .iter()
            .map(PublicKeyCredentialDescriptor::from)
            .collect(),
        authenticator_selection: AuthenticatorSelectionCriteria {
            authenticator_attachment: config.authenticator_attachment,
            resident_key: resolved.resident_key,
            require_resident_key: resolved.resident_key == ResidentKeyRequirement::Required,
            user_verification: resolved.user_verification,
        },
        attestation: resolved.attestation,
        extensions: RegistrationExtensions { cred_props: true },
    })
}

/// Build `PublicKeyCredentialRequestOptions` for an assertion
///
/// # Errors
/// Returns `ConfigurationError` for an empty RP ID, a short challenge, or a
/// failing random source
pub fn generate_authentication_options(
    config: &AuthenticationOptionsConfig,
) -> Result<AuthenticationOptions, WebAuthnError> {
    if config.rp_id.is_empty() {
        return Err(WebAuthnError::ConfigurationError(
            "Relying party ID cannot be empty".into(),
        ));
    }
    let challenge = resolve_challenge(config.challenge.as_deref())?;

    Ok(AuthenticationOptions {
        challenge: crypto::base64url_encode(&challenge),
        timeout: config.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
        rp_id: config.rp_id.clone(),
        allow_credentials: config
            .allow_credentials
            .iter()
            .map(PublicKeyCredentialDescriptor::from)
            .collect(),
        user_verification: config.user_verification.unwrap_or_default(),
    })
}

impl RegistrationOptions {
    /// Raw challenge bytes to hand to the verifier
    ///
    /// # Errors
    /// Returns `MalformedEncoding` if the challenge was altered after generation
    pub fn challenge_bytes(&self) -> Result<Vec<u8>, WebAuthnError> {
        crypto::base64url_decode(&self.challenge, "challenge")
    }
}

impl AuthenticationOptions {
    /// Raw challenge bytes to hand to the verifier
    ///
    /// # Errors
    /// Returns `MalformedEncoding` if the challenge was altered after generation
    pub fn challenge_bytes(&self) -> Result<Vec<u8>, WebAuthnError> {
        crypto::base64url_decode(&self.challenge, "challenge")
    }
}
