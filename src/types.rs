//! `WebAuthn` core types
//!
//! Wire shapes exchanged with the browser (options out, responses in), the
//! persisted authenticator record, and the verification results.

use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::attestation::{AttestationFormat, AttestationType};
use crate::cose::CoseAlgorithm;
use crate::crypto;
use crate::error::WebAuthnError;

/// Credential type string used throughout the API
pub const PUBLIC_KEY_CREDENTIAL_TYPE: &str = "public-key";

/// Relying party identity and the origins it accepts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelyingPartyConfig {
    pub name: String,
    /// Primary RP ID, advertised in options
    pub id: String,
    pub origins: Vec<String>,
    /// Every RP ID accepted during verification; always contains `id`
    pub rp_ids: Vec<String>,
}

impl RelyingPartyConfig {
    /// Build a validated configuration
    ///
    /// # Errors
    /// Returns `ConfigurationError` if the RP ID is empty, no origin is given,
    /// an origin is not https (localhost excepted), an RP ID is a public
    /// suffix, or an RP ID is neither the host of an origin nor a domain
    /// suffix of it
    pub fn new(
        name: impl Into<String>,
        id: impl Into<String>,
        origins: Vec<String>,
    ) -> Result<Self, WebAuthnError> {
        let id = id.into();
        let config = Self {
            name: name.into(),
            rp_ids: vec![id.clone()],
            id,
            origins,
        };
        config.validate()?;
        Ok(config)
    }

    /// Accept additional RP IDs, e.g. during a domain migration
    ///
    /// Each RP ID only has to cover one of the configured origins, not all of
    /// them. An assertion scoped to `example.org` is then accepted from an
    /// `https://example.com` origin as well; the browser enforces the
    /// origin/RP ID pairing, this configuration does not.
    ///
    /// # Errors
    /// Returns `ConfigurationError` if an RP ID does not cover the origins
    pub fn with_rp_ids(mut self, rp_ids: Vec<String>) -> Result<Self, WebAuthnError> {
        for rp_id in rp_ids {
            if !self.rp_ids.contains(&rp_id) {
                self.rp_ids.push(rp_id);
            }
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), WebAuthnError> {
        if self.id.is_empty() {
            return Err(WebAuthnError::ConfigurationError(
                "Relying party ID cannot be empty".into(),
            ));
        }
        if self.origins.is_empty() {
            return Err(WebAuthnError::ConfigurationError(
                "At least one origin is required".into(),
            ));
        }

        let mut hosts = Vec::with_capacity(self.origins.len());
        for origin in &self.origins {
            let url = Url::parse(origin).map_err(|e| {
                WebAuthnError::ConfigurationError(format!("Invalid origin {origin}: {e}"))
            })?;
            let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
            if url.scheme() != "https" && host != "localhost" {
                return Err(WebAuthnError::ConfigurationError(format!(
                    "Origin {origin} must be https:// except for localhost"
                )));
            }
            hosts.push(host);
        }

        for rp_id in &self.rp_ids {
            let rp_id = rp_id.to_ascii_lowercase();
            if is_public_suffix(&rp_id) {
                return Err(WebAuthnError::ConfigurationError(format!(
                    "RP ID {rp_id} is a public suffix"
                )));
            }
            // Each RP ID must cover at least one origin
            if !hosts.iter().any(|host| rp_id_covers_host(&rp_id, host)) {
                return Err(WebAuthnError::ConfigurationError(format!(
                    "RP ID {rp_id} is not a registrable suffix of any origin host"
                )));
            }
        }
        Ok(())
    }
}

/// Listed in the public suffix list, e.g. `co.uk` or `github.io`
fn is_public_suffix(rp_id: &str) -> bool {
    let rp_id = rp_id.trim_end_matches('.');
    psl::suffix(rp_id.as_bytes())
        .is_some_and(|suffix| suffix.is_known() && suffix.as_bytes() == rp_id.as_bytes())
}

fn rp_id_covers_host(rp_id: &str, host: &str) -> bool {
    host == rp_id
        || (host.ends_with(rp_id)
            && host.as_bytes().get(host.len() - rp_id.len() - 1) == Some(&b'.')
            && rp_id.contains('.'))
}

/// Transport hints reported by authenticators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthenticatorTransport {
    Usb,
    Nfc,
    Ble,
    SmartCard,
    Hybrid,
    Internal,
    #[serde(other)]
    Unknown,
}

/// `credentialDeviceType` derived from the backup-eligible flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CredentialDeviceType {
    SingleDevice,
    MultiDevice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UserVerificationRequirement {
    Required,
    #[default]
    Preferred,
    Discouraged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResidentKeyRequirement {
    Discouraged,
    #[default]
    Preferred,
    Required,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttestationConveyance {
    #[default]
    None,
    Indirect,
    Direct,
    Enterprise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthenticatorAttachment {
    Platform,
    CrossPlatform,
}

/// Credential ID plus transports, used for allow and exclude lists
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialDescriptor {
    pub credential_id: Vec<u8>,
    pub transports: Vec<AuthenticatorTransport>,
}

impl From<&Authenticator> for CredentialDescriptor {
    fn from(authenticator: &Authenticator) -> Self {
        Self {
            credential_id: authenticator.credential_id.clone(),
            transports: authenticator.transports.clone(),
        }
    }
}

/// Registration options sent to the client (`PublicKeyCredentialCreationOptions`)
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationOptions {
    pub challenge: String, // Base64URL-encoded random challenge
    pub rp: RelyingParty,
    pub user: UserEntity,
    pub pub_key_cred_params: Vec<PublicKeyCredentialParameters>,
    pub timeout: u32, // Milliseconds
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_credentials: Vec<PublicKeyCredentialDescriptor>,
    pub authenticator_selection: AuthenticatorSelectionCriteria,
    pub attestation: AttestationConveyance,
    pub extensions: RegistrationExtensions,
}

/// Authentication options sent to the client (`PublicKeyCredentialRequestOptions`)
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationOptions {
    pub challenge: String, // Base64URL-encoded random challenge
    pub timeout: u32,      // Milliseconds
    pub rp_id: String,
    /// Empty for the discoverable credential flow
    #[serde(default)]
    pub allow_credentials: Vec<PublicKeyCredentialDescriptor>,
    pub user_verification: UserVerificationRequirement,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RelyingParty {
    pub id: String,
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserEntity {
    pub id: String, // Base64URL-encoded user handle
    pub name: String,
    pub display_name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PublicKeyCredentialParameters {
    #[serde(rename = "type")]
    pub r#type: String,
    pub alg: CoseAlgorithm,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorSelectionCriteria {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticator_attachment: Option<AuthenticatorAttachment>,
    pub resident_key: ResidentKeyRequirement,
    pub require_resident_key: bool,
    pub user_verification: UserVerificationRequirement,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationExtensions {
    #[serde(default)]
    pub cred_props: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PublicKeyCredentialDescriptor {
    #[serde(rename = "type")]
    pub r#type: String,
    pub id: String, // Base64URL-encoded credential ID
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transports: Vec<AuthenticatorTransport>,
}

impl From<&CredentialDescriptor> for PublicKeyCredentialDescriptor {
    fn from(descriptor: &CredentialDescriptor) -> Self {
        Self {
            r#type: PUBLIC_KEY_CREDENTIAL_TYPE.to_string(),
            id: crypto::base64url_encode(&descriptor.credential_id),
            transports: descriptor.transports.clone(),
        }
    }
}

/// Registration response from client
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResponse {
    pub id: String,     // Base64URL-encoded credential ID
    pub raw_id: String, // Base64URL-encoded raw credential ID
    pub response: AuthenticatorAttestationResponse,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticator_attachment: Option<AuthenticatorAttachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_extension_results: Option<serde_json::Value>,
    #[serde(rename = "type")]
    pub r#type: String,
}

/// Authentication response from client
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationResponse {
    pub id: String,     // Base64URL-encoded credential ID
    pub raw_id: String, // Base64URL-encoded raw credential ID
    pub response: AuthenticatorAssertionResponse,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticator_attachment: Option<AuthenticatorAttachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_extension_results: Option<serde_json::Value>,
    #[serde(rename = "type")]
    pub r#type: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorAttestationResponse {
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String, // Base64URL-encoded client data JSON
    pub attestation_object: String, // Base64URL-encoded attestation object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transports: Option<Vec<AuthenticatorTransport>>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorAssertionResponse {
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String, // Base64URL-encoded client data JSON
    pub authenticator_data: String, // Base64URL-encoded authenticator data
    pub signature: String,          // Base64URL-encoded signature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_handle: Option<String>, // Base64URL-encoded user handle
}

/// Credential record persisted by the caller after registration
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Authenticator {
    pub credential_id: Vec<u8>,
    pub credential_public_key: Vec<u8>, // COSE-encoded public key
    pub counter: u32,
    pub credential_device_type: CredentialDeviceType,
    pub credential_backed_up: bool,
    #[serde(default)]
    pub transports: Vec<AuthenticatorTransport>,
}

/// Outcome of a successful registration
#[derive(Serialize, Clone, Debug)]
pub struct VerifiedRegistration {
    pub verified: bool,
    pub registration_info: Option<RegistrationInfo>,
}

#[derive(Serialize, Clone, Debug)]
pub struct RegistrationInfo {
    pub fmt: AttestationFormat,
    pub aaguid: Uuid,
    pub credential_id: Vec<u8>,
    pub credential_public_key: Vec<u8>, // COSE-encoded public key
    pub credential_algorithm: CoseAlgorithm,
    pub counter: u32,
    pub credential_device_type: CredentialDeviceType,
    pub credential_backed_up: bool,
    pub attestation_type: AttestationType,
    /// DER certificates from `x5c`, leaf first
    pub trust_path: Vec<Vec<u8>>,
    pub user_verified: bool,
    pub origin: String,
    pub rp_id: String,
    pub transports: Vec<AuthenticatorTransport>,
    /// Authenticator extension outputs as JSON
    pub authenticator_extension_results: Option<serde_json::Value>,
}

impl RegistrationInfo {
    /// The authenticator record the caller should persist
    #[must_use]
    pub fn to_authenticator(&self) -> Authenticator {
        Authenticator {
            credential_id: self.credential_id.clone(),
            credential_public_key: self.credential_public_key.clone(),
            counter: self.counter,
            credential_device_type: self.credential_device_type,
            credential_backed_up: self.credential_backed_up,
            transports: self.transports.clone(),
        }
    }
}

/// Outcome of a successful authentication
#[derive(Serialize, Clone, Debug)]
pub struct VerifiedAuthentication {
    pub verified: bool,
    pub authentication_info: Option<AuthenticationInfo>,
}

#[derive(Serialize, Clone, Debug)]
pub struct AuthenticationInfo {
    pub credential_id: Vec<u8>,
    pub new_counter: u32,
    pub credential_device_type: CredentialDeviceType,
    pub credential_backed_up: bool,
    pub user_verified: bool,
    pub origin: String,
    pub rp_id: String,
    pub user_handle: Option<Vec<u8>>,
    pub authenticator_extension_results: Option<serde_json::Value>,
}
