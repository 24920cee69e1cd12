use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::attestation::AttestationPolicy;
use crate::authentication::ZeroCounterPolicy;
use crate::cbor::DecoderConfig;
use crate::cose::CoseAlgorithm;
use crate::error::WebAuthnError;
use crate::options::{DEFAULT_ALGORITHMS, DEFAULT_TIMEOUT_MS};
use crate::types::{
    AttestationConveyance, AuthenticatorAttachment, RelyingPartyConfig, ResidentKeyRequirement,
    UserVerificationRequirement,
};

/// Environment variable naming an alternative settings file
pub const SETTINGS_PATH_ENV: &str = "WEBAUTHN_SETTINGS_PATH";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct WebAuthnSettings {
    pub relying_party: RelyingPartySettings,
    pub ceremony: CeremonySettings,
    pub verification: VerificationSettings,
    pub decoder: DecoderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RelyingPartySettings {
    pub id: String,
    pub name: String,
    pub origins: Vec<String>,
    /// Extra RP IDs accepted during verification, e.g. after a domain move
    pub rp_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CeremonySettings {
    pub timeout_ms: u32,
    pub attestation: AttestationConveyance,
    pub resident_key: ResidentKeyRequirement,
    pub user_verification: UserVerificationRequirement,
    pub authenticator_attachment: Option<AuthenticatorAttachment>,
    /// COSE algorithm identifiers in preference order
    pub algorithms: Vec<CoseAlgorithm>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct VerificationSettings {
    pub require_user_verification: bool,
    pub zero_counter_policy: ZeroCounterPolicy,
    pub attestation: AttestationPolicy,
}

impl Default for RelyingPartySettings {
    fn default() -> Self {
        Self {
            id: "localhost".to_string(),
            name: "Vouchrs".to_string(),
            origins: vec!["http://localhost:8080".to_string()],
            rp_ids: Vec::new(),
        }
    }
}

impl Default for CeremonySettings {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            attestation: AttestationConveyance::default(),
            resident_key: ResidentKeyRequirement::default(),
            user_verification: UserVerificationRequirement::default(),
            authenticator_attachment: None,
            algorithms: DEFAULT_ALGORITHMS.to_vec(),
        }
    }
}

impl WebAuthnSettings {
    /// Load settings from configuration files and environment variables
    ///
    /// Settings are loaded with the following priority (highest to lowest):
    /// 1. Environment variables
    /// 2. The file named by `WEBAUTHN_SETTINGS_PATH` (if set)
    /// 3. Settings.toml in current directory (if exists)
    /// 4. Default settings
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if a settings file cannot be read or parsed
    pub fn load() -> Result<Self, WebAuthnError> {
        let mut settings = Self::load_base_settings()?;
        Self::apply_env_overrides(&mut settings);
        Ok(settings)
    }

    /// Load settings from a specific TOML file, then apply environment overrides
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if the file cannot be read or parsed
    pub fn load_from_path(path: &Path) -> Result<Self, WebAuthnError> {
        let mut settings = Self::read_file(path)?;
        Self::apply_env_overrides(&mut settings);
        Ok(settings)
    }

    /// Parse settings from TOML text without consulting the environment
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if the TOML is invalid
    pub fn from_toml(content: &str) -> Result<Self, WebAuthnError> {
        basic_toml::from_str(content)
            .map_err(|e| WebAuthnError::ConfigurationError(format!("Invalid settings: {e}")))
    }

    fn load_base_settings() -> Result<Self, WebAuthnError> {
        // 1. Start with default settings
        let mut settings = Self::default();

        // 2. Settings.toml in current directory
        let default_config_path = PathBuf::from("Settings.toml");
        if default_config_path.exists() {
            settings = Self::read_file(&default_config_path)?;
            info!("Loaded settings from {}", default_config_path.display());
        }

        // 3. Explicit settings path takes precedence
        if let Ok(path) = std::env::var(SETTINGS_PATH_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                settings = Self::read_file(&path)?;
                info!("Overriding settings from {}", path.display());
            } else {
                warn!(
                    "{SETTINGS_PATH_ENV} set but no settings file found at: {}",
                    path.display()
                );
            }
        }

        Ok(settings)
    }

    fn read_file(path: &Path) -> Result<Self, WebAuthnError> {
        let content = fs::read_to_string(path).map_err(|e| {
            WebAuthnError::ConfigurationError(format!("Cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Apply environment variable overrides to settings
    pub fn apply_env_overrides(settings: &mut Self) {
        Self::apply_relying_party_env_overrides(&mut settings.relying_party);
        Self::apply_numeric_env_override("WEBAUTHN_TIMEOUT_MS", &mut settings.ceremony.timeout_ms);
        if let Ok(value) = std::env::var("WEBAUTHN_REQUIRE_USER_VERIFICATION") {
            match value.parse::<bool>() {
                Ok(required) => settings.verification.require_user_verification = required,
                Err(_) => warn!("Ignoring WEBAUTHN_REQUIRE_USER_VERIFICATION={value}"),
            }
        }
    }

    fn apply_relying_party_env_overrides(rp: &mut RelyingPartySettings) {
        if let Ok(id) = std::env::var("WEBAUTHN_RP_ID") {
            rp.id = id;
        }
        if let Ok(name) = std::env::var("WEBAUTHN_RP_NAME") {
            rp.name = name;
        }
        if let Ok(origins) = std::env::var("WEBAUTHN_RP_ORIGINS") {
            rp.origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
    }

    /// Helper function to apply numeric environment variable overrides
    fn apply_numeric_env_override(env_var: &str, target: &mut u32) {
        if let Ok(value_str) = std::env::var(env_var) {
            if let Ok(value) = value_str.parse::<u32>() {
                debug!("{env_var} overrides configured value {target}");
                *target = value;
            } else {
                warn!("Ignoring non-numeric {env_var}={value_str}");
            }
        }
    }

    /// Validated relying party configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if the RP ID or origins are invalid
    pub fn relying_party_config(&self) -> Result<RelyingPartyConfig, WebAuthnError> {
        let rp = &self.relying_party;
        let config = RelyingPartyConfig::new(&rp.name, &rp.id, rp.origins.clone())?;
        if rp.rp_ids.is_empty() {
            Ok(config)
        } else {
            config.with_rp_ids(rp.rp_ids.clone())
        }
    }
}
