//! Collected client data validation

use log::debug;
use serde::Deserialize;

use crate::crypto;
use crate::error::WebAuthnError;

/// Ceremony a client data blob must belong to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CeremonyType {
    Create,
    Get,
}

impl CeremonyType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "webauthn.create",
            Self::Get => "webauthn.get",
        }
    }
}

/// `CollectedClientData` as serialized by the browser
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectedClientData {
    #[serde(rename = "type")]
    pub r#type: String,
    pub challenge: String,
    pub origin: String,
    #[serde(default)]
    pub cross_origin: Option<bool>,
    #[serde(default)]
    pub top_origin: Option<String>,
}

impl CollectedClientData {
    /// Parse the raw `clientDataJSON` bytes
    ///
    /// # Errors
    /// Returns `MalformedEncoding` if the bytes are not the expected JSON object
    pub fn parse(client_data_json: &[u8]) -> Result<Self, WebAuthnError> {
        serde_json::from_slice(client_data_json)
            .map_err(|e| WebAuthnError::malformed(format!("Invalid clientDataJSON: {e}")))
    }

    /// Check type, challenge and origin
    ///
    /// # Errors
    /// Returns `ClientDataInvalid` naming the first field that does not match
    pub fn validate(
        &self,
        ceremony: CeremonyType,
        expected_challenges: &[Vec<u8>],
        expected_origins: &[String],
    ) -> Result<(), WebAuthnError> {
        if self.r#type != ceremony.as_str() {
            return Err(WebAuthnError::ClientDataInvalid(format!(
                "type {} is not {}",
                self.r#type,
                ceremony.as_str()
            )));
        }

        let challenge = crypto::base64url_decode(&self.challenge, "challenge")
            .map_err(|_| WebAuthnError::ClientDataInvalid("challenge is not base64url".into()))?;
        if !expected_challenges
            .iter()
            .any(|expected| crypto::constant_time_eq(expected, &challenge))
        {
            return Err(WebAuthnError::ClientDataInvalid(
                "challenge does not match".into(),
            ));
        }

        if !expected_origins.iter().any(|origin| *origin == self.origin) {
            debug!("Rejected client data origin {}", self.origin);
            return Err(WebAuthnError::ClientDataInvalid(format!(
                "origin {} is not expected",
                self.origin
            )));
        }

        if self.cross_origin == Some(true) {
            return Err(WebAuthnError::ClientDataInvalid(
                "crossOrigin ceremonies are not accepted".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_data(kind: &str, challenge: &[u8], origin: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "type": kind,
            "challenge": crypto::base64url_encode(challenge),
            "origin": origin,
        }))
        .expect("json")
    }

    #[test]
    fn test_valid_client_data() {
        let bytes = client_data("webauthn.get", &[9; 32], "https://example.com");
        let parsed = CollectedClientData::parse(&bytes).expect("parse");
        parsed
            .validate(
                CeremonyType::Get,
                &[vec![1; 32], vec![9; 32]],
                &["https://example.com".to_string()],
            )
            .expect("valid");
    }

    #[test]
    fn test_wrong_type_rejected() {
        let bytes = client_data("webauthn.get", &[9; 32], "https://example.com");
        let parsed = CollectedClientData::parse(&bytes).expect("parse");
        let err = parsed
            .validate(
                CeremonyType::Create,
                &[vec![9; 32]],
                &["https://example.com".to_string()],
            )
            .unwrap_err();
        assert!(matches!(err, WebAuthnError::ClientDataInvalid(_)));
    }

    #[test]
    fn test_every_challenge_bit_matters() {
        let expected = vec![0x5a; 32];
        let origins = ["https://example.com".to_string()];
        for bit in 0..expected.len() * 8 {
            let mut mutated = expected.clone();
            mutated[bit / 8] ^= 1 << (bit % 8);
            let bytes = client_data("webauthn.create", &mutated, "https://example.com");
            let parsed = CollectedClientData::parse(&bytes).expect("parse");
            let err = parsed
                .validate(CeremonyType::Create, &[expected.clone()], &origins)
                .unwrap_err();
            assert!(matches!(err, WebAuthnError::ClientDataInvalid(_)));
        }
    }

    #[test]
    fn test_unexpected_origin_rejected() {
        let bytes = client_data("webauthn.create", &[9; 32], "https://evil.example");
        let parsed = CollectedClientData::parse(&bytes).expect("parse");
        let err = parsed
            .validate(
                CeremonyType::Create,
                &[vec![9; 32]],
                &["https://localhost".to_string()],
            )
            .unwrap_err();
        assert!(matches!(err, WebAuthnError::ClientDataInvalid(_)));
    }

    #[test]
    fn test_malformed_json() {
        let err = CollectedClientData::parse(b"{not json").unwrap_err();
        assert!(matches!(err, WebAuthnError::MalformedEncoding(_)));
    }
}
