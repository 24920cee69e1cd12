//! `android-safetynet` attestation
//!
//! `response` is a compact JWS from the SafetyNet API. Its header carries the
//! signing chain as standard-base64 DER; its payload carries the nonce and the
//! device integrity verdicts.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use ciborium::value::Value;
use openssl::bn::BigNum;
use openssl::ecdsa::EcdsaSig;
use serde::{Deserialize, Serialize};

use super::certificate::{self, SubjectField};
use super::{Evidence, StatementInput};
use crate::cbor;
use crate::cose::CoseAlgorithm;
use crate::crypto;
use crate::error::WebAuthnError;

const SAFETYNET_HOSTNAME: &str = "attest.android.com";

/// Policy for SafetyNet attestation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyNetPolicy {
    pub require_cts_profile_match: bool,
    pub require_basic_integrity: bool,
    /// Maximum age of the attestation timestamp in milliseconds
    pub max_age_ms: u64,
}

impl Default for SafetyNetPolicy {
    fn default() -> Self {
        Self {
            require_cts_profile_match: true,
            require_basic_integrity: true,
            max_age_ms: 60_000,
        }
    }
}

#[derive(Debug, Deserialize)]
struct JwsHeader {
    alg: String,
    x5c: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SafetyNetPayload {
    nonce: String,
    timestamp_ms: i64,
    #[serde(default)]
    cts_profile_match: bool,
    #[serde(default)]
    basic_integrity: bool,
}

pub(super) fn verify(
    stmt: &[(Value, Value)],
    input: &StatementInput<'_>,
) -> Result<Evidence, WebAuthnError> {
    let ver = cbor::required_text(stmt, "ver").map_err(|_| {
        WebAuthnError::attestation("android-safetynet statement lacks ver")
    })?;
    if ver.is_empty() {
        return Err(WebAuthnError::attestation("android-safetynet ver is empty"));
    }
    let response = super::statement_bytes(stmt, "response")?;
    let response = std::str::from_utf8(response)
        .map_err(|_| WebAuthnError::attestation("SafetyNet response is not UTF-8"))?;

    let mut parts = response.split('.');
    let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(WebAuthnError::attestation(
            "SafetyNet response is not a compact JWS",
        ));
    };

    let header: JwsHeader = decode_segment(header_b64, "header")?;
    let payload: SafetyNetPayload = decode_segment(payload_b64, "payload")?;
    let jws_signature = crypto::base64url_decode(signature_b64, "JWS signature")
        .map_err(|e| WebAuthnError::attestation(e.to_string()))?;

    let x5c = header
        .x5c
        .iter()
        .map(|cert| {
            STANDARD
                .decode(cert)
                .map_err(|_| WebAuthnError::attestation("SafetyNet x5c is not base64"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let chain = certificate::parse_chain(&x5c)?;
    certificate::validate_chain(&chain)?;
    let leaf = &chain[0];
    if certificate::subject_field(leaf, SubjectField::CommonName).as_deref()
        != Some(SAFETYNET_HOSTNAME)
    {
        return Err(WebAuthnError::attestation(format!(
            "SafetyNet certificate is not issued to {SAFETYNET_HOSTNAME}"
        )));
    }

    let (alg, signature) = match header.alg.as_str() {
        "RS256" => (CoseAlgorithm::Rs256, jws_signature),
        "ES256" => (CoseAlgorithm::Es256, raw_ecdsa_to_der(&jws_signature)?),
        other => {
            return Err(WebAuthnError::attestation(format!(
                "SafetyNet JWS algorithm {other} is not supported"
            )))
        }
    };
    let signing_input = format!("{header_b64}.{payload_b64}");
    super::require_signature(
        &certificate::certificate_key(leaf)?,
        alg,
        signing_input.as_bytes(),
        &signature,
        "SafetyNet JWS",
    )?;

    let expected_nonce = STANDARD.encode(crypto::sha256(&input.signed_data()));
    if payload.nonce != expected_nonce {
        return Err(WebAuthnError::attestation(
            "SafetyNet nonce does not match authenticator data",
        ));
    }
    check_verdicts(&payload, &input.policy.safetynet)?;

    Ok(Evidence::Certificates(x5c.clone()))
}

fn check_verdicts(payload: &SafetyNetPayload, policy: &SafetyNetPolicy) -> Result<(), WebAuthnError> {
    if policy.require_cts_profile_match && !payload.cts_profile_match {
        return Err(WebAuthnError::attestation(
            "SafetyNet ctsProfileMatch is false",
        ));
    }
    if policy.require_basic_integrity && !payload.basic_integrity {
        return Err(WebAuthnError::attestation("SafetyNet basicIntegrity is false"));
    }

    let now_ms = Utc::now().timestamp_millis();
    let max_age = i64::try_from(policy.max_age_ms).unwrap_or(i64::MAX);
    if payload.timestamp_ms > now_ms {
        return Err(WebAuthnError::attestation(
            "SafetyNet timestamp is in the future",
        ));
    }
    if now_ms.saturating_sub(payload.timestamp_ms) > max_age {
        return Err(WebAuthnError::attestation(format!(
            "SafetyNet attestation is older than {max_age} ms"
        )));
    }
    Ok(())
}

fn decode_segment<T: serde::de::DeserializeOwned>(
    segment: &str,
    what: &str,
) -> Result<T, WebAuthnError> {
    let bytes = crypto::base64url_decode(segment, what)
        .map_err(|e| WebAuthnError::attestation(e.to_string()))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| WebAuthnError::attestation(format!("Invalid SafetyNet {what}: {e}")))
}

/// JWS ES256 signatures are `r || s`; the verifier wants DER
fn raw_ecdsa_to_der(raw: &[u8]) -> Result<Vec<u8>, WebAuthnError> {
    if raw.len() != 64 {
        return Err(WebAuthnError::attestation(
            "SafetyNet ES256 signature must be 64 bytes",
        ));
    }
    let convert = || -> Result<Vec<u8>, openssl::error::ErrorStack> {
        let r = BigNum::from_slice(&raw[..32])?;
        let s = BigNum::from_slice(&raw[32..])?;
        EcdsaSig::from_private_components(r, s)?.to_der()
    };
    convert().map_err(|e| WebAuthnError::attestation(format!("Invalid ES256 signature: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(cts: bool, basic: bool, age_ms: i64) -> SafetyNetPayload {
        SafetyNetPayload {
            nonce: String::new(),
            timestamp_ms: Utc::now().timestamp_millis() - age_ms,
            cts_profile_match: cts,
            basic_integrity: basic,
        }
    }

    #[test]
    fn test_verdict_policy() {
        let policy = SafetyNetPolicy::default();
        assert!(check_verdicts(&payload(true, true, 0), &policy).is_ok());
        assert!(check_verdicts(&payload(false, true, 0), &policy).is_err());
        assert!(check_verdicts(&payload(true, false, 0), &policy).is_err());

        let lenient = SafetyNetPolicy {
            require_cts_profile_match: false,
            ..SafetyNetPolicy::default()
        };
        assert!(check_verdicts(&payload(false, true, 0), &lenient).is_ok());
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let policy = SafetyNetPolicy::default();
        assert!(check_verdicts(&payload(true, true, 120_000), &policy).is_err());
        assert!(check_verdicts(&payload(true, true, -120_000), &policy).is_err());
    }

    #[test]
    fn test_raw_ecdsa_conversion() {
        let mut raw = vec![0u8; 64];
        raw[31] = 1;
        raw[63] = 2;
        let der = raw_ecdsa_to_der(&raw).expect("der");
        assert_eq!(der, vec![0x30, 0x06, 0x02, 0x01, 0x01, 0x02, 0x01, 0x02]);
        assert!(raw_ecdsa_to_der(&raw[..63]).is_err());
    }
}
