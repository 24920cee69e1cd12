//! Steps shared by registration and authentication verification

use ciborium::value::Value;
use log::debug;

use crate::authenticator_data::AuthenticatorData;
use crate::crypto;
use crate::error::WebAuthnError;
use crate::types::PUBLIC_KEY_CREDENTIAL_TYPE;

/// Decode the response credential ID, insisting `id` and `rawId` agree
pub(crate) fn credential_id(id: &str, raw_id: &str, kind: &str) -> Result<Vec<u8>, WebAuthnError> {
    if kind != PUBLIC_KEY_CREDENTIAL_TYPE {
        return Err(WebAuthnError::malformed(format!(
            "Credential type {kind} is not {PUBLIC_KEY_CREDENTIAL_TYPE}"
        )));
    }
    let id_bytes = crypto::base64url_decode(id, "id")?;
    let raw_bytes = crypto::base64url_decode(raw_id, "rawId")?;
    if id_bytes != raw_bytes {
        return Err(WebAuthnError::malformed("id and rawId differ"));
    }
    if id_bytes.is_empty() {
        return Err(WebAuthnError::malformed("Credential ID is empty"));
    }
    Ok(id_bytes)
}

/// The RP ID whose hash the authenticator reported
pub(crate) fn matching_rp_id(
    auth_data: &AuthenticatorData,
    rp_ids: &[String],
) -> Result<String, WebAuthnError> {
    rp_ids
        .iter()
        .find(|rp_id| crypto::constant_time_eq(&crypto::sha256(rp_id.as_bytes()), &auth_data.rp_id_hash))
        .cloned()
        .ok_or_else(|| {
            debug!("rpIdHash matches none of {} expected RP IDs", rp_ids.len());
            WebAuthnError::RpIdMismatch(format!(
                "rpIdHash matches none of {}",
                rp_ids.join(", ")
            ))
        })
}

/// User presence is always required; verification only when policy says so
pub(crate) fn check_user_flags(
    auth_data: &AuthenticatorData,
    require_user_verification: bool,
) -> Result<(), WebAuthnError> {
    if !auth_data.flags.user_present() {
        return Err(WebAuthnError::UserPresenceRequired(
            "user present flag is not set".into(),
        ));
    }
    if require_user_verification && !auth_data.flags.user_verified() {
        return Err(WebAuthnError::UserVerificationRequired(
            "user verified flag is not set".into(),
        ));
    }
    Ok(())
}

/// Authenticator extension outputs as JSON for the caller
pub(crate) fn extension_results(auth_data: &AuthenticatorData) -> Option<serde_json::Value> {
    auth_data.extensions.as_ref().map(cbor_to_json)
}

fn cbor_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Integer(i) => {
            let i = i128::from(*i);
            i64::try_from(i).map_or_else(|_| serde_json::Value::String(i.to_string()), Into::into)
        }
        Value::Bytes(bytes) => serde_json::Value::String(crypto::base64url_encode(bytes)),
        Value::Text(text) => serde_json::Value::String(text.clone()),
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Array(items) => serde_json::Value::Array(items.iter().map(cbor_to_json).collect()),
        Value::Map(entries) => serde_json::Value::Object(
            entries
                .iter()
                .map(|(k, v)| {
                    let key = match k {
                        Value::Text(text) => text.clone(),
                        other => cbor_to_json(other).to_string(),
                    };
                    (key, cbor_to_json(v))
                })
                .collect(),
        ),
        _ => serde_json::Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authenticator_data::AuthenticatorFlags;
    use crate::cbor::CborDecoder;
    use crate::testing::authenticator::AuthenticatorDataBuilder;

    #[test]
    fn test_credential_id_requires_matching_raw_id() {
        assert_eq!(credential_id("AQID", "AQID", "public-key").expect("id"), vec![1, 2, 3]);
        assert!(credential_id("AQID", "AQIE", "public-key").is_err());
        assert!(credential_id("AQID", "AQID", "password").is_err());
    }

    #[test]
    fn test_matching_rp_id_picks_candidate() {
        let bytes = AuthenticatorDataBuilder::new("login.example.com").build();
        let data = AuthenticatorData::parse(&bytes, &CborDecoder::default()).expect("parse");
        let rp_ids = vec!["example.com".to_string(), "login.example.com".to_string()];
        assert_eq!(matching_rp_id(&data, &rp_ids).expect("match"), "login.example.com");

        let err = matching_rp_id(&data, &rp_ids[..1]).unwrap_err();
        assert!(matches!(err, WebAuthnError::RpIdMismatch(_)));
    }

    #[test]
    fn test_user_flags() {
        let present = AuthenticatorDataBuilder::new("example.com")
            .flags(AuthenticatorFlags::USER_PRESENT)
            .build();
        let data = AuthenticatorData::parse(&present, &CborDecoder::default()).expect("parse");
        assert!(check_user_flags(&data, false).is_ok());
        assert!(matches!(
            check_user_flags(&data, true),
            Err(WebAuthnError::UserVerificationRequired(_))
        ));

        let absent = AuthenticatorDataBuilder::new("example.com").flags(0).build();
        let data = AuthenticatorData::parse(&absent, &CborDecoder::default()).expect("parse");
        assert!(matches!(
            check_user_flags(&data, false),
            Err(WebAuthnError::UserPresenceRequired(_))
        ));
    }

    #[test]
    fn test_extension_results_as_json() {
        let extensions = Value::Map(vec![(
            Value::Text("credProtect".into()),
            Value::Integer(2.into()),
        )]);
        let bytes = AuthenticatorDataBuilder::new("example.com")
            .extensions(extensions)
            .build();
        let data = AuthenticatorData::parse(&bytes, &CborDecoder::default()).expect("parse");
        let json = extension_results(&data).expect("extensions");
        assert_eq!(json["credProtect"], 2);
    }
}
