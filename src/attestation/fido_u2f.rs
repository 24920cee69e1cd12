//! `fido-u2f` attestation
//!
//! The signed message is rebuilt in the U2F registration layout:
//! `0x00 || rpIdHash || clientDataHash || credentialId || publicKey(X9.62)`.

use ciborium::value::Value;

use super::certificate;
use super::{Evidence, StatementInput};
use crate::cose::{CoseAlgorithm, EcCurve};
use crate::error::WebAuthnError;
use crate::signature::VerificationKey;

pub(super) fn verify(
    stmt: &[(Value, Value)],
    input: &StatementInput<'_>,
) -> Result<Evidence, WebAuthnError> {
    let sig = super::statement_bytes(stmt, "sig")?;
    let x5c = super::required_x5c(stmt)?;
    if x5c.len() != 1 {
        return Err(WebAuthnError::attestation(format!(
            "fido-u2f expects exactly one certificate, got {}",
            x5c.len()
        )));
    }

    let chain = certificate::parse_chain(&x5c)?;
    certificate::validate_chain(&chain)?;
    let attestation_key = certificate::certificate_key(&chain[0])?;
    if !matches!(
        attestation_key,
        VerificationKey::Ec {
            curve: EcCurve::P256,
            ..
        }
    ) {
        return Err(WebAuthnError::attestation(
            "fido-u2f attestation certificate key must be EC P-256",
        ));
    }

    let public_key = input
        .credential
        .credential_public_key
        .to_x962_raw()
        .ok_or_else(|| {
            WebAuthnError::attestation("fido-u2f credential key must be EC P-256")
        })?;

    let credential_id = &input.credential.credential_id;
    let mut verification_data = Vec::with_capacity(1 + 32 + 32 + credential_id.len() + 65);
    verification_data.push(0x00);
    verification_data.extend_from_slice(&input.auth_data.rp_id_hash);
    verification_data.extend_from_slice(input.client_data_hash);
    verification_data.extend_from_slice(credential_id);
    verification_data.extend_from_slice(&public_key);

    super::require_signature(
        &attestation_key,
        CoseAlgorithm::Es256,
        &verification_data,
        sig,
        "fido-u2f attestation",
    )?;

    Ok(Evidence::Certificates(x5c.clone()))
}
