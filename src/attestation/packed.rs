//! `packed` attestation
//!
//! Either full attestation (`x5c` present, signed by the attestation
//! certificate) or self attestation (signed by the credential key).

use ciborium::value::Value;

use super::certificate::{self, SubjectField};
use super::{Evidence, StatementInput};
use crate::cbor;
use crate::error::WebAuthnError;
use crate::signature::VerificationKey;

const ATTESTATION_OU: &str = "Authenticator Attestation";

pub(super) fn verify(
    stmt: &[(Value, Value)],
    input: &StatementInput<'_>,
) -> Result<Evidence, WebAuthnError> {
    let alg = super::statement_alg(stmt)?;
    let sig = super::statement_bytes(stmt, "sig")?;
    let signed_data = input.signed_data();

    if cbor::get_text_key(stmt, "ecdaaKeyId").is_some() {
        return Err(WebAuthnError::attestation(
            "ECDAA packed attestation is not supported",
        ));
    }

    let Some(x5c) = super::statement_x5c(stmt)? else {
        // Self attestation
        let credential_key = &input.credential.credential_public_key;
        if alg != credential_key.alg {
            return Err(WebAuthnError::attestation(format!(
                "Self attestation alg {alg} differs from credential alg {}",
                credential_key.alg
            )));
        }
        super::require_signature(
            &VerificationKey::from_cose(credential_key),
            alg,
            &signed_data,
            sig,
            "Packed self attestation",
        )?;
        return Ok(Evidence::SelfSigned);
    };

    let chain = certificate::parse_chain(&x5c)?;
    let leaf = &chain[0];
    check_leaf_requirements(leaf)?;
    certificate::check_aaguid_extension(leaf, input.credential.aaguid)?;
    certificate::validate_chain(&chain)?;

    super::require_signature(
        &certificate::certificate_key(leaf)?,
        alg,
        &signed_data,
        sig,
        "Packed attestation",
    )?;

    Ok(Evidence::Certificates(x5c.clone()))
}

fn check_leaf_requirements(
    leaf: &x509_parser::certificate::X509Certificate<'_>,
) -> Result<(), WebAuthnError> {
    if !certificate::is_v3(leaf) {
        return Err(WebAuthnError::attestation(
            "Packed attestation certificate must be X.509 v3",
        ));
    }
    for (field, name) in [
        (SubjectField::Country, "C"),
        (SubjectField::Organization, "O"),
        (SubjectField::CommonName, "CN"),
    ] {
        if certificate::subject_field(leaf, field)
            .filter(|value| !value.is_empty())
            .is_none()
        {
            return Err(WebAuthnError::attestation(format!(
                "Packed attestation certificate subject lacks {name}"
            )));
        }
    }
    if certificate::subject_field(leaf, SubjectField::OrganizationalUnit).as_deref()
        != Some(ATTESTATION_OU)
    {
        return Err(WebAuthnError::attestation(format!(
            "Packed attestation certificate OU must be {ATTESTATION_OU}"
        )));
    }
    if leaf.is_ca() {
        return Err(WebAuthnError::attestation(
            "Packed attestation certificate must not be a CA",
        ));
    }
    Ok(())
}
