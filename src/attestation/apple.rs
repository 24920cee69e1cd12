//! `apple` anonymous attestation
//!
//! There is no signature; the leaf certificate binds the credential key and
//! carries `SHA-256(authData || clientDataHash)` as a nonce extension.

use ciborium::value::Value;
use x509_parser::der_parser::ber::{BerObjectContent, Class};
use x509_parser::der_parser::{oid, Oid};

use super::certificate::{self, der_error};
use super::{Evidence, StatementInput};
use crate::crypto;
use crate::error::WebAuthnError;

pub(crate) const OID_APPLE_NONCE: Oid<'static> = oid!(1.2.840.113635.100.8.2);

pub(super) fn verify(
    stmt: &[(Value, Value)],
    input: &StatementInput<'_>,
) -> Result<Evidence, WebAuthnError> {
    let x5c = super::required_x5c(stmt)?;
    let chain = certificate::parse_chain(&x5c)?;
    let leaf = &chain[0];

    let extension = certificate::extension_value(leaf, &OID_APPLE_NONCE)?
        .ok_or_else(|| WebAuthnError::attestation("Apple nonce extension missing"))?;
    let nonce = parse_nonce(extension)?;
    let expected = crypto::sha256(&input.signed_data());
    if !crypto::constant_time_eq(nonce, &expected) {
        return Err(WebAuthnError::attestation(
            "Apple nonce does not match authenticator data",
        ));
    }

    certificate::require_credential_key(leaf, &input.credential.credential_public_key)?;
    certificate::validate_chain(&chain)?;

    Ok(Evidence::Certificates(x5c.clone()))
}

/// `SEQUENCE { [1] EXPLICIT OCTET STRING nonce }`
fn parse_nonce(extension: &[u8]) -> Result<&[u8], WebAuthnError> {
    let sequence = certificate::parse_extension(extension, "Apple nonce extension")?;
    let tagged = sequence
        .as_sequence()
        .map_err(der_error("Apple nonce extension"))?
        .iter()
        .find(|item| item.header.class() == Class::ContextSpecific && item.header.tag().0 == 1)
        .ok_or_else(|| WebAuthnError::attestation("Apple nonce extension lacks [1]"))?;
    let inner = certificate::parse_extension(
        tagged.as_slice().map_err(der_error("Apple nonce [1]"))?,
        "Apple nonce [1]",
    )?;
    match inner.content {
        BerObjectContent::OctetString(nonce) => Ok(nonce),
        _ => Err(WebAuthnError::attestation(
            "Apple nonce is not an OCTET STRING",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nonce() {
        // SEQUENCE { [1] { OCTET STRING 01 02 } }
        let der = [0x30, 0x06, 0xa1, 0x04, 0x04, 0x02, 0x01, 0x02];
        assert_eq!(parse_nonce(&der).expect("nonce"), &[1, 2]);
        assert!(parse_nonce(&[0x30, 0x00]).is_err());
        // [1] wrapping an INTEGER
        assert!(parse_nonce(&[0x30, 0x05, 0xa1, 0x03, 0x02, 0x01, 0x01]).is_err());
    }
}
