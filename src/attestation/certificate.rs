//! Attestation certificate checks shared by the x5c-carrying formats

use uuid::Uuid;
use x509_parser::der_parser::der::{parse_der, parse_der_octetstring, DerObject};
use x509_parser::der_parser::error::BerError;
use x509_parser::der_parser::{oid, Oid};
use x509_parser::oid_registry::{
    OID_X509_COMMON_NAME, OID_X509_COUNTRY_NAME, OID_X509_ORGANIZATIONAL_UNIT,
    OID_X509_ORGANIZATION_NAME,
};
use x509_parser::prelude::{FromDer, X509Certificate, X509Version};

use crate::cose::CosePublicKey;
use crate::error::WebAuthnError;
use crate::signature::VerificationKey;

pub(crate) const OID_FIDO_AAGUID: Oid<'static> = oid!(1.3.6.1.4.1.45724.1.1.4);

/// Parse every certificate of an `x5c` chain, leaf first
///
/// # Errors
/// Returns `AttestationInvalid` when the chain is empty or a certificate does
/// not parse
pub(crate) fn parse_chain(x5c: &[Vec<u8>]) -> Result<Vec<X509Certificate<'_>>, WebAuthnError> {
    if x5c.is_empty() {
        return Err(WebAuthnError::attestation("x5c is empty"));
    }
    x5c.iter()
        .enumerate()
        .map(|(i, der)| {
            let (rest, cert) = X509Certificate::from_der(der).map_err(|e| {
                WebAuthnError::attestation(format!("x5c[{i}] is not a certificate: {e}"))
            })?;
            if !rest.is_empty() {
                return Err(WebAuthnError::attestation(format!(
                    "x5c[{i}] has trailing bytes"
                )));
            }
            Ok(cert)
        })
        .collect()
}

/// Every certificate must be within its validity period and signed by the
/// next one in the chain
///
/// # Errors
/// Returns `AttestationInvalid` naming the first failing certificate
pub(crate) fn validate_chain(chain: &[X509Certificate<'_>]) -> Result<(), WebAuthnError> {
    for (i, cert) in chain.iter().enumerate() {
        if !cert.validity().is_valid() {
            return Err(WebAuthnError::attestation(format!(
                "x5c[{i}] is outside its validity period"
            )));
        }
        if let Some(issuer) = chain.get(i + 1) {
            cert.verify_signature(Some(issuer.public_key()))
                .map_err(|e| {
                    WebAuthnError::attestation(format!(
                        "x5c[{i}] is not signed by x5c[{}]: {e}",
                        i + 1
                    ))
                })?;
        }
    }
    Ok(())
}

/// Public key of a certificate as verification key material
///
/// # Errors
/// Returns `UnsupportedAlgorithm` for key types outside EC, RSA and Ed25519
pub(crate) fn certificate_key(cert: &X509Certificate<'_>) -> Result<VerificationKey, WebAuthnError> {
    VerificationKey::from_spki(cert.public_key())
}

/// The certificate must certify the credential key itself
///
/// # Errors
/// Returns `AttestationInvalid` when the keys differ
pub(crate) fn require_credential_key(
    cert: &X509Certificate<'_>,
    credential_key: &CosePublicKey,
) -> Result<(), WebAuthnError> {
    if certificate_key(cert)? == VerificationKey::from_cose(credential_key) {
        Ok(())
    } else {
        Err(WebAuthnError::attestation(
            "Credential public key does not match the attestation certificate",
        ))
    }
}

/// Raw value of the extension with the given OID
///
/// # Errors
/// Returns `AttestationInvalid` when the extension appears more than once
pub(crate) fn extension_value<'c>(
    cert: &'c X509Certificate<'_>,
    oid: &Oid<'_>,
) -> Result<Option<&'c [u8]>, WebAuthnError> {
    let extension = cert
        .get_extension_unique(oid)
        .map_err(|e| WebAuthnError::attestation(format!("Extension {oid}: {e}")))?;
    Ok(extension.map(|ext| ext.value))
}

/// Parse an extension body that must hold exactly one DER value
///
/// # Errors
/// Returns `AttestationInvalid` on malformed DER or trailing bytes
pub(crate) fn parse_extension<'a>(
    value: &'a [u8],
    what: &str,
) -> Result<DerObject<'a>, WebAuthnError> {
    let (rest, object) = parse_der(value)
        .map_err(|e| WebAuthnError::attestation(format!("{what} is not valid DER: {e}")))?;
    if !rest.is_empty() {
        return Err(WebAuthnError::attestation(format!(
            "{what} has trailing bytes"
        )));
    }
    Ok(object)
}

/// Map a DER accessor failure to an attestation error naming the field
pub(crate) fn der_error(what: &str) -> impl Fn(BerError) -> WebAuthnError + '_ {
    move |e| WebAuthnError::attestation(format!("{what}: {e}"))
}

/// When the id-fido-gen-ce-aaguid extension is present it must equal the
/// AAGUID from authenticator data
///
/// # Errors
/// Returns `AttestationInvalid` on mismatch or a malformed extension
pub(crate) fn check_aaguid_extension(
    cert: &X509Certificate<'_>,
    aaguid: Uuid,
) -> Result<(), WebAuthnError> {
    let extension = cert
        .get_extension_unique(&OID_FIDO_AAGUID)
        .map_err(|e| WebAuthnError::attestation(format!("AAGUID extension: {e}")))?;
    let Some(extension) = extension else {
        return Ok(());
    };
    if extension.critical {
        return Err(WebAuthnError::attestation(
            "AAGUID extension must not be critical",
        ));
    }
    let (rest, value) = parse_der_octetstring(extension.value)
        .map_err(|e| WebAuthnError::attestation(format!("AAGUID extension: {e}")))?;
    if !rest.is_empty() {
        return Err(WebAuthnError::attestation(
            "AAGUID extension has trailing bytes",
        ));
    }
    let inner = value.as_slice().map_err(der_error("AAGUID extension"))?;
    if inner == aaguid.as_bytes() {
        Ok(())
    } else {
        Err(WebAuthnError::attestation(
            "Certificate AAGUID does not match authenticator data",
        ))
    }
}

pub(crate) fn is_v3(cert: &X509Certificate<'_>) -> bool {
    cert.version() == X509Version::V3
}

/// Whether the extended key usage extension lists `purpose`
///
/// # Errors
/// Returns `AttestationInvalid` when the extension is malformed or repeated
pub(crate) fn has_extended_key_usage(
    cert: &X509Certificate<'_>,
    purpose: &Oid<'_>,
) -> Result<bool, WebAuthnError> {
    let usage = cert
        .extended_key_usage()
        .map_err(|e| WebAuthnError::attestation(format!("extendedKeyUsage: {e}")))?;
    Ok(usage.is_some_and(|usage| usage.value.other.iter().any(|oid| oid == purpose)))
}

/// Whether a well-formed subject alternative name extension is present
///
/// # Errors
/// Returns `AttestationInvalid` when the extension is malformed or repeated
pub(crate) fn has_subject_alternative_name(
    cert: &X509Certificate<'_>,
) -> Result<bool, WebAuthnError> {
    let san = cert
        .subject_alternative_name()
        .map_err(|e| WebAuthnError::attestation(format!("subjectAltName: {e}")))?;
    Ok(san.is_some_and(|san| !san.value.general_names.is_empty()))
}

/// First value of a subject attribute, if present and a string
pub(crate) fn subject_field(cert: &X509Certificate<'_>, field: SubjectField) -> Option<String> {
    cert.subject()
        .iter_by_oid(&field.oid())
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_string)
}

pub(crate) fn subject_is_empty(cert: &X509Certificate<'_>) -> bool {
    cert.subject().iter_attributes().next().is_none()
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum SubjectField {
    Country,
    Organization,
    OrganizationalUnit,
    CommonName,
}

impl SubjectField {
    fn oid(self) -> Oid<'static> {
        match self {
            Self::Country => OID_X509_COUNTRY_NAME,
            Self::Organization => OID_X509_ORGANIZATION_NAME,
            Self::OrganizationalUnit => OID_X509_ORGANIZATIONAL_UNIT,
            Self::CommonName => OID_X509_COMMON_NAME,
        }
    }
}
