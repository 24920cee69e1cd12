//! Attestation statement verification
//!
//! An attestation object is `{fmt, attStmt, authData}`. Each supported format
//! has its own verifier; dispatch is an exhaustive match over
//! [`AttestationFormat`]. A verifier either proves the statement or fails with
//! `AttestationInvalid`. Certificate chains are then handed to an optional
//! [`TrustStore`] to decide the attestation type.

pub(crate) mod android_key;
mod android_safetynet;
pub(crate) mod apple;
pub(crate) mod certificate;
mod fido_u2f;
mod none;
mod packed;
mod tpm;

use std::fmt;

use ciborium::value::Value;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use android_key::AndroidKeyPolicy;
pub use android_safetynet::SafetyNetPolicy;

use crate::authenticator_data::{AttestedCredentialData, AuthenticatorData};
use crate::cbor::{self, CborDecoder};
use crate::cose::CoseAlgorithm;
use crate::crypto;
use crate::error::WebAuthnError;
use crate::signature::{self, VerificationKey};

/// Attestation statement formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttestationFormat {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "packed")]
    Packed,
    #[serde(rename = "tpm")]
    Tpm,
    #[serde(rename = "android-key")]
    AndroidKey,
    #[serde(rename = "android-safetynet")]
    AndroidSafetyNet,
    #[serde(rename = "apple")]
    Apple,
    #[serde(rename = "fido-u2f")]
    FidoU2f,
}

impl AttestationFormat {
    /// Look up a format by its `fmt` identifier
    ///
    /// # Errors
    /// Returns `AttestationInvalid` for unknown formats
    pub fn from_fmt(fmt: &str) -> Result<Self, WebAuthnError> {
        match fmt {
            "none" => Ok(Self::None),
            "packed" => Ok(Self::Packed),
            "tpm" => Ok(Self::Tpm),
            "android-key" => Ok(Self::AndroidKey),
            "android-safetynet" => Ok(Self::AndroidSafetyNet),
            "apple" => Ok(Self::Apple),
            "fido-u2f" => Ok(Self::FidoU2f),
            other => Err(WebAuthnError::attestation(format!(
                "Unsupported attestation format {other}"
            ))),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Packed => "packed",
            Self::Tpm => "tpm",
            Self::AndroidKey => "android-key",
            Self::AndroidSafetyNet => "android-safetynet",
            Self::Apple => "apple",
            Self::FidoU2f => "fido-u2f",
        }
    }
}

impl fmt::Display for AttestationFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much the relying party can conclude about the authenticator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttestationType {
    /// No attestation was provided
    None,
    /// Certificate chain resolved to a vendor root
    Basic,
    /// Certificate chain resolved through an attestation CA
    AttCa,
    /// Statement signed by the credential key itself
    #[serde(rename = "self")]
    SelfAttestation,
    /// Certificate chain present but no trust decision was made
    Uncertain,
}

/// Verdict of a [`TrustStore`] on a certificate chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustLevel {
    Basic,
    AttCa,
    Uncertain,
    Untrusted,
}

/// External collaborator deciding whether an attestation chain ends in a
/// trusted root
pub trait TrustStore: Send + Sync {
    /// Resolve `certificates` (DER, leaf first) for an authenticator model
    fn resolve_chain(
        &self,
        format: AttestationFormat,
        aaguid: Uuid,
        certificates: &[Vec<u8>],
    ) -> TrustLevel;
}

/// Per-format verification policy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttestationPolicy {
    pub android_key: AndroidKeyPolicy,
    pub safetynet: SafetyNetPolicy,
}

/// Decoded attestation object
#[derive(Debug, Clone, PartialEq)]
pub struct AttestationObject {
    pub fmt: AttestationFormat,
    pub att_stmt: Vec<(Value, Value)>,
    /// Raw authenticator data bytes
    pub auth_data: Vec<u8>,
}

impl AttestationObject {
    /// Decode attestation object bytes; exactly one CBOR item is allowed
    ///
    /// # Errors
    /// Returns `MalformedEncoding` for bad CBOR or missing members and
    /// `AttestationInvalid` for an unknown format
    pub fn decode(bytes: &[u8], decoder: &CborDecoder) -> Result<Self, WebAuthnError> {
        let value = decoder.decode_exact(bytes)?;
        let map = cbor::as_map(&value, "attestationObject")?;

        let fmt = AttestationFormat::from_fmt(cbor::required_text(map, "fmt")?)?;
        let att_stmt = cbor::get_text_key(map, "attStmt")
            .and_then(Value::as_map)
            .cloned()
            .ok_or_else(|| WebAuthnError::malformed("Missing or invalid attStmt"))?;
        let auth_data = cbor::required_bytes(map, "authData")?.to_vec();

        Ok(Self {
            fmt,
            att_stmt,
            auth_data,
        })
    }
}

/// Outcome of a verified attestation statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationResult {
    pub attestation_type: AttestationType,
    /// DER certificates from `x5c`, leaf first; empty without a chain
    pub trust_path: Vec<Vec<u8>>,
}

/// What a format verifier proved
#[derive(Debug)]
pub(crate) enum Evidence {
    Empty,
    SelfSigned,
    Certificates(Vec<Vec<u8>>),
}

/// Everything a format verifier may inspect
pub(crate) struct StatementInput<'a> {
    pub auth_data: &'a AuthenticatorData,
    pub auth_data_bytes: &'a [u8],
    pub client_data_hash: &'a [u8],
    pub credential: &'a AttestedCredentialData,
    pub policy: &'a AttestationPolicy,
}

impl StatementInput<'_> {
    /// `authenticatorData || clientDataHash`, the message most formats sign
    pub fn signed_data(&self) -> Vec<u8> {
        [self.auth_data_bytes, self.client_data_hash].concat()
    }
}

/// Verify an attestation statement against its authenticator data
///
/// # Errors
/// Returns `AttestationInvalid` when the statement does not verify or the
/// trust store rejects its chain; `UnsupportedAlgorithm` when the statement
/// names an unknown algorithm
pub fn verify_attestation(
    object: &AttestationObject,
    auth_data: &AuthenticatorData,
    client_data_hash: &[u8],
    policy: &AttestationPolicy,
    trust_store: Option<&dyn TrustStore>,
) -> Result<AttestationResult, WebAuthnError> {
    let credential = auth_data
        .attested_credential_data
        .as_ref()
        .ok_or_else(|| WebAuthnError::attestation("No attested credential data"))?;

    let input = StatementInput {
        auth_data,
        auth_data_bytes: &object.auth_data,
        client_data_hash,
        credential,
        policy,
    };
    let stmt = object.att_stmt.as_slice();

    debug!("Verifying {} attestation statement", object.fmt);
    let evidence = match object.fmt {
        AttestationFormat::None => none::verify(stmt),
        AttestationFormat::Packed => packed::verify(stmt, &input),
        AttestationFormat::Tpm => tpm::verify(stmt, &input),
        AttestationFormat::AndroidKey => android_key::verify(stmt, &input),
        AttestationFormat::AndroidSafetyNet => android_safetynet::verify(stmt, &input),
        AttestationFormat::Apple => apple::verify(stmt, &input),
        AttestationFormat::FidoU2f => fido_u2f::verify(stmt, &input),
    }?;

    let result = match evidence {
        Evidence::Empty => AttestationResult {
            attestation_type: AttestationType::None,
            trust_path: Vec::new(),
        },
        Evidence::SelfSigned => AttestationResult {
            attestation_type: AttestationType::SelfAttestation,
            trust_path: Vec::new(),
        },
        Evidence::Certificates(chain) => {
            let level = trust_store.map_or(TrustLevel::Uncertain, |store| {
                store.resolve_chain(object.fmt, credential.aaguid, &chain)
            });
            let attestation_type = match level {
                TrustLevel::Basic => AttestationType::Basic,
                TrustLevel::AttCa => AttestationType::AttCa,
                TrustLevel::Uncertain => AttestationType::Uncertain,
                TrustLevel::Untrusted => {
                    warn!(
                        "{} attestation chain for AAGUID {} is untrusted",
                        object.fmt, credential.aaguid
                    );
                    return Err(WebAuthnError::attestation(
                        "Attestation certificate chain is not trusted",
                    ));
                }
            };
            AttestationResult {
                attestation_type,
                trust_path: chain,
            }
        }
    };

    debug!(
        "{} attestation verified as {:?}",
        object.fmt, result.attestation_type
    );
    Ok(result)
}

/// Statement `alg` as a supported COSE algorithm
pub(crate) fn statement_alg(stmt: &[(Value, Value)]) -> Result<CoseAlgorithm, WebAuthnError> {
    let id = cbor::required_int(stmt, "alg").map_err(to_attestation)?;
    CoseAlgorithm::from_id(id)
}

pub(crate) fn statement_bytes<'a>(
    stmt: &'a [(Value, Value)],
    key: &str,
) -> Result<&'a [u8], WebAuthnError> {
    cbor::required_bytes(stmt, key).map_err(to_attestation)
}

pub(crate) fn statement_x5c(stmt: &[(Value, Value)]) -> Result<Option<Vec<Vec<u8>>>, WebAuthnError> {
    cbor::optional_bytes_array(stmt, "x5c").map_err(to_attestation)
}

pub(crate) fn required_x5c(stmt: &[(Value, Value)]) -> Result<Vec<Vec<u8>>, WebAuthnError> {
    statement_x5c(stmt)?
        .filter(|chain| !chain.is_empty())
        .ok_or_else(|| WebAuthnError::attestation("Missing x5c"))
}

/// A statement signature must verify; algorithm/key mismatches count as an
/// invalid statement
pub(crate) fn require_signature(
    key: &VerificationKey,
    alg: CoseAlgorithm,
    message: &[u8],
    sig: &[u8],
    what: &str,
) -> Result<(), WebAuthnError> {
    match signature::verify_with_key(key, alg, message, sig) {
        Ok(true) => Ok(()),
        Ok(false) => Err(WebAuthnError::attestation(format!(
            "{what} signature is invalid"
        ))),
        Err(WebAuthnError::UnsupportedAlgorithm(msg)) => Err(WebAuthnError::attestation(
            format!("{what} signature: {msg}"),
        )),
        Err(other) => Err(other),
    }
}

/// Digest matching the hash of a signature algorithm
pub(crate) fn digest_for(alg: CoseAlgorithm, data: &[u8]) -> Vec<u8> {
    match alg {
        CoseAlgorithm::Es384 => crypto::sha384(data),
        CoseAlgorithm::Es512 => crypto::sha512(data),
        CoseAlgorithm::Es256 | CoseAlgorithm::Rs256 | CoseAlgorithm::Ps256 | CoseAlgorithm::EdDsa => {
            crypto::sha256(data)
        }
    }
}

fn to_attestation(err: WebAuthnError) -> WebAuthnError {
    match err {
        WebAuthnError::MalformedEncoding(msg) => WebAuthnError::AttestationInvalid(msg),
        other => other,
    }
}
