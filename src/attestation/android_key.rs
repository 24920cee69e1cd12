//! `android-key` attestation
//!
//! The leaf certificate certifies the credential key and carries a Keymaster
//! key description extension binding the attestation challenge to the
//! client data hash.

use ciborium::value::Value;
use log::debug;
use serde::{Deserialize, Serialize};

use x509_parser::der_parser::ber::{BerObjectContent, Class};
use x509_parser::der_parser::der::DerObject;
use x509_parser::der_parser::{oid, Oid};

use super::certificate::{self, der_error};
use super::{Evidence, StatementInput};
use crate::crypto;
use crate::error::WebAuthnError;

pub(crate) const OID_ANDROID_KEY_DESCRIPTION: Oid<'static> = oid!(1.3.6.1.4.1.11129.2.1.17);

const FIELD_ATTESTATION_CHALLENGE: usize = 4;
const FIELD_SOFTWARE_ENFORCED: usize = 6;
const FIELD_TEE_ENFORCED: usize = 7;

const TAG_PURPOSE: u32 = 1;
const TAG_ALL_APPLICATIONS: u32 = 600;
const TAG_ORIGIN: u32 = 702;
const TAG_ROOT_OF_TRUST: u32 = 704;

const KM_ORIGIN_GENERATED: u64 = 0;
const KM_PURPOSE_SIGN: u64 = 2;
const VERIFIED_BOOT_STATE_VERIFIED: u64 = 0;

/// Policy for Android key attestation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AndroidKeyPolicy {
    /// Only trust origin and purpose from the TEE-enforced list
    pub require_tee_enforced: bool,
    /// Require a locked bootloader and a verified boot state
    pub require_verified_boot: bool,
}

pub(super) fn verify(
    stmt: &[(Value, Value)],
    input: &StatementInput<'_>,
) -> Result<Evidence, WebAuthnError> {
    let alg = super::statement_alg(stmt)?;
    let sig = super::statement_bytes(stmt, "sig")?;
    let x5c = super::required_x5c(stmt)?;

    let chain = certificate::parse_chain(&x5c)?;
    certificate::validate_chain(&chain)?;
    let leaf = &chain[0];

    super::require_signature(
        &certificate::certificate_key(leaf)?,
        alg,
        &input.signed_data(),
        sig,
        "android-key attestation",
    )?;
    certificate::require_credential_key(leaf, &input.credential.credential_public_key)?;

    let extension = certificate::extension_value(leaf, &OID_ANDROID_KEY_DESCRIPTION)?
        .ok_or_else(|| WebAuthnError::attestation("Android key description extension missing"))?;
    let description = KeyDescription::parse(extension)?;

    if !crypto::constant_time_eq(description.attestation_challenge, input.client_data_hash) {
        return Err(WebAuthnError::attestation(
            "Android attestationChallenge does not match client data hash",
        ));
    }
    description.check(&input.policy.android_key)?;

    Ok(Evidence::Certificates(x5c.clone()))
}

#[derive(Debug, Default)]
struct AuthorizationList {
    purposes: Vec<u64>,
    all_applications: bool,
    origin: Option<u64>,
    root_of_trust: Option<RootOfTrust>,
}

#[derive(Debug, Clone, Copy)]
struct RootOfTrust {
    device_locked: bool,
    verified_boot_state: u64,
}

#[derive(Debug)]
struct KeyDescription<'a> {
    attestation_challenge: &'a [u8],
    software_enforced: AuthorizationList,
    tee_enforced: AuthorizationList,
}

impl<'a> KeyDescription<'a> {
    fn parse(extension: &'a [u8]) -> Result<Self, WebAuthnError> {
        let description = certificate::parse_extension(extension, "KeyDescription")?;
        let fields = description
            .as_sequence()
            .map_err(der_error("KeyDescription"))?;
        if fields.len() < 8 {
            return Err(WebAuthnError::attestation(format!(
                "KeyDescription has {} fields, expected 8",
                fields.len()
            )));
        }

        let attestation_challenge = match fields[FIELD_ATTESTATION_CHALLENGE].content {
            BerObjectContent::OctetString(challenge) => challenge,
            _ => {
                return Err(WebAuthnError::attestation(
                    "attestationChallenge is not an OCTET STRING",
                ))
            }
        };
        Ok(Self {
            attestation_challenge,
            software_enforced: AuthorizationList::parse(&fields[FIELD_SOFTWARE_ENFORCED])?,
            tee_enforced: AuthorizationList::parse(&fields[FIELD_TEE_ENFORCED])?,
        })
    }

    fn check(&self, policy: &AndroidKeyPolicy) -> Result<(), WebAuthnError> {
        if self.software_enforced.all_applications || self.tee_enforced.all_applications {
            return Err(WebAuthnError::attestation(
                "Android key is usable by all applications",
            ));
        }

        let (origin, purposes): (Option<u64>, Vec<u64>) = if policy.require_tee_enforced {
            (self.tee_enforced.origin, self.tee_enforced.purposes.clone())
        } else {
            (
                self.tee_enforced.origin.or(self.software_enforced.origin),
                self.tee_enforced
                    .purposes
                    .iter()
                    .chain(&self.software_enforced.purposes)
                    .copied()
                    .collect(),
            )
        };
        if origin != Some(KM_ORIGIN_GENERATED) {
            return Err(WebAuthnError::attestation(format!(
                "Android key origin {origin:?} is not KM_ORIGIN_GENERATED"
            )));
        }
        if !purposes.contains(&KM_PURPOSE_SIGN) {
            return Err(WebAuthnError::attestation(
                "Android key purpose does not include KM_PURPOSE_SIGN",
            ));
        }

        if policy.require_verified_boot {
            let root = self.tee_enforced.root_of_trust.ok_or_else(|| {
                WebAuthnError::attestation("Android RootOfTrust missing from TEE list")
            })?;
            if !root.device_locked || root.verified_boot_state != VERIFIED_BOOT_STATE_VERIFIED {
                debug!(
                    "Android boot state rejected: locked={}, state={}",
                    root.device_locked, root.verified_boot_state
                );
                return Err(WebAuthnError::attestation(
                    "Android device is unlocked or not in verified boot state",
                ));
            }
        }
        Ok(())
    }
}

impl AuthorizationList {
    fn parse(list: &DerObject<'_>) -> Result<Self, WebAuthnError> {
        let entries = list.as_sequence().map_err(der_error("AuthorizationList"))?;
        let mut parsed = Self::default();
        for entry in entries {
            if entry.header.class() != Class::ContextSpecific {
                continue;
            }
            match entry.header.tag().0 {
                TAG_PURPOSE => {
                    parsed.purposes = explicit_inner(entry, "purpose")?
                        .as_set()
                        .map_err(der_error("purpose"))?
                        .iter()
                        .map(|purpose| purpose.as_u64().map_err(der_error("purpose")))
                        .collect::<Result<_, _>>()?;
                }
                TAG_ALL_APPLICATIONS => parsed.all_applications = true,
                TAG_ORIGIN => {
                    parsed.origin = Some(
                        explicit_inner(entry, "origin")?
                            .as_u64()
                            .map_err(der_error("origin"))?,
                    );
                }
                TAG_ROOT_OF_TRUST => {
                    let root = explicit_inner(entry, "rootOfTrust")?;
                    let fields = root.as_sequence().map_err(der_error("rootOfTrust"))?;
                    if fields.len() < 3 {
                        return Err(WebAuthnError::attestation("RootOfTrust is truncated"));
                    }
                    parsed.root_of_trust = Some(RootOfTrust {
                        device_locked: fields[1].as_bool().map_err(der_error("deviceLocked"))?,
                        verified_boot_state: fields[2]
                            .as_u64()
                            .map_err(der_error("verifiedBootState"))?,
                    });
                }
                _ => {}
            }
        }
        Ok(parsed)
    }
}

/// The value wrapped by an `[n] EXPLICIT` authorization entry
fn explicit_inner<'a>(entry: &DerObject<'a>, what: &str) -> Result<DerObject<'a>, WebAuthnError> {
    let content = entry.as_slice().map_err(der_error(what))?;
    certificate::parse_extension(content, what)
}
