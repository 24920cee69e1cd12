//! Authenticator data parsing
//!
//! Layout: `rpIdHash (32) || flags (1) || signCount (4, big-endian)`, then the
//! attested credential data when AT is set, then a CBOR extensions map when ED
//! is set. Every byte must be accounted for.

use ciborium::value::Value;
use uuid::Uuid;

use crate::cbor::CborDecoder;
use crate::cose::CosePublicKey;
use crate::error::WebAuthnError;
use crate::types::CredentialDeviceType;

const RP_ID_HASH_LEN: usize = 32;
const HEADER_LEN: usize = 37;
const AAGUID_LEN: usize = 16;

/// Authenticator data flag bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuthenticatorFlags(u8);

impl AuthenticatorFlags {
    pub const USER_PRESENT: u8 = 0x01;
    pub const USER_VERIFIED: u8 = 0x04;
    pub const BACKUP_ELIGIBLE: u8 = 0x08;
    pub const BACKUP_STATE: u8 = 0x10;
    pub const ATTESTED_CREDENTIAL_DATA: u8 = 0x40;
    pub const EXTENSION_DATA: u8 = 0x80;

    #[must_use]
    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    #[must_use]
    pub fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub fn user_present(self) -> bool {
        self.0 & Self::USER_PRESENT != 0
    }

    #[must_use]
    pub fn user_verified(self) -> bool {
        self.0 & Self::USER_VERIFIED != 0
    }

    #[must_use]
    pub fn backup_eligible(self) -> bool {
        self.0 & Self::BACKUP_ELIGIBLE != 0
    }

    #[must_use]
    pub fn backup_state(self) -> bool {
        self.0 & Self::BACKUP_STATE != 0
    }

    #[must_use]
    pub fn attested_credential_data(self) -> bool {
        self.0 & Self::ATTESTED_CREDENTIAL_DATA != 0
    }

    #[must_use]
    pub fn extension_data(self) -> bool {
        self.0 & Self::EXTENSION_DATA != 0
    }
}

/// Credential created during registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestedCredentialData {
    pub aaguid: Uuid,
    pub credential_id: Vec<u8>,
    pub credential_public_key: CosePublicKey,
    /// COSE key exactly as the authenticator encoded it
    pub credential_public_key_bytes: Vec<u8>,
}

/// Parsed `authenticatorData`
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatorData {
    pub rp_id_hash: [u8; RP_ID_HASH_LEN],
    pub flags: AuthenticatorFlags,
    pub sign_count: u32,
    pub attested_credential_data: Option<AttestedCredentialData>,
    pub extensions: Option<Value>,
}

impl AuthenticatorData {
    /// Parse authenticator data bytes
    ///
    /// # Errors
    /// Returns `MalformedEncoding` when the data is shorter than the header,
    /// when a variable-length section is truncated, or when bytes remain that
    /// no flag accounts for. COSE key errors propagate unchanged.
    pub fn parse(bytes: &[u8], decoder: &CborDecoder) -> Result<Self, WebAuthnError> {
        if bytes.len() < HEADER_LEN {
            return Err(WebAuthnError::malformed(format!(
                "Authenticator data is {} bytes, header needs {HEADER_LEN}",
                bytes.len()
            )));
        }

        let mut rp_id_hash = [0u8; RP_ID_HASH_LEN];
        rp_id_hash.copy_from_slice(&bytes[..RP_ID_HASH_LEN]);
        let flags = AuthenticatorFlags::from_bits(bytes[RP_ID_HASH_LEN]);
        let sign_count = u32::from_be_bytes([bytes[33], bytes[34], bytes[35], bytes[36]]);

        if flags.backup_state() && !flags.backup_eligible() {
            return Err(WebAuthnError::malformed(
                "Backup state set on a credential that is not backup eligible",
            ));
        }

        let mut cursor = HEADER_LEN;

        let attested_credential_data = if flags.attested_credential_data() {
            let (data, used) = parse_attested_credential_data(&bytes[cursor..], decoder)?;
            cursor += used;
            Some(data)
        } else {
            None
        };

        let extensions = if flags.extension_data() {
            let remaining = &bytes[cursor..];
            if remaining.is_empty() {
                return Err(WebAuthnError::malformed(
                    "Extension data flag set but no extensions present",
                ));
            }
            let value = decoder.decode_exact(remaining)?;
            if value.as_map().is_none() {
                return Err(WebAuthnError::malformed("Extensions are not a CBOR map"));
            }
            cursor = bytes.len();
            Some(value)
        } else {
            None
        };

        if cursor != bytes.len() {
            return Err(WebAuthnError::malformed(format!(
                "{} unexpected trailing bytes in authenticator data",
                bytes.len() - cursor
            )));
        }

        Ok(Self {
            rp_id_hash,
            flags,
            sign_count,
            attested_credential_data,
            extensions,
        })
    }

    /// `multiDevice` when the credential may be backed up
    #[must_use]
    pub fn credential_device_type(&self) -> CredentialDeviceType {
        if self.flags.backup_eligible() {
            CredentialDeviceType::MultiDevice
        } else {
            CredentialDeviceType::SingleDevice
        }
    }

    #[must_use]
    pub fn credential_backed_up(&self) -> bool {
        self.flags.backup_state()
    }
}

fn parse_attested_credential_data(
    bytes: &[u8],
    decoder: &CborDecoder,
) -> Result<(AttestedCredentialData, usize), WebAuthnError> {
    if bytes.len() < AAGUID_LEN + 2 {
        return Err(WebAuthnError::malformed(
            "Attested credential data truncated before credential ID length",
        ));
    }

    let aaguid = Uuid::from_slice(&bytes[..AAGUID_LEN])
        .map_err(|e| WebAuthnError::malformed(format!("Invalid AAGUID: {e}")))?;
    let id_len = usize::from(u16::from_be_bytes([bytes[AAGUID_LEN], bytes[AAGUID_LEN + 1]]));
    let id_start = AAGUID_LEN + 2;
    let key_start = id_start + id_len;

    if key_start > bytes.len() {
        return Err(WebAuthnError::malformed(format!(
            "Credential ID length {id_len} exceeds remaining {} bytes",
            bytes.len() - id_start
        )));
    }
    if id_len == 0 {
        return Err(WebAuthnError::malformed("Credential ID is empty"));
    }

    let credential_id = bytes[id_start..key_start].to_vec();
    let (key_value, key_len) = decoder.decode_first(&bytes[key_start..])?;
    let credential_public_key = CosePublicKey::from_cbor(&key_value)?;
    let credential_public_key_bytes = bytes[key_start..key_start + key_len].to_vec();

    Ok((
        AttestedCredentialData {
            aaguid,
            credential_id,
            credential_public_key,
            credential_public_key_bytes,
        },
        key_start + key_len,
    ))
}
