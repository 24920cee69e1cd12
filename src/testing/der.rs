//! DER bodies for the certificate extensions the attestation fixtures carry,
//! encoded with `asn1-rs`

use uuid::Uuid;
use x509_parser::der_parser::asn1_rs::{
    Class, Enumerated, Explicit, Integer, Null, OctetString, Sequence, Set, TaggedParser, ToDer,
    Utf8String,
};
use x509_parser::der_parser::{oid, Oid};

const TAG_PURPOSE: u32 = 1;
const TAG_DIRECTORY_NAME: u32 = 4;
const TAG_ALL_APPLICATIONS: u32 = 600;
const TAG_ORIGIN: u32 = 702;
const TAG_ROOT_OF_TRUST: u32 = 704;

pub const KM_PURPOSE_SIGN: u64 = 2;
pub const KM_ORIGIN_GENERATED: u64 = 0;
pub const KM_ORIGIN_IMPORTED: u64 = 2;
pub const VERIFIED_BOOT_VERIFIED: u32 = 0;
pub const VERIFIED_BOOT_UNVERIFIED: u32 = 2;

fn encode<T: ToDer>(value: &T) -> Vec<u8> {
    value.to_der_vec().expect("DER encoding")
}

fn sequence(items: &[Vec<u8>]) -> Sequence<'static> {
    Sequence::new(items.concat().into())
}

fn explicit<T: ToDer>(tag: u32, inner: T) -> Vec<u8> {
    let tagged: TaggedParser<'_, Explicit, T> =
        TaggedParser::new_explicit(Class::ContextSpecific, tag, inner);
    encode(&tagged)
}

/// One Keymaster `AuthorizationList`
#[derive(Debug, Clone, Default)]
pub struct KeyAuthorizations {
    pub purposes: Vec<u64>,
    pub all_applications: bool,
    pub origin: Option<u64>,
    /// `(deviceLocked, verifiedBootState)`
    pub root_of_trust: Option<(bool, u32)>,
}

impl KeyAuthorizations {
    /// A signing key generated inside the TEE of a locked, verified device
    #[must_use]
    pub fn tee_generated() -> Self {
        Self {
            purposes: vec![KM_PURPOSE_SIGN],
            all_applications: false,
            origin: Some(KM_ORIGIN_GENERATED),
            root_of_trust: Some((true, VERIFIED_BOOT_VERIFIED)),
        }
    }

    fn to_der(&self) -> Vec<u8> {
        let mut entries = Vec::new();
        if !self.purposes.is_empty() {
            let purposes: Vec<Vec<u8>> = self
                .purposes
                .iter()
                .map(|purpose| encode(&Integer::from_u64(*purpose)))
                .collect();
            entries.push(explicit(TAG_PURPOSE, Set::new(purposes.concat().into())));
        }
        if self.all_applications {
            entries.push(explicit(TAG_ALL_APPLICATIONS, Null::new()));
        }
        if let Some(origin) = self.origin {
            entries.push(explicit(TAG_ORIGIN, Integer::from_u64(origin)));
        }
        if let Some((device_locked, boot_state)) = self.root_of_trust {
            let root = sequence(&[
                encode(&OctetString::new(&[0; 32])),
                encode(&device_locked),
                encode(&Enumerated::new(boot_state)),
            ]);
            entries.push(explicit(TAG_ROOT_OF_TRUST, root));
        }
        encode(&sequence(&entries))
    }
}

/// Keymaster `KeyDescription` extension binding `challenge`
#[must_use]
pub fn key_description(
    challenge: &[u8],
    software_enforced: &KeyAuthorizations,
    tee_enforced: &KeyAuthorizations,
) -> Vec<u8> {
    encode(&sequence(&[
        encode(&Integer::from_u64(3)),
        encode(&Enumerated::new(1)),
        encode(&Integer::from_u64(4)),
        encode(&Enumerated::new(1)),
        encode(&OctetString::new(challenge)),
        encode(&OctetString::new(&[])),
        software_enforced.to_der(),
        tee_enforced.to_der(),
    ]))
}

/// Apple anonymous attestation nonce: `SEQUENCE { [1] EXPLICIT OCTET STRING }`
#[must_use]
pub fn apple_nonce(nonce: &[u8]) -> Vec<u8> {
    encode(&sequence(&[explicit(1, OctetString::new(nonce))]))
}

/// id-fido-gen-ce-aaguid value
#[must_use]
pub fn aaguid(aaguid: Uuid) -> Vec<u8> {
    encode(&OctetString::new(aaguid.as_bytes()))
}

/// Extended key usage listing a single `purpose`
#[must_use]
pub fn extended_key_usage(purpose: &Oid<'_>) -> Vec<u8> {
    encode(&sequence(&[encode(purpose)]))
}

/// Subject alternative name holding a TPM manufacturer directory name
#[must_use]
pub fn tpm_subject_alternative_name(manufacturer: &str) -> Vec<u8> {
    let attribute = sequence(&[
        encode(&oid!(2.23.133.2.1)),
        encode(&Utf8String::new(manufacturer)),
    ]);
    let name = sequence(&[encode(&Set::new(encode(&attribute).into()))]);
    encode(&sequence(&[explicit(TAG_DIRECTORY_NAME, name)]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use x509_parser::der_parser::ber::BerObjectContent;
    use x509_parser::der_parser::der::parse_der;

    #[test]
    fn test_high_tag_number_header() {
        let encoded = explicit(TAG_ROOT_OF_TRUST, Integer::from_u64(0));
        assert_eq!(&encoded[..3], &[0xbf, 0x85, 0x40]);
        let (rest, object) = parse_der(&encoded).expect("parse");
        assert!(rest.is_empty());
        assert_eq!(object.header.class(), Class::ContextSpecific);
        assert_eq!(object.header.tag().0, TAG_ROOT_OF_TRUST);
    }

    #[test]
    fn test_key_description_layout() {
        let challenge = [9u8; 32];
        let encoded = key_description(
            &challenge,
            &KeyAuthorizations::default(),
            &KeyAuthorizations::tee_generated(),
        );
        let (_, object) = parse_der(&encoded).expect("parse");
        let fields = object.as_sequence().expect("sequence");
        assert_eq!(fields.len(), 8);
        assert_eq!(fields[4].content, BerObjectContent::OctetString(&challenge[..]));
        assert_eq!(fields[7].as_sequence().expect("tee list").len(), 3);
    }

    #[test]
    fn test_long_octet_string_length() {
        let encoded = apple_nonce(&[0; 200]);
        // SEQUENCE, two length bytes, then [1] with two length bytes
        assert_eq!(&encoded[..2], &[0x30, 0x81]);
        assert_eq!(&encoded[3..5], &[0xa1, 0x81]);
    }
}
