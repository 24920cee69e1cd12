//! COSE public keys
//!
//! Credential public keys are carried as COSE_Key maps inside the attested
//! credential data. Keys are decoded into a closed set of algorithm-tagged
//! shapes; anything outside that set is rejected at decode time so the
//! signature verifier never sees an unknown algorithm.

use std::fmt;

use ciborium::value::Value;
use serde::{Deserialize, Serialize};

use crate::cbor::{self, CborDecoder};
use crate::error::WebAuthnError;
use crate::signature;

const LABEL_KTY: i64 = 1;
const LABEL_ALG: i64 = 3;
const LABEL_CRV: i64 = -1;
const LABEL_X: i64 = -2;
const LABEL_Y: i64 = -3;
const LABEL_N: i64 = -1;
const LABEL_E: i64 = -2;

/// COSE algorithm identifiers accepted for credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum CoseAlgorithm {
    /// ECDSA P-256 with SHA-256
    Es256,
    /// ECDSA P-384 with SHA-384
    Es384,
    /// ECDSA P-521 with SHA-512
    Es512,
    /// `EdDSA` over Ed25519
    EdDsa,
    /// RSASSA-PSS with SHA-256
    Ps256,
    /// RSASSA-PKCS1-v1_5 with SHA-256
    Rs256,
}

impl CoseAlgorithm {
    /// Every supported algorithm, in the default preference order
    pub const ALL: [CoseAlgorithm; 6] = [
        CoseAlgorithm::Es256,
        CoseAlgorithm::EdDsa,
        CoseAlgorithm::Rs256,
        CoseAlgorithm::Es384,
        CoseAlgorithm::Es512,
        CoseAlgorithm::Ps256,
    ];

    /// The registered COSE identifier
    #[must_use]
    pub fn id(self) -> i64 {
        match self {
            Self::Es256 => -7,
            Self::Es384 => -35,
            Self::Es512 => -36,
            Self::EdDsa => -8,
            Self::Ps256 => -37,
            Self::Rs256 => -257,
        }
    }

    /// Look up an algorithm by COSE identifier
    ///
    /// # Errors
    /// Returns `UnsupportedAlgorithm` for identifiers outside the supported set
    pub fn from_id(id: i64) -> Result<Self, WebAuthnError> {
        match id {
            -7 => Ok(Self::Es256),
            -35 => Ok(Self::Es384),
            -36 => Ok(Self::Es512),
            -8 => Ok(Self::EdDsa),
            -37 => Ok(Self::Ps256),
            -257 => Ok(Self::Rs256),
            other => Err(WebAuthnError::UnsupportedAlgorithm(format!(
                "COSE algorithm {other}"
            ))),
        }
    }

    /// Key type this algorithm operates on
    #[must_use]
    pub fn key_type(self) -> CoseKeyType {
        match self {
            Self::Es256 | Self::Es384 | Self::Es512 => CoseKeyType::Ec2,
            Self::EdDsa => CoseKeyType::Okp,
            Self::Ps256 | Self::Rs256 => CoseKeyType::Rsa,
        }
    }

    /// Curve bound to an ECDSA algorithm
    #[must_use]
    pub fn ec_curve(self) -> Option<EcCurve> {
        match self {
            Self::Es256 => Some(EcCurve::P256),
            Self::Es384 => Some(EcCurve::P384),
            Self::Es512 => Some(EcCurve::P521),
            _ => None,
        }
    }
}

impl TryFrom<i64> for CoseAlgorithm {
    type Error = WebAuthnError;

    fn try_from(id: i64) -> Result<Self, Self::Error> {
        Self::from_id(id)
    }
}

impl From<CoseAlgorithm> for i64 {
    fn from(alg: CoseAlgorithm) -> Self {
        alg.id()
    }
}

impl fmt::Display for CoseAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Es256 => "ES256",
            Self::Es384 => "ES384",
            Self::Es512 => "ES512",
            Self::EdDsa => "EdDSA",
            Self::Ps256 => "PS256",
            Self::Rs256 => "RS256",
        };
        write!(f, "{name} ({})", self.id())
    }
}

/// COSE key types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoseKeyType {
    Okp,
    Ec2,
    Rsa,
}

impl CoseKeyType {
    #[must_use]
    pub fn id(self) -> i64 {
        match self {
            Self::Okp => 1,
            Self::Ec2 => 2,
            Self::Rsa => 3,
        }
    }

    fn from_id(id: i64) -> Result<Self, WebAuthnError> {
        match id {
            1 => Ok(Self::Okp),
            2 => Ok(Self::Ec2),
            3 => Ok(Self::Rsa),
            other => Err(WebAuthnError::UnsupportedAlgorithm(format!(
                "COSE key type {other}"
            ))),
        }
    }
}

/// NIST curves for EC2 keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcCurve {
    P256,
    P384,
    P521,
}

impl EcCurve {
    #[must_use]
    pub fn id(self) -> i64 {
        match self {
            Self::P256 => 1,
            Self::P384 => 2,
            Self::P521 => 3,
        }
    }

    /// Byte length of one affine coordinate
    #[must_use]
    pub fn coordinate_len(self) -> usize {
        match self {
            Self::P256 => 32,
            Self::P384 => 48,
            Self::P521 => 66,
        }
    }

    fn from_id(id: i64) -> Result<Self, WebAuthnError> {
        match id {
            1 => Ok(Self::P256),
            2 => Ok(Self::P384),
            3 => Ok(Self::P521),
            other => Err(WebAuthnError::UnsupportedAlgorithm(format!(
                "EC2 curve {other}"
            ))),
        }
    }

    /// Curve of an uncompressed SEC1 point, judged by its length
    #[must_use]
    pub fn from_sec1_len(len: usize) -> Option<Self> {
        [Self::P256, Self::P384, Self::P521]
            .into_iter()
            .find(|curve| 1 + 2 * curve.coordinate_len() == len)
    }
}

/// Ed25519 is the only OKP curve accepted
pub const OKP_CURVE_ED25519: i64 = 6;

/// Key material of a COSE public key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoseKeyParams {
    Ec2 { curve: EcCurve, x: Vec<u8>, y: Vec<u8> },
    Okp { x: Vec<u8> },
    Rsa { n: Vec<u8>, e: Vec<u8> },
}

/// Algorithm-tagged credential public key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CosePublicKey {
    pub alg: CoseAlgorithm,
    pub params: CoseKeyParams,
}

impl CosePublicKey {
    /// Decode a COSE key from raw CBOR bytes
    ///
    /// # Errors
    /// Returns `MalformedEncoding` for bad CBOR or key fields and
    /// `UnsupportedAlgorithm` for unsupported `kty`/`alg`/`crv`
    pub fn from_bytes(bytes: &[u8], decoder: &CborDecoder) -> Result<Self, WebAuthnError> {
        let value = decoder.decode_exact(bytes)?;
        Self::from_cbor(&value)
    }

    /// Decode a COSE key from a CBOR map
    ///
    /// # Errors
    /// Returns `MalformedEncoding` for missing or wrongly sized fields and
    /// `UnsupportedAlgorithm` for unsupported `kty`/`alg`/`crv`
    pub fn from_cbor(value: &Value) -> Result<Self, WebAuthnError> {
        let map = cbor::as_map(value, "COSE key")?;

        let kty = cbor::get_int_key(map, LABEL_KTY)
            .and_then(cbor::as_i64)
            .ok_or_else(|| WebAuthnError::malformed("COSE key missing kty"))
            .and_then(CoseKeyType::from_id)?;
        let alg = cbor::get_int_key(map, LABEL_ALG)
            .and_then(cbor::as_i64)
            .ok_or_else(|| WebAuthnError::malformed("COSE key missing alg"))
            .and_then(CoseAlgorithm::from_id)?;

        if alg.key_type() != kty {
            return Err(WebAuthnError::UnsupportedAlgorithm(format!(
                "{alg} is not valid for key type {}",
                kty.id()
            )));
        }

        let bytes_at = |label: i64, name: &str| -> Result<Vec<u8>, WebAuthnError> {
            cbor::get_int_key(map, label)
                .and_then(Value::as_bytes)
                .cloned()
                .ok_or_else(|| WebAuthnError::malformed(format!("COSE key missing {name}")))
        };

        let params = match kty {
            CoseKeyType::Ec2 => {
                let curve = cbor::get_int_key(map, LABEL_CRV)
                    .and_then(cbor::as_i64)
                    .ok_or_else(|| WebAuthnError::malformed("COSE key missing crv"))
                    .and_then(EcCurve::from_id)?;
                if alg.ec_curve() != Some(curve) {
                    return Err(WebAuthnError::UnsupportedAlgorithm(format!(
                        "{alg} is not valid on curve {}",
                        curve.id()
                    )));
                }
                let x = bytes_at(LABEL_X, "x")?;
                let y = bytes_at(LABEL_Y, "y")?;
                let len = curve.coordinate_len();
                if x.len() != len || y.len() != len {
                    return Err(WebAuthnError::malformed(format!(
                        "EC2 coordinates must be {len} bytes for curve {}",
                        curve.id()
                    )));
                }
                validate_ec_point(curve, &x, &y)?;
                CoseKeyParams::Ec2 { curve, x, y }
            }
            CoseKeyType::Okp => {
                let crv = cbor::get_int_key(map, LABEL_CRV)
                    .and_then(cbor::as_i64)
                    .ok_or_else(|| WebAuthnError::malformed("COSE key missing crv"))?;
                if crv != OKP_CURVE_ED25519 {
                    return Err(WebAuthnError::UnsupportedAlgorithm(format!(
                        "OKP curve {crv}"
                    )));
                }
                let x = bytes_at(LABEL_X, "x")?;
                if x.len() != 32 {
                    return Err(WebAuthnError::malformed(
                        "Ed25519 public key must be 32 bytes",
                    ));
                }
                CoseKeyParams::Okp { x }
            }
            CoseKeyType::Rsa => {
                let n = bytes_at(LABEL_N, "n")?;
                let e = bytes_at(LABEL_E, "e")?;
                if n.is_empty() || e.is_empty() {
                    return Err(WebAuthnError::malformed("RSA modulus and exponent required"));
                }
                CoseKeyParams::Rsa { n, e }
            }
        };

        Ok(Self { alg, params })
    }

    /// The COSE key type implied by the algorithm
    #[must_use]
    pub fn key_type(&self) -> CoseKeyType {
        self.alg.key_type()
    }

    /// Encode as a canonical COSE_Key map
    #[must_use]
    pub fn to_cbor(&self) -> Value {
        let int = |v: i64| Value::Integer(v.into());
        let mut entries = vec![
            (int(LABEL_KTY), int(self.key_type().id())),
            (int(LABEL_ALG), int(self.alg.id())),
        ];
        match &self.params {
            CoseKeyParams::Ec2 { curve, x, y } => {
                entries.push((int(LABEL_CRV), int(curve.id())));
                entries.push((int(LABEL_X), Value::Bytes(x.clone())));
                entries.push((int(LABEL_Y), Value::Bytes(y.clone())));
            }
            CoseKeyParams::Okp { x } => {
                entries.push((int(LABEL_CRV), int(OKP_CURVE_ED25519)));
                entries.push((int(LABEL_X), Value::Bytes(x.clone())));
            }
            CoseKeyParams::Rsa { n, e } => {
                entries.push((int(LABEL_N), Value::Bytes(n.clone())));
                entries.push((int(LABEL_E), Value::Bytes(e.clone())));
            }
        }
        Value::Map(entries)
    }

    /// Encode as COSE_Key bytes, the form persisted in authenticator records
    ///
    /// # Errors
    /// Returns `MalformedEncoding` if CBOR serialization fails
    pub fn to_bytes(&self) -> Result<Vec<u8>, WebAuthnError> {
        cbor::encode(&self.to_cbor())
    }

    /// Uncompressed SEC1 point (`0x04 || x || y`) for EC2 keys
    #[must_use]
    pub fn sec1_uncompressed(&self) -> Option<Vec<u8>> {
        match &self.params {
            CoseKeyParams::Ec2 { x, y, .. } => Some(uncompressed_point(x, y)),
            _ => None,
        }
    }

    /// Raw ANSI X9.62 key as used by FIDO U2F; only P-256 keys qualify
    #[must_use]
    pub fn to_x962_raw(&self) -> Option<Vec<u8>> {
        match &self.params {
            CoseKeyParams::Ec2 {
                curve: EcCurve::P256,
                x,
                y,
            } => Some(uncompressed_point(x, y)),
            _ => None,
        }
    }
}

fn uncompressed_point(x: &[u8], y: &[u8]) -> Vec<u8> {
    let mut point = Vec::with_capacity(1 + x.len() + y.len());
    point.push(0x04);
    point.extend_from_slice(x);
    point.extend_from_slice(y);
    point
}

fn validate_ec_point(curve: EcCurve, x: &[u8], y: &[u8]) -> Result<(), WebAuthnError> {
    let point = uncompressed_point(x, y);
    let on_curve = match curve {
        EcCurve::P256 => p256::PublicKey::from_sec1_bytes(&point).is_ok(),
        EcCurve::P384 | EcCurve::P521 => signature::openssl_ec_key(curve, &point).is_ok(),
    };
    if on_curve {
        Ok(())
    } else {
        Err(WebAuthnError::malformed(format!(
            "EC2 point is not on curve {}",
            curve.id()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::keys::TestKey;

    #[test]
    fn test_round_trip_every_algorithm() {
        for alg in CoseAlgorithm::ALL {
            let key = TestKey::generate(alg).cose_key();
            let bytes = key.to_bytes().expect("encode");
            let decoded =
                CosePublicKey::from_bytes(&bytes, &CborDecoder::default()).expect("decode");
            assert_eq!(decoded, key, "round trip for {alg}");
        }
    }

    #[test]
    fn test_unknown_algorithm_rejected() {
        let value = Value::Map(vec![
            (Value::Integer(1.into()), Value::Integer(2.into())),
            (Value::Integer(3.into()), Value::Integer((-47).into())),
        ]);
        let err = CosePublicKey::from_cbor(&value).unwrap_err();
        assert!(matches!(err, WebAuthnError::UnsupportedAlgorithm(_)));
    }

    #[test]
    fn test_mismatched_curve_rejected() {
        let key = TestKey::generate(CoseAlgorithm::Es256).cose_key();
        let Value::Map(mut entries) = key.to_cbor() else {
            panic!("COSE key must be a map");
        };
        for (label, value) in &mut entries {
            if cbor::as_i64(label) == Some(LABEL_CRV) {
                *value = Value::Integer(2.into());
            }
        }
        let err = CosePublicKey::from_cbor(&Value::Map(entries)).unwrap_err();
        assert!(matches!(err, WebAuthnError::UnsupportedAlgorithm(_)));
    }

    #[test]
    fn test_short_coordinate_rejected() {
        let value = Value::Map(vec![
            (Value::Integer(1.into()), Value::Integer(2.into())),
            (Value::Integer(3.into()), Value::Integer((-7).into())),
            (Value::Integer((-1).into()), Value::Integer(1.into())),
            (Value::Integer((-2).into()), Value::Bytes(vec![1; 31])),
            (Value::Integer((-3).into()), Value::Bytes(vec![1; 32])),
        ]);
        let err = CosePublicKey::from_cbor(&value).unwrap_err();
        assert!(matches!(err, WebAuthnError::MalformedEncoding(_)));
    }

    #[test]
    fn test_point_off_curve_rejected() {
        let value = Value::Map(vec![
            (Value::Integer(1.into()), Value::Integer(2.into())),
            (Value::Integer(3.into()), Value::Integer((-7).into())),
            (Value::Integer((-1).into()), Value::Integer(1.into())),
            (Value::Integer((-2).into()), Value::Bytes(vec![2; 32])),
            (Value::Integer((-3).into()), Value::Bytes(vec![3; 32])),
        ]);
        assert!(matches!(
            CosePublicKey::from_cbor(&value),
            Err(WebAuthnError::MalformedEncoding(_))
        ));
    }

    #[test]
    fn test_x962_raw_only_for_p256() {
        let ec = TestKey::generate(CoseAlgorithm::Es256).cose_key();
        let raw = ec.to_x962_raw().expect("P-256 key");
        assert_eq!(raw.len(), 65);
        assert_eq!(raw[0], 0x04);

        let ed = TestKey::generate(CoseAlgorithm::EdDsa).cose_key();
        assert!(ed.to_x962_raw().is_none());
    }

    #[test]
    fn test_algorithm_serde_uses_cose_ids() {
        let json = serde_json::to_string(&CoseAlgorithm::Rs256).expect("serialize");
        assert_eq!(json, "-257");
        let alg: CoseAlgorithm = serde_json::from_str("-8").expect("deserialize");
        assert_eq!(alg, CoseAlgorithm::EdDsa);
        assert!(serde_json::from_str::<CoseAlgorithm>("-65535").is_err());
    }
}
