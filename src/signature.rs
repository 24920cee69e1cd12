//! Signature verification
//!
//! Dispatches on [`CoseAlgorithm`] to the backend for each family: `ring` for
//! ES256, ES384 and Ed25519, the `rsa` crate for RS256 and PS256, and OpenSSL
//! for ES512. ECDSA signatures must be strict DER with `r` and `s` in
//! `[1, n-1]` before any backend sees them.

use std::cmp::Ordering;

use log::debug;
use openssl::bn::{BigNum, BigNumContext};
use openssl::ec::{EcGroup, EcKey, EcPoint};
use openssl::ecdsa::EcdsaSig;
use openssl::error::ErrorStack;
use openssl::nid::Nid;
use openssl::pkey::Public;
use ring::signature::{self as ring_sig, UnparsedPublicKey};
use rsa::signature::Verifier;
use rsa::{BigUint, RsaPublicKey};
use sha2::Sha256;
use x509_parser::oid_registry::OID_SIG_ED25519;
use x509_parser::prelude::{FromDer, X509Certificate};
use x509_parser::public_key::PublicKey;
use x509_parser::x509::SubjectPublicKeyInfo;

use crate::cose::{CoseAlgorithm, CoseKeyParams, CosePublicKey, EcCurve};
use crate::crypto;
use crate::error::WebAuthnError;

const ED25519_SIGNATURE_LEN: usize = 64;

/// Public key material independent of where it came from (COSE or X.509)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationKey {
    /// Uncompressed SEC1 point
    Ec { curve: EcCurve, point: Vec<u8> },
    Ed25519(Vec<u8>),
    /// Big-endian modulus and exponent without leading zeros
    Rsa { n: Vec<u8>, e: Vec<u8> },
}

impl VerificationKey {
    /// Key material of a COSE credential key
    #[must_use]
    pub fn from_cose(key: &CosePublicKey) -> Self {
        match &key.params {
            CoseKeyParams::Ec2 { curve, x, y } => {
                let mut point = Vec::with_capacity(1 + x.len() + y.len());
                point.push(0x04);
                point.extend_from_slice(x);
                point.extend_from_slice(y);
                Self::Ec {
                    curve: *curve,
                    point,
                }
            }
            CoseKeyParams::Okp { x } => Self::Ed25519(x.clone()),
            CoseKeyParams::Rsa { n, e } => Self::Rsa {
                n: strip_leading_zeros(n),
                e: strip_leading_zeros(e),
            },
        }
    }

    /// Key material of an X.509 `SubjectPublicKeyInfo`
    ///
    /// # Errors
    /// Returns `UnsupportedAlgorithm` for key types other than EC, RSA and Ed25519
    pub fn from_spki(spki: &SubjectPublicKeyInfo<'_>) -> Result<Self, WebAuthnError> {
        if spki.algorithm.algorithm == OID_SIG_ED25519 {
            return Ok(Self::Ed25519(spki.subject_public_key.data.to_vec()));
        }
        match spki.parsed() {
            Ok(PublicKey::RSA(rsa)) => Ok(Self::Rsa {
                n: strip_leading_zeros(rsa.modulus),
                e: strip_leading_zeros(rsa.exponent),
            }),
            Ok(PublicKey::EC(point)) => {
                let data = point.data();
                let curve = EcCurve::from_sec1_len(data.len())
                    .filter(|_| data.first() == Some(&0x04))
                    .ok_or_else(|| {
                        WebAuthnError::UnsupportedAlgorithm(format!(
                            "EC certificate key of {} bytes",
                            data.len()
                        ))
                    })?;
                Ok(Self::Ec {
                    curve,
                    point: data.to_vec(),
                })
            }
            _ => Err(WebAuthnError::UnsupportedAlgorithm(format!(
                "Certificate key algorithm {}",
                spki.algorithm.algorithm.to_id_string()
            ))),
        }
    }

    fn supports(&self, alg: CoseAlgorithm) -> bool {
        match self {
            Self::Ec { curve, .. } => alg.ec_curve() == Some(*curve),
            Self::Ed25519(_) => alg == CoseAlgorithm::EdDsa,
            Self::Rsa { .. } => matches!(alg, CoseAlgorithm::Rs256 | CoseAlgorithm::Ps256),
        }
    }
}

/// Verify `signature` over `message` with a credential public key
///
/// # Errors
/// Returns `UnsupportedAlgorithm` if the key cannot be used; a signature that
/// fails to verify or does not parse yields `Ok(false)`
pub fn verify_signature(
    key: &CosePublicKey,
    message: &[u8],
    signature: &[u8],
) -> Result<bool, WebAuthnError> {
    verify_with_key(&VerificationKey::from_cose(key), key.alg, message, signature)
}

/// Verify `signature` with the public key of a DER certificate
///
/// # Errors
/// Returns `MalformedEncoding` if the certificate does not parse and
/// `UnsupportedAlgorithm` if its key does not fit `alg`
pub fn verify_with_certificate(
    certificate_der: &[u8],
    alg: CoseAlgorithm,
    message: &[u8],
    signature: &[u8],
) -> Result<bool, WebAuthnError> {
    let (_, cert) = X509Certificate::from_der(certificate_der)
        .map_err(|e| WebAuthnError::malformed(format!("Invalid certificate: {e}")))?;
    let key = VerificationKey::from_spki(cert.public_key())?;
    verify_with_key(&key, alg, message, signature)
}

/// Verify with explicit key material and algorithm
///
/// # Errors
/// Returns `UnsupportedAlgorithm` when the key type does not match `alg` and
/// `MalformedEncoding` when RSA key parameters are unusable
pub fn verify_with_key(
    key: &VerificationKey,
    alg: CoseAlgorithm,
    message: &[u8],
    signature: &[u8],
) -> Result<bool, WebAuthnError> {
    if !key.supports(alg) {
        return Err(WebAuthnError::UnsupportedAlgorithm(format!(
            "{alg} cannot be used with this key type"
        )));
    }

    let verified = match (key, alg) {
        (VerificationKey::Ec { curve, point }, _) => verify_ecdsa(*curve, point, message, signature),
        (VerificationKey::Ed25519(raw), _) => {
            signature.len() == ED25519_SIGNATURE_LEN
                && UnparsedPublicKey::new(&ring_sig::ED25519, raw)
                    .verify(message, signature)
                    .is_ok()
        }
        (VerificationKey::Rsa { n, e }, CoseAlgorithm::Rs256) => {
            let key = rsa_key(n, e)?;
            rsa::pkcs1v15::Signature::try_from(signature).is_ok_and(|sig| {
                rsa::pkcs1v15::VerifyingKey::<Sha256>::new(key)
                    .verify(message, &sig)
                    .is_ok()
            })
        }
        (VerificationKey::Rsa { n, e }, _) => {
            let key = rsa_key(n, e)?;
            rsa::pss::Signature::try_from(signature).is_ok_and(|sig| {
                rsa::pss::VerifyingKey::<Sha256>::new(key)
                    .verify(message, &sig)
                    .is_ok()
            })
        }
    };

    if !verified {
        debug!("{alg} signature did not verify");
    }
    Ok(verified)
}

fn verify_ecdsa(curve: EcCurve, point: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let Some(parsed) = strict_ecdsa_signature(curve, signature) else {
        debug!("Rejecting non-canonical or out-of-range ECDSA signature");
        return false;
    };

    match curve {
        EcCurve::P256 => UnparsedPublicKey::new(&ring_sig::ECDSA_P256_SHA256_ASN1, point)
            .verify(message, signature)
            .is_ok(),
        EcCurve::P384 => UnparsedPublicKey::new(&ring_sig::ECDSA_P384_SHA384_ASN1, point)
            .verify(message, signature)
            .is_ok(),
        EcCurve::P521 => openssl_ec_key(curve, point)
            .and_then(|key| parsed.verify(&crypto::sha512(message), &key))
            .unwrap_or(false),
    }
}

/// Parse a DER ECDSA signature, rejecting anything that does not re-encode
/// byte for byte or whose scalars fall outside `[1, n-1]`
fn strict_ecdsa_signature(curve: EcCurve, signature: &[u8]) -> Option<EcdsaSig> {
    let parsed = EcdsaSig::from_der(signature).ok()?;
    if parsed.to_der().ok()? != signature {
        return None;
    }

    let group = EcGroup::from_curve_name(curve_nid(curve)).ok()?;
    let mut order = BigNum::new().ok()?;
    let mut ctx = BigNumContext::new().ok()?;
    group.order(&mut order, &mut ctx).ok()?;

    let in_range = |scalar: &openssl::bn::BigNumRef| {
        !scalar.is_negative()
            && scalar.num_bits() > 0
            && scalar.ucmp(&order) == Ordering::Less
    };
    (in_range(parsed.r()) && in_range(parsed.s())).then_some(parsed)
}

fn rsa_key(n: &[u8], e: &[u8]) -> Result<RsaPublicKey, WebAuthnError> {
    RsaPublicKey::new(BigUint::from_bytes_be(n), BigUint::from_bytes_be(e))
        .map_err(|e| WebAuthnError::malformed(format!("Unusable RSA public key: {e}")))
}

fn curve_nid(curve: EcCurve) -> Nid {
    match curve {
        EcCurve::P256 => Nid::X9_62_PRIME256V1,
        EcCurve::P384 => Nid::SECP384R1,
        EcCurve::P521 => Nid::SECP521R1,
    }
}

/// OpenSSL public key for an uncompressed point; fails if the point is not on
/// the curve
pub(crate) fn openssl_ec_key(curve: EcCurve, point: &[u8]) -> Result<EcKey<Public>, ErrorStack> {
    let group = EcGroup::from_curve_name(curve_nid(curve))?;
    let mut ctx = BigNumContext::new()?;
    let point = EcPoint::from_bytes(&group, point, &mut ctx)?;
    let key = EcKey::from_public_key(&group, &point)?;
    key.check_key()?;
    Ok(key)
}

fn strip_leading_zeros(bytes: &[u8]) -> Vec<u8> {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}
