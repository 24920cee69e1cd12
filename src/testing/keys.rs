//! Software credential keys for every supported COSE algorithm

use openssl::bn::BigNumContext;
use openssl::ec::{EcGroup, EcKey, PointConversionForm};
use openssl::ecdsa::EcdsaSig;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::{Padding, Rsa};
use openssl::sign::{RsaPssSaltlen, Signer};

use crate::cose::{CoseAlgorithm, CoseKeyParams, CosePublicKey, EcCurve};

/// A private key paired with the COSE algorithm it signs for
pub struct TestKey {
    alg: CoseAlgorithm,
    pkey: PKey<Private>,
}

impl TestKey {
    /// Generate a fresh key for `alg`
    ///
    /// # Panics
    /// Panics if OpenSSL key generation fails
    #[must_use]
    pub fn generate(alg: CoseAlgorithm) -> Self {
        let pkey = match alg.ec_curve() {
            Some(curve) => {
                let group = EcGroup::from_curve_name(curve_nid(curve)).expect("curve");
                PKey::from_ec_key(EcKey::generate(&group).expect("EC key")).expect("pkey")
            }
            None if alg == CoseAlgorithm::EdDsa => PKey::generate_ed25519().expect("Ed25519 key"),
            None => PKey::from_rsa(Rsa::generate(2048).expect("RSA key")).expect("pkey"),
        };
        Self { alg, pkey }
    }

    #[must_use]
    pub fn alg(&self) -> CoseAlgorithm {
        self.alg
    }

    #[must_use]
    pub fn pkey(&self) -> &PKey<Private> {
        &self.pkey
    }

    /// Public half as a COSE key
    ///
    /// # Panics
    /// Panics if the public key cannot be exported
    #[must_use]
    pub fn cose_key(&self) -> CosePublicKey {
        let params = match self.alg.ec_curve() {
            Some(curve) => {
                let point = self.sec1_point();
                let len = curve.coordinate_len();
                CoseKeyParams::Ec2 {
                    curve,
                    x: point[1..=len].to_vec(),
                    y: point[len + 1..].to_vec(),
                }
            }
            None if self.alg == CoseAlgorithm::EdDsa => CoseKeyParams::Okp {
                x: self.pkey.raw_public_key().expect("Ed25519 public key"),
            },
            None => {
                let rsa = self.pkey.rsa().expect("RSA key");
                CoseKeyParams::Rsa {
                    n: rsa.n().to_vec(),
                    e: rsa.e().to_vec(),
                }
            }
        };
        CosePublicKey {
            alg: self.alg,
            params,
        }
    }

    /// Uncompressed SEC1 public point of an EC key
    ///
    /// # Panics
    /// Panics for non-EC keys
    #[must_use]
    pub fn sec1_point(&self) -> Vec<u8> {
        let ec = self.pkey.ec_key().expect("EC key");
        let mut ctx = BigNumContext::new().expect("bn context");
        ec.public_key()
            .to_bytes(ec.group(), PointConversionForm::UNCOMPRESSED, &mut ctx)
            .expect("EC point")
    }

    /// Sign `message` the way an authenticator would for this algorithm;
    /// ECDSA signatures are DER encoded
    ///
    /// # Panics
    /// Panics if OpenSSL signing fails
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let mut signer = match self.alg {
            CoseAlgorithm::EdDsa => Signer::new_without_digest(&self.pkey),
            CoseAlgorithm::Es384 => Signer::new(MessageDigest::sha384(), &self.pkey),
            CoseAlgorithm::Es512 => Signer::new(MessageDigest::sha512(), &self.pkey),
            CoseAlgorithm::Es256 | CoseAlgorithm::Rs256 | CoseAlgorithm::Ps256 => {
                Signer::new(MessageDigest::sha256(), &self.pkey)
            }
        }
        .expect("signer");
        if self.alg == CoseAlgorithm::Ps256 {
            signer.set_rsa_padding(Padding::PKCS1_PSS).expect("PSS");
            signer
                .set_rsa_pss_saltlen(RsaPssSaltlen::DIGEST_LENGTH)
                .expect("salt length");
            signer
                .set_rsa_mgf1_md(MessageDigest::sha256())
                .expect("MGF1");
        }
        signer.sign_oneshot_to_vec(message).expect("signature")
    }

    /// ECDSA signature as fixed-width `r || s`, the JWS encoding
    ///
    /// # Panics
    /// Panics for non-EC keys
    #[must_use]
    pub fn sign_raw(&self, message: &[u8]) -> Vec<u8> {
        let len = self
            .alg
            .ec_curve()
            .map(EcCurve::coordinate_len)
            .expect("EC algorithm");
        let width = i32::try_from(len).expect("width");
        let sig = EcdsaSig::from_der(&self.sign(message)).expect("DER signature");
        let mut raw = sig.r().to_vec_padded(width).expect("r");
        raw.extend(sig.s().to_vec_padded(width).expect("s"));
        raw
    }
}

fn curve_nid(curve: EcCurve) -> Nid {
    match curve {
        EcCurve::P256 => Nid::X9_62_PRIME256V1,
        EcCurve::P384 => Nid::SECP384R1,
        EcCurve::P521 => Nid::SECP521R1,
    }
}
