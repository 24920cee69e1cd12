//! `tpm` attestation
//!
//! The AIK signs a `TPMS_ATTEST` (`certInfo`) whose `extraData` commits to
//! `authData || clientDataHash` and whose certified name commits to the
//! `TPMT_PUBLIC` (`pubArea`) describing the credential key.

use ciborium::value::Value;
use x509_parser::certificate::X509Certificate;
use x509_parser::der_parser::{oid, Oid};

use super::certificate;
use super::{Evidence, StatementInput};
use crate::cbor;
use crate::cose::{CoseKeyParams, CosePublicKey, EcCurve};
use crate::crypto;
use crate::error::WebAuthnError;

const TPM_GENERATED_VALUE: u32 = 0xff54_4347;
const TPM_ST_ATTEST_CERTIFY: u16 = 0x8017;

const TPM_ALG_RSA: u16 = 0x0001;
const TPM_ALG_SHA1: u16 = 0x0004;
const TPM_ALG_SHA256: u16 = 0x000b;
const TPM_ALG_SHA384: u16 = 0x000c;
const TPM_ALG_SHA512: u16 = 0x000d;
const TPM_ALG_ECC: u16 = 0x0023;

const TPM_ECC_NIST_P256: u16 = 0x0003;
const TPM_ECC_NIST_P384: u16 = 0x0004;
const TPM_ECC_NIST_P521: u16 = 0x0005;

const RSA_DEFAULT_EXPONENT: u32 = 65_537;
const OID_TCG_KP_AIK_CERTIFICATE: Oid<'static> = oid!(2.23.133.8.3);

pub(super) fn verify(
    stmt: &[(Value, Value)],
    input: &StatementInput<'_>,
) -> Result<Evidence, WebAuthnError> {
    let ver = cbor::required_text(stmt, "ver")
        .map_err(|_| WebAuthnError::attestation("tpm statement lacks ver"))?;
    if ver != "2.0" {
        return Err(WebAuthnError::attestation(format!(
            "Unsupported TPM version {ver}"
        )));
    }
    if cbor::get_text_key(stmt, "ecdaaKeyId").is_some() {
        return Err(WebAuthnError::attestation(
            "ECDAA TPM attestation is not supported",
        ));
    }

    let alg = super::statement_alg(stmt)?;
    let sig = super::statement_bytes(stmt, "sig")?;
    let cert_info_bytes = super::statement_bytes(stmt, "certInfo")?;
    let pub_area_bytes = super::statement_bytes(stmt, "pubArea")?;
    let x5c = super::required_x5c(stmt)?;

    let pub_area = PubArea::parse(pub_area_bytes)?;
    pub_area.require_matches(&input.credential.credential_public_key)?;

    let cert_info = CertInfo::parse(cert_info_bytes)?;
    if cert_info.magic != TPM_GENERATED_VALUE {
        return Err(WebAuthnError::attestation(format!(
            "TPM magic {:#x} is not TPM_GENERATED_VALUE",
            cert_info.magic
        )));
    }
    if cert_info.attest_type != TPM_ST_ATTEST_CERTIFY {
        return Err(WebAuthnError::attestation(format!(
            "TPM attestation type {:#x} is not TPM_ST_ATTEST_CERTIFY",
            cert_info.attest_type
        )));
    }
    let expected_extra = super::digest_for(alg, &input.signed_data());
    if !crypto::constant_time_eq(cert_info.extra_data, &expected_extra) {
        return Err(WebAuthnError::attestation(
            "TPM extraData does not match authenticator data",
        ));
    }
    check_certified_name(cert_info.name, pub_area_bytes)?;

    let chain = certificate::parse_chain(&x5c)?;
    let aik = &chain[0];
    check_aik_certificate(aik)?;
    certificate::check_aaguid_extension(aik, input.credential.aaguid)?;
    certificate::validate_chain(&chain)?;

    super::require_signature(
        &certificate::certificate_key(aik)?,
        alg,
        cert_info_bytes,
        sig,
        "TPM certInfo",
    )?;

    Ok(Evidence::Certificates(x5c.clone()))
}

/// `name` is `nameAlg || H_nameAlg(pubArea)`
fn check_certified_name(name: &[u8], pub_area_bytes: &[u8]) -> Result<(), WebAuthnError> {
    if name.len() < 2 {
        return Err(WebAuthnError::attestation("TPM certified name is truncated"));
    }
    let name_alg = u16::from_be_bytes([name[0], name[1]]);
    let digest = match name_alg {
        TPM_ALG_SHA256 => crypto::sha256(pub_area_bytes),
        TPM_ALG_SHA384 => crypto::sha384(pub_area_bytes),
        TPM_ALG_SHA512 => crypto::sha512(pub_area_bytes),
        TPM_ALG_SHA1 => {
            return Err(WebAuthnError::attestation(
                "SHA-1 TPM name algorithm is not accepted",
            ))
        }
        other => {
            return Err(WebAuthnError::attestation(format!(
                "Unknown TPM name algorithm {other:#06x}"
            )))
        }
    };
    if crypto::constant_time_eq(&name[2..], &digest) {
        Ok(())
    } else {
        Err(WebAuthnError::attestation(
            "TPM certified name does not match pubArea",
        ))
    }
}

fn check_aik_certificate(aik: &X509Certificate<'_>) -> Result<(), WebAuthnError> {
    if !certificate::is_v3(aik) {
        return Err(WebAuthnError::attestation("AIK certificate must be X.509 v3"));
    }
    if !certificate::subject_is_empty(aik) {
        return Err(WebAuthnError::attestation(
            "AIK certificate subject must be empty",
        ));
    }
    if !certificate::has_subject_alternative_name(aik)? {
        return Err(WebAuthnError::attestation(
            "AIK certificate lacks a subject alternative name",
        ));
    }
    if !certificate::has_extended_key_usage(aik, &OID_TCG_KP_AIK_CERTIFICATE)? {
        return Err(WebAuthnError::attestation(
            "AIK certificate lacks the tcg-kp-AIKCertificate key usage",
        ));
    }
    if aik.is_ca() {
        return Err(WebAuthnError::attestation("AIK certificate must not be a CA"));
    }
    Ok(())
}

/// Big-endian cursor over TPM structures
struct TpmReader<'a> {
    data: &'a [u8],
    pos: usize,
    what: &'static str,
}

impl<'a> TpmReader<'a> {
    fn new(data: &'a [u8], what: &'static str) -> Self {
        Self { data, pos: 0, what }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], WebAuthnError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| WebAuthnError::attestation(format!("TPM {} is truncated", self.what)))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u16(&mut self) -> Result<u16, WebAuthnError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, WebAuthnError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// `TPM2B_*`: 16-bit size followed by that many bytes
    fn sized(&mut self) -> Result<&'a [u8], WebAuthnError> {
        let len = usize::from(self.u16()?);
        self.take(len)
    }

    fn finish(&self) -> Result<(), WebAuthnError> {
        if self.pos == self.data.len() {
            Ok(())
        } else {
            Err(WebAuthnError::attestation(format!(
                "TPM {} has trailing bytes",
                self.what
            )))
        }
    }
}

#[derive(Debug)]
enum PublicParameters<'a> {
    Rsa { exponent: u32, modulus: &'a [u8] },
    Ecc { curve_id: u16, x: &'a [u8], y: &'a [u8] },
}

/// `TPMT_PUBLIC`
#[derive(Debug)]
struct PubArea<'a> {
    params: PublicParameters<'a>,
}

impl<'a> PubArea<'a> {
    fn parse(bytes: &'a [u8]) -> Result<Self, WebAuthnError> {
        let mut reader = TpmReader::new(bytes, "pubArea");
        let key_type = reader.u16()?;
        let _name_alg = reader.u16()?;
        let _object_attributes = reader.u32()?;
        let _auth_policy = reader.sized()?;

        let params = match key_type {
            TPM_ALG_RSA => {
                let _symmetric = reader.u16()?;
                let _scheme = reader.u16()?;
                let _key_bits = reader.u16()?;
                let exponent = reader.u32()?;
                let modulus = reader.sized()?;
                PublicParameters::Rsa { exponent, modulus }
            }
            TPM_ALG_ECC => {
                let _symmetric = reader.u16()?;
                let _scheme = reader.u16()?;
                let curve_id = reader.u16()?;
                let _kdf = reader.u16()?;
                let x = reader.sized()?;
                let y = reader.sized()?;
                PublicParameters::Ecc { curve_id, x, y }
            }
            other => {
                return Err(WebAuthnError::attestation(format!(
                    "Unsupported TPM key type {other:#06x}"
                )))
            }
        };
        reader.finish()?;
        Ok(Self { params })
    }

    fn require_matches(&self, credential: &CosePublicKey) -> Result<(), WebAuthnError> {
        let matches = match (&self.params, &credential.params) {
            (PublicParameters::Rsa { exponent, modulus }, CoseKeyParams::Rsa { n, e }) => {
                let exponent = if *exponent == 0 {
                    RSA_DEFAULT_EXPONENT
                } else {
                    *exponent
                };
                let e = e.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
                trim(modulus) == trim(n) && u64::from(exponent) == e
            }
            (PublicParameters::Ecc { curve_id, x, y }, CoseKeyParams::Ec2 { curve, x: cx, y: cy }) => {
                tpm_curve(*curve) == *curve_id && *x == cx.as_slice() && *y == cy.as_slice()
            }
            _ => false,
        };
        if matches {
            Ok(())
        } else {
            Err(WebAuthnError::attestation(
                "TPM pubArea does not match the credential public key",
            ))
        }
    }
}

/// `TPMS_ATTEST` with `TPMS_CERTIFY_INFO`
#[derive(Debug)]
struct CertInfo<'a> {
    magic: u32,
    attest_type: u16,
    extra_data: &'a [u8],
    name: &'a [u8],
}

impl<'a> CertInfo<'a> {
    fn parse(bytes: &'a [u8]) -> Result<Self, WebAuthnError> {
        let mut reader = TpmReader::new(bytes, "certInfo");
        let magic = reader.u32()?;
        let attest_type = reader.u16()?;
        let _qualified_signer = reader.sized()?;
        let extra_data = reader.sized()?;
        // TPMS_CLOCK_INFO: clock, resetCount, restartCount, safe
        reader.take(8 + 4 + 4 + 1)?;
        let _firmware_version = reader.take(8)?;
        let name = reader.sized()?;
        let _qualified_name = reader.sized()?;
        reader.finish()?;
        Ok(Self {
            magic,
            attest_type,
            extra_data,
            name,
        })
    }
}

fn tpm_curve(curve: EcCurve) -> u16 {
    match curve {
        EcCurve::P256 => TPM_ECC_NIST_P256,
        EcCurve::P384 => TPM_ECC_NIST_P384,
        EcCurve::P521 => TPM_ECC_NIST_P521,
    }
}

fn trim(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_certified_name_check() {
        let pub_area = b"pub area bytes";
        let mut name = TPM_ALG_SHA256.to_be_bytes().to_vec();
        name.extend_from_slice(&crypto::sha256(pub_area));
        check_certified_name(&name, pub_area).expect("name matches");

        name[5] ^= 0xff;
        assert!(check_certified_name(&name, pub_area).is_err());

        let mut sha1_name = TPM_ALG_SHA1.to_be_bytes().to_vec();
        sha1_name.extend_from_slice(&[0; 20]);
        assert!(check_certified_name(&sha1_name, pub_area).is_err());
    }

    #[test]
    fn test_reader_detects_truncation() {
        let mut reader = TpmReader::new(&[0x00, 0x05, 0x01], "test");
        assert!(reader.sized().is_err());
    }

    #[test]
    fn test_cert_info_rejects_trailing_bytes() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&TPM_GENERATED_VALUE.to_be_bytes());
        bytes.extend_from_slice(&TPM_ST_ATTEST_CERTIFY.to_be_bytes());
        bytes.extend_from_slice(&[0, 0]); // qualifiedSigner
        bytes.extend_from_slice(&[0, 1, 0xaa]); // extraData
        bytes.extend_from_slice(&[0; 17]);
        bytes.extend_from_slice(&[0; 8]);
        bytes.extend_from_slice(&[0, 0]); // name
        bytes.extend_from_slice(&[0, 0]); // qualifiedName
        let info = CertInfo::parse(&bytes).expect("parse");
        assert_eq!(info.extra_data, &[0xaa]);

        bytes.push(0);
        assert!(CertInfo::parse(&bytes).is_err());
    }
}
