//! X.509 certificate factory for attestation fixtures
//!
//! Certificates are built with OpenSSL and parsed back by the verifier, so
//! every attestation format is exercised against real DER.

use chrono::Utc;
use openssl::asn1::{Asn1Integer, Asn1Object, Asn1OctetString, Asn1Time};
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::Id;
use openssl::x509::extension::BasicConstraints;
use openssl::x509::{X509Builder, X509Extension, X509Name, X509NameBuilder, X509};
use uuid::Uuid;
use x509_parser::der_parser::{oid, Oid};
use x509_parser::oid_registry::{OID_X509_EXT_EXTENDED_KEY_USAGE, OID_X509_EXT_SUBJECT_ALT_NAME};

use super::der;
use super::keys::TestKey;
use crate::attestation::certificate::OID_FIDO_AAGUID;
use crate::cose::CoseAlgorithm;

const DAY_SECS: i64 = 24 * 60 * 60;

/// A built certificate
pub struct TestCertificate {
    x509: X509,
    subject: Vec<(Nid, String)>,
}

impl TestCertificate {
    /// DER encoding
    ///
    /// # Panics
    /// Panics if OpenSSL cannot encode the certificate
    #[must_use]
    pub fn der(&self) -> Vec<u8> {
        self.x509.to_der().expect("certificate DER")
    }

    #[must_use]
    pub fn x509(&self) -> &X509 {
        &self.x509
    }
}

/// Self-signed ES256 certificate authority
pub struct TestCa {
    pub key: TestKey,
    pub certificate: TestCertificate,
}

impl TestCa {
    #[must_use]
    pub fn new(name: &str) -> Self {
        let key = TestKey::generate(CoseAlgorithm::Es256);
        let certificate = CertificateBuilder::new(name).ca().self_signed(&key);
        Self { key, certificate }
    }
}

struct Extension {
    oid: String,
    critical: bool,
    value: Vec<u8>,
}

/// Fluent builder for leaf and CA certificates
pub struct CertificateBuilder {
    subject: Vec<(Nid, String)>,
    not_before: i64,
    not_after: i64,
    ca: bool,
    extensions: Vec<Extension>,
}

impl CertificateBuilder {
    /// Certificate whose subject is just `CN=common_name`
    #[must_use]
    pub fn new(common_name: &str) -> Self {
        let now = Utc::now().timestamp();
        Self {
            subject: vec![(Nid::COMMONNAME, common_name.to_string())],
            not_before: now - DAY_SECS,
            not_after: now + 365 * DAY_SECS,
            ca: false,
            extensions: Vec::new(),
        }
    }

    /// Subject in the shape packed attestation requires
    #[must_use]
    pub fn attestation(common_name: &str) -> Self {
        let mut builder = Self::new(common_name);
        builder.subject = vec![
            (Nid::COUNTRYNAME, "US".to_string()),
            (Nid::ORGANIZATIONNAME, "Vouchrs Test Authenticators".to_string()),
            (
                Nid::ORGANIZATIONALUNITNAME,
                "Authenticator Attestation".to_string(),
            ),
            (Nid::COMMONNAME, common_name.to_string()),
        ];
        builder
    }

    /// TPM attestation identity key certificate: empty subject, a subject
    /// alternative name and the `tcg-kp-AIKCertificate` key usage
    #[must_use]
    pub fn tpm_aik() -> Self {
        Self::new("")
            .empty_subject()
            .extension(
                &OID_X509_EXT_SUBJECT_ALT_NAME,
                true,
                der::tpm_subject_alternative_name("id:56524F55"),
            )
            .extended_key_usage(&oid!(2.23.133.8.3))
    }

    #[must_use]
    pub fn empty_subject(mut self) -> Self {
        self.subject.clear();
        self
    }

    /// Validity period that ended yesterday
    #[must_use]
    pub fn expired(mut self) -> Self {
        let now = Utc::now().timestamp();
        self.not_before = now - 30 * DAY_SECS;
        self.not_after = now - DAY_SECS;
        self
    }

    #[must_use]
    pub fn ca(mut self) -> Self {
        self.ca = true;
        self
    }

    /// Add an extension with a DER-encoded value
    #[must_use]
    pub fn extension(mut self, oid: &Oid<'_>, critical: bool, value: Vec<u8>) -> Self {
        self.extensions.push(Extension {
            oid: oid.to_id_string(),
            critical,
            value,
        });
        self
    }

    /// id-fido-gen-ce-aaguid
    #[must_use]
    pub fn aaguid(self, aaguid: Uuid) -> Self {
        self.extension(&OID_FIDO_AAGUID, false, der::aaguid(aaguid))
    }

    #[must_use]
    pub fn extended_key_usage(self, purpose: &Oid<'_>) -> Self {
        self.extension(
            &OID_X509_EXT_EXTENDED_KEY_USAGE,
            false,
            der::extended_key_usage(purpose),
        )
    }

    /// Certificate for `key`, signed by `key`
    #[must_use]
    pub fn self_signed(self, key: &TestKey) -> TestCertificate {
        let subject = self.subject_name();
        self.build(key, &subject, key)
    }

    /// Certificate for `key`, signed by `ca`
    ///
    /// # Panics
    /// Panics if OpenSSL rejects the certificate
    #[must_use]
    pub fn issued_by(self, key: &TestKey, ca: &TestCa) -> TestCertificate {
        let issuer = name_from(&ca.certificate.subject);
        self.build(key, &issuer, &ca.key)
    }

    fn subject_name(&self) -> X509Name {
        name_from(&self.subject)
    }

    fn build(self, key: &TestKey, issuer: &X509Name, signer: &TestKey) -> TestCertificate {
        let mut builder = X509Builder::new().expect("x509 builder");
        builder.set_version(2).expect("v3");
        builder.set_serial_number(&serial()).expect("serial");
        builder
            .set_subject_name(&self.subject_name())
            .expect("subject");
        builder.set_issuer_name(issuer).expect("issuer");
        builder.set_pubkey(key.pkey()).expect("public key");
        builder
            .set_not_before(&Asn1Time::from_unix(self.not_before).expect("time"))
            .expect("not before");
        builder
            .set_not_after(&Asn1Time::from_unix(self.not_after).expect("time"))
            .expect("not after");

        if self.ca {
            let constraints = BasicConstraints::new().critical().ca().build().expect("CA");
            builder.append_extension(constraints).expect("extension");
        }
        for ext in &self.extensions {
            let oid = Asn1Object::from_str(&ext.oid).expect("OID");
            let value = Asn1OctetString::new_from_bytes(&ext.value).expect("value");
            let extension =
                X509Extension::new_from_der(&oid, ext.critical, &value).expect("extension");
            builder.append_extension(extension).expect("append");
        }

        let digest = if signer.pkey().id() == Id::ED25519 {
            MessageDigest::null()
        } else {
            MessageDigest::sha256()
        };
        builder.sign(signer.pkey(), digest).expect("sign");
        TestCertificate {
            x509: builder.build(),
            subject: self.subject,
        }
    }
}

fn name_from(entries: &[(Nid, String)]) -> X509Name {
    let mut name = X509NameBuilder::new().expect("name builder");
    for (nid, value) in entries {
        name.append_entry_by_nid(*nid, value).expect("name entry");
    }
    name.build()
}

fn serial() -> Asn1Integer {
    let mut bn = BigNum::new().expect("bignum");
    bn.rand(63, MsbOption::MAYBE_ZERO, false).expect("random");
    bn.to_asn1_integer().expect("serial")
}
