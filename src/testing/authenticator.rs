//! Software authenticator producing real ceremony responses
//!
//! [`SoftAuthenticator`] holds a credential key and emits
//! `RegistrationResponse`/`AuthenticationResponse` values byte-for-byte like a
//! browser would hand them to the relying party, for every attestation
//! format the verifier understands.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use ciborium::value::Value;
use serde_json::json;
use uuid::Uuid;

use super::certificates::{CertificateBuilder, TestCa};
use super::constants::TEST_AAGUID;
use super::der::{self, KeyAuthorizations};
use super::keys::TestKey;
use crate::attestation::android_key::OID_ANDROID_KEY_DESCRIPTION;
use crate::attestation::apple::OID_APPLE_NONCE;
use crate::authenticator_data::AuthenticatorFlags;
use crate::cbor::{self, CborDecoder};
use crate::client_data::CeremonyType;
use crate::cose::{CoseAlgorithm, CoseKeyParams, CosePublicKey, EcCurve};
use crate::crypto;
use crate::types::{
    AuthenticationResponse, AuthenticatorAssertionResponse, AuthenticatorAttachment,
    AuthenticatorAttestationResponse, AuthenticatorTransport, RegistrationResponse,
    PUBLIC_KEY_CREDENTIAL_TYPE,
};

const TPM_GENERATED_VALUE: u32 = 0xff54_4347;
const TPM_ST_ATTEST_CERTIFY: u16 = 0x8017;
const TPM_ALG_RSA: u16 = 0x0001;
const TPM_ALG_SHA256: u16 = 0x000b;
const TPM_ALG_NULL: u16 = 0x0010;
const TPM_ALG_ECC: u16 = 0x0023;

/// Raw authenticator data in the wire layout
pub struct AuthenticatorDataBuilder {
    rp_id_hash: Vec<u8>,
    flags: u8,
    sign_count: u32,
    attested: Option<Vec<u8>>,
    extensions: Option<Value>,
}

impl AuthenticatorDataBuilder {
    /// User-present authenticator data for `rp_id` with a zero counter
    #[must_use]
    pub fn new(rp_id: &str) -> Self {
        Self {
            rp_id_hash: crypto::sha256(rp_id.as_bytes()),
            flags: AuthenticatorFlags::USER_PRESENT,
            sign_count: 0,
            attested: None,
            extensions: None,
        }
    }

    /// Replace the flag byte; AT and ED are still added when their data is
    #[must_use]
    pub fn flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    #[must_use]
    pub fn sign_count(mut self, sign_count: u32) -> Self {
        self.sign_count = sign_count;
        self
    }

    /// Append attested credential data
    ///
    /// # Panics
    /// Panics if the credential ID is longer than 65535 bytes or the key
    /// cannot be encoded
    #[must_use]
    pub fn attested_credential(
        mut self,
        aaguid: Uuid,
        credential_id: Vec<u8>,
        public_key: &CosePublicKey,
    ) -> Self {
        let id_len = u16::try_from(credential_id.len()).expect("credential ID length");
        let mut attested = aaguid.as_bytes().to_vec();
        attested.extend_from_slice(&id_len.to_be_bytes());
        attested.extend(credential_id);
        attested.extend(public_key.to_bytes().expect("COSE key"));
        self.attested = Some(attested);
        self
    }

    #[must_use]
    pub fn extensions(mut self, extensions: Value) -> Self {
        self.extensions = Some(extensions);
        self
    }

    /// # Panics
    /// Panics if the extensions map cannot be encoded
    #[must_use]
    pub fn build(self) -> Vec<u8> {
        let mut flags = self.flags;
        if self.attested.is_some() {
            flags |= AuthenticatorFlags::ATTESTED_CREDENTIAL_DATA;
        }
        if self.extensions.is_some() {
            flags |= AuthenticatorFlags::EXTENSION_DATA;
        }

        let mut bytes = self.rp_id_hash;
        bytes.push(flags);
        bytes.extend_from_slice(&self.sign_count.to_be_bytes());
        if let Some(attested) = self.attested {
            bytes.extend(attested);
        }
        if let Some(extensions) = &self.extensions {
            bytes.extend(cbor::encode(extensions).expect("extensions"));
        }
        bytes
    }
}

/// Attestation statement a [`SoftAuthenticator`] should produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttestationKind {
    None,
    PackedSelf,
    PackedFull,
    FidoU2f,
    Apple,
    AndroidKey,
    AndroidSafetyNet,
    Tpm,
}

impl AttestationKind {
    pub const ALL: [AttestationKind; 8] = [
        Self::None,
        Self::PackedSelf,
        Self::PackedFull,
        Self::FidoU2f,
        Self::Apple,
        Self::AndroidKey,
        Self::AndroidSafetyNet,
        Self::Tpm,
    ];

    /// The `fmt` identifier in the attestation object
    #[must_use]
    pub fn fmt(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::PackedSelf | Self::PackedFull => "packed",
            Self::FidoU2f => "fido-u2f",
            Self::Apple => "apple",
            Self::AndroidKey => "android-key",
            Self::AndroidSafetyNet => "android-safetynet",
            Self::Tpm => "tpm",
        }
    }
}

/// A credential living in software
pub struct SoftAuthenticator {
    key: TestKey,
    credential_id: Vec<u8>,
    aaguid: Uuid,
    flags: u8,
    sign_count: u32,
    counter_step: u32,
    user_handle: Vec<u8>,
    attestation_ca: TestCa,
}

impl SoftAuthenticator {
    /// Fresh credential for `alg`, user present and verified, counting from 0
    ///
    /// # Panics
    /// Panics if the system random source fails
    #[must_use]
    pub fn new(alg: CoseAlgorithm) -> Self {
        Self {
            key: TestKey::generate(alg),
            credential_id: crypto::random_bytes(32).expect("credential ID"),
            aaguid: TEST_AAGUID,
            flags: AuthenticatorFlags::USER_PRESENT | AuthenticatorFlags::USER_VERIFIED,
            sign_count: 0,
            counter_step: 1,
            user_handle: b"soft-user".to_vec(),
            attestation_ca: TestCa::new("Vouchrs Test Attestation Root"),
        }
    }

    /// Flags for every response; AT is added on registration
    #[must_use]
    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    #[must_use]
    pub fn with_sign_count(mut self, sign_count: u32) -> Self {
        self.sign_count = sign_count;
        self
    }

    /// Increment per assertion; 0 models an authenticator without a counter
    #[must_use]
    pub fn with_counter_step(mut self, step: u32) -> Self {
        self.counter_step = step;
        self
    }

    #[must_use]
    pub fn with_user_handle(mut self, user_handle: &[u8]) -> Self {
        self.user_handle = user_handle.to_vec();
        self
    }

    #[must_use]
    pub fn with_aaguid(mut self, aaguid: Uuid) -> Self {
        self.aaguid = aaguid;
        self
    }

    #[must_use]
    pub fn credential_id(&self) -> &[u8] {
        &self.credential_id
    }

    #[must_use]
    pub fn key(&self) -> &TestKey {
        &self.key
    }

    #[must_use]
    pub fn sign_count(&self) -> u32 {
        self.sign_count
    }

    /// Root certificate every attestation chain of this authenticator ends in
    #[must_use]
    pub fn attestation_root(&self) -> &TestCa {
        &self.attestation_ca
    }

    /// Answer `navigator.credentials.create()`
    ///
    /// # Panics
    /// Panics if the attestation kind needs a key type this credential lacks
    #[must_use]
    pub fn make_credential(
        &self,
        rp_id: &str,
        origin: &str,
        challenge: &[u8],
        kind: AttestationKind,
    ) -> RegistrationResponse {
        let client_data = client_data_json(CeremonyType::Create, challenge, origin);
        let client_data_hash = crypto::sha256(&client_data);
        let auth_data = AuthenticatorDataBuilder::new(rp_id)
            .flags(self.flags | AuthenticatorFlags::ATTESTED_CREDENTIAL_DATA)
            .sign_count(self.sign_count)
            .attested_credential(self.aaguid, self.credential_id.clone(), &self.key.cose_key())
            .build();

        let att_stmt = self.statement(kind, &auth_data, &client_data_hash);
        let object = Value::Map(vec![
            (text("fmt"), text(kind.fmt())),
            (text("attStmt"), Value::Map(att_stmt)),
            (text("authData"), Value::Bytes(auth_data)),
        ]);

        let id = crypto::base64url_encode(&self.credential_id);
        RegistrationResponse {
            id: id.clone(),
            raw_id: id,
            response: AuthenticatorAttestationResponse {
                client_data_json: crypto::base64url_encode(&client_data),
                attestation_object: crypto::base64url_encode(
                    &cbor::encode(&object).expect("attestation object"),
                ),
                transports: Some(vec![AuthenticatorTransport::Internal]),
            },
            authenticator_attachment: Some(AuthenticatorAttachment::Platform),
            client_extension_results: Some(json!({})),
            r#type: PUBLIC_KEY_CREDENTIAL_TYPE.to_string(),
        }
    }

    /// Answer `navigator.credentials.get()`, advancing the signature counter
    #[must_use]
    pub fn get_assertion(
        &mut self,
        rp_id: &str,
        origin: &str,
        challenge: &[u8],
    ) -> AuthenticationResponse {
        self.sign_count = self.sign_count.saturating_add(self.counter_step);

        let client_data = client_data_json(CeremonyType::Get, challenge, origin);
        let auth_data = AuthenticatorDataBuilder::new(rp_id)
            .flags(self.flags)
            .sign_count(self.sign_count)
            .build();
        let client_data_hash = crypto::sha256(&client_data);
        let signature = self
            .key
            .sign(&[auth_data.as_slice(), client_data_hash.as_slice()].concat());

        let id = crypto::base64url_encode(&self.credential_id);
        AuthenticationResponse {
            id: id.clone(),
            raw_id: id,
            response: AuthenticatorAssertionResponse {
                client_data_json: crypto::base64url_encode(&client_data),
                authenticator_data: crypto::base64url_encode(&auth_data),
                signature: crypto::base64url_encode(&signature),
                user_handle: Some(crypto::base64url_encode(&self.user_handle)),
            },
            authenticator_attachment: Some(AuthenticatorAttachment::Platform),
            client_extension_results: Some(json!({})),
            r#type: PUBLIC_KEY_CREDENTIAL_TYPE.to_string(),
        }
    }

    fn statement(
        &self,
        kind: AttestationKind,
        auth_data: &[u8],
        client_data_hash: &[u8],
    ) -> Vec<(Value, Value)> {
        let signed_data = [auth_data, client_data_hash].concat();
        let ca = &self.attestation_ca;

        match kind {
            AttestationKind::None => Vec::new(),
            AttestationKind::PackedSelf => vec![
                (text("alg"), alg(self.key.alg())),
                (text("sig"), Value::Bytes(self.key.sign(&signed_data))),
            ],
            AttestationKind::PackedFull => {
                let attestation_key = TestKey::generate(CoseAlgorithm::Es256);
                let cert = CertificateBuilder::attestation("Vouchrs Soft Authenticator")
                    .aaguid(self.aaguid)
                    .issued_by(&attestation_key, ca);
                vec![
                    (text("alg"), alg(CoseAlgorithm::Es256)),
                    (text("sig"), Value::Bytes(attestation_key.sign(&signed_data))),
                    (text("x5c"), x5c(&[cert.der()])),
                ]
            }
            AttestationKind::FidoU2f => {
                let attestation_key = TestKey::generate(CoseAlgorithm::Es256);
                let cert = CertificateBuilder::new("Vouchrs U2F Token")
                    .issued_by(&attestation_key, ca);
                let mut message = vec![0x00];
                message.extend_from_slice(&auth_data[..32]);
                message.extend_from_slice(client_data_hash);
                message.extend_from_slice(&self.credential_id);
                message.extend(self.key.sec1_point());
                vec![
                    (text("sig"), Value::Bytes(attestation_key.sign(&message))),
                    (text("x5c"), x5c(&[cert.der()])),
                ]
            }
            AttestationKind::Apple => {
                let nonce = crypto::sha256(&signed_data);
                let cert = CertificateBuilder::new("Vouchrs Apple Credential")
                    .extension(&OID_APPLE_NONCE, false, der::apple_nonce(&nonce))
                    .issued_by(&self.key, ca);
                vec![(text("x5c"), x5c(&[cert.der()]))]
            }
            AttestationKind::AndroidKey => {
                let cert = CertificateBuilder::new("Android Keystore Key")
                    .extension(
                        &OID_ANDROID_KEY_DESCRIPTION,
                        false,
                        der::key_description(
                            client_data_hash,
                            &KeyAuthorizations::default(),
                            &KeyAuthorizations::tee_generated(),
                        ),
                    )
                    .issued_by(&self.key, ca);
                vec![
                    (text("alg"), alg(self.key.alg())),
                    (text("sig"), Value::Bytes(self.key.sign(&signed_data))),
                    (text("x5c"), x5c(&[cert.der()])),
                ]
            }
            AttestationKind::AndroidSafetyNet => {
                let attestation_key = TestKey::generate(CoseAlgorithm::Es256);
                let cert =
                    CertificateBuilder::new("attest.android.com").issued_by(&attestation_key, ca);
                let response = safetynet_jws(&attestation_key, &cert.der(), &signed_data);
                vec![
                    (text("ver"), text("224711000")),
                    (text("response"), Value::Bytes(response.into_bytes())),
                ]
            }
            AttestationKind::Tpm => {
                let aik = TestKey::generate(CoseAlgorithm::Es256);
                let cert = CertificateBuilder::tpm_aik()
                    .aaguid(self.aaguid)
                    .issued_by(&aik, ca);
                let pub_area = tpm_pub_area(&self.key.cose_key());
                let cert_info = tpm_cert_info(&crypto::sha256(&signed_data), &pub_area);
                vec![
                    (text("ver"), text("2.0")),
                    (text("alg"), alg(CoseAlgorithm::Es256)),
                    (text("x5c"), x5c(&[cert.der()])),
                    (text("sig"), Value::Bytes(aik.sign(&cert_info))),
                    (text("certInfo"), Value::Bytes(cert_info)),
                    (text("pubArea"), Value::Bytes(pub_area)),
                ]
            }
        }
    }
}

/// `clientDataJSON` bytes as a browser serializes them
#[must_use]
pub fn client_data_json(ceremony: CeremonyType, challenge: &[u8], origin: &str) -> Vec<u8> {
    json!({
        "type": ceremony.as_str(),
        "challenge": crypto::base64url_encode(challenge),
        "origin": origin,
        "crossOrigin": false,
    })
    .to_string()
    .into_bytes()
}

/// Decode base64url `clientDataJSON`, edit it and re-encode it
///
/// # Panics
/// Panics if `encoded` is not base64url JSON
#[must_use]
pub fn rewrite_client_data(encoded: &str, edit: impl FnOnce(&mut serde_json::Value)) -> String {
    let bytes = crypto::base64url_decode(encoded, "clientDataJSON").expect("client data");
    let mut value: serde_json::Value = serde_json::from_slice(&bytes).expect("client data JSON");
    edit(&mut value);
    crypto::base64url_encode(value.to_string().as_bytes())
}

/// Replace one `attStmt` entry of a registration response
///
/// # Panics
/// Panics if the attestation object does not decode or lacks `key`
pub fn tamper_statement(
    response: &mut RegistrationResponse,
    key: &str,
    edit: impl FnOnce(&mut Value),
) {
    edit_attestation_object(response, |entries| {
        let stmt = entries
            .iter_mut()
            .find(|(k, _)| k.as_text() == Some("attStmt"))
            .and_then(|(_, v)| v.as_map_mut())
            .expect("attStmt");
        let (_, value) = stmt
            .iter_mut()
            .find(|(k, _)| k.as_text() == Some(key))
            .expect("statement entry");
        edit(value);
    });
}

/// Edit the raw authenticator data inside a registration response
///
/// # Panics
/// Panics if the attestation object does not decode
pub fn rewrite_registration_auth_data(
    response: &mut RegistrationResponse,
    edit: impl FnOnce(&mut Vec<u8>),
) {
    edit_attestation_object(response, |entries| {
        let auth_data = entries
            .iter_mut()
            .find(|(k, _)| k.as_text() == Some("authData"))
            .and_then(|(_, v)| v.as_bytes_mut())
            .expect("authData");
        edit(auth_data);
    });
}

fn edit_attestation_object(
    response: &mut RegistrationResponse,
    edit: impl FnOnce(&mut Vec<(Value, Value)>),
) {
    let bytes = crypto::base64url_decode(&response.response.attestation_object, "attestationObject")
        .expect("attestation object");
    let mut object = CborDecoder::default()
        .decode_exact(&bytes)
        .expect("attestation object CBOR");
    edit(object.as_map_mut().expect("attestation object map"));
    response.response.attestation_object =
        crypto::base64url_encode(&cbor::encode(&object).expect("encode"));
}

fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

fn alg(alg: CoseAlgorithm) -> Value {
    Value::Integer(alg.id().into())
}

fn x5c(certificates: &[Vec<u8>]) -> Value {
    Value::Array(certificates.iter().cloned().map(Value::Bytes).collect())
}

fn safetynet_jws(key: &TestKey, leaf_der: &[u8], signed_data: &[u8]) -> String {
    let header = json!({
        "alg": "ES256",
        "x5c": [STANDARD.encode(leaf_der)],
    });
    let payload = json!({
        "nonce": STANDARD.encode(crypto::sha256(signed_data)),
        "timestampMs": Utc::now().timestamp_millis(),
        "apkPackageName": "com.google.android.gms",
        "ctsProfileMatch": true,
        "basicIntegrity": true,
    });
    let signing_input = format!(
        "{}.{}",
        crypto::base64url_encode(header.to_string().as_bytes()),
        crypto::base64url_encode(payload.to_string().as_bytes())
    );
    let signature = key.sign_raw(signing_input.as_bytes());
    format!("{signing_input}.{}", crypto::base64url_encode(&signature))
}

fn tpm2b(out: &mut Vec<u8>, bytes: &[u8]) {
    let len = u16::try_from(bytes.len()).expect("TPM2B length");
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(bytes);
}

/// `TPMT_PUBLIC` for the credential key
fn tpm_pub_area(key: &CosePublicKey) -> Vec<u8> {
    let mut out = Vec::new();
    match &key.params {
        CoseKeyParams::Rsa { n, .. } => {
            out.extend_from_slice(&TPM_ALG_RSA.to_be_bytes());
            out.extend_from_slice(&TPM_ALG_SHA256.to_be_bytes());
            out.extend_from_slice(&0x0006_0472u32.to_be_bytes());
            tpm2b(&mut out, &[]);
            out.extend_from_slice(&TPM_ALG_NULL.to_be_bytes());
            out.extend_from_slice(&TPM_ALG_NULL.to_be_bytes());
            out.extend_from_slice(&2048u16.to_be_bytes());
            // 0 stands for the default exponent 65537
            out.extend_from_slice(&0u32.to_be_bytes());
            tpm2b(&mut out, n);
        }
        CoseKeyParams::Ec2 { curve, x, y } => {
            let curve_id: u16 = match curve {
                EcCurve::P256 => 0x0003,
                EcCurve::P384 => 0x0004,
                EcCurve::P521 => 0x0005,
            };
            out.extend_from_slice(&TPM_ALG_ECC.to_be_bytes());
            out.extend_from_slice(&TPM_ALG_SHA256.to_be_bytes());
            out.extend_from_slice(&0x0006_0472u32.to_be_bytes());
            tpm2b(&mut out, &[]);
            out.extend_from_slice(&TPM_ALG_NULL.to_be_bytes());
            out.extend_from_slice(&TPM_ALG_NULL.to_be_bytes());
            out.extend_from_slice(&curve_id.to_be_bytes());
            out.extend_from_slice(&TPM_ALG_NULL.to_be_bytes());
            tpm2b(&mut out, x);
            tpm2b(&mut out, y);
        }
        CoseKeyParams::Okp { .. } => panic!("TPM attestation needs an RSA or EC credential"),
    }
    out
}

/// `TPMS_ATTEST` certifying `pub_area` with `extra_data`
fn tpm_cert_info(extra_data: &[u8], pub_area: &[u8]) -> Vec<u8> {
    let mut name = TPM_ALG_SHA256.to_be_bytes().to_vec();
    name.extend(crypto::sha256(pub_area));

    let mut out = Vec::new();
    out.extend_from_slice(&TPM_GENERATED_VALUE.to_be_bytes());
    out.extend_from_slice(&TPM_ST_ATTEST_CERTIFY.to_be_bytes());
    tpm2b(&mut out, &[]);
    tpm2b(&mut out, extra_data);
    out.extend_from_slice(&[0; 17]);
    out.extend_from_slice(&[0; 8]);
    tpm2b(&mut out, &name);
    tpm2b(&mut out, &name);
    out
}
