//! Testing utilities for vouchrs-webauthn
//!
//! Compiled for unit tests and, behind the `testing` feature, for the
//! integration tests and downstream crates that want to drive real ceremonies
//! without a browser.
//!
//! ## Organization
//!
//! - [`authenticator`] - Software authenticator and response tampering helpers
//! - [`certificates`] - X.509 certificate and CA builders
//! - [`keys`] - Credential keys for every supported COSE algorithm
//! - [`der`] - Minimal DER writer for certificate extensions
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vouchrs_webauthn::testing::authenticator::{AttestationKind, SoftAuthenticator};
//! use vouchrs_webauthn::testing::constants::{ORIGIN, RP_ID};
//!
//! let authenticator = SoftAuthenticator::new(CoseAlgorithm::Es256);
//! let response = authenticator.make_credential(RP_ID, ORIGIN, &challenge, AttestationKind::PackedSelf);
//! ```

pub mod authenticator;
pub mod certificates;
pub mod der;
pub mod keys;

use uuid::Uuid;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::attestation::{AttestationFormat, TrustLevel, TrustStore};

/// Common test constants
pub mod constants {
    use uuid::Uuid;

    /// Relying party ID used across the tests
    pub const RP_ID: &str = "example.com";

    pub const RP_NAME: &str = "Example Corp";

    /// Origin matching [`RP_ID`]
    pub const ORIGIN: &str = "https://example.com";

    /// Default test user name
    pub const TEST_USER_NAME: &str = "alice@example.com";

    pub const TEST_DISPLAY_NAME: &str = "Alice";

    /// AAGUID reported by the software authenticator
    pub const TEST_AAGUID: Uuid = Uuid::from_u128(0x6f1c_2d3e_4b5a_4c69_8d7e_0f1a_2b3c_4d5e);
}

/// Initialize `env_logger` once for tests; repeated calls are ignored
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Trust store answering every chain with the same verdict
#[derive(Debug, Clone, Copy)]
pub struct StaticTrustStore(pub TrustLevel);

impl TrustStore for StaticTrustStore {
    fn resolve_chain(&self, _: AttestationFormat, _: Uuid, _: &[Vec<u8>]) -> TrustLevel {
        self.0
    }
}

/// Trust store accepting chains whose last certificate is, or is signed by,
/// one of its roots
#[derive(Debug, Clone, Default)]
pub struct RootTrustStore {
    roots: Vec<Vec<u8>>,
}

impl RootTrustStore {
    #[must_use]
    pub fn new(roots: Vec<Vec<u8>>) -> Self {
        Self { roots }
    }
}

impl TrustStore for RootTrustStore {
    fn resolve_chain(
        &self,
        _format: AttestationFormat,
        _aaguid: Uuid,
        certificates: &[Vec<u8>],
    ) -> TrustLevel {
        let Some(last) = certificates.last() else {
            return TrustLevel::Untrusted;
        };
        if self.roots.iter().any(|root| root == last) {
            return TrustLevel::Basic;
        }
        let Ok((_, last)) = X509Certificate::from_der(last) else {
            return TrustLevel::Untrusted;
        };
        let signed_by_root = self.roots.iter().any(|root| {
            X509Certificate::from_der(root)
                .is_ok_and(|(_, root)| last.verify_signature(Some(root.public_key())).is_ok())
        });
        if signed_by_root {
            TrustLevel::Basic
        } else {
            TrustLevel::Untrusted
        }
    }
}
