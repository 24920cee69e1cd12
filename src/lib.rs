#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Relying-party side of `WebAuthn`: option generation and verification of
//! registration and authentication responses, including every standard
//! attestation statement format.

/// Version of the vouchrs-webauthn library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod attestation;
pub mod authentication;
pub mod authenticator_data;
pub mod cbor;
mod ceremony;
pub mod client_data;
pub mod cose;
pub mod crypto;
pub mod error;
pub mod options;
pub mod registration;
pub mod service;
pub mod settings;
pub mod signature;
pub mod store;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Re-export commonly used items
pub use attestation::{
    AttestationFormat, AttestationPolicy, AttestationType, TrustLevel, TrustStore,
};
pub use authentication::{verify_authentication_response, ExpectedAuthentication, ZeroCounterPolicy};
pub use cbor::{CborDecoder, DecoderConfig};
pub use cose::{CoseAlgorithm, CosePublicKey};
pub use error::{ErrorKind, WebAuthnError};
pub use registration::{verify_registration_response, ExpectedRegistration};
pub use service::{AuthenticationState, RegistrationState, WebAuthnService};
pub use settings::WebAuthnSettings;
pub use store::{InMemoryPasskeyStore, PasskeyStore, StoredCredential};
pub use types::{
    AuthenticationResponse, Authenticator, RegistrationResponse, RelyingPartyConfig,
    VerifiedAuthentication, VerifiedRegistration,
};
