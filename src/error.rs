//! `WebAuthn` error types
//!
//! Every verification entry point fails with exactly one of these kinds. The
//! attached message names the offending field so callers can log it; it is
//! not meant to be shown to end users.

use thiserror::Error;

/// `WebAuthn` errors that can occur during verification and option generation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WebAuthnError {
    /// Binary or JSON input does not parse
    #[error("Malformed encoding: {0}")]
    MalformedEncoding(String),

    /// Cryptographic algorithm or key type outside the supported set
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Client data type, challenge or origin mismatch
    #[error("Client data invalid: {0}")]
    ClientDataInvalid(String),

    /// RP ID hash in authenticator data matches none of the expected RP IDs
    #[error("RP ID mismatch: {0}")]
    RpIdMismatch(String),

    /// User presence flag was not set
    #[error("User presence required: {0}")]
    UserPresenceRequired(String),

    /// Policy demanded user verification and the flag was not set
    #[error("User verification required: {0}")]
    UserVerificationRequired(String),

    /// Assertion credential ID differs from the stored authenticator
    #[error("Credential mismatch: {0}")]
    CredentialMismatch(String),

    /// Attestation statement failed verification
    #[error("Attestation invalid: {0}")]
    AttestationInvalid(String),

    /// Assertion signature failed verification
    #[error("Signature invalid: {0}")]
    SignatureInvalid(String),

    /// Signature counter did not increase
    #[error("Possible clone detected: {0}")]
    PossibleCloneDetected(String),

    /// Relying party or ceremony configuration is invalid
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

/// Fieldless mirror of [`WebAuthnError`] for logging and metrics labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MalformedEncoding,
    UnsupportedAlgorithm,
    ClientDataInvalid,
    RpIdMismatch,
    UserPresenceRequired,
    UserVerificationRequired,
    CredentialMismatch,
    AttestationInvalid,
    SignatureInvalid,
    PossibleCloneDetected,
    ConfigurationError,
}

impl WebAuthnError {
    /// The kind of this error without its context message
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedEncoding(_) => ErrorKind::MalformedEncoding,
            Self::UnsupportedAlgorithm(_) => ErrorKind::UnsupportedAlgorithm,
            Self::ClientDataInvalid(_) => ErrorKind::ClientDataInvalid,
            Self::RpIdMismatch(_) => ErrorKind::RpIdMismatch,
            Self::UserPresenceRequired(_) => ErrorKind::UserPresenceRequired,
            Self::UserVerificationRequired(_) => ErrorKind::UserVerificationRequired,
            Self::CredentialMismatch(_) => ErrorKind::CredentialMismatch,
            Self::AttestationInvalid(_) => ErrorKind::AttestationInvalid,
            Self::SignatureInvalid(_) => ErrorKind::SignatureInvalid,
            Self::PossibleCloneDetected(_) => ErrorKind::PossibleCloneDetected,
            Self::ConfigurationError(_) => ErrorKind::ConfigurationError,
        }
    }

    /// Whether operators may want to flag the account rather than just deny
    /// the request
    #[must_use]
    pub fn is_account_flag(&self) -> bool {
        matches!(
            self,
            Self::PossibleCloneDetected(_) | Self::AttestationInvalid(_)
        )
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedEncoding(msg.into())
    }

    pub(crate) fn attestation(msg: impl Into<String>) -> Self {
        Self::AttestationInvalid(msg.into())
    }
}
