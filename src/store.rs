//! Persistence collaborator for authenticator records and pending challenges
//!
//! Verification never touches storage. The caller looks up the
//! [`Authenticator`] before verifying and writes the new counter afterwards;
//! [`PasskeyStore::update_counter`] is where that read-compare-write must be
//! serialised per credential.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use log::{debug, warn};

use crate::authentication::ZeroCounterPolicy;
use crate::error::WebAuthnError;
use crate::types::Authenticator;

/// An authenticator record together with the user it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCredential {
    pub user_handle: Vec<u8>,
    pub authenticator: Authenticator,
}

/// Storage for passkeys and outstanding ceremony challenges
pub trait PasskeyStore: Send + Sync {
    /// Persist a newly registered authenticator
    ///
    /// # Errors
    /// Returns an error if the credential ID is already registered or the
    /// backend fails
    fn save_authenticator(
        &self,
        user_handle: &[u8],
        authenticator: Authenticator,
    ) -> Result<(), WebAuthnError>;

    /// Look up a credential by ID
    ///
    /// # Errors
    /// Returns an error if the backend fails
    fn load_authenticator(
        &self,
        credential_id: &[u8],
    ) -> Result<Option<StoredCredential>, WebAuthnError>;

    /// Every authenticator registered to a user, for `excludeCredentials` and
    /// `allowCredentials`
    ///
    /// # Errors
    /// Returns an error if the backend fails
    fn authenticators_for_user(
        &self,
        user_handle: &[u8],
    ) -> Result<Vec<Authenticator>, WebAuthnError>;

    /// Store the counter reported by a verified assertion
    ///
    /// Implementations should apply the [`ZeroCounterPolicy`] used during
    /// verification, so that a `0 -> 0` update is refused under
    /// [`ZeroCounterPolicy::Enforce`].
    ///
    /// # Errors
    /// Returns `PossibleCloneDetected` if the stored counter has meanwhile
    /// reached `new_counter`, or an error if the credential is unknown
    fn update_counter(&self, credential_id: &[u8], new_counter: u32) -> Result<(), WebAuthnError>;

    /// Remember the challenge issued for a ceremony
    ///
    /// # Errors
    /// Returns an error if the backend fails
    fn save_challenge(&self, ceremony_id: &str, challenge: Vec<u8>) -> Result<(), WebAuthnError>;

    /// Remove and return a pending challenge so it can be used only once
    ///
    /// # Errors
    /// Returns an error if the backend fails
    fn get_and_clear_challenge(&self, ceremony_id: &str) -> Result<Option<Vec<u8>>, WebAuthnError>;
}

/// Process-local [`PasskeyStore`]
///
/// Counter updates follow the store's [`ZeroCounterPolicy`], `Exempt` unless
/// built with [`InMemoryPasskeyStore::with_zero_counter_policy`].
#[derive(Debug, Default)]
pub struct InMemoryPasskeyStore {
    credentials: Mutex<HashMap<Vec<u8>, StoredCredential>>,
    challenges: Mutex<HashMap<String, Vec<u8>>>,
    zero_counter_policy: ZeroCounterPolicy,
}

impl InMemoryPasskeyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose counter updates apply `policy`
    #[must_use]
    pub fn with_zero_counter_policy(policy: ZeroCounterPolicy) -> Self {
        Self {
            zero_counter_policy: policy,
            ..Self::default()
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, WebAuthnError> {
    mutex
        .lock()
        .map_err(|_| WebAuthnError::ConfigurationError("Passkey store lock poisoned".into()))
}

impl PasskeyStore for InMemoryPasskeyStore {
    fn save_authenticator(
        &self,
        user_handle: &[u8],
        authenticator: Authenticator,
    ) -> Result<(), WebAuthnError> {
        let mut credentials = lock(&self.credentials)?;
        if credentials.contains_key(&authenticator.credential_id) {
            return Err(WebAuthnError::CredentialMismatch(
                "credential ID is already registered".into(),
            ));
        }
        debug!(
            "Storing authenticator with {}-byte credential ID",
            authenticator.credential_id.len()
        );
        credentials.insert(
            authenticator.credential_id.clone(),
            StoredCredential {
                user_handle: user_handle.to_vec(),
                authenticator,
            },
        );
        Ok(())
    }

    fn load_authenticator(
        &self,
        credential_id: &[u8],
    ) -> Result<Option<StoredCredential>, WebAuthnError> {
        Ok(lock(&self.credentials)?.get(credential_id).cloned())
    }

    fn authenticators_for_user(
        &self,
        user_handle: &[u8],
    ) -> Result<Vec<Authenticator>, WebAuthnError> {
        Ok(lock(&self.credentials)?
            .values()
            .filter(|stored| stored.user_handle == user_handle)
            .map(|stored| stored.authenticator.clone())
            .collect())
    }

    fn update_counter(&self, credential_id: &[u8], new_counter: u32) -> Result<(), WebAuthnError> {
        let mut credentials = lock(&self.credentials)?;
        let stored = credentials.get_mut(credential_id).ok_or_else(|| {
            WebAuthnError::CredentialMismatch("credential is not registered".into())
        })?;

        let current = stored.authenticator.counter;
        if let Err(err) = self.zero_counter_policy.check(current, new_counter) {
            warn!("Refusing counter update from {current} to {new_counter}");
            return Err(err);
        }
        stored.authenticator.counter = new_counter;
        Ok(())
    }

    fn save_challenge(&self, ceremony_id: &str, challenge: Vec<u8>) -> Result<(), WebAuthnError> {
        lock(&self.challenges)?.insert(ceremony_id.to_string(), challenge);
        Ok(())
    }

    fn get_and_clear_challenge(&self, ceremony_id: &str) -> Result<Option<Vec<u8>>, WebAuthnError> {
        Ok(lock(&self.challenges)?.remove(ceremony_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CredentialDeviceType;
    use std::sync::Arc;
    use std::thread;

    fn authenticator(id: u8, counter: u32) -> Authenticator {
        Authenticator {
            credential_id: vec![id; 16],
            credential_public_key: vec![0xa1],
            counter,
            credential_device_type: CredentialDeviceType::SingleDevice,
            credential_backed_up: false,
            transports: Vec::new(),
        }
    }

    #[test]
    fn test_save_and_load() {
        let store = InMemoryPasskeyStore::new();
        store.save_authenticator(b"alice", authenticator(1, 0)).expect("save");
        store.save_authenticator(b"alice", authenticator(2, 0)).expect("save");
        store.save_authenticator(b"bob", authenticator(3, 0)).expect("save");

        let stored = store.load_authenticator(&[1; 16]).expect("load").expect("present");
        assert_eq!(stored.user_handle, b"alice");
        assert!(store.load_authenticator(&[9; 16]).expect("load").is_none());
        assert_eq!(store.authenticators_for_user(b"alice").expect("list").len(), 2);

        assert!(store.save_authenticator(b"bob", authenticator(1, 0)).is_err());
    }

    #[test]
    fn test_counter_never_moves_backwards() {
        let store = InMemoryPasskeyStore::new();
        store.save_authenticator(b"alice", authenticator(1, 5)).expect("save");

        assert!(matches!(
            store.update_counter(&[1; 16], 5),
            Err(WebAuthnError::PossibleCloneDetected(_))
        ));
        assert!(store.update_counter(&[1; 16], 3).is_err());
        store.update_counter(&[1; 16], 6).expect("increase");
        let stored = store.load_authenticator(&[1; 16]).expect("load").expect("present");
        assert_eq!(stored.authenticator.counter, 6);

        assert!(matches!(
            store.update_counter(&[7; 16], 1),
            Err(WebAuthnError::CredentialMismatch(_))
        ));
    }

    #[test]
    fn test_zero_counter_update_allowed() {
        let store = InMemoryPasskeyStore::new();
        store.save_authenticator(b"alice", authenticator(1, 0)).expect("save");
        store.update_counter(&[1; 16], 0).expect("zero stays zero");
        store.update_counter(&[1; 16], 0).expect("zero stays zero");
    }

    #[test]
    fn test_enforced_zero_counter_update_refused() {
        let store = InMemoryPasskeyStore::with_zero_counter_policy(ZeroCounterPolicy::Enforce);
        store.save_authenticator(b"alice", authenticator(1, 0)).expect("save");
        assert!(matches!(
            store.update_counter(&[1; 16], 0),
            Err(WebAuthnError::PossibleCloneDetected(_))
        ));
        store.update_counter(&[1; 16], 1).expect("increase");
        assert!(store.update_counter(&[1; 16], 1).is_err());
    }

    #[test]
    fn test_concurrent_updates_accept_each_value_once() {
        let store = Arc::new(InMemoryPasskeyStore::new());
        store.save_authenticator(b"alice", authenticator(1, 1)).expect("save");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || store.update_counter(&[1; 16], 2).is_ok())
            })
            .collect();
        let accepted = handles
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .filter(|ok| *ok)
            .count();
        assert_eq!(accepted, 1);
    }

    #[test]
    fn test_challenge_is_single_use() {
        let store = InMemoryPasskeyStore::new();
        store.save_challenge("ceremony-1", vec![7; 32]).expect("save");
        assert_eq!(
            store.get_and_clear_challenge("ceremony-1").expect("get"),
            Some(vec![7; 32])
        );
        assert_eq!(store.get_and_clear_challenge("ceremony-1").expect("get"), None);
    }
}
