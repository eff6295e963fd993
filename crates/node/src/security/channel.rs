//! Secure channel: group key lifecycle and D2D message encryption.

use protocol::crypto::{open, seal, wrap_group_key};
use protocol::{GroupKey, PairingCode};
use tracing::{debug, info};

use super::credentials::{remove_wrapped_key, save_wrapped_key};
use super::{SecurityError, SecurityModule};

impl SecurityModule {
    fn require_login(&self) -> Result<(), SecurityError> {
        if self.session.is_logged_in() {
            Ok(())
        } else {
            Err(SecurityError::NotLoggedIn)
        }
    }

    fn require_group_key(&self) -> Result<&GroupKey, SecurityError> {
        self.require_login()?;
        self.session.group_key().ok_or(SecurityError::NotPaired)
    }

    /// Wrap `key` under the session wrapping key, persist it, then hold it.
    fn install_group_key(&mut self, key: GroupKey) -> Result<(), SecurityError> {
        let wrapping = self
            .session
            .wrapping_key()
            .ok_or(SecurityError::NotLoggedIn)?;
        let blob = wrap_group_key(wrapping, &key, self.rng.as_mut())?;
        save_wrapped_key(self.store.as_mut(), &blob)?;
        self.session.set_group_key(key);
        Ok(())
    }

    /// Draw a new group key, persist it and return its pairing code.
    pub fn generate_key(&mut self) -> Result<PairingCode, SecurityError> {
        self.require_login()?;
        let key = GroupKey::generate(self.rng.as_mut());
        let code = PairingCode::encode(&key);
        self.install_group_key(key)?;
        info!("Generated new group key");
        Ok(code)
    }

    /// Adopt a group key transcribed from a peer.
    ///
    /// A malformed code fails before any state is touched.
    pub fn import_key(&mut self, code: &[u8]) -> Result<(), SecurityError> {
        self.require_login()?;
        let code = PairingCode::parse(code)?;
        self.install_group_key(code.to_group_key())?;
        info!("Imported group key");
        Ok(())
    }

    /// Pairing code for the group key already held.
    pub fn export_existing_key(&self) -> Result<PairingCode, SecurityError> {
        Ok(PairingCode::encode(self.require_group_key()?))
    }

    /// Seal `plaintext` for peers sharing the group key.
    pub fn encrypt_message(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, SecurityError> {
        self.require_login()?;
        let key = self.session.group_key().ok_or(SecurityError::NotPaired)?;
        Ok(seal(key, plaintext, self.rng.as_mut())?)
    }

    /// Open a message sealed by a peer. Fails closed on any mismatch.
    pub fn decrypt_message(&self, framed: &[u8]) -> Result<Vec<u8>, SecurityError> {
        let key = self.require_group_key()?;
        Ok(open(key, framed)?)
    }

    /// Forget the group key, in RAM and in the store.
    pub fn reset_pairing(&mut self) -> Result<(), SecurityError> {
        self.require_login()?;
        remove_wrapped_key(self.store.as_mut())?;
        self.session.clear_group_key();
        debug!("Pairing reset");
        Ok(())
    }
}
