//! RAM-only login session.

use protocol::{GroupKey, WrappingKey};
use zeroize::Zeroize;

/// Secrets held while a user is logged in.
///
/// The wrapping key doubles as the logged-in flag: the session is logged in
/// exactly when it holds one. A group key can only be installed while logged
/// in, so neither secret survives a [`Session::wipe`].
#[derive(Default)]
pub struct Session {
    wrapping_key: Option<WrappingKey>,
    group_key: Option<GroupKey>,
}

impl Session {
    /// An empty, logged-out session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the secrets produced by a successful login.
    pub fn establish(&mut self, wrapping_key: WrappingKey, group_key: Option<GroupKey>) {
        self.wipe();
        self.wrapping_key = Some(wrapping_key);
        self.group_key = group_key;
    }

    /// Whether a wrapping key is held.
    pub fn is_logged_in(&self) -> bool {
        self.wrapping_key.is_some()
    }

    /// The wrapping key, if logged in.
    pub fn wrapping_key(&self) -> Option<&WrappingKey> {
        self.wrapping_key.as_ref()
    }

    /// The plaintext group key, if logged in and paired.
    pub fn group_key(&self) -> Option<&GroupKey> {
        self.group_key.as_ref()
    }

    /// Replace the in-RAM group key. Ignored when logged out.
    pub fn set_group_key(&mut self, key: GroupKey) -> bool {
        if !self.is_logged_in() {
            return false;
        }
        self.clear_group_key();
        self.group_key = Some(key);
        true
    }

    /// Zero and drop the group key only.
    pub fn clear_group_key(&mut self) {
        if let Some(mut key) = self.group_key.take() {
            key.zeroize();
        }
    }

    /// Zero and drop every secret. Idempotent.
    pub fn wipe(&mut self) {
        self.clear_group_key();
        if let Some(mut key) = self.wrapping_key.take() {
            key.zeroize();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.wipe();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("logged_in", &self.is_logged_in())
            .field("paired", &self.group_key.is_some())
            .field("secrets", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::crypto::derive_wrapping_key;
    use protocol::Salt;

    fn wrapping() -> WrappingKey {
        derive_wrapping_key(b"pw", &Salt([0u8; 16]), 1).unwrap()
    }

    #[test]
    fn test_new_session_is_logged_out() {
        let session = Session::new();
        assert!(!session.is_logged_in());
        assert!(session.wrapping_key().is_none());
        assert!(session.group_key().is_none());
    }

    #[test]
    fn test_establish_and_wipe() {
        let mut session = Session::new();
        session.establish(wrapping(), Some(GroupKey::from_bytes([1u8; 16])));
        assert!(session.is_logged_in());
        assert!(session.group_key().is_some());

        session.wipe();
        assert!(!session.is_logged_in());
        assert!(session.group_key().is_none());

        // Idempotent
        session.wipe();
        assert!(!session.is_logged_in());
    }

    #[test]
    fn test_group_key_requires_login() {
        let mut session = Session::new();
        assert!(!session.set_group_key(GroupKey::from_bytes([2u8; 16])));
        assert!(session.group_key().is_none());

        session.establish(wrapping(), None);
        assert!(session.set_group_key(GroupKey::from_bytes([2u8; 16])));
        assert_eq!(session.group_key().unwrap().as_bytes(), &[2u8; 16]);

        session.clear_group_key();
        assert!(session.is_logged_in());
        assert!(session.group_key().is_none());
    }

    #[test]
    fn test_debug_redacts() {
        let mut session = Session::new();
        session.establish(wrapping(), Some(GroupKey::from_bytes([0x5a; 16])));
        let debug = format!("{:?}", session);
        assert!(debug.contains("logged_in: true"));
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("90"));
    }
}
