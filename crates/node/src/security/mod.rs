//! Credential store, session manager and secure channel.
//!
//! [`SecurityModule`] is the single owner of every secret on the node: the
//! persisted credential record, the RAM-only [`Session`], and the
//! key-value store they live in. The dispatcher holds it behind one lock, so
//! read-then-write sequences such as a password change never interleave with
//! a concurrent login.

mod channel;
pub mod credentials;
pub mod session;

use protocol::crypto::{
    derive_wrapping_key, unwrap_group_key, wrap_group_key, DEFAULT_PBKDF2_ITERATIONS,
};
use protocol::{GroupKey, ProtocolError};
use rand::{CryptoRng, RngCore};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::store::{KeyValueStore, KEY_DEVICE_NAME};
use credentials::{load_wrapped_key, CredentialRecord};
pub use session::Session;

/// Errors raised by credential, session and secure-channel operations.
#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("not logged in")]
    NotLoggedIn,

    #[error("node is not paired")]
    NotPaired,

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("credential store is corrupt: {0}")]
    CorruptStore(String),

    #[error("invalid password: {0}")]
    InvalidPassword(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Source of cryptographically secure randomness.
pub trait SecureRng: RngCore + CryptoRng + Send {}

impl<T: RngCore + CryptoRng + Send> SecureRng for T {}

/// Tunables for [`SecurityModule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityOptions {
    /// PBKDF2 iteration count for the wrapping key.
    pub pbkdf2_iterations: u32,
    /// Longest password accepted by `provision` and `change_password`.
    pub max_password_len: usize,
}

impl Default for SecurityOptions {
    fn default() -> Self {
        Self {
            pbkdf2_iterations: DEFAULT_PBKDF2_ITERATIONS,
            max_password_len: 64,
        }
    }
}

/// Owner of the credential record, the session and the secure channel.
pub struct SecurityModule {
    store: Box<dyn KeyValueStore>,
    rng: Box<dyn SecureRng>,
    session: Session,
    options: SecurityOptions,
}

impl SecurityModule {
    /// Create a module over `store`. Starts logged out; call [`init`](Self::init)
    /// before serving requests.
    pub fn new(
        store: Box<dyn KeyValueStore>,
        rng: Box<dyn SecureRng>,
        options: SecurityOptions,
    ) -> Self {
        Self {
            store,
            rng,
            session: Session::new(),
            options,
        }
    }

    /// Provision `default_password` on first boot. Always leaves the node
    /// logged out.
    pub fn init(&mut self, default_password: &[u8]) -> Result<(), SecurityError> {
        self.session.wipe();
        if CredentialRecord::load(self.store.as_ref())?.is_none() {
            info!(
                namespace = self.store.namespace(),
                "No credentials found, provisioning default password"
            );
            self.provision(default_password)?;
        }
        Ok(())
    }

    /// Tunables in effect.
    pub fn options(&self) -> SecurityOptions {
        self.options
    }

    fn check_password(&self, password: &[u8]) -> Result<(), SecurityError> {
        if password.is_empty() {
            return Err(SecurityError::InvalidPassword("password is empty".to_string()));
        }
        if password.len() > self.options.max_password_len {
            return Err(SecurityError::InvalidPassword(format!(
                "password is {} bytes, maximum is {}",
                password.len(),
                self.options.max_password_len
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Credential store
    // ========================================================================

    /// Set a new password without authenticating.
    ///
    /// The previously wrapped group key can no longer be recovered, so it is
    /// deleted and the session is wiped.
    pub fn provision(&mut self, password: &[u8]) -> Result<(), SecurityError> {
        self.check_password(password)?;

        let record =
            CredentialRecord::create(password, self.options.pbkdf2_iterations, self.rng.as_mut());
        self.session.wipe();
        record.save(self.store.as_mut(), None)?;

        info!("Password provisioned, pairing cleared");
        Ok(())
    }

    /// Whether a wrapped group key is persisted. Independent of login state.
    pub fn is_paired(&self) -> bool {
        match load_wrapped_key(self.store.as_ref()) {
            Ok(blob) => blob.is_some(),
            Err(e) => {
                warn!(error = %e, "Failed to read pairing state");
                false
            }
        }
    }

    // ========================================================================
    // Session manager
    // ========================================================================

    /// Whether the session holds the wrapping key.
    pub fn is_logged_in(&self) -> bool {
        self.session.is_logged_in()
    }

    /// Authenticate and unlock the group key.
    ///
    /// Any failure leaves the node logged out with no secrets in RAM.
    pub fn login(&mut self, password: &[u8]) -> Result<(), SecurityError> {
        let result = self.try_login(password);
        if let Err(e) = &result {
            self.session.wipe();
            warn!(error = %e, "Login failed");
        } else {
            info!(paired = self.session.group_key().is_some(), "Login succeeded");
        }
        result
    }

    fn try_login(&mut self, password: &[u8]) -> Result<(), SecurityError> {
        if password.len() > self.options.max_password_len {
            return Err(SecurityError::AuthenticationFailed);
        }
        let record = CredentialRecord::load(self.store.as_ref())?
            .ok_or(SecurityError::AuthenticationFailed)?;
        if !record.verify(password) {
            return Err(SecurityError::AuthenticationFailed);
        }

        if record.iterations != self.options.pbkdf2_iterations {
            debug!(
                stored = record.iterations,
                configured = self.options.pbkdf2_iterations,
                "Using stored KDF cost until the password is next set"
            );
        }
        let wrapping = derive_wrapping_key(password, &record.salt, record.iterations)?;
        let group = match load_wrapped_key(self.store.as_ref())? {
            Some(blob) => Some(unwrap_group_key(&wrapping, &blob).map_err(|_| {
                SecurityError::CorruptStore("wrapped group key failed authentication".to_string())
            })?),
            None => None,
        };

        self.session.establish(wrapping, group);
        Ok(())
    }

    /// Wipe session secrets. Idempotent.
    pub fn logout(&mut self) {
        if self.session.is_logged_in() {
            debug!("Logging out");
        }
        self.session.wipe();
    }

    /// Replace the password, re-wrapping the current group key under it.
    ///
    /// Nothing is persisted unless `old` authenticates. Ends logged out.
    pub fn change_password(&mut self, old: &[u8], new: &[u8]) -> Result<(), SecurityError> {
        self.check_password(new)?;
        self.login(old)?;

        let group = match self.session.group_key() {
            Some(key) => key.clone(),
            None => {
                debug!("No group key held, change degenerates to provision");
                return self.provision(new);
            }
        };

        let result = self.rewrap(new, &group);
        drop(group);
        self.session.wipe();
        match &result {
            Ok(()) => info!("Password changed, group key re-wrapped"),
            Err(e) => warn!(error = %e, "Password change failed"),
        }
        result
    }

    fn rewrap(&mut self, new: &[u8], group: &GroupKey) -> Result<(), SecurityError> {
        let iterations = self.options.pbkdf2_iterations;
        let record = CredentialRecord::create(new, iterations, self.rng.as_mut());
        let wrapping = derive_wrapping_key(new, &record.salt, iterations)?;
        let blob = wrap_group_key(&wrapping, group, self.rng.as_mut())?;

        record.save(self.store.as_mut(), Some(blob.as_slice()))?;
        Ok(())
    }

    // ========================================================================
    // Node settings
    // ========================================================================

    /// Persist the device name.
    pub fn set_device_name(&mut self, name: &[u8]) -> Result<(), SecurityError> {
        self.store.put(KEY_DEVICE_NAME, name)?;
        Ok(())
    }

    /// The persisted device name, if any.
    pub fn device_name(&self) -> Result<Option<Vec<u8>>, SecurityError> {
        Ok(self.store.get(KEY_DEVICE_NAME)?)
    }

    /// Wipe every secret from RAM.
    pub fn shutdown(&mut self) {
        self.session.wipe();
        debug!("Security module shut down");
    }
}

impl Drop for SecurityModule {
    fn drop(&mut self) {
        self.session.wipe();
    }
}

impl std::fmt::Debug for SecurityModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityModule")
            .field("namespace", &self.store.namespace())
            .field("session", &self.session)
            .field("options", &self.options)
            .finish()
    }
}
