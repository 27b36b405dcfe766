//! Credential refresh for request dispatch.
//!
//! [`AuthContext`] is a cheap façade over the shared [`State`] and an
//! optional [`DeviceAssertions`] provider. Request code builds one per call
//! site to refresh user or device credentials and to pick the store id.
//!
//! ## Refresh semantics
//! Callers usually hold a copy of a record read some time ago. A refresh
//! re-reads the record under the lock and overwrites only the field being
//! refreshed, so concurrent updates to the other fields survive. Two
//! refreshes of the same field race as last-writer-wins.

use super::{device, set_device, update_user, user, AuthError, DeviceState, UserState};
use crate::asserts::{AssertionError, DeviceAssertions};
use crate::config::{AuthConfig, DEFAULT_STORE_ID_ENV};
use crate::state::State;

/// Credential refresh and store selection over a shared [`State`].
pub struct AuthContext<'a> {
    state: &'a State,
    assertions: Option<&'a dyn DeviceAssertions>,
    store_id_env: String,
}

impl<'a> AuthContext<'a> {
    /// Context reading the store id override from `UBUNTU_STORE_ID`.
    ///
    /// `assertions` is `None` on devices that cannot prove an identity;
    /// session requests then fail with [`AuthError::NoSerial`].
    pub fn new(state: &'a State, assertions: Option<&'a dyn DeviceAssertions>) -> Self {
        Self {
            state,
            assertions,
            store_id_env: DEFAULT_STORE_ID_ENV.to_string(),
        }
    }

    /// Like [`AuthContext::new`], honouring the configured override variable.
    pub fn with_config(
        state: &'a State,
        assertions: Option<&'a dyn DeviceAssertions>,
        config: &AuthConfig,
    ) -> Self {
        Self {
            store_id_env: config.store_id_env.clone(),
            ..Self::new(state, assertions)
        }
    }

    /// The current device record (zero value when never stored).
    pub fn device(&self) -> Result<DeviceState, AuthError> {
        device(&self.state.lock())
    }

    /// Replace the store-side discharges of `user`, keeping every other
    /// field as currently stored.
    pub fn update_user_auth(
        &self,
        user_ref: &UserState,
        new_discharges: &[String],
    ) -> Result<UserState, AuthError> {
        let mut st = self.state.lock();

        let mut cur = user(&st, user_ref.id)?;
        if cur.macaroon != user_ref.macaroon || cur.store_macaroon != user_ref.store_macaroon {
            tracing::debug!(user_id = cur.id, "User credentials changed since last read");
        }
        cur.store_discharges = new_discharges.to_vec();
        update_user(&mut st, &cur)?;
        st.checkpoint()?;

        tracing::debug!(user_id = cur.id, discharges = new_discharges.len(), "Store discharges refreshed");
        Ok(cur)
    }

    /// Replace the device session macaroon, keeping every other field as
    /// currently stored.
    pub fn update_device_auth(
        &self,
        device_ref: &DeviceState,
        session_macaroon: &str,
    ) -> Result<DeviceState, AuthError> {
        let mut st = self.state.lock();

        let mut cur = device(&st)?;
        if cur.brand != device_ref.brand || cur.model != device_ref.model || cur.key_id != device_ref.key_id {
            tracing::debug!("Device record changed since last read");
        }
        cur.session_macaroon = session_macaroon.to_string();
        set_device(&mut st, &cur)?;
        st.checkpoint()?;

        tracing::info!(brand = %cur.brand, model = %cur.model, "Device session refreshed");
        Ok(cur)
    }

    /// Store id to address requests to.
    ///
    /// Precedence: the override environment variable when set and non-empty,
    /// then the store named by the device's model assertion, then `fallback`.
    pub fn store_id(&self, fallback: &str) -> Result<String, AuthError> {
        if let Some(forced) = std::env::var(&self.store_id_env).ok().filter(|v| !v.is_empty()) {
            return Ok(forced);
        }

        if let Some(assertions) = self.assertions {
            match assertions.model() {
                Ok(model) if !model.store().is_empty() => return Ok(model.store().to_string()),
                Ok(_) | Err(AssertionError::NoState) => {}
                Err(e) => return Err(AuthError::Assertions(e)),
            }
        }

        Ok(fallback.to_string())
    }

    /// Encoded session request bound to `nonce`, and the encoded serial it
    /// was made for. Fails with [`AuthError::NoSerial`] until the device is
    /// registered.
    pub fn device_session_request(&self, nonce: &str) -> Result<(Vec<u8>, Vec<u8>), AuthError> {
        let assertions = self.assertions.ok_or(AuthError::NoSerial)?;
        let (request, serial) = assertions.device_session_request(nonce)?;
        Ok((request.encode(), serial.encode()))
    }
}
