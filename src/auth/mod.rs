//! Local identity store and session-credential reconciliation.
//!
//! Provides:
//! - User records holding the login macaroon, its discharges and the
//!   credential pair currently accepted by the store
//! - The singleton device record (brand, model, key id, session macaroon)
//! - [`AuthContext`], which refreshes credentials without clobbering
//!   concurrent updates to other fields and resolves the store id
//!
//! ## Design Decisions
//! - Every store operation takes a [`StateGuard`], so holding the state lock
//!   is a precondition the compiler checks rather than a convention.
//! - User ids come from an explicit `last-id` counter and are never reissued,
//!   even when the highest id is removed.
//! - Discharges are kept in sorted order so credential checks can compare
//!   them element for element.

pub mod context;
pub mod device;
pub mod error;
pub mod users;

pub use context::AuthContext;
pub use device::{device, set_device, DeviceState};
pub use error::AuthError;
pub use users::{check_macaroon, new_user, remove_user, update_user, user, users, UserState};

use crate::state::{StateError, StateGuard};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// State entry holding all identity records.
const AUTH_KEY: &str = "auth";

/// Persisted form of the identity records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct AuthState {
    #[serde(default)]
    last_id: u64,
    #[serde(default)]
    users: BTreeMap<u64, UserState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    device: Option<DeviceState>,
}

/// Read the identity records; `None` when nothing was ever stored.
fn load(st: &StateGuard<'_>) -> Result<Option<AuthState>, AuthError> {
    match st.get::<AuthState>(AUTH_KEY) {
        Ok(auth) => Ok(Some(auth)),
        Err(StateError::NoState(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn save(st: &mut StateGuard<'_>, auth: &AuthState) -> Result<(), AuthError> {
    st.set(AUTH_KEY, auth)?;
    Ok(())
}
