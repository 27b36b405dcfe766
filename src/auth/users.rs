//! User records.
//!
//! Every function here expects the caller to hold the state lock for the
//! whole read-then-write sequence, which the [`StateGuard`] argument
//! guarantees.

use super::{load, save, AuthError};
use crate::state::StateGuard;
use serde::{Deserialize, Serialize};

/// A local user identity and its store credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UserState {
    /// Primary key, assigned on creation and never reused.
    pub id: u64,
    #[serde(default)]
    pub username: String,
    /// Root credential minted for this local login.
    #[serde(default)]
    pub macaroon: String,
    /// Discharges bound to `macaroon`, always sorted ascending.
    #[serde(default)]
    pub discharges: Vec<String>,
    /// Macaroon currently accepted by the store for this user.
    #[serde(default)]
    pub store_macaroon: String,
    /// Store-side discharges, refreshed independently of `discharges`.
    #[serde(default)]
    pub store_discharges: Vec<String>,
}

impl UserState {
    /// Whether the user carries credentials usable against the store.
    pub fn has_store_auth(&self) -> bool {
        !self.store_macaroon.is_empty()
    }
}

/// Create a user with the next unused id and persist it.
pub fn new_user(
    st: &mut StateGuard<'_>,
    username: &str,
    macaroon: &str,
    discharges: &[String],
) -> Result<UserState, AuthError> {
    let mut auth = load(st)?.unwrap_or_default();

    let mut sorted = discharges.to_vec();
    sorted.sort();

    let id = auth.last_id + 1;
    let user = UserState {
        id,
        username: username.to_string(),
        macaroon: macaroon.to_string(),
        discharges: sorted.clone(),
        store_macaroon: macaroon.to_string(),
        store_discharges: sorted,
    };

    auth.last_id = id;
    auth.users.insert(id, user.clone());
    save(st, &auth)?;

    tracing::info!(user_id = id, username = username, "Local user created");
    Ok(user)
}

/// Fetch the user with the given id.
pub fn user(st: &StateGuard<'_>, id: u64) -> Result<UserState, AuthError> {
    load(st)?
        .and_then(|auth| auth.users.get(&id).cloned())
        .ok_or(AuthError::InvalidUser)
}

/// All live users in ascending id order.
pub fn users(st: &StateGuard<'_>) -> Result<Vec<UserState>, AuthError> {
    Ok(load(st)?
        .map(|auth| auth.users.into_values().collect())
        .unwrap_or_default())
}

/// Replace an existing user record in full.
pub fn update_user(st: &mut StateGuard<'_>, user: &UserState) -> Result<(), AuthError> {
    let mut auth = load(st)?.ok_or(AuthError::InvalidUser)?;
    let slot = auth.users.get_mut(&user.id).ok_or(AuthError::InvalidUser)?;
    *slot = user.clone();
    save(st, &auth)
}

/// Delete the user with the given id. Its id is never handed out again.
pub fn remove_user(st: &mut StateGuard<'_>, id: u64) -> Result<(), AuthError> {
    let mut auth = load(st)?.ok_or(AuthError::InvalidUser)?;
    if auth.users.remove(&id).is_none() {
        return Err(AuthError::InvalidUser);
    }
    save(st, &auth)?;

    tracing::info!(user_id = id, "Local user removed");
    Ok(())
}

/// Find the user owning exactly this macaroon and discharge sequence.
///
/// Discharges are compared in order; callers pass them in the same sorted
/// form [`new_user`] stores.
pub fn check_macaroon(
    st: &StateGuard<'_>,
    macaroon: &str,
    discharges: &[String],
) -> Result<UserState, AuthError> {
    let auth = load(st)?.ok_or(AuthError::InvalidAuth)?;
    auth.users
        .into_values()
        .find(|u| u.macaroon == macaroon && u.discharges == discharges)
        .ok_or(AuthError::InvalidAuth)
}
