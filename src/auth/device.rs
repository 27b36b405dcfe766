//! The device's own identity record.

use super::{load, save, AuthError};
use crate::state::StateGuard;
use serde::{Deserialize, Serialize};

/// Singleton identity of this device. The zero value means "unprovisioned".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeviceState {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub brand: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,
    /// Identifier of the device signing key, once provisioned.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key_id: String,
    /// Current session credential with the store; empty until obtained.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session_macaroon: String,
}

/// The stored device record, or the zero value if none was ever stored.
pub fn device(st: &StateGuard<'_>) -> Result<DeviceState, AuthError> {
    Ok(load(st)?.and_then(|auth| auth.device).unwrap_or_default())
}

/// Overwrite the device record in full.
pub fn set_device(st: &mut StateGuard<'_>, device: &DeviceState) -> Result<(), AuthError> {
    let mut auth = load(st)?.unwrap_or_default();
    auth.device = Some(device.clone());
    save(st, &auth)
}
