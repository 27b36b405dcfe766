//! Sources of the device's identity documents.
//!
//! [`DeviceAssertions`] is the narrow capability the auth context consumes.
//! [`StateDeviceAssertions`] is the production implementation: it keeps the
//! registered model and serial in the state document and signs session
//! requests with the device key.

use super::{AssertionError, DeviceSessionRequest, Model, Serial};
use crate::auth::{self, AuthError, DeviceState};
use crate::state::{State, StateError, StateGuard};
use anyhow::anyhow;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// State entry holding the registered model and serial documents.
const DEVICE_ASSERTIONS_KEY: &str = "device-assertions";

/// Supplies the signed documents the device needs to talk to the store.
///
/// Every method fails with [`AssertionError::NoState`] while the device has
/// no registered identity; other failures are reported as they are.
pub trait DeviceAssertions: Send + Sync {
    /// The device's brand/model assertion.
    fn model(&self) -> Result<Model, AssertionError>;

    /// The device's serial assertion.
    fn serial(&self) -> Result<Serial, AssertionError>;

    /// A freshly signed session request bound to `nonce`, with the serial
    /// it was made for.
    fn device_session_request(
        &self,
        nonce: &str,
    ) -> Result<(DeviceSessionRequest, Serial), AssertionError>;
}

impl From<StateError> for AssertionError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::NoState(_) => AssertionError::NoState,
            other => AssertionError::Other(other.into()),
        }
    }
}

// ── Device key ──────────────────────────────────────────────────

/// Secret key the device signs its session requests with.
#[derive(Clone)]
pub struct DeviceKey {
    secret: [u8; 32],
}

impl DeviceKey {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        Self {
            secret: rand::random(),
        }
    }

    pub fn from_bytes(secret: [u8; 32]) -> Self {
        Self { secret }
    }

    /// Secret in the base64 form it is persisted in.
    fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.secret)
    }

    fn from_base64(encoded: &str) -> Result<Self, AssertionError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| AssertionError::Malformed(format!("invalid device key: {e}")))?;
        let secret: [u8; 32] = bytes
            .try_into()
            .map_err(|_| AssertionError::Malformed("device key must be 32 bytes".into()))?;
        Ok(Self { secret })
    }

    /// Stable public identifier: unpadded URL-safe base64 of SHA-256(secret).
    pub fn key_id(&self) -> String {
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(Sha256::digest(self.secret))
    }

    /// HMAC-SHA256 over `content`, base64 encoded.
    pub fn sign(&self, content: &[u8]) -> Result<Vec<u8>, AssertionError> {
        let mut mac = self.mac()?;
        mac.update(content);
        let tag = mac.finalize().into_bytes();
        Ok(base64::engine::general_purpose::STANDARD
            .encode(tag)
            .into_bytes())
    }

    /// Check a signature produced by [`DeviceKey::sign`].
    pub fn verify(&self, content: &[u8], signature: &[u8]) -> bool {
        let Ok(tag) = base64::engine::general_purpose::STANDARD.decode(signature) else {
            return false;
        };
        let Ok(mut mac) = self.mac() else {
            return false;
        };
        mac.update(content);
        mac.verify_slice(&tag).is_ok()
    }

    fn mac(&self) -> Result<HmacSha256, AssertionError> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| AssertionError::Other(anyhow!("cannot initialise device key: {e}")))
    }
}

impl std::fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceKey")
            .field("key_id", &self.key_id())
            .finish_non_exhaustive()
    }
}

// ── State-backed provider ───────────────────────────────────────

/// Encoded documents and the device key secret as kept in the state.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct StoredAssertions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    serial: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    device_key: Option<String>,
}

fn load_stored(st: &StateGuard<'_>) -> Result<StoredAssertions, AssertionError> {
    match st.get::<StoredAssertions>(DEVICE_ASSERTIONS_KEY) {
        Ok(stored) => Ok(stored),
        Err(StateError::NoState(_)) => Ok(StoredAssertions::default()),
        Err(e) => Err(e.into()),
    }
}

/// Record the device's model and serial, and mirror brand/model into the
/// device record. Other device fields are left untouched.
pub fn register_device_assertions(
    st: &mut StateGuard<'_>,
    model: &Model,
    serial: &Serial,
) -> Result<DeviceState, AuthError> {
    if serial.brand_id() != model.brand_id() || serial.model() != model.model() {
        return Err(AssertionError::Malformed(format!(
            "serial is for {}/{}, model is {}/{}",
            serial.brand_id(),
            serial.model(),
            model.brand_id(),
            model.model()
        ))
        .into());
    }

    // A failed read must leave the state untouched.
    let mut device = auth::device(st)?;
    let mut stored = load_stored(st)?;

    stored.model = Some(String::from_utf8_lossy(&model.encode()).into_owned());
    stored.serial = Some(String::from_utf8_lossy(&serial.encode()).into_owned());
    device.brand = model.brand_id().to_string();
    device.model = model.model().to_string();

    st.set(DEVICE_ASSERTIONS_KEY, &stored)?;
    auth::set_device(st, &device)?;

    tracing::info!(
        brand = model.brand_id(),
        model = model.model(),
        serial = serial.serial(),
        "Device assertions registered"
    );
    Ok(device)
}

/// Production [`DeviceAssertions`] reading from the shared state.
pub struct StateDeviceAssertions<'a> {
    state: &'a State,
    key: DeviceKey,
}

impl<'a> StateDeviceAssertions<'a> {
    /// Provider signing with an explicit key. [`StateDeviceAssertions::register`]
    /// persists it.
    pub fn new(state: &'a State, key: DeviceKey) -> Self {
        Self { state, key }
    }

    /// Provider using the persisted device key, generating and saving one on
    /// first use.
    pub fn open(state: &'a State) -> Result<Self, AssertionError> {
        let mut st = state.lock();
        let mut stored = load_stored(&st)?;

        let key = match stored.device_key.as_deref() {
            Some(encoded) => DeviceKey::from_base64(encoded)?,
            None => {
                let key = DeviceKey::generate();
                stored.device_key = Some(key.to_base64());
                st.set(DEVICE_ASSERTIONS_KEY, &stored)?;
                st.checkpoint()?;
                tracing::info!(key_id = %key.key_id(), "Device key generated");
                key
            }
        };

        drop(st);
        Ok(Self { state, key })
    }

    pub fn key(&self) -> &DeviceKey {
        &self.key
    }

    /// Register the device identity, persist this provider's key and record
    /// its id in the device record.
    pub fn register(&self, model: &Model, serial: &Serial) -> Result<DeviceState, AuthError> {
        let mut st = self.state.lock();
        let mut device = register_device_assertions(&mut st, model, serial)?;

        let mut stored = load_stored(&st)?;
        stored.device_key = Some(self.key.to_base64());
        st.set(DEVICE_ASSERTIONS_KEY, &stored)?;

        device.key_id = self.key.key_id();
        auth::set_device(&mut st, &device)?;
        st.checkpoint()?;
        Ok(device)
    }
}

impl DeviceAssertions for StateDeviceAssertions<'_> {
    fn model(&self) -> Result<Model, AssertionError> {
        let stored = load_stored(&self.state.lock())?;
        let text = stored.model.ok_or(AssertionError::NoState)?;
        Model::decode(text.as_bytes())
    }

    fn serial(&self) -> Result<Serial, AssertionError> {
        let stored = load_stored(&self.state.lock())?;
        let text = stored.serial.ok_or(AssertionError::NoState)?;
        Serial::decode(text.as_bytes())
    }

    fn device_session_request(
        &self,
        nonce: &str,
    ) -> Result<(DeviceSessionRequest, Serial), AssertionError> {
        let serial = self.serial()?;
        let request = DeviceSessionRequest::sign(&serial, nonce, chrono::Utc::now(), &self.key)?;
        Ok((request, serial))
    }
}
