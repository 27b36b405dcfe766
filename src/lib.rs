//! Device identity and session credentials for a store client.
//!
//! Local user records, the device's own identity record and the signed
//! documents that prove it, all kept in one lock-protected [`State`]
//! document. [`AuthContext`] refreshes credentials against that state
//! and resolves the store to talk to.

pub mod asserts;
pub mod auth;
pub mod config;
pub mod state;

pub use asserts::{AssertionError, DeviceAssertions, DeviceKey, StateDeviceAssertions};
pub use auth::{AuthContext, AuthError, DeviceState, UserState};
pub use config::Config;
pub use state::{State, StateError, StateGuard};
