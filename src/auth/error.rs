use crate::asserts::AssertionError;
use crate::state::StateError;

/// Errors returned by the identity store and the auth context.
///
/// Only the "absent state" condition from the assertion provider is
/// translated (into [`AuthError::NoSerial`]); every other collaborator
/// failure is carried through unchanged.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The referenced user id is not currently present.
    #[error("invalid user")]
    InvalidUser,
    /// The macaroon and discharges do not match any stored user.
    #[error("invalid authentication")]
    InvalidAuth,
    /// The device has no serial identity yet.
    #[error("no device serial yet")]
    NoSerial,
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Assertions(AssertionError),
}

impl From<AssertionError> for AuthError {
    fn from(err: AssertionError) -> Self {
        match err {
            AssertionError::NoState => AuthError::NoSerial,
            other => AuthError::Assertions(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_match_taxonomy() {
        assert_eq!(AuthError::InvalidUser.to_string(), "invalid user");
        assert_eq!(AuthError::InvalidAuth.to_string(), "invalid authentication");
        assert_eq!(AuthError::NoSerial.to_string(), "no device serial yet");
    }

    #[test]
    fn provider_no_state_becomes_no_serial() {
        let err: AuthError = AssertionError::NoState.into();
        assert!(matches!(err, AuthError::NoSerial));
    }

    #[test]
    fn other_provider_errors_pass_through() {
        let err: AuthError = AssertionError::MissingHeader("serial").into();
        match err {
            AuthError::Assertions(AssertionError::MissingHeader(name)) => assert_eq!(name, "serial"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
