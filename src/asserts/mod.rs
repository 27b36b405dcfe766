//! Signed device identity documents.
//!
//! An assertion is a block of `name: value` headers followed by a blank
//! line and an opaque signature. This module knows how to read and write
//! that text form and exposes typed views for the three documents the
//! device needs:
//!
//! - [`Model`]: brand/model assertion, optionally naming a store
//! - [`Serial`]: the device's serial assertion
//! - [`DeviceSessionRequest`]: nonce-bound request for a store session
//!
//! Signature verification lives elsewhere; decoding here only checks the
//! document structure and required headers.

pub mod provider;

pub use provider::{register_device_assertions, DeviceAssertions, DeviceKey, StateDeviceAssertions};

use chrono::{DateTime, SecondsFormat, Utc};

/// Indentation used for continuation lines of multi-line header values.
const CONTINUATION_INDENT: &str = "    ";

/// Errors raised while building, decoding or providing assertions.
#[derive(Debug, thiserror::Error)]
pub enum AssertionError {
    /// The requested assertion is not available (device not registered).
    #[error("no assertion available")]
    NoState,
    #[error("assertion has type {found:?}, expected {expected:?}")]
    WrongType {
        expected: &'static str,
        found: String,
    },
    #[error("assertion is missing header {0:?}")]
    MissingHeader(&'static str),
    #[error("malformed assertion: {0}")]
    Malformed(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ── Generic assertion ───────────────────────────────────────────

/// Ordered headers plus an opaque signature block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assertion {
    headers: Vec<(String, String)>,
    signature: Vec<u8>,
}

impl Assertion {
    /// Start an unsigned assertion of the given type.
    pub fn new(assertion_type: &str) -> Self {
        Self {
            headers: vec![("type".to_string(), assertion_type.to_string())],
            signature: Vec::new(),
        }
    }

    /// Builder-style [`Assertion::set_header`].
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.set_header(name, value);
        self
    }

    /// Set a header, replacing an existing value in place.
    pub fn set_header(&mut self, name: &str, value: &str) {
        match self.headers.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => *v = value.to_string(),
            None => self.headers.push((name.to_string(), value.to_string())),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Value of the `type` header.
    pub fn assertion_type(&self) -> &str {
        self.header("type").unwrap_or_default()
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn set_signature(&mut self, signature: Vec<u8>) {
        self.signature = signature;
    }

    /// The header block, which is what gets signed.
    pub fn signed_content(&self) -> Vec<u8> {
        let mut out = String::new();
        for (i, (name, value)) in self.headers.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            if value.contains('\n') {
                out.push_str(name);
                out.push(':');
                for line in value.lines() {
                    out.push('\n');
                    out.push_str(CONTINUATION_INDENT);
                    out.push_str(line);
                }
            } else {
                out.push_str(&format!("{name}: {value}"));
            }
        }
        out.into_bytes()
    }

    /// Render the text form: headers, blank line, signature.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.signed_content();
        out.extend_from_slice(b"\n\n");
        out.extend_from_slice(&self.signature);
        out
    }

    /// Parse the text form. The signature is kept as-is, not verified.
    pub fn decode(data: &[u8]) -> Result<Self, AssertionError> {
        let text = std::str::from_utf8(data)
            .map_err(|_| AssertionError::Malformed("assertion is not valid UTF-8".into()))?;
        let (head, signature) = text
            .split_once("\n\n")
            .ok_or_else(|| AssertionError::Malformed("missing signature separator".into()))?;

        let mut headers: Vec<(String, String)> = Vec::new();
        for line in head.lines() {
            if let Some(cont) = line.strip_prefix(CONTINUATION_INDENT) {
                let (_, value) = headers.last_mut().ok_or_else(|| {
                    AssertionError::Malformed("continuation line before any header".into())
                })?;
                if !value.is_empty() {
                    value.push('\n');
                }
                value.push_str(cont);
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| AssertionError::Malformed(format!("invalid header line {line:?}")))?;
            if name.is_empty() {
                return Err(AssertionError::Malformed("empty header name".into()));
            }
            headers.push((name.to_string(), value.trim_start().to_string()));
        }

        let assertion = Self {
            headers,
            signature: signature.as_bytes().to_vec(),
        };
        if assertion.header("type").is_none() {
            return Err(AssertionError::MissingHeader("type"));
        }
        Ok(assertion)
    }

    /// Check the `type` header and the presence of `required` headers.
    fn check_type(&self, expected: &'static str, required: &[&'static str]) -> Result<(), AssertionError> {
        let found = self.assertion_type();
        if found != expected {
            return Err(AssertionError::WrongType {
                expected,
                found: found.to_string(),
            });
        }
        for &name in required {
            match self.header(name) {
                Some(v) if !v.is_empty() => {}
                _ => return Err(AssertionError::MissingHeader(name)),
            }
        }
        Ok(())
    }

    fn required(&self, name: &str) -> &str {
        self.header(name).unwrap_or_default()
    }
}

// ── Typed views ─────────────────────────────────────────────────

/// Brand/model assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model(Assertion);

impl Model {
    pub const TYPE: &'static str = "model";

    pub fn from_assertion(assertion: Assertion) -> Result<Self, AssertionError> {
        assertion.check_type(Self::TYPE, &["brand-id", "model"])?;
        Ok(Self(assertion))
    }

    pub fn decode(data: &[u8]) -> Result<Self, AssertionError> {
        Self::from_assertion(Assertion::decode(data)?)
    }

    pub fn brand_id(&self) -> &str {
        self.0.required("brand-id")
    }

    pub fn model(&self) -> &str {
        self.0.required("model")
    }

    /// Store the device should address, empty when the model names none.
    pub fn store(&self) -> &str {
        self.0.header("store").unwrap_or_default()
    }

    pub fn assertion(&self) -> &Assertion {
        &self.0
    }

    pub fn encode(&self) -> Vec<u8> {
        self.0.encode()
    }
}

/// Serial assertion identifying this particular device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Serial(Assertion);

impl Serial {
    pub const TYPE: &'static str = "serial";

    pub fn from_assertion(assertion: Assertion) -> Result<Self, AssertionError> {
        assertion.check_type(Self::TYPE, &["brand-id", "model", "serial"])?;
        Ok(Self(assertion))
    }

    pub fn decode(data: &[u8]) -> Result<Self, AssertionError> {
        Self::from_assertion(Assertion::decode(data)?)
    }

    pub fn brand_id(&self) -> &str {
        self.0.required("brand-id")
    }

    pub fn model(&self) -> &str {
        self.0.required("model")
    }

    pub fn serial(&self) -> &str {
        self.0.required("serial")
    }

    pub fn device_key_sha3_384(&self) -> &str {
        self.0.header("device-key-sha3-384").unwrap_or_default()
    }

    pub fn assertion(&self) -> &Assertion {
        &self.0
    }

    pub fn encode(&self) -> Vec<u8> {
        self.0.encode()
    }
}

/// Request for a store session, bound to a server-issued nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSessionRequest(Assertion);

impl DeviceSessionRequest {
    pub const TYPE: &'static str = "device-session-request";

    pub fn from_assertion(assertion: Assertion) -> Result<Self, AssertionError> {
        assertion.check_type(
            Self::TYPE,
            &["brand-id", "model", "serial", "nonce", "timestamp"],
        )?;
        Ok(Self(assertion))
    }

    pub fn decode(data: &[u8]) -> Result<Self, AssertionError> {
        Self::from_assertion(Assertion::decode(data)?)
    }

    /// Build and sign a session request for `serial` with `key`.
    pub fn sign(
        serial: &Serial,
        nonce: &str,
        timestamp: DateTime<Utc>,
        key: &DeviceKey,
    ) -> Result<Self, AssertionError> {
        if nonce.is_empty() {
            return Err(AssertionError::MissingHeader("nonce"));
        }
        if nonce.contains('\n') {
            return Err(AssertionError::Malformed("nonce must be a single line".into()));
        }
        if nonce.trim() != nonce {
            return Err(AssertionError::Malformed(
                "nonce must not start or end with whitespace".into(),
            ));
        }

        let mut assertion = Assertion::new(Self::TYPE)
            .with_header("brand-id", serial.brand_id())
            .with_header("model", serial.model())
            .with_header("serial", serial.serial())
            .with_header("nonce", nonce)
            .with_header(
                "timestamp",
                &timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            )
            .with_header("sign-key-id", &key.key_id());
        let signature = key.sign(&assertion.signed_content())?;
        assertion.set_signature(signature);

        Self::from_assertion(assertion)
    }

    pub fn brand_id(&self) -> &str {
        self.0.required("brand-id")
    }

    pub fn model(&self) -> &str {
        self.0.required("model")
    }

    pub fn serial(&self) -> &str {
        self.0.required("serial")
    }

    pub fn nonce(&self) -> &str {
        self.0.required("nonce")
    }

    pub fn timestamp(&self) -> Result<DateTime<Utc>, AssertionError> {
        DateTime::parse_from_rfc3339(self.0.required("timestamp"))
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| AssertionError::Malformed(format!("invalid timestamp: {e}")))
    }

    pub fn assertion(&self) -> &Assertion {
        &self.0
    }

    pub fn encode(&self) -> Vec<u8> {
        self.0.encode()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn decode_model_headers() {
        let model = Model::decode(testdata::MODEL.as_bytes()).unwrap();
        assert_eq!(model.brand_id(), "my-brand");
        assert_eq!(model.model(), "baz-3000");
        assert_eq!(model.store(), "my-brand-store-id");
        assert_eq!(model.assertion().header("series"), Some("16"));
        assert_eq!(model.assertion().signature(), b"AXNpZw=");
    }

    #[test]
    fn model_without_store_is_empty_store() {
        let model = Model::decode(testdata::MODEL_NO_STORE.as_bytes()).unwrap();
        assert_eq!(model.store(), "");
    }

    #[test]
    fn decode_serial_with_multiline_header() {
        let serial = Serial::decode(testdata::SERIAL.as_bytes()).unwrap();
        assert_eq!(serial.serial(), "9999");
        let key = serial.assertion().header("device-key").unwrap();
        assert_eq!(key.lines().count(), 2);
        assert!(key.starts_with("AcbBTQRW"));
        assert_eq!(
            serial.device_key_sha3_384(),
            "EAD4DbLxK_kn0gzNCXOs3kd6DeMU3f-L6BEsSEuJGBqCORR0gXkdDxMbOm11mRFu"
        );
    }

    #[test]
    fn encode_preserves_text_form() {
        let serial = Serial::decode(testdata::SERIAL.as_bytes()).unwrap();
        assert_eq!(serial.encode(), testdata::SERIAL.as_bytes());
    }

    #[test]
    fn wrong_type_is_rejected() {
        let err = Serial::decode(testdata::MODEL.as_bytes()).unwrap_err();
        match err {
            AssertionError::WrongType { expected, found } => {
                assert_eq!(expected, "serial");
                assert_eq!(found, "model");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_required_header_is_rejected() {
        let a = Assertion::new("serial")
            .with_header("brand-id", "b")
            .with_header("model", "m");
        assert!(matches!(
            Serial::from_assertion(a),
            Err(AssertionError::MissingHeader("serial"))
        ));
    }

    #[test]
    fn decode_without_separator_is_malformed() {
        let err = Assertion::decode(b"type: model\nbrand-id: b").unwrap_err();
        assert!(matches!(err, AssertionError::Malformed(_)));
    }

    #[test]
    fn decode_without_type_is_rejected() {
        let err = Assertion::decode(b"brand-id: b\n\nsig").unwrap_err();
        assert!(matches!(err, AssertionError::MissingHeader("type")));
    }

    #[test]
    fn set_header_replaces_in_place() {
        let mut a = Assertion::new("model").with_header("brand-id", "a").with_header("model", "m");
        a.set_header("brand-id", "b");
        assert_eq!(a.header("brand-id"), Some("b"));
        assert_eq!(
            String::from_utf8(a.signed_content()).unwrap(),
            "type: model\nbrand-id: b\nmodel: m"
        );
    }

    #[test]
    fn session_request_binds_nonce() {
        let serial = Serial::decode(testdata::SERIAL.as_bytes()).unwrap();
        let key = DeviceKey::from_bytes([7u8; 32]);
        let ts = Utc.with_ymd_and_hms(2016, 9, 1, 10, 0, 0).unwrap();

        let req = DeviceSessionRequest::sign(&serial, "NONCE-1", ts, &key).unwrap();
        let text = String::from_utf8(req.encode()).unwrap();

        assert!(text.contains("nonce: NONCE-1\n"));
        assert!(text.contains("serial: 9999\n"));
        assert!(text.contains("timestamp: 2016-09-01T10:00:00Z\n"));
        assert_eq!(req.timestamp().unwrap(), ts);
        assert_eq!(req.assertion().header("sign-key-id"), Some(key.key_id().as_str()));

        let decoded = DeviceSessionRequest::decode(&req.encode()).unwrap();
        assert_eq!(decoded.nonce(), "NONCE-1");
        assert!(key.verify(&decoded.assertion().signed_content(), decoded.assertion().signature()));
    }

    #[test]
    fn session_request_rejects_empty_nonce() {
        let serial = Serial::decode(testdata::SERIAL.as_bytes()).unwrap();
        let key = DeviceKey::from_bytes([7u8; 32]);
        let err = DeviceSessionRequest::sign(&serial, "", Utc::now(), &key).unwrap_err();
        assert!(matches!(err, AssertionError::MissingHeader("nonce")));
    }

    #[test]
    fn session_request_rejects_padded_nonce() {
        let serial = Serial::decode(testdata::SERIAL.as_bytes()).unwrap();
        let key = DeviceKey::from_bytes([7u8; 32]);
        for nonce in [" NONCE", "NONCE ", "\tNONCE", "NONCE\r"] {
            let err = DeviceSessionRequest::sign(&serial, nonce, Utc::now(), &key).unwrap_err();
            assert!(matches!(err, AssertionError::Malformed(_)), "nonce {nonce:?}");
        }
    }

    #[test]
    fn session_request_nonce_survives_decoding() {
        let serial = Serial::decode(testdata::SERIAL.as_bytes()).unwrap();
        let key = DeviceKey::from_bytes([7u8; 32]);
        let req = DeviceSessionRequest::sign(&serial, "a b:c", Utc::now(), &key).unwrap();
        let decoded = DeviceSessionRequest::decode(&req.encode()).unwrap();
        assert_eq!(decoded.nonce(), "a b:c");
    }
}
