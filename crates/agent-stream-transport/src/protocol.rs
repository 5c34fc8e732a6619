//! Flat wire form of an envelope.

use agent_stream_core::{Envelope, EnvelopeType};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};

use crate::StreamError;

/// Envelope whose body is base64 of its JSON text.
///
/// For consumers that cannot take nested structured values: the whole
/// wrapper is a flat JSON object of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedEnvelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeType,
    pub origin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl SerializedEnvelope {
    /// Encode an envelope.
    ///
    /// # Errors
    /// Returns error if the body cannot be serialized.
    pub fn encode(envelope: &Envelope) -> Result<Self, StreamError> {
        let body = envelope
            .body
            .as_ref()
            .map(|body| serde_json::to_vec(body).map(|json| BASE64.encode(json)))
            .transpose()?;
        Ok(Self {
            kind: envelope.kind,
            origin: envelope.origin.clone(),
            body,
        })
    }

    /// Decode back into an envelope.
    ///
    /// # Errors
    /// Returns error if the body is not base64 of valid JSON.
    pub fn decode(&self) -> Result<Envelope, StreamError> {
        let body = self
            .body
            .as_ref()
            .map(|encoded| -> Result<serde_json::Value, StreamError> {
                let json = BASE64.decode(encoded)?;
                Ok(serde_json::from_slice(&json)?)
            })
            .transpose()?;
        Ok(Envelope::new(self.kind, self.origin.clone(), body))
    }

    /// JSON text of the wrapper.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn to_json(&self) -> Result<String, StreamError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse the JSON text of a wrapper.
    ///
    /// # Errors
    /// Returns error if the text is not a wrapper.
    pub fn from_json(json: &str) -> Result<Self, StreamError> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_body_is_base64_of_json() {
        let body = json!({"idx": 3, "content": "héllo", "nested": {"list": [1, 2]}});
        let envelope = Envelope::new(EnvelopeType::Event, "pydantic-ai", Some(body.clone()));

        let wire = SerializedEnvelope::encode(&envelope).unwrap().to_json().unwrap();
        let raw: serde_json::Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(raw["type"], "event");
        assert!(raw["body"].is_string());

        let decoded = BASE64.decode(raw["body"].as_str().unwrap()).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(parsed, body);

        let back = SerializedEnvelope::from_json(&wire).unwrap().decode().unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn test_missing_body_is_omitted() {
        let envelope = Envelope::new(EnvelopeType::Info, "opale", None);
        let wire = SerializedEnvelope::encode(&envelope).unwrap().to_json().unwrap();
        assert_eq!(wire, r#"{"type":"info","origin":"opale"}"#);
    }

    #[test]
    fn test_rejects_bad_base64() {
        let wrapper = SerializedEnvelope {
            kind: EnvelopeType::Info,
            origin: "x".into(),
            body: Some("***".into()),
        };
        assert!(matches!(wrapper.decode(), Err(StreamError::Base64(_))));
    }
}
