//! Typed records appended to a session log.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::Fields;

const TYPE_FIELD: &str = "type";
const ORIGIN_FIELD: &str = "origin";
const BODY_FIELD: &str = "body";

/// Envelope kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeType {
    /// First entry of a session, body carries the session id.
    Begin,
    /// Reassembled agent event.
    Event,
    /// Error reported by the producer.
    Error,
    /// Informational message from the producer.
    Info,
    /// Terminates the session. Never carries a body.
    End,
}

impl EnvelopeType {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Begin => "begin",
            Self::Event => "event",
            Self::Error => "error",
            Self::Info => "info",
            Self::End => "end",
        }
    }
}

impl fmt::Display for EnvelopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnvelopeType {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "begin" => Ok(Self::Begin),
            "event" => Ok(Self::Event),
            "error" => Ok(Self::Error),
            "info" => Ok(Self::Info),
            "end" => Ok(Self::End),
            other => Err(EnvelopeError::UnknownType(other.to_string())),
        }
    }
}

/// Envelope decoding error.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("Missing field: {0}")]
    MissingField(&'static str),
    #[error("Unknown envelope type: {0}")]
    UnknownType(String),
    #[error("Invalid body: {0}")]
    InvalidBody(#[from] serde_json::Error),
}

/// One record of a session log.
///
/// A missing body and an empty body are different things: the former has
/// no `body` field on the wire at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeType,
    pub origin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl Envelope {
    /// Create an envelope.
    #[must_use]
    pub fn new(kind: EnvelopeType, origin: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            kind,
            origin: origin.into(),
            body,
        }
    }

    /// Encode into log fields, with the body as JSON text.
    ///
    /// # Errors
    /// Returns error if the body cannot be serialized.
    pub fn to_fields(&self) -> Result<Fields, EnvelopeError> {
        let mut fields = Fields::new();
        fields.insert(TYPE_FIELD.to_string(), self.kind.as_str().to_string());
        fields.insert(ORIGIN_FIELD.to_string(), self.origin.clone());
        if let Some(body) = &self.body {
            fields.insert(BODY_FIELD.to_string(), serde_json::to_string(body)?);
        }
        Ok(fields)
    }

    /// Decode from log fields.
    ///
    /// # Errors
    /// Returns error if `type` or `origin` is missing, the type is unknown,
    /// or the body is not valid JSON.
    pub fn from_fields(fields: &Fields) -> Result<Self, EnvelopeError> {
        let kind = fields
            .get(TYPE_FIELD)
            .ok_or(EnvelopeError::MissingField(TYPE_FIELD))?
            .parse()?;
        let origin = fields
            .get(ORIGIN_FIELD)
            .ok_or(EnvelopeError::MissingField(ORIGIN_FIELD))?
            .clone();
        let body = fields
            .get(BODY_FIELD)
            .map(|raw| serde_json::from_str(raw))
            .transpose()?;
        Ok(Self { kind, origin, body })
    }
}
