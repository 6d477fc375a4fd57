//! Wire format: the closed message set and its payload types.
//!
//! Every message travels as one UTF-8 JSON text frame, an object tagged by
//! its `type` field. Decoding distinguishes frames that are not objects at
//! all ([`DecodeError::Malformed`]) from well-formed objects of an unknown
//! or invalid kind ([`DecodeError::Unsupported`]); the engines treat the
//! former as fatal and answer the latter in-protocol.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Subprotocol token offered during transport negotiation.
pub const SUBSCRIPTIONS_PROTOCOL: &str = "subwire-subscriptions";

/// Close codes used by the engines.
pub mod close_code {
    /// Deliberate, orderly close.
    pub const NORMAL: u16 = 1000;
    /// The peer violated the protocol (e.g. sent a malformed frame).
    pub const PROTOCOL_ERROR: u16 = 1002;
}

/// Identifier of one logical subscription, unique per connection.
///
/// Clients mint numeric ids; names are accepted on the wire so either
/// representation multiplexes correctly.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubscriptionId {
    Number(u64),
    Name(String),
}

impl From<u64> for SubscriptionId {
    fn from(raw: u64) -> Self {
        Self::Number(raw)
    }
}

impl From<&str> for SubscriptionId {
    fn from(raw: &str) -> Self {
        Self::Name(raw.to_owned())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

/// One error reported to a subscription or handshake.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolError {
    pub message: String,
}

impl ProtocolError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A subscribe request as carried by `subscription_start`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Value>,
    #[serde(
        rename = "operationName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub operation_name: Option<String>,
    /// Opaque per-connection state; filled from the handshake context by
    /// the server when the request carries none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl SubscriptionRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            variables: None,
            operation_name: None,
            context: None,
        }
    }

    #[must_use]
    pub fn variables(mut self, variables: Value) -> Self {
        self.variables = Some(variables);
        self
    }

    #[must_use]
    pub fn operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }
}

/// Result event delivered by `subscription_data`. A single event may carry
/// partial data and errors together.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ProtocolError>>,
}

impl EventPayload {
    #[must_use]
    pub fn from_data(data: Value) -> Self {
        Self {
            data: Some(data),
            errors: None,
        }
    }

    #[must_use]
    pub fn from_errors(errors: Vec<ProtocolError>) -> Self {
        Self {
            data: None,
            errors: Some(errors),
        }
    }
}

/// Payload of `init_fail`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitFailPayload {
    pub error: String,
}

/// Payload of `subscription_fail`.
///
/// Decoding is lenient: a missing `errors` field and a bare error object
/// are both accepted, since peers in the wild produce both shapes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailPayload {
    #[serde(default, deserialize_with = "lenient_errors")]
    pub errors: Option<Vec<ProtocolError>>,
}

impl FailPayload {
    /// The error list, never empty: an absent or empty list normalizes to a
    /// single `"Unknown error"`.
    #[must_use]
    pub fn into_errors(self) -> Vec<ProtocolError> {
        match self.errors {
            Some(errors) if !errors.is_empty() => errors,
            _ => vec![ProtocolError::new("Unknown error")],
        }
    }
}

fn lenient_errors<'de, D>(deserializer: D) -> Result<Option<Vec<ProtocolError>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        Many(Vec<ProtocolError>),
        One(ProtocolError),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::Many(errors)) => Some(errors),
        Some(OneOrMany::One(error)) => Some(vec![error]),
        None => None,
    })
}

/// Why an inbound frame could not be decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame is not a serialized JSON object at all. Fatal on the
    /// client side.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    /// A well-formed object of an unknown or invalid kind. Answered with
    /// `subscription_fail`, carrying the frame's id when one parses.
    #[error("unsupported message: {reason}")]
    Unsupported {
        id: Option<SubscriptionId>,
        reason: String,
    },
}

/// The closed set of protocol messages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Init {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    InitSuccess,
    InitFail {
        payload: InitFailPayload,
    },
    SubscriptionStart {
        id: SubscriptionId,
        payload: SubscriptionRequest,
    },
    SubscriptionSuccess {
        id: SubscriptionId,
    },
    SubscriptionFail {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<SubscriptionId>,
        payload: FailPayload,
    },
    SubscriptionData {
        id: SubscriptionId,
        payload: EventPayload,
    },
    SubscriptionEnd {
        id: SubscriptionId,
    },
    Keepalive,
}

impl Message {
    /// Serialize to one wire frame.
    ///
    /// # Errors
    /// Propagates serialization failures from the payload values.
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse one wire frame.
    ///
    /// # Errors
    /// [`DecodeError::Malformed`] when the frame is not a JSON object;
    /// [`DecodeError::Unsupported`] for objects of an unknown kind.
    pub fn decode(frame: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(frame)?;
        if !value.is_object() {
            return Err(DecodeError::Unsupported {
                id: None,
                reason: format!("message must be an object, got {value}"),
            });
        }
        let id = value
            .get("id")
            .and_then(|id| serde_json::from_value(id.clone()).ok());
        match serde_json::from_value(value) {
            Ok(message) => Ok(message),
            Err(error) => Err(DecodeError::Unsupported {
                id,
                reason: error.to_string(),
            }),
        }
    }

    /// The subscription id carried by this message, if any.
    #[must_use]
    pub fn id(&self) -> Option<&SubscriptionId> {
        match self {
            Self::SubscriptionStart { id, .. }
            | Self::SubscriptionSuccess { id }
            | Self::SubscriptionData { id, .. }
            | Self::SubscriptionEnd { id } => Some(id),
            Self::SubscriptionFail { id, .. } => id.as_ref(),
            _ => None,
        }
    }

    /// The wire name of this message's kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::InitSuccess => "init_success",
            Self::InitFail { .. } => "init_fail",
            Self::SubscriptionStart { .. } => "subscription_start",
            Self::SubscriptionSuccess { .. } => "subscription_success",
            Self::SubscriptionFail { .. } => "subscription_fail",
            Self::SubscriptionData { .. } => "subscription_data",
            Self::SubscriptionEnd { .. } => "subscription_end",
            Self::Keepalive => "keepalive",
        }
    }

    /// Build a `subscription_fail` for the given id and error list.
    #[must_use]
    pub fn subscription_fail(id: Option<SubscriptionId>, errors: Vec<ProtocolError>) -> Self {
        Self::SubscriptionFail {
            id,
            payload: FailPayload {
                errors: Some(errors),
            },
        }
    }
}
