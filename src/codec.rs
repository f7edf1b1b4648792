//! Wire format for relay frames.
//!
//! Inbound frames are JSON objects carrying a `type` of `chat`, `image` or
//! `location`. Outbound frames echo the event with its server timestamp, or
//! wrap the full history in a `history` envelope.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use time::{OffsetDateTime, format_description::well_known::Rfc3339, macros::format_description};
use uuid::Uuid;

use crate::error::CodecError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Chat,
    Image,
    Location,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Chat => "chat",
            Kind::Image => "image",
            Kind::Location => "location",
        }
    }
}

impl FromStr for Kind {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(Kind::Chat),
            "image" => Ok(Kind::Image),
            "location" => Ok(Kind::Location),
            other => Err(CodecError::UnsupportedKind(other.to_owned())),
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded client frame, before the hub stamps it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub kind: Kind,
    pub username: String,
    pub message: String,
    pub image: String,
}

#[derive(Deserialize)]
struct RawInbound {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    username: Option<Value>,
    #[serde(default)]
    message: Option<Value>,
    #[serde(default)]
    image: Option<Value>,
}

/// A persisted event. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: Kind,
    pub username: String,
    pub message: String,
    pub image: String,
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: OffsetDateTime,
}

impl Event {
    pub fn stamp(inbound: Inbound, timestamp: OffsetDateTime) -> Self {
        let Inbound { kind, username, message, image } = inbound;
        Self {
            id: Uuid::now_v7(),
            kind,
            username,
            message,
            image,
            timestamp,
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Envelope<'a> {
    History { messages: &'a [Event] },
    Error { message: &'a str },
}

/// Parses one client frame. Unknown fields are ignored.
///
/// Text fields are lenient: missing, null, `false`, `0` and `""` all read
/// as the empty string, other scalars as their JSON text. Only objects and
/// arrays are refused.
pub fn decode(raw: &[u8]) -> Result<Inbound, CodecError> {
    let RawInbound { kind, username, message, image } = serde_json::from_slice(raw)?;
    Ok(Inbound {
        kind: kind.parse()?,
        username: text_field("username", username)?,
        message: text_field("message", message)?,
        image: text_field("image", image)?,
    })
}

fn text_field(name: &'static str, value: Option<Value>) -> Result<String, CodecError> {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s),
        Some(Value::Bool(true)) => Ok("true".to_owned()),
        Some(Value::Number(n)) if n.as_f64() == Some(0.0) => Ok(String::new()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::Array(_) | Value::Object(_)) => Err(CodecError::InvalidField(name)),
    }
}

pub fn encode_event(event: &Event) -> String {
    to_frame(event)
}

pub fn encode_history(events: &[Event]) -> String {
    to_frame(&Envelope::History { messages: events })
}

pub fn encode_error(message: &str) -> String {
    to_frame(&Envelope::Error { message })
}

fn to_frame<T: Serialize>(value: &T) -> String {
    // only string keys and infallible field serializers reach here
    serde_json::to_string(value).unwrap_or_default()
}

/// Formats a timestamp as ISO-8601 UTC with millisecond precision,
/// e.g. `2024-05-01T12:00:00.123Z`.
pub fn format_timestamp(ts: OffsetDateTime) -> String {
    let format = format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
    );
    ts.to_offset(time::UtcOffset::UTC)
        .format(format)
        .unwrap_or_default()
}

pub fn parse_timestamp(s: &str) -> Result<OffsetDateTime, time::error::Parse> {
    OffsetDateTime::parse(s, &Rfc3339)
}

fn serialize_timestamp<S: Serializer>(ts: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_timestamp(*ts))
}
