// Envelope types and the JSON codec for peer messages

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub const CONTENT_TYPE_TEXT: &str = "text";
pub const CONTENT_TYPE_RECEIPT: &str = "receipt";
pub const CONTENT_TYPE_READ: &str = "read";
pub const CONTENT_TYPE_CONTACT: &str = "contact";

/// Profile request type asking for name and avatar
pub const PROFILE_FULL: &str = "full";

/// A decoded envelope
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Unique message ID
    pub id: String,
    /// Content, tagged by content type
    pub body: Body,
    /// Milliseconds since the Unix epoch
    pub timestamp: Option<i64>,
    pub topic: Option<String>,
    pub group_id: Option<String>,
    pub options: Option<Map<String, Value>>,
}

/// Envelope content keyed by the wire `contentType`
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Text { content: String },
    Receipt { target_id: String },
    Read { read_ids: Vec<String> },
    Contact(ContactProfile),
    /// Media and every other content type; accepted but never processed
    Other {
        content_type: String,
        content: Option<Value>,
    },
}

impl Body {
    /// Wire name of the content type
    pub fn content_type(&self) -> &str {
        match self {
            Body::Text { .. } => CONTENT_TYPE_TEXT,
            Body::Receipt { .. } => CONTENT_TYPE_RECEIPT,
            Body::Read { .. } => CONTENT_TYPE_READ,
            Body::Contact(_) => CONTENT_TYPE_CONTACT,
            Body::Other { content_type, .. } => content_type,
        }
    }
}

/// Contact profile request or response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContactProfile {
    pub request_type: Option<String>,
    pub response_type: Option<String>,
    pub version: Option<String>,
    pub content: Option<ProfileContent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileContent {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<Avatar>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Avatar {
    /// Always "base64"
    #[serde(rename = "type")]
    pub encoding: String,
    pub data: String,
    pub ext: String,
}

impl Envelope {
    /// Create an envelope with a fresh ID and the current timestamp
    pub fn new(body: Body) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            body,
            timestamp: Some(now_millis()),
            topic: None,
            group_id: None,
            options: None,
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::new(Body::Text {
            content: content.into(),
        })
    }

    /// Delivery acknowledgment for `target_id`
    pub fn receipt(target_id: impl Into<String>) -> Self {
        Self::new(Body::Receipt {
            target_id: target_id.into(),
        })
    }

    /// Read acknowledgment for `read_ids`
    pub fn read(read_ids: Vec<String>) -> Self {
        Self::new(Body::Read { read_ids })
    }

    pub fn contact(profile: ContactProfile) -> Self {
        Self::new(Body::Contact(profile))
    }

    pub fn content_type(&self) -> &str {
        self.body.content_type()
    }

    /// Receipts and read acknowledgments are pure control traffic
    pub fn is_acknowledgment(&self) -> bool {
        matches!(self.body, Body::Receipt { .. } | Body::Read { .. })
    }

    /// Whether the envelope is addressed to a topic or a group
    pub fn is_group(&self) -> bool {
        let non_empty = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
        non_empty(&self.topic) || non_empty(&self.group_id)
    }
}

/// Current time in milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as i64
}

/// Flat wire shape shared by every content type.
///
/// Only `id`, `contentType` and the body fields decide whether an envelope is
/// valid. Other headers are read leniently and dropped if they have an
/// unexpected shape.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct WireEnvelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<Value>,
    #[serde(
        rename = "targetID",
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_string"
    )]
    target_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient_ids")]
    read_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient_string")]
    request_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient_string")]
    response_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient_string")]
    version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient_millis")]
    timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient_string")]
    topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient_string")]
    group_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient_object")]
    options: Option<Map<String, Value>>,
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_millis<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_ids<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<String>>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        _ => None,
    })
}

fn lenient_object<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<Option<Map<String, Value>>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Object(map)) => Some(map),
        _ => None,
    })
}

impl TryFrom<WireEnvelope> for Envelope {
    type Error = &'static str;

    fn try_from(wire: WireEnvelope) -> Result<Self, Self::Error> {
        let id = wire.id.filter(|id| !id.is_empty()).ok_or("missing id")?;
        let content_type = wire
            .content_type
            .filter(|ct| !ct.is_empty())
            .ok_or("missing contentType")?;

        let body = match content_type.as_str() {
            CONTENT_TYPE_TEXT => match wire.content {
                Some(Value::String(content)) => Body::Text { content },
                _ => return Err("text envelope without string content"),
            },
            CONTENT_TYPE_RECEIPT => Body::Receipt {
                target_id: wire.target_id.ok_or("receipt without targetID")?,
            },
            CONTENT_TYPE_READ => Body::Read {
                read_ids: wire.read_ids.ok_or("read without readIds")?,
            },
            CONTENT_TYPE_CONTACT => Body::Contact(ContactProfile {
                request_type: wire.request_type,
                response_type: wire.response_type,
                version: wire.version,
                // Requests may carry arbitrary content; only a profile shape is kept
                content: wire
                    .content
                    .and_then(|value| serde_json::from_value(value).ok()),
            }),
            _ => Body::Other {
                content_type,
                content: wire.content,
            },
        };

        Ok(Self {
            id,
            body,
            timestamp: wire.timestamp,
            topic: wire.topic,
            group_id: wire.group_id,
            options: wire.options,
        })
    }
}

impl From<&Envelope> for WireEnvelope {
    fn from(envelope: &Envelope) -> Self {
        let mut wire = WireEnvelope {
            id: Some(envelope.id.clone()),
            content_type: Some(envelope.content_type().to_string()),
            timestamp: envelope.timestamp,
            topic: envelope.topic.clone(),
            group_id: envelope.group_id.clone(),
            options: envelope.options.clone(),
            ..Default::default()
        };

        match &envelope.body {
            Body::Text { content } => wire.content = Some(Value::String(content.clone())),
            Body::Receipt { target_id } => wire.target_id = Some(target_id.clone()),
            Body::Read { read_ids } => wire.read_ids = Some(read_ids.clone()),
            Body::Contact(profile) => {
                wire.request_type = profile.request_type.clone();
                wire.response_type = profile.response_type.clone();
                wire.version = profile.version.clone();
                wire.content = profile
                    .content
                    .as_ref()
                    .and_then(|content| serde_json::to_value(content).ok());
            }
            Body::Other { content, .. } => wire.content = content.clone(),
        }

        wire
    }
}

/// Decode a raw text payload.
///
/// Returns `None` for anything that is not a well-formed envelope. Malformed
/// input is never reported back to the sender.
pub fn decode(raw: &str) -> Option<Envelope> {
    let wire: WireEnvelope = match serde_json::from_str(raw) {
        Ok(wire) => wire,
        Err(e) => {
            tracing::debug!("Failed to parse envelope: {}", e);
            return None;
        }
    };

    match Envelope::try_from(wire) {
        Ok(envelope) => Some(envelope),
        Err(reason) => {
            tracing::debug!("Invalid envelope ({}): {}", reason, raw);
            None
        }
    }
}

/// Encode an envelope to its wire form, or an empty string on failure
pub fn encode(envelope: &Envelope) -> String {
    match serde_json::to_string(&WireEnvelope::from(envelope)) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!("Failed to serialize envelope {}: {}", envelope.id, e);
            String::new()
        }
    }
}
