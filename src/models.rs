//! Core data structures shared by the scheduler, the control surface and the
//! channel adapters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a chat, group or user on the messaging network.
///
/// Group ids are frequently negative, so this stays a signed integer.
pub type PeerId = i64;

/// Kind of a forwardable unit in the source pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    #[default]
    Text,
    Media,
}

/// A forwardable message taken from the source pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Source-relative message id
    pub id: i64,

    #[serde(default)]
    pub kind: ContentKind,

    /// Text body (or caption for media)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ContentItem {
    /// Create a text item
    pub fn text(id: i64, text: impl Into<String>) -> Self {
        Self {
            id,
            kind: ContentKind::Text,
            text: Some(text.into()),
        }
    }

    /// Create a media item without caption
    pub fn media(id: i64) -> Self {
        Self {
            id,
            kind: ContentKind::Media,
            text: None,
        }
    }

    /// Whether the item carries anything worth forwarding
    pub fn is_forwardable(&self) -> bool {
        match self.kind {
            ContentKind::Media => true,
            ContentKind::Text => self.text.as_deref().is_some_and(|t| !t.trim().is_empty()),
        }
    }
}

/// How the next item is chosen from the pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMode {
    #[default]
    Random,
    #[serde(alias = "order")]
    Sequential,
}

impl SelectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Random => "random",
            Self::Sequential => "sequential",
        }
    }

    /// Parse a user-facing mode name (`order` is accepted for sequential)
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "random" => Some(Self::Random),
            "order" | "sequential" => Some(Self::Sequential),
            _ => None,
        }
    }
}

impl fmt::Display for SelectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One successful delivery in the activity log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub destination: PeerId,
    pub item_id: i64,
}

impl LogEntry {
    pub fn new(timestamp: DateTime<Utc>, destination: PeerId, item_id: i64) -> Self {
        Self {
            timestamp,
            destination,
            item_id,
        }
    }
}

/// Where a control message was written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum Origin {
    /// Direct message to the service account
    Private,
    /// Message posted inside a group
    Group(PeerId),
}

impl Origin {
    pub fn is_private(&self) -> bool {
        matches!(self, Self::Private)
    }
}

/// A raw administrative message delivered by a control channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRequest {
    /// Correlation id used to route the reply back to the caller
    pub id: Uuid,
    pub issuer: PeerId,
    pub origin: Origin,
    pub text: String,
}

impl ControlRequest {
    pub fn new(issuer: PeerId, origin: Origin, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            issuer,
            origin,
            text: text.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwardable_items() {
        assert!(ContentItem::text(1, "hello").is_forwardable());
        assert!(ContentItem::media(2).is_forwardable());
        assert!(!ContentItem::text(3, "   ").is_forwardable());
        let empty = ContentItem {
            id: 4,
            kind: ContentKind::Text,
            text: None,
        };
        assert!(!empty.is_forwardable());
    }

    #[test]
    fn test_selection_mode_parse() {
        assert_eq!(SelectionMode::parse("random"), Some(SelectionMode::Random));
        assert_eq!(SelectionMode::parse("ORDER"), Some(SelectionMode::Sequential));
        assert_eq!(
            SelectionMode::parse("sequential"),
            Some(SelectionMode::Sequential)
        );
        assert_eq!(SelectionMode::parse("shuffle"), None);
    }

    #[test]
    fn test_selection_mode_accepts_legacy_name() {
        let mode: SelectionMode = serde_json::from_str("\"order\"").unwrap();
        assert_eq!(mode, SelectionMode::Sequential);
        assert_eq!(serde_json::to_string(&mode).unwrap(), "\"sequential\"");
    }

    #[test]
    fn test_origin_serialization() {
        let json = serde_json::to_value(Origin::Group(-100)).unwrap();
        assert_eq!(json, serde_json::json!({"type": "group", "id": -100}));
        let private: Origin = serde_json::from_value(serde_json::json!({"type": "private"})).unwrap();
        assert!(private.is_private());
    }
}
