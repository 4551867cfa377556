//! Canonical capture events and the envelope subscribers receive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::StreamId;

/// Discriminant of a canonical [`Event`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Comment,
    Gift,
    Like,
    Join,
    ViewerCount,
    Follow,
    Share,
    Social,
    Control,
    StreamEnded,
    RoomInfo,
    Connected,
    Disconnected,
    ConnectionFailed,
    Unknown,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Comment => "comment",
            Self::Gift => "gift",
            Self::Like => "like",
            Self::Join => "join",
            Self::ViewerCount => "viewer_count",
            Self::Follow => "follow",
            Self::Share => "share",
            Self::Social => "social",
            Self::Control => "control",
            Self::StreamEnded => "stream_ended",
            Self::RoomInfo => "room_info",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::ConnectionFailed => "connection_failed",
            Self::Unknown => "unknown",
        }
    }

    /// Events describing the connection itself rather than broadcast content.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::Connected | Self::Disconnected | Self::ConnectionFailed | Self::StreamEnded
        )
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The viewer an event is attributed to, when the provider names one.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventUser {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
}

impl EventUser {
    pub fn is_empty(&self) -> bool {
        self.user_id.is_none() && self.username.is_none() && self.nickname.is_none()
    }

    fn display_name(&self) -> &str {
        self.nickname
            .as_deref()
            .or(self.username.as_deref())
            .or(self.user_id.as_deref())
            .unwrap_or("someone")
    }
}

/// Kind-specific event fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    Comment {
        comment: String,
    },
    Gift {
        gift_id: Option<i64>,
        gift_name: Option<String>,
        diamond_count: i64,
        repeat_count: i64,
        repeat_end: bool,
    },
    Like {
        count: i64,
        total_count: Option<i64>,
    },
    Join,
    ViewerCount {
        viewer_count: i64,
        like_count: Option<i64>,
        title: Option<String>,
    },
    Follow,
    Share,
    Social {
        display_type: Option<String>,
    },
    Control {
        action: i64,
    },
    StreamEnded {
        action: Option<i64>,
    },
    RoomInfo {
        viewer_count: Option<i64>,
        like_count: Option<i64>,
        title: Option<String>,
    },
    Connected,
    Disconnected {
        reason: Option<String>,
    },
    ConnectionFailed {
        attempts: u32,
    },
    Unknown {
        discriminator: String,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Comment { .. } => EventKind::Comment,
            Self::Gift { .. } => EventKind::Gift,
            Self::Like { .. } => EventKind::Like,
            Self::Join => EventKind::Join,
            Self::ViewerCount { .. } => EventKind::ViewerCount,
            Self::Follow => EventKind::Follow,
            Self::Share => EventKind::Share,
            Self::Social { .. } => EventKind::Social,
            Self::Control { .. } => EventKind::Control,
            Self::StreamEnded { .. } => EventKind::StreamEnded,
            Self::RoomInfo { .. } => EventKind::RoomInfo,
            Self::Connected => EventKind::Connected,
            Self::Disconnected { .. } => EventKind::Disconnected,
            Self::ConnectionFailed { .. } => EventKind::ConnectionFailed,
            Self::Unknown { .. } => EventKind::Unknown,
        }
    }
}

/// Canonical event produced once per inbound provider message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(flatten)]
    pub payload: EventPayload,
    #[serde(flatten)]
    pub user: EventUser,
    pub timestamp: DateTime<Utc>,
    /// Original decoded payload, kept for provider fields this model doesn't name.
    #[serde(default)]
    pub raw: Value,
}

impl Event {
    pub fn new(payload: EventPayload, timestamp: DateTime<Utc>) -> Self {
        Self {
            payload,
            user: EventUser::default(),
            timestamp,
            raw: Value::Null,
        }
    }

    /// A connection lifecycle event stamped with the current time.
    pub fn lifecycle(payload: EventPayload) -> Self {
        Self::new(payload, Utc::now())
    }

    pub fn with_user(mut self, user: EventUser) -> Self {
        self.user = user;
        self
    }

    pub fn with_raw(mut self, raw: Value) -> Self {
        self.raw = raw;
        self
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// One-line human-readable rendering.
    pub fn summary(&self) -> String {
        let who = self.user.display_name();
        match &self.payload {
            EventPayload::Comment { comment } => format!("{who}: {comment}"),
            EventPayload::Gift {
                gift_name,
                diamond_count,
                repeat_count,
                repeat_end,
                ..
            } => {
                let name = gift_name.as_deref().unwrap_or("a gift");
                let streak = if *repeat_end { "" } else { " (streak)" };
                format!("{who} sent {name} x{repeat_count} ({diamond_count} diamonds){streak}")
            }
            EventPayload::Like { count, total_count } => match total_count {
                Some(total) => format!("{who} liked x{count} (total {total})"),
                None => format!("{who} liked x{count}"),
            },
            EventPayload::Join => format!("{who} joined"),
            EventPayload::ViewerCount { viewer_count, .. } => format!("{viewer_count} viewers"),
            EventPayload::Follow => format!("{who} followed"),
            EventPayload::Share => format!("{who} shared the stream"),
            EventPayload::Social { display_type } => format!(
                "{who} social ({})",
                display_type.as_deref().unwrap_or("unspecified")
            ),
            EventPayload::Control { action } => format!("control action {action}"),
            EventPayload::StreamEnded { .. } => "stream ended".to_owned(),
            EventPayload::RoomInfo {
                viewer_count,
                title,
                ..
            } => format!(
                "room '{}' ({} viewers)",
                title.as_deref().unwrap_or("untitled"),
                viewer_count.unwrap_or(0)
            ),
            EventPayload::Connected => "connected".to_owned(),
            EventPayload::Disconnected { reason } => match reason {
                Some(reason) => format!("disconnected: {reason}"),
                None => "disconnected".to_owned(),
            },
            EventPayload::ConnectionFailed { attempts } => {
                format!("connection failed after {attempts} reconnect attempts")
            }
            EventPayload::Unknown { discriminator } => {
                format!("unrecognized event '{discriminator}'")
            }
        }
    }
}

/// What subscribers of a stream's channel receive.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub stream_id: StreamId,
    pub event: Event,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn user(nick: &str) -> EventUser {
        EventUser {
            user_id: Some("1".into()),
            username: Some("handle".into()),
            nickname: Some(nick.into()),
        }
    }

    #[test]
    fn kind_strings_are_snake_case() {
        assert_eq!(EventKind::ViewerCount.as_str(), "viewer_count");
        assert_eq!(EventKind::StreamEnded.to_string(), "stream_ended");
        assert_eq!(EventKind::ConnectionFailed.as_str(), "connection_failed");
    }

    #[test]
    fn lifecycle_kinds() {
        assert!(EventKind::Connected.is_lifecycle());
        assert!(EventKind::StreamEnded.is_lifecycle());
        assert!(!EventKind::Comment.is_lifecycle());
        assert!(!EventKind::Unknown.is_lifecycle());
    }

    #[test]
    fn payload_kind_matches_variant() {
        assert_eq!(EventPayload::Join.kind(), EventKind::Join);
        assert_eq!(
            EventPayload::Control { action: 1 }.kind(),
            EventKind::Control
        );
        assert_eq!(
            EventPayload::Unknown {
                discriminator: "x".into()
            }
            .kind(),
            EventKind::Unknown
        );
    }

    #[test]
    fn serializes_flat_with_kind_tag() {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let event = Event::new(
            EventPayload::Comment {
                comment: "hello".into(),
            },
            ts,
        )
        .with_user(user("Nick"));

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "comment");
        assert_eq!(json["comment"], "hello");
        assert_eq!(json["nickname"], "Nick");
        assert_eq!(json["timestamp"], "2023-11-14T22:13:20Z");
    }

    #[test]
    fn anonymous_user_fields_are_omitted() {
        let json = serde_json::to_value(Event::lifecycle(EventPayload::Connected)).unwrap();
        assert_eq!(json["kind"], "connected");
        assert!(json.get("user_id").is_none());
        assert!(json.get("nickname").is_none());
    }

    #[test]
    fn envelope_shape() {
        let envelope = Envelope {
            stream_id: StreamId::from_raw("s1"),
            event: Event::lifecycle(EventPayload::Connected),
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["stream_id"], "s1");
        assert_eq!(json["event"]["kind"], "connected");
    }

    #[test]
    fn gift_summary() {
        let event = Event::lifecycle(EventPayload::Gift {
            gift_id: Some(5655),
            gift_name: Some("Rose".into()),
            diamond_count: 1,
            repeat_count: 3,
            repeat_end: true,
        })
        .with_user(user("Ann"));
        assert_eq!(event.summary(), "Ann sent Rose x3 (1 diamonds)");
    }

    #[test]
    fn summary_falls_back_to_username() {
        let event = Event::lifecycle(EventPayload::Join).with_user(EventUser {
            user_id: None,
            username: Some("handle".into()),
            nickname: None,
        });
        assert_eq!(event.summary(), "handle joined");
    }

    #[test]
    fn summary_for_anonymous_like() {
        let event = Event::lifecycle(EventPayload::Like {
            count: 5,
            total_count: None,
        });
        assert_eq!(event.summary(), "someone liked x5");
    }

    #[test]
    fn connection_failed_summary() {
        let event = Event::lifecycle(EventPayload::ConnectionFailed { attempts: 5 });
        assert!(event.summary().contains("5 reconnect attempts"));
    }
}
