//! Provider payload → canonical [`Event`] mapping.

use chrono::Utc;
use serde_json::Value;

use livecap_core::{Event, EventPayload, EventUser};

use crate::frame::{Decoded, DecodedPayload};
use crate::timestamp::normalize_timestamp;

/// Control action code announcing the end of the broadcast.
pub const STREAM_END_ACTION: i64 = 3;

/// Discriminators that acknowledge or keep the socket alive; they carry no event.
const NON_ACTIONABLE: &[&str] = &["ack", "pong", "heartbeat"];

/// Map one decoded payload to an event.
///
/// Returns `None` for payloads without a discriminator and for acknowledgement/heartbeat
/// traffic. Unrecognized discriminators become [`EventPayload::Unknown`] with the raw payload
/// preserved.
pub fn normalize(payload: &DecodedPayload) -> Option<Event> {
    let discriminator = payload.discriminator.as_deref()?;
    if NON_ACTIONABLE.contains(&discriminator) {
        return None;
    }
    let data = &payload.data;

    let kind_payload = match discriminator {
        "chat" => EventPayload::Comment {
            comment: str_field(data, "comment").unwrap_or_default(),
        },
        "gift" => EventPayload::Gift {
            gift_id: int_field(data, "giftId"),
            gift_name: str_field(data, "giftName"),
            diamond_count: int_field(data, "diamondCount").unwrap_or(0),
            repeat_count: int_field(data, "repeatCount").unwrap_or(1),
            repeat_end: bool_field(data, "repeatEnd").unwrap_or(true),
        },
        "like" => EventPayload::Like {
            count: int_field(data, "likeCount").unwrap_or(1),
            total_count: int_field(data, "totalLikeCount"),
        },
        "member" => EventPayload::Join,
        "roomUser" => EventPayload::ViewerCount {
            viewer_count: int_field(data, "viewerCount").unwrap_or(0),
            like_count: int_field(data, "likeCount"),
            title: str_field(data, "title"),
        },
        "social" => social_payload(str_field(data, "displayType")),
        "follow" => EventPayload::Follow,
        "share" => EventPayload::Share,
        "control" => {
            let action = int_field(data, "action").unwrap_or(0);
            if action == STREAM_END_ACTION {
                EventPayload::StreamEnded {
                    action: Some(action),
                }
            } else {
                EventPayload::Control { action }
            }
        }
        "streamEnd" => EventPayload::StreamEnded {
            action: int_field(data, "action"),
        },
        "roomInfo" => EventPayload::RoomInfo {
            viewer_count: int_field(data, "viewerCount"),
            like_count: int_field(data, "likeCount"),
            title: str_field(data, "title"),
        },
        "connected" => EventPayload::Connected,
        "disconnected" => EventPayload::Disconnected {
            reason: str_field(data, "reason"),
        },
        other => {
            return Some(
                Event::new(
                    EventPayload::Unknown {
                        discriminator: other.to_owned(),
                    },
                    Utc::now(),
                )
                .with_raw(payload.raw.clone()),
            );
        }
    };

    let timestamp = normalize_timestamp(data.get("createTime").or_else(|| data.get("timestamp")));
    Some(
        Event::new(kind_payload, timestamp)
            .with_user(extract_user(data))
            .with_raw(payload.raw.clone()),
    )
}

/// Normalize every payload of a decoded frame, dropping non-actionable ones.
pub fn normalize_all(decoded: Decoded) -> Vec<Event> {
    decoded
        .into_payloads()
        .iter()
        .filter_map(normalize)
        .collect()
}

/// Only the exact display types `follow` and `share` are promoted; anything else stays social.
fn social_payload(display_type: Option<String>) -> EventPayload {
    match display_type.as_deref() {
        Some("follow") => EventPayload::Follow,
        Some("share") => EventPayload::Share,
        _ => EventPayload::Social { display_type },
    }
}

/// User fields live on `data` directly or on a nested `data.user` object.
fn extract_user(data: &Value) -> EventUser {
    let nested = data.get("user").filter(|u| u.is_object());
    let pick = |key: &str| str_field(data, key).or_else(|| nested.and_then(|u| str_field(u, key)));
    EventUser {
        user_id: pick("userId"),
        username: pick("uniqueId"),
        nickname: pick("nickname"),
    }
}

/// Strings, plus numbers rendered as strings (user ids arrive both ways).
fn str_field(data: &Value, key: &str) -> Option<String> {
    match data.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn int_field(data: &Value, key: &str) -> Option<i64> {
    match data.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn bool_field(data: &Value, key: &str) -> Option<bool> {
    match data.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{decode_text, FrameSource};
    use livecap_core::EventKind;
    use serde_json::json;

    fn text(event: &str, data: Value) -> DecodedPayload {
        DecodedPayload {
            discriminator: Some(event.to_owned()),
            raw: json!({ "event": event, "data": data }),
            data,
            source: FrameSource::Text,
        }
    }

    fn kind_of(event: &str, data: Value) -> Option<EventKind> {
        normalize(&text(event, data)).map(|e| e.kind())
    }

    #[test]
    fn discriminator_table() {
        let cases = [
            ("chat", EventKind::Comment),
            ("gift", EventKind::Gift),
            ("like", EventKind::Like),
            ("member", EventKind::Join),
            ("roomUser", EventKind::ViewerCount),
            ("social", EventKind::Social),
            ("follow", EventKind::Follow),
            ("share", EventKind::Share),
            ("control", EventKind::Control),
            ("streamEnd", EventKind::StreamEnded),
            ("roomInfo", EventKind::RoomInfo),
            ("connected", EventKind::Connected),
            ("disconnected", EventKind::Disconnected),
            ("emote", EventKind::Unknown),
        ];
        for (event, expected) in cases {
            assert_eq!(kind_of(event, json!({})), Some(expected), "{event}");
        }
    }

    #[test]
    fn non_actionable_payloads_yield_none() {
        for event in ["ack", "pong", "heartbeat"] {
            assert_eq!(kind_of(event, json!({})), None, "{event}");
        }
        let missing = decode_text(r#"{"data":{"comment":"x"}}"#).unwrap();
        assert!(normalize_all(missing).is_empty());
    }

    #[test]
    fn social_display_type_mapping() {
        let cases = [
            ("follow", EventKind::Follow),
            ("share", EventKind::Share),
            ("unfollow", EventKind::Social),
            ("pm_main_follow_message_viewer_2", EventKind::Social),
            ("pm_mt_guidance_share", EventKind::Social),
            ("FOLLOW", EventKind::Social),
            ("pm_mt_guidance_viewer_join", EventKind::Social),
        ];
        for (display_type, expected) in cases {
            assert_eq!(
                kind_of("social", json!({ "displayType": display_type })),
                Some(expected),
                "{display_type}"
            );
        }

        let event = normalize(&text("social", json!({ "displayType": "pm_other" }))).unwrap();
        assert_eq!(
            event.payload,
            EventPayload::Social {
                display_type: Some("pm_other".into())
            }
        );
    }

    #[test]
    fn control_action_three_ends_stream() {
        let ended = normalize(&text("control", json!({ "action": 3 }))).unwrap();
        assert_eq!(ended.payload, EventPayload::StreamEnded { action: Some(3) });

        let other = normalize(&text("control", json!({ "action": "4" }))).unwrap();
        assert_eq!(other.payload, EventPayload::Control { action: 4 });
    }

    #[test]
    fn gift_fields_and_user() {
        let event = normalize(&text(
            "gift",
            json!({
                "userId": 42,
                "uniqueId": "ann",
                "nickname": "Ann",
                "giftId": 5655,
                "giftName": "Rose",
                "diamondCount": 1,
                "repeatCount": 3,
                "repeatEnd": 0,
                "createTime": "1700000000000"
            }),
        ))
        .unwrap();

        assert_eq!(
            event.payload,
            EventPayload::Gift {
                gift_id: Some(5655),
                gift_name: Some("Rose".into()),
                diamond_count: 1,
                repeat_count: 3,
                repeat_end: false,
            }
        );
        assert_eq!(event.user.user_id.as_deref(), Some("42"));
        assert_eq!(event.user.username.as_deref(), Some("ann"));
        assert_eq!(event.timestamp.timestamp(), 1_700_000_000);
        assert_eq!(event.raw["data"]["giftName"], "Rose");
    }

    #[test]
    fn nested_user_object_is_read() {
        let event = normalize(&text(
            "chat",
            json!({ "comment": "hi", "user": { "uniqueId": "bob", "nickname": "Bob" } }),
        ))
        .unwrap();
        assert_eq!(event.user.nickname.as_deref(), Some("Bob"));
        assert_eq!(event.summary(), "Bob: hi");
    }

    #[test]
    fn viewer_and_room_counts() {
        let viewers = normalize(&text("roomUser", json!({ "viewerCount": 812 }))).unwrap();
        assert_eq!(
            viewers.payload,
            EventPayload::ViewerCount {
                viewer_count: 812,
                like_count: None,
                title: None
            }
        );

        let room = normalize(&text(
            "roomInfo",
            json!({ "viewerCount": 10, "likeCount": 99, "title": "Live!" }),
        ))
        .unwrap();
        assert_eq!(
            room.payload,
            EventPayload::RoomInfo {
                viewer_count: Some(10),
                like_count: Some(99),
                title: Some("Live!".into())
            }
        );
    }

    #[test]
    fn unknown_keeps_raw_and_uses_wall_clock() {
        let payload = text("emote", json!({ "createTime": 1 }));
        let event = normalize(&payload).unwrap();
        assert_eq!(
            event.payload,
            EventPayload::Unknown {
                discriminator: "emote".into()
            }
        );
        assert_eq!(event.raw, payload.raw);
        assert!((Utc::now() - event.timestamp).num_seconds().abs() < 5);
    }

    #[test]
    fn seconds_and_millis_create_times_agree() {
        let a = normalize(&text("like", json!({ "createTime": 1_700_000_000 }))).unwrap();
        let b = normalize(&text("like", json!({ "createTime": 1_700_000_000_000_i64 }))).unwrap();
        assert_eq!(a.timestamp, b.timestamp);
    }
}
