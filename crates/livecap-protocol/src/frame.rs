//! Inbound frame decoding.
//!
//! Text frames are JSON `{"event": "<discriminator>", "data": {...}}`. Binary frames are a
//! protobuf [`PushFrame`] whose `msg` payload is a batch of typed sub-messages. Both shapes
//! decode to [`DecodedPayload`]s using the same discriminators and camelCase field names, so
//! the normalizer sees one vocabulary.

use std::io::Read;

use flate2::read::GzDecoder;
use prost::Message as _;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::proto::{
    ChatMessage, Common, ControlMessage, GiftMessage, LikeMessage, MemberMessage, PushFrame,
    RoomMessage, RoomUserSeqMessage, SocialMessage, User, WebcastResponse,
};

/// Upper bound on an inflated push-frame payload.
pub const MAX_INFLATED_BYTES: u64 = 16 * 1024 * 1024;

/// Errors decoding a single inbound frame. Never fatal to the connection.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid JSON frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid protobuf frame: {0}")]
    Protobuf(#[from] prost::DecodeError),
    #[error("failed to inflate payload: {0}")]
    Inflate(#[from] std::io::Error),
    #[error("inflated payload exceeds size limit")]
    TooLarge,
    #[error("unsupported payload encoding: {0}")]
    UnsupportedEncoding(String),
}

impl DecodeError {
    /// Re-decoding the same bytes gives the same answer.
    pub fn is_retryable(&self) -> bool {
        false
    }

    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Json(_) => "json",
            Self::Protobuf(_) => "protobuf",
            Self::Inflate(_) => "inflate",
            Self::TooLarge => "too_large",
            Self::UnsupportedEncoding(_) => "unsupported_encoding",
        }
    }
}

/// Which wire shape a payload came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameSource {
    Text,
    Binary,
}

/// A provider-shaped message, prior to normalization.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedPayload {
    /// The `event` discriminator, if the message carried one.
    pub discriminator: Option<String>,
    /// The `data` object; empty when absent.
    pub data: Value,
    /// Whole decoded message as received.
    pub raw: Value,
    pub source: FrameSource,
}

impl DecodedPayload {
    fn binary(discriminator: &str, data: Value) -> Self {
        let raw = json!({ "event": discriminator, "data": data });
        Self {
            discriminator: Some(discriminator.to_owned()),
            data,
            raw,
            source: FrameSource::Binary,
        }
    }
}

/// Result of decoding one frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Decoded {
    Single(DecodedPayload),
    Batch(Vec<DecodedPayload>),
}

impl Decoded {
    pub fn into_payloads(self) -> Vec<DecodedPayload> {
        match self {
            Self::Single(payload) => vec![payload],
            Self::Batch(payloads) => payloads,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Batch(payloads) => payloads.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decode a text frame.
pub fn decode_text(text: &str) -> Result<Decoded, DecodeError> {
    let raw: Value = serde_json::from_str(text)?;
    let discriminator = raw
        .get("event")
        .and_then(Value::as_str)
        .map(str::to_owned);
    let data = match raw.get("data") {
        Some(data @ Value::Object(_)) => data.clone(),
        _ => Value::Object(Map::new()),
    };
    Ok(Decoded::Single(DecodedPayload {
        discriminator,
        data,
        raw,
        source: FrameSource::Text,
    }))
}

/// Decode a binary push frame.
///
/// Sub-messages with an unknown `method` or an undecodable body are skipped; the rest of the
/// batch is still returned.
pub fn decode_binary(bytes: &[u8]) -> Result<Decoded, DecodeError> {
    let frame = PushFrame::decode(bytes)?;
    if frame.payload_type != "msg" {
        tracing::trace!(payload_type = %frame.payload_type, seq_id = frame.seq_id, "non-message push frame");
        return Ok(Decoded::Batch(Vec::new()));
    }

    let payload = match frame.payload_encoding.as_str() {
        "gzip" => inflate(&frame.payload)?,
        "" | "pb" | "none" | "identity" => frame.payload,
        other => return Err(DecodeError::UnsupportedEncoding(other.to_owned())),
    };

    let response = WebcastResponse::decode(payload.as_slice())?;
    let payloads = response
        .messages
        .iter()
        .filter_map(|message| match decode_sub_message(&message.method, &message.payload) {
            Ok(Some(payload)) => Some(payload),
            Ok(None) => {
                tracing::trace!(method = %message.method, "skipping unhandled sub-message");
                None
            }
            Err(e) => {
                tracing::trace!(method = %message.method, error = %e, "skipping undecodable sub-message");
                None
            }
        })
        .collect();
    Ok(Decoded::Batch(payloads))
}

fn inflate(compressed: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::new();
    let _ = GzDecoder::new(compressed)
        .take(MAX_INFLATED_BYTES + 1)
        .read_to_end(&mut out)?;
    if out.len() as u64 > MAX_INFLATED_BYTES {
        return Err(DecodeError::TooLarge);
    }
    Ok(out)
}

fn decode_sub_message(method: &str, body: &[u8]) -> Result<Option<DecodedPayload>, DecodeError> {
    let payload = match method {
        "WebcastChatMessage" => {
            let msg = ChatMessage::decode(body)?;
            let mut data = base_data(msg.common.as_ref(), msg.user.as_ref());
            let _ = data.insert("comment".into(), json!(msg.content));
            DecodedPayload::binary("chat", Value::Object(data))
        }
        "WebcastGiftMessage" => {
            let msg = GiftMessage::decode(body)?;
            let mut data = base_data(msg.common.as_ref(), msg.user.as_ref());
            let _ = data.insert("giftId".into(), json!(msg.gift_id));
            let _ = data.insert("repeatCount".into(), json!(msg.repeat_count));
            let _ = data.insert("repeatEnd".into(), json!(msg.repeat_end));
            if let Some(gift) = &msg.gift {
                let _ = data.insert("giftName".into(), json!(gift.name));
                let _ = data.insert("diamondCount".into(), json!(gift.diamond_count));
            }
            DecodedPayload::binary("gift", Value::Object(data))
        }
        "WebcastLikeMessage" => {
            let msg = LikeMessage::decode(body)?;
            let mut data = base_data(msg.common.as_ref(), msg.user.as_ref());
            let _ = data.insert("likeCount".into(), json!(msg.count));
            let _ = data.insert("totalLikeCount".into(), json!(msg.total));
            DecodedPayload::binary("like", Value::Object(data))
        }
        "WebcastMemberMessage" => {
            let msg = MemberMessage::decode(body)?;
            let mut data = base_data(msg.common.as_ref(), msg.user.as_ref());
            let _ = data.insert("action".into(), json!(msg.action));
            DecodedPayload::binary("member", Value::Object(data))
        }
        "WebcastRoomUserSeqMessage" => {
            let msg = RoomUserSeqMessage::decode(body)?;
            let mut data = base_data(msg.common.as_ref(), None);
            let _ = data.insert("viewerCount".into(), json!(msg.total));
            DecodedPayload::binary("roomUser", Value::Object(data))
        }
        "WebcastSocialMessage" => {
            let msg = SocialMessage::decode(body)?;
            let mut data = base_data(msg.common.as_ref(), msg.user.as_ref());
            let _ = data.insert("action".into(), json!(msg.action));
            if !msg.display_type.is_empty() {
                let _ = data.insert("displayType".into(), json!(msg.display_type));
            }
            DecodedPayload::binary("social", Value::Object(data))
        }
        "WebcastControlMessage" => {
            let msg = ControlMessage::decode(body)?;
            let mut data = base_data(msg.common.as_ref(), None);
            let _ = data.insert("action".into(), json!(msg.action));
            DecodedPayload::binary("control", Value::Object(data))
        }
        "WebcastRoomMessage" => {
            let msg = RoomMessage::decode(body)?;
            let mut data = base_data(msg.common.as_ref(), None);
            let _ = data.insert("title".into(), json!(msg.title));
            let _ = data.insert("viewerCount".into(), json!(msg.viewer_count));
            let _ = data.insert("likeCount".into(), json!(msg.like_count));
            DecodedPayload::binary("roomInfo", Value::Object(data))
        }
        _ => return Ok(None),
    };
    Ok(Some(payload))
}

/// Fields shared by every sub-message. Zero values are proto3 defaults and left out.
fn base_data(common: Option<&Common>, user: Option<&User>) -> Map<String, Value> {
    let mut data = Map::new();
    if let Some(common) = common {
        if common.create_time != 0 {
            let _ = data.insert("createTime".into(), json!(common.create_time));
        }
    }
    if let Some(user) = user {
        if user.id != 0 {
            let _ = data.insert("userId".into(), json!(user.id.to_string()));
        }
        if !user.unique_id.is_empty() {
            let _ = data.insert("uniqueId".into(), json!(user.unique_id));
        }
        if !user.nickname.is_empty() {
            let _ = data.insert("nickname".into(), json!(user.nickname));
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{GiftDetails, Message};
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn user(id: i64, unique_id: &str, nickname: &str) -> Option<User> {
        Some(User {
            id,
            unique_id: unique_id.into(),
            nickname: nickname.into(),
        })
    }

    fn sub(method: &str, body: Vec<u8>) -> Message {
        Message {
            method: method.into(),
            payload: body,
            msg_id: 0,
        }
    }

    fn push_frame(messages: Vec<Message>, encoding: &str) -> Vec<u8> {
        let batch = WebcastResponse {
            messages,
            ..Default::default()
        }
        .encode_to_vec();
        let payload = if encoding == "gzip" {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&batch).unwrap();
            encoder.finish().unwrap()
        } else {
            batch
        };
        PushFrame {
            seq_id: 7,
            payload_encoding: encoding.into(),
            payload_type: "msg".into(),
            payload,
            ..Default::default()
        }
        .encode_to_vec()
    }

    #[test]
    fn text_frame_decodes_single() {
        let decoded =
            decode_text(r#"{"event":"chat","data":{"comment":"hi","uniqueId":"ann"}}"#).unwrap();
        let Decoded::Single(payload) = decoded else {
            panic!("expected single payload");
        };
        assert_eq!(payload.discriminator.as_deref(), Some("chat"));
        assert_eq!(payload.data["comment"], "hi");
        assert_eq!(payload.raw["event"], "chat");
        assert_eq!(payload.source, FrameSource::Text);
    }

    #[test]
    fn text_frame_without_event_has_no_discriminator() {
        let decoded = decode_text(r#"{"data":{"x":1}}"#).unwrap();
        let payload = decoded.into_payloads().remove(0);
        assert!(payload.discriminator.is_none());
    }

    #[test]
    fn text_frame_missing_data_yields_empty_object() {
        let payload = decode_text(r#"{"event":"connected"}"#)
            .unwrap()
            .into_payloads()
            .remove(0);
        assert_eq!(payload.data, json!({}));
    }

    #[test]
    fn malformed_text_is_json_error() {
        let err = decode_text("{not json").unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
        assert_eq!(err.error_kind(), "json");
        assert!(!err.is_retryable());
    }

    #[test]
    fn binary_batch_decodes_known_messages() {
        let chat = ChatMessage {
            common: Some(Common {
                create_time: 1_700_000_000_000,
                ..Default::default()
            }),
            user: user(42, "ann", "Ann"),
            content: "hello".into(),
        };
        let gift = GiftMessage {
            common: None,
            user: user(43, "bob", "Bob"),
            gift_id: 5655,
            repeat_count: 3,
            repeat_end: true,
            gift: Some(GiftDetails {
                name: "Rose".into(),
                diamond_count: 1,
            }),
        };
        let bytes = push_frame(
            vec![
                sub("WebcastChatMessage", chat.encode_to_vec()),
                sub("WebcastGiftMessage", gift.encode_to_vec()),
            ],
            "pb",
        );

        let Decoded::Batch(payloads) = decode_binary(&bytes).unwrap() else {
            panic!("expected batch");
        };
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0].discriminator.as_deref(), Some("chat"));
        assert_eq!(payloads[0].data["comment"], "hello");
        assert_eq!(payloads[0].data["userId"], "42");
        assert_eq!(payloads[0].data["createTime"], 1_700_000_000_000_i64);
        assert_eq!(payloads[1].data["giftName"], "Rose");
        assert_eq!(payloads[1].data["repeatCount"], 3);
        assert_eq!(payloads[1].source, FrameSource::Binary);
    }

    #[test]
    fn unknown_and_corrupt_sub_messages_are_skipped() {
        let control = ControlMessage {
            common: None,
            action: 3,
        };
        let bytes = push_frame(
            vec![
                sub("WebcastMysteryMessage", vec![1, 2, 3]),
                sub("WebcastLikeMessage", vec![0xff, 0xff, 0xff]),
                sub("WebcastControlMessage", control.encode_to_vec()),
            ],
            "",
        );

        let payloads = decode_binary(&bytes).unwrap().into_payloads();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].discriminator.as_deref(), Some("control"));
        assert_eq!(payloads[0].data["action"], 3);
    }

    #[test]
    fn gzip_payload_is_inflated() {
        let like = LikeMessage {
            common: None,
            user: user(1, "cat", ""),
            count: 5,
            total: 120,
        };
        let bytes = push_frame(vec![sub("WebcastLikeMessage", like.encode_to_vec())], "gzip");

        let payloads = decode_binary(&bytes).unwrap().into_payloads();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].data["likeCount"], 5);
        assert_eq!(payloads[0].data["totalLikeCount"], 120);
        assert!(payloads[0].data.get("nickname").is_none());
    }

    #[test]
    fn heartbeat_frame_is_empty_batch() {
        let bytes = PushFrame {
            payload_type: "hb".into(),
            ..Default::default()
        }
        .encode_to_vec();
        let decoded = decode_binary(&bytes).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn corrupt_gzip_is_inflate_error() {
        let bytes = PushFrame {
            payload_type: "msg".into(),
            payload_encoding: "gzip".into(),
            payload: vec![1, 2, 3, 4],
            ..Default::default()
        }
        .encode_to_vec();
        let err = decode_binary(&bytes).unwrap_err();
        assert!(matches!(err, DecodeError::Inflate(_)));
    }

    #[test]
    fn unknown_encoding_is_rejected() {
        let bytes = PushFrame {
            payload_type: "msg".into(),
            payload_encoding: "brotli".into(),
            ..Default::default()
        }
        .encode_to_vec();
        let err = decode_binary(&bytes).unwrap_err();
        assert_eq!(err.error_kind(), "unsupported_encoding");
    }

    #[test]
    fn garbage_bytes_are_protobuf_error() {
        let err = decode_binary(&[0xff, 0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, DecodeError::Protobuf(_)));
    }
}
