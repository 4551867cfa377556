//! Protobuf schema of the provider's binary push channel.
//!
//! Hand-declared with `prost` derives; field tags are the wire contract.

use std::collections::HashMap;

/// Outer envelope of every binary frame.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PushFrame {
    #[prost(uint64, tag = "1")]
    pub seq_id: u64,
    #[prost(uint64, tag = "2")]
    pub log_id: u64,
    #[prost(uint64, tag = "3")]
    pub service: u64,
    #[prost(uint64, tag = "4")]
    pub method: u64,
    #[prost(map = "string, string", tag = "5")]
    pub headers: HashMap<String, String>,
    /// `gzip` when `payload` is compressed.
    #[prost(string, tag = "6")]
    pub payload_encoding: String,
    /// `msg` for event batches; `hb`, `ack` and others carry no events.
    #[prost(string, tag = "7")]
    pub payload_type: String,
    #[prost(bytes = "vec", tag = "8")]
    pub payload: Vec<u8>,
}

/// Batch carried by a `msg` push frame.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WebcastResponse {
    #[prost(message, repeated, tag = "1")]
    pub messages: Vec<Message>,
    #[prost(string, tag = "2")]
    pub cursor: String,
    #[prost(int64, tag = "3")]
    pub fetch_interval: i64,
    #[prost(int64, tag = "4")]
    pub now: i64,
    #[prost(bool, tag = "5")]
    pub need_ack: bool,
}

/// One sub-message; `method` names the type encoded in `payload`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Message {
    #[prost(string, tag = "1")]
    pub method: String,
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
    #[prost(int64, tag = "3")]
    pub msg_id: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Common {
    #[prost(string, tag = "1")]
    pub method: String,
    #[prost(int64, tag = "2")]
    pub msg_id: i64,
    #[prost(int64, tag = "3")]
    pub room_id: i64,
    /// Milliseconds since the epoch.
    #[prost(int64, tag = "4")]
    pub create_time: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct User {
    #[prost(int64, tag = "1")]
    pub id: i64,
    #[prost(string, tag = "2")]
    pub unique_id: String,
    #[prost(string, tag = "3")]
    pub nickname: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChatMessage {
    #[prost(message, optional, tag = "1")]
    pub common: Option<Common>,
    #[prost(message, optional, tag = "2")]
    pub user: Option<User>,
    #[prost(string, tag = "3")]
    pub content: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GiftDetails {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(int64, tag = "2")]
    pub diamond_count: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GiftMessage {
    #[prost(message, optional, tag = "1")]
    pub common: Option<Common>,
    #[prost(message, optional, tag = "2")]
    pub user: Option<User>,
    #[prost(int64, tag = "3")]
    pub gift_id: i64,
    #[prost(int64, tag = "4")]
    pub repeat_count: i64,
    #[prost(bool, tag = "5")]
    pub repeat_end: bool,
    #[prost(message, optional, tag = "6")]
    pub gift: Option<GiftDetails>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LikeMessage {
    #[prost(message, optional, tag = "1")]
    pub common: Option<Common>,
    #[prost(message, optional, tag = "2")]
    pub user: Option<User>,
    #[prost(int64, tag = "3")]
    pub count: i64,
    #[prost(int64, tag = "4")]
    pub total: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MemberMessage {
    #[prost(message, optional, tag = "1")]
    pub common: Option<Common>,
    #[prost(message, optional, tag = "2")]
    pub user: Option<User>,
    #[prost(int64, tag = "3")]
    pub action: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RoomUserSeqMessage {
    #[prost(message, optional, tag = "1")]
    pub common: Option<Common>,
    #[prost(int64, tag = "2")]
    pub total: i64,
    #[prost(int64, tag = "3")]
    pub total_user: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SocialMessage {
    #[prost(message, optional, tag = "1")]
    pub common: Option<Common>,
    #[prost(message, optional, tag = "2")]
    pub user: Option<User>,
    #[prost(int64, tag = "3")]
    pub action: i64,
    #[prost(string, tag = "4")]
    pub display_type: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ControlMessage {
    #[prost(message, optional, tag = "1")]
    pub common: Option<Common>,
    #[prost(int64, tag = "2")]
    pub action: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RoomMessage {
    #[prost(message, optional, tag = "1")]
    pub common: Option<Common>,
    #[prost(string, tag = "2")]
    pub title: String,
    #[prost(int64, tag = "3")]
    pub viewer_count: i64,
    #[prost(int64, tag = "4")]
    pub like_count: i64,
}
