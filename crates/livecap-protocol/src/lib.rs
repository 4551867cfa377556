//! # livecap-protocol
//!
//! Stateless decoding of provider frames and mapping to canonical events.
//!
//! ```text
//! text / binary frame ──decode_text / decode_binary──▶ Decoded ──normalize──▶ Event
//! ```

#![deny(unsafe_code)]

pub mod frame;
pub mod normalize;
pub mod proto;
pub mod timestamp;

pub use frame::{decode_binary, decode_text, DecodeError, Decoded, DecodedPayload, FrameSource};
pub use normalize::{normalize, normalize_all, STREAM_END_ACTION};
pub use timestamp::normalize_timestamp;
