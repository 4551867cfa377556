pub mod errors;
pub mod events;
pub mod ids;
pub mod security;
pub mod store;

pub use errors::CaptureError;
pub use events::{Envelope, Event, EventKind, EventPayload, EventUser};
pub use ids::{StreamId, UniqueId};
pub use security::ApiKey;
pub use store::{EventSink, StreamStatus, StreamStore};
