use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($name:ident) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
    ($name:ident, $prefix:expr) => {
        branded_id!($name);

        impl $name {
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

// Stream ids are assigned by the external store; `new()` exists for local runs and tests.
branded_id!(StreamId, "stream");
// Broadcaster handle on the provider side, e.g. a channel's public username.
branded_id!(UniqueId);

impl UniqueId {
    /// Strips a leading `@`, which users often paste along with the handle.
    pub fn normalized(&self) -> &str {
        self.0.trim().trim_start_matches('@')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_id_has_prefix() {
        let id = StreamId::new();
        assert!(id.as_str().starts_with("stream_"), "got: {id}");
    }

    #[test]
    fn stream_ids_are_unique() {
        assert_ne!(StreamId::new(), StreamId::new());
    }

    #[test]
    fn from_raw_preserves_value() {
        let id = StreamId::from_raw("42");
        assert_eq!(id.as_str(), "42");
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn unique_id_strips_at_sign() {
        assert_eq!(UniqueId::from_raw("@someone").normalized(), "someone");
        assert_eq!(UniqueId::from_raw(" plain ").normalized(), "plain");
    }

    #[test]
    fn ids_serialize_transparently() {
        let id = StreamId::from_raw("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
        let back: StreamId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(back, id);
    }
}
